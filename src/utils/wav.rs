use std::path::Path;

use crate::error::{LinkError, Result};

fn wav_err(err: hound::Error) -> LinkError {
    match err {
        hound::Error::IoError(io) => LinkError::Io(io),
        other => LinkError::Transport(format!("wav: {other}")),
    }
}

/// Write mono PCM16 samples to a WAV file, creating parent directories.
pub fn write_wav(samples: &[i16], sample_rate: u32, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)
}

/// Read a mono WAV file back as PCM16, returning the samples and the file's
/// sample rate. Float and wider integer files are rescaled; extra channels
/// other than the first are dropped.
pub fn read_wav(path: &Path) -> Result<(Vec<i16>, u32)> {
    let reader = hound::WavReader::open(path).map_err(wav_err)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| {
                s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .map_err(wav_err)
            })
            .collect::<Result<_>>()?,
        hound::SampleFormat::Int => {
            let shift = spec.bits_per_sample.saturating_sub(16) as u32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16).map_err(wav_err))
                .collect::<Result<_>>()?
        }
    };

    let mono = samples
        .into_iter()
        .step_by(channels)
        .collect();
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_write_read() {
        let dir = std::env::temp_dir().join(format!("chirplink-wav-{}", std::process::id()));
        let path = dir.join("tone.wav");
        let samples: Vec<i16> = (0..500).map(|i| (i * 37 % 2000 - 1000) as i16).collect();

        write_wav(&samples, 44100, &path).unwrap();
        let (back, rate) = read_wav(&path).unwrap();

        assert_eq!(rate, 44100);
        assert_eq!(back, samples);
        let _ = std::fs::remove_dir_all(dir);
    }
}
