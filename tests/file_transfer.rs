use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use rand::Rng;

use chirplink::device::sim::duplex_pair;
use chirplink::transfer::{receive_to_file, send_file};
use chirplink::ui::progress::ProgressManager;
use chirplink::{LinkConfig, MacLayer, StationId};

#[test]
fn file_arrives_intact_in_chunks() {
    let mut config = LinkConfig::default();
    config.mac.max_payload = 64;
    config.mac.ack_timeout_ms = 3000;

    let dir = std::env::temp_dir().join(format!("chirplink-transfer-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("INPUT.bin");
    let output = dir.join("OUTPUT.bin");
    let mut rng = rand::rng();
    let data: Vec<u8> = (0..150).map(|_| rng.random()).collect();
    std::fs::write(&input, &data).unwrap();

    let alice = StationId([10, 0, 1]);
    let bob = StationId([10, 0, 2]);
    let (near, far) = duplex_pair(config.sample_rate);
    let mut sender = MacLayer::start(config.clone(), alice, &near).unwrap();
    let receiver = MacLayer::start(config, bob, &far).unwrap();

    let out = output.clone();
    let sink = thread::spawn(move || {
        let running = AtomicBool::new(true);
        let written = receive_to_file(
            &receiver,
            Some(alice),
            &out,
            Duration::from_secs(2),
            &running,
            &ProgressManager::hidden(),
        )
        .unwrap();
        receiver.shutdown();
        written
    });

    let report = send_file(&mut sender, bob, &input, &ProgressManager::hidden()).unwrap();
    assert_eq!(report.frames, 3);
    assert_eq!(report.bytes, 150);

    assert_eq!(sink.join().unwrap(), 150);
    assert_eq!(std::fs::read(&output).unwrap(), data);
    let _ = std::fs::remove_dir_all(dir);
}
