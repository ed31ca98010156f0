use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Named indicatif bars shared between the CLI and transfer loops.
#[derive(Clone)]
pub struct ProgressManager {
    mp: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            mp: MultiProgress::new(),
            bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Hidden bars, for tests and non-interactive runs.
    pub fn hidden() -> Self {
        Self {
            mp: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 创建新的进度条
    /// - `id`: 进度条唯一标识
    /// - `total`: 总进度值
    /// - `template`: 进度条模板
    /// - `message`: 初始消息
    pub fn create_bar(
        &self,
        id: &str,
        total: u64,
        template: &str,
        message: &str,
    ) -> Result<(), String> {
        let style = ProgressStyle::default_bar()
            .template(template)
            .map_err(|e| format!("Bad template: {}", e))?
            .progress_chars("█▉▊▋▌▍▎▏ ");

        let mut bars = self
            .bars
            .lock()
            .map_err(|e| format!("Lock error: {}", e))?;
        if bars.contains_key(id) {
            return Err(format!("Progress bar '{}' already exists", id));
        }

        let pb = self.mp.add(ProgressBar::new(total));
        pb.set_style(style);
        pb.set_message(message.to_string());
        bars.insert(id.to_string(), pb);
        Ok(())
    }

    fn with_bar(&self, id: &str, f: impl FnOnce(&ProgressBar)) -> Result<(), String> {
        let bars = self
            .bars
            .lock()
            .map_err(|e| format!("Lock error: {}", e))?;
        match bars.get(id) {
            Some(pb) => {
                f(pb);
                Ok(())
            }
            None => Err(format!("Progress bar '{}' not found", id)),
        }
    }

    /// 增加进度条位置
    pub fn inc(&self, id: &str, value: u64) -> Result<(), String> {
        self.with_bar(id, |pb| pb.inc(value))
    }

    /// 更新进度条消息
    pub fn set_message(&self, id: &str, message: &str) -> Result<(), String> {
        self.with_bar(id, |pb| pb.set_message(message.to_string()))
    }

    /// 完成进度条（保留显示）
    pub fn finish(&self, id: &str, message: &str) -> Result<(), String> {
        self.with_bar(id, |pb| pb.finish_with_message(message.to_string()))
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

pub mod templates {
    pub const SENDER: &str =
        "\u{f048a} SEND [{bar:30.cyan}] {percent}% ({pos}/{len} bytes) {msg}";
    pub const RECEIVER: &str = "\u{f04e6} RECV {spinner} {pos} bytes {msg}";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_bookkeeping() {
        let pm = ProgressManager::hidden();
        pm.create_bar("tx", 10, templates::SENDER, "peer").unwrap();
        assert!(pm.create_bar("tx", 10, templates::SENDER, "peer").is_err());

        pm.inc("tx", 4).unwrap();
        pm.set_message("tx", "1 retransmission").unwrap();
        assert!(pm.inc("missing", 1).is_err());
        assert!(pm.set_message("missing", "?").is_err());

        pm.finish("tx", "done").unwrap();
        assert!(pm.finish("missing", "done").is_err());
    }
}
