use std::time::{Duration, Instant};

use log::info;

/// Logs the time spent in a scope when dropped.
///
/// ```
/// let _timer = netfanout::timer::ScopedTimer::start("job core");
/// // ... work ...
/// // logs "[job core] Running time: 1.234567s" here
/// ```
#[derive(Debug)]
pub struct ScopedTimer {
    label: String,
    started: Instant,
}

impl ScopedTimer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        info!(
            "[{}] Running time: {:.6}s",
            self.label,
            self.elapsed().as_secs_f64()
        );
    }
}
