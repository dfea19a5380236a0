//! Wall-clock timing for pipeline stages.

use std::time::{Duration, Instant};

use tracing::info;

/// Logs how long a named step took when finished.
///
/// ```rust,ignore
/// let t = Timer::start("build-kernel");
/// run_make()?;
/// t.finish();
/// ```
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        info!("{} finished in {}", self.name, format_duration(elapsed));
        elapsed
    }
}

/// `42.0s` below a minute, `1.5m` above.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}
