//! Operation timing
//!
//! When `enable_performance_metrics` is on, every public write operation is
//! wrapped in an [`OpTimer`] that reports its wall time through `tracing`.

use std::time::Instant;
use tracing::debug;

/// Elapsed-time recorder for one operation
pub(crate) struct OpTimer {
    name: &'static str,
    started: Option<Instant>,
}

impl OpTimer {
    /// Start timing `name`; a disabled timer costs nothing
    pub(crate) fn start(name: &'static str, enabled: bool) -> Self {
        Self {
            name,
            started: enabled.then(Instant::now),
        }
    }

    /// Report the elapsed time
    pub(crate) fn finish(self) {
        if let Some(started) = self.started {
            debug!(
                target: "reflow::metrics",
                op = self.name,
                elapsed_us = started.elapsed().as_micros() as u64,
                "operation timed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_timer_is_inert() {
        let timer = OpTimer::start("set", false);
        assert!(timer.started.is_none());
        timer.finish();
    }

    #[test]
    fn test_enabled_timer_records_start() {
        let timer = OpTimer::start("merge", true);
        assert!(timer.started.is_some());
        timer.finish();
    }
}
