//! Slow-operation logging (spec.md §4.7: "slow-log lines are emitted if
//! latency exceeds `put_slow_log_threshold` / `query_slow_log_threshold`").
//!
//! Grounded on the teacher's `util::slow::SlowQuery`, generalized from a
//! single SQL-string payload to the structured `(tid, pid, pk, op)` fields a
//! tablet handler actually has on hand.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub enum SlowOp {
    Put,
    Get,
    Scan,
    Count,
    Traverse,
    Delete,
}

impl SlowOp {
    fn as_str(self) -> &'static str {
        match self {
            SlowOp::Put => "Put",
            SlowOp::Get => "Get",
            SlowOp::Scan => "Scan",
            SlowOp::Count => "Count",
            SlowOp::Traverse => "Traverse",
            SlowOp::Delete => "Delete",
        }
    }

    fn threshold(self, put_threshold: Duration, query_threshold: Duration) -> Duration {
        match self {
            SlowOp::Put | SlowOp::Delete => put_threshold,
            SlowOp::Get | SlowOp::Scan | SlowOp::Count | SlowOp::Traverse => query_threshold,
        }
    }
}

/// Starts timing one request handler invocation. Call [`Self::finish`] when
/// the handler returns; it logs at `warn` if the elapsed time exceeds the
/// configured threshold for the operation kind.
pub struct SlowGuard {
    op: SlowOp,
    tid: u32,
    pid: u32,
    pk: Option<String>,
    start: Instant,
    put_threshold: Duration,
    query_threshold: Duration,
}

impl SlowGuard {
    pub fn new(op: SlowOp, tid: u32, pid: u32, pk: Option<&[u8]>, put_threshold: Duration, query_threshold: Duration) -> Self {
        Self {
            op,
            tid,
            pid,
            pk: pk.map(|k| String::from_utf8_lossy(k).into_owned()),
            start: Instant::now(),
            put_threshold,
            query_threshold,
        }
    }

    pub fn finish(self) -> Option<Duration> {
        let threshold = self.op.threshold(self.put_threshold, self.query_threshold);
        let elapsed = self.start.elapsed();
        if elapsed > threshold {
            tracing::warn!(
                op = self.op.as_str(),
                tid = self.tid,
                pid = self.pid,
                pk = self.pk.as_deref().unwrap_or(""),
                threshold_ms = threshold.as_millis() as u64,
                elapsed_ms = elapsed.as_millis() as u64,
                "SLOW OPERATION"
            );
            return Some(elapsed);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_when_over_threshold() {
        let guard = SlowGuard::new(SlowOp::Put, 1, 0, Some(b"pk"), Duration::from_millis(0), Duration::from_millis(100));
        std::thread::sleep(Duration::from_millis(5));
        assert!(guard.finish().is_some());
    }

    #[test]
    fn silent_under_threshold() {
        let guard = SlowGuard::new(
            SlowOp::Get,
            1,
            0,
            None,
            Duration::from_millis(100),
            Duration::from_secs(60),
        );
        assert!(guard.finish().is_none());
    }
}
