/// Outbound buffer drop threshold for reactive pushes (spec §4.6).
///
/// Request/response writes are never subject to this gate — only pushes
/// delivered from the Subscription Manager. Dropping is silent: reactive
/// queries converge, so the next change delivers the full current state
/// and a dropped push is never missed permanently.
#[derive(Debug, Clone, Copy)]
pub struct BackpressureGate {
    max_buffered_bytes: usize,
    high_water_mark: f64,
}

impl BackpressureGate {
    pub fn new(max_buffered_bytes: usize, high_water_mark: f64) -> Self {
        Self {
            max_buffered_bytes,
            high_water_mark,
        }
    }

    /// A gate that never drops (used when backpressure is not configured).
    pub fn unbounded() -> Self {
        Self {
            max_buffered_bytes: usize::MAX,
            high_water_mark: 1.0,
        }
    }

    fn threshold(&self) -> f64 {
        self.max_buffered_bytes as f64 * self.high_water_mark
    }

    /// True when a push should be dropped given the transport's current
    /// pending outbound byte count.
    pub fn should_drop(&self, pending_bytes: usize) -> bool {
        pending_bytes as f64 >= self.threshold()
    }
}
