use tokio::time::Instant;

/// Per-connection liveness tracker (spec §4.5). Each tick either closes
/// the connection (a previous ping went unanswered) or sends a fresh ping
/// and records the send time. The effective timeout is exactly one
/// interval tick.
pub struct Heartbeat {
    last_ping_sent: Option<Instant>,
    last_pong_at: Option<Instant>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            last_ping_sent: None,
            last_pong_at: None,
        }
    }

    /// Record a pong arrival. Only updates bookkeeping — never emits a
    /// response per the wire protocol.
    pub fn record_pong(&mut self, now: Instant) {
        self.last_pong_at = Some(now);
    }

    /// Decide what to do on a tick: close the connection for a missed
    /// pong, or record that a new ping is about to be sent.
    pub fn on_tick(&mut self, now: Instant) -> TickOutcome {
        if let Some(sent) = self.last_ping_sent {
            let answered = self.last_pong_at.is_some_and(|pong| pong >= sent);
            if !answered {
                return TickOutcome::TimedOut;
            }
        }
        self.last_ping_sent = Some(now);
        TickOutcome::SendPing
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    SendPing,
    TimedOut,
}
