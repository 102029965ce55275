//! HSMS connection statistics

/// Counters for one HSMS protocol instance
///
/// Updated by the protocol as messages flow; query with
/// [`crate::HsmsProtocol::statistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HsmsStatistics {
    /// Messages written to the connection
    pub messages_sent: u64,
    /// Messages read from the connection
    pub messages_received: u64,
    /// Control messages among the received ones
    pub control_received: u64,
    /// Reject.req messages sent
    pub rejects_sent: u64,
    /// Requests that got no reply in time
    pub timeouts: u64,
    /// Frames dropped as malformed, including T8 expiry
    pub framing_errors: u64,
    /// TCP connections established
    pub connections: u64,
}

impl HsmsStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn increment_sent(&mut self) {
        self.messages_sent += 1;
    }

    pub fn increment_received(&mut self, control: bool) {
        self.messages_received += 1;
        if control {
            self.control_received += 1;
        }
    }

    pub fn increment_rejects(&mut self) {
        self.rejects_sent += 1;
    }

    pub fn increment_timeouts(&mut self) {
        self.timeouts += 1;
    }

    pub fn increment_framing_errors(&mut self) {
        self.framing_errors += 1;
    }

    pub fn increment_connections(&mut self) {
        self.connections += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_clear() {
        let mut stats = HsmsStatistics::new();
        stats.increment_sent();
        stats.increment_received(true);
        stats.increment_received(false);
        stats.increment_rejects();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.control_received, 1);
        assert_eq!(stats.rejects_sent, 1);
        stats.clear();
        assert_eq!(stats, HsmsStatistics::default());
    }
}
