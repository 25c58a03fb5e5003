use std::net::SocketAddr;

use anyhow::bail;

/// Context object for a peer, passed to the dispatcher at construction
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// the address the peer listens on for incoming connections - port 0 binds an ephemeral port
    pub self_addr: SocketAddr,

    /// The number of deltas a publisher retains per resource for backfilling subscribers that
    ///  reconnect. A subscriber that fell further behind than this gets a full snapshot instead.
    pub delta_log_capacity: usize,

    /// upper limit for a frame's payload in either direction
    pub max_frame_len: u32,
    /// number of bytes read from a socket in one non-blocking read
    pub read_chunk_size: usize,
    /// Reads per readiness event. A connection that still has data after this many reads yields
    ///  to other work and is picked up again by its next readiness event.
    pub max_reads_per_event: usize,
    /// Outgoing bytes buffered per connection. A peer that does not drain its connection fast
    ///  enough to stay below this limit is disconnected.
    pub max_outbound_buffer: usize,

    /// capacity of the channel carrying socket readiness events to the reactor
    pub event_channel_size: usize,
}

impl PeerConfig {
    pub fn new(self_addr: SocketAddr) -> PeerConfig {
        PeerConfig {
            self_addr,
            delta_log_capacity: 64,
            max_frame_len: 16*1024*1024,
            read_chunk_size: 64*1024,
            max_reads_per_event: 16,
            max_outbound_buffer: 64*1024*1024,
            event_channel_size: 1024,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.delta_log_capacity == 0 {
            bail!("delta log capacity must be positive");
        }
        if self.max_frame_len < 16 {
            bail!("maximum frame length {} is too small", self.max_frame_len);
        }
        if self.read_chunk_size == 0 {
            bail!("read chunk size must be positive");
        }
        if self.max_reads_per_event == 0 {
            bail!("reads per event must be positive");
        }
        if self.max_outbound_buffer < self.max_frame_len as usize {
            bail!("outbound buffer limit ({}) must be at least the maximum frame length ({})", self.max_outbound_buffer, self.max_frame_len);
        }
        if self.event_channel_size == 0 {
            bail!("event channel size must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn config() -> PeerConfig {
        PeerConfig::new(([127, 0, 0, 1], 0).into())
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[rstest]
    #[case::zero_log_capacity(|c: &mut PeerConfig| c.delta_log_capacity = 0)]
    #[case::tiny_frame(|c: &mut PeerConfig| c.max_frame_len = 15)]
    #[case::zero_read_chunk(|c: &mut PeerConfig| c.read_chunk_size = 0)]
    #[case::zero_reads_per_event(|c: &mut PeerConfig| c.max_reads_per_event = 0)]
    #[case::outbound_below_frame(|c: &mut PeerConfig| c.max_outbound_buffer = 1024)]
    #[case::zero_event_channel(|c: &mut PeerConfig| c.event_channel_size = 0)]
    fn test_validate_rejects(#[case] tweak: fn(&mut PeerConfig)) {
        let mut config = config();
        tweak(&mut config);
        assert!(config.validate().is_err());
    }
}
