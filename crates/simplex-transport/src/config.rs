/// Configuration for the in-memory loopback transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-endpoint inbound channel capacity before `send` backpressures.
    pub channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { channel_capacity: 256 }
    }
}
