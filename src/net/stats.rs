//! Context traffic statistics

/// Counters kept by a [`crate::Context`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextStats {
    /// Connections accepted from listeners
    pub accepted: u64,
    /// Outgoing connections that completed
    pub connected: u64,
    /// Outgoing connections that failed or timed out
    pub connect_failures: u64,
    /// Incoming connections refused (pool full or setup failure)
    pub accept_failures: u64,
    /// Connections closed after being established
    pub disconnected: u64,
    /// Bytes read from sockets
    pub bytes_received: u64,
    /// Bytes written to sockets
    pub bytes_sent: u64,
    /// Messages delivered to the application
    pub messages_received: u64,
    /// Messages queued for sending
    pub messages_sent: u64,
}

impl ContextStats {
    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "ContextStats {{ accepted: {}, connected: {}, failed: {}/{}, disconnected: {}, rx: {} bytes/{} msgs, tx: {} bytes/{} msgs }}",
            self.accepted,
            self.connected,
            self.connect_failures,
            self.accept_failures,
            self.disconnected,
            self.bytes_received,
            self.messages_received,
            self.bytes_sent,
            self.messages_sent
        )
    }
}
