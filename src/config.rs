//! Context configuration

use std::time::Duration;

use crate::{
    error::{NetError, Result},
    net::ClientTls,
};

/// Seconds an outgoing connection may take before it is reported as failed
pub const CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// Receive ring capacity of every connection, in bytes
pub const MAX_INCOMING_BUFFER_SIZE: usize = 64 << 10;

/// Smallest accepted receive ring (room for a frame header plus payload)
pub const MIN_INCOMING_BUFFER_SIZE: usize = 16;

/// Default number of simultaneous connections
pub const DEFAULT_MAX_CONNECTIONS: u16 = 256;

/// Default number of simultaneous listen sockets
pub const DEFAULT_MAX_LISTEN_SOCKETS: u16 = 8;

/// Default payload budget of the message allocator
pub const DEFAULT_MESSAGE_BUDGET: usize = 16 << 20;

/// Default readiness events handled per poll
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a [`crate::Context`]
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Capacity of the connection pool
    pub max_connections: u16,
    /// Capacity of the listener pool (0 for client-only contexts)
    pub max_listen_sockets: u16,
    /// Deadline for outgoing connections
    pub connect_timeout: Duration,
    /// Receive ring capacity per connection (power of two)
    pub incoming_buffer_size: usize,
    /// Payload bytes all live messages may hold together
    pub message_budget: usize,
    /// Readiness events handled per poll
    pub event_capacity: usize,
    /// Client TLS settings used by secure `connect` calls
    pub client_tls: Option<ClientTls>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_listen_sockets: DEFAULT_MAX_LISTEN_SOCKETS,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECONDS),
            incoming_buffer_size: MAX_INCOMING_BUFFER_SIZE,
            message_budget: DEFAULT_MESSAGE_BUDGET,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            client_tls: None,
        }
    }
}

impl ContextConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection pool capacity
    pub fn with_max_connections(mut self, max: u16) -> Self {
        self.max_connections = max;
        self
    }

    /// Set listener pool capacity
    pub fn with_max_listen_sockets(mut self, max: u16) -> Self {
        self.max_listen_sockets = max;
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set receive ring capacity
    pub fn with_incoming_buffer_size(mut self, size: usize) -> Self {
        self.incoming_buffer_size = size;
        self
    }

    /// Set message payload budget
    pub fn with_message_budget(mut self, budget: usize) -> Self {
        self.message_budget = budget;
        self
    }

    /// Set events per poll
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set client TLS settings
    pub fn with_client_tls(mut self, tls: ClientTls) -> Self {
        self.client_tls = Some(tls);
        self
    }

    /// Largest payload a framed connection can receive
    pub fn max_frame_payload(&self) -> usize {
        (self.incoming_buffer_size - crate::net::FRAME_HEADER_SIZE).min(u16::MAX as usize)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(NetError::invalid_parameter(
                "max_connections",
                "Connection pool capacity cannot be zero",
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(NetError::invalid_parameter(
                "connect_timeout",
                "Connect timeout cannot be zero",
            ));
        }

        if !self.incoming_buffer_size.is_power_of_two()
            || self.incoming_buffer_size < MIN_INCOMING_BUFFER_SIZE
        {
            return Err(NetError::invalid_parameter(
                "incoming_buffer_size",
                format!(
                    "Receive ring must be a power of two of at least {} bytes",
                    MIN_INCOMING_BUFFER_SIZE
                ),
            ));
        }

        // Otherwise a frame the ring accepts could never be delivered
        if self.message_budget < self.max_frame_payload() {
            return Err(NetError::invalid_parameter(
                "message_budget",
                format!(
                    "Message budget must hold the largest frame payload ({} bytes)",
                    self.max_frame_payload()
                ),
            ));
        }

        if self.event_capacity == 0 {
            return Err(NetError::invalid_parameter(
                "event_capacity",
                "Event capacity cannot be zero",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.incoming_buffer_size, 65536);
        assert!(config.validate().is_ok());
        assert_eq!(config.max_frame_payload(), 65534);
    }

    #[test]
    fn test_builder() {
        let config = ContextConfig::new()
            .with_max_connections(4)
            .with_max_listen_sockets(0)
            .with_incoming_buffer_size(1024)
            .with_connect_timeout(Duration::from_millis(250));
        assert!(config.validate().is_ok());
        assert_eq!(config.max_frame_payload(), 1022);
    }

    #[test]
    fn test_validation_failures() {
        assert!(ContextConfig::new().with_max_connections(0).validate().is_err());
        assert!(ContextConfig::new().with_incoming_buffer_size(1000).validate().is_err());
        assert!(ContextConfig::new().with_incoming_buffer_size(8).validate().is_err());
        assert!(ContextConfig::new()
            .with_connect_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ContextConfig::new().with_event_capacity(0).validate().is_err());
    }

    #[test]
    fn test_budget_must_hold_largest_frame() {
        let config = ContextConfig::new().with_incoming_buffer_size(4096);
        assert!(config.clone().with_message_budget(0).validate().is_err());
        assert!(config.clone().with_message_budget(8).validate().is_err());
        assert!(matches!(
            config.clone().with_message_budget(4093).validate(),
            Err(NetError::InvalidParameter { .. })
        ));
        assert!(config.with_message_budget(4094).validate().is_ok());
    }
}
