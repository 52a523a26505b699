//! Server configuration.

use std::time::Duration;

use relay_core::SweepPolicy;
use relay_settings::RelaySettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for [`crate::server::RelayServer`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
    /// Commands buffered in front of the relay actor.
    pub command_queue_capacity: usize,
    /// Ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Drop a connection after this many seconds without any inbound frame.
    pub heartbeat_timeout_secs: u64,
    /// Absolute session age ceiling in seconds.
    pub session_max_age_secs: u64,
    /// Seconds a completed session stays queryable.
    pub completed_grace_secs: u64,
    /// Sweeper period in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            command_queue_capacity: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            session_max_age_secs: 3600,
            completed_grace_secs: 30,
            sweep_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            send_queue_capacity: settings.server.send_queue_capacity,
            command_queue_capacity: settings.server.command_queue_capacity,
            heartbeat_interval_secs: settings.server.heartbeat_interval_secs,
            heartbeat_timeout_secs: settings.server.heartbeat_timeout_secs,
            session_max_age_secs: settings.sessions.max_age_secs,
            completed_grace_secs: settings.sessions.completed_grace_secs,
            sweep_interval_secs: settings.sessions.sweep_interval_secs,
        }
    }

    /// Eviction policy handed to the relay.
    pub fn sweep_policy(&self) -> SweepPolicy {
        SweepPolicy {
            max_age: Duration::from_secs(self.session_max_age_secs),
            completed_grace: Duration::from_secs(self.completed_grace_secs),
        }
    }

    /// Sweeper period (at least one second).
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Ping interval (at least one second).
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Idle timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.max(1))
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_loopback_on_ephemeral_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
        assert_eq!(cfg.max_message_size, 65_536);
    }

    #[test]
    fn default_sweep_policy() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.sweep_policy(), SweepPolicy::default());
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn from_settings_copies_every_field() {
        let mut settings = RelaySettings::default();
        settings.server.host = "10.0.0.1".into();
        settings.server.port = 9000;
        settings.sessions.max_age_secs = 600;
        settings.sessions.completed_grace_secs = 5;
        settings.sessions.sweep_interval_secs = 10;
        settings.server.heartbeat_interval_secs = 15;

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.bind_addr(), "10.0.0.1:9000");
        assert_eq!(cfg.sweep_policy().max_age, Duration::from_secs(600));
        assert_eq!(cfg.sweep_policy().completed_grace, Duration::from_secs(5));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(10));
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(cfg.send_queue_capacity, settings.server.send_queue_capacity);
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let cfg = ServerConfig {
            sweep_interval_secs: 0,
            heartbeat_interval_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
