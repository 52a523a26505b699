//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the relay.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "sessions": { "maxAgeSecs": 1800 },
///   "logging": { "json": true }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and per-connection limits.
    pub server: ServerSettings,
    /// Session time budgets and sweep cadence.
    pub sessions: SessionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("server.maxMessageSize", self.server.max_message_size as u64),
            ("server.sendQueueCapacity", self.server.send_queue_capacity as u64),
            ("server.commandQueueCapacity", self.server.command_queue_capacity as u64),
            ("server.heartbeatIntervalSecs", self.server.heartbeat_interval_secs),
            ("server.heartbeatTimeoutSecs", self.server.heartbeat_timeout_secs),
            ("sessions.maxAgeSecs", self.sessions.max_age_secs),
            ("sessions.sweepIntervalSecs", self.sessions.sweep_interval_secs),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(SettingsError::InvalidValue(format!("{key} must be > 0")));
        }
        if self.sessions.completed_grace_secs > self.sessions.max_age_secs {
            return Err(SettingsError::InvalidValue(
                "sessions.completedGraceSecs must not exceed sessions.maxAgeSecs".to_string(),
            ));
        }
        if self.server.heartbeat_timeout_secs < self.server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatTimeoutSecs must be >= server.heartbeatIntervalSecs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Listener and per-connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Largest inbound WebSocket frame, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before drops.
    pub send_queue_capacity: usize,
    /// Commands buffered in front of the relay actor.
    pub command_queue_capacity: usize,
    /// WebSocket ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Idle time after which a silent connection is dropped, in seconds.
    pub heartbeat_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            command_queue_capacity: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
        }
    }
}

/// Session lifetime settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Absolute age ceiling for any session.
    pub max_age_secs: u64,
    /// How long completed sessions stay queryable.
    pub completed_grace_secs: u64,
    /// Sweeper period.
    pub sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_age_secs: 3600,
            completed_grace_secs: 30,
            sweep_interval_secs: 60,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let s = RelaySettings::default();
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 8787);
        assert_eq!(s.server.max_message_size, 65_536);
        assert_eq!(s.sessions.max_age_secs, 3600);
        assert_eq!(s.sessions.completed_grace_secs, 30);
        assert_eq!(s.sessions.sweep_interval_secs, 60);
        assert_eq!(s.logging.level, "info");
        assert!(!s.logging.json);
        s.validate().unwrap();
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RelaySettings::default()).unwrap();
        assert_eq!(json["server"]["maxMessageSize"], 65_536);
        assert_eq!(json["sessions"]["completedGraceSecs"], 30);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: RelaySettings = serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.sessions, SessionSettings::default());
    }

    #[test]
    fn zero_sweep_interval_rejected() {
        let mut s = RelaySettings::default();
        s.sessions.sweep_interval_secs = 0;
        let err = s.validate().unwrap_err();
        assert_matches!(err, SettingsError::InvalidValue(ref m) if m.contains("sweepIntervalSecs"));
    }

    #[test]
    fn grace_longer_than_max_age_rejected() {
        let mut s = RelaySettings::default();
        s.sessions.completed_grace_secs = 7200;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn heartbeat_timeout_below_interval_rejected() {
        let mut s = RelaySettings::default();
        s.server.heartbeat_timeout_secs = 10;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }
}
