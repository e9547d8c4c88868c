//! Settings types. Field names are camelCase in JSON; every section is
//! `#[serde(default)]` so a settings file only needs the keys it changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use venue_core::SceneIndex;

/// Root settings for the coordination server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VenueSettings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub uploads: UploadSettings,
    pub scene: SceneSettings,
    pub operator: OperatorSettings,
    pub logging: LoggingSettings,
}

impl VenueSettings {
    /// Reject combinations the server cannot start with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.max_send_queue == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "server.maxSendQueue must be at least 1".into(),
            ));
        }
        if self.server.client_timeout_secs <= self.server.heartbeat_interval_secs {
            return Err(crate::SettingsError::InvalidValue(format!(
                "server.clientTimeoutSecs ({}) must exceed server.heartbeatIntervalSecs ({})",
                self.server.client_timeout_secs, self.server.heartbeat_interval_secs
            )));
        }
        if self.uploads.max_bytes == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "uploads.maxBytes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP + WebSocket port.
    pub port: u16,
    /// Outbound messages buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// A connection silent for this long is released.
    pub client_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3131,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Directory uploaded audio is written to.
    pub upload_dir: PathBuf,
    /// SQLite file holding submitted text messages.
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            database_path: PathBuf::from("data/venue.db"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadSettings {
    /// Largest accepted upload, in decoded bytes.
    pub max_bytes: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_bytes: 100_000_000,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SceneSettings {
    /// Scene pushed to clients before the operator sets one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial: Option<SceneIndex>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorSettings {
    /// Shared secret required on `POST /scene`. Unset means no check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
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

    #[test]
    fn defaults_match_installation() {
        let s = VenueSettings::default();
        assert_eq!(s.server.port, 3131);
        assert_eq!(s.uploads.max_bytes, 100_000_000);
        assert_eq!(s.storage.upload_dir, PathBuf::from("uploads"));
        assert!(s.scene.initial.is_none());
        assert!(s.operator.token.is_none());
        s.validate().unwrap();
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(VenueSettings::default()).unwrap();
        assert_eq!(json["server"]["maxSendQueue"], 256);
        assert_eq!(json["storage"]["databasePath"], "data/venue.db");
        assert!(json["operator"].get("token").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: VenueSettings =
            serde_json::from_str(r#"{"server":{"port":8080},"scene":{"initial":"lobby"}}"#).unwrap();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.scene.initial, Some(SceneIndex::from("lobby")));
    }

    #[test]
    fn validate_rejects_timeout_below_heartbeat() {
        let mut s = VenueSettings::default();
        s.server.client_timeout_secs = 10;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("clientTimeoutSecs"));
    }

    #[test]
    fn validate_rejects_empty_queue() {
        let mut s = VenueSettings::default();
        s.server.max_send_queue = 0;
        assert!(s.validate().is_err());
    }
}
