//! Application-level configuration loading for the synchronization tunables.
//!
//! The offline grace and heartbeat interval come from the original deployment
//! without a documented derivation, so they stay configurable instead of being
//! hard-coded at call sites.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SONGBUZZ_BACK_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Grace period before a departed player is marked offline.
    tombstone_grace: Duration,
    /// Interval between durable heartbeat writes per connected player.
    heartbeat_interval: Duration,
    /// Default clip duration applied to new rooms.
    default_clip_duration_ms: u64,
    /// Maximum players per room, host included.
    max_players: usize,
    /// Rooms with no players older than this are swept.
    idle_room_ttl: Duration,
    /// Ended rooms older than this are swept.
    ended_room_ttl: Duration,
    /// How often the sweeper wakes up.
    sweep_interval: Duration,
}

impl SyncConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded sync configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Grace period before a departed player flips to offline.
    pub fn tombstone_grace(&self) -> Duration {
        self.tombstone_grace
    }

    /// Interval between durable heartbeat writes.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Default clip duration for new rooms, milliseconds.
    pub fn default_clip_duration_ms(&self) -> u64 {
        self.default_clip_duration_ms
    }

    /// Maximum players per room.
    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Idle-room time to live.
    pub fn idle_room_ttl(&self) -> Duration {
        self.idle_room_ttl
    }

    /// Ended-room time to live.
    pub fn ended_room_ttl(&self) -> Duration {
        self.ended_room_ttl
    }

    /// Sweep wake-up interval.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

/// JSON representation of the configuration file.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawConfig {
    tombstone_grace_ms: u64,
    heartbeat_interval_ms: u64,
    default_clip_duration_ms: u64,
    max_players: usize,
    idle_room_ttl_secs: u64,
    ended_room_ttl_secs: u64,
    sweep_interval_secs: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            tombstone_grace_ms: 5_000,
            heartbeat_interval_ms: 10_000,
            default_clip_duration_ms: 30_000,
            max_players: 10,
            idle_room_ttl_secs: 3_600,
            ended_room_ttl_secs: 86_400,
            sweep_interval_secs: 600,
        }
    }
}

impl From<RawConfig> for SyncConfig {
    fn from(raw: RawConfig) -> Self {
        Self {
            tombstone_grace: Duration::from_millis(raw.tombstone_grace_ms),
            heartbeat_interval: Duration::from_millis(raw.heartbeat_interval_ms),
            default_clip_duration_ms: raw.default_clip_duration_ms,
            max_players: raw.max_players,
            idle_room_ttl: Duration::from_secs(raw.idle_room_ttl_secs),
            ended_room_ttl: Duration::from_secs(raw.ended_room_ttl_secs),
            sweep_interval: Duration::from_secs(raw.sweep_interval_secs),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_tunables() {
        let config = SyncConfig::default();
        assert_eq!(config.tombstone_grace(), Duration::from_millis(5_000));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(10_000));
        assert_eq!(config.max_players(), 10);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let raw: RawConfig = serde_json::from_str(r#"{"tombstone_grace_ms": 2500}"#).unwrap();
        let config: SyncConfig = raw.into();
        assert_eq!(config.tombstone_grace(), Duration::from_millis(2_500));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(10_000));
    }
}
