//! Hub configuration – reads `~/.wayhub/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use wayhub_core::RecoveryPolicy;

/// Acknowledgement-timeout recovery modes, as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum RecoveryMode {
    /// Preserve the queue in the error state; the operator restarts.
    #[default]
    Halt,
    /// Re-send the timed-out frame a bounded number of times first.
    Resend,
}

/// Persisted hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listen address for the operator WebSocket link.
    #[serde(default = "default_operator_addr")]
    pub operator_addr: String,

    /// Base URL of the planning / image recognition service.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Serial device of the motion controller, or `"sim"` for the
    /// auto-acknowledging loopback port.
    #[serde(default = "default_serial_port")]
    pub serial_port: String,

    /// UART baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Per-command acknowledgement window in milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// What to do when that window elapses mid-run.
    #[serde(default)]
    pub recovery: RecoveryMode,

    /// Total dispatch attempts per command under `recovery = "resend"`.
    #[serde(default = "default_resend_attempts")]
    pub resend_attempts: u32,

    /// Capture attempts per SNAP before reporting failure.
    #[serde(default = "default_capture_attempts")]
    pub capture_attempts: u32,
}

fn default_operator_addr() -> String {
    "0.0.0.0:8765".to_string()
}
fn default_api_url() -> String {
    "http://192.168.2.11:5000".to_string()
}
fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_ack_timeout_ms() -> u64 {
    15_000
}
fn default_resend_attempts() -> u32 {
    2
}
fn default_capture_attempts() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            operator_addr: default_operator_addr(),
            api_url: default_api_url(),
            serial_port: default_serial_port(),
            baud_rate: default_baud_rate(),
            ack_timeout_ms: default_ack_timeout_ms(),
            recovery: RecoveryMode::default(),
            resend_attempts: default_resend_attempts(),
            capture_attempts: default_capture_attempts(),
        }
    }
}

impl Config {
    /// The dispatcher-facing recovery policy.
    pub fn recovery_policy(&self) -> RecoveryPolicy {
        match self.recovery {
            RecoveryMode::Halt => RecoveryPolicy::Halt,
            RecoveryMode::Resend => RecoveryPolicy::Resend {
                attempts: self.resend_attempts.max(1),
            },
        }
    }
}

/// Return the path to `~/.wayhub/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".wayhub").join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `WAYHUB_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WAYHUB_OPERATOR_ADDR` | `operator_addr` |
/// | `WAYHUB_API_URL` | `api_url` |
/// | `WAYHUB_SERIAL_PORT` | `serial_port` |
/// | `WAYHUB_BAUD_RATE` | `baud_rate` |
/// | `WAYHUB_ACK_TIMEOUT_MS` | `ack_timeout_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("WAYHUB_OPERATOR_ADDR") {
        cfg.operator_addr = v;
    }
    if let Ok(v) = std::env::var("WAYHUB_API_URL") {
        cfg.api_url = v;
    }
    if let Ok(v) = std::env::var("WAYHUB_SERIAL_PORT") {
        cfg.serial_port = v;
    }
    if let Ok(v) = std::env::var("WAYHUB_BAUD_RATE")
        && let Ok(baud) = v.parse::<u32>()
    {
        cfg.baud_rate = baud;
    }
    if let Ok(v) = std::env::var("WAYHUB_ACK_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.ack_timeout_ms = ms;
    }
}

/// Save the config to disk, creating `~/.wayhub/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
