//! Configuration Vault – reads/writes `~/.skyloop/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use skyloop_runtime::{ControlLoopConfig, ExecutorConfig, ManeuverTimeouts};

/// Persisted operator configuration stored in `~/.skyloop/config.toml`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the Ollama instance.
    pub ollama_url: String,

    /// Model used as the oracle.
    pub model: String,

    /// Vehicle address (e.g. `sim://`).
    pub vehicle_address: String,

    /// Pause between control cycles.
    pub update_interval_secs: f64,

    /// Stop after this many seconds; absent runs until Ctrl-C.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_duration_secs: Option<f64>,

    /// Fixed mission text.  When set, stdin is not read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mission: Option<String>,

    pub poll_interval_ms: u64,
    pub oracle_timeout_secs: f64,
    pub takeoff_timeout_secs: f64,
    pub goto_timeout_secs: f64,
    pub land_timeout_secs: f64,
    pub rtl_timeout_secs: f64,
    pub failsafe_wait_secs: f64,
    pub ready_timeout_secs: f64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("ollama_url", &self.ollama_url)
            .field("model", &self.model)
            .field("vehicle_address", &self.vehicle_address)
            .field("update_interval_secs", &self.update_interval_secs)
            .field("run_duration_secs", &self.run_duration_secs)
            .field(
                "mission",
                if self.mission.is_some() { &"<scripted>" } else { &"<operator>" },
            )
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("oracle_timeout_secs", &self.oracle_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model: "llama3.2:1b".to_string(),
            vehicle_address: "sim://".to_string(),
            update_interval_secs: 3.0,
            run_duration_secs: None,
            mission: None,
            poll_interval_ms: 500,
            oracle_timeout_secs: 60.0,
            takeoff_timeout_secs: 60.0,
            goto_timeout_secs: 300.0,
            land_timeout_secs: 120.0,
            rtl_timeout_secs: 300.0,
            failsafe_wait_secs: 120.0,
            ready_timeout_secs: 30.0,
        }
    }
}

impl Config {
    pub fn control_loop(&self) -> ControlLoopConfig {
        ControlLoopConfig {
            update_interval: secs(self.update_interval_secs),
            run_duration: self.run_duration_secs.map(secs),
            failsafe_wait: secs(self.failsafe_wait_secs),
        }
    }

    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            timeouts: ManeuverTimeouts {
                takeoff: secs(self.takeoff_timeout_secs),
                goto: secs(self.goto_timeout_secs),
                land: secs(self.land_timeout_secs),
                rtl: secs(self.rtl_timeout_secs),
            },
        }
    }

    pub fn oracle_timeout(&self) -> Duration {
        secs(self.oracle_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        secs(self.ready_timeout_secs)
    }
}

/// Negative, NaN and out-of-range values clamp to zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Return the path to `~/.skyloop/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".skyloop").join("config.toml")
}

/// Load the config from disk, with environment overrides applied.
/// Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `SKYLOOP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SKYLOOP_OLLAMA_URL` | `ollama_url` |
/// | `SKYLOOP_MODEL` | `model` |
/// | `SKYLOOP_VEHICLE_ADDRESS` | `vehicle_address` |
/// | `SKYLOOP_UPDATE_INTERVAL_SECS` | `update_interval_secs` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SKYLOOP_OLLAMA_URL") {
        cfg.ollama_url = v;
    }
    if let Ok(v) = std::env::var("SKYLOOP_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("SKYLOOP_VEHICLE_ADDRESS") {
        cfg.vehicle_address = v;
    }
    if let Ok(v) = std::env::var("SKYLOOP_UPDATE_INTERVAL_SECS")
        && let Ok(secs) = v.trim().parse::<f64>()
        && secs.is_finite()
        && secs >= 0.0
    {
        cfg.update_interval_secs = secs;
    }
}

/// Save the config to disk, creating `~/.skyloop/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.ollama_url, "http://localhost:11434");
        assert_eq!(cfg.model, "llama3.2:1b");
        assert_eq!(cfg.vehicle_address, "sim://");
        assert_eq!(cfg.control_loop().update_interval, Duration::from_secs(3));
        assert_eq!(cfg.control_loop().run_duration, None);
        assert_eq!(cfg.executor().poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.executor().timeouts, ManeuverTimeouts::default());
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            mission: Some("Take off to 10m then land".to_string()),
            run_duration_secs: Some(90.0),
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.mission.as_deref(), Some("Take off to 10m then land"));
        assert_eq!(loaded.control_loop().run_duration, Some(Duration::from_secs(90)));
        assert_eq!(loaded.model, cfg.model);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = \"qwen2.5:3b\"\nupdate_interval_secs = 1.5\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.model, "qwen2.5:3b");
        assert_eq!(loaded.update_interval_secs, 1.5);
        assert_eq!(loaded.goto_timeout_secs, 300.0);
        assert!(loaded.mission.is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "update_interval_secs = \"soon\"").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn config_path_points_to_skyloop_dir() {
        let p = config_path_for_home("/home/pilot");
        assert_eq!(p, PathBuf::from("/home/pilot/.skyloop/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        let cfg = Config {
            update_interval_secs: -1.0,
            failsafe_wait_secs: f64::NAN,
            ..Config::default()
        };
        assert_eq!(cfg.control_loop().update_interval, Duration::ZERO);
        assert_eq!(cfg.control_loop().failsafe_wait, Duration::ZERO);
    }

    #[test]
    fn debug_hides_mission_text() {
        let cfg = Config {
            mission: Some("survey the north field".to_string()),
            ..Config::default()
        };
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("north field"));
        assert!(debug_str.contains("<scripted>"));
    }

    // Env-var tests share one test function so they cannot race each other.
    #[test]
    fn apply_env_overrides() {
        // SAFETY: the only test in this crate touching these variables.
        unsafe {
            std::env::set_var("SKYLOOP_OLLAMA_URL", "http://gpu-box:11434");
            std::env::set_var("SKYLOOP_MODEL", "llama3.1:8b");
            std::env::set_var("SKYLOOP_VEHICLE_ADDRESS", "sim://");
            std::env::set_var("SKYLOOP_UPDATE_INTERVAL_SECS", "5");
        }
        let mut cfg = Config::default();
        super::apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ollama_url, "http://gpu-box:11434");
        assert_eq!(cfg.model, "llama3.1:8b");
        assert_eq!(cfg.update_interval_secs, 5.0);

        unsafe { std::env::set_var("SKYLOOP_UPDATE_INTERVAL_SECS", "often") };
        let mut cfg = Config::default();
        super::apply_env_overrides(&mut cfg);
        assert_eq!(cfg.update_interval_secs, 3.0);

        unsafe {
            std::env::remove_var("SKYLOOP_OLLAMA_URL");
            std::env::remove_var("SKYLOOP_MODEL");
            std::env::remove_var("SKYLOOP_VEHICLE_ADDRESS");
            std::env::remove_var("SKYLOOP_UPDATE_INTERVAL_SECS");
        }
    }
}
