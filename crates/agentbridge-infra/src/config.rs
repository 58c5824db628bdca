//! Configuration loader for agentbridge.
//!
//! Reads `config.toml` and deserializes it into [`BridgeConfig`]. Falls back to
//! defaults when the file is missing or malformed, so the hub always starts.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use agentbridge_types::config::BridgeConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "AGENTBRIDGE_CONFIG";

const CONFIG_FILE: &str = "config.toml";

/// Load configuration from `path`.
///
/// - If the file does not exist, returns [`BridgeConfig::default()`].
/// - If the file exists but cannot be read or parsed, logs a warning and
///   returns the default.
/// - Otherwise returns the parsed config. Call [`BridgeConfig::validate`]
///   before use.
pub async fn load_bridge_config(path: &Path) -> BridgeConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return BridgeConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return BridgeConfig::default();
        }
    };

    match toml::from_str::<BridgeConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            BridgeConfig::default()
        }
    }
}

/// Resolve which config file to load.
///
/// Priority:
/// 1. `--config` flag
/// 2. `AGENTBRIDGE_CONFIG` environment variable
/// 3. `<platform config dir>/agentbridge/config.toml`
///
/// Returns `None` only when no flag or variable is set and the platform has
/// no config directory.
pub fn resolve_config_path(flag: Option<&Path>) -> Option<PathBuf> {
    resolve_from(flag, std::env::var_os(CONFIG_ENV), dirs::config_dir())
}

fn resolve_from(flag: Option<&Path>, env: Option<OsString>, config_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = flag {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    config_dir.map(|dir| dir.join("agentbridge").join(CONFIG_FILE))
}

/// Resolve and load in one step, logging where the config came from.
pub async fn load_resolved(flag: Option<&Path>) -> (BridgeConfig, Option<PathBuf>) {
    match resolve_config_path(flag) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            (load_bridge_config(&path).await, Some(path))
        }
        None => {
            tracing::debug!("no config directory on this platform, using defaults");
            (BridgeConfig::default(), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbridge_types::config::LogFormat;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_bridge_config(&tmp.path().join("config.toml")).await;
        assert_eq!(config, BridgeConfig::default());
    }

    #[tokio::test]
    async fn partial_toml_overrides_only_named_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
[server]
port = 9000

[hub]
history_capacity = 50
transform_intents = ["payload.digest"]

[workers]
max_workers = 3

[logging]
format = "json"
"#,
        )
        .await
        .unwrap();

        let config = load_bridge_config(&path).await;
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.hub.history_capacity, 50);
        assert_eq!(config.hub.transform_intents, vec!["payload.digest".to_string()]);
        assert_eq!(config.hub.heartbeat_interval_secs, 30);
        assert_eq!(config.workers.max_workers, 3);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[tokio::test]
    async fn invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        tokio::fs::write(&path, "this is not { valid toml !!!").await.unwrap();

        let config = load_bridge_config(&path).await;
        assert_eq!(config, BridgeConfig::default());
    }

    #[tokio::test]
    async fn directory_path_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_bridge_config(tmp.path()).await;
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn flag_wins_over_env_and_platform_dir() {
        let resolved = resolve_from(
            Some(Path::new("/etc/bridge.toml")),
            Some(OsString::from("/tmp/env.toml")),
            Some(PathBuf::from("/home/u/.config")),
        );
        assert_eq!(resolved, Some(PathBuf::from("/etc/bridge.toml")));
    }

    #[test]
    fn env_wins_over_platform_dir() {
        let resolved = resolve_from(
            None,
            Some(OsString::from("/tmp/env.toml")),
            Some(PathBuf::from("/home/u/.config")),
        );
        assert_eq!(resolved, Some(PathBuf::from("/tmp/env.toml")));
    }

    #[test]
    fn falls_back_to_platform_dir() {
        let resolved = resolve_from(None, Some(OsString::new()), Some(PathBuf::from("/home/u/.config")));
        assert_eq!(resolved, Some(PathBuf::from("/home/u/.config/agentbridge/config.toml")));
        assert_eq!(resolve_from(None, None, None), None);
    }
}
