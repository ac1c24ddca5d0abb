//! Configuration hot reload.
//!
//! Both gates are rebuilt from disk without restarting the service:
//!
//! - **File change**: [`start_file_watcher`] uses [`notify`] to watch the
//!   configuration file.
//! - **SIGHUP** (Unix only): [`start_sighup_handler`] reloads on
//!   `kill -HUP <pid>`.
//!
//! A file that fails to load or validate leaves the running gates in place
//! and logs a warning.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use super::HailstormConfig;
use crate::error::Result;
use crate::gateway::Gateway;

/// Load `config_path` and apply it to `gateway`.
pub fn reload_config(gateway: &Gateway, config_path: &Path) -> Result<()> {
    let config = HailstormConfig::load_from_path(config_path)?;
    gateway.apply_config(config)?;
    info!("Configuration reloaded from {}", config_path.display());
    Ok(())
}

/// Watch `config_path` and call [`reload_config`] whenever it changes.
///
/// The watch stops when the returned handle is dropped.
pub fn start_file_watcher(
    config_path: PathBuf,
    gateway: Arc<Gateway>,
) -> notify::Result<RecommendedWatcher> {
    let path = config_path.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                info!("Config file changed, rebuilding gates...");
                if let Err(e) = reload_config(&gateway, &path) {
                    warn!("Config reload failed (keeping current gates): {}", e);
                }
            }
        }
        Err(e) => warn!("File watcher error: {}", e),
    })?;

    watcher.watch(&config_path, RecursiveMode::NonRecursive)?;
    info!("Watching {} for changes", config_path.display());
    Ok(watcher)
}

/// Reload on SIGHUP.
#[cfg(unix)]
pub fn start_sighup_handler(config_path: PathBuf, gateway: Arc<Gateway>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sig = match signal(SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!("SIGHUP reload unavailable: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        while sig.recv().await.is_some() {
            info!("SIGHUP received, reloading configuration...");
            if let Err(e) = reload_config(&gateway, &config_path) {
                warn!("Config reload on SIGHUP failed (keeping current gates): {}", e);
            }
        }
    });
}

#[cfg(not(unix))]
pub fn start_sighup_handler(_config_path: PathBuf, _gateway: Arc<Gateway>) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_json(max_tokens: u64) -> String {
        format!(
            r#"{{
                "input_gate": {{
                    "misuse": {{}},
                    "token_limit": {{ "max_tokens": {max_tokens} }}
                }}
            }}"#
        )
    }

    fn gateway_from(path: &Path) -> Gateway {
        let config = HailstormConfig::load_from_path(path).unwrap();
        Gateway::builder(config).build().unwrap()
    }

    #[test]
    fn reload_rebuilds_gates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hailstorm.json");
        std::fs::write(&path, config_json(100)).unwrap();
        let gateway = gateway_from(&path);

        std::fs::write(
            &path,
            r#"{"input_gate": {"misuse": {}}, "output_gate": {"privacy": {}}}"#,
        )
        .unwrap();
        reload_config(&gateway, &path).unwrap();

        let status = gateway.status();
        assert_eq!(status.input_checks, vec!["misuse"]);
        assert_eq!(status.output_checks, vec!["privacy"]);
        assert!(gateway.config().input_gate.token_limit.is_none());
    }

    #[test]
    fn invalid_json_keeps_current_gates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hailstorm.json");
        std::fs::write(&path, config_json(100)).unwrap();
        let gateway = gateway_from(&path);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(reload_config(&gateway, &path).is_err());
        assert_eq!(gateway.status().input_checks, vec!["token_limit", "misuse"]);
    }

    #[test]
    fn failed_validation_keeps_current_gates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hailstorm.json");
        std::fs::write(&path, config_json(100)).unwrap();
        let gateway = gateway_from(&path);

        std::fs::write(&path, config_json(0)).unwrap();
        assert!(reload_config(&gateway, &path).is_err());
        let limit = gateway.config().input_gate.token_limit.unwrap();
        assert_eq!(limit.max_tokens, 100);
    }

    #[test]
    fn missing_file_keeps_current_gates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hailstorm.json");
        std::fs::write(&path, config_json(100)).unwrap();
        let gateway = gateway_from(&path);

        std::fs::remove_file(&path).unwrap();
        assert!(reload_config(&gateway, &path).is_err());
        assert_eq!(gateway.status().input_checks.len(), 2);
    }

    #[test]
    fn file_watcher_starts_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hailstorm.json");
        std::fs::write(&path, config_json(100)).unwrap();
        let gateway = Arc::new(gateway_from(&path));

        assert!(start_file_watcher(path, gateway).is_ok());
    }

    #[test]
    fn file_watcher_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hailstorm.json");
        std::fs::write(&path, config_json(100)).unwrap();
        let gateway = Arc::new(gateway_from(&path));
        let _watcher = start_file_watcher(path.clone(), gateway.clone()).unwrap();

        std::fs::write(&path, config_json(250)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(500));

        // Event delivery timing varies by platform; only assert when it arrived.
        let max_tokens = gateway.config().input_gate.token_limit.map(|l| l.max_tokens);
        assert!(matches!(max_tokens, Some(100) | Some(250)));
    }
}
