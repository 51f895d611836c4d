//! Discovery-token secrets, refreshed from disk.
//!
//! The secrets file is a read-only JSON input of the shape
//! `{"consul_token": "..."}`, reloaded on a fixed cadence. Rotation emits a
//! change notification so components holding coordination clients can
//! rebuild them; nothing caches the token across a rotation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// How often the secrets file is re-read.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("json unmarshal failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct RawSecrets {
    #[serde(default)]
    consul_token: String,
}

/// The process-wide secrets value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    pub discovery_token: String,
}

/// Shared secrets with a rotation signal.
pub struct SecretsStore {
    current: Mutex<Secrets>,
    rotated: watch::Sender<()>,
}

impl SecretsStore {
    pub fn new() -> Arc<Self> {
        let (rotated, _) = watch::channel(());
        Arc::new(Self {
            current: Mutex::new(Secrets::default()),
            rotated,
        })
    }

    /// The current secrets value.
    pub fn get(&self) -> Secrets {
        self.current.lock().clone()
    }

    /// Receive a notification whenever the token rotates.
    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.rotated.subscribe()
    }

    /// Re-read the secrets file, returning whether the token rotated.
    pub fn reload_from(&self, path: &Path) -> Result<bool, SecretsError> {
        let raw: RawSecrets = serde_json::from_slice(&std::fs::read(path)?)?;
        let fresh = Secrets {
            discovery_token: raw.consul_token,
        };

        let mut current = self.current.lock();
        let rotated = !current.discovery_token.is_empty() && *current != fresh;
        *current = fresh;
        drop(current);

        if rotated {
            info!("discovery token rotated");
            let _ = self.rotated.send(());
        }
        Ok(rotated)
    }

    /// Keep re-reading the secrets file every `every`.
    ///
    /// Failures keep the previous value in effect.
    pub fn spawn_refresh(self: &Arc<Self>, path: PathBuf, every: Duration) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // the initial read already happened
            loop {
                ticker.tick().await;
                if let Err(error) = store.reload_from(&path) {
                    warn!(path = %path.display(), %error, "unable to reload secrets");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_secrets(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("mc-guardian-{}-{}", std::process::id(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_the_token() {
        let path = temp_secrets("read", r#"{"consul_token": "s.abc123"}"#);
        let store = SecretsStore::new();
        assert!(!store.reload_from(&path).unwrap());
        assert_eq!(store.get().discovery_token, "s.abc123");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_keeps_previous_value() {
        let path = temp_secrets("keep", r#"{"consul_token": "s.abc123"}"#);
        let store = SecretsStore::new();
        store.reload_from(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(store.reload_from(&path).is_err());
        assert_eq!(store.get().discovery_token, "s.abc123");
    }

    #[test]
    fn rotation_notifies_subscribers() {
        let path = temp_secrets("rotate", r#"{"consul_token": "s.first"}"#);
        let store = SecretsStore::new();
        store.reload_from(&path).unwrap();

        let mut subscriber = store.subscribe();
        assert!(!subscriber.has_changed().unwrap());

        std::fs::write(&path, r#"{"consul_token": "s.second"}"#).unwrap();
        assert!(store.reload_from(&path).unwrap());
        assert!(subscriber.has_changed().unwrap());
        assert_eq!(store.get().discovery_token, "s.second");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn first_load_is_not_a_rotation() {
        let path = temp_secrets("first", r#"{"consul_token": "s.first"}"#);
        let store = SecretsStore::new();
        assert!(!store.reload_from(&path).unwrap());
        std::fs::remove_file(path).ok();
    }
}
