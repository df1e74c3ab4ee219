//! Process-wide key/value settings persisted in the local store.
//!
//! Reads come from an in-memory snapshot. [`Settings::update`] commits to the
//! store before the snapshot changes, so no component ever observes a value
//! that is not persisted. Credential waits re-read the store every
//! [`CREDENTIAL_POLL_INTERVAL`] because an operator may write credentials from
//! another process at any time.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::errors::{RemoteError, StoreError};
use crate::remote::CredentialSource;
use crate::store::Store;

/// Recognised setting keys.
pub mod keys {
    pub const API_ID:            &str = "tg_api_id";
    pub const API_HASH:          &str = "tg_api_hash";
    pub const PHONE_NUMBER:      &str = "tg_phone_number";
    pub const VERIFICATION_CODE: &str = "tg_verification_code";
    pub const PASSWORD:          &str = "tg_password";
    pub const FIRST_NAME:        &str = "tg_first_name";
    pub const LAST_NAME:         &str = "tg_last_name";
    pub const USE_LIVE_UPDATE:   &str = "use_live_update";
    pub const UPDATE_INTERVAL:   &str = "update_interval";
}

/// Keys seeded on setup, with their initial values.
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    (keys::API_ID, ""),
    (keys::API_HASH, ""),
    (keys::PHONE_NUMBER, ""),
    (keys::VERIFICATION_CODE, ""),
    (keys::PASSWORD, ""),
    (keys::FIRST_NAME, ""),
    (keys::LAST_NAME, ""),
    (keys::USE_LIVE_UPDATE, "false"),
    (keys::UPDATE_INTERVAL, "60"),
];

/// How often a credential wait re-reads the store.
pub const CREDENTIAL_POLL_INTERVAL: Duration = Duration::from_millis(500);

const DEFAULT_UPDATE_INTERVAL_MINUTES: f64 = 60.0;

/// Longest polling interval honoured; larger values are clamped to it.
pub const MAX_UPDATE_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

// ─── SyncMode ─────────────────────────────────────────────────────────────────

/// How the worker learns about new messages.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SyncMode {
    /// React to push notifications.
    Live,
    /// Full resync every `interval`.
    Polling { interval: Duration },
}

// ─── Settings ─────────────────────────────────────────────────────────────────

/// Shared settings handle. Cheap to clone.
#[derive(Clone)]
pub struct Settings {
    inner: Arc<SettingsInner>,
}

struct SettingsInner {
    store:   Store,
    values:  RwLock<HashMap<String, String>>,
    changed: Notify,
}

impl Settings {
    /// Load the current settings from `store`.
    pub fn load(store: Store) -> Result<Self, StoreError> {
        let values = store.load_settings()?;
        Ok(Self {
            inner: Arc::new(SettingsInner {
                store,
                values:  RwLock::new(values),
                changed: Notify::new(),
            }),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    /// Copy of every setting.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.read().clone()
    }

    /// Apply `changes` to keys that already exist and hold a different value.
    ///
    /// Unknown keys are ignored. Returns how many keys were written. Nothing
    /// is touched in memory unless the store accepted the write.
    pub fn update(&self, changes: &HashMap<String, String>) -> Result<usize, StoreError> {
        let dirty: HashMap<String, String> = {
            let values = self.read();
            changes
                .iter()
                .filter(|(key, value)| values.get(*key).is_some_and(|current| current != *value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };
        if dirty.is_empty() {
            return Ok(0);
        }

        tracing::info!("[tgstash] Updating {} setting(s)", dirty.len());
        self.inner.store.save_settings(&dirty)?;
        {
            let mut values = self.write();
            for (key, value) in &dirty {
                values.insert(key.clone(), value.clone());
            }
        }
        self.inner.changed.notify_waiters();
        Ok(dirty.len())
    }

    /// Replace the snapshot with what the store currently holds.
    pub fn reload(&self) -> Result<(), StoreError> {
        let fresh = self.inner.store.load_settings()?;
        *self.write() = fresh;
        Ok(())
    }

    /// Live updates when `use_live_update` is exactly `"true"`, polling otherwise.
    pub fn mode(&self) -> SyncMode {
        if self.get(keys::USE_LIVE_UPDATE).as_deref() == Some("true") {
            return SyncMode::Live;
        }
        SyncMode::Polling { interval: self.update_interval() }
    }

    /// `update_interval` in minutes, capped at [`MAX_UPDATE_INTERVAL`].
    /// Unparseable, non-positive, zero-length or unrepresentable values fall
    /// back to one hour.
    pub fn update_interval(&self) -> Duration {
        let raw = self.get(keys::UPDATE_INTERVAL).unwrap_or_default();
        let interval = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|minutes| *minutes > 0.0)
            .and_then(|minutes| Duration::try_from_secs_f64(minutes * 60.0).ok())
            .filter(|interval| !interval.is_zero());
        match interval {
            Some(interval) if interval > MAX_UPDATE_INTERVAL => {
                tracing::warn!("[tgstash] update_interval {raw:?} is too long, using {MAX_UPDATE_INTERVAL:?}");
                MAX_UPDATE_INTERVAL
            }
            Some(interval) => interval,
            None => {
                tracing::warn!(
                    "[tgstash] Invalid update_interval {raw:?}, using {DEFAULT_UPDATE_INTERVAL_MINUTES} minutes"
                );
                Duration::from_secs_f64(DEFAULT_UPDATE_INTERVAL_MINUTES * 60.0)
            }
        }
    }

    /// Wait until `key` holds a non-empty value, or `cancel` fires.
    ///
    /// Wakes on every in-process update and re-reads the store every
    /// [`CREDENTIAL_POLL_INTERVAL`].
    pub async fn wait_for(&self, key: &str, cancel: &CancellationToken) -> Result<String, RemoteError> {
        let mut announced = false;
        loop {
            let notified = self.inner.changed.notified();
            if let Some(value) = self.get(key).filter(|v| !v.is_empty()) {
                return Ok(value);
            }
            if !announced {
                tracing::info!("[tgstash] Waiting for setting {key:?} to be filled in");
                announced = true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                _ = notified => {}
                _ = tokio::time::sleep(CREDENTIAL_POLL_INTERVAL) => {
                    if let Err(e) = self.reload() {
                        tracing::warn!("[tgstash] Reloading settings failed: {e}");
                    }
                }
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.inner.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.inner.values.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── SettingsCredentials ──────────────────────────────────────────────────────

/// [`CredentialSource`] that blocks on the settings store.
pub struct SettingsCredentials {
    settings: Settings,
    cancel:   CancellationToken,
}

impl SettingsCredentials {
    pub fn new(settings: Settings, cancel: CancellationToken) -> Self {
        Self { settings, cancel }
    }
}

#[async_trait]
impl CredentialSource for SettingsCredentials {
    async fn credential(&self, key: &str) -> Result<String, RemoteError> {
        self.settings.wait_for(key, &self.cancel).await
    }
}
