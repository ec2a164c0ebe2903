//! API-key authentication, method-aware authorization and failure lockout.
//!
//! Keys are opaque random tokens held in memory. The manager is seeded with
//! one master key carrying [`Permission::All`]; further keys are minted with
//! [`AuthManager::create_key`]. Raw keys never appear in logs, only their
//! [`fingerprint`].
//!
//! Lockout is tracked per client identity: failures older than the lockout
//! window are purged before every read, and the caller is locked while the
//! surviving count is at or above `max_login_attempts`.

use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use http::{HeaderMap, Method};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;

/// Header carrying a bare API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// A grant held by an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Safe methods (GET, HEAD, OPTIONS)
    Read,
    /// Mutating methods
    Write,
    /// Bypasses method checks
    All,
}

impl Permission {
    /// Permission a method requires.
    pub fn required_for(method: &Method) -> Self {
        if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
            Permission::Read
        } else {
            Permission::Write
        }
    }
}

/// A registered API key.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    /// The opaque key
    #[serde(skip)]
    pub key: String,
    /// Display name
    pub name: String,
    /// Grants
    pub permissions: BTreeSet<Permission>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful validation
    pub last_used: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    /// Log-safe identifier for this key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.key)
    }

    /// Whether this key holds `permission` (or `all`).
    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions.contains(&Permission::All) || self.permissions.contains(&permission)
    }
}

/// Recent authentication failures for one client.
#[derive(Debug, Default)]
struct LockoutState {
    failures: VecDeque<Instant>,
}

impl LockoutState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Short SHA-256 fingerprint of a key, safe to log.
pub fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Generate a URL-safe key from `bytes` random bytes.
pub fn generate_key(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Pull a key from `Authorization: Bearer …` or `X-API-Key`.
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    bearer
        .or_else(|| {
            headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .filter(|k| !k.is_empty())
}

/// In-memory key store and lockout tracker.
#[derive(Debug)]
pub struct AuthManager {
    keys: DashMap<String, ApiKeyRecord>,
    lockouts: DashMap<String, LockoutState>,
    master_key: String,
    config: AuthConfig,
}

impl AuthManager {
    /// Create a manager seeded with a fresh master key.
    pub fn new(config: AuthConfig) -> Self {
        let master_key = generate_key(config.api_key_length);
        let manager = Self {
            keys: DashMap::new(),
            lockouts: DashMap::new(),
            master_key: master_key.clone(),
            config,
        };
        manager.insert_key(master_key, "master", [Permission::All]);

        tracing::info!(
            fingerprint = %fingerprint(&manager.master_key),
            "Master API key generated"
        );
        manager
    }

    /// The generated master key. Shown once at startup.
    pub fn master_key(&self) -> &str {
        &self.master_key
    }

    /// Auth settings
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    fn insert_key(
        &self,
        key: String,
        name: &str,
        permissions: impl IntoIterator<Item = Permission>,
    ) {
        let record = ApiKeyRecord {
            key: key.clone(),
            name: name.to_string(),
            permissions: permissions.into_iter().collect(),
            created_at: Utc::now(),
            last_used: None,
        };
        self.keys.insert(key, record);
    }

    /// Mint a new key with the given grants.
    pub fn create_key(
        &self,
        name: &str,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> String {
        let key = generate_key(self.config.api_key_length);
        self.insert_key(key.clone(), name, permissions);
        tracing::info!(name, fingerprint = %fingerprint(&key), "API key created");
        key
    }

    /// Remove a key. Returns whether it existed.
    pub fn revoke_key(&self, key: &str) -> bool {
        let removed = self.keys.remove(key).is_some();
        if removed {
            tracing::info!(fingerprint = %fingerprint(key), "API key revoked");
        }
        removed
    }

    /// Look up a key, updating `last_used`. Unknown keys get nothing.
    pub fn validate(&self, key: &str) -> Option<ApiKeyRecord> {
        let mut record = self.keys.get_mut(key)?;
        record.last_used = Some(Utc::now());
        Some(record.value().clone())
    }

    /// Number of registered keys
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Whether `path` requires authentication.
    pub fn is_protected(&self, path: &str) -> bool {
        !self.config.public_paths.iter().any(|p| p == path)
    }

    /// Whether `record` may call `method` on `path`.
    pub fn check_permission(&self, record: &ApiKeyRecord, path: &str, method: &Method) -> bool {
        let required = Permission::required_for(method);
        let granted = record.grants(required);
        if !granted {
            tracing::debug!(
                fingerprint = %record.fingerprint(),
                path,
                method = %method,
                ?required,
                "Permission denied"
            );
        }
        granted
    }

    fn lockout_window(&self) -> Duration {
        Duration::from_secs(self.config.lockout_duration_secs)
    }

    /// Record an authentication failure for `client`.
    pub fn record_failure(&self, client: &str) {
        self.record_failure_at(client, Instant::now());
    }

    /// [`record_failure`](Self::record_failure) at an explicit instant.
    pub fn record_failure_at(&self, client: &str, now: Instant) {
        let window = self.lockout_window();
        let mut state = self.lockouts.entry(client.to_string()).or_default();
        state.prune(now, window);
        state.failures.push_back(now);

        if state.failures.len() == self.config.max_login_attempts {
            tracing::warn!(client, attempts = state.failures.len(), "Client locked out");
        }
    }

    /// Whether `client` is currently locked out.
    pub fn is_locked_out(&self, client: &str) -> bool {
        self.is_locked_out_at(client, Instant::now())
    }

    /// [`is_locked_out`](Self::is_locked_out) at an explicit instant.
    pub fn is_locked_out_at(&self, client: &str, now: Instant) -> bool {
        let window = self.lockout_window();
        let Some(mut state) = self.lockouts.get_mut(client) else {
            return false;
        };
        state.prune(now, window);
        state.failures.len() >= self.config.max_login_attempts
    }

    /// Failures currently counted against `client`.
    pub fn failure_count(&self, client: &str) -> usize {
        self.lockouts.get(client).map_or(0, |s| s.failures.len())
    }

    /// Forget failures for `client` after a successful authentication.
    pub fn clear_failures(&self, client: &str) {
        self.lockouts.remove(client);
    }

    /// Drop lockout states whose failures have all aged out. Returns the
    /// number removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    /// [`cleanup`](Self::cleanup) at an explicit instant.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let window = self.lockout_window();
        let before = self.lockouts.len();
        self.lockouts.retain(|_, state| {
            state.prune(now, window);
            !state.failures.is_empty()
        });
        before.saturating_sub(self.lockouts.len())
    }

    /// Number of clients with tracked failures
    pub fn tracked_clients(&self) -> usize {
        self.lockouts.len()
    }
}
