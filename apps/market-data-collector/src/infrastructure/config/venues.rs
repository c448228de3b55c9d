//! Venue configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::account::Credentials;

/// Per-venue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Collect from this venue.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Use the venue sandbox.
    #[serde(default)]
    pub testnet: bool,
    /// Symbols to collect (`BASE/QUOTE` or `BASE/QUOTE:SETTLE`).
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Private accounts keyed by label.
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountConfig>,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            testnet: false,
            symbols: Vec::new(),
            accounts: BTreeMap::new(),
        }
    }
}

const fn default_enabled() -> bool {
    true
}

/// Private account credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// API secret.
    #[serde(default)]
    pub secret: String,
    /// Passphrase, for venues that need one.
    #[serde(default)]
    pub password: Option<String>,
    /// Venue user id.
    #[serde(default)]
    pub uid: Option<String>,
}

impl AccountConfig {
    /// Convert to domain credentials.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.api_key.clone(), self.secret.clone())
            .with_password(self.password.clone())
            .with_uid(self.uid.clone())
    }
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("api_key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("uid", &self.uid)
            .finish()
    }
}
