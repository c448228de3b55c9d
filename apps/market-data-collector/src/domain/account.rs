//! Private account identity.
//!
//! Private data (balances, orders, fills, positions) is partitioned per
//! account. The identity combines a short prefix of the API key with the
//! configured account label, so two labels sharing one key and one label
//! reused across keys both get distinct shards.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Characters of the API key kept in the account identity.
pub const KEY_PREFIX_LEN: usize = 6;

/// Identity of a private account: `<key prefix>_<label>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId {
    prefix: String,
    label: String,
}

impl AccountId {
    /// Build from an explicit prefix and label.
    #[must_use]
    pub fn new(prefix: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            prefix: sanitize(&prefix.into()),
            label: sanitize(&label.into()),
        }
    }

    /// Derive the identity from an API key and account label.
    ///
    /// An empty key yields the prefix `default`.
    #[must_use]
    pub fn from_credentials(credentials: &Credentials, label: &str) -> Self {
        let prefix: String = credentials.api_key().chars().take(KEY_PREFIX_LEN).collect();
        let prefix = if prefix.is_empty() {
            "default".to_string()
        } else {
            prefix
        };
        Self::new(prefix, label)
    }

    /// API key prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Account label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Shard file stem.
    #[must_use]
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.prefix, self.label)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.prefix, self.label)
    }
}

/// Keep only characters safe for a file name.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Venue API credentials for one account.
#[derive(Clone, Default)]
pub struct Credentials {
    api_key: String,
    secret: String,
    password: Option<String>,
    uid: Option<String>,
}

impl Credentials {
    /// Create credentials from key and secret.
    #[must_use]
    pub const fn new(api_key: String, secret: String) -> Self {
        Self {
            api_key,
            secret,
            password: None,
            uid: None,
        }
    }

    /// Attach a passphrase (some venues require one).
    #[must_use]
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    /// Attach a venue user id.
    #[must_use]
    pub fn with_uid(mut self, uid: Option<String>) -> Self {
        self.uid = uid;
        self
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Get the passphrase.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Get the venue user id.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// Private collection needs both key and secret.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("uid", &self.uid)
            .finish()
    }
}
