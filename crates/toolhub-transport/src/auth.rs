//! API-key authentication.

use std::fmt;

use subtle::{Choice, ConstantTimeEq};
use toolhub_core::{Authenticator, Principal, RoutingError};

/// Principal used when no keys are configured.
pub const ANONYMOUS: &str = "anonymous";

struct Credential {
    label: String,
    key: Vec<u8>,
}

/// Fixed set of API keys, each with a principal label.
///
/// With no keys configured every caller is let in as [`ANONYMOUS`].
#[derive(Default)]
pub struct StaticKeys {
    credentials: Vec<Credential>,
}

impl fmt::Debug for StaticKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.credentials.iter().map(|c| c.label.as_str()).collect();
        f.debug_struct("StaticKeys").field("labels", &labels).finish()
    }
}

impl StaticKeys {
    /// Accept anyone.
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list of `label:key` or bare `key` entries.
    ///
    /// Bare keys are labelled `key-1`, `key-2`, ... by position.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        let mut keys = Self::default();
        for (index, entry) in list
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .enumerate()
        {
            match entry.split_once(':') {
                Some((label, key)) if !label.is_empty() && !key.is_empty() => {
                    keys = keys.with_key(label, key);
                }
                _ => keys = keys.with_key(format!("key-{}", index + 1), entry),
            }
        }
        keys
    }

    #[must_use]
    pub fn with_key(mut self, label: impl Into<String>, key: impl AsRef<[u8]>) -> Self {
        self.credentials.push(Credential {
            label: label.into(),
            key: key.as_ref().to_vec(),
        });
        self
    }

    /// Whether authentication is disabled.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.credentials.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl Authenticator for StaticKeys {
    fn authenticate(&self, api_key: Option<&str>) -> Result<Principal, RoutingError> {
        if self.is_open() {
            return Ok(Principal::new(ANONYMOUS));
        }
        let Some(presented) = api_key else {
            return Err(RoutingError::Authentication("missing api key".into()));
        };

        // No early exit: every credential is compared.
        let mut matched: Option<&str> = None;
        for credential in &self.credentials {
            let hit: Choice = credential.key.as_slice().ct_eq(presented.as_bytes());
            if bool::from(hit) && matched.is_none() {
                matched = Some(credential.label.as_str());
            }
        }
        matched
            .map(Principal::new)
            .ok_or_else(|| RoutingError::Authentication("invalid api key".into()))
    }
}
