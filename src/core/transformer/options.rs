use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Generic option bag passed to providers.
///
/// Keys are dotted paths such as `speak.voice.id` or `listen.language`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderOptions(HashMap<String, String>);

/// Overrides the provider base URL. Used to point providers at local servers.
pub const ENDPOINT_KEY: &str = "endpoint";

impl ProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.get(ENDPOINT_KEY)
    }

    /// Entries of `other` win.
    pub fn merged(&self, other: &ProviderOptions) -> ProviderOptions {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        ProviderOptions(merged)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, String>> for ProviderOptions {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

/// A provider choice plus its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSelection {
    pub provider: String,
    #[serde(default)]
    pub options: ProviderOptions,
}

impl ProviderSelection {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            options: ProviderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }
}

/// Opaque provider or carrier secret map. Zeroized on drop.
#[derive(Clone, Default)]
pub struct Credential(HashMap<String, String>);

/// Key under which provider API keys are stored.
pub const CREDENTIAL_KEY: &str = "key";

impl Credential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self::new().with(CREDENTIAL_KEY, key)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Fetch a required entry.
    pub fn require(&self, key: &str) -> Result<&str, String> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("credential entry '{key}' is missing"))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("keys", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        for value in self.0.values_mut() {
            value.zeroize();
        }
    }
}
