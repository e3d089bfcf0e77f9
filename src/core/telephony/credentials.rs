use std::collections::HashMap;

use super::TelephonyError;
use crate::core::carrier::CarrierKind;
use crate::core::streamer::CallIdentity;
use crate::core::transformer::Credential;

/// Looks up provider and carrier secrets for a call.
pub trait CredentialResolver: Send + Sync {
    /// Credential for a speech provider such as `deepgram`.
    fn provider(&self, identity: &CallIdentity, provider: &str)
    -> Result<Credential, TelephonyError>;

    /// Credential for a carrier's REST API.
    fn carrier(&self, identity: &CallIdentity, kind: CarrierKind)
    -> Result<Credential, TelephonyError>;
}

/// Fixed credentials shared by every assistant.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    providers: HashMap<String, Credential>,
    carriers: HashMap<CarrierKind, Credential>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>, credential: Credential) -> Self {
        self.providers
            .insert(provider.into().to_lowercase(), credential);
        self
    }

    pub fn with_carrier(mut self, kind: CarrierKind, credential: Credential) -> Self {
        self.carriers.insert(kind, credential);
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn provider(
        &self,
        _identity: &CallIdentity,
        provider: &str,
    ) -> Result<Credential, TelephonyError> {
        self.providers
            .get(&provider.to_lowercase())
            .cloned()
            .ok_or_else(|| {
                TelephonyError::MissingCredential(format!("no credential for provider '{provider}'"))
            })
    }

    fn carrier(
        &self,
        _identity: &CallIdentity,
        kind: CarrierKind,
    ) -> Result<Credential, TelephonyError> {
        self.carriers.get(&kind).cloned().ok_or_else(|| {
            TelephonyError::MissingCredential(format!("no credential for carrier '{kind}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive_for_providers() {
        let creds = StaticCredentials::new()
            .with_provider("Deepgram", Credential::api_key("dg"))
            .with_carrier(
                CarrierKind::Twilio,
                Credential::new().with("account_sid", "AC1"),
            );
        let identity = CallIdentity::new("a", "c");
        assert_eq!(
            creds.provider(&identity, "deepgram").unwrap().get("key"),
            Some("dg")
        );
        assert_eq!(
            creds
                .carrier(&identity, CarrierKind::Twilio)
                .unwrap()
                .get("account_sid"),
            Some("AC1")
        );
        assert!(creds.carrier(&identity, CarrierKind::Vonage).is_err());
        assert!(creds.provider(&identity, "cartesia").is_err());
    }
}
