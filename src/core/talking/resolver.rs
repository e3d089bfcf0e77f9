use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::streamer::CallIdentity;
use crate::core::transformer::ProviderSelection;

/// Default providers for an assistant, used when a call does not pick its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantProfile {
    pub stt: ProviderSelection,
    pub tts: ProviderSelection,
    /// Spoken as soon as the providers are connected.
    #[serde(default)]
    pub greeting: Option<String>,
}

impl AssistantProfile {
    pub fn new(stt: ProviderSelection, tts: ProviderSelection) -> Self {
        Self {
            stt,
            tts,
            greeting: None,
        }
    }
}

/// Maps a call to its assistant's provider profile.
pub trait AssistantResolver: Send + Sync {
    fn resolve(&self, identity: &CallIdentity) -> Option<AssistantProfile>;
}

/// Profiles keyed by assistant id, with an optional fallback.
#[derive(Debug, Clone, Default)]
pub struct StaticAssistants {
    fallback: Option<AssistantProfile>,
    profiles: HashMap<String, AssistantProfile>,
}

impl StaticAssistants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(mut self, profile: AssistantProfile) -> Self {
        self.fallback = Some(profile);
        self
    }

    pub fn with_profile(mut self, assistant_id: impl Into<String>, profile: AssistantProfile) -> Self {
        self.profiles.insert(assistant_id.into(), profile);
        self
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty() && self.fallback.is_none()
    }
}

impl AssistantResolver for StaticAssistants {
    fn resolve(&self, identity: &CallIdentity) -> Option<AssistantProfile> {
        self.profiles
            .get(&identity.assistant_id)
            .or(self.fallback.as_ref())
            .cloned()
    }
}
