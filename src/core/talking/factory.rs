use std::sync::Arc;

use super::TalkingError;
use crate::core::audio::AudioConfig;
use crate::core::streamer::CallIdentity;
use crate::core::telephony::CredentialResolver;
use crate::core::transformer::{
    EventSender, ProviderSelection, SpeechToText, SttProvider, TextToSpeech, TtsProvider,
    create_stt, create_tts,
};

/// Builds provider transformers for a call.
pub trait TransformerFactory: Send + Sync {
    fn create_stt(
        &self,
        identity: &CallIdentity,
        selection: &ProviderSelection,
        input: AudioConfig,
        events: EventSender,
    ) -> Result<Box<dyn SpeechToText>, TalkingError>;

    fn create_tts(
        &self,
        identity: &CallIdentity,
        selection: &ProviderSelection,
        output: AudioConfig,
        events: EventSender,
    ) -> Result<Box<dyn TextToSpeech>, TalkingError>;
}

/// Factory backed by the built-in vendor transformers.
pub struct ProviderFactory {
    credentials: Arc<dyn CredentialResolver>,
}

impl ProviderFactory {
    pub fn new(credentials: Arc<dyn CredentialResolver>) -> Self {
        Self { credentials }
    }
}

impl TransformerFactory for ProviderFactory {
    fn create_stt(
        &self,
        identity: &CallIdentity,
        selection: &ProviderSelection,
        input: AudioConfig,
        events: EventSender,
    ) -> Result<Box<dyn SpeechToText>, TalkingError> {
        let provider: SttProvider = selection.provider.parse()?;
        let credential = self.credentials.provider(identity, &selection.provider)?;
        Ok(create_stt(
            provider,
            input,
            &credential,
            &selection.options,
            events,
        )?)
    }

    fn create_tts(
        &self,
        identity: &CallIdentity,
        selection: &ProviderSelection,
        output: AudioConfig,
        events: EventSender,
    ) -> Result<Box<dyn TextToSpeech>, TalkingError> {
        let provider: TtsProvider = selection.provider.parse()?;
        let credential = self.credentials.provider(identity, &selection.provider)?;
        Ok(create_tts(
            provider,
            output,
            &credential,
            &selection.options,
            events,
        )?)
    }
}
