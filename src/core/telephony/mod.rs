//! Carrier call control.
//!
//! Everything that happens around a media socket rather than on it:
//! placing outbound calls, answering inbound-call webhooks with the markup
//! that points the carrier at our media endpoint, parsing status callbacks
//! and hanging up. The [`CallContextStore`] links the HTTP leg of a call to
//! the media socket the carrier opens a moment later.
//!
//! | Carrier | Place call | Inbound answer | Status body | Hang-up |
//! |---------|-----------|----------------|-------------|---------|
//! | Twilio | form POST, TwiML inline | TwiML | form `StreamEvent`/`CallStatus` | `Status=completed` |
//! | Exotel | form POST to `connect.json` | JSON `{"url"}` | form `Status` | socket close |
//! | Vonage | JSON POST with RS256 JWT | NCCO | JSON `status` | `PUT {"action":"hangup"}` |

mod context;
mod credentials;
pub mod exotel;
pub mod twilio;
pub mod vonage;

pub use context::{CallContext, CallContextStore, CallDirection, DEFAULT_CONTEXT_TTL};
pub use credentials::{CredentialResolver, StaticCredentials};
pub use exotel::ExotelControl;
pub use twilio::TwilioControl;
pub use vonage::VonageControl;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::carrier::CarrierKind;
use crate::core::streamer::CallIdentity;
use crate::core::transformer::Credential;

/// Timeout applied to every carrier API request.
pub const CARRIER_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TelephonyError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Missing credential: {0}")]
    MissingCredential(String),
    #[error("HTTP error: {0}")]
    Http(String),
    /// The carrier API answered with a non-success status.
    #[error("Carrier error: {0}")]
    Carrier(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Call context not found: {0}")]
    ContextNotFound(String),
}

impl From<reqwest::Error> for TelephonyError {
    fn from(err: reqwest::Error) -> Self {
        TelephonyError::Http(err.to_string())
    }
}

/// Ends a live call through the carrier's REST API.
#[async_trait]
pub trait CallTerminator: Send + Sync {
    async fn hangup(&self, channel_id: &str) -> Result<(), TelephonyError>;
}

// =============================================================================
// Call legs
// =============================================================================

/// Route prefix every carrier endpoint lives under.
pub const TALK_PREFIX: &str = "/v1/talk";

/// Builds the public URLs a carrier calls back on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
    public_host: String,
}

impl CallbackUrls {
    /// `public_host` is a bare authority such as `voice.example.com`.
    pub fn new(public_host: impl Into<String>) -> Self {
        let host: String = public_host.into();
        let host = host
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        Self { public_host: host }
    }

    pub fn media_url(&self, kind: CarrierKind, context_id: &str) -> String {
        format!(
            "wss://{}{}/{}/ctx/{}",
            self.public_host, TALK_PREFIX, kind, context_id
        )
    }

    pub fn event_url(&self, kind: CarrierKind, context_id: &str) -> String {
        format!(
            "https://{}{}/{}/event/{}",
            self.public_host, TALK_PREFIX, kind, context_id
        )
    }

    /// Everything a carrier needs to route one call to this gateway.
    pub fn leg(&self, kind: CarrierKind, context: &CallContext) -> CallLeg {
        CallLeg {
            context_id: context.context_id.clone(),
            identity: context.identity.clone(),
            media_url: self.media_url(kind, &context.context_id),
            event_url: self.event_url(kind, &context.context_id),
        }
    }
}

/// One call as seen by the carrier APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLeg {
    pub context_id: String,
    pub identity: CallIdentity,
    pub media_url: String,
    pub event_url: String,
}

/// Result of an accepted place-call request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedCall {
    /// Carrier call id (Twilio/Exotel sid, Vonage uuid).
    pub channel_id: String,
    pub status: String,
}

/// Response body for an inbound-call webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAnswer {
    pub content_type: &'static str,
    pub body: String,
}

/// What an inbound-call webhook tells us about the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundCall {
    pub caller: Option<String>,
    pub channel_id: Option<String>,
    /// Context id echoed back by carriers that support custom fields.
    pub context_id: Option<String>,
}

/// Per-carrier call-control operations.
#[async_trait]
pub trait CallControl: Send + Sync {
    fn kind(&self) -> CarrierKind;

    /// Dial `to` from `from` and connect the answered call to `leg`.
    async fn place_call(
        &self,
        to: &str,
        from: &str,
        leg: &CallLeg,
    ) -> Result<PlacedCall, TelephonyError>;

    /// Markup returned to the carrier's inbound-call webhook.
    fn answer(&self, leg: &CallLeg) -> Result<InboundAnswer, TelephonyError>;

    /// Extract the call status from a status-callback body.
    fn parse_status(&self, body: &[u8]) -> Result<String, TelephonyError>;

    /// Read caller and channel id from inbound-call webhook parameters.
    fn inbound_call(&self, params: &HashMap<String, String>) -> InboundCall;
}

/// Build the call-control client for a telephony carrier.
pub fn create_call_control(
    kind: CarrierKind,
    credential: &Credential,
    client: reqwest::Client,
) -> Result<Arc<dyn CallControl>, TelephonyError> {
    match kind {
        CarrierKind::Twilio => Ok(Arc::new(TwilioControl::new(credential, client)?)),
        CarrierKind::Exotel => Ok(Arc::new(ExotelControl::new(credential, client)?)),
        CarrierKind::Vonage => Ok(Arc::new(VonageControl::new(credential, client)?)),
        other => Err(TelephonyError::Configuration(format!(
            "carrier '{other}' has no call-control API"
        ))),
    }
}

/// Build the hang-up client for carriers that support REST hang-up.
///
/// Exotel ends the call when its media socket closes, so it has none.
pub fn create_terminator(
    kind: CarrierKind,
    credential: &Credential,
    client: reqwest::Client,
) -> Result<Option<Arc<dyn CallTerminator>>, TelephonyError> {
    match kind {
        CarrierKind::Twilio => Ok(Some(Arc::new(TwilioControl::new(credential, client)?))),
        CarrierKind::Vonage => Ok(Some(Arc::new(VonageControl::new(credential, client)?))),
        _ => Ok(None),
    }
}

/// HTTP client shared by the carrier APIs.
pub fn http_client() -> Result<reqwest::Client, TelephonyError> {
    reqwest::Client::builder()
        .timeout(CARRIER_HTTP_TIMEOUT)
        .build()
        .map_err(TelephonyError::from)
}

pub(crate) fn require(credential: &Credential, key: &str) -> Result<String, TelephonyError> {
    credential
        .require(key)
        .map(str::to_string)
        .map_err(TelephonyError::MissingCredential)
}

/// Read a form-encoded webhook body into a map. Later keys win.
pub(crate) fn parse_form(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// Turn a non-success carrier response into [`TelephonyError::Carrier`].
pub(crate) async fn check_status(
    carrier: CarrierKind,
    response: reqwest::Response,
) -> Result<reqwest::Response, TelephonyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TelephonyError::Carrier(format!(
        "{carrier} returned {status}: {body}"
    )))
}

pub(crate) fn non_empty(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params.get(key).filter(|v| !v.is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_urls() {
        let urls = CallbackUrls::new("https://voice.example.com/");
        assert_eq!(
            urls.media_url(CarrierKind::Twilio, "ctx-1"),
            "wss://voice.example.com/v1/talk/twilio/ctx/ctx-1"
        );
        assert_eq!(
            urls.event_url(CarrierKind::Vonage, "ctx-1"),
            "https://voice.example.com/v1/talk/vonage/event/ctx-1"
        );
    }

    #[test]
    fn test_leg_carries_context_identity() {
        let urls = CallbackUrls::new("voice.example.com");
        let context = CallContext::new(
            CarrierKind::Exotel,
            CallIdentity::new("asst-1", "conv-1"),
            CallDirection::Outbound,
        );
        let leg = urls.leg(CarrierKind::Exotel, &context);
        assert_eq!(leg.identity.assistant_id, "asst-1");
        assert!(leg.media_url.ends_with(&format!("/exotel/ctx/{}", context.context_id)));
    }

    #[test]
    fn test_factory_rejects_non_telephony_carriers() {
        let err = create_call_control(CarrierKind::Native, &Credential::new(), reqwest::Client::new())
            .err()
            .unwrap();
        assert!(matches!(err, TelephonyError::Configuration(_)));
        assert!(
            create_terminator(CarrierKind::Exotel, &Credential::new(), reqwest::Client::new())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_missing_credential_is_reported() {
        let err = create_call_control(CarrierKind::Twilio, &Credential::new(), reqwest::Client::new())
            .err()
            .unwrap();
        assert!(matches!(err, TelephonyError::MissingCredential(ref m) if m.contains("account_sid")));
    }

    #[test]
    fn test_parse_form_decodes_values() {
        let form = parse_form(b"CallStatus=in-progress&From=%2B15551234567");
        assert_eq!(form.get("From").map(String::as_str), Some("+15551234567"));
        assert_eq!(form.get("CallStatus").map(String::as_str), Some("in-progress"));
    }
}
