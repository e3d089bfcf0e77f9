//! Exotel voice.
//!
//! Outbound calls go through `Calls/connect.json`, which dials the number
//! and runs an ExoML applet. The applet's Voicebot step fetches the media
//! URL from our inbound webhook, using the `CustomField` we attach to find
//! the call context.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    CallControl, CallLeg, InboundAnswer, InboundCall, PlacedCall, TelephonyError, check_status,
    non_empty, parse_form, require,
};
use crate::core::carrier::CarrierKind;
use crate::core::transformer::Credential;

pub const DEFAULT_EXOTEL_API: &str = "https://api.exotel.com/v1";

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    #[serde(rename = "Call")]
    call: ExotelCall,
}

#[derive(Debug, Deserialize)]
struct ExotelCall {
    #[serde(rename = "Sid")]
    sid: String,
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Serialize)]
struct VoicebotAnswer<'a> {
    url: &'a str,
}

pub struct ExotelControl {
    account_sid: String,
    client_id: String,
    client_secret: String,
    app_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl ExotelControl {
    /// Reads `account_sid`, `client_id`, `client_secret` and `app_id`.
    pub fn new(credential: &Credential, client: reqwest::Client) -> Result<Self, TelephonyError> {
        Ok(Self {
            account_sid: require(credential, "account_sid")?,
            client_id: require(credential, "client_id")?,
            client_secret: require(credential, "client_secret")?,
            app_id: require(credential, "app_id")?,
            base_url: DEFAULT_EXOTEL_API.to_string(),
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn connect_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Calls/connect.json",
            self.base_url, self.account_sid
        )
    }

    /// ExoML applet the answered call runs.
    pub fn applet_url(&self) -> String {
        format!(
            "http://my.exotel.com/{}/exoml/start_voice/{}",
            self.account_sid, self.app_id
        )
    }
}

#[async_trait]
impl CallControl for ExotelControl {
    fn kind(&self) -> CarrierKind {
        CarrierKind::Exotel
    }

    // Exotel rings `From` first, then bridges to the applet.
    async fn place_call(
        &self,
        to: &str,
        from: &str,
        leg: &CallLeg,
    ) -> Result<PlacedCall, TelephonyError> {
        let applet = self.applet_url();
        let form = [
            ("From", to),
            ("CallerId", from),
            ("To", from),
            ("Url", applet.as_str()),
            ("StatusCallback", leg.event_url.as_str()),
            ("CustomField", leg.context_id.as_str()),
        ];
        let response = self
            .client
            .post(self.connect_url())
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await?;
        let connect: ConnectResponse = check_status(CarrierKind::Exotel, response)
            .await?
            .json()
            .await
            .map_err(|e| TelephonyError::InvalidPayload(e.to_string()))?;

        info!(
            carrier = "exotel",
            call_sid = %connect.call.sid,
            conversation_id = %leg.identity.conversation_id,
            "Placed outbound call"
        );
        Ok(PlacedCall {
            channel_id: connect.call.sid,
            status: connect.call.status,
        })
    }

    fn answer(&self, leg: &CallLeg) -> Result<InboundAnswer, TelephonyError> {
        let body = serde_json::to_string(&VoicebotAnswer {
            url: &leg.media_url,
        })
        .map_err(|e| TelephonyError::InvalidPayload(e.to_string()))?;
        Ok(InboundAnswer {
            content_type: "application/json",
            body,
        })
    }

    fn parse_status(&self, body: &[u8]) -> Result<String, TelephonyError> {
        non_empty(&parse_form(body), "Status")
            .ok_or_else(|| TelephonyError::InvalidPayload("Status missing".into()))
    }

    fn inbound_call(&self, params: &HashMap<String, String>) -> InboundCall {
        InboundCall {
            caller: non_empty(params, "CallFrom"),
            channel_id: non_empty(params, "CallSid"),
            context_id: non_empty(params, "CustomField"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::streamer::CallIdentity;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential() -> Credential {
        Credential::new()
            .with("account_sid", "acme1")
            .with("client_id", "key")
            .with("client_secret", "token")
            .with("app_id", "4242")
    }

    fn leg() -> CallLeg {
        CallLeg {
            context_id: "ctx-9".into(),
            identity: CallIdentity::new("asst", "conv"),
            media_url: "wss://voice.example.com/v1/talk/exotel/ctx/ctx-9".into(),
            event_url: "https://voice.example.com/v1/talk/exotel/event/ctx-9".into(),
        }
    }

    #[tokio::test]
    async fn test_place_call_uses_connect_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Accounts/acme1/Calls/connect.json"))
            .and(body_string_contains("From=%2B919800000001"))
            .and(body_string_contains("CallerId=%2B918000000002"))
            .and(body_string_contains("CustomField=ctx-9"))
            .and(body_string_contains("start_voice%2F4242"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Call": {"Sid": "exo-sid", "Status": "in-progress"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let control = ExotelControl::new(&credential(), reqwest::Client::new())
            .unwrap()
            .with_base_url(server.uri());
        let placed = control
            .place_call("+919800000001", "+918000000002", &leg())
            .await
            .unwrap();
        assert_eq!(placed.channel_id, "exo-sid");
    }

    #[tokio::test]
    async fn test_non_success_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let control = ExotelControl::new(&credential(), reqwest::Client::new())
            .unwrap()
            .with_base_url(server.uri());
        assert!(matches!(
            control.place_call("+1", "+2", &leg()).await,
            Err(TelephonyError::Carrier(_))
        ));
    }

    #[test]
    fn test_answer_status_and_inbound() {
        let control = ExotelControl::new(&credential(), reqwest::Client::new()).unwrap();
        let answer = control.answer(&leg()).unwrap();
        assert_eq!(answer.content_type, "application/json");
        assert_eq!(
            answer.body,
            r#"{"url":"wss://voice.example.com/v1/talk/exotel/ctx/ctx-9"}"#
        );
        assert_eq!(control.parse_status(b"Status=completed").unwrap(), "completed");
        assert!(control.parse_status(b"CallSid=1").is_err());

        let params = HashMap::from([
            ("CallFrom".to_string(), "09800000001".to_string()),
            ("CustomField".to_string(), "ctx-9".to_string()),
        ]);
        let inbound = control.inbound_call(&params);
        assert_eq!(inbound.caller.as_deref(), Some("09800000001"));
        assert_eq!(inbound.context_id.as_deref(), Some("ctx-9"));
        assert!(inbound.channel_id.is_none());
    }

    #[test]
    fn test_requires_app_id() {
        let credential = Credential::new()
            .with("account_sid", "a")
            .with("client_id", "b")
            .with("client_secret", "c");
        assert!(matches!(
            ExotelControl::new(&credential, reqwest::Client::new()),
            Err(TelephonyError::MissingCredential(_))
        ));
    }
}
