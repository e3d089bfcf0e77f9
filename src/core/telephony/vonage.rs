//! Vonage Voice API.
//!
//! Requests are authenticated with a short-lived RS256 application JWT.
//! Calls are routed with an NCCO `connect` action to our websocket
//! endpoint, both for outbound calls and as the answer to inbound ones.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::{
    CallControl, CallLeg, CallTerminator, InboundAnswer, InboundCall, PlacedCall, TelephonyError,
    check_status, non_empty, require,
};
use crate::core::carrier::CarrierKind;
use crate::core::transformer::Credential;

pub const DEFAULT_VONAGE_API: &str = "https://api.nexmo.com";

/// Media format requested from Vonage.
pub const VONAGE_CONTENT_TYPE: &str = "audio/l16;rate=16000";

const JWT_LIFETIME_SECS: u64 = 15 * 60;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ApplicationClaims {
    pub application_id: String,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
}

#[derive(Debug, Deserialize)]
struct CreatedCall {
    uuid: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct StatusEvent {
    status: Option<String>,
}

pub struct VonageControl {
    application_id: String,
    signing_key: EncodingKey,
    base_url: String,
    client: reqwest::Client,
}

impl VonageControl {
    /// Reads `application_id` and the PEM-encoded `private_key`.
    pub fn new(credential: &Credential, client: reqwest::Client) -> Result<Self, TelephonyError> {
        let application_id = require(credential, "application_id")?;
        let pem = require(credential, "private_key")?;
        let signing_key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
            TelephonyError::Configuration(format!("invalid Vonage private key: {e}"))
        })?;
        Ok(Self {
            application_id,
            signing_key,
            base_url: DEFAULT_VONAGE_API.to_string(),
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sign a fresh application JWT.
    pub fn token(&self) -> Result<String, TelephonyError> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TelephonyError::Configuration(e.to_string()))?
            .as_secs();
        let claims = ApplicationClaims {
            application_id: self.application_id.clone(),
            iat,
            exp: iat + JWT_LIFETIME_SECS,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| TelephonyError::Configuration(format!("failed to sign JWT: {e}")))
    }
}

/// NCCO connecting the call to `leg.media_url`.
pub fn connect_ncco(leg: &CallLeg) -> Value {
    json!([{
        "action": "connect",
        "eventType": "synchronous",
        "eventUrl": [leg.event_url],
        "endpoint": [{
            "type": "websocket",
            "uri": leg.media_url,
            "content-type": VONAGE_CONTENT_TYPE,
            "headers": {
                "assistant_id": leg.identity.assistant_id,
                "conversation_id": leg.identity.conversation_id,
            }
        }]
    }])
}

#[async_trait]
impl CallControl for VonageControl {
    fn kind(&self) -> CarrierKind {
        CarrierKind::Vonage
    }

    async fn place_call(
        &self,
        to: &str,
        from: &str,
        leg: &CallLeg,
    ) -> Result<PlacedCall, TelephonyError> {
        let body = json!({
            "to": [{"type": "phone", "number": to}],
            "from": {"type": "phone", "number": from},
            "ncco": connect_ncco(leg),
        });
        let response = self
            .client
            .post(format!("{}/v1/calls", self.base_url))
            .bearer_auth(self.token()?)
            .json(&body)
            .send()
            .await?;
        let call: CreatedCall = check_status(CarrierKind::Vonage, response)
            .await?
            .json()
            .await
            .map_err(|e| TelephonyError::InvalidPayload(e.to_string()))?;

        info!(
            carrier = "vonage",
            uuid = %call.uuid,
            conversation_id = %leg.identity.conversation_id,
            "Placed outbound call"
        );
        Ok(PlacedCall {
            channel_id: call.uuid,
            status: call.status,
        })
    }

    fn answer(&self, leg: &CallLeg) -> Result<InboundAnswer, TelephonyError> {
        Ok(InboundAnswer {
            content_type: "application/json",
            body: connect_ncco(leg).to_string(),
        })
    }

    fn parse_status(&self, body: &[u8]) -> Result<String, TelephonyError> {
        let event: StatusEvent = serde_json::from_slice(body)
            .map_err(|e| TelephonyError::InvalidPayload(e.to_string()))?;
        event
            .status
            .filter(|s| !s.is_empty())
            .ok_or_else(|| TelephonyError::InvalidPayload("status missing".into()))
    }

    fn inbound_call(&self, params: &HashMap<String, String>) -> InboundCall {
        InboundCall {
            caller: non_empty(params, "from"),
            channel_id: non_empty(params, "uuid"),
            context_id: None,
        }
    }
}

#[async_trait]
impl CallTerminator for VonageControl {
    async fn hangup(&self, uuid: &str) -> Result<(), TelephonyError> {
        let response = self
            .client
            .put(format!("{}/v1/calls/{}", self.base_url, uuid))
            .bearer_auth(self.token()?)
            .json(&json!({"action": "hangup"}))
            .send()
            .await?;
        check_status(CarrierKind::Vonage, response).await?;
        info!(carrier = "vonage", uuid = %uuid, "Call hung up");
        Ok(())
    }
}
