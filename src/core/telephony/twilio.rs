//! Twilio Programmable Voice.
//!
//! Outbound calls carry their TwiML inline, so no answer URL round-trip is
//! needed. Inbound calls get the same `<Connect><Stream>` document from the
//! inbound webhook.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{
    CallControl, CallLeg, CallTerminator, InboundAnswer, InboundCall, PlacedCall, TelephonyError,
    check_status, non_empty, parse_form, require,
};
use crate::core::carrier::CarrierKind;
use crate::core::transformer::Credential;

pub const DEFAULT_TWILIO_API: &str = "https://api.twilio.com/2010-04-01";

const STATUS_EVENTS: &str = "initiated ringing answered completed";

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    #[serde(default)]
    status: String,
}

pub struct TwilioControl {
    account_sid: String,
    auth_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl TwilioControl {
    /// Reads `account_sid` and `account_token` from `credential`.
    pub fn new(credential: &Credential, client: reqwest::Client) -> Result<Self, TelephonyError> {
        Ok(Self {
            account_sid: require(credential, "account_sid")?,
            auth_token: require(credential, "account_token")?,
            base_url: DEFAULT_TWILIO_API.to_string(),
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn calls_url(&self) -> String {
        format!("{}/Accounts/{}/Calls.json", self.base_url, self.account_sid)
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, call_sid
        )
    }
}

/// `<Connect><Stream>` TwiML pointing the call at `leg.media_url`.
pub fn connect_twiml(leg: &CallLeg) -> String {
    let identity = &leg.identity;
    let mut twiml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect><Stream url="{}" name="{}__{}" statusCallback="{}" statusCallbackEvent="{}">"#,
        xml_escape(&leg.media_url),
        xml_escape(&identity.assistant_id),
        xml_escape(&identity.conversation_id),
        xml_escape(&leg.event_url),
        STATUS_EVENTS,
    );
    twiml.push_str(&parameter("assistant_id", &identity.assistant_id));
    if let Some(caller) = &identity.caller {
        twiml.push_str(&parameter("client_number", caller));
    }
    twiml.push_str("</Stream></Connect></Response>");
    twiml
}

fn parameter(name: &str, value: &str) -> String {
    format!(
        r#"<Parameter name="{}" value="{}"/>"#,
        xml_escape(name),
        xml_escape(value)
    )
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[async_trait]
impl CallControl for TwilioControl {
    fn kind(&self) -> CarrierKind {
        CarrierKind::Twilio
    }

    async fn place_call(
        &self,
        to: &str,
        from: &str,
        leg: &CallLeg,
    ) -> Result<PlacedCall, TelephonyError> {
        let twiml = connect_twiml(leg);
        let mut form: Vec<(&str, &str)> = vec![
            ("To", to),
            ("From", from),
            ("Twiml", twiml.as_str()),
            ("StatusCallback", leg.event_url.as_str()),
            ("StatusCallbackMethod", "POST"),
        ];
        form.extend(
            STATUS_EVENTS
                .split(' ')
                .map(|event| ("StatusCallbackEvent", event)),
        );

        let response = self
            .client
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;
        let call: CallResource = check_status(CarrierKind::Twilio, response)
            .await?
            .json()
            .await
            .map_err(|e| TelephonyError::InvalidPayload(e.to_string()))?;

        info!(
            carrier = "twilio",
            call_sid = %call.sid,
            conversation_id = %leg.identity.conversation_id,
            "Placed outbound call"
        );
        Ok(PlacedCall {
            channel_id: call.sid,
            status: call.status,
        })
    }

    fn answer(&self, leg: &CallLeg) -> Result<InboundAnswer, TelephonyError> {
        Ok(InboundAnswer {
            content_type: "text/xml",
            body: connect_twiml(leg),
        })
    }

    fn parse_status(&self, body: &[u8]) -> Result<String, TelephonyError> {
        let form = parse_form(body);
        non_empty(&form, "StreamEvent")
            .or_else(|| non_empty(&form, "CallStatus"))
            .ok_or_else(|| {
                TelephonyError::InvalidPayload("neither StreamEvent nor CallStatus present".into())
            })
    }

    fn inbound_call(&self, params: &HashMap<String, String>) -> InboundCall {
        InboundCall {
            caller: non_empty(params, "From"),
            channel_id: non_empty(params, "CallSid"),
            context_id: None,
        }
    }
}

#[async_trait]
impl CallTerminator for TwilioControl {
    async fn hangup(&self, call_sid: &str) -> Result<(), TelephonyError> {
        let response = self
            .client
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await?;
        check_status(CarrierKind::Twilio, response).await?;
        info!(carrier = "twilio", call_sid = %call_sid, "Call completed");
        Ok(())
    }
}
