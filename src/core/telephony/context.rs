//! Short-lived call contexts.
//!
//! A context is saved when a call is placed or an inbound webhook is
//! answered, and consumed when the carrier opens the media socket. Entries
//! expire on their own if the socket never arrives.

use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TelephonyError;
use crate::core::carrier::CarrierKind;
use crate::core::streamer::CallIdentity;

pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(300);

const MAX_PENDING_CONTEXTS: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub context_id: String,
    pub carrier: CarrierKind,
    pub identity: CallIdentity,
    pub direction: CallDirection,
}

impl CallContext {
    /// New context with a random id.
    pub fn new(carrier: CarrierKind, identity: CallIdentity, direction: CallDirection) -> Self {
        Self {
            context_id: uuid::Uuid::new_v4().to_string(),
            carrier,
            identity,
            direction,
        }
    }
}

/// TTL-bounded map from context id to [`CallContext`].
#[derive(Clone)]
pub struct CallContextStore {
    cache: Cache<String, CallContext>,
}

impl CallContextStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(MAX_PENDING_CONTEXTS)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Store `context` and return its id.
    pub async fn save(&self, context: CallContext) -> String {
        let id = context.context_id.clone();
        debug!(
            context_id = %id,
            carrier = %context.carrier,
            conversation_id = %context.identity.conversation_id,
            direction = ?context.direction,
            "Saved call context"
        );
        self.cache.insert(id.clone(), context).await;
        id
    }

    pub async fn get(&self, context_id: &str) -> Result<CallContext, TelephonyError> {
        self.cache
            .get(context_id)
            .await
            .ok_or_else(|| TelephonyError::ContextNotFound(context_id.to_string()))
    }

    /// Fetch and remove in one step. A context can be claimed only once.
    pub async fn take(&self, context_id: &str) -> Result<CallContext, TelephonyError> {
        self.cache
            .remove(context_id)
            .await
            .ok_or_else(|| TelephonyError::ContextNotFound(context_id.to_string()))
    }

    /// Record the carrier call id once the carrier reports it.
    pub async fn set_channel_id(
        &self,
        context_id: &str,
        channel_id: &str,
    ) -> Result<(), TelephonyError> {
        let mut context = self.get(context_id).await?;
        context.identity.channel_id = Some(channel_id.to_string());
        self.cache.insert(context_id.to_string(), context).await;
        Ok(())
    }

    pub async fn delete(&self, context_id: &str) {
        self.cache.invalidate(context_id).await;
    }
}

impl Default for CallContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_TTL)
    }
}
