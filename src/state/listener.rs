use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::BridgeError;
use crate::state::store::ListSide;

/// The list event a listener reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopEvent {
    Lpop,
    Rpop,
}

impl PopEvent {
    pub fn parse(event: &str) -> Result<Self, BridgeError> {
        match event {
            "lpop" => Ok(PopEvent::Lpop),
            "rpop" => Ok(PopEvent::Rpop),
            other => Err(BridgeError::UnsupportedEvent(other.to_string())),
        }
    }

    pub fn side(self) -> ListSide {
        match self {
            PopEvent::Lpop => ListSide::Left,
            PopEvent::Rpop => ListSide::Right,
        }
    }
}

impl fmt::Display for PopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopEvent::Lpop => f.write_str("lpop"),
            PopEvent::Rpop => f.write_str("rpop"),
        }
    }
}

/// Payload of `POST /listener/add`.
///
/// Everything defaults to empty so that missing fields are reported by
/// [`AddListener::validate`] rather than by the JSON extractor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AddListener {
    pub id: String,
    pub event: String,
    pub data: ListenerData,
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListenerData {
    pub key: String,
}

/// Payload of `POST /listener/remove`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RemoveListener {
    pub id: String,
}

/// A validated subscription: one key watched in one direction, with
/// results posted to `endpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: String,
    pub event: PopEvent,
    pub key: String,
    pub endpoint: String,
}

impl AddListener {
    pub fn new(
        id: impl Into<String>,
        event: impl Into<String>,
        key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            event: event.into(),
            data: ListenerData { key: key.into() },
            endpoint: endpoint.into(),
        }
    }

    pub fn validate(self) -> Result<Subscription, BridgeError> {
        if self.id.is_empty() {
            return Err(BridgeError::InvalidRequest("`id` is required".into()));
        }
        let event = PopEvent::parse(&self.event)?;
        if self.data.key.is_empty() {
            return Err(BridgeError::InvalidRequest("`data.key` is required".into()));
        }
        if self.endpoint.is_empty() {
            return Err(BridgeError::InvalidRequest("`endpoint` is required".into()));
        }
        reqwest::Url::parse(&self.endpoint).map_err(|e| {
            BridgeError::InvalidRequest(format!("`endpoint` is not a valid URL: {e}"))
        })?;

        Ok(Subscription {
            id: self.id,
            event,
            key: self.data.key,
            endpoint: self.endpoint,
        })
    }
}

/// Lifecycle of a listener as seen from outside its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Spawned, loop not entered yet.
    Starting,
    Running,
    /// Stop requested, worker still inside its current pop.
    Stopping,
    Terminated,
}

/// One row of `GET /listener/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ListenerStatus {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub state: SubscriptionState,
}
