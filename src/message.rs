//! Message protocol definitions
//!
//! JSON envelopes exchanged with browser clients. Field names are PascalCase
//! on the wire (`Code`, `Rtype`, `From`, ...), which is what existing chat
//! front-ends parse.

use serde::{Deserialize, Serialize, Serializer};

use crate::error::InboundError;
use crate::types::{ClientId, Payload, Roster};

/// Recipient sentinel meaning "every live connection".
pub const BROADCAST_SENTINEL: &str = "ALL";

/// Status code attached to every successful envelope.
pub const CODE_OK: u16 = 200;

/// Client → Server message
///
/// Only `MsgTo` drives routing; the sender is always the connection the
/// frame arrived on, whatever `MsgFrom` claims.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InboundMessage {
    /// Free-text chat content
    pub content: String,
    /// Nickname the client believes it has (informational)
    pub from_nick: String,
    /// Identity the client believes it has (informational)
    pub msg_from: String,
    /// Recipient identity or `ALL`
    pub msg_to: String,
}

impl InboundMessage {
    /// Parse a normalized text frame
    pub fn parse(text: &str) -> Result<Self, InboundError> {
        let msg: InboundMessage = serde_json::from_str(text)?;
        if msg.msg_to.is_empty() {
            return Err(InboundError::MissingRecipient);
        }
        Ok(msg)
    }

    /// Routing directive for this message
    pub fn route(&self) -> Route {
        if self.msg_to == BROADCAST_SENTINEL {
            Route::Broadcast
        } else {
            Route::Direct(ClientId::from(self.msg_to.as_str()))
        }
    }
}

/// Where a delivery request should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Every live connection
    Broadcast,
    /// Exactly one connection, by identity
    Direct(ClientId),
}

/// A payload plus its routing directive
///
/// Built by a read loop, consumed once by the coordinator.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub payload: Payload,
    pub route: Route,
}

/// Numeric delivery type carried in `Rtype`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryType {
    Broadcast = 1,
    Direct = 2,
}

impl Serialize for DeliveryType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl From<&Route> for DeliveryType {
    fn from(route: &Route) -> Self {
        match route {
            Route::Broadcast => DeliveryType::Broadcast,
            Route::Direct(_) => DeliveryType::Direct,
        }
    }
}

/// Server → Client envelope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub code: u16,
    pub rtype: DeliveryType,
    pub from: String,
    pub to: String,
    pub content: String,
    /// Roster snapshot (roster envelopes only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Roster>,
    /// The recipient's own identity, sent once when it joins
    #[serde(rename = "NowUID", skip_serializing_if = "Option::is_none")]
    pub now_uid: Option<ClientId>,
}

impl Envelope {
    /// Chat envelope relayed on behalf of `from`
    pub fn chat(from: &ClientId, inbound: InboundMessage) -> Self {
        Self {
            code: CODE_OK,
            rtype: DeliveryType::from(&inbound.route()),
            from: from.to_string(),
            to: inbound.msg_to,
            content: inbound.content,
            user: None,
            now_uid: None,
        }
    }

    /// Roster envelope; `now_uid` is set only on the copy sent to a joiner
    pub fn roster(roster: Roster, now_uid: Option<ClientId>) -> Self {
        Self {
            code: CODE_OK,
            rtype: DeliveryType::Broadcast,
            from: String::new(),
            to: BROADCAST_SENTINEL.to_string(),
            content: String::new(),
            user: Some(roster),
            now_uid,
        }
    }

    pub fn encode(&self) -> Result<Payload, serde_json::Error> {
        serde_json::to_string(self).map(Payload::from)
    }
}

/// Collapse embedded newlines and strip surrounding whitespace
///
/// Outbound frames join coalesced payloads with `\n`, so a payload must never
/// carry its own.
pub fn normalize(text: &str) -> String {
    text.replace('\n', " ").trim().to_string()
}
