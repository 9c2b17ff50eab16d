//! Collaboration messages and their wire form.
//!
//! On the wire every message is an object with exactly three fields:
//!
//! ```json
//! { "type": "INPUT_CHANGE", "peerId": "<origin>", "data": { "name": "noun", "value": "cat" } }
//! ```
//!
//! `data` may also carry a `seq` number, the origin's edit counter, which
//! receivers use to drop duplicates that reach them over more than one path.

use std::{collections::BTreeMap, fmt};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::{document::Document, error::ValidationError, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MessageKind {
    #[serde(rename = "INPUT_CHANGE")]
    InputChanged,
    #[serde(rename = "TEMPLATE_CHANGE")]
    TemplateChanged,
    #[serde(rename = "REQUEST_STATE")]
    RequestState,
    #[serde(rename = "INITIAL_STATE")]
    InitialState,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::InputChanged,
        MessageKind::TemplateChanged,
        MessageKind::RequestState,
        MessageKind::InitialState,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            MessageKind::InputChanged => "INPUT_CHANGE",
            MessageKind::TemplateChanged => "TEMPLATE_CHANGE",
            MessageKind::RequestState => "REQUEST_STATE",
            MessageKind::InitialState => "INITIAL_STATE",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    InputChanged { name: String, value: String },
    TemplateChanged { template: String },
    RequestState { peer_id: PeerId },
    InitialState(Document),
}

impl Body {
    pub fn kind(&self) -> MessageKind {
        match self {
            Body::InputChanged { .. } => MessageKind::InputChanged,
            Body::TemplateChanged { .. } => MessageKind::TemplateChanged,
            Body::RequestState { .. } => MessageKind::RequestState,
            Body::InitialState(_) => MessageKind::InitialState,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: PeerId,
    seq: Option<u64>,
    body: Body,
}

#[derive(serde::Deserialize)]
struct InputChange {
    name: String,
    value: String,
}

#[derive(serde::Deserialize)]
struct TemplateChange {
    template: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestState {
    peer_id: PeerId,
}

#[derive(serde::Deserialize)]
struct InitialState {
    template: String,
    #[serde(default)]
    inputs: BTreeMap<String, String>,
}

impl Message {
    pub fn new(sender: PeerId, body: Body) -> Self {
        Self {
            sender,
            seq: None,
            body,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// The peer that authored the message. Relays keep it unchanged.
    pub fn sender(&self) -> &PeerId {
        &self.sender
    }

    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn to_wire(&self) -> Value {
        let mut data = match &self.body {
            Body::InputChanged { name, value } => json!({ "name": name, "value": value }),
            Body::TemplateChanged { template } => json!({ "template": template }),
            Body::RequestState { peer_id } => json!({ "peerId": peer_id }),
            Body::InitialState(document) => {
                json!({ "template": document.template(), "inputs": document.inputs() })
            }
        };
        if let (Some(seq), Value::Object(fields)) = (self.seq, &mut data) {
            fields.insert("seq".to_owned(), seq.into());
        }
        json!({
            "type": self.kind().wire_name(),
            "peerId": self.sender,
            "data": data,
        })
    }

    pub fn from_wire(raw: &Value) -> Result<Self, ValidationError> {
        let object = raw.as_object().ok_or(ValidationError::NotAnObject)?;
        let kind = match object.get("type") {
            None | Some(Value::Null) => return Err(ValidationError::MissingKind),
            Some(Value::String(name)) => MessageKind::from_wire(name)
                .ok_or_else(|| ValidationError::UnknownKind(name.clone()))?,
            Some(other) => return Err(ValidationError::UnknownKind(other.to_string())),
        };
        let sender = object
            .get("peerId")
            .and_then(Value::as_str)
            .map(PeerId::from)
            .ok_or(ValidationError::MissingSender)?;
        let data = match object.get("data") {
            None | Some(Value::Null) => return Err(ValidationError::MissingData),
            Some(data) => data,
        };
        let malformed = |source| ValidationError::MalformedData { kind, source };

        let body = match kind {
            MessageKind::InputChanged => {
                let InputChange { name, value } =
                    InputChange::deserialize(data).map_err(malformed)?;
                Body::InputChanged { name, value }
            }
            MessageKind::TemplateChanged => {
                let TemplateChange { template } =
                    TemplateChange::deserialize(data).map_err(malformed)?;
                Body::TemplateChanged { template }
            }
            MessageKind::RequestState => {
                let RequestState { peer_id } = RequestState::deserialize(data).map_err(malformed)?;
                Body::RequestState { peer_id }
            }
            MessageKind::InitialState => {
                let InitialState { template, inputs } =
                    InitialState::deserialize(data).map_err(malformed)?;
                Body::InitialState(Document::new(template, inputs))
            }
        };

        Ok(Self {
            sender,
            seq: data.get("seq").and_then(Value::as_u64),
            body,
        })
    }
}
