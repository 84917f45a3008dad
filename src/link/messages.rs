//! Wire Message Types
//!
//! Defines the update messages the controller pushes to the dashboard and
//! the commands the dashboard sends back.
//!
//! Inbound frames look like `{"kind": {"kind": "bpm"}, "value": ...}`; the
//! shape of `value` is fixed by the topic kind. Outbound frames look like
//! `{"kind": "SelectAudioDevice", "value": "hw:1"}`.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use super::topic::{Topic, TopicKind};

/// Beat/tempo analysis published on the `bpm` topic
///
/// Fields the dashboard does not know about are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TempoRecord {
    /// Detected tempo in beats per minute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    /// Whether a beat was detected in the last analysis window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beat: Option<bool>,
    /// Overall input volume (0-255)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    /// Bass band level (0-255)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bass: Option<u8>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// DMX universe state published on the `dmx` topic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureStateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe: Option<u16>,
    /// Channel values, index 0 is the DMX start code
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<u8>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An update received from the controller, tagged by topic
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateMessage {
    BeatTempo(TempoRecord),
    FixtureState(FixtureStateRecord),
    /// Monotonic heartbeat sequence number
    ///
    /// The controller counts with an unsigned integer, so fractional,
    /// negative or exponent-form numbers are rejected as a payload mismatch.
    Heartbeat(u64),
    /// Audio input device names, in the controller's order
    AudioDeviceList(Vec<String>),
}

impl UpdateMessage {
    pub fn topic(&self) -> Topic {
        Topic::of(self.kind())
    }

    pub fn kind(&self) -> TopicKind {
        match self {
            UpdateMessage::BeatTempo(_) => TopicKind::BeatTempo,
            UpdateMessage::FixtureState(_) => TopicKind::FixtureState,
            UpdateMessage::Heartbeat(_) => TopicKind::Heartbeat,
            UpdateMessage::AudioDeviceList(_) => TopicKind::AudioDeviceList,
        }
    }

    /// Registry key for this message; never depends on the payload
    pub fn key(&self) -> TopicKind {
        self.topic().key()
    }

    /// Decode one inbound text frame
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::Malformed)?;
        Self::from_parts(Topic::of(envelope.kind.kind), envelope.value)
    }

    /// Build a message from a topic and its raw payload, checking that the
    /// payload has the shape the topic requires
    pub fn from_parts(topic: Topic, value: Value) -> Result<Self, DecodeError> {
        let kind = topic.kind();
        let mismatch = |source| DecodeError::Payload { kind, source };

        let message = match kind {
            TopicKind::BeatTempo => {
                UpdateMessage::BeatTempo(serde_json::from_value(value).map_err(mismatch)?)
            }
            TopicKind::FixtureState => {
                UpdateMessage::FixtureState(serde_json::from_value(value).map_err(mismatch)?)
            }
            TopicKind::Heartbeat => {
                UpdateMessage::Heartbeat(serde_json::from_value(value).map_err(mismatch)?)
            }
            TopicKind::AudioDeviceList => {
                UpdateMessage::AudioDeviceList(serde_json::from_value(value).map_err(mismatch)?)
            }
        };

        Ok(message)
    }

    /// Encode back into the inbound wire form
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for UpdateMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("UpdateMessage", 2)?;
        state.serialize_field("kind", &self.topic())?;
        match self {
            UpdateMessage::BeatTempo(record) => state.serialize_field("value", record)?,
            UpdateMessage::FixtureState(record) => state.serialize_field("value", record)?,
            UpdateMessage::Heartbeat(seq) => state.serialize_field("value", seq)?,
            UpdateMessage::AudioDeviceList(names) => state.serialize_field("value", names)?,
        }
        state.end()
    }
}

/// Raw inbound frame before the payload is checked against the topic
#[derive(Deserialize)]
struct Envelope {
    kind: WireTopic,
    value: Value,
}

/// The `{"kind": ...}` object inside an inbound frame
#[derive(Deserialize)]
struct WireTopic {
    kind: TopicKind,
}

/// Commands the dashboard sends to the controller
///
/// `None` clears the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum SendCommand {
    SelectAudioDevice(Option<String>),
    SelectSerialDevice(Option<String>),
}

impl SendCommand {
    pub fn select_audio_device(name: impl Into<String>) -> Self {
        SendCommand::SelectAudioDevice(Some(name.into()))
    }

    pub fn select_serial_device(port: impl Into<String>) -> Self {
        SendCommand::SelectSerialDevice(Some(port.into()))
    }

    /// Compact wire text for this command
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Errors raised while decoding an inbound frame
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not JSON, or missing the `kind.kind` discriminator or `value`
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The payload does not have the shape its topic requires
    #[error("Payload does not match topic {kind}: {source}")]
    Payload {
        kind: TopicKind,
        #[source]
        source: serde_json::Error,
    },
}
