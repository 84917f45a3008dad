//! Topic Identity
//!
//! A topic names one logical update stream. It carries nothing but its
//! kind, so two topics are the same stream exactly when their kinds match.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of streams multiplexed over the dashboard connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TopicKind {
    /// Beat and tempo analysis from the audio thread
    #[serde(rename = "bpm")]
    BeatTempo,
    /// Lighting fixture (DMX universe) state
    #[serde(rename = "dmx")]
    FixtureState,
    /// Liveness counter
    #[serde(rename = "Heartbeat")]
    Heartbeat,
    /// Names of the audio input devices the controller can see
    #[serde(rename = "AudioDevicesView")]
    AudioDeviceList,
}

impl TopicKind {
    /// Every kind, in wire-name order
    pub const ALL: [TopicKind; 4] = [
        TopicKind::BeatTempo,
        TopicKind::FixtureState,
        TopicKind::Heartbeat,
        TopicKind::AudioDeviceList,
    ];

    /// Name used for this kind on the wire
    pub const fn as_str(self) -> &'static str {
        match self {
            TopicKind::BeatTempo => "bpm",
            TopicKind::FixtureState => "dmx",
            TopicKind::Heartbeat => "Heartbeat",
            TopicKind::AudioDeviceList => "AudioDevicesView",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one update stream
///
/// Only the factory functions (and the frame decoder) build topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Topic {
    kind: TopicKind,
}

impl Topic {
    /// Every topic, in the same order as [`TopicKind::ALL`]
    pub const ALL: [Topic; 4] = [
        Topic::beat_tempo(),
        Topic::fixture_state(),
        Topic::heartbeat(),
        Topic::audio_device_list(),
    ];

    /// Beat and tempo updates (`bpm`)
    pub const fn beat_tempo() -> Self {
        Self::of(TopicKind::BeatTempo)
    }

    /// Fixture state updates (`dmx`)
    pub const fn fixture_state() -> Self {
        Self::of(TopicKind::FixtureState)
    }

    /// Controller heartbeat
    pub const fn heartbeat() -> Self {
        Self::of(TopicKind::Heartbeat)
    }

    /// Audio input device list (`AudioDevicesView`)
    pub const fn audio_device_list() -> Self {
        Self::of(TopicKind::AudioDeviceList)
    }

    pub(crate) const fn of(kind: TopicKind) -> Self {
        Self { kind }
    }

    /// Which stream this topic names
    pub const fn kind(&self) -> TopicKind {
        self.kind
    }

    /// Lookup key used by the subscription registry
    pub const fn key(&self) -> TopicKind {
        self.kind
    }

    /// Stable string form of the key, e.g. `{"kind":"bpm"}`
    pub fn canonical_key(&self) -> String {
        format!(r#"{{"kind":"{}"}}"#, self.kind.as_str())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}
