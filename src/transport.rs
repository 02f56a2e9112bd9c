//! Trait seam for the voice-channel transport.
//!
//! The real stack (gateway connection, opus decode, playback) lives behind
//! these traits; the session logic only sees speaking-start events, decoded
//! PCM frame streams, a playable sink, and a member count. Tests drive the
//! whole pipeline with channel-backed implementations.

use crate::audio::PcmFrame;
use crate::error::AgentResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identity of a voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a speaker in the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpeakerId(pub u64);

impl fmt::Display for SpeakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Synthesized audio ready for playback (container bytes, e.g. MP3 or WAV).
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
}

impl AudioPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Events surfaced by an open voice connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A speaker started transmitting audio.
    SpeakingStart(SpeakerId),
    /// The connection was closed from the transport side.
    Closed,
}

/// Lazy stream of one speaker's decoded PCM frames, in arrival order.
#[async_trait]
pub trait FrameSource: Send {
    /// Next decoded frame; `None` when the stream ended, `Err` on a decode
    /// or subscription failure (the stream is dead afterwards).
    async fn next_frame(&mut self) -> Option<AgentResult<PcmFrame>>;
}

/// Playback half of a connection. Cloneable handle so an in-flight turn can
/// play audio while the session loop keeps servicing events.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play a payload to completion; resolves when playback finishes.
    async fn play(&self, audio: AudioPayload) -> AgentResult<()>;
}

/// One established voice connection.
#[async_trait]
pub trait VoiceConnection: Send {
    /// Next transport event; `None` means the connection is gone.
    async fn next_event(&mut self) -> Option<ConnectionEvent>;

    /// Subscribe to a speaker's decoded frames.
    fn subscribe(&mut self, speaker: SpeakerId) -> AgentResult<Box<dyn FrameSource>>;

    /// Playback handle for this connection.
    fn sink(&self) -> Arc<dyn AudioSink>;

    /// Current member count of the channel, the agent included.
    fn member_count(&self) -> usize;

    /// Destroy the connection. Idempotent.
    async fn close(&mut self);
}

/// Entry point: joins a channel and hands back a live connection.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(&self, channel: ChannelId) -> AgentResult<Box<dyn VoiceConnection>>;
}
