//! # voxbot — voice-channel conversational agent
//!
//! Listens to speakers in a real-time voice channel, detects speech turns,
//! transcribes them, generates a contextual reply, synthesizes speech, and
//! plays it back — while enforcing single-speaker turn-taking and leaving
//! idle channels on its own.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       Voice Session                           │
//! │  ┌─────────────┐  ┌────────────┐  ┌──────────────────────┐    │
//! │  │ FrameSource │→ │ EnergyGate │→ │ UtteranceAccumulator │    │
//! │  │ (transport) │  │ (RMS)      │  │ (silence deadline)   │    │
//! │  └─────────────┘  └────────────┘  └──────────┬───────────┘    │
//! │        ▲ admission                           │ finalize       │
//! │  ┌─────┴───────┐                  ┌──────────▼───────────┐    │
//! │  │ TurnArbiter │←─ busy-speaking ─│ Orchestrator         │    │
//! │  │ (one active │                  │ STT → chat → TTS →   │    │
//! │  │  speaker)   │                  │ playback             │    │
//! │  └─────────────┘                  └──────────────────────┘    │
//! │  ┌─────────────────────┐                                      │
//! │  │ OccupancyMonitor    │── empty channel → idle departure     │
//! │  └─────────────────────┘                                      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transcription, reply-generation, and speech-synthesis services are
//! external collaborators behind traits; the voice transport itself is a
//! trait seam so the whole pipeline runs against synthetic frames in tests.

pub mod accumulator;
pub mod arbiter;
pub mod audio;
pub mod chat;
pub mod config;
pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod memory;
pub mod occupancy;
pub mod orchestrator;
pub mod sched;
mod session;
pub mod stt;
pub mod transport;
pub mod tts;

pub use accumulator::{FrameDisposition, Utterance, UtteranceAccumulator};
pub use arbiter::{Admission, PlaybackFlag, RejectReason, TurnArbiter};
pub use audio::{PcmFrame, CHANNELS, SAMPLE_RATE_HZ};
pub use chat::{ChatMessage, OpenAiChat, ReplyBackend, Role};
pub use config::{AgentConfig, SessionTuning};
pub use error::{AgentError, AgentResult};
pub use gate::{EnergyGate, FrameClass};
pub use lifecycle::{AgentBackends, LeaveOutcome, VoiceAgent};
pub use memory::{MemoryStore, DEFAULT_PERSONALITY};
pub use occupancy::{OccupancyAction, OccupancyMonitor};
pub use orchestrator::{ConversationOrchestrator, TurnOutcome, FALLBACK_REPLY};
pub use stt::{SttBackend, WhisperApiStt};
pub use transport::{
    AudioPayload, AudioSink, ChannelId, ConnectionEvent, FrameSource, SpeakerId, VoiceConnection,
    VoiceGateway,
};
pub use tts::{AzureTts, TtsBackend};
