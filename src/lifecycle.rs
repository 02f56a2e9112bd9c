//! Control surface and session lifecycle: join, leave, clear-memory,
//! set-personality.
//!
//! One agent owns at most one voice session at a time. `join` refuses to
//! stack a second connection; `leave` is idempotent and reports
//! not-connected instead of failing.

use crate::arbiter::PlaybackFlag;
use crate::chat::{OpenAiChat, ReplyBackend};
use crate::config::{AgentConfig, SessionTuning};
use crate::error::{AgentError, AgentResult};
use crate::memory::MemoryStore;
use crate::orchestrator::ConversationOrchestrator;
use crate::session::{run_session, SessionCommand, SessionHandle};
use crate::stt::{SttBackend, WhisperApiStt};
use crate::transport::{ChannelId, VoiceGateway};
use crate::tts::{AzureTts, TtsBackend};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// External service backends for one agent.
pub struct AgentBackends {
    pub stt: Arc<dyn SttBackend>,
    pub chat: Arc<dyn ReplyBackend>,
    pub tts: Arc<dyn TtsBackend>,
}

impl AgentBackends {
    /// Production backends from configuration.
    pub fn from_config(config: &AgentConfig) -> AgentResult<Self> {
        Ok(Self {
            stt: Arc::new(WhisperApiStt::new(
                &config.openai_base_url,
                &config.openai_api_key,
                &config.stt_model,
            )?),
            chat: Arc::new(OpenAiChat::new(
                &config.openai_base_url,
                &config.openai_api_key,
                &config.chat_model,
                config.max_reply_tokens,
            )?),
            tts: Arc::new(AzureTts::new(
                &config.azure_subscription_key,
                &config.azure_region,
                &config.azure_voice,
            )?),
        })
    }
}

/// Result of a `leave` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// A session existed and was torn down.
    Left,
    /// No active session; nothing was mutated.
    NotConnected,
}

/// The voice agent: owns the gateway, the backends, conversation memory,
/// and the single active session.
pub struct VoiceAgent {
    gateway: Arc<dyn VoiceGateway>,
    backends: AgentBackends,
    memory: Arc<MemoryStore>,
    tuning: SessionTuning,
    session: Option<SessionHandle>,
}

impl VoiceAgent {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        backends: AgentBackends,
        memory: Arc<MemoryStore>,
        tuning: SessionTuning,
    ) -> Self {
        Self {
            gateway,
            backends,
            memory,
            tuning,
            session: None,
        }
    }

    /// Build a production agent from configuration.
    pub fn from_config(config: &AgentConfig, gateway: Arc<dyn VoiceGateway>) -> AgentResult<Self> {
        let backends = AgentBackends::from_config(config)?;
        let memory = Arc::new(MemoryStore::load(
            &config.memory_path,
            &config.personality_path,
        ));
        Ok(Self::new(gateway, backends, memory, config.tuning.clone()))
    }

    /// Join the caller's voice channel. `channel` is the channel the caller
    /// is currently in, or `None` when they have no voice presence.
    pub async fn join(&mut self, channel: Option<ChannelId>) -> AgentResult<ChannelId> {
        if let Some(handle) = &self.session {
            if !handle.task.is_finished() {
                return Err(AgentError::AlreadyConnected);
            }
            // Previous session departed on its own (idle channel).
            self.session = None;
        }
        let channel = channel.ok_or(AgentError::NoVoicePresence)?;

        let conn = self.gateway.connect(channel).await?;

        let playback = PlaybackFlag::new();
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            Arc::clone(&self.backends.stt),
            Arc::clone(&self.backends.chat),
            Arc::clone(&self.backends.tts),
            Arc::clone(&self.memory),
            playback,
        ));

        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let task = tokio::spawn(run_session(
            channel,
            conn,
            cmd_rx,
            self.tuning.clone(),
            orchestrator,
        ));
        self.session = Some(SessionHandle {
            channel,
            cmd_tx,
            task,
        });
        info!(%channel, "joined voice channel");
        Ok(channel)
    }

    /// Leave the current channel. Safe to call with no session; calling it
    /// twice has the same effect as once.
    pub async fn leave(&mut self) -> LeaveOutcome {
        let Some(handle) = self.session.take() else {
            return LeaveOutcome::NotConnected;
        };
        if handle.task.is_finished() {
            // Session already tore itself down (idle departure).
            return LeaveOutcome::NotConnected;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if handle
            .cmd_tx
            .send(SessionCommand::Leave(ack_tx))
            .await
            .is_err()
        {
            let _ = handle.task.await;
            return LeaveOutcome::NotConnected;
        }
        let _ = ack_rx.await;
        let _ = handle.task.await;
        info!("left voice channel");
        LeaveOutcome::Left
    }

    /// Reset all conversation history. Atomic relative to in-flight turns.
    pub fn clear_memory(&self) -> AgentResult<()> {
        self.memory.clear()
    }

    /// Replace the shared personality string.
    pub fn set_personality(&self, text: &str) -> AgentResult<()> {
        self.memory.set_personality(text)
    }

    /// Channel of the live session, if any.
    pub fn connected_channel(&self) -> Option<ChannelId> {
        self.session
            .as_ref()
            .filter(|h| !h.task.is_finished())
            .map(|h| h.channel)
    }
}
