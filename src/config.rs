//! Environment-driven configuration.
//!
//! Credentials are required and fatal at startup when missing; everything
//! else has a default. `.env` files are honored via dotenvy.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | OPENAI_API_KEY | required | Bearer key for transcription and chat |
//! | OPENAI_API_URL | https://api.openai.com/v1 | OpenAI-compatible base URL |
//! | OPENAI_MODEL | gpt-3.5-turbo | Chat completion model |
//! | STT_MODEL | whisper-1 | Transcription model |
//! | AZURE_SUBSCRIPTION_KEY | required | Azure speech key |
//! | AZURE_REGION | required | Azure speech region |
//! | AZURE_VOICE | en-US-JennyNeural | Synthesis voice |
//! | VOXBOT_MEMORY_PATH | memory.json | Conversation history file |
//! | VOXBOT_PERSONALITY_PATH | personality.json | Personality file |

use crate::error::{AgentError, AgentResult};
use crate::gate::EnergyGate;
use std::path::PathBuf;
use std::time::Duration;

/// Tuning constants for one voice session.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// RMS threshold separating voiced from silent frames.
    pub rms_threshold: f32,
    /// Silence gap that finalizes an utterance.
    pub silence_timeout: Duration,
    /// Interval between channel occupancy samples.
    pub occupancy_interval: Duration,
    /// Sustained-vacancy delay before the session departs.
    pub idle_delay: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            rms_threshold: EnergyGate::DEFAULT_THRESHOLD,
            silence_timeout: Duration::from_millis(1500),
            occupancy_interval: Duration::from_secs(30),
            idle_delay: Duration::from_secs(30),
        }
    }
}

/// Full agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub stt_model: String,
    /// Token-budget cap for reply generation.
    pub max_reply_tokens: u32,
    pub azure_subscription_key: String,
    pub azure_region: String,
    pub azure_voice: String,
    pub memory_path: PathBuf,
    pub personality_path: PathBuf,
    pub tuning: SessionTuning,
}

impl AgentConfig {
    /// Build from environment. Missing credentials are a startup failure.
    pub fn from_env() -> AgentResult<Self> {
        dotenvy::dotenv().ok();

        let openai_api_key = require("OPENAI_API_KEY")?;
        let azure_subscription_key = require("AZURE_SUBSCRIPTION_KEY")?;
        let azure_region = require("AZURE_REGION")?;

        Ok(Self {
            openai_api_key,
            openai_base_url: var_or("OPENAI_API_URL", "https://api.openai.com/v1"),
            chat_model: var_or("OPENAI_MODEL", "gpt-3.5-turbo"),
            stt_model: var_or("STT_MODEL", "whisper-1"),
            max_reply_tokens: 4000,
            azure_subscription_key,
            azure_region,
            azure_voice: var_or("AZURE_VOICE", "en-US-JennyNeural"),
            memory_path: PathBuf::from(var_or("VOXBOT_MEMORY_PATH", "memory.json")),
            personality_path: PathBuf::from(var_or(
                "VOXBOT_PERSONALITY_PATH",
                "personality.json",
            )),
            tuning: SessionTuning::default(),
        })
    }
}

fn require(key: &str) -> AgentResult<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AgentError::Config(format!("{} is not set", key))),
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
