//! Conversation memory and personality persistence.
//!
//! Read-all on load, write-all on every mutation, two JSON files: per-user
//! conversation history keyed by speaker id, and the single shared
//! personality string. All mutation goes through one lock so clearing is
//! atomic relative to in-flight turns: a turn appends into whatever the
//! store holds at append time and can never resurrect cleared history.

use crate::chat::ChatMessage;
use crate::error::{AgentError, AgentResult};
use crate::transport::SpeakerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Personality used when no persisted one exists.
pub const DEFAULT_PERSONALITY: &str = "You are a helpful assistant.";

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    conversation_history: HashMap<String, Vec<ChatMessage>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersonalityFile {
    personality: String,
}

#[derive(Debug)]
struct MemoryState {
    history: HashMap<String, Vec<ChatMessage>>,
    personality: String,
}

/// Blocking key-value store for conversation history and personality.
#[derive(Debug)]
pub struct MemoryStore {
    memory_path: PathBuf,
    personality_path: PathBuf,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Load both files, falling back to empty history and the default
    /// personality when a file is missing or unreadable.
    pub fn load(memory_path: impl Into<PathBuf>, personality_path: impl Into<PathBuf>) -> Self {
        let memory_path = memory_path.into();
        let personality_path = personality_path.into();

        let history = match read_json::<MemoryFile>(&memory_path) {
            Ok(f) => f.conversation_history,
            Err(e) => {
                warn!(path = %memory_path.display(), error = %e, "memory file unavailable, starting empty");
                HashMap::new()
            }
        };
        let personality = match read_json::<PersonalityFile>(&personality_path) {
            Ok(f) => f.personality,
            Err(e) => {
                warn!(path = %personality_path.display(), error = %e, "personality file unavailable, using default");
                DEFAULT_PERSONALITY.to_string()
            }
        };

        info!(
            users = history.len(),
            "memory loaded"
        );
        Self {
            memory_path,
            personality_path,
            state: Mutex::new(MemoryState {
                history,
                personality,
            }),
        }
    }

    /// Prior turns for one speaker, oldest first.
    pub fn history_for(&self, speaker: SpeakerId) -> Vec<ChatMessage> {
        let state = self.lock();
        state
            .history
            .get(&speaker.to_string())
            .cloned()
            .unwrap_or_default()
    }

    pub fn personality(&self) -> String {
        self.lock().personality.clone()
    }

    /// Append one completed (user, assistant) exchange and persist.
    pub fn append_exchange(
        &self,
        speaker: SpeakerId,
        user_text: &str,
        assistant_text: &str,
    ) -> AgentResult<()> {
        let mut state = self.lock();
        let turns = state.history.entry(speaker.to_string()).or_default();
        turns.push(ChatMessage::user(user_text));
        turns.push(ChatMessage::assistant(assistant_text));
        self.persist(&state)
    }

    /// Drop all conversation history and persist. Atomic with respect to
    /// concurrent appends because both run under the store lock.
    pub fn clear(&self) -> AgentResult<()> {
        let mut state = self.lock();
        state.history.clear();
        info!("conversation memory cleared");
        self.persist(&state)
    }

    pub fn set_personality(&self, text: impl Into<String>) -> AgentResult<()> {
        let mut state = self.lock();
        state.personality = text.into();
        info!("personality updated");
        self.persist(&state)
    }

    fn persist(&self, state: &MemoryState) -> AgentResult<()> {
        let memory = MemoryFile {
            conversation_history: state.history.clone(),
        };
        write_json(&self.memory_path, &memory)?;
        write_json(
            &self.personality_path,
            &PersonalityFile {
                personality: state.personality.clone(),
            },
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // Writers never panic while holding the lock; recover the data if
        // one somehow did.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> AgentResult<T> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| AgentError::Persistence(e.to_string()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> AgentResult<()> {
    let raw = serde_json::to_string_pretty(value)
        .map_err(|e| AgentError::Persistence(e.to_string()))?;
    fs::write(path, raw)?;
    Ok(())
}
