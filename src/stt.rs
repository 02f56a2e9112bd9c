//! Speech-to-text: convert a finalized `Utterance` into a transcript.
//!
//! The payload is mono 16-bit PCM at the channel sample rate, wrapped into a
//! WAV container in-process and posted to an OpenAI-compatible
//! `/audio/transcriptions` endpoint.

use crate::accumulator::Utterance;
use crate::audio::{CHANNELS, SAMPLE_RATE_HZ};
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use std::time::Duration;

/// Backend for converting an utterance payload to text. Returns an empty
/// string when the service heard nothing intelligible.
#[async_trait]
pub trait SttBackend: Send + Sync {
    async fn transcribe(&self, utterance: &Utterance) -> AgentResult<String>;
}

/// Encode i16 PCM (mono) into 16-bit WAV bytes for API upload.
pub fn pcm_to_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk: PCM, 16-bit
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    buf.extend_from_slice(&CHANNELS.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * CHANNELS as u32 * 2).to_le_bytes());
    buf.extend_from_slice(&(CHANNELS * 2).to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        buf.extend_from_slice(&s.to_le_bytes());
    }
    buf
}

/// Production STT backend: OpenAI-compatible transcription API.
#[derive(Debug, Clone)]
pub struct WhisperApiStt {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    base_url: String,
    api_key: String,
    /// Transcription model, e.g. whisper-1.
    model: String,
    client: reqwest::Client,
}

impl WhisperApiStt {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AgentError::Transcription(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl SttBackend for WhisperApiStt {
    async fn transcribe(&self, utterance: &Utterance) -> AgentResult<String> {
        let wav = pcm_to_wav(&utterance.samples, SAMPLE_RATE_HZ);
        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| AgentError::Transcription(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AgentError::Transcription(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AgentError::Transcription(format!(
                "STT API error {}: {}",
                status, body
            )));
        }
        let json: serde_json::Value = res
            .json()
            .await
            .map_err(|e| AgentError::Transcription(e.to_string()))?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(text)
    }
}
