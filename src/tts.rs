//! Speech synthesis: turn reply text into a playable audio payload.
//!
//! Production backend is the Azure Cognitive Services regional TTS endpoint
//! (subscription key + region, SSML request body, MP3 response).

use crate::error::{AgentError, AgentResult};
use crate::transport::AudioPayload;
use async_trait::async_trait;
use std::time::Duration;

/// Backend that synthesizes speech for a text reply.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(&self, text: &str) -> AgentResult<AudioPayload>;
}

/// Production TTS backend: Azure Cognitive Services speech synthesis.
#[derive(Debug, Clone)]
pub struct AzureTts {
    subscription_key: String,
    /// Azure region, e.g. "westeurope"; selects the regional endpoint.
    region: String,
    /// Voice name, e.g. "en-US-JennyNeural".
    voice: String,
    client: reqwest::Client,
}

impl AzureTts {
    const OUTPUT_FORMAT: &'static str = "audio-48khz-96kbitrate-mono-mp3";

    pub fn new(
        subscription_key: impl Into<String>,
        region: impl Into<String>,
        voice: impl Into<String>,
    ) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AgentError::Synthesis(e.to_string()))?;
        Ok(Self {
            subscription_key: subscription_key.into(),
            region: region.into(),
            voice: voice.into(),
            client,
        })
    }

    fn ssml(&self, text: &str) -> String {
        format!(
            "<speak version='1.0' xml:lang='en-US'><voice name='{}'>{}</voice></speak>",
            self.voice,
            escape_xml(text)
        )
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl TtsBackend for AzureTts {
    async fn synthesize(&self, text: &str) -> AgentResult<AudioPayload> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(AudioPayload::new(Vec::new()));
        }
        let url = format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
            self.region
        );
        let res = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", Self::OUTPUT_FORMAT)
            .body(self.ssml(text))
            .send()
            .await
            .map_err(|e| AgentError::Synthesis(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AgentError::Synthesis(format!(
                "TTS API error {}: {}",
                status, body
            )));
        }
        let bytes = res
            .bytes()
            .await
            .map_err(|e| AgentError::Synthesis(e.to_string()))?;
        Ok(AudioPayload::new(bytes.to_vec()))
    }
}
