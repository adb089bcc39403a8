//! Google Gemini API client for story chat, speech, and illustrations.
//!
//! One `GeminiClient` serves all three capabilities over the REST API:
//! - chat continuation via `generateContent` with a top-level
//!   `system_instruction` and the conversation history as `contents`
//! - speech via `generateContent` with `responseModalities: ["AUDIO"]`,
//!   which answers with base64 raw PCM in an `inlineData` part
//! - images via Imagen `predict` (primary) and via `generateContent` with
//!   `responseModalities: ["IMAGE"]` on an image-capable chat model
//!   (secondary)
//! - transcription of spoken input via `generateContent` with the WAV
//!   recording as an `inline_data` part
//!
//! Auth is the `?key=API_KEY` query parameter. Roles are `"user"` /
//! `"model"`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatEntry, ChatHandle, ChatProvider, ChatRole, SafetySetting};
use crate::config::FabulaConfig;
use crate::error::{ConfigError, FabulaError, IllustrationError, LlmError, VoiceError};
use crate::illustration::{FallbackChain, ImageRef, ImageStrategy, PlaceholderSource};
use crate::language::Language;
use crate::voice::{PcmAudio, SpeechProvider, SttProvider, WavFormat, inspect};

/// The default Google Gemini API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Imagen's own safety knob; it does not take per-category settings.
const IMAGEN_SAFETY_SETTING: &str = "block_low_and_above";

/// Google Gemini API client.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    speech_model: String,
    speech_voice: String,
    image_model: String,
    fallback_image_model: String,
    transcription_model: String,
    aspect_ratio: String,
    output_mime_type: String,
    pcm_format: WavFormat,
}

impl GeminiClient {
    /// Create a client from configuration.
    ///
    /// Uses `gemini.api_key` if set, otherwise reads the environment
    /// variable named by `gemini.api_key_env`. Returns
    /// `ConfigError::EnvVarMissing` if neither is available.
    pub fn new(config: &FabulaConfig) -> Result<Self, FabulaError> {
        let api_key = config
            .gemini
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.gemini.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: config.gemini.api_key_env.clone(),
            })?;
        Ok(Self::new_with_key(config, api_key)?)
    }

    /// Create a client with an explicitly provided API key.
    pub fn new_with_key(config: &FabulaConfig, api_key: String) -> Result<Self, LlmError> {
        let gemini = &config.gemini;
        let base_url = gemini
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(gemini.timeout_secs))
            .connect_timeout(Duration::from_secs(gemini.connect_timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            chat_model: gemini.chat_model.clone(),
            speech_model: gemini.speech_model.clone(),
            speech_voice: gemini.speech_voice.clone(),
            image_model: gemini.image_model.clone(),
            fallback_image_model: gemini.fallback_image_model.clone(),
            transcription_model: gemini.transcription_model.clone(),
            aspect_ratio: config.illustration.aspect_ratio.clone(),
            output_mime_type: config.illustration.output_mime_type.clone(),
            pcm_format: config.audio.format(),
        })
    }

    /// Build the endpoint URL for a model method.
    fn endpoint_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, model, method, self.api_key
        )
    }

    /// POST a JSON body and return the parsed JSON response.
    async fn post_json(&self, model: &str, method: &str, body: &Value) -> Result<Value, LlmError> {
        debug!(model, method, "Sending Gemini request");

        let response = self
            .client
            .post(self.endpoint_url(model, method))
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest {
                message: format!("Request to Gemini API failed: {}", e.without_url()),
            })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ResponseParse {
            message: format!("Failed to read response body: {}", e.without_url()),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
            message: format!("Invalid JSON in response: {}", e),
        })
    }

    /// Map an HTTP status code to the appropriate `LlmError`.
    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 30,
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
        }
    }

    // --- Chat ---

    /// Build the `generateContent` body for one chat turn.
    fn build_chat_body(
        system_instruction: &str,
        safety_settings: &[SafetySetting],
        history: &[ChatEntry],
        text: &str,
    ) -> Value {
        let contents: Vec<Value> = history
            .iter()
            .map(|entry| Self::entry_to_json(entry.role, &entry.text))
            .chain(std::iter::once(Self::entry_to_json(ChatRole::User, text)))
            .collect();

        serde_json::json!({
            "system_instruction": {
                "parts": [{"text": system_instruction}]
            },
            "contents": contents,
            "safetySettings": safety_settings,
        })
    }

    fn entry_to_json(role: ChatRole, text: &str) -> Value {
        let role = match role {
            ChatRole::User => "user",
            ChatRole::Model => "model",
        };
        serde_json::json!({
            "role": role,
            "parts": [{"text": text}],
        })
    }

    /// Extract the story text from a chat response.
    fn parse_chat_response(body: &Value) -> Result<String, LlmError> {
        if let Some(reason) = body["promptFeedback"]["blockReason"].as_str() {
            return Err(LlmError::Blocked {
                reason: reason.to_string(),
            });
        }

        let candidate = body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing or empty 'candidates' array in response".to_string(),
            })?;

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        if !text.trim().is_empty() {
            return Ok(text);
        }

        match candidate["finishReason"].as_str() {
            Some(reason @ ("SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST")) => {
                Err(LlmError::Blocked {
                    reason: reason.to_string(),
                })
            }
            _ => Err(LlmError::EmptyResponse),
        }
    }

    // --- Speech ---

    fn build_speech_body(&self, prompt: &str) -> Value {
        serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": {"voiceName": self.speech_voice}
                    }
                }
            },
            "safetySettings": super::story_safety_settings(),
        })
    }

    /// Decode the first inline audio part. `Ok(None)` when there is none.
    ///
    /// The part's mime type (e.g. `audio/L16;codec=pcm;rate=24000`) may
    /// carry the sample rate; it overrides the configured one.
    fn parse_speech_response(
        body: &Value,
        format: WavFormat,
    ) -> Result<Option<PcmAudio>, VoiceError> {
        let Some(inline) = Self::first_inline_data(body) else {
            return Ok(None);
        };
        let Some(data) = inline["data"].as_str() else {
            return Ok(None);
        };

        let bytes = STANDARD
            .decode(data)
            .map_err(|e| VoiceError::InvalidPayload {
                message: format!("audio is not valid base64: {}", e),
            })?;

        let mut format = format;
        if let Some(rate) = inline["mimeType"].as_str().and_then(Self::mime_sample_rate) {
            format.sample_rate_hz = rate;
        }

        Ok(Some(PcmAudio::new(bytes, format)))
    }

    fn mime_sample_rate(mime: &str) -> Option<u32> {
        mime.split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
    }

    // --- Images ---

    fn build_imagen_body(&self, prompt: &str) -> Value {
        serde_json::json!({
            "instances": [{"prompt": prompt}],
            "parameters": {
                "sampleCount": 1,
                "outputOptions": {"mimeType": self.output_mime_type},
                "aspectRatio": self.aspect_ratio,
                "safetySetting": IMAGEN_SAFETY_SETTING,
            }
        })
    }

    fn parse_imagen_response(body: &Value, default_mime: &str) -> Option<ImageRef> {
        let prediction = body["predictions"].as_array()?.first()?;
        let data = STANDARD
            .decode(prediction["bytesBase64Encoded"].as_str()?)
            .ok()?;
        let mime_type = prediction["mimeType"]
            .as_str()
            .unwrap_or(default_mime)
            .to_string();
        Some(ImageRef::Inline { mime_type, data })
    }

    fn build_flash_image_body(prompt: &str) -> Value {
        serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "responseModalities": ["IMAGE"]
            },
            "safetySettings": super::story_safety_settings(),
        })
    }

    /// Transcription request: the instruction followed by the recording.
    fn build_transcription_body(prompt: &str, wav: &[u8]) -> Value {
        serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": prompt},
                    {"inline_data": {"mime_type": "audio/wav", "data": STANDARD.encode(wav)}}
                ]
            }],
        })
    }

    /// Text of the first candidate, trimmed. An answer without text is an
    /// empty transcript.
    fn parse_transcription(body: &Value) -> Result<String, VoiceError> {
        if let Some(reason) = body["promptFeedback"]["blockReason"].as_str() {
            return Err(VoiceError::TranscriptionFailed {
                message: format!("recording blocked: {}", reason),
            });
        }
        let parts = body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .and_then(|c| c["content"]["parts"].as_array());
        let text: String = parts
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(text.trim().to_string())
    }

    fn parse_inline_image(body: &Value) -> Option<ImageRef> {
        let inline = Self::first_inline_data(body)?;
        let data = STANDARD.decode(inline["data"].as_str()?).ok()?;
        let mime_type = inline["mimeType"]
            .as_str()
            .unwrap_or("image/png")
            .to_string();
        Some(ImageRef::Inline { mime_type, data })
    }

    /// First part of the first candidate that carries `inlineData`.
    fn first_inline_data(body: &Value) -> Option<&Value> {
        body["candidates"]
            .as_array()?
            .first()?
            .get("content")?
            .get("parts")?
            .as_array()?
            .iter()
            .find_map(|part| part.get("inlineData"))
    }

    /// High-fidelity Imagen generation.
    pub async fn generate_image_primary(&self, prompt: &str) -> Result<ImageRef, IllustrationError> {
        let body = self.build_imagen_body(prompt);
        let response = self
            .post_json(&self.image_model, "predict", &body)
            .await
            .map_err(|e| IllustrationError::GenerationFailed {
                strategy: self.image_model.clone(),
                message: e.to_string(),
            })?;
        Self::parse_imagen_response(&response, &self.output_mime_type).ok_or_else(|| {
            IllustrationError::NoImagePart {
                strategy: self.image_model.clone(),
            }
        })
    }

    /// Image generation through an image-capable chat model.
    pub async fn generate_image_secondary(
        &self,
        prompt: &str,
    ) -> Result<ImageRef, IllustrationError> {
        let body = Self::build_flash_image_body(prompt);
        let response = self
            .post_json(&self.fallback_image_model, "generateContent", &body)
            .await
            .map_err(|e| IllustrationError::GenerationFailed {
                strategy: self.fallback_image_model.clone(),
                message: e.to_string(),
            })?;
        Self::parse_inline_image(&response).ok_or_else(|| IllustrationError::NoImagePart {
            strategy: self.fallback_image_model.clone(),
        })
    }
}

#[async_trait]
impl ChatProvider for GeminiClient {
    async fn send_message(&self, chat: &ChatHandle, text: &str) -> Result<String, LlmError> {
        let history = chat.history().await;
        debug!(
            chat_id = %chat.id(),
            language = %chat.language(),
            history = history.len(),
            "Continuing story"
        );
        let body = Self::build_chat_body(
            chat.system_instruction(),
            chat.safety_settings(),
            &history,
            text,
        );
        let response = self
            .post_json(&self.chat_model, "generateContent", &body)
            .await?;
        let story = Self::parse_chat_response(&response)?;
        chat.record_exchange(text, &story).await;
        Ok(story)
    }

    fn model_name(&self) -> &str {
        &self.chat_model
    }
}

#[async_trait]
impl SpeechProvider for GeminiClient {
    async fn synthesize(
        &self,
        text: &str,
        language: Language,
    ) -> Result<Option<PcmAudio>, VoiceError> {
        let body = self.build_speech_body(&language.speech_prompt(text));
        let response = self
            .post_json(&self.speech_model, "generateContent", &body)
            .await
            .map_err(|e| VoiceError::SynthesisFailed {
                message: e.to_string(),
            })?;
        Self::parse_speech_response(&response, self.pcm_format)
    }

    fn name(&self) -> &str {
        &self.speech_model
    }
}

#[async_trait]
impl SttProvider for GeminiClient {
    async fn transcribe(&self, wav: &[u8], language: Language) -> Result<String, VoiceError> {
        let summary = inspect(wav)?;
        if summary.frames == 0 {
            return Err(VoiceError::NoAudio);
        }
        debug!(
            model = %self.transcription_model,
            duration_secs = summary.duration_secs,
            "Transcribing recording"
        );

        let body = Self::build_transcription_body(&language.transcription_prompt(), wav);
        let response = self
            .post_json(&self.transcription_model, "generateContent", &body)
            .await
            .map_err(|e| VoiceError::TranscriptionFailed {
                message: e.to_string(),
            })?;
        let transcript = Self::parse_transcription(&response)?;
        if transcript.is_empty() {
            warn!(model = %self.transcription_model, "Recording produced no transcript");
        }
        Ok(transcript)
    }

    fn name(&self) -> &str {
        &self.transcription_model
    }
}

/// Primary illustration strategy: Imagen.
pub struct GeminiImagen(pub Arc<GeminiClient>);

#[async_trait]
impl ImageStrategy for GeminiImagen {
    fn name(&self) -> &str {
        &self.0.image_model
    }

    async fn generate(&self, prompt: &str) -> Result<ImageRef, IllustrationError> {
        self.0.generate_image_primary(prompt).await
    }
}

/// Secondary illustration strategy: image output from a chat model.
pub struct GeminiFlashImage(pub Arc<GeminiClient>);

#[async_trait]
impl ImageStrategy for GeminiFlashImage {
    fn name(&self) -> &str {
        &self.0.fallback_image_model
    }

    async fn generate(&self, prompt: &str) -> Result<ImageRef, IllustrationError> {
        self.0.generate_image_secondary(prompt).await
    }
}

/// The illustration chain: Imagen, then the image-capable chat model, then
/// the configured placeholder.
pub fn illustration_chain(client: &Arc<GeminiClient>, config: &FabulaConfig) -> FallbackChain {
    let strategies: Vec<Arc<dyn ImageStrategy>> = vec![
        Arc::new(GeminiImagen(Arc::clone(client))),
        Arc::new(GeminiFlashImage(Arc::clone(client))),
    ];
    FallbackChain::new(
        strategies,
        PlaceholderSource::new(config.illustration.placeholder_url.clone()),
    )
}
