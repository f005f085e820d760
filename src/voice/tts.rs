//! Text-to-speech over an OpenAI-compatible speech API

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3, resample};
use super::speaker::{SpeechSynthesizer, Utterance, Voice};
use crate::{Error, Result};

/// Default TTS model
pub const DEFAULT_TTS_MODEL: &str = "tts-1";

/// Voice used when an utterance names none
pub const DEFAULT_VOICE: &str = "alloy";

/// Voices offered by the speech endpoint
pub const OPENAI_VOICES: [&str; 9] = [
    "alloy", "ash", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer",
];

/// Synthesizes speech remotely and plays it on the default output device
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    playing: Mutex<Arc<AtomicBool>>,
}

impl OpenAiSynthesizer {
    /// Create a synthesizer against `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(base_url: &str, api_key: SecretString, model: impl Into<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            playing: Mutex::new(Arc::new(AtomicBool::new(false))),
        })
    }

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str, voice: &str, speed: f32) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed: speed.clamp(0.25, 4.0),
            response_format: "mp3",
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    fn fresh_cancel_flag(&self) -> Arc<AtomicBool> {
        let mut playing = self.playing.lock().unwrap_or_else(PoisonError::into_inner);
        playing.store(true, Ordering::Relaxed);
        *playing = Arc::new(AtomicBool::new(false));
        Arc::clone(&playing)
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        OPENAI_VOICES.iter().map(|name| Voice::new(*name, "en")).collect()
    }

    async fn voices_changed(&self) {}

    fn cancel(&self) {
        self.playing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .store(true, Ordering::Relaxed);
    }

    async fn speak(&self, utterance: Utterance) -> Result<()> {
        let cancel = self.fresh_cancel_flag();
        let voice = utterance
            .voice
            .as_ref()
            .map_or(DEFAULT_VOICE, |v| v.name.as_str());

        let mp3 = self.synthesize(&utterance.text, voice, utterance.rate).await?;
        if cancel.load(Ordering::Relaxed) {
            return Ok(());
        }

        let pitch = utterance.pitch;
        tokio::task::spawn_blocking(move || {
            let (samples, sample_rate) = decode_mp3(&mp3)?;
            let source_rate = pitch_shifted_rate(sample_rate, pitch);
            let samples = resample(&samples, source_rate, PLAYBACK_SAMPLE_RATE)?;
            AudioPlayback::new()?.play_blocking(samples, Some(&cancel))
        })
        .await
        .map_err(|e| Error::Audio(e.to_string()))?
    }
}

/// Source rate that, resampled to the output rate, shifts pitch by `pitch`
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn pitch_shifted_rate(sample_rate: u32, pitch: f32) -> u32 {
    let pitch = if pitch.is_finite() { pitch.clamp(0.5, 2.0) } else { 1.0 };
    (sample_rate as f32 * pitch).round() as u32
}
