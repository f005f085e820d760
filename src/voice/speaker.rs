//! Spoken responses
//!
//! Wraps a [`SpeechSynthesizer`] so that only one utterance plays at a time
//! and every `speak` call reports completion exactly once, whether the
//! utterance finished, failed, or was cut off by the next one.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::Result;

/// Language tag set on every utterance
pub const UTTERANCE_LANG: &str = "en-GB";

/// A synthesizer voice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    pub lang: String,
}

impl Voice {
    #[must_use]
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// One request to the synthesizer
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<Voice>,
    pub pitch: f32,
    pub rate: f32,
    pub lang: String,
}

/// Text-to-speech backend
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Whether synthesis can run on this host
    fn is_available(&self) -> bool {
        true
    }

    /// Voices currently known to the backend
    fn voices(&self) -> Vec<Voice>;

    /// Resolves when the voice list changes
    async fn voices_changed(&self);

    /// Cut off whatever is playing
    fn cancel(&self);

    /// Speak an utterance, resolving when playback ends
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, utterance: Utterance) -> Result<()>;
}

/// Runs its callback when fired or dropped, whichever comes first
struct Completion(Option<Box<dyn FnOnce() + Send>>);

impl Completion {
    fn fire(&mut self) {
        if let Some(done) = self.0.take() {
            done();
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.fire();
    }
}

/// Speaks command responses, one at a time
pub struct ResponseSpeaker {
    synth: Option<Arc<dyn SpeechSynthesizer>>,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseSpeaker {
    /// Create a speaker; `None` means no synthesis capability
    #[must_use]
    pub fn new(synth: Option<Arc<dyn SpeechSynthesizer>>) -> Self {
        Self {
            synth,
            current: Mutex::new(None),
        }
    }

    /// Voices of the underlying synthesizer, empty without one
    #[must_use]
    pub fn voices(&self) -> Vec<Voice> {
        self.synth.as_ref().map(|s| s.voices()).unwrap_or_default()
    }

    /// Speak `text`, cancelling any utterance in flight
    ///
    /// `voice_id` is matched against voice names exactly; an unknown name
    /// falls back to the synthesizer default. `on_complete` fires exactly
    /// once: immediately when synthesis is unavailable, otherwise when the
    /// utterance ends, errors, or is superseded. Must be called from within
    /// a Tokio runtime.
    pub fn speak<F>(
        &self,
        text: impl Into<String>,
        voice_id: Option<&str>,
        pitch: f32,
        rate: f32,
        on_complete: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        let mut done = Completion(Some(Box::new(on_complete)));
        let text = text.into();

        let Some(synth) = self.synth.as_ref().filter(|s| s.is_available()) else {
            tracing::warn!("speech synthesis unavailable, skipping response");
            done.fire();
            return;
        };

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            previous.abort();
        }
        synth.cancel();

        if text.trim().is_empty() {
            done.fire();
            return;
        }

        let synth = Arc::clone(synth);
        let voice_id = voice_id.map(str::to_owned);
        *current = Some(tokio::spawn(async move {
            let voice = resolve_voice(synth.as_ref(), voice_id.as_deref()).await;
            tracing::debug!(
                voice = ?voice.as_ref().map(|v| &v.name),
                pitch,
                rate,
                "speaking response"
            );

            let utterance = Utterance {
                text,
                voice,
                pitch,
                rate,
                lang: UTTERANCE_LANG.to_string(),
            };
            if let Err(e) = synth.speak(utterance).await {
                tracing::warn!(error = %e, "speech synthesis failed");
            }
            done.fire();
        }));
    }
}

async fn resolve_voice(synth: &dyn SpeechSynthesizer, voice_id: Option<&str>) -> Option<Voice> {
    let voice_id = voice_id?;

    let mut voices = synth.voices();
    if voices.is_empty() {
        synth.voices_changed().await;
        voices = synth.voices();
    }

    let voice = voices.into_iter().find(|v| v.name == voice_id);
    if voice.is_none() {
        tracing::debug!(voice_id, "voice not found, using default");
    }
    voice
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_unavailable_completes_immediately() {
        let speaker = ResponseSpeaker::new(None);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        speaker.speak("hello", None, 1.0, 1.0, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(speaker.voices().is_empty());
    }

    #[test]
    fn test_completion_fires_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut done = Completion(Some(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })));
        done.fire();
        done.fire();
        drop(done);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
