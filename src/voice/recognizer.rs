//! Single-shot recognition from the microphone

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::capture::listen_for_speech;
use super::command::{RecognitionEngine, RecognitionEvent};
use super::stt::WhisperClient;
use crate::Result;

/// How long to wait for speech to begin
const NO_SPEECH_TIMEOUT: Duration = Duration::from_secs(5);

/// Hard cap on one utterance
const MAX_CAPTURE: Duration = Duration::from_secs(15);

/// [`RecognitionEngine`] that records one utterance and transcribes it
pub struct WhisperRecognizer {
    stt: Arc<WhisperClient>,
    runtime: Handle,
}

impl WhisperRecognizer {
    #[must_use]
    pub const fn new(stt: Arc<WhisperClient>, runtime: Handle) -> Self {
        Self { stt, runtime }
    }
}

impl RecognitionEngine for WhisperRecognizer {
    fn start(&self, locale: &str, events: mpsc::UnboundedSender<RecognitionEvent>) -> Result<()> {
        let stt = Arc::clone(&self.stt);
        let runtime = self.runtime.clone();
        tracing::debug!(locale, "starting recognition session");

        std::thread::Builder::new()
            .name("recognizer".to_string())
            .spawn(move || {
                let _ = events.send(RecognitionEvent::Started);
                let stop = AtomicBool::new(false);
                let started = Instant::now();
                let mut utterance = None;

                let captured = listen_for_speech(&stop, |tick| {
                    if let Some(segment) = tick.segment {
                        utterance = Some(segment);
                        return ControlFlow::Break(());
                    }
                    let elapsed = started.elapsed();
                    if (!tick.in_speech && elapsed > NO_SPEECH_TIMEOUT) || elapsed > MAX_CAPTURE {
                        return ControlFlow::Break(());
                    }
                    ControlFlow::Continue(())
                });

                if let Err(e) = captured {
                    tracing::error!(error = %e, "recognition capture failed");
                    let _ = events.send(RecognitionEvent::Error("audio-capture".to_string()));
                } else if let Some(segment) = utterance {
                    match runtime.block_on(stt.transcribe_samples(&segment)) {
                        Ok(text) => {
                            let _ = events.send(RecognitionEvent::Result(text));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "command transcription failed");
                            let _ = events.send(RecognitionEvent::Error("network".to_string()));
                        }
                    }
                }

                let _ = events.send(RecognitionEvent::End);
            })?;

        Ok(())
    }
}
