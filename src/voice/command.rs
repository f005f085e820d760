//! Single-shot command capture
//!
//! Runs one recognition session and reports exactly one of: a transcript,
//! "no speech", or an error.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::Result;
use crate::error::CaptureError;

/// Recognition locale for commands
pub const COMMAND_LOCALE: &str = "en-US";

/// Events emitted by one recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Audio capture has begun
    Started,
    /// Final transcript of the utterance
    Result(String),
    /// Engine failure, with its error code
    Error(String),
    /// Session over; always the last event
    End,
}

/// Single-shot speech recognizer
pub trait RecognitionEngine: Send + Sync {
    /// Whether recognition can run on this host
    fn is_available(&self) -> bool {
        true
    }

    /// Begin a session, streaming its events on `events`
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be started
    fn start(&self, locale: &str, events: mpsc::UnboundedSender<RecognitionEvent>) -> Result<()>;
}

type OnTranscript = Box<dyn FnOnce(String) + Send>;
type OnNoSpeech = Box<dyn FnOnce() + Send>;
type OnError = Box<dyn FnOnce(CaptureError) + Send>;

struct Callbacks {
    on_transcript: OnTranscript,
    on_no_speech: OnNoSpeech,
    on_error: OnError,
}

/// Fires one of the capture callbacks, once
///
/// Dropped unresolved means the session ended without a result.
struct CaptureLatch(Option<Callbacks>);

impl CaptureLatch {
    fn transcript(mut self, text: String) {
        if let Some(cb) = self.0.take() {
            (cb.on_transcript)(text);
        }
    }

    fn error(mut self, error: CaptureError) {
        if let Some(cb) = self.0.take() {
            (cb.on_error)(error);
        }
    }
}

impl Drop for CaptureLatch {
    fn drop(&mut self) {
        if let Some(cb) = self.0.take() {
            (cb.on_no_speech)();
        }
    }
}

/// Captures one spoken command per call
#[derive(Clone)]
pub struct CommandCapture {
    engine: Option<Arc<dyn RecognitionEngine>>,
}

impl CommandCapture {
    /// Create a capture over `engine`; `None` means recognition is unavailable
    #[must_use]
    pub fn new(engine: Option<Arc<dyn RecognitionEngine>>) -> Self {
        Self { engine }
    }

    /// Whether an engine is present and usable
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_available())
    }

    /// Run one recognition session
    ///
    /// Exactly one callback fires. Without a usable engine `on_error` fires
    /// before this returns. A blank transcript counts as no speech. Must be
    /// called from within a Tokio runtime.
    pub fn capture<T, N, E>(&self, on_transcript: T, on_no_speech: N, on_error: E)
    where
        T: FnOnce(String) + Send + 'static,
        N: FnOnce() + Send + 'static,
        E: FnOnce(CaptureError) + Send + 'static,
    {
        let latch = CaptureLatch(Some(Callbacks {
            on_transcript: Box::new(on_transcript),
            on_no_speech: Box::new(on_no_speech),
            on_error: Box::new(on_error),
        }));

        let Some(engine) = self.engine.as_ref().filter(|e| e.is_available()) else {
            tracing::warn!("speech recognition unavailable");
            latch.error(CaptureError::Unavailable);
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = engine.start(COMMAND_LOCALE, tx) {
            tracing::error!(error = %e, "failed to start recognition");
            latch.error(CaptureError::Engine(e.to_string()));
            return;
        }

        tokio::spawn(watch_session(rx, latch));
    }
}

async fn watch_session(mut events: mpsc::UnboundedReceiver<RecognitionEvent>, latch: CaptureLatch) {
    while let Some(event) = events.recv().await {
        match event {
            RecognitionEvent::Started => tracing::debug!("command capture started"),
            RecognitionEvent::Result(text) => {
                let text = text.trim();
                if text.is_empty() {
                    break;
                }
                tracing::info!(transcript = %text, "command captured");
                latch.transcript(text.to_string());
                return;
            }
            RecognitionEvent::Error(code) => {
                tracing::warn!(code = %code, "recognition error");
                latch.error(CaptureError::Engine(code));
                return;
            }
            RecognitionEvent::End => break,
        }
    }

    tracing::debug!("recognition ended without a result");
    drop(latch);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::oneshot;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Fired {
        Transcript(String),
        NoSpeech,
        Error(CaptureError),
    }

    struct Scripted(Mutex<Vec<RecognitionEvent>>);

    impl RecognitionEngine for Scripted {
        fn start(
            &self,
            _locale: &str,
            events: mpsc::UnboundedSender<RecognitionEvent>,
        ) -> Result<()> {
            for event in self.0.lock().unwrap().drain(..) {
                let _ = events.send(event);
            }
            Ok(())
        }
    }

    async fn run(events: Vec<RecognitionEvent>) -> Fired {
        let capture = CommandCapture::new(Some(Arc::new(Scripted(Mutex::new(events)))));
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let (t1, t2, t3) = (Arc::clone(&tx), Arc::clone(&tx), tx);
        capture.capture(
            move |text| {
                t1.lock().unwrap().take().unwrap().send(Fired::Transcript(text)).unwrap();
            },
            move || {
                t2.lock().unwrap().take().unwrap().send(Fired::NoSpeech).unwrap();
            },
            move |e| {
                t3.lock().unwrap().take().unwrap().send(Fired::Error(e)).unwrap();
            },
        );
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_result_then_end_fires_transcript_only() {
        let fired = run(vec![
            RecognitionEvent::Started,
            RecognitionEvent::Result(" turn on the kitchen light ".into()),
            RecognitionEvent::End,
        ])
        .await;
        assert_eq!(fired, Fired::Transcript("turn on the kitchen light".into()));
    }

    #[tokio::test]
    async fn test_end_without_result_is_no_speech() {
        let fired = run(vec![RecognitionEvent::Started, RecognitionEvent::End]).await;
        assert_eq!(fired, Fired::NoSpeech);
    }

    #[tokio::test]
    async fn test_blank_result_is_no_speech() {
        let fired = run(vec![RecognitionEvent::Result("   ".into()), RecognitionEvent::End]).await;
        assert_eq!(fired, Fired::NoSpeech);
    }

    #[tokio::test]
    async fn test_engine_error() {
        let fired = run(vec![
            RecognitionEvent::Error("network".into()),
            RecognitionEvent::End,
        ])
        .await;
        assert_eq!(fired, Fired::Error(CaptureError::Engine("network".into())));
    }

    #[test]
    fn test_missing_engine_errors_synchronously() {
        let capture = CommandCapture::new(None);
        let fired = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&fired);
        capture.capture(|_| {}, || {}, move |e| *slot.lock().unwrap() = Some(e));
        assert_eq!(*fired.lock().unwrap(), Some(CaptureError::Unavailable));
    }
}
