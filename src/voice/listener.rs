//! Wake-word listener
//!
//! Turns the classifier's continuous frame stream into a single trigger:
//! every frame's top label is pushed into a [`WakeWordBuffer`] and the first
//! time the buffer reads ("go", "zero") the stream is stopped and the
//! trigger callback fires. One listening session at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::tones::{Tone, TonePlayer};
use super::wake_buffer::WakeWordBuffer;
use crate::Result;
use crate::error::ListenerError;

/// The two-word wake phrase
pub const WAKE_PHRASE: [&str; 2] = ["go", "zero"];

/// Overlap between consecutive classifier windows
pub const OVERLAP_FACTOR: f32 = 0.75;

/// One inference tick: a confidence score per vocabulary label
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierFrame {
    pub scores: Vec<f32>,
}

impl ClassifierFrame {
    #[must_use]
    pub const fn new(scores: Vec<f32>) -> Self {
        Self { scores }
    }

    /// Index and score of the highest-scoring label (first one on ties)
    #[must_use]
    pub fn top(&self) -> Option<(usize, f32)> {
        self.scores
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (i, score)| match best {
                Some((_, top)) if score <= top => best,
                _ if score.is_nan() => best,
                _ => Some((i, score)),
            })
    }
}

/// Options passed to [`Classifier::listen`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenOptions {
    /// Frames whose top score is below this are not delivered
    pub probability_threshold: f32,
    /// Overlap between consecutive analysis windows (0..1)
    pub overlap_factor: f32,
    /// Attach the spectrogram to each frame
    pub include_spectrogram: bool,
    /// Deliver frames whose top label is noise or unknown
    pub invoke_callback_on_noise_and_unknown: bool,
}

/// Continuous keyword classifier
///
/// Frames are delivered on the channel given to [`Classifier::listen`] until
/// [`Classifier::stop_listening`] is called.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Whether the model is loaded and ready to listen
    fn is_loaded(&self) -> bool;

    /// Vocabulary, index-aligned with [`ClassifierFrame::scores`]
    fn word_labels(&self) -> Vec<String>;

    /// Begin streaming frames
    ///
    /// # Errors
    ///
    /// Returns error if the audio stream cannot be opened
    fn listen(
        &self,
        frames: mpsc::UnboundedSender<ClassifierFrame>,
        options: ListenOptions,
    ) -> Result<()>;

    /// Stop streaming frames
    ///
    /// # Errors
    ///
    /// Returns error if the stream could not be shut down cleanly
    async fn stop_listening(&self) -> Result<()>;

    /// Whether frames are currently being streamed
    fn is_listening(&self) -> bool;
}

struct ListeningSession {
    id: u64,
    task: JoinHandle<()>,
}

type SessionSlot = Arc<Mutex<Option<ListeningSession>>>;

/// Raises one trigger per listening session
pub struct WakeWordListener {
    classifier: Arc<dyn Classifier>,
    tones: Arc<dyn TonePlayer>,
    session: SessionSlot,
    next_id: AtomicU64,
}

impl WakeWordListener {
    #[must_use]
    pub fn new(classifier: Arc<dyn Classifier>, tones: Arc<dyn TonePlayer>) -> Self {
        Self {
            classifier,
            tones,
            session: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether the underlying classifier is ready
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.classifier.is_loaded()
    }

    /// Whether a listening session is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        lock(&self.session).is_some()
    }

    /// Start a listening session
    ///
    /// `on_trigger` fires at most once, after the classifier stream has been
    /// stopped. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `NotLoaded` if the classifier has no model, `AlreadyActive`
    /// if a session is running, `Classifier` if the stream fails to open
    pub fn start<F>(&self, threshold: f32, on_trigger: F) -> std::result::Result<(), ListenerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.start_watched(threshold, on_trigger, |_| {})
    }

    /// Like [`start`](Self::start), also reporting a stream that ends early
    ///
    /// If the classifier stops delivering frames before the wake phrase is
    /// heard and the session was not stopped, the session is cleared and
    /// `on_closed` fires with [`ListenerError::StreamClosed`]. At most one of
    /// `on_trigger` and `on_closed` fires.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start)
    pub fn start_watched<F, C>(
        &self,
        threshold: f32,
        on_trigger: F,
        on_closed: C,
    ) -> std::result::Result<(), ListenerError>
    where
        F: FnOnce() + Send + 'static,
        C: FnOnce(ListenerError) + Send + 'static,
    {
        if !self.classifier.is_loaded() {
            return Err(ListenerError::NotLoaded);
        }

        let mut slot = lock(&self.session);
        if slot.is_some() {
            return Err(ListenerError::AlreadyActive);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let options = ListenOptions {
            probability_threshold: threshold,
            overlap_factor: OVERLAP_FACTOR,
            include_spectrogram: false,
            invoke_callback_on_noise_and_unknown: false,
        };
        self.classifier
            .listen(tx, options)
            .map_err(|e| ListenerError::Classifier(e.to_string()))?;

        self.tones.play(Tone::Start);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let watcher = FrameWatcher {
            id,
            threshold,
            labels: self.classifier.word_labels(),
            classifier: Arc::clone(&self.classifier),
            session: Arc::clone(&self.session),
        };
        let task = tokio::spawn(watcher.run(rx, on_trigger, on_closed));
        *slot = Some(ListeningSession { id, task });

        tracing::debug!(session = id, threshold, "wake-word listening started");
        Ok(())
    }

    /// Stop the current session, if any
    ///
    /// Idempotent. The session's buffer is discarded and a pending trigger
    /// will not fire.
    pub async fn stop(&self) {
        let session = lock(&self.session).take();
        if let Some(session) = session {
            session.task.abort();
            tracing::debug!(session = session.id, "wake-word listening stopped");
        }

        stop_stream(self.classifier.as_ref()).await;
    }
}

struct FrameWatcher {
    id: u64,
    threshold: f32,
    labels: Vec<String>,
    classifier: Arc<dyn Classifier>,
    session: SessionSlot,
}

impl FrameWatcher {
    async fn run<F, C>(
        self,
        mut frames: mpsc::UnboundedReceiver<ClassifierFrame>,
        on_trigger: F,
        on_closed: C,
    ) where
        F: FnOnce() + Send + 'static,
        C: FnOnce(ListenerError) + Send + 'static,
    {
        let mut buffer = WakeWordBuffer::new();
        let [first, second] = WAKE_PHRASE;

        while let Some(frame) = frames.recv().await {
            let Some((index, score)) = frame.top() else {
                continue;
            };
            if score < self.threshold {
                continue;
            }
            let Some(label) = self.labels.get(index) else {
                tracing::warn!(index, labels = self.labels.len(), "frame wider than vocabulary");
                continue;
            };

            tracing::trace!(label, score, "classified word");
            buffer.push(label.as_str());

            if buffer.matches(first, second) {
                // Deactivate first so a concurrent stop() cannot also claim the session
                {
                    let mut slot = lock(&self.session);
                    if slot.as_ref().map(|s| s.id) != Some(self.id) {
                        return;
                    }
                    *slot = None;
                }

                stop_stream(self.classifier.as_ref()).await;
                buffer.reset();

                tracing::info!(phrase = %WAKE_PHRASE.join(" "), "wake phrase detected");
                on_trigger();
                return;
            }
        }

        // Closed by stop() unless this session still owns the slot
        {
            let mut slot = lock(&self.session);
            if slot.as_ref().map(|s| s.id) != Some(self.id) {
                tracing::debug!(session = self.id, "classifier stream closed");
                return;
            }
            *slot = None;
        }

        stop_stream(self.classifier.as_ref()).await;
        tracing::error!(session = self.id, "classifier stream ended without a wake phrase");
        on_closed(ListenerError::StreamClosed);
    }
}

async fn stop_stream(classifier: &dyn Classifier) {
    if classifier.is_listening() {
        if let Err(e) = classifier.stop_listening().await {
            tracing::warn!(error = %e, "failed to stop classifier stream");
        }
    }
}

fn lock(slot: &Mutex<Option<ListeningSession>>) -> MutexGuard<'_, Option<ListeningSession>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_picks_first_maximum() {
        let frame = ClassifierFrame::new(vec![0.1, 0.7, 0.2, 0.7]);
        assert_eq!(frame.top(), Some((1, 0.7)));
    }

    #[test]
    fn test_top_skips_nan() {
        let frame = ClassifierFrame::new(vec![f32::NAN, 0.3]);
        assert_eq!(frame.top(), Some((1, 0.3)));
        assert_eq!(ClassifierFrame::new(vec![]).top(), None);
    }
}
