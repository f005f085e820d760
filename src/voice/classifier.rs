//! Keyword classifier over the speech-commands vocabulary
//!
//! Utterances are cut from the microphone stream by the energy segmenter and
//! transcribed; every transcribed word becomes one frame with all confidence
//! on its vocabulary label. Words outside the vocabulary score as
//! `_unknown_`.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::capture::{open_microphone, segment_speech};
use super::listener::{Classifier, ClassifierFrame, ListenOptions};
use super::stt::WhisperClient;
use crate::{Error, Result};

/// Label vocabulary, index-aligned with frame scores
pub const SPEECH_COMMANDS: [&str; 22] = [
    "_background_noise_",
    "_unknown_",
    "down",
    "eight",
    "five",
    "four",
    "go",
    "left",
    "nine",
    "no",
    "off",
    "on",
    "one",
    "right",
    "seven",
    "six",
    "stop",
    "three",
    "two",
    "up",
    "yes",
    "zero",
];

const UNKNOWN: usize = 1;

const DIGITS: [&str; 10] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

struct Stream {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Transcription-backed [`Classifier`]
pub struct KeywordClassifier {
    stt: Arc<WhisperClient>,
    runtime: Handle,
    stream: Mutex<Option<Stream>>,
}

impl KeywordClassifier {
    #[must_use]
    pub fn new(stt: Arc<WhisperClient>, runtime: Handle) -> Self {
        Self {
            stt,
            runtime,
            stream: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn is_loaded(&self) -> bool {
        true
    }

    fn word_labels(&self) -> Vec<String> {
        SPEECH_COMMANDS.iter().map(ToString::to_string).collect()
    }

    fn listen(
        &self,
        frames: mpsc::UnboundedSender<ClassifierFrame>,
        options: ListenOptions,
    ) -> Result<()> {
        let mut slot = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|s| !s.thread.is_finished()) {
            return Err(Error::Classifier("already listening".to_string()));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stt = Arc::clone(&self.stt);
        let runtime = self.runtime.clone();
        let thread_stop = Arc::clone(&stop);

        tracing::debug!(
            threshold = options.probability_threshold,
            overlap = options.overlap_factor,
            "keyword classifier listening"
        );

        // The microphone lives on the stream thread; wait for it to open
        let (opened_tx, opened_rx) = std::sync::mpsc::sync_channel(1);

        let thread = std::thread::Builder::new()
            .name("classifier".to_string())
            .spawn(move || {
                let mut capture = match open_microphone() {
                    Ok(capture) => {
                        let _ = opened_tx.send(Ok(()));
                        capture
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };

                segment_speech(&mut capture, &thread_stop, |tick| {
                    let Some(segment) = tick.segment else {
                        return ControlFlow::Continue(());
                    };
                    let text = match runtime.block_on(stt.transcribe_samples(&segment)) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, "keyword transcription failed");
                            return ControlFlow::Continue(());
                        }
                    };

                    for label in label_indices(&text) {
                        if label <= UNKNOWN && !options.invoke_callback_on_noise_and_unknown {
                            continue;
                        }
                        if frames.send(one_hot(label)).is_err() {
                            return ControlFlow::Break(());
                        }
                    }
                    ControlFlow::Continue(())
                });
            })?;

        match opened_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "keyword classifier could not open the microphone");
                return Err(Error::Classifier(e.to_string()));
            }
            Err(_) => {
                return Err(Error::Classifier("classifier thread exited".to_string()));
            }
        }

        *slot = Some(Stream { stop, thread });
        Ok(())
    }

    async fn stop_listening(&self) -> Result<()> {
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(stream) = stream else {
            return Ok(());
        };

        stream.stop.store(true, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || stream.thread.join())
            .await
            .map_err(|e| Error::Classifier(e.to_string()))?
            .map_err(|_| Error::Classifier("classifier thread panicked".to_string()))?;

        tracing::debug!("keyword classifier stopped");
        Ok(())
    }

    fn is_listening(&self) -> bool {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.thread.is_finished())
    }
}

/// Vocabulary index of each word in a transcript
fn label_indices(text: &str) -> Vec<usize> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(char::is_ascii_alphanumeric)
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|word| !word.is_empty())
        .flat_map(|word| {
            if word.bytes().all(|b| b.is_ascii_digit()) {
                word.bytes()
                    .map(|b| DIGITS[usize::from(b - b'0')].to_string())
                    .collect()
            } else {
                vec![word]
            }
        })
        .map(|word| {
            SPEECH_COMMANDS
                .iter()
                .position(|label| *label == word)
                .unwrap_or(UNKNOWN)
        })
        .collect()
}

fn one_hot(index: usize) -> ClassifierFrame {
    let mut scores = vec![0.0; SPEECH_COMMANDS.len()];
    scores[index] = 1.0;
    ClassifierFrame::new(scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(text: &str) -> Vec<&'static str> {
        label_indices(text)
            .into_iter()
            .map(|i| SPEECH_COMMANDS[i])
            .collect()
    }

    #[test]
    fn test_transcript_maps_to_labels() {
        assert_eq!(labels("Go, zero."), ["go", "zero"]);
        assert_eq!(labels("turn left"), ["_unknown_", "left"]);
    }

    #[test]
    fn test_digits_are_spelled_out() {
        assert_eq!(labels("go 0"), ["go", "zero"]);
        assert_eq!(labels("42"), ["four", "two"]);
    }

    #[test]
    fn test_one_hot_frame() {
        let frame = one_hot(6);
        assert_eq!(frame.scores.len(), SPEECH_COMMANDS.len());
        assert_eq!(frame.top(), Some((6, 1.0)));
    }
}
