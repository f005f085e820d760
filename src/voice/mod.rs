//! Voice processing module
//!
//! The three audio subsystems the session drives (wake-word classifier,
//! command recognition, response speech) behind capability traits, plus
//! the microphone, speaker and tone plumbing their concrete backends use.

mod capture;
mod classifier;
mod command;
mod listener;
mod playback;
mod recognizer;
mod segmenter;
mod speaker;
mod stt;
mod tones;
mod tts;
mod wake_buffer;
mod wake_lock;

pub use capture::{AudioCapture, ListenTick, SAMPLE_RATE, listen_for_speech, samples_to_wav};
pub use classifier::{KeywordClassifier, SPEECH_COMMANDS};
pub use command::{COMMAND_LOCALE, CommandCapture, RecognitionEngine, RecognitionEvent};
pub use listener::{
    Classifier, ClassifierFrame, ListenOptions, OVERLAP_FACTOR, WAKE_PHRASE, WakeWordListener,
};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3, resample};
pub use recognizer::WhisperRecognizer;
pub use segmenter::{SegmenterState, SpeechSegmenter, calculate_energy};
pub use speaker::{ResponseSpeaker, SpeechSynthesizer, UTTERANCE_LANG, Utterance, Voice};
pub use stt::{DEFAULT_STT_MODEL, WhisperClient};
pub use tones::{DeviceTones, Tone, TonePlayer, render as render_tone};
pub use tts::{DEFAULT_TTS_MODEL, DEFAULT_VOICE, OPENAI_VOICES, OpenAiSynthesizer};
pub use wake_buffer::WakeWordBuffer;
pub use wake_lock::{SystemdInhibit, WakeLock, WakeLockGuard, WakeLockKind};
