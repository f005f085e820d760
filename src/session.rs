//! Session orchestrator
//!
//! Drives the listen → capture → dispatch → speak cycle. Every component
//! reports back by posting an event into one channel; [`Orchestrator::run`]
//! consumes that channel and applies [`transition`], so transitions never
//! overlap. Each state entry gets a fresh ticket and events carry the
//! ticket of the state that spawned them: anything arriving for a state
//! that has since been left is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::dispatch::{CommandDispatcher, DispatchOutcome};
use crate::error::{CaptureError, ListenerError};
use crate::preferences::{self, Preferences};
use crate::voice::{
    CommandCapture, ResponseSpeaker, Tone, TonePlayer, WakeLock, WakeLockGuard, WakeWordListener,
};

pub const READY_STATUS: &str = "Ready.";
pub const LISTENING_STATUS: &str = "Listening for wake word \"go zero\"...";
pub const DETECTED_STATUS: &str = "Wake word \"go zero\" detected!";
pub const CAPTURING_STATUS: &str = "Listening for your command...";
pub const PROCESSING_STATUS: &str = "Processing your command...";
pub const NO_SPEECH_STATUS: &str = "No speech was recognized. Please try again.";
pub const STOPPED_STATUS: &str = "Stopped listening.";

/// Sensitivity bounds and default
pub const SENSITIVITY_RANGE: (f32, f32) = (0.1, 1.0);
pub const DEFAULT_SENSITIVITY: f32 = 0.5;

/// Pitch and rate bounds
pub const VOICE_RANGE: (f32, f32) = (0.5, 2.0);

/// Longest start delay, in seconds
pub const MAX_START_DELAY_SECS: f32 = 5.0;

/// Externally visible phase of the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    WakeListening,
    CommandCapturing,
    Dispatching,
    Speaking,
}

/// Settings for one run of the cycle, fixed at `start`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Minimum top score for a classifier frame to count
    pub sensitivity: f32,
    /// Voice name for responses; `None` uses the synthesizer default
    pub voice_id: Option<String>,
    pub pitch: f32,
    pub rate: f32,
    /// Waited before every listener start
    pub start_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            voice_id: None,
            pitch: 1.0,
            rate: 1.0,
            start_delay: Duration::ZERO,
        }
    }
}

impl SessionConfig {
    /// Build from stored preferences
    ///
    /// Unparseable numbers fall back to defaults; parsed ones are clamped
    /// to their slider range.
    #[must_use]
    pub fn from_preferences(prefs: &Preferences) -> Self {
        let number = |key: &str, default: f32, (min, max): (f32, f32)| {
            prefs
                .get(key)
                .and_then(|v| v.trim().parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .map_or(default, |v| v.clamp(min, max))
        };

        Self {
            sensitivity: number(preferences::SENSITIVITY, DEFAULT_SENSITIVITY, SENSITIVITY_RANGE),
            voice_id: prefs
                .get(preferences::SELECTED_VOICE)
                .filter(|v| !v.is_empty())
                .map(str::to_owned),
            pitch: number(preferences::PITCH, 1.0, VOICE_RANGE),
            rate: number(preferences::RATE, 1.0, VOICE_RANGE),
            start_delay: Duration::from_secs_f32(number(
                preferences::START_DELAY,
                0.0,
                (0.0, MAX_START_DELAY_SECS),
            )),
        }
    }
}

/// What the relay is doing, for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: SessionState,
    pub message: String,
    /// Most recent captured command
    pub transcript: Option<String>,
}

/// Everything the orchestrator drives
pub struct Collaborators {
    pub listener: WakeWordListener,
    pub capture: CommandCapture,
    pub dispatcher: Arc<dyn CommandDispatcher>,
    pub speaker: ResponseSpeaker,
    pub tones: Arc<dyn TonePlayer>,
    pub wake_lock: Option<Arc<dyn WakeLock>>,
}

/// Internal phase; finer than [`SessionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// `armed` once the listener has actually been started
    WakeListening { armed: bool },
    CommandCapturing,
    Dispatching,
    /// `cue` plays when speech completes
    Speaking { cue: Tone },
}

impl Phase {
    #[must_use]
    pub const fn state(self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::WakeListening { .. } => SessionState::WakeListening,
            Self::CommandCapturing => SessionState::CommandCapturing,
            Self::Dispatching => SessionState::Dispatching,
            Self::Speaking { .. } => SessionState::Speaking,
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    Stop,
    /// Start delay has passed
    Armed,
    ListenerFailed(ListenerError),
    WakeWord,
    Transcript(String),
    NoSpeech,
    CaptureFailed(CaptureError),
    Dispatched(DispatchOutcome),
    Spoken,
}

/// Side effects requested by a transition, run in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AcquireWakeLock,
    ReleaseWakeLock,
    /// Wait the start delay, then post [`Event::Armed`]
    ScheduleListener,
    /// Start the listener; on failure the remaining effects are skipped
    StartListener,
    StopListener,
    StartCapture,
    Dispatch(String),
    Speak(String),
    PlayTone(Tone),
    Status(String),
    Transcript(String),
}

/// Result of a valid transition
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub next: Phase,
    pub effects: Vec<Effect>,
}

impl Step {
    fn to(next: Phase, effects: Vec<Effect>) -> Option<Self> {
        Some(Self { next, effects })
    }
}

/// The transition table
///
/// `None` means the event has no meaning in `phase` and is discarded.
#[must_use]
pub fn transition(phase: Phase, event: Event) -> Option<Step> {
    let relisten = Phase::WakeListening { armed: false };

    match (phase, event) {
        (Phase::Idle, Event::Start) => Step::to(
            relisten,
            vec![Effect::AcquireWakeLock, Effect::ScheduleListener],
        ),
        (Phase::Idle, _) | (_, Event::Start) => None,

        (_, Event::Stop) => Step::to(
            Phase::Idle,
            vec![
                Effect::StopListener,
                Effect::ReleaseWakeLock,
                Effect::Status(STOPPED_STATUS.into()),
            ],
        ),

        (Phase::WakeListening { armed: false }, Event::Armed) => Step::to(
            Phase::WakeListening { armed: true },
            vec![Effect::StartListener, Effect::Status(LISTENING_STATUS.into())],
        ),
        (Phase::WakeListening { armed: true }, Event::ListenerFailed(e)) => Step::to(
            Phase::Idle,
            vec![
                Effect::PlayTone(Tone::Error),
                Effect::ReleaseWakeLock,
                Effect::Status(format!("Error: {e}")),
            ],
        ),
        (Phase::WakeListening { armed: true }, Event::WakeWord) => Step::to(
            Phase::CommandCapturing,
            vec![
                Effect::Status(DETECTED_STATUS.into()),
                Effect::StartCapture,
                Effect::Status(CAPTURING_STATUS.into()),
            ],
        ),

        (Phase::CommandCapturing, Event::Transcript(text)) => Step::to(
            Phase::Dispatching,
            vec![
                Effect::Transcript(text.clone()),
                Effect::Status(PROCESSING_STATUS.into()),
                Effect::Dispatch(text),
            ],
        ),
        (Phase::CommandCapturing, Event::NoSpeech) => Step::to(
            relisten,
            vec![
                Effect::Status(NO_SPEECH_STATUS.into()),
                Effect::PlayTone(Tone::Error),
                Effect::ScheduleListener,
            ],
        ),
        (Phase::CommandCapturing, Event::CaptureFailed(e)) => Step::to(
            relisten,
            vec![
                Effect::Status(format!("Error: {e}")),
                Effect::PlayTone(Tone::Error),
                Effect::ScheduleListener,
            ],
        ),

        (Phase::Dispatching, Event::Dispatched(outcome)) => {
            let status = Effect::Status(outcome.status_message().to_string());
            let cue = outcome.cue();
            let speech = outcome.speech_text();
            if speech.is_empty() {
                Step::to(
                    relisten,
                    vec![status, Effect::PlayTone(cue), Effect::ScheduleListener],
                )
            } else {
                Step::to(
                    Phase::Speaking { cue },
                    vec![status, Effect::Speak(speech.to_string())],
                )
            }
        }

        (Phase::Speaking { cue }, Event::Spoken) => {
            Step::to(relisten, vec![Effect::PlayTone(cue), Effect::ScheduleListener])
        }

        _ => None,
    }
}

enum Input {
    Start(SessionConfig),
    Stop(oneshot::Sender<()>),
    Event { ticket: u64, event: Event },
}

/// Posts events stamped with the ticket of the state that created it
#[derive(Clone)]
struct Poster {
    inputs: mpsc::UnboundedSender<Input>,
    ticket: u64,
}

impl Poster {
    fn post(&self, event: Event) {
        let _ = self.inputs.send(Input::Event {
            ticket: self.ticket,
            event,
        });
    }
}

struct Shared {
    collaborators: Collaborators,
    inputs: mpsc::UnboundedSender<Input>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Input>>>,
    status: watch::Sender<Status>,
    active: AtomicBool,
}

/// Handle to the relay's listening cycle
///
/// Cheap to clone; all clones drive the same cycle.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(collaborators: Collaborators) -> Self {
        let (inputs, receiver) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(Status {
            state: SessionState::Idle,
            message: READY_STATUS.to_string(),
            transcript: None,
        });

        Self {
            shared: Arc::new(Shared {
                collaborators,
                inputs,
                receiver: Mutex::new(Some(receiver)),
                status,
                active: AtomicBool::new(false),
            }),
        }
    }

    /// Begin the cycle with `config`
    ///
    /// # Errors
    ///
    /// Returns `NotLoaded` if the wake-word classifier is not ready and
    /// `AlreadyActive` if the cycle is already running
    pub fn start(&self, config: SessionConfig) -> Result<(), ListenerError> {
        if !self.shared.collaborators.listener.is_loaded() {
            return Err(ListenerError::NotLoaded);
        }
        if self
            .shared
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ListenerError::AlreadyActive);
        }

        tracing::info!(?config, "starting session");
        let _ = self.shared.inputs.send(Input::Start(config));
        Ok(())
    }

    /// Return to `Idle` from any state and release the wake lock
    ///
    /// Resolves once the transition has been applied. Never fails.
    pub async fn stop(&self) {
        let (ack, done) = oneshot::channel();
        if self.shared.inputs.send(Input::Stop(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.status.borrow().state
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> Status {
        self.shared.status.borrow().clone()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.shared.status.subscribe()
    }

    /// Whether the cycle is running (any state but `Idle`)
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Drive the cycle
    ///
    /// Runs until every handle is dropped; only one call may drive a given
    /// orchestrator, later calls return immediately.
    pub async fn run(&self) {
        let receiver = self
            .shared
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut receiver) = receiver else {
            tracing::warn!("orchestrator is already being driven");
            return;
        };

        let mut machine = Machine {
            shared: &self.shared,
            phase: Phase::Idle,
            ticket: 0,
            config: SessionConfig::default(),
            wake_lock: WakeLockGuard::new(self.shared.collaborators.wake_lock.clone()),
        };

        while let Some(input) = receiver.recv().await {
            match input {
                Input::Start(config) => {
                    machine.config = config;
                    machine.apply(Event::Start).await;
                }
                Input::Stop(ack) => {
                    machine.apply(Event::Stop).await;
                    let _ = ack.send(());
                }
                Input::Event { ticket, event } if ticket == machine.ticket => {
                    machine.apply(event).await;
                }
                Input::Event { ticket, event } => {
                    tracing::debug!(
                        ticket,
                        current = machine.ticket,
                        ?event,
                        "discarding stale event"
                    );
                }
            }
        }
    }
}

struct Machine<'a> {
    shared: &'a Shared,
    phase: Phase,
    ticket: u64,
    config: SessionConfig,
    wake_lock: WakeLockGuard,
}

impl Machine<'_> {
    async fn apply(&mut self, event: Event) {
        let mut next_event = Some(event);

        while let Some(event) = next_event.take() {
            let label = format!("{event:?}");
            let Some(step) = transition(self.phase, event) else {
                tracing::debug!(phase = ?self.phase, event = %label, "event ignored");
                return;
            };

            tracing::debug!(from = ?self.phase, to = ?step.next, event = %label, "transition");
            self.phase = step.next;
            self.ticket += 1;
            self.shared
                .active
                .store(self.phase != Phase::Idle, Ordering::Release);

            let state = self.phase.state();
            self.shared.status.send_modify(|s| s.state = state);

            next_event = self.execute(step.effects).await;
        }
    }

    /// Run effects in order; a failing listener start yields a follow-up event
    async fn execute(&mut self, effects: Vec<Effect>) -> Option<Event> {
        let shared = self.shared;
        let parts = &shared.collaborators;
        let poster = Poster {
            inputs: self.shared.inputs.clone(),
            ticket: self.ticket,
        };

        for effect in effects {
            match effect {
                Effect::AcquireWakeLock => self.wake_lock.acquire(),
                Effect::ReleaseWakeLock => self.wake_lock.release(),
                Effect::ScheduleListener => {
                    let poster = poster.clone();
                    let delay = self.config.start_delay;
                    tokio::spawn(async move {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        poster.post(Event::Armed);
                    });
                }
                Effect::StartListener => {
                    let (on_wake, on_closed) = (poster.clone(), poster.clone());
                    let started = parts.listener.start_watched(
                        self.config.sensitivity,
                        move || on_wake.post(Event::WakeWord),
                        move |e| on_closed.post(Event::ListenerFailed(e)),
                    );
                    if let Err(e) = started {
                        tracing::error!(error = %e, "failed to start wake-word listener");
                        return Some(Event::ListenerFailed(e));
                    }
                }
                Effect::StopListener => parts.listener.stop().await,
                Effect::StartCapture => {
                    let (on_text, on_silence, on_error) =
                        (poster.clone(), poster.clone(), poster.clone());
                    parts.capture.capture(
                        move |text| on_text.post(Event::Transcript(text)),
                        move || on_silence.post(Event::NoSpeech),
                        move |e| on_error.post(Event::CaptureFailed(e)),
                    );
                }
                Effect::Dispatch(text) => {
                    let poster = poster.clone();
                    let dispatcher = Arc::clone(&parts.dispatcher);
                    tokio::spawn(async move {
                        let outcome = dispatcher.dispatch(&text).await;
                        poster.post(Event::Dispatched(outcome));
                    });
                }
                Effect::Speak(text) => {
                    let poster = poster.clone();
                    parts.speaker.speak(
                        text,
                        self.config.voice_id.as_deref(),
                        self.config.pitch,
                        self.config.rate,
                        move || poster.post(Event::Spoken),
                    );
                }
                Effect::PlayTone(tone) => parts.tones.play(tone),
                Effect::Status(message) => {
                    tracing::info!(status = %message);
                    self.shared.status.send_modify(|s| s.message = message);
                }
                Effect::Transcript(text) => {
                    self.shared
                        .status
                        .send_modify(|s| s.transcript = Some(text));
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effects(phase: Phase, event: Event) -> (Phase, Vec<Effect>) {
        let step = transition(phase, event).unwrap();
        (step.next, step.effects)
    }

    #[test]
    fn test_start_only_from_idle() {
        let (next, fx) = effects(Phase::Idle, Event::Start);
        assert_eq!(next, Phase::WakeListening { armed: false });
        assert_eq!(fx, [Effect::AcquireWakeLock, Effect::ScheduleListener]);

        assert!(transition(Phase::Dispatching, Event::Start).is_none());
    }

    #[test]
    fn test_idle_ignores_everything_but_start() {
        for event in [Event::Stop, Event::WakeWord, Event::Spoken, Event::NoSpeech] {
            assert!(transition(Phase::Idle, event).is_none());
        }
    }

    #[test]
    fn test_stop_from_every_active_phase() {
        for phase in [
            Phase::WakeListening { armed: false },
            Phase::WakeListening { armed: true },
            Phase::CommandCapturing,
            Phase::Dispatching,
            Phase::Speaking { cue: Tone::Success },
        ] {
            let (next, fx) = effects(phase, Event::Stop);
            assert_eq!(next, Phase::Idle);
            assert!(fx.contains(&Effect::ReleaseWakeLock));
            assert!(fx.contains(&Effect::StopListener));
        }
    }

    #[test]
    fn test_wake_word_needs_armed_listener() {
        assert!(transition(Phase::WakeListening { armed: false }, Event::WakeWord).is_none());
        let (next, fx) = effects(Phase::WakeListening { armed: true }, Event::WakeWord);
        assert_eq!(next, Phase::CommandCapturing);
        assert!(fx.contains(&Effect::StartCapture));
    }

    #[test]
    fn test_no_speech_relistens_with_error_tone() {
        let (next, fx) = effects(Phase::CommandCapturing, Event::NoSpeech);
        assert_eq!(next, Phase::WakeListening { armed: false });
        assert_eq!(
            fx,
            [
                Effect::Status(NO_SPEECH_STATUS.into()),
                Effect::PlayTone(Tone::Error),
                Effect::ScheduleListener,
            ]
        );
    }

    #[test]
    fn test_capture_error_relistens_with_error_tone() {
        let error = CaptureError::Engine("network".into());
        let (next, fx) = effects(Phase::CommandCapturing, Event::CaptureFailed(error));
        assert_eq!(next, Phase::WakeListening { armed: false });
        assert_eq!(
            fx,
            [
                Effect::Status("Error: network".into()),
                Effect::PlayTone(Tone::Error),
                Effect::ScheduleListener,
            ]
        );
    }

    #[test]
    fn test_rejected_command_shows_processing_error() {
        let outcome = DispatchOutcome::Rejected("Invalid token".into());
        let (next, fx) = effects(Phase::Dispatching, Event::Dispatched(outcome));
        assert_eq!(next, Phase::Speaking { cue: Tone::Error });
        assert_eq!(
            fx,
            [
                Effect::Status(crate::dispatch::PROCESSING_ERROR.into()),
                Effect::Speak("Invalid token".into()),
            ]
        );
    }

    #[test]
    fn test_outcome_with_speech_is_spoken_then_cued() {
        let outcome = DispatchOutcome::Failure("boom".into());
        let (next, fx) = effects(Phase::Dispatching, Event::Dispatched(outcome));
        assert_eq!(next, Phase::Speaking { cue: Tone::Error });
        assert_eq!(fx.last(), Some(&Effect::Speak("boom".into())));

        let (next, fx) = effects(next, Event::Spoken);
        assert_eq!(next, Phase::WakeListening { armed: false });
        assert_eq!(fx, [Effect::PlayTone(Tone::Error), Effect::ScheduleListener]);
    }

    #[test]
    fn test_silent_success_cues_immediately() {
        let outcome = DispatchOutcome::Success(String::new());
        let (next, fx) = effects(Phase::Dispatching, Event::Dispatched(outcome));
        assert_eq!(next, Phase::WakeListening { armed: false });
        assert_eq!(
            fx,
            [
                Effect::Status(crate::dispatch::SUCCESS_STATUS.into()),
                Effect::PlayTone(Tone::Success),
                Effect::ScheduleListener,
            ]
        );
    }

    #[test]
    fn test_listener_failure_halts() {
        let (next, fx) = effects(
            Phase::WakeListening { armed: true },
            Event::ListenerFailed(ListenerError::NotLoaded),
        );
        assert_eq!(next, Phase::Idle);
        assert!(fx.contains(&Effect::ReleaseWakeLock));

        let (next, fx) = effects(
            Phase::WakeListening { armed: true },
            Event::ListenerFailed(ListenerError::StreamClosed),
        );
        assert_eq!(next, Phase::Idle);
        assert_eq!(fx.first(), Some(&Effect::PlayTone(Tone::Error)));
    }

    #[test]
    fn test_duplicate_terminal_events_are_ignored() {
        assert!(transition(Phase::Dispatching, Event::Transcript("again".into())).is_none());
        assert!(transition(Phase::Speaking { cue: Tone::Success }, Event::NoSpeech).is_none());
        assert!(transition(Phase::CommandCapturing, Event::Spoken).is_none());
    }

    #[test]
    fn test_config_from_preferences() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefs = Preferences::load_from_dir(dir.path()).unwrap();
        assert_eq!(SessionConfig::from_preferences(&prefs), SessionConfig::default());

        prefs.set(preferences::SENSITIVITY, "0.75").unwrap();
        prefs.set(preferences::PITCH, "9").unwrap();
        prefs.set(preferences::RATE, "fast").unwrap();
        prefs.set(preferences::START_DELAY, "2").unwrap();
        prefs.set(preferences::SELECTED_VOICE, "fable").unwrap();

        let config = SessionConfig::from_preferences(&prefs);
        assert!((config.sensitivity - 0.75).abs() < f32::EPSILON);
        assert!((config.pitch - 2.0).abs() < f32::EPSILON);
        assert!((config.rate - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.start_delay, Duration::from_secs(2));
        assert_eq!(config.voice_id.as_deref(), Some("fable"));
    }
}
