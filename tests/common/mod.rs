//! Shared test utilities: in-memory stand-ins for the audio devices and
//! speech services

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use wake_relay::dispatch::{CommandDispatcher, DispatchOutcome};
use wake_relay::session::{Collaborators, Orchestrator};
use wake_relay::voice::{
    Classifier, ClassifierFrame, CommandCapture, ListenOptions, RecognitionEngine,
    RecognitionEvent, ResponseSpeaker, SpeechSynthesizer, Tone, TonePlayer, Utterance, Voice,
    WakeLock, WakeLockKind, WakeWordListener,
};
use wake_relay::{Error, Result};

/// Poll `check` every few milliseconds until it holds, panicking after two seconds
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Classifier fed by hand, one word at a time
pub struct FakeClassifier {
    loaded: bool,
    labels: Vec<String>,
    frames: Mutex<Option<mpsc::UnboundedSender<ClassifierFrame>>>,
    options: Mutex<Option<ListenOptions>>,
    fail_listen: AtomicBool,
    listens: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeClassifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_loaded(true))
    }

    pub fn unloaded() -> Arc<Self> {
        Arc::new(Self::with_loaded(false))
    }

    fn with_loaded(loaded: bool) -> Self {
        Self {
            loaded,
            labels: ["_background_noise_", "_unknown_", "go", "zero", "hello", "stop"]
                .into_iter()
                .map(String::from)
                .collect(),
            frames: Mutex::new(None),
            options: Mutex::new(None),
            fail_listen: AtomicBool::new(false),
            listens: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Make the next `listen` calls fail
    pub fn fail_listen(&self) {
        self.fail_listen.store(true, Ordering::SeqCst);
    }

    /// Deliver a frame whose top label is `word`; false if not listening
    pub fn say(&self, word: &str) -> bool {
        self.say_with_score(word, 0.9)
    }

    pub fn say_with_score(&self, word: &str, score: f32) -> bool {
        let index = self
            .labels
            .iter()
            .position(|l| l == word)
            .unwrap_or_else(|| panic!("'{word}' is not in the vocabulary"));
        let mut scores = vec![0.0; self.labels.len()];
        scores[index] = score;

        self.frames
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(ClassifierFrame::new(scores)).is_ok())
    }

    /// Drop the frame sender as a dying audio stream would
    pub fn hang_up(&self) {
        self.frames.lock().unwrap().take();
    }

    pub fn listens(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ListenOptions> {
        *self.options.lock().unwrap()
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn word_labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    fn listen(
        &self,
        frames: mpsc::UnboundedSender<ClassifierFrame>,
        options: ListenOptions,
    ) -> Result<()> {
        if self.fail_listen.load(Ordering::SeqCst) {
            return Err(Error::Classifier("microphone busy".to_string()));
        }
        self.listens.fetch_add(1, Ordering::SeqCst);
        *self.options.lock().unwrap() = Some(options);
        *self.frames.lock().unwrap() = Some(frames);
        Ok(())
    }

    async fn stop_listening(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.frames.lock().unwrap().take();
        Ok(())
    }

    fn is_listening(&self) -> bool {
        self.frames.lock().unwrap().is_some()
    }
}

/// Recognizer that replays one script per session
///
/// A session with no script left ends without a result.
#[derive(Default)]
pub struct FakeEngine {
    scripts: Mutex<VecDeque<Vec<RecognitionEvent>>>,
    starts: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a session that recognizes `text`
    pub fn hears(&self, text: &str) {
        self.script(vec![
            RecognitionEvent::Started,
            RecognitionEvent::Result(text.to_string()),
            RecognitionEvent::End,
        ]);
    }

    pub fn script(&self, events: Vec<RecognitionEvent>) {
        self.scripts.lock().unwrap().push_back(events);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl RecognitionEngine for FakeEngine {
    fn start(&self, _locale: &str, events: mpsc::UnboundedSender<RecognitionEvent>) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![RecognitionEvent::Started, RecognitionEvent::End]);
        for event in script {
            let _ = events.send(event);
        }
        Ok(())
    }
}

/// Synthesizer that records utterances instead of playing them
pub struct FakeSynth {
    voices: Mutex<Vec<Voice>>,
    voices_ready: Notify,
    spoken: Mutex<Vec<Utterance>>,
    cancels: AtomicUsize,
    hold: AtomicBool,
    release: Notify,
    fail: AtomicBool,
    available: AtomicBool,
}

impl FakeSynth {
    pub fn new(voices: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            voices: Mutex::new(voices.iter().map(|name| Voice::new(*name, "en-GB")).collect()),
            voices_ready: Notify::new(),
            spoken: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
            hold: AtomicBool::new(false),
            release: Notify::new(),
            fail: AtomicBool::new(false),
            available: AtomicBool::new(true),
        })
    }

    /// Make every utterance fail after being recorded
    pub fn fail_speech(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Report that synthesis cannot run on this host
    pub fn disable(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    /// Keep utterances playing until [`FakeSynth::finish`]
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.release.notify_waiters();
    }

    /// Publish a voice list after the fact
    pub fn load_voices(&self, voices: &[&str]) {
        *self.voices.lock().unwrap() =
            voices.iter().map(|name| Voice::new(*name, "en-GB")).collect();
        self.voices_ready.notify_one();
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.lock().unwrap().clone()
    }

    async fn voices_changed(&self) {
        self.voices_ready.notified().await;
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    async fn speak(&self, utterance: Utterance) -> Result<()> {
        let released = self.release.notified();
        self.spoken.lock().unwrap().push(utterance);
        if self.hold.load(Ordering::SeqCst) {
            released.await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Tts("output device lost".to_string()));
        }
        Ok(())
    }
}

/// Records cues in the order they were played
#[derive(Default)]
pub struct RecordingTones(Mutex<Vec<Tone>>);

impl RecordingTones {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn played(&self) -> Vec<Tone> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, tone: Tone) -> usize {
        self.0.lock().unwrap().iter().filter(|t| **t == tone).count()
    }
}

impl TonePlayer for RecordingTones {
    fn play(&self, tone: Tone) {
        self.0.lock().unwrap().push(tone);
    }
}

/// Wake lock that counts requests and releases
#[derive(Default)]
pub struct FakeWakeLock {
    requests: AtomicUsize,
    releases: AtomicUsize,
}

impl FakeWakeLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn held(&self) -> bool {
        self.requests() > self.releases()
    }
}

impl WakeLock for FakeWakeLock {
    fn request(&self, _kind: WakeLockKind) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Dispatcher returning canned outcomes, optionally held until released
pub struct FakeDispatcher {
    outcome: Mutex<DispatchOutcome>,
    received: Mutex<Vec<String>>,
    hold: AtomicBool,
    release: Notify,
}

impl FakeDispatcher {
    pub fn new(outcome: DispatchOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(outcome),
            received: Mutex::new(Vec::new()),
            hold: AtomicBool::new(false),
            release: Notify::new(),
        })
    }

    /// Keep dispatches pending until [`FakeDispatcher::finish`]
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        self.release.notify_waiters();
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandDispatcher for FakeDispatcher {
    async fn dispatch(&self, text: &str) -> DispatchOutcome {
        let released = self.release.notified();
        self.received.lock().unwrap().push(text.to_string());
        if self.hold.load(Ordering::SeqCst) {
            released.await;
        }
        self.outcome.lock().unwrap().clone()
    }
}

/// Fakes wired into a driven orchestrator
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub classifier: Arc<FakeClassifier>,
    pub engine: Arc<FakeEngine>,
    pub synth: Arc<FakeSynth>,
    pub tones: Arc<RecordingTones>,
    pub wake_lock: Arc<FakeWakeLock>,
    pub dispatcher: Arc<FakeDispatcher>,
}

impl Harness {
    /// Build and drive an orchestrator answering every command with `outcome`
    pub fn new(outcome: DispatchOutcome) -> Self {
        Self::with_classifier(FakeClassifier::new(), outcome)
    }

    pub fn with_classifier(classifier: Arc<FakeClassifier>, outcome: DispatchOutcome) -> Self {
        let engine = FakeEngine::new();
        let synth = FakeSynth::new(&["alloy", "fable"]);
        let tones = RecordingTones::new();
        let wake_lock = FakeWakeLock::new();
        let dispatcher = FakeDispatcher::new(outcome);

        let orchestrator = Orchestrator::new(Collaborators {
            listener: WakeWordListener::new(classifier.clone(), tones.clone()),
            capture: CommandCapture::new(Some(engine.clone())),
            dispatcher: dispatcher.clone(),
            speaker: ResponseSpeaker::new(Some(synth.clone())),
            tones: tones.clone(),
            wake_lock: Some(wake_lock.clone()),
        });

        let driver = orchestrator.clone();
        tokio::spawn(async move { driver.run().await });

        Self {
            orchestrator,
            classifier,
            engine,
            synth,
            tones,
            wake_lock,
            dispatcher,
        }
    }

    /// Wait until the wake-word listener is armed again
    pub async fn wait_for_listens(&self, count: usize) {
        let classifier = self.classifier.clone();
        wait_until("listener start", move || classifier.listens() >= count).await;
    }

    /// Speak the wake phrase
    pub fn wake(&self) {
        assert!(self.classifier.say("go"));
        assert!(self.classifier.say("zero"));
    }
}
