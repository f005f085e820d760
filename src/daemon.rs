//! Relay daemon: wires the voice cycle to the HTTP proxy

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::api::ApiServerBuilder;
use crate::config::Config;
use crate::dispatch::DispatchBridge;
use crate::preferences::Preferences;
use crate::session::{Collaborators, Orchestrator, SessionConfig};
use crate::voice::{
    CommandCapture, DeviceTones, KeywordClassifier, OpenAiSynthesizer, ResponseSpeaker,
    SpeechSynthesizer, SystemdInhibit, TonePlayer, Voice, WakeLock, WakeWordListener,
    WhisperClient, WhisperRecognizer,
};
use crate::{Error, Result};

/// The wake relay daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if preferences cannot be read, the speech clients
    /// cannot be built, or the API server fails
    pub async fn run(self) -> Result<()> {
        let Config {
            data_dir,
            api_server,
            home_assistant,
            voice,
            openai_api_key,
        } = self.config;

        tracing::info!(
            port = api_server.port,
            data_dir = %data_dir.display(),
            "starting wake relay"
        );

        let session = match (voice.enabled, openai_api_key) {
            (false, _) => None,
            (true, None) => {
                tracing::warn!("OPENAI_API_KEY is not set, running without the voice cycle");
                None
            }
            (true, Some(key)) => {
                let mut prefs = Preferences::load_from_dir(&data_dir)?;
                let (orchestrator, speaker_voices) = build_session(
                    &voice.openai_url,
                    &key,
                    &voice.stt_model,
                    &voice.tts_model,
                    &api_server.dispatch_base(),
                )?;

                let selected =
                    prefs.select_default_voice(&speaker_voices, Some(&voice.preferred_voice))?;
                tracing::debug!(voice = ?selected, "response voice");

                Some((orchestrator, SessionConfig::from_preferences(&prefs)))
            }
        };

        let mut builder = ApiServerBuilder::new(api_server.port).home_assistant(home_assistant);
        if let Some((orchestrator, _)) = &session {
            builder = builder.session(orchestrator.clone());
        }
        let mut server = builder.build().spawn();

        if let Some((orchestrator, session_config)) = &session {
            let driver = orchestrator.clone();
            tokio::spawn(async move { driver.run().await });

            let mut status = orchestrator.subscribe();
            tokio::spawn(async move {
                while status.changed().await.is_ok() {
                    let current = status.borrow_and_update().clone();
                    tracing::info!(state = ?current.state, message = %current.message, "status");
                }
            });

            if let Err(e) = orchestrator.start(session_config.clone()) {
                tracing::error!(error = %e, "failed to start listening");
            }
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            let _ = shutdown_tx.send(()).await;
        });

        let result = tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("shutting down");
                Ok(())
            }
            joined = &mut server => match joined {
                Ok(served) => served,
                Err(e) => Err(Error::Config(format!("API server task failed: {e}"))),
            },
        };

        if let Some((orchestrator, _)) = &session {
            orchestrator.stop().await;
        }
        server.abort();

        result
    }
}

/// Assemble the device-backed collaborators
///
/// Returns the orchestrator and the voices the speaker offers.
fn build_session(
    openai_url: &str,
    api_key: &SecretString,
    stt_model: &str,
    tts_model: &str,
    dispatch_base: &str,
) -> Result<(Orchestrator, Vec<Voice>)> {
    let runtime = Handle::current();
    let key = || SecretString::from(api_key.expose_secret().to_owned());

    let stt = Arc::new(WhisperClient::new(openai_url, key(), stt_model)?);
    let synth: Arc<dyn SpeechSynthesizer> =
        Arc::new(OpenAiSynthesizer::new(openai_url, key(), tts_model)?);
    let tones: Arc<dyn TonePlayer> = Arc::new(DeviceTones);

    let wake_lock = SystemdInhibit::detect().map(|lock| Arc::new(lock) as Arc<dyn WakeLock>);
    if wake_lock.is_none() {
        tracing::warn!("systemd-inhibit not found, the host may sleep while listening");
    }

    let speaker = ResponseSpeaker::new(Some(synth));
    let voices = speaker.voices();

    let collaborators = Collaborators {
        listener: WakeWordListener::new(
            Arc::new(KeywordClassifier::new(stt.clone(), runtime.clone())),
            tones.clone(),
        ),
        capture: CommandCapture::new(Some(Arc::new(WhisperRecognizer::new(stt, runtime)))),
        dispatcher: Arc::new(DispatchBridge::new(dispatch_base)),
        speaker,
        tones,
        wake_lock,
    };

    Ok((Orchestrator::new(collaborators), voices))
}
