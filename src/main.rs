use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wake_relay::preferences::{self, Preferences};
use wake_relay::voice::{
    AudioCapture, AudioPlayback, OpenAiSynthesizer, PLAYBACK_SAMPLE_RATE, SpeechSynthesizer,
    Tone, UTTERANCE_LANG, Utterance, Voice, calculate_energy, render_tone,
};
use wake_relay::{Config, Daemon};

/// Wake relay - say "go zero", then speak a home-automation command
#[derive(Parser)]
#[command(name = "wake-relay", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "WAKE_RELAY_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run the HTTP proxy only, without microphone or speaker
    #[arg(long, env = "WAKE_RELAY_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Play the start, success and error cues
    TestTones,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Inspect or change stored preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsCommand,
    },
    /// Interactive first-run setup
    Setup,
}

#[derive(Subcommand)]
enum PrefsCommand {
    /// Show all stored preferences
    List,
    /// Show one preference
    Get { key: String },
    /// Store a preference
    Set { key: String, value: String },
    /// Remove one preference, or all of them
    Reset { key: Option<String> },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,wake_relay=info",
        1 => "info,wake_relay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestTones => test_tones().await,
            Command::TestTts { text } => test_tts(&text).await,
            Command::Prefs { action } => prefs(action),
            Command::Setup => wake_relay::setup::run_setup(),
        };
    }

    let config = Config::load_with_options(cli.disable_voice, cli.port)?;
    tracing::debug!(?config, "loaded configuration");

    if config.voice.enabled {
        tracing::info!("wake relay ready - say \"go zero\"");
    } else {
        tracing::info!("wake relay ready (proxy-only mode, voice disabled)");
    }

    Daemon::new(config).run().await?;

    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);

        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("If the meter moved while you spoke, the wake word can be heard.");
    println!("If RMS stayed near 0, check:");
    println!("  1. Run: pactl info | grep 'Default Source'");
    println!("  2. Run: arecord -l (to list devices)");

    Ok(())
}

/// Play each cue in turn
async fn test_tones() -> anyhow::Result<()> {
    for tone in [Tone::Start, Tone::Success, Tone::Error] {
        println!("Playing {tone:?} cue...");
        tokio::task::spawn_blocking(move || {
            AudioPlayback::new()?.play_blocking(render_tone(tone, PLAYBACK_SAMPLE_RATE), None)
        })
        .await??;
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    println!("\n---");
    println!("If you heard three cues, the speaker is working!");

    Ok(())
}

/// Speak `text` with the stored voice settings
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let key = config
        .openai_api_key
        .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
    let synth = OpenAiSynthesizer::new(&config.voice.openai_url, key, &config.voice.tts_model)?;
    let prefs = Preferences::load_from_dir(&config.data_dir)?;

    let number = |key: &str| {
        prefs
            .get(key)
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(1.0)
    };
    let voice = prefs
        .get(preferences::SELECTED_VOICE)
        .unwrap_or(config.voice.preferred_voice.as_str())
        .to_string();

    println!("Voice: {voice}");
    synth
        .speak(Utterance {
            text: text.to_string(),
            voice: Some(Voice::new(voice, UTTERANCE_LANG)),
            pitch: number(preferences::PITCH),
            rate: number(preferences::RATE),
            lang: UTTERANCE_LANG.to_string(),
        })
        .await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Preferences subcommands
fn prefs(action: PrefsCommand) -> anyhow::Result<()> {
    let config = Config::load()?;
    let mut prefs = Preferences::load_from_dir(&config.data_dir)?;

    match action {
        PrefsCommand::List => {
            println!("# {}", prefs.path().display());
            for (key, value) in prefs.iter() {
                println!("{key} = {value}");
            }
        }
        PrefsCommand::Get { key } => match prefs.get(&key) {
            Some(value) => println!("{value}"),
            None => println!("{key} is not set"),
        },
        PrefsCommand::Set { key, value } => {
            if !preferences::KEYS.contains(&key.as_str()) {
                anyhow::bail!(
                    "unknown preference '{key}', expected one of: {}",
                    preferences::KEYS.join(", ")
                );
            }
            prefs.set(key.as_str(), value.as_str())?;
            println!("{key} = {value}");
        }
        PrefsCommand::Reset { key: Some(key) } => {
            if prefs.remove(&key)? {
                println!("Removed {key}");
            } else {
                println!("{key} is not set");
            }
        }
        PrefsCommand::Reset { key: None } => {
            prefs.clear()?;
            println!("Cleared all preferences");
        }
    }

    Ok(())
}
