//! Configuration management for the wake relay

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;
use url::Url;

use crate::voice::{DEFAULT_STT_MODEL, DEFAULT_TTS_MODEL};
use crate::{Error, Result};

/// Default API server port
pub const DEFAULT_PORT: u16 = 3000;

/// Default speech API base URL
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Voice picked when none is stored and the config names none
pub const DEFAULT_PREFERRED_VOICE: &str = "fable";

/// Wake relay configuration
#[derive(Debug)]
pub struct Config {
    /// Path to data directory (preferences)
    pub data_dir: PathBuf,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// Upstream automation webhook
    pub home_assistant: HomeAssistantConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// `OpenAI` API key for transcription and speech
    pub openai_api_key: Option<SecretString>,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Relay base URL the voice loop dispatches to; defaults to this server
    pub endpoint: Option<Url>,
}

impl ApiServerConfig {
    /// Base URL commands are posted to
    #[must_use]
    pub fn dispatch_base(&self) -> String {
        self.endpoint.as_ref().map_or_else(
            || format!("http://127.0.0.1:{}", self.port),
            |url| url.as_str().trim_end_matches('/').to_string(),
        )
    }
}

/// Upstream webhook configuration
#[derive(Debug, Default)]
pub struct HomeAssistantConfig {
    /// Webhook URL
    pub url: Option<Url>,

    /// Bearer token
    pub token: Option<SecretString>,
}

impl HomeAssistantConfig {
    /// Whether commands can be forwarded
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Run the listening cycle
    pub enabled: bool,

    /// Base URL of the speech API
    pub openai_url: String,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// Voice selected when no preference is stored
    pub preferred_voice: String,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(false, None)
    }

    /// Load configuration with CLI overrides
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL is invalid
    pub fn load_with_options(disable_voice: bool, port: Option<u16>) -> Result<Self> {
        let fc = file::load_config_file();

        let home_assistant = HomeAssistantConfig {
            url: env("HOME_ASSISTANT_URL")
                .or(fc.home_assistant.url)
                .map(|u| parse_url("HOME_ASSISTANT_URL", &u))
                .transpose()?,
            token: env("HOME_ASSISTANT_TOKEN")
                .or(fc.home_assistant.token)
                .map(SecretString::from),
        };

        let api_server = ApiServerConfig {
            port: port
                .or_else(|| env("WAKE_RELAY_PORT").and_then(|s| s.parse().ok()))
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            endpoint: env("WAKE_RELAY_ENDPOINT")
                .or(fc.server.endpoint)
                .map(|u| parse_url("WAKE_RELAY_ENDPOINT", &u))
                .transpose()?,
        };

        let openai_url = env("WAKE_RELAY_OPENAI_URL")
            .or(fc.voice.openai_url)
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        parse_url("WAKE_RELAY_OPENAI_URL", &openai_url)?;

        let voice = VoiceConfig {
            enabled: !disable_voice && fc.voice.enabled.unwrap_or(true),
            openai_url,
            stt_model: env("WAKE_RELAY_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| DEFAULT_STT_MODEL.to_string()),
            tts_model: env("WAKE_RELAY_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
            preferred_voice: fc
                .voice
                .preferred_voice
                .unwrap_or_else(|| DEFAULT_PREFERRED_VOICE.to_string()),
        };

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
        }

        let openai_api_key = env("OPENAI_API_KEY")
            .or(fc.api_keys.openai)
            .map(SecretString::from);

        // ~/.local/share/wake-relay on Linux
        let data_dir = env("WAKE_RELAY_DATA_DIR")
            .or(fc.server.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            data_dir,
            api_server,
            home_assistant,
            voice,
            openai_api_key,
        })
    }
}

/// Default data directory
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("wake-relay"))
}

/// Non-empty environment variable
fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an http(s) URL, naming its source on failure
///
/// # Errors
///
/// Returns `Error::Config` if the value is not an absolute http(s) URL
pub fn parse_url(source: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value.trim())
        .map_err(|e| Error::Config(format!("{source}: invalid URL '{value}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "{source}: unsupported scheme '{}'",
            url.scheme()
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url() {
        assert!(parse_url("TEST", "http://ha.local:8123/api/webhook/x").is_ok());
        assert!(matches!(parse_url("TEST", "not a url"), Err(Error::Config(_))));
        assert!(matches!(parse_url("TEST", "ftp://host/"), Err(Error::Config(_))));
    }

    #[test]
    fn test_dispatch_base() {
        let local = ApiServerConfig {
            port: 4000,
            endpoint: None,
        };
        assert_eq!(local.dispatch_base(), "http://127.0.0.1:4000");

        let remote = ApiServerConfig {
            port: 4000,
            endpoint: Some(parse_url("TEST", "https://relay.example.com/").unwrap()),
        };
        assert_eq!(remote.dispatch_base(), "https://relay.example.com");
    }
}
