//! TOML configuration file loading
//!
//! Supports `~/.config/wake-relay/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RelayConfigFile {
    /// Remote automation webhook
    #[serde(default)]
    pub home_assistant: HomeAssistantFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Upstream webhook configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HomeAssistantFileConfig {
    /// Full webhook URL commands are forwarded to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Bearer token for the webhook
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct VoiceFileConfig {
    /// Enable the listening cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Base URL of the OpenAI-compatible speech API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_url: Option<String>,

    /// STT model (e.g. "whisper-1")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_model: Option<String>,

    /// Voice chosen when no preference is stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_voice: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ApiKeysFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<String>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ServerFileConfig {
    /// API server port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Relay URL the voice loop posts commands to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Where preferences are stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `RelayConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> RelayConfigFile {
    let Some(path) = config_file_path() else {
        return RelayConfigFile::default();
    };

    if !path.exists() {
        return RelayConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                RelayConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            RelayConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/wake-relay/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("wake-relay").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let parsed: RelayConfigFile = toml::from_str(
            r#"
            [home_assistant]
            url = "http://ha.local:8123/api/webhook/relay"

            [server]
            port = 4000
            "#,
        )
        .unwrap();

        assert_eq!(
            parsed.home_assistant.url.as_deref(),
            Some("http://ha.local:8123/api/webhook/relay")
        );
        assert_eq!(parsed.server.port, Some(4000));
        assert!(parsed.voice.enabled.is_none());
        assert!(parsed.api_keys.openai.is_none());
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let rendered = toml::to_string(&RelayConfigFile::default()).unwrap();
        assert!(!rendered.contains("url"));
        assert!(!rendered.contains("port"));
    }
}
