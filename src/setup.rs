//! Interactive first-run setup wizard (`wake-relay setup`)

use std::path::{Path, PathBuf};

use dialoguer::{Confirm, Input, Select};

use crate::config::file::{
    ApiKeysFileConfig, HomeAssistantFileConfig, RelayConfigFile, ServerFileConfig,
    VoiceFileConfig,
};
use crate::config::{DEFAULT_PORT, DEFAULT_PREFERRED_VOICE, parse_url};
use crate::voice::OPENAI_VOICES;

/// Run the interactive setup wizard
///
/// # Errors
///
/// Returns error if user input fails or config cannot be written
pub fn run_setup() -> anyhow::Result<()> {
    println!("Wake Relay Setup\n");

    let existing = crate::config::file::load_config_file();
    let config_path = crate::config::file::config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/wake-relay/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. Webhook
    let mut url_input = Input::<String>::new().with_prompt("Home Assistant webhook URL");
    if let Some(url) = &existing.home_assistant.url {
        url_input = url_input.default(url.clone());
    }
    let url = url_input
        .validate_with(|input: &String| {
            parse_url("webhook URL", input)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .interact_text()?;

    let token = prompt_secret(
        "Home Assistant token",
        "HOME_ASSISTANT_TOKEN",
        existing.home_assistant.token.as_deref(),
    )?;

    // 2. Voice
    let enable_voice = Confirm::new()
        .with_prompt("Enable the voice cycle (microphone and speaker)?")
        .default(existing.voice.enabled.unwrap_or(true))
        .interact()?;

    let mut api_keys = ApiKeysFileConfig::default();
    let voice = if enable_voice {
        api_keys.openai = prompt_secret(
            "OpenAI API key",
            "OPENAI_API_KEY",
            existing.api_keys.openai.as_deref(),
        )?;

        let current = existing
            .voice
            .preferred_voice
            .as_deref()
            .unwrap_or(DEFAULT_PREFERRED_VOICE);
        let voice_idx = Select::new()
            .with_prompt("Response voice")
            .items(&OPENAI_VOICES)
            .default(OPENAI_VOICES.iter().position(|&v| v == current).unwrap_or(0))
            .interact()?;

        VoiceFileConfig {
            enabled: Some(true),
            preferred_voice: Some(OPENAI_VOICES[voice_idx].to_string()),
            ..existing.voice
        }
    } else {
        api_keys.openai = existing.api_keys.openai;
        VoiceFileConfig {
            enabled: Some(false),
            ..existing.voice
        }
    };

    // 3. Server
    let port: u16 = Input::new()
        .with_prompt("API server port")
        .default(existing.server.port.unwrap_or(DEFAULT_PORT))
        .interact_text()?;

    let config_file = RelayConfigFile {
        home_assistant: HomeAssistantFileConfig {
            url: Some(url),
            token,
        },
        voice,
        api_keys,
        server: ServerFileConfig {
            port: Some(port),
            ..existing.server
        },
    };

    write_config(&config_path, &config_file)?;
    println!("\nConfig written to {}", config_path.display());
    println!("\nSetup complete! Run `wake-relay -v` to start.");

    Ok(())
}

/// Ask for a secret, keeping the current value on blank input
fn prompt_secret(
    label: &str,
    env_hint: &str,
    current: Option<&str>,
) -> anyhow::Result<Option<String>> {
    let prompt = match current.map(mask) {
        Some(masked) => format!("{label} (current: {masked}, leave blank to keep)"),
        None => format!("{label} ({env_hint})"),
    };

    let input: String = Input::new()
        .with_prompt(&prompt)
        .allow_empty(true)
        .interact_text()?;

    Ok(if input.trim().is_empty() {
        current.map(str::to_string)
    } else {
        Some(input.trim().to_string())
    })
}

/// Show only the ends of a secret
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

/// Serialize and write the config file
fn write_config(path: &Path, config: &RelayConfigFile) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, toml::to_string_pretty(config)?)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask() {
        assert_eq!(mask("sk-abcdefghijkl"), "sk-a...ijkl");
        assert_eq!(mask("short"), "****");
    }

    #[test]
    fn test_write_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = RelayConfigFile {
            home_assistant: HomeAssistantFileConfig {
                url: Some("http://ha.local:8123/api/webhook/relay".to_string()),
                token: Some("secret".to_string()),
            },
            server: ServerFileConfig {
                port: Some(4000),
                ..ServerFileConfig::default()
            },
            ..RelayConfigFile::default()
        };
        write_config(&path, &config).unwrap();

        let parsed: RelayConfigFile =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.home_assistant.token.as_deref(), Some("secret"));
        assert_eq!(parsed.server.port, Some(4000));
        assert!(parsed.voice.preferred_voice.is_none());
    }
}
