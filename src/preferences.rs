//! Persisted user preferences
//!
//! A flat string map saved as JSON in the data directory. Values are kept
//! as the user typed them; numeric parsing happens when a
//! [`SessionConfig`](crate::session::SessionConfig) is built.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::voice::Voice;
use crate::{Error, Result};

/// Wake-word score threshold
pub const SENSITIVITY: &str = "sensitivity";
/// Name of the voice responses are spoken with
pub const SELECTED_VOICE: &str = "selectedVoice";
/// Speech pitch multiplier
pub const PITCH: &str = "pitch";
/// Speech rate multiplier
pub const RATE: &str = "rate";
/// Seconds to wait before each listener start
pub const START_DELAY: &str = "startDelay";

/// Every key the relay reads
pub const KEYS: [&str; 5] = [SENSITIVITY, SELECTED_VOICE, PITCH, RATE, START_DELAY];

/// File name inside the data directory
pub const FILE_NAME: &str = "preferences.json";

/// String-keyed settings backed by a JSON file
#[derive(Debug, Clone)]
pub struct Preferences {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl Preferences {
    /// Load from `path`; a missing file yields an empty store
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| Error::Preferences(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), count = values.len(), "preferences loaded");
        Ok(Self { path, values })
    }

    /// Load `preferences.json` from a data directory
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load_from_dir(data_dir: &Path) -> Result<Self> {
        Self::load(data_dir.join(FILE_NAME))
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Store a value and persist
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.values.insert(key.into(), value.into());
        self.save()
    }

    /// Remove a value and persist; returns whether it was present
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        if self.values.remove(key).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Drop every value and persist
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn clear(&mut self) -> Result<()> {
        self.values.clear();
        self.save()
    }

    /// Stored entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Pick and persist a voice if none is stored yet
    ///
    /// Prefers `preferred` when the synthesizer offers it, else the first
    /// voice. Returns the selected voice name.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn select_default_voice(
        &mut self,
        voices: &[Voice],
        preferred: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(current) = self.get(SELECTED_VOICE).filter(|v| !v.is_empty()) {
            return Ok(Some(current.to_string()));
        }

        let choice = preferred
            .and_then(|name| voices.iter().find(|v| v.name == name))
            .or_else(|| voices.first());
        let Some(voice) = choice else {
            return Ok(None);
        };

        tracing::info!(voice = %voice.name, "selected default voice");
        self.set(SELECTED_VOICE, voice.name.clone())?;
        Ok(Some(voice.name.clone()))
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}
