//! Wake Relay - voice-activated command relay for home automation
//!
//! Listens for the wake phrase "go zero", captures the spoken command that
//! follows, forwards it to a home-automation webhook through a small HTTP
//! proxy, and speaks the result back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Session (orchestrator)              │
//! │  WakeListening → CommandCapturing → Dispatching →   │
//! │  Speaking → WakeListening ...                       │
//! └──────┬──────────────┬──────────────┬────────────────┘
//!        │              │              │
//! ┌──────▼─────┐ ┌──────▼─────┐ ┌──────▼──────────────┐
//! │   Voice    │ │  Dispatch  │ │  API (proxy)        │
//! │ wake word  │ │  bridge    ├─►  /api/home-assistant├─► webhook
//! │ STT / TTS  │ │            │ │  /health /ready     │
//! └────────────┘ └────────────┘ └─────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod preferences;
pub mod session;
pub mod setup;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use dispatch::{CommandDispatcher, DispatchBridge, DispatchOutcome};
pub use error::{CaptureError, Error, ListenerError, Result};
pub use preferences::Preferences;
pub use session::{Orchestrator, SessionConfig, SessionState, Status};
