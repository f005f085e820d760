//! Keeping the host awake while the relay listens

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use crate::{Error, Result};

/// What the lock prevents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeLockKind {
    /// Display blanking and idle actions
    Screen,
    /// System suspend
    System,
}

impl WakeLockKind {
    const fn inhibit_what(self) -> &'static str {
        match self {
            Self::Screen => "idle",
            Self::System => "sleep",
        }
    }
}

/// Platform wake-lock capability
pub trait WakeLock: Send + Sync {
    /// Take the lock
    ///
    /// # Errors
    ///
    /// Returns error if the platform refuses the lock
    fn request(&self, kind: WakeLockKind) -> Result<()>;

    /// Give the lock back
    ///
    /// # Errors
    ///
    /// Returns error if the lock could not be released cleanly
    fn release(&self) -> Result<()>;
}

/// Holds an inhibitor via `systemd-inhibit` for as long as the child lives
pub struct SystemdInhibit {
    program: PathBuf,
    child: Mutex<Option<Child>>,
}

impl SystemdInhibit {
    /// Locate `systemd-inhibit` on `PATH`
    ///
    /// Returns `None` when the host has no systemd.
    #[must_use]
    pub fn detect() -> Option<Self> {
        let program = which::which("systemd-inhibit").ok()?;
        tracing::debug!(path = %program.display(), "found systemd-inhibit");
        Some(Self {
            program,
            child: Mutex::new(None),
        })
    }
}

impl WakeLock for SystemdInhibit {
    fn request(&self, kind: WakeLockKind) -> Result<()> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if child.is_some() {
            return Ok(());
        }

        let spawned = Command::new(&self.program)
            .arg(format!("--what={}", kind.inhibit_what()))
            .arg("--who=wake-relay")
            .arg("--why=Listening for voice commands")
            .args(["sleep", "infinity"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::WakeLock(e.to_string()))?;

        tracing::debug!(pid = spawned.id(), ?kind, "inhibitor started");
        *child = Some(spawned);
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let Some(mut child) = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        child.kill().map_err(|e| Error::WakeLock(e.to_string()))?;
        let _ = child.wait();
        tracing::debug!("inhibitor stopped");
        Ok(())
    }
}

impl Drop for SystemdInhibit {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// The orchestrator's single wake-lock handle
///
/// Acquire and release are idempotent; with no platform lock both are no-ops.
pub struct WakeLockGuard {
    lock: Option<Arc<dyn WakeLock>>,
    held: bool,
}

impl WakeLockGuard {
    #[must_use]
    pub fn new(lock: Option<Arc<dyn WakeLock>>) -> Self {
        Self { lock, held: false }
    }

    /// Take the screen lock unless already held
    pub fn acquire(&mut self) {
        if self.held {
            return;
        }
        let Some(lock) = &self.lock else {
            tracing::debug!("no wake lock available");
            return;
        };

        match lock.request(WakeLockKind::Screen) {
            Ok(()) => {
                self.held = true;
                tracing::debug!("wake lock acquired");
            }
            Err(e) => tracing::warn!(error = %e, "failed to acquire wake lock"),
        }
    }

    /// Release the lock if held
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;

        if let Some(lock) = &self.lock {
            match lock.release() {
                Ok(()) => tracing::debug!("wake lock released"),
                Err(e) => tracing::warn!(error = %e, "failed to release wake lock"),
            }
        }
    }

    /// Whether the lock is currently held
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.held
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counting {
        requests: AtomicUsize,
        releases: AtomicUsize,
    }

    impl WakeLock for Counting {
        fn request(&self, _kind: WakeLockKind) -> Result<()> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Refusing;

    impl WakeLock for Refusing {
        fn request(&self, _kind: WakeLockKind) -> Result<()> {
            Err(Error::WakeLock("denied".into()))
        }

        fn release(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_acquire_release_idempotent() {
        let lock = Arc::new(Counting::default());
        let mut guard = WakeLockGuard::new(Some(lock.clone()));

        guard.acquire();
        guard.acquire();
        assert!(guard.is_held());
        guard.release();
        guard.release();
        assert!(!guard.is_held());

        assert_eq!(lock.requests.load(Ordering::SeqCst), 1);
        assert_eq!(lock.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refused_lock_is_not_held() {
        let mut guard = WakeLockGuard::new(Some(Arc::new(Refusing)));
        guard.acquire();
        assert!(!guard.is_held());
    }

    #[test]
    fn test_missing_lock_is_noop() {
        let mut guard = WakeLockGuard::new(None);
        guard.acquire();
        guard.release();
        assert!(!guard.is_held());
    }
}
