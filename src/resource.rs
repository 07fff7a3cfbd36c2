//! Staged files backing the download and landing-page fallbacks.
//!
//! Every export stages its image under a fresh directory. A download releases
//! the directory as soon as the file is saved; a landing page holds it until
//! the page acknowledges the load or the grace period runs out.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ErrorContext, SlipResult};

/// A staged file, removed together with its directory on release or drop
#[derive(Debug)]
pub struct ResourceHandle {
    dir: PathBuf,
    file: PathBuf,
    released: bool,
}

impl ResourceHandle {
    pub async fn stage(root: &Path, file_name: &str, bytes: &[u8]) -> SlipResult<Self> {
        let dir = root.join(format!("export-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.with_path(&dir)?;

        let file = dir.join(file_name);
        let handle = Self {
            dir,
            file,
            released: false,
        };
        // From here on a failed write still cleans up through Drop
        tokio::fs::write(&handle.file, bytes).await.with_path(&handle.file)?;

        debug!("📦 Staged {} ({} bytes)", handle.file.display(), bytes.len());
        Ok(handle)
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `file://` URL of the staged file
    pub fn url(&self) -> String {
        let path = self.file.to_string_lossy().replace('\\', "/");
        if path.starts_with('/') {
            format!("file://{}", path)
        } else {
            format!("file:///{}", path)
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!("🧹 Released {}", self.dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not release {}: {}", self.dir.display(), e),
        }
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.release_now();
    }
}

/// Why a deferred resource was let go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    Acknowledged,
    GraceElapsed,
}

/// Handed to the surface that consumes the resource; call
/// [`LoadAck::loaded`] once it no longer needs the file
#[derive(Debug)]
pub struct LoadAck {
    sender: oneshot::Sender<()>,
}

/// Receiving end of a [`LoadAck`]
#[derive(Debug)]
pub struct LoadSignal {
    receiver: oneshot::Receiver<()>,
}

impl LoadAck {
    pub fn pair() -> (LoadAck, LoadSignal) {
        let (sender, receiver) = oneshot::channel();
        (LoadAck { sender }, LoadSignal { receiver })
    }

    pub fn loaded(self) {
        let _ = self.sender.send(());
    }
}

/// Releases a handle on acknowledgement or after the grace period,
/// whichever comes first
#[derive(Debug)]
pub struct DeferredRelease {
    task: JoinHandle<ReleaseReason>,
}

impl DeferredRelease {
    pub fn spawn(handle: ResourceHandle, signal: LoadSignal, grace: Duration) -> Self {
        let task = tokio::spawn(async move {
            let reason = tokio::select! {
                result = signal.receiver => match result {
                    Ok(()) => ReleaseReason::Acknowledged,
                    // Ack dropped without a load; keep the full window
                    Err(_) => {
                        tokio::time::sleep(grace).await;
                        ReleaseReason::GraceElapsed
                    }
                },
                _ = tokio::time::sleep(grace) => ReleaseReason::GraceElapsed,
            };
            debug!("Deferred release of {} ({:?})", handle.dir().display(), reason);
            handle.release();
            reason
        });

        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the handle has been released
    pub async fn wait(self) -> ReleaseReason {
        match self.task.await {
            Ok(reason) => reason,
            Err(e) => {
                warn!("Deferred release task ended abnormally: {}", e);
                ReleaseReason::GraceElapsed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_stage_and_release() {
        let root = tempdir().unwrap();
        let handle = ResourceHandle::stage(root.path(), "patti-note.png", b"png").await.unwrap();

        assert!(handle.path().exists());
        assert!(handle.url().starts_with("file://"));
        assert!(handle.url().ends_with("/patti-note.png"));

        let dir = handle.dir().to_path_buf();
        handle.release();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let root = tempdir().unwrap();
        let dir = {
            let handle = ResourceHandle::stage(root.path(), "a.png", b"x").await.unwrap();
            handle.dir().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_each_export_gets_its_own_dir() {
        let root = tempdir().unwrap();
        let a = ResourceHandle::stage(root.path(), "p.png", b"1").await.unwrap();
        let b = ResourceHandle::stage(root.path(), "p.png", b"2").await.unwrap();
        assert_ne!(a.dir(), b.dir());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_releases_before_grace() {
        let root = tempdir().unwrap();
        let handle = ResourceHandle::stage(root.path(), "p.png", b"1").await.unwrap();
        let dir = handle.dir().to_path_buf();

        let (ack, signal) = LoadAck::pair();
        let deferred = DeferredRelease::spawn(handle, signal, Duration::from_secs(30));
        assert!(dir.exists());

        ack.loaded();
        assert_eq!(deferred.wait().await, ReleaseReason::Acknowledged);
        assert!(!dir.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_releases_without_ack() {
        let root = tempdir().unwrap();
        let handle = ResourceHandle::stage(root.path(), "p.png", b"1").await.unwrap();
        let dir = handle.dir().to_path_buf();

        let (_ack, signal) = LoadAck::pair();
        let deferred = DeferredRelease::spawn(handle, signal, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(dir.exists());
        assert!(!deferred.is_finished());

        assert_eq!(deferred.wait().await, ReleaseReason::GraceElapsed);
        assert!(!dir.exists());
    }
}
