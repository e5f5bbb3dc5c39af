use async_trait::async_trait;

use crate::error::DiffResult;

/// A single mount entry in a mount set, as handed to the differ.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    /// Mount type, e.g. `overlay` or `bind`.
    pub mount_type: String,
    /// Mount source (path or device).
    pub source: String,
    /// Raw mount options.
    pub options: Vec<String>,
}

impl Mount {
    /// Create a mount entry.
    pub fn new(
        mount_type: impl Into<String>,
        source: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self {
            mount_type: mount_type.into(),
            source: source.into(),
            options,
        }
    }
}

/// An acquired, mounted mount set.
///
/// The release hook runs exactly once, when the guard is dropped. Callers
/// keep the guard alive for the duration of the diff step that needed the
/// mounts and drop it immediately after; early returns and error paths
/// release through the same drop.
pub struct ActiveMount {
    mounts: Vec<Mount>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ActiveMount {
    /// A mount set with a release hook.
    pub fn new(mounts: Vec<Mount>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            mounts,
            release: Some(Box::new(release)),
        }
    }

    /// A mount set that needs no release (e.g. pre-mounted test fixtures).
    pub fn unmanaged(mounts: Vec<Mount>) -> Self {
        Self {
            mounts,
            release: None,
        }
    }

    /// The mounted mount set.
    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }
}

impl Drop for ActiveMount {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ActiveMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveMount")
            .field("mounts", &self.mounts)
            .field("managed", &self.release.is_some())
            .finish()
    }
}

/// A not-yet-mounted handle to a snapshot's filesystem.
#[async_trait]
pub trait MountHandle: Send + Sync {
    /// Mount and return the active mount set with its release guard.
    async fn mount(&self) -> DiffResult<ActiveMount>;
}

/// Per-reference mount acquisition, implemented by the snapshot manager.
#[async_trait]
pub trait MountProvider: Send + Sync {
    /// Acquire a mount handle for a reference's snapshot.
    async fn mount(&self, reference: &str, readonly: bool) -> DiffResult<Box<dyn MountHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn release_runs_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        {
            let released = Arc::clone(&released);
            let _guard = ActiveMount::new(vec![], move || {
                released.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(released.load(Ordering::SeqCst), 0);
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unmanaged_mounts_need_no_release() {
        let mount = Mount::new("bind", "/src", vec!["ro".to_string()]);
        let guard = ActiveMount::unmanaged(vec![mount.clone()]);
        assert_eq!(guard.mounts(), &[mount]);
        drop(guard);
    }

    #[test]
    fn debug_reports_managed_state() {
        let managed = ActiveMount::new(vec![], || {});
        let unmanaged = ActiveMount::unmanaged(vec![]);
        assert!(format!("{managed:?}").contains("managed: true"));
        assert!(format!("{unmanaged:?}").contains("managed: false"));
    }
}
