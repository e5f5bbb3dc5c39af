//! The overlay-filesystem fast path and the policy deciding when to use it.
//!
//! Snapshotters that expose genuine overlay mounts allow a diff to be read
//! directly from the overlay upperdir instead of walking both mount sets.
//! Whether the fast path is attempted -- and whether its failure may fall
//! back to the generic differ -- depends on an explicit override, on the
//! platform, and on an injectable table describing which snapshotter
//! drivers produce overlay mounts.

use std::collections::HashMap;

use async_trait::async_trait;

use strata_types::Descriptor;

use crate::compress::Compressor;
use crate::error::{DiffError, DiffResult};
use crate::mount::Mount;

/// Environment variable forcing the overlay fast path on or off. When set,
/// fallback to the generic differ is disabled: a fast-path failure is fatal.
pub const FORCE_OVERLAY_DIFF_ENV: &str = "STRATA_FORCE_OVERLAY_DIFF";

/// Result of an attempted overlay fast-path computation.
#[derive(Debug)]
pub enum OverlayOutcome {
    /// The fast path produced a blob.
    Computed(Descriptor),
    /// The mounts were not of the expected overlay shape; nothing was
    /// computed.
    NotApplicable,
}

/// The overlay fast-path collaborator.
#[async_trait]
pub trait OverlayDiffer: Send + Sync {
    /// Attempt to compute a blob directly from overlay mounts. Returns
    /// [`OverlayOutcome::NotApplicable`] when the mounts are not
    /// overlay-shaped; errors only when an overlay computation was actually
    /// attempted and failed.
    async fn try_compute_overlay_blob(
        &self,
        lower: &[Mount],
        upper: &[Mount],
        media_type: &str,
        reference: &str,
        compressor: Option<Compressor>,
    ) -> DiffResult<OverlayOutcome>;
}

/// Whether a snapshotter driver produces mounts the overlay differ
/// understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlaySupport {
    /// The driver produces genuine overlay mounts; a fast-path failure is
    /// unexpected and worth a warning before falling back.
    Supported,
    /// The driver does not produce overlay mounts; the generic differ is
    /// used outright, no fallback dance needed.
    Unsupported,
}

/// Injectable mapping from snapshotter driver name to overlay support.
///
/// Driver capabilities are environment-specific; installations with unusual
/// snapshotters extend or replace the default table instead of patching
/// policy logic.
#[derive(Clone, Debug)]
pub struct OverlaySupportTable {
    drivers: HashMap<String, OverlaySupport>,
}

impl OverlaySupportTable {
    /// An empty table: every driver is treated as unclassified.
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Builder-style driver classification.
    pub fn with_driver(mut self, name: impl Into<String>, support: OverlaySupport) -> Self {
        self.drivers.insert(name.into(), support);
        self
    }

    /// Classification for a driver, if the table has one.
    pub fn support_for(&self, name: &str) -> Option<OverlaySupport> {
        self.drivers.get(name).copied()
    }
}

impl Default for OverlaySupportTable {
    /// The stock classification: `overlayfs` and `stargz` produce overlay
    /// mounts; `fuse-overlayfs` and `native` do not.
    fn default() -> Self {
        Self::empty()
            .with_driver("overlayfs", OverlaySupport::Supported)
            .with_driver("stargz", OverlaySupport::Supported)
            .with_driver("fuse-overlayfs", OverlaySupport::Unsupported)
            .with_driver("native", OverlaySupport::Unsupported)
    }
}

/// Resolved fast-path policy for one materialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayPolicy {
    /// Attempt the overlay fast path at all.
    pub enabled: bool,
    /// Whether a fast-path failure may fall back to the generic differ.
    /// `false` makes any fast-path failure fatal.
    pub fallback: bool,
    /// Log a warning when the fast path fails and fallback is taken.
    pub warn_on_failure: bool,
}

/// Decide the overlay fast-path policy.
///
/// An explicit override wins and prohibits fallback. Windows layer content
/// never takes the fast path. Otherwise the fast path is enabled with
/// fallback, refined by the driver table: supported drivers warn on
/// failure, unsupported drivers skip the fast path entirely, unclassified
/// drivers try it quietly.
pub fn resolve_overlay_policy(
    override_enabled: Option<bool>,
    windows: bool,
    snapshotter: &str,
    table: &OverlaySupportTable,
) -> OverlayPolicy {
    if let Some(enabled) = override_enabled {
        return OverlayPolicy {
            enabled,
            fallback: false,
            warn_on_failure: false,
        };
    }
    if windows {
        return OverlayPolicy {
            enabled: false,
            fallback: false,
            warn_on_failure: false,
        };
    }
    let mut policy = OverlayPolicy {
        enabled: true,
        fallback: true,
        warn_on_failure: false,
    };
    match table.support_for(snapshotter) {
        Some(OverlaySupport::Supported) => policy.warn_on_failure = true,
        Some(OverlaySupport::Unsupported) => policy.enabled = false,
        None => {}
    }
    policy
}

/// Parse an overlay override value: `1`/`true`/`on` force the fast path,
/// `0`/`false`/`off` forbid it (case-insensitive).
pub fn parse_overlay_override(value: Option<&str>) -> DiffResult<Option<bool>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "f" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(DiffError::InvalidOverlayOverride(raw.to_string())),
    }
}

/// Read the overlay override from [`FORCE_OVERLAY_DIFF_ENV`].
pub fn overlay_override_from_env() -> DiffResult<Option<bool>> {
    match std::env::var(FORCE_OVERLAY_DIFF_ENV) {
        Ok(value) => parse_overlay_override(Some(&value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(DiffError::InvalidOverlayOverride(err.to_string())),
    }
}
