//! Differencing boundary for the Strata layer-materialization engine.
//!
//! The actual diff/mount subsystem is an external collaborator; this crate
//! owns the interface to it and the policy around it:
//!
//! - [`Mount`], [`MountProvider`], [`MountHandle`], [`ActiveMount`] -- the
//!   mount model, with RAII release on every exit path
//! - [`Differ`] + [`DiffOptions`] -- the generic diff computation
//! - [`OverlayDiffer`] + [`OverlayOutcome`] -- the filesystem-specific fast
//!   path, with [`resolve_overlay_policy`] deciding when to attempt it and
//!   whether a failure may fall back to the generic path
//! - [`Compressor`] plus the zstd and eStargz streaming compressors, and the
//!   eStargz finalize step that surfaces the TOC digest as a descriptor
//!   annotation

pub mod compress;
pub mod differ;
pub mod error;
pub mod mount;
pub mod overlay;

// Re-export primary types at crate root for ergonomic imports.
pub use compress::{
    estargz_compressor, finalize_estargz, zstd_compressor, Compressor, ESTARGZ_TOC_LABEL,
};
pub use differ::{DiffOptions, Differ};
pub use error::{DiffError, DiffResult};
pub use mount::{ActiveMount, Mount, MountHandle, MountProvider};
pub use overlay::{
    overlay_override_from_env, parse_overlay_override, resolve_overlay_policy, OverlayDiffer,
    OverlayOutcome, OverlayPolicy, OverlaySupport, OverlaySupportTable, FORCE_OVERLAY_DIFF_ENV,
};
