//! rollcall-scan: runs the scan loop against a live frame source.
//!
//! The face engine lives on its own OS thread behind [`EngineHandle`];
//! sessions share one [`SharedIndex`] and talk to persistence through the
//! store traits in `rollcall-core`.

pub mod config;
pub mod engine;
pub mod events;
pub mod index;
pub mod scan;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ScanConfig;
pub use engine::{spawn_engine, EngineError, EngineHandle, EngineState};
pub use events::{FaceOverlay, OverlayTone, ScanEvent};
pub use index::{RebuildError, SharedIndex};
pub use scan::{ScanContext, ScanError, ScanHandle, ScanMode, ScanSession, SkipReason, TickOutcome};
pub use source::{FacingMode, FrameSource, SourceError};
