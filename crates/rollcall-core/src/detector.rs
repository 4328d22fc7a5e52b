//! Detection engine seam.
//!
//! The face engine (detector + landmark model + descriptor network) is an
//! external capability. Implementations run on a single dedicated thread and
//! take `&mut self`, the way inference sessions usually do.

use crate::frame::Frame;
use crate::types::Detection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("engine not loaded: {0}")]
    NotLoaded(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),
}

/// Face detection, landmark extraction and descriptor generation.
///
/// Both calls must be idempotent and free of side effects.
pub trait FaceEngine: Send + 'static {
    /// Single-face mode: the most confident face, if any.
    fn detect_face(&mut self, frame: &Frame) -> Result<Option<Detection>, DetectorError>;

    /// Multi-face mode: every face in the frame.
    fn detect_all_faces(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

impl<E: FaceEngine + ?Sized> FaceEngine for Box<E> {
    fn detect_face(&mut self, frame: &Frame) -> Result<Option<Detection>, DetectorError> {
        (**self).detect_face(frame)
    }

    fn detect_all_faces(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        (**self).detect_all_faces(frame)
    }
}
