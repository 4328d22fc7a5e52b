//! Frame source seam. Camera adapters live outside this workspace.

use rollcall_core::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("frame read failed: {0}")]
    ReadFailed(String),
}

/// Which way the camera faces. User-facing frames are shown mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

impl FacingMode {
    pub fn is_mirrored(self) -> bool {
        self == FacingMode::User
    }
}

/// A live video source.
pub trait FrameSource: Send {
    /// Acquire the device. Failure is fatal to the session.
    fn start(&mut self) -> Result<(), SourceError>;

    fn is_playing(&self) -> bool;

    /// The frame currently on screen, if one has arrived yet.
    fn current_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    fn facing(&self) -> FacingMode {
        FacingMode::User
    }

    /// Stop the stream and release the device.
    fn release(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn start(&mut self) -> Result<(), SourceError> {
        (**self).start()
    }

    fn is_playing(&self) -> bool {
        (**self).is_playing()
    }

    fn current_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        (**self).current_frame()
    }

    fn facing(&self) -> FacingMode {
        (**self).facing()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
