use rollcall_core::{Detection, DetectorError, FaceEngine, Frame, Identity, IdentityIndex};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("engine failed to load: {0}")]
    LoadFailed(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Engine readiness, published once by the engine thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Loading,
    Ready,
    Failed(String),
}

/// Messages sent from scan sessions to the engine thread.
enum EngineRequest {
    DetectFace {
        frame: Arc<Frame>,
        reply: oneshot::Sender<Result<Option<Detection>, DetectorError>>,
    },
    DetectAll {
        frame: Arc<Frame>,
        reply: oneshot::Sender<Result<Vec<Detection>, DetectorError>>,
    },
    BuildIndex {
        identities: Vec<Identity>,
        reply: oneshot::Sender<IdentityIndex>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    state: watch::Receiver<EngineState>,
}

impl EngineHandle {
    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), EngineState::Ready)
    }

    /// Resolves once the loader has finished, successfully or not.
    pub async fn ready(&self) -> Result<(), EngineError> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| !matches!(s, EngineState::Loading))
            .await
            .map_err(|_| EngineError::ChannelClosed)?
            .clone();
        match settled {
            EngineState::Failed(reason) => Err(EngineError::LoadFailed(reason)),
            _ => Ok(()),
        }
    }

    /// Single-face detection.
    pub async fn detect_face(&self, frame: Arc<Frame>) -> Result<Option<Detection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::DetectFace {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Multi-face detection.
    pub async fn detect_all_faces(&self, frame: Arc<Frame>) -> Result<Vec<Detection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::DetectAll {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Build a complete index from stored identities on the engine thread.
    pub async fn build_index(&self, identities: Vec<Identity>) -> Result<IdentityIndex, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::BuildIndex {
                identities,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the face engine on a dedicated OS thread.
///
/// `loader` runs on that thread, so slow model loading never blocks the
/// caller. Readiness is published through [`EngineHandle::ready`]; requests
/// sent before the loader finishes queue until it does. If loading fails the
/// thread exits and every later request fails with `ChannelClosed`.
pub fn spawn_engine<E, F>(loader: F) -> Result<EngineHandle, EngineError>
where
    E: FaceEngine,
    F: FnOnce() -> Result<E, DetectorError> + Send + 'static,
{
    let (state_tx, state_rx) = watch::channel(EngineState::Loading);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut engine = match loader() {
                Ok(engine) => {
                    tracing::info!("face engine loaded");
                    state_tx.send_replace(EngineState::Ready);
                    engine
                }
                Err(e) => {
                    tracing::error!(error = %e, "face engine failed to load");
                    state_tx.send_replace(EngineState::Failed(e.to_string()));
                    return;
                }
            };

            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::DetectFace { frame, reply } => {
                        let _ = reply.send(engine.detect_face(&frame));
                    }
                    EngineRequest::DetectAll { frame, reply } => {
                        let _ = reply.send(engine.detect_all_faces(&frame));
                    }
                    EngineRequest::BuildIndex { identities, reply } => {
                        let _ = reply.send(IdentityIndex::build(&mut engine, &identities));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, state: state_rx })
}
