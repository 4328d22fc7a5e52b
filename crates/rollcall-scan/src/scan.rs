//! Scan loop: one timer-driven detection cycle at a time, feeding either the
//! enrollment sequencer or the attendance resolver.
//!
//! A [`ScanSession`] owns all per-session state. It can be driven directly
//! with [`ScanSession::tick_at`] (replay, tests) or moved onto a tokio task
//! with [`ScanSession::spawn`], which returns a [`ScanHandle`] for commands
//! and teardown.

use crate::config::ScanConfig;
use crate::engine::{EngineError, EngineHandle};
use crate::events::{FaceOverlay, OverlayTone, ScanEvent};
use crate::index::SharedIndex;
use crate::source::{FrameSource, SourceError};
use chrono::NaiveDate;
use rollcall_core::{
    classify, AttendanceDecision, AttendanceResolver, AttendanceStatus, AttendanceStore,
    EnrollmentError, EnrollmentEvent, EnrollmentSequencer, Frame, IdentityAttributes,
    IdentityStore, Observation, SessionDedupState, StoreError,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error("operation requires {0} mode")]
    WrongMode(ScanMode),
    #[error("no frame has been processed yet")]
    NoFrame,
    #[error("scan loop is not running")]
    Stopped,
    #[error("scan task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Enrollment,
    Attendance,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Enrollment => f.write_str("enrollment"),
            ScanMode::Attendance => f.write_str("attendance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotPlaying,
    EngineUnavailable,
    /// Enrollment only.
    DialogOpen,
    NoFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Processed { faces: usize },
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct ScanContext {
    pub engine: EngineHandle,
    pub index: SharedIndex,
    pub identities: Arc<dyn IdentityStore>,
    pub attendance: Arc<dyn AttendanceStore>,
}

pub struct ScanSession {
    id: Uuid,
    mode: ScanMode,
    config: ScanConfig,
    ctx: ScanContext,
    source: Box<dyn FrameSource>,
    events: mpsc::UnboundedSender<ScanEvent>,
    sequencer: EnrollmentSequencer,
    dedup: SessionDedupState,
    resolver: AttendanceResolver,
    dialog_open: bool,
    last_frame: Option<Arc<Frame>>,
    date: Option<NaiveDate>,
}

impl ScanSession {
    pub fn new(
        mode: ScanMode,
        ctx: ScanContext,
        source: Box<dyn FrameSource>,
        config: ScanConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let sequencer = EnrollmentSequencer::new(config.enrollment.clone())
            .with_mirrored_captures(source.facing().is_mirrored());
        let session = Self {
            id: Uuid::new_v4(),
            mode,
            dedup: SessionDedupState::new(config.in_flight_cooldown),
            resolver: AttendanceResolver::new(config.attendance_threshold),
            config,
            ctx,
            source,
            events,
            sequencer,
            dialog_open: false,
            last_frame: None,
            date: None,
        };
        (session, rx)
    }

    /// Mark attendance against a fixed date instead of today.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn sequencer(&self) -> &EnrollmentSequencer {
        &self.sequencer
    }

    pub fn dedup(&self) -> &SessionDedupState {
        &self.dedup
    }

    pub fn is_dialog_open(&self) -> bool {
        self.dialog_open
    }

    pub fn date(&self) -> NaiveDate {
        self.date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Acquire the frame source. In attendance mode, identities already
    /// marked present for the session date are preloaded into the dedup state.
    pub async fn start(&mut self) -> Result<(), ScanError> {
        if let Err(e) = self.source.start() {
            tracing::error!(session = %self.id, error = %e, "frame source unavailable");
            return Err(e.into());
        }

        if self.mode == ScanMode::Attendance {
            let date = self.date();
            match self.ctx.attendance.attendance_for_date(date).await {
                Ok(statuses) => {
                    let present = statuses
                        .into_iter()
                        .filter(|(_, status)| *status == AttendanceStatus::Present)
                        .map(|(label, _)| label);
                    self.dedup.seed_confirmed(present);
                }
                Err(e) => {
                    tracing::warn!(session = %self.id, error = %e, "could not load today's attendance");
                }
            }
        }

        tracing::info!(
            session = %self.id,
            mode = %self.mode,
            facing = ?self.source.facing(),
            already_present = self.dedup.confirmed_count(),
            "scan session started"
        );
        Ok(())
    }

    /// Run one detection cycle at the current time.
    pub async fn tick(&mut self) -> Result<TickOutcome, ScanError> {
        self.tick_at(tokio::time::Instant::now().into_std()).await
    }

    /// Run one detection cycle as of `now`.
    ///
    /// Detection failures are absorbed (treated as no face); only a lost
    /// engine thread is returned as an error.
    pub async fn tick_at(&mut self, now: Instant) -> Result<TickOutcome, ScanError> {
        if !self.source.is_playing() {
            return Ok(TickOutcome::Skipped(SkipReason::NotPlaying));
        }
        if !self.ctx.engine.is_ready() {
            return Ok(TickOutcome::Skipped(SkipReason::EngineUnavailable));
        }
        if self.mode == ScanMode::Enrollment && self.dialog_open {
            return Ok(TickOutcome::Skipped(SkipReason::DialogOpen));
        }

        let frame = match self.source.current_frame() {
            Ok(Some(frame)) => Arc::new(frame),
            Ok(None) => return Ok(TickOutcome::Skipped(SkipReason::NoFrame)),
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "frame read failed");
                return Ok(TickOutcome::Skipped(SkipReason::NoFrame));
            }
        };
        self.last_frame = Some(Arc::clone(&frame));

        match self.mode {
            ScanMode::Enrollment => self.enrollment_cycle(frame, now).await,
            ScanMode::Attendance => self.attendance_cycle(frame, now).await,
        }
    }

    async fn enrollment_cycle(
        &mut self,
        frame: Arc<Frame>,
        now: Instant,
    ) -> Result<TickOutcome, ScanError> {
        let detection = match self.ctx.engine.detect_face(Arc::clone(&frame)).await {
            Ok(detection) => detection,
            Err(EngineError::Detector(e)) => {
                tracing::debug!(session = %self.id, error = %e, "detection failed; treating as no face");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let index = self.ctx.index.snapshot();
        let face = detection.as_ref().map(|d| {
            let matched = index.best_match(&d.descriptor, self.config.enrollment_threshold);
            (d, matched, classify(&d.landmarks))
        });

        let overlay = face
            .iter()
            .map(|(d, matched, _)| match &matched.label {
                Some(label) => FaceOverlay {
                    bbox: d.bbox,
                    text: format!("Already enrolled: {label}"),
                    tone: OverlayTone::Present,
                },
                None => FaceOverlay {
                    bbox: d.bbox,
                    text: "New face".to_string(),
                    tone: OverlayTone::NewFace,
                },
            })
            .collect();
        self.emit(ScanEvent::Overlay(overlay));

        let observation = match &face {
            Some((_, matched, pose)) => Observation::Face {
                pose: *pose,
                known_as: matched.label.as_deref(),
            },
            None => Observation::NoFace,
        };

        if let Some(event) = self.sequencer.observe(observation, &frame, now) {
            tracing::trace!(session = %self.id, event = ?event, "enrollment");
            self.emit(ScanEvent::Enrollment(event));
        }

        Ok(TickOutcome::Processed {
            faces: usize::from(face.is_some()),
        })
    }

    async fn attendance_cycle(
        &mut self,
        frame: Arc<Frame>,
        now: Instant,
    ) -> Result<TickOutcome, ScanError> {
        let detections = match self.ctx.engine.detect_all_faces(frame).await {
            Ok(detections) => detections,
            Err(EngineError::Detector(e)) => {
                tracing::debug!(session = %self.id, error = %e, "detection failed; no faces this cycle");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let index = self.ctx.index.snapshot();
        let decisions = self.resolver.resolve(
            &index,
            detections.iter().map(|d| &d.descriptor),
            &mut self.dedup,
            now,
        );

        let overlay = detections
            .iter()
            .zip(&decisions)
            .map(|(d, decision)| {
                let (text, tone) = match decision {
                    AttendanceDecision::Unidentified { .. } => ("Unknown".to_string(), OverlayTone::Unknown),
                    AttendanceDecision::AlreadyPresent { label, .. } => {
                        (format!("{label} (Present)"), OverlayTone::Present)
                    }
                    AttendanceDecision::InFlight { label, .. }
                    | AttendanceDecision::MarkPresent { label, .. } => (label.clone(), OverlayTone::Recognized),
                };
                FaceOverlay { bbox: d.bbox, text, tone }
            })
            .collect();
        self.emit(ScanEvent::Overlay(overlay));

        for decision in decisions {
            if let AttendanceDecision::MarkPresent { label, distance } = decision {
                tracing::info!(session = %self.id, label = %label, distance, "recognized; marking present");
                self.spawn_mark(label);
            }
        }

        Ok(TickOutcome::Processed {
            faces: detections.len(),
        })
    }

    /// Issue the mark-present side effect without blocking the loop.
    /// Failure is reported, never retried; dedup state is left as is.
    fn spawn_mark(&self, label: String) {
        let store = Arc::clone(&self.ctx.attendance);
        let events = self.events.clone();
        let date = self.date();
        let session = self.id;
        tokio::spawn(async move {
            match store.mark_attendance(&label, date, AttendanceStatus::Present).await {
                Ok(()) => {
                    tracing::info!(session = %session, label = %label, %date, "attendance marked");
                    let _ = events.send(ScanEvent::AttendanceMarked { label, date });
                }
                Err(e) => {
                    tracing::warn!(session = %session, label = %label, error = %e, "attendance mark failed");
                    let _ = events.send(ScanEvent::AttendanceFailed {
                        label,
                        date,
                        error: e.to_string(),
                    });
                }
            }
        });
    }

    /// Capture the frame of the last observation for the current step.
    pub fn manual_capture(&mut self) -> Result<EnrollmentEvent, ScanError> {
        self.require(ScanMode::Enrollment)?;
        let frame = self.last_frame.clone().ok_or(ScanError::NoFrame)?;
        let event = self.sequencer.capture_now(&frame)?;
        tracing::info!(session = %self.id, event = ?event, "manual capture");
        self.emit(ScanEvent::Enrollment(event.clone()));
        Ok(event)
    }

    /// While open, enrollment cycles are skipped.
    pub fn set_dialog_open(&mut self, open: bool) {
        self.dialog_open = open;
    }

    /// Persist a completed enrollment and refresh the shared index.
    ///
    /// On failure the captures are kept so the save can be retried.
    pub async fn save_enrollment(
        &mut self,
        label: &str,
        attributes: IdentityAttributes,
    ) -> Result<usize, ScanError> {
        self.require(ScanMode::Enrollment)?;
        let request = self.sequencer.take_enrollment(label, attributes)?;
        let label = request.label.clone();
        let images = request.images.len();

        if let Err(e) = self.ctx.identities.create_or_append_identity(request).await {
            tracing::warn!(session = %self.id, label = %label, error = %e, "failed to save identity");
            self.emit(ScanEvent::SaveFailed {
                label,
                error: e.to_string(),
            });
            return Err(e.into());
        }

        tracing::info!(session = %self.id, label = %label, images, "identity saved");
        self.emit(ScanEvent::Saved { label, images });
        self.sequencer.reset();
        self.dialog_open = false;

        if let Err(e) = self
            .ctx
            .index
            .rebuild(&self.ctx.engine, self.ctx.identities.as_ref())
            .await
        {
            tracing::warn!(session = %self.id, error = %e, "index rebuild after save failed");
        }
        Ok(images)
    }

    /// Allow `label` to be marked again after a failed mark.
    pub fn retry_attendance(&mut self, label: &str) -> bool {
        self.dedup.forget(label)
    }

    /// Replace the frame source. Enrollment restarts from the first step;
    /// attendance dedup state is kept. Call [`start`](Self::start) again
    /// before resuming.
    pub fn switch_source(&mut self, source: Box<dyn FrameSource>) {
        self.source.release();
        self.source = source;
        self.sequencer = EnrollmentSequencer::new(self.config.enrollment.clone())
            .with_mirrored_captures(self.source.facing().is_mirrored());
        self.last_frame = None;
        tracing::info!(session = %self.id, facing = ?self.source.facing(), "frame source switched");
    }

    /// Change mode with fresh enrollment and attendance state.
    pub fn switch_mode(&mut self, mode: ScanMode) {
        self.mode = mode;
        self.sequencer.reset();
        self.dedup.clear();
        self.dialog_open = false;
        self.last_frame = None;
        tracing::info!(session = %self.id, mode = %mode, "scan mode switched");
    }

    /// Release the source and drop session state.
    pub fn end(mut self) {
        self.source.release();
        self.dedup.clear();
        tracing::info!(session = %self.id, "scan session ended");
    }

    /// Move the session onto a tokio task ticking at the mode's cadence.
    ///
    /// Call [`start`](Self::start) first; an unstarted source makes every
    /// tick skip.
    pub fn spawn(self) -> ScanHandle {
        let (commands, command_rx) = mpsc::channel(8);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(command_rx, shutdown_rx));
        ScanHandle {
            commands,
            shutdown,
            join,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ScanCommand>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> ScanSession {
        let mut ticker = tokio::time::interval(self.config.interval(self.mode));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                Some(command) = commands.recv() => self.handle(command).await,
                tick = ticker.tick() => {
                    let cycle = self.tick_at(tick.into_std());
                    tokio::select! {
                        biased;
                        // The pending detection is dropped; its reply goes nowhere.
                        _ = &mut shutdown => break,
                        outcome = cycle => match outcome {
                            Ok(TickOutcome::Skipped(reason)) => {
                                tracing::trace!(session = %self.id, ?reason, "cycle skipped");
                            }
                            Ok(TickOutcome::Processed { .. }) => {}
                            Err(e) => {
                                tracing::warn!(session = %self.id, error = %e, "scan cycle failed");
                            }
                        },
                    }
                }
            }
        }

        // Commands accepted before shutdown are still applied.
        commands.close();
        while let Ok(command) = commands.try_recv() {
            self.handle(command).await;
        }

        self.source.release();
        tracing::info!(session = %self.id, "scan loop stopped");
        self
    }

    async fn handle(&mut self, command: ScanCommand) {
        match command {
            ScanCommand::ManualCapture { reply } => {
                let _ = reply.send(self.manual_capture());
            }
            ScanCommand::SetDialogOpen(open) => self.set_dialog_open(open),
            ScanCommand::SaveEnrollment {
                label,
                attributes,
                reply,
            } => {
                let result = self.save_enrollment(&label, attributes).await;
                let _ = reply.send(result);
            }
            ScanCommand::RetryAttendance { label } => {
                self.retry_attendance(&label);
            }
        }
    }

    fn require(&self, mode: ScanMode) -> Result<(), ScanError> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(ScanError::WrongMode(mode))
        }
    }

    fn emit(&self, event: ScanEvent) {
        let _ = self.events.send(event);
    }
}

enum ScanCommand {
    ManualCapture {
        reply: oneshot::Sender<Result<EnrollmentEvent, ScanError>>,
    },
    SetDialogOpen(bool),
    SaveEnrollment {
        label: String,
        attributes: IdentityAttributes,
        reply: oneshot::Sender<Result<usize, ScanError>>,
    },
    RetryAttendance {
        label: String,
    },
}

/// Handle to a running scan loop.
pub struct ScanHandle {
    commands: mpsc::Sender<ScanCommand>,
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<ScanSession>,
}

impl ScanHandle {
    pub async fn manual_capture(&self) -> Result<EnrollmentEvent, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanCommand::ManualCapture { reply }).await?;
        rx.await.map_err(|_| ScanError::Stopped)?
    }

    pub async fn set_dialog_open(&self, open: bool) -> Result<(), ScanError> {
        self.send(ScanCommand::SetDialogOpen(open)).await
    }

    pub async fn save_enrollment(
        &self,
        label: &str,
        attributes: IdentityAttributes,
    ) -> Result<usize, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanCommand::SaveEnrollment {
            label: label.to_string(),
            attributes,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ScanError::Stopped)?
    }

    pub async fn retry_attendance(&self, label: &str) -> Result<(), ScanError> {
        self.send(ScanCommand::RetryAttendance {
            label: label.to_string(),
        })
        .await
    }

    /// Stop ticking, release the frame source and hand the session back.
    pub async fn stop(self) -> Result<ScanSession, ScanError> {
        let _ = self.shutdown.send(());
        self.join.await.map_err(|e| ScanError::Task(e.to_string()))
    }

    async fn send(&self, command: ScanCommand) -> Result<(), ScanError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ScanError::Stopped)
    }
}
