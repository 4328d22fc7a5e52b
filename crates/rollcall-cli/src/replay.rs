//! Replay of recorded detection streams through the scan loop.
//!
//! A recording is JSON lines, one array of detections per sampled frame.
//! Each replayed frame carries its detections as JSON in its pixel data, so
//! images captured during an enrollment replay can be re-detected when the
//! identity index is rebuilt later.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use rollcall_core::{
    AttendanceStore, Detection, DetectorError, EnrollmentEvent, FaceEngine, Frame,
    IdentityAttributes, IdentityStore,
};
use rollcall_scan::{
    spawn_engine, FacingMode, FrameSource, ScanConfig, ScanContext, ScanEvent, ScanMode,
    ScanSession, SharedIndex, SourceError, TickOutcome,
};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

pub struct Recording {
    frames: Vec<Vec<Detection>>,
}

impl Recording {
    pub fn parse(src: &str) -> Result<Self> {
        let mut frames = Vec::new();
        for (i, line) in src.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let detections: Vec<Detection> = serde_json::from_str(line)
                .with_context(|| format!("line {}: expected a JSON array of detections", i + 1))?;
            frames.push(detections);
        }
        Ok(Self { frames })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read recording {}", path.display()))?;
        Self::parse(&src)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Pack detections into a 1-pixel-high frame, NUL padded.
fn stamp(detections: &[Detection], sequence: u64) -> Result<Frame> {
    let mut bytes = serde_json::to_vec(detections)?;
    let width = bytes.len().div_ceil(3).max(1);
    bytes.resize(width * 3, 0);
    Ok(Frame::from_rgb(bytes, width as u32, 1, sequence)?)
}

fn unstamp(frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
    let end = frame
        .pixels
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    if end == 0 {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&frame.pixels[..end])
        .map_err(|e| DetectorError::UnsupportedFrame(format!("not a recorded frame: {e}")))
}

/// Face engine that reads back the detections stamped into a frame.
pub struct RecordedEngine;

impl FaceEngine for RecordedEngine {
    fn detect_face(&mut self, frame: &Frame) -> Result<Option<Detection>, DetectorError> {
        Ok(unstamp(frame)?
            .into_iter()
            .max_by(|a, b| a.bbox.confidence.total_cmp(&b.bbox.confidence)))
    }

    fn detect_all_faces(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        unstamp(frame)
    }
}

pub struct ReplaySource {
    frames: VecDeque<Frame>,
    playing: bool,
}

impl ReplaySource {
    pub fn new(recording: &Recording) -> Result<Self> {
        let frames = recording
            .frames
            .iter()
            .enumerate()
            .map(|(i, detections)| stamp(detections, i as u64))
            .collect::<Result<_>>()?;
        Ok(Self {
            frames,
            playing: false,
        })
    }
}

impl FrameSource for ReplaySource {
    fn start(&mut self) -> Result<(), SourceError> {
        self.playing = true;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn current_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(self.frames.pop_front())
    }

    // Recordings are stored as the camera saw them.
    fn facing(&self) -> FacingMode {
        FacingMode::Environment
    }

    fn release(&mut self) {
        self.playing = false;
        self.frames.clear();
    }
}

pub struct ReplayOptions {
    pub mode: ScanMode,
    /// Label and attributes to save a completed enrollment under.
    pub enroll_as: Option<(String, IdentityAttributes)>,
    pub date: Option<NaiveDate>,
    pub verbose: bool,
}

#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub frames: usize,
    pub processed: usize,
    pub captures: usize,
    pub saved: Option<String>,
    pub marked: Vec<String>,
    pub failures: usize,
}

/// Drive a scan session over `recording` at the configured cadence.
pub async fn replay<S, W>(
    recording: &Recording,
    store: Arc<S>,
    config: ScanConfig,
    options: ReplayOptions,
    out: &mut W,
) -> Result<ReplaySummary>
where
    S: IdentityStore + AttendanceStore + 'static,
    W: Write,
{
    let engine = spawn_engine(|| Ok(RecordedEngine))?;
    engine.ready().await?;
    let index = SharedIndex::default();
    let indexed = index.rebuild(&engine, store.as_ref()).await?;
    tracing::info!(frames = recording.len(), indexed, mode = %options.mode, "replay starting");

    let ctx = ScanContext {
        engine,
        index,
        identities: store.clone(),
        attendance: store,
    };
    let interval = config.interval(options.mode);
    let source = ReplaySource::new(recording)?;
    let (mut session, mut events) = ScanSession::new(options.mode, ctx, Box::new(source), config);
    if let Some(date) = options.date {
        session = session.with_date(date);
    }
    session.start().await?;

    let mut summary = ReplaySummary {
        frames: recording.len(),
        ..ReplaySummary::default()
    };
    let t0 = Instant::now();
    for i in 0..recording.len() {
        let at = t0 + interval * i as u32;
        if let TickOutcome::Processed { .. } = session.tick_at(at).await? {
            summary.processed += 1;
        }
        while let Ok(event) = events.try_recv() {
            report(&event, &mut summary, options.verbose, out)?;
        }
    }

    if let Some((label, attributes)) = options.enroll_as {
        let sequencer = session.sequencer();
        if !sequencer.is_complete() {
            bail!(
                "enrollment incomplete: {}/{} poses captured",
                sequencer.captured().len(),
                sequencer.total_steps()
            );
        }
        session.save_enrollment(&label, attributes).await?;
    }

    // Closing the session drops its sender; pending marks hold the rest.
    session.end();
    while let Some(event) = events.recv().await {
        report(&event, &mut summary, options.verbose, out)?;
    }
    Ok(summary)
}

fn report<W: Write>(
    event: &ScanEvent,
    summary: &mut ReplaySummary,
    verbose: bool,
    out: &mut W,
) -> Result<()> {
    let line = match event {
        ScanEvent::Overlay(boxes) => verbose.then(|| {
            let faces: Vec<String> = boxes
                .iter()
                .map(|b| format!("{} {}", b.text, b.tone))
                .collect();
            format!("faces: [{}]", faces.join(", "))
        }),
        ScanEvent::Enrollment(e) => match e {
            EnrollmentEvent::AlreadyEnrolled { label } => {
                Some(format!("face already enrolled as {label}"))
            }
            EnrollmentEvent::Countdown {
                step,
                pose,
                remaining_secs,
            } => verbose.then(|| format!("step {}: hold {pose} ({remaining_secs}s)", step + 1)),
            EnrollmentEvent::Instruction { step, text, .. } => {
                verbose.then(|| format!("step {}: {text}", step + 1))
            }
            EnrollmentEvent::Captured {
                pose,
                captured,
                total,
                ..
            } => {
                summary.captures += 1;
                Some(format!("captured {pose} ({captured}/{total})"))
            }
            EnrollmentEvent::ReadyToSave { images } => {
                summary.captures += 1;
                Some(format!("all {images} poses captured"))
            }
        },
        ScanEvent::AttendanceMarked { label, date } => {
            summary.marked.push(label.clone());
            Some(format!("marked {label} present on {date}"))
        }
        ScanEvent::AttendanceFailed { label, error, .. } => {
            summary.failures += 1;
            Some(format!("failed to mark {label}: {error}"))
        }
        ScanEvent::Saved { label, images } => {
            summary.saved = Some(label.clone());
            Some(format!("saved {label} ({images} images)"))
        }
        ScanEvent::SaveFailed { label, error } => {
            summary.failures += 1;
            Some(format!("failed to save {label}: {error}"))
        }
    };
    if let Some(line) = line {
        writeln!(out, "{line}")?;
    }
    Ok(())
}
