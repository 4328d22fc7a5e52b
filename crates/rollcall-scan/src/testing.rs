//! Test doubles shared by the scan crate's unit tests.

use crate::source::{FacingMode, FrameSource, SourceError};
use async_trait::async_trait;
use chrono::NaiveDate;
use rollcall_core::{
    AttendanceStatus, AttendanceStore, BoundingBox, Descriptor, Detection, DetectorError,
    FaceEngine, Frame, Identity, IdentityAttributes, IdentityStore, Landmarks, NewEnrollment,
    Point, Pose, StoreError,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Frame encoding understood by [`PixelEngine`]: one RGB pixel per face,
/// `(identity tag, pose code, 0)`. Tag 0 is no face; tag 255 makes the
/// engine fail. A face with tag `n` gets descriptor `[n, 0]`.
pub(crate) fn frame_of(faces: &[(u8, Pose)]) -> Frame {
    let mut pixels: Vec<u8> = faces
        .iter()
        .flat_map(|&(tag, pose)| [tag, pose_code(pose), 0])
        .collect();
    if pixels.is_empty() {
        pixels = vec![0, 0, 0];
    }
    let width = (pixels.len() / 3) as u32;
    Frame::from_rgb(pixels, width, 1, 0).unwrap()
}

fn pose_code(pose: Pose) -> u8 {
    match pose {
        Pose::Front => 0,
        Pose::Left => 1,
        Pose::Right => 2,
        Pose::Up => 3,
        Pose::Down => 4,
        Pose::JawLeft => 5,
        Pose::JawRight => 6,
        Pose::Unknown => 7,
    }
}

/// Eyes at (0,0) and (100,0); the nose offset encodes yaw and pitch.
fn landmarks_for(code: u8) -> Landmarks {
    let (yaw, pitch) = match code {
        0 => (0.0, 0.15),
        1 => (0.30, 0.15),
        2 => (-0.30, 0.15),
        3 => (0.0, -0.20),
        4 => (0.0, 0.50),
        5 => (0.18, 0.15),
        6 => (-0.18, 0.15),
        _ => (0.0, 0.45),
    };
    Landmarks::new(
        Point::new(0.0, 0.0),
        Point::new(100.0, 0.0),
        Point::new(50.0 + yaw * 100.0, pitch * 100.0),
    )
}

pub(crate) fn descriptor(tag: u8) -> Descriptor {
    Descriptor::new(vec![tag as f32, 0.0])
}

pub(crate) struct PixelEngine;

impl FaceEngine for PixelEngine {
    fn detect_face(&mut self, frame: &Frame) -> Result<Option<Detection>, DetectorError> {
        Ok(self.detect_all_faces(frame)?.into_iter().next())
    }

    fn detect_all_faces(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let mut faces = Vec::new();
        for (i, px) in frame.pixels.chunks_exact(3).enumerate() {
            match px[0] {
                0 => {}
                255 => return Err(DetectorError::InferenceFailed("synthetic failure".into())),
                tag => faces.push(Detection {
                    bbox: BoundingBox {
                        x: i as f32 * 100.0,
                        y: 0.0,
                        width: 80.0,
                        height: 80.0,
                        confidence: 0.9,
                    },
                    landmarks: landmarks_for(px[1]),
                    descriptor: descriptor(tag),
                }),
            }
        }
        Ok(faces)
    }
}

/// Scripted frame source: plays queued frames, repeating the last one.
pub(crate) struct ScriptedSource {
    frames: VecDeque<Frame>,
    last: Option<Frame>,
    playing: bool,
    facing: FacingMode,
    fail_start: bool,
    pub(crate) released: Arc<Mutex<bool>>,
}

impl ScriptedSource {
    pub(crate) fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            last: None,
            playing: false,
            facing: FacingMode::Environment,
            fail_start: false,
            released: Arc::new(Mutex::new(false)),
        }
    }

    pub(crate) fn facing_user(mut self) -> Self {
        self.facing = FacingMode::User;
        self
    }

    pub(crate) fn unavailable() -> Self {
        let mut source = Self::new(Vec::<Frame>::new());
        source.fail_start = true;
        source
    }

    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }
}

impl FrameSource for ScriptedSource {
    fn start(&mut self) -> Result<(), SourceError> {
        if self.fail_start {
            return Err(SourceError::PermissionDenied("camera access denied".into()));
        }
        self.playing = true;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn current_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if let Some(next) = self.frames.pop_front() {
            self.last = Some(next);
        }
        Ok(self.last.clone())
    }

    fn facing(&self) -> FacingMode {
        self.facing
    }

    fn release(&mut self) {
        self.playing = false;
        if let Ok(mut released) = self.released.lock() {
            *released = true;
        }
    }
}

/// In-memory identity and attendance store with failure switches.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) identities: Mutex<Vec<Identity>>,
    pub(crate) marks: Mutex<Vec<(String, NaiveDate, AttendanceStatus)>>,
    pub(crate) fail_saves: Mutex<bool>,
    pub(crate) fail_marks: Mutex<bool>,
    /// When set, marks wait on this before completing.
    pub(crate) mark_gate: Option<Arc<Notify>>,
}

impl MemoryStore {
    pub(crate) fn with_identity(self, label: &str, tag: u8) -> Self {
        self.identities.lock().unwrap().push(Identity {
            label: label.into(),
            attributes: IdentityAttributes::default(),
            images: vec![frame_of(&[(tag, Pose::Front)])],
        });
        self
    }

    pub(crate) fn mark_count(&self, label: &str) -> usize {
        self.marks
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _, _)| l == label)
            .count()
    }
}

fn backend(msg: &str) -> StoreError {
    StoreError::Backend(msg.to_string().into())
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.identities.lock().unwrap().clone())
    }

    async fn create_or_append_identity(&self, enrollment: NewEnrollment) -> Result<(), StoreError> {
        if *self.fail_saves.lock().unwrap() {
            return Err(backend("disk full"));
        }
        let mut identities = self.identities.lock().unwrap();
        match identities.iter_mut().find(|i| i.label == enrollment.label) {
            Some(existing) => {
                existing.attributes = enrollment.attributes;
                existing.images.extend(enrollment.images);
            }
            None => identities.push(Identity {
                label: enrollment.label,
                attributes: enrollment.attributes,
                images: enrollment.images,
            }),
        }
        Ok(())
    }

    async fn update_identity(
        &self,
        label: &str,
        attributes: IdentityAttributes,
    ) -> Result<(), StoreError> {
        let mut identities = self.identities.lock().unwrap();
        let identity = identities
            .iter_mut()
            .find(|i| i.label == label)
            .ok_or_else(|| StoreError::NotFound(label.into()))?;
        identity.attributes = attributes;
        Ok(())
    }

    async fn rename_identity(&self, label: &str, new_label: &str) -> Result<(), StoreError> {
        let mut identities = self.identities.lock().unwrap();
        let identity = identities
            .iter_mut()
            .find(|i| i.label == label)
            .ok_or_else(|| StoreError::NotFound(label.into()))?;
        identity.label = new_label.into();
        Ok(())
    }

    async fn delete_identity(&self, label: &str) -> Result<(), StoreError> {
        let mut identities = self.identities.lock().unwrap();
        let before = identities.len();
        identities.retain(|i| i.label != label);
        if identities.len() == before {
            return Err(StoreError::NotFound(label.into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    async fn mark_attendance(
        &self,
        label: &str,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> Result<(), StoreError> {
        if let Some(gate) = &self.mark_gate {
            gate.notified().await;
        }
        if *self.fail_marks.lock().unwrap() {
            return Err(backend("attendance service unavailable"));
        }
        self.marks.lock().unwrap().push((label.into(), date, status));
        Ok(())
    }

    async fn attendance_status(
        &self,
        label: &str,
        date: NaiveDate,
    ) -> Result<AttendanceStatus, StoreError> {
        Ok(self
            .marks
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(l, d, _)| l == label && *d == date)
            .map(|(_, _, s)| *s)
            .unwrap_or(AttendanceStatus::Absent))
    }

    async fn attendance_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, AttendanceStatus>, StoreError> {
        let mut out = BTreeMap::new();
        for identity in self.identities.lock().unwrap().iter() {
            out.insert(identity.label.clone(), AttendanceStatus::Absent);
        }
        let recorded: HashMap<String, AttendanceStatus> = self
            .marks
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, d, _)| *d == date)
            .map(|(l, _, s)| (l.clone(), *s))
            .collect();
        out.extend(recorded);
        Ok(out)
    }

    async fn attendance_history(
        &self,
        label: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, AttendanceStatus)>, StoreError> {
        let mut out = Vec::new();
        for day in from.iter_days().take_while(|d| *d <= to) {
            out.push((day, self.attendance_status(label, day).await?));
        }
        Ok(out)
    }
}
