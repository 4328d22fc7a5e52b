//! Labelled descriptors and nearest-neighbour matching.

use crate::detector::FaceEngine;
use crate::records::Identity;
use crate::types::Descriptor;
use std::fmt;

/// Stricter threshold used while enrolling (is this face already known?).
pub const ENROLLMENT_MATCH_THRESHOLD: f32 = 0.5;
/// Looser threshold used for attendance, where pose variety widens each class.
pub const ATTENDANCE_MATCH_THRESHOLD: f32 = 0.6;

/// All usable descriptors for one label.
#[derive(Debug, Clone)]
pub struct LabeledDescriptors {
    pub label: String,
    pub descriptors: Vec<Descriptor>,
}

/// Point-in-time snapshot of enrolled identities. Never contains a label
/// without at least one descriptor.
#[derive(Debug, Clone, Default)]
pub struct IdentityIndex {
    entries: Vec<LabeledDescriptors>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from precomputed descriptor sets, dropping empty ones.
    pub fn from_labeled(entries: impl IntoIterator<Item = LabeledDescriptors>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .filter(|e| !e.descriptors.is_empty())
                .collect(),
        }
    }

    /// Run single-face detection on every stored image and collect descriptors.
    ///
    /// Images without a detectable face are skipped. An identity with no
    /// usable image is left out of the index entirely.
    pub fn build<E: FaceEngine + ?Sized>(engine: &mut E, identities: &[Identity]) -> Self {
        let mut entries = Vec::with_capacity(identities.len());

        for identity in identities {
            let mut descriptors = Vec::with_capacity(identity.images.len());
            for (i, image) in identity.images.iter().enumerate() {
                match engine.detect_face(image) {
                    Ok(Some(detection)) => descriptors.push(detection.descriptor),
                    Ok(None) => {
                        tracing::warn!(label = %identity.label, image = i, "no face in stored image; skipping");
                    }
                    Err(e) => {
                        tracing::warn!(label = %identity.label, image = i, error = %e, "detection failed on stored image; skipping");
                    }
                }
            }

            if descriptors.is_empty() {
                tracing::warn!(label = %identity.label, "identity has no usable images; not matchable");
                continue;
            }

            tracing::debug!(label = %identity.label, descriptors = descriptors.len(), "indexed identity");
            entries.push(LabeledDescriptors {
                label: identity.label.clone(),
                descriptors,
            });
        }

        tracing::info!(
            identities = identities.len(),
            indexed = entries.len(),
            "identity index built"
        );

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of matchable labels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|e| e.label == label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }

    pub fn entries(&self) -> &[LabeledDescriptors] {
        &self.entries
    }

    /// Match with the default [`EuclideanMatcher`].
    pub fn best_match(&self, probe: &Descriptor, threshold: f32) -> MatchResult {
        EuclideanMatcher.compare(probe, self, threshold)
    }
}

/// Result of matching a probe descriptor against the index.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched label, or `None` for "unknown".
    pub label: Option<String>,
    /// Distance to the closest descriptor (infinite for an empty index).
    pub distance: f32,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self {
            label: None,
            distance,
        }
    }

    pub fn is_known(&self) -> bool {
        self.label.is_some()
    }

    pub fn label_or_unknown(&self) -> &str {
        self.label.as_deref().unwrap_or("unknown")
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.distance.is_finite() {
            write!(f, "{} ({:.2})", self.label_or_unknown(), self.distance)
        } else {
            f.write_str(self.label_or_unknown())
        }
    }
}

/// Strategy for comparing a probe descriptor against the index.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, index: &IdentityIndex, threshold: f32) -> MatchResult;
}

/// Nearest neighbour over every (label, descriptor) pair by Euclidean
/// distance; a match requires `distance <= threshold`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Descriptor, index: &IdentityIndex, threshold: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_label: Option<&str> = None;

        for entry in &index.entries {
            for descriptor in &entry.descriptors {
                let dist = probe.distance(descriptor);
                if dist < best_dist {
                    best_dist = dist;
                    best_label = Some(entry.label.as_str());
                }
            }
        }

        match best_label {
            Some(label) if best_dist <= threshold => MatchResult {
                label: Some(label.to_string()),
                distance: best_dist,
            },
            _ => MatchResult::unknown(best_dist),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use crate::frame::Frame;
    use crate::records::IdentityAttributes;
    use crate::types::{BoundingBox, Detection, Landmarks};
    use std::collections::HashMap;

    fn labeled(label: &str, descriptors: &[&[f32]]) -> LabeledDescriptors {
        LabeledDescriptors {
            label: label.into(),
            descriptors: descriptors.iter().map(|d| Descriptor::new(d.to_vec())).collect(),
        }
    }

    fn image(tag: u8) -> Frame {
        Frame::from_rgb(vec![tag; 3], 1, 1, 0).unwrap()
    }

    /// Engine keyed by the first pixel byte of the image.
    struct TaggedEngine {
        faces: HashMap<u8, Vec<f32>>,
        fail: Vec<u8>,
    }

    impl FaceEngine for TaggedEngine {
        fn detect_face(&mut self, frame: &Frame) -> Result<Option<Detection>, DetectorError> {
            let tag = frame.pixels[0];
            if self.fail.contains(&tag) {
                return Err(DetectorError::InferenceFailed("boom".into()));
            }
            Ok(self.faces.get(&tag).map(|d| Detection {
                bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 0.9 },
                landmarks: Landmarks::default(),
                descriptor: Descriptor::new(d.clone()),
            }))
        }

        fn detect_all_faces(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.detect_face(frame)?.into_iter().collect())
        }
    }

    fn identity(label: &str, tags: &[u8]) -> Identity {
        Identity {
            label: label.into(),
            attributes: IdentityAttributes::default(),
            images: tags.iter().map(|&t| image(t)).collect(),
        }
    }

    #[test]
    fn test_nearest_descriptor_wins() {
        let index = IdentityIndex::from_labeled([
            labeled("alice", &[&[0.0, 0.0], &[1.0, 1.0]]),
            labeled("bob", &[&[0.2, 0.0]]),
        ]);
        // Closest pair is alice's second descriptor.
        let result = index.best_match(&Descriptor::new(vec![0.9, 1.0]), 0.5);
        assert_eq!(result.label.as_deref(), Some("alice"));
        assert!((result.distance - 0.1).abs() < 1e-5);

        let result = index.best_match(&Descriptor::new(vec![0.15, 0.0]), 0.5);
        assert_eq!(result.label.as_deref(), Some("bob"));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let index = IdentityIndex::from_labeled([labeled("alice", &[&[0.0, 0.0]])]);
        let at = index.best_match(&Descriptor::new(vec![0.5, 0.0]), 0.5);
        assert_eq!(at.label.as_deref(), Some("alice"));
        let beyond = index.best_match(&Descriptor::new(vec![0.55, 0.0]), 0.5);
        assert!(!beyond.is_known());
        assert_eq!(beyond.label_or_unknown(), "unknown");
    }

    #[test]
    fn test_looser_threshold_trades_precision_for_recall() {
        let index = IdentityIndex::from_labeled([labeled("alice", &[&[0.0, 0.0]])]);
        let probe = Descriptor::new(vec![0.55, 0.0]);
        assert!(!index.best_match(&probe, ENROLLMENT_MATCH_THRESHOLD).is_known());
        assert!(index.best_match(&probe, ATTENDANCE_MATCH_THRESHOLD).is_known());
    }

    #[test]
    fn test_empty_index_is_unknown() {
        let result = IdentityIndex::new().best_match(&Descriptor::new(vec![0.0]), 0.6);
        assert!(!result.is_known());
        assert!(result.distance.is_infinite());
        assert_eq!(result.to_string(), "unknown");
    }

    #[test]
    fn test_probe_of_other_length_is_unknown() {
        let index = IdentityIndex::from_labeled([labeled("alice", &[&[0.0; 128]])]);
        for probe in [Vec::new(), vec![0.0; 4]] {
            let result = index.best_match(&Descriptor::new(probe), 100.0);
            assert!(!result.is_known());
            assert!(result.distance.is_infinite());
        }
    }

    #[test]
    fn test_from_labeled_drops_empty() {
        let index = IdentityIndex::from_labeled([labeled("ghost", &[]), labeled("bob", &[&[1.0]])]);
        assert_eq!(index.len(), 1);
        assert!(!index.contains("ghost"));
    }

    #[test]
    fn test_build_skips_faceless_images() {
        let mut engine = TaggedEngine {
            faces: HashMap::from([(1, vec![0.0, 0.0]), (3, vec![1.0, 0.0])]),
            fail: vec![4],
        };
        let identities = vec![identity("alice", &[1, 2, 4]), identity("bob", &[3])];
        let index = IdentityIndex::build(&mut engine, &identities);

        assert_eq!(index.len(), 2);
        let alice = &index.entries()[0];
        assert_eq!(alice.label, "alice");
        assert_eq!(alice.descriptors.len(), 1);
    }

    #[test]
    fn test_identity_without_usable_images_never_matches() {
        let mut engine = TaggedEngine {
            faces: HashMap::from([(1, vec![5.0, 5.0])]),
            fail: vec![9],
        };
        let identities = vec![identity("ghost", &[2, 9]), identity("alice", &[1])];
        let index = IdentityIndex::build(&mut engine, &identities);

        assert!(!index.contains("ghost"));
        assert_eq!(index.labels().collect::<Vec<_>>(), vec!["alice"]);
        // ghost is not a candidate at any threshold.
        let result = index.best_match(&Descriptor::new(vec![0.0, 0.0]), 100.0);
        assert_eq!(result.label.as_deref(), Some("alice"));
    }

    #[test]
    fn test_match_display() {
        let result = MatchResult { label: Some("alice".into()), distance: 0.4213 };
        assert_eq!(result.to_string(), "alice (0.42)");
    }
}
