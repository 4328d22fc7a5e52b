use serde::{Deserialize, Serialize};

/// A 2D point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    fn mean(points: &[Point]) -> Option<Point> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f32;
        let (sx, sy) = points
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }
}

/// Bounding box for a detected face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Reference points used for head-pose classification.
///
/// Any point may be absent when the engine's landmark layout does not
/// provide it; the pose classifier treats that as "unknown".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Option<Point>,
    pub right_eye: Option<Point>,
    pub nose_tip: Option<Point>,
}

// iBUG 68-point layout indices.
const IBUG_NOSE_TIP: usize = 30;
const IBUG_LEFT_EYE: std::ops::Range<usize> = 36..42;
const IBUG_RIGHT_EYE: std::ops::Range<usize> = 42..48;

impl Landmarks {
    pub fn new(left_eye: Point, right_eye: Point, nose_tip: Point) -> Self {
        Self {
            left_eye: Some(left_eye),
            right_eye: Some(right_eye),
            nose_tip: Some(nose_tip),
        }
    }

    /// Five-point landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub fn from_five_point(points: &[(f32, f32); 5]) -> Self {
        let p = |i: usize| Point::new(points[i].0, points[i].1);
        Self::new(p(0), p(1), p(2))
    }

    /// 68-point iBUG landmarks. Eye centres are the mean of each eye contour.
    pub fn from_ibug68(points: &[Point]) -> Self {
        Self {
            left_eye: points.get(IBUG_LEFT_EYE).and_then(Point::mean),
            right_eye: points.get(IBUG_RIGHT_EYE).and_then(Point::mean),
            nose_tip: points.get(IBUG_NOSE_TIP).copied(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.left_eye.is_some() && self.right_eye.is_some() && self.nose_tip.is_some()
    }
}

/// Face descriptor (embedding) produced by the recognition engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(pub Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Euclidean distance. Descriptors of different lengths, or empty ones,
    /// are infinitely far apart.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return f32::INFINITY;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// One detected face: box, landmarks and descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    pub descriptor: Descriptor,
}
