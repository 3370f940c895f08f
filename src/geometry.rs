//! Geometric transform between per-answer weight vectors and 2D points.
//!
//! Answer options are laid out as the vertices of a regular polygon on the
//! client canvas; a participant's instantaneous preference arrives as a
//! weight vector over those vertices. [`AnswerGeometry`] maps both ways:
//! [`decode`](AnswerGeometry::decode) turns a weight vector into the
//! Cartesian cursor point and [`encode`](AnswerGeometry::encode) expresses a
//! point in the basis of its two nearest vertices.

use smallvec::SmallVec;

use crate::error::SwarmError;

/// A weight vector over the answer options.
///
/// Stack-allocated for typical answer counts (≤ 8); spills to the heap for
/// unusually large questions.
pub type WeightVec = SmallVec<[f64; 8]>;

/// A point in client canvas coordinates (Y grows downward).
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate (positive is down, matching screen space).
    pub y: f64,
}

impl Point {
    /// Creates a point.
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    /// Squared Euclidean distance to `other`.
    #[inline]
    #[must_use]
    pub fn distance_squared(self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// The spatial layout of a question's answer options: N vertices of a
/// regular polygon of a given radius.
///
/// Vertex 0 sits at angle −90° (pointing "up" on screen, where Y increases
/// downward) and the remaining vertices follow clockwise. Each coordinate is
/// truncated toward zero, matching the client's integer canvas layout.
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerGeometry {
    vertices: Vec<Point>,
    radius: f64,
}

impl AnswerGeometry {
    /// Builds the geometry for `num_answers` options on a circle of
    /// `radius`.
    ///
    /// Vertex `k` is placed at angle `-π/2 + 2πk/num_answers`; coordinates
    /// are truncated toward zero, not rounded.
    #[must_use]
    pub fn regular(num_answers: usize, radius: f64) -> Self {
        let step = std::f64::consts::TAU / num_answers as f64;
        let vertices = (0..num_answers)
            .map(|k| {
                let angle = -std::f64::consts::FRAC_PI_2 + step * k as f64;
                Point::new((radius * angle.cos()).trunc(), (radius * angle.sin()).trunc())
            })
            .collect();
        AnswerGeometry { vertices, radius }
    }

    /// Number of answer options.
    #[inline]
    #[must_use]
    pub fn num_answers(&self) -> usize {
        self.vertices.len()
    }

    /// The polygon radius this geometry was built with.
    #[inline]
    #[must_use]
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// The vertex assigned to answer `index`, if it exists.
    #[inline]
    #[must_use]
    pub fn vertex(&self, index: usize) -> Option<Point> {
        self.vertices.get(index).copied()
    }

    /// Decodes a weight vector into the Cartesian point it represents: the
    /// weighted sum `Σ weights[i]·vertex[i]`.
    ///
    /// # Errors
    ///
    /// [`SwarmError::DataMismatch`] when `weights.len()` disagrees with the
    /// answer count. Callers treat this as a fatal per-record skip: log the
    /// two lengths and move on, never abort the process.
    pub fn decode(&self, weights: &[f64]) -> Result<Point, SwarmError> {
        if weights.len() != self.vertices.len() {
            return Err(SwarmError::DataMismatch {
                expected: self.vertices.len(),
                actual: weights.len(),
            });
        }
        let mut point = Point::default();
        for (w, v) in weights.iter().zip(&self.vertices) {
            point.x += w * v.x;
            point.y += w * v.y;
        }
        Ok(point)
    }

    /// Encodes a Cartesian point as a weight vector: locates the two
    /// vertices nearest to `point`, solves the 2×2 linear system expressing
    /// `point` in that vertex basis and scatters the two coefficients into
    /// an otherwise-zero vector of length N.
    ///
    /// The coordinator does not need this during normal operation (weight
    /// vectors arrive pre-encoded from clients); it exists for symmetry with
    /// [`decode`](Self::decode) and for offline tooling.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Protocol`] when the two nearest vertices are colinear
    /// with the origin and the system has no unique solution.
    pub fn encode(&self, point: Point) -> Result<WeightVec, SwarmError> {
        if self.vertices.len() < 2 {
            return Err(SwarmError::Protocol {
                context: format!(
                    "cannot encode against {} answer vertices",
                    self.vertices.len()
                ),
            });
        }

        // Indices of the two nearest vertices by squared distance.
        let mut order: Vec<usize> = (0..self.vertices.len()).collect();
        order.sort_by(|&a, &b| {
            let da = point.distance_squared(self.vertices[a]);
            let db = point.distance_squared(self.vertices[b]);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        let (i, j) = (order[0], order[1]);
        let (v1, v2) = (self.vertices[i], self.vertices[j]);

        let det = v1.x * v2.y - v2.x * v1.y;
        if det.abs() < f64::EPSILON {
            return Err(SwarmError::Protocol {
                context: format!(
                    "degenerate vertex basis ({}, {}) for point ({}, {})",
                    i, j, point.x, point.y
                ),
            });
        }

        let a = (point.x * v2.y - v2.x * point.y) / det;
        let b = (v1.x * point.y - point.x * v1.y) / det;

        let mut weights: WeightVec = smallvec::smallvec![0.0; self.vertices.len()];
        weights[i] = a;
        weights[j] = b;
        Ok(weights)
    }
}

/// Normalizes a raw position sample in place: every component is clamped to
/// a minimum of 0 (negative readings are not meaningful for this model) and,
/// if the clamped sum exceeds 1, the vector is rescaled so the sum equals 1.
/// Vectors whose sum is already ≤ 1 are left as-is, never scaled upward.
pub fn sanitize_weights(weights: &mut [f64]) {
    let mut sum = 0.0;
    for w in weights.iter_mut() {
        if *w < 0.0 || !w.is_finite() {
            *w = 0.0;
        }
        sum += *w;
    }
    if sum > 1.0 {
        for w in weights.iter_mut() {
            *w /= sum;
        }
    }
}
