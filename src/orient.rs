//! Picks the axis-aligned rotation that prints best, Y being up.
//!
//! A fixed list of nine rotations is scored on the rotated bounding box and
//! the best one is applied. Earlier candidates win ties, identity first.

use std::f64::consts::{FRAC_PI_2, PI};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mesh::{BoundingBox, IndexedMesh};
use crate::transform::Euler;

pub const CANDIDATES: [Euler; 9] = [
    Euler { x: 0., y: 0., z: 0. },
    Euler { x: FRAC_PI_2, y: 0., z: 0. },
    Euler { x: -FRAC_PI_2, y: 0., z: 0. },
    Euler { x: PI, y: 0., z: 0. },
    Euler { x: 0., y: FRAC_PI_2, z: 0. },
    Euler { x: 0., y: -FRAC_PI_2, z: 0. },
    Euler { x: 0., y: 0., z: FRAC_PI_2 },
    Euler { x: 0., y: 0., z: -FRAC_PI_2 },
    Euler { x: 0., y: 0., z: PI },
];

const W_HEIGHT: f64 = 0.4;
const W_FOOTPRINT: f64 = 0.3;
const W_ASPECT: f64 = 0.2;
const W_FLOOR: f64 = 0.1;
const TIE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationCandidate {
    pub rotation: Euler,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    /// Rotation that was applied.
    pub rotation: Euler,
    pub score: f64,
    pub identity_score: f64,
    /// Translation along Y that put the model on the build surface.
    pub lift: f64,
}

/// Printability of a box, higher is better.
pub fn score(bb: &BoundingBox) -> f64 {
    let [x, h, z] = bb.size().map(|v| v as f64);
    let footprint = x * z;
    let largest_cross_section = footprint.max(x * h).max(h * z);

    let (height_term, aspect_term) = if footprint > 0.0 {
        let ratio = h / footprint.sqrt();
        let aspect = if ratio > 0.0 { ratio.min(1.0 / ratio) } else { 0.0 };
        (1.0 / (1.0 + ratio), aspect)
    } else {
        (0.0, 0.0)
    };
    let footprint_term = if largest_cross_section > 0.0 {
        footprint / largest_cross_section
    } else {
        0.0
    };
    let floor_term = 1.0 / (1.0 + (bb.min[1] as f64).abs());

    W_HEIGHT * height_term + W_FOOTPRINT * footprint_term + W_ASPECT * aspect_term + W_FLOOR * floor_term
}

/// Scores of every candidate, in candidate order.
pub fn evaluate(mesh: &IndexedMesh) -> Vec<OrientationCandidate> {
    let bb = mesh.bounding_box();
    CANDIDATES
        .iter()
        .map(|&rotation| OrientationCandidate {
            rotation,
            score: score(&bb.transformed(&rotation.to_rotation().to_homogeneous())),
        })
        .collect()
}

/// Rotates `mesh` into the best scoring orientation and sets it down on
/// `Y = 0`.
pub fn optimize_orientation(mesh: &mut IndexedMesh) -> Orientation {
    let candidates = evaluate(mesh);
    let identity_score = candidates.first().map(|c| c.score).unwrap_or_default();

    let mut best = OrientationCandidate {
        rotation: Euler::IDENTITY,
        score: identity_score,
    };
    for c in candidates.iter().skip(1) {
        if c.score > best.score + TIE_EPSILON {
            best = *c;
        }
    }
    debug!("orientation {:?} scores {:.4} (identity {:.4})", best.rotation, best.score, identity_score);

    if best.rotation != Euler::IDENTITY {
        mesh.apply_rotation(&best.rotation.to_rotation());
    }

    let lift = reseat(mesh);
    Orientation {
        rotation: best.rotation,
        score: best.score,
        identity_score,
        lift,
    }
}

/// Moves the lowest point to `Y = 0`, returning the applied offset.
pub fn reseat(mesh: &mut IndexedMesh) -> f64 {
    let bb = mesh.bounding_box();
    if bb.is_empty() {
        return 0.0;
    }
    let dy = -bb.min[1];
    if dy != 0.0 {
        mesh.translate([0.0, dy, 0.0]);
    }
    dy as f64
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    use super::*;

    fn boxed(x: f32, y: f32, z: f32) -> IndexedMesh {
        IndexedMesh::new(vec![[0., 0., 0.], [x, y, z]], vec![])
    }

    #[test]
    fn tall_thin_box_is_laid_down() {
        let mut m = boxed(10., 100., 10.);
        let o = optimize_orientation(&mut m);
        assert!(o.score > o.identity_score);
        let size = m.bounding_box().size();
        assert!(size[1] < 11.0, "{size:?}");
        assert_relative_eq!(m.bounding_box().min[1], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn resting_cube_keeps_identity() {
        let mut m = boxed(20., 20., 20.);
        let o = optimize_orientation(&mut m);
        assert_eq!(o.rotation, Euler::IDENTITY);
        assert_eq!(o.score, o.identity_score);
        assert_eq!(m.bounding_box().min[1], 0.0);
        assert_eq!(o.lift, 0.0);
    }

    #[test]
    fn floating_model_is_reseated() {
        let mut m = IndexedMesh::new(vec![[0., 5., 0.], [20., 8., 20.]], vec![]);
        optimize_orientation(&mut m);
        assert_relative_eq!(m.bounding_box().min[1], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn degenerate_boxes_score_finite() {
        assert!(score(&boxed(0., 0., 0.).bounding_box()).is_finite());
        assert!(score(&boxed(10., 0., 10.).bounding_box()).is_finite());
        assert!(score(&BoundingBox::empty()).is_finite());
    }

    proptest! {
        #[test]
        fn never_worse_than_identity(
            x in 0.1f32..500.0,
            y in 0.1f32..500.0,
            z in 0.1f32..500.0,
            lift in -50.0f32..50.0,
        ) {
            let mut m = IndexedMesh::new(vec![[0., lift, 0.], [x, y + lift, z]], vec![]);
            let o = optimize_orientation(&mut m);
            prop_assert!(o.score >= o.identity_score);
            prop_assert!(m.bounding_box().min[1].abs() < 1e-3);
        }
    }
}
