//! Per-format axis and unit corrections towards a Y-up, millimeter mesh.
//!
//! Every correction is chosen so that running [`normalize`] on its own output
//! changes nothing. Container meshes are never touched, so the placement an
//! authoring tool wrote stays exactly as it was.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::formats::SourceFormat;
use crate::mesh::IndexedMesh;

/// Extent below this fraction of both other axes marks a model lying on the
/// wrong side.
const FLAT_RATIO: f32 = 0.1;
/// Scans taller along Z than this multiple of Y are Z-up.
const SCAN_Z_RATIO: f32 = 1.5;
const MAX_RESCALE_STEPS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalization {
    Unchanged,
    /// Rotated -90 degrees about X, turning Z-up into Y-up.
    ZUpToYUp,
    /// Uniformly scaled by `factor`.
    Rescaled { factor: f64 },
}

pub fn normalize(mesh: &mut IndexedMesh, format: SourceFormat) -> Normalization {
    if mesh.is_empty() {
        return Normalization::Unchanged;
    }

    let applied = match format {
        SourceFormat::ThreeMf | SourceFormat::Gltf => Normalization::Unchanged,
        SourceFormat::Stl => {
            let [x, y, z] = mesh.bounding_box().size();
            if z < FLAT_RATIO * x && z < FLAT_RATIO * y {
                z_up_to_y_up(mesh)
            } else {
                Normalization::Unchanged
            }
        }
        SourceFormat::Ply => {
            let [_, y, z] = mesh.bounding_box().size();
            if z > SCAN_Z_RATIO * y {
                z_up_to_y_up(mesh)
            } else {
                Normalization::Unchanged
            }
        }
        SourceFormat::Obj => rescale(mesh),
    };

    if applied != Normalization::Unchanged {
        debug!("normalized {:?} mesh: {:?}", format, applied);
    }
    applied
}

fn z_up_to_y_up(mesh: &mut IndexedMesh) -> Normalization {
    let r = Rotation3::from_axis_angle(&Vector3::x_axis(), -std::f64::consts::FRAC_PI_2);
    mesh.apply_rotation(&r);
    Normalization::ZUpToYUp
}

/// Meters or microns to millimeters, by magnitude alone.
fn rescale(mesh: &mut IndexedMesh) -> Normalization {
    let size = mesh.bounding_box().size();
    let mut extent = size.iter().copied().fold(0.0f64, |m, v| m.max(v as f64));
    if extent <= 0.0 || !extent.is_finite() {
        return Normalization::Unchanged;
    }

    let mut factor = 1.0f64;
    for _ in 0..MAX_RESCALE_STEPS {
        if extent > 1000.0 {
            factor *= 0.001;
            extent *= 0.001;
        } else if extent < 1.0 {
            factor *= 1000.0;
            extent *= 1000.0;
        } else {
            break;
        }
    }

    if factor == 1.0 {
        return Normalization::Unchanged;
    }
    mesh.scale(factor as f32);
    Normalization::Rescaled { factor }
}
