//! Build item transforms.
//!
//! The container stores a transform as twelve numbers, the rows of a 4x3
//! matrix applied to row vectors: `m00 m01 m02 m10 m11 m12 m20 m21 m22 m30 m31 m32`,
//! the last three being the translation. Internally everything is converted to
//! a column-vector `Matrix4` and decomposed into position, XYZ euler rotation
//! and scale.

use nalgebra::{Matrix3, Matrix4, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::BuildItem;
use crate::utils::trace_matrix;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0., y: 0., z: 0. };
    pub const ONE: Vec3 = Vec3 { x: 1., y: 1., z: 1. };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Intrinsic XYZ euler angles in radians: `R = Rx * Ry * Rz`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Euler {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Euler {
    pub const IDENTITY: Euler = Euler { x: 0., y: 0., z: 0. };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_rotation(&self) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::x_axis(), self.x)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), self.y)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), self.z)
    }

    /// Inverse of [`Euler::to_rotation`].
    pub fn from_rotation(r: &Matrix3<f64>) -> Self {
        let m13 = r[(0, 2)].clamp(-1.0, 1.0);
        let y = m13.asin();
        if m13.abs() < 0.999_999_9 {
            Euler {
                x: (-r[(1, 2)]).atan2(r[(2, 2)]),
                y,
                z: (-r[(0, 1)]).atan2(r[(0, 0)]),
            }
        } else {
            // gimbal lock, fold z into x
            Euler {
                x: r[(2, 1)].atan2(r[(1, 1)]),
                y,
                z: 0.,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub position: Vec3,
    pub rotation: Euler,
    pub scale: Vec3,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Euler::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// Decodes a `transform` attribute; absent or malformed gives identity.
    pub fn from_attr(s: Option<&str>) -> Self {
        match s.map(parse_transform_values) {
            Some(Some(values)) => Self::from_values(&values),
            Some(None) => {
                warn!("malformed transform {:?}, using identity", s.unwrap_or_default());
                Self::identity()
            }
            None => Self::identity(),
        }
    }

    pub fn from_values(values: &[f64; 12]) -> Self {
        Self::decompose(&matrix_from_values(values))
    }

    /// Splits a homogeneous column-vector matrix into translation, rotation
    /// and scale. Non-orthogonal or sheared input gets the closest rotation.
    pub fn decompose(m: &Matrix4<f64>) -> Self {
        trace_matrix!("decompose", m);

        let position = Vec3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
        let basis: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();

        let mut scale = Vec3::new(
            basis.column(0).norm(),
            basis.column(1).norm(),
            basis.column(2).norm(),
        );
        if basis.determinant() < 0.0 {
            scale.x = -scale.x;
        }

        let mut r = basis;
        for (i, s) in [scale.x, scale.y, scale.z].into_iter().enumerate() {
            if s.abs() > f64::EPSILON {
                r.column_mut(i).scale_mut(1.0 / s);
            }
        }

        let orthogonality = (r.transpose() * r - Matrix3::identity()).norm();
        let r = if orthogonality > 1e-6 {
            debug!("non-orthonormal transform ({:.3e}), using best fit rotation", orthogonality);
            Rotation3::from_matrix(&r).into_inner()
        } else {
            r
        };

        Self {
            position,
            rotation: Euler::from_rotation(&r),
            scale,
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        let t = Matrix4::new_translation(&Vector3::new(self.position.x, self.position.y, self.position.z));
        let r = self.rotation.to_rotation().to_homogeneous();
        let s = Matrix4::new_nonuniform_scaling(&Vector3::new(self.scale.x, self.scale.y, self.scale.z));
        t * r * s
    }
}

/// Twelve whitespace separated finite numbers, or `None`.
pub fn parse_transform_values(s: &str) -> Option<[f64; 12]> {
    let mut out = [0.0; 12];
    let mut n = 0;
    for tok in s.split_whitespace() {
        if n == 12 {
            return None;
        }
        let v: f64 = tok.parse().ok()?;
        if !v.is_finite() {
            return None;
        }
        out[n] = v;
        n += 1;
    }
    (n == 12).then_some(out)
}

/// Column-vector 4x4 matrix from the container's row-vector 4x3 layout.
pub fn matrix_from_values(values: &[f64; 12]) -> Matrix4<f64> {
    let mat = nalgebra::Matrix4x3::from_row_slice(values);
    let mat = mat.insert_column(3, 0.);
    let mut mat = mat.transpose();
    mat[(3, 3)] = 1.0;
    mat
}

/// How the model placement was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlacementMatch {
    /// A build item references the object that carried the geometry.
    Matched { object_id: String },
    /// No item references the geometry object; the first item was used.
    FirstItemFallback {
        geometry_object: Option<String>,
        used_object: String,
    },
    NoBuildItems,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub transform: AffineTransform,
    pub matched: PlacementMatch,
}

/// Picks the build item transform for the object that contributed geometry,
/// which is not necessarily the first item.
pub fn resolve_placement(items: &[BuildItem], geometry_object: Option<&str>) -> Placement {
    if let Some(id) = geometry_object {
        if let Some(item) = items.iter().find(|i| i.object_id == id) {
            debug!("placement from build item for object {}", id);
            return Placement {
                transform: item.transform,
                matched: PlacementMatch::Matched {
                    object_id: id.to_string(),
                },
            };
        }
    }

    match items.first() {
        Some(first) => {
            warn!(
                "no build item references geometry object {:?}, using first item (object {})",
                geometry_object, first.object_id
            );
            Placement {
                transform: first.transform,
                matched: PlacementMatch::FirstItemFallback {
                    geometry_object: geometry_object.map(str::to_string),
                    used_object: first.object_id.clone(),
                },
            }
        }
        None => Placement {
            transform: AffineTransform::identity(),
            matched: PlacementMatch::NoBuildItems,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use approx::assert_relative_eq;

    use super::*;

    fn item(id: &str, t: &str) -> BuildItem {
        BuildItem {
            object_id: id.to_string(),
            transform: AffineTransform::from_attr(Some(t)),
            part_number: None,
        }
    }

    #[test]
    fn rotation_about_x_with_translation() {
        let t = AffineTransform::from_attr(Some("1 0 0 0 0 1 0 -1 0 10 0 0"));
        assert_relative_eq!(t.rotation.x, FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(t.rotation.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(t.rotation.z, 0.0, epsilon = 1e-9);
        assert_eq!(t.position, Vec3::new(10., 0., 0.));
        assert_relative_eq!(t.scale.x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn missing_or_malformed_is_identity() {
        assert!(AffineTransform::from_attr(None).is_identity());
        assert!(AffineTransform::from_attr(Some("1 0 0")).is_identity());
        assert!(AffineTransform::from_attr(Some("a b c d e f g h i j k l")).is_identity());
        assert!(AffineTransform::from_attr(Some("1 0 0 0 1 0 0 0 1 0 0 0 7")).is_identity());
    }

    #[test]
    fn scale_is_extracted() {
        let t = AffineTransform::from_attr(Some("2 0 0 0 3 0 0 0 4 1 2 3"));
        assert_relative_eq!(t.scale.x, 2.0);
        assert_relative_eq!(t.scale.y, 3.0);
        assert_relative_eq!(t.scale.z, 4.0);
        assert_eq!(t.rotation, Euler::IDENTITY);
    }

    #[test]
    fn sheared_matrix_still_decomposes() {
        let t = AffineTransform::from_attr(Some("1 0.3 0 0 1 0 0 0 1 0 0 0"));
        assert!(t.rotation.x.is_finite() && t.rotation.y.is_finite() && t.rotation.z.is_finite());
        assert!(t.scale.x > 0.0);
    }

    #[test]
    fn matrix_round_trip_for_rotation() {
        let values = [0., 1., 0., -1., 0., 0., 0., 0., 1., 5., 6., 7.];
        let m = matrix_from_values(&values);
        let t = AffineTransform::decompose(&m);
        assert_relative_eq!(t.to_matrix(), m, epsilon = 1e-9);
    }

    #[test]
    fn placement_prefers_item_with_geometry() {
        let items = vec![
            item("1", "1 0 0 0 1 0 0 0 1 0 0 0"),
            item("3", "1 0 0 0 1 0 0 0 1 50 60 0"),
        ];
        let p = resolve_placement(&items, Some("3"));
        assert_eq!(p.transform.position, Vec3::new(50., 60., 0.));
        assert_eq!(
            p.matched,
            PlacementMatch::Matched {
                object_id: "3".to_string()
            }
        );
    }

    #[test]
    fn placement_falls_back_to_first_item() {
        let items = vec![item("1", "1 0 0 0 1 0 0 0 1 4 0 0"), item("2", "1 0 0 0 1 0 0 0 1 9 0 0")];
        let p = resolve_placement(&items, Some("7"));
        assert_eq!(p.transform.position.x, 4.0);
        assert!(matches!(p.matched, PlacementMatch::FirstItemFallback { .. }));

        let p = resolve_placement(&[], Some("7"));
        assert!(p.transform.is_identity());
        assert_eq!(p.matched, PlacementMatch::NoBuildItems);
    }
}
