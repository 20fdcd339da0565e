use serde::{Deserialize, Serialize};

/// An indexed triangle mesh
///
/// Positions are `f32` triples the way renderers want them; triangles index
/// into `positions`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct IndexedMesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
}

impl IndexedMesh {
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<[u32; 3]>) -> Self {
        Self { positions, indices }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Appends `other`, shifting its indices past the current vertices.
    /// Returns the offset that was applied.
    pub fn merge(&mut self, other: &IndexedMesh) -> u32 {
        let offset = self.positions.len() as u32;
        self.positions.extend(other.positions.iter().copied());
        self.indices.extend(
            other
                .indices
                .iter()
                .map(|t| [t[0] + offset, t[1] + offset, t[2] + offset]),
        );
        offset
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(self.positions.iter())
    }

    /// Applies a column-vector homogeneous matrix to every position.
    pub fn apply_matrix(&mut self, m: &nalgebra::Matrix4<f64>) {
        transform_points(&mut self.positions, m);
    }

    pub fn apply_rotation(&mut self, r: &nalgebra::Rotation3<f64>) {
        self.apply_matrix(&r.to_homogeneous());
    }

    pub fn translate(&mut self, d: [f32; 3]) {
        for p in self.positions.iter_mut() {
            p[0] += d[0];
            p[1] += d[1];
            p[2] += d[2];
        }
    }

    pub fn scale(&mut self, s: f32) {
        for p in self.positions.iter_mut() {
            p[0] *= s;
            p[1] *= s;
            p[2] *= s;
        }
    }

    /// The 10 mm cube, centred on the origin, shown when nothing usable was
    /// recovered from a file.
    pub fn placeholder() -> Self {
        let s = 5.0;
        let positions = vec![
            [-s, -s, -s],
            [s, -s, -s],
            [s, s, -s],
            [-s, s, -s],
            [-s, -s, s],
            [s, -s, s],
            [s, s, s],
            [-s, s, s],
        ];
        #[rustfmt::skip]
        let indices = vec![
            [0, 2, 1], [0, 3, 2], // bottom
            [4, 5, 6], [4, 6, 7], // top
            [0, 1, 5], [0, 5, 4], // front
            [2, 3, 7], [2, 7, 6], // back
            [1, 2, 6], [1, 6, 5], // right
            [0, 7, 3], [0, 4, 7], // left
        ];
        Self { positions, indices }
    }
}

pub fn transform_points(points: &mut [[f32; 3]], m: &nalgebra::Matrix4<f64>) {
    for p in points.iter_mut() {
        let v = m * nalgebra::Vector4::new(p[0] as f64, p[1] as f64, p[2] as f64, 1.0);
        *p = [v.x as f32, v.y as f32, v.z as f32];
    }
}

/// Axis aligned bounding box. An empty box has `min > max`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    pub fn empty() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
        }
    }

    pub fn from_points<'a>(points: impl Iterator<Item = &'a [f32; 3]>) -> Self {
        let mut bb = Self::empty();
        for p in points {
            bb.expand(p);
        }
        bb
    }

    pub fn expand(&mut self, p: &[f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn is_finite(&self) -> bool {
        self.min.iter().chain(self.max.iter()).all(|v| v.is_finite())
    }

    pub fn size(&self) -> [f32; 3] {
        if self.is_empty() {
            return [0.0; 3];
        }
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Box around the eight transformed corners.
    pub fn transformed(&self, m: &nalgebra::Matrix4<f64>) -> Self {
        if self.is_empty() {
            return *self;
        }
        let mut out = Self::empty();
        for i in 0..8 {
            let c = [
                if i & 1 == 0 { self.min[0] } else { self.max[0] },
                if i & 2 == 0 { self.min[1] } else { self.max[1] },
                if i & 4 == 0 { self.min[2] } else { self.max[2] },
            ];
            let v = m * nalgebra::Vector4::new(c[0] as f64, c[1] as f64, c[2] as f64, 1.0);
            out.expand(&[v.x as f32, v.y as f32, v.z as f32]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri() -> IndexedMesh {
        IndexedMesh::new(vec![[0., 0., 0.], [1., 0., 0.], [0., 1., 0.]], vec![[0, 1, 2]])
    }

    #[test]
    fn merge_offsets_indices() {
        let mut a = tri();
        let off = a.merge(&tri());
        assert_eq!(off, 3);
        assert_eq!(a.vertex_count(), 6);
        assert_eq!(a.indices[1], [3, 4, 5]);
    }

    #[test]
    fn bounding_box_of_nothing_is_empty() {
        let bb = IndexedMesh::default().bounding_box();
        assert!(bb.is_empty());
        assert_eq!(bb.size(), [0.0; 3]);
    }

    #[test]
    fn placeholder_is_closed_cube() {
        let cube = IndexedMesh::placeholder();
        assert_eq!(cube.vertex_count(), 8);
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.bounding_box().size(), [10.0, 10.0, 10.0]);
    }

    #[test]
    fn transformed_box_follows_translation() {
        let bb = tri().bounding_box();
        let m = nalgebra::Matrix4::new_translation(&nalgebra::Vector3::new(10.0, 0.0, -2.0));
        let t = bb.transformed(&m);
        assert_eq!(t.min, [10.0, 0.0, -2.0]);
        assert_eq!(t.max, [11.0, 1.0, -2.0]);
    }
}
