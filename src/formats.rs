//! Single-file mesh formats: STL, OBJ, PLY and glTF/GLB.
//!
//! The adapter is chosen by file extension alone. Each one produces the same
//! [`IndexedMesh`] shape the container path does.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::mesh::IndexedMesh;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[serde(rename = "3mf")]
    ThreeMf,
    Stl,
    Obj,
    Ply,
    Gltf,
}

impl SourceFormat {
    /// Format from the extension of `file_name`, case-insensitive.
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "3mf" => Ok(SourceFormat::ThreeMf),
            "stl" => Ok(SourceFormat::Stl),
            "obj" => Ok(SourceFormat::Obj),
            "ply" => Ok(SourceFormat::Ply),
            "gltf" | "glb" => Ok(SourceFormat::Gltf),
            _ => Err(IngestError::UnsupportedFormat { extension }),
        }
    }

    pub fn is_container(&self) -> bool {
        *self == SourceFormat::ThreeMf
    }
}

/// Reads a non-container file. Calling this with [`SourceFormat::ThreeMf`]
/// is an error, containers go through [`crate::pipeline`].
pub fn read_single_file(bytes: &[u8], file_name: &str, format: SourceFormat) -> Result<IndexedMesh> {
    let mesh = match format {
        SourceFormat::Stl => read_stl(bytes, file_name)?,
        SourceFormat::Obj => read_obj(bytes, file_name)?,
        SourceFormat::Ply => read_ply(bytes, file_name)?,
        SourceFormat::Gltf => read_gltf(bytes, file_name)?,
        SourceFormat::ThreeMf => {
            return Err(IngestError::UnsupportedFormat {
                extension: "3mf".to_string(),
            })
        }
    };

    debug!(
        "{} ({:?}): {} vertices, {} triangles",
        file_name,
        format,
        mesh.vertex_count(),
        mesh.triangle_count()
    );

    if mesh.is_empty() {
        return Err(IngestError::NoGeometryFound(file_name.to_string()));
    }
    Ok(drop_out_of_range(mesh))
}

fn drop_out_of_range(mut mesh: IndexedMesh) -> IndexedMesh {
    let n = mesh.positions.len() as u32;
    mesh.indices.retain(|t| t.iter().all(|&i| i < n));
    mesh
}

/// Binary or ASCII STL. Vertices are deduplicated by the reader.
pub fn read_stl(bytes: &[u8], file_name: &str) -> Result<IndexedMesh> {
    let mut cursor = Cursor::new(bytes);
    let stl = stl_io::read_stl(&mut cursor).map_err(|e| IngestError::malformed(file_name, e))?;

    let positions = stl.vertices.iter().map(|v| v.0).collect();
    let indices = stl
        .faces
        .iter()
        .map(|f| [f.vertices[0] as u32, f.vertices[1] as u32, f.vertices[2] as u32])
        .collect();
    Ok(IndexedMesh::new(positions, indices))
}

/// Wavefront OBJ, triangulated, all groups merged. Material libraries are
/// never opened.
pub fn read_obj(bytes: &[u8], file_name: &str) -> Result<IndexedMesh> {
    let mut reader = Cursor::new(bytes);
    let (models, _materials) = tobj::load_obj_buf(
        &mut reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        |_| Err(tobj::LoadError::OpenFileFailed),
    )
    .map_err(|e| IngestError::malformed(file_name, e))?;

    let mut mesh = IndexedMesh::default();
    for model in &models {
        let part = IndexedMesh::new(
            model
                .mesh
                .positions
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
            model
                .mesh
                .indices
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
        );
        mesh.merge(&part);
    }
    Ok(mesh)
}

fn ply_float(prop: Option<&ply_rs::ply::Property>) -> f32 {
    use ply_rs::ply::Property;

    match prop {
        Some(Property::Float(v)) => *v,
        Some(Property::Double(v)) => *v as f32,
        Some(Property::Int(v)) => *v as f32,
        Some(Property::UInt(v)) => *v as f32,
        Some(Property::Short(v)) => *v as f32,
        Some(Property::UShort(v)) => *v as f32,
        Some(Property::Char(v)) => *v as f32,
        Some(Property::UChar(v)) => *v as f32,
        _ => 0.0,
    }
}

fn ply_face(prop: Option<&ply_rs::ply::Property>) -> Vec<u32> {
    use ply_rs::ply::Property;

    match prop {
        Some(Property::ListInt(v)) => v.iter().map(|&i| i.max(0) as u32).collect(),
        Some(Property::ListUInt(v)) => v.clone(),
        Some(Property::ListShort(v)) => v.iter().map(|&i| i.max(0) as u32).collect(),
        Some(Property::ListUShort(v)) => v.iter().map(|&i| i as u32).collect(),
        Some(Property::ListChar(v)) => v.iter().map(|&i| i.max(0) as u32).collect(),
        Some(Property::ListUChar(v)) => v.iter().map(|&i| i as u32).collect(),
        _ => vec![],
    }
}

/// ASCII or binary PLY. Polygons are fan-triangulated; a file without faces
/// is a point cloud and yields vertices only.
pub fn read_ply(bytes: &[u8], file_name: &str) -> Result<IndexedMesh> {
    let mut reader = Cursor::new(bytes);
    let parser = ply_rs::parser::Parser::<ply_rs::ply::DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| IngestError::malformed(file_name, e))?;

    let mut mesh = IndexedMesh::default();
    if let Some(vertices) = ply.payload.get("vertex") {
        for v in vertices {
            mesh.positions
                .push([ply_float(v.get("x")), ply_float(v.get("y")), ply_float(v.get("z"))]);
        }
    }

    if let Some(faces) = ply.payload.get("face") {
        for f in faces {
            let poly = ply_face(f.get("vertex_indices").or_else(|| f.get("vertex_index")));
            for i in 1..poly.len().saturating_sub(1) {
                mesh.indices.push([poly[0], poly[i], poly[i + 1]]);
            }
        }
    }
    Ok(mesh)
}

/// glTF or GLB. Only the first mesh met in a depth-first walk of the
/// default scene is read; node transforms are not applied.
pub fn read_gltf(bytes: &[u8], file_name: &str) -> Result<IndexedMesh> {
    let gltf::Gltf { document, blob } =
        gltf::Gltf::from_slice(bytes).map_err(|e| IngestError::malformed(file_name, e))?;
    let buffers = gltf::import_buffers(&document, None, blob).map_err(|e| IngestError::malformed(file_name, e))?;

    let scene = document.default_scene().or_else(|| document.scenes().next());
    let first = match scene {
        Some(scene) => {
            let mut stack: Vec<gltf::Node> = scene.nodes().collect();
            stack.reverse();
            let mut found = None;
            while let Some(node) = stack.pop() {
                if let Some(mesh) = node.mesh() {
                    found = Some(mesh);
                    break;
                }
                let mut children: Vec<gltf::Node> = node.children().collect();
                children.reverse();
                stack.extend(children);
            }
            found
        }
        None => document.meshes().next(),
    };

    let Some(gmesh) = first else {
        return Err(IngestError::NoGeometryFound(file_name.to_string()));
    };
    debug!("{}: using mesh {:?}", file_name, gmesh.name());

    let mut mesh = IndexedMesh::default();
    for primitive in gmesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            continue;
        }
        let reader = primitive.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));
        let Some(positions) = reader.read_positions() else {
            continue;
        };
        let positions: Vec<[f32; 3]> = positions.collect();
        let flat: Vec<u32> = match reader.read_indices() {
            Some(indices) => indices.into_u32().collect(),
            None => (0..positions.len() as u32).collect(),
        };
        let part = IndexedMesh::new(positions, flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect());
        mesh.merge(&part);
    }
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII_STL: &str = "solid tri
facet normal 0 0 1
  outer loop
    vertex 0 0 0
    vertex 1 0 0
    vertex 0 1 0
  endloop
endfacet
facet normal 0 0 1
  outer loop
    vertex 1 0 0
    vertex 1 1 0
    vertex 0 1 0
  endloop
endfacet
endsolid tri
";

    #[test]
    fn extension_selects_format() {
        assert_eq!(SourceFormat::from_file_name("Part.STL").unwrap(), SourceFormat::Stl);
        assert_eq!(SourceFormat::from_file_name("a.b.3mf").unwrap(), SourceFormat::ThreeMf);
        assert_eq!(SourceFormat::from_file_name("scene.glb").unwrap(), SourceFormat::Gltf);
        match SourceFormat::from_file_name("notes.docx") {
            Err(IngestError::UnsupportedFormat { extension }) => assert_eq!(extension, "docx"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(SourceFormat::from_file_name("no_extension").is_err());
    }

    #[test]
    fn ascii_stl_shares_vertices() {
        let mesh = read_single_file(ASCII_STL.as_bytes(), "tri.stl", SourceFormat::Stl).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
    }

    #[test]
    fn obj_quad_is_triangulated() {
        let obj = "o quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let mesh = read_single_file(obj.as_bytes(), "quad.obj", SourceFormat::Obj).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle_count(), 2);
    }

    #[test]
    fn obj_with_missing_material_library_still_loads() {
        let obj = "mtllib nowhere.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let mesh = read_single_file(obj.as_bytes(), "m.obj", SourceFormat::Obj).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn ascii_ply_with_quad() {
        let ply = "ply
format ascii 1.0
element vertex 4
property float x
property float y
property float z
element face 1
property list uchar int vertex_indices
end_header
0 0 0
1 0 0
1 1 0
0 1 0
4 0 1 2 3
";
        let mesh = read_single_file(ply.as_bytes(), "q.ply", SourceFormat::Ply).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.indices, vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn gltf_first_mesh_in_scene() {
        let gltf = r#"{
            "asset": {"version": "2.0"},
            "scene": 0,
            "scenes": [{"nodes": [0]}],
            "nodes": [{"children": [1]}, {"mesh": 0}],
            "meshes": [{"primitives": [{"attributes": {"POSITION": 0}, "indices": 1}]}],
            "buffers": [{"byteLength": 44, "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAABAAIAAAA="}],
            "bufferViews": [
                {"buffer": 0, "byteOffset": 0, "byteLength": 36},
                {"buffer": 0, "byteOffset": 36, "byteLength": 6}
            ],
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0, 0, 0], "max": [1, 1, 0]},
                {"bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR"}
            ]
        }"#;
        let mesh = read_single_file(gltf.as_bytes(), "t.gltf", SourceFormat::Gltf).unwrap();
        assert_eq!(mesh.positions, vec![[0., 0., 0.], [1., 0., 0.], [0., 1., 0.]]);
        assert_eq!(mesh.indices, vec![[0, 1, 2]]);
    }

    #[test]
    fn garbage_is_malformed() {
        let err = read_single_file(b"\x00\x01garbage", "x.gltf", SourceFormat::Gltf).unwrap_err();
        assert!(matches!(err, IngestError::MalformedDocument { .. }));
    }
}
