use approx::assert_relative_eq;
use modelingest_lib::{ingest, normalize::Normalization, SourceFormat};

fn binary_stl(triangles: &[[[f32; 3]; 3]]) -> Vec<u8> {
    let tris: Vec<stl_io::Triangle> = triangles
        .iter()
        .map(|t| stl_io::Triangle {
            normal: stl_io::Normal::new([0., 0., 1.]),
            vertices: [
                stl_io::Vertex::new(t[0]),
                stl_io::Vertex::new(t[1]),
                stl_io::Vertex::new(t[2]),
            ],
        })
        .collect();
    let mut out = Vec::new();
    stl_io::write_stl(&mut out, tris.iter()).unwrap();
    out
}

#[test]
fn flat_binary_stl_is_stood_up() {
    // 100 x 80 plate, 2 mm thick
    let bytes = binary_stl(&[
        [[0., 0., 0.], [100., 0., 0.], [100., 80., 0.]],
        [[0., 0., 0.], [100., 80., 0.], [0., 80., 2.]],
    ]);
    let r = ingest(&bytes, "plate.STL");
    assert!(!r.is_fallback, "{:?}", r.error);
    assert_eq!(r.source_format, Some(SourceFormat::Stl));
    assert_eq!(r.normalization, Normalization::ZUpToYUp);
    assert_eq!(r.triangle_count(), 2);
    assert!(r.placement.is_none());

    let size = r.bounding_box.size();
    assert_relative_eq!(size[0], 100.0, epsilon = 1e-4);
    assert_relative_eq!(size[1], 2.0, epsilon = 1e-4);
    assert_relative_eq!(size[2], 80.0, epsilon = 1e-4);
}

#[test]
fn shared_stl_vertices_are_indexed_once() {
    let bytes = binary_stl(&[
        [[0., 0., 0.], [10., 0., 0.], [0., 10., 10.]],
        [[10., 0., 0.], [10., 10., 10.], [0., 10., 10.]],
    ]);
    let r = ingest(&bytes, "wedge.stl");
    assert!(!r.is_fallback);
    assert_eq!(r.normalization, Normalization::Unchanged);
    assert_eq!(r.vertex_count(), 4);
    assert_eq!(r.triangle_count(), 2);
}

#[test]
fn obj_in_meters_is_rescaled() {
    let obj = "v 0 0 0\nv 0.05 0 0\nv 0.05 0.05 0\nv 0 0.05 0.02\nf 1 2 3 4\n";
    let r = ingest(obj.as_bytes(), "part.obj");
    assert!(!r.is_fallback, "{:?}", r.error);
    assert_eq!(r.triangle_count(), 2);
    assert_eq!(r.normalization, Normalization::Rescaled { factor: 1000.0 });
    assert_relative_eq!(r.bounding_box.size()[0], 50.0, epsilon = 1e-3);
}

#[test]
fn garbage_ply_falls_back() {
    let r = ingest(b"solid nonsense\n", "scan.ply");
    assert!(r.is_fallback);
    assert_eq!(r.error_kind.as_deref(), Some("malformed_document"));
    assert_eq!(r.source_format, Some(SourceFormat::Ply));
    assert_eq!(r.vertex_count(), 8);
}
