mod common;

use std::f64::consts::FRAC_PI_2;

use approx::assert_relative_eq;
use modelingest_lib::{
    assemble::Strategy, ingest, mesh::IndexedMesh, normalize::Normalization, DiagnosticLevel, PlacementMatch,
    SourceFormat, Vec3,
};

use common::*;

#[test]
fn rotated_translated_cube() {
    let doc = model_doc(
        &[object_with_mesh("1", &cube_mesh(1.0))],
        &[("1", "1 0 0 0 0 1 0 -1 0 10 0 0")],
    );
    let bytes = zip_of(&[("3D/3dmodel.model", &doc)]);

    let r = ingest(&bytes, "cube.3mf");
    assert!(!r.is_fallback, "{:?}", r.error);
    assert_eq!(r.error, None);
    assert_eq!(r.vertex_count(), 8);
    assert_eq!(r.triangle_count(), 12);
    assert_eq!(r.source_format, Some(SourceFormat::ThreeMf));
    assert_eq!(r.strategy, Some(Strategy::PrimaryDocument));

    let placement = r.placement.unwrap();
    assert_relative_eq!(placement.rotation.x, FRAC_PI_2, epsilon = 1e-9);
    assert_relative_eq!(placement.rotation.y, 0.0, epsilon = 1e-9);
    assert_relative_eq!(placement.rotation.z, 0.0, epsilon = 1e-9);
    assert_eq!(placement.position, Vec3::new(10., 0., 0.));
    assert_eq!(
        r.placement_match,
        Some(PlacementMatch::Matched {
            object_id: "1".to_string()
        })
    );

    let world = r.world_bounding_box();
    assert_relative_eq!(world.min[0], 10.0, epsilon = 1e-5);
    assert_relative_eq!(world.max[0], 11.0, epsilon = 1e-5);
}

#[test]
fn missing_descriptor_gives_placeholder() {
    let bytes = zip_of(&[
        ("Metadata/Slic3r_PE.config", "; layer_height = 0.2\n"),
        ("[Content_Types].xml", "<Types/>"),
    ]);

    let r = ingest(&bytes, "broken.3mf");
    assert!(r.is_fallback);
    assert!(r.error.as_deref().unwrap().contains("model descriptor missing"));
    assert_eq!(r.error_kind.as_deref(), Some("model_descriptor_missing"));
    assert_eq!(r.mesh(), IndexedMesh::placeholder());
    assert_eq!(r.bounding_box, IndexedMesh::placeholder().bounding_box());
    assert!(r.placement.is_none());
    // settings were read anyway
    assert_eq!(r.settings.unwrap().print_settings.unwrap().layer_height, Some(0.2));
}

#[test]
fn layer_height_without_fill_density() {
    let doc = model_doc(&[object_with_mesh("1", &cube_mesh(20.0))], &[("1", IDENTITY)]);
    let bytes = zip_of(&[
        ("3D/3dmodel.model", &doc),
        ("Metadata/Slic3r_PE.config", "# generated by PrusaSlicer\nlayer_height=0.2\n"),
    ]);

    let r = ingest(&bytes, "cube.3mf");
    assert!(!r.is_fallback);
    let settings = r.settings.clone().unwrap();
    let print = settings.print_settings.unwrap();
    assert_eq!(print.layer_height, Some(0.2));
    assert_eq!(print.infill, None);

    let provenance = settings.provenance.unwrap();
    assert_eq!(provenance.application.as_deref(), Some("PrusaSlicer"));
    assert_eq!(provenance.application_version.as_deref(), Some("2.7.1"));
    assert_eq!(provenance.creation_date.as_deref(), Some("2024-02-03"));

    let json = serde_json::to_value(&r).unwrap();
    assert_eq!(json["settings"]["printSettings"]["layerHeight"], 0.2);
    assert!(json["settings"]["printSettings"].get("infill").is_none());
}

#[test]
fn transform_comes_from_the_item_with_geometry() {
    let doc = model_doc(
        &[
            r#"<object id="1" type="model"/>"#.to_string(),
            object_with_mesh("2", &cube_mesh(5.0)),
        ],
        &[
            ("1", "1 0 0 0 1 0 0 0 1 1 2 3"),
            ("2", "1 0 0 0 1 0 0 0 1 40 50 60"),
        ],
    );
    let r = ingest(&zip_of(&[("3D/3dmodel.model", &doc)]), "two.3mf");
    assert!(!r.is_fallback);
    assert_eq!(r.placement.unwrap().position, Vec3::new(40., 50., 60.));
    assert_eq!(
        r.placement_match,
        Some(PlacementMatch::Matched {
            object_id: "2".to_string()
        })
    );
}

#[test]
fn unmatched_geometry_uses_first_item_with_warning() {
    let doc = model_doc(
        &[
            r#"<object id="1" type="model"/>"#.to_string(),
            object_with_mesh("2", &cube_mesh(5.0)),
        ],
        &[("1", "1 0 0 0 1 0 0 0 1 7 0 0")],
    );
    let r = ingest(&zip_of(&[("3D/3dmodel.model", &doc)]), "odd.3mf");
    assert!(!r.is_fallback);
    assert_eq!(r.placement.unwrap().position, Vec3::new(7., 0., 0.));
    assert!(matches!(
        r.placement_match,
        Some(PlacementMatch::FirstItemFallback { .. })
    ));
    assert!(r
        .diagnostics
        .iter()
        .any(|d| d.level == DiagnosticLevel::Warning && d.message.contains("no build item")));
}

#[test]
fn reingesting_is_deterministic() {
    let doc = model_doc(
        &[
            object_with_mesh("1", &cube_mesh(3.0)),
            object_with_mesh("2", &cube_mesh(4.5)),
        ],
        &[("1", IDENTITY), ("2", "1 0 0 0 1 0 0 0 1 20 0 0")],
    );
    let bytes = zip_of(&[("3D/3dmodel.model", &doc)]);
    let a = ingest(&bytes, "a.3mf");
    let b = ingest(&bytes, "a.3mf");
    assert_eq!(a.positions, b.positions);
    assert_eq!(a.indices, b.indices);
    assert_eq!(a, b);
}

#[test]
fn container_placement_is_not_normalized() {
    // flat plate lying in the XY plane, which an STL would get rotated
    let vertices = [[0., 0., 0.], [100., 0., 0.], [100., 80., 0.], [0., 80., 1.]];
    let doc = model_doc(
        &[object_with_mesh("1", &mesh_xml(&vertices, &[[0, 1, 2], [0, 2, 3]]))],
        &[("1", IDENTITY)],
    );
    let r = ingest(&zip_of(&[("3D/3dmodel.model", &doc)]), "plate.3mf");
    assert_eq!(r.normalization, Normalization::Unchanged);
    assert_eq!(r.positions, vertices.to_vec());
}

#[test]
fn container_without_meshes_falls_back() {
    let doc = model_doc(&[r#"<object id="1" type="model"/>"#.to_string()], &[("1", IDENTITY)]);
    let r = ingest(&zip_of(&[("3D/3dmodel.model", &doc)]), "empty.3mf");
    assert!(r.is_fallback);
    assert_eq!(r.error_kind.as_deref(), Some("no_geometry_found"));
    assert_eq!(r.mesh(), IndexedMesh::placeholder());
}

#[test]
fn malformed_descriptor_falls_back() {
    let r = ingest(
        &zip_of(&[("3D/3dmodel.model", "<model><resources><object id=\"1\"></resources></model>")]),
        "bad.3mf",
    );
    assert!(r.is_fallback);
    assert_eq!(r.error_kind.as_deref(), Some("malformed_document"));
}

#[test]
fn primary_found_through_relationships() {
    let doc = model_doc(&[object_with_mesh("1", &cube_mesh(2.0))], &[("1", IDENTITY)]);
    let rels = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
 <Relationship Target="/models/main.model" Id="rel0" Type="http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel"/>
</Relationships>"#;
    let r = ingest(
        &zip_of(&[("_rels/.rels", rels), ("models/main.model", &doc)]),
        "renamed.3mf",
    );
    assert!(!r.is_fallback, "{:?}", r.error);
    assert_eq!(r.vertex_count(), 8);
}
