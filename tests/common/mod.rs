//! Builders for in-memory 3MF containers.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::{write::SimpleFileOptions, ZipWriter};

pub const CORE_NS: &str = "http://schemas.microsoft.com/3dmanufacturing/core/2015/02";
pub const PROD_NS: &str = "http://schemas.microsoft.com/3dmanufacturing/production/2015/06";

pub fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
    let mut w = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        w.start_file(*name, SimpleFileOptions::default()).unwrap();
        w.write_all(data.as_bytes()).unwrap();
    }
    w.finish().unwrap().into_inner()
}

/// `<mesh>` of an axis aligned cube from `0` to `size`, 8 vertices and 12
/// triangles.
pub fn cube_mesh(size: f32) -> String {
    let s = size;
    let vertices = [
        [0., 0., 0.],
        [s, 0., 0.],
        [s, s, 0.],
        [0., s, 0.],
        [0., 0., s],
        [s, 0., s],
        [s, s, s],
        [0., s, s],
    ];
    let triangles = [
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [2, 3, 7],
        [2, 7, 6],
        [1, 2, 6],
        [1, 6, 5],
        [0, 7, 3],
        [0, 4, 7],
    ];
    mesh_xml(&vertices, &triangles)
}

pub fn mesh_xml(vertices: &[[f32; 3]], triangles: &[[u32; 3]]) -> String {
    let mut s = String::from("<mesh><vertices>");
    for v in vertices {
        s.push_str(&format!(r#"<vertex x="{}" y="{}" z="{}"/>"#, v[0], v[1], v[2]));
    }
    s.push_str("</vertices><triangles>");
    for t in triangles {
        s.push_str(&format!(r#"<triangle v1="{}" v2="{}" v3="{}"/>"#, t[0], t[1], t[2]));
    }
    s.push_str("</triangles></mesh>");
    s
}

/// Model document with the given `<object>` elements and `(objectid, transform)`
/// build items.
pub fn model_doc(objects: &[String], items: &[(&str, &str)]) -> String {
    let mut s = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<model unit="millimeter" xml:lang="en-US" xmlns="{CORE_NS}" xmlns:p="{PROD_NS}">
 <metadata name="Application">PrusaSlicer-2.7.1</metadata>
 <metadata name="CreationDate">2024-02-03</metadata>
 <resources>
"#
    );
    for o in objects {
        s.push_str(o);
        s.push('\n');
    }
    s.push_str(" </resources>\n <build>\n");
    for (id, transform) in items {
        s.push_str(&format!(r#"  <item objectid="{id}" transform="{transform}"/>"#));
        s.push('\n');
    }
    s.push_str(" </build>\n</model>\n");
    s
}

pub fn object_with_mesh(id: &str, mesh: &str) -> String {
    format!(r#"<object id="{id}" type="model">{mesh}</object>"#)
}

pub const IDENTITY: &str = "1 0 0 0 1 0 0 0 1 0 0 0";
