//! The model descriptor: objects, build items, metadata and the location of
//! every `<mesh>` element.
//!
//! Meshes are only located here, not parsed; [`crate::fragment`] reads them
//! later from [`ModelDocument::mesh_xml`].

use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{IngestError, Result};
use crate::transform::AffineTransform;

#[derive(Debug, Clone, Serialize)]
pub struct ModelDocument {
    pub path: String,
    pub unit: Unit,
    pub metadata: Vec<Metadata>,
    pub objects: Vec<Object>,
    pub build: Build,
    pub meshes: Vec<MeshElement>,
    #[serde(skip)]
    text: String,
}

/// Model measurement unit, default is millimeter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Micron,
    #[default]
    Millimeter,
    Centimeter,
    Inch,
    Foot,
    Meter,
}

impl Unit {
    fn from_attr(s: &str) -> Self {
        match s {
            "micron" => Unit::Micron,
            "centimeter" => Unit::Centimeter,
            "inch" => Unit::Inch,
            "foot" => Unit::Foot,
            "meter" => Unit::Meter,
            _ => Unit::Millimeter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Object {
    pub id: String,
    pub name: Option<String>,
    pub partnumber: Option<String>,
    pub ty: Option<String>,
    /// Production extension: geometry stored in another descriptor.
    pub path: Option<String>,
    pub components: Vec<Component>,
    pub has_mesh: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Component {
    pub objectid: String,
    pub transform: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Build {
    pub item: Vec<BuildItem>,
}

impl Build {
    pub fn get_item_by_id(&self, id: &str) -> Option<&BuildItem> {
        self.item.iter().find(|i| i.object_id == id)
    }
}

/// One placement entry. `object_id` may name a pure wrapper object that
/// carries no geometry of its own.
#[derive(Debug, Clone, Serialize)]
pub struct BuildItem {
    pub object_id: String,
    pub transform: AffineTransform,
    pub part_number: Option<String>,
}

/// Where one `<mesh>` element's content sits in the document text.
#[derive(Debug, Clone, Serialize)]
pub struct MeshElement {
    /// Id of the enclosing `<object>`, if any.
    pub object_id: Option<String>,
    pub span: Range<usize>,
}

/// A reference from this document to geometry in another archive entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalRef {
    /// The object declared in this document, which build items point at.
    pub declaring_object: String,
    pub path: String,
    /// Object id inside the referenced file, when given.
    pub object_id: Option<String>,
    /// `transform` of the referencing component, in the wrapper's frame.
    pub transform: Option<String>,
}

impl ModelDocument {
    pub fn parse(path: &str, text: String) -> Result<Self> {
        let mut doc = ModelDocument {
            path: path.to_string(),
            unit: Unit::default(),
            metadata: vec![],
            objects: vec![],
            build: Build::default(),
            meshes: vec![],
            text: String::new(),
        };

        let mut reader = Reader::from_str(&text);
        reader.config_mut().trim_text(true);

        let mut depth = 0usize;
        let mut seen_element = false;
        let mut in_build = false;
        let mut current: Option<Object> = None;

        loop {
            let event = reader.read_event().map_err(|e| IngestError::malformed(path, e))?;
            match event {
                Event::Start(e) => {
                    seen_element = true;
                    match e.local_name().as_ref() {
                        b"mesh" => {
                            /// content is handed to the fragment parser later
                            let span = reader
                                .read_to_end(e.name())
                                .map_err(|err| IngestError::malformed(path, err))?;
                            if let Some(obj) = current.as_mut() {
                                obj.has_mesh = true;
                            }
                            doc.meshes.push(MeshElement {
                                object_id: current.as_ref().map(|o| o.id.clone()),
                                span: span.start as usize..span.end as usize,
                            });
                            continue;
                        }
                        b"metadata" if depth == 1 => {
                            let name = attr(&e, "name").unwrap_or_default();
                            let raw = reader
                                .read_text(e.name())
                                .map_err(|err| IngestError::malformed(path, err))?;
                            let value = quick_xml::escape::unescape(&raw)
                                .map(|v| v.into_owned())
                                .unwrap_or_else(|_| raw.into_owned());
                            doc.metadata.push(Metadata {
                                name,
                                value: Some(value.trim().to_string()).filter(|v| !v.is_empty()),
                            });
                            continue;
                        }
                        _ => {}
                    }
                    doc.open(&e, &mut current, &mut in_build, false);
                    depth += 1;
                }
                Event::Empty(e) => {
                    seen_element = true;
                    if e.local_name().as_ref() == b"metadata" && depth == 1 {
                        doc.metadata.push(Metadata {
                            name: attr(&e, "name").unwrap_or_default(),
                            value: attr(&e, "value"),
                        });
                        continue;
                    }
                    doc.open(&e, &mut current, &mut in_build, true);
                }
                Event::End(e) => {
                    depth = depth.saturating_sub(1);
                    match e.local_name().as_ref() {
                        b"object" => {
                            if let Some(obj) = current.take() {
                                doc.objects.push(obj);
                            }
                        }
                        b"build" => in_build = false,
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_element {
            return Err(IngestError::malformed(path, "document has no elements"));
        }
        if depth != 0 {
            return Err(IngestError::malformed(path, "unexpected end of document"));
        }

        debug!(
            "{}: {} objects, {} build items, {} meshes, {} metadata",
            path,
            doc.objects.len(),
            doc.build.item.len(),
            doc.meshes.len(),
            doc.metadata.len()
        );

        doc.text = text;
        Ok(doc)
    }

    fn open(&mut self, e: &BytesStart, current: &mut Option<Object>, in_build: &mut bool, empty: bool) {
        match e.local_name().as_ref() {
            b"model" => {
                if let Some(unit) = attr(e, "unit") {
                    self.unit = Unit::from_attr(&unit);
                }
            }
            b"object" => {
                let obj = Object {
                    id: attr(e, "id").unwrap_or_default(),
                    name: attr(e, "name"),
                    partnumber: attr(e, "partnumber"),
                    ty: attr(e, "type"),
                    path: attr(e, "path"),
                    components: vec![],
                    has_mesh: false,
                };
                trace!("object {}", obj.id);
                if empty {
                    self.objects.push(obj);
                } else {
                    *current = Some(obj);
                }
            }
            b"component" => {
                if let Some(obj) = current.as_mut() {
                    obj.components.push(Component {
                        objectid: attr(e, "objectid").unwrap_or_default(),
                        transform: attr(e, "transform"),
                        path: attr(e, "path"),
                    });
                }
            }
            b"build" => *in_build = !empty,
            b"item" if *in_build => {
                let transform = attr(e, "transform");
                self.build.item.push(BuildItem {
                    object_id: attr(e, "objectid").unwrap_or_default(),
                    transform: AffineTransform::from_attr(transform.as_deref()),
                    part_number: attr(e, "partnumber"),
                });
            }
            _ => {}
        }
    }

    /// Content of one located mesh element.
    pub fn mesh_xml(&self, mesh: &MeshElement) -> &str {
        self.text.get(mesh.span.clone()).unwrap_or("")
    }

    pub fn get_object(&self, id: &str) -> Option<&Object> {
        self.objects.iter().find(|o| o.id == id)
    }

    /// Any object or component carrying a path attribute means geometry lives
    /// in other descriptors.
    pub fn uses_external_geometry(&self) -> bool {
        self.objects
            .iter()
            .any(|o| o.path.is_some() || o.components.iter().any(|c| c.path.is_some()))
    }

    /// External geometry references in document order.
    pub fn external_refs(&self) -> Vec<ExternalRef> {
        let mut out = vec![];
        for obj in &self.objects {
            if let Some(path) = &obj.path {
                out.push(ExternalRef {
                    declaring_object: obj.id.clone(),
                    path: path.clone(),
                    object_id: Some(obj.id.clone()),
                    transform: None,
                });
            }
            for c in &obj.components {
                if let Some(path) = &c.path {
                    out.push(ExternalRef {
                        declaring_object: obj.id.clone(),
                        path: path.clone(),
                        object_id: Some(c.objectid.clone()).filter(|id| !id.is_empty()),
                        transform: c.transform.clone(),
                    });
                }
            }
        }
        out
    }

    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|m| m.name == name)
            .and_then(|m| m.value.as_deref())
    }
}

/// Attribute by local name, so `p:path` and `path` both match `"path"`.
fn attr(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name.as_bytes())
        .map(|a| match a.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}

/// Only the descriptor-level `<metadata>` tags, without locating meshes or
/// objects. Used by the settings extractor, which works off its own copy of
/// the document text.
pub fn parse_metadata_tags(text: &str) -> Vec<Metadata> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut out = vec![];
    let mut depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name();
                if depth == 1 && local.as_ref() == b"metadata" {
                    let name = attr(&e, "name").unwrap_or_default();
                    let Ok(raw) = reader.read_text(e.name()) else {
                        break;
                    };
                    let value = quick_xml::escape::unescape(&raw)
                        .map(|v| v.trim().to_string())
                        .unwrap_or_else(|_| raw.trim().to_string());
                    out.push(Metadata {
                        name,
                        value: Some(value).filter(|v| !v.is_empty()),
                    });
                } else if local.as_ref() == b"resources" || local.as_ref() == b"build" {
                    /// metadata only lives before the resources
                    break;
                } else {
                    depth += 1;
                }
            }
            Ok(Event::Empty(e)) if depth == 1 && e.local_name().as_ref() == b"metadata" => {
                out.push(Metadata {
                    name: attr(&e, "name").unwrap_or_default(),
                    value: attr(&e, "value"),
                });
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    out
}
