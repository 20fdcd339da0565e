//! Collects every mesh of a container into one indexed mesh.
//!
//! Mesh sources are tried as an ordered list of [`Strategy`]s. The first one
//! that produces any vertex ends the search. All strategies write into the
//! same [`Accumulator`], so indices stay valid across files.

use std::collections::BTreeSet;

use nalgebra::Matrix4;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::{normalize_path, Archive};
use crate::config::IngestConfig;
use crate::error::{Diagnostic, IngestError, Result};
use crate::fragment::{parse_mesh, MeshFragment};
use crate::mesh::{transform_points, IndexedMesh};
use crate::model::{MeshElement, ModelDocument};
use crate::transform::{matrix_from_values, parse_transform_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// `<mesh>` elements inline in the primary descriptor.
    PrimaryDocument,
    /// Per-object descriptors referenced through `path` attributes, plus
    /// `3D/Objects/object_<n>.model` entries.
    ExternalObjects,
    /// Every model-like entry that mentions a mesh.
    ArchiveScan,
}

pub const STRATEGIES: [Strategy; 3] = [Strategy::PrimaryDocument, Strategy::ExternalObjects, Strategy::ArchiveScan];

#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub mesh: IndexedMesh,
    /// Strategy that produced the geometry.
    pub strategy: Option<Strategy>,
    /// Object id, as referenced by build items, of the first object that
    /// contributed vertices.
    pub contributor: Option<String>,
    /// Archive entries that contributed vertices, in order.
    pub sources: Vec<String>,
    pub dropped_triangles: usize,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Default)]
struct Accumulator {
    mesh: IndexedMesh,
    contributor: Option<String>,
    sources: Vec<String>,
    dropped_triangles: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Accumulator {
    fn offset(&self) -> u32 {
        self.mesh.positions.len() as u32
    }

    fn push(
        &mut self,
        mut fragment: MeshFragment,
        source: &str,
        object: Option<&str>,
        transform: Option<&Matrix4<f64>>,
    ) {
        self.dropped_triangles += fragment.dropped_triangles;
        if fragment.is_empty() {
            return;
        }
        if let Some(m) = transform {
            transform_points(&mut fragment.positions, m);
        }
        if self.contributor.is_none() {
            self.contributor = object.map(str::to_string);
        }
        if self.sources.last().map(String::as_str) != Some(source) {
            self.sources.push(source.to_string());
        }
        self.mesh.positions.extend(fragment.positions);
        self.mesh.indices.extend(fragment.indices);
    }

    fn skip(&mut self, source: &str, err: &IngestError) {
        warn!("skipping {}: {}", source, err);
        self.diagnostics
            .push(Diagnostic::warning(format!("skipped {source}: {err}")));
    }

    /// Parses `meshes` of `doc` into the accumulator, moved by `transform`
    /// when given. A broken mesh element is skipped, the others are still
    /// read.
    async fn read_meshes<'a>(
        &mut self,
        doc: &ModelDocument,
        meshes: impl Iterator<Item = &'a MeshElement>,
        object: impl Fn(&MeshElement) -> Option<String>,
        transform: Option<&Matrix4<f64>>,
        config: &IngestConfig,
    ) {
        for m in meshes {
            match parse_mesh(doc.mesh_xml(m), &doc.path, self.offset(), config.chunk_size).await {
                Ok(fragment) => self.push(fragment, &doc.path, object(m).as_deref(), transform),
                Err(e) => self.skip(&doc.path, &e),
            }
        }
    }
}

/// Runs the strategies in order over `archive`, with `primary` as the already
/// parsed model descriptor. Fails with [`IngestError::NoGeometryFound`] only
/// when no strategy produced a vertex.
pub async fn assemble(archive: &Archive, primary: &ModelDocument, config: &IngestConfig) -> Result<Assembly> {
    let mut acc = Accumulator::default();
    let mut visited: BTreeSet<String> = BTreeSet::new();
    visited.insert(normalize_path(&primary.path).to_string());

    for strategy in STRATEGIES {
        match strategy {
            Strategy::PrimaryDocument => primary_document(&mut acc, primary, config).await,
            Strategy::ExternalObjects => external_objects(&mut acc, archive, primary, config, &mut visited).await,
            Strategy::ArchiveScan => archive_scan(&mut acc, archive, config, &mut visited).await,
        }

        if !acc.mesh.is_empty() {
            info!(
                "{:?}: {} vertices, {} triangles from {:?}",
                strategy,
                acc.mesh.vertex_count(),
                acc.mesh.triangle_count(),
                acc.sources
            );
            return Ok(Assembly {
                mesh: acc.mesh,
                strategy: Some(strategy),
                contributor: acc.contributor,
                sources: acc.sources,
                dropped_triangles: acc.dropped_triangles,
                diagnostics: acc.diagnostics,
            });
        }
        debug!("{:?} found no vertices", strategy);
    }

    Err(IngestError::NoGeometryFound(primary.path.clone()))
}

async fn primary_document(acc: &mut Accumulator, doc: &ModelDocument, config: &IngestConfig) {
    acc.read_meshes(
        doc,
        doc.meshes.iter(),
        |m| m.object_id.as_deref().map(|id| placed_object(doc, id)),
        None,
        config,
    )
    .await;
}

/// The id build items use for `id`: itself if placed directly, else the
/// first wrapper object with a component pointing at it.
fn placed_object(doc: &ModelDocument, id: &str) -> String {
    if doc.build.get_item_by_id(id).is_some() {
        return id.to_string();
    }
    doc.objects
        .iter()
        .find(|o| o.components.iter().any(|c| c.path.is_none() && c.objectid == id))
        .map(|o| o.id.clone())
        .unwrap_or_else(|| id.to_string())
}

/// One component pointing into a per-object descriptor.
#[derive(Debug, Clone, PartialEq)]
struct PartRef {
    /// Object in the primary document that build items reference.
    contributor: Option<String>,
    /// Object to take from the file; all meshes when `None`.
    object_id: Option<String>,
    /// Component transform, `None` for identity.
    transform: Option<Matrix4<f64>>,
}

/// One per-object descriptor to read, with every component that points
/// into it. Files found only by name have no parts and are read whole.
#[derive(Debug, Clone, PartialEq)]
struct ObjectFile {
    path: String,
    contributor: Option<String>,
    parts: Vec<PartRef>,
}

fn component_matrix(transform: Option<&str>) -> Option<Matrix4<f64>> {
    let m = matrix_from_values(&parse_transform_values(transform?)?);
    (m != Matrix4::identity()).then_some(m)
}

fn object_files(archive: &Archive, primary: &ModelDocument) -> Vec<ObjectFile> {
    let mut files: Vec<ObjectFile> = vec![];
    for r in primary.external_refs() {
        let path = normalize_path(&r.path).to_string();
        let part = PartRef {
            contributor: Some(r.declaring_object.clone()),
            object_id: r.object_id,
            transform: component_matrix(r.transform.as_deref()),
        };
        match files.iter_mut().find(|f| f.path == path) {
            Some(file) => file.parts.push(part),
            None => files.push(ObjectFile {
                path,
                contributor: Some(r.declaring_object),
                parts: vec![part],
            }),
        }
    }

    if let Ok(re) = Regex::new(r"^3D/Objects/object_(\d+)\.model$") {
        for entry in archive.list_entries() {
            let Some(c) = re.captures(entry) else {
                continue;
            };
            if !files.iter().any(|f| f.path == entry) {
                files.push(ObjectFile {
                    path: entry.to_string(),
                    contributor: Some(c[1].to_string()),
                    parts: vec![],
                });
            }
        }
    }

    /// archive order, unknown paths last
    files.sort_by_key(|f| archive.index_of(&f.path).unwrap_or(usize::MAX));
    files
}

fn load_document(archive: &Archive, path: &str, limit: u64) -> Result<ModelDocument> {
    let bytes = archive.read_entry(path)?;
    if bytes.len() as u64 > limit {
        return Err(IngestError::EntryTooLarge {
            path: path.to_string(),
            size: bytes.len() as u64,
            limit,
        });
    }
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    ModelDocument::parse(path, String::from_utf8_lossy(bytes).into_owned())
}

async fn external_objects(
    acc: &mut Accumulator,
    archive: &Archive,
    primary: &ModelDocument,
    config: &IngestConfig,
    visited: &mut BTreeSet<String>,
) {
    for file in object_files(archive, primary) {
        if !visited.insert(file.path.clone()) {
            continue;
        }
        let doc = match load_document(archive, &file.path, config.max_object_file_bytes) {
            Ok(doc) => doc,
            Err(e) => {
                acc.skip(&file.path, &e);
                continue;
            }
        };

        let has_object = |id: &str| doc.meshes.iter().any(|m| m.object_id.as_deref() == Some(id));
        let (found, missing): (Vec<&PartRef>, Vec<&PartRef>) = file
            .parts
            .iter()
            .partition(|p| p.object_id.as_deref().map_or(true, |id| has_object(id)));

        if found.is_empty() {
            if !file.parts.is_empty() {
                debug!("{}: no referenced object found, reading all meshes", file.path);
            }
            let contributor = file.contributor.clone();
            acc.read_meshes(&doc, doc.meshes.iter(), |_| contributor.clone(), None, config)
                .await;
            continue;
        }

        for part in missing {
            warn!("{}: object {:?} not found", file.path, part.object_id);
            acc.diagnostics.push(Diagnostic::warning(format!(
                "{}: referenced object {} not found",
                file.path,
                part.object_id.as_deref().unwrap_or("?")
            )));
        }

        // a part per component, an object referenced twice is read twice
        for part in found {
            acc.read_meshes(
                &doc,
                doc.meshes
                    .iter()
                    .filter(|m| part.object_id.is_none() || m.object_id == part.object_id),
                |_| part.contributor.clone(),
                part.transform.as_ref(),
                config,
            )
            .await;
        }
    }
}

fn looks_like_mesh(bytes: &[u8]) -> bool {
    bytes.windows(5).any(|w| w == b"<mesh" || w == b":mesh")
}

async fn archive_scan(
    acc: &mut Accumulator,
    archive: &Archive,
    config: &IngestConfig,
    visited: &mut BTreeSet<String>,
) {
    for entry in archive.entries() {
        let lower = entry.path.to_ascii_lowercase();
        if !config.scan_suffixes.iter().any(|s| lower.ends_with(&s.to_ascii_lowercase())) {
            continue;
        }
        if visited.contains(&entry.path) || !looks_like_mesh(&entry.bytes) {
            continue;
        }
        visited.insert(entry.path.clone());

        debug!("scanning {}", entry.path);
        let doc = match load_document(archive, &entry.path, config.max_object_file_bytes) {
            Ok(doc) => doc,
            Err(e) => {
                acc.skip(&entry.path, &e);
                continue;
            }
        };
        acc.read_meshes(&doc, doc.meshes.iter(), |m| m.object_id.clone(), None, config)
            .await;
    }
}
