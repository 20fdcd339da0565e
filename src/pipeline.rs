//! Entry point: bytes and a file name in, [`GeometryResult`] out.
//!
//! [`ingest`] never fails. Anything that leaves the pipeline without usable
//! geometry is turned into the placeholder cube with the error attached and
//! `is_fallback` set.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::assemble::{assemble, Strategy};
use crate::config::IngestConfig;
use crate::error::{Diagnostic, IngestError, Result};
use crate::formats::{read_single_file, SourceFormat};
use crate::mesh::{BoundingBox, IndexedMesh};
use crate::model::ModelDocument;
use crate::normalize::{normalize, Normalization};
use crate::orient::{optimize_orientation, Orientation};
use crate::settings::{extract_settings, ExtractedSettings};
use crate::transform::{resolve_placement, AffineTransform, PlacementMatch};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryResult {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
    pub bounding_box: BoundingBox,
    /// The geometry is the placeholder and must not be treated as printable.
    pub is_fallback: bool,
    pub error: Option<String>,
    /// [`IngestError::kind`] of `error`.
    pub error_kind: Option<String>,
    pub settings: Option<ExtractedSettings>,
    /// Build item transform of the model. Positions are in object space.
    pub placement: Option<AffineTransform>,
    pub placement_match: Option<PlacementMatch>,
    pub source_format: Option<SourceFormat>,
    pub normalization: Normalization,
    /// Mesh source strategy, containers only.
    pub strategy: Option<Strategy>,
    pub diagnostics: Vec<Diagnostic>,
}

impl GeometryResult {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn mesh(&self) -> IndexedMesh {
        IndexedMesh::new(self.positions.clone(), self.indices.clone())
    }

    /// Bounding box with the placement applied.
    pub fn world_bounding_box(&self) -> BoundingBox {
        match &self.placement {
            Some(p) => self.bounding_box.transformed(&p.to_matrix()),
            None => self.bounding_box,
        }
    }

    /// Runs the orientation optimizer on the ingested mesh.
    pub fn orient(&mut self) -> Orientation {
        let mut mesh = IndexedMesh::new(std::mem::take(&mut self.positions), std::mem::take(&mut self.indices));
        let orientation = optimize_orientation(&mut mesh);
        self.bounding_box = mesh.bounding_box();
        self.positions = mesh.positions;
        self.indices = mesh.indices;
        orientation
    }

    fn fallback(err: IngestError, partial: Partial) -> Self {
        warn!("using placeholder geometry: {}", err);
        let mesh = IndexedMesh::placeholder();
        let mut diagnostics = partial.diagnostics;
        diagnostics.push(Diagnostic::error(&err));
        Self {
            bounding_box: mesh.bounding_box(),
            positions: mesh.positions,
            indices: mesh.indices,
            is_fallback: true,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            settings: partial.settings,
            placement: None,
            placement_match: None,
            source_format: partial.format,
            normalization: Normalization::Unchanged,
            strategy: None,
            diagnostics,
        }
    }
}

/// What survives of a failed ingestion.
#[derive(Debug, Default)]
struct Partial {
    format: Option<SourceFormat>,
    settings: Option<ExtractedSettings>,
    diagnostics: Vec<Diagnostic>,
}

/// Successful geometry before it is packed into a [`GeometryResult`].
#[derive(Debug)]
struct Ingested {
    mesh: IndexedMesh,
    placement: Option<AffineTransform>,
    placement_match: Option<PlacementMatch>,
    strategy: Option<Strategy>,
}

/// Ingests with the default [`IngestConfig`].
pub fn ingest(bytes: &[u8], file_name: &str) -> GeometryResult {
    ingest_with_config(bytes, file_name, &IngestConfig::default())
}

/// Blocking wrapper around [`ingest_async`] on a single-threaded runtime.
/// Must not be called from inside another runtime; use [`ingest_async`] there.
pub fn ingest_with_config(bytes: &[u8], file_name: &str, config: &IngestConfig) -> GeometryResult {
    match tokio::runtime::Builder::new_current_thread().build() {
        Ok(rt) => rt.block_on(ingest_async(bytes, file_name, config)),
        Err(e) => GeometryResult::fallback(IngestError::Runtime(e.to_string()), Partial::default()),
    }
}

pub async fn ingest_async(bytes: &[u8], file_name: &str, config: &IngestConfig) -> GeometryResult {
    let format = match SourceFormat::from_file_name(file_name) {
        Ok(format) => format,
        Err(e) => return GeometryResult::fallback(e, Partial::default()),
    };
    let mut partial = Partial {
        format: Some(format),
        ..Default::default()
    };

    if bytes.len() as u64 > config.max_input_bytes {
        let err = IngestError::InputTooLarge {
            size: bytes.len() as u64,
            limit: config.max_input_bytes,
        };
        return GeometryResult::fallback(err, partial);
    }

    info!("ingesting {} ({} bytes, {:?})", file_name, bytes.len(), format);

    let outcome = if format.is_container() {
        ingest_container(bytes, config, &mut partial).await
    } else {
        read_single_file(bytes, file_name, format).map(|mesh| Ingested {
            mesh,
            placement: None,
            placement_match: None,
            strategy: None,
        })
    };

    let mut ingested = match outcome {
        Ok(ingested) => ingested,
        Err(e) => return GeometryResult::fallback(e, partial),
    };

    let normalization = normalize(&mut ingested.mesh, format);
    let bounding_box = match validate(&ingested.mesh) {
        Ok(bb) => bb,
        Err(e) => return GeometryResult::fallback(e, partial),
    };

    debug!(
        "{}: {} vertices, {} triangles, bbox {:?}",
        file_name,
        ingested.mesh.vertex_count(),
        ingested.mesh.triangle_count(),
        bounding_box
    );

    GeometryResult {
        positions: ingested.mesh.positions,
        indices: ingested.mesh.indices,
        bounding_box,
        is_fallback: false,
        error: None,
        error_kind: None,
        settings: partial.settings,
        placement: ingested.placement,
        placement_match: ingested.placement_match,
        source_format: Some(format),
        normalization,
        strategy: ingested.strategy,
        diagnostics: partial.diagnostics,
    }
}

/// Empty, non-finite or NaN geometry cannot be displayed.
fn validate(mesh: &IndexedMesh) -> Result<BoundingBox> {
    if mesh.positions.iter().flatten().any(|v| !v.is_finite()) {
        return Err(IngestError::InvalidGeometry("non-finite vertex coordinate".to_string()));
    }
    let bb = mesh.bounding_box();
    if bb.is_empty() || !bb.is_finite() {
        return Err(IngestError::InvalidGeometry(format!("bounding box {:?}", bb)));
    }
    Ok(bb)
}

/// Container path. Settings are extracted alongside geometry and stored in
/// `partial` whether or not geometry is found.
async fn ingest_container(bytes: &[u8], config: &IngestConfig, partial: &mut Partial) -> Result<Ingested> {
    let archive = Archive::open(bytes, config)?;
    let primary = archive.resolve_primary_model(&config.primary_model_paths);
    let primary_path = primary.as_ref().ok().cloned();

    let geometry = async {
        let path = primary?;
        let doc = ModelDocument::parse(&path, archive.read_text(&path)?)?;
        let assembly = assemble(&archive, &doc, config).await?;
        Ok::<_, IngestError>((doc, assembly))
    };
    let settings = extract_settings(&archive, primary_path.as_deref(), config);

    let (geometry, (settings, settings_diagnostics)) = tokio::join!(geometry, settings);

    partial.diagnostics.extend(settings_diagnostics);
    if !settings.is_empty() {
        partial.settings = Some(settings);
    }

    let (doc, assembly) = geometry?;
    partial.diagnostics.extend(assembly.diagnostics);
    if assembly.dropped_triangles > 0 {
        partial.diagnostics.push(Diagnostic::warning(format!(
            "dropped {} triangles referencing missing vertices",
            assembly.dropped_triangles
        )));
    }

    let placement = resolve_placement(&doc.build.item, assembly.contributor.as_deref());
    if let PlacementMatch::FirstItemFallback {
        geometry_object,
        used_object,
    } = &placement.matched
    {
        partial.diagnostics.push(Diagnostic::warning(format!(
            "no build item references geometry object {}, used the transform of object {}",
            geometry_object.as_deref().unwrap_or("?"),
            used_object
        )));
    }

    Ok(Ingested {
        mesh: assembly.mesh,
        placement: Some(placement.transform),
        placement_match: Some(placement.matched),
        strategy: assembly.strategy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII_STL: &str = "solid t
facet normal 0 0 1
outer loop
vertex 0 0 0
vertex 10 0 0
vertex 0 10 5
endloop
endfacet
endsolid t
";

    #[test]
    fn unsupported_extension_falls_back() {
        let r = ingest(b"whatever", "model.step");
        assert!(r.is_fallback);
        assert_eq!(r.error_kind.as_deref(), Some("unsupported_format"));
        assert_eq!(r.mesh(), IndexedMesh::placeholder());
        assert_eq!(r.source_format, None);
    }

    #[test]
    fn oversized_input_falls_back() {
        let config = IngestConfig {
            max_input_bytes: 4,
            ..Default::default()
        };
        let r = ingest_with_config(ASCII_STL.as_bytes(), "t.stl", &config);
        assert!(r.is_fallback);
        assert_eq!(r.error_kind.as_deref(), Some("input_too_large"));
        assert_eq!(r.source_format, Some(SourceFormat::Stl));
    }

    #[test]
    fn single_file_has_no_placement() {
        let r = ingest(ASCII_STL.as_bytes(), "t.stl");
        assert!(!r.is_fallback, "{:?}", r.error);
        assert_eq!(r.vertex_count(), 3);
        assert_eq!(r.triangle_count(), 1);
        assert!(r.placement.is_none());
        assert_eq!(r.world_bounding_box(), r.bounding_box);
    }

    #[test]
    fn nan_vertices_are_invalid() {
        let mesh = IndexedMesh::new(vec![[0., f32::NAN, 0.]], vec![]);
        assert!(matches!(validate(&mesh), Err(IngestError::InvalidGeometry(_))));
        assert!(matches!(validate(&IndexedMesh::default()), Err(IngestError::InvalidGeometry(_))));
    }

    #[test]
    fn broken_container_falls_back() {
        let r = ingest(b"PK\x03\x04 not really", "x.3mf");
        assert!(r.is_fallback);
        assert_eq!(r.error_kind.as_deref(), Some("archive_corrupt"));
        assert_eq!(r.diagnostics.last().map(|d| d.level), Some(crate::error::DiagnosticLevel::Error));
    }

    #[test]
    fn orient_updates_bounding_box() {
        let mut r = ingest(ASCII_STL.as_bytes(), "t.stl");
        r.orient();
        assert_eq!(r.bounding_box, r.mesh().bounding_box());
        assert!(r.bounding_box.min[1].abs() < 1e-4);
    }
}
