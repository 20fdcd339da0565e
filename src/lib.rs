#![allow(unused_doc_comments)]

pub mod archive;
pub mod assemble;
pub mod config;
pub mod error;
pub mod formats;
pub mod fragment;
pub mod logging;
pub mod mesh;
pub mod metadata;
pub mod model;
pub mod normalize;
pub mod orient;
pub mod pipeline;
pub mod settings;
pub mod transform;
pub mod utils;

pub use crate::{
    config::IngestConfig,
    error::{Diagnostic, DiagnosticLevel, IngestError},
    formats::SourceFormat,
    mesh::{BoundingBox, IndexedMesh},
    orient::optimize_orientation,
    pipeline::{ingest, ingest_async, ingest_with_config, GeometryResult},
    settings::ExtractedSettings,
    transform::{AffineTransform, Euler, PlacementMatch, Vec3},
};
