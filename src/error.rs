//! Error taxonomy for the ingestion pipeline.
//!
//! Stages return [`IngestError`]; the fallback supervisor in
//! [`crate::pipeline`] is the only place that turns one into a placeholder
//! result instead of propagating it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The container could not be indexed or an entry failed its checksum.
    #[error("archive is corrupt: {0}")]
    ArchiveCorrupt(String),

    /// None of the candidate paths for the model descriptor exist.
    #[error("model descriptor missing: tried {}", tried.join(", "))]
    ModelDescriptorMissing { tried: Vec<String> },

    #[error("malformed model document {path}: {message}")]
    MalformedDocument { path: String, message: String },

    #[error("no geometry found in {0}")]
    NoGeometryFound(String),

    #[error("unsupported format: {extension:?}")]
    UnsupportedFormat { extension: String },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("archive entry not found: {path}")]
    EntryMissing { path: String },

    #[error("archive entry {path} is {size} bytes, limit is {limit}")]
    EntryTooLarge { path: String, size: u64, limit: u64 },

    #[error("input is {size} bytes, limit is {limit}")]
    InputTooLarge { size: u64, limit: u64 },

    #[error("could not start the async runtime: {0}")]
    Runtime(String),
}

impl IngestError {
    /// Stable identifier for diagnostics and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::ArchiveCorrupt(_) => "archive_corrupt",
            IngestError::ModelDescriptorMissing { .. } => "model_descriptor_missing",
            IngestError::MalformedDocument { .. } => "malformed_document",
            IngestError::NoGeometryFound(_) => "no_geometry_found",
            IngestError::UnsupportedFormat { .. } => "unsupported_format",
            IngestError::InvalidGeometry(_) => "invalid_geometry",
            IngestError::EntryMissing { .. } => "entry_missing",
            IngestError::EntryTooLarge { .. } => "entry_too_large",
            IngestError::InputTooLarge { .. } => "input_too_large",
            IngestError::Runtime(_) => "runtime",
        }
    }

    pub(crate) fn malformed(path: &str, err: impl std::fmt::Display) -> Self {
        IngestError::MalformedDocument {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for IngestError {
    fn from(e: zip::result::ZipError) -> Self {
        IngestError::ArchiveCorrupt(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

/// A non-fatal event recorded while ingesting, returned alongside the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

impl Diagnostic {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(err: &IngestError) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: format!("{}: {}", err.kind(), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_descriptor_lists_candidates() {
        let err = IngestError::ModelDescriptorMissing {
            tried: vec!["3D/3dmodel.model".to_string(), "_rels/.rels".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("model descriptor missing"));
        assert!(msg.contains("3D/3dmodel.model, _rels/.rels"));
        assert_eq!(err.kind(), "model_descriptor_missing");
    }

    #[test]
    fn zip_errors_become_archive_corrupt() {
        let err: IngestError = zip::result::ZipError::FileNotFound.into();
        assert!(matches!(err, IngestError::ArchiveCorrupt(_)));
    }
}
