use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Tunables for one ingestion. Missing fields fall back to the defaults, so a
/// config file only needs to list what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Vertices/triangles handled per cooperative batch.
    pub chunk_size: usize,
    pub max_input_bytes: u64,
    /// Archive entries larger than this are indexed but never loaded.
    pub max_entry_bytes: u64,
    /// Per-object descriptors larger than this are skipped by the assembler.
    pub max_object_file_bytes: u64,
    pub verify_checksums: bool,
    pub primary_model_paths: Vec<String>,
    pub slicer_config_paths: Vec<String>,
    pub plate_info_paths: Vec<String>,
    pub model_settings_paths: Vec<String>,
    pub slice_info_paths: Vec<String>,
    pub scan_suffixes: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5_000,
            max_input_bytes: 512 * 1024 * 1024,
            max_entry_bytes: 256 * 1024 * 1024,
            max_object_file_bytes: 64 * 1024 * 1024,
            verify_checksums: true,
            primary_model_paths: strings(&[
                "3D/3dmodel.model",
                "3D/3DModel.model",
                "3d/3dmodel.model",
                "3D/model.model",
            ]),
            slicer_config_paths: strings(&[
                "Metadata/Slic3r_PE.config",
                "Metadata/project_settings.config",
                "Metadata/print_profile.config",
            ]),
            plate_info_paths: strings(&["Metadata/plate_1.json"]),
            model_settings_paths: strings(&[
                "Metadata/model_settings.config",
                "Metadata/Slic3r_PE_model.config",
            ]),
            slice_info_paths: strings(&["Metadata/slice_info.config"]),
            scan_suffixes: strings(&[".model", ".xml"]),
        }
    }
}

impl IngestConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parsing ingest config")
    }

    pub fn from_json_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&s)
    }
}

fn strings(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg = IngestConfig::from_json_str(r#"{ "chunk_size": 16, "verify_checksums": false }"#).unwrap();
        assert_eq!(cfg.chunk_size, 16);
        assert!(!cfg.verify_checksums);
        assert_eq!(cfg.primary_model_paths[0], "3D/3dmodel.model");
        assert_eq!(cfg.max_object_file_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn garbage_config_is_an_error() {
        assert!(IngestConfig::from_json_str("chunk_size = 3").is_err());
    }
}
