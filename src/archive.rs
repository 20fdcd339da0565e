//! Read-only view over a ZIP container.
//!
//! Every entry is decompressed once when the archive is opened, so later
//! stages can share `&Archive` freely. Entries above the size ceiling are
//! indexed but never loaded.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use regex::Regex;
use tracing::{debug, trace, warn};
use zip::ZipArchive;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};

/// One archive member. Immutable once read.
#[derive(Debug, Clone)]
pub struct ContainerEntry {
    pub path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct Archive {
    /// In archive (central directory) order.
    entries: Vec<ContainerEntry>,
    by_name: BTreeMap<String, usize>,
    /// Entries skipped for size, with their declared uncompressed size.
    oversized: BTreeMap<String, u64>,
    max_entry_bytes: u64,
}

impl Archive {
    pub fn open(bytes: &[u8], config: &IngestConfig) -> Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;

        let mut entries = Vec::with_capacity(zip.len());
        let mut by_name = BTreeMap::new();
        let mut oversized = BTreeMap::new();

        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let path = file.name().to_string();
            let size = file.size();

            if size > config.max_entry_bytes {
                warn!("skipping oversized entry {} ({} bytes)", path, size);
                oversized.insert(path, size);
                continue;
            }

            let mut buf = Vec::with_capacity(size as usize);
            match file.read_to_end(&mut buf) {
                Ok(_) => {}
                Err(e) if config.verify_checksums => {
                    return Err(IngestError::ArchiveCorrupt(format!("{}: {}", path, e)));
                }
                Err(e) => {
                    // keep whatever decompressed before the checksum check
                    warn!("ignoring read error on {}: {}", path, e);
                }
            }

            trace!("entry[{}] {} ({} bytes)", i, path, buf.len());
            by_name.insert(path.clone(), entries.len());
            entries.push(ContainerEntry { path, bytes: buf });
        }

        debug!("archive opened: {} entries, {} oversized", entries.len(), oversized.len());

        Ok(Self {
            entries,
            by_name,
            oversized,
            max_entry_bytes: config.max_entry_bytes,
        })
    }

    /// Entry paths in archive order.
    pub fn list_entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.path.as_str())
    }

    pub fn entries(&self) -> &[ContainerEntry] {
        &self.entries
    }

    pub fn contains(&self, path: &str) -> bool {
        self.by_name.contains_key(normalize_path(path))
    }

    /// Position of `path` in archive order.
    pub fn index_of(&self, path: &str) -> Option<usize> {
        self.by_name.get(normalize_path(path)).copied()
    }

    pub fn read_entry(&self, path: &str) -> Result<&[u8]> {
        let path = normalize_path(path);
        if let Some(&i) = self.by_name.get(path) {
            return Ok(&self.entries[i].bytes);
        }
        if let Some(&size) = self.oversized.get(path) {
            return Err(IngestError::EntryTooLarge {
                path: path.to_string(),
                size,
                limit: self.max_entry_bytes,
            });
        }
        Err(IngestError::EntryMissing {
            path: path.to_string(),
        })
    }

    /// Entry decoded as UTF-8, replacing invalid sequences.
    pub fn read_text(&self, path: &str) -> Result<String> {
        let bytes = self.read_entry(path)?;
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Path of the model descriptor: the first existing candidate, then the
    /// target of the 3D model relationship in `_rels/.rels`.
    pub fn resolve_primary_model(&self, candidates: &[String]) -> Result<String> {
        for c in candidates {
            if self.contains(c) {
                debug!("primary model descriptor: {}", c);
                return Ok(normalize_path(c).to_string());
            }
        }

        let mut tried = candidates.to_vec();
        tried.push(RELS_PATH.to_string());

        if let Ok(rels) = self.read_text(RELS_PATH) {
            if let Some(target) = model_relationship_target(&rels) {
                if self.contains(&target) {
                    debug!("primary model descriptor from relationships: {}", target);
                    return Ok(normalize_path(&target).to_string());
                }
                tried.push(target);
            }
        }

        Err(IngestError::ModelDescriptorMissing { tried })
    }
}

const RELS_PATH: &str = "_rels/.rels";

/// Archive paths in model documents are absolute (`/3D/Objects/a.model`),
/// zip names are not.
pub fn normalize_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn model_relationship_target(rels: &str) -> Option<String> {
    let re = Regex::new(r#"<Relationship\b[^>]*>"#).ok()?;
    let target_re = Regex::new(r#"Target\s*=\s*"([^"]+)""#).ok()?;
    for m in re.find_iter(rels) {
        let tag = m.as_str();
        if !tag.contains("/3dmodel\"") {
            continue;
        }
        if let Some(c) = target_re.captures(tag) {
            return Some(normalize_path(&c[1]).to_string());
        }
    }
    None
}
