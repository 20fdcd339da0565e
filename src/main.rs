use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};

use modelingest_lib::{
    ingest_with_config, logging::init_logs, orient::Orientation, BoundingBox, Diagnostic, ExtractedSettings,
    GeometryResult, IngestConfig,
};

/// Reads a 3MF, STL, OBJ, PLY or glTF file and prints what was recovered as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// JSON file with `IngestConfig` overrides
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Run the orientation optimizer on the result
    #[arg(short, long)]
    orient: bool,

    #[arg(short, long)]
    pretty: bool,

    /// Include positions and indices in the output
    #[arg(long)]
    full: bool,

    /// Log filter, `RUST_LOG` takes precedence
    #[arg(long, value_name = "FILTER")]
    log: Option<String>,

    #[arg(long, value_name = "DIR", default_value = ".")]
    log_dir: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary<'a> {
    file: String,
    vertices: usize,
    triangles: usize,
    bounding_box: BoundingBox,
    world_bounding_box: BoundingBox,
    is_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<&'a ExtractedSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    orientation: Option<Orientation>,
    diagnostics: &'a [Diagnostic],
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = init_logs(args.log.as_deref(), &args.log_dir)?;

    let config = match &args.config {
        Some(path) => IngestConfig::from_json_file(path)?,
        None => IngestConfig::default(),
    };
    debug!("config: {:?}", config);

    let bytes = std::fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut result = ingest_with_config(&bytes, &file_name, &config);
    let orientation = (args.orient && !result.is_fallback).then(|| result.orient());
    info!(
        "{}: {} vertices, {} triangles, fallback: {}",
        file_name,
        result.vertex_count(),
        result.triangle_count(),
        result.is_fallback
    );

    let json = if args.full {
        to_json(&result, args.pretty)?
    } else {
        to_json(&summary(&file_name, &result, orientation), args.pretty)?
    };
    println!("{}", json);
    Ok(())
}

fn summary<'a>(file: &str, result: &'a GeometryResult, orientation: Option<Orientation>) -> Summary<'a> {
    Summary {
        file: file.to_string(),
        vertices: result.vertex_count(),
        triangles: result.triangle_count(),
        bounding_box: result.bounding_box,
        world_bounding_box: result.world_bounding_box(),
        is_fallback: result.is_fallback,
        error: result.error.as_deref(),
        settings: result.settings.as_ref(),
        orientation,
        diagnostics: &result.diagnostics,
    }
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    let s = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    s.context("serializing result")
}
