//! Slicer settings recovered from the container's metadata entries.
//!
//! Sources, each optional and independent:
//! - the key=value (or JSON) slicing config written by the slicer
//! - the JSON plate info
//! - `<metadata>` tags of the primary model descriptor
//! - per-object names and slice statistics from the XML metadata entries
//!
//! A source that is absent or fails to parse leaves its fields unset, and
//! [`extract_settings`] never fails.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::archive::Archive;
use crate::config::IngestConfig;
use crate::error::Diagnostic;
use crate::metadata::{orca_metadata, ps_metadata};
use crate::model::{parse_metadata_tags, Metadata};
use crate::utils::{first_list_value, parse_bool, parse_percent};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printer: Option<PrinterSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filament: Option<FilamentSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_settings: Option<PrintSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<VendorFlags>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub objects: Vec<ObjectSettings>,
}

impl ExtractedSettings {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nozzle_diameter: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bed_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_print_height: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilamentSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub filament_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diameter: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_max: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub colors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_layer_height: Option<f64>,
    /// Percent, `0..=100`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infill: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infill_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perimeters: Option<u32>,
    /// mm/s
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perimeter_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infill_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub travel_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_enabled: Option<bool>,
    /// Overhang threshold in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_angle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retraction_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retraction_speed: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorFlags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmu_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timelapse: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptive_layers: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequential_print: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub designer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_material_g: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSettings {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extruder: Option<u32>,
}

/// Slicing config keys, Prusa and Bambu/Orca spellings side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    PrintProfile,
    LayerHeight,
    FirstLayerHeight,
    Infill,
    InfillPattern,
    Perimeters,
    PerimeterSpeed,
    InfillSpeed,
    TravelSpeed,
    SupportEnabled,
    SupportAngle,
    RetractLength,
    RetractSpeed,
    FilamentProfile,
    FilamentType,
    FilamentDiameter,
    Temperature,
    TemperatureLow,
    TemperatureHigh,
    FilamentColour,
    PrinterProfile,
    PrinterModel,
    NozzleDiameter,
    BedType,
    MaxPrintHeight,
    Mmu,
    Timelapse,
    AdaptiveLayers,
    SequentialPrint,
}

const KEY_TABLE: &[(&str, Key)] = &[
    ("print_settings_id", Key::PrintProfile),
    ("layer_height", Key::LayerHeight),
    ("first_layer_height", Key::FirstLayerHeight),
    ("initial_layer_print_height", Key::FirstLayerHeight),
    ("fill_density", Key::Infill),
    ("sparse_infill_density", Key::Infill),
    ("fill_pattern", Key::InfillPattern),
    ("sparse_infill_pattern", Key::InfillPattern),
    ("perimeters", Key::Perimeters),
    ("wall_loops", Key::Perimeters),
    ("perimeter_speed", Key::PerimeterSpeed),
    ("outer_wall_speed", Key::PerimeterSpeed),
    ("infill_speed", Key::InfillSpeed),
    ("sparse_infill_speed", Key::InfillSpeed),
    ("travel_speed", Key::TravelSpeed),
    ("support_material", Key::SupportEnabled),
    ("enable_support", Key::SupportEnabled),
    ("support_material_threshold", Key::SupportAngle),
    ("support_threshold_angle", Key::SupportAngle),
    ("retract_length", Key::RetractLength),
    ("retraction_length", Key::RetractLength),
    ("retract_speed", Key::RetractSpeed),
    ("retraction_speed", Key::RetractSpeed),
    ("filament_settings_id", Key::FilamentProfile),
    ("filament_type", Key::FilamentType),
    ("filament_diameter", Key::FilamentDiameter),
    ("temperature", Key::Temperature),
    ("first_layer_temperature", Key::Temperature),
    ("nozzle_temperature", Key::Temperature),
    ("nozzle_temperature_initial_layer", Key::Temperature),
    ("nozzle_temperature_range_low", Key::TemperatureLow),
    ("nozzle_temperature_range_high", Key::TemperatureHigh),
    ("filament_colour", Key::FilamentColour),
    ("printer_settings_id", Key::PrinterProfile),
    ("printer_model", Key::PrinterModel),
    ("nozzle_diameter", Key::NozzleDiameter),
    ("curr_bed_type", Key::BedType),
    ("max_print_height", Key::MaxPrintHeight),
    ("printable_height", Key::MaxPrintHeight),
    ("single_extruder_multi_material", Key::Mmu),
    ("timelapse_type", Key::Timelapse),
    ("variable_layer_height", Key::AdaptiveLayers),
    ("complete_objects", Key::SequentialPrint),
    ("print_sequence", Key::SequentialPrint),
];

fn lookup_key(name: &str) -> Option<Key> {
    KEY_TABLE.iter().find(|(k, _)| *k == name).map(|(_, key)| *key)
}

fn num(value: &str) -> Option<f64> {
    first_list_value(value).parse::<f64>().ok().filter(|v| v.is_finite())
}

fn text(value: &str) -> Option<String> {
    let v = first_list_value(value).trim_matches('"');
    (!v.is_empty()).then(|| v.to_string())
}

/// Builder with one record per sub-section; collapsed to `Option`s at the
/// end so a section nobody wrote stays unset.
#[derive(Debug, Default)]
struct SettingsBuilder {
    printer: PrinterSettings,
    filament: FilamentSettings,
    print: PrintSettings,
    vendor: VendorFlags,
    provenance: Provenance,
    objects: Vec<ObjectSettings>,
    temperatures: Vec<f64>,
}

fn some_if_set<T: Default + PartialEq>(v: T) -> Option<T> {
    (v != T::default()).then_some(v)
}

impl SettingsBuilder {
    fn apply(&mut self, name: &str, value: &str) {
        let Some(key) = lookup_key(name.trim()) else {
            return;
        };
        let value = value.trim();
        match key {
            Key::PrintProfile => self.print.profile = text(value),
            Key::LayerHeight => self.print.layer_height = num(value),
            Key::FirstLayerHeight => self.print.first_layer_height = num(value),
            Key::Infill => self.print.infill = parse_percent(first_list_value(value)),
            Key::InfillPattern => self.print.infill_pattern = text(value),
            Key::Perimeters => self.print.perimeters = first_list_value(value).parse().ok(),
            Key::PerimeterSpeed => self.print.perimeter_speed = num(value),
            Key::InfillSpeed => self.print.infill_speed = num(value),
            Key::TravelSpeed => self.print.travel_speed = num(value),
            Key::SupportEnabled => self.print.support_enabled = parse_bool(value),
            Key::SupportAngle => self.print.support_angle = num(value),
            Key::RetractLength => self.print.retraction_length = num(value),
            Key::RetractSpeed => self.print.retraction_speed = num(value),
            Key::FilamentProfile => self.filament.profile = text(value),
            Key::FilamentType => self.filament.filament_type = text(value),
            Key::FilamentDiameter => self.filament.diameter = num(value),
            Key::Temperature => self.temperatures.extend(
                value
                    .split([',', ';'])
                    .filter_map(|t| t.trim().parse::<f64>().ok())
                    .filter(|t| t.is_finite() && *t > 0.0),
            ),
            Key::TemperatureLow => self.filament.temperature_min = num(value),
            Key::TemperatureHigh => self.filament.temperature_max = num(value),
            Key::FilamentColour => {
                self.filament.colors = value
                    .split([',', ';'])
                    .map(|c| c.trim().trim_matches('"'))
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            Key::PrinterProfile => self.printer.profile = text(value),
            Key::PrinterModel => self.printer.model = text(value),
            Key::NozzleDiameter => self.printer.nozzle_diameter = num(value),
            Key::BedType => self.printer.bed_type = text(value),
            Key::MaxPrintHeight => self.printer.max_print_height = num(value),
            Key::Mmu => self.vendor.mmu_enabled = parse_bool(value),
            Key::Timelapse => self.vendor.timelapse = parse_bool(value),
            Key::AdaptiveLayers => self.vendor.adaptive_layers = parse_bool(value),
            Key::SequentialPrint => {
                self.vendor.sequential_print = match value {
                    "by object" => Some(true),
                    "by layer" => Some(false),
                    other => parse_bool(other),
                }
            }
        }
    }

    fn apply_config_text(&mut self, text: &str) -> Result<usize, String> {
        if text.trim_start().starts_with('{') {
            let map: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(text).map_err(|e| e.to_string())?;
            let mut n = 0;
            for (k, v) in &map {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Array(xs) => xs
                        .iter()
                        .map(|x| match x {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(","),
                    serde_json::Value::Number(x) => x.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                self.apply(k, &value);
                n += 1;
            }
            return Ok(n);
        }

        Ok(parse_key_values(text)
            .map(|(k, v)| self.apply(k, v))
            .count())
    }

    fn apply_plate_info(&mut self, info: &PlateInfo) {
        if let Some(bed) = info.bed_type.as_deref().filter(|b| !b.is_empty()) {
            self.printer.bed_type = Some(bed.to_string());
        }
        if let Some(d) = info.nozzle_diameter {
            self.printer.nozzle_diameter = Some(d);
        }
        if let Some(seq) = info.is_seq_print {
            self.vendor.sequential_print = Some(seq);
        }
        if self.filament.colors.is_empty() && !info.filament_colors.is_empty() {
            self.filament.colors = info.filament_colors.clone();
        }
        if let Some(app) = info.application.as_deref() {
            self.provenance.application.get_or_insert_with(|| app.to_string());
        }
        if let Some(v) = &info.version {
            self.provenance
                .format_version
                .get_or_insert_with(|| json_scalar(v));
        }
    }

    fn apply_metadata(&mut self, md: &[Metadata]) {
        for m in md {
            let Some(value) = m.value.as_deref() else {
                continue;
            };
            let p = &mut self.provenance;
            match m.name.as_str() {
                "Application" => {
                    // "BambuStudio-01.09.00.70", "PrusaSlicer-2.7.1+win64"
                    match value.split_once('-') {
                        Some((app, version)) => {
                            p.application = Some(app.to_string());
                            p.application_version = Some(version.to_string());
                        }
                        None => p.application = Some(value.to_string()),
                    }
                }
                "BambuStudio:3mfVersion" | "slic3rpe:Version3mf" => p.format_version = Some(value.to_string()),
                "CreationDate" => p.creation_date = Some(value.to_string()),
                "ModificationDate" => p.modification_date = Some(value.to_string()),
                "Title" => p.title = Some(value.to_string()),
                "Designer" => p.designer = Some(value.to_string()),
                _ => {}
            }
        }
    }

    fn apply_orca_objects(&mut self, md: &orca_metadata::OrcaMetadata) {
        for obj in &md.object {
            self.objects.push(ObjectSettings {
                id: obj.id.to_string(),
                name: obj.get("name").map(str::to_string),
                extruder: obj.get("extruder").and_then(|e| e.trim().parse().ok()),
            });
        }
    }

    fn apply_ps_objects(&mut self, md: &ps_metadata::PSMetadata) {
        for obj in &md.object {
            self.objects.push(ObjectSettings {
                id: obj.id.to_string(),
                name: obj.get_name(),
                extruder: obj.get("extruder").and_then(|e| e.trim().parse().ok()),
            });
        }
    }

    fn apply_slice_info(&mut self, info: &orca_metadata::SliceInfo) {
        let mut time = 0.0;
        let mut weight = 0.0;
        let mut any_time = false;
        let mut any_weight = false;
        for plate in &info.plate {
            if let Some(t) = orca_metadata::lookup(&plate.metadata, "prediction").and_then(num) {
                time += t;
                any_time = true;
            }
            if let Some(w) = orca_metadata::lookup(&plate.metadata, "weight").and_then(num) {
                weight += w;
                any_weight = true;
            }
            if self.filament.filament_type.is_none() {
                self.filament.filament_type = plate.filament.iter().find_map(|f| f.ty.clone());
            }
        }
        if any_time {
            self.provenance.estimated_time_s = Some(time);
        }
        if any_weight {
            self.provenance.estimated_material_g = Some(weight);
        }
        if let Some(v) = info.header_value("X-BBL-Client-Version") {
            self.provenance.application_version.get_or_insert_with(|| v.to_string());
        }
    }

    fn build(mut self) -> ExtractedSettings {
        if !self.temperatures.is_empty() {
            let min = self.temperatures.iter().copied().fold(f64::INFINITY, f64::min);
            let max = self.temperatures.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            self.filament.temperature_min.get_or_insert(min);
            self.filament.temperature_max.get_or_insert(max);
        }

        ExtractedSettings {
            printer: some_if_set(self.printer),
            filament: some_if_set(self.filament),
            print_settings: some_if_set(self.print),
            vendor: some_if_set(self.vendor),
            provenance: some_if_set(self.provenance),
            objects: self.objects,
        }
    }
}

fn json_scalar(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `key = value` pairs of a slicer config. Blank lines, `#` comments and
/// `[section]` headers are skipped. PrusaSlicer prefixes every line with
/// `; `, which is stripped.
pub fn parse_key_values(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            return None;
        }
        let line = line.strip_prefix(';').map(str::trim_start).unwrap_or(line);
        let (k, v) = line.split_once('=')?;
        let k = k.trim();
        (!k.is_empty()).then_some((k, v.trim()))
    })
}

/// `Metadata/plate_<n>.json`
#[derive(Debug, Clone, Default, Deserialize)]
struct PlateInfo {
    #[serde(default)]
    bed_type: Option<String>,
    #[serde(default)]
    nozzle_diameter: Option<f64>,
    #[serde(default)]
    is_seq_print: Option<bool>,
    #[serde(default)]
    filament_colors: Vec<String>,
    #[serde(default, alias = "app", alias = "slicer")]
    application: Option<String>,
    #[serde(default)]
    version: Option<serde_json::Value>,
}

fn skip(path: &str, err: String, diagnostics: &mut Vec<Diagnostic>) {
    warn!("settings source {} unreadable: {}", path, err);
    diagnostics.push(Diagnostic::warning(format!("settings source {path} ignored: {err}")));
}

fn first_text(archive: &Archive, paths: &[String]) -> Option<(String, String)> {
    paths.iter().find_map(|p| archive.read_text(p).ok().map(|t| (p.clone(), t)))
}

/// Reads every settings source present in `archive`. `primary` is the path of
/// the model descriptor, if one was resolved.
pub async fn extract_settings(
    archive: &Archive,
    primary: Option<&str>,
    config: &IngestConfig,
) -> (ExtractedSettings, Vec<Diagnostic>) {
    let mut b = SettingsBuilder::default();
    let mut diagnostics = vec![];

    if let Some((path, text)) = first_text(archive, &config.slicer_config_paths) {
        match b.apply_config_text(&text) {
            Ok(n) => debug!("{}: {} config keys", path, n),
            Err(e) => skip(&path, e, &mut diagnostics),
        }
    }
    tokio::task::yield_now().await;

    if let Some((path, text)) = first_text(archive, &config.plate_info_paths) {
        match serde_json::from_str::<PlateInfo>(&text) {
            Ok(info) => b.apply_plate_info(&info),
            Err(e) => skip(&path, e.to_string(), &mut diagnostics),
        }
    }
    tokio::task::yield_now().await;

    if let Some(primary) = primary {
        if let Ok(text) = archive.read_text(primary) {
            b.apply_metadata(&parse_metadata_tags(&text));
        }
    }
    tokio::task::yield_now().await;

    if let Some((path, text)) = first_text(archive, &config.model_settings_paths) {
        let parsed = if path.ends_with("Slic3r_PE_model.config") {
            quick_xml::de::from_str::<ps_metadata::PSMetadata>(&text).map(|md| b.apply_ps_objects(&md))
        } else {
            quick_xml::de::from_str::<orca_metadata::OrcaMetadata>(&text).map(|md| b.apply_orca_objects(&md))
        };
        if let Err(e) = parsed {
            skip(&path, e.to_string(), &mut diagnostics);
        }
    }

    if let Some((path, text)) = first_text(archive, &config.slice_info_paths) {
        match quick_xml::de::from_str::<orca_metadata::SliceInfo>(&text) {
            Ok(info) => b.apply_slice_info(&info),
            Err(e) => skip(&path, e.to_string(), &mut diagnostics),
        }
    }

    (b.build(), diagnostics)
}
