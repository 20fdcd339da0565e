//! serde shapes of the slicer-written XML entries under `Metadata/`.
//!
//! Every field defaults, since each slicer version writes a slightly
//! different subset.

pub mod ps_metadata {
    use serde::{Deserialize, Serialize};

    /// `Metadata/Slic3r_PE_model.config`
    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    #[serde(rename = "config")]
    pub struct PSMetadata {
        #[serde(default)]
        pub object: Vec<Object>,
    }

    impl PSMetadata {
        pub fn get_object_by_id(&self, id: usize) -> Option<&Object> {
            self.object.iter().find(|o| o.id == id)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub struct Object {
        #[serde(rename = "@id")]
        pub id: usize,
        #[serde(rename = "@instances_count", default)]
        pub instances_count: usize,
        #[serde(default)]
        pub metadata: Vec<Metadata>,
        #[serde(default)]
        pub volume: Vec<Volume>,
    }

    impl Object {
        pub fn get(&self, key: &str) -> Option<&str> {
            self.metadata
                .iter()
                .find(|m| m.key.as_deref() == Some(key))
                .and_then(|m| m.value.as_deref())
        }

        pub fn get_name(&self) -> Option<String> {
            self.get("name").map(str::to_string)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub struct Metadata {
        #[serde(rename = "@type", default)]
        pub ty: String,
        #[serde(rename = "@key")]
        pub key: Option<String>,
        #[serde(rename = "@value")]
        pub value: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub struct Volume {
        #[serde(rename = "@firstid", default)]
        pub firstid: usize,
        #[serde(rename = "@lastid", default)]
        pub lastid: usize,
        #[serde(default)]
        pub metadata: Vec<Metadata>,
    }
}

pub mod orca_metadata {
    use serde::{Deserialize, Serialize};

    /// `Metadata/model_settings.config`
    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    #[serde(rename = "config")]
    pub struct OrcaMetadata {
        #[serde(default)]
        pub object: Vec<Object>,
        #[serde(default)]
        pub plate: Vec<Plate>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub struct Metadata {
        #[serde(rename = "@key")]
        pub key: Option<String>,
        #[serde(rename = "@value")]
        pub value: Option<String>,
    }

    pub fn lookup<'a>(md: &'a [Metadata], key: &str) -> Option<&'a str> {
        md.iter()
            .find(|m| m.key.as_deref() == Some(key))
            .and_then(|m| m.value.as_deref())
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub struct Object {
        #[serde(rename = "@id")]
        pub id: usize,
        #[serde(default)]
        pub metadata: Vec<Metadata>,
        #[serde(default)]
        pub part: Vec<Part>,
    }

    impl Object {
        pub fn get(&self, key: &str) -> Option<&str> {
            lookup(&self.metadata, key)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub struct Part {
        #[serde(rename = "@id")]
        pub id: usize,
        #[serde(rename = "@subtype", default)]
        pub subtype: String,
        #[serde(default)]
        pub metadata: Vec<Metadata>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Plate {
        #[serde(default)]
        pub metadata: Vec<Metadata>,
    }

    /// `Metadata/slice_info.config`, written after slicing.
    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    #[serde(rename = "config")]
    pub struct SliceInfo {
        #[serde(default)]
        pub header: Option<Header>,
        #[serde(default)]
        pub plate: Vec<SlicedPlate>,
    }

    impl SliceInfo {
        pub fn header_value(&self, key: &str) -> Option<&str> {
            self.header.as_ref().and_then(|h| {
                h.header_item
                    .iter()
                    .find(|i| i.key.as_deref() == Some(key))
                    .and_then(|i| i.value.as_deref())
            })
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Header {
        #[serde(default)]
        pub header_item: Vec<Metadata>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SlicedPlate {
        #[serde(default)]
        pub metadata: Vec<Metadata>,
        #[serde(default)]
        pub filament: Vec<Filament>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Filament {
        #[serde(rename = "@id", default)]
        pub id: Option<String>,
        #[serde(rename = "@type", default)]
        pub ty: Option<String>,
        #[serde(rename = "@color", default)]
        pub color: Option<String>,
        #[serde(rename = "@used_g", default)]
        pub used_g: Option<String>,
    }
}
