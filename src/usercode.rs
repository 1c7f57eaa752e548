//! Isolated user-code context built from a job's artifacts.
//!
//! The context decides how accumulator values returned by the coordinator
//! are decoded. Built-in types come from the parent [`TypeRegistry`];
//! job-specific types must be exported by one of the artifacts through a
//! `bundle.json` manifest. Artifacts are searched in submission order, so an
//! earlier artifact wins when two export the same type.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;

use serde::Deserialize;
use url::Url;

use crate::artifact::ArtifactLocator;
use crate::result::AccumulatorValue;

/// Manifest entry looked up inside every artifact.
pub const MANIFEST_ENTRY: &str = "bundle.json";

#[derive(Debug, thiserror::Error)]
pub enum UserCodeError {
    #[error("Cannot open artifact {url}: {reason}")]
    CorruptArtifact { url: Url, reason: String },

    #[error("Invalid manifest in {url}: {reason}")]
    InvalidManifest { url: Url, reason: String },

    #[error("Unknown type '{type_name}' for accumulator '{name}'")]
    UnknownType { name: String, type_name: String },

    #[error("Cannot decode accumulator '{name}' as {type_name}: {reason}")]
    Decode {
        name: String,
        type_name: String,
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct BundleManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    types: Vec<String>,
}

/// Types every context can decode without help from an artifact.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    builtin: BTreeSet<String>,
}

impl TypeRegistry {
    pub const LONG: &'static str = "long";
    pub const DOUBLE: &'static str = "double";
    pub const STRING: &'static str = "string";
    pub const BOOLEAN: &'static str = "boolean";
    pub const JSON: &'static str = "json";

    pub fn builtin() -> Self {
        Self {
            builtin: [
                Self::LONG,
                Self::DOUBLE,
                Self::STRING,
                Self::BOOLEAN,
                Self::JSON,
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.builtin.contains(type_name)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone)]
pub struct UserCodeContext {
    parent: TypeRegistry,
    /// Exported type name -> artifact that provides it
    exported: BTreeMap<String, Url>,
    artifacts: Vec<Url>,
    classpaths: Vec<Url>,
}

impl UserCodeContext {
    /// Open every artifact and collect the types it exports.
    ///
    /// Classpath locators are only recorded; they need to be reachable from
    /// the cluster, not from this process.
    pub fn build(
        artifacts: &[ArtifactLocator],
        classpaths: &[Url],
        parent: &TypeRegistry,
    ) -> Result<Self, UserCodeError> {
        let mut exported = BTreeMap::new();
        for artifact in artifacts {
            if let Some(manifest) = read_manifest(artifact)? {
                tracing::debug!(
                    artifact = %artifact.url(),
                    bundle = manifest.name.as_deref().unwrap_or("-"),
                    types = manifest.types.len(),
                    "Loaded bundle manifest"
                );
                for type_name in manifest.types {
                    exported
                        .entry(type_name)
                        .or_insert_with(|| artifact.url().clone());
                }
            }
        }

        Ok(Self {
            parent: parent.clone(),
            exported,
            artifacts: artifacts.iter().map(|a| a.url().clone()).collect(),
            classpaths: classpaths.to_vec(),
        })
    }

    pub fn artifacts(&self) -> &[Url] {
        &self.artifacts
    }

    pub fn classpaths(&self) -> &[Url] {
        &self.classpaths
    }

    /// Artifact that provides `type_name`, or `None` for built-in and unknown types.
    pub fn origin_of(&self, type_name: &str) -> Option<&Url> {
        self.exported.get(type_name)
    }

    pub fn can_resolve(&self, type_name: &str) -> bool {
        self.parent.contains(type_name) || self.exported.contains_key(type_name)
    }

    /// Decode a JSON accumulator payload of the given type.
    pub fn decode(
        &self,
        name: &str,
        type_name: &str,
        payload: &[u8],
    ) -> Result<AccumulatorValue, UserCodeError> {
        let decode_err = |reason: String| UserCodeError::Decode {
            name: name.to_string(),
            type_name: type_name.to_string(),
            reason,
        };

        if self.parent.contains(type_name) {
            let value: serde_json::Value =
                serde_json::from_slice(payload).map_err(|e| decode_err(e.to_string()))?;
            return match type_name {
                TypeRegistry::LONG => value
                    .as_i64()
                    .map(AccumulatorValue::Long)
                    .ok_or_else(|| decode_err("expected an integer".to_string())),
                TypeRegistry::DOUBLE => value
                    .as_f64()
                    .map(AccumulatorValue::Double)
                    .ok_or_else(|| decode_err("expected a number".to_string())),
                TypeRegistry::STRING => value
                    .as_str()
                    .map(|s| AccumulatorValue::Text(s.to_string()))
                    .ok_or_else(|| decode_err("expected a string".to_string())),
                TypeRegistry::BOOLEAN => value
                    .as_bool()
                    .map(AccumulatorValue::Bool)
                    .ok_or_else(|| decode_err("expected a boolean".to_string())),
                _ => Ok(AccumulatorValue::Json(value)),
            };
        }

        match self.exported.get(type_name) {
            Some(origin) => {
                let value =
                    serde_json::from_slice(payload).map_err(|e| decode_err(e.to_string()))?;
                Ok(AccumulatorValue::Custom {
                    type_name: type_name.to_string(),
                    origin: origin.clone(),
                    value,
                })
            }
            None => Err(UserCodeError::UnknownType {
                name: name.to_string(),
                type_name: type_name.to_string(),
            }),
        }
    }
}

fn read_manifest(artifact: &ArtifactLocator) -> Result<Option<BundleManifest>, UserCodeError> {
    let corrupt = |reason: String| UserCodeError::CorruptArtifact {
        url: artifact.url().clone(),
        reason,
    };

    let file = File::open(artifact.path()).map_err(|e| corrupt(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;

    let mut entry = match archive.by_name(MANIFEST_ENTRY) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(corrupt(e.to_string())),
    };
    let mut raw = String::new();
    entry
        .read_to_string(&mut raw)
        .map_err(|e| corrupt(e.to_string()))?;

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| UserCodeError::InvalidManifest {
            url: artifact.url().clone(),
            reason: e.to_string(),
        })
}
