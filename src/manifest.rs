use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use bytes::Bytes;
use serde::Deserialize;

use crate::populate::{PopulationBody, PopulationRequest};

fn default_content_type() -> String {
    "text/html".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestDoc {
    #[serde(default, rename = "entry")]
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    host: String,
    path: String,
    #[serde(default = "default_content_type")]
    content_type: String,
    #[serde(default)]
    validator: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    body_file: Option<PathBuf>,
    #[serde(default)]
    body_json: Option<serde_json::Value>,
}

/// Reads a population manifest. Relative `body_file` paths resolve against the
/// manifest's directory.
pub fn load_manifest(path: &Path) -> Result<Vec<PopulationRequest>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest at {}", path.display()))?;
    let base_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parse_manifest(&data, base_dir)
        .with_context(|| format!("failed to parse manifest at {}", path.display()))
}

pub fn parse_manifest(data: &str, base_dir: &Path) -> Result<Vec<PopulationRequest>> {
    let doc: ManifestDoc = toml::from_str(data)?;
    ensure!(
        !doc.entries.is_empty(),
        "manifest must define at least one [[entry]]"
    );

    let mut requests = Vec::with_capacity(doc.entries.len());
    for (position, raw) in doc.entries.into_iter().enumerate() {
        let label = format!("entry {} ({}{})", position + 1, raw.host, raw.path);
        let body = match (raw.body, raw.body_file, raw.body_json) {
            (Some(text), None, None) => PopulationBody::Bytes(Bytes::from(text)),
            (None, Some(file), None) => {
                let file = if file.is_absolute() {
                    file
                } else {
                    base_dir.join(file)
                };
                PopulationBody::File(file)
            }
            (None, None, Some(json)) => {
                let encoded = serde_json::to_vec(&json)
                    .with_context(|| format!("{label}: failed to encode body_json"))?;
                PopulationBody::Bytes(Bytes::from(encoded))
            }
            (None, None, None) => {
                bail!("{label} must set one of body, body_file or body_json")
            }
            _ => bail!("{label} must set only one of body, body_file or body_json"),
        };

        requests.push(PopulationRequest {
            host: raw.host,
            path: raw.path,
            content_type: raw.content_type,
            validator: raw.validator.unwrap_or_default(),
            body,
        });
    }
    Ok(requests)
}
