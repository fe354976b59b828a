use crate::models::error::SError;
use crate::models::loader::{GameVersion, LoaderType};
use crate::utils::toml::Toml;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Cursor, Read};
use std::sync::OnceLock;
use zip::ZipArchive;

const FABRIC_MANIFEST: &str = "fabric.mod.json";
const QUILT_MANIFEST: &str = "quilt.mod.json";
const FORGE_MANIFEST: &str = "META-INF/mods.toml";

/// What a mod archive says about itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ModMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    pub loader: LoaderType,
    pub game_versions: Vec<GameVersion>,
}

impl ModMetadata {
    /// Reads the first loader manifest found in a zip/jar.
    /// Bytes that are not an archive, or an archive without a manifest, yield `None`.
    pub fn from_archive(bytes: &[u8]) -> Result<Option<ModMetadata>, SError> {
        // The bytes are already in memory, so any error here means "not an archive".
        let Ok(mut archive) = ZipArchive::new(Cursor::new(bytes)) else {
            return Ok(None);
        };

        if let Some(raw) = read_entry(&mut archive, FABRIC_MANIFEST)? {
            return parse_fabric(&raw).map(Some);
        }
        if let Some(raw) = read_entry(&mut archive, QUILT_MANIFEST)? {
            return parse_quilt(&raw).map(Some);
        }
        if let Some(raw) = read_entry(&mut archive, FORGE_MANIFEST)? {
            return parse_forge(&raw);
        }
        Ok(None)
    }
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<String>, SError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut raw = String::new();
    entry.read_to_string(&mut raw)?;
    Ok(Some(raw))
}

fn version_token() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\d+\.\d+(?:\.\d+)?").ok())
        .as_ref()
}

/// Pulls concrete versions out of ranges such as `>=1.19.2`, `1.19.x` or `[1.19,1.20)`.
fn versions_in(range: &str) -> Vec<GameVersion> {
    let Some(re) = version_token() else {
        return Vec::new();
    };
    let mut out: Vec<GameVersion> = re
        .find_iter(range)
        .map(|m| GameVersion::parse(m.as_str()))
        .collect();
    out.dedup();
    out
}

fn string_at<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn versions_from_json(value: Option<&Value>) -> Vec<GameVersion> {
    match value {
        Some(Value::String(s)) => versions_in(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(versions_in)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_fabric(raw: &str) -> Result<ModMetadata, SError> {
    let json: Value = serde_json::from_str(raw)?;
    let id = string_at(&json, "id")
        .ok_or_else(|| SError::ParseError(format!("{FABRIC_MANIFEST} has no id")))?
        .to_string();

    Ok(ModMetadata {
        name: string_at(&json, "name").unwrap_or(&id).to_string(),
        version: string_at(&json, "version").unwrap_or_default().to_string(),
        game_versions: versions_from_json(json.pointer("/depends/minecraft")),
        loader: LoaderType::Fabric,
        id,
    })
}

fn parse_quilt(raw: &str) -> Result<ModMetadata, SError> {
    let json: Value = serde_json::from_str(raw)?;
    let loader = json
        .get("quilt_loader")
        .ok_or_else(|| SError::ParseError(format!("{QUILT_MANIFEST} has no quilt_loader")))?;
    let id = string_at(loader, "id")
        .ok_or_else(|| SError::ParseError(format!("{QUILT_MANIFEST} has no id")))?
        .to_string();

    let game_versions = loader
        .get("depends")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|dep| string_at(dep, "id") == Some("minecraft"))
        .flat_map(|dep| versions_from_json(dep.get("versions")))
        .collect();

    Ok(ModMetadata {
        name: loader
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or(&id)
            .to_string(),
        version: string_at(loader, "version").unwrap_or_default().to_string(),
        game_versions,
        loader: LoaderType::Quilt,
        id,
    })
}

fn parse_forge(raw: &str) -> Result<Option<ModMetadata>, SError> {
    let doc: toml::Table = Toml::parse(raw)?;
    let Some(first) = doc
        .get("mods")
        .and_then(toml::Value::as_array)
        .and_then(|mods| mods.first())
    else {
        return Ok(None);
    };

    let Some(id) = first.get("modId").and_then(toml::Value::as_str) else {
        return Ok(None);
    };

    let game_versions = doc
        .get("dependencies")
        .and_then(|deps| deps.get(id))
        .and_then(toml::Value::as_array)
        .into_iter()
        .flatten()
        .filter(|dep| dep.get("modId").and_then(toml::Value::as_str) == Some("minecraft"))
        .filter_map(|dep| dep.get("versionRange").and_then(toml::Value::as_str))
        .flat_map(versions_in)
        .collect();

    Ok(Some(ModMetadata {
        id: id.to_string(),
        name: first
            .get("displayName")
            .and_then(toml::Value::as_str)
            .unwrap_or(id)
            .to_string(),
        version: first
            .get("version")
            .and_then(toml::Value::as_str)
            .unwrap_or_default()
            .to_string(),
        loader: LoaderType::Forge,
        game_versions,
    }))
}
