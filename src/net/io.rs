//! I/O 支持：按扩展名选择 TOML、JSON 或 RON 进行（反）序列化。
use std::fs;
use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ron error: {0}")]
    Ron(#[from] ron::Error),
    #[error("ron error: {0}")]
    RonSyntax(#[from] ron::error::SpannedError),
    #[error("toml error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("toml error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("unsupported file extension: {0:?}")]
    Extension(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text formats understood for definitions and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
    Ron,
}

impl Format {
    pub const EXTENSIONS: [&'static str; 3] = ["toml", "json", "ron"];

    /// Picks the format from the extension; no extension means TOML.
    pub fn from_path(path: &Path) -> Result<Self, IoError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            None | Some("toml") => Ok(Format::Toml),
            Some("json") => Ok(Format::Json),
            Some("ron") => Ok(Format::Ron),
            Some(other) => Err(IoError::Extension(other.to_string())),
        }
    }

    pub fn to_string<T: Serialize>(self, value: &T) -> Result<String, IoError> {
        match self {
            Format::Toml => Ok(toml::to_string_pretty(value)?),
            Format::Json => to_json_string(value),
            Format::Ron => to_ron_string(value),
        }
    }

    pub fn from_str<T: DeserializeOwned>(self, s: &str) -> Result<T, IoError> {
        match self {
            Format::Toml => Ok(toml::from_str(s)?),
            Format::Json => from_json_str(s),
            Format::Ron => from_ron_str(s),
        }
    }
}

pub fn to_json_string<T>(value: &T) -> Result<String, IoError>
where
    T: Serialize,
{
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn from_json_str<T>(s: &str) -> Result<T, IoError>
where
    T: DeserializeOwned,
{
    Ok(serde_json::from_str(s)?)
}

pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<(), IoError> {
    fs::write(path, to_json_string(value)?)?;
    Ok(())
}

pub fn to_ron_string<T>(value: &T) -> Result<String, IoError>
where
    T: Serialize,
{
    let mut pretty = PrettyConfig::default();
    pretty.new_line = "\n".into();
    Ok(ron::ser::to_string_pretty(value, pretty)?)
}

pub fn from_ron_str<T>(s: &str) -> Result<T, IoError>
where
    T: DeserializeOwned,
{
    Ok(ron::from_str(s)?)
}

/// Reads `path` in the format given by its extension.
pub fn read_path<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<T, IoError> {
    let path = path.as_ref();
    let format = Format::from_path(path)?;
    let content = fs::read_to_string(path)?;
    format.from_str(&content)
}

/// Writes `value` to `path` in the format given by its extension.
pub fn write_path<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<(), IoError> {
    let path = path.as_ref();
    let content = Format::from_path(path)?.to_string(value)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn format_follows_extension() {
        assert_eq!(Format::from_path(Path::new("a.toml")).unwrap(), Format::Toml);
        assert_eq!(Format::from_path(Path::new("a")).unwrap(), Format::Toml);
        assert_eq!(Format::from_path(Path::new("a.json")).unwrap(), Format::Json);
        assert_eq!(Format::from_path(Path::new("a.ron")).unwrap(), Format::Ron);
        assert!(matches!(
            Format::from_path(Path::new("a.yaml")),
            Err(IoError::Extension(ext)) if ext == "yaml"
        ));
    }

    #[test]
    fn every_format_reads_what_it_writes() {
        let dir = tempfile::tempdir().unwrap();
        let value: BTreeMap<String, u64> = [("p0".to_string(), 3), ("p1".to_string(), 0)].into();
        for ext in Format::EXTENSIONS {
            let path = dir.path().join(format!("stats.{ext}"));
            write_path(&path, &value).unwrap();
            let back: BTreeMap<String, u64> = read_path(&path).unwrap();
            assert_eq!(back, value, "format {ext}");
        }
    }

    #[test]
    fn malformed_ron_is_an_error() {
        let parsed: Result<BTreeMap<String, u64>, _> = from_ron_str("{ \"p0\": ");
        assert!(matches!(parsed, Err(IoError::RonSyntax(_))));
    }
}
