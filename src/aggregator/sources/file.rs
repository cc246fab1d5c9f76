//! TOML / JSON file source.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::unit::{ConfigSource, SourceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Toml,
    Json,
}

impl FileFormat {
    /// Guess from the extension; anything other than `.json` is read as TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        }
    }
}

/// Reads one configuration file per fetch.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    format: FileFormat,
    optional: bool,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = FileFormat::from_path(&path);
        Self {
            path,
            format,
            optional: false,
        }
    }

    pub fn format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }

    /// A missing file yields an empty tree instead of an error.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse file contents in `format`; the root must be a table/object.
    pub fn parse(contents: &str, format: FileFormat) -> Result<Value, SourceError> {
        let tree: Value = match format {
            FileFormat::Toml => toml::from_str(contents)?,
            FileFormat::Json => serde_json::from_str(contents)?,
        };
        if !tree.is_object() {
            return Err(SourceError::Parse("configuration root must be a table".to_string()));
        }
        Ok(tree)
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn fetch(&self) -> Result<Value, SourceError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.optional => {
                tracing::debug!(path = %self.path.display(), "Optional config file missing");
                return Ok(Value::Object(Map::new()));
            }
            Err(e) => return Err(e.into()),
        };
        let tree = Self::parse(&contents, self.format)?;
        tracing::debug!(path = %self.path.display(), "Config file read");
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path(ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!("module-runtime-{}.{}", uuid::Uuid::new_v4(), ext))
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FileFormat::from_path(Path::new("a/app.json")), FileFormat::Json);
        assert_eq!(FileFormat::from_path(Path::new("app.toml")), FileFormat::Toml);
        assert_eq!(FileFormat::from_path(Path::new("app")), FileFormat::Toml);
    }

    #[test]
    fn test_parse_toml_tables() {
        let tree = FileSource::parse("x = 1\n[db]\nhost = \"localhost\"\n", FileFormat::Toml).unwrap();
        assert_eq!(tree, json!({"x": 1, "db": {"host": "localhost"}}));
    }

    #[test]
    fn test_parse_rejects_non_object_root() {
        assert!(matches!(
            FileSource::parse("[1, 2]", FileFormat::Json),
            Err(SourceError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_json_file() {
        let path = temp_path("json");
        std::fs::write(&path, r#"{"x": "file"}"#).unwrap();

        let tree = FileSource::new(&path).fetch().await.unwrap();
        assert_eq!(tree, json!({"x": "file"}));
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file() {
        let path = temp_path("toml");
        assert!(matches!(FileSource::new(&path).fetch().await, Err(SourceError::Io(_))));
        let tree = FileSource::new(&path).optional(true).fetch().await.unwrap();
        assert_eq!(tree, json!({}));
    }
}
