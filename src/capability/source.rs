// SPDX-License-Identifier: MIT

//! Record loading from files or inline content

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use super::{DataSource, DataSourceError, Record};

/// Reads a JSON array or YAML list of objects.
///
/// `source` is a file path when such a file exists, otherwise it is parsed as
/// inline content. Files ending in `.json` are parsed as JSON, everything else
/// as YAML; inline content starting with `[` is parsed as JSON.
#[derive(Debug, Default, Clone)]
pub struct FileSource;

impl FileSource {
    pub fn new() -> Self {
        Self
    }

    /// Parse records from text
    pub fn parse(content: &str, json: bool) -> Result<Vec<Record>, DataSourceError> {
        let doc: Value = if json {
            serde_json::from_str(content).map_err(|e| DataSourceError::Parse(e.to_string()))?
        } else {
            serde_yaml::from_str(content).map_err(|e| DataSourceError::Parse(e.to_string()))?
        };

        let items = match doc {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => return Err(DataSourceError::NotAList(kind(&other).to_string())),
        };

        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(record) => Ok(record),
                _ => Err(DataSourceError::NotARecord { index }),
            })
            .collect()
    }
}

fn looks_like_path(source: &str) -> bool {
    !source.contains('\n')
        && ["json", "yaml", "yml"].iter().any(|ext| {
            Path::new(source)
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl DataSource for FileSource {
    async fn load_records(&self, source: &str) -> Result<Vec<Record>, DataSourceError> {
        let path = Path::new(source);
        let is_file = tokio::fs::metadata(path)
            .await
            .is_ok_and(|meta| meta.is_file());
        let records = if is_file {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| DataSourceError::Io {
                    path: source.to_string(),
                    source: e,
                })?;
            let json = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            Self::parse(&content, json)?
        } else if looks_like_path(source) {
            return Err(DataSourceError::Io {
                path: source.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        } else {
            Self::parse(source, source.trim_start().starts_with('['))?
        };

        log::info!("Loaded {} record(s)", records.len());
        Ok(records)
    }
}
