//! Where timetables come from.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use kai_core::{KaiError, Result};

use crate::calendar::normalize_group;
use crate::model::Timetable;

/// Fetches the timetable of one student group.
///
/// Transient errors (see [`KaiError::is_transient`]) are retried by the
/// cache; anything else fails the refresh immediately.
#[async_trait]
pub trait TimetableSource: Send + Sync {
    async fn fetch(&self, group: &str) -> Result<Timetable>;

    fn name(&self) -> &str;
}

/// Reads `<dir>/<GROUP>.json` files exported from the university portal.
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, group: &str) -> PathBuf {
        self.dir.join(format!("{}.json", group))
    }
}

#[async_trait]
impl TimetableSource for JsonDirSource {
    async fn fetch(&self, group: &str) -> Result<Timetable> {
        let group = normalize_group(group);
        let path = self.path_for(&group);
        debug!("Reading timetable from {:?}", path);

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KaiError::DocumentNotFound { id: group });
            }
            Err(e) => return Err(KaiError::Io(e)),
        };

        let mut timetable: Timetable = serde_json::from_str(&raw)
            .map_err(|e| KaiError::invalid_argument(format!("{:?}: {}", path, e)))?;
        if timetable.group.trim().is_empty() {
            timetable.group = group;
        }
        Ok(timetable)
    }

    fn name(&self) -> &str {
        "json-dir"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_group_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Б-121-22-1-КІ.json"),
            r#"{"group": "", "weeks": {"1": [{"day": "Wed", "lessons": [{"number": 2, "subject": "ООП"}]}]}}"#,
        )
        .unwrap();

        let source = JsonDirSource::new(dir.path());
        let t = source.fetch("б_121_22_1_кі").await.unwrap();
        assert_eq!(t.group, "Б-121-22-1-КІ");
        assert_eq!(t.lesson_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_group_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonDirSource::new(dir.path());
        let err = source.fetch("Б-999-22-1-КІ").await.unwrap_err();
        assert_eq!(err.error_code(), "DOCUMENT_NOT_FOUND");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_file_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Б-121-22-1-КІ.json"), "{not json").unwrap();
        let source = JsonDirSource::new(dir.path());
        let err = source.fetch("Б-121-22-1-КІ").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
