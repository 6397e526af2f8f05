use crate::parse::Record;
use crate::sink::{RecordSink, SinkError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::debug;

/// Appends one JSON object per line to a file
///
/// The file is opened on the first record, so a job that extracts nothing
/// leaves no file behind.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<BufWriter<File>, SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        debug!("Writing records to {}", self.path.display());
        Ok(BufWriter::new(file))
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn emit(&self, record: Record) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        if let Some(writer) = guard.as_mut() {
            writer.write_all(line.as_bytes()).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.lock().await.as_mut() {
            writer.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::UrlKey;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(path: &str) -> Record {
        let key = UrlKey::parse(&format!("https://example.com{}", path)).unwrap();
        Record::new(&key, "page", json!({ "title": path }))
    }

    #[tokio::test]
    async fn test_writes_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("records.jsonl");
        let sink = JsonLinesSink::new(&path);

        sink.emit(record("/a")).await.unwrap();
        sink.emit(record("/b")).await.unwrap();
        sink.flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["source"], "https://example.com/a");
        assert_eq!(lines[1]["data"]["title"], "/b");
        assert_eq!(lines[1]["kind"], "page");
    }

    #[tokio::test]
    async fn test_no_file_without_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");
        let sink = JsonLinesSink::new(&path);
        sink.flush().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_appends_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");

        let first = JsonLinesSink::new(&path);
        first.emit(record("/a")).await.unwrap();
        first.flush().await.unwrap();

        let second = JsonLinesSink::new(&path);
        second.emit(record("/b")).await.unwrap();
        second.flush().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
