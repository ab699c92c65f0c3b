//! Append-only staging of fetched records on local disk.
//!
//! A staging file holds one JSON document per line, each terminated by a
//! newline, with no header, footer, or checksum. Files are only ever
//! appended to; the loader reads them back in a later, separate run.
//! Fetching into a file while a load reads the same file is not supported.

use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::warn;

use crate::models::Record;

/// Counts from staging a group of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageOutcome {
    pub written: usize,
    /// Records dropped because they could not be serialized.
    pub skipped: usize,
}

impl StageOutcome {
    pub fn absorb(&mut self, other: StageOutcome) {
        self.written += other.written;
        self.skipped += other.skipped;
    }
}

/// Appends records to a staging file, one line each.
///
/// Safe to share between tasks: every line is written in full under a lock,
/// so concurrent appends never interleave partial lines.
pub struct DurableStager {
    path: PathBuf,
    file: Mutex<File>,
}

impl DurableStager {
    /// Open `path` for appending, creating it and its directory if needed.
    pub async fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Append one record.
    ///
    /// Returns `Ok(false)` when the record could not be serialized; it is
    /// logged and skipped and the file is untouched. I/O failures are
    /// returned to the caller.
    pub async fn stage<T: Serialize + ?Sized>(&self, record: &T) -> io::Result<bool> {
        let mut line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "skipping record that failed to serialize");
                return Ok(false);
            }
        };
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(true)
    }

    /// Append records in order.
    pub async fn stage_all<T: Serialize>(&self, records: &[T]) -> io::Result<StageOutcome> {
        let mut outcome = StageOutcome::default();
        for record in records {
            if self.stage(record).await? {
                outcome.written += 1;
            } else {
                outcome.skipped += 1;
            }
        }
        Ok(outcome)
    }

    /// Flush file contents to the storage device.
    pub async fn sync(&self) -> io::Result<()> {
        self.file.lock().await.sync_data().await
    }
}

/// One successfully parsed staged line.
#[derive(Debug, Clone)]
pub struct StagedLine {
    /// 1-based line number in the staging file.
    pub line_no: usize,
    pub record: Record,
}

/// Reads a staging file back line by line.
///
/// Blank lines are skipped silently; lines that are not valid UTF-8 JSON
/// are logged with their line number and counted. Only I/O failures end
/// the read.
pub struct StagedReader {
    reader: BufReader<File>,
    buf: Vec<u8>,
    line_no: usize,
    blank: usize,
    malformed: usize,
}

impl StagedReader {
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            reader: BufReader::new(file),
            buf: Vec::new(),
            line_no: 0,
            blank: 0,
            malformed: 0,
        })
    }

    pub async fn next_record(&mut self) -> io::Result<Option<StagedLine>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.buf.trim_ascii();
            if line.is_empty() {
                self.blank += 1;
                continue;
            }
            match serde_json::from_slice::<Record>(line) {
                Ok(record) => {
                    return Ok(Some(StagedLine {
                        line_no: self.line_no,
                        record,
                    }))
                }
                Err(e) => {
                    self.malformed += 1;
                    warn!(line = self.line_no, error = %e, "skipping malformed staged line");
                }
            }
        }
    }

    pub fn blank(&self) -> usize {
        self.blank
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Serializes like a record, except that tuple map keys are rejected
    /// by serde_json.
    #[derive(Serialize)]
    #[serde(untagged)]
    enum Item {
        Plain(Record),
        Broken(BTreeMap<(u8, u8), String>),
    }

    async fn read_lines(path: &Path) -> Vec<String> {
        tokio::fs::read_to_string(path)
            .await
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn one_unserializable_record_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("issues.data");
        let stager = DurableStager::open(&path).await.unwrap();

        let mut broken = BTreeMap::new();
        broken.insert((1, 2), "x".to_string());
        let items = vec![
            Item::Plain(json!({ "id": 1 })),
            Item::Plain(json!({ "id": 2 })),
            Item::Broken(broken),
            Item::Plain(json!({ "id": 3 })),
            Item::Plain(json!({ "id": 4 })),
        ];

        let outcome = stager.stage_all(&items).await.unwrap();
        assert_eq!(outcome, StageOutcome { written: 4, skipped: 1 });

        let lines = read_lines(&path).await;
        assert_eq!(lines, vec![r#"{"id":1}"#, r#"{"id":2}"#, r#"{"id":3}"#, r#"{"id":4}"#]);
    }

    #[tokio::test]
    async fn appends_across_reopen_with_trailing_newline() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("slack.data");

        let stager = DurableStager::open(&path).await.unwrap();
        stager.stage(&json!({ "ts": "1" })).await.unwrap();
        drop(stager);

        let stager = DurableStager::open(&path).await.unwrap();
        stager.stage(&json!({ "ts": "2" })).await.unwrap();
        stager.sync().await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "{\"ts\":\"1\"}\n{\"ts\":\"2\"}\n");
    }

    #[tokio::test]
    async fn concurrent_appends_keep_lines_whole() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("mixed.data");
        let stager = Arc::new(DurableStager::open(&path).await.unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for writer in 0..8 {
            let stager = stager.clone();
            tasks.spawn(async move {
                for n in 0..50 {
                    let padding = "x".repeat(2000 + n * 7);
                    stager
                        .stage(&json!({ "writer": writer, "n": n, "padding": padding }))
                        .await
                        .unwrap();
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let lines = read_lines(&path).await;
        assert_eq!(lines.len(), 400);
        let mut per_writer = [0usize; 8];
        for line in &lines {
            let value: Record = serde_json::from_str(line).expect("whole JSON line");
            let writer = value["writer"].as_u64().unwrap() as usize;
            assert_eq!(value["n"].as_u64().unwrap() as usize, per_writer[writer]);
            per_writer[writer] += 1;
        }
    }

    #[tokio::test]
    async fn reader_skips_blank_and_malformed_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("staged.data");
        tokio::fs::write(&path, "{\"a\":1}\n\n{not json\n   \n{\"a\":2}\n[1,\n")
            .await
            .unwrap();

        let mut reader = StagedReader::open(&path).await.unwrap();
        let first = reader.next_record().await.unwrap().unwrap();
        assert_eq!(first.line_no, 1);
        assert_eq!(first.record, json!({ "a": 1 }));

        let second = reader.next_record().await.unwrap().unwrap();
        assert_eq!(second.line_no, 5);
        assert_eq!(second.record, json!({ "a": 2 }));

        assert!(reader.next_record().await.unwrap().is_none());
        assert_eq!(reader.blank(), 2);
        assert_eq!(reader.malformed(), 2);
    }

    #[tokio::test]
    async fn reader_counts_invalid_utf8_as_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("corrupt.data");
        let mut content = b"{\"a\":1}\n{\"title\":\"".to_vec();
        content.extend_from_slice(&[0xff, 0xfe]);
        content.extend_from_slice(b" broken\"}\r\n{\"a\":3}");
        tokio::fs::write(&path, content).await.unwrap();

        let mut reader = StagedReader::open(&path).await.unwrap();
        let mut seen = Vec::new();
        while let Some(line) = reader.next_record().await.unwrap() {
            seen.push((line.line_no, line.record));
        }

        assert_eq!(seen, vec![(1, json!({ "a": 1 })), (3, json!({ "a": 3 }))]);
        assert_eq!(reader.malformed(), 1);
        assert_eq!(reader.blank(), 0);
    }
}
