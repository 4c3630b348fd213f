use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use core::sync::atomic::{AtomicU64, Ordering};
use courier::{Encoding, Error, Result, Session};
use std::path::{Path, PathBuf};

const DEFAULT_FILENAME: &str = "document.docx";

/// A finished download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Download {
    pub id: u64,
    pub path: PathBuf,
    pub bytes: usize,
}

/// Writes finalized uploads into a directory.
#[derive(Debug)]
pub struct FsDownloadSink {
    dir: PathBuf,
    next_id: AtomicU64,
}

impl FsDownloadSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decodes the session payload according to its encoding and writes it
    /// under the metadata `filename` (default `document.docx`). An existing
    /// file is never overwritten; a numbered name is picked instead.
    ///
    /// # Errors
    ///
    /// [`Error::Collaborator`] if the payload cannot be decoded or written.
    pub async fn save(&self, session: &Session) -> Result<Download> {
        let data = session.data().unwrap_or_default();
        let bytes = match session.encoding {
            Encoding::Base64 => STANDARD
                .decode(data.trim())
                .map_err(|e| Error::collaborator("download", format!("invalid base64 payload: {e}")))?,
            Encoding::Text => data.as_bytes().to_vec(),
        };

        let filename = sanitize(session.metadata_str("filename").unwrap_or(DEFAULT_FILENAME));
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::collaborator("download", e))?;
        let path = self.unused_path(&filename).await?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Error::collaborator("download", e))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        tracing::info!(id, path = %path.display(), bytes = bytes.len(), "Download written");

        Ok(Download {
            id,
            path,
            bytes: bytes.len(),
        })
    }

    async fn unused_path(&self, filename: &str) -> Result<PathBuf> {
        let candidate = self.dir.join(filename);
        if !exists(&candidate).await? {
            return Ok(candidate);
        }

        let name = Path::new(filename);
        let stem = name.file_stem().and_then(|s| s.to_str()).unwrap_or("download");
        let extension = name.extension().and_then(|s| s.to_str());
        for n in 1_u32.. {
            let numbered = match extension {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            let candidate = self.dir.join(numbered);
            if !exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(Error::collaborator("download", "no free file name"))
    }
}

async fn exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| Error::collaborator("download", e))
}

/// Keeps only the final path component so metadata cannot escape the
/// download directory.
fn sanitize(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_FILENAME)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier::{OpenOptions, OsTokenSource, SessionRegistry, SystemClock};
    use serde_json::json;
    use std::sync::Arc;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "courier-downloads-{}-{name}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn finalized(encoding: Encoding, metadata: serde_json::Value, chunks: &[&str]) -> Session {
        let registry = SessionRegistry::new(16, Arc::new(OsTokenSource::new()), Arc::new(SystemClock));
        let opened = registry.open(
            Some("download".into()),
            OpenOptions {
                encoding,
                metadata: metadata.as_object().cloned().unwrap_or_default(),
                ..OpenOptions::default()
            },
        );
        for chunk in chunks {
            registry
                .append_chunk(opened.token.as_str(), (*chunk).to_owned())
                .unwrap();
        }
        registry.take_finalized(opened.token.as_str()).unwrap()
    }

    #[tokio::test]
    async fn decodes_base64_under_metadata_filename() {
        let sink = FsDownloadSink::new(scratch_dir("b64"));
        let session = finalized(
            Encoding::Base64,
            json!({ "filename": "report.docx" }),
            &["aGVs", "bG8="],
        );

        let download = sink.save(&session).await.unwrap();
        assert_eq!(download.id, 1);
        assert_eq!(download.path, sink.dir().join("report.docx"));
        assert_eq!(std::fs::read(&download.path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn defaults_name_and_never_overwrites() {
        let sink = FsDownloadSink::new(scratch_dir("names"));
        let first = sink
            .save(&finalized(Encoding::Text, json!({}), &["one"]))
            .await
            .unwrap();
        let second = sink
            .save(&finalized(Encoding::Text, json!({ "filename": "../../document.docx" }), &["two"]))
            .await
            .unwrap();

        assert_eq!(first.path, sink.dir().join("document.docx"));
        assert_eq!(second.path, sink.dir().join("document (1).docx"));
        assert_eq!(second.id, 2);
        assert_eq!(std::fs::read_to_string(&second.path).unwrap(), "two");
    }

    #[tokio::test]
    async fn invalid_base64_is_a_collaborator_error() {
        let sink = FsDownloadSink::new(scratch_dir("bad"));
        let err = sink
            .save(&finalized(Encoding::Base64, json!({}), &["!!!"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Collaborator {
                collaborator: "download",
                ..
            }
        ));
    }
}
