use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use courier::{Error, Result};
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileContent {
    /// UTF-8 text, or base64 when read as binary.
    pub content: String,
    pub content_type: Option<&'static str>,
}

/// Reads files from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsFileReader;

impl FsFileReader {
    /// Reads `file_path`, which may be a plain path or a `file://` URL.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for an empty path, a non-file URL or a
    ///   `file://` URL naming a remote host.
    /// - [`Error::Collaborator`] if the file cannot be read, or is not UTF-8
    ///   when read as text.
    pub async fn read(&self, file_path: &str, binary: bool) -> Result<FileContent> {
        let path = resolve(file_path)?;

        let content = if binary {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| Error::collaborator("file", format!("{}: {e}", path.display())))?;
            STANDARD.encode(bytes)
        } else {
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::collaborator("file", format!("{}: {e}", path.display())))?
        };

        Ok(FileContent {
            content,
            content_type: content_type(&path),
        })
    }
}

fn resolve(file_path: &str) -> Result<PathBuf> {
    if file_path.is_empty() {
        return Err(Error::invalid_input("filePath must not be empty"));
    }

    // Anything that does not parse with a real scheme is a plain path. A
    // single-letter scheme is a Windows drive.
    let url = match Url::parse(file_path) {
        Ok(url) if url.scheme().len() > 1 => url,
        _ => return Ok(PathBuf::from(file_path)),
    };
    if url.scheme() != "file" {
        return Err(Error::invalid_input(format!(
            "only local files can be read, got `{file_path}`"
        )));
    }
    if let Some(host) = url.host_str().filter(|host| !host.is_empty() && *host != "localhost") {
        return Err(Error::invalid_input(format!(
            "remote file host `{host}` is not supported"
        )));
    }
    url.to_file_path()
        .map_err(|()| Error::invalid_input(format!("`{file_path}` is not a local file path")))
}

/// Guesses a MIME type from the file extension.
pub fn content_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match extension.as_str() {
        "html" | "htm" => "text/html",
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("courier-files-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[tokio::test]
    async fn reads_text_with_content_type() {
        let path = scratch("note.md");
        std::fs::write(&path, "# hi").unwrap();

        let read = FsFileReader.read(path.to_str().unwrap(), false).await.unwrap();
        assert_eq!(
            read,
            FileContent {
                content: "# hi".into(),
                content_type: Some("text/markdown"),
            }
        );
    }

    #[tokio::test]
    async fn reads_binary_as_base64_through_file_url() {
        let path = scratch("pixel.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let url = format!("file://{}", path.display());
        let read = FsFileReader.read(&url, true).await.unwrap();
        assert_eq!(read.content, STANDARD.encode([0x89, b'P', b'N', b'G']));
        assert_eq!(read.content_type, Some("image/png"));
    }

    #[tokio::test]
    async fn missing_files_are_collaborator_errors() {
        let err = FsFileReader
            .read("/definitely/not/here.txt", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Collaborator {
                collaborator: "file",
                ..
            }
        ));
    }

    #[test]
    fn rejects_remote_urls_and_empty_paths() {
        assert!(matches!(resolve("https://example.com/a"), Err(Error::InvalidInput { .. })));
        assert!(matches!(resolve("file://server/share/a.txt"), Err(Error::InvalidInput { .. })));
        assert!(matches!(resolve(""), Err(Error::InvalidInput { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn decodes_file_urls() {
        assert_eq!(
            resolve("file:///tmp/My%20Doc.txt").unwrap(),
            PathBuf::from("/tmp/My Doc.txt")
        );
        assert_eq!(
            resolve("file://localhost/tmp/a.txt").unwrap(),
            PathBuf::from("/tmp/a.txt")
        );
        assert_eq!(
            resolve("file:///tmp/a.txt?x=1#f").unwrap(),
            PathBuf::from("/tmp/a.txt")
        );
    }

    #[test]
    fn plain_paths_are_taken_verbatim() {
        assert_eq!(resolve("/tmp/50%.txt").unwrap(), PathBuf::from("/tmp/50%.txt"));
        assert_eq!(resolve("notes/a b.md").unwrap(), PathBuf::from("notes/a b.md"));
    }
}
