use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::archive::{self, ExtractSummary};
use crate::error::{PanelError, PanelResult};
use crate::log_sink::LogSink;
use crate::path_guard;

pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;
const MAX_EDIT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Path relative to the bot-files root, `/`-separated.
    pub name: String,
    pub size: u64,
    /// `folder`, or the file extension with its dot (`.js`), or empty.
    #[serde(rename = "type")]
    pub kind: String,
    pub modified: Option<String>,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub filename: String,
    pub content: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub filename: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub is_zip: bool,
}

/// Path-validated file operations on the bot-files root.
///
/// Nothing here serializes concurrent access to the same file; two writers
/// race exactly as they would on the OS.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    sink: LogSink,
}

fn invalid_name(_: path_guard::PathError) -> PanelError {
    PanelError::validation("Invalid filename")
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_upload_name(original: &str) -> String {
    original
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn is_zip_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn modified_rfc3339(meta: &std::fs::Metadata) -> Option<String> {
    meta.modified()
        .ok()
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, sink: LogSink) -> Self {
        Self {
            root: root.into(),
            sink,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("create {}", self.root.display()))
    }

    fn guarded(&self, name: &str) -> PanelResult<PathBuf> {
        path_guard::scoped_path(&self.root, name).map_err(invalid_name)
    }

    /// Number of direct children of the root (0 if it does not exist).
    pub async fn count_entries(&self) -> usize {
        let Ok(mut rd) = tokio::fs::read_dir(&self.root).await else {
            return 0;
        };
        let mut n = 0;
        while let Ok(Some(entry)) = rd.next_entry().await {
            if !path_guard::is_temp_name(&entry.file_name().to_string_lossy()) {
                n += 1;
            }
        }
        n
    }

    /// Recursive listing, hidden entries included, parents before children.
    pub async fn list(&self, actor: &str) -> PanelResult<Vec<FileRecord>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let root = self.root.clone();
        let listed = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<FileRecord>> {
            let mut out = Vec::new();
            for entry in walkdir::WalkDir::new(&root)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = entry.context("walk bot files")?;
                if path_guard::is_temp_name(&entry.file_name().to_string_lossy()) {
                    continue;
                }
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                let name = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                let is_directory = meta.is_dir();
                let kind = if is_directory {
                    "folder".to_string()
                } else {
                    entry
                        .path()
                        .extension()
                        .map(|e| format!(".{}", e.to_string_lossy()))
                        .unwrap_or_default()
                };
                out.push(FileRecord {
                    name,
                    size: if is_directory { 0 } else { meta.len() },
                    kind,
                    modified: modified_rfc3339(&meta),
                    is_directory,
                });
            }
            Ok(out)
        })
        .await
        .context("list task failed")?;

        listed.map_err(|e| {
            self.sink
                .error(actor, format!("Error reading files: {}", crate::error::format_error_chain(&e)));
            PanelError::Internal(e.context("Failed to read files"))
        })
    }

    pub async fn read(&self, name: &str, actor: &str) -> PanelResult<FileContent> {
        let path = self.guarded(name)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| PanelError::not_found("File not found"))?;
        if meta.is_dir() {
            return Err(PanelError::validation("Cannot read directory content"));
        }
        if meta.len() > MAX_EDIT_BYTES {
            return Err(PanelError::validation("File is too large to open in the editor"));
        }

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            self.sink
                .error(actor, format!("Error reading file {name}: {e}"));
            PanelError::Internal(anyhow::Error::new(e).context("Failed to read file"))
        })?;
        self.sink.info(actor, format!("File read: {name}"));

        Ok(FileContent {
            filename: name.to_string(),
            content: String::from_utf8_lossy(&bytes).into_owned(),
            size: meta.len(),
        })
    }

    /// Overwrites an existing file.
    pub async fn write(&self, name: &str, content: &str, actor: &str) -> PanelResult<()> {
        let path = self.guarded(name)?;
        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|_| PanelError::not_found("File not found"))?;
        if meta.is_dir() {
            return Err(PanelError::validation("Cannot write to a directory"));
        }

        let tmp = path_guard::temp_path_for(&path);
        let res: anyhow::Result<()> = async {
            let mut f = tokio::fs::File::create(&tmp)
                .await
                .context("create temp file")?;
            f.write_all(content.as_bytes()).await.context("write")?;
            f.flush().await.ok();
            drop(f);
            tokio::fs::rename(&tmp, &path)
                .await
                .context("persist file")?;
            Ok(())
        }
        .await;

        match res {
            Ok(()) => {
                self.sink.success(actor, format!("File updated: {name}"));
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                self.sink.error(
                    actor,
                    format!(
                        "Error updating file {name}: {}",
                        crate::error::format_error_chain(&e)
                    ),
                );
                Err(PanelError::Internal(e.context("Failed to update file")))
            }
        }
    }

    pub async fn create(
        &self,
        name: &str,
        content: Option<&str>,
        is_folder: bool,
        actor: &str,
    ) -> PanelResult<()> {
        let path = self.guarded(name)?;
        if tokio::fs::symlink_metadata(&path).await.is_ok() {
            return Err(PanelError::validation("File or folder already exists"));
        }

        let what = if is_folder { "folder" } else { "file" };
        let res = if is_folder {
            tokio::fs::create_dir_all(&path).await
        } else {
            self.ensure_root().await?;
            tokio::fs::write(&path, content.unwrap_or_default()).await
        };

        match res {
            Ok(()) => {
                let label = if is_folder { "Folder" } else { "File" };
                self.sink.success(actor, format!("{label} created: {name}"));
                Ok(())
            }
            Err(e) => {
                self.sink
                    .error(actor, format!("Error creating {what} {name}: {e}"));
                Err(PanelError::Internal(
                    anyhow::Error::new(e).context(format!("Failed to create {what}")),
                ))
            }
        }
    }

    /// Removes a file, or a folder and everything under it.
    pub async fn delete(&self, name: &str, actor: &str) -> PanelResult<()> {
        let path = self.guarded(name)?;
        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|_| PanelError::not_found("File not found"))?;

        let (res, label) = if meta.is_dir() {
            (tokio::fs::remove_dir_all(&path).await, "Directory")
        } else {
            (tokio::fs::remove_file(&path).await, "File")
        };

        match res {
            Ok(()) => {
                self.sink.warning(actor, format!("{label} deleted: {name}"));
                Ok(())
            }
            Err(e) => {
                self.sink
                    .error(actor, format!("Error deleting file {name}: {e}"));
                Err(PanelError::Internal(
                    anyhow::Error::new(e).context("Failed to delete file"),
                ))
            }
        }
    }

    /// Stores an uploaded file at the root under its sanitized name.
    pub async fn store_upload(
        &self,
        original_name: &str,
        data: &[u8],
        actor: &str,
    ) -> PanelResult<UploadedFile> {
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(PanelError::validation(
                "File too large. Maximum size is 100MB",
            ));
        }
        let filename = sanitize_upload_name(original_name);
        let path = self.guarded(&filename)?;

        self.ensure_root().await?;
        tokio::fs::write(&path, data).await.map_err(|e| {
            self.sink
                .error(actor, format!("Error processing file: {e}"));
            PanelError::Internal(anyhow::Error::new(e).context("Failed to process file"))
        })?;

        self.sink.success(
            actor,
            format!(
                "File uploaded: {original_name} ({:.2} KB)",
                data.len() as f64 / 1024.0
            ),
        );

        let is_zip = is_zip_name(&filename);
        Ok(UploadedFile {
            filename,
            size: data.len() as u64,
            kind: if is_zip { "zip" } else { "file" },
            is_zip,
        })
    }

    /// Extracts a previously uploaded archive into the root, then removes it.
    pub async fn extract_zip(&self, name: &str, actor: &str) -> PanelResult<ExtractSummary> {
        let zip_path = self.guarded(name)?;
        if !tokio::fs::try_exists(&zip_path).await.unwrap_or(false) {
            return Err(PanelError::not_found("ZIP file not found"));
        }
        if !is_zip_name(name) {
            return Err(PanelError::validation("File is not a ZIP archive"));
        }

        self.sink.info(actor, format!("Extracting ZIP: {name}"));
        let summary = match archive::extract_archive_file(&zip_path, &self.root, &self.sink, actor)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.sink.error(actor, format!("Failed to extract ZIP: {e}"));
                return Err(e);
            }
        };

        match tokio::fs::remove_file(&zip_path).await {
            Ok(()) => self.sink.info(actor, format!("Deleted ZIP file: {name}")),
            Err(e) => self
                .sink
                .warning(actor, format!("Warning: Could not delete ZIP: {e}")),
        }
        self.sink.success(
            actor,
            format!(
                "ZIP extracted successfully: {} files",
                summary.extracted_count
            ),
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), LogSink::new());
        (dir, store)
    }

    #[tokio::test]
    async fn create_read_update_read_round_trip() {
        let (_dir, fs) = store();
        fs.create("bot.js", Some("v1"), false, "alice").await.unwrap();
        assert_eq!(fs.read("bot.js", "alice").await.unwrap().content, "v1");

        fs.write("bot.js", "console.log('v2')", "alice").await.unwrap();
        let got = fs.read("bot.js", "alice").await.unwrap();
        assert_eq!(got.content, "console.log('v2')");
        assert_eq!(got.size, "console.log('v2')".len() as u64);
    }

    #[tokio::test]
    async fn unsafe_names_are_rejected_before_touching_disk() {
        let (dir, fs) = store();
        std::fs::write(dir.path().join("keep.txt"), "x").unwrap();

        for bad in ["..", "../keep.txt", "a/b", "a\\b", "x..y"] {
            let errs = [
                fs.create(bad, Some("x"), false, "alice").await.unwrap_err(),
                fs.create(bad, None, true, "alice").await.unwrap_err(),
                fs.write(bad, "x", "alice").await.unwrap_err(),
                fs.read(bad, "alice").await.unwrap_err(),
                fs.delete(bad, "alice").await.unwrap_err(),
                fs.extract_zip(bad, "alice").await.unwrap_err(),
            ];
            for err in errs {
                assert!(
                    matches!(err, PanelError::Validation { .. }),
                    "{bad}: {err:?}"
                );
            }
        }

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["keep.txt"]);
    }

    #[tokio::test]
    async fn create_refuses_existing_names() {
        let (_dir, fs) = store();
        fs.create("lib", None, true, "alice").await.unwrap();
        let err = fs.create("lib", Some(""), false, "alice").await.unwrap_err();
        assert_eq!(err.to_string(), "File or folder already exists");
    }

    #[tokio::test]
    async fn write_and_read_require_existing_files() {
        let (_dir, fs) = store();
        assert!(matches!(
            fs.write("nope.js", "x", "alice").await.unwrap_err(),
            PanelError::NotFound(_)
        ));
        assert!(matches!(
            fs.read("nope.js", "alice").await.unwrap_err(),
            PanelError::NotFound(_)
        ));

        fs.create("dir", None, true, "alice").await.unwrap();
        assert!(matches!(
            fs.read("dir", "alice").await.unwrap_err(),
            PanelError::Validation { .. }
        ));
    }

    #[tokio::test]
    async fn write_accepts_empty_content() {
        let (_dir, fs) = store();
        fs.create("a.txt", Some("abc"), false, "alice").await.unwrap();
        fs.write("a.txt", "", "alice").await.unwrap();
        assert_eq!(fs.read("a.txt", "alice").await.unwrap().content, "");
    }

    #[tokio::test]
    async fn write_leaves_similarly_named_files_alone() {
        let (dir, fs) = store();
        fs.create("bot.js", Some("v1"), false, "alice").await.unwrap();
        std::fs::write(dir.path().join(".bot.js.tmp"), "keep").unwrap();

        fs.write("bot.js", "v2", "alice").await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join(".bot.js.tmp")).unwrap(),
            "keep"
        );
        let names: Vec<String> = fs
            .list("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec![".bot.js.tmp", "bot.js"]);
    }

    #[tokio::test]
    async fn list_hides_in_flight_writes() {
        let (dir, fs) = store();
        std::fs::write(dir.path().join("bot.js"), "x").unwrap();
        std::fs::write(
            dir.path().join(format!(".bot.js.0123{}", path_guard::TEMP_SUFFIX)),
            "partial",
        )
        .unwrap();

        let list = fs.list("alice").await.unwrap();
        let names: Vec<&str> = list.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["bot.js"]);
        assert_eq!(fs.count_entries().await, 1);
    }

    #[tokio::test]
    async fn delete_removes_folders_recursively() {
        let (dir, fs) = store();
        std::fs::create_dir_all(dir.path().join("cmds/admin")).unwrap();
        std::fs::write(dir.path().join("cmds/admin/ban.js"), "x").unwrap();

        fs.delete("cmds", "alice").await.unwrap();
        assert!(!dir.path().join("cmds").exists());
        assert!(matches!(
            fs.delete("cmds", "alice").await.unwrap_err(),
            PanelError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_is_recursive_and_includes_hidden_files() {
        let (dir, fs) = store();
        std::fs::write(dir.path().join(".env"), "DISCORD_TOKEN=x").unwrap();
        std::fs::create_dir_all(dir.path().join("src/events")).unwrap();
        std::fs::write(dir.path().join("src/events/ready.js"), "12345").unwrap();

        let list = fs.list("alice").await.unwrap();
        let names: Vec<&str> = list.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec![".env", "src", "src/events", "src/events/ready.js"]);

        let ready = list.iter().find(|r| r.name == "src/events/ready.js").unwrap();
        assert_eq!(ready.size, 5);
        assert_eq!(ready.kind, ".js");
        assert!(!ready.is_directory);
        let src = list.iter().find(|r| r.name == "src").unwrap();
        assert_eq!(src.kind, "folder");
        assert_eq!(src.size, 0);
        assert_eq!(fs.count_entries().await, 2);
    }

    #[tokio::test]
    async fn missing_root_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileStore::new(dir.path().join("absent"), LogSink::new());
        assert!(fs.list("alice").await.unwrap().is_empty());
        assert_eq!(fs.count_entries().await, 0);
    }

    #[tokio::test]
    async fn uploads_are_sanitized() {
        let (dir, fs) = store();
        let up = fs
            .store_upload("my bot (v2).ZIP", b"PK", "alice")
            .await
            .unwrap();
        assert_eq!(up.filename, "my_bot__v2_.ZIP");
        assert!(up.is_zip);
        assert_eq!(up.kind, "zip");
        assert!(dir.path().join("my_bot__v2_.ZIP").is_file());

        let up = fs.store_upload("../../etc/passwd", b"x", "alice").await;
        assert!(up.is_err());
    }

    #[tokio::test]
    async fn extract_zip_unpacks_and_removes_archive() {
        let (dir, fs) = store();
        let mut w = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        w.start_file("commands/ping.js", zip::write::SimpleFileOptions::default())
            .unwrap();
        w.write_all(b"module.exports = {}").unwrap();
        let bytes = w.finish().unwrap().into_inner();
        fs.store_upload("bot.zip", &bytes, "alice").await.unwrap();

        let s = fs.extract_zip("bot.zip", "alice").await.unwrap();

        assert_eq!(s.extracted_count, 1);
        assert!(dir.path().join("commands/ping.js").is_file());
        assert!(!dir.path().join("bot.zip").exists());
    }

    #[tokio::test]
    async fn extract_zip_checks_existence_and_extension() {
        let (_dir, fs) = store();
        assert!(matches!(
            fs.extract_zip("missing.zip", "alice").await.unwrap_err(),
            PanelError::NotFound(_)
        ));
        fs.create("notes.txt", Some("x"), false, "alice").await.unwrap();
        assert!(matches!(
            fs.extract_zip("notes.txt", "alice").await.unwrap_err(),
            PanelError::Validation { .. }
        ));
    }
}
