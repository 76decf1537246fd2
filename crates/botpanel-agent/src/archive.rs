use std::{
    fs,
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Serialize;

use crate::error::{PanelError, PanelResult};
use crate::log_sink::LogSink;
use crate::path_guard::normalize_rel_path;

/// Directory name macOS archivers use for resource forks.
const METADATA_MARKER: &str = "__MACOSX";

/// Upper bound on bytes written by one extraction.
pub const MAX_EXTRACTED_BYTES: u64 = 1024 * 1024 * 1024; // 1 GiB

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractSummary {
    pub extracted_count: usize,
    pub total_entries: usize,
    /// Relative paths of files written by this extraction, in archive order.
    pub files: Vec<String>,
    /// Every file found under the destination afterwards, sorted.
    pub verified_files: Vec<String>,
}

#[derive(Debug)]
struct ArchiveEntry {
    index: usize,
    name: String,
    rel: PathBuf,
    is_dir: bool,
}

fn is_metadata_entry(name: &str) -> bool {
    name.contains(METADATA_MARKER) || name.starts_with('.')
}

fn rel_display(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}

/// Materializes a zip archive under `dest`.
///
/// Only a failure to open the archive is fatal. Bad entries (unsafe paths,
/// unreadable payloads, failed writes, entries over the size limit) are
/// logged and skipped so the rest of the tree still lands.
pub fn extract_archive(
    bytes: &[u8],
    dest: &Path,
    sink: &LogSink,
    actor: &str,
) -> PanelResult<ExtractSummary> {
    extract_with_limit(bytes, dest, sink, actor, MAX_EXTRACTED_BYTES)
}

fn extract_with_limit(
    bytes: &[u8],
    dest: &Path,
    sink: &LogSink,
    actor: &str,
    limit: u64,
) -> PanelResult<ExtractSummary> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| PanelError::Archive(format!("Failed to extract ZIP: {e}")))?;
    let total_entries = archive.len();

    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    let root = fs::canonicalize(dest).with_context(|| format!("resolve {}", dest.display()))?;

    sink.info(
        actor,
        format!("Starting ZIP extraction: {total_entries} entries found"),
    );

    let mut entries = Vec::with_capacity(total_entries);
    for index in 0..total_entries {
        let (name, is_dir) = match archive.by_index_raw(index) {
            Ok(f) => (f.name().to_string(), f.is_dir()),
            Err(e) => {
                sink.error(actor, format!("Error reading entry #{index}: {e}"));
                continue;
            }
        };

        if is_metadata_entry(&name) {
            sink.info(actor, format!("Skipping: {name}"));
            continue;
        }

        let trimmed = name.trim_end_matches(['/', '\\']);
        let rel = match normalize_rel_path(trimmed) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            Ok(_) => continue,
            Err(e) => {
                sink.warning(actor, format!("Skipping unsafe entry {name}: {e}"));
                continue;
            }
        };

        entries.push(ArchiveEntry {
            index,
            name,
            rel,
            is_dir,
        });
    }

    // Pass 1: directories.
    for entry in entries.iter().filter(|e| e.is_dir) {
        let path = root.join(&entry.rel);
        if path.is_dir() {
            continue;
        }
        match ensure_dir_within(&root, &path) {
            Ok(()) => sink.success(actor, format!("Created directory: {}", entry.name)),
            Err(e) => sink.error(
                actor,
                format!("Error creating directory {}: {e:#}", entry.name),
            ),
        }
    }

    // Pass 2: files. Parents are created on demand because archives may omit
    // directory entries or list them after their contents.
    let mut summary = ExtractSummary {
        total_entries,
        ..ExtractSummary::default()
    };
    let mut extracted_bytes: u64 = 0;
    for entry in entries.iter().filter(|e| !e.is_dir) {
        let path = root.join(&entry.rel);
        let written = (|| -> anyhow::Result<u64> {
            if let Some(parent) = path.parent() {
                if !parent.is_dir() {
                    ensure_dir_within(&root, parent)?;
                    sink.info(
                        actor,
                        format!(
                            "Created parent directory: {}",
                            rel_display(parent.strip_prefix(&root).unwrap_or(parent))
                        ),
                    );
                } else {
                    ensure_within(&root, parent)?;
                }
            }

            let mut file = archive
                .by_index(entry.index)
                .context("read entry from archive")?;
            // The declared size is untrusted; it only lets us refuse early.
            let remaining = limit.saturating_sub(extracted_bytes);
            if file.size() > remaining {
                anyhow::bail!(
                    "entry declares {} bytes, over the {limit} byte extraction limit",
                    file.size()
                );
            }

            if fs::symlink_metadata(&path).is_ok_and(|m| m.file_type().is_symlink()) {
                anyhow::bail!("refusing to overwrite symlink");
            }
            let mut out = fs::File::create(&path).context("create file")?;
            let copied = match std::io::copy(
                &mut (&mut file).take(remaining.saturating_add(1)),
                &mut out,
            ) {
                Ok(n) if n <= remaining => n,
                Ok(_) => {
                    drop(out);
                    let _ = fs::remove_file(&path);
                    anyhow::bail!("extraction limit of {limit} bytes exceeded");
                }
                Err(e) => {
                    drop(out);
                    let _ = fs::remove_file(&path);
                    return Err(anyhow::Error::new(e).context("decompress entry"));
                }
            };
            out.sync_all().ok();
            Ok(copied)
        })();

        match written {
            Ok(len) => {
                let rel = rel_display(&entry.rel);
                extracted_bytes += len;
                summary.extracted_count += 1;
                sink.success(actor, format!("Extracted file: {rel} ({len} bytes)"));

                match fs::metadata(&path) {
                    Ok(m) => sink.info(actor, format!("Verified: {rel} - {} bytes", m.len())),
                    Err(_) => sink.warning(
                        actor,
                        format!("WARNING: File not found after extraction: {rel}"),
                    ),
                }
                summary.files.push(rel);
            }
            Err(e) => sink.error(actor, format!("Error extracting {}: {e:#}", entry.name)),
        }
    }

    sink.success(
        actor,
        format!(
            "Extraction complete: {} files extracted from {} total entries",
            summary.extracted_count, total_entries
        ),
    );

    summary.verified_files = walk_files(&root);
    sink.info(
        actor,
        format!(
            "Total files in directory after extraction: {}",
            summary.verified_files.len()
        ),
    );

    Ok(summary)
}

/// Reads `zip_path` and extracts it under `dest` on the blocking pool.
pub async fn extract_archive_file(
    zip_path: &Path,
    dest: &Path,
    sink: &LogSink,
    actor: &str,
) -> PanelResult<ExtractSummary> {
    let bytes = tokio::fs::read(zip_path)
        .await
        .with_context(|| format!("read {}", zip_path.display()))?;

    let dest = dest.to_path_buf();
    let sink = sink.clone();
    let actor = actor.to_string();
    tokio::task::spawn_blocking(move || extract_archive(&bytes, &dest, &sink, &actor))
        .await
        .context("extract task failed")?
}

/// Creates `dir` and its ancestors, then confirms it did not resolve outside `root`
/// (an existing symlink along the way could point anywhere).
fn ensure_dir_within(root: &Path, dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    ensure_within(root, dir)
}

fn ensure_within(root: &Path, p: &Path) -> anyhow::Result<()> {
    let canon = fs::canonicalize(p).with_context(|| format!("resolve {}", p.display()))?;
    if !canon.starts_with(root) {
        anyhow::bail!("path escapes destination root");
    }
    Ok(())
}

fn walk_files(root: &Path) -> Vec<String> {
    let mut out: Vec<String> = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(root).ok().map(rel_display))
        .collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, payload) in entries {
            match payload {
                Some(data) => {
                    w.start_file(*name, SimpleFileOptions::default()).unwrap();
                    w.write_all(data).unwrap();
                }
                None => w.add_directory(*name, SimpleFileOptions::default()).unwrap(),
            }
        }
        w.finish().unwrap().into_inner()
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let zip = build_zip(&[("a/b/c.txt", Some(b"hello"))]);
        let sink = LogSink::new();

        let s = extract_archive(&zip, dir.path(), &sink, "alice").unwrap();

        assert!(dir.path().join("a").is_dir());
        assert!(dir.path().join("a/b").is_dir());
        assert_eq!(
            fs::read_to_string(dir.path().join("a/b/c.txt")).unwrap(),
            "hello"
        );
        assert_eq!(s.extracted_count, 1);
        assert_eq!(s.total_entries, 1);
        assert_eq!(s.files, vec!["a/b/c.txt"]);
        assert_eq!(s.verified_files, vec!["a/b/c.txt"]);
    }

    #[test]
    fn skips_metadata_directories_but_keeps_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let zip = build_zip(&[
            ("__MACOSX/", None),
            ("__MACOSX/._index.js", Some(b"fork")),
            (".hidden", Some(b"x")),
            ("index.js", Some(b"console.log(1)")),
            ("lib/", None),
            ("lib/util.js", Some(b"module.exports = {}")),
        ]);
        let sink = LogSink::new();

        let s = extract_archive(&zip, dir.path(), &sink, "alice").unwrap();

        assert!(!dir.path().join("__MACOSX").exists());
        assert!(!dir.path().join(".hidden").exists());
        assert!(dir.path().join("index.js").is_file());
        assert!(dir.path().join("lib/util.js").is_file());
        assert_eq!(s.extracted_count, 2);
        assert_eq!(s.total_entries, 6);
        assert!(
            sink.recent(100)
                .iter()
                .any(|e| e.message == "Skipping: __MACOSX/._index.js")
        );
    }

    #[test]
    fn traversal_entries_are_skipped() {
        let outer = tempfile::tempdir().unwrap();
        let dest = outer.path().join("home");
        let zip = build_zip(&[
            ("../escape.txt", Some(b"nope")),
            ("ok/../../escape2.txt", Some(b"nope")),
            ("safe.txt", Some(b"yes")),
        ]);
        let sink = LogSink::new();

        let s = extract_archive(&zip, &dest, &sink, "alice").unwrap();

        assert!(!outer.path().join("escape.txt").exists());
        assert!(!outer.path().join("escape2.txt").exists());
        assert!(dest.join("safe.txt").is_file());
        assert_eq!(s.files, vec!["safe.txt"]);
        let unsafe_logged = sink
            .recent(100)
            .iter()
            .filter(|e| e.message.starts_with("Skipping unsafe entry"))
            .count();
        assert_eq!(unsafe_logged, 2);
    }

    #[test]
    fn overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "old").unwrap();
        let zip = build_zip(&[("config.json", Some(b"new"))]);

        extract_archive(&zip, dir.path(), &LogSink::new(), "alice").unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("config.json")).unwrap(),
            "new"
        );
    }

    #[test]
    fn one_bad_entry_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the archive expects a directory.
        fs::write(dir.path().join("blocked"), "file").unwrap();
        let zip = build_zip(&[
            ("blocked/inner.txt", Some(b"x")),
            ("fine.txt", Some(b"y")),
        ]);
        let sink = LogSink::new();

        let s = extract_archive(&zip, dir.path(), &sink, "alice").unwrap();

        assert_eq!(s.extracted_count, 1);
        assert_eq!(s.files, vec!["fine.txt"]);
        assert!(
            sink.recent(100)
                .iter()
                .any(|e| e.message.starts_with("Error extracting blocked/inner.txt"))
        );
    }

    /// Rewrites the uncompressed size recorded in the central directory for the
    /// first entry. A `Some` zip64 size needs an entry written with `large_file(true)`.
    fn patch_declared_size(zip: &mut [u8], size32: u32, zip64: Option<u64>) {
        let cd = zip
            .windows(4)
            .position(|w| w == [0x50, 0x4b, 0x01, 0x02])
            .unwrap();
        zip[cd + 24..cd + 28].copy_from_slice(&size32.to_le_bytes());
        if let Some(size) = zip64 {
            let name_len = u16::from_le_bytes([zip[cd + 28], zip[cd + 29]]) as usize;
            let extra = cd + 46 + name_len;
            assert_eq!(&zip[extra..extra + 2], &[0x01, 0x00]);
            zip[extra + 4..extra + 12].copy_from_slice(&size.to_le_bytes());
        }
    }

    fn stored() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored)
    }

    #[test]
    fn huge_declared_size_skips_entry_without_allocating() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
        w.start_file("a.txt", stored().large_file(true)).unwrap();
        w.write_all(b"hello").unwrap();
        w.start_file("b.txt", stored()).unwrap();
        w.write_all(b"world").unwrap();
        let mut zip = w.finish().unwrap().into_inner();
        patch_declared_size(&mut zip, u32::MAX, Some(1 << 46));
        let sink = LogSink::new();

        let s = extract_archive(&zip, dir.path(), &sink, "alice").unwrap();

        assert_eq!(s.files, vec!["b.txt"]);
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(fs::read_to_string(dir.path().join("b.txt")).unwrap(), "world");
        assert!(
            sink.recent(100)
                .iter()
                .any(|e| e.message.starts_with("Error extracting a.txt"))
        );
    }

    #[test]
    fn understated_size_is_cut_off_at_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
        w.start_file("big.txt", stored()).unwrap();
        w.write_all(b"0123456789").unwrap();
        let mut zip = w.finish().unwrap().into_inner();
        patch_declared_size(&mut zip, 1, None);

        let s = extract_with_limit(&zip, dir.path(), &LogSink::new(), "alice", 4).unwrap();

        assert_eq!(s.extracted_count, 0);
        assert!(!dir.path().join("big.txt").exists());
    }

    #[test]
    fn limit_is_shared_across_entries() {
        let dir = tempfile::tempdir().unwrap();
        let zip = build_zip(&[("a.txt", Some(b"12345")), ("b.txt", Some(b"67890"))]);

        let s = extract_with_limit(&zip, dir.path(), &LogSink::new(), "alice", 8).unwrap();

        assert_eq!(s.files, vec!["a.txt"]);
        assert!(!dir.path().join("b.txt").exists());
    }

    #[test]
    fn garbage_archive_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive(b"not a zip", dir.path(), &LogSink::new(), "alice")
            .unwrap_err();
        assert!(matches!(err, PanelError::Archive(_)));
    }

    #[tokio::test]
    async fn extracts_from_file_on_blocking_pool() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("bot.zip");
        fs::write(&zip_path, build_zip(&[("src/index.js", Some(b"//"))])).unwrap();

        let s = extract_archive_file(&zip_path, dir.path(), &LogSink::new(), "alice")
            .await
            .unwrap();

        assert_eq!(s.files, vec!["src/index.js"]);
        assert!(s.verified_files.contains(&"bot.zip".to_string()));
    }
}
