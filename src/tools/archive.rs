//! Source archive tools.
//!
//! Packages usually ship their upstream sources as an archive next to the
//! spec file. `extract_archive` unpacks it into `extracted/` so the model can
//! edit sources; `compress_archive` packs `extracted/` back under the
//! original archive name, in the original format, and removes the directory.

use async_trait::async_trait;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;
use zip::write::SimpleFileOptions;

use super::{parse_params, ExecutionContext, Tool, ToolError, ToolKind, ToolOutput};

/// Directory sources are unpacked into, inside the package directory.
pub const EXTRACT_DIR: &str = "extracted";

const XZ_LEVEL: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
    TarBz2,
    Zip,
}

impl ArchiveFormat {
    /// Detects the format from the file name.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz") {
            Some(Self::TarBz2)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ArchiveParams {
    #[serde(default)]
    package_path: Option<String>,
}

fn params(args: Value) -> Result<ArchiveParams, ToolError> {
    if args.is_null() {
        Ok(ArchiveParams::default())
    } else {
        parse_params(args)
    }
}

fn find_archive(dir: &Path) -> io::Result<Option<(PathBuf, ArchiveFormat)>> {
    let mut candidates: Vec<(PathBuf, ArchiveFormat)> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter_map(|p| ArchiveFormat::detect(&p).map(|format| (p, format)))
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(candidates.into_iter().next())
}

fn unsupported(path: &Path) -> ToolOutput {
    ToolOutput::err(format!(
        "Error: Unsupported archive format for '{}'",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ))
}

fn extract(archive: &Path, format: ArchiveFormat, package_dir: &Path) -> io::Result<PathBuf> {
    let target = package_dir.join(EXTRACT_DIR);
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    fs::create_dir_all(&target)?;

    let file = fs::File::open(archive)?;
    match format {
        ArchiveFormat::TarGz => tar::Archive::new(GzDecoder::new(file)).unpack(&target)?,
        ArchiveFormat::TarXz => tar::Archive::new(XzDecoder::new(file)).unpack(&target)?,
        ArchiveFormat::TarBz2 => tar::Archive::new(BzDecoder::new(file)).unpack(&target)?,
        ArchiveFormat::Zip => unpack_zip(file, &target)?,
    }
    Ok(target)
}

fn unpack_zip<R: Read + Seek>(reader: R, target: &Path) -> io::Result<()> {
    let mut archive = zip::ZipArchive::new(reader).map_err(io::Error::other)?;
    archive.extract(target).map_err(io::Error::other)
}

fn compress(
    extracted: &Path,
    archive: &Path,
    format: ArchiveFormat,
    package_dir: &Path,
) -> io::Result<()> {
    let staging = tempfile::NamedTempFile::new_in(package_dir)?;
    {
        let out = staging.as_file();
        match format {
            ArchiveFormat::TarGz => {
                pack_tar(GzEncoder::new(out, Compression::default()), extracted)?.finish()?;
            }
            ArchiveFormat::TarXz => {
                pack_tar(XzEncoder::new(out, XZ_LEVEL), extracted)?.finish()?;
            }
            ArchiveFormat::TarBz2 => {
                pack_tar(BzEncoder::new(out, bzip2::Compression::default()), extracted)?
                    .finish()?;
            }
            ArchiveFormat::Zip => pack_zip(out, extracted)?,
        }
    }
    staging.persist(archive).map_err(|e| e.error)?;
    fs::remove_dir_all(extracted)
}

/// Appends the top-level items of `extracted` under their own names and
/// returns the underlying writer so the caller can finish compression.
fn pack_tar<W: Write>(writer: W, extracted: &Path) -> io::Result<W> {
    let mut tar = tar::Builder::new(writer);

    let mut items: Vec<PathBuf> = fs::read_dir(extracted)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    items.sort();
    for item in items {
        let name = match item.file_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        if item.is_dir() {
            tar.append_dir_all(&name, &item)?;
        } else {
            tar.append_path_with_name(&item, &name)?;
        }
    }
    tar.into_inner()
}

fn pack_zip<W: Write + Seek>(writer: W, extracted: &Path) -> io::Result<()> {
    let mut zip = zip::ZipWriter::new(writer);

    for entry in WalkDir::new(extracted).min_depth(1).sort_by_file_name() {
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(extracted)
            .map_err(io::Error::other)?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(io::Error::other)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options).map_err(io::Error::other)?;
            io::copy(&mut fs::File::open(entry.path())?, &mut zip)?;
        }
    }
    zip.finish().map_err(io::Error::other)?;
    Ok(())
}

// ============================================================================
// ExtractArchiveTool
// ============================================================================

/// Unpacks the package's source tarball into `extracted/`.
pub struct ExtractArchiveTool;

impl ExtractArchiveTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExtractArchiveTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ExtractArchiveTool {
    fn name(&self) -> &str {
        "extract_archive"
    }

    fn description(&self) -> &str {
        "Extract the source archive (.tar.gz/.tgz, .tar.xz/.txz, .tar.bz2/.tbz or .zip) of the package into an 'extracted' directory, replacing any previous extraction. \
         package_path may name the archive itself or the directory containing it (default: workspace root)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "package_path": {
                    "type": "string",
                    "description": "Archive file or directory containing it"
                }
            }
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Archive
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let params = params(args)?;
        let path = ctx.resolve_dir(params.package_path.as_deref())?;

        let (archive, format, package_dir) = if path.is_file() {
            let Some(format) = ArchiveFormat::detect(&path) else {
                return Ok(unsupported(&path));
            };
            let parent = path.parent().unwrap_or(ctx.workspace_root.as_path()).to_path_buf();
            (path, format, parent)
        } else if path.is_dir() {
            match find_archive(&path).map_err(|e| ToolError::FilesystemError(e.to_string()))? {
                Some((archive, format)) => (archive, format, path),
                None => {
                    return Ok(ToolOutput::err(format!(
                        "Error: No supported archive in '{}'",
                        ctx.display_path(&path)
                    )))
                }
            }
        } else {
            return Ok(ToolOutput::err(format!(
                "Error: Invalid path '{}'",
                ctx.display_path(&path)
            )));
        };

        let archive_name = ctx.display_path(&archive);
        let result = {
            let archive = archive.clone();
            tokio::task::spawn_blocking(move || extract(&archive, format, &package_dir))
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
        };

        match result {
            Ok(target) => Ok(ToolOutput::ok(format!(
                "Successfully extracted {} to {}",
                archive_name,
                target.display()
            ))),
            Err(e) => Ok(ToolOutput::err(format!("Extraction failed: {}", e))),
        }
    }
}

// ============================================================================
// CompressArchiveTool
// ============================================================================

/// Packs `extracted/` back into the original archive.
pub struct CompressArchiveTool;

impl CompressArchiveTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CompressArchiveTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CompressArchiveTool {
    fn name(&self) -> &str {
        "compress_archive"
    }

    fn description(&self) -> &str {
        "Compress the 'extracted' directory back into the package's original archive (same name), then remove 'extracted'. \
         package_path is the directory containing the archive (default: workspace root)."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "package_path": {
                    "type": "string",
                    "description": "Directory holding the original archive and 'extracted'"
                }
            }
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Archive
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolOutput, ToolError> {
        let params = params(args)?;
        if params
            .package_path
            .as_deref()
            .map(|p| p.contains(EXTRACT_DIR))
            .unwrap_or(false)
        {
            return Ok(ToolOutput::err(
                "Error: package_path should not contain 'extracted'",
            ));
        }
        let package_dir = ctx.resolve_dir(params.package_path.as_deref())?;

        let extracted = package_dir.join(EXTRACT_DIR);
        if !extracted.is_dir() {
            return Ok(ToolOutput::err(format!(
                "Error: Extracted directory '{}' not found",
                ctx.display_path(&extracted)
            )));
        }

        let (archive, format) = match find_archive(&package_dir)
            .map_err(|e| ToolError::FilesystemError(e.to_string()))?
        {
            Some(found) => found,
            None => {
                return Ok(ToolOutput::err(format!(
                    "Error: No original archive in '{}'",
                    ctx.display_path(&package_dir)
                )))
            }
        };
        let result = {
            let archive = archive.clone();
            tokio::task::spawn_blocking(move || compress(&extracted, &archive, format, &package_dir))
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
        };

        match result {
            Ok(()) => Ok(ToolOutput::ok(format!(
                "Success: Compressed to {}",
                archive.display()
            ))),
            Err(e) => Ok(ToolOutput::err(format!("Compression failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tarball(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        tar.into_inner().unwrap().finish().unwrap();
    }

    fn setup() -> (tempfile::TempDir, ExecutionContext) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("zlib");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("zlib.spec"), "Name: zlib\n").unwrap();
        write_tarball(
            &root.join("zlib-1.3.tar.gz"),
            &[("zlib-1.3/configure", "#!/bin/sh\nexit 1\n")],
        );
        let ctx = ExecutionContext::new("zlib", &root, dir.path().join("zlib_diff.log"));
        (dir, ctx)
    }

    #[test]
    fn test_detect_formats() {
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("A.TGZ")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar.xz")), Some(ArchiveFormat::TarXz));
        assert_eq!(ArchiveFormat::detect(Path::new("a.tbz")), Some(ArchiveFormat::TarBz2));
        assert_eq!(ArchiveFormat::detect(Path::new("a.zip")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect(Path::new("a.spec")), None);
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar.zst")), None);
    }

    #[tokio::test]
    async fn test_round_trip_keeps_each_format() {
        for (file_name, format) in [
            ("zlib-1.3.tar.xz", ArchiveFormat::TarXz),
            ("zlib-1.3.tar.bz2", ArchiveFormat::TarBz2),
            ("zlib-1.3.zip", ArchiveFormat::Zip),
        ] {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("zlib");
            let seed = dir.path().join("seed");
            fs::create_dir_all(seed.join("zlib-1.3/doc")).unwrap();
            fs::write(seed.join("zlib-1.3/configure"), "#!/bin/sh\nexit 1\n").unwrap();
            fs::create_dir_all(&root).unwrap();
            fs::write(root.join("zlib.spec"), "Name: zlib\n").unwrap();
            let archive = root.join(file_name);
            compress(&seed, &archive, format, &root).unwrap();
            let ctx = ExecutionContext::new("zlib", &root, dir.path().join("zlib_diff.log"));

            let out = ExtractArchiveTool::new()
                .execute(serde_json::json!({}), &ctx)
                .await
                .unwrap();
            assert!(out.is_ok(), "{}: {}", file_name, out.payload);
            assert!(out
                .payload
                .starts_with(&format!("Successfully extracted {} to ", file_name)));

            let configure = root.join("extracted/zlib-1.3/configure");
            assert_eq!(fs::read_to_string(&configure).unwrap(), "#!/bin/sh\nexit 1\n");
            assert!(root.join("extracted/zlib-1.3/doc").is_dir());
            fs::write(&configure, "#!/bin/sh\nexit 0\n").unwrap();

            let out = CompressArchiveTool::new()
                .execute(serde_json::json!({}), &ctx)
                .await
                .unwrap();
            assert_eq!(
                out.payload,
                format!("Success: Compressed to {}", archive.display())
            );
            assert!(!root.join(EXTRACT_DIR).exists());

            extract(&archive, format, &root).unwrap();
            assert_eq!(
                fs::read_to_string(&configure).unwrap(),
                "#!/bin/sh\nexit 0\n",
                "{} lost the edit",
                file_name
            );
        }
    }

    #[tokio::test]
    async fn test_extract_then_compress_round_trip() {
        let (_dir, ctx) = setup();

        let out = ExtractArchiveTool::new()
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert!(out.is_ok(), "{}", out.payload);
        assert!(out.payload.starts_with("Successfully extracted zlib-1.3.tar.gz to "));

        let configure = ctx.workspace_root.join("extracted/zlib-1.3/configure");
        assert_eq!(fs::read_to_string(&configure).unwrap(), "#!/bin/sh\nexit 1\n");
        fs::write(&configure, "#!/bin/sh\nexit 0\n").unwrap();

        let out = CompressArchiveTool::new()
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert!(out.is_ok(), "{}", out.payload);
        assert!(!ctx.workspace_root.join(EXTRACT_DIR).exists());

        ExtractArchiveTool::new()
            .execute(serde_json::json!({"package_path": "zlib-1.3.tar.gz"}), &ctx)
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&configure).unwrap(), "#!/bin/sh\nexit 0\n");
    }

    #[tokio::test]
    async fn test_compress_without_extraction() {
        let (_dir, ctx) = setup();
        let out = CompressArchiveTool::new()
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.payload, "Error: Extracted directory 'extracted' not found");
    }

    #[tokio::test]
    async fn test_compress_rejects_extracted_path() {
        let (_dir, ctx) = setup();
        let out = CompressArchiveTool::new()
            .execute(serde_json::json!({"package_path": "extracted"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.payload, "Error: package_path should not contain 'extracted'");
    }

    #[tokio::test]
    async fn test_unsupported_format_reported() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("pkg");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("src.rar"), b"Rar!").unwrap();
        let ctx = ExecutionContext::new("pkg", &root, dir.path().join("log"));

        let out = ExtractArchiveTool::new()
            .execute(serde_json::json!({"package_path": "src.rar"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.payload, "Error: Unsupported archive format for 'src.rar'");

        let out = ExtractArchiveTool::new()
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.payload, "Error: No supported archive in '.'");
    }

    #[tokio::test]
    async fn test_no_archive_present() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("pkg");
        fs::create_dir_all(&root).unwrap();
        let ctx = ExecutionContext::new("pkg", &root, dir.path().join("log"));
        let out = ExtractArchiveTool::new()
            .execute(Value::Null, &ctx)
            .await
            .unwrap();
        assert_eq!(out.payload, "Error: No supported archive in '.'");
    }
}
