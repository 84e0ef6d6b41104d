//! Archive extraction (zip, tar, tar.gz, tar.bz2, tar.xz).
//!
//! Source distributions and wheels are unpacked as-is; callers decide which
//! directory inside the result is the project root.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::{PyxError, Result};

/// Supported archive types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

impl ArchiveType {
    /// Detect archive type from file extension; wheels are zip files
    pub fn from_path(path: &Path) -> Option<Self> {
        let path_str = path.to_string_lossy().to_lowercase();

        if path_str.ends_with(".zip") || path_str.ends_with(".whl") {
            Some(ArchiveType::Zip)
        } else if path_str.ends_with(".tar.gz") || path_str.ends_with(".tgz") {
            Some(ArchiveType::TarGz)
        } else if path_str.ends_with(".tar.bz2") || path_str.ends_with(".tbz2") {
            Some(ArchiveType::TarBz2)
        } else if path_str.ends_with(".tar.xz") || path_str.ends_with(".txz") {
            Some(ArchiveType::TarXz)
        } else if path_str.ends_with(".tar") {
            Some(ArchiveType::Tar)
        } else {
            None
        }
    }

    /// File name without the archive suffix
    pub fn strip_suffix(filename: &str) -> &str {
        const SUFFIXES: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".tbz2", ".txz", ".tar", ".zip", ".whl"];
        let lower = filename.to_lowercase();
        SUFFIXES
            .iter()
            .find(|suffix| lower.ends_with(*suffix))
            .map(|suffix| &filename[..filename.len() - suffix.len()])
            .unwrap_or(filename)
    }
}

/// Archive extractor
pub struct ArchiveExtractor;

impl ArchiveExtractor {
    /// Extract an archive to the specified directory
    pub fn extract(archive_path: &Path, dest_dir: &Path) -> Result<()> {
        let archive_type = ArchiveType::from_path(archive_path)
            .ok_or_else(|| PyxError::Archive(format!("Unknown archive type: {}", archive_path.display())))?;

        Self::extract_with_type(archive_path, dest_dir, archive_type)
    }

    /// Extract an archive with explicit type
    pub fn extract_with_type(archive_path: &Path, dest_dir: &Path, archive_type: ArchiveType) -> Result<()> {
        std::fs::create_dir_all(dest_dir)?;
        log::trace!("Extracting {} to {}", archive_path.display(), dest_dir.display());

        match archive_type {
            ArchiveType::Zip => Self::extract_zip(archive_path, dest_dir),
            ArchiveType::Tar => Self::extract_tar(BufReader::new(File::open(archive_path)?), dest_dir),
            ArchiveType::TarGz => {
                Self::extract_tar(GzDecoder::new(BufReader::new(File::open(archive_path)?)), dest_dir)
            }
            ArchiveType::TarBz2 => {
                use bzip2::read::BzDecoder;
                Self::extract_tar(BzDecoder::new(BufReader::new(File::open(archive_path)?)), dest_dir)
            }
            ArchiveType::TarXz => {
                use xz2::read::XzDecoder;
                Self::extract_tar(XzDecoder::new(BufReader::new(File::open(archive_path)?)), dest_dir)
            }
        }
    }

    /// Create the location of an entry below `dest_dir`, rejecting anything that escapes it
    fn prepare_entry(dest_dir: &Path, dest_canonical: &Path, relative: &Path, is_dir: bool) -> Result<PathBuf> {
        let relative_str = relative.to_string_lossy();
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir | std::path::Component::Prefix(_)));
        if escapes {
            return Err(PyxError::Archive(format!("Path traversal detected in archive: {}", relative_str)));
        }

        let outpath = dest_dir.join(relative);
        let parent = if is_dir { Some(outpath.as_path()) } else { outpath.parent() };
        if let Some(parent) = parent {
            std::fs::create_dir_all(parent)?;
            if !parent.canonicalize()?.starts_with(dest_canonical) {
                return Err(PyxError::Archive(format!(
                    "Path traversal detected: {} escapes destination directory",
                    relative_str
                )));
            }
        }

        Ok(outpath)
    }

    fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
        let reader = BufReader::new(File::open(archive_path)?);
        let mut archive =
            zip::ZipArchive::new(reader).map_err(|e| PyxError::Archive(format!("Failed to open zip: {}", e)))?;

        let dest_canonical = dest_dir.canonicalize()?;

        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .map_err(|e| PyxError::Archive(format!("Failed to read zip entry: {}", e)))?;

            if file.name().is_empty() {
                continue;
            }

            let relative = PathBuf::from(file.name());
            let outpath = Self::prepare_entry(dest_dir, &dest_canonical, &relative, file.is_dir())?;
            if file.is_dir() {
                continue;
            }

            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut file, &mut outfile)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = file.unix_mode() {
                    std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode))?;
                }
            }
        }

        Ok(())
    }

    fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<()> {
        let mut archive = tar::Archive::new(reader);
        let dest_canonical = dest_dir.canonicalize()?;

        let entries = archive
            .entries()
            .map_err(|e| PyxError::Archive(format!("Failed to read tar: {}", e)))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| PyxError::Archive(format!("Failed to read tar entry: {}", e)))?;
            let relative = entry
                .path()
                .map_err(|e| PyxError::Archive(format!("Invalid path in tar: {}", e)))?
                .into_owned();
            if relative.as_os_str().is_empty() {
                continue;
            }

            let is_dir = entry.header().entry_type().is_dir();
            let outpath = Self::prepare_entry(dest_dir, &dest_canonical, &relative, is_dir)?;

            if !is_dir {
                entry
                    .unpack(&outpath)
                    .map_err(|e| PyxError::Archive(format!("Failed to extract: {}", e)))?;
            }
        }

        Ok(())
    }
}
