//! Unpacking of uploaded container archives.
//!
//! The format is chosen from the declared file name. Recognized archives are
//! unpacked into the target directory and then deleted; anything else is
//! left in place untouched. Entries that would land outside the target
//! directory, or that pass through a link, fail the whole extraction.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive entry {0:?} resolves outside the target directory")]
    PathTraversal(String),

    #[error("extraction was cancelled")]
    Cancelled,
}

/// Container formats that are unpacked after upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from a file name suffix (case-insensitive).
    pub fn detect(file_name: &str) -> Option<Self> {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }
}

/// What [`maybe_extract`] did with the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Not a recognized archive; the file was left as is.
    Skipped,
    /// Archive unpacked and removed.
    Extracted { format: ArchiveFormat, entries: usize },
}

/// Unpack `file_path` into `target_dir` if its name marks a supported
/// archive, then delete the archive. Blocking; run it on the blocking pool.
pub fn maybe_extract(file_path: &Path, target_dir: &Path) -> Result<Extraction, ArchiveError> {
    maybe_extract_until(file_path, target_dir, &CancellationToken::new())
}

/// [`maybe_extract`] that stops between entries once `cancel` fires.
///
/// A cancelled extraction returns [`ArchiveError::Cancelled`] and leaves
/// whatever was already written for the caller to roll back.
pub fn maybe_extract_until(
    file_path: &Path,
    target_dir: &Path,
    cancel: &CancellationToken,
) -> Result<Extraction, ArchiveError> {
    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some(format) = ArchiveFormat::detect(&file_name) else {
        debug!(file = %file_path.display(), "Not an archive, leaving in place");
        return Ok(Extraction::Skipped);
    };

    info!(file = %file_path.display(), ?format, target = %target_dir.display(), "Extracting archive");
    let unpack = Unpack {
        archive_path: file_path,
        target_dir,
        cancel,
    };
    let entries = match format {
        ArchiveFormat::Zip => unpack.zip()?,
        ArchiveFormat::Tar => unpack.tar(tar::Archive::new(File::open(file_path)?))?,
        ArchiveFormat::TarGz => unpack.tar(tar::Archive::new(flate2::read::GzDecoder::new(File::open(
            file_path,
        )?)))?,
    };
    fs::remove_file(file_path)?;
    info!(entries, file = %file_path.display(), "Archive extracted and removed");
    Ok(Extraction::Extracted { format, entries })
}

struct Unpack<'a> {
    archive_path: &'a Path,
    target_dir: &'a Path,
    cancel: &'a CancellationToken,
}

impl Unpack<'_> {
    fn checkpoint(&self) -> Result<(), ArchiveError> {
        if self.cancel.is_cancelled() {
            warn!(file = %self.archive_path.display(), "Extraction cancelled");
            return Err(ArchiveError::Cancelled);
        }
        Ok(())
    }

    /// The archive is still being read, so an entry may not replace it.
    fn is_archive_itself(&self, dest: &Path, entry_name: &str) -> bool {
        if dest == self.archive_path {
            warn!(entry = %entry_name, "Skipping entry that would overwrite the archive being read");
            return true;
        }
        false
    }

    fn zip(&self) -> Result<usize, ArchiveError> {
        let mut archive = zip::ZipArchive::new(File::open(self.archive_path)?)?;
        let mut written = 0;
        for index in 0..archive.len() {
            self.checkpoint()?;
            let mut entry = archive.by_index(index)?;
            let relative = resolve_within(Path::new(entry.name()), entry.name())?;
            if relative.as_os_str().is_empty() {
                continue;
            }
            reject_linked_components(self.target_dir, &relative, entry.name())?;
            let dest = self.target_dir.join(&relative);
            if entry.is_dir() {
                fs::create_dir_all(&dest)?;
                continue;
            }
            if self.is_archive_itself(&dest, entry.name()) {
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&dest)?;
            io::copy(&mut entry, &mut out)?;
            #[cfg(unix)]
            if entry.unix_mode().is_some_and(|mode| mode & 0o111 != 0) {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))?;
            }
            debug!(entry = %relative.display(), "Extracted zip entry");
            written += 1;
        }
        Ok(written)
    }

    fn tar<R: io::Read>(&self, mut archive: tar::Archive<R>) -> Result<usize, ArchiveError> {
        let mut written = 0;
        for entry in archive.entries()? {
            self.checkpoint()?;
            let mut entry = entry?;
            let raw = entry.path()?.into_owned();
            let raw_display = raw.to_string_lossy().into_owned();
            let relative = resolve_within(&raw, &raw_display)?;
            let kind = entry.header().entry_type();
            if relative.as_os_str().is_empty() {
                continue;
            }
            reject_linked_components(self.target_dir, &relative, &raw_display)?;
            let dest = self.target_dir.join(&relative);
            if !kind.is_dir() && self.is_archive_itself(&dest, &raw_display) {
                continue;
            }

            if kind.is_symlink() || kind.is_hard_link() {
                let link = entry
                    .link_name()?
                    .map(|l| l.into_owned())
                    .unwrap_or_default();
                if link.is_absolute() {
                    return Err(ArchiveError::PathTraversal(raw_display));
                }
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                if kind.is_hard_link() {
                    // hard links name their source relative to the root, and the
                    // source must be reachable without following any link
                    let source = resolve_within(&link, &raw_display)?;
                    reject_linked_components(self.target_dir, &source, &raw_display)?;
                    fs::hard_link(self.target_dir.join(&source), &dest)?;
                } else {
                    let base = relative.parent().map(Path::to_path_buf).unwrap_or_default();
                    check_symlink_target(&base, &link, &raw_display)?;
                    entry.unpack(&dest)?;
                }
                debug!(entry = %relative.display(), link = %link.display(), "Extracted tar link");
                written += 1;
                continue;
            }

            if !(kind.is_file() || kind.is_dir()) {
                debug!(entry = %raw_display, ?kind, "Skipping unsupported tar entry");
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&dest)?;
            debug!(entry = %relative.display(), "Extracted tar entry");
            if kind.is_file() {
                written += 1;
            }
        }
        Ok(written)
    }
}

/// Normalize an entry path relative to the extraction root, failing if it is
/// absolute or climbs above the root.
fn resolve_within(path: &Path, display: &str) -> Result<PathBuf, ArchiveError> {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(ArchiveError::PathTraversal(display.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::PathTraversal(display.to_string()));
            }
        }
    }
    Ok(resolved)
}

/// A symlink in `base` may point at `link` only if every `..` comes before
/// the first named component and the result stays under the root.
///
/// A `..` after a named component is resolved by the OS against wherever
/// that component really points, which may be another symlink, so the
/// lexical result cannot be trusted. With `..` confined to the front, every
/// link resolves inside the root as long as the links it passes through do.
fn check_symlink_target(base: &Path, link: &Path, display: &str) -> Result<(), ArchiveError> {
    let mut named = false;
    for component in link.components() {
        match component {
            Component::Normal(_) => named = true,
            Component::ParentDir if named => {
                return Err(ArchiveError::PathTraversal(display.to_string()));
            }
            _ => {}
        }
    }
    resolve_within(&base.join(link), display).map(|_| ())
}

/// Fail if any existing component of `relative` under `target_dir`, the last
/// one included, is a symlink created by an earlier entry; writing through
/// it, or linking to it, could leave the root.
fn reject_linked_components(target_dir: &Path, relative: &Path, display: &str) -> Result<(), ArchiveError> {
    let mut current = target_dir.to_path_buf();
    for part in relative.components() {
        current.push(part);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ArchiveError::PathTraversal(display.to_string()));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats_by_suffix() {
        assert_eq!(ArchiveFormat::detect("payload.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect("PAYLOAD.ZIP"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect("repo.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::detect("repo.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("repo.tgz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("main.rs"), None);
        assert_eq!(ArchiveFormat::detect("zip"), None);
        assert_eq!(ArchiveFormat::detect("notes.gz"), None);
    }

    #[test]
    fn resolve_within_normalizes_inner_parents() {
        assert_eq!(
            resolve_within(Path::new("a/./b/../c.txt"), "").unwrap(),
            PathBuf::from("a/c.txt")
        );
        assert_eq!(resolve_within(Path::new("./"), "").unwrap(), PathBuf::new());
    }

    #[test]
    fn resolve_within_rejects_escapes() {
        for raw in ["../evil.txt", "a/../../evil.txt", "/etc/passwd"] {
            assert!(
                matches!(
                    resolve_within(Path::new(raw), raw),
                    Err(ArchiveError::PathTraversal(_))
                ),
                "{raw}"
            );
        }
    }

    #[test]
    fn symlink_targets_may_only_climb_first() {
        let base = Path::new("a/b");
        assert!(check_symlink_target(base, Path::new("../.."), "up").is_ok());
        assert!(check_symlink_target(base, Path::new("../c/d.txt"), "ok").is_ok());
        assert!(matches!(
            check_symlink_target(Path::new(""), Path::new("a/b/up/.."), "c"),
            Err(ArchiveError::PathTraversal(_))
        ));
        assert!(matches!(
            check_symlink_target(base, Path::new("../../.."), "out"),
            Err(ArchiveError::PathTraversal(_))
        ));
    }
}
