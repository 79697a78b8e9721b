//! Single-file transfer.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use filetime::FileTime;
use tempfile::NamedTempFile;

use nebula_core::{EngineConfig, OpsError, OpsResult};
use nebula_scan::is_counted;

/// How a single file is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Size of the intermediate buffer.
    pub buffer_size: usize,
    /// Write to a temporary sibling and rename into place on success.
    pub atomic: bool,
    /// Copy modification time and permission bits.
    pub preserve_metadata: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for TransferOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            atomic: config.atomic_writes,
            preserve_metadata: config.preserve_metadata,
        }
    }
}

/// Copy one file from `source` to `destination`.
///
/// Parent directories of the destination are created as needed and an
/// existing destination file is replaced. Returns the number of bytes
/// written. Symlinks are recreated rather than followed and count as zero
/// bytes. Anything else that is not a regular file is rejected before it is
/// opened, since opening a pipe can block indefinitely.
pub fn transfer_file(
    source: &Path,
    destination: &Path,
    options: &TransferOptions,
) -> OpsResult<u64> {
    let metadata = fs::symlink_metadata(source).map_err(|e| OpsError::io(source, e))?;
    if !is_counted(metadata.file_type()) {
        return Err(OpsError::UnsupportedFileType {
            path: source.to_path_buf(),
        });
    }

    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| OpsError::io(parent, e))?;

    #[cfg(unix)]
    if metadata.file_type().is_symlink() {
        copy_symlink(source, destination)?;
        return Ok(0);
    }

    let mut reader = File::open(source).map_err(|e| OpsError::io(source, e))?;

    if options.atomic {
        let mut temp = NamedTempFile::new_in(parent).map_err(|e| OpsError::io(parent, e))?;
        let written = stream(
            &mut reader,
            temp.as_file_mut(),
            options.buffer_size,
            source,
            destination,
        )?;
        temp.as_file()
            .sync_all()
            .map_err(|e| OpsError::io(destination, e))?;
        if options.preserve_metadata {
            apply_metadata(temp.path(), &metadata, destination)?;
        }
        temp.persist(destination)
            .map_err(|e| OpsError::io(destination, e.error))?;
        Ok(written)
    } else {
        let mut writer = File::create(destination).map_err(|e| OpsError::io(destination, e))?;
        let written = stream(&mut reader, &mut writer, options.buffer_size, source, destination)?;
        writer
            .sync_all()
            .map_err(|e| OpsError::io(destination, e))?;
        drop(writer);
        if options.preserve_metadata {
            apply_metadata(destination, &metadata, destination)?;
        }
        Ok(written)
    }
}

/// Pump bytes from `reader` to `writer` through a bounded buffer.
fn stream(
    reader: &mut impl Read,
    writer: &mut impl Write,
    buffer_size: usize,
    source: &Path,
    destination: &Path,
) -> OpsResult<u64> {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut written = 0u64;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(OpsError::io(source, e)),
        };
        writer
            .write_all(&buffer[..read])
            .map_err(|e| OpsError::io(destination, e))?;
        written += read as u64;
    }

    writer.flush().map_err(|e| OpsError::io(destination, e))?;
    Ok(written)
}

/// Replicate modification time and permission bits onto `path`.
///
/// Permissions go last so a read-only source does not block the timestamp
/// update.
fn apply_metadata(path: &Path, metadata: &fs::Metadata, reported: &Path) -> OpsResult<()> {
    filetime::set_file_mtime(path, FileTime::from_last_modification_time(metadata))
        .map_err(|e| OpsError::io(reported, e))?;
    fs::set_permissions(path, metadata.permissions()).map_err(|e| OpsError::io(reported, e))?;
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, destination: &Path) -> OpsResult<()> {
    let target = fs::read_link(source).map_err(|e| OpsError::io(source, e))?;

    match fs::symlink_metadata(destination) {
        Ok(existing) if existing.is_dir() => {
            return Err(OpsError::io(
                destination,
                std::io::Error::new(ErrorKind::AlreadyExists, "a directory is in the way"),
            ));
        }
        Ok(_) => fs::remove_file(destination).map_err(|e| OpsError::io(destination, e))?,
        Err(_) => {}
    }

    std::os::unix::fs::symlink(&target, destination).map_err(|e| OpsError::io(destination, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_transfer_creates_parents() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("in.txt");
        fs::write(&source, b"hello world").unwrap();

        let dest = temp.path().join("a/b/c/out.txt");
        let written = transfer_file(&source, &dest, &TransferOptions::default()).unwrap();

        assert_eq!(written, 11);
        assert_eq!(fs::read(&dest).unwrap(), b"hello world");
    }

    #[test]
    fn test_transfer_larger_than_buffer() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("big.bin");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &data).unwrap();

        let options = TransferOptions {
            buffer_size: 1000,
            ..TransferOptions::default()
        };
        let dest = temp.path().join("copy.bin");
        assert_eq!(transfer_file(&source, &dest, &options).unwrap(), 100_000);
        assert_eq!(fs::read(&dest).unwrap(), data);
    }

    #[test]
    fn test_transfer_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("new.txt");
        let dest = temp.path().join("old.txt");
        fs::write(&source, b"new").unwrap();
        fs::write(&dest, b"old contents that are longer").unwrap();

        for atomic in [true, false] {
            let options = TransferOptions {
                atomic,
                ..TransferOptions::default()
            };
            transfer_file(&source, &dest, &options).unwrap();
            assert_eq!(fs::read(&dest).unwrap(), b"new");
        }
    }

    #[test]
    fn test_transfer_preserves_mtime() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("dated.txt");
        fs::write(&source, b"x").unwrap();
        let past = FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&source, past).unwrap();

        let dest = temp.path().join("copy.txt");
        transfer_file(&source, &dest, &TransferOptions::default()).unwrap();

        let copied = FileTime::from_last_modification_time(&fs::metadata(&dest).unwrap());
        assert_eq!(copied.unix_seconds(), past.unix_seconds());
    }

    #[test]
    fn test_missing_source_leaves_no_destination() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out.txt");

        let err = transfer_file(&temp.path().join("nope"), &dest, &TransferOptions::default())
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!dest.exists());
        // No temporary leftovers either
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_transfer_preserves_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let source = temp.path().join("tool");
        fs::write(&source, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o750)).unwrap();

        let dest = temp.path().join("tool-copy");
        transfer_file(&source, &dest, &TransferOptions::default()).unwrap();

        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
    }

    #[cfg(unix)]
    #[test]
    fn test_transfer_recreates_symlink() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target.txt");
        fs::write(&target, b"data").unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let dest = temp.path().join("out/link");
        assert_eq!(transfer_file(&link, &dest, &TransferOptions::default()).unwrap(), 0);
        assert!(fs::symlink_metadata(&dest).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&dest).unwrap(), target);
    }

    #[cfg(unix)]
    #[test]
    fn test_transfer_rejects_fifo() {
        let temp = TempDir::new().unwrap();
        let pipe = temp.path().join("pipe");
        let created = std::process::Command::new("mkfifo")
            .arg(&pipe)
            .status()
            .is_ok_and(|status| status.success());
        if !created {
            return;
        }

        let dest = temp.path().join("out/pipe");
        let err = transfer_file(&pipe, &dest, &TransferOptions::default()).unwrap_err();
        assert!(matches!(err, OpsError::UnsupportedFileType { .. }));
        assert!(!dest.exists());
    }
}
