// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Filesystem primitives for the file lock and the NDJSON ledger.
//!
//! Exclusive creation is the only cross-process guarantee here. Everything
//! else (reads, conditional removes) is best-effort and relies on the lock
//! record being signed and time-bounded.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::Path;

/// Create `path` with `data` unless it already exists.
///
/// Returns `Ok(false)` when another writer got there first. The content is
/// written to a private temp file and hard-linked into place, so a reader
/// never observes a half-written file.
pub fn write_new(path: &Path, data: &[u8]) -> io::Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }

    let linked = match fs::hard_link(&temp_path, path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        // Some filesystems refuse hard links; exclusive create still holds.
        Err(e) if e.kind() == ErrorKind::Unsupported => create_exclusive(path, data),
        Err(e) => Err(e),
    };

    if let Err(e) = fs::remove_file(&temp_path) {
        tracing::warn!(path = %temp_path.display(), error = %e, "Failed to remove temp file");
    }
    linked
}

fn create_exclusive(path: &Path, data: &[u8]) -> io::Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(data)?;
            file.sync_all()?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read a whole file, `None` when it does not exist.
pub fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove a file. Returns `false` when it was already gone.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append one line to `path`, creating it if needed.
///
/// The line and its terminator go out in a single write so concurrent
/// appenders in `O_APPEND` mode do not interleave within a record.
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&buf)?;
    file.sync_data()
}

/// Write-read-delete probe of a directory.
pub fn probe_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let test_file = dir.join(format!(".health_check_{}", uuid::Uuid::new_v4().simple()));
    let test_data = b"health_check_data";

    fs::write(&test_file, test_data)?;
    let read_data = fs::read(&test_file)?;
    fs::remove_file(&test_file)?;

    if read_data != test_data {
        return Err(io::Error::other("health check data mismatch"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_new_refuses_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("locks/a.lock");

        assert!(write_new(&path, b"first").unwrap());
        assert!(!write_new(&path, b"second").unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"first");

        // No temp files left behind.
        let leftovers = fs::read_dir(temp.path().join("locks")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn write_new_has_single_winner_under_contention() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("contended.lock");

        let wins = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let path = &path;
                    scope.spawn(move || write_new(path, format!("writer-{i}").as_bytes()).unwrap())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });
        assert_eq!(wins, 1);
    }

    #[test]
    fn read_and_remove_missing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing");
        assert!(read_optional(&path).unwrap().is_none());
        assert!(!remove_if_exists(&path).unwrap());
    }

    #[test]
    fn append_line_accumulates_records() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/log.ndjson");
        append_line(&path, "{\"a\":1}").unwrap();
        append_line(&path, "{\"a\":2}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn probe_dir_leaves_no_trace() {
        let temp = TempDir::new().unwrap();
        probe_dir(temp.path()).unwrap();
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
