use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::Builder;

use crate::error::{AuthError, AuthResult};

pub const PRIVATE_FILE_MODE: u32 = 0o600;
const MAX_SYMLINK_DEPTH: usize = 16;

/// Writes `data` so readers see either the old file or the complete new one.
///
/// A symlinked `path` is followed and its final target replaced, leaving the
/// link itself in place for the tool that owns it.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> AuthResult<PathBuf> {
    write_file_atomic_with_mode(path, data, PRIVATE_FILE_MODE)
}

pub fn write_file_atomic_with_mode(path: &Path, data: &[u8], mode: u32) -> AuthResult<PathBuf> {
    let target = resolve_write_target(path)?;
    let parent = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| AuthError::io(&target, "resolve parent of", "no parent directory"))?;
    fs::create_dir_all(parent).map_err(|err| AuthError::io(parent, "create directory", err))?;

    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "authsync".to_string());
    let mut temp_file = Builder::new()
        .prefix(&format!("{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|err| AuthError::io(&target, "create temp file for", err))?;
    temp_file
        .write_all(data)
        .and_then(|_| temp_file.as_file().sync_all())
        .map_err(|err| AuthError::io(&target, "write temp file for", err))?;
    temp_file
        .as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|err| AuthError::io(&target, "chmod temp file for", err))?;

    temp_file
        .persist(&target)
        .map_err(|err| AuthError::io(&target, "rename temp file onto", err.error))?;
    Ok(target)
}

/// Follows symlinks at `path` to the file that should actually be replaced.
/// Dangling links resolve to the path they point at.
pub fn resolve_write_target(path: &Path) -> AuthResult<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_SYMLINK_DEPTH {
        let metadata = match fs::symlink_metadata(&current) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(current),
            Err(err) => return Err(AuthError::io(&current, "stat", err)),
        };
        if !metadata.file_type().is_symlink() {
            return Ok(current);
        }
        let link = fs::read_link(&current).map_err(|err| AuthError::io(&current, "read link", err))?;
        current = if link.is_absolute() {
            link
        } else {
            current
                .parent()
                .map(|parent| parent.join(&link))
                .unwrap_or(link)
        };
    }
    Err(AuthError::io(path, "resolve symlink", "too many levels of symbolic links"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn write_creates_parents_with_private_mode() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("a/b/auth.json");
        write_file_atomic(&path, b"{}\n").expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"{}\n");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn write_replaces_existing_content_and_leaves_no_temp_files() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("auth.json");
        fs::write(&path, b"old content that is longer").expect("seed");
        write_file_atomic(&path, b"new").expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"new");
        let leftovers = fs::read_dir(temp.path())
            .expect("read dir")
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn write_through_symlink_updates_target_and_keeps_link() {
        let temp = TempDir::new().expect("temp dir");
        let real = temp.path().join("real/auth.json");
        fs::create_dir_all(real.parent().expect("parent")).expect("mkdir");
        fs::write(&real, b"before").expect("seed");
        let link = temp.path().join("link.json");
        symlink(&real, &link).expect("symlink");

        let written = write_file_atomic(&link, b"after").expect("write");
        assert_eq!(written, real);
        assert!(fs::symlink_metadata(&link)
            .expect("link metadata")
            .file_type()
            .is_symlink());
        assert_eq!(fs::read(&real).expect("read real"), b"after");
        assert_eq!(fs::read(&link).expect("read link"), b"after");
    }

    #[test]
    fn relative_symlink_resolves_against_link_directory() {
        let temp = TempDir::new().expect("temp dir");
        fs::create_dir_all(temp.path().join("dir")).expect("mkdir");
        fs::write(temp.path().join("dir/target.json"), b"x").expect("seed");
        let link = temp.path().join("dir/link.json");
        symlink("target.json", &link).expect("symlink");
        let resolved = resolve_write_target(&link).expect("resolve");
        assert_eq!(resolved, temp.path().join("dir/target.json"));
    }

    #[test]
    fn failed_write_leaves_previous_content() {
        let temp = TempDir::new().expect("temp dir");
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, b"file").expect("seed");
        let err = write_file_atomic(&blocker.join("auth.json"), b"data").expect_err("should fail");
        assert!(matches!(err, AuthError::Io { .. }));
        assert_eq!(fs::read(&blocker).expect("read"), b"file");
    }
}
