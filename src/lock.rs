use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::atomic::PRIVATE_FILE_MODE;
use crate::error::{AuthError, AuthResult};
use crate::json::short_hash_hex;
use crate::log::SyncLogWriter;

pub fn refresh_lock_file_name(key: &str) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("refresh-{}.lock", &digest[..24])
}

/// Runs `operation` while holding an exclusive lock keyed by `refresh_token`,
/// so two invocations never spend the same refresh token at once.
pub fn with_refresh_lock<T, F>(
    lock_dir: &Path,
    refresh_token: &str,
    log: &SyncLogWriter,
    operation: F,
) -> AuthResult<T>
where
    F: FnOnce() -> AuthResult<T>,
{
    fs::create_dir_all(lock_dir).map_err(|err| AuthError::io(lock_dir, "create lock dir", err))?;
    let refresh_fp = short_hash_hex(refresh_token.as_bytes());
    let lock_path: PathBuf = lock_dir.join(refresh_lock_file_name(&refresh_fp));

    log.write(
        "refresh_lock_wait",
        &[
            ("refresh_fp", Some(refresh_fp.clone())),
            ("lock_file", Some(lock_path.display().to_string())),
        ],
    );
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| AuthError::io(&lock_path, "open lock file", err))?;
    let _ = file.set_permissions(fs::Permissions::from_mode(PRIVATE_FILE_MODE));
    file.lock_exclusive()
        .map_err(|err| AuthError::io(&lock_path, "acquire lock", err))?;
    log.write("refresh_lock_acquired", &[("refresh_fp", Some(refresh_fp.clone()))]);

    let result = operation();
    let result_label = if result.is_ok() { "success" } else { "error" };
    let _ = file.unlock();
    log.write(
        "refresh_lock_released",
        &[
            ("refresh_fp", Some(refresh_fp)),
            ("result", Some(result_label.to_string())),
        ],
    );
    result
}
