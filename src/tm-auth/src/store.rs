//! File-backed credential storage.
//!
//! Writes go through a temp file in the target directory followed by a
//! rename, so readers never observe a half-written credential file. A file
//! that fails to parse is renamed aside (`<file>.corrupt-<unixtime>`) and is
//! never retried.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rand::Rng;
use tokio::io::AsyncWriteExt;

use crate::constants::CORRUPT_SUFFIX;
use crate::error::{AuthError, Result};
use crate::types::Credential;
use crate::utils::{set_dir_permissions, set_file_permissions};

/// Upper bound on same-second quarantine names before giving up.
const MAX_QUARANTINE_SEQ: u32 = 100;

/// Persists a single [`Credential`] at a fixed path.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the credential file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored credential.
    ///
    /// Returns `None` when the file is missing, unreadable, corrupt, or holds
    /// an expired standard token and `allow_expired` is false.
    pub async fn get(&self, allow_expired: bool) -> Option<Credential> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read credential file, treating as signed out"
                );
                return None;
            }
        };

        let credential: Credential = match serde_json::from_str(&content) {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Credential file is corrupt"
                );
                self.quarantine().await;
                return None;
            }
        };

        if !allow_expired && credential.is_expired() {
            tracing::debug!(
                expires_at = ?credential.expires_at,
                "Stored credential is expired"
            );
            return None;
        }

        Some(credential)
    }

    /// Persist `credential`, replacing any previous file atomically.
    ///
    /// Stamps `saved_at`. Returns the record as written.
    pub async fn save(&self, credential: &Credential) -> Result<Credential> {
        let staged = self.stage(credential).await?;
        staged.commit().await
    }

    /// Delete the credential file. A missing file is not an error.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed credential file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::SaveFailed(format!(
                "failed to delete {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Whether a non-expired credential is stored.
    pub async fn is_valid(&self) -> bool {
        self.get(false).await.is_some()
    }

    /// Remove quarantined files older than `max_age`.
    ///
    /// Best effort: failures are logged. Returns how many files were removed.
    pub async fn cleanup_quarantined(&self, max_age: Duration) -> usize {
        let Some(dir) = self.path.parent() else {
            return 0;
        };
        let prefix = format!("{}{CORRUPT_SUFFIX}", self.file_name());

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = %dir.display(), error = %e, "Failed to scan for quarantined credentials");
                }
                return 0;
            }
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut removed = 0;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read directory entry");
                    break;
                }
            };

            let name = entry.file_name();
            let Some(suffix) = name.to_str().and_then(|n| n.strip_prefix(&prefix)) else {
                continue;
            };

            let secs = suffix.split_once('-').map_or(suffix, |(secs, _)| secs);
            let quarantined_at = match secs.parse::<u64>() {
                Ok(secs) => Some(secs),
                Err(_) => modified_secs(&entry).await,
            };
            let Some(quarantined_at) = quarantined_at else {
                continue;
            };

            if now.saturating_sub(quarantined_at) <= max_age.as_secs() {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    tracing::debug!(path = %entry.path().display(), "Removed quarantined credential file");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Failed to remove quarantined credential file");
                }
            }
        }

        removed
    }

    /// Quarantine path for a file renamed aside at `unix_secs`.
    pub fn quarantine_path(&self, unix_secs: u64) -> PathBuf {
        let name = format!("{}{CORRUPT_SUFFIX}{unix_secs}", self.file_name());
        self.path.with_file_name(name)
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "auth.json".to_string())
    }

    /// Rename the file aside without replacing an earlier quarantined copy.
    ///
    /// Names collide when two corrupt reads land in the same second; later
    /// ones get a `-<n>` sequence suffix.
    async fn quarantine(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        for seq in 0..MAX_QUARANTINE_SEQ {
            let target = self.quarantine_candidate(now, seq);

            // hard_link refuses to overwrite, unlike rename.
            match tokio::fs::hard_link(&self.path, &target).await {
                Ok(()) => {
                    if let Err(e) = tokio::fs::remove_file(&self.path).await {
                        tracing::warn!(
                            path = %self.path.display(),
                            error = %e,
                            "Failed to remove corrupt credential file after quarantine"
                        );
                    }
                    tracing::warn!(
                        quarantined = %target.display(),
                        "Moved corrupt credential file aside"
                    );
                    return;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(link_err) => {
                    // Filesystem without hard links; target is known to be free.
                    match tokio::fs::rename(&self.path, &target).await {
                        Ok(()) => tracing::warn!(
                            quarantined = %target.display(),
                            "Moved corrupt credential file aside"
                        ),
                        Err(e) => tracing::warn!(
                            path = %self.path.display(),
                            error = %e,
                            link_error = %link_err,
                            "Failed to quarantine corrupt credential file"
                        ),
                    }
                    return;
                }
            }
        }

        tracing::warn!(
            path = %self.path.display(),
            "Too many quarantined credential files for this second, leaving file in place"
        );
    }

    fn quarantine_candidate(&self, unix_secs: u64, seq: u32) -> PathBuf {
        let base = self.quarantine_path(unix_secs);
        if seq == 0 {
            return base;
        }
        let mut name = base.into_os_string();
        name.push(format!("-{seq}"));
        PathBuf::from(name)
    }

    /// Write `credential` to a temp file next to the target.
    ///
    /// The target is untouched until [`StagedWrite::commit`].
    async fn stage(&self, credential: &Credential) -> Result<StagedWrite> {
        if credential.access_token.trim().is_empty() {
            return Err(AuthError::SaveFailed("access token is empty".to_string()));
        }
        if credential.user_id.trim().is_empty() {
            return Err(AuthError::SaveFailed("user id is empty".to_string()));
        }

        let dir = self.path.parent().ok_or_else(|| {
            AuthError::SaveFailed(format!(
                "credential path has no parent directory: {}",
                self.path.display()
            ))
        })?;

        if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| save_failed("create directory", dir, e))?;
        }
        // Pre-existing directories may have been created with a wider mode.
        set_dir_permissions(dir).map_err(|e| save_failed("restrict directory", dir, e))?;

        let mut stamped = credential.clone();
        stamped.saved_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(&stamped)
            .map_err(|e| AuthError::SaveFailed(format!("failed to serialize credential: {e}")))?;

        let suffix: u32 = rand::rng().random();
        let temp_path = dir.join(format!(
            ".{}.tmp.{}.{suffix:08x}",
            self.file_name(),
            std::process::id()
        ));

        let staged = StagedWrite {
            temp_path,
            target: self.path.clone(),
            credential: stamped,
            committed: false,
        };

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }

        let mut file = options
            .open(&staged.temp_path)
            .await
            .map_err(|e| save_failed("create temp file", &staged.temp_path, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| save_failed("write temp file", &staged.temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| save_failed("sync temp file", &staged.temp_path, e))?;
        drop(file);

        set_file_permissions(&staged.temp_path)
            .map_err(|e| save_failed("restrict temp file", &staged.temp_path, e))?;

        Ok(staged)
    }
}

/// A fully written temp file waiting to be renamed onto the target.
///
/// Dropping it without committing removes the temp file and leaves the
/// target as it was.
struct StagedWrite {
    temp_path: PathBuf,
    target: PathBuf,
    credential: Credential,
    committed: bool,
}

impl StagedWrite {
    async fn commit(mut self) -> Result<Credential> {
        tokio::fs::rename(&self.temp_path, &self.target)
            .await
            .map_err(|e| save_failed("replace credential file", &self.target, e))?;
        self.committed = true;

        #[cfg(unix)]
        {
            if let Some(parent) = self.target.parent() {
                if let Ok(dir) = std::fs::File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
        }

        tracing::debug!(path = %self.target.display(), "Saved credential file");
        Ok(self.credential.clone())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

async fn modified_secs(entry: &tokio::fs::DirEntry) -> Option<u64> {
    let modified = entry.metadata().await.ok()?.modified().ok()?;
    modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

fn save_failed(action: &str, path: &Path, err: std::io::Error) -> AuthError {
    AuthError::SaveFailed(format!("failed to {action} {}: {err}", path.display()))
}
