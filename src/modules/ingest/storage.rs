//
// Copyright (c) 2025 rustmailer.com (https://rustmailer.com)
//
// This file is part of the Groundwork Mail Sync Project
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::raise_error;

const MAX_NAME_LEN: usize = 120;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    /// Absolute path on disk
    pub path: String,
    /// URL the file is served under, relative to the public base URL
    pub url: String,
    pub size: u64,
}

/// Writes attachment bytes under `<root>/<yyyy>/<mm>/`.
#[derive(Clone, Debug)]
pub struct AttachmentStore {
    root: PathBuf,
    url_prefix: String,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Persists `bytes` under a collision-resistant name derived from
    /// `original_filename`. Never overwrites an existing file.
    pub async fn store(&self, bytes: &[u8], original_filename: &str) -> GroundworkResult<StoredFile> {
        let now = Utc::now();
        let relative_dir = format!("{:04}/{:02}", now.year(), now.month());
        let dir = self.root.join(&relative_dir);
        fs::create_dir_all(&dir).await.map_err(|e| {
            raise_error!(
                format!("Failed to create attachment directory {:?}: {}", dir, e),
                ErrorCode::StorageFailure
            )
        })?;

        let name = format!(
            "{}-{}-{}",
            now.timestamp_millis(),
            hex::encode(rand::random::<[u8; 4]>()),
            sanitize_filename(original_filename)
        );
        let path = dir.join(&name);
        debug!(path = %path.display(), size = bytes.len(), "Storing attachment");

        if let Err(e) = write_new(&path, bytes).await {
            warn!(path = %path.display(), error = %e, "Attachment write failed");
            let _ = fs::remove_file(&path).await;
            return Err(raise_error!(
                format!("Failed to write attachment {:?}: {}", path, e),
                ErrorCode::StorageFailure
            ));
        }

        Ok(StoredFile {
            path: path.display().to_string(),
            url: format!("{}/{}/{}", self.url_prefix, relative_dir, name),
            size: bytes.len() as u64,
        })
    }
}

async fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await?;
    }
    Ok(())
}

/// Reduces an untrusted filename to a single safe path component.
pub fn sanitize_filename(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let mut cleaned = String::with_capacity(base.len());
    let mut last_was_sep = false;
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            cleaned.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            cleaned.push('_');
            last_was_sep = true;
        }
    }
    let cleaned = cleaned.trim_start_matches(['.', '_']).trim_end_matches('_');
    let cleaned: String = if cleaned.len() > MAX_NAME_LEN {
        // Keep the extension when truncating.
        match cleaned.rfind('.') {
            Some(dot) if cleaned.len() - dot <= 10 => {
                let ext = &cleaned[dot..];
                format!("{}{}", &cleaned[..MAX_NAME_LEN - ext.len()], ext)
            }
            _ => cleaned[..MAX_NAME_LEN].to_string(),
        }
    } else {
        cleaned.to_string()
    };
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "attachment".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_paths_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\pm\\RFI #12.pdf"), "RFI_12.pdf");
        assert_eq!(sanitize_filename("..."), "attachment");
        assert_eq!(sanitize_filename(""), "attachment");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("plan (rev 2).pdf"), "plan_rev_2_.pdf");
        let long = format!("{}.pdf", "a".repeat(300));
        let cleaned = sanitize_filename(&long);
        assert_eq!(cleaned.len(), MAX_NAME_LEN);
        assert!(cleaned.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn stores_under_year_month_without_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path(), "/files/attachments");
        let a = store.store(b"first", "plan.pdf").await.unwrap();
        let b = store.store(b"second", "plan.pdf").await.unwrap();
        assert_ne!(a.path, b.path);
        assert_eq!(a.size, 5);
        assert!(a.path.starts_with(&dir.path().display().to_string()));
        assert!(a.url.starts_with("/files/attachments/"));
        assert!(a.path.ends_with("-plan.pdf"));
        assert_eq!(tokio::fs::read(&b.path).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn write_failure_is_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"file, not a directory").await.unwrap();
        let store = AttachmentStore::new(&blocker, "/files");
        let err = store.store(b"data", "a.pdf").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorageFailure);
    }
}
