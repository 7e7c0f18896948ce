// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::{Path, PathBuf};

use jiff::Timestamp;
use sha1::{Digest, Sha1};
use snafu::ResultExt;
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, warn};

use crate::{
    error::{DownloadError, ManifestSnafu},
    probe::ResourceInfo,
    types::{Manifest, ManifestEntry, SegmentStatus},
};

const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = ".lock";

/// Directory that holds the resumable segments of `url`:
/// `<root>/<prefix><hex(sha1(url))>`.
#[must_use]
pub fn resume_dir(root: &Path, prefix: &str, url: &str) -> PathBuf {
    root.join(format!("{prefix}{}", hash_url(url)))
}

enum Location {
    /// Deterministic per-URL directory, kept across runs
    Resume(PathBuf),
    /// Scratch directory of a single run
    Ephemeral(TempDir),
}

/// Owns the directory a download writes its segment files into
pub(crate) struct Workspace {
    location: Location,
}

impl Workspace {
    /// Open (creating if needed) the resume directory of `url`.
    pub async fn resume(root: &Path, prefix: &str, url: &str) -> Result<Self, DownloadError> {
        let dir = resume_dir(root, prefix, url);
        fs::create_dir_all(&dir).await?;
        debug!(url, dir = %dir.display(), "using resume directory");
        Ok(Self {
            location: Location::Resume(dir),
        })
    }

    /// Create a fresh scratch directory under `root`.
    pub fn ephemeral(root: &Path, prefix: &str) -> Result<Self, DownloadError> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(root)?;
        debug!(dir = %dir.path().display(), "using scratch directory");
        Ok(Self {
            location: Location::Ephemeral(dir),
        })
    }

    pub fn path(&self) -> &Path {
        match self.location {
            Location::Resume(ref dir) => dir,
            Location::Ephemeral(ref dir) => dir.path(),
        }
    }

    pub const fn is_resumable(&self) -> bool { matches!(self.location, Location::Resume(_)) }

    pub fn segment_path(&self, index: usize) -> PathBuf { self.path().join(index.to_string()) }

    pub fn lock_path(&self) -> PathBuf { self.path().join(LOCK_FILE) }

    fn manifest_path(&self) -> PathBuf { self.path().join(MANIFEST_FILE) }

    /// Load the manifest. A missing manifest is normal; an unreadable one is
    /// reported and ignored so the download can fall back to file sizes.
    pub async fn load_manifest(&self) -> Option<Manifest> {
        let path = self.manifest_path();
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read manifest");
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring corrupted manifest");
                None
            }
        }
    }

    /// Write the manifest through a temporary file so a crash never leaves a
    /// half-written one behind.
    pub async fn save_manifest(&self, manifest: &Manifest) -> Result<(), DownloadError> {
        let path = self.manifest_path();
        let raw = serde_json::to_vec_pretty(manifest).context(ManifestSnafu { path: &path })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Mark entries whose segment file already covers the whole range as
    /// complete. Only used when no manifest exists, so file sizes are the
    /// sole evidence of earlier progress.
    pub async fn mark_complete_files(&self, manifest: &mut Manifest) -> Result<(), DownloadError> {
        for entry in &mut manifest.segments {
            let len = entry.end - entry.start + 1;
            match fs::metadata(self.segment_path(entry.index)).await {
                Ok(meta) if meta.len() >= len => entry.status = SegmentStatus::Complete,
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Remove every segment file and the manifest, keeping the directory and
    /// its lock file.
    pub async fn discard_segments(&self) -> Result<(), DownloadError> {
        let mut entries = fs::read_dir(self.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == MANIFEST_FILE || name.parse::<usize>().is_ok() {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    /// Release the directory. Scratch directories are deleted, resume
    /// directories are left in place for a later run.
    pub fn close(self) -> Result<(), DownloadError> {
        match self.location {
            Location::Resume(_) => Ok(()),
            Location::Ephemeral(dir) => dir.close().map_err(Into::into),
        }
    }
}

/// Build a fresh manifest for `ranges`, all segments pending.
pub(crate) fn new_manifest(url: &str, info: &ResourceInfo, ranges: &[(u64, u64)]) -> Manifest {
    let now = Timestamp::now().as_second();
    Manifest {
        url:            url.to_string(),
        content_length: info.size,
        modified:       info.modified.map(Timestamp::as_second),
        segments:       ranges
            .iter()
            .enumerate()
            .map(|(index, &(start, end))| ManifestEntry {
                index,
                start,
                end,
                status: SegmentStatus::Pending,
            })
            .collect(),
        created_at:     now,
        updated_at:     now,
    }
}

/// Hash a URL into the resume directory suffix
fn hash_url(url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(size: u64) -> ResourceInfo {
        ResourceInfo {
            size,
            supports_range: true,
            modified: None,
        }
    }

    #[test]
    fn test_hash_url() {
        let hash1 = hash_url("https://example.com/file.zip");
        let hash2 = hash_url("https://example.com/file.zip");
        let hash3 = hash_url("https://example.com/other.zip");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 40); // SHA1 hex string length
        assert_eq!(hash_url("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_resume_dir_layout() {
        let dir = resume_dir(Path::new("/tmp"), "rf-", "abc");
        assert_eq!(dir, Path::new("/tmp/rf-a9993e364706816aba3e25717850c26c9cd0d89d"));
    }

    #[tokio::test]
    async fn test_manifest_round_trip_and_discard() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::resume(root.path(), "rf-", "http://host/a").await.unwrap();
        assert!(ws.is_resumable());
        assert!(ws.load_manifest().await.is_none());

        let manifest = new_manifest("http://host/a", &info(100), &[(0, 49), (50, 99)]);
        ws.save_manifest(&manifest).await.unwrap();
        assert_eq!(ws.load_manifest().await, Some(manifest));

        fs::write(ws.segment_path(0), b"partial").await.unwrap();
        fs::write(ws.lock_path(), b"").await.unwrap();
        ws.discard_segments().await.unwrap();

        assert!(ws.load_manifest().await.is_none());
        assert!(!ws.segment_path(0).exists());
        assert!(ws.lock_path().exists());
    }

    #[tokio::test]
    async fn test_mark_complete_files_uses_file_sizes() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::resume(root.path(), "rf-", "http://host/f").await.unwrap();
        fs::write(ws.segment_path(0), vec![0u8; 50]).await.unwrap();
        fs::write(ws.segment_path(1), vec![0u8; 10]).await.unwrap();

        let mut manifest =
            new_manifest("http://host/f", &info(150), &[(0, 49), (50, 99), (100, 149)]);
        ws.mark_complete_files(&mut manifest).await.unwrap();

        let statuses: Vec<SegmentStatus> = manifest.segments.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![
            SegmentStatus::Complete,
            SegmentStatus::Pending,
            SegmentStatus::Pending,
        ]);
    }

    #[tokio::test]
    async fn test_corrupted_manifest_is_ignored() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::resume(root.path(), "rf-", "http://host/b").await.unwrap();
        fs::write(ws.path().join(MANIFEST_FILE), b"{not json").await.unwrap();
        assert!(ws.load_manifest().await.is_none());
    }

    #[tokio::test]
    async fn test_close_keeps_resume_dir_and_removes_scratch_dir() {
        let root = TempDir::new().unwrap();

        let resume = Workspace::resume(root.path(), "rf-", "http://host/c").await.unwrap();
        let resume_path = resume.path().to_path_buf();
        resume.close().unwrap();
        assert!(resume_path.exists());

        let scratch = Workspace::ephemeral(root.path(), "rf-").unwrap();
        assert!(!scratch.is_resumable());
        let scratch_path = scratch.path().to_path_buf();
        assert!(scratch_path.exists());
        scratch.close().unwrap();
        assert!(!scratch_path.exists());
    }

    #[test]
    fn test_manifest_matches_resource() {
        let manifest = new_manifest("http://host/d", &info(100), &[(0, 49), (50, 99)]);
        assert!(manifest.matches("http://host/d", 100, None));
        assert!(!manifest.matches("http://host/d", 101, None));
        assert!(!manifest.matches("http://host/e", 100, None));
        assert!(!manifest.matches("http://host/d", 100, Some(Timestamp::UNIX_EPOCH)));

        let gapped = new_manifest("http://host/d", &info(100), &[(0, 40), (50, 99)]);
        assert!(!gapped.matches("http://host/d", 100, None));
    }
}
