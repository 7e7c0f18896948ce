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

use std::{
    fmt,
    io::{self, ErrorKind},
    path::Path,
    pin::Pin,
    sync::Arc,
    task::Poll,
};

use fd_lock::RwLock;
use jiff::Timestamp;
use reqwest::Url;
use tokio::{
    io::{AsyncRead, ReadBuf},
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    aggregator,
    config::OpenOptions,
    context::Context,
    error::{DownloadError, DownloadInProgressSnafu},
    planner::plan_segments,
    probe::{ResourceInfo, probe},
    reader::SegmentChain,
    segment::SegmentWorker,
    single::SingleStreamDownloader,
    types::{FileStat, Manifest, Segment, SegmentHandle, SegmentStatus},
    workspace::{Workspace, new_manifest},
};

/// Read-only permission bits reported by [`Download::stat`].
const STAT_MODE: u32 = 0o444;

/// A finished download, readable as one ordered byte stream.
///
/// Components:
/// - `probe`: HEAD request deciding between segmented and single-stream mode
/// - `planner`: splits the content length into ranges
/// - `SegmentWorker`: one task per range, writing into the workspace
/// - `aggregator`: collects the workers' handles in index order
/// - `Workspace`: the resume or scratch directory holding the segment files
///
/// Reading goes through [`AsyncRead`]. [`Download::close`] releases the
/// segment files; resume directories stay on disk so a later
/// [`Download::open`] of the same URL reuses them.
pub struct Download {
    url:       Arc<str>,
    size:      u64,
    modified:  Timestamp,
    segments:  Vec<Segment>,
    reader:    Option<SegmentChain<SegmentHandle>>,
    workspace: Option<Workspace>,
}

impl Download {
    /// Download `url` without a cancellation signal or deadline.
    pub async fn open(url: impl Into<String>, options: OpenOptions) -> Result<Self, DownloadError> {
        Self::open_with_context(&Context::new(), url, options).await
    }

    /// Download `url`, stopping every request as soon as `ctx` is cancelled or
    /// its deadline elapses.
    ///
    /// This method will:
    /// 1. Probe the resource with a HEAD request
    /// 2. Fall back to a single GET into a scratch directory when ranges are
    ///    not supported
    /// 3. Otherwise lock the URL's resume directory and load or write its
    ///    manifest
    /// 4. Fetch every segment concurrently, skipping bytes already on disk
    /// 5. Compose the segment files into one reader in index order
    pub async fn open_with_context(
        ctx: &Context,
        url: impl Into<String>,
        options: OpenOptions,
    ) -> Result<Self, DownloadError> {
        let url: Arc<str> = Arc::from(url.into());
        let options = Arc::new(options);
        let opened_at = Timestamp::now();

        let client = options.build_client()?;
        let info = probe(ctx, &client, &url, &options).await?;

        let mut download = if info.segmented() {
            Self::open_segmented(ctx, client, Arc::clone(&url), options, &info).await?
        } else {
            Self::open_single(ctx, &client, Arc::clone(&url), &options, &info).await?
        };
        download.modified = info.modified.unwrap_or(opened_at);

        info!(
            url = %url,
            size = download.size,
            segments = download.segments.len(),
            "download ready"
        );
        Ok(download)
    }

    async fn open_segmented(
        ctx: &Context,
        client: reqwest::Client,
        url: Arc<str>,
        options: Arc<OpenOptions>,
        info: &ResourceInfo,
    ) -> Result<Self, DownloadError> {
        let workspace = Workspace::resume(&options.temp_dir, &options.dir_prefix, &url).await?;

        // Another session writing the same segment files would corrupt them.
        // The lock is released when `_lock_guard` is dropped.
        let lock_file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(workspace.lock_path())
            .await?
            .into_std()
            .await;
        let mut lock = RwLock::new(lock_file);
        let _lock_guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return DownloadInProgressSnafu { url: &*url }.fail();
            }
            Err(err) => return Err(err.into()),
        };

        let mut manifest = Self::load_or_plan(&workspace, &url, &options, info).await?;
        workspace.save_manifest(&manifest).await?;

        let mut segments: Vec<Segment> = manifest
            .segments
            .iter()
            .map(|entry| Segment {
                index:     entry.index,
                start:     entry.start,
                end:       entry.end,
                path:      workspace.segment_path(entry.index),
                resumable: true,
                offset:    0,
                status:    entry.status,
            })
            .collect();

        // Workers get their own token so they stop once this function returns,
        // whatever the outcome.
        let workers = ctx.child();
        let _stop_workers = workers.cancellation_token().clone().drop_guard();

        let (tx, mut rx) = mpsc::channel(segments.len());
        for segment in &segments {
            let worker = SegmentWorker::new(
                client.clone(),
                Arc::clone(&url),
                workers.clone(),
                Arc::clone(&options),
            );
            let tx = tx.clone();
            let segment = segment.clone();
            tokio::spawn(async move {
                let result = worker.run(segment).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        // Segments are recorded as complete as soon as their worker succeeds,
        // so a failed run still persists the ones that finished.
        let collected = aggregator::collect(ctx, &url, segments.len(), &mut rx, |index| {
            if let Some(entry) = manifest.segments.get_mut(index) {
                entry.status = SegmentStatus::Complete;
            }
        })
        .await;
        manifest.updated_at = Timestamp::now().as_second();
        let reader = match collected {
            Ok(reader) => {
                workspace.save_manifest(&manifest).await?;
                reader
            }
            Err(err) => {
                if let Err(save_err) = workspace.save_manifest(&manifest).await {
                    warn!(url = %url, error = %save_err, "failed to record finished segments");
                }
                return Err(err);
            }
        };

        for segment in &mut segments {
            segment.offset = segment.len();
            segment.status = SegmentStatus::Complete;
        }

        Ok(Self {
            url,
            size: info.size,
            modified: Timestamp::UNIX_EPOCH,
            segments,
            reader: Some(reader),
            workspace: Some(workspace),
        })
    }

    /// Reuse the manifest of a previous attempt when it still describes the
    /// resource, otherwise plan afresh.
    async fn load_or_plan(
        workspace: &Workspace,
        url: &str,
        options: &OpenOptions,
        info: &ResourceInfo,
    ) -> Result<Manifest, DownloadError> {
        let stale = match workspace.load_manifest().await {
            Some(manifest) if manifest.matches(url, info.size, info.modified) => {
                debug!(url, segments = manifest.segments.len(), "resuming from manifest");
                return Ok(manifest);
            }
            Some(_) => {
                warn!(url, "resource changed since the last attempt, discarding partial segments");
                workspace.discard_segments().await?;
                true
            }
            None => false,
        };

        let ranges = plan_segments(info.size, options.concurrency_for(info.size));
        let mut manifest = new_manifest(url, info, &ranges);
        if !stale {
            workspace.mark_complete_files(&mut manifest).await?;
        }
        Ok(manifest)
    }

    async fn open_single(
        ctx: &Context,
        client: &reqwest::Client,
        url: Arc<str>,
        options: &OpenOptions,
        info: &ResourceInfo,
    ) -> Result<Self, DownloadError> {
        let workspace = Workspace::ephemeral(&options.temp_dir, &options.dir_prefix)?;
        let mut segment = Segment {
            index:     0,
            start:     0,
            end:       info.size.saturating_sub(1),
            path:      workspace.segment_path(0),
            resumable: false,
            offset:    0,
            status:    SegmentStatus::Pending,
        };

        let handle = SingleStreamDownloader::new(client, ctx, options)
            .download(&url, &mut segment)
            .await?;

        let size = segment.offset;
        // An empty body has no byte range to describe.
        let segments = if size == 0 { Vec::new() } else { vec![segment] };

        Ok(Self {
            url,
            size,
            modified: Timestamp::UNIX_EPOCH,
            segments,
            reader: Some(SegmentChain::new([handle])),
            workspace: Some(workspace),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str { &self.url }

    /// Total number of bytes readable from this download.
    #[must_use]
    pub const fn size(&self) -> u64 { self.size }

    /// Byte ranges the download was assembled from, in order. Empty when the
    /// resource is empty.
    #[must_use]
    pub fn segments(&self) -> &[Segment] { &self.segments }

    /// Whether the segment files live in a resume directory that survives
    /// [`Download::close`]. Always `false` once closed.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.workspace.as_ref().is_some_and(Workspace::is_resumable)
    }

    /// Directory holding the segment files, until the download is closed.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> { self.workspace.as_ref().map(Workspace::path) }

    #[must_use]
    pub fn stat(&self) -> FileStat {
        FileStat {
            name:     file_name(&self.url),
            size:     self.size,
            mode:     STAT_MODE,
            modified: self.modified,
        }
    }

    /// Release every segment file handle and remove the scratch directory of a
    /// single-stream download. Resume directories are kept.
    ///
    /// Calling `close` again is a no-op.
    pub fn close(&mut self) -> Result<(), DownloadError> {
        drop(self.reader.take());
        match self.workspace.take() {
            Some(workspace) => {
                debug!(url = %self.url, "closing download");
                workspace.close()
            }
            None => Ok(()),
        }
    }
}

impl AsyncRead for Download {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().reader {
            Some(ref mut reader) => Pin::new(reader).poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::other("download is closed"))),
        }
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("url", &self.url)
            .field("size", &self.size)
            .field("modified", &self.modified)
            .field("segments", &self.segments)
            .field("closed", &self.reader.is_none())
            .finish_non_exhaustive()
    }
}

/// Last non-empty path segment of `url`, or its host when the path is empty.
fn file_name(url: &str) -> String {
    let Ok(url) = Url::parse(url) else {
        return String::new();
    };
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
        .or_else(|| url.host_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("http://host/a/b/video.mp4"), "video.mp4");
        assert_eq!(file_name("https://host/dir/?x=1#frag"), "dir");
        assert_eq!(file_name("http://host:8080/file?name=other"), "file");
        assert_eq!(file_name("http://host"), "host");
        assert_eq!(file_name("http://host/"), "host");
        assert_eq!(file_name("http://user:pw@host"), "host");
        assert_eq!(file_name("http://user:pw@host/data.bin"), "data.bin");
        assert_eq!(file_name("not a url"), "");
    }
}
