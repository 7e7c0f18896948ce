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

use std::path::PathBuf;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tokio::{fs::File, io::Take};

use crate::error::DownloadError;

/// One contiguous byte range of the remote resource and the file it is
/// written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Index of this segment (0-based)
    pub index:     usize,
    /// Start byte position (inclusive)
    pub start:     u64,
    /// End byte position (inclusive)
    pub end:       u64,
    /// File holding the bytes of this range
    pub path:      PathBuf,
    /// Whether bytes already on disk may be reused
    pub resumable: bool,
    /// Number of bytes of the range already written to `path`
    pub offset:    u64,
    /// Whether a previous run recorded this segment as finished
    pub status:    SegmentStatus,
}

impl Segment {
    /// Number of bytes in the range.
    #[must_use]
    pub const fn len(&self) -> u64 { self.end - self.start + 1 }

    #[must_use]
    pub const fn is_complete(&self) -> bool { self.offset >= self.len() }
}

/// Readable handle to a finished segment, limited to the segment length.
pub(crate) type SegmentHandle = Take<File>;

/// Completion of one segment worker, tagged with its index.
pub(crate) struct PartialResult<T = SegmentHandle> {
    pub index:   usize,
    pub outcome: Result<T, DownloadError>,
}

/// Status of a segment as recorded in the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SegmentStatus {
    /// Segment has not been fully downloaded yet
    Pending,
    /// Segment file holds the whole range
    Complete,
}

/// Planned range of a segment as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index:  usize,
    pub start:  u64,
    pub end:    u64,
    pub status: SegmentStatus,
}

/// Persistent record of a resumable download, stored next to the segment
/// files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// URL being downloaded
    pub url:            String,
    /// Content length reported by the server
    pub content_length: u64,
    /// `Last-Modified` of the resource as a Unix timestamp, when known
    pub modified:       Option<i64>,
    /// Planned segments in index order
    pub segments:       Vec<ManifestEntry>,
    /// Unix timestamp when the manifest was created
    pub created_at:     i64,
    /// Unix timestamp when the manifest was last written
    pub updated_at:     i64,
}

impl Manifest {
    /// Whether this manifest describes the same remote resource.
    #[must_use]
    pub fn matches(&self, url: &str, content_length: u64, modified: Option<Timestamp>) -> bool {
        self.url == url
            && self.content_length == content_length
            && self.modified == modified.map(Timestamp::as_second)
            && self.is_contiguous()
    }

    /// Ranges start at 0, follow each other without gaps and end at the last
    /// byte of the resource.
    fn is_contiguous(&self) -> bool {
        let mut next = 0u64;
        for (index, entry) in self.segments.iter().enumerate() {
            if entry.index != index || entry.start != next || entry.end < entry.start {
                return false;
            }
            next = entry.end + 1;
        }
        !self.segments.is_empty() && next == self.content_length
    }

    /// Ranges recorded in the manifest, in index order.
    #[must_use]
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.segments.iter().map(|s| (s.start, s.end)).collect()
    }
}

/// Progress of one segment, reported after every body chunk is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Segment index (always 0 for single-stream downloads)
    pub index:      usize,
    /// Bytes of the segment on disk, including bytes reused from a previous run
    pub downloaded: u64,
    /// Length of the segment, or `None` when the server did not announce it
    pub total:      Option<u64>,
}

/// File-like metadata of a finished download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Last path component of the URL
    pub name:     String,
    /// Total number of bytes readable from the download
    pub size:     u64,
    /// Unix permission bits describing the readable stream
    pub mode:     u32,
    /// `Last-Modified` reported by the server, or the time the download opened
    pub modified: Timestamp,
}
