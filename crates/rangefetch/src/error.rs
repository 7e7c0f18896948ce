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

use snafu::Snafu;

use crate::context::ContextError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DownloadError {
    #[snafu(display("Network error: {source}"))]
    Network { source: reqwest::Error },

    #[snafu(display("HTTP error {status} for URL: {url}"))]
    Http { status: u16, url: String },

    /// A ranged request for segment `index` was not answered with `206`.
    #[snafu(display("Invalid response code for segment {index}: got {got}, expected {expected}"))]
    InvalidResponseCode { index: usize, got: u16, expected: u16 },

    /// A ranged response for segment `index` started at the wrong offset.
    #[snafu(display("Segment {index} expected a range starting at {expected}, got Content-Range {got:?}"))]
    UnexpectedContentRange { index: usize, expected: u64, got: String },

    /// The body received for segment `index` did not match its range length.
    #[snafu(display("Segment {index} is incomplete: got {got} of {expected} bytes"))]
    SegmentIncomplete { index: usize, expected: u64, got: u64 },

    #[snafu(display("Download of {url} canceled"))]
    Canceled { url: String, source: ContextError },

    #[snafu(display("Download of {url} exceeded its deadline"))]
    DeadlineExceeded { url: String, source: ContextError },

    #[snafu(transparent)]
    Io { source: std::io::Error },

    #[snafu(display("Manifest error at {}: {source}", path.display()))]
    Manifest {
        path:   PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Segment {index} is missing"))]
    SegmentMissing { index: usize },

    #[snafu(display("Download already in progress for URL: {url}"))]
    DownloadInProgress { url: String },
}

impl DownloadError {
    /// Whether the error came from the caller's context rather than from the
    /// transfer itself.
    #[must_use]
    pub const fn is_context_error(&self) -> bool {
        matches!(self, Self::Canceled { .. } | Self::DeadlineExceeded { .. })
    }
}
