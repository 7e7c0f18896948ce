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

//! Concurrent, resumable, range-based HTTP downloader.
//!
//! [`Download::open`] probes the resource with a HEAD request, splits it into
//! byte ranges when the server advertises `Accept-Ranges: bytes`, fetches every
//! range concurrently into its own file and hands back a single reader that
//! yields the bytes in order. Partial files survive failures, so opening the
//! same URL again continues where the previous attempt stopped.

mod aggregator;
mod config;
mod context;
mod error;
mod planner;
mod probe;
mod reader;
mod segment;
mod session;
mod single;
mod types;
mod workspace;

pub use config::{
    ClientFactory, ConcurrencyFn, DEFAULT_CONCURRENCY, DEFAULT_DIR_PREFIX, OpenOptions,
    ProgressFn, RequestDecorator,
};
pub use context::{Context, ContextError};
pub use error::DownloadError;
pub use planner::plan_segments;
pub use session::Download;
pub use types::{FileStat, Manifest, ManifestEntry, Progress, Segment, SegmentStatus};
pub use workspace::resume_dir;
