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

use std::{io::SeekFrom, sync::Arc};

use futures::StreamExt;
use snafu::{ResultExt, ensure};
use strum_macros::Display;
use tokio::{
    fs::{File, OpenOptions as FsOpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter},
};
use tracing::{debug, trace};

use crate::{
    config::OpenOptions,
    context::Context,
    error::{
        DownloadError, InvalidResponseCodeSnafu, NetworkSnafu, SegmentIncompleteSnafu,
        UnexpectedContentRangeSnafu,
    },
    types::{PartialResult, Progress, Segment, SegmentHandle, SegmentStatus},
};

const WRITE_BUFFER: usize = 512 * 1024;

/// States a worker moves through while fetching its segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum WorkerState {
    Idle,
    Resuming,
    Fresh,
    Requesting,
    Streaming,
    Complete,
    Failed,
}

/// Downloads one byte range into its segment file
pub(crate) struct SegmentWorker {
    client:  reqwest::Client,
    url:     Arc<str>,
    ctx:     Context,
    options: Arc<OpenOptions>,
    state:   WorkerState,
}

impl SegmentWorker {
    pub fn new(
        client: reqwest::Client,
        url: Arc<str>,
        ctx: Context,
        options: Arc<OpenOptions>,
    ) -> Self {
        Self {
            client,
            url,
            ctx,
            options,
            state: WorkerState::Idle,
        }
    }

    /// Fetch `segment` and package the outcome for the aggregator. Partial
    /// files are left on disk on failure.
    pub async fn run(mut self, mut segment: Segment) -> PartialResult {
        let index = segment.index;
        let outcome = self.fetch(&mut segment).await;
        if let Err(ref err) = outcome {
            self.transition(index, WorkerState::Failed);
            debug!(url = %self.url, index, offset = segment.offset, error = %err, "segment failed");
        }
        PartialResult { index, outcome }
    }

    fn transition(&mut self, index: usize, next: WorkerState) {
        trace!(url = %self.url, index, from = %self.state, to = %next, "segment state");
        self.state = next;
    }

    async fn fetch(&mut self, segment: &mut Segment) -> Result<SegmentHandle, DownloadError> {
        let index = segment.index;
        let file = if segment.resumable {
            self.transition(index, WorkerState::Resuming);
            let existing = match tokio::fs::metadata(&segment.path).await {
                Ok(meta) => meta.len(),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
                Err(err) => return Err(err.into()),
            };

            if existing >= segment.len() && segment.status == SegmentStatus::Complete {
                segment.offset = segment.len();
                self.transition(index, WorkerState::Complete);
                debug!(url = %self.url, index, "segment already on disk");
                let file = File::open(&segment.path).await?;
                return Ok(file.take(segment.len()));
            }

            if existing > 0 && existing < segment.len() {
                segment.offset = existing;
                debug!(url = %self.url, index, offset = existing, "resuming segment");
                FsOpenOptions::new()
                    .read(true)
                    .append(true)
                    .open(&segment.path)
                    .await?
            } else {
                if existing > 0 {
                    debug!(url = %self.url, index, size = existing, "segment never recorded as complete, refetching");
                }
                self.transition(index, WorkerState::Fresh);
                segment.offset = 0;
                create_segment_file(segment).await?
            }
        } else {
            self.transition(index, WorkerState::Fresh);
            segment.offset = 0;
            create_segment_file(segment).await?
        };

        self.transition(index, WorkerState::Requesting);
        let range = format!("bytes={}-{}", segment.start + segment.offset, segment.end);
        let request = self
            .options
            .decorate(self.client.get(&*self.url))
            .header(reqwest::header::RANGE, range);
        let response = self
            .ctx
            .run(request.send())
            .await
            .map_err(|e| e.into_download_error(&self.url))?
            .context(NetworkSnafu)?;

        let status = response.status();
        ensure!(
            status == reqwest::StatusCode::PARTIAL_CONTENT,
            InvalidResponseCodeSnafu {
                index,
                got: status.as_u16(),
                expected: reqwest::StatusCode::PARTIAL_CONTENT.as_u16(),
            }
        );

        if let Some(value) = response.headers().get(reqwest::header::CONTENT_RANGE) {
            let got = String::from_utf8_lossy(value.as_bytes()).into_owned();
            let expected = segment.start + segment.offset;
            ensure!(
                content_range_start(&got) == Some(expected),
                UnexpectedContentRangeSnafu {
                    index,
                    expected,
                    got,
                }
            );
        }

        self.transition(index, WorkerState::Streaming);
        let total = Some(segment.len());
        let mut file = copy_body(&self.ctx, &self.url, response, file, |written| {
            segment.offset += written;
            self.options.report(Progress {
                index,
                downloaded: segment.offset,
                total,
            });
        })
        .await?;

        // A 206 may legally carry less than the requested range. The bytes
        // that did arrive stay on disk for the next attempt.
        ensure!(
            segment.offset == segment.len(),
            SegmentIncompleteSnafu {
                index,
                expected: segment.len(),
                got: segment.offset,
            }
        );

        file.seek(SeekFrom::Start(0)).await?;
        self.transition(index, WorkerState::Complete);
        Ok(file.take(segment.len()))
    }
}

async fn create_segment_file(segment: &Segment) -> Result<File, DownloadError> {
    let file = FsOpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&segment.path)
        .await?;
    Ok(file)
}

/// First byte position of a `Content-Range: bytes <start>-<end>/<total>`
/// value.
fn content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}

/// Stream `response` into `file`, racing every read against `ctx`.
///
/// `on_write` is called with the number of bytes written after each chunk.
/// The file is flushed and synced before it is returned.
pub(crate) async fn copy_body(
    ctx: &Context,
    url: &str,
    response: reqwest::Response,
    file: File,
    mut on_write: impl FnMut(u64),
) -> Result<File, DownloadError> {
    if let Some(err) = ctx.err() {
        return Err(err.into_download_error(url));
    }

    let mut writer = BufWriter::with_capacity(WRITE_BUFFER, file);
    let mut stream = response.bytes_stream();

    loop {
        let next = ctx
            .run(stream.next())
            .await
            .map_err(|e| e.into_download_error(url))?;
        let Some(chunk) = next else { break };
        let chunk = chunk.context(NetworkSnafu)?;
        writer.write_all(&chunk).await?;
        on_write(chunk.len() as u64);
    }

    writer.flush().await?;
    let file = writer.into_inner();
    file.sync_all().await?;
    Ok(file)
}
