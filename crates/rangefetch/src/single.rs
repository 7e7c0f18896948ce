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

use std::io::SeekFrom;

use snafu::{ResultExt, ensure};
use tokio::{
    fs::OpenOptions as FsOpenOptions,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::debug;

use crate::{
    config::OpenOptions,
    context::Context,
    error::{DownloadError, HttpSnafu, NetworkSnafu, SegmentIncompleteSnafu},
    segment::copy_body,
    types::{Progress, Segment, SegmentHandle, SegmentStatus},
};

/// Downloads the whole resource with one plain GET, for servers that cannot
/// serve ranges or did not answer the HEAD request.
pub(crate) struct SingleStreamDownloader<'a> {
    client:  &'a reqwest::Client,
    ctx:     &'a Context,
    options: &'a OpenOptions,
}

impl<'a> SingleStreamDownloader<'a> {
    pub const fn new(client: &'a reqwest::Client, ctx: &'a Context, options: &'a OpenOptions) -> Self {
        Self {
            client,
            ctx,
            options,
        }
    }

    /// Download `url` into `segment.path`. On success the segment describes
    /// the bytes actually received, which must match the announced
    /// Content-Length when there is one.
    pub async fn download(
        &self,
        url: &str,
        segment: &mut Segment,
    ) -> Result<SegmentHandle, DownloadError> {
        let request = self.options.decorate(self.client.get(url));
        let response = self
            .ctx
            .run(request.send())
            .await
            .map_err(|e| e.into_download_error(url))?
            .context(NetworkSnafu)?;

        ensure!(
            response.status().is_success(),
            HttpSnafu {
                status: response.status().as_u16(),
                url,
            }
        );

        let total = response.content_length();
        let file = FsOpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&segment.path)
            .await?;
        let mut written = 0u64;
        let mut file = copy_body(self.ctx, url, response, file, |n| {
            written += n;
            self.options.report(Progress {
                index: segment.index,
                downloaded: written,
                total,
            });
        })
        .await?;

        if let Some(expected) = total {
            ensure!(
                written == expected,
                SegmentIncompleteSnafu {
                    index: segment.index,
                    expected,
                    got: written,
                }
            );
        }

        debug!(url, size = written, "single stream finished");
        segment.start = 0;
        segment.end = written.saturating_sub(1);
        segment.offset = written;
        segment.status = SegmentStatus::Complete;

        file.seek(SeekFrom::Start(0)).await?;
        Ok(file.take(written))
    }
}
