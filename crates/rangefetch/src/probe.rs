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

use jiff::{Timestamp, fmt::rfc2822};
use reqwest::{StatusCode, header::HeaderMap};
use tracing::{debug, warn};

use crate::{config::OpenOptions, context::Context, error::DownloadError};

/// What a HEAD request revealed about the remote resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ResourceInfo {
    /// `Content-Length`, 0 when absent or unparsable
    pub size:           u64,
    pub supports_range: bool,
    /// `Last-Modified`, when present and parsable
    pub modified:       Option<Timestamp>,
}

impl ResourceInfo {
    /// Segmented, resumable mode needs both range support and a known size.
    pub const fn segmented(&self) -> bool { self.supports_range && self.size > 0 }

    fn from_headers(headers: &HeaderMap) -> Self {
        let size = headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        let supports_range = headers
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")));

        let modified = headers
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| rfc2822::DateTimeParser::new().parse_timestamp(v).ok());

        Self {
            size,
            supports_range,
            modified,
        }
    }
}

/// Issue a HEAD request for `url`.
///
/// A failed request or a non-200 answer is not fatal: the download falls back
/// to a single unsegmented stream. Only the context ending is reported as an
/// error.
pub(crate) async fn probe(
    ctx: &Context,
    client: &reqwest::Client,
    url: &str,
    options: &OpenOptions,
) -> Result<ResourceInfo, DownloadError> {
    let request = options.decorate(client.head(url));
    let response = ctx
        .run(request.send())
        .await
        .map_err(|e| e.into_download_error(url))?;

    match response {
        Ok(response) if response.status() == StatusCode::OK => {
            let info = ResourceInfo::from_headers(response.headers());
            debug!(
                url,
                size = info.size,
                supports_range = info.supports_range,
                "probed resource"
            );
            Ok(info)
        }
        Ok(response) => {
            warn!(url, status = %response.status(), "HEAD request rejected, falling back to a single stream");
            Ok(ResourceInfo::default())
        }
        Err(err) => {
            warn!(url, error = %err, "HEAD request failed, falling back to a single stream");
            Ok(ResourceInfo::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderValue, LAST_MODIFIED};

    use super::*;

    fn headers(pairs: &[(reqwest::header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_segmented_requires_bytes_and_length() {
        let info =
            ResourceInfo::from_headers(&headers(&[(CONTENT_LENGTH, "1024"), (ACCEPT_RANGES, "bytes")]));
        assert_eq!(info.size, 1024);
        assert!(info.segmented());

        let info =
            ResourceInfo::from_headers(&headers(&[(CONTENT_LENGTH, "1024"), (ACCEPT_RANGES, "none")]));
        assert!(!info.segmented());

        let info = ResourceInfo::from_headers(&headers(&[(ACCEPT_RANGES, "bytes")]));
        assert_eq!(info.size, 0);
        assert!(!info.segmented());
    }

    #[test]
    fn test_last_modified_is_parsed() {
        let info = ResourceInfo::from_headers(&headers(&[(
            LAST_MODIFIED,
            "Sun, 06 Nov 1994 08:49:37 GMT",
        )]));
        assert_eq!(info.modified.map(Timestamp::as_second), Some(784_111_777));
    }

    #[test]
    fn test_garbage_headers_are_ignored() {
        let info = ResourceInfo::from_headers(&headers(&[
            (CONTENT_LENGTH, "lots"),
            (LAST_MODIFIED, "yesterday"),
        ]));
        assert_eq!(info, ResourceInfo::default());
    }
}
