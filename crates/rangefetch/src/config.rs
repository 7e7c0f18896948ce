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

use std::{fmt, path::PathBuf, sync::Arc};

use bon::Builder;
use jiff::SignedDuration;
use smart_default::SmartDefault;
use snafu::ResultExt;

use crate::{
    error::{DownloadError, NetworkSnafu},
    types::Progress,
};

/// Number of segments used when no concurrency function is configured.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Prefix of resume directories created under the temp root.
pub const DEFAULT_DIR_PREFIX: &str = "rangefetch-";

/// Chooses the number of segments for a resource of the given size.
pub type ConcurrencyFn = Arc<dyn Fn(u64) -> usize + Send + Sync>;

/// Adjusts every outgoing request, e.g. to inject headers.
pub type RequestDecorator =
    Arc<dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync>;

/// Builds the HTTP client used for a download.
pub type ClientFactory = Arc<dyn Fn() -> reqwest::Client + Send + Sync>;

/// Receives progress reports from the segment workers.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Options for opening a download
#[derive(Clone, SmartDefault, Builder)]
pub struct OpenOptions {
    /// Directory under which resume and scratch directories are created
    /// (default: the OS temp dir)
    #[default(std::env::temp_dir())]
    #[builder(default = std::env::temp_dir())]
    pub temp_dir: PathBuf,

    /// Prefix of the per-URL resume directory name
    #[default(DEFAULT_DIR_PREFIX.to_string())]
    #[builder(default = DEFAULT_DIR_PREFIX.to_string(), into)]
    pub dir_prefix: String,

    /// Number of segments when no concurrency function is set (default: 10)
    #[default(DEFAULT_CONCURRENCY)]
    #[builder(default = DEFAULT_CONCURRENCY)]
    pub default_concurrency: usize,

    /// Connect timeout of the default HTTP client
    #[default(SignedDuration::from_secs(30))]
    #[builder(default = SignedDuration::from_secs(30))]
    pub connect_timeout: SignedDuration,

    /// Custom User-Agent header of the default HTTP client
    #[builder(into)]
    pub user_agent: Option<String>,

    #[builder(skip)]
    concurrency: Option<ConcurrencyFn>,

    #[builder(skip)]
    decorator: Option<RequestDecorator>,

    #[builder(skip)]
    client_factory: Option<ClientFactory>,

    #[builder(skip)]
    progress: Option<ProgressFn>,
}

impl OpenOptions {
    /// Pick the number of segments from the resource size.
    #[must_use]
    pub fn with_concurrency<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) -> usize + Send + Sync + 'static,
    {
        self.concurrency = Some(Arc::new(f));
        self
    }

    /// Apply `f` to every HEAD and GET request before it is sent.
    #[must_use]
    pub fn with_request_decorator<F>(mut self, f: F) -> Self
    where
        F: Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync + 'static,
    {
        self.decorator = Some(Arc::new(f));
        self
    }

    /// Use the client returned by `f` instead of building one from these
    /// options.
    #[must_use]
    pub fn with_client_factory<F>(mut self, f: F) -> Self
    where
        F: Fn() -> reqwest::Client + Send + Sync + 'static,
    {
        self.client_factory = Some(Arc::new(f));
        self
    }

    /// Report progress of every segment to `f`. It is called from the worker
    /// tasks, so it must be cheap.
    #[must_use]
    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(f));
        self
    }

    pub(crate) fn concurrency_for(&self, file_size: u64) -> usize {
        let n = self
            .concurrency
            .as_ref()
            .map_or(self.default_concurrency, |f| f(file_size));
        if n < 1 { self.default_concurrency } else { n }
    }

    pub(crate) fn decorate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.decorator {
            Some(ref decorator) => decorator(request),
            None => request,
        }
    }

    pub(crate) fn report(&self, progress: Progress) {
        if let Some(ref f) = self.progress {
            f(progress);
        }
    }

    pub(crate) fn build_client(&self) -> Result<reqwest::Client, DownloadError> {
        if let Some(ref factory) = self.client_factory {
            return Ok(factory());
        }

        let mut builder =
            reqwest::Client::builder().connect_timeout(self.connect_timeout.unsigned_abs());

        if let Some(ref ua) = self.user_agent {
            builder = builder.user_agent(ua);
        }

        builder.build().context(NetworkSnafu)
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("temp_dir", &self.temp_dir)
            .field("dir_prefix", &self.dir_prefix)
            .field("default_concurrency", &self.default_concurrency)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .field("concurrency", &self.concurrency.is_some())
            .field("decorator", &self.decorator.is_some())
            .field("client_factory", &self.client_factory.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = OpenOptions::default();
        assert_eq!(options.default_concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(options.dir_prefix, DEFAULT_DIR_PREFIX);
        assert_eq!(options.temp_dir, std::env::temp_dir());
        assert_eq!(options.concurrency_for(1 << 20), DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_builder_matches_defaults() {
        let built = OpenOptions::builder().build();
        let default = OpenOptions::default();
        assert_eq!(built.temp_dir, default.temp_dir);
        assert_eq!(built.dir_prefix, default.dir_prefix);
        assert_eq!(built.default_concurrency, default.default_concurrency);
        assert_eq!(built.connect_timeout, default.connect_timeout);
    }

    #[test]
    fn test_concurrency_below_one_falls_back() {
        let options = OpenOptions::builder()
            .default_concurrency(6)
            .build()
            .with_concurrency(|_| 0);
        assert_eq!(options.concurrency_for(1000), 6);

        let options = OpenOptions::default().with_concurrency(|size| (size / 100) as usize);
        assert_eq!(options.concurrency_for(400), 4);
    }
}
