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

use std::{future::Future, time::Duration};

use snafu::Snafu;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;

/// Why a [`Context`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum ContextError {
    #[snafu(display("context canceled"))]
    Canceled,

    #[snafu(display("context deadline exceeded"))]
    DeadlineExceeded,
}

impl ContextError {
    /// Wrap this error into the matching terminal [`DownloadError`] for `url`.
    pub(crate) fn into_download_error(self, url: &str) -> DownloadError {
        let url = url.to_string();
        match self {
            Self::Canceled => DownloadError::Canceled { url, source: self },
            Self::DeadlineExceeded => DownloadError::DeadlineExceeded { url, source: self },
        }
    }
}

/// Cancellation and deadline signal shared by every request of a download.
///
/// Cloning a context shares the same signal. [`Context::child`] derives a
/// context that is cancelled together with its parent but can also be
/// cancelled on its own.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token:    CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().with_deadline(Instant::now() + timeout)
    }

    /// Set the deadline, keeping an earlier one if already present.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token:    self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) { self.token.cancel(); }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> { self.deadline }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken { &self.token }

    /// `Some` once the context is done. Cancellation wins over an elapsed
    /// deadline.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            Some(ContextError::Canceled)
        } else if self.deadline.is_some_and(|d| d <= Instant::now()) {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves when the context is cancelled or its deadline elapses.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.token.cancelled() => ContextError::Canceled,
                () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }

    /// Drive `fut` unless the context finishes first.
    pub(crate) async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            output = fut => Ok(output),
        }
    }
}
