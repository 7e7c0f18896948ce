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
    collections::VecDeque,
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use tokio::io::{AsyncRead, ReadBuf};

/// Reads a list of readers back to back, in order.
///
/// Each reader is dropped, closing its file, as soon as it reaches EOF.
pub(crate) struct SegmentChain<R> {
    readers: VecDeque<R>,
}

impl<R> SegmentChain<R> {
    pub fn new(readers: impl IntoIterator<Item = R>) -> Self {
        Self {
            readers: readers.into_iter().collect(),
        }
    }

    /// Number of readers not yet exhausted
    #[cfg(test)]
    pub fn remaining(&self) -> usize { self.readers.len() }
}

impl<R: AsyncRead + Unpin> AsyncRead for SegmentChain<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        while let Some(front) = this.readers.front_mut() {
            let before = buf.filled().len();
            ready!(Pin::new(front).poll_read(cx, buf))?;
            if buf.filled().len() > before {
                return Poll::Ready(Ok(()));
            }
            this.readers.pop_front();
        }

        Poll::Ready(Ok(()))
    }
}
