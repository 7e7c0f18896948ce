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

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    context::Context,
    error::DownloadError,
    reader::SegmentChain,
    types::PartialResult,
};

/// Collect exactly `expected` results from `rx` into index order.
///
/// `on_complete` is called with the index of every segment that succeeds,
/// as it arrives. Returns the first segment error as soon as it arrives. When `ctx` ends
/// first, one more in-flight result is drained before the classified context
/// error is returned.
pub(crate) async fn collect<T>(
    ctx: &Context,
    url: &str,
    expected: usize,
    rx: &mut mpsc::Receiver<PartialResult<T>>,
    mut on_complete: impl FnMut(usize),
) -> Result<SegmentChain<T>, DownloadError> {
    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(expected).collect();
    let mut received = 0;

    while received < expected {
        tokio::select! {
            err = ctx.done() => {
                debug!(url, received, expected, "download interrupted, draining one result");
                let _ = rx.recv().await;
                return Err(err.into_download_error(url));
            }
            result = rx.recv() => {
                let Some(PartialResult { index, outcome }) = result else {
                    break;
                };
                match outcome {
                    Ok(handle) => {
                        if let Some(slot) = slots.get_mut(index) {
                            *slot = Some(handle);
                            on_complete(index);
                        }
                        received += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }

    if let Some(index) = slots.iter().position(Option::is_none) {
        warn!(url, index, "segment worker exited without a result");
        return Err(DownloadError::SegmentMissing { index });
    }

    Ok(SegmentChain::new(slots.into_iter().flatten()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;

    fn ok(index: usize, data: &'static [u8]) -> PartialResult<&'static [u8]> {
        PartialResult {
            index,
            outcome: Ok(data),
        }
    }

    #[tokio::test]
    async fn test_orders_by_index_not_arrival() {
        let (tx, mut rx) = mpsc::channel(3);
        tx.send(ok(2, b"three")).await.unwrap();
        tx.send(ok(0, b"one-")).await.unwrap();
        tx.send(ok(1, b"two-")).await.unwrap();

        let mut chain = collect(&Context::new(), "u", 3, &mut rx, |_| {}).await.unwrap();
        let mut out = String::new();
        chain.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "one-two-three");
    }

    #[tokio::test]
    async fn test_first_error_aborts() {
        let (tx, mut rx) = mpsc::channel(2);
        tx.send(ok(0, b"a")).await.unwrap();
        tx.send(PartialResult {
            index:   1,
            outcome: Err(DownloadError::InvalidResponseCode {
                index:    1,
                got:      200,
                expected: 206,
            }),
        })
        .await
        .unwrap();

        let mut completed = Vec::new();
        let err = collect(&Context::new(), "u", 2, &mut rx, |index| completed.push(index))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DownloadError::InvalidResponseCode { got: 200, .. }));
        assert_eq!(completed, vec![0], "successes before the error are reported");
    }

    #[tokio::test]
    async fn test_cancellation_drains_one_result() {
        let (tx, mut rx) = mpsc::channel(2);
        let ctx = Context::new();
        ctx.cancel();

        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(ok(0, b"late")).await.unwrap();
            tx
        });

        let err = collect(&ctx, "http://h/f", 2, &mut rx, |_| {}).await.err().unwrap();
        assert!(matches!(err, DownloadError::Canceled { ref url, .. } if url == "http://h/f"));
        let _tx = sender.await.unwrap();
        assert!(rx.try_recv().is_err(), "the late result was drained");
    }

    #[tokio::test]
    async fn test_deadline_is_classified() {
        let (tx, mut rx) = mpsc::channel::<PartialResult<&'static [u8]>>(1);
        let ctx = Context::with_timeout(Duration::from_millis(20));
        drop(tx);
        let err = collect(&ctx, "u", 1, &mut rx, |_| {}).await.err().unwrap();
        // All senders are gone before the deadline: the slot is reported missing.
        assert!(matches!(err, DownloadError::SegmentMissing { index: 0 }));

        let (tx, mut rx) = mpsc::channel::<PartialResult<&'static [u8]>>(1);
        let keep = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(tx);
        });
        let ctx = Context::with_timeout(Duration::from_millis(20));
        let err = collect(&ctx, "u", 1, &mut rx, |_| {}).await.err().unwrap();
        assert!(matches!(err, DownloadError::DeadlineExceeded { .. }));
        keep.await.unwrap();
    }
}
