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

use crate::config::DEFAULT_CONCURRENCY;

/// Split `file_size` bytes into `concurrency` contiguous inclusive ranges.
///
/// Every range gets `file_size / n` bytes and the last one also takes the
/// remainder, so the ranges always cover `0..file_size` exactly. A
/// concurrency of 0 falls back to [`DEFAULT_CONCURRENCY`], and no more ranges
/// than bytes are emitted.
#[must_use]
pub fn plan_segments(file_size: u64, concurrency: usize) -> Vec<(u64, u64)> {
    if file_size == 0 {
        return Vec::new();
    }

    let requested = if concurrency < 1 {
        DEFAULT_CONCURRENCY
    } else {
        concurrency
    };
    let num_chunks = (requested as u64).min(file_size);
    let chunk_size = file_size / num_chunks;

    (0..num_chunks)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == num_chunks - 1 {
                file_size - 1
            } else {
                (i + 1) * chunk_size - 1
            };
            (start, end)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(ranges: &[(u64, u64)], file_size: u64) {
        let mut next = 0;
        for &(start, end) in ranges {
            assert_eq!(start, next, "ranges must be contiguous");
            assert!(start <= end, "ranges must not be empty");
            next = end + 1;
        }
        assert_eq!(next, file_size, "ranges must sum to the file size");
    }

    #[test]
    fn test_plan_segments_even_split() {
        let ranges = plan_segments(1_000_000, 4);
        assert_eq!(ranges, vec![
            (0, 249_999),
            (250_000, 499_999),
            (500_000, 749_999),
            (750_000, 999_999),
        ]);
    }

    #[test]
    fn test_plan_segments_remainder_goes_to_last() {
        let ranges = plan_segments(1003, 4);
        assert_eq!(ranges[0], (0, 249));
        assert_eq!(ranges[3], (750, 1002));
        assert_covers(&ranges, 1003);
    }

    #[test]
    fn test_plan_segments_zero_concurrency_uses_default() {
        let ranges = plan_segments(1000, 0);
        assert_eq!(ranges.len(), DEFAULT_CONCURRENCY);
        assert_covers(&ranges, 1000);
    }

    #[test]
    fn test_plan_segments_more_workers_than_bytes() {
        let ranges = plan_segments(3, 8);
        assert_eq!(ranges, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_plan_segments_empty_file() {
        assert!(plan_segments(0, 4).is_empty());
    }

    #[test]
    fn test_plan_segments_always_cover_the_file() {
        for file_size in [1, 2, 7, 10, 99, 1024, 65_537, 1_000_003] {
            for concurrency in 1..=17 {
                let ranges = plan_segments(file_size, concurrency);
                assert_covers(&ranges, file_size);
                assert!(ranges.len() <= concurrency);
            }
        }
    }
}
