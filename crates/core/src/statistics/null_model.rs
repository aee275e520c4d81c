//! Pseudo-event sampling for the null distribution
//!
//! A pseudo-event occupies `span` steps followed by its lag window. Its whole
//! footprint must stay inside the series and clear of every real event's own
//! footprint (event span plus lag window) widened by `buffer` steps on both
//! sides. Pseudo-events drawn for one resample are also mutually disjoint.

use crate::core_types::DustEvent;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Inclusive index interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Footprint {
    first: usize,
    last: usize,
}

impl Footprint {
    #[inline]
    fn overlaps(&self, other: &Footprint) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

/// Draws sets of non-overlapping pseudo-events
#[derive(Debug, Clone)]
pub struct NullSampler {
    /// Admissible pseudo-event start indices, ascending
    starts: Vec<usize>,
    span: usize,
    lag_window: usize,
}

impl NullSampler {
    /// Enumerate admissible pseudo-event starts.
    ///
    /// `eligible(start)` lets the caller restrict starts further (focus months).
    pub fn new(
        series_len: usize,
        events: &[DustEvent],
        span: usize,
        lag_window: usize,
        buffer: usize,
        eligible: impl Fn(usize) -> bool,
    ) -> Self {
        let span = span.max(1);
        let footprint_len = span + lag_window;
        let forbidden: Vec<Footprint> = events
            .iter()
            .map(|e| Footprint {
                first: e.start_index.saturating_sub(buffer),
                last: e.end_index + lag_window + buffer,
            })
            .collect();

        let starts = if series_len < footprint_len {
            Vec::new()
        } else {
            (0..=series_len - footprint_len)
                .filter(|&start| {
                    let fp = Footprint {
                        first: start,
                        last: start + footprint_len - 1,
                    };
                    eligible(start) && !forbidden.iter().any(|f| f.overlaps(&fp))
                })
                .collect()
        };

        Self {
            starts,
            span,
            lag_window,
        }
    }

    /// Number of admissible windows
    pub fn window_count(&self) -> usize {
        self.starts.len()
    }

    /// Pseudo-event "end" index for a start (last step of its span)
    #[inline]
    pub fn end_index(&self, start: usize) -> usize {
        start + self.span - 1
    }

    fn footprint(&self, start: usize) -> Footprint {
        Footprint {
            first: start,
            last: start + self.span + self.lag_window - 1,
        }
    }

    /// Draw `count` mutually disjoint pseudo-events and return their end indices,
    /// ascending. `None` when the admissible windows are exhausted first.
    pub fn draw(&self, count: usize, rng: &mut StdRng) -> Option<Vec<usize>> {
        if count == 0 {
            return Some(Vec::new());
        }
        let mut pool = self.starts.clone();
        let mut chosen: Vec<Footprint> = Vec::with_capacity(count);
        let mut ends = Vec::with_capacity(count);

        // Partial Fisher-Yates: each pool entry is considered at most once
        for i in 0..pool.len() {
            let j = rng.random_range(i..pool.len());
            pool.swap(i, j);
            let start = pool[i];
            let fp = self.footprint(start);
            if chosen.iter().any(|c| c.overlaps(&fp)) {
                continue;
            }
            chosen.push(fp);
            ends.push(self.end_index(start));
            if ends.len() == count {
                ends.sort_unstable();
                return Some(ends);
            }
        }
        None
    }
}

/// Independent RNG for `(seed, stream, index)`.
///
/// Each resample owns its generator, so results are identical whether resamples
/// run sequentially or on any number of threads.
pub fn stream_rng(seed: u64, stream: u64, index: u64) -> StdRng {
    let mut z = seed
        ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ index.wrapping_mul(0xD1B5_4A32_D192_ED03);
    // splitmix64 finaliser
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    StdRng::seed_from_u64(z ^ (z >> 31))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(start: usize, end: usize) -> DustEvent {
        let t0 = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        DustEvent {
            event_id: 0,
            start_time: t0,
            end_time: t0,
            start_index: start,
            end_index: end,
            peak_magnitude: 1.0,
            peak_time: t0,
            spatial_extent: 1.0,
            exceedance_steps: end - start + 1,
            truncated: false,
        }
    }

    #[test]
    fn test_windows_avoid_real_event_footprints() {
        // Real event 10..=12 with lag window 3 blocks 10..=15, buffer 1 -> 9..=16
        let sampler = NullSampler::new(30, &[event(10, 12)], 2, 3, 1, |_| true);
        for &start in &sampler.starts {
            let last = start + 2 + 3 - 1;
            assert!(last < 9 || start > 16, "start {start} overlaps");
            assert!(last < 30);
        }
        assert!(sampler.starts.contains(&4));
        assert!(!sampler.starts.contains(&5));
        assert!(sampler.starts.contains(&17));
    }

    #[test]
    fn test_draws_are_disjoint_and_reproducible() {
        let sampler = NullSampler::new(200, &[event(50, 55)], 3, 5, 0, |_| true);
        let a = sampler.draw(6, &mut stream_rng(7, 0, 3)).unwrap();
        let b = sampler.draw(6, &mut stream_rng(7, 0, 3)).unwrap();
        assert_eq!(a, b);
        for pair in a.windows(2) {
            // ends ascending; footprints (span 3 + lag 5 = 8) must not overlap
            assert!(pair[1] - pair[0] >= 8);
        }
    }

    #[test]
    fn test_exhaustion_returns_none() {
        // Footprints of length 5 in 15 steps: any first pick leaves room for a
        // second, but four can never fit
        let sampler = NullSampler::new(15, &[], 2, 3, 0, |_| true);
        for index in 0..20 {
            assert!(sampler.draw(2, &mut stream_rng(1, 0, index)).is_some());
            assert!(sampler.draw(4, &mut stream_rng(1, 0, index)).is_none());
        }
    }

    #[test]
    fn test_eligibility_filter() {
        let sampler = NullSampler::new(20, &[], 1, 1, 0, |s| s % 2 == 0);
        assert!(sampler.starts.iter().all(|s| s % 2 == 0));
        assert_eq!(sampler.window_count(), 10);
    }
}
