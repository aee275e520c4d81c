//! Gap-bridging run segmentation
//!
//! Turns a per-timestep exceedance classification into candidate runs. Missing
//! steps are neutral: they neither extend a run's duration nor count toward the
//! sub-threshold gap that splits it. Steps outside the focus season close any
//! open run, so every season is segmented on its own.

/// Classification of one timestep against the detection threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Exceeding,
    Below,
    /// Invalid sample, masked, or no baseline
    Missing,
    /// Outside the focus months
    OutOfSeason,
}

/// A run of exceeding steps, possibly bridged over short sub-threshold gaps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// First exceeding index
    pub start: usize,
    /// Last exceeding index
    pub end: usize,
    pub exceeding: usize,
    /// No observed sub-threshold step precedes the run
    pub open_start: bool,
    /// The series ended before the run was closed by a gap longer than `max_gap`
    pub open_end: bool,
}

impl Candidate {
    #[inline]
    pub fn truncated(&self) -> bool {
        self.open_start || self.open_end
    }
}

/// Segment `states` into candidate runs.
///
/// A run closes once more than `max_gap` consecutive `Below` steps follow its
/// last exceeding step, or as soon as an `OutOfSeason` step is reached.
pub fn segment(states: &[StepState], max_gap: usize) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut current: Option<Candidate> = None;
    let mut gap = 0;
    let mut seen_below = false;

    for (i, state) in states.iter().enumerate() {
        match state {
            StepState::Exceeding => {
                match current.as_mut() {
                    Some(run) => {
                        run.end = i;
                        run.exceeding += 1;
                    }
                    None => {
                        current = Some(Candidate {
                            start: i,
                            end: i,
                            exceeding: 1,
                            open_start: !seen_below,
                            open_end: false,
                        });
                    }
                }
                gap = 0;
            }
            StepState::Below => {
                seen_below = true;
                if current.is_some() {
                    gap += 1;
                    if gap > max_gap {
                        candidates.extend(current.take());
                        gap = 0;
                    }
                }
            }
            StepState::Missing => {}
            StepState::OutOfSeason => {
                candidates.extend(current.take());
                gap = 0;
            }
        }
    }

    if let Some(mut run) = current {
        run.open_end = true;
        candidates.push(run);
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use StepState::{Below as B, Exceeding as E, Missing as M, OutOfSeason as O};

    #[test]
    fn test_gap_within_limit_is_bridged() {
        let runs = segment(&[B, E, E, B, E, B, B], 1);
        assert_eq!(runs.len(), 1);
        assert_eq!((runs[0].start, runs[0].end, runs[0].exceeding), (1, 4, 3));
        assert!(!runs[0].truncated());
    }

    #[test]
    fn test_gap_beyond_limit_splits() {
        let runs = segment(&[B, E, B, B, E, E, B, B], 1);
        assert_eq!(runs.len(), 2);
        assert_eq!((runs[1].start, runs[1].end), (4, 5));
    }

    #[test]
    fn test_missing_steps_are_neutral() {
        // Missing neither counts toward the gap nor toward duration
        let runs = segment(&[B, E, M, M, M, B, E, B, B], 1);
        assert_eq!(runs.len(), 1);
        assert_eq!((runs[0].start, runs[0].end, runs[0].exceeding), (1, 6, 2));
    }

    #[test]
    fn test_end_time_is_last_exceedance_not_filler() {
        let runs = segment(&[B, E, E, B, B, B], 2);
        assert_eq!(runs[0].end, 2);
    }

    #[test]
    fn test_open_runs_are_flagged() {
        let runs = segment(&[M, E, E, B, B, E], 1);
        assert_eq!(runs.len(), 2);
        assert!(runs[0].open_start && !runs[0].open_end);
        assert!(!runs[1].open_start && runs[1].open_end);
    }

    #[test]
    fn test_season_boundary_closes_run() {
        let runs = segment(&[B, E, E, O, O, O, E, E, B, B], 1);
        assert_eq!(runs.len(), 2);
        assert_eq!((runs[0].start, runs[0].end, runs[0].exceeding), (1, 2, 2));
        assert_eq!((runs[1].start, runs[1].end, runs[1].exceeding), (6, 7, 2));
        assert!(runs.iter().all(|r| !r.truncated()));
    }

    #[test]
    fn test_off_season_does_not_bridge_like_missing() {
        let bridged = segment(&[B, E, M, M, E, B, B], 1);
        let split = segment(&[B, E, O, O, E, B, B], 1);
        assert_eq!(bridged.len(), 1);
        assert_eq!(split.len(), 2);
        assert_eq!((split[0].end, split[1].start), (1, 4));
    }
}
