//! Cycle analytics: averages, regularity, current status and next-onset prediction.
//!
//! Every function here is pure and total. Insufficient or noisy data degrades to
//! the defaults below rather than failing.

use chrono::NaiveDate;

use crate::dates;
use crate::models::{CurrentStatus, CycleEvent, CycleStatistics, PeriodInterval};

pub const DEFAULT_CYCLE_LENGTH: i64 = 28;
pub const DEFAULT_PERIOD_LENGTH: i64 = 5;

/// Gaps outside `(0, MAX_CYCLE_GAP)` days are treated as outliers.
const MAX_CYCLE_GAP: i64 = 60;
/// Period lengths outside `(0, MAX_PERIOD_LENGTH)` days are treated as outliers.
const MAX_PERIOD_LENGTH: i64 = 15;
const REGULARITY_PENALTY: i64 = 5;

/// Mean gap between chronologically consecutive Start events, truncated.
///
/// Input order does not matter; dates are sorted internally.
pub fn average_cycle_length(starts: &[CycleEvent]) -> i64 {
    if starts.len() < 2 {
        return DEFAULT_CYCLE_LENGTH;
    }
    let gaps = cycle_gaps(starts);
    if gaps.is_empty() {
        return DEFAULT_CYCLE_LENGTH;
    }
    gaps.iter().sum::<i64>() / gaps.len() as i64
}

/// Mean inclusive length of paired periods, truncated.
///
/// Pairing follows the order of `ends` as supplied: each Start takes the first End
/// dated on or after it. Pass `ends` oldest-first for earliest-match pairing.
pub fn average_period_length(starts: &[CycleEvent], ends: &[CycleEvent]) -> i64 {
    let lengths: Vec<i64> = period_intervals(starts, ends)
        .iter()
        .filter_map(PeriodInterval::length)
        .filter(|len| *len > 0 && *len < MAX_PERIOD_LENGTH)
        .collect();

    if lengths.is_empty() {
        return DEFAULT_PERIOD_LENGTH;
    }
    lengths.iter().sum::<i64>() / lengths.len() as i64
}

/// Consistency of cycle lengths on a 0-100 scale.
///
/// Needs at least three Starts yielding two valid gaps; otherwise 0.
pub fn regularity(starts: &[CycleEvent]) -> u8 {
    if starts.len() < 3 {
        return 0;
    }
    let gaps = cycle_gaps(starts);
    if gaps.len() < 2 {
        return 0;
    }

    // Truncate at each step, matching the stored scores users have already seen.
    let count = gaps.len() as i64;
    let mean = gaps.iter().sum::<i64>() / count;
    let deviation_sum: i64 = gaps.iter().map(|gap| (gap - mean).abs()).sum();
    let mean_deviation = deviation_sum / count;

    (100 - mean_deviation * REGULARITY_PENALTY).clamp(0, 100) as u8
}

pub fn predict_next_onset(last_start: NaiveDate, average_cycle_length: i64) -> NaiveDate {
    dates::add_days(last_start, average_cycle_length)
}

/// Where `today` falls relative to the most recent period.
///
/// `starts` and `ends` must be newest-first, as the event store returns them.
pub fn current_status(
    starts: &[CycleEvent],
    ends: &[CycleEvent],
    average_cycle_length: i64,
    today: NaiveDate,
) -> CurrentStatus {
    let Some(latest) = starts.first() else {
        return CurrentStatus::default();
    };
    let last_start = latest.day();
    let last_end = ends.iter().map(CycleEvent::day).find(|end| *end >= last_start);

    let is_active = match last_end {
        Some(end) if end >= last_start => last_start < today && today <= end,
        // Still open, or the only end predates the start.
        _ => today >= last_start,
    };
    let current_day = if is_active {
        dates::days_between(last_start, today) + 1
    } else {
        0
    };

    CurrentStatus {
        is_active,
        current_day,
        last_start: Some(last_start),
        last_end,
        next_predicted_onset: Some(predict_next_onset(last_start, average_cycle_length)),
    }
}

/// All three statistics in one pass over the same snapshot.
pub fn cycle_statistics(starts: &[CycleEvent], ends: &[CycleEvent]) -> CycleStatistics {
    CycleStatistics {
        average_cycle_length: average_cycle_length(starts),
        average_period_length: average_period_length(starts, ends),
        regularity: regularity(starts),
    }
}

/// Pair each Start with the first End in `ends` that falls on or after it.
pub fn period_intervals(starts: &[CycleEvent], ends: &[CycleEvent]) -> Vec<PeriodInterval> {
    starts
        .iter()
        .map(|start| {
            let start = start.day();
            let end = ends.iter().map(CycleEvent::day).find(|end| *end >= start);
            PeriodInterval { start, end }
        })
        .collect()
}

fn cycle_gaps(starts: &[CycleEvent]) -> Vec<i64> {
    let mut days: Vec<NaiveDate> = starts.iter().map(CycleEvent::day).collect();
    days.sort();

    days.windows(2)
        .map(|w| dates::days_between(w[0], w[1]))
        .filter(|gap| *gap > 0 && *gap < MAX_CYCLE_GAP)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;
    use proptest::prelude::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn event(s: &str, kind: EventKind) -> CycleEvent {
        CycleEvent::new(day(s).and_hms_opt(9, 30, 0).unwrap(), kind)
    }

    fn starts(dates: &[&str]) -> Vec<CycleEvent> {
        dates.iter().map(|d| event(d, EventKind::Start)).collect()
    }

    fn ends(dates: &[&str]) -> Vec<CycleEvent> {
        dates.iter().map(|d| event(d, EventKind::End)).collect()
    }

    /// Start events spaced by `gaps`, newest-first.
    fn starts_from_gaps(gaps: &[i64]) -> Vec<CycleEvent> {
        let mut current = day("2020-01-01");
        let mut out = vec![CycleEvent::new(current.and_hms_opt(8, 0, 0).unwrap(), EventKind::Start)];
        for gap in gaps {
            current = dates::add_days(current, *gap);
            out.push(CycleEvent::new(current.and_hms_opt(8, 0, 0).unwrap(), EventKind::Start));
        }
        out.reverse();
        out
    }

    #[test]
    fn defaults_without_data() {
        assert_eq!(average_cycle_length(&[]), 28);
        assert_eq!(average_cycle_length(&starts(&["2024-01-01"])), 28);
        assert_eq!(average_period_length(&[], &[]), 5);
        assert_eq!(regularity(&starts(&["2024-01-01", "2024-01-29"])), 0);
    }

    #[test]
    fn average_cycle_ignores_input_order() {
        let newest_first = starts(&["2024-03-25", "2024-02-26", "2024-01-29", "2024-01-01"]);
        let mut oldest_first = newest_first.clone();
        oldest_first.reverse();
        assert_eq!(average_cycle_length(&newest_first), 28);
        assert_eq!(average_cycle_length(&oldest_first), 28);
    }

    #[test]
    fn average_cycle_truncates_and_filters_outliers() {
        // gaps 27, 30, 90 (outlier) -> (27 + 30) / 2 = 28
        let events = starts(&["2024-01-01", "2024-01-28", "2024-02-27", "2024-05-27"]);
        assert_eq!(average_cycle_length(&events), 28);
    }

    #[test]
    fn duplicate_start_days_are_not_a_cycle() {
        let events = starts(&["2024-01-01", "2024-01-01"]);
        assert_eq!(average_cycle_length(&events), 28);
    }

    #[test]
    fn period_length_pairs_first_end_in_supplied_order() {
        let s = starts(&["2024-01-29", "2024-01-01"]);
        let ascending = ends(&["2024-01-05", "2024-02-02"]);
        // 2024-01-01..05 = 5, 2024-01-29..02-02 = 5
        assert_eq!(average_period_length(&s, &ascending), 5);

        // Newest-first pairs the older start with the newest end: 33 days, an outlier.
        let descending = ends(&["2024-02-02", "2024-01-05"]);
        assert_eq!(average_period_length(&s, &descending), 5);
        let intervals = period_intervals(&s, &descending);
        assert_eq!(intervals[1].length(), Some(33));
    }

    #[test]
    fn period_length_truncates() {
        let s = starts(&["2024-02-01", "2024-01-01"]);
        let e = ends(&["2024-01-04", "2024-02-05"]); // 4 and 5 days
        assert_eq!(average_period_length(&s, &e), 4);
    }

    #[test]
    fn regularity_scores() {
        assert_eq!(regularity(&starts_from_gaps(&[28, 28, 28])), 100);
        // gaps 26, 30: mean 28, deviation 2 -> 90
        assert_eq!(regularity(&starts_from_gaps(&[26, 30])), 90);
        // gaps 10, 50: mean 30, deviation 20 -> 0
        assert_eq!(regularity(&starts_from_gaps(&[10, 50])), 0);
        // only one valid gap
        assert_eq!(regularity(&starts_from_gaps(&[28, 75])), 0);
    }

    #[test]
    fn predicts_across_boundaries() {
        assert_eq!(predict_next_onset(day("2023-01-20"), 28), day("2023-02-17"));
        assert_eq!(predict_next_onset(day("2024-01-20"), 29), day("2024-02-18"));
        assert_eq!(predict_next_onset(day("2023-12-15"), 28), day("2024-01-12"));
    }

    #[test]
    fn scenario_open_period() {
        let s = starts(&["2024-01-29", "2024-01-01"]);
        let e = ends(&["2024-01-05"]);
        let mut e_asc = e.clone();
        e_asc.reverse();

        let stats = cycle_statistics(&s, &e_asc);
        assert_eq!(stats.average_cycle_length, 28);
        assert_eq!(stats.average_period_length, 5);

        let status = current_status(&s, &e, stats.average_cycle_length, day("2024-01-30"));
        assert!(status.is_active);
        assert_eq!(status.current_day, 2);
        assert_eq!(status.next_predicted_onset, Some(day("2024-02-26")));
        assert_eq!(status.last_end, None);
    }

    #[test]
    fn closed_period_window_excludes_start_day() {
        let s = starts(&["2024-01-01"]);
        let e = ends(&["2024-01-05"]);

        let on_start = current_status(&s, &e, 28, day("2024-01-01"));
        assert!(!on_start.is_active);
        assert_eq!(on_start.current_day, 0);

        let inside = current_status(&s, &e, 28, day("2024-01-05"));
        assert!(inside.is_active);
        assert_eq!(inside.current_day, 5);

        let after = current_status(&s, &e, 28, day("2024-01-06"));
        assert!(!after.is_active);
        assert_eq!(after.next_predicted_onset, Some(day("2024-01-29")));
    }

    #[test]
    fn open_period_before_start_is_inactive() {
        let s = starts(&["2024-01-10"]);
        let status = current_status(&s, &[], 28, day("2024-01-09"));
        assert!(!status.is_active);
        assert_eq!(status.current_day, 0);
        assert_eq!(status.next_predicted_onset, Some(day("2024-02-07")));
    }

    #[test]
    fn no_starts_means_no_prediction() {
        let status = current_status(&[], &ends(&["2024-01-05"]), 28, day("2024-01-06"));
        assert_eq!(status, CurrentStatus::default());
    }

    fn mean_abs_deviation(gaps: &[i64]) -> i64 {
        let n = gaps.len() as i64;
        let mean = gaps.iter().sum::<i64>() / n;
        gaps.iter().map(|g| (g - mean).abs()).sum::<i64>() / n
    }

    proptest! {
        #[test]
        fn average_is_truncated_mean_of_valid_gaps(gaps in prop::collection::vec(1i64..59, 1..12)) {
            let events = starts_from_gaps(&gaps);
            let expected = gaps.iter().sum::<i64>() / gaps.len() as i64;
            prop_assert_eq!(average_cycle_length(&events), expected);
        }

        #[test]
        fn period_average_is_truncated_mean(lengths in prop::collection::vec(1i64..15, 1..8)) {
            let mut s = Vec::new();
            let mut e = Vec::new();
            let mut current = day("2021-01-01");
            for len in &lengths {
                s.push(CycleEvent::new(current.and_hms_opt(7, 0, 0).unwrap(), EventKind::Start));
                let end = dates::add_days(current, len - 1);
                e.push(CycleEvent::new(end.and_hms_opt(20, 0, 0).unwrap(), EventKind::End));
                current = dates::add_days(current, 30);
            }
            let expected = lengths.iter().sum::<i64>() / lengths.len() as i64;
            prop_assert_eq!(average_period_length(&s, &e), expected);
        }

        #[test]
        fn regularity_does_not_increase_with_deviation(
            a in prop::collection::vec(1i64..59, 2..10),
            b in prop::collection::vec(1i64..59, 2..10),
        ) {
            let (ra, rb) = (regularity(&starts_from_gaps(&a)), regularity(&starts_from_gaps(&b)));
            prop_assert!(ra <= 100 && rb <= 100);
            if mean_abs_deviation(&a) > mean_abs_deviation(&b) {
                prop_assert!(ra <= rb);
            }
        }

        #[test]
        fn prediction_is_calendar_addition(offset in 0i64..3650, cycle in 1i64..60) {
            let start = dates::add_days(day("2019-01-01"), offset);
            let predicted = predict_next_onset(start, cycle);
            prop_assert_eq!(dates::days_between(start, predicted), cycle);
        }
    }
}
