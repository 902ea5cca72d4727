//! Subscriber cursor
//!
//! Incremental reader over an `EventLog` for one plot view. Each cursor
//! keeps its own position, so the log never tracks who has read what:
//! - `new` backfills every target series from the log once;
//! - `refresh` scans only frames appended since the previous call;
//! - `add_target` rebuilds all series with a full rescan, which makes
//!   repeatedly adding targets quadratic in the log length;
//! - `remove_target` just drops the series.
//!
//! Invariant: `next_index <= log.len()`.

use crate::data::EventLog;
use crate::link::proto::Frame;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One series sample: epoch seconds and the numeric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub time: f64,
    pub value: f64,
}

/// How much of the log a (re)built cursor reads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backfill {
    /// Every frame present at creation time.
    #[default]
    Full,
    /// All but the newest frame present at creation time. That frame is
    /// never read, since the position is still set to the log length.
    ///
    /// `add_target` rescans with the same rule, so it also drops the point
    /// of whatever frame is newest at that moment from every series, even
    /// one an earlier `refresh` already delivered.
    SkipLast,
}

#[derive(Debug, Clone)]
pub struct SubscriberCursor {
    targets: Vec<String>,
    series: HashMap<String, Vec<Point>>,
    next_index: usize,
    backfill: Backfill,
}

impl SubscriberCursor {
    pub fn new<I, S>(targets: I, log: &EventLog) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_backfill(targets, log, Backfill::Full)
    }

    pub fn with_backfill<I, S>(targets: I, log: &EventLog, backfill: Backfill) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cursor = Self {
            targets: Vec::new(),
            series: HashMap::new(),
            next_index: 0,
            backfill,
        };
        for target in targets {
            let target = target.into();
            if !cursor.series.contains_key(&target) {
                cursor.series.insert(target.clone(), Vec::new());
                cursor.targets.push(target);
            }
        }
        cursor.rebuild(log);
        cursor
    }

    /// Adds a target and rescans the whole log. Returns false if the
    /// property was already a target.
    pub fn add_target(&mut self, property: &str, log: &EventLog) -> bool {
        if self.has_target(property) {
            return false;
        }
        self.targets.push(property.to_string());
        self.series.insert(property.to_string(), Vec::new());
        self.rebuild(log);
        true
    }

    /// Drops a target and its series. Returns false if it was not a target.
    pub fn remove_target(&mut self, property: &str) -> bool {
        match self.targets.iter().position(|t| t == property) {
            Some(pos) => {
                self.targets.remove(pos);
                self.series.remove(property);
                true
            }
            None => false,
        }
    }

    /// Appends matches among frames added since the last scan. Returns the
    /// number of points added; zero when nothing new arrived.
    pub fn refresh(&mut self, log: &EventLog) -> usize {
        let end = log.len();
        debug_assert!(self.next_index <= end, "cursor ahead of the log");
        let start = self.next_index.min(end);
        let added = self.scan(log, start, end);
        self.next_index = end;
        added
    }

    pub fn series(&self, property: &str) -> Option<&[Point]> {
        self.series.get(property).map(Vec::as_slice)
    }

    /// Targets in the order they were added.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn has_target(&self, property: &str) -> bool {
        self.series.contains_key(property)
    }

    /// Index of the first frame not yet read.
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn backfill(&self) -> Backfill {
        self.backfill
    }

    /// Total points across all series.
    pub fn point_count(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    fn rebuild(&mut self, log: &EventLog) {
        for points in self.series.values_mut() {
            points.clear();
        }
        let len = log.len();
        let end = match self.backfill {
            Backfill::Full => len,
            Backfill::SkipLast => len.saturating_sub(1),
        };
        let added = self.scan(log, 0, end);
        self.next_index = len;
        debug!(
            "cursor rebuilt over {} frames: {} points for {} targets",
            end,
            added,
            self.targets.len()
        );
    }

    fn scan(&mut self, log: &EventLog, start: usize, end: usize) -> usize {
        let mut added = 0;
        for frame in log.range(start..end) {
            let Some(property) = frame.property() else {
                continue;
            };
            let Some(points) = self.series.get_mut(property) else {
                continue;
            };
            if let Some(point) = point_of(frame) {
                points.push(point);
                added += 1;
            }
        }
        added
    }
}

fn point_of(frame: &Frame) -> Option<Point> {
    let Some(time) = frame.time_key() else {
        debug!(
            "no usable timestamp in frame {}, not plotted",
            frame.sequence()
        );
        return None;
    };
    let value = match frame.value() {
        Some(v) => v,
        None => {
            warn!(
                "value {:?} of {} is not numeric, plotted as 0",
                frame.raw_value().unwrap_or_default(),
                frame.property().unwrap_or_default()
            );
            0.0
        }
    };
    Some(Point { time, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(seq: u32, property: &str, value: f64) -> String {
        format!(
            "2024-Jan-01 10:00:{:02} {} note {} {}/C",
            seq % 60,
            seq,
            property,
            value
        )
    }

    fn push(log: &mut EventLog, text: &str) {
        log.append(Frame::parse(text).unwrap());
    }

    fn values(cursor: &SubscriberCursor, property: &str) -> Vec<f64> {
        cursor
            .series(property)
            .unwrap()
            .iter()
            .map(|p| p.value)
            .collect()
    }

    #[test]
    fn create_backfills_matching_frames() {
        let mut log = EventLog::new();
        push(&mut log, &line(1, "a", 1.0));
        push(&mut log, &line(2, "b", 2.0));
        push(&mut log, "2024-Jan-01 10:00:03 3 ACK");
        push(&mut log, &line(4, "a", 4.0));

        let cursor = SubscriberCursor::new(["a"], &log);
        assert_eq!(values(&cursor, "a"), [1.0, 4.0]);
        assert_eq!(cursor.next_index(), 4);
        assert!(cursor.series("b").is_none());
    }

    #[test]
    fn skip_last_backfill_never_reads_newest_frame() {
        let mut log = EventLog::new();
        push(&mut log, &line(1, "a", 1.0));
        push(&mut log, &line(2, "a", 2.0));

        let mut cursor = SubscriberCursor::with_backfill(["a"], &log, Backfill::SkipLast);
        assert_eq!(values(&cursor, "a"), [1.0]);
        assert_eq!(cursor.next_index(), 2);

        push(&mut log, &line(3, "a", 3.0));
        cursor.refresh(&log);
        assert_eq!(values(&cursor, "a"), [1.0, 3.0]);
    }

    #[test]
    fn skip_last_add_target_rescans_without_newest_frame() {
        let mut log = EventLog::new();
        push(&mut log, &line(1, "a", 1.0));
        let mut cursor = SubscriberCursor::with_backfill(["a"], &log, Backfill::SkipLast);
        assert!(values(&cursor, "a").is_empty());

        push(&mut log, &line(2, "a", 2.0));
        cursor.refresh(&log);
        assert_eq!(values(&cursor, "a"), [2.0]);

        assert!(cursor.add_target("b", &log));
        assert_eq!(values(&cursor, "a"), [1.0]);
        assert!(values(&cursor, "b").is_empty());
        assert_eq!(cursor.next_index(), 2);
    }

    #[test]
    fn refresh_only_reads_new_frames() {
        let mut log = EventLog::new();
        push(&mut log, &line(1, "a", 1.0));
        let mut cursor = SubscriberCursor::new(["a"], &log);

        push(&mut log, &line(2, "a", 2.0));
        push(&mut log, &line(3, "b", 3.0));
        assert_eq!(cursor.refresh(&log), 1);
        assert_eq!(values(&cursor, "a"), [1.0, 2.0]);
        assert_eq!(cursor.next_index(), 3);
    }

    #[test]
    fn refresh_is_idempotent() {
        let mut log = EventLog::new();
        push(&mut log, &line(1, "a", 1.0));
        let mut cursor = SubscriberCursor::new(["a"], &log);
        push(&mut log, &line(2, "a", 2.0));

        cursor.refresh(&log);
        let before = cursor.series("a").unwrap().to_vec();
        assert_eq!(cursor.refresh(&log), 0);
        assert_eq!(cursor.series("a").unwrap(), before.as_slice());
    }

    #[test]
    fn created_then_refreshed_equals_full_prefix() {
        let mut log = EventLog::new();
        for i in 0..5 {
            push(&mut log, &line(i, if i % 2 == 0 { "a" } else { "b" }, i as f64));
        }
        let mut cursor = SubscriberCursor::new(["a"], &log);
        for i in 5..9 {
            push(&mut log, &line(i, if i % 2 == 0 { "a" } else { "b" }, i as f64));
        }
        cursor.refresh(&log);

        let expected: Vec<f64> = log
            .iter()
            .filter(|f| f.property() == Some("a"))
            .map(|f| f.value().unwrap())
            .collect();
        assert_eq!(values(&cursor, "a"), expected);
    }

    #[test]
    fn add_target_rescans_without_duplicates() {
        let mut log = EventLog::new();
        push(&mut log, &line(1, "a", 1.0));
        push(&mut log, &line(2, "b", 2.0));
        let mut cursor = SubscriberCursor::new(["a"], &log);

        push(&mut log, &line(3, "b", 3.0));
        assert!(cursor.add_target("b", &log));
        assert!(!cursor.add_target("b", &log));
        assert_eq!(values(&cursor, "a"), [1.0]);
        assert_eq!(values(&cursor, "b"), [2.0, 3.0]);
        assert_eq!(cursor.next_index(), 3);
        assert_eq!(cursor.targets(), ["a", "b"]);

        // nothing new, nothing appended
        assert_eq!(cursor.refresh(&log), 0);
        assert_eq!(values(&cursor, "b"), [2.0, 3.0]);
    }

    #[test]
    fn remove_target_drops_series() {
        let mut log = EventLog::new();
        push(&mut log, &line(1, "a", 1.0));
        let mut cursor = SubscriberCursor::new(["a", "b"], &log);
        assert!(cursor.remove_target("a"));
        assert!(!cursor.remove_target("a"));
        assert!(cursor.series("a").is_none());

        push(&mut log, &line(2, "a", 2.0));
        cursor.refresh(&log);
        assert!(cursor.series("a").is_none());
        assert_eq!(cursor.targets(), ["b"]);
    }

    #[test]
    fn non_numeric_value_plots_as_zero() {
        let mut log = EventLog::new();
        push(&mut log, "2024-Jan-01 10:00:00 1 note mode idle");
        let cursor = SubscriberCursor::new(["mode"], &log);
        assert_eq!(values(&cursor, "mode"), [0.0]);
    }

    #[test]
    fn unparsable_timestamp_is_skipped() {
        let mut log = EventLog::new();
        push(&mut log, "later soon 1 note a 5/C");
        push(&mut log, &line(2, "a", 2.0));
        let cursor = SubscriberCursor::new(["a"], &log);
        assert_eq!(values(&cursor, "a"), [2.0]);
    }

    #[test]
    fn time_key_is_epoch_seconds() {
        let mut log = EventLog::new();
        push(&mut log, "2024-Jan-01 10:00:00 1 note de1.temp 23.5/C");
        let cursor = SubscriberCursor::new(["de1.temp"], &log);
        assert_eq!(
            cursor.series("de1.temp").unwrap(),
            [Point {
                time: 1_704_103_200.0,
                value: 23.5
            }]
        );
    }
}
