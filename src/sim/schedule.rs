//! Daily time-of-day schedules with a forward-only lookup cursor.

use chrono::{NaiveTime, Timelike};

/// One `(time-of-day, value)` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleRow<T> {
    pub time: NaiveTime,
    pub value: T,
}

impl<T> ScheduleRow<T> {
    pub fn new(time: NaiveTime, value: T) -> Self {
        Self { time, value }
    }
}

fn same_second(a: NaiveTime, b: NaiveTime) -> bool {
    a.num_seconds_from_midnight() == b.num_seconds_from_midnight()
}

/// A schedule that repeats every day.
///
/// Rows are expected in time order. Lookups resume from the last matched
/// row and never rewind within a day, so each row fires at most once per
/// pass. When the clock wraps past midnight the cursor returns to the
/// first row.
///
/// # Examples
///
/// ```
/// use chrono::NaiveTime;
/// use vpp_dispatch::sim::schedule::{Schedule, ScheduleRow};
///
/// let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
/// let mut schedule = Schedule::new(vec![
///     ScheduleRow::new(at(8, 0), 0.5),
///     ScheduleRow::new(at(9, 0), -0.5),
/// ]);
///
/// assert_eq!(schedule.next_due(at(8, 0)).map(|r| r.value), Some(0.5));
/// assert!(schedule.next_due(at(8, 0)).is_none());
/// assert_eq!(schedule.next_due(at(9, 0)).map(|r| r.value), Some(-0.5));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Schedule<T> {
    rows: Vec<ScheduleRow<T>>,
    cursor: usize,
    last: Option<usize>,
    previous: Option<NaiveTime>,
}

impl<T> Schedule<T> {
    pub fn new(rows: Vec<ScheduleRow<T>>) -> Self {
        Self {
            rows,
            cursor: 0,
            last: None,
            previous: None,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[ScheduleRow<T>] {
        &self.rows
    }

    /// Starts the next lookup from the first row.
    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.last = None;
    }

    /// Returns the row scheduled for `now` (matched to the second), unless it
    /// already fired in this pass. A clock that moved backwards is taken as
    /// the start of a new day.
    pub fn next_due(&mut self, now: NaiveTime) -> Option<&ScheduleRow<T>> {
        if self.previous.is_some_and(|prev| now < prev) {
            self.rewind();
        }
        self.previous = Some(now);

        let found = self.rows.get(self.cursor..)?
            .iter()
            .position(|row| same_second(row.time, now))
            .map(|offset| self.cursor + offset)?;

        if self.last == Some(found) {
            return None;
        }
        self.last = Some(found);
        self.cursor = found;
        self.rows.get(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn schedule() -> Schedule<f64> {
        Schedule::new(vec![
            ScheduleRow::new(at(0, 0, 0), 0.0),
            ScheduleRow::new(at(0, 0, 2), 0.2),
            ScheduleRow::new(at(0, 0, 4), -0.4),
        ])
    }

    #[test]
    fn fires_once_per_row() {
        let mut s = schedule();
        assert_eq!(s.next_due(at(0, 0, 0)).map(|r| r.value), Some(0.0));
        assert!(s.next_due(at(0, 0, 0)).is_none());
        assert!(s.next_due(at(0, 0, 1)).is_none());
        assert_eq!(s.next_due(at(0, 0, 2)).map(|r| r.value), Some(0.2));
    }

    #[test]
    fn late_start_picks_up_current_row() {
        let mut s = schedule();
        assert_eq!(s.next_due(at(0, 0, 4)).map(|r| r.value), Some(-0.4));
        assert!(s.next_due(at(0, 0, 5)).is_none());
    }

    #[test]
    fn single_row_repeats_daily() {
        let mut s = Schedule::new(vec![ScheduleRow::new(at(0, 0, 0), 1.0)]);
        assert!(s.next_due(at(0, 0, 0)).is_some());
        assert!(s.next_due(at(0, 0, 0)).is_none());
        assert!(s.next_due(at(23, 59, 59)).is_none());
        assert!(s.next_due(at(0, 0, 0)).is_some());
    }

    #[test]
    fn wraps_on_a_new_day() {
        let mut s = schedule();
        s.next_due(at(0, 0, 2));
        s.next_due(at(0, 0, 4));
        assert!(s.next_due(at(12, 0, 0)).is_none());
        assert_eq!(s.next_due(at(0, 0, 0)).map(|r| r.value), Some(0.0));
        assert_eq!(s.next_due(at(0, 0, 2)).map(|r| r.value), Some(0.2));
    }

    #[test]
    fn empty_schedule_never_fires() {
        let mut s: Schedule<f64> = Schedule::new(Vec::new());
        assert!(s.next_due(at(0, 0, 0)).is_none());
    }
}
