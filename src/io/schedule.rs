//! CSV loader for daily schedules.
//!
//! Files carry a header row followed by `time,value` records, for example:
//!
//! ```text
//! time,value
//! 00:00:00,0.12
//! 00:00:02,-0.30
//! ```

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveTime;
use thiserror::Error;

use crate::sim::schedule::{Schedule, ScheduleRow};

/// Default time-of-day format for schedule files.
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("cannot open schedule \"{path}\": {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{origin}: {source}")]
    Csv {
        origin: String,
        #[source]
        source: csv::Error,
    },
    #[error("{origin}, line {line}: {message}")]
    Row {
        origin: String,
        line: u64,
        message: String,
    },
}

/// Loads a schedule from a CSV file.
///
/// # Errors
///
/// Returns a `ScheduleError` if the file cannot be opened or any row fails
/// to parse.
pub fn load_schedule(path: &Path, time_format: &str) -> Result<Schedule<f64>, ScheduleError> {
    let file = File::open(path).map_err(|source| ScheduleError::Open {
        path: path.display().to_string(),
        source,
    })?;
    read_schedule(file, time_format, &path.display().to_string())
}

/// Parses schedule CSV from any reader. Rows are sorted by time of day.
///
/// `origin` names the source in error messages.
pub fn read_schedule(reader: impl Read, time_format: &str, origin: &str) -> Result<Schedule<f64>, ScheduleError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|source| ScheduleError::Csv {
            origin: origin.to_string(),
            source,
        })?;
        let line = record.position().map_or(0, |p| p.line());
        let row_error = |message: String| ScheduleError::Row {
            origin: origin.to_string(),
            line,
            message,
        };

        if record.len() != 2 {
            return Err(row_error(format!("expected 2 fields, found {}", record.len())));
        }
        let time = NaiveTime::parse_from_str(&record[0], time_format)
            .map_err(|e| row_error(format!("bad time \"{}\": {e}", &record[0])))?;
        let value: f64 = record[1]
            .parse()
            .map_err(|e| row_error(format!("bad value \"{}\": {e}", &record[1])))?;
        if !value.is_finite() {
            return Err(row_error(format!("value \"{}\" is not finite", &record[1])));
        }
        rows.push(ScheduleRow::new(time, value));
    }

    rows.sort_by_key(|row| row.time);
    Ok(Schedule::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rows_in_time_order() {
        let csv = "time,value\n00:00:02, -0.5\n00:00:00,0.25\n";
        let schedule = read_schedule(csv.as_bytes(), DEFAULT_TIME_FORMAT, "test").unwrap();
        let values: Vec<f64> = schedule.rows().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![0.25, -0.5]);
    }

    #[test]
    fn custom_time_format() {
        let csv = "time,value\n07:30 PM,91\n";
        let schedule = read_schedule(csv.as_bytes(), "%I:%M %p", "pdm").unwrap();
        assert_eq!(schedule.rows()[0].time, NaiveTime::from_hms_opt(19, 30, 0).unwrap());
    }

    #[test]
    fn bad_value_names_the_line() {
        let csv = "time,value\n00:00:00,0.1\n00:00:02,abc\n";
        let err = read_schedule(csv.as_bytes(), DEFAULT_TIME_FORMAT, "reg_a.csv").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("reg_a.csv, line 3"), "{msg}");
        assert!(msg.contains("abc"));
    }

    #[test]
    fn bad_time_is_rejected() {
        let csv = "time,value\n25:00:00,0.1\n";
        assert!(matches!(
            read_schedule(csv.as_bytes(), DEFAULT_TIME_FORMAT, "x"),
            Err(ScheduleError::Row { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = load_schedule(Path::new("/nonexistent/schedule.csv"), DEFAULT_TIME_FORMAT);
        assert!(matches!(err, Err(ScheduleError::Open { .. })));
    }
}
