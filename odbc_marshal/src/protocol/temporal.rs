use crate::error::{MarshalError, Result};
use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike,
};
use odbc_api::sys::{Date, Time, Timestamp};

/// Offsets beyond ±14:00 are rejected rather than wrapped.
pub const MAX_OFFSET_MINUTES: i32 = 14 * 60;
const MIN_YEAR: i32 = 1;
const MAX_YEAR: i32 = 9999;

/// `SQL_SS_TIMESTAMPOFFSET_STRUCT`. `fraction` is in nanoseconds and the
/// offset fields carry the same sign.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTimeOffsetStruct {
    pub year: i16,
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub fraction: u32,
    pub timezone_hour: i16,
    pub timezone_minute: i16,
}

fn check_year(year: i32) -> Result<i16> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(MarshalError::Range(format!(
            "year {} is outside {}..={}",
            year, MIN_YEAR, MAX_YEAR
        )));
    }
    Ok(year as i16)
}

/// Nanosecond fraction truncated to microsecond precision.
fn fraction_nanos(nanos: u32) -> u32 {
    // chrono encodes leap seconds as nanos >= 1e9
    (nanos % 1_000_000_000) / 1_000 * 1_000
}

pub fn date_to_sql(value: &NaiveDate) -> Result<Date> {
    Ok(Date {
        year: check_year(value.year())?,
        month: value.month() as u16,
        day: value.day() as u16,
    })
}

pub fn time_to_sql(value: &NaiveTime) -> Time {
    Time {
        hour: value.hour() as u16,
        minute: value.minute() as u16,
        second: value.second() as u16,
    }
}

pub fn datetime_to_sql(value: &NaiveDateTime) -> Result<Timestamp> {
    Ok(Timestamp {
        year: check_year(value.year())?,
        month: value.month() as u16,
        day: value.day() as u16,
        hour: value.hour() as u16,
        minute: value.minute() as u16,
        second: value.second() as u16,
        fraction: fraction_nanos(value.nanosecond()),
    })
}

pub fn datetimeoffset_to_sql(value: &DateTime<FixedOffset>) -> Result<DateTimeOffsetStruct> {
    let offset_minutes = value.offset().local_minus_utc() / 60;
    if offset_minutes.abs() > MAX_OFFSET_MINUTES {
        return Err(MarshalError::Range(format!(
            "timezone offset of {} minutes exceeds ±14:00",
            offset_minutes
        )));
    }
    let local = value.naive_local();
    Ok(DateTimeOffsetStruct {
        year: check_year(local.year())?,
        month: local.month() as u16,
        day: local.day() as u16,
        hour: local.hour() as u16,
        minute: local.minute() as u16,
        second: local.second() as u16,
        fraction: fraction_nanos(local.nanosecond()),
        timezone_hour: (offset_minutes / 60) as i16,
        timezone_minute: (offset_minutes % 60) as i16,
    })
}

pub fn date_from_sql(value: &Date) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(value.year as i32, value.month as u32, value.day as u32).ok_or_else(
        || {
            MarshalError::Range(format!(
                "invalid date {:04}-{:02}-{:02}",
                value.year, value.month, value.day
            ))
        },
    )
}

pub fn time_from_sql(value: &Time) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(value.hour as u32, value.minute as u32, value.second as u32)
        .ok_or_else(|| {
            MarshalError::Range(format!(
                "invalid time {:02}:{:02}:{:02}",
                value.hour, value.minute, value.second
            ))
        })
}

fn naive_from_parts(
    (year, month, day): (i16, u16, u16),
    (hour, minute, second): (u16, u16, u16),
    fraction: u32,
) -> Result<NaiveDateTime> {
    let date = date_from_sql(&Date { year, month, day })?;
    let time = NaiveTime::from_hms_micro_opt(
        hour as u32,
        minute as u32,
        second as u32,
        fraction / 1_000,
    )
    .ok_or_else(|| {
        MarshalError::Range(format!(
            "invalid time {:02}:{:02}:{:02}.{:09}",
            hour, minute, second, fraction
        ))
    })?;
    Ok(NaiveDateTime::new(date, time))
}

pub fn datetime_from_sql(value: &Timestamp) -> Result<NaiveDateTime> {
    naive_from_parts(
        (value.year, value.month, value.day),
        (value.hour, value.minute, value.second),
        value.fraction,
    )
}

pub fn datetimeoffset_from_sql(value: &DateTimeOffsetStruct) -> Result<DateTime<FixedOffset>> {
    let offset_minutes = value.timezone_hour as i32 * 60 + value.timezone_minute as i32;
    if offset_minutes.abs() > MAX_OFFSET_MINUTES {
        return Err(MarshalError::Range(format!(
            "timezone offset of {} minutes exceeds ±14:00",
            offset_minutes
        )));
    }
    let local = naive_from_parts(
        (value.year, value.month, value.day),
        (value.hour, value.minute, value.second),
        value.fraction,
    )?;
    let offset = FixedOffset::east_opt(offset_minutes * 60)
        .ok_or_else(|| MarshalError::Range(format!("invalid offset {}", offset_minutes)))?;
    offset
        .from_local_datetime(&local)
        .single()
        .ok_or_else(|| MarshalError::Range(format!("ambiguous local time {}", local)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_dt(secs: i32, y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(secs)
            .unwrap()
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_timestamp_fraction_truncates_to_micros() {
        let value = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_nano_opt(13, 45, 10, 123_456_789)
            .unwrap();
        let ts = datetime_to_sql(&value).unwrap();
        assert_eq!(ts.fraction, 123_456_000);
        let back = datetime_from_sql(&ts).unwrap();
        assert_eq!(back.nanosecond(), 123_456_000);
        assert_eq!(back.date(), value.date());
    }

    #[test]
    fn test_date_year_out_of_range() {
        let date = NaiveDate::from_ymd_opt(10_000, 1, 1).unwrap();
        assert!(matches!(date_to_sql(&date), Err(MarshalError::Range(_))));
    }

    #[test]
    fn test_invalid_fetched_date_is_range_error() {
        let bad = Date {
            year: 2023,
            month: 2,
            day: 30,
        };
        assert!(matches!(date_from_sql(&bad), Err(MarshalError::Range(_))));
    }

    #[test]
    fn test_offset_negative_half_hour() {
        let dt = offset_dt(-(3 * 3600 + 30 * 60), 2023, 7, 1, 8, 15, 0);
        let packed = datetimeoffset_to_sql(&dt).unwrap();
        assert_eq!(packed.hour, 8);
        assert_eq!(packed.timezone_hour, -3);
        assert_eq!(packed.timezone_minute, -30);
        assert_eq!(datetimeoffset_from_sql(&packed).unwrap(), dt);
    }

    #[test]
    fn test_offset_at_limit_is_accepted() {
        let dt = offset_dt(14 * 3600, 2023, 1, 1, 0, 0, 0);
        assert!(datetimeoffset_to_sql(&dt).is_ok());
    }

    #[test]
    fn test_offset_beyond_limit_fails_fast() {
        let dt = offset_dt(14 * 3600 + 60, 2023, 1, 1, 0, 0, 0);
        assert!(matches!(
            datetimeoffset_to_sql(&dt),
            Err(MarshalError::Range(_))
        ));
        let packed = DateTimeOffsetStruct {
            year: 2023,
            month: 1,
            day: 1,
            timezone_hour: -15,
            ..Default::default()
        };
        assert!(datetimeoffset_from_sql(&packed).is_err());
    }

    #[test]
    fn test_time_round_trip() {
        let t = NaiveTime::from_hms_opt(23, 59, 58).unwrap();
        assert_eq!(time_from_sql(&time_to_sql(&t)).unwrap(), t);
    }
}
