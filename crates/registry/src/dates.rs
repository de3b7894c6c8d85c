//! Date-window expansion for query filters. Filter dates are plain
//! `YYYY-MM-DD` strings interpreted in the registry's configured zone and
//! widened to whole-day instants.

use {
    crate::error::Error,
    chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc},
    chrono_tz::Tz,
};

fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| Error::invalid_value(field, "a YYYY-MM-DD date"))
}

fn instant(date: NaiveDate, time: NaiveTime, tz: Tz, field: &str) -> Result<DateTime<Utc>, Error> {
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| Error::invalid_value(field, "a resolvable local date"))
}

/// Expands optional `dateStart`/`dateEnd` strings to the UTC instants of
/// local start-of-day and end-of-day. A start after the end is rejected.
pub fn day_window(
    date_start: Option<&str>,
    date_end: Option<&str>,
    tz: Tz,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), Error> {
    let start = date_start
        .map(|raw| parse_date(raw, "dateStart"))
        .transpose()?;
    let end = date_end.map(|raw| parse_date(raw, "dateEnd")).transpose()?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(Error::InvalidDateRange);
        }
    }
    let end_of_day =
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).expect("valid time of day");
    Ok((
        start
            .map(|date| instant(date, NaiveTime::MIN, tz, "dateStart"))
            .transpose()?,
        end.map(|date| instant(date, end_of_day, tz, "dateEnd"))
            .transpose()?,
    ))
}

#[cfg(test)]
mod tests {
    use {super::*, chrono_tz::Asia::Hong_Kong};

    #[test]
    fn expands_to_local_day_bounds() {
        let (start, end) = day_window(Some("2024-01-01"), Some("2024-01-31"), Hong_Kong).unwrap();
        // Hong Kong is UTC+8 year-round.
        assert_eq!(
            start.unwrap(),
            Utc.with_ymd_and_hms(2023, 12, 31, 16, 0, 0).unwrap()
        );
        let end = end.unwrap();
        assert_eq!(
            end.date_naive(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
        );
        assert_eq!(end.time(), NaiveTime::from_hms_micro_opt(15, 59, 59, 999_999).unwrap());
    }

    #[test]
    fn half_open_windows_are_fine() {
        let (start, end) = day_window(Some("2024-01-01"), None, Hong_Kong).unwrap();
        assert!(start.is_some());
        assert!(end.is_none());

        let (start, end) = day_window(None, None, Hong_Kong).unwrap();
        assert!(start.is_none() && end.is_none());
    }

    #[test]
    fn rejects_inverted_ranges_and_garbage() {
        assert!(matches!(
            day_window(Some("2024-02-01"), Some("2024-01-01"), Hong_Kong),
            Err(Error::InvalidDateRange)
        ));
        assert!(day_window(Some("01/02/2024"), None, Hong_Kong).is_err());
        assert!(day_window(None, Some("yesterday"), Hong_Kong).is_err());
    }

    #[test]
    fn equal_start_and_end_is_a_single_day() {
        let (start, end) = day_window(Some("2024-01-15"), Some("2024-01-15"), Hong_Kong).unwrap();
        assert!(start.unwrap() < end.unwrap());
    }
}
