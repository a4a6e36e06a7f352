//! Conversion between UTC and the family's local time.
//!
//! Offsets are looked up for each timestamp, so dates on either side of a
//! daylight saving change get their own offset.

use time::{OffsetDateTime, PrimitiveDateTime};
use time_tz::{Offset, TimeZone, Tz};

use crate::Error;

/// Look up a canonical timezone name, e.g. "Asia/Shanghai".
///
/// # Errors
/// Returns [Error::InvalidTimezoneError] if the name is not a known timezone.
pub fn find_timezone(canonical_timezone: &str) -> Result<&'static Tz, Error> {
    time_tz::timezones::get_by_name(canonical_timezone)
        .ok_or_else(|| Error::InvalidTimezoneError(canonical_timezone.to_owned()))
}

/// Show `date_time` at the offset `timezone` had at that instant.
pub fn to_local(date_time: OffsetDateTime, timezone: &Tz) -> OffsetDateTime {
    date_time.to_offset(timezone.get_offset_utc(&date_time).to_utc())
}

/// Read a wall clock time in `timezone`.
///
/// The offset is first guessed by treating the wall clock time as UTC, then
/// corrected with the offset in force at the guessed instant.
pub fn assume_local(date_time: PrimitiveDateTime, timezone: &Tz) -> OffsetDateTime {
    let guess = timezone.get_offset_utc(&date_time.assume_utc()).to_utc();
    let offset = timezone
        .get_offset_utc(&date_time.assume_offset(guess))
        .to_utc();

    date_time.assume_offset(offset)
}

#[cfg(test)]
mod tests {
    use time::{UtcOffset, macros::datetime};

    use crate::Error;

    use super::{assume_local, find_timezone, to_local};

    #[test]
    fn shanghai_is_utc_plus_eight() {
        let shanghai = find_timezone("Asia/Shanghai").unwrap();

        let local = to_local(datetime!(2025-01-31 20:00 UTC), shanghai);

        assert_eq!(local, datetime!(2025-02-01 04:00 +8));
        assert_eq!(local.offset(), UtcOffset::from_hms(8, 0, 0).unwrap());
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        assert_eq!(
            find_timezone("Mars/Olympus_Mons"),
            Err(Error::InvalidTimezoneError("Mars/Olympus_Mons".to_owned()))
        );
    }

    #[test]
    fn offset_follows_daylight_saving() {
        let auckland = find_timezone("Pacific/Auckland").unwrap();

        let summer = to_local(datetime!(2025-01-15 00:00 UTC), auckland);
        let winter = to_local(datetime!(2025-07-15 00:00 UTC), auckland);

        assert_eq!(summer.offset(), UtcOffset::from_hms(13, 0, 0).unwrap());
        assert_eq!(winter.offset(), UtcOffset::from_hms(12, 0, 0).unwrap());
    }

    #[test]
    fn wall_clock_time_uses_offset_of_that_date() {
        let auckland = find_timezone("Pacific/Auckland").unwrap();

        let summer = assume_local(datetime!(2025-01-15 12:00), auckland);
        let winter = assume_local(datetime!(2025-07-15 12:00), auckland);

        assert_eq!(summer, datetime!(2025-01-14 23:00 UTC));
        assert_eq!(winter, datetime!(2025-07-15 00:00 UTC));
    }
}
