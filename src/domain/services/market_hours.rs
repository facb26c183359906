//! US equities session clock.
//!
//! Regular session only (09:30-16:00 America/New_York, Monday to Friday).
//! Exchange holidays are not modelled. Crypto is never gated by this clock.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc, Weekday,
};
use serde::Serialize;

use crate::domain::entities::asset::AssetClass;

const EST_OFFSET_SECS: i32 = -5 * 3600;
const EDT_OFFSET_SECS: i32 = -4 * 3600;

fn session_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN)
}

fn session_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// `n`-th `weekday` of `month` (1-based).
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let shift = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    first.checked_add_signed(Duration::days((shift + 7 * (n - 1)) as i64))
}

/// US Eastern offset in effect at `now`. DST runs from 02:00 EST on the second
/// Sunday of March to 02:00 EDT on the first Sunday of November.
pub fn eastern_offset(now: DateTime<Utc>) -> FixedOffset {
    let year = now.year();
    let est = FixedOffset::east_opt(EST_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    let edt = FixedOffset::east_opt(EDT_OFFSET_SECS).unwrap_or(est);

    let dst_start = nth_weekday(year, 3, Weekday::Sun, 2)
        .and_then(|d| d.and_hms_opt(7, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt));
    let dst_end = nth_weekday(year, 11, Weekday::Sun, 1)
        .and_then(|d| d.and_hms_opt(6, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt));

    match (dst_start, dst_end) {
        (Some(start), Some(end)) if now >= start && now < end => edt,
        _ => est,
    }
}

fn is_weekday(day: Weekday) -> bool {
    !matches!(day, Weekday::Sat | Weekday::Sun)
}

/// Whether the regular equities session is open at `now`.
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&eastern_offset(now));
    let time = local.time();
    is_weekday(local.weekday()) && time >= session_open() && time < session_close()
}

/// Whether `class` may trade at `now`.
pub fn is_tradable_now(class: AssetClass, now: DateTime<Utc>) -> bool {
    class.trades_continuously() || is_market_open(now)
}

/// 09:30 Eastern on `day`, in UTC. The offset is taken at the open itself,
/// which may differ from the offset at the start of the day around a DST change.
fn session_open_utc(day: NaiveDate) -> Option<DateTime<Utc>> {
    let naive = day.and_time(session_open());
    // Local 09:30 is 13:30 or 14:30 UTC; EST is close enough to pick the offset
    let guess = Utc.from_utc_datetime(&(naive - Duration::seconds(EST_OFFSET_SECS as i64)));
    eastern_offset(guess)
        .from_local_datetime(&naive)
        .single()
        .map(|open| open.with_timezone(&Utc))
}

/// Next session open strictly after `now` (or `now`'s session if it has not opened yet).
pub fn next_open(now: DateTime<Utc>) -> DateTime<Utc> {
    let mut day = now.with_timezone(&eastern_offset(now)).date_naive();
    for _ in 0..8 {
        if is_weekday(day.weekday()) {
            if let Some(open) = session_open_utc(day) {
                if open > now {
                    return open;
                }
            }
        }
        day = day.succ_opt().unwrap_or(day);
    }
    now
}

/// Midnight US Eastern of the day containing `now`, in UTC. Daily order
/// counts and the day-trade check reset here.
pub fn trading_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let offset = eastern_offset(now);
    let midnight = now.with_timezone(&offset).date_naive().and_time(NaiveTime::MIN);
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketSession {
    pub is_open: bool,
    pub next_open: DateTime<Utc>,
    /// Session close when currently open.
    pub closes_at: Option<DateTime<Utc>>,
    pub eastern_time: String,
}

impl MarketSession {
    pub fn at(now: DateTime<Utc>) -> Self {
        let offset = eastern_offset(now);
        let local = now.with_timezone(&offset);
        let is_open = is_market_open(now);
        let closes_at = if is_open {
            offset
                .from_local_datetime(&local.date_naive().and_time(session_close()))
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        } else {
            None
        };

        Self {
            is_open,
            next_open: next_open(now),
            closes_at,
            eastern_time: local.format("%Y-%m-%d %H:%M:%S %:z").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_nth_weekday() {
        assert_eq!(
            nth_weekday(2024, 3, Weekday::Sun, 2),
            NaiveDate::from_ymd_opt(2024, 3, 10)
        );
        assert_eq!(
            nth_weekday(2024, 11, Weekday::Sun, 1),
            NaiveDate::from_ymd_opt(2024, 11, 3)
        );
    }

    #[test]
    fn test_eastern_offset_switches() {
        assert_eq!(eastern_offset(utc(2024, 1, 15, 15, 0)).local_minus_utc(), EST_OFFSET_SECS);
        assert_eq!(eastern_offset(utc(2024, 7, 15, 15, 0)).local_minus_utc(), EDT_OFFSET_SECS);
        // 2024-03-10 02:00 EST == 07:00 UTC
        assert_eq!(eastern_offset(utc(2024, 3, 10, 6, 59)).local_minus_utc(), EST_OFFSET_SECS);
        assert_eq!(eastern_offset(utc(2024, 3, 10, 7, 0)).local_minus_utc(), EDT_OFFSET_SECS);
    }

    #[test]
    fn test_session_boundaries_winter() {
        // Monday 2024-01-15, EST: open at 14:30 UTC, close at 21:00 UTC
        assert!(!is_market_open(utc(2024, 1, 15, 14, 29)));
        assert!(is_market_open(utc(2024, 1, 15, 14, 30)));
        assert!(is_market_open(utc(2024, 1, 15, 20, 59)));
        assert!(!is_market_open(utc(2024, 1, 15, 21, 0)));
    }

    #[test]
    fn test_session_boundaries_summer() {
        // Wednesday 2024-07-17, EDT: open at 13:30 UTC
        assert!(!is_market_open(utc(2024, 7, 17, 13, 29)));
        assert!(is_market_open(utc(2024, 7, 17, 13, 30)));
        assert!(!is_market_open(utc(2024, 7, 17, 20, 0)));
    }

    #[test]
    fn test_weekend_closed() {
        // Saturday 2024-07-20 midday Eastern
        assert!(!is_market_open(utc(2024, 7, 20, 16, 0)));
        assert!(!is_tradable_now(AssetClass::UsEquity, utc(2024, 7, 20, 16, 0)));
        assert!(is_tradable_now(AssetClass::Crypto, utc(2024, 7, 20, 16, 0)));
    }

    #[test]
    fn test_next_open_over_weekend() {
        // Friday 2024-07-19 after close -> Monday 2024-07-22 13:30 UTC
        assert_eq!(next_open(utc(2024, 7, 19, 21, 0)), utc(2024, 7, 22, 13, 30));
        // Before the open on a weekday -> same day
        assert_eq!(next_open(utc(2024, 7, 17, 12, 0)), utc(2024, 7, 17, 13, 30));
    }

    #[test]
    fn test_next_open_across_dst_start() {
        // Friday 2024-03-08 evening EST -> Monday 2024-03-11 09:30 EDT == 13:30 UTC
        assert_eq!(next_open(utc(2024, 3, 8, 22, 0)), utc(2024, 3, 11, 13, 30));
    }

    #[test]
    fn test_session_open_on_dst_switch_days() {
        // Offsets change at 07:00 UTC in March and 06:00 UTC in November
        let spring = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(session_open_utc(spring), Some(utc(2024, 3, 10, 13, 30)));
        let fall = NaiveDate::from_ymd_opt(2024, 11, 3).unwrap();
        assert_eq!(session_open_utc(fall), Some(utc(2024, 11, 3, 14, 30)));
    }

    #[test]
    fn test_next_open_across_dst_end() {
        // Friday 2024-11-01 evening EDT -> Monday 2024-11-04 09:30 EST == 14:30 UTC
        assert_eq!(next_open(utc(2024, 11, 1, 22, 0)), utc(2024, 11, 4, 14, 30));
    }

    #[test]
    fn test_trading_day_start() {
        // 2024-07-17 02:00 UTC is still 2024-07-16 in New York
        assert_eq!(trading_day_start(utc(2024, 7, 17, 2, 0)), utc(2024, 7, 16, 4, 0));
        assert_eq!(trading_day_start(utc(2024, 1, 15, 15, 0)), utc(2024, 1, 15, 5, 0));
    }

    #[test]
    fn test_market_session_snapshot() {
        let session = MarketSession::at(utc(2024, 1, 15, 15, 0));
        assert!(session.is_open);
        assert_eq!(session.closes_at, Some(utc(2024, 1, 15, 21, 0)));
        assert!(session.eastern_time.ends_with("-05:00"));

        let closed = MarketSession::at(utc(2024, 1, 13, 15, 0));
        assert!(!closed.is_open);
        assert!(closed.closes_at.is_none());
    }
}
