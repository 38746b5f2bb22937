// Injectable clock and the market-session classifier.
//
// Session-window logic is a pure function of a `NaiveDateTime` so it can be
// tested with fixed timestamps; only `SystemClock` reads the real clock.

use chrono::{Datelike, Local, NaiveDateTime, Timelike, Weekday};

/// Source of "now" in local time. Injected into the reconciler instead of
/// ambient `Local::now()` calls.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The real system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Name keywords marking funds that track international (QDII) markets.
const INTERNATIONAL_KEYWORDS: [&str; 8] = [
    "标普", "纳斯达克", "美国", "海外", "QDII", "全球", "恒生", "港股",
];

/// Whether a fund name indicates an international-market fund that deserves
/// a session annotation.
pub fn is_international(name: &str) -> bool {
    INTERNATIONAL_KEYWORDS.iter().any(|kw| name.contains(kw))
}

/// US market session annotation for a local timestamp, if the US session
/// window applies. The regular session runs 21:30–04:00 local (UTC+8);
/// inside that window weekends report the market closed.
pub fn us_market_session(now: NaiveDateTime) -> Option<&'static str> {
    let (hour, minute) = (now.hour(), now.minute());
    let in_window = (hour == 21 && minute >= 30) || hour > 21 || hour < 4;
    if !in_window {
        return None;
    }
    match now.weekday() {
        Weekday::Sat | Weekday::Sun => Some("[美股休市]"),
        _ => Some("[美股交易中]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn weekday_inside_window_is_trading() {
        // 2026-08-25 is a Tuesday.
        assert_eq!(us_market_session(at(2026, 8, 25, 22, 0)), Some("[美股交易中]"));
        assert_eq!(us_market_session(at(2026, 8, 25, 3, 59)), Some("[美股交易中]"));
    }

    #[test]
    fn window_opens_at_21_30() {
        assert_eq!(us_market_session(at(2026, 8, 25, 21, 29)), None);
        assert_eq!(us_market_session(at(2026, 8, 25, 21, 30)), Some("[美股交易中]"));
    }

    #[test]
    fn window_closes_at_04_00() {
        assert_eq!(us_market_session(at(2026, 8, 25, 4, 0)), None);
    }

    #[test]
    fn daytime_has_no_annotation() {
        assert_eq!(us_market_session(at(2026, 8, 25, 14, 30)), None);
    }

    #[test]
    fn weekend_inside_window_is_closed() {
        // 2026-08-22 is a Saturday, 2026-08-23 a Sunday.
        assert_eq!(us_market_session(at(2026, 8, 22, 22, 0)), Some("[美股休市]"));
        assert_eq!(us_market_session(at(2026, 8, 23, 2, 0)), Some("[美股休市]"));
    }

    #[test]
    fn international_keywords_match() {
        assert!(is_international("标普500ETF"));
        assert!(is_international("华夏恒生互联网指数"));
        assert!(is_international("易方达全球成长精选(QDII)"));
        assert!(!is_international("沪深300ETF"));
    }
}
