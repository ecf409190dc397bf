//! Market identification, trading sessions, and price/lot normalization tables.
//!
//! Grounded on the original system's `utils/market_hours.py` (session windows)
//! and §4.3 step 7 of the spec (HK tick table, US lot/tick defaults).

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum Market {
    Hk,
    Us,
    None,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Hk => write!(f, "HK"),
            Market::Us => write!(f, "US"),
            Market::None => write!(f, "NONE"),
        }
    }
}

impl Market {
    /// Infer market from a market-qualified symbol suffix (e.g. `AAPL.US`, `0700.HK`).
    pub fn from_symbol(symbol: &str) -> Market {
        if symbol.ends_with(".HK") {
            Market::Hk
        } else if symbol.ends_with(".US") || symbol.starts_with('^') {
            Market::Us
        } else {
            Market::None
        }
    }

    fn tz(self) -> Tz {
        match self {
            Market::Hk => chrono_tz::Asia::Hong_Kong,
            Market::Us => chrono_tz::America::New_York,
            Market::None => chrono_tz::UTC,
        }
    }
}

/// A trading session this symbol's market is currently in, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    HkMorning,
    HkAfternoon,
    UsRegular,
    UsAfterhours,
    Closed,
}

fn is_weekday(dt: &DateTime<Tz>) -> bool {
    !matches!(dt.weekday(), Weekday::Sat | Weekday::Sun)
}

fn between(t: NaiveTime, start: (u32, u32), end: (u32, u32)) -> bool {
    let start = NaiveTime::from_hms_opt(start.0, start.1, 0).expect("valid session boundary");
    let end = NaiveTime::from_hms_opt(end.0, end.1, 0).expect("valid session boundary");
    t >= start && t < end
}

/// Determine the current session for `market` at wall-clock time `now` (UTC).
///
/// HK: 09:30-12:00 and 13:00-16:00. US regular: 09:30-16:00 ET. US afterhours: 16:00-20:00 ET.
pub fn current_session(market: Market, now: DateTime<Utc>) -> Session {
    let local = now.with_timezone(&market.tz());
    if !is_weekday(&local) {
        return Session::Closed;
    }
    let t = local.time();
    match market {
        Market::Hk => {
            if between(t, (9, 30), (12, 0)) {
                Session::HkMorning
            } else if between(t, (13, 0), (16, 0)) {
                Session::HkAfternoon
            } else {
                Session::Closed
            }
        }
        Market::Us => {
            if between(t, (9, 30), (16, 0)) {
                Session::UsRegular
            } else if between(t, (16, 0), (20, 0)) {
                Session::UsAfterhours
            } else {
                Session::Closed
            }
        }
        Market::None => Session::Closed,
    }
}

pub fn is_open(market: Market, now: DateTime<Utc>) -> bool {
    !matches!(current_session(market, now), Session::Closed)
}

/// Minutes until the next session open for `market`, relative to `now`.
///
/// Walks forward day by day (capped at a week) looking for the next HK
/// morning / US regular open on a weekday.
pub fn minutes_until_open(market: Market, now: DateTime<Utc>) -> i64 {
    let local = now.with_timezone(&market.tz());
    let (open_h, open_m) = match market {
        Market::Hk => (9, 30),
        Market::Us => (9, 30),
        Market::None => return 0,
    };

    for day_offset in 0..8 {
        let candidate_date = local.date_naive() + chrono::Duration::days(day_offset);
        let candidate_open = candidate_date
            .and_hms_opt(open_h, open_m, 0)
            .expect("valid open time");
        let candidate_open_tz = candidate_open
            .and_local_timezone(market.tz())
            .single()
            .unwrap_or(local);

        if candidate_open_tz <= local {
            continue;
        }
        if matches!(candidate_open_tz.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }
        let delta = candidate_open_tz.signed_duration_since(local);
        return delta.num_minutes().max(0);
    }
    0
}

/// HK tick size for a given reference price, per the price-band table in spec §4.3 step 7.
pub fn hk_tick_size(price: Decimal) -> Decimal {
    if price <= dec!(0.25) {
        dec!(0.001)
    } else if price <= dec!(0.50) {
        dec!(0.005)
    } else if price <= dec!(10) {
        dec!(0.01)
    } else if price <= dec!(20) {
        dec!(0.02)
    } else if price <= dec!(100) {
        dec!(0.05)
    } else if price <= dec!(200) {
        dec!(0.10)
    } else if price <= dec!(500) {
        dec!(0.20)
    } else if price <= dec!(1000) {
        dec!(0.50)
    } else {
        dec!(1.00)
    }
}

/// Tick size for `market` given a reference `price`. US is a flat $0.01.
pub fn tick_size(market: Market, price: Decimal) -> Decimal {
    match market {
        Market::Hk => hk_tick_size(price),
        Market::Us | Market::None => dec!(0.01),
    }
}

/// Round `price` to the nearest tick for `market`, using round-half-away-from-zero
/// as specified in §9 Numerics.
pub fn snap_to_tick(market: Market, price: Decimal) -> Decimal {
    let tick = tick_size(market, price);
    if tick == Decimal::ZERO {
        return price;
    }
    let ticks = price / tick;
    let rounded_ticks = ticks.round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
    (rounded_ticks * tick).round_dp(4)
}

/// Board lot size for `market`. HK callers should prefer static-info lookups
/// and fall back to this default of 100 only when unavailable.
pub fn default_lot_size(market: Market) -> Decimal {
    match market {
        Market::Hk => dec!(100),
        Market::Us | Market::None => dec!(1),
    }
}

/// Round `quantity` down to a multiple of `lot_size`.
pub fn round_down_to_lot(quantity: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size <= Decimal::ZERO {
        return quantity;
    }
    (quantity / lot_size).trunc() * lot_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn market_from_symbol_suffix() {
        assert_eq!(Market::from_symbol("0700.HK"), Market::Hk);
        assert_eq!(Market::from_symbol("AAPL.US"), Market::Us);
        assert_eq!(Market::from_symbol("^VIX"), Market::Us);
        assert_eq!(Market::from_symbol("???"), Market::None);
    }

    #[test]
    fn hk_tick_table_seed_scenarios() {
        // price 85.38 -> band <=100 -> tick 0.05 -> snapped 85.40
        assert_eq!(snap_to_tick(Market::Hk, dec!(85.38)), dec!(85.40));
        // price 0.388 -> band <=0.50 -> tick 0.005 -> snapped 0.390
        assert_eq!(snap_to_tick(Market::Hk, dec!(0.388)), dec!(0.390));
        // price 150.12 -> band <=200 -> tick 0.10 -> snapped 150.10
        assert_eq!(snap_to_tick(Market::Hk, dec!(150.12)), dec!(150.10));
    }

    #[test]
    fn us_tick_is_one_cent() {
        assert_eq!(tick_size(Market::Us, dec!(123.456)), dec!(0.01));
        assert_eq!(snap_to_tick(Market::Us, dec!(123.456)), dec!(123.46));
    }

    #[test]
    fn lot_rounding_rejects_remainder() {
        assert_eq!(round_down_to_lot(dec!(250), dec!(100)), dec!(200));
        assert_eq!(round_down_to_lot(dec!(99), dec!(100)), dec!(0));
        assert_eq!(round_down_to_lot(dec!(5), dec!(1)), dec!(5));
    }

    #[test]
    fn hk_weekday_session_detection() {
        // Monday 2024-01-08 10:00 HKT = 02:00 UTC
        let monday_morning = Utc.with_ymd_and_hms(2024, 1, 8, 2, 0, 0).unwrap();
        assert_eq!(current_session(Market::Hk, monday_morning), Session::HkMorning);

        // Same day 12:30 HKT = 04:30 UTC (lunch break)
        let lunch = Utc.with_ymd_and_hms(2024, 1, 8, 4, 30, 0).unwrap();
        assert_eq!(current_session(Market::Hk, lunch), Session::Closed);
    }

    #[test]
    fn weekend_is_always_closed() {
        // Saturday
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 3, 0, 0).unwrap();
        assert!(!is_open(Market::Hk, saturday));
        assert!(!is_open(Market::Us, saturday));
    }
}
