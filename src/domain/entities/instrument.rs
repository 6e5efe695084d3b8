use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Broker-assigned identifier for a tradable contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(id: impl Into<String>) -> Self {
        InstrumentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionSide {
    Call,
    Put,
}

impl std::fmt::Display for OptionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionSide::Call => write!(f, "CE"),
            OptionSide::Put => write!(f, "PE"),
        }
    }
}

/// Option contract details as returned by instrument resolution.
#[derive(Debug, Clone)]
pub struct OptionContract {
    pub id: InstrumentId,
    pub underlying: String,
    pub strike: u32,
    pub side: OptionSide,
    pub expiry: NaiveDate,
}

/// Nearest exchange-traded strike to the current spot price.
pub fn atm_strike(spot: f64, strike_interval: u32) -> u32 {
    let interval = strike_interval as f64;
    ((spot / interval).round() * interval) as u32
}

/// Next weekly expiry (Thursday). A Thursday after market close rolls to the
/// following week.
pub fn next_weekly_expiry(reference: NaiveDateTime) -> NaiveDate {
    // Monday = 0 .. Thursday = 3
    let weekday = reference.date().weekday().num_days_from_monday();
    let mut days_until_thursday = (3 + 7 - weekday as i64) % 7;
    if days_until_thursday == 0 && reference.time().hour() >= 15 {
        days_until_thursday = 7;
    }
    reference.date() + chrono::Duration::days(days_until_thursday)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_atm_strike_rounds_to_nearest() {
        assert_eq!(atm_strike(51_223.0, 100), 51_200);
        assert_eq!(atm_strike(51_250.0, 100), 51_300);
        assert_eq!(atm_strike(114.0, 100), 100);
    }

    #[test]
    fn test_next_weekly_expiry_midweek() {
        // Monday 2024-07-01 -> Thursday 2024-07-04
        let expiry = next_weekly_expiry(dt(2024, 7, 1, 10, 0));
        assert_eq!(expiry, NaiveDate::from_ymd_opt(2024, 7, 4).unwrap());
    }

    #[test]
    fn test_next_weekly_expiry_thursday_morning_is_same_day() {
        let expiry = next_weekly_expiry(dt(2024, 7, 4, 10, 0));
        assert_eq!(expiry, NaiveDate::from_ymd_opt(2024, 7, 4).unwrap());
    }

    #[test]
    fn test_next_weekly_expiry_thursday_after_close_rolls_over() {
        let expiry = next_weekly_expiry(dt(2024, 7, 4, 16, 0));
        assert_eq!(expiry, NaiveDate::from_ymd_opt(2024, 7, 11).unwrap());
    }
}
