use chrono::{Datelike, Days, NaiveDate, Weekday};

/// Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date.week(Weekday::Mon).first_day()
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn quarter_of(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3 + 1
}

/// Fiscal week label in `YYYY-Wnn` form: calendar year paired with the ISO
/// week number, zero-padded to two digits.
pub fn fiscal_week_label(date: NaiveDate) -> String {
    format!("{}-W{:02}", date.year(), date.iso_week().week())
}

pub fn next_week(week: NaiveDate) -> NaiveDate {
    week.checked_add_days(Days::new(7)).unwrap_or(week)
}

/// Every Monday from `start` through `end` inclusive, both normalized to
/// their own week start first.
pub fn weeks_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut weeks = Vec::new();
    let mut current = week_start(start);
    let last = week_start(end);
    while current <= last {
        weeks.push(current);
        current = next_week(current);
    }
    weeks
}
