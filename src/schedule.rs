//! Castle Rush rotation and the month calendar used by `castle-rush calendar`.

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashSet;
use std::fmt::Write as _;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CastleDay {
    pub weekday: Weekday,
    pub boss: &'static str,
    pub castle: &'static str,
}

const ROTATION: [CastleDay; 7] = [
    CastleDay { weekday: Weekday::Mon, boss: "Rudy", castle: "Guardian's Castle" },
    CastleDay { weekday: Weekday::Tue, boss: "Eileene", castle: "Fodina Castle" },
    CastleDay { weekday: Weekday::Wed, boss: "Rachel", castle: "Immortal Castle" },
    CastleDay { weekday: Weekday::Thu, boss: "Dellons", castle: "Death Castle" },
    CastleDay { weekday: Weekday::Fri, boss: "Jave", castle: "Ancient Dragon's Castle" },
    CastleDay { weekday: Weekday::Sat, boss: "Spike", castle: "Blizzard Castle" },
    CastleDay { weekday: Weekday::Sun, boss: "Kris", castle: "Hell Castle" },
];

/// Castle that runs on `date`. Every weekday has one.
pub fn castle_for(date: NaiveDate) -> CastleDay {
    ROTATION[date.weekday().num_days_from_monday() as usize]
}

/// First and last day of the month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let last = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    Some((first, last))
}

/// Weeks of the month, Sunday first. Cells outside the month are `None`.
pub fn month_grid(year: i32, month: u32) -> Option<Vec<[Option<NaiveDate>; 7]>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let lead = first.weekday().num_days_from_sunday() as usize;

    let mut weeks = Vec::new();
    let mut week = [None; 7];
    let mut slot = lead;
    let mut day = first;
    while day.month() == month {
        week[slot] = Some(day);
        slot += 1;
        if slot == 7 {
            weeks.push(week);
            week = [None; 7];
            slot = 0;
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    if slot > 0 {
        weeks.push(week);
    }
    Some(weeks)
}

/// Text calendar; days in `recorded` get a `*`.
pub fn render_month(year: i32, month: u32, recorded: &HashSet<NaiveDate>) -> Option<String> {
    let weeks = month_grid(year, month)?;
    let title = NaiveDate::from_ymd_opt(year, month, 1)?.format("%B %Y").to_string();

    let mut out = String::new();
    let _ = writeln!(out, "{title:^28}");
    out.push_str(" Sun Mon Tue Wed Thu Fri Sat\n");
    for week in weeks {
        for cell in week {
            match cell {
                Some(d) => {
                    let mark = if recorded.contains(&d) { '*' } else { ' ' };
                    let _ = write!(out, " {:>2}{}", d.day(), mark);
                }
                None => out.push_str("    "),
            }
        }
        out.push('\n');
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_castle_for_weekdays() {
        // 2026-10-18 is a Sunday
        assert_eq!(castle_for(date(2026, 10, 18)).castle, "Hell Castle");
        assert_eq!(castle_for(date(2026, 10, 19)).castle, "Guardian's Castle");
        assert_eq!(castle_for(date(2026, 10, 23)).boss, "Jave");
    }

    #[test]
    fn test_month_grid_starts_on_sunday() {
        // October 2026 starts on a Thursday
        let weeks = month_grid(2026, 10).unwrap();
        assert_eq!(weeks[0][4], Some(date(2026, 10, 1)));
        assert_eq!(weeks[0][3], None);
        let days: usize = weeks.iter().map(|w| w.iter().flatten().count()).sum();
        assert_eq!(days, 31);
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(month_bounds(2026, 10), Some((date(2026, 10, 1), date(2026, 10, 31))));
        assert_eq!(month_bounds(2028, 2), Some((date(2028, 2, 1), date(2028, 2, 29))));
        assert_eq!(month_bounds(2026, 12), Some((date(2026, 12, 1), date(2026, 12, 31))));
        assert!(month_bounds(2026, 0).is_none());
    }

    #[test]
    fn test_month_grid_rejects_bad_month() {
        assert!(month_grid(2026, 13).is_none());
    }

    #[test]
    fn test_render_marks_recorded_days() {
        let recorded: HashSet<_> = [date(2026, 10, 2)].into_iter().collect();
        let text = render_month(2026, 10, &recorded).unwrap();
        assert!(text.contains("October 2026"));
        assert!(text.contains("  2*"));
        assert!(text.contains("  3 "));
    }
}
