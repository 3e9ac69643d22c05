use chrono::NaiveDate;

use crate::domain::{Frequency, Weekday};

/// Whether a habit with this frequency is offered on `date`.
///
/// Daily and weekly habits are offered every day; the weekly limit is expressed
/// through `times_per_period`. A custom frequency with no days is never offered.
pub fn is_scheduled_on(frequency: &Frequency, date: NaiveDate) -> bool {
    match frequency {
        Frequency::Daily | Frequency::Weekly => true,
        Frequency::Custom(days) => days.contains(&Weekday::of(date)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    // 2024-01-01 is a Monday.
    fn week() -> impl Iterator<Item = (NaiveDate, Weekday)> {
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        Weekday::ALL
            .into_iter()
            .enumerate()
            .map(move |(i, d)| (monday + chrono::Days::new(i as u64), d))
    }

    #[test]
    fn daily_and_weekly_are_always_scheduled() {
        for (date, _) in week() {
            assert!(is_scheduled_on(&Frequency::Daily, date));
            assert!(is_scheduled_on(&Frequency::Weekly, date));
        }
    }

    #[test]
    fn custom_matches_exactly_the_allowed_weekdays() {
        let allowed: BTreeSet<_> = [Weekday::Mon, Weekday::Wed, Weekday::Sun].into();
        let freq = Frequency::Custom(allowed.clone());
        for (date, day) in week() {
            assert_eq!(is_scheduled_on(&freq, date), allowed.contains(&day), "{day:?}");
        }
    }

    #[test]
    fn every_single_day_custom_set_selects_one_weekday() {
        for target in Weekday::ALL {
            let freq = Frequency::Custom([target].into());
            let hits: Vec<_> = week()
                .filter(|(date, _)| is_scheduled_on(&freq, *date))
                .map(|(_, d)| d)
                .collect();
            assert_eq!(hits, vec![target]);
        }
    }

    #[test]
    fn empty_custom_set_is_never_scheduled() {
        let freq = Frequency::Custom(BTreeSet::new());
        assert!(week().all(|(date, _)| !is_scheduled_on(&freq, date)));
    }

    #[test]
    fn evaluation_is_repeatable() {
        let freq = Frequency::Custom([Weekday::Fri].into());
        for (date, _) in week() {
            assert_eq!(is_scheduled_on(&freq, date), is_scheduled_on(&freq, date));
        }
    }
}
