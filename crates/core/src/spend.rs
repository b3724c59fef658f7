//! Spend windows: the period over which an employee's order totals count
//! against their spending limit.

use std::time::SystemTime;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::company::{OrderRecord, ResetFrequency};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SpendWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SpendWindowCalculator;

impl SpendWindowCalculator {
    /// Periods start at local midnight in the timezone of `now`.
    pub fn compute_window<Tz: TimeZone>(
        &self,
        frequency: ResetFrequency,
        now: &DateTime<Tz>,
    ) -> SpendWindow {
        let end = now.with_timezone(&Utc);
        let today = now.date_naive();

        let start_date = match frequency {
            ResetFrequency::Never => {
                return SpendWindow { start: DateTime::<Utc>::from(SystemTime::UNIX_EPOCH), end };
            }
            ResetFrequency::Daily => today,
            ResetFrequency::Weekly => {
                today - Duration::days(i64::from(today.weekday().num_days_from_sunday()))
            }
            ResetFrequency::Monthly => today.with_day(1).unwrap_or(today),
            ResetFrequency::Yearly => NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
        };

        SpendWindow { start: local_midnight(now, start_date).min(end), end }
    }

    /// Sums totals of orders created inside `[start, end]`.
    pub fn sum_orders_in_window(&self, orders: &[OrderRecord], window: &SpendWindow) -> i64 {
        orders
            .iter()
            .filter(|order| window.contains(order.created_at))
            .fold(0_i64, |total, order| total.saturating_add(order.total))
    }
}

fn local_midnight<Tz: TimeZone>(now: &DateTime<Tz>, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match now.timezone().from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight skipped by a DST jump: reuse the current offset.
        None => {
            let offset = now.offset().fix();
            (naive - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

    use super::{SpendWindow, SpendWindowCalculator};
    use crate::domain::company::{EmployeeId, OrderRecord, ResetFrequency};

    const ALL: [ResetFrequency; 5] = [
        ResetFrequency::Never,
        ResetFrequency::Daily,
        ResetFrequency::Weekly,
        ResetFrequency::Monthly,
        ResetFrequency::Yearly,
    ];

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn order(id: &str, total: i64, created_at: DateTime<Utc>) -> OrderRecord {
        OrderRecord {
            id: id.to_string(),
            employee_id: EmployeeId("emp-1".to_string()),
            total,
            created_at,
        }
    }

    #[test]
    fn window_end_is_always_now() {
        let calculator = SpendWindowCalculator;
        let now = utc(2026, 10, 14, 15, 30);

        for frequency in ALL {
            let window = calculator.compute_window(frequency, &now);
            assert_eq!(window.end, now, "{frequency:?}");
            assert!(window.start <= window.end, "{frequency:?}");
        }
    }

    #[test]
    fn window_starts_match_each_cadence() {
        let calculator = SpendWindowCalculator;
        // Wednesday
        let now = utc(2026, 10, 14, 15, 30);

        assert_eq!(
            calculator.compute_window(ResetFrequency::Never, &now).start,
            Utc.timestamp_opt(0, 0).unwrap()
        );
        assert_eq!(
            calculator.compute_window(ResetFrequency::Daily, &now).start,
            utc(2026, 10, 14, 0, 0)
        );
        assert_eq!(
            calculator.compute_window(ResetFrequency::Weekly, &now).start,
            utc(2026, 10, 11, 0, 0)
        );
        assert_eq!(
            calculator.compute_window(ResetFrequency::Monthly, &now).start,
            utc(2026, 10, 1, 0, 0)
        );
        assert_eq!(
            calculator.compute_window(ResetFrequency::Yearly, &now).start,
            utc(2026, 1, 1, 0, 0)
        );
    }

    #[test]
    fn weekly_window_on_sunday_starts_that_morning() {
        let now = utc(2026, 10, 18, 8, 0);
        let window = SpendWindowCalculator.compute_window(ResetFrequency::Weekly, &now);
        assert_eq!(window.start, utc(2026, 10, 18, 0, 0));
    }

    #[test]
    fn window_start_uses_local_midnight() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        // 2026-10-15 01:00 local is still 2026-10-14 in UTC.
        let now = offset.with_ymd_and_hms(2026, 10, 15, 1, 0, 0).unwrap();

        let window = SpendWindowCalculator.compute_window(ResetFrequency::Daily, &now);
        assert_eq!(window.start, utc(2026, 10, 14, 22, 0));
        assert_eq!(window.end, utc(2026, 10, 14, 23, 0));
    }

    #[test]
    fn window_start_never_decreases_as_time_advances() {
        let calculator = SpendWindowCalculator;
        let origin = utc(2025, 12, 30, 22, 0);

        for frequency in ALL {
            let mut previous = calculator.compute_window(frequency, &origin).start;
            let mut cursor = origin;
            for _ in 0..200 {
                cursor += Duration::hours(7);
                let start = calculator.compute_window(frequency, &cursor).start;
                assert!(start >= previous, "{frequency:?} went backwards at {cursor}");
                previous = start;
            }
        }

        let first = calculator.compute_window(ResetFrequency::Monthly, &origin);
        let second = calculator.compute_window(ResetFrequency::Monthly, &origin);
        assert_eq!(first, second);
    }

    #[test]
    fn sum_includes_both_window_bounds() {
        let window = SpendWindow { start: utc(2026, 10, 1, 0, 0), end: utc(2026, 10, 14, 12, 0) };
        let orders = vec![
            order("before", 1_000, utc(2026, 9, 30, 23, 59)),
            order("at-start", 200, utc(2026, 10, 1, 0, 0)),
            order("inside", 300, utc(2026, 10, 7, 9, 0)),
            order("at-end", 400, utc(2026, 10, 14, 12, 0)),
            order("after", 5_000, utc(2026, 10, 14, 12, 1)),
        ];

        assert_eq!(SpendWindowCalculator.sum_orders_in_window(&orders, &window), 900);
    }

    #[test]
    fn sum_saturates_instead_of_overflowing() {
        let window = SpendWindow { start: utc(2026, 1, 1, 0, 0), end: utc(2026, 12, 31, 0, 0) };
        let orders = vec![
            order("a", i64::MAX, utc(2026, 2, 1, 0, 0)),
            order("b", 10, utc(2026, 3, 1, 0, 0)),
        ];

        assert_eq!(SpendWindowCalculator.sum_orders_in_window(&orders, &window), i64::MAX);
    }
}
