//! Period and next-run computation for scheduled reports (§4.7).

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::database::reports::ScheduleType;

/// `[start, end)` for the period a report at `now` should cover.
pub fn compute_period(schedule_type: ScheduleType, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_of_today = now.date_naive().and_hms_opt(0, 0, 0).unwrap();
    let start_of_today = Utc.from_utc_datetime(&start_of_today);

    match schedule_type {
        ScheduleType::Daily => {
            let start = start_of_today - Duration::days(1);
            (start, start_of_today)
        }
        ScheduleType::Weekly => {
            let start = start_of_today - Duration::days(7);
            (start, start_of_today)
        }
        ScheduleType::Monthly => {
            let first_of_this_month = now.date_naive().with_day(1).unwrap();
            let first_of_this_month_dt = Utc.from_utc_datetime(&first_of_this_month.and_hms_opt(0, 0, 0).unwrap());
            let last_month_end = first_of_this_month_dt;
            let prev_month_first = previous_month_first(now.date_naive());
            let prev_month_first_dt = Utc.from_utc_datetime(&prev_month_first.and_hms_opt(0, 0, 0).unwrap());
            (prev_month_first_dt, last_month_end)
        }
        ScheduleType::Custom => {
            // No fixed cadence defined for custom schedules; default to the
            // trailing 24 hours so a run still produces a bounded report.
            (now - Duration::days(1), now)
        }
    }
}

fn previous_month_first(date: NaiveDate) -> NaiveDate {
    if date.month() == 1 {
        NaiveDate::from_ymd_opt(date.year() - 1, 12, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() - 1, 1).unwrap()
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap();
    first_of_next.signed_duration_since(NaiveDate::from_ymd_opt(year, month, 1).unwrap()).num_days() as u32
}

/// Computes the next `next_run_at` strictly after `after`, for the given
/// cadence. `send_day` is ISO weekday (1=Mon..7=Sun) for weekly, and
/// day-of-month (clamped to the month's last day) for monthly; ignored for
/// daily/custom. `send_hour` is local hour (0-23) in `timezone`.
pub fn compute_next_run_at(
    schedule_type: ScheduleType,
    send_day: i32,
    send_hour: i32,
    timezone: &Tz,
    after: DateTime<Utc>,
) -> DateTime<Utc> {
    let local_after = after.with_timezone(timezone);
    let send_hour = send_hour.clamp(0, 23) as u32;

    match schedule_type {
        ScheduleType::Daily | ScheduleType::Custom => {
            let mut candidate_date = local_after.date_naive();
            let mut candidate = local_date_at_hour(timezone, candidate_date, send_hour);
            if candidate <= after {
                candidate_date = candidate_date.succ_opt().unwrap();
                candidate = local_date_at_hour(timezone, candidate_date, send_hour);
            }
            candidate
        }
        ScheduleType::Weekly => {
            let target_weekday = send_day.clamp(1, 7) as u32;
            let mut candidate_date = local_after.date_naive();
            loop {
                let candidate = local_date_at_hour(timezone, candidate_date, send_hour);
                if candidate_date.weekday().number_from_monday() == target_weekday && candidate > after {
                    break candidate;
                }
                candidate_date = candidate_date.succ_opt().unwrap();
            }
        }
        ScheduleType::Monthly => {
            let mut year = local_after.year();
            let mut month = local_after.month();
            loop {
                let last_day = days_in_month(year, month);
                let day = (send_day.clamp(1, 31) as u32).min(last_day);
                let candidate_date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
                let candidate = local_date_at_hour(timezone, candidate_date, send_hour);
                if candidate > after {
                    break candidate;
                }
                if month == 12 {
                    year += 1;
                    month = 1;
                } else {
                    month += 1;
                }
            }
        }
    }
}

fn local_date_at_hour(timezone: &Tz, date: NaiveDate, hour: u32) -> DateTime<Utc> {
    let naive = date.and_hms_opt(hour, 0, 0).unwrap();
    timezone.from_local_datetime(&naive).single().unwrap_or_else(|| timezone.from_utc_datetime(&naive)).with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_period_is_yesterday_utc_day() {
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let (start, end) = compute_period(ScheduleType::Daily, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 26, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap());
    }

    #[test]
    fn weekly_period_is_last_seven_days() {
        let now = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let (start, end) = compute_period(ScheduleType::Weekly, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 7, 20, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap());
    }

    #[test]
    fn monthly_period_is_previous_calendar_month() {
        let now = Utc.with_ymd_and_hms(2026, 7, 15, 0, 0, 0).unwrap();
        let (start, end) = compute_period(ScheduleType::Monthly, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn monthly_january_wraps_to_previous_december() {
        let now = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let (start, end) = compute_period(ScheduleType::Monthly, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn daily_next_run_lands_on_configured_hour_tomorrow() {
        let after = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let next = compute_next_run_at(ScheduleType::Daily, 0, 6, &chrono_tz::UTC, after);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 28, 6, 0, 0).unwrap());
    }

    #[test]
    fn monthly_next_run_clamps_day_to_month_end() {
        // send_day 31 in a 30-day month should clamp to the 30th.
        let after = Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap();
        let next = compute_next_run_at(ScheduleType::Monthly, 31, 6, &chrono_tz::UTC, after);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 4, 30, 6, 0, 0).unwrap());
    }

    #[test]
    fn weekly_next_run_lands_on_target_weekday() {
        // 2026-07-27 is a Monday (ISO weekday 1).
        let after = Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap();
        let next = compute_next_run_at(ScheduleType::Weekly, 3, 6, &chrono_tz::UTC, after);
        assert_eq!(next.weekday().number_from_monday(), 3);
        assert!(next > after);
    }
}
