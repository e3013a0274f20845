use chrono::Timelike;
use serde::Serialize;

/// Daily local-time window `[start_hour, end_hour)` during which the high
/// target applies. Windows wrapping past midnight are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduleWindow {
    pub start_hour: f64,
    pub end_hour: f64,
}

impl ScheduleWindow {
    pub fn contains(&self, hour: f64) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

/// Fractional hour of the day, e.g. 6:30:00 -> 6.5.
pub fn hour_of_day<T: Timelike>(t: &T) -> f64 {
    t.hour() as f64 + (t.minute() as f64 / 60.0) + (t.second() as f64 / 3600.0)
}

pub fn select_target<T: Timelike>(now: &T, window: ScheduleWindow, low: f64, high: f64) -> f64 {
    if window.contains(hour_of_day(now)) {
        high
    } else {
        low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    const WINDOW: ScheduleWindow = ScheduleWindow { start_hour: 6.5, end_hour: 20.5 };

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn hour_of_day_is_fractional() {
        assert_eq!(hour_of_day(&at(6, 30, 0)), 6.5);
        assert_eq!(hour_of_day(&at(20, 15, 0)), 20.25);
        assert!((hour_of_day(&at(0, 0, 36)) - 0.01).abs() < 1e-12);
    }

    #[test]
    fn window_is_half_open() {
        assert_eq!(select_target(&at(12, 0, 0), WINDOW, 16.0, 19.0), 19.0);
        assert_eq!(select_target(&at(3, 0, 0), WINDOW, 16.0, 19.0), 16.0);
        assert_eq!(select_target(&at(20, 30, 0), WINDOW, 16.0, 19.0), 16.0);
        assert_eq!(select_target(&at(6, 30, 0), WINDOW, 16.0, 19.0), 19.0);
    }

    #[test]
    fn last_second_before_end_is_inside() {
        assert_eq!(select_target(&at(20, 29, 59), WINDOW, 16.0, 19.0), 19.0);
        assert_eq!(select_target(&at(6, 29, 59), WINDOW, 16.0, 19.0), 16.0);
    }
}
