use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Weekly scans run on this day.
pub const WEEKLY_SCAN_DAY: Weekday = Weekday::Mon;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("unknown scan schedule '{0}' (expected hourly, daily or weekly)")]
    UnknownKind(String),

    #[error("invalid scan time '{0}' (expected HH:MM)")]
    InvalidTime(String),
}

/// Wall-clock time of day (UTC) for daily and weekly scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTime {
    pub hour: u32,
    pub minute: u32,
}

impl ScanTime {
    fn as_naive(self) -> NaiveTime {
        // hour/minute are range-checked at parse time
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for ScanTime {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidTime(s.to_string());
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
        let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(ScanTime { hour, minute })
    }
}

impl fmt::Display for ScanTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Minute 0 of every hour.
    Hourly,
    /// Every day at the given time.
    Daily(ScanTime),
    /// Every Monday at the given time.
    Weekly(ScanTime),
}

impl ScheduleKind {
    /// Parses the persisted `scan_schedule` / `scan_time` pair.
    /// `scan_time` is only consulted for daily and weekly schedules.
    pub fn parse(schedule: &str, scan_time: &str) -> Result<Self, ScheduleError> {
        match schedule.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(ScheduleKind::Hourly),
            "daily" => Ok(ScheduleKind::Daily(scan_time.parse()?)),
            "weekly" => Ok(ScheduleKind::Weekly(scan_time.parse()?)),
            other => Err(ScheduleError::UnknownKind(other.to_string())),
        }
    }

    /// The first firing time strictly after `now`.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            ScheduleKind::Hourly => {
                let hour_start = now
                    .date_naive()
                    .and_hms_opt(now.hour(), 0, 0)
                    .map(|t| t.and_utc())
                    .unwrap_or(now);
                hour_start + Duration::hours(1)
            }
            ScheduleKind::Daily(at) => {
                let candidate = now.date_naive().and_time(at.as_naive()).and_utc();
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            ScheduleKind::Weekly(at) => {
                let days_ahead = (7 + WEEKLY_SCAN_DAY.num_days_from_monday()
                    - now.weekday().num_days_from_monday())
                    % 7;
                let candidate = (now.date_naive() + Duration::days(days_ahead as i64))
                    .and_time(at.as_naive())
                    .and_utc();
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::weeks(1)
                }
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            ScheduleKind::Hourly => "hourly".to_string(),
            ScheduleKind::Daily(at) => format!("daily at {at}"),
            ScheduleKind::Weekly(at) => format!("weekly on {WEEKLY_SCAN_DAY} at {at}"),
        }
    }
}

/// Raw schedule fields of one active integration, as persisted.
#[derive(Debug, Clone)]
pub struct ScheduleRecord {
    pub integration_id: Uuid,
    pub email: String,
    pub scan_schedule: String,
    pub scan_time: String,
}

/// A validated recurring trigger for one integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSchedule {
    pub integration_id: Uuid,
    pub email: String,
    pub kind: ScheduleKind,
}

impl TryFrom<&ScheduleRecord> for ScanSchedule {
    type Error = ScheduleError;

    fn try_from(record: &ScheduleRecord) -> Result<Self, Self::Error> {
        Ok(ScanSchedule {
            integration_id: record.integration_id,
            email: record.email.clone(),
            kind: ScheduleKind::parse(&record.scan_schedule, &record.scan_time)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_parse_scan_time() {
        assert_eq!(
            "09:30".parse::<ScanTime>().unwrap(),
            ScanTime { hour: 9, minute: 30 }
        );
        assert_eq!("7:05".parse::<ScanTime>().unwrap().to_string(), "07:05");
        for bad in ["24:00", "12:60", "noon", "12", "12:xx", ""] {
            assert!(bad.parse::<ScanTime>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_parse_schedule_kinds() {
        assert_eq!(
            ScheduleKind::parse("hourly", "garbage").unwrap(),
            ScheduleKind::Hourly
        );
        assert_eq!(
            ScheduleKind::parse("Daily", "09:00").unwrap(),
            ScheduleKind::Daily(ScanTime { hour: 9, minute: 0 })
        );
        assert!(matches!(
            ScheduleKind::parse("weekly", "9am"),
            Err(ScheduleError::InvalidTime(_))
        ));
        assert!(matches!(
            ScheduleKind::parse("monthly", "09:00"),
            Err(ScheduleError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_hourly_fires_at_next_top_of_hour() {
        let kind = ScheduleKind::Hourly;
        assert_eq!(
            kind.next_fire_after(utc(2024, 3, 4, 10, 30, 15)),
            utc(2024, 3, 4, 11, 0, 0)
        );
        // Exactly on the boundary: the next one, not this one.
        assert_eq!(
            kind.next_fire_after(utc(2024, 3, 4, 11, 0, 0)),
            utc(2024, 3, 4, 12, 0, 0)
        );
        assert_eq!(
            kind.next_fire_after(utc(2024, 3, 4, 23, 59, 59)),
            utc(2024, 3, 5, 0, 0, 0)
        );
    }

    #[test]
    fn test_daily_fires_today_or_tomorrow() {
        let kind = ScheduleKind::Daily(ScanTime { hour: 9, minute: 0 });
        assert_eq!(
            kind.next_fire_after(utc(2024, 3, 4, 8, 59, 0)),
            utc(2024, 3, 4, 9, 0, 0)
        );
        assert_eq!(
            kind.next_fire_after(utc(2024, 3, 4, 9, 0, 0)),
            utc(2024, 3, 5, 9, 0, 0)
        );
        assert_eq!(
            kind.next_fire_after(utc(2024, 12, 31, 18, 0, 0)),
            utc(2025, 1, 1, 9, 0, 0)
        );
    }

    #[test]
    fn test_weekly_fires_on_monday() {
        let kind = ScheduleKind::Weekly(ScanTime { hour: 9, minute: 0 });
        // 2024-03-06 is a Wednesday.
        assert_eq!(
            kind.next_fire_after(utc(2024, 3, 6, 12, 0, 0)),
            utc(2024, 3, 11, 9, 0, 0)
        );
        // Monday before the scan time: same day.
        assert_eq!(
            kind.next_fire_after(utc(2024, 3, 11, 8, 0, 0)),
            utc(2024, 3, 11, 9, 0, 0)
        );
        // Monday after the scan time: next week.
        assert_eq!(
            kind.next_fire_after(utc(2024, 3, 11, 9, 0, 0)),
            utc(2024, 3, 18, 9, 0, 0)
        );
        // Sunday night.
        assert_eq!(
            kind.next_fire_after(utc(2024, 3, 17, 23, 0, 0)),
            utc(2024, 3, 18, 9, 0, 0)
        );
    }

    #[test]
    fn test_schedule_from_record() {
        let record = ScheduleRecord {
            integration_id: Uuid::new_v4(),
            email: "recruiter@example.com".to_string(),
            scan_schedule: "weekly".to_string(),
            scan_time: "17:45".to_string(),
        };
        let schedule = ScanSchedule::try_from(&record).unwrap();
        assert_eq!(schedule.integration_id, record.integration_id);
        assert_eq!(schedule.kind.label(), "weekly on Mon at 17:45");
    }
}
