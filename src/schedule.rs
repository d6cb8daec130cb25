//! Cron-style scheduling: a resource runs at listed `HH:MM` times on listed weekdays.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Weekday};

use crate::error::{Result, SyncError};
use crate::resource::ResourceDefinition;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    times: Vec<NaiveTime>,
    days: Vec<Weekday>,
}

impl CronSchedule {
    pub fn from_definition(definition: &ResourceDefinition) -> Result<Self> {
        let mut times = definition
            .cron_times()
            .into_iter()
            .map(|raw| {
                NaiveTime::parse_from_str(raw, "%H:%M").map_err(|_| {
                    SyncError::Config(format!(
                        "resource '{}' has invalid cron time '{}'",
                        definition.id, raw
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        times.sort();
        let days = definition
            .cron_days()
            .into_iter()
            .map(|raw| {
                raw.parse::<Weekday>().map_err(|_| {
                    SyncError::Config(format!(
                        "resource '{}' has invalid cron day '{}'",
                        definition.id, raw
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { times, days })
    }

    pub fn is_enabled(&self) -> bool {
        !self.times.is_empty() && !self.days.is_empty()
    }

    fn slots_on<Tz: TimeZone>(&self, date: NaiveDate, tz: &Tz) -> Vec<DateTime<Tz>> {
        if !self.days.contains(&date.weekday()) {
            return Vec::new();
        }
        self.times
            .iter()
            .filter_map(|time| tz.from_local_datetime(&date.and_time(*time)).earliest())
            .collect()
    }

    /// Latest slot today that is not in the future.
    pub fn last_slot<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.slots_on(now.date_naive(), &now.timezone())
            .into_iter()
            .filter(|slot| slot <= now)
            .last()
    }

    pub fn is_due<Tz: TimeZone>(&self, last_start: Option<i64>, now: &DateTime<Tz>) -> bool {
        match self.last_slot(now) {
            Some(slot) => last_start.map_or(true, |last| last < slot.timestamp()),
            None => false,
        }
    }

    /// Now if due, otherwise the first upcoming slot within the next eight days.
    pub fn next_run<Tz: TimeZone>(
        &self,
        last_start: Option<i64>,
        now: &DateTime<Tz>,
    ) -> Option<DateTime<Tz>> {
        if self.is_due(last_start, now) {
            return Some(now.clone());
        }
        let today = now.date_naive();
        (0..=8u64)
            .filter_map(|offset| today.checked_add_days(Days::new(offset)))
            .flat_map(|date| self.slots_on(date, &now.timezone()))
            .find(|slot| slot > now)
    }
}

pub fn is_due<Tz: TimeZone>(
    definition: &ResourceDefinition,
    last_start: Option<i64>,
    now: &DateTime<Tz>,
) -> Result<bool> {
    Ok(CronSchedule::from_definition(definition)?.is_due(last_start, now))
}

pub fn next_run<Tz: TimeZone>(
    definition: &ResourceDefinition,
    last_start: Option<i64>,
    now: &DateTime<Tz>,
) -> Result<Option<DateTime<Tz>>> {
    Ok(CronSchedule::from_definition(definition)?.next_run(last_start, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn definition(cron: &str, day: &str) -> ResourceDefinition {
        serde_json::from_value(json!({
            "id": "people",
            "entity_type": "node",
            "cron": cron,
            "day": day,
            "fetcher": {"plugin": "http"},
            "parser": {"plugin": "json"}
        }))
        .unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn due_after_a_slot_passes_until_it_runs() {
        // 2024-01-03 is a Wednesday.
        let def = definition("06:00,18:00", "mon,wed");
        let morning = at(2024, 1, 3, 7, 0);
        assert!(is_due(&def, None, &morning).unwrap());
        assert!(!is_due(&def, Some(at(2024, 1, 3, 6, 1).timestamp()), &morning).unwrap());
        assert!(is_due(&def, Some(at(2024, 1, 2, 23, 0).timestamp()), &morning).unwrap());
        assert!(!is_due(&def, None, &at(2024, 1, 3, 5, 59)).unwrap());
    }

    #[test]
    fn other_days_are_never_due() {
        let def = definition("06:00", "mon,wed");
        assert!(!is_due(&def, None, &at(2024, 1, 4, 12, 0)).unwrap());
    }

    #[test]
    fn next_run_looks_ahead_to_the_next_listed_day() {
        let def = definition("06:00", "mon");
        let thursday = at(2024, 1, 4, 12, 0);
        assert_eq!(next_run(&def, None, &thursday).unwrap(), Some(at(2024, 1, 8, 6, 0)));
        let empty = definition("", "mon");
        assert_eq!(next_run(&empty, None, &thursday).unwrap(), None);
    }

    #[test]
    fn invalid_entries_are_config_errors() {
        assert!(is_due(&definition("25:99", "mon"), None, &Utc::now()).is_err());
        assert!(is_due(&definition("06:00", "someday"), None, &Utc::now()).is_err());
    }
}
