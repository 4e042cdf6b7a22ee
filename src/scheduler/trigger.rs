use chrono::{DateTime, Days, Local, TimeZone, Utc};
use serde::Deserialize;

/// Wall-clock rule for when a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Daily { hour: u32, minute: u32 },
    /// Fires at `minute` of every hour divisible by `every`.
    EveryHours { every: u32, minute: u32 },
}

impl Trigger {
    fn minute(&self) -> u32 {
        match self {
            Trigger::Daily { minute, .. } | Trigger::EveryHours { minute, .. } => *minute,
        }
    }

    fn hours(&self) -> Vec<u32> {
        match self {
            Trigger::Daily { hour, .. } => vec![*hour],
            Trigger::EveryHours { every, .. } => {
                let every = (*every).max(1);
                (0..24).filter(|h| h % every == 0).collect()
            }
        }
    }

    /// First firing strictly after `after`, in `after`'s zone. Local times that
    /// do not exist (DST gaps) are skipped; ambiguous ones use the earlier instant.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let zone = after.timezone();
        let start = after.date_naive();
        let hours = self.hours();

        for day in 0..=2 {
            let date = start.checked_add_days(Days::new(day))?;
            for hour in &hours {
                let Some(naive) = date.and_hms_opt(*hour, self.minute(), 0) else {
                    continue;
                };
                let Some(candidate) = zone.from_local_datetime(&naive).earliest() else {
                    continue;
                };
                if candidate > *after {
                    return Some(candidate);
                }
            }
        }

        None
    }
}

/// Zone the triggers' wall-clock times are read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleZone {
    #[default]
    Local,
    Utc,
}

impl ScheduleZone {
    pub fn next_fire(self, trigger: &Trigger, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleZone::Local => trigger
                .next_after(&now.with_timezone(&Local))
                .map(|next| next.with_timezone(&Utc)),
            ScheduleZone::Utc => trigger.next_after(&now),
        }
    }
}
