//! Read-only status export
//!
//! A [`StatusReport`] is captured inside one actor step and formatted
//! afterwards by whoever asked for it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, SecondsFormat};
use ktimer_types::Owner;
use tokio::time::Instant;

use crate::slots::SlotTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub key: String,
    pub owner: Owner,
    pub created_at: DateTime<Local>,
    pub seconds_remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub module_name: String,
    pub elapsed: Duration,
    pub capacity_limit: usize,
    pub timers: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn capture(module_name: &str, started: Instant, now: Instant, table: &SlotTable) -> Self {
        let timers = table
            .iter()
            .map(|(_, r)| StatusEntry {
                key: r.key.clone(),
                owner: r.owner.clone(),
                created_at: r.created_wall,
                seconds_remaining: r.seconds_remaining(now),
            })
            .collect();

        Self {
            module_name: module_name.to_string(),
            elapsed: now.saturating_duration_since(started),
            capacity_limit: table.capacity_limit(),
            timers,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[MODULE_NAME]: {}", self.module_name)?;
        writeln!(f, "[MSEC]: {}", self.elapsed.as_millis())?;
        writeln!(f, "[MAX]: {}", self.capacity_limit)?;
        for timer in &self.timers {
            writeln!(f, "[MSG]: {}", timer.key)?;
            writeln!(f, "[PID]: {}", timer.owner.pid)?;
            writeln!(f, "[CMD]: {}", timer.owner.command)?;
            writeln!(
                f,
                "[CREATED]: {}",
                timer.created_at.to_rfc3339_opts(SecondsFormat::Secs, false)
            )?;
            writeln!(f, "[SEC]: {}", timer.seconds_remaining)?;
        }
        Ok(())
    }
}
