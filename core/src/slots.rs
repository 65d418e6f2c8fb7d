//! Timer slot table
//!
//! Fixed-size table of [`TimerRecord`]s with an occupancy bitmap. The table
//! enforces the registry invariants on its own; it knows nothing about
//! clocks or channels beyond holding each slot's schedule handle.
//!
//! # Invariants
//!
//! - at most `capacity_limit` slots are occupied
//! - keys are unique among occupied slots
//! - `capacity_limit` is never lowered below the occupied count
//! - an empty slot has no key, deadline or schedule

use std::time::Duration;

use chrono::{DateTime, Local};
use ktimer_types::{
    KTIMER_MAX, KTIMER_MSG_MAX, MAX_DURATION_SECS, MIN_DURATION_SECS, Owner, ResetTarget,
    TimerEntry,
};
use tokio::time::Instant;

use crate::clock::ScheduleHandle;
use crate::error::RegistryError;

const _: () = assert!(
    KTIMER_MAX >= 1 && KTIMER_MAX <= 64,
    "occupancy bitmap holds at most 64 slots"
);

/// Identifies one arming of one slot.
///
/// The epoch changes on every arm, so a token from a superseded schedule
/// no longer matches its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleToken {
    pub slot: usize,
    pub epoch: u64,
}

/// A live timer.
#[derive(Debug)]
pub struct TimerRecord {
    pub key: String,
    pub deadline: Instant,
    pub owner: Owner,
    pub created_at: Instant,
    pub created_wall: DateTime<Local>,
    epoch: u64,
    schedule: Option<ScheduleHandle>,
}

impl TimerRecord {
    /// Whole seconds left before the deadline, floored, never negative.
    pub fn seconds_remaining(&self, now: Instant) -> u64 {
        self.deadline.saturating_duration_since(now).as_secs()
    }

    pub(crate) fn take_schedule(&mut self) -> Option<ScheduleHandle> {
        self.schedule.take()
    }
}

/// Check a key against the length and character rules.
pub fn validate_key(key: &str) -> Result<(), RegistryError> {
    if key.is_empty() {
        return Err(RegistryError::invalid("key must not be empty"));
    }
    if key.len() > KTIMER_MSG_MAX {
        return Err(RegistryError::invalid(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            KTIMER_MSG_MAX
        )));
    }
    if key.contains(['\n', '\r']) {
        return Err(RegistryError::invalid("key must not contain line breaks"));
    }
    Ok(())
}

/// Convert a duration in seconds, rejecting values outside 1..=86400.
pub fn validate_duration(secs: u64) -> Result<Duration, RegistryError> {
    if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&secs) {
        return Err(RegistryError::invalid(format!(
            "duration {secs}s outside {MIN_DURATION_SECS}..={MAX_DURATION_SECS}"
        )));
    }
    Ok(Duration::from_secs(secs))
}

fn check_capacity_range(n: usize) -> Result<(), RegistryError> {
    if !(1..=KTIMER_MAX).contains(&n) {
        return Err(RegistryError::OutOfRange {
            requested: n,
            max: KTIMER_MAX,
        });
    }
    Ok(())
}

pub struct SlotTable {
    slots: [Option<TimerRecord>; KTIMER_MAX],
    occupied: u64,
    capacity_limit: usize,
    next_epoch: u64,
}

impl SlotTable {
    pub fn new(capacity_limit: usize) -> Result<Self, RegistryError> {
        check_capacity_range(capacity_limit)?;
        Ok(Self {
            slots: std::array::from_fn(|_| None),
            occupied: 0,
            capacity_limit,
            next_epoch: 1,
        })
    }

    pub fn capacity_limit(&self) -> usize {
        self.capacity_limit
    }

    pub fn active_count(&self) -> usize {
        self.occupied.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn get(&self, slot: usize) -> Option<&TimerRecord> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// First occupied slot holding `key`, in slot order.
    pub fn find(&self, key: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|r| r.key == key))
    }

    /// Occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &TimerRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|r| (i, r)))
    }

    pub fn entries(&self, now: Instant) -> Vec<TimerEntry> {
        self.iter()
            .map(|(_, r)| TimerEntry {
                key: r.key.clone(),
                seconds_remaining: r.seconds_remaining(now),
            })
            .collect()
    }

    fn next_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    /// Claim the lowest free slot for a new key.
    ///
    /// The caller has already checked that `key` is not active.
    pub fn claim(
        &mut self,
        key: String,
        deadline: Instant,
        owner: Owner,
        now: Instant,
    ) -> Result<ScheduleToken, RegistryError> {
        debug_assert!(self.find(&key).is_none(), "claim with an active key");

        if self.active_count() >= self.capacity_limit {
            return Err(RegistryError::CapacityExceeded {
                limit: self.capacity_limit,
            });
        }
        let slot = (!self.occupied).trailing_zeros() as usize;
        if slot >= KTIMER_MAX {
            return Err(RegistryError::CapacityExceeded {
                limit: self.capacity_limit,
            });
        }

        let epoch = self.next_epoch();
        self.slots[slot] = Some(TimerRecord {
            key,
            deadline,
            owner,
            created_at: now,
            created_wall: Local::now(),
            epoch,
            schedule: None,
        });
        self.occupied |= 1u64 << slot;
        Ok(ScheduleToken { slot, epoch })
    }

    /// Move an occupied slot's deadline.
    ///
    /// Returns the new token and the superseded schedule, which the caller
    /// must cancel.
    pub fn rearm(
        &mut self,
        slot: usize,
        deadline: Instant,
    ) -> Option<(ScheduleToken, Option<ScheduleHandle>)> {
        let epoch = self.next_epoch();
        let record = self.slots.get_mut(slot)?.as_mut()?;
        record.deadline = deadline;
        record.epoch = epoch;
        let stale = record.schedule.take();
        Some((ScheduleToken { slot, epoch }, stale))
    }

    /// Store the schedule armed for `token`.
    ///
    /// If the slot moved on in the meantime the handle is handed back.
    pub fn attach(
        &mut self,
        token: ScheduleToken,
        handle: ScheduleHandle,
    ) -> Result<(), ScheduleHandle> {
        match self.slots.get_mut(token.slot).and_then(Option::as_mut) {
            Some(record) if record.epoch == token.epoch => {
                record.schedule = Some(handle);
                Ok(())
            }
            _ => Err(handle),
        }
    }

    /// Empty a slot, returning its record (with any schedule still attached).
    pub fn release(&mut self, slot: usize) -> Option<TimerRecord> {
        let record = self.slots.get_mut(slot)?.take()?;
        self.occupied &= !(1u64 << slot);
        Some(record)
    }

    /// Clear the slot a fired schedule belongs to.
    ///
    /// Returns `None` when the token is stale: the slot is empty or was
    /// re-armed after this schedule was created.
    pub fn expire(&mut self, token: ScheduleToken) -> Option<TimerRecord> {
        let current = self.get(token.slot)?.epoch;
        if current != token.epoch {
            return None;
        }
        self.release(token.slot)
    }

    /// Empty every slot matching `target`, in slot order.
    pub fn release_matching(&mut self, target: &ResetTarget) -> Vec<TimerRecord> {
        let matching: Vec<usize> = self
            .iter()
            .filter(|(_, r)| target.matches(&r.key))
            .map(|(i, _)| i)
            .collect();
        matching
            .into_iter()
            .filter_map(|slot| self.release(slot))
            .collect()
    }

    pub fn set_capacity_limit(&mut self, n: usize) -> Result<(), RegistryError> {
        check_capacity_range(n)?;
        let active = self.active_count();
        if n < active {
            return Err(RegistryError::BelowActiveCount {
                requested: n,
                active,
            });
        }
        self.capacity_limit = n;
        Ok(())
    }

    /// Empty the whole table.
    pub fn drain(&mut self) -> Vec<TimerRecord> {
        self.release_matching(&ResetTarget::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner::new(42, "test")
    }

    fn claim(table: &mut SlotTable, key: &str, secs: u64) -> Result<ScheduleToken, RegistryError> {
        let now = Instant::now();
        table.claim(key.to_string(), now + Duration::from_secs(secs), owner(), now)
    }

    #[test]
    fn new_rejects_capacity_outside_range() {
        assert!(matches!(
            SlotTable::new(0),
            Err(RegistryError::OutOfRange { requested: 0, .. })
        ));
        assert!(SlotTable::new(KTIMER_MAX + 1).is_err());
        assert!(SlotTable::new(KTIMER_MAX).is_ok());
    }

    #[test]
    fn claim_respects_capacity_limit() {
        let mut table = SlotTable::new(2).expect("table");
        claim(&mut table, "a", 5).expect("a");
        claim(&mut table, "b", 5).expect("b");

        let err = claim(&mut table, "c", 5).unwrap_err();
        assert_eq!(err, RegistryError::CapacityExceeded { limit: 2 });
        assert_eq!(table.active_count(), 2);
    }

    #[test]
    fn claim_takes_lowest_free_slot() {
        let mut table = SlotTable::new(KTIMER_MAX).expect("table");
        let a = claim(&mut table, "a", 5).expect("a");
        let b = claim(&mut table, "b", 5).expect("b");
        let c = claim(&mut table, "c", 5).expect("c");
        assert_eq!((a.slot, b.slot, c.slot), (0, 1, 2));

        table.release(b.slot).expect("release b");
        let d = claim(&mut table, "d", 5).expect("d");
        assert_eq!(d.slot, 1);
    }

    #[test]
    fn find_returns_active_key_only() {
        let mut table = SlotTable::new(3).expect("table");
        let a = claim(&mut table, "lunch", 5).expect("lunch");
        assert_eq!(table.find("lunch"), Some(a.slot));
        assert_eq!(table.find("dinner"), None);

        table.release(a.slot);
        assert_eq!(table.find("lunch"), None);
    }

    #[test]
    fn rearm_invalidates_previous_token() {
        let mut table = SlotTable::new(1).expect("table");
        let first = claim(&mut table, "lunch", 5).expect("lunch");

        let later = Instant::now() + Duration::from_secs(20);
        let (second, stale) = table.rearm(first.slot, later).expect("rearm");
        assert!(stale.is_none());
        assert_eq!(second.slot, first.slot);
        assert_ne!(second.epoch, first.epoch);

        // The superseded schedule fires: nothing happens.
        assert!(table.expire(first).is_none());
        assert_eq!(table.active_count(), 1);

        // The current one clears the slot.
        let record = table.expire(second).expect("expired");
        assert_eq!(record.key, "lunch");
        assert!(table.is_empty());
    }

    #[test]
    fn expire_after_reuse_leaves_new_owner_alone() {
        let mut table = SlotTable::new(1).expect("table");
        let old = claim(&mut table, "lunch", 1).expect("lunch");
        table.release(old.slot);

        let new = claim(&mut table, "dinner", 10).expect("dinner");
        assert_eq!(new.slot, old.slot);

        assert!(table.expire(old).is_none());
        assert_eq!(table.find("dinner"), Some(new.slot));
    }

    #[test]
    fn shrink_below_active_count_is_rejected() {
        let mut table = SlotTable::new(3).expect("table");
        claim(&mut table, "a", 5).expect("a");
        claim(&mut table, "b", 5).expect("b");

        assert_eq!(
            table.set_capacity_limit(1),
            Err(RegistryError::BelowActiveCount {
                requested: 1,
                active: 2
            })
        );
        assert_eq!(table.capacity_limit(), 3);
        assert_eq!(table.active_count(), 2);

        table.set_capacity_limit(2).expect("shrink to active count");
        assert_eq!(table.capacity_limit(), 2);
    }

    #[test]
    fn capacity_range_checked_before_active_count() {
        let mut table = SlotTable::new(5).expect("table");
        assert!(matches!(
            table.set_capacity_limit(0),
            Err(RegistryError::OutOfRange { .. })
        ));
        assert!(matches!(
            table.set_capacity_limit(KTIMER_MAX + 1),
            Err(RegistryError::OutOfRange { .. })
        ));
    }

    #[test]
    fn release_matching_by_key_and_all() {
        let mut table = SlotTable::new(3).expect("table");
        claim(&mut table, "a", 5).expect("a");
        claim(&mut table, "b", 5).expect("b");
        claim(&mut table, "c", 5).expect("c");

        let cleared = table.release_matching(&ResetTarget::key("b"));
        assert_eq!(cleared.len(), 1);
        assert_eq!(table.release_matching(&ResetTarget::key("b")).len(), 0);

        let cleared = table.release_matching(&ResetTarget::All);
        let keys: Vec<_> = cleared.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["a", "c"]);
        assert!(table.is_empty());
    }

    #[test]
    fn entries_report_floored_seconds() {
        let mut table = SlotTable::new(1).expect("table");
        let now = Instant::now();
        table
            .claim(
                "lunch".to_string(),
                now + Duration::from_millis(5_900),
                owner(),
                now,
            )
            .expect("lunch");

        let entries = table.entries(now);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].seconds_remaining, 5);

        let past = table.entries(now + Duration::from_secs(60));
        assert_eq!(past[0].seconds_remaining, 0);
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("lunch").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key(&"x".repeat(KTIMER_MSG_MAX)).is_ok());
        assert!(validate_key(&"x".repeat(KTIMER_MSG_MAX + 1)).is_err());
        assert!(validate_key("two\nlines").is_err());
    }

    #[test]
    fn duration_validation() {
        assert!(validate_duration(0).is_err());
        assert_eq!(validate_duration(1), Ok(Duration::from_secs(1)));
        assert_eq!(validate_duration(86_400), Ok(Duration::from_secs(86_400)));
        assert!(validate_duration(86_401).is_err());
    }
}
