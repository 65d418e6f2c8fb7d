//! Registry actor: request handling and expiration processing

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use ktimer_types::{Owner, ResetTarget, SetOutcome, TimerEntry};
use tokio::sync::mpsc::{self, Receiver, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::clock::ClockSource;
use crate::error::RegistryError;
use crate::notify::{Expiration, NotificationChannel, Subscription};
use crate::slots::{ScheduleToken, SlotTable, TimerRecord};
use crate::status::StatusReport;

pub(crate) type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Request {
    Set {
        key: String,
        duration: Duration,
        owner: Owner,
        reply: Reply<Result<SetOutcome, RegistryError>>,
    },
    List {
        reply: Reply<Vec<TimerEntry>>,
    },
    Reset {
        target: ResetTarget,
        reply: Reply<usize>,
    },
    SetCapacity {
        capacity: usize,
        reply: Reply<Result<(), RegistryError>>,
    },
    GetCapacity {
        reply: Reply<usize>,
    },
    Status {
        reply: Reply<StatusReport>,
    },
    Subscribe {
        reply: Reply<Subscription>,
    },
    Shutdown {
        reply: Reply<usize>,
    },
}

pub(crate) struct RegistryActor {
    module_name: String,
    table: SlotTable,
    clock: Arc<dyn ClockSource>,
    requests: Receiver<Request>,
    expired_tx: UnboundedSender<ScheduleToken>,
    expired_rx: UnboundedReceiver<ScheduleToken>,
    notifications: NotificationChannel,
    started: Instant,
}

impl RegistryActor {
    pub(crate) fn new(
        module_name: String,
        table: SlotTable,
        clock: Arc<dyn ClockSource>,
        requests: Receiver<Request>,
    ) -> Self {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let started = clock.now();
        Self {
            module_name,
            table,
            clock,
            requests,
            expired_tx,
            expired_rx,
            notifications: NotificationChannel::new(),
            started,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!(
            module = %self.module_name,
            capacity = self.table.capacity_limit(),
            "timer registry started"
        );

        loop {
            // Expirations first: a timer whose deadline has passed is cleared
            // before any queued request can observe it.
            tokio::select! {
                biased;
                Some(token) = self.expired_rx.recv() => self.on_expired(token),
                request = self.requests.recv() => match request {
                    Some(request) => {
                        if self.handle(request).is_break() {
                            break;
                        }
                    }
                    None => {
                        self.teardown();
                        break;
                    }
                },
            }
        }

        tracing::info!(module = %self.module_name, "timer registry stopped");
    }

    fn handle(&mut self, request: Request) -> ControlFlow<()> {
        // A dropped reply receiver means the caller gave up; the state change stands.
        match request {
            Request::Set {
                key,
                duration,
                owner,
                reply,
            } => {
                let _ = reply.send(self.set(key, duration, owner));
            }
            Request::List { reply } => {
                let _ = reply.send(self.table.entries(self.clock.now()));
            }
            Request::Reset { target, reply } => {
                let _ = reply.send(self.reset(&target));
            }
            Request::SetCapacity { capacity, reply } => {
                let _ = reply.send(self.set_capacity(capacity));
            }
            Request::GetCapacity { reply } => {
                let _ = reply.send(self.table.capacity_limit());
            }
            Request::Status { reply } => {
                let report = StatusReport::capture(
                    &self.module_name,
                    self.started,
                    self.clock.now(),
                    &self.table,
                );
                let _ = reply.send(report);
            }
            Request::Subscribe { reply } => {
                let _ = reply.send(self.notifications.subscribe());
            }
            Request::Shutdown { reply } => {
                let _ = reply.send(self.teardown());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn set(
        &mut self,
        key: String,
        duration: Duration,
        owner: Owner,
    ) -> Result<SetOutcome, RegistryError> {
        let now = self.clock.now();
        let deadline = now + duration;

        let rearmed = self
            .table
            .find(&key)
            .and_then(|slot| self.table.rearm(slot, deadline));
        if let Some((token, stale)) = rearmed {
            if let Some(stale) = stale {
                self.clock.cancel(stale);
            }
            self.arm(token, deadline);
            tracing::info!(%key, slot = token.slot, secs = duration.as_secs(), "timer updated");
            return Ok(SetOutcome::Updated);
        }

        let token = match self.table.claim(key.clone(), deadline, owner, now) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(%key, error = %e, "timer rejected");
                return Err(e);
            }
        };
        self.arm(token, deadline);
        tracing::info!(%key, slot = token.slot, secs = duration.as_secs(), "timer created");
        Ok(SetOutcome::Created)
    }

    fn arm(&mut self, token: ScheduleToken, deadline: Instant) {
        let expired = self.expired_tx.clone();
        let handle = self.clock.arm(
            deadline,
            Box::new(move || {
                let _ = expired.send(token);
            }),
        );
        if let Err(handle) = self.table.attach(token, handle) {
            self.clock.cancel(handle);
        }
    }

    fn reset(&mut self, target: &ResetTarget) -> usize {
        let cleared = self.table.release_matching(target);
        let count = cleared.len();
        for record in cleared {
            self.retire(record);
        }
        tracing::info!(?target, cleared = count, "timers reset");
        count
    }

    fn set_capacity(&mut self, capacity: usize) -> Result<(), RegistryError> {
        match self.table.set_capacity_limit(capacity) {
            Ok(()) => {
                tracing::info!(capacity, "capacity changed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(capacity, error = %e, "capacity change rejected");
                Err(e)
            }
        }
    }

    fn on_expired(&mut self, token: ScheduleToken) {
        let Some(mut record) = self.table.expire(token) else {
            tracing::debug!(
                slot = token.slot,
                epoch = token.epoch,
                "ignoring superseded expiration"
            );
            return;
        };
        // This schedule already ran; nothing to cancel.
        drop(record.take_schedule());

        tracing::info!(key = %record.key, slot = token.slot, "TIMER: {}", record.key);

        let event = Expiration {
            key: record.key,
            slot: token.slot,
            owner: record.owner,
            created_at: record.created_wall,
        };
        let delivered = self.notifications.publish(&event);
        tracing::debug!(key = %event.key, delivered, "expiration published");
    }

    /// Cancel the schedule of a record that was removed from the table.
    fn retire(&self, mut record: TimerRecord) {
        if let Some(handle) = record.take_schedule() {
            self.clock.cancel(handle);
        }
    }

    fn teardown(&mut self) -> usize {
        self.notifications.close();
        let drained = self.table.drain();
        let count = drained.len();
        for record in drained {
            self.retire(record);
        }
        if count > 0 {
            tracing::info!(cancelled = count, "outstanding timers cancelled");
        }
        count
    }
}
