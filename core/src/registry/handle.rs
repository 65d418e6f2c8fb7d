//! Client handle to a running registry

use std::sync::Arc;

use ktimer_types::{Owner, RegistryConfig, ResetTarget, SetOutcome, TimerEntry};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::actor::{Reply, Request, RegistryActor};
use crate::clock::{ClockSource, TokioClock};
use crate::error::RegistryError;
use crate::notify::Subscription;
use crate::slots::{SlotTable, validate_duration, validate_key};
use crate::status::StatusReport;

/// Handle for issuing requests to a registry actor.
///
/// Cheap to clone. Timers created through a handle record its [`Owner`].
/// When every handle is dropped the actor cancels all schedules and exits.
#[derive(Debug, Clone)]
pub struct Registry {
    tx: mpsc::Sender<Request>,
    owner: Owner,
}

impl Registry {
    /// Start a registry on the current tokio runtime.
    pub fn spawn(config: RegistryConfig) -> Result<(Self, JoinHandle<()>), RegistryError> {
        let clock = TokioClock::new()?;
        Self::spawn_with_clock(config, Arc::new(clock))
    }

    /// Start a registry driven by an explicit clock source.
    pub fn spawn_with_clock(
        config: RegistryConfig,
        clock: Arc<dyn ClockSource>,
    ) -> Result<(Self, JoinHandle<()>), RegistryError> {
        let runtime = Handle::try_current().map_err(|_| RegistryError::ClockUnavailable)?;
        let table = SlotTable::new(config.initial_capacity)?;
        let (tx, rx) = mpsc::channel(config.request_buffer.max(1));

        let actor = RegistryActor::new(config.module_name, table, clock, rx);
        let task = runtime.spawn(actor.run());

        let registry = Self {
            tx,
            owner: Owner::current(),
        };
        Ok((registry, task))
    }

    /// Same registry, acting on behalf of `owner`.
    pub fn with_owner(&self, owner: Owner) -> Self {
        Self {
            tx: self.tx.clone(),
            owner,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RegistryError::Closed)?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    /// Create a timer for `key`, or re-arm it if it is already active.
    ///
    /// Arguments are validated before anything reaches the registry.
    pub async fn set(
        &self,
        key: impl Into<String>,
        duration_secs: u64,
    ) -> Result<SetOutcome, RegistryError> {
        let key = key.into();
        validate_key(&key)?;
        let duration = validate_duration(duration_secs)?;
        let owner = self.owner.clone();

        self.request(|reply| Request::Set {
            key,
            duration,
            owner,
            reply,
        })
        .await?
    }

    /// Active timers in slot order with whole seconds remaining.
    pub async fn list(&self) -> Result<Vec<TimerEntry>, RegistryError> {
        self.request(|reply| Request::List { reply }).await
    }

    /// Remove matching timers. Returns how many were cleared (0 if none matched).
    pub async fn reset(&self, target: ResetTarget) -> Result<usize, RegistryError> {
        self.request(|reply| Request::Reset { target, reply }).await
    }

    pub async fn reset_all(&self) -> Result<usize, RegistryError> {
        self.reset(ResetTarget::All).await
    }

    /// Change how many timers may be active at once.
    ///
    /// Never evicts: a limit below the active count is rejected.
    pub async fn set_capacity(&self, capacity: usize) -> Result<(), RegistryError> {
        self.request(|reply| Request::SetCapacity { capacity, reply })
            .await?
    }

    pub async fn capacity(&self) -> Result<usize, RegistryError> {
        self.request(|reply| Request::GetCapacity { reply }).await
    }

    pub async fn status(&self) -> Result<StatusReport, RegistryError> {
        self.request(|reply| Request::Status { reply }).await
    }

    /// Register for expiration events.
    ///
    /// Registration is ordered with expirations: the subscription sees
    /// every timer that expires after this call returns, and none before.
    pub async fn subscribe(&self) -> Result<Subscription, RegistryError> {
        self.request(|reply| Request::Subscribe { reply }).await
    }

    /// Stop the registry, cancelling every outstanding timer.
    ///
    /// Returns how many timers were cancelled.
    pub async fn shutdown(&self) -> Result<usize, RegistryError> {
        self.request(|reply| Request::Shutdown { reply }).await
    }
}
