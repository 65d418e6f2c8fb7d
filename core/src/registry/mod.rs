//! Timer registry
//!
//! One actor task owns the [`SlotTable`](crate::slots::SlotTable). Client
//! requests and clock expirations are both messages into that task, so each
//! request or expiration is applied as a single atomic step:
//!
//! ```text
//!  Registry (clone per client) ──requests──┐
//!                                          ▼
//!                                   ┌─────────────┐   arm / cancel   ┌─────────────┐
//!                                   │ RegistryActor│ ───────────────▶ │ ClockSource │
//!                                   │  SlotTable   │ ◀─────────────── │             │
//!                                   └─────────────┘  expired tokens   └─────────────┘
//!                                          │
//!                                          ▼
//!                                 NotificationChannel ──▶ Subscriptions
//! ```

mod actor;
mod handle;


pub use handle::Registry;
