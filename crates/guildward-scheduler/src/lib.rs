//! # Guildward Scheduler
//!
//! The reconciliation core of the bot: keeps a live set of timer-driven
//! jobs consistent with the persisted task table, and the known-server
//! mirror consistent with live guild membership.
//!
//! ## Architecture
//! ```text
//! store events ─┐
//! gateway events ├─→ Reconciler ──→ JobRegistry (replace_all, one generation live)
//! periodic timers ┘        │
//!                          └─→ known_servers upsert/purge
//!
//! TriggerSpec fire ──→ runtime::fire ──→ fresh store read ──→ send text/embed
//! ```
//!
//! The reconciler is the only writer of the registry; the triggering
//! runtime only ever reads the store and talks to the messenger.

pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod trigger;

pub use reconciler::{Reconciler, StalePolicy};
pub use registry::{JobRegistry, RegisteredJob};
pub use runtime::DEFAULT_EMBED_COLOR;
pub use trigger::{TriggerSpec, compile};
