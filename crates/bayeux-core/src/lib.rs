//! # bayeux-core
//!
//! Transport-independent building blocks of the Bayeux client.
//!
//! - **Scheduler** - Per-message retry, timeout and delivery policy
//! - **Extension** - Ordered middleware applied to every message
//! - **ChannelSet** - Channel registry with wildcard fan-out
//! - **Deferred** - Observable succeeded/failed status of an operation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│  Extension  │────▶│ ChannelSet  │
//! └─────────────┘     │  Pipeline   │     └─────────────┘
//!        ▲            └─────────────┘
//!        │
//! ┌─────────────┐
//! │  Scheduler  │
//! └─────────────┘
//! ```

pub mod channel_set;
pub mod deferred;
pub mod extension;
pub mod scheduler;

pub use channel_set::{ChannelSet, MessageHandler, SubscriptionEntry, SubscriptionId};
pub use deferred::{deferred, Abandoned, Deferred, DeferredStatus, Resolver};
pub use extension::{Extension, ExtensionPipeline};
pub use scheduler::{
    BackoffScheduler, RetryScheduler, Scheduler, SchedulerFactory, SchedulerOptions,
};
