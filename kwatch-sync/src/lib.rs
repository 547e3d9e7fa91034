//! # kwatch-sync
//!
//! List/watch mirroring of a remote collection.
//!
//! A [`Reflector`] lists the collection through a [`RemoteSource`], keeps a
//! [`Store`](kwatch_core::Store) in step with it, and pushes one
//! [`ChangeEvent`](kwatch_core::ChangeEvent) per difference into a bounded
//! [`delta_queue`].

pub mod backoff;
pub mod error;
pub mod queue;
pub mod reflector;
pub mod scripted;
pub mod source;

pub use backoff::{Backoff, BackoffPolicy};
pub use error::{SourceError, SyncError};
pub use queue::{delta_queue, CoalescePolicy, DeltaConsumer, DeltaProducer, Popped, QueueClosed};
pub use reflector::{Reflector, ReflectorConfig, ReflectorStats, ReflectorStatus, SyncState};
pub use scripted::{ScriptedSource, WatchScript};
pub use source::{ListPage, Query, RemoteSource, WatchFrame, WatchStream};
