//! Thread-affinitized dispatch primitives for editor runtimes.
//!
//! Each thread owns at most one [`Dispatcher`], created lazily on first
//! access and registered process-wide so other threads can target it. The
//! dispatcher funnels prioritized callbacks onto a single main loop — the
//! built-in [`ChannelLoop`] or a host-attached implementation of
//! [`MainLoop`] — and exposes three invocation models:
//!
//! * [`Dispatcher::post`] — fire-and-forget, observed through an
//!   [`OperationHandle`]
//! * [`Dispatcher::post_async`] — awaitable, observed through an
//!   [`OperationTask`]
//! * [`Dispatcher::send`] — blocking, with the callback's outcome re-raised
//!   to the caller
//!
//! [`DispatchContext`] carries the `(dispatcher, priority)` pair across
//! asynchronous continuations, and [`DispatcherBound`] pins an object to the
//! dispatcher of its creating thread.

mod bound;
mod bridge;
mod context;
mod dispatcher;
mod error;
mod main_loop;
mod operation;
mod priority;
mod registry;


pub use bound::DispatcherBound;
pub use bridge::{OperationTask, TaskBridge, TaskOutcome};
pub use context::DispatchContext;
pub use dispatcher::{Dispatcher, UnhandledNotice};
pub use error::DispatchError;
pub use main_loop::{ChannelLoop, LoopJob, MainLoop};
pub use operation::{OperationHandle, OperationState};
pub use priority::Priority;
pub use registry::{DispatcherRecord, DispatcherRegistry};
