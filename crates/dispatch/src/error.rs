//! Error types for dispatcher invocation and affinity enforcement.

use std::thread::ThreadId;

use thiserror::Error;

use crate::Priority;

/// Errors surfaced by dispatcher entry points and scheduled callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
	/// Submission priority is outside the schedulable range.
	#[error("priority '{}' is not schedulable", .0.as_str())]
	InvalidPriority(Priority),

	/// Access from a thread other than the dispatcher's owning thread.
	#[error("dispatcher owned by thread {expected:?} was accessed from thread {actual:?}")]
	WrongThread {
		/// The dispatcher's owning thread.
		expected: ThreadId,
		/// The thread that performed the access.
		actual: ThreadId,
	},

	/// A bounded-timeout blocking invocation was requested. Blocking dispatch
	/// waits are unbounded by design.
	#[error("bounded timeouts are not supported for blocking dispatch")]
	TimeoutUnsupported,

	/// Cooperative cancellation was observed before or during execution.
	#[error("operation cancelled")]
	Cancelled,

	/// A non-cancellation failure escaped a scheduled callback.
	#[error("callback failed: {message}")]
	Callback {
		/// Failure description, including contained panic payloads.
		message: String,
	},

	/// The calling thread already has a dispatcher, lazily created or attached.
	#[error("thread already has a dispatcher attached")]
	AlreadyAttached,
}
