//! Scheduled operation lifecycle and execution.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::bridge::{TaskBridge, TaskOutcome};
use crate::context::{ContextGuard, DispatchContext};
use crate::{DispatchError, Dispatcher, Priority};

/// Lifecycle state of one scheduled operation.
///
/// Transitions are monotonic, forward-only, and happen exclusively on the
/// owning thread: `Pending → Executing → {Completed, Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationState {
	/// Queued, not yet started by the main loop.
	Pending,
	/// The callback is running on the owning thread.
	Executing,
	/// The callback finished, normally or with a captured failure.
	Completed,
	/// Cancellation was observed on the fire-and-forget path.
	Aborted,
}

impl OperationState {
	/// Returns true for the two terminal states.
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Aborted)
	}

	fn from_raw(raw: u8) -> Self {
		match raw {
			0 => Self::Pending,
			1 => Self::Executing,
			2 => Self::Completed,
			3 => Self::Aborted,
			_ => unreachable!("invalid operation state value"),
		}
	}
}

/// Shared state cell: atomic lifecycle value plus the settled notification.
pub(crate) struct StateCell {
	state: AtomicU8,
	notify: Notify,
}

impl StateCell {
	pub(crate) fn new() -> Self {
		Self {
			state: AtomicU8::new(OperationState::Pending as u8),
			notify: Notify::new(),
		}
	}

	pub(crate) fn load(&self) -> OperationState {
		OperationState::from_raw(self.state.load(Ordering::Acquire))
	}

	/// Advances the lifecycle. Transitions must move forward.
	pub(crate) fn advance(&self, next: OperationState) {
		let prev = self.state.swap(next as u8, Ordering::AcqRel);
		debug_assert!(prev < next as u8, "operation state must advance forward");
		if next.is_terminal() {
			self.notify.notify_waiters();
		}
	}

	pub(crate) async fn settled(&self) -> OperationState {
		loop {
			// Create Notified before loading so a terminal transition between
			// the load and the await cannot be missed.
			let notified = self.notify.notified();
			let state = self.load();
			if state.is_terminal() {
				return state;
			}
			notified.await;
		}
	}
}

impl fmt::Debug for StateCell {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StateCell").field("state", &self.load()).finish_non_exhaustive()
	}
}

/// Observer handle for one fire-and-forget operation.
///
/// Exposes the terminal state for diagnostics and an awaitable settled
/// notification; cheap to clone.
#[derive(Debug, Clone)]
pub struct OperationHandle {
	cell: Arc<StateCell>,
	token: CancellationToken,
	priority: Priority,
}

impl OperationHandle {
	pub(crate) fn new(cell: Arc<StateCell>, token: CancellationToken, priority: Priority) -> Self {
		Self { cell, token, priority }
	}

	/// Current lifecycle state.
	pub fn state(&self) -> OperationState {
		self.cell.load()
	}

	/// Submission priority.
	pub const fn priority(&self) -> Priority {
		self.priority
	}

	/// Requests cancellation.
	///
	/// Honored at the pre-start edge; a callback that already started must
	/// observe its cancellation cooperatively.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Waits until the operation settles and returns the terminal state.
	pub async fn settled(&self) -> OperationState {
		self.cell.settled().await
	}
}

/// Result slot for one blocking invocation.
pub(crate) struct SendSlot<T> {
	slot: Mutex<Option<SendResult<T>>>,
}

pub(crate) enum SendResult<T> {
	Returned(Result<T, DispatchError>),
	Panicked(Box<dyn Any + Send>),
}

impl<T> SendSlot<T> {
	pub(crate) fn new() -> Self {
		Self { slot: Mutex::new(None) }
	}

	pub(crate) fn put(&self, result: SendResult<T>) {
		let mut slot = self.slot.lock();
		debug_assert!(slot.is_none(), "blocking result slot filled twice");
		*slot = Some(result);
	}

	pub(crate) fn take(&self) -> Option<SendResult<T>> {
		self.slot.lock().take()
	}
}

/// Where an operation's outcome goes when it settles.
pub(crate) enum OperationSink<T> {
	/// Fire-and-forget: failures route to the dispatcher's unhandled channel.
	Forget,
	/// Awaitable: the outcome resolves the task bridge.
	Bridge(Arc<TaskBridge<T>>),
	/// Blocking: the outcome lands in the caller's result slot.
	Slot(Arc<SendSlot<T>>),
}

/// One scheduled unit of work: callback, priority, token, state, and sink.
pub(crate) struct Operation<T> {
	dispatcher: Arc<Dispatcher>,
	priority: Priority,
	token: CancellationToken,
	cell: Arc<StateCell>,
	sink: OperationSink<T>,
	callback: Box<dyn FnOnce() -> Result<T, DispatchError> + Send>,
}

impl<T> Operation<T>
where
	T: Send + 'static,
{
	pub(crate) fn new(
		dispatcher: Arc<Dispatcher>,
		priority: Priority,
		token: CancellationToken,
		cell: Arc<StateCell>,
		sink: OperationSink<T>,
		callback: Box<dyn FnOnce() -> Result<T, DispatchError> + Send>,
	) -> Self {
		Self {
			dispatcher,
			priority,
			token,
			cell,
			sink,
			callback,
		}
	}

	/// Executes the callback. Called exactly once, on the owning thread, by
	/// the main-loop job.
	pub(crate) fn run(self) {
		let Self {
			dispatcher,
			priority,
			token,
			cell,
			sink,
			callback,
		} = self;
		debug_assert!(dispatcher.check_access(), "operation ran off its dispatcher thread");

		// Pre-start cancellation edge: the callback is never invoked.
		if token.is_cancelled() {
			match sink {
				OperationSink::Forget => {
					tracing::debug!(priority = priority.as_str(), "dispatch.operation.aborted");
					cell.advance(OperationState::Aborted);
				}
				OperationSink::Bridge(bridge) => {
					bridge.resolve(TaskOutcome::Cancelled);
					cell.advance(OperationState::Completed);
				}
				OperationSink::Slot(slot) => {
					slot.put(SendResult::Returned(Err(DispatchError::Cancelled)));
					cell.advance(OperationState::Completed);
				}
			}
			return;
		}

		cell.advance(OperationState::Executing);

		// Transient context override: continuations started by the callback
		// target this dispatcher at the operation's priority.
		let result = {
			let _context = ContextGuard::install(DispatchContext::new(Arc::clone(&dispatcher), priority));
			panic::catch_unwind(AssertUnwindSafe(callback))
		};

		match sink {
			OperationSink::Forget => {
				let failure = match result {
					Ok(Ok(_)) => None,
					Ok(Err(DispatchError::Cancelled)) => {
						tracing::debug!(priority = priority.as_str(), "dispatch.operation.aborted");
						cell.advance(OperationState::Aborted);
						return;
					}
					Ok(Err(_)) | Err(_) if token.is_cancelled() => {
						// Post-failure cancellation edge: the raised failure is
						// the cancellation taking effect.
						tracing::debug!(priority = priority.as_str(), "dispatch.operation.aborted");
						cell.advance(OperationState::Aborted);
						return;
					}
					Ok(Err(err)) => Some(err),
					Err(payload) => Some(DispatchError::Callback {
						message: panic_message(payload.as_ref()),
					}),
				};
				// The unhandled notice fires before the operation settles.
				if let Some(err) = failure {
					dispatcher.raise_unhandled(err);
				}
				cell.advance(OperationState::Completed);
			}
			OperationSink::Bridge(bridge) => {
				let outcome = match result {
					// The token fired before execution completed: a cancelled
					// outcome wins over whatever the callback produced.
					Ok(_) | Err(_) if token.is_cancelled() => TaskOutcome::Cancelled,
					Ok(Ok(value)) => TaskOutcome::Completed(value),
					Ok(Err(DispatchError::Cancelled)) => TaskOutcome::Cancelled,
					Ok(Err(err)) => TaskOutcome::Faulted(err),
					Err(payload) => TaskOutcome::Faulted(DispatchError::Callback {
						message: panic_message(payload.as_ref()),
					}),
				};
				bridge.resolve(outcome);
				cell.advance(OperationState::Completed);
			}
			OperationSink::Slot(slot) => {
				// Blocking invocations do not support cancellation; outcomes
				// pass through untouched and panics resume on the caller.
				let stored = match result {
					Ok(returned) => SendResult::Returned(returned),
					Err(payload) => SendResult::Panicked(payload),
				};
				slot.put(stored);
				cell.advance(OperationState::Completed);
			}
		}
	}
}

/// Extracts a human-readable message from a contained panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&'static str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
	use std::sync::Arc;

	use super::{OperationState, StateCell};

	#[test]
	fn state_cell_advances_forward_only() {
		let cell = StateCell::new();
		assert_eq!(cell.load(), OperationState::Pending);
		cell.advance(OperationState::Executing);
		cell.advance(OperationState::Completed);
		assert_eq!(cell.load(), OperationState::Completed);
		assert!(cell.load().is_terminal());
	}

	#[tokio::test]
	async fn settled_returns_immediately_once_terminal() {
		let cell = Arc::new(StateCell::new());
		cell.advance(OperationState::Executing);
		cell.advance(OperationState::Aborted);
		assert_eq!(cell.settled().await, OperationState::Aborted);
	}

	#[tokio::test]
	async fn settled_wakes_a_parked_waiter() {
		let cell = Arc::new(StateCell::new());
		let waiter = {
			let cell = Arc::clone(&cell);
			tokio::spawn(async move { cell.settled().await })
		};
		tokio::task::yield_now().await;

		cell.advance(OperationState::Executing);
		cell.advance(OperationState::Completed);

		assert_eq!(waiter.await.expect("waiter task"), OperationState::Completed);
	}

	#[cfg(debug_assertions)]
	#[test]
	#[should_panic(expected = "advance forward")]
	fn state_cell_rejects_backward_transitions() {
		let cell = StateCell::new();
		cell.advance(OperationState::Completed);
		cell.advance(OperationState::Executing);
	}
}
