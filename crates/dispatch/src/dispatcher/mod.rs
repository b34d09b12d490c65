//! Per-thread dispatcher: identity, registry, and the three invocation models.

use std::cell::RefCell;
use std::fmt;
use std::panic;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bridge::{OperationTask, TaskBridge, TaskOutcome};
use crate::context::DispatchContext;
use crate::main_loop::{ChannelLoop, LoopJob, MainLoop};
use crate::operation::{Operation, OperationHandle, OperationSink, SendResult, SendSlot, StateCell};
use crate::registry::DispatcherRegistry;
use crate::{DispatchError, Priority};

thread_local! {
	static LOCAL: RefCell<Option<Arc<Dispatcher>>> = const { RefCell::new(None) };
}

/// Unhandled-failure notice delivered to observers before the failing
/// fire-and-forget operation settles.
#[derive(Debug)]
pub struct UnhandledNotice {
	thread: ThreadId,
	thread_name: Option<String>,
	error: DispatchError,
	handled: bool,
}

impl UnhandledNotice {
	/// Owning thread of the failing operation.
	pub const fn thread(&self) -> ThreadId {
		self.thread
	}

	/// Owning thread name, when the thread has one.
	pub fn thread_name(&self) -> Option<&str> {
		self.thread_name.as_deref()
	}

	/// The failure that escaped the callback.
	pub const fn error(&self) -> &DispatchError {
		&self.error
	}

	/// Returns true once some observer marked the failure handled.
	pub const fn handled(&self) -> bool {
		self.handled
	}

	/// Marks the failure handled, suppressing fatal escalation.
	pub fn mark_handled(&mut self) {
		self.handled = true;
	}
}

type UnhandledHandler = Arc<dyn Fn(&mut UnhandledNotice) + Send + Sync>;

/// Per-thread scheduler bridging prioritized callbacks onto one main loop.
///
/// At most one dispatcher exists per thread; it is created lazily on first
/// access from that thread and registered process-wide so other threads can
/// target it. All callback execution is serialized through the owning
/// thread's loop.
pub struct Dispatcher {
	thread: ThreadId,
	thread_name: Option<String>,
	main_loop: Arc<dyn MainLoop>,
	local_pump: Option<Arc<ChannelLoop>>,
	unhandled: Mutex<Vec<UnhandledHandler>>,
}

impl Dispatcher {
	/// Returns the calling thread's dispatcher, creating and registering one
	/// with the built-in reference loop on first access.
	pub fn current() -> Arc<Self> {
		if let Some(existing) = LOCAL.with(|slot| slot.borrow().clone()) {
			return existing;
		}
		let pump = Arc::new(ChannelLoop::new());
		Self::install(Arc::clone(&pump) as Arc<dyn MainLoop>, Some(pump))
	}

	/// Attaches a host main loop to the calling thread.
	///
	/// The loop must be owned by the calling thread. Fails with
	/// [`DispatchError::AlreadyAttached`] once the thread has a dispatcher,
	/// lazily created or attached.
	pub fn attach(main_loop: Arc<dyn MainLoop>) -> Result<Arc<Self>, DispatchError> {
		if LOCAL.with(|slot| slot.borrow().is_some()) {
			return Err(DispatchError::AlreadyAttached);
		}
		let current = thread::current().id();
		if main_loop.owner() != current {
			return Err(DispatchError::WrongThread {
				expected: main_loop.owner(),
				actual: current,
			});
		}
		Ok(Self::install(main_loop, None))
	}

	fn install(main_loop: Arc<dyn MainLoop>, local_pump: Option<Arc<ChannelLoop>>) -> Arc<Self> {
		let handle = thread::current();
		let dispatcher = Arc::new(Self {
			thread: handle.id(),
			thread_name: handle.name().map(str::to_string),
			main_loop,
			local_pump,
			unhandled: Mutex::new(Vec::new()),
		});
		DispatcherRegistry::global().register(&dispatcher);
		LOCAL.with(|slot| *slot.borrow_mut() = Some(Arc::clone(&dispatcher)));
		tracing::debug!(
			thread = ?dispatcher.thread,
			name = dispatcher.thread_name.as_deref().unwrap_or(""),
			"dispatch.created"
		);
		dispatcher
	}

	/// Returns the dispatcher affinitized to `thread`.
	///
	/// Creates one only when `thread` is the calling thread; for any other
	/// thread this is lookup-only and returns `None` when that thread never
	/// created a dispatcher (or already dropped it).
	pub fn for_thread(thread: ThreadId) -> Option<Arc<Self>> {
		if thread == std::thread::current().id() {
			return Some(Self::current());
		}
		DispatcherRegistry::global().lookup(thread)
	}

	/// Owning thread identity.
	pub const fn thread(&self) -> ThreadId {
		self.thread
	}

	/// Owning thread name, when the thread has one.
	pub fn thread_name(&self) -> Option<&str> {
		self.thread_name.as_deref()
	}

	/// Returns true iff the calling thread is the owning thread.
	///
	/// Never fails and has no side effects.
	pub fn check_access(&self) -> bool {
		thread::current().id() == self.thread
	}

	/// Fails with [`DispatchError::WrongThread`] when the calling thread is
	/// not the owning thread.
	pub fn verify_access(&self) -> Result<(), DispatchError> {
		if self.check_access() {
			Ok(())
		} else {
			Err(DispatchError::WrongThread {
				expected: self.thread,
				actual: thread::current().id(),
			})
		}
	}

	/// Returns a context bridge targeting this dispatcher at
	/// [`Priority::Normal`].
	///
	/// Built on demand: holding the bridge inside the dispatcher would cycle
	/// the `Arc` and keep the dispatcher alive past its thread.
	pub fn context(self: &Arc<Self>) -> DispatchContext {
		DispatchContext::new(Arc::clone(self), Priority::Normal)
	}

	/// Schedules a fire-and-forget callback on the owning thread.
	///
	/// Valid from any thread. The returned handle observes the terminal state
	/// and can request pre-start cancellation. A non-cancellation failure
	/// escaping the callback routes to the unhandled-failure channel; when no
	/// observer marks it handled, the core escalates fatally, identifying the
	/// owning thread.
	pub fn post<F>(self: &Arc<Self>, priority: Priority, callback: F) -> Result<OperationHandle, DispatchError>
	where
		F: FnOnce() -> Result<(), DispatchError> + Send + 'static,
	{
		Self::validate(priority)?;
		let token = CancellationToken::new();
		let cell = Arc::new(StateCell::new());
		let handle = OperationHandle::new(Arc::clone(&cell), token.clone(), priority);
		let operation = Operation::new(Arc::clone(self), priority, token, cell, OperationSink::Forget, Box::new(callback));
		tracing::trace!(priority = priority.as_str(), "dispatch.post");
		self.main_loop.schedule(LoopJob::new(priority, move || operation.run()));
		Ok(handle)
	}

	/// Schedules an awaitable callback on the owning thread.
	///
	/// Valid from any thread and never fails synchronously: an invalid
	/// priority or a pre-triggered token comes back through the returned task
	/// as a faulted or cancelled outcome. A token that fires before execution
	/// completes also resolves the task cancelled.
	pub fn post_async<T, F>(self: &Arc<Self>, priority: Priority, token: CancellationToken, callback: F) -> OperationTask<T>
	where
		T: Clone + Send + 'static,
		F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
	{
		let bridge = Arc::new(TaskBridge::new());
		let task = OperationTask::new(Arc::clone(&bridge));
		if let Err(err) = Self::validate(priority) {
			bridge.resolve(TaskOutcome::Faulted(err));
			return task;
		}
		if token.is_cancelled() {
			tracing::trace!(priority = priority.as_str(), "dispatch.post_async.pre_cancelled");
			bridge.resolve(TaskOutcome::Cancelled);
			return task;
		}
		let cell = Arc::new(StateCell::new());
		let operation = Operation::new(Arc::clone(self), priority, token, cell, OperationSink::Bridge(bridge), Box::new(callback));
		tracing::trace!(priority = priority.as_str(), "dispatch.post_async");
		self.main_loop.schedule(LoopJob::new(priority, move || operation.run()));
		task
	}

	/// Executes a callback on the owning thread, blocking until it finishes.
	///
	/// Runs in place when called from the owning thread, ahead of queued
	/// work; otherwise the calling thread blocks on the loop's synchronous
	/// primitive for however long the callback takes. The callback's error is
	/// re-raised to the caller unchanged, and a callback panic resumes
	/// unwinding on the calling thread. Blocking invocation does not support
	/// cancellation.
	pub fn send<T, F>(self: &Arc<Self>, priority: Priority, callback: F) -> Result<T, DispatchError>
	where
		T: Send + 'static,
		F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
	{
		Self::validate(priority)?;
		let slot = Arc::new(SendSlot::new());
		let cell = Arc::new(StateCell::new());
		let operation = Operation::new(
			Arc::clone(self),
			priority,
			CancellationToken::new(),
			cell,
			OperationSink::Slot(Arc::clone(&slot)),
			Box::new(callback),
		);
		tracing::trace!(priority = priority.as_str(), in_place = self.check_access(), "dispatch.send");
		self.main_loop.run_sync(LoopJob::new(priority, move || operation.run()));
		match slot.take() {
			Some(SendResult::Returned(result)) => result,
			Some(SendResult::Panicked(payload)) => panic::resume_unwind(payload),
			None => unreachable!("blocking operation finished without storing a result"),
		}
	}

	/// Bounded-timeout blocking invocation. Unsupported by design: blocking
	/// dispatch waits are unbounded.
	///
	/// Always fails with [`DispatchError::TimeoutUnsupported`] without
	/// invoking `callback`.
	pub fn send_timeout<T, F>(self: &Arc<Self>, priority: Priority, timeout: Duration, callback: F) -> Result<T, DispatchError>
	where
		T: Send + 'static,
		F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
	{
		let _ = (priority, callback);
		tracing::debug!(?timeout, "dispatch.send.timeout_rejected");
		Err(DispatchError::TimeoutUnsupported)
	}

	/// Registers an unhandled-failure observer.
	///
	/// Observers run on the owning thread in registration order, each seeing
	/// the notice exactly once per failing fire-and-forget operation.
	pub fn on_unhandled(&self, handler: impl Fn(&mut UnhandledNotice) + Send + Sync + 'static) {
		self.unhandled.lock().push(Arc::new(handler));
	}

	/// Routes one fire-and-forget callback failure through the observer
	/// chain, escalating fatally when nobody marks it handled.
	pub(crate) fn raise_unhandled(&self, error: DispatchError) {
		let mut notice = UnhandledNotice {
			thread: self.thread,
			thread_name: self.thread_name.clone(),
			error,
			handled: false,
		};
		let handlers: Vec<UnhandledHandler> = self.unhandled.lock().clone();
		for handler in &handlers {
			handler(&mut notice);
		}
		if notice.handled {
			tracing::debug!(error = %notice.error, "dispatch.unhandled.observed");
			return;
		}
		tracing::error!(
			thread = ?notice.thread,
			name = notice.thread_name.as_deref().unwrap_or(""),
			error = %notice.error,
			"dispatch.unhandled.fatal"
		);
		panic!(
			"unhandled dispatcher callback failure on thread {:?} ({}): {}",
			notice.thread,
			notice.thread_name.as_deref().unwrap_or("unnamed"),
			notice.error
		);
	}

	/// Drains the built-in reference loop on the owning thread, returning the
	/// number of operations executed.
	///
	/// Host-attached loops pump themselves; for those this returns 0.
	pub fn run_until_idle(&self) -> Result<usize, DispatchError> {
		self.verify_access()?;
		Ok(self.local_pump.as_deref().map_or(0, ChannelLoop::pump))
	}

	/// Returns the built-in reference loop when this dispatcher owns one.
	///
	/// Dedicated dispatcher threads block on its [`ChannelLoop::run`];
	/// host-attached dispatchers return `None`.
	pub fn local_pump(&self) -> Option<&Arc<ChannelLoop>> {
		self.local_pump.as_ref()
	}

	fn validate(priority: Priority) -> Result<(), DispatchError> {
		if priority.is_schedulable() {
			Ok(())
		} else {
			Err(DispatchError::InvalidPriority(priority))
		}
	}
}

impl fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Dispatcher")
			.field("thread", &self.thread)
			.field("thread_name", &self.thread_name)
			.finish_non_exhaustive()
	}
}
