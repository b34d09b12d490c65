//! Main-loop seam and the built-in reference loop.
//!
//! The dispatcher consumes exactly one capability from its environment:
//! "run this callback on the owning thread, asynchronously or synchronously".
//! [`MainLoop`] is that seam. Hosts with a native event loop implement it;
//! threads without one get [`ChannelLoop`], a FIFO pump.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::Priority;

/// One callback handed to the main loop for execution on its owning thread.
pub struct LoopJob {
	priority: Priority,
	thunk: Box<dyn FnOnce() + Send>,
}

impl LoopJob {
	/// Creates a job carrying the forwarded priority hint.
	pub fn new(priority: Priority, thunk: impl FnOnce() + Send + 'static) -> Self {
		Self {
			priority,
			thunk: Box::new(thunk),
		}
	}

	/// Forwarded scheduling hint. The reference loop does not reorder on it.
	pub const fn priority(&self) -> Priority {
		self.priority
	}

	/// Consumes the job and runs its thunk.
	pub fn run(self) {
		(self.thunk)();
	}
}

impl fmt::Debug for LoopJob {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LoopJob").field("priority", &self.priority).finish_non_exhaustive()
	}
}

/// Callback-scheduling contract consumed from the native event loop.
///
/// Implementations must execute every job on the loop's owning thread and
/// preserve submission order per caller. Priority is a forwarded hint; the
/// contract does not require reordering on it.
pub trait MainLoop: Send + Sync {
	/// The thread all jobs execute on.
	fn owner(&self) -> ThreadId;

	/// Queues a job for asynchronous execution on the owning thread.
	fn schedule(&self, job: LoopJob);

	/// Executes a job on the owning thread, blocking the caller until it
	/// finishes. Degenerates to a direct call when invoked from the owning
	/// thread. The wait is unbounded.
	fn run_sync(&self, job: LoopJob);
}

struct LoopState {
	queue: VecDeque<LoopJob>,
	quit: bool,
}

/// Built-in reference loop for threads without a native event loop.
///
/// A mutex-guarded FIFO drained on the owning thread via [`ChannelLoop::pump`]
/// or [`ChannelLoop::run`]. Submission order is preserved across priority
/// levels.
pub struct ChannelLoop {
	owner: ThreadId,
	state: Mutex<LoopState>,
	wake: Condvar,
}

impl ChannelLoop {
	/// Creates a loop owned by the calling thread.
	pub fn new() -> Self {
		Self {
			owner: thread::current().id(),
			state: Mutex::new(LoopState {
				queue: VecDeque::new(),
				quit: false,
			}),
			wake: Condvar::new(),
		}
	}

	/// Drains every queued job, returning the number executed.
	///
	/// # Panics
	///
	/// Panics when called off the owning thread.
	pub fn pump(&self) -> usize {
		assert_eq!(thread::current().id(), self.owner, "loop pumped off its owning thread");
		let mut ran = 0usize;
		loop {
			let Some(job) = self.state.lock().queue.pop_front() else {
				break;
			};
			tracing::trace!(priority = job.priority().as_str(), "dispatch.loop.run");
			job.run();
			ran += 1;
		}
		ran
	}

	/// Blocks on the owning thread, executing jobs as they arrive until
	/// [`ChannelLoop::quit`]. Jobs queued before the quit request still run.
	///
	/// # Panics
	///
	/// Panics when called off the owning thread.
	pub fn run(&self) {
		assert_eq!(thread::current().id(), self.owner, "loop run off its owning thread");
		loop {
			let job = {
				let mut state = self.state.lock();
				loop {
					if let Some(job) = state.queue.pop_front() {
						break Some(job);
					}
					if state.quit {
						break None;
					}
					self.wake.wait(&mut state);
				}
			};
			let Some(job) = job else {
				break;
			};
			tracing::trace!(priority = job.priority().as_str(), "dispatch.loop.run");
			job.run();
		}
	}

	/// Requests [`ChannelLoop::run`] to return once the queue is drained.
	/// Callable from any thread.
	pub fn quit(&self) {
		self.state.lock().quit = true;
		self.wake.notify_all();
	}

	/// Returns the number of queued jobs.
	pub fn pending(&self) -> usize {
		self.state.lock().queue.len()
	}
}

impl Default for ChannelLoop {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for ChannelLoop {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ChannelLoop").field("owner", &self.owner).field("pending", &self.pending()).finish_non_exhaustive()
	}
}

impl MainLoop for ChannelLoop {
	fn owner(&self) -> ThreadId {
		self.owner
	}

	fn schedule(&self, job: LoopJob) {
		tracing::trace!(priority = job.priority().as_str(), "dispatch.loop.schedule");
		self.state.lock().queue.push_back(job);
		self.wake.notify_all();
	}

	fn run_sync(&self, job: LoopJob) {
		if thread::current().id() == self.owner {
			job.run();
			return;
		}

		let done = Arc::new((Mutex::new(false), Condvar::new()));
		let signal = Arc::clone(&done);
		let priority = job.priority();
		self.schedule(LoopJob::new(priority, move || {
			job.run();
			let (flag, cv) = &*signal;
			*flag.lock() = true;
			cv.notify_all();
		}));

		let (flag, cv) = &*done;
		let mut finished = flag.lock();
		while !*finished {
			cv.wait(&mut finished);
		}
	}
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::thread;

	use parking_lot::Mutex;

	use super::{ChannelLoop, LoopJob, MainLoop};
	use crate::Priority;

	#[test]
	fn pump_preserves_submission_order_across_priorities() {
		let main_loop = ChannelLoop::new();
		let order = Arc::new(Mutex::new(Vec::new()));

		for (priority, tag) in [(Priority::Background, "low"), (Priority::Send, "high"), (Priority::Normal, "mid")] {
			let order = Arc::clone(&order);
			main_loop.schedule(LoopJob::new(priority, move || order.lock().push(tag)));
		}

		assert_eq!(main_loop.pump(), 3);
		assert_eq!(*order.lock(), vec!["low", "high", "mid"]);
	}

	#[test]
	fn run_sync_degenerates_to_direct_call_on_owner() {
		let main_loop = ChannelLoop::new();
		let ran = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&ran);

		main_loop.run_sync(LoopJob::new(Priority::Send, move || flag.store(true, Ordering::SeqCst)));

		assert!(ran.load(Ordering::SeqCst));
		assert_eq!(main_loop.pending(), 0, "direct call must not enqueue");
	}

	#[test]
	fn run_sync_from_foreign_thread_executes_on_owner() {
		let main_loop = Arc::new(ChannelLoop::new());
		let owner = main_loop.owner();

		let caller = {
			let main_loop = Arc::clone(&main_loop);
			thread::spawn(move || {
				let observed = Arc::new(Mutex::new(None));
				let slot = Arc::clone(&observed);
				main_loop.run_sync(LoopJob::new(Priority::Send, move || {
					*slot.lock() = Some(thread::current().id());
				}));
				main_loop.quit();
				observed.lock().take()
			})
		};

		main_loop.run();
		assert_eq!(caller.join().expect("caller thread"), Some(owner));
	}

	#[test]
	fn quit_drains_queued_jobs_before_returning() {
		let main_loop = ChannelLoop::new();
		let ran = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&ran);
		main_loop.schedule(LoopJob::new(Priority::Normal, move || flag.store(true, Ordering::SeqCst)));
		main_loop.quit();

		main_loop.run();
		assert!(ran.load(Ordering::SeqCst));
	}
}
