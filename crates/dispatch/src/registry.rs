//! Process-wide dispatcher registry.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::Dispatcher;

/// Diagnostic snapshot for one live dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherRecord {
	/// Owning thread identity.
	pub thread: ThreadId,
	/// Owning thread name, when the thread has one.
	pub thread_name: Option<String>,
}

/// Process-wide registry of live dispatchers keyed by owning thread.
///
/// Entries are weak: a dispatcher dies with its thread's local handle and the
/// last external reference, and dead entries are pruned opportunistically
/// during lookup rather than from drop glue. One coarse lock guards
/// lookup/insert/prune.
#[derive(Debug, Default)]
pub struct DispatcherRegistry {
	entries: Mutex<HashMap<ThreadId, Weak<Dispatcher>>>,
}

impl DispatcherRegistry {
	/// Returns the process-wide registry instance.
	pub fn global() -> &'static DispatcherRegistry {
		static GLOBAL: OnceLock<DispatcherRegistry> = OnceLock::new();
		GLOBAL.get_or_init(DispatcherRegistry::default)
	}

	/// Looks up the live dispatcher for `thread`, pruning dead entries.
	pub fn lookup(&self, thread: ThreadId) -> Option<Arc<Dispatcher>> {
		let mut entries = self.entries.lock();
		entries.retain(|_, weak| weak.strong_count() > 0);
		entries.get(&thread).and_then(Weak::upgrade)
	}

	/// Registers `dispatcher` under its owning thread.
	///
	/// A dead entry for the same thread is replaced; a live duplicate is a
	/// caller bug (at most one dispatcher exists per thread).
	pub(crate) fn register(&self, dispatcher: &Arc<Dispatcher>) {
		let mut entries = self.entries.lock();
		let stale = entries.insert(dispatcher.thread(), Arc::downgrade(dispatcher));
		debug_assert!(
			stale.is_none_or(|weak| weak.strong_count() == 0),
			"thread already has a live dispatcher"
		);
	}

	/// Returns snapshots for every live dispatcher, sorted by thread name.
	pub fn snapshots(&self) -> Vec<DispatcherRecord> {
		let mut entries = self.entries.lock();
		entries.retain(|_, weak| weak.strong_count() > 0);
		let mut records: Vec<_> = entries
			.values()
			.filter_map(Weak::upgrade)
			.map(|dispatcher| DispatcherRecord {
				thread: dispatcher.thread(),
				thread_name: dispatcher.thread_name().map(str::to_string),
			})
			.collect();
		drop(entries);
		records.sort_by(|a, b| a.thread_name.cmp(&b.thread_name));
		records
	}
}
