/// Scheduling priority levels forwarded to the main loop.
///
/// Levels are totally ordered from [`Priority::Inactive`] (never schedulable)
/// up to [`Priority::Send`] (immediate synchronous dispatch). The level is a
/// hint carried on every scheduled job; within one level, submission order is
/// preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
	/// Never scheduled. Rejected by every submission entry point.
	Inactive,
	/// Runs when the whole system is idle.
	SystemIdle,
	/// Runs when the application is idle.
	ApplicationIdle,
	/// Runs when the dispatcher's own queue is idle.
	ContextIdle,
	/// Deferrable background work.
	Background,
	/// Latency-sensitive input handling.
	Input,
	/// Default level for scheduled work.
	Normal,
	/// Immediate dispatch, used by blocking invocation.
	Send,
}

impl Priority {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Inactive => "inactive",
			Self::SystemIdle => "system_idle",
			Self::ApplicationIdle => "application_idle",
			Self::ContextIdle => "context_idle",
			Self::Background => "background",
			Self::Input => "input",
			Self::Normal => "normal",
			Self::Send => "send",
		}
	}

	/// Returns true when this level is accepted by the submission entry points.
	pub const fn is_schedulable(self) -> bool {
		!matches!(self, Self::Inactive)
	}

	/// Returns the raw level value.
	pub const fn as_raw(self) -> u8 {
		self as u8
	}

	/// Reconstructs a level from its raw value.
	pub const fn from_raw(raw: u8) -> Option<Self> {
		match raw {
			0 => Some(Self::Inactive),
			1 => Some(Self::SystemIdle),
			2 => Some(Self::ApplicationIdle),
			3 => Some(Self::ContextIdle),
			4 => Some(Self::Background),
			5 => Some(Self::Input),
			6 => Some(Self::Normal),
			7 => Some(Self::Send),
			_ => None,
		}
	}
}
