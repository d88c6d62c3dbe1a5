use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
	Trace,
	Info,
	Warn,
}

impl Level {
	pub fn as_str(self) -> &'static str {
		match self {
			Level::Trace => "TRACE",
			Level::Info => "INFO",
			Level::Warn => "WARN",
		}
	}
}

impl fmt::Display for Level {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Structured log sink supplied by the host. The core itself performs no
/// logging I/O; everything funnels through whichever sink is installed.
pub trait LogSink: Send + Sync + 'static {
	fn log(&self, level: Level, target: &'static str, args: fmt::Arguments);
}

static LOG_SINK: OnceLock<Box<dyn LogSink>> = OnceLock::new();

/// Trace-level gate, toggled by the VERBOSE_MODE configuration key.
static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn try_set_log_sink(sink: Box<dyn LogSink>) -> Result<(), Box<dyn LogSink>> {
	LOG_SINK.set(sink)
}

pub fn has_log_sink() -> bool {
	LOG_SINK.get().is_some()
}

pub fn set_verbose(enabled: bool) {
	VERBOSE.store(enabled, Ordering::Relaxed);
}

pub fn verbose() -> bool {
	VERBOSE.load(Ordering::Relaxed)
}

pub(crate) fn emit(level: Level, target: &'static str, args: fmt::Arguments) {
	if level == Level::Trace && !verbose() {
		return;
	}
	if let Some(sink) = LOG_SINK.get() {
		sink.log(level, target, args);
	}
}
