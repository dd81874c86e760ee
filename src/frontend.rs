//! The logger front end: lifecycle of the backend thread, the push paths
//! producers call, and the `log_*!` macros on top of them.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::allocator::AllocatorStats;
use crate::backend::{Backend, Core};
use crate::clock::get_timestamp;
use crate::config::LoggerConfig;
use crate::error::InitError;
use crate::loggable::Loggable;
use crate::protocol::{self, Arity, HeaderData, MAX_LENGTH};
use crate::rendezvous::{AsyncToSync, SyncPoint};
use crate::rotation::RotatingFile;
use crate::severity::{Severities, Severity};
use crate::sink::{Output, Sink};
use crate::string_registry::Literal;
use crate::wait::HybridWait;

const NO_INIT: u8 = 0;
const ON_INIT: u8 = 1;
const INIT: u8 = 2;
const TERMINATED: u8 = 3;

/// Lifecycle of a [`Logger`]'s backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NoInit,
    OnInit,
    Init,
    Terminated,
}

/// Outcome of [`Logger::init_backend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitResult {
    /// This call started the backend.
    Ok,
    /// Another call started it, or already had.
    DoneByOther,
    /// Another call was starting it and failed.
    OtherFailed,
    /// This call tried and failed; the logger is back in `NoInit`.
    TriedButFailed,
    /// The logger was already terminated.
    WasTerminated,
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// Enqueued; the backend will write it.
    Queued,
    /// Synchronous push: the backend has written it.
    Delivered,
    /// Synchronous push: enqueued, but the backend terminated before
    /// confirming it.
    Cancelled,
    /// No output accepts the severity.
    Filtered,
    /// No memory for the entry, or it is too large to encode.
    Dropped,
    /// The backend is not running.
    NotRunning,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerStats {
    /// Entries dropped by backpressure or because they could not be encoded.
    pub dropped: u64,
    /// Entries the backend has written so far.
    pub processed: u64,
    /// `None` until the backend is initialized.
    pub allocator: Option<AllocatorStats>,
}

/// Front end of an asynchronous binary logger.
///
/// Producers on any thread encode entries into memory leased from a bounded
/// allocator and push them onto a lock-free queue. A single backend thread
/// decodes them, renders text lines, and hands them to a [`Sink`]. The hot
/// path never blocks and never allocates unless the fixed pool is exhausted
/// and heap fallback is enabled; entries that cannot get memory are dropped
/// and counted.
///
/// `Logger` is a cheap handle: clones share the same backend. Dropping the
/// last clone terminates the backend after it drains the queue.
///
/// # Examples
///
/// ```
/// use async_binary_logger::{log_error, log_notice, InitResult, Logger, LoggerConfig, MemorySink, Push};
///
/// let logger = Logger::new(LoggerConfig::default());
/// let sink = MemorySink::new();
/// assert_eq!(logger.init_backend(sink.clone()), InitResult::Ok);
///
/// log_notice!(logger, "listening on port {}", 8080u16);
/// log_error!(logger, "request {} failed: {}", 17u32, "timeout");
///
/// assert!(logger.on_termination());
/// assert_eq!(sink.len(), 2);
/// assert!(sink.lines()[1].1.ends_with("[err] request 17 failed: timeout"));
/// assert_eq!(log_error!(logger, "too late"), Push::NotRunning);
/// ```
#[derive(Clone)]
pub struct Logger {
    handle: Arc<Handle>,
}

// Owned by `Logger` clones only; the backend thread holds `Shared` directly,
// so the last user handle going away can still stop it.
struct Handle {
    shared: Arc<Shared>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.shared.terminate();
    }
}

struct Shared {
    state: AtomicU8,
    config: LoggerConfig,
    core: OnceLock<Core>,
    wait: HybridWait,
    sync: AsyncToSync,
    stop: AtomicBool,
    severities: Arc<Severities>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
    processed: AtomicU64,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        let severities = Arc::new(Severities::new(
            config.severity.file,
            config.severity.stdout,
            config.severity.stderr,
        ));
        let shared = Shared {
            state: AtomicU8::new(NO_INIT),
            wait: HybridWait::new(config.wait_config()),
            sync: AsyncToSync::new(),
            stop: AtomicBool::new(false),
            core: OnceLock::new(),
            severities,
            worker: Mutex::new(None),
            dropped: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            config,
        };
        Self {
            handle: Arc::new(Handle {
                shared: Arc::new(shared),
            }),
        }
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.handle.shared
    }

    /// Starts the backend thread writing to `sink`.
    ///
    /// Exactly one of any number of concurrent calls builds the allocator and
    /// queue and spawns the thread; the others wait for it to finish and
    /// report how it went.
    pub fn init_backend<S: Sink>(&self, sink: S) -> InitResult {
        self.init_with(move |_| Ok(sink))
    }

    /// Starts the backend with the default [`Output`]: the rotating file
    /// from the configuration, if any, plus the console.
    pub fn init_output(&self) -> InitResult {
        self.init_with(|shared| {
            let file = match &shared.config.file {
                Some(config) => Some(RotatingFile::open(config)?),
                None => None,
            };
            Ok(Output::new(file, shared.severities.clone()))
        })
    }

    fn init_with<S, F>(&self, make_sink: F) -> InitResult
    where
        S: Sink,
        F: FnOnce(&Shared) -> io::Result<S>,
    {
        let shared = self.shared();
        match shared
            .state
            .compare_exchange(NO_INIT, ON_INIT, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(TERMINATED) => return InitResult::WasTerminated,
            Err(_) => return shared.await_init(),
        }

        match shared.start(make_sink) {
            Ok(()) => {
                shared.state.store(INIT, Ordering::Release);
                InitResult::Ok
            }
            Err(err) => {
                tracing::error!(%err, "logger backend failed to start");
                shared.state.store(NO_INIT, Ordering::Release);
                InitResult::TriedButFailed
            }
        }
    }

    /// Stops the backend: it drains the queue, fails every pending
    /// synchronous push, flushes the sink and exits. Returns true for the one
    /// call that performed the transition.
    pub fn on_termination(&self) -> bool {
        self.shared().terminate()
    }

    pub fn state(&self) -> State {
        match self.shared().state.load(Ordering::Acquire) {
            NO_INIT => State::NoInit,
            ON_INIT => State::OnInit,
            INIT => State::Init,
            _ => State::Terminated,
        }
    }

    /// File output threshold.
    pub fn set_severity(&self, severity: Severity) {
        self.shared().severities.file.store(severity);
    }

    /// Stdout threshold.
    pub fn set_console_severity(&self, severity: Severity) {
        self.shared().severities.stdout.store(severity);
    }

    pub fn set_stderr_severity(&self, severity: Severity) {
        self.shared().severities.stderr.store(severity);
    }

    /// The thresholds this logger filters on, for building a custom
    /// [`Output`].
    pub fn severities(&self) -> Arc<Severities> {
        self.shared().severities.clone()
    }

    /// True if at least one output accepts `severity`.
    #[inline]
    pub fn accepts(&self, severity: Severity) -> bool {
        self.shared().severities.any_passes(severity)
    }

    /// Enqueues a format literal and its parameters.
    ///
    /// Usually called through the `log_*!` macros, which check the
    /// placeholder count at compile time. An empty literal without
    /// parameters goes out as an empty entry, a literal without parameters
    /// as a literal entry, anything else as a format entry.
    ///
    /// # Arguments
    /// * `severity` - Checked against every output threshold before encoding
    /// * `literal` - Registered format string, usually from a call-site slot
    /// * `params` - One value per `{}` placeholder
    ///
    /// # Returns
    /// * `Push::Queued` once the entry is on the queue
    /// * `Push::Filtered`, `Push::Dropped` or `Push::NotRunning` otherwise
    ///
    /// # Thread Safety
    /// Lock free; any number of threads may push concurrently. It never
    /// blocks, and only allocates when the fixed pool is exhausted and heap
    /// fallback is enabled.
    #[inline]
    pub fn push(&self, severity: Severity, literal: Literal, params: &[&dyn Loggable]) -> Push {
        with_fields(literal, params, |arity, fields| {
            self.enqueue(severity, arity, fields, None)
        })
    }

    /// Like [`Logger::push`], then blocks until the backend has written the
    /// entry or has terminated.
    ///
    /// # Returns
    /// * `Push::Delivered` once the sink has been handed the entry
    /// * `Push::Cancelled` if the backend stopped or died first
    /// * Any other non-queued outcome of [`Logger::push`], without blocking
    ///
    /// # Thread Safety
    /// Only the calling thread blocks, on its own [`SyncPoint`].
    pub fn push_sync(&self, severity: Severity, literal: Literal, params: &[&dyn Loggable]) -> Push {
        let point = Arc::new(SyncPoint::new());
        let pushed = with_fields(literal, params, |arity, fields| {
            self.enqueue(severity, arity, fields, Some(&point))
        });
        if pushed != Push::Queued {
            return pushed;
        }
        if self.shared().sync.wait(&point) {
            Push::Delivered
        } else {
            Push::Cancelled
        }
    }

    /// Enqueues already formatted text. The text is copied into the entry
    /// and written as is, braces included.
    ///
    /// # Thread Safety
    /// Same as [`Logger::push`].
    pub fn push_dynamic(&self, severity: Severity, text: &str) -> Push {
        self.enqueue(severity, Arity::Literal, &[&text], None)
    }

    pub fn stats(&self) -> LoggerStats {
        let shared = self.shared();
        LoggerStats {
            dropped: shared.dropped.load(Ordering::Relaxed),
            processed: shared.processed.load(Ordering::Relaxed),
            allocator: shared.core.get().map(|core| core.allocator.stats()),
        }
    }

    fn enqueue(
        &self,
        severity: Severity,
        arity: Arity,
        fields: &[&dyn Loggable],
        sync: Option<&Arc<SyncPoint>>,
    ) -> Push {
        let shared = self.shared();
        if shared.state.load(Ordering::Acquire) != INIT {
            return Push::NotRunning;
        }
        if !shared.severities.any_passes(severity) {
            return Push::Filtered;
        }
        let Some(core) = shared.core.get() else {
            return Push::NotRunning;
        };

        let mut header = HeaderData::new(severity, arity);
        if shared.config.timestamp.enabled {
            header.timestamp = Some(get_timestamp());
        }
        let size = protocol::encoded_len(&header, fields);
        if size - header.size() > MAX_LENGTH {
            return shared.drop_entry();
        }
        let Some(mut entry) = core.allocator.allocate(size) else {
            return shared.drop_entry();
        };

        header.overflow = core.allocator.is_heap(&entry);
        let written = protocol::encode(entry.buffer_mut(), &header, fields);
        // An empty entry still travels so the backend returns the lease.
        entry.set_len(written);
        if written > 0 {
            if let Some(point) = sync {
                entry.attach_sync(point.clone());
            }
        }
        core.queue.push(entry);
        shared.wait.unblock();

        if written == 0 {
            return shared.drop_entry();
        }
        Push::Queued
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

// Picks the wire arity and lays out the fields: nothing for an empty entry,
// the literal alone, or the literal followed by its parameters. The slice is
// built on the stack for the common arities.
#[inline]
fn with_fields<R>(
    literal: Literal,
    params: &[&dyn Loggable],
    f: impl FnOnce(Arity, &[&dyn Loggable]) -> R,
) -> R {
    const INLINE: usize = 8;
    let first: &dyn Loggable = &literal;
    if params.is_empty() {
        if literal.text().is_empty() {
            f(Arity::Empty, &[])
        } else {
            f(Arity::Literal, &[first])
        }
    } else if params.len() < INLINE {
        let mut fields = [first; INLINE];
        fields[1..=params.len()].copy_from_slice(params);
        f(Arity::Format, &fields[..=params.len()])
    } else {
        let mut fields: Vec<&dyn Loggable> = Vec::with_capacity(params.len() + 1);
        fields.push(first);
        fields.extend_from_slice(params);
        f(Arity::Format, &fields)
    }
}

impl Shared {
    fn start<S, F>(self: &Arc<Self>, make_sink: F) -> Result<(), InitError>
    where
        S: Sink,
        F: FnOnce(&Shared) -> io::Result<S>,
    {
        let sink = make_sink(&**self)?;
        // A failed earlier attempt may have left the core in place.
        if self.core.get().is_none() {
            let core = Core::new(&self.config.allocator)?;
            let _ = self.core.set(core);
        }

        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("binlog-backend".to_string())
            .spawn(move || {
                let Some(core) = shared.core.get() else {
                    return;
                };
                Backend {
                    core,
                    wait: &shared.wait,
                    sync: &shared.sync,
                    stop: &shared.stop,
                    processed: &shared.processed,
                }
                .run(sink);
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    fn await_init(&self) -> InitResult {
        loop {
            match self.state.load(Ordering::Acquire) {
                ON_INIT => thread::yield_now(),
                INIT => return InitResult::DoneByOther,
                // the winner failed and rolled back
                NO_INIT => return InitResult::OtherFailed,
                _ => return InitResult::WasTerminated,
            }
        }
    }

    fn terminate(&self) -> bool {
        if self
            .state
            .compare_exchange(INIT, TERMINATED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.stop.store(true, Ordering::Release);
        self.wait.unblock();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // Terminated from inside the sink; the loop sees `stop` and exits.
                return true;
            }
            if handle.join().is_err() {
                tracing::error!("logger backend panicked");
                self.sync.cancel_all();
            }
        }
        true
    }

    #[cold]
    fn drop_entry(&self) -> Push {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        Push::Dropped
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __count_args {
    () => { 0usize };
    ($head:expr $(, $tail:expr)*) => { 1usize + $crate::__count_args!($($tail),*) };
}

/// Logs at a runtime severity. The format string must be a literal with one
/// `{}` per argument; both are checked at compile time.
///
/// ```compile_fail
/// # use async_binary_logger::{log_at, Logger, Severity};
/// let logger = Logger::default();
/// log_at!(logger, Severity::Error, "two {} {}", 1u8);
/// ```
#[macro_export]
macro_rules! log_at {
    ($logger:expr, $severity:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        const _: () = ::core::assert!(
            $crate::format::validate_format($fmt)
                && $crate::format::placeholder_count($fmt) == $crate::__count_args!($($arg),*),
            "format string does not match the argument count"
        );
        static LITERAL: $crate::string_registry::LiteralSlot =
            $crate::string_registry::LiteralSlot::new($fmt);
        $logger.push($severity, LITERAL.get(), &[$(&$arg as &dyn $crate::Loggable),*])
    }};
}

/// Like [`log_at!`], but waits until the backend has written the entry.
#[macro_export]
macro_rules! log_sync {
    ($logger:expr, $severity:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        const _: () = ::core::assert!(
            $crate::format::validate_format($fmt)
                && $crate::format::placeholder_count($fmt) == $crate::__count_args!($($arg),*),
            "format string does not match the argument count"
        );
        static LITERAL: $crate::string_registry::LiteralSlot =
            $crate::string_registry::LiteralSlot::new($fmt);
        $logger.push_sync($severity, LITERAL.get(), &[$(&$arg as &dyn $crate::Loggable),*])
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($rest:tt)+) => { $crate::log_at!($logger, $crate::Severity::Debug, $($rest)+) };
}

#[macro_export]
macro_rules! log_trace {
    ($logger:expr, $($rest:tt)+) => { $crate::log_at!($logger, $crate::Severity::Trace, $($rest)+) };
}

#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $($rest:tt)+) => { $crate::log_at!($logger, $crate::Severity::Notice, $($rest)+) };
}

#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $($rest:tt)+) => { $crate::log_at!($logger, $crate::Severity::Warning, $($rest)+) };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($rest:tt)+) => { $crate::log_at!($logger, $crate::Severity::Error, $($rest)+) };
}

#[macro_export]
macro_rules! log_critical {
    ($logger:expr, $($rest:tt)+) => { $crate::log_at!($logger, $crate::Severity::Critical, $($rest)+) };
}
