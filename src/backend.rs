//! The backend thread: owns the single consumer, turns entries back into
//! text and completes synchronous pushes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crate::allocator::{BoundedAllocator, Entry};
use crate::config::AllocatorConfig;
use crate::error::{AllocError, DecodeError};
use crate::format::render_line;
use crate::protocol::decode;
use crate::queue::MpscQueue;
use crate::rendezvous::AsyncToSync;
use crate::severity::Severity;
use crate::sink::Sink;
use crate::wait::HybridWait;

/// The entry pool and the queue that carries leases from producers to the
/// backend thread.
pub(crate) struct Core {
    pub queue: MpscQueue<Entry>,
    pub allocator: BoundedAllocator,
}

impl Core {
    pub fn new(config: &AllocatorConfig) -> Result<Self, AllocError> {
        Ok(Self {
            queue: MpscQueue::new(),
            allocator: BoundedAllocator::new(
                config.fixed_entries,
                config.fixed_entry_size,
                config.use_heap,
            )?,
        })
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        // Entries pushed after the backend's final drain are still leased.
        // Leases never free themselves, so hand them back before the pool goes.
        if let Some(mut consumer) = self.queue.consumer() {
            while let Some(entry) = consumer.pop() {
                self.allocator.deallocate(entry);
            }
        }
    }
}

/// The consumer side: pops entries, renders them into the sink, completes
/// rendezvous, and returns the leases.
pub(crate) struct Backend<'a> {
    pub core: &'a Core,
    pub wait: &'a HybridWait,
    pub sync: &'a AsyncToSync,
    pub stop: &'a AtomicBool,
    pub processed: &'a AtomicU64,
}

impl Backend<'_> {
    /// Runs until `stop` is set and the queue is drained, then cancels any
    /// rendezvous still waiting and flushes the sink.
    ///
    /// Rendezvous are also cancelled if the sink panics, so synchronous
    /// pushes fail instead of waiting on a dead consumer.
    pub fn run<S: Sink>(&self, mut sink: S) {
        let _cancel = CancelOnExit(self.sync);
        let Some(mut consumer) = self.core.queue.consumer() else {
            tracing::error!("queue already has a consumer, backend not started");
            return;
        };

        tracing::info!("logger backend started");
        let mut line = String::with_capacity(256);
        let mut dirty = false;

        loop {
            if let Some(entry) = consumer.pop() {
                self.process(entry, &mut sink, &mut line);
                self.wait.reset();
                dirty = true;
                continue;
            }
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            if dirty {
                sink.flush();
                dirty = false;
            }
            self.wait.block();
        }

        // Producers that passed the state check before termination.
        while let Some(entry) = consumer.pop() {
            self.process(entry, &mut sink, &mut line);
        }
        sink.flush();
        tracing::info!(
            processed = self.processed.load(Ordering::Relaxed),
            "logger backend stopped"
        );
    }

    fn process<S: Sink>(&self, mut entry: Entry, sink: &mut S, line: &mut String) {
        let point = entry.take_sync();

        // A zero-length entry failed to encode; it only returns its lease.
        let payload = entry.payload();
        if !payload.is_empty() {
            line.clear();
            match render(payload, line) {
                Ok(severity) => {
                    sink.write(severity, line.as_bytes());
                }
                Err(err) => {
                    tracing::error!(%err, len = payload.len(), "skipping undecodable entry");
                    sink.raw_write(Severity::Error, &format!("undecodable log entry: {err}"));
                }
            }
            self.processed.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(point) = point {
            self.sync.notify(&point);
        }
        self.core.allocator.deallocate(entry);
    }
}

struct CancelOnExit<'a>(&'a AsyncToSync);

impl Drop for CancelOnExit<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("logger backend panicked, cancelling synchronous pushes");
        }
        self.0.cancel_all();
    }
}

fn render(payload: &[u8], line: &mut String) -> Result<Severity, DecodeError> {
    let (header, fields) = decode(payload)?;
    render_line(line, &header, fields)?;
    Ok(header.severity)
}
