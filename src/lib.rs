//! # Async Binary Logger
//!
//! An asynchronous, low-latency logging library. Producer threads encode log
//! entries into a compact binary form and hand them to a single background
//! thread, which decodes them, renders text lines and writes them out.
//!
//! ## Key Features
//!
//! * Lock-free multi-producer single-consumer entry queue
//! * Bounded entry allocator: a fixed pool with optional heap fallback,
//!   entries that get no memory are dropped instead of blocking the caller
//! * Format strings travel as registered ids, arguments in minimal-width
//!   binary fields
//! * Hybrid spin/yield/block wait on the consumer side
//! * Optional synchronous pushes that block until the entry is written
//! * Size-rotated log files and console output with runtime thresholds
//!
//! ## Main Components
//!
//! * [`Logger`]: front end and backend lifecycle, one cheap cloneable handle
//! * [`Sink`]: where rendered lines go; [`Output`] is the default
//! * [`Loggable`]: how argument types encode themselves
//! * [`LoggerConfig`]: settings, loadable from TOML
//! * [`LogBridge`]: routes the `log` facade into a [`Logger`]
//!
//! ## Quick Start
//!
//! ```
//! use async_binary_logger::{log_error, log_warning, FileConfig, Hex, Logger, LoggerConfig};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = LoggerConfig {
//!     file: Some(FileConfig {
//!         out_folder: dir.path().to_path_buf(),
//!         ..FileConfig::default()
//!     }),
//!     ..LoggerConfig::default()
//! };
//!
//! let logger = Logger::new(config);
//! logger.init_output();
//!
//! log_warning!(logger, "disk {} at {}%", "sda", 91u8);
//! log_error!(logger, "bad status {}", Hex(0x1fu8));
//!
//! // Drains the queue and joins the backend thread.
//! logger.on_termination();
//! ```

pub mod allocator;
mod backend;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod format;
pub mod frontend;
pub mod loggable;
pub mod protocol;
pub mod queue;
pub mod rendezvous;
pub mod rotation;
pub mod severity;
pub mod sink;
pub mod string_registry;
pub mod wait;

pub use allocator::AllocatorStats;
pub use bridge::LogBridge;
pub use config::{FileConfig, LoggerConfig};
pub use error::{AllocError, ConfigError, DecodeError, InitError};
pub use frontend::{InitResult, Logger, LoggerStats, Push, State};
pub use loggable::{Bytes, FixedWidth, Hex, Loggable, Raw};
pub use protocol::Writer;
pub use rendezvous::{AsyncToSync, SyncPoint};
pub use rotation::RotatingFile;
pub use severity::Severity;
pub use sink::{MemorySink, Output, Sink};
pub use string_registry::{get_string, register_string, Literal};
pub use wait::{HybridWait, WaitConfig};
