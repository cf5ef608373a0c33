//! # WGDiag Core Library
//!
//! Protocol engine for reading live data from a diesel ECU through an
//! ELM327-compatible diagnostic adapter.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Field decoding: positional hex tokens to scaled, formatted values
//! - Commands and diagnostic packages, with a built-in catalog
//! - A transport worker keeping one command in flight over serial or TCP
//! - Sessions and a processor running packages until cancelled
//! - Data handlers, including a CSV data logger
//! - A simulated adapter for running without hardware
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wgdiag_core::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Catalog::builtin()?;
//! let session = Arc::new(Session::new(SessionConfig::default()));
//! let processor = Processor::new(session.clone());
//!
//! if processor.verify("/dev/rfcomm0")? {
//!     session.start("/dev/rfcomm0")?;
//!     let snapshot = Arc::new(Snapshot::new());
//!     let package = catalog.find("Rail pressure").cloned().ok_or("no such package")?;
//!     let handle = processor.run(package, snapshot.clone())?;
//!     std::thread::sleep(std::time::Duration::from_secs(5));
//!     handle.interrupt(true);
//!     for entry in snapshot.entries() {
//!         println!("{}: {:?}", entry.key, entry.text);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod command;
pub mod config;
pub mod datalog;
pub mod demo;
pub mod handler;
pub mod package;
pub mod processor;
pub mod protocol;
pub mod session;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::codec::{DecodeError, Field, ValueFormat};
    pub use crate::command::{Command, DecodedField, DiagCommand};
    pub use crate::config::SessionConfig;
    pub use crate::datalog::CsvLogger;
    pub use crate::demo::{DemoAdapter, DemoConnector};
    pub use crate::handler::{CompositeDataHandler, DataHandler, HandlerError, Snapshot};
    pub use crate::package::{Catalog, CatalogError, Package};
    pub use crate::processor::{ExecutionHandle, Processor, RunOutcome};
    pub use crate::protocol::{Outcome, ProtocolError, ResponseListener, WorkerState};
    pub use crate::session::{Session, SessionError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
