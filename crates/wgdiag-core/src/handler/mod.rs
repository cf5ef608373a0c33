//! Data Handlers
//!
//! Consumers of decoded values. The processor reports every field twice,
//! once as display text and once as a number, and announces the package
//! before its first values.

mod snapshot;

pub use snapshot::{Snapshot, SnapshotEntry};

use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::package::Package;

/// Errors raised by a data handler
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Writing the value out failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The handler refused the value
    #[error("Rejected value for '{key}': {message}")]
    Rejected {
        /// Field key
        key: String,
        /// Reason
        message: String,
    },
}

/// Receiver of decoded values
pub trait DataHandler: Send + Sync {
    /// Display text of a field, units included
    fn handle_text(&self, key: &str, value: &str) -> Result<(), HandlerError>;

    /// Numeric value of a field
    fn handle_value(&self, key: &str, value: f64) -> Result<(), HandlerError>;

    /// A package is about to report values
    fn switch_package(&self, package: &Package) -> Result<(), HandlerError>;
}

impl<T: DataHandler + ?Sized> DataHandler for Arc<T> {
    fn handle_text(&self, key: &str, value: &str) -> Result<(), HandlerError> {
        (**self).handle_text(key, value)
    }

    fn handle_value(&self, key: &str, value: f64) -> Result<(), HandlerError> {
        (**self).handle_value(key, value)
    }

    fn switch_package(&self, package: &Package) -> Result<(), HandlerError> {
        (**self).switch_package(package)
    }
}

/// Fixed, ordered fan-out to several handlers.
///
/// Every event reaches every handler in registration order. A failing
/// handler is logged and does not keep the event from later handlers.
#[derive(Default)]
pub struct CompositeDataHandler {
    handlers: Vec<Box<dyn DataHandler>>,
}

impl CompositeDataHandler {
    /// Compose the given handlers
    pub fn new(handlers: Vec<Box<dyn DataHandler>>) -> Self {
        Self { handlers }
    }

    /// Builder-style append
    pub fn with(mut self, handler: impl DataHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Number of handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn for_each(&self, event: &str, f: impl Fn(&dyn DataHandler) -> Result<(), HandlerError>) {
        for (idx, handler) in self.handlers.iter().enumerate() {
            if let Err(e) = f(handler.as_ref()) {
                warn!("Data handler #{} failed on {}: {}", idx, event, e);
            }
        }
    }
}

impl DataHandler for CompositeDataHandler {
    fn handle_text(&self, key: &str, value: &str) -> Result<(), HandlerError> {
        self.for_each(key, |h| h.handle_text(key, value));
        Ok(())
    }

    fn handle_value(&self, key: &str, value: f64) -> Result<(), HandlerError> {
        self.for_each(key, |h| h.handle_value(key, value));
        Ok(())
    }

    fn switch_package(&self, package: &Package) -> Result<(), HandlerError> {
        self.for_each(package.name(), |h| h.switch_package(package));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Field;
    use crate::command::{Command, DiagCommand};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        events: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Recorder {
        fn record(&self, event: String) -> Result<(), HandlerError> {
            self.events.lock().unwrap().push(format!("{}:{}", self.name, event));
            if self.fail {
                Err(HandlerError::Rejected {
                    key: event,
                    message: "always fails".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl DataHandler for Recorder {
        fn handle_text(&self, key: &str, value: &str) -> Result<(), HandlerError> {
            self.record(format!("{}={}", key, value))
        }

        fn handle_value(&self, key: &str, value: f64) -> Result<(), HandlerError> {
            self.record(format!("{}#{}", key, value))
        }

        fn switch_package(&self, package: &Package) -> Result<(), HandlerError> {
            self.record(format!("switch {}", package.name()))
        }
    }

    #[test]
    fn test_fan_out_in_order_despite_failures() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let composite = CompositeDataHandler::default()
            .with(Recorder {
                name: "a",
                events: events.clone(),
                fail: true,
            })
            .with(Recorder {
                name: "b",
                events: events.clone(),
                fail: false,
            });

        let pkg = Package::new(
            "p",
            "",
            vec![],
            vec![DiagCommand::new(
                Command::new("ATRV", None, 1000).unwrap(),
                vec![Field::text("v", "v")],
            )],
        )
        .unwrap();

        composite.switch_package(&pkg).unwrap();
        composite.handle_text("v", "12.6V").unwrap();
        composite.handle_value("v", 12.5).unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "a:switch p",
                "b:switch p",
                "a:v=12.6V",
                "b:v=12.6V",
                "a:v#12.5",
                "b:v#12.5",
            ]
        );
    }
}
