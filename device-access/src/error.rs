#![warn(missing_docs)]

use device_access_catalogue::CatalogueError;

/// The error taxonomy of the transfer protocol.
///
/// Every failure surfacing from a register accessor is one of these kinds.
/// The distinction matters for recovery: a [`Error::Logic`] is a programming
/// error and is never recoverable at runtime, a [`Error::Runtime`] is a
/// transient device condition recovered by re-opening the owning backend,
/// and [`Error::Interrupted`] merely reports that a blocking read was woken
/// by [`interrupt()`](crate::TransferElement::interrupt) and must not mark
/// the backend as faulty.
///
/// The type is `Clone` because the asynchronous path delivers one owned copy
/// of an error to every active subscriber queue.
#[derive(thiserror::Error, docsplay::Display, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Logic error: {0}
    Logic(String),

    /// Runtime error: {0}
    Runtime(String),

    /// A blocking read was interrupted.
    Interrupted,
}

impl Error {
    /// Creates a logic error with the given message.
    pub fn logic(message: impl Into<String>) -> Self {
        Error::Logic(message.into())
    }

    /// Creates a runtime error with the given message.
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    /// Whether this is a transient device condition which marks the owning
    /// backend as faulty.
    pub fn is_runtime(&self) -> bool {
        matches!(self, Error::Runtime(_))
    }

    /// The message carried by the error.
    pub fn message(&self) -> &str {
        match self {
            Error::Logic(message) | Error::Runtime(message) => message,
            Error::Interrupted => "A blocking read was interrupted.",
        }
    }
}

impl From<CatalogueError> for Error {
    fn from(err: CatalogueError) -> Self {
        // Catalogue misuse (unknown flags, unknown registers) is programmer
        // misuse from the protocol's point of view.
        Error::Logic(err.to_string())
    }
}
