#![warn(missing_docs)]

//! Register catalogue schema
//!
//! Devices expose their register space through a *catalogue*: a description
//! of every register with its path, numeric address, shape (channels ×
//! elements), data descriptor, accessibility and the set of supported access
//! mode flags. The catalogue is produced by map-file parsers or by backends
//! themselves and consumed by the accessor layer in the `device-access`
//! crate, which relies on it being consistent with the actual accessor
//! behaviour.
//!
//! This crate contains only the schema structs and their (de)serialisation;
//! it performs no device I/O.

mod access_mode;
mod data_descriptor;
mod register_path;
mod registers;

pub use access_mode::{AccessMode, AccessModeFlags};
pub use data_descriptor::{DataDescriptor, ScalarType};
pub use register_path::RegisterPath;
pub use registers::{InterruptId, RegisterAccess, RegisterCatalogue, RegisterInfo};

/// Errors produced while working with catalogue data.
#[derive(thiserror::Error, docsplay::Display, Debug, Clone, PartialEq, Eq)]
pub enum CatalogueError {
    /// Unknown access mode flag string: '{0}'
    UnknownAccessModeFlag(String),

    /// The register '{0}' is not listed in the catalogue.
    UnknownRegister(RegisterPath),
}
