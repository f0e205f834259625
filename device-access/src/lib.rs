//! Typed, buffered register access to devices behind heterogeneous
//! transports.
//!
//! Applications obtain [`NDRegisterAccessor`]s from a [`Device`] (by
//! register path, shape and [`AccessModeFlags`]) and call `read` / `write`
//! on them. Every accessor implements the staged transfer protocol of
//! [`TransferElement`]: a pre stage, the hardware transfer, and a post
//! stage committing data into the accessor's channels × samples application
//! buffer, with well-defined failure and recovery semantics. Registers with
//! [`AccessMode::WaitForNewData`] are event driven: an interrupt dispatcher
//! performs one synchronous read per interrupt and fans the value out to
//! every subscriber through a bounded queue.
//!
//! ```no_run
//! use device_access::{AccessModeFlags, Device, NDRegisterAccessorExt};
//! # use device_access::RegisterCatalogue;
//! # use device_access::backend::dummy::ExceptionDummy;
//!
//! # fn main() -> Result<(), device_access::Error> {
//! # let backend = ExceptionDummy::new(RegisterCatalogue::new());
//! let device = Device::new(backend);
//! device.open()?;
//!
//! let mut temperature =
//!     device.get_register_accessor::<f64>("BOARD/TEMPERATURE", 0, 0, AccessModeFlags::empty())?;
//! temperature.read()?;
//! println!("{}", temperature.value());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod accessor;
pub mod backend;
mod device;
pub mod dispatch;
mod error;
#[cfg(test)]
pub(crate) mod test_support;
pub mod transfer;
mod version;

pub use crate::accessor::{
    AccessorDescriptor, Buffer2D, NDRegisterAccessor, NDRegisterAccessorExt, SharedAccessor,
    UserType,
};
pub use crate::backend::{get_register_accessor, DeviceBackend};
pub use crate::device::Device;
pub use crate::error::Error;
pub use crate::transfer::group::TransferGroup;
pub use crate::transfer::{
    DataValidity, TransferElement, TransferElementId, TransferState, TransferType,
};
pub use crate::version::VersionNumber;

pub use device_access_catalogue::{
    AccessMode, AccessModeFlags, CatalogueError, DataDescriptor, InterruptId, RegisterAccess,
    RegisterCatalogue, RegisterInfo, RegisterPath, ScalarType,
};
