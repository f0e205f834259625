//! The application-facing device handle.

use crate::accessor::{NDRegisterAccessor, UserType};
use crate::backend::{self, DeviceBackend};
use crate::{AccessModeFlags, Error, RegisterCatalogue, RegisterPath};
use std::sync::Arc;

/// A handle to one device.
///
/// `Device` is a thin wrapper over the shared backend; it is cheap to clone
/// and all clones refer to the same device. Accessors obtained from it stay
/// valid across fault and recovery cycles of the backend.
#[derive(Clone)]
pub struct Device {
    backend: Arc<dyn DeviceBackend>,
}

impl Device {
    /// Creates the handle for the given backend.
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self { backend }
    }

    /// Opens the device. After a fault this is the recovery path: a
    /// successful open clears the fault state.
    pub fn open(&self) -> Result<(), Error> {
        self.backend.open()
    }

    /// Closes the device.
    pub fn close(&self) {
        self.backend.close()
    }

    /// Whether the device has been opened.
    pub fn is_open(&self) -> bool {
        self.backend.is_open()
    }

    /// Whether the device is working as intended.
    pub fn is_functional(&self) -> bool {
        self.backend.is_functional()
    }

    /// The catalogue describing all registers of the device.
    pub fn register_catalogue(&self) -> RegisterCatalogue {
        self.backend.register_catalogue()
    }

    /// A backend dependent information string, for display only.
    pub fn device_info(&self) -> String {
        self.backend.device_info()
    }

    /// Obtains a typed accessor for the register at `path`, addressing
    /// `number_of_words` elements starting `word_offset` elements into the
    /// register. `number_of_words == 0` selects the full register.
    pub fn get_register_accessor<T: UserType>(
        &self,
        path: impl Into<RegisterPath>,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn NDRegisterAccessor<T> + Send>, Error> {
        backend::get_register_accessor::<T>(
            &self.backend,
            path,
            number_of_words,
            word_offset,
            flags,
        )
    }

    /// Activates asynchronous reads for all accessors with
    /// `wait_for_new_data`.
    pub fn activate_async_read(&self) {
        self.backend.activate_async_read()
    }

    /// Puts the device into its fault state, as if a transfer had failed.
    pub fn set_exception(&self, message: &str) {
        self.backend.set_exception(message)
    }

    /// The shared backend, for backend specific operations.
    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }
}
