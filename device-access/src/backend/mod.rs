//! Device backends: the owners of register accessors.
//!
//! A backend controls open/close, the fault state and the asynchronous
//! activation gate of one device, and hands out the typed accessors all I/O
//! goes through.

pub mod dummy;
pub mod subdevice;

use crate::accessor::{downcast_accessor, NDRegisterAccessor, UserType};
use crate::{AccessModeFlags, Error, RegisterCatalogue, RegisterPath};
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Interface of all device backends.
///
/// Backends are shared between threads behind `Arc<dyn DeviceBackend>`;
/// every operation takes `&self` and synchronises internally.
///
/// Accessor creation is type-erased at this level: a [`TypeId`] token names
/// the requested user type and the result is downcast by the typed helper
/// [`get_register_accessor`]. This keeps the trait object-safe while the
/// public API presents one typed accessor interface per user type.
pub trait DeviceBackend: Send + Sync {
    /// Opens the device. Re-opening after a fault clears the fault state;
    /// this is the only recovery path for runtime errors.
    fn open(&self) -> Result<(), Error>;

    /// Closes the device.
    fn close(&self);

    /// Whether the device has been opened. A backend stays open while
    /// faulty.
    fn is_open(&self) -> bool;

    /// Whether the device is working as intended. Shall only return `false`
    /// on known errors (or while closed); if the state is unknown the
    /// response is `true` and client code finds out by reading or writing.
    fn is_functional(&self) -> bool;

    /// The register catalogue with detailed information on all registers.
    fn register_catalogue(&self) -> RegisterCatalogue;

    /// A backend implementation dependent information string for display
    /// purposes only.
    fn device_info(&self) -> String;

    /// Creates an accessor for the register at `path`, type-erased behind
    /// `Any`. `number_of_words == 0` selects the full register length.
    fn get_register_accessor_erased(
        &self,
        type_token: TypeId,
        path: &RegisterPath,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn Any + Send>, Error>;

    /// Puts the backend into its fault state. All accessors of the backend
    /// throw runtime errors on read and write until a successful
    /// [`open`](Self::open). Exactly one exception is delivered to every
    /// active asynchronous accessor; repeated calls while faulty do
    /// nothing.
    fn set_exception(&self, message: &str);

    /// Activates asynchronous reads for all accessors with
    /// `wait_for_new_data`. No effect while the device is closed or
    /// faulty. Activated subscriptions each receive one initial value.
    fn activate_async_read(&self) {}

    /// Raises the appropriate runtime error if the backend has an active
    /// exception.
    fn check_active_exception(&self) -> Result<(), Error>;
}

/// Creates a typed accessor from any backend and wires its exception
/// reporting back to that backend.
pub fn get_register_accessor<T: UserType>(
    backend: &Arc<dyn DeviceBackend>,
    path: impl Into<RegisterPath>,
    number_of_words: usize,
    word_offset: usize,
    flags: AccessModeFlags,
) -> Result<Box<dyn NDRegisterAccessor<T> + Send>, Error> {
    let erased = backend.get_register_accessor_erased(
        TypeId::of::<T>(),
        &path.into(),
        number_of_words,
        word_offset,
        flags,
    )?;
    let mut accessor = downcast_accessor::<T>(erased)?;
    accessor.set_exception_backend(Arc::clone(backend));
    Ok(accessor)
}

/// The open and fault bookkeeping shared by backend implementations.
///
/// The fault state is one-shot: the first [`set_exception`] after (re)open
/// records the message and reports the transition, repeated calls are
/// ignored until [`clear_exception`] on the next successful open.
///
/// [`set_exception`]: BackendState::set_exception
/// [`clear_exception`]: BackendState::clear_exception
pub struct BackendState {
    opened: AtomicBool,
    has_exception: AtomicBool,
    exception_message: Mutex<String>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendState {
    /// Creates the state for a closed, fault-free backend.
    pub fn new() -> Self {
        Self {
            opened: AtomicBool::new(false),
            has_exception: AtomicBool::new(false),
            exception_message: Mutex::new(String::new()),
        }
    }

    /// Whether the device is open.
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Records the open/closed state.
    pub fn set_open(&self, open: bool) {
        self.opened.store(open, Ordering::Release);
    }

    /// Whether the backend is in its fault state.
    pub fn has_exception(&self) -> bool {
        self.has_exception.load(Ordering::Acquire)
    }

    /// Enters the fault state. Returns whether this call performed the
    /// transition (`false` while already faulty).
    pub fn set_exception(&self, message: &str) -> bool {
        let mut slot = self.exception_message.lock().unwrap();
        if self.has_exception.swap(true, Ordering::AcqRel) {
            return false;
        }
        *slot = message.to_owned();
        true
    }

    /// Leaves the fault state; called from a successful open.
    pub fn clear_exception(&self) {
        let mut slot = self.exception_message.lock().unwrap();
        self.has_exception.store(false, Ordering::Release);
        slot.clear();
    }

    /// Raises the recorded runtime error if the backend is faulty.
    pub fn check_active_exception(&self) -> Result<(), Error> {
        if self.has_exception() {
            return Err(Error::runtime(
                self.exception_message.lock().unwrap().clone(),
            ));
        }
        Ok(())
    }
}
