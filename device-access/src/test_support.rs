//! In-memory accessor used by the unit tests of the decorator and transfer
//! group modules.

use crate::accessor::{Buffer2D, NDRegisterAccessor, UserType};
use crate::transfer::{TransferElement, TransferState, TransferType};
use crate::{AccessModeFlags, Error, RegisterPath, VersionNumber};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared "remote" value a [`TestAccessor`] reads from and writes to.
pub struct TestRegister<T> {
    pub value: Mutex<Vec<T>>,
    pub fail_read: AtomicBool,
    pub fail_write: AtomicBool,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl<T: UserType> TestRegister<T> {
    pub fn new(initial: Vec<T>) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(initial),
            fail_read: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }
}

/// A plain synchronous accessor over a [`TestRegister`].
pub struct TestAccessor<T: UserType> {
    state: TransferState,
    buffer: Buffer2D<T>,
    staging: Vec<T>,
    register: Arc<TestRegister<T>>,
}

impl<T: UserType> TestAccessor<T> {
    pub fn new(register: Arc<TestRegister<T>>) -> Self {
        let samples = register.value.lock().unwrap().len();
        Self {
            state: TransferState::new(RegisterPath::new("TEST/REG"), AccessModeFlags::empty()),
            buffer: Buffer2D::new(1, samples),
            staging: vec![T::default(); samples],
            register,
        }
    }
}

impl<T: UserType> TransferElement for TestAccessor<T> {
    fn state(&self) -> &TransferState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TransferState {
        &mut self.state
    }

    fn is_readable(&self) -> bool {
        true
    }

    fn is_writeable(&self) -> bool {
        true
    }

    fn do_read_transfer_sync(&mut self) -> Result<(), Error> {
        self.register.reads.fetch_add(1, Ordering::Relaxed);
        if self.register.fail_read.load(Ordering::Relaxed) {
            return Err(Error::runtime("test register read failure"));
        }
        self.staging.clone_from(&self.register.value.lock().unwrap());
        Ok(())
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool, Error> {
        self.register.writes.fetch_add(1, Ordering::Relaxed);
        if self.register.fail_write.load(Ordering::Relaxed) {
            return Err(Error::runtime("test register write failure"));
        }
        self.register.value.lock().unwrap().clone_from(&self.staging);
        Ok(false)
    }

    fn do_pre_write(&mut self, _: TransferType, _: VersionNumber) -> Result<(), Error> {
        self.staging.clone_from(self.buffer.channel_mut(0));
        Ok(())
    }

    fn do_post_read(&mut self, _: TransferType, update_data_buffer: bool) -> Result<(), Error> {
        if update_data_buffer {
            std::mem::swap(self.buffer.channel_mut(0), &mut self.staging);
            self.state.version_number = VersionNumber::new();
        }
        Ok(())
    }
}

impl<T: UserType> NDRegisterAccessor<T> for TestAccessor<T> {
    fn buffer(&self) -> &Buffer2D<T> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Buffer2D<T> {
        &mut self.buffer
    }
}
