//! In-memory backend with controllable fault injection.
//!
//! The exception dummy holds its register space in process memory and is the
//! backend the test harness drives every protocol contract through: it can
//! throw on request in open, read and write, counts writes per register,
//! feeds push-type subscriptions through an explicit trigger, and exposes
//! the interrupt dispatchers through the `DUMMY_INTERRUPT` pseudo
//! registers.

use crate::accessor::async_accessor::SubscriberChannel;
use crate::accessor::{
    numeric_to_user_type, user_type_to_numeric, with_user_type, Buffer2D, NDRegisterAccessor,
    NDRegisterAccessorExt, UserType,
};
use crate::backend::{BackendState, DeviceBackend};
use crate::dispatch::InterruptDispatcher;
use crate::transfer::queue::{Payload, QueueElement};
use crate::transfer::{TransferElement, TransferState, TransferType};
use crate::{
    AccessMode, AccessModeFlags, Error, InterruptId, RegisterCatalogue, RegisterInfo,
    RegisterPath, VersionNumber,
};
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Path qualifier exposing an otherwise read-only register as writeable.
const DUMMY_WRITEABLE: &str = "DUMMY_WRITEABLE";
/// Path qualifier promoting a register to push-type delivery.
const PUSH_READ: &str = "PUSH_READ";

/// Parses `/DUMMY_INTERRUPT_<controller>_<interrupt>` pseudo register
/// paths.
fn parse_dummy_interrupt(path: &RegisterPath) -> Option<InterruptId> {
    if path.len() != 1 {
        return None;
    }
    let rest = path.last_component()?.strip_prefix("DUMMY_INTERRUPT_")?;
    let (controller, index) = rest.split_once('_')?;
    Some(InterruptId::new(
        controller.parse().ok()?,
        index.parse().ok()?,
    ))
}

#[derive(Default, Clone, Copy)]
struct WriteRecord {
    count: usize,
    order: u64,
}

/// An in-memory device with fault injection, used by the test harness.
pub struct ExceptionDummy {
    state: BackendState,
    catalogue: RegisterCatalogue,
    memory: Mutex<Vec<i32>>,

    /// Makes the next `open()` fail with a runtime error.
    pub throw_exception_open: AtomicBool,
    /// Makes read transfers fail with a runtime error.
    pub throw_exception_read: AtomicBool,
    /// Makes write transfers fail with a runtime error.
    pub throw_exception_write: AtomicBool,
    there_have_been_exceptions: AtomicBool,

    dispatchers: Mutex<BTreeMap<InterruptId, Arc<InterruptDispatcher>>>,
    push_variables: Mutex<BTreeMap<RegisterPath, Vec<Weak<dyn PushVariable>>>>,
    async_read_active: AtomicBool,

    write_records: Mutex<BTreeMap<u64, WriteRecord>>,
    write_order_counter: AtomicU64,

    me: Weak<ExceptionDummy>,
}

impl ExceptionDummy {
    /// Creates a closed dummy device serving the given catalogue. The
    /// register space is zero-initialised.
    pub fn new(catalogue: RegisterCatalogue) -> Arc<Self> {
        let words = catalogue
            .iter()
            .map(|info| info.address as usize / 4 + info.channels * info.elements)
            .max()
            .unwrap_or(0);
        Arc::new_cyclic(|me| Self {
            state: BackendState::new(),
            catalogue,
            memory: Mutex::new(vec![0; words]),
            throw_exception_open: AtomicBool::new(false),
            throw_exception_read: AtomicBool::new(false),
            throw_exception_write: AtomicBool::new(false),
            there_have_been_exceptions: AtomicBool::new(false),
            dispatchers: Mutex::new(BTreeMap::new()),
            push_variables: Mutex::new(BTreeMap::new()),
            async_read_active: AtomicBool::new(false),
            write_records: Mutex::new(BTreeMap::new()),
            write_order_counter: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    fn me(&self) -> Arc<ExceptionDummy> {
        self.me.upgrade().expect("the backend is alive while in use")
    }

    fn me_dyn(&self) -> Arc<dyn DeviceBackend> {
        self.me()
    }

    /// Directly writes raw words into the register space, bypassing the
    /// accessor path. Intended for tests setting up remote values.
    pub fn write_raw(&self, path: &RegisterPath, values: &[i32]) -> Result<(), Error> {
        let info = self.catalogue.get_or_err(path)?.clone();
        let start = info.address as usize / 4;
        let mut memory = self.memory.lock().unwrap();
        memory[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }

    /// Directly reads the raw words of a register, bypassing the accessor
    /// path.
    pub fn read_raw(&self, path: &RegisterPath) -> Result<Vec<i32>, Error> {
        let info = self.catalogue.get_or_err(path)?.clone();
        let start = info.address as usize / 4;
        let memory = self.memory.lock().unwrap();
        Ok(memory[start..start + info.channels * info.elements].to_vec())
    }

    /// Number of accessor writes to the register since backend creation.
    /// Only counts writes starting at the beginning of the register.
    pub fn write_count(&self, path: &RegisterPath) -> Result<usize, Error> {
        let info = self.catalogue.get_or_err(path)?.clone();
        Ok(self
            .write_records
            .lock()
            .unwrap()
            .get(&info.address)
            .map_or(0, |record| record.count))
    }

    /// Global ordering stamp of the last write to the register; later
    /// writes anywhere on the device have larger stamps.
    pub fn write_order(&self, path: &RegisterPath) -> Result<u64, Error> {
        let info = self.catalogue.get_or_err(path)?.clone();
        Ok(self
            .write_records
            .lock()
            .unwrap()
            .get(&info.address)
            .map_or(0, |record| record.order))
    }

    /// Delivers the current value of `path` to all of its push-type
    /// subscriptions with a fresh version number.
    pub fn trigger_push(&self, path: &RegisterPath) {
        self.trigger_push_with_version(path, VersionNumber::new());
    }

    /// Like [`trigger_push`](Self::trigger_push) with an explicit version,
    /// so several registers can share one version number.
    pub fn trigger_push_with_version(&self, path: &RegisterPath, version: VersionNumber) {
        let entries = self.live_push_variables(Some(path));
        for entry in entries {
            entry.trigger(version);
        }
    }

    /// Whether asynchronous reads are currently activated. Test helper.
    pub fn async_read_activated(&self) -> bool {
        self.async_read_active.load(Ordering::Acquire)
    }

    /// The dispatcher serving the given interrupt, for tests triggering
    /// interrupts directly.
    pub fn interrupt_dispatcher(&self, interrupt: InterruptId) -> Result<Arc<InterruptDispatcher>, Error> {
        self.dispatcher_for(interrupt)
    }

    fn dispatcher_for(&self, interrupt: InterruptId) -> Result<Arc<InterruptDispatcher>, Error> {
        if !self.catalogue.has_interrupt(interrupt) {
            return Err(Error::logic(format!(
                "interrupt {interrupt} is not described in the catalogue of this device"
            )));
        }
        let mut dispatchers = self.dispatchers.lock().unwrap();
        let dispatcher = dispatchers.entry(interrupt).or_insert_with(|| {
            let backend: Weak<dyn DeviceBackend> = self.me.clone();
            let dispatcher = InterruptDispatcher::new(interrupt, backend);
            if self.async_read_active.load(Ordering::Acquire) {
                // subscriptions made after activate_async_read() must be
                // immediately active
                dispatcher.activate();
            }
            dispatcher
        });
        Ok(Arc::clone(dispatcher))
    }

    fn all_dispatchers(&self) -> Vec<Arc<InterruptDispatcher>> {
        self.dispatchers.lock().unwrap().values().cloned().collect()
    }

    fn live_push_variables(&self, path: Option<&RegisterPath>) -> Vec<Arc<dyn PushVariable>> {
        let mut map = self.push_variables.lock().unwrap();
        let mut live = Vec::new();
        match path {
            Some(path) => {
                if let Some(entries) = map.get_mut(path) {
                    entries.retain(|weak| weak.strong_count() > 0);
                    live.extend(entries.iter().filter_map(Weak::upgrade));
                }
            }
            None => {
                for entries in map.values_mut() {
                    entries.retain(|weak| weak.strong_count() > 0);
                    live.extend(entries.iter().filter_map(Weak::upgrade));
                }
            }
        }
        live
    }

    fn read_words(&self, word_address: usize, out: &mut [i32]) -> Result<(), Error> {
        self.check_active_exception()?;
        if self.throw_exception_read.load(Ordering::Acquire) {
            self.there_have_been_exceptions.store(true, Ordering::Release);
            return Err(Error::runtime("DummyException: read throws by request"));
        }
        let memory = self.memory.lock().unwrap();
        out.copy_from_slice(&memory[word_address..word_address + out.len()]);
        Ok(())
    }

    fn write_words(
        &self,
        word_address: usize,
        data: &[i32],
        counted_register: Option<u64>,
    ) -> Result<(), Error> {
        self.check_active_exception()?;
        if self.throw_exception_write.load(Ordering::Acquire) {
            self.there_have_been_exceptions.store(true, Ordering::Release);
            return Err(Error::runtime("DummyException: write throws by request"));
        }
        {
            let mut memory = self.memory.lock().unwrap();
            memory[word_address..word_address + data.len()].copy_from_slice(data);
        }
        if let Some(address) = counted_register {
            let order = self.write_order_counter.fetch_add(1, Ordering::Relaxed) + 1;
            let mut records = self.write_records.lock().unwrap();
            let record = records.entry(address).or_default();
            record.count += 1;
            record.order = record.order.max(order);
        }
        Ok(())
    }

    fn make_accessor<T: UserType>(
        &self,
        path: &RegisterPath,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn NDRegisterAccessor<T> + Send>, Error> {
        // pseudo register: interrupt trigger
        if let Some(interrupt) = parse_dummy_interrupt(path) {
            if number_of_words > 1 {
                return Err(Error::logic(
                    "DUMMY_INTERRUPT accessor register can have at most one element",
                ));
            }
            if word_offset != 0 {
                return Err(Error::logic(
                    "DUMMY_INTERRUPT accessor register cannot have any offset",
                ));
            }
            flags.check_for_unknown_flags(&[])?;
            let dispatcher = self.dispatcher_for(interrupt)?;
            return Ok(Box::new(DummyInterruptTriggerAccessor::<T>::new(
                self.me(),
                dispatcher,
                path.clone(),
            )));
        }

        // pseudo register qualifiers on the last path segment
        if let Some((base, qualifier)) = path.split_qualifier() {
            match qualifier {
                DUMMY_WRITEABLE => {
                    return self.make_plain_accessor::<T>(&base, path, number_of_words, word_offset, flags, true);
                }
                PUSH_READ if flags.has(AccessMode::WaitForNewData) => {
                    return self.make_push_accessor::<T>(&base, path, number_of_words, word_offset, flags);
                }
                _ => {}
            }
        }

        if flags.has(AccessMode::WaitForNewData) {
            // push-type delivery through the interrupt associated with the
            // register
            let info = self.catalogue.get_or_err(path)?.clone();
            let Some(interrupt) = info.interrupt else {
                return Err(Error::logic(format!(
                    "register '{path}' does not support AccessMode::wait_for_new_data"
                )));
            };
            let dispatcher = self.dispatcher_for(interrupt)?;
            let backend = self.me_dyn();
            return dispatcher.subscribe::<T>(&backend, path, number_of_words, word_offset, flags);
        }

        self.make_plain_accessor::<T>(path, path, number_of_words, word_offset, flags, false)
    }

    fn make_plain_accessor<T: UserType>(
        &self,
        register: &RegisterPath,
        requested_path: &RegisterPath,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
        writeable_override: bool,
    ) -> Result<Box<dyn NDRegisterAccessor<T> + Send>, Error> {
        flags.check_for_unknown_flags(&[AccessMode::Raw])?;
        let info = self.catalogue.get_or_err(register)?.clone();
        if flags.has(AccessMode::Raw) {
            if !info.supported_flags.has(AccessMode::Raw) {
                return Err(Error::logic(format!(
                    "register '{register}' does not support AccessMode::raw"
                )));
            }
            if info.descriptor.raw != Some(T::SCALAR_TYPE) {
                return Err(Error::logic(format!(
                    "raw access to register '{register}' requested with a user type not matching the raw type"
                )));
            }
        }
        let number_of_words = if number_of_words == 0 {
            info.elements.saturating_sub(word_offset)
        } else {
            number_of_words
        };
        if word_offset + number_of_words > info.elements || number_of_words == 0 {
            return Err(Error::logic(format!(
                "requested number of words and offset exceed the size of register '{register}' ({} elements)",
                info.elements
            )));
        }
        Ok(Box::new(DummyRegisterAccessor::<T>::new(
            self.me(),
            info,
            requested_path.clone(),
            number_of_words,
            word_offset,
            flags,
            writeable_override,
        )))
    }

    fn make_push_accessor<T: UserType>(
        &self,
        base: &RegisterPath,
        requested_path: &RegisterPath,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn NDRegisterAccessor<T> + Send>, Error> {
        let sync_flags = flags.without(AccessMode::WaitForNewData);
        let mut target =
            self.make_plain_accessor::<T>(base, base, number_of_words, word_offset, sync_flags, false)?;
        target.set_exception_backend(self.me_dyn());

        let entry = Arc::new(PushEntry::<T> {
            target: Mutex::new(target),
            channel: SubscriberChannel::new(),
        });
        {
            let mut map = self.push_variables.lock().unwrap();
            let entries = map.entry(base.clone()).or_default();
            entries.retain(|weak| weak.strong_count() > 0);
            let weak: Weak<PushEntry<T>> = Arc::downgrade(&entry);
            let weak: Weak<dyn PushVariable> = weak;
            entries.push(weak);
        }
        if self.async_read_active.load(Ordering::Acquire) {
            entry.activate(VersionNumber::new());
        }

        let (channels, samples) = {
            let target = entry.target.lock().unwrap();
            (target.number_of_channels(), target.number_of_samples())
        };
        Ok(Box::new(PushReadAccessor::<T>::new(
            self.me(),
            Arc::clone(&entry),
            requested_path.clone(),
            base.clone(),
            channels,
            samples,
            flags,
        )))
    }
}

impl DeviceBackend for ExceptionDummy {
    fn open(&self) -> Result<(), Error> {
        if self.throw_exception_open.load(Ordering::Acquire) {
            self.there_have_been_exceptions.store(true, Ordering::Release);
            return Err(Error::runtime("DummyException: open throws by request"));
        }
        self.state.set_open(true);
        self.state.clear_exception();
        self.there_have_been_exceptions.store(false, Ordering::Release);
        debug!(device = %self.device_info(), "opened");
        Ok(())
    }

    fn close(&self) {
        // wake any blocked reader before the device goes away
        self.set_exception("Device closed.");
        for dispatcher in self.all_dispatchers() {
            dispatcher.deactivate();
        }
        for entry in self.live_push_variables(None) {
            entry.deactivate();
        }
        self.async_read_active.store(false, Ordering::Release);
        self.state.set_open(false);
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn is_functional(&self) -> bool {
        self.state.is_open()
            && !self.throw_exception_open.load(Ordering::Acquire)
            && !self.there_have_been_exceptions.load(Ordering::Acquire)
            && !self.state.has_exception()
    }

    fn register_catalogue(&self) -> RegisterCatalogue {
        self.catalogue.clone()
    }

    fn device_info(&self) -> String {
        format!("ExceptionDummy ({} registers)", self.catalogue.len())
    }

    fn get_register_accessor_erased(
        &self,
        type_token: TypeId,
        path: &RegisterPath,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn Any + Send>, Error> {
        with_user_type!(type_token, T => {
            self.make_accessor::<T>(path, number_of_words, word_offset, flags)
                .map(|accessor| Box::new(accessor) as Box<dyn Any + Send>)
        } else {
            Err(Error::logic("the requested user type is not supported"))
        })
    }

    fn set_exception(&self, message: &str) {
        if !self.state.set_exception(message) {
            // already faulty; no further notifications
            return;
        }
        debug!(device = %self.device_info(), message, "entering fault state");
        self.async_read_active.store(false, Ordering::Release);
        let error = Error::runtime(message);
        for dispatcher in self.all_dispatchers() {
            dispatcher.send_exception(&error);
        }
        for entry in self.live_push_variables(None) {
            entry.send_exception(&error);
        }
    }

    fn activate_async_read(&self) {
        if !self.is_open() || self.state.has_exception() {
            return;
        }
        self.async_read_active.store(true, Ordering::Release);
        for dispatcher in self.all_dispatchers() {
            dispatcher.activate();
        }
        for entry in self.live_push_variables(None) {
            entry.activate(VersionNumber::new());
        }
    }

    fn check_active_exception(&self) -> Result<(), Error> {
        self.state.check_active_exception()
    }
}

/// Synchronous accessor over the dummy's in-memory register space.
struct DummyRegisterAccessor<T: UserType> {
    state: TransferState,
    buffer: Buffer2D<T>,
    staging: Vec<i32>,
    backend: Arc<ExceptionDummy>,
    info: RegisterInfo,
    number_of_words: usize,
    word_offset: usize,
    writeable_override: bool,
}

impl<T: UserType> DummyRegisterAccessor<T> {
    fn new(
        backend: Arc<ExceptionDummy>,
        info: RegisterInfo,
        name: RegisterPath,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
        writeable_override: bool,
    ) -> Self {
        Self {
            state: TransferState::new(name, flags),
            buffer: Buffer2D::new(info.channels, number_of_words),
            staging: vec![0; info.channels * number_of_words],
            backend,
            info,
            number_of_words,
            word_offset,
            writeable_override,
        }
    }

    /// Word address of the first addressed element of one channel.
    fn channel_word_address(&self, channel: usize) -> usize {
        self.info.address as usize / 4 + channel * self.info.elements + self.word_offset
    }
}

impl<T: UserType> TransferElement for DummyRegisterAccessor<T> {
    fn state(&self) -> &TransferState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TransferState {
        &mut self.state
    }

    fn is_readable(&self) -> bool {
        self.info.access.is_readable()
    }

    fn is_writeable(&self) -> bool {
        self.writeable_override || self.info.access.is_writeable()
    }

    fn do_pre_read(&mut self, _: TransferType) -> Result<(), Error> {
        if !self.backend.is_open() {
            return Err(Error::logic("Device not opened."));
        }
        if !self.is_readable() {
            return Err(Error::logic(format!(
                "register '{}' is not readable",
                self.state.name
            )));
        }
        Ok(())
    }

    fn do_read_transfer_sync(&mut self) -> Result<(), Error> {
        for channel in 0..self.info.channels {
            let address = self.channel_word_address(channel);
            let start = channel * self.number_of_words;
            self.backend
                .read_words(address, &mut self.staging[start..start + self.number_of_words])?;
        }
        Ok(())
    }

    fn do_post_read(&mut self, _: TransferType, update_data_buffer: bool) -> Result<(), Error> {
        if update_data_buffer {
            for channel in 0..self.info.channels {
                let start = channel * self.number_of_words;
                let samples = self.buffer.channel_mut(channel);
                for (sample, raw) in samples
                    .iter_mut()
                    .zip(&self.staging[start..start + self.number_of_words])
                {
                    *sample = numeric_to_user_type(*raw as f64);
                }
            }
            self.state.version_number = VersionNumber::new();
            self.state.data_validity = crate::DataValidity::Ok;
        }
        Ok(())
    }

    fn do_pre_write(&mut self, _: TransferType, _: VersionNumber) -> Result<(), Error> {
        if !self.backend.is_open() {
            return Err(Error::logic("Device not opened."));
        }
        if !self.is_writeable() {
            return Err(Error::logic(format!(
                "register '{}' is not writeable",
                self.state.name
            )));
        }
        for channel in 0..self.info.channels {
            let start = channel * self.number_of_words;
            for (raw, sample) in self.staging[start..start + self.number_of_words]
                .iter_mut()
                .zip(self.buffer.channel(channel))
            {
                *raw = numeric_to_user_type(user_type_to_numeric(*sample));
            }
        }
        Ok(())
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool, Error> {
        let counted = (self.word_offset == 0).then_some(self.info.address);
        for channel in 0..self.info.channels {
            let address = self.channel_word_address(channel);
            let start = channel * self.number_of_words;
            self.backend.write_words(
                address,
                &self.staging[start..start + self.number_of_words],
                if channel == 0 { counted } else { None },
            )?;
        }
        Ok(false)
    }
}

impl<T: UserType> NDRegisterAccessor<T> for DummyRegisterAccessor<T> {
    fn buffer(&self) -> &Buffer2D<T> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Buffer2D<T> {
        &mut self.buffer
    }
}

/// Accessor behind the `DUMMY_INTERRUPT` pseudo registers: every write
/// dispatches the associated interrupt. Reads return 1.
struct DummyInterruptTriggerAccessor<T: UserType> {
    state: TransferState,
    buffer: Buffer2D<T>,
    backend: Arc<ExceptionDummy>,
    dispatcher: Arc<InterruptDispatcher>,
}

impl<T: UserType> DummyInterruptTriggerAccessor<T> {
    fn new(
        backend: Arc<ExceptionDummy>,
        dispatcher: Arc<InterruptDispatcher>,
        name: RegisterPath,
    ) -> Self {
        let mut accessor = Self {
            state: TransferState::new(name, AccessModeFlags::empty()),
            buffer: Buffer2D::new(1, 1),
            backend,
            dispatcher,
        };
        accessor.set_value(numeric_to_user_type(1.0));
        accessor
    }

    fn check_usable(&self) -> Result<(), Error> {
        if !self.backend.is_open() {
            return Err(Error::logic("Device not opened."));
        }
        if !self.backend.is_functional() {
            return Err(Error::runtime("Exception reported by another accessor."));
        }
        Ok(())
    }
}

impl<T: UserType> TransferElement for DummyInterruptTriggerAccessor<T> {
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

    fn do_pre_read(&mut self, _: TransferType) -> Result<(), Error> {
        self.check_usable()
    }

    fn do_read_transfer_sync(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn do_post_read(&mut self, _: TransferType, update_data_buffer: bool) -> Result<(), Error> {
        if update_data_buffer {
            self.set_value(numeric_to_user_type(1.0));
            self.state.version_number = VersionNumber::new();
        }
        Ok(())
    }

    fn do_pre_write(&mut self, _: TransferType, _: VersionNumber) -> Result<(), Error> {
        self.check_usable()
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool, Error> {
        self.dispatcher.trigger();
        Ok(false)
    }
}

impl<T: UserType> NDRegisterAccessor<T> for DummyInterruptTriggerAccessor<T> {
    fn buffer(&self) -> &Buffer2D<T> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Buffer2D<T> {
        &mut self.buffer
    }
}

/// Producer-side object of one push-type subscription: the synchronous
/// target accessor plus the transport queue. The backend keeps a weak
/// reference; the reading accessor keeps it alive.
trait PushVariable: Send + Sync {
    /// Reads the target and delivers the value with the given version.
    fn trigger(&self, version: VersionNumber);
    /// Delivers one exception and deactivates the subscription.
    fn send_exception(&self, error: &Error);
    /// Activates the subscription and delivers the initial value.
    fn activate(&self, version: VersionNumber);
    /// Deactivates the subscription without delivering anything.
    fn deactivate(&self);
}

struct PushEntry<T: UserType> {
    target: Mutex<Box<dyn NDRegisterAccessor<T> + Send>>,
    channel: Arc<SubscriberChannel<T>>,
}

impl<T: UserType> PushVariable for PushEntry<T> {
    fn trigger(&self, version: VersionNumber) {
        let mut target = self.target.lock().unwrap();
        match target.read() {
            Ok(()) => {
                let payload = Payload {
                    value: target.buffer().clone(),
                    version,
                    validity: target.state().data_validity,
                };
                self.channel.send_destructively(payload);
            }
            Err(error) => {
                // the failing target read has already reported the fault to
                // the backend, which in turn delivered our exception; this
                // only covers triggers racing the fault transition
                self.channel.send_exception(error);
            }
        }
    }

    fn send_exception(&self, error: &Error) {
        self.channel.send_exception(error.clone());
    }

    fn activate(&self, version: VersionNumber) {
        let mut target = self.target.lock().unwrap();
        if self.channel.is_active() {
            return;
        }
        match target.read() {
            Ok(()) => {
                let payload = Payload {
                    value: target.buffer().clone(),
                    version,
                    validity: target.state().data_validity,
                };
                self.channel.activate(payload);
            }
            Err(_) => {
                // stay inactive; the fault fan-out handles notification
            }
        }
    }

    fn deactivate(&self) {
        self.channel.deactivate();
    }
}

/// Read side of a push-type subscription (`<register>.PUSH_READ`): a
/// promotion of a synchronous register to `wait_for_new_data`, fed by
/// [`ExceptionDummy::trigger_push`].
struct PushReadAccessor<T: UserType> {
    state: TransferState,
    buffer: Buffer2D<T>,
    entry: Arc<PushEntry<T>>,
    received: Option<Payload<T>>,
    backend: Arc<ExceptionDummy>,
    base_path: RegisterPath,
}

impl<T: UserType> PushReadAccessor<T> {
    fn new(
        backend: Arc<ExceptionDummy>,
        entry: Arc<PushEntry<T>>,
        name: RegisterPath,
        base_path: RegisterPath,
        channels: usize,
        samples: usize,
        flags: AccessModeFlags,
    ) -> Self {
        Self {
            state: TransferState::new(name, flags),
            buffer: Buffer2D::new(channels, samples),
            entry,
            received: None,
            backend,
            base_path,
        }
    }
}

impl<T: UserType> TransferElement for PushReadAccessor<T> {
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
        false
    }

    fn do_pre_read(&mut self, _: TransferType) -> Result<(), Error> {
        if !self.backend.is_open() {
            return Err(Error::logic("Cannot read from closed device."));
        }
        Ok(())
    }

    fn do_read_transfer_sync(&mut self) -> Result<(), Error> {
        unreachable!("wait_for_new_data accessors never transfer synchronously")
    }

    fn do_read_transfer_async(&mut self, blocking: bool) -> Result<bool, Error> {
        let received = if blocking {
            Some(self.entry.channel.queue.pop_wait()?)
        } else {
            self.entry.channel.queue.pop()?
        };
        match received {
            Some(payload) => {
                self.received = Some(payload);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn do_post_read(&mut self, _: TransferType, update_data_buffer: bool) -> Result<(), Error> {
        if update_data_buffer {
            if let Some(payload) = self.received.take() {
                self.state.version_number = payload.version;
                self.state.data_validity = payload.validity;
                self.buffer = payload.value;
            }
        }
        Ok(())
    }

    fn do_pre_write(&mut self, _: TransferType, _: VersionNumber) -> Result<(), Error> {
        Err(Error::logic(format!(
            "register '{}' is not writeable",
            self.state.name
        )))
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool, Error> {
        Err(Error::logic(format!(
            "register '{}' is not writeable",
            self.state.name
        )))
    }

    fn interrupt(&mut self) -> Result<(), Error> {
        self.entry
            .channel
            .queue
            .push_overwrite(QueueElement::Exception(Error::Interrupted));
        Ok(())
    }
}

impl<T: UserType> NDRegisterAccessor<T> for PushReadAccessor<T> {
    fn buffer(&self) -> &Buffer2D<T> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Buffer2D<T> {
        &mut self.buffer
    }
}

impl<T: UserType> Drop for PushReadAccessor<T> {
    fn drop(&mut self) {
        let mut map = self.backend.push_variables.lock().unwrap();
        if let Some(entries) = map.get_mut(&self.base_path) {
            let ours = Arc::as_ptr(&self.entry) as *const ();
            entries.retain(|weak| {
                weak.upgrade()
                    .is_some_and(|strong| Arc::as_ptr(&strong) as *const () != ours)
            });
            if entries.is_empty() {
                map.remove(&self.base_path);
            }
        }
    }
}
