//! Backend for subdevices reached through registers of another device.
//!
//! A subdevice exposes a contiguous address space as if it were its own
//! device, but routes every access through one or more registers of a
//! *target* device. The passthrough protocol is selected by the `type`
//! configuration parameter:
//!
//! - `area`: a 1-D register of the target serves as the address space;
//!   offsets map directly, no handshake.
//! - `areaHandshake`: same window, but each write is followed by polling a
//!   status register until it reads zero.
//! - `2regs`: per transfer, write the word address to an address register,
//!   then the data to a data register, then wait a fixed interval.
//! - `3regs`: like `2regs`, but instead of the fixed wait, poll a status
//!   register until zero (or timeout).
//! - `6regs`: extension of `3regs` supporting reads and multiple chips:
//!   a read request trigger register initiates each word read, the result
//!   is fetched from a read data register, and a chip select register is
//!   written once per transaction.
//!
//! The protocol for reading through `2regs`/`3regs` is not finalised;
//! these types are write-only.

use crate::accessor::{
    numeric_to_user_type, user_type_to_numeric, with_user_type, Buffer2D, NDRegisterAccessor,
    NDRegisterAccessorExt, UserType,
};
use crate::backend::{get_register_accessor, BackendState, DeviceBackend};
use crate::transfer::{TransferElement, TransferState, TransferType};
use crate::{
    AccessMode, AccessModeFlags, DataValidity, Error, RegisterCatalogue, RegisterPath,
    VersionNumber,
};
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::trace;

/// The passthrough protocol of a subdevice.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubdeviceType {
    /// The address space is visible as an area in the target device.
    Area,
    /// Like [`Area`](Self::Area), but writes wait for status 0.
    AreaHandshake,
    /// Address and data register, fixed wait between operations.
    TwoRegisters,
    /// Address, data and status register; status must be 0 when idle.
    ThreeRegisters,
    /// Six registers; allows writes, reads and multiple chips.
    SixRegisters,
}

impl std::str::FromStr for SubdeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "area" => Ok(SubdeviceType::Area),
            "areaHandshake" => Ok(SubdeviceType::AreaHandshake),
            "2regs" => Ok(SubdeviceType::TwoRegisters),
            "3regs" => Ok(SubdeviceType::ThreeRegisters),
            "6regs" => Ok(SubdeviceType::SixRegisters),
            other => Err(Error::logic(format!(
                "unknown subdevice type '{other}' (expected area, areaHandshake, 2regs, 3regs or 6regs)"
            ))),
        }
    }
}

/// Parsed configuration of a subdevice, from the key/value parameters of
/// its device descriptor.
#[derive(Clone, Debug)]
pub struct SubdeviceConfig {
    /// The passthrough protocol.
    pub subdevice_type: SubdeviceType,
    /// Target register serving as the address space (area types).
    pub area: Option<RegisterPath>,
    /// Target address register (register types).
    pub address: Option<RegisterPath>,
    /// Target data register (register types).
    pub data: Option<RegisterPath>,
    /// Target status register (`areaHandshake`, `3regs`, `6regs`).
    pub status: Option<RegisterPath>,
    /// Target read request trigger register (`6regs`).
    pub read_request: Option<RegisterPath>,
    /// Target read data register (`6regs`).
    pub read_data: Option<RegisterPath>,
    /// Target chip select register (`6regs`).
    pub chip_select: Option<RegisterPath>,
    /// Chip index written to the chip select register.
    pub chip_index: i32,
    /// Polling interval of the status loop, or fixed wait for `2regs`.
    pub sleep: Duration,
    /// Delay between the address and data writes.
    pub data_delay: Duration,
    /// Give-up time of the status polling loop.
    pub timeout: Duration,
}

impl SubdeviceConfig {
    /// Parses the enumerated subdevice options. The `device` and `map` keys
    /// are consumed by the factory (target resolution and map file parsing)
    /// and accepted but ignored here; any other unknown key fails.
    pub fn from_parameters(parameters: &BTreeMap<String, String>) -> Result<Self, Error> {
        for key in parameters.keys() {
            if !matches!(
                key.as_str(),
                "type"
                    | "device"
                    | "map"
                    | "area"
                    | "address"
                    | "data"
                    | "status"
                    | "readRequest"
                    | "readData"
                    | "chipSelectRegister"
                    | "chipIndex"
                    | "sleep"
                    | "dataDelay"
                    | "timeout"
            ) {
                return Err(Error::logic(format!(
                    "unknown subdevice parameter '{key}'"
                )));
            }
        }

        let get_path = |key: &str| parameters.get(key).map(RegisterPath::new);
        let get_number = |key: &str| -> Result<Option<u64>, Error> {
            parameters
                .get(key)
                .map(|value| {
                    value.parse::<u64>().map_err(|_| {
                        Error::logic(format!(
                            "subdevice parameter '{key}' must be an unsigned integer, got '{value}'"
                        ))
                    })
                })
                .transpose()
        };

        let subdevice_type: SubdeviceType = parameters
            .get("type")
            .ok_or_else(|| Error::logic("missing mandatory subdevice parameter 'type'"))?
            .parse()?;

        let config = Self {
            subdevice_type,
            area: get_path("area"),
            address: get_path("address"),
            data: get_path("data"),
            status: get_path("status"),
            read_request: get_path("readRequest"),
            read_data: get_path("readData"),
            chip_select: get_path("chipSelectRegister"),
            chip_index: get_number("chipIndex")?.unwrap_or(0) as i32,
            sleep: Duration::from_micros(get_number("sleep")?.unwrap_or(100)),
            data_delay: Duration::from_micros(get_number("dataDelay")?.unwrap_or(0)),
            timeout: Duration::from_millis(get_number("timeout")?.unwrap_or(10_000)),
        };

        let require = |present: bool, key: &str| -> Result<(), Error> {
            if present {
                Ok(())
            } else {
                Err(Error::logic(format!(
                    "subdevice type '{:?}' requires the parameter '{key}'",
                    config.subdevice_type
                )))
            }
        };

        match config.subdevice_type {
            SubdeviceType::Area => {
                require(config.area.is_some(), "area")?;
            }
            SubdeviceType::AreaHandshake => {
                require(config.area.is_some(), "area")?;
                require(config.status.is_some(), "status")?;
            }
            SubdeviceType::TwoRegisters => {
                require(config.address.is_some(), "address")?;
                require(config.data.is_some(), "data")?;
                require(parameters.contains_key("sleep"), "sleep")?;
            }
            SubdeviceType::ThreeRegisters => {
                require(config.address.is_some(), "address")?;
                require(config.data.is_some(), "data")?;
                require(config.status.is_some(), "status")?;
            }
            SubdeviceType::SixRegisters => {
                require(config.address.is_some(), "address")?;
                require(config.data.is_some(), "data")?;
                require(config.status.is_some(), "status")?;
                require(config.read_request.is_some(), "readRequest")?;
                require(config.read_data.is_some(), "readData")?;
                require(config.chip_select.is_some(), "chipSelectRegister")?;
            }
        }
        Ok(config)
    }

    fn needs_status(&self) -> bool {
        matches!(
            self.subdevice_type,
            SubdeviceType::AreaHandshake | SubdeviceType::ThreeRegisters | SubdeviceType::SixRegisters
        )
    }
}

/// Backend presenting a virtual register space reached through registers of
/// a target device.
pub struct SubdeviceBackend {
    state: BackendState,
    config: SubdeviceConfig,
    target: Arc<dyn DeviceBackend>,
    catalogue: RegisterCatalogue,
    /// Serialises all passthrough transactions: only one word sequence runs
    /// at a time, however many accessors are in use.
    transaction: Arc<Mutex<()>>,
    me: Weak<SubdeviceBackend>,
}

impl SubdeviceBackend {
    /// Creates the subdevice over an already resolved target backend. The
    /// catalogue describes the subdevice's own register space (the parsed
    /// `map` file).
    pub fn new(
        config: SubdeviceConfig,
        target: Arc<dyn DeviceBackend>,
        catalogue: RegisterCatalogue,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            state: BackendState::new(),
            config,
            target,
            catalogue,
            transaction: Arc::new(Mutex::new(())),
            me: me.clone(),
        })
    }

    /// Convenience constructor parsing the parameter map first.
    pub fn from_parameters(
        parameters: &BTreeMap<String, String>,
        target: Arc<dyn DeviceBackend>,
        catalogue: RegisterCatalogue,
    ) -> Result<Arc<Self>, Error> {
        Ok(Self::new(
            SubdeviceConfig::from_parameters(parameters)?,
            target,
            catalogue,
        ))
    }

    /// The parsed configuration.
    pub fn config(&self) -> &SubdeviceConfig {
        &self.config
    }

    fn me_dyn(&self) -> Arc<dyn DeviceBackend> {
        self.me.upgrade().expect("the backend is alive while in use")
    }

    fn target_scalar(&self, path: &RegisterPath) -> Result<Box<dyn NDRegisterAccessor<i32> + Send>, Error> {
        get_register_accessor::<i32>(&self.target, path.clone(), 0, 0, AccessModeFlags::empty())
    }

    fn make_accessor<T: UserType>(
        &self,
        path: &RegisterPath,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn NDRegisterAccessor<T> + Send>, Error> {
        let info = self.catalogue.get_or_err(path)?.clone();
        let number_of_words = if number_of_words == 0 {
            info.elements.saturating_sub(word_offset)
        } else {
            number_of_words
        };
        if word_offset + number_of_words > info.elements || number_of_words == 0 {
            return Err(Error::logic(format!(
                "requested number of words and offset exceed the size of register '{path}' ({} elements)",
                info.elements
            )));
        }
        let word_address = info.address as usize / 4 + word_offset;

        match self.config.subdevice_type {
            SubdeviceType::Area => {
                // direct window into the target area; the target performs
                // the type conversion
                let area = self.config.area.as_ref().expect("validated in config");
                let mut accessor = get_register_accessor::<T>(
                    &self.target,
                    area.clone(),
                    number_of_words,
                    word_address,
                    flags,
                )?;
                accessor.set_exception_backend(self.me_dyn());
                Ok(accessor)
            }
            SubdeviceType::AreaHandshake => {
                if flags.has(AccessMode::WaitForNewData) {
                    return Err(Error::logic(format!(
                        "subdevice register '{path}' does not support AccessMode::wait_for_new_data"
                    )));
                }
                let area = self.config.area.as_ref().expect("validated in config");
                // the data accessor is the register's own window within the
                // target area
                let data = get_register_accessor::<i32>(
                    &self.target,
                    area.clone(),
                    number_of_words,
                    word_address,
                    AccessModeFlags::empty(),
                )?;
                let status = self.target_scalar(self.config.status.as_ref().expect("validated"))?;
                let mut accessor = SubdeviceRegisterAccessor::<T>::new(
                    self.me.upgrade().expect("alive"),
                    path.clone(),
                    flags,
                    RegisterSet {
                        address: None,
                        data,
                        status: Some(status),
                        read_request: None,
                        read_data: None,
                        chip_select: None,
                    },
                    word_address,
                    number_of_words,
                );
                // runtime errors in the handshake (e.g. a status timeout)
                // must put this backend into its fault state
                accessor.set_exception_backend(self.me_dyn());
                Ok(Box::new(accessor))
            }
            SubdeviceType::TwoRegisters | SubdeviceType::ThreeRegisters | SubdeviceType::SixRegisters => {
                if flags.has(AccessMode::WaitForNewData) {
                    return Err(Error::logic(format!(
                        "subdevice register '{path}' does not support AccessMode::wait_for_new_data"
                    )));
                }
                let address = self.target_scalar(self.config.address.as_ref().expect("validated"))?;
                let data = get_register_accessor::<i32>(
                    &self.target,
                    self.config.data.as_ref().expect("validated").clone(),
                    0,
                    0,
                    AccessModeFlags::empty(),
                )?;
                let status = match &self.config.status {
                    Some(path) => Some(self.target_scalar(path)?),
                    None => None,
                };
                let (read_request, read_data, chip_select) =
                    if self.config.subdevice_type == SubdeviceType::SixRegisters {
                        (
                            Some(self.target_scalar(
                                self.config.read_request.as_ref().expect("validated"),
                            )?),
                            Some(self.target_scalar(
                                self.config.read_data.as_ref().expect("validated"),
                            )?),
                            Some(self.target_scalar(
                                self.config.chip_select.as_ref().expect("validated"),
                            )?),
                        )
                    } else {
                        (None, None, None)
                    };
                let mut accessor = SubdeviceRegisterAccessor::<T>::new(
                    self.me.upgrade().expect("alive"),
                    path.clone(),
                    flags,
                    RegisterSet {
                        address: Some(address),
                        data,
                        status,
                        read_request,
                        read_data,
                        chip_select,
                    },
                    word_address,
                    number_of_words,
                );
                // runtime errors in the handshake (e.g. a status timeout)
                // must put this backend into its fault state
                accessor.set_exception_backend(self.me_dyn());
                Ok(Box::new(accessor))
            }
        }
    }
}

impl DeviceBackend for SubdeviceBackend {
    fn open(&self) -> Result<(), Error> {
        if !self.target.is_open() {
            self.target.open()?;
        }
        self.state.set_open(true);
        self.state.clear_exception();
        Ok(())
    }

    fn close(&self) {
        self.state.set_open(false);
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    fn is_functional(&self) -> bool {
        self.state.is_open() && !self.state.has_exception() && self.target.is_functional()
    }

    fn register_catalogue(&self) -> RegisterCatalogue {
        self.catalogue.clone()
    }

    fn device_info(&self) -> String {
        format!("Subdevice ({:?})", self.config.subdevice_type)
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
        self.state.set_exception(message);
    }

    fn check_active_exception(&self) -> Result<(), Error> {
        self.state.check_active_exception()
    }
}

/// The target registers one subdevice accessor works through. Optional
/// registers are absent depending on the subdevice type.
struct RegisterSet {
    address: Option<Box<dyn NDRegisterAccessor<i32> + Send>>,
    data: Box<dyn NDRegisterAccessor<i32> + Send>,
    status: Option<Box<dyn NDRegisterAccessor<i32> + Send>>,
    read_request: Option<Box<dyn NDRegisterAccessor<i32> + Send>>,
    read_data: Option<Box<dyn NDRegisterAccessor<i32> + Send>>,
    chip_select: Option<Box<dyn NDRegisterAccessor<i32> + Send>>,
}

/// Accessor for the handshake passthrough types (`areaHandshake`, `2regs`,
/// `3regs`, `6regs`).
///
/// One word transfer walks the sequence: select chip (6regs, once per
/// transaction), write address, optional delay, write data or trigger the
/// read request, then poll the status register until zero or timeout
/// (2regs sleeps a fixed interval instead). The backend's transaction mutex
/// is held for the entire sequence.
struct SubdeviceRegisterAccessor<T: UserType> {
    state: TransferState,
    buffer: Buffer2D<T>,
    raw_buffer: Vec<i32>,
    backend: Arc<SubdeviceBackend>,
    registers: RegisterSet,
    start_address: usize,
    number_of_words: usize,
}

impl<T: UserType> SubdeviceRegisterAccessor<T> {
    fn new(
        backend: Arc<SubdeviceBackend>,
        name: RegisterPath,
        flags: AccessModeFlags,
        registers: RegisterSet,
        start_address: usize,
        number_of_words: usize,
    ) -> Self {
        Self {
            state: TransferState::new(name, flags),
            buffer: Buffer2D::new(1, number_of_words),
            raw_buffer: vec![0; number_of_words],
            backend,
            registers,
            start_address,
            number_of_words,
        }
    }

    fn subdevice_type(&self) -> SubdeviceType {
        self.backend.config.subdevice_type
    }

    fn lock_transaction(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.backend.transaction)
    }

    /// Polls the status register until it reads zero. Fails with a runtime
    /// error naming the status register after the configured timeout.
    fn await_status_cleared(
        status: &mut Box<dyn NDRegisterAccessor<i32> + Send>,
        config: &SubdeviceConfig,
        register_name: &RegisterPath,
        reading: bool,
    ) -> Result<(), Error> {
        let max_retry =
            (config.timeout.as_micros() / config.sleep.as_micros().max(1)) as usize;
        let mut retry = 0;
        loop {
            std::thread::sleep(config.sleep);
            status.read()?;
            if status.value() == 0 {
                return Ok(());
            }
            retry += 1;
            if retry > max_retry {
                let operation = if reading { "Reading from" } else { "Write to" };
                return Err(Error::runtime(format!(
                    "{operation} register '{register_name}' failed: timeout waiting for cleared busy flag ({})",
                    status.state().name
                )));
            }
        }
    }

    fn write_chip_select(&mut self) -> Result<(), Error> {
        if let Some(chip_select) = self.registers.chip_select.as_mut() {
            chip_select.set_value(self.backend.config.chip_index);
            chip_select.write()?;
        }
        Ok(())
    }
}

impl<T: UserType> TransferElement for SubdeviceRegisterAccessor<T> {
    fn state(&self) -> &TransferState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TransferState {
        &mut self.state
    }

    fn is_readable(&self) -> bool {
        self.registers.read_request.is_some()
    }

    fn is_writeable(&self) -> bool {
        true
    }

    fn do_pre_read(&mut self, _: TransferType) -> Result<(), Error> {
        if !self.backend.is_open() {
            return Err(Error::logic("Device is not opened."));
        }
        if !self.is_readable() {
            return Err(Error::logic(format!(
                "Reading the register '{}' is not supported.",
                self.state.name
            )));
        }
        let registers = &self.registers;
        let check = |ok: bool, what: &str, name: &RegisterPath| -> Result<(), Error> {
            if ok {
                Ok(())
            } else {
                Err(Error::logic(format!(
                    "SubdeviceRegisterAccessor[{}]: {what} register '{name}' is unusable for reading",
                    self.state.name
                )))
            }
        };
        if let Some(address) = &registers.address {
            check(address.is_writeable(), "address", &address.state().name)?;
        }
        let read_data = registers.read_data.as_ref().expect("readable implies 6regs");
        check(read_data.is_readable(), "read data", &read_data.state().name)?;
        let status = registers.status.as_ref().expect("readable implies 6regs");
        check(status.is_readable(), "status", &status.state().name)?;
        let read_request = registers.read_request.as_ref().expect("checked above");
        check(read_request.is_writeable(), "read request", &read_request.state().name)?;
        Ok(())
    }

    fn do_read_transfer_sync(&mut self) -> Result<(), Error> {
        self.backend.check_active_exception()?;
        let transaction = self.lock_transaction();
        let _guard: MutexGuard<'_, ()> = transaction.lock().unwrap();
        debug_assert_eq!(self.subdevice_type(), SubdeviceType::SixRegisters);

        self.write_chip_select()?;
        let config = self.backend.config.clone();
        let name = self.state.name.clone();
        for idx in 0..self.number_of_words {
            let word_address = (self.start_address + idx) as i32;

            let address = self.registers.address.as_mut().expect("6regs");
            address.set_value(word_address);
            address.write()?;
            std::thread::sleep(config.data_delay);

            self.registers
                .read_request
                .as_mut()
                .expect("6regs")
                .write()?;

            Self::await_status_cleared(
                self.registers.status.as_mut().expect("6regs"),
                &config,
                &name,
                true,
            )?;

            let read_data = self.registers.read_data.as_mut().expect("6regs");
            read_data.read()?;
            self.raw_buffer[idx] = read_data.value();
            trace!(register = %name, word_address, value = self.raw_buffer[idx], "word read");
        }
        Ok(())
    }

    fn do_post_read(&mut self, _: TransferType, update_data_buffer: bool) -> Result<(), Error> {
        if update_data_buffer {
            for (sample, raw) in self
                .buffer
                .channel_mut(0)
                .iter_mut()
                .zip(self.raw_buffer.iter())
            {
                *sample = numeric_to_user_type(*raw as f64);
            }
            self.state.version_number = VersionNumber::new();
            self.state.data_validity = self
                .registers
                .read_data
                .as_ref()
                .map_or(DataValidity::Ok, |r| r.state().data_validity);
        }
        Ok(())
    }

    fn do_pre_write(&mut self, _: TransferType, _: VersionNumber) -> Result<(), Error> {
        if !self.backend.is_open() {
            return Err(Error::logic("Device is not opened."));
        }
        let registers = &self.registers;
        let check = |ok: bool, what: &str, name: &RegisterPath| -> Result<(), Error> {
            if ok {
                Ok(())
            } else {
                Err(Error::logic(format!(
                    "SubdeviceRegisterAccessor[{}]: {what} register '{name}' is unusable for writing",
                    self.state.name
                )))
            }
        };
        if let Some(address) = &registers.address {
            check(address.is_writeable(), "address", &address.state().name)?;
        }
        check(
            registers.data.is_writeable(),
            "data/area",
            &registers.data.state().name,
        )?;
        if self.backend.config.needs_status() {
            let status = registers.status.as_ref().expect("validated in config");
            check(status.is_readable(), "status", &status.state().name)?;
        }
        for (raw, sample) in self.raw_buffer.iter_mut().zip(self.buffer.channel(0)) {
            *raw = numeric_to_user_type(user_type_to_numeric(*sample));
        }
        self.registers.data.state_mut().data_validity = self.state.data_validity;
        Ok(())
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool, Error> {
        self.backend.check_active_exception()?;
        let transaction = self.lock_transaction();
        let _guard: MutexGuard<'_, ()> = transaction.lock().unwrap();

        let subdevice_type = self.subdevice_type();
        let config = self.backend.config.clone();
        let name = self.state.name.clone();

        self.write_chip_select()?;

        let data_samples = self.registers.data.number_of_samples();
        let transfers = if subdevice_type == SubdeviceType::AreaHandshake {
            // one transfer per word of the register, each rewriting the
            // window with one more word filled in
            self.number_of_words
        } else {
            self.number_of_words.div_ceil(data_samples)
        };

        let mut idx = 0;
        for transfer in 0..transfers {
            if subdevice_type != SubdeviceType::AreaHandshake {
                let address = self.registers.address.as_mut().expect("register types");
                address.set_value((self.start_address + transfer) as i32);
                address.write()?;
                std::thread::sleep(config.data_delay);
            }

            if subdevice_type == SubdeviceType::AreaHandshake {
                let value = self.raw_buffer[idx];
                self.registers.data.buffer_mut().channel_mut(0)[idx] = value;
                idx += 1;
            } else {
                for inner_offset in 0..data_samples {
                    // pad with zeros if the word count is not a multiple of
                    // the data register length
                    let value = if idx < self.number_of_words {
                        self.raw_buffer[idx]
                    } else {
                        0
                    };
                    self.registers.data.buffer_mut().channel_mut(0)[inner_offset] = value;
                    idx += 1;
                }
            }
            self.registers.data.write()?;
            trace!(register = %name, transfer, "data written");

            if config.needs_status() {
                Self::await_status_cleared(
                    self.registers.status.as_mut().expect("validated in config"),
                    &config,
                    &name,
                    false,
                )?;
            } else {
                std::thread::sleep(config.sleep);
            }
        }
        Ok(false)
    }
}

impl<T: UserType> NDRegisterAccessor<T> for SubdeviceRegisterAccessor<T> {
    fn buffer(&self) -> &Buffer2D<T> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Buffer2D<T> {
        &mut self.buffer
    }
}
