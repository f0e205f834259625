//! The transfer protocol implemented by every register accessor.
//!
//! A read or write is decomposed into three stages: a pre stage (no device
//! I/O, sets the operation up), the transfer itself, and a post stage which
//! commits the transferred data into the application buffer. The stages are
//! separate so that groups of accessors can share one hardware transfer
//! while still performing their own conversion work, and so that decorators
//! can splice into any stage.
//!
//! Errors raised in the pre stage or in the transfer are captured into the
//! accessor's *active exception* slot and returned from the matching post
//! stage, so every layer of a decorator chain observes the error passing by.

pub mod group;
pub mod queue;

use crate::backend::DeviceBackend;
use crate::{AccessMode, AccessModeFlags, Error, RegisterPath, VersionNumber};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The current state of the data in an application buffer.
///
/// This is orthogonal to the success of a transfer: a completed transfer may
/// well carry faulty data, e.g. when an upstream producer is performing
/// calculations with the last known good input. It must not be used to
/// signal communication errors.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DataValidity {
    /// The data is considered valid.
    #[default]
    Ok,
    /// The data is not considered valid.
    Faulty,
}

impl fmt::Display for DataValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValidity::Ok => f.write_str("ok"),
            DataValidity::Faulty => f.write_str("faulty"),
        }
    }
}

/// Indicates which public operation is in progress when a pre or post stage
/// runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferType {
    /// A blocking [`TransferElement::read`].
    Read,
    /// A [`TransferElement::read_non_blocking`] (or a drain iteration of
    /// [`TransferElement::read_latest`]).
    ReadNonBlocking,
    /// A [`TransferElement::write`].
    Write,
    /// A [`TransferElement::write_destructively`].
    WriteDestructively,
}

static NEXT_TRANSFER_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity token of a transfer element instance.
///
/// Used to deduplicate accessors in transfer groups and to attribute
/// callbacks. Decorators copy the id of their target, since they address the
/// same hardware element.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransferElementId(u64);

impl TransferElementId {
    /// Obtains a fresh, process-wide unique id.
    pub fn new() -> Self {
        TransferElementId(NEXT_TRANSFER_ELEMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TransferElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "te{}", self.0)
    }
}

/// The per-accessor state driven by the staged protocol.
///
/// Every accessor owns one of these; the provided driver methods of
/// [`TransferElement`] operate exclusively on this state and the `do_*`
/// hooks.
#[derive(Clone)]
pub struct TransferState {
    /// The register path this accessor is bound to.
    pub name: RegisterPath,
    /// Unique identity of this accessor.
    pub id: TransferElementId,
    /// The access mode flags requested at construction.
    pub flags: AccessModeFlags,
    /// Version of the last successful transfer. Part of the application
    /// buffer; starts out as [`VersionNumber::NULL`].
    pub version_number: VersionNumber,
    /// Validity of the data in the application buffer.
    pub data_validity: DataValidity,
    /// The exception captured during the current transfer, to be raised from
    /// the matching post stage.
    pub active_exception: Option<Error>,
    /// The backend to which runtime errors are reported. Set by the creating
    /// backend; decorators inherit it from their target.
    pub exception_backend: Option<Arc<dyn DeviceBackend>>,
    read_transaction_in_progress: bool,
    write_transaction_in_progress: bool,
}

impl TransferState {
    /// Creates the state for a new accessor bound to `name`.
    pub fn new(name: RegisterPath, flags: AccessModeFlags) -> Self {
        Self {
            name,
            id: TransferElementId::new(),
            flags,
            version_number: VersionNumber::NULL,
            data_validity: DataValidity::Ok,
            active_exception: None,
            exception_backend: None,
            read_transaction_in_progress: false,
            write_transaction_in_progress: false,
        }
    }

    /// Whether a read transaction is in progress, i.e. `pre_read` has been
    /// called but not yet `post_read`.
    pub fn is_read_transaction_in_progress(&self) -> bool {
        self.read_transaction_in_progress
    }

    /// Whether a write transaction is in progress.
    pub fn is_write_transaction_in_progress(&self) -> bool {
        self.write_transaction_in_progress
    }
}

impl fmt::Debug for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferState")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("version_number", &self.version_number)
            .field("data_validity", &self.data_validity)
            .field("active_exception", &self.active_exception)
            .finish_non_exhaustive()
    }
}

/// Base protocol of all register accessors.
///
/// Implementations provide the `do_*` hooks; the public operations
/// ([`read`](Self::read), [`write`](Self::write), …) are provided driver
/// methods implementing the staged state machine. Within one public call the
/// pre and post stages are each invoked exactly once, even under errors, and
/// re-entrant invocations of a pre or post stage are idempotent.
///
/// The protocol is not re-entrant within one accessor: all stages of one
/// accessor must be called from the same thread.
pub trait TransferElement: Send {
    /// The protocol state of this accessor.
    fn state(&self) -> &TransferState;

    /// Mutable access to the protocol state.
    fn state_mut(&mut self) -> &mut TransferState;

    /// Whether this accessor can be read.
    fn is_readable(&self) -> bool;

    /// Whether this accessor can be written.
    fn is_writeable(&self) -> bool;

    /// Whether this accessor is readable but not writeable.
    fn is_read_only(&self) -> bool {
        self.is_readable() && !self.is_writeable()
    }

    /// The register path this accessor is bound to.
    fn name(&self) -> &RegisterPath {
        &self.state().name
    }

    /// The unique identity of this accessor. Decorators share the id of
    /// their target.
    fn id(&self) -> TransferElementId {
        self.state().id
    }

    /// The access mode flags requested at construction.
    fn access_mode_flags(&self) -> &AccessModeFlags {
        &self.state().flags
    }

    /// The version number associated with the last successful transfer.
    fn version_number(&self) -> VersionNumber {
        self.state().version_number
    }

    /// The current validity of the application buffer data.
    fn data_validity(&self) -> DataValidity {
        self.state().data_validity
    }

    /// Sets the validity to be transported with the next write.
    fn set_data_validity(&mut self, validity: DataValidity) {
        self.state_mut().data_validity = validity;
    }

    // ------------------------------------------------------------------
    // hooks implemented by accessors
    // ------------------------------------------------------------------

    /// Backend specific part of the pre-read stage. No device I/O may be
    /// performed here, and it must be acceptable to call this while the
    /// device is closed or faulty.
    fn do_pre_read(&mut self, _transfer_type: TransferType) -> Result<(), Error> {
        Ok(())
    }

    /// Performs the synchronous hardware read. Only called without
    /// [`AccessMode::WaitForNewData`].
    fn do_read_transfer_sync(&mut self) -> Result<(), Error>;

    /// Pops the next update from the accessor's read queue. Only called with
    /// [`AccessMode::WaitForNewData`]; accessors supporting the flag must
    /// override this. Returns whether an update was received.
    fn do_read_transfer_async(&mut self, _blocking: bool) -> Result<bool, Error> {
        Err(Error::logic(format!(
            "transfer element '{}' does not implement wait_for_new_data",
            self.state().name
        )))
    }

    /// Backend specific part of the post-read stage. Commits the transferred
    /// data into the application buffer iff `update_data_buffer` is true.
    /// When it is false the buffer must stay unaltered; full implementations
    /// must also leave version number and validity unchanged, while
    /// decorators are allowed to update that metadata.
    fn do_post_read(
        &mut self,
        _transfer_type: TransferType,
        _update_data_buffer: bool,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Backend specific part of the pre-write stage: snapshot the user
    /// buffer for transmission. No device I/O may be performed here.
    fn do_pre_write(
        &mut self,
        _transfer_type: TransferType,
        _version: VersionNumber,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Performs the hardware write. Returns whether previously written,
    /// not-yet-transmitted data was lost (e.g. due to a buffer overflow);
    /// unbuffered transports always return `false`.
    fn do_write_transfer(&mut self, version: VersionNumber) -> Result<bool, Error>;

    /// Like [`do_write_transfer`](Self::do_write_transfer), but the
    /// implementation may destroy the content of the user buffer in the
    /// process. The default just performs the normal write transfer.
    fn do_write_transfer_destructively(&mut self, version: VersionNumber) -> Result<bool, Error> {
        self.do_write_transfer(version)
    }

    /// Backend specific part of the post-write stage. If the user buffer was
    /// swapped away in the pre stage it must be restored here.
    fn do_post_write(
        &mut self,
        _transfer_type: TransferType,
        _version: VersionNumber,
    ) -> Result<(), Error> {
        Ok(())
    }

    // ------------------------------------------------------------------
    // provided drivers
    // ------------------------------------------------------------------

    /// Reads the data from the device. With [`AccessMode::WaitForNewData`]
    /// this blocks until a new value is available on the read queue;
    /// otherwise it may still block shortly until the hardware transfer
    /// completes.
    fn read(&mut self) -> Result<(), Error> {
        self.state_mut().read_transaction_in_progress = false;
        if let Err(exception) = self.pre_read(TransferType::Read) {
            self.state_mut().active_exception = Some(exception);
        }
        if self.state().active_exception.is_none() {
            if let Err(exception) = self.read_transfer() {
                self.state_mut().active_exception = Some(exception);
            }
        }
        let update_data_buffer = self.state().active_exception.is_none();
        self.post_read(TransferType::Read, update_data_buffer)
    }

    /// Reads the next value if one is available. With
    /// [`AccessMode::WaitForNewData`] the return value indicates whether the
    /// application buffer was updated; without the flag a hardware read is
    /// performed and the result is always `true`.
    fn read_non_blocking(&mut self) -> Result<bool, Error> {
        self.state_mut().read_transaction_in_progress = false;
        if let Err(exception) = self.pre_read(TransferType::ReadNonBlocking) {
            self.state_mut().active_exception = Some(exception);
        }
        let mut update_data_buffer = false;
        if self.state().active_exception.is_none() {
            match self.read_transfer_non_blocking() {
                Ok(update) => update_data_buffer = update,
                Err(exception) => self.state_mut().active_exception = Some(exception),
            }
        }
        self.post_read(TransferType::ReadNonBlocking, update_data_buffer)?;
        Ok(update_data_buffer)
    }

    /// Drains the read queue, keeping only the latest value. Returns whether
    /// any new value arrived. Without [`AccessMode::WaitForNewData`] this is
    /// equivalent to [`read`](Self::read) and returns `true`.
    fn read_latest(&mut self) -> Result<bool, Error> {
        if self.state().flags.has(AccessMode::WaitForNewData) {
            let mut updated = false;
            while self.read_non_blocking()? {
                updated = true;
            }
            Ok(updated)
        } else {
            // Without wait_for_new_data read_non_blocking always returns
            // true and the loop above would never terminate.
            self.read()?;
            Ok(true)
        }
    }

    /// Writes the application buffer to the device with a fresh version
    /// number. Returns whether previously queued data was lost.
    fn write(&mut self) -> Result<bool, Error> {
        self.write_with_version(VersionNumber::new())
    }

    /// Writes the application buffer with the given version number. The
    /// version must not be older than the accessor's current version,
    /// otherwise a logic error is raised without any transfer.
    fn write_with_version(&mut self, version: VersionNumber) -> Result<bool, Error> {
        self.state_mut().write_transaction_in_progress = false;
        if let Err(exception) = self.pre_write(TransferType::Write, version) {
            self.state_mut().active_exception = Some(exception);
        }
        // The initial value never reaches the caller: if an exception is
        // active, post_write raises it instead.
        let mut previous_data_lost = true;
        if self.state().active_exception.is_none() {
            match self.write_transfer(version) {
                Ok(lost) => previous_data_lost = lost,
                Err(exception) => self.state_mut().active_exception = Some(exception),
            }
        }
        self.post_write(TransferType::Write, version)?;
        Ok(previous_data_lost)
    }

    /// Like [`write`](Self::write), but the user buffer content is undefined
    /// after the call returns.
    fn write_destructively(&mut self) -> Result<bool, Error> {
        self.write_destructively_with_version(VersionNumber::new())
    }

    /// Like [`write_with_version`](Self::write_with_version), but the user
    /// buffer content is undefined after the call returns.
    fn write_destructively_with_version(&mut self, version: VersionNumber) -> Result<bool, Error> {
        self.state_mut().write_transaction_in_progress = false;
        if let Err(exception) = self.pre_write(TransferType::WriteDestructively, version) {
            self.state_mut().active_exception = Some(exception);
        }
        let mut previous_data_lost = true;
        if self.state().active_exception.is_none() {
            match self.write_transfer_destructively(version) {
                Ok(lost) => previous_data_lost = lost,
                Err(exception) => self.state_mut().active_exception = Some(exception),
            }
        }
        self.post_write(TransferType::WriteDestructively, version)?;
        Ok(previous_data_lost)
    }

    // ------------------------------------------------------------------
    // staged entry points (used by drivers, decorators and batches)
    // ------------------------------------------------------------------

    /// Runs the pre-read stage. Idempotent within one transaction.
    fn pre_read(&mut self, transfer_type: TransferType) -> Result<(), Error> {
        if self.state().is_read_transaction_in_progress() {
            return Ok(());
        }
        self.state_mut().active_exception = None;
        // Remember the stage before running the hook: it may fail, and the
        // matching post stage must still run.
        self.state_mut().read_transaction_in_progress = true;
        self.do_pre_read(transfer_type)
    }

    /// Performs the transfer part of a blocking read: a synchronous hardware
    /// read, or a blocking pop from the read queue with
    /// [`AccessMode::WaitForNewData`]. Must be called between
    /// [`pre_read`](Self::pre_read) and [`post_read`](Self::post_read).
    fn read_transfer(&mut self) -> Result<(), Error> {
        if self.state().flags.has(AccessMode::WaitForNewData) {
            self.do_read_transfer_async(true).map(|_| ())
        } else {
            self.do_read_transfer_sync()
        }
    }

    /// The non-blocking counterpart of [`read_transfer`](Self::read_transfer).
    /// Returns whether an update was received; without
    /// [`AccessMode::WaitForNewData`] this is always `true`.
    fn read_transfer_non_blocking(&mut self) -> Result<bool, Error> {
        if self.state().flags.has(AccessMode::WaitForNewData) {
            self.do_read_transfer_async(false)
        } else {
            self.do_read_transfer_sync()?;
            Ok(true)
        }
    }

    /// Runs the post-read stage and raises any captured exception. The
    /// active exception is raised on *every* call, so all high-level
    /// elements sharing a low-level transfer observe it; it is cleared in
    /// the next pre stage. A runtime error surfacing here is additionally
    /// reported to the exception backend.
    fn post_read(
        &mut self,
        transfer_type: TransferType,
        update_data_buffer: bool,
    ) -> Result<(), Error> {
        let mut result = Ok(());
        if self.state().is_read_transaction_in_progress() {
            self.state_mut().read_transaction_in_progress = false;
            result = self.do_post_read(transfer_type, update_data_buffer);
        }
        if let Some(exception) = self.state().active_exception.clone() {
            result = Err(exception);
        }
        self.report_runtime_error(&result);
        result
    }

    /// Runs the pre-write stage, including the version ordering check.
    /// Idempotent within one transaction.
    fn pre_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<(), Error> {
        if self.state().is_write_transaction_in_progress() {
            return Ok(());
        }
        self.state_mut().active_exception = None;
        if version < self.state().version_number {
            // The stage flag must stay clear: no transfer may run and the
            // post stage must skip the do_post_write hook.
            return Err(Error::logic(format!(
                "The version number passed to write() of transfer element '{}' is less than the last version number used.",
                self.state().name
            )));
        }
        self.state_mut().write_transaction_in_progress = true;
        self.do_pre_write(transfer_type, version)
    }

    /// Performs the write transfer. Must be called between
    /// [`pre_write`](Self::pre_write) and [`post_write`](Self::post_write).
    fn write_transfer(&mut self, version: VersionNumber) -> Result<bool, Error> {
        self.do_write_transfer(version)
    }

    /// The destructive counterpart of [`write_transfer`](Self::write_transfer).
    fn write_transfer_destructively(&mut self, version: VersionNumber) -> Result<bool, Error> {
        self.do_write_transfer_destructively(version)
    }

    /// Runs the post-write stage and raises any captured exception. Only
    /// after a successful write is the accessor's version number advanced.
    fn post_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<(), Error> {
        let mut result = Ok(());
        if self.state().is_write_transaction_in_progress() {
            self.state_mut().write_transaction_in_progress = false;
            result = self.do_post_write(transfer_type, version);
        }
        if let Some(exception) = self.state().active_exception.clone() {
            result = Err(exception);
        }
        self.report_runtime_error(&result);
        if result.is_ok() {
            self.state_mut().version_number = version;
        }
        result
    }

    // ------------------------------------------------------------------
    // control helpers
    // ------------------------------------------------------------------

    /// Stores an exception to be raised from the matching post stage.
    /// Decorator-like elements use this to propagate their captured
    /// exception into their target. Passing `None` does nothing.
    fn set_active_exception(&mut self, exception: Option<Error>) {
        if let Some(exception) = exception {
            self.state_mut().active_exception = Some(exception);
        }
    }

    /// Sets the backend to which runtime errors are reported. The creating
    /// backend calls this on every accessor it hands out; decorators
    /// propagate it to their target.
    fn set_exception_backend(&mut self, backend: Arc<dyn DeviceBackend>) {
        self.state_mut().exception_backend = Some(backend);
    }

    /// Makes a concurrent blocking [`read`](Self::read) return immediately
    /// by placing an interruption on the read queue. Only valid with
    /// [`AccessMode::WaitForNewData`]; implementations supporting the flag
    /// override this. If regular data is queued before the interruption,
    /// that data is received first, but the wakeup is guaranteed.
    fn interrupt(&mut self) -> Result<(), Error> {
        if !self.state().flags.has(AccessMode::WaitForNewData) {
            return Err(Error::logic(format!(
                "interrupt() called on '{}' but wait_for_new_data is not set.",
                self.state().name
            )));
        }
        Err(Error::logic(format!(
            "interrupt() is not implemented by the transfer element '{}'.",
            self.state().name
        )))
    }

    /// Reports a runtime error to the exception backend, transitioning it
    /// into its fault state. Logic errors and interruptions are never
    /// reported.
    fn report_runtime_error(&mut self, result: &Result<(), Error>) {
        if let Err(exception) = result {
            if exception.is_runtime() {
                if let Some(backend) = self.state().exception_backend.clone() {
                    backend.set_exception(exception.message());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal element recording stage invocations.
    struct CountingElement {
        state: TransferState,
        pre_read_calls: usize,
        post_read_calls: usize,
        pre_write_calls: usize,
        post_write_calls: usize,
        transfer_calls: usize,
        fail_pre_read: Option<Error>,
        fail_transfer: Option<Error>,
        seen_update_flags: Vec<bool>,
    }

    impl CountingElement {
        fn new() -> Self {
            Self {
                state: TransferState::new(
                    RegisterPath::new("TEST/REG"),
                    AccessModeFlags::empty(),
                ),
                pre_read_calls: 0,
                post_read_calls: 0,
                pre_write_calls: 0,
                post_write_calls: 0,
                transfer_calls: 0,
                fail_pre_read: None,
                fail_transfer: None,
                seen_update_flags: Vec::new(),
            }
        }
    }

    impl TransferElement for CountingElement {
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
            self.pre_read_calls += 1;
            self.fail_pre_read.clone().map_or(Ok(()), Err)
        }
        fn do_post_read(&mut self, _: TransferType, update: bool) -> Result<(), Error> {
            self.post_read_calls += 1;
            self.seen_update_flags.push(update);
            Ok(())
        }
        fn do_pre_write(&mut self, _: TransferType, _: VersionNumber) -> Result<(), Error> {
            self.pre_write_calls += 1;
            Ok(())
        }
        fn do_post_write(&mut self, _: TransferType, _: VersionNumber) -> Result<(), Error> {
            self.post_write_calls += 1;
            Ok(())
        }
        fn do_read_transfer_sync(&mut self) -> Result<(), Error> {
            self.transfer_calls += 1;
            self.fail_transfer.clone().map_or(Ok(()), Err)
        }
        fn do_write_transfer(&mut self, _: VersionNumber) -> Result<bool, Error> {
            self.transfer_calls += 1;
            self.fail_transfer.clone().map_or(Ok(false), Err)
        }
    }

    #[test]
    fn stages_pair_up_on_success() {
        let mut element = CountingElement::new();
        element.read().unwrap();
        assert_eq!(element.pre_read_calls, 1);
        assert_eq!(element.post_read_calls, 1);
        assert_eq!(element.transfer_calls, 1);
        assert_eq!(element.seen_update_flags, vec![true]);
    }

    #[test]
    fn exception_in_pre_skips_transfer() {
        let mut element = CountingElement::new();
        element.fail_pre_read = Some(Error::logic("broken"));
        assert_eq!(element.read(), Err(Error::logic("broken")));
        assert_eq!(element.transfer_calls, 0);
        assert_eq!(element.post_read_calls, 1);
        assert_eq!(element.seen_update_flags, vec![false]);
    }

    #[test]
    fn exception_in_transfer_reaches_post() {
        let mut element = CountingElement::new();
        element.fail_transfer = Some(Error::runtime("bus gone"));
        assert_eq!(element.read(), Err(Error::runtime("bus gone")));
        assert_eq!(element.pre_read_calls, 1);
        assert_eq!(element.post_read_calls, 1);
        assert_eq!(element.seen_update_flags, vec![false]);
    }

    #[test]
    fn duplicate_pre_calls_are_idempotent() {
        let mut element = CountingElement::new();
        element.pre_read(TransferType::Read).unwrap();
        element.pre_read(TransferType::Read).unwrap();
        assert_eq!(element.pre_read_calls, 1);
        element.post_read(TransferType::Read, false).unwrap();
        element.post_read(TransferType::Read, false).unwrap();
        assert_eq!(element.post_read_calls, 1);
    }

    #[test]
    fn successful_write_advances_version() {
        let mut element = CountingElement::new();
        assert_eq!(element.state().version_number, VersionNumber::NULL);
        let version = VersionNumber::new();
        element.write_with_version(version).unwrap();
        assert_eq!(element.state().version_number, version);
    }

    #[test]
    fn old_version_is_a_logic_error_without_transfer() {
        let mut element = CountingElement::new();
        let v1 = VersionNumber::new();
        let v2 = VersionNumber::new();
        element.write_with_version(v2).unwrap();
        let result = element.write_with_version(v1);
        assert!(matches!(result, Err(Error::Logic(_))));
        // transfer ran once (for v2), not for the failing write
        assert_eq!(element.transfer_calls, 1);
        assert_eq!(element.state().version_number, v2);
        // the post-write hook must not have run for the failing write
        assert_eq!(element.post_write_calls, 1);
    }

    #[test]
    fn failed_write_keeps_version() {
        let mut element = CountingElement::new();
        let good = VersionNumber::new();
        element.write_with_version(good).unwrap();
        element.fail_transfer = Some(Error::runtime("lost"));
        let bad = VersionNumber::new();
        assert!(element.write_with_version(bad).is_err());
        assert_eq!(element.state().version_number, good);
    }

    #[test]
    fn read_latest_without_wait_flag_reads_once() {
        let mut element = CountingElement::new();
        assert!(element.read_latest().unwrap());
        assert_eq!(element.transfer_calls, 1);
    }

    #[test]
    fn read_non_blocking_without_wait_flag_returns_true() {
        let mut element = CountingElement::new();
        assert!(element.read_non_blocking().unwrap());
    }

    #[test]
    fn interrupt_without_wait_flag_is_a_logic_error() {
        let mut element = CountingElement::new();
        assert!(matches!(element.interrupt(), Err(Error::Logic(_))));
    }
}
