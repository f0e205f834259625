//! The subscriber side of the asynchronous read path.

use crate::accessor::{AccessorDescriptor, Buffer2D, NDRegisterAccessor, UserType};
use crate::backend::DeviceBackend;
use crate::dispatch::AsyncAccessorManager;
use crate::transfer::queue::{DataTransportQueue, Payload, QueueElement};
use crate::transfer::{TransferElement, TransferElementId, TransferState, TransferType};
use crate::{AccessMode, AccessModeFlags, Error, RegisterPath, VersionNumber};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Depth of the data transport queue between producer and subscriber.
pub(crate) const ASYNC_QUEUE_SIZE: usize = 3;

/// The producer-facing end of one subscription: the transport queue plus the
/// activation gate. The dispatcher holds this through a `Weak` reference and
/// the accessor through a strong one, so a dropped accessor disappears from
/// the producer's point of view without further coordination.
pub(crate) struct SubscriberChannel<T> {
    pub(crate) queue: DataTransportQueue<T>,
    active: AtomicBool,
    pub(crate) id: TransferElementId,
}

impl<T> SubscriberChannel<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: DataTransportQueue::new(ASYNC_QUEUE_SIZE),
            active: AtomicBool::new(false),
            id: TransferElementId::new(),
        })
    }

    /// Pushes a value, overwriting the oldest queue entry if necessary.
    /// A no-op while the subscription is inactive. Returns whether data was
    /// lost.
    pub(crate) fn send_destructively(&self, payload: Payload<T>) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        self.queue.push_overwrite(QueueElement::Value(payload))
    }

    /// Pushes one exception and deactivates the subscription. Idempotent:
    /// repeated calls while inactive push nothing.
    pub(crate) fn send_exception(&self, error: Error) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.queue.push_overwrite(QueueElement::Exception(error));
        }
    }

    /// Activates the subscription and delivers the initial value.
    pub(crate) fn activate(&self, initial: Payload<T>) {
        self.active.store(true, Ordering::Release);
        self.queue.push_overwrite(QueueElement::Value(initial));
    }

    /// Deactivates without delivering anything. Used when a device closes.
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// A register accessor with [`AccessMode::WaitForNewData`], receiving
/// updates through a bounded transport queue fed by an interrupt dispatcher.
///
/// Created in inactive state through
/// [`InterruptDispatcher::subscribe`](crate::dispatch::InterruptDispatcher);
/// activation happens through the owning backend's `activate_async_read`.
/// Writing is supported only when the dispatcher installed an inner write
/// accessor, since the asynchronous mechanism itself never touches the
/// hardware.
pub struct AsyncNDRegisterAccessor<T: UserType> {
    state: TransferState,
    buffer: Buffer2D<T>,
    channel: Arc<SubscriberChannel<T>>,
    received: Option<Payload<T>>,
    backend: Arc<dyn DeviceBackend>,
    manager: Weak<AsyncAccessorManager>,
    descriptor: AccessorDescriptor,
    write_accessor: Option<Box<dyn NDRegisterAccessor<T> + Send>>,
}

impl<T: UserType> AsyncNDRegisterAccessor<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        backend: Arc<dyn DeviceBackend>,
        manager: Weak<AsyncAccessorManager>,
        descriptor: AccessorDescriptor,
        channel: Arc<SubscriberChannel<T>>,
        name: RegisterPath,
        channels: usize,
        samples: usize,
        flags: AccessModeFlags,
    ) -> Self {
        debug_assert!(flags.has(AccessMode::WaitForNewData));
        let mut state = TransferState::new(name, flags);
        state.id = channel.id;
        Self {
            state,
            buffer: Buffer2D::new(channels, samples),
            channel,
            received: None,
            backend,
            manager,
            descriptor,
            write_accessor: None,
        }
    }

    /// Installs an accessor carrying out write transfers for this register.
    pub(crate) fn set_write_accessor(&mut self, accessor: Box<dyn NDRegisterAccessor<T> + Send>) {
        debug_assert!(accessor.is_writeable());
        self.write_accessor = Some(accessor);
    }
}

impl<T: UserType> TransferElement for AsyncNDRegisterAccessor<T> {
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
        self.write_accessor.is_some()
    }

    fn do_pre_read(&mut self, _: TransferType) -> Result<(), Error> {
        if !self.backend.is_open() {
            return Err(Error::logic("Device not opened."));
        }
        Ok(())
    }

    fn do_read_transfer_sync(&mut self) -> Result<(), Error> {
        // the constructor guarantees wait_for_new_data, so the protocol
        // always takes the asynchronous branch
        unreachable!("wait_for_new_data accessors never transfer synchronously")
    }

    fn do_read_transfer_async(&mut self, blocking: bool) -> Result<bool, Error> {
        let received = if blocking {
            Some(self.channel.queue.pop_wait()?)
        } else {
            self.channel.queue.pop()?
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

    fn do_pre_write(
        &mut self,
        transfer_type: TransferType,
        version: VersionNumber,
    ) -> Result<(), Error> {
        let Some(write_accessor) = self.write_accessor.as_mut() else {
            return Err(Error::logic(format!(
                "Writing is not supported for '{}'.",
                self.state.name
            )));
        };
        self.buffer.swap_with(write_accessor.buffer_mut());
        write_accessor.state_mut().data_validity = self.state.data_validity;
        write_accessor.pre_write(transfer_type, version)
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> Result<bool, Error> {
        self.write_accessor
            .as_mut()
            .expect("checked in do_pre_write")
            .write_transfer(version)
    }

    fn do_write_transfer_destructively(&mut self, version: VersionNumber) -> Result<bool, Error> {
        self.write_accessor
            .as_mut()
            .expect("checked in do_pre_write")
            .write_transfer_destructively(version)
    }

    fn do_post_write(
        &mut self,
        transfer_type: TransferType,
        version: VersionNumber,
    ) -> Result<(), Error> {
        let Some(write_accessor) = self.write_accessor.as_mut() else {
            // pre_write failed before swapping; nothing to restore
            return Ok(());
        };
        write_accessor.set_active_exception(self.state.active_exception.take());
        let result = write_accessor.post_write(transfer_type, version);
        // swap back unconditionally so the sent data stays visible
        self.buffer.swap_with(write_accessor.buffer_mut());
        result
    }

    fn interrupt(&mut self) -> Result<(), Error> {
        self.channel
            .queue
            .push_overwrite(QueueElement::Exception(Error::Interrupted));
        Ok(())
    }
}

impl<T: UserType> NDRegisterAccessor<T> for AsyncNDRegisterAccessor<T> {
    fn buffer(&self) -> &Buffer2D<T> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Buffer2D<T> {
        &mut self.buffer
    }
}

impl<T: UserType> Drop for AsyncNDRegisterAccessor<T> {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(&self.descriptor, self.channel.id);
        }
    }
}
