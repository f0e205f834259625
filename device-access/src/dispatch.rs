//! Subscription management and interrupt dispatch for the asynchronous read
//! path.

use crate::accessor::async_accessor::{AsyncNDRegisterAccessor, SubscriberChannel};
use crate::accessor::{
    downcast_accessor, share, AccessorDescriptor, NDRegisterAccessor, SharedAccessor, UserType,
};
use crate::backend::DeviceBackend;
use crate::transfer::group::TransferGroup;
use crate::transfer::queue::Payload;
use crate::transfer::TransferElementId;
use crate::{AccessMode, AccessModeFlags, Error, InterruptId, RegisterPath, VersionNumber};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Snapshot of a synchronous reader's application buffer, tagged with the
/// dispatch cycle's version number.
fn snapshot<T: UserType>(
    sync: &(dyn NDRegisterAccessor<T> + Send),
    version: VersionNumber,
) -> Payload<T> {
    Payload {
        value: sync.buffer().clone(),
        version,
        validity: sync.state().data_validity,
    }
}

/// Type-erased view of one *async variable*: all subscriptions sharing one
/// accessor descriptor, backed by a single synchronous accessor.
trait AsyncVariable: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Drops dead subscriptions and returns the number of live ones.
    fn prune(&mut self) -> usize;

    /// Removes the subscription with the given id.
    fn remove_subscriber(&mut self, id: TransferElementId);

    /// Reads the synchronous accessor and delivers the value to all not yet
    /// active subscribers, activating them.
    fn activate(&mut self, version: VersionNumber);

    /// Adds the synchronous accessor to the batch of one dispatch cycle.
    fn add_to_group(&self, group: &mut TransferGroup);

    /// Fans the value obtained by the grouped read out to every active
    /// subscriber with the given version. Returns the error of this
    /// variable's transfer, if its part of the grouped read failed.
    fn fan_out(&mut self, version: VersionNumber) -> Option<Error>;

    /// Delivers one exception to every active subscriber, deactivating them.
    fn send_exception(&mut self, error: &Error);

    /// Deactivates all subscribers without delivering anything.
    fn deactivate(&mut self);
}

struct AsyncVariableImpl<T: UserType> {
    sync_accessor: SharedAccessor<T>,
    subscribers: Vec<Weak<SubscriberChannel<T>>>,
    active: bool,
}

impl<T: UserType> AsyncVariableImpl<T> {
    fn live_subscribers(&self) -> impl Iterator<Item = Arc<SubscriberChannel<T>>> + '_ {
        self.subscribers.iter().filter_map(Weak::upgrade)
    }
}

impl<T: UserType> AsyncVariable for AsyncVariableImpl<T> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn prune(&mut self) -> usize {
        self.subscribers.retain(|s| s.strong_count() > 0);
        self.subscribers.len()
    }

    fn remove_subscriber(&mut self, id: TransferElementId) {
        self.subscribers
            .retain(|s| s.upgrade().is_some_and(|channel| channel.id != id));
    }

    fn activate(&mut self, version: VersionNumber) {
        self.active = true;
        if self.subscribers.is_empty() {
            return;
        }
        let payload = {
            let mut sync = self.sync_accessor.lock().unwrap();
            if let Err(error) = sync.read() {
                // The backend is faulty; subscribers receive their exception
                // through the regular fault fan-out once the backend notices.
                debug!(register = %sync.state().name, %error,
                    "initial read failed during activation");
                return;
            }
            snapshot(&**sync, version)
        };
        for channel in self.live_subscribers() {
            if !channel.is_active() {
                channel.activate(payload.clone());
            }
        }
    }

    fn add_to_group(&self, group: &mut TransferGroup) {
        group.add(&self.sync_accessor);
    }

    fn fan_out(&mut self, version: VersionNumber) -> Option<Error> {
        if self.prune() == 0 {
            return None;
        }
        let (payload, name) = {
            let sync = self.sync_accessor.lock().unwrap();
            // the grouped read left its outcome in the accessor's active
            // exception slot; a failed variable delivers no value
            if let Some(error) = sync.state().active_exception.clone() {
                return Some(error);
            }
            (snapshot(&**sync, version), sync.state().name.clone())
        };
        for channel in self.live_subscribers() {
            if channel.send_destructively(payload.clone()) {
                debug!(register = %name, "subscriber queue overrun, oldest value dropped");
            }
        }
        None
    }

    fn send_exception(&mut self, error: &Error) {
        self.active = false;
        for channel in self.live_subscribers() {
            channel.send_exception(error.clone());
        }
    }

    fn deactivate(&mut self) {
        self.active = false;
        for channel in self.live_subscribers() {
            channel.deactivate();
        }
    }
}

struct ManagerInner {
    variables: BTreeMap<AccessorDescriptor, Box<dyn AsyncVariable>>,
    active: bool,
}

/// The per-interrupt subscription registry.
///
/// Keyed by [`AccessorDescriptor`], it maintains the mapping from descriptor
/// to subscriber list and, per descriptor, one synchronous accessor which
/// actually reads the hardware. New subscribers with an existing descriptor
/// attach to the existing synchronous reader; the last unsubscribe tears it
/// down.
pub struct AsyncAccessorManager {
    inner: Mutex<ManagerInner>,
}

impl AsyncAccessorManager {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ManagerInner {
                variables: BTreeMap::new(),
                active: false,
            }),
        })
    }

    /// Creates a subscription. If the manager is already active, the new
    /// subscriber immediately receives an initial value from a synchronous
    /// read.
    fn subscribe<T: UserType>(
        manager: &Arc<Self>,
        backend: &Arc<dyn DeviceBackend>,
        path: &RegisterPath,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn NDRegisterAccessor<T> + Send>, Error> {
        let descriptor =
            AccessorDescriptor::new::<T>(path.clone(), number_of_words, word_offset, flags.clone());
        let mut pending_fault: Option<String> = None;

        let accessor = {
            let mut inner = manager.inner.lock().unwrap();
            let manager_active = inner.active;
            if !inner.variables.contains_key(&descriptor) {
                // First subscriber for this descriptor: create the shared
                // synchronous reader. It deliberately gets no exception
                // backend; the dispatcher reports faults itself after
                // releasing its lock.
                let sync_flags = flags.without(AccessMode::WaitForNewData);
                let sync_accessor = share(downcast_accessor::<T>(
                    backend.get_register_accessor_erased(
                        std::any::TypeId::of::<T>(),
                        path,
                        number_of_words,
                        word_offset,
                        sync_flags,
                    )?,
                )?);
                inner.variables.insert(
                    descriptor.clone(),
                    Box::new(AsyncVariableImpl::<T> {
                        sync_accessor,
                        subscribers: Vec::new(),
                        active: manager_active,
                    }),
                );
            }

            let variable = inner
                .variables
                .get_mut(&descriptor)
                .expect("inserted above")
                .as_any_mut()
                .downcast_mut::<AsyncVariableImpl<T>>()
                .expect("descriptor encodes the user type");

            let channel = SubscriberChannel::new();
            variable.subscribers.push(Arc::downgrade(&channel));

            let (channels, samples, writeable) = {
                let mut sync = variable.sync_accessor.lock().unwrap();
                let shape = (
                    sync.number_of_channels(),
                    sync.number_of_samples(),
                    sync.is_writeable(),
                );
                if variable.active {
                    match sync.read() {
                        Ok(()) => {
                            let payload = snapshot(&**sync, sync.state().version_number);
                            channel.activate(payload);
                        }
                        Err(error) => pending_fault = Some(error.message().to_owned()),
                    }
                }
                shape
            };

            let mut accessor = AsyncNDRegisterAccessor::new(
                Arc::clone(backend),
                Arc::downgrade(manager),
                descriptor,
                channel,
                path.clone(),
                channels,
                samples,
                flags.clone(),
            );
            if writeable {
                let write_flags = flags.without(AccessMode::WaitForNewData);
                let write_accessor = downcast_accessor::<T>(
                    backend.get_register_accessor_erased(
                        std::any::TypeId::of::<T>(),
                        path,
                        number_of_words,
                        word_offset,
                        write_flags,
                    )?,
                )?;
                accessor.set_write_accessor(write_accessor);
            }
            accessor
        };

        if let Some(message) = pending_fault {
            backend.set_exception(&message);
        }
        Ok(Box::new(accessor))
    }

    /// Removes one subscription; tears the synchronous reader down when the
    /// subscriber list empties.
    pub(crate) fn unsubscribe(&self, descriptor: &AccessorDescriptor, id: TransferElementId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(variable) = inner.variables.get_mut(descriptor) {
            variable.remove_subscriber(id);
            if variable.prune() == 0 {
                inner.variables.remove(descriptor);
            }
        }
    }

    fn activate_all(&self, version: VersionNumber) {
        let mut inner = self.inner.lock().unwrap();
        inner.active = true;
        for variable in inner.variables.values_mut() {
            variable.activate(version);
        }
    }

    fn dispatch_all(&self, version: VersionNumber) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.active {
            return Ok(());
        }
        // One shared staged read over every per-descriptor synchronous
        // reader. The group runs pre/transfer/post on each element
        // independently, so a fault in one variable cannot suppress the
        // transfer of another.
        let mut group = TransferGroup::new();
        for variable in inner.variables.values_mut() {
            if variable.prune() > 0 {
                variable.add_to_group(&mut group);
            }
        }
        if group.is_empty() {
            return Ok(());
        }
        let mut first_error = group.read().err();
        for variable in inner.variables.values_mut() {
            if let Some(error) = variable.fan_out(version) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn send_exception_all(&self, error: &Error) {
        let mut inner = self.inner.lock().unwrap();
        inner.active = false;
        for variable in inner.variables.values_mut() {
            variable.send_exception(error);
        }
    }

    fn deactivate_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.active = false;
        for variable in inner.variables.values_mut() {
            variable.deactivate();
        }
    }

    /// Whether the manager is activated.
    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().active
    }
}

/// The [`AsyncAccessorManager`] specialised per interrupt source.
///
/// Translates one device interrupt into subscriber notifications: a
/// [`trigger`](Self::trigger) generates one fresh version number, performs
/// the grouped synchronous read over all async variables, and fans the
/// snapshots out to every subscriber. All values of one dispatch cycle carry
/// the same version number, so downstream logic can detect consistency by
/// equality.
pub struct InterruptDispatcher {
    interrupt: InterruptId,
    manager: Arc<AsyncAccessorManager>,
    backend: Weak<dyn DeviceBackend>,
    last_version: Mutex<VersionNumber>,
}

impl InterruptDispatcher {
    /// Creates the dispatcher for one interrupt of the given backend.
    pub fn new(interrupt: InterruptId, backend: Weak<dyn DeviceBackend>) -> Arc<Self> {
        Arc::new(Self {
            interrupt,
            manager: AsyncAccessorManager::new(),
            backend,
            last_version: Mutex::new(VersionNumber::NULL),
        })
    }

    /// The interrupt this dispatcher serves.
    pub fn interrupt(&self) -> InterruptId {
        self.interrupt
    }

    /// Requests a new subscription for the given register. Creates the
    /// asynchronous accessor and attaches it to the shared synchronous
    /// reader of its descriptor.
    pub fn subscribe<T: UserType>(
        &self,
        backend: &Arc<dyn DeviceBackend>,
        path: &RegisterPath,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn NDRegisterAccessor<T> + Send>, Error> {
        AsyncAccessorManager::subscribe::<T>(
            &self.manager,
            backend,
            path,
            number_of_words,
            word_offset,
            flags,
        )
    }

    /// Dispatches one interrupt: a grouped synchronous read followed by the
    /// fan-out to all subscribers, all under one fresh version number.
    /// Runtime errors in the grouped read are converted into one exception
    /// per subscriber queue, the dispatcher deactivates, and the fault is
    /// reported to the backend.
    pub fn trigger(&self) {
        let version = VersionNumber::new();
        *self.last_version.lock().unwrap() = version;
        debug!(interrupt = %self.interrupt, %version, "dispatching interrupt");
        if let Err(error) = self.manager.dispatch_all(version) {
            debug!(interrupt = %self.interrupt, %error, "grouped read failed");
            self.manager.send_exception_all(&error);
            if error.is_runtime() {
                if let Some(backend) = self.backend.upgrade() {
                    backend.set_exception(error.message());
                }
            }
        }
    }

    /// Activates all subscriptions, delivering one initial value each with a
    /// fresh version number.
    pub fn activate(&self) {
        let version = VersionNumber::new();
        *self.last_version.lock().unwrap() = version;
        self.manager.activate_all(version);
    }

    /// Deactivates all subscriptions without delivering anything.
    pub fn deactivate(&self) {
        self.manager.deactivate_all();
    }

    /// Delivers one exception to every active subscriber and deactivates
    /// them until the next activation.
    pub fn send_exception(&self, error: &Error) {
        self.manager.send_exception_all(error);
    }

    /// The version number used by the most recent dispatch or activation.
    /// Usually only needed by dummies and tests.
    pub fn last_version(&self) -> VersionNumber {
        *self.last_version.lock().unwrap()
    }
}
