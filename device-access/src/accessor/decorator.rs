//! Pass-through decorators re-implementing the transfer protocol by
//! delegating to a shared target.

use crate::accessor::{Buffer2D, NDRegisterAccessor, ReplacementFactory, SharedAccessor, UserType};
use crate::backend::DeviceBackend;
use crate::transfer::{TransferElement, TransferState, TransferType};
use crate::{Error, VersionNumber};
use std::sync::Arc;

fn state_from_target<T: UserType>(target: &SharedAccessor<T>) -> (TransferState, Buffer2D<T>) {
    let tgt = target.lock().unwrap();
    let mut state = TransferState::new(tgt.state().name.clone(), tgt.state().flags.clone());
    // The decorator addresses the same hardware element as its target, so it
    // shares the target's identity and buffer metadata.
    state.id = tgt.state().id;
    state.version_number = tgt.state().version_number;
    state.data_validity = tgt.state().data_validity;
    state.exception_backend = tgt.state().exception_backend.clone();
    let buffer = Buffer2D::new(tgt.number_of_channels(), tgt.number_of_samples());
    (state, buffer)
}

/// A pass-through accessor decorator.
///
/// All protocol stages are delegated to the shared target; the user buffer
/// is channel-swapped with the target's buffer around the write stages and
/// after the read post stage, avoiding copies. Buffer metadata (version
/// number, data validity) is propagated after every operation, including
/// when `update_data_buffer` is false.
pub struct AccessorDecorator<T: UserType> {
    state: TransferState,
    buffer: Buffer2D<T>,
    target: SharedAccessor<T>,
}

impl<T: UserType> AccessorDecorator<T> {
    /// Decorates the given shared target.
    pub fn new(target: SharedAccessor<T>) -> Self {
        let (state, buffer) = state_from_target(&target);
        Self {
            state,
            buffer,
            target,
        }
    }

    /// The decorated target.
    pub fn target(&self) -> &SharedAccessor<T> {
        &self.target
    }
}

impl<T: UserType> TransferElement for AccessorDecorator<T> {
    fn state(&self) -> &TransferState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TransferState {
        &mut self.state
    }

    fn is_readable(&self) -> bool {
        self.target.lock().unwrap().is_readable()
    }

    fn is_writeable(&self) -> bool {
        self.target.lock().unwrap().is_writeable()
    }

    fn do_pre_read(&mut self, transfer_type: TransferType) -> Result<(), Error> {
        self.target.lock().unwrap().pre_read(transfer_type)
    }

    fn do_read_transfer_sync(&mut self) -> Result<(), Error> {
        self.target.lock().unwrap().read_transfer()
    }

    fn do_read_transfer_async(&mut self, blocking: bool) -> Result<bool, Error> {
        let mut tgt = self.target.lock().unwrap();
        if blocking {
            tgt.read_transfer()?;
            Ok(true)
        } else {
            tgt.read_transfer_non_blocking()
        }
    }

    fn do_post_read(
        &mut self,
        transfer_type: TransferType,
        update_data_buffer: bool,
    ) -> Result<(), Error> {
        let Self {
            state,
            buffer,
            target,
        } = self;
        let mut tgt = target.lock().unwrap();
        tgt.set_active_exception(state.active_exception.take());
        tgt.post_read(transfer_type, update_data_buffer)?;

        // Decorators propagate buffer metadata even without new data.
        state.data_validity = tgt.state().data_validity;
        state.version_number = tgt.state().version_number;

        if update_data_buffer {
            buffer.swap_with(tgt.buffer_mut());
        }
        Ok(())
    }

    fn do_pre_write(
        &mut self,
        transfer_type: TransferType,
        version: VersionNumber,
    ) -> Result<(), Error> {
        let Self {
            state,
            buffer,
            target,
        } = self;
        let mut tgt = target.lock().unwrap();
        buffer.swap_with(tgt.buffer_mut());
        tgt.state_mut().data_validity = state.data_validity;
        tgt.pre_write(transfer_type, version)
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> Result<bool, Error> {
        self.target.lock().unwrap().write_transfer(version)
    }

    fn do_write_transfer_destructively(&mut self, version: VersionNumber) -> Result<bool, Error> {
        self.target
            .lock()
            .unwrap()
            .write_transfer_destructively(version)
    }

    fn do_post_write(
        &mut self,
        transfer_type: TransferType,
        version: VersionNumber,
    ) -> Result<(), Error> {
        let Self {
            state,
            buffer,
            target,
        } = self;
        let mut tgt = target.lock().unwrap();
        tgt.set_active_exception(state.active_exception.take());
        let result = tgt.post_write(transfer_type, version);
        // Swap back unconditionally, even when the target's post stage
        // failed, so the just written data stays visible to the caller.
        buffer.swap_with(tgt.buffer_mut());
        result
    }

    fn set_exception_backend(&mut self, backend: Arc<dyn DeviceBackend>) {
        self.state.exception_backend = Some(backend.clone());
        self.target.lock().unwrap().set_exception_backend(backend);
    }

    fn interrupt(&mut self) -> Result<(), Error> {
        self.target.lock().unwrap().interrupt()
    }
}

impl<T: UserType> NDRegisterAccessor<T> for AccessorDecorator<T> {
    fn buffer(&self) -> &Buffer2D<T> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Buffer2D<T> {
        &mut self.buffer
    }

    fn replace_innermost_target(&mut self, factory: &ReplacementFactory<T>) -> bool {
        if self.target.lock().unwrap().replace_innermost_target(factory) {
            return true;
        }
        if let Some(replacement) = factory(&self.target) {
            if let Some(backend) = self.state.exception_backend.clone() {
                replacement.lock().unwrap().set_exception_backend(backend);
            }
            self.target = replacement;
            return true;
        }
        false
    }
}

/// A read-only decorator which *copies* the target's data instead of
/// swapping, so sibling decorators sharing one target each keep their own
/// values. Used when transfer-group deduplication hands the same underlying
/// accessor to two elements.
pub struct CopyRegisterDecorator<T: UserType> {
    state: TransferState,
    buffer: Buffer2D<T>,
    target: SharedAccessor<T>,
}

impl<T: UserType> CopyRegisterDecorator<T> {
    /// Decorates the given shared target, which must be readable.
    pub fn new(target: SharedAccessor<T>) -> Result<Self, Error> {
        {
            let tgt = target.lock().unwrap();
            if !tgt.is_readable() {
                return Err(Error::logic(format!(
                    "CopyRegisterDecorator requires a readable target, but '{}' is not readable",
                    tgt.state().name
                )));
            }
        }
        let (state, buffer) = state_from_target(&target);
        Ok(Self {
            state,
            buffer,
            target,
        })
    }
}

impl<T: UserType> TransferElement for CopyRegisterDecorator<T> {
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

    fn do_pre_read(&mut self, transfer_type: TransferType) -> Result<(), Error> {
        self.target.lock().unwrap().pre_read(transfer_type)
    }

    fn do_read_transfer_sync(&mut self) -> Result<(), Error> {
        self.target.lock().unwrap().read_transfer()
    }

    fn do_read_transfer_async(&mut self, blocking: bool) -> Result<bool, Error> {
        let mut tgt = self.target.lock().unwrap();
        if blocking {
            tgt.read_transfer()?;
            Ok(true)
        } else {
            tgt.read_transfer_non_blocking()
        }
    }

    fn do_post_read(
        &mut self,
        transfer_type: TransferType,
        update_data_buffer: bool,
    ) -> Result<(), Error> {
        let Self {
            state,
            buffer,
            target,
        } = self;
        let mut tgt = target.lock().unwrap();
        tgt.set_active_exception(state.active_exception.take());
        tgt.post_read(transfer_type, update_data_buffer)?;

        state.data_validity = tgt.state().data_validity;
        state.version_number = tgt.state().version_number;

        if update_data_buffer {
            for channel in 0..buffer.channels() {
                buffer
                    .channel_mut(channel)
                    .copy_from_slice(tgt.buffer().channel(channel));
            }
        }
        Ok(())
    }

    fn do_pre_write(&mut self, _: TransferType, _: VersionNumber) -> Result<(), Error> {
        Err(Error::logic(format!(
            "transfer element '{}' is a copy decorator and cannot be written",
            self.state.name
        )))
    }

    fn do_write_transfer(&mut self, _version: VersionNumber) -> Result<bool, Error> {
        // unreachable: do_pre_write always fails
        Err(Error::logic(format!(
            "transfer element '{}' is a copy decorator and cannot be written",
            self.state.name
        )))
    }

    fn interrupt(&mut self) -> Result<(), Error> {
        self.target.lock().unwrap().interrupt()
    }
}

impl<T: UserType> NDRegisterAccessor<T> for CopyRegisterDecorator<T> {
    fn buffer(&self) -> &Buffer2D<T> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Buffer2D<T> {
        &mut self.buffer
    }
}

/// Creates a copy decorator over the given shared target. This is the
/// factory used when two elements need decoupled views of the same data.
pub fn make_copy_decorator<T: UserType>(
    target: &SharedAccessor<T>,
) -> Result<Box<dyn NDRegisterAccessor<T> + Send>, Error> {
    Ok(Box::new(CopyRegisterDecorator::new(Arc::clone(target))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{share, NDRegisterAccessorExt};
    use crate::test_support::{TestAccessor, TestRegister};
    use std::sync::atomic::Ordering;

    fn shared_test_accessor(initial: Vec<i32>) -> (Arc<TestRegister<i32>>, SharedAccessor<i32>) {
        let register = TestRegister::new(initial);
        let accessor = share(Box::new(TestAccessor::new(Arc::clone(&register)))
            as Box<dyn NDRegisterAccessor<i32> + Send>);
        (register, accessor)
    }

    #[test]
    fn decorator_reads_through_target() {
        let (register, target) = shared_test_accessor(vec![7, 11, 13, 17]);
        let mut decorator = AccessorDecorator::new(target);
        decorator.read().unwrap();
        assert_eq!(decorator.buffer().channel(0), &[7, 11, 13, 17]);
        assert_eq!(register.reads.load(Ordering::Relaxed), 1);
        assert!(decorator.state().version_number > VersionNumber::NULL);
    }

    #[test]
    fn decorator_writes_through_target() {
        let (register, target) = shared_test_accessor(vec![0, 0]);
        let mut decorator = AccessorDecorator::new(target);
        decorator.set_channel(&[5, 6]);
        decorator.write().unwrap();
        assert_eq!(*register.value.lock().unwrap(), vec![5, 6]);
        // the buffer is swapped back after the write
        assert_eq!(decorator.buffer().channel(0), &[5, 6]);
    }

    #[test]
    fn decorator_propagates_transfer_errors() {
        let (register, target) = shared_test_accessor(vec![1]);
        register.fail_read.store(true, Ordering::Relaxed);
        let mut decorator = AccessorDecorator::new(target);
        let before = decorator.buffer().channel(0).to_vec();
        assert!(matches!(decorator.read(), Err(Error::Runtime(_))));
        assert_eq!(decorator.buffer().channel(0), before.as_slice());
    }

    #[test]
    fn copy_decorator_copies_instead_of_swapping() {
        let (_register, target) = shared_test_accessor(vec![3, 4]);
        let mut first = CopyRegisterDecorator::new(Arc::clone(&target)).unwrap();
        let mut second = CopyRegisterDecorator::new(Arc::clone(&target)).unwrap();
        first.read().unwrap();
        second.read().unwrap();
        assert_eq!(first.buffer().channel(0), &[3, 4]);
        assert_eq!(second.buffer().channel(0), &[3, 4]);
        // the target still holds its own data after both reads
        assert_eq!(target.lock().unwrap().buffer().channel(0), &[3, 4]);
    }

    #[test]
    fn copy_decorator_is_read_only() {
        let (_register, target) = shared_test_accessor(vec![1]);
        let mut decorator = CopyRegisterDecorator::new(target).unwrap();
        assert!(decorator.is_read_only());
        assert!(matches!(decorator.write(), Err(Error::Logic(_))));
    }

    #[test]
    fn deep_decoration_replaces_the_innermost_target() {
        let (_register, innermost) = shared_test_accessor(vec![9]);
        let inner_id = innermost.lock().unwrap().state().id;
        let middle = share(
            Box::new(AccessorDecorator::new(innermost)) as Box<dyn NDRegisterAccessor<i32> + Send>
        );
        let mut outer = AccessorDecorator::new(middle);

        let replaced = outer.replace_innermost_target(&|target: &SharedAccessor<i32>| {
            Some(share(Box::new(
                CopyRegisterDecorator::new(Arc::clone(target)).unwrap(),
            )
                as Box<dyn NDRegisterAccessor<i32> + Send>))
        });
        assert!(replaced);
        // the copy decorator was spliced in above the innermost target, so
        // the chain still resolves to the same hardware element
        assert_eq!(outer.state().id, inner_id);
        outer.read().unwrap();
        assert_eq!(outer.buffer().channel(0), &[9]);
    }
}
