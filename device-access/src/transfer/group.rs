//! Batched reads over several accessors sharing hardware transfers.

use crate::accessor::{SharedAccessor, UserType};
use crate::transfer::{TransferElementId, TransferType};
use crate::Error;
use std::collections::BTreeSet;

/// Object-safe view of one grouped accessor. The group only needs the
/// staged entry points, not the typed buffer.
trait GroupedElement: Send {
    fn id(&self) -> TransferElementId;
    fn pre_read(&self) -> Result<(), Error>;
    fn capture(&self, error: Error);
    fn has_active_exception(&self) -> bool;
    fn run_transfer(&self) -> Result<(), Error>;
    fn post_read(&self, update_data_buffer: bool) -> Result<(), Error>;
}

impl<T: UserType> GroupedElement for SharedAccessor<T> {
    fn id(&self) -> TransferElementId {
        self.lock().unwrap().state().id
    }

    fn pre_read(&self) -> Result<(), Error> {
        self.lock().unwrap().pre_read(TransferType::Read)
    }

    fn capture(&self, error: Error) {
        self.lock().unwrap().set_active_exception(Some(error));
    }

    fn has_active_exception(&self) -> bool {
        self.lock().unwrap().state().active_exception.is_some()
    }

    fn run_transfer(&self) -> Result<(), Error> {
        self.lock().unwrap().read_transfer()
    }

    fn post_read(&self, update_data_buffer: bool) -> Result<(), Error> {
        self.lock()
            .unwrap()
            .post_read(TransferType::Read, update_data_buffer)
    }
}

/// An explicit batch of accessors read together.
///
/// [`TransferGroup::read`] runs the pre stage on every element, then
/// performs the underlying transfer once per distinct transfer element id,
/// then runs every post stage. Elements created as decorators over a shared
/// target carry the target's id, so siblings (e.g. copy decorators) share a
/// single hardware round trip while each committing their own buffer.
///
/// Elements stay usable through the handles the caller keeps; only the
/// staged entry points are driven by the group.
#[derive(Default)]
pub struct TransferGroup {
    elements: Vec<Box<dyn GroupedElement>>,
}

impl TransferGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a shared accessor to the group. The caller keeps its handle for
    /// buffer access.
    pub fn add<T: UserType>(&mut self, accessor: &SharedAccessor<T>) {
        self.elements.push(Box::new(accessor.clone()));
    }

    /// Number of grouped elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Reads all grouped elements with one underlying transfer per distinct
    /// hardware element. Every element runs its full pre/transfer/post
    /// cycle; the first error is returned after all post stages have run.
    pub fn read(&mut self) -> Result<(), Error> {
        for element in &self.elements {
            if let Err(error) = element.pre_read() {
                element.capture(error);
            }
        }

        let mut transferred: BTreeSet<TransferElementId> = BTreeSet::new();
        for element in &self.elements {
            if element.has_active_exception() {
                continue;
            }
            if transferred.insert(element.id()) {
                if let Err(error) = element.run_transfer() {
                    element.capture(error);
                }
            }
        }

        let mut first_error = None;
        for element in &self.elements {
            let update_data_buffer = !element.has_active_exception();
            if let Err(error) = element.post_read(update_data_buffer) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::decorator::CopyRegisterDecorator;
    use crate::accessor::{share, NDRegisterAccessor};
    use crate::test_support::{TestAccessor, TestRegister};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[test]
    fn siblings_share_one_hardware_read() {
        let register = TestRegister::new(vec![7, 11]);
        let target = share(Box::new(TestAccessor::new(Arc::clone(&register)))
            as Box<dyn NDRegisterAccessor<i32> + Send>);

        let first = share(Box::new(
            CopyRegisterDecorator::new(Arc::clone(&target)).unwrap(),
        ) as Box<dyn NDRegisterAccessor<i32> + Send>);
        let second = share(Box::new(
            CopyRegisterDecorator::new(Arc::clone(&target)).unwrap(),
        ) as Box<dyn NDRegisterAccessor<i32> + Send>);

        let mut group = TransferGroup::new();
        group.add(&first);
        group.add(&second);
        group.read().unwrap();

        assert_eq!(register.reads.load(Ordering::Relaxed), 1);
        assert_eq!(first.lock().unwrap().buffer().channel(0), &[7, 11]);
        assert_eq!(second.lock().unwrap().buffer().channel(0), &[7, 11]);
    }

    #[test]
    fn transfer_error_reaches_every_sibling() {
        let register = TestRegister::new(vec![1]);
        let target = share(Box::new(TestAccessor::new(Arc::clone(&register)))
            as Box<dyn NDRegisterAccessor<i32> + Send>);
        let first = share(Box::new(
            CopyRegisterDecorator::new(Arc::clone(&target)).unwrap(),
        ) as Box<dyn NDRegisterAccessor<i32> + Send>);
        let second = share(Box::new(
            CopyRegisterDecorator::new(Arc::clone(&target)).unwrap(),
        ) as Box<dyn NDRegisterAccessor<i32> + Send>);

        register.fail_read.store(true, Ordering::Relaxed);

        let mut group = TransferGroup::new();
        group.add(&first);
        group.add(&second);
        assert!(group.read().is_err());

        // both siblings stay usable and read again after recovery
        register.fail_read.store(false, Ordering::Relaxed);
        group.read().unwrap();
        assert_eq!(second.lock().unwrap().buffer().channel(0), &[1]);
    }

    #[test]
    fn independent_elements_each_transfer() {
        let register_a = TestRegister::new(vec![1]);
        let register_b = TestRegister::new(vec![2]);
        let a = share(Box::new(TestAccessor::new(Arc::clone(&register_a)))
            as Box<dyn NDRegisterAccessor<i32> + Send>);
        let b = share(Box::new(TestAccessor::new(Arc::clone(&register_b)))
            as Box<dyn NDRegisterAccessor<i32> + Send>);

        let mut group = TransferGroup::new();
        group.add(&a);
        group.add(&b);
        group.read().unwrap();

        assert_eq!(register_a.reads.load(Ordering::Relaxed), 1);
        assert_eq!(register_b.reads.load(Ordering::Relaxed), 1);
        assert_eq!(a.lock().unwrap().buffer().channel(0), &[1]);
        assert_eq!(b.lock().unwrap().buffer().channel(0), &[2]);
    }
}
