//! The data transport queue of the asynchronous read path.

use crate::accessor::Buffer2D;
use crate::transfer::DataValidity;
use crate::{Error, VersionNumber};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// One complete update travelling through the asynchronous path: the
/// channels × samples data together with its version number and validity.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload<T> {
    /// The transported application data.
    pub value: Buffer2D<T>,
    /// Version number assigned by the producer.
    pub version: VersionNumber,
    /// Validity assigned by the producer.
    pub validity: DataValidity,
}

/// What a producer can put on the transport queue.
#[derive(Clone, Debug)]
pub enum QueueElement<T> {
    /// A regular data update.
    Value(Payload<T>),
    /// An error to be raised from the consumer's next read.
    Exception(Error),
    /// "There is no new value here, keep waiting." Never surfaces to the
    /// consumer; the pop operations skip these silently.
    Discard,
}

struct QueueInner<T> {
    elements: Mutex<VecDeque<QueueElement<T>>>,
    not_empty: Condvar,
    capacity: usize,
}

/// A bounded queue connecting one producer (the dispatcher or trigger
/// thread) with one consumer (the application thread reading the accessor).
///
/// Pushing never blocks: when the queue is full the oldest element is
/// overwritten, which is the documented data-loss point of the asynchronous
/// path. The handle is cloneable so the consumer side can inject an
/// interruption into its own queue.
pub struct DataTransportQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for DataTransportQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> DataTransportQueue<T> {
    /// Creates a queue holding at most `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            inner: Arc::new(QueueInner {
                elements: Mutex::new(VecDeque::with_capacity(capacity)),
                not_empty: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Pushes an element, overwriting the oldest entry when the queue is
    /// full. Returns `true` iff an element was lost.
    pub fn push_overwrite(&self, element: QueueElement<T>) -> bool {
        let mut elements = self.inner.elements.lock().unwrap();
        let overwritten = elements.len() == self.inner.capacity;
        if overwritten {
            elements.pop_front();
        }
        elements.push_back(element);
        self.inner.not_empty.notify_one();
        overwritten
    }

    /// Pops the next element without blocking. Returns `Ok(None)` when no
    /// element is available, `Err` when the next element is an exception.
    /// Discard elements are skipped invisibly.
    pub fn pop(&self) -> Result<Option<Payload<T>>, Error> {
        let mut elements = self.inner.elements.lock().unwrap();
        loop {
            match elements.pop_front() {
                Some(QueueElement::Value(payload)) => return Ok(Some(payload)),
                Some(QueueElement::Exception(error)) => return Err(error),
                Some(QueueElement::Discard) => continue,
                None => return Ok(None),
            }
        }
    }

    /// Pops the next element, blocking until one is available. Discard
    /// elements are skipped invisibly; an exception element is returned as
    /// `Err`.
    pub fn pop_wait(&self) -> Result<Payload<T>, Error> {
        let mut elements = self.inner.elements.lock().unwrap();
        loop {
            match elements.pop_front() {
                Some(QueueElement::Value(payload)) => return Ok(payload),
                Some(QueueElement::Exception(error)) => return Err(error),
                Some(QueueElement::Discard) => continue,
                None => {
                    elements = self.inner.not_empty.wait(elements).unwrap();
                }
            }
        }
    }

    /// Number of queued elements (including discards).
    pub fn len(&self) -> usize {
        self.inner.elements.lock().unwrap().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(sample: i32, version: VersionNumber) -> Payload<i32> {
        Payload {
            value: Buffer2D::from_rows(vec![vec![sample]]),
            version,
            validity: DataValidity::Ok,
        }
    }

    #[test]
    fn fifo_order() {
        let queue = DataTransportQueue::new(3);
        for i in 0..3 {
            queue.push_overwrite(QueueElement::Value(payload(i, VersionNumber::new())));
        }
        for i in 0..3 {
            assert_eq!(queue.pop().unwrap().unwrap().value.channel(0)[0], i);
        }
        assert!(queue.pop().unwrap().is_none());
    }

    #[test]
    fn overwrite_drops_oldest() {
        let queue = DataTransportQueue::new(3);
        for i in 0..5 {
            let lost = queue.push_overwrite(QueueElement::Value(payload(i, VersionNumber::new())));
            assert_eq!(lost, i >= 3);
        }
        assert_eq!(queue.pop().unwrap().unwrap().value.channel(0)[0], 2);
        assert_eq!(queue.pop().unwrap().unwrap().value.channel(0)[0], 3);
        assert_eq!(queue.pop().unwrap().unwrap().value.channel(0)[0], 4);
    }

    #[test]
    fn discards_are_invisible() {
        let queue = DataTransportQueue::new(3);
        queue.push_overwrite(QueueElement::Discard);
        queue.push_overwrite(QueueElement::Value(payload(7, VersionNumber::new())));
        assert_eq!(queue.pop().unwrap().unwrap().value.channel(0)[0], 7);

        queue.push_overwrite(QueueElement::Discard);
        assert!(queue.pop().unwrap().is_none());
    }

    #[test]
    fn exceptions_pop_as_errors() {
        let queue: DataTransportQueue<i32> = DataTransportQueue::new(3);
        queue.push_overwrite(QueueElement::Exception(Error::runtime("down")));
        assert_eq!(queue.pop(), Err(Error::runtime("down")));
        assert!(queue.pop().unwrap().is_none());
    }

    #[test]
    fn pop_wait_wakes_on_push() {
        let queue = DataTransportQueue::new(3);
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            producer.push_overwrite(QueueElement::Value(payload(42, VersionNumber::new())));
        });
        let received = queue.pop_wait().unwrap();
        assert_eq!(received.value.channel(0)[0], 42);
        handle.join().unwrap();
    }

    #[test]
    fn pop_wait_wakes_on_exception() {
        let queue: DataTransportQueue<i32> = DataTransportQueue::new(3);
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            producer.push_overwrite(QueueElement::Exception(Error::Interrupted));
        });
        assert_eq!(queue.pop_wait().unwrap_err(), Error::Interrupted);
        handle.join().unwrap();
    }
}
