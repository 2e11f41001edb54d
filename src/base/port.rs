/// `Port` models an IO port to a pipeline stage.
///
/// Two linked ports share a `Channel`, a bounded FIFO with staged writes: a push made during
/// `tick_one` is only visible to the consumer after the channel is committed, and the full check
/// uses the occupancy seen at the start of the cycle.  With one producer and one consumer per
/// channel this makes stage evaluation order within a cycle unobservable.
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, RwLock};

use crate::base::behavior::Committable;
use crate::builtin::queue::BoundedFifo;

#[derive(Default)]
pub struct InputPort {}

#[derive(Default)]
pub struct OutputPort {}

pub struct Channel<T> {
    fifo: BoundedFifo<T>,
    staged: Vec<T>,
    len_at_start: usize,
    max_occupancy: usize,
    accepted: u64,
    rejected: u64,
}

impl<T> Channel<T> {
    fn new(capacity: usize) -> Self {
        Self {
            fifo: BoundedFifo::new(capacity),
            staged: Vec::new(),
            len_at_start: 0,
            max_occupancy: 0,
            accepted: 0,
            rejected: 0,
        }
    }

    fn blocked(&self) -> bool {
        self.len_at_start + self.staged.len() >= self.fifo.capacity()
    }
}

/// Wrapper type of a reference to a channel.  Newtype is necessary to implement get/put methods at
/// the reference type.
pub struct ChannelRef<T>(Arc<RwLock<Channel<T>>>);

impl<T> Clone for ChannelRef<T> {
    fn clone(&self) -> Self {
        ChannelRef(Arc::clone(&self.0))
    }
}

pub struct Port<D, T> {
    lock: OnceLock<ChannelRef<T>>,
    direction: PhantomData<D>,
}

impl<D, T> Default for Port<D, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, T> Port<D, T> {
    pub fn new() -> Self {
        Port {
            lock: OnceLock::new(),
            direction: PhantomData,
        }
    }

    fn channel(&self) -> &ChannelRef<T> {
        self.lock.get().expect("port lock not set")
    }

    pub fn len(&self) -> usize {
        self.channel().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Port<OutputPort, T> {
    /// True when a `put` this cycle would be rejected.
    pub fn blocked(&self) -> bool {
        self.channel().blocked()
    }

    /// Access method of an output port from *within* the module that has the port.
    pub fn put(&mut self, data: &T) -> bool {
        self.channel().put(data)
    }
}

impl<T: Clone> Port<InputPort, T> {
    pub fn peek(&self) -> Option<T> {
        self.channel().peek()
    }

    /// Access method of an input port from *within* the module that has the port.
    pub fn get(&mut self) -> Option<T> {
        self.channel().get()
    }
}

impl<T> ChannelRef<T> {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Channel<T>> {
        self.0.read().expect("rw lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Channel<T>> {
        self.0.write().expect("rw lock poisoned")
    }

    pub fn blocked(&self) -> bool {
        self.read().blocked()
    }

    /// Committed occupancy.
    pub fn len(&self) -> usize {
        self.read().fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.read().fifo.capacity()
    }

    pub fn max_occupancy(&self) -> usize {
        self.read().max_occupancy
    }

    pub fn accepted(&self) -> u64 {
        self.read().accepted
    }

    pub fn rejected(&self) -> u64 {
        self.read().rejected
    }

    /// Stage a value onto the channel.
    /// Returns true if the channel was ready and the data was accepted.
    pub fn put_owned(&self, data: T) -> bool {
        let mut channel = self.write();
        if channel.blocked() {
            channel.rejected = channel.rejected.saturating_add(1);
            return false;
        }
        channel.staged.push(data);
        channel.accepted = channel.accepted.saturating_add(1);
        true
    }

    /// Take the oldest committed value, if any.
    pub fn get(&self) -> Option<T> {
        self.write().fifo.try_pop()
    }

    /// Drop staged and committed contents.
    pub fn clear(&self) {
        let mut channel = self.write();
        channel.fifo.clear();
        channel.staged.clear();
        channel.len_at_start = 0;
    }
}

impl<T: Clone> ChannelRef<T> {
    pub fn peek(&self) -> Option<T> {
        self.read().fifo.front().cloned()
    }

    pub fn put(&self, data: &T) -> bool {
        self.put_owned(data.clone())
    }
}

impl<T> Committable for ChannelRef<T> {
    fn commit(&self) {
        let mut channel = self.write();
        let staged = std::mem::take(&mut channel.staged);
        for item in staged {
            // room was reserved against the start-of-cycle occupancy, which can only have shrunk
            if channel.fifo.try_push(item).is_err() {
                unreachable!("staged push exceeded channel capacity");
            }
        }
        channel.len_at_start = channel.fifo.len();
        channel.max_occupancy = channel.max_occupancy.max(channel.len_at_start);
    }

    fn clear(&self) {
        ChannelRef::clear(self);
    }
}

fn new_channel<T>(capacity: usize) -> ChannelRef<T> {
    ChannelRef(Arc::new(RwLock::new(Channel::new(capacity))))
}

/// Connect an output port to an input port of the same type through a channel of `capacity`
/// entries.  The returned reference is kept by the owner of the clock to commit the channel.
pub fn link<T>(
    a: &mut Port<InputPort, T>,
    b: &mut Port<OutputPort, T>,
    capacity: usize,
) -> ChannelRef<T> {
    let channel = new_channel(capacity);
    a.lock
        .set(channel.clone())
        .map_err(|_| "")
        .expect("lock already set");
    b.lock
        .set(channel.clone())
        .map_err(|_| "")
        .expect("lock already set");
    channel
}

/// Tie an output port off without connecting to another input port.
/// The caller drains the channel through the returned reference.
pub fn tie_off<T>(a: &mut Port<OutputPort, T>, capacity: usize) -> ChannelRef<T> {
    let channel = new_channel(capacity);
    a.lock
        .set(channel.clone())
        .map_err(|_| "")
        .expect("lock already set");
    channel
}

/// Tie an input port off; the caller feeds the channel through the returned reference.
pub fn tie_off_input<T>(a: &mut Port<InputPort, T>, capacity: usize) -> ChannelRef<T> {
    let channel = new_channel(capacity);
    a.lock
        .set(channel.clone())
        .map_err(|_| "")
        .expect("lock already set");
    channel
}
