/// Fixed-capacity circular FIFO.
///
/// Storage never grows: `try_push` on a full queue hands the item back, which callers treat as
/// the "not ready" backpressure signal and retry on a later cycle.
#[derive(Debug, Clone)]
pub struct BoundedFifo<T> {
    slots: Vec<Option<T>>,
    rd: usize,
    wr: usize,
    count: usize,
}

impl<T> BoundedFifo<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "fifo capacity must be > 0");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            rd: 0,
            wr: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.slots[self.wr] = Some(item);
        self.wr = self.advance(self.wr);
        self.count += 1;
        Ok(())
    }

    pub fn try_pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.rd].take();
        debug_assert!(item.is_some(), "live slot was empty");
        self.rd = self.advance(self.rd);
        self.count -= 1;
        item
    }

    pub fn front(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.rd].as_ref()
    }

    /// Live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.count).filter_map(move |i| self.slots[(self.rd + i) % self.slots.len()].as_ref())
    }

    /// Remove the oldest entry matching `pred`, closing the gap so the remaining entries keep
    /// their relative order.
    pub fn remove_first<F>(&mut self, mut pred: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let cap = self.slots.len();
        let pos = (0..self.count).find(|&i| {
            self.slots[(self.rd + i) % cap]
                .as_ref()
                .is_some_and(&mut pred)
        })?;
        if pos == 0 {
            return self.try_pop();
        }
        let hit = self.slots[(self.rd + pos) % cap].take();
        for i in pos..self.count - 1 {
            let src = (self.rd + i + 1) % cap;
            let dst = (self.rd + i) % cap;
            self.slots[dst] = self.slots[src].take();
        }
        self.wr = (self.wr + cap - 1) % cap;
        self.count -= 1;
        hit
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.rd = 0;
        self.wr = 0;
        self.count = 0;
    }

    fn advance(&self, idx: usize) -> usize {
        (idx + 1) % self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::BoundedFifo;

    #[test]
    fn push_rejects_when_full() {
        let mut fifo = BoundedFifo::new(2);
        assert!(fifo.try_push(1).is_ok());
        assert!(fifo.try_push(2).is_ok());
        assert_eq!(Err(3), fifo.try_push(3));
        assert_eq!(2, fifo.len());
    }

    #[test]
    fn pop_wraps_around() {
        let mut fifo = BoundedFifo::new(3);
        for round in 0..5u32 {
            fifo.try_push(round * 2).unwrap();
            fifo.try_push(round * 2 + 1).unwrap();
            assert_eq!(Some(round * 2), fifo.try_pop());
            assert_eq!(Some(round * 2 + 1), fifo.try_pop());
        }
        assert!(fifo.is_empty());
        assert!(fifo.try_pop().is_none());
    }

    #[test]
    fn remove_first_keeps_order() {
        let mut fifo = BoundedFifo::new(4);
        // start the ring off-center so the shift crosses the wrap point
        fifo.try_push(0).unwrap();
        fifo.try_push(0).unwrap();
        fifo.try_pop();
        fifo.try_pop();
        for v in [10, 11, 12, 13] {
            fifo.try_push(v).unwrap();
        }
        assert_eq!(Some(12), fifo.remove_first(|&v| v == 12));
        assert_eq!(vec![10, 11, 13], fifo.iter().copied().collect::<Vec<_>>());
        assert!(fifo.try_push(14).is_ok());
        assert_eq!(vec![10, 11, 13, 14], fifo.iter().copied().collect::<Vec<_>>());
        assert_eq!(None, fifo.remove_first(|&v| v == 99));
        assert_eq!(Some(10), fifo.remove_first(|&v| v == 10));
        assert_eq!(Some(11), fifo.front().copied());
    }
}
