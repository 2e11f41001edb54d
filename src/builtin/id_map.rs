use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdMapError {
    #[error("id {0} is already mapped")]
    Occupied(u32),
    #[error("id {id} is outside the {bits}-bit id space")]
    OutOfRange { id: u32, bits: u32 },
}

/// Slot arena keyed by a fixed-width identifier.
///
/// Every id owns exactly one slot; `None` marks it unmapped, so id 0 is an ordinary key.  Mapping an
/// id that is still live is refused rather than overwritten.
#[derive(Debug, Clone)]
pub struct IdMap<V> {
    bits: u32,
    slots: Vec<Option<V>>,
    live: usize,
}

impl<V> IdMap<V> {
    pub fn new(bits: u32) -> Self {
        assert!((1..=24).contains(&bits), "id width must be within 1..=24 bits");
        Self {
            bits,
            slots: (0..(1usize << bits)).map(|_| None).collect(),
            live: 0,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn id_space(&self) -> usize {
        self.slots.len()
    }

    pub fn live(&self) -> usize {
        self.live
    }

    fn slot(&self, id: u32) -> Result<usize, IdMapError> {
        let idx = id as usize;
        if idx >= self.slots.len() {
            return Err(IdMapError::OutOfRange { id, bits: self.bits });
        }
        Ok(idx)
    }

    pub fn insert(&mut self, id: u32, value: V) -> Result<(), IdMapError> {
        let idx = self.slot(id)?;
        if self.slots[idx].is_some() {
            return Err(IdMapError::Occupied(id));
        }
        self.slots[idx] = Some(value);
        self.live += 1;
        Ok(())
    }

    pub fn get(&self, id: u32) -> Option<&V> {
        self.slot(id).ok().and_then(|idx| self.slots[idx].as_ref())
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut V> {
        let idx = self.slot(id).ok()?;
        self.slots[idx].as_mut()
    }

    pub fn is_mapped(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: u32) -> Option<V> {
        let idx = self.slot(id).ok()?;
        let value = self.slots[idx].take();
        if value.is_some() {
            self.live -= 1;
        }
        value
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.live = 0;
    }
}

/// Wrapping id counter of a fixed bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdAllocator {
    next: u32,
    mask: u32,
}

impl IdAllocator {
    pub fn new(bits: u32) -> Self {
        assert!((1..=32).contains(&bits), "id width must be within 1..=32 bits");
        let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
        Self { next: 0, mask }
    }

    /// Start the counter at an arbitrary point, masked into range.
    pub fn starting_at(bits: u32, first: u32) -> Self {
        let mut alloc = Self::new(bits);
        alloc.next = first & alloc.mask;
        alloc
    }

    pub fn peek(&self) -> u32 {
        self.next
    }

    pub fn advance(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1) & self.mask;
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(16)
    }
}
