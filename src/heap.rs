//! Append-only heap of integer arrays.
//!
//! Arrays are never freed: a reference handed out by [`Heap::alloc`] stays
//! valid for the lifetime of the heap. References are plain `i32` indices
//! so they can live on the operand stack next to ordinary integers.
use crate::runtime::Fault;

/// Reference to an array stored in a [`Heap`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HeapRef(i32);

impl HeapRef {
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl From<i32> for HeapRef {
    fn from(raw: i32) -> Self {
        HeapRef(raw)
    }
}

/// `int[]` with its length kept apart from the element storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntArray {
    length: i32,
    data: Vec<i32>,
}

impl IntArray {
    /// Allocates a zeroed array of `length` elements.
    pub fn new(length: i32) -> Result<Self, Fault> {
        let len = usize::try_from(length).map_err(|_| Fault::NegativeArraySize(length))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Fault::OutOfMemory { requested: len })?;
        data.resize(len, 0);
        Ok(IntArray { length, data })
    }

    pub const fn length(&self) -> i32 {
        self.length
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }

    fn slot(&self, index: i32) -> Result<usize, Fault> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < self.data.len())
            .ok_or(Fault::ArrayIndexOutOfBounds {
                index,
                length: self.length,
            })
    }

    pub fn load(&self, index: i32) -> Result<i32, Fault> {
        let slot = self.slot(index)?;
        Ok(self.data[slot])
    }

    pub fn store(&mut self, index: i32, value: i32) -> Result<(), Fault> {
        let slot = self.slot(index)?;
        self.data[slot] = value;
        Ok(())
    }
}

/// Allocation table of every array created during a run.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    arrays: Vec<IntArray>,
}

impl Heap {
    /// The heap starts out holding zero arrays.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Allocates a zeroed array of `length` elements and returns its
    /// reference.
    pub fn alloc(&mut self, length: i32) -> Result<HeapRef, Fault> {
        let array = IntArray::new(length)?;
        self.add(array)
    }

    /// Registers an array and returns a fresh reference to it.
    pub fn add(&mut self, array: IntArray) -> Result<HeapRef, Fault> {
        let raw = i32::try_from(self.arrays.len()).map_err(|_| Fault::OutOfMemory {
            requested: array.data.len(),
        })?;
        self.arrays.push(array);
        Ok(HeapRef(raw))
    }

    pub fn get(&self, reference: HeapRef) -> Result<&IntArray, Fault> {
        usize::try_from(reference.0)
            .ok()
            .and_then(|i| self.arrays.get(i))
            .ok_or(Fault::InvalidReference(reference.0))
    }

    pub fn get_mut(&mut self, reference: HeapRef) -> Result<&mut IntArray, Fault> {
        usize::try_from(reference.0)
            .ok()
            .and_then(|i| self.arrays.get_mut(i))
            .ok_or(Fault::InvalidReference(reference.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_sequential() {
        let mut heap = Heap::new();
        assert!(heap.is_empty());
        let a = heap.alloc(3).unwrap();
        let b = heap.alloc(0).unwrap();
        assert_eq!((a.as_i32(), b.as_i32()), (0, 1));
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.get(a).unwrap().length(), 3);
        assert!(heap.get(b).unwrap().as_slice().is_empty());
    }

    #[test]
    fn store_then_load() {
        let mut heap = Heap::new();
        let r = heap.alloc(4).unwrap();
        for i in 0..4 {
            heap.get_mut(r).unwrap().store(i, i * 10 - 5).unwrap();
        }
        assert_eq!(heap.get(r).unwrap().as_slice(), &[-5, 5, 15, 25]);
        assert_eq!(heap.get(r).unwrap().load(2).unwrap(), 15);
    }

    #[test]
    fn out_of_bounds_indices_are_reported() {
        let mut heap = Heap::new();
        let r = heap.alloc(2).unwrap();
        let array = heap.get_mut(r).unwrap();
        assert!(matches!(
            array.load(2),
            Err(Fault::ArrayIndexOutOfBounds {
                index: 2,
                length: 2
            })
        ));
        assert!(matches!(
            array.store(-1, 7),
            Err(Fault::ArrayIndexOutOfBounds {
                index: -1,
                length: 2
            })
        ));
    }

    #[test]
    fn invalid_references_and_sizes() {
        let mut heap = Heap::new();
        assert!(matches!(heap.alloc(-1), Err(Fault::NegativeArraySize(-1))));
        assert!(matches!(
            heap.get(HeapRef::from(0)),
            Err(Fault::InvalidReference(0))
        ));
        heap.alloc(1).unwrap();
        assert!(matches!(
            heap.get_mut(HeapRef::from(-3)),
            Err(Fault::InvalidReference(-3))
        ));
    }
}
