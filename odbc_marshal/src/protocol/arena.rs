use std::any::Any;

/// Owns every buffer handed to the driver during one bind+execute cycle.
///
/// Buffers are boxed slices: their heap storage never moves or grows once
/// allocated, so a pointer returned by an `alloc_*` call stays valid until
/// the arena is dropped. Dropping the arena releases everything at once.
#[derive(Default)]
pub struct BufferArena {
    buffers: Vec<Box<dyn Any>>,
    bytes: usize,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `data` and returns a pointer to its first element.
    pub fn alloc_from<T: 'static>(&mut self, data: Vec<T>) -> *mut T {
        let mut boxed = data.into_boxed_slice();
        let ptr = boxed.as_mut_ptr();
        self.bytes += std::mem::size_of_val(&*boxed);
        self.buffers.push(Box::new(boxed));
        ptr
    }

    pub fn alloc_slice<T: Clone + 'static>(&mut self, fill: T, len: usize) -> *mut T {
        self.alloc_from(vec![fill; len.max(1)])
    }

    pub fn alloc_value<T: 'static>(&mut self, value: T) -> *mut T {
        self.alloc_from(vec![value])
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Total bytes held across all buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.bytes
    }
}

impl std::fmt::Debug for BufferArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferArena")
            .field("buffers", &self.buffers.len())
            .field("bytes", &self.bytes)
            .finish()
    }
}
