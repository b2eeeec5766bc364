use crate::error::{Result, TsError};

const SIZE_CLASSES: usize = 32;
/// Free buffers kept per size class.
const MAX_FREE_PER_CLASS: usize = 16;

/// Reusable payload buffers, bucketed by power-of-two size class.
///
/// A request for `size` bytes is served from class `log2(size)`, whose
/// buffers have a capacity of `2 << class` bytes. Returned buffers are
/// cleared and kept for the next request of the same class.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Vec<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            free: (0..SIZE_CLASSES).map(|_| Vec::new()).collect(),
        }
    }

    fn class_of(size: usize) -> usize {
        let size = size.max(1);
        (usize::BITS - 1 - size.leading_zeros()) as usize
    }

    /// Capacity of the buffers handed out for a request of `size` bytes.
    pub fn class_capacity(size: usize) -> usize {
        2usize << Self::class_of(size)
    }

    /// Returns an empty buffer able to hold at least `size` bytes.
    pub fn get(&mut self, size: usize) -> Result<Vec<u8>> {
        let class = Self::class_of(size);
        if class >= SIZE_CLASSES {
            return Err(TsError::OutOfMemory(size));
        }
        if self.free.is_empty() {
            self.free = (0..SIZE_CLASSES).map(|_| Vec::new()).collect();
        }
        if let Some(buf) = self.free[class].pop() {
            return Ok(buf);
        }

        let capacity = 2usize << class;
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| TsError::OutOfMemory(capacity))?;
        Ok(buf)
    }

    /// Hands a buffer back. Buffers that do not match a size class exactly
    /// are dropped.
    pub fn put(&mut self, mut buf: Vec<u8>) {
        let capacity = buf.capacity();
        if capacity < 2 || !capacity.is_power_of_two() {
            return;
        }
        let class = capacity.trailing_zeros() as usize - 1;
        if class >= SIZE_CLASSES {
            return;
        }
        if self.free.is_empty() {
            self.free = (0..SIZE_CLASSES).map(|_| Vec::new()).collect();
        }
        let slot = &mut self.free[class];
        if slot.len() < MAX_FREE_PER_CLASS {
            buf.clear();
            slot.push(buf);
        }
    }

    /// Number of idle buffers across all classes.
    pub fn idle(&self) -> usize {
        self.free.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_size_classes() {
        assert_eq!(BufferPool::class_capacity(1), 2);
        assert_eq!(BufferPool::class_capacity(1000), 1024);
        assert_eq!(BufferPool::class_capacity(1024), 2048);
        assert_eq!(BufferPool::class_capacity(204800), 262144);
    }

    #[test]
    fn test_reuse() {
        let mut pool = BufferPool::new();
        let mut buf = pool.get(1000).unwrap();
        assert!(buf.capacity() >= 1000);
        buf.extend_from_slice(&[1, 2, 3]);
        let ptr = buf.as_ptr();
        pool.put(buf);
        assert_eq!(pool.idle(), 1);

        let again = pool.get(600).unwrap();
        assert!(again.is_empty());
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_foreign_buffers_dropped() {
        let mut pool = BufferPool::new();
        pool.put(Vec::with_capacity(1000));
        assert_eq!(pool.idle(), 0);
    }
}
