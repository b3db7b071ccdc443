// Freelist of scratch vectors owned by the scheduler.
//
// `acquire` hands out an empty Vec (recycled when possible); `release` clears
// it and keeps its allocation for the next acquire. A released Vec is moved
// into the pool, so nothing can alias it afterwards.

pub struct ScratchPool<T> {
    free: Vec<Vec<T>>,
    /// Released buffers above this count are dropped instead of kept.
    max_pooled: usize,
}

impl<T> ScratchPool<T> {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            free: Vec::new(),
            max_pooled,
        }
    }

    /// Take an empty buffer from the pool, or allocate a fresh one.
    pub fn acquire(&mut self) -> Vec<T> {
        self.free.pop().unwrap_or_default()
    }

    /// Return a buffer to the pool.
    pub fn release(&mut self, mut buf: Vec<T>) {
        buf.clear();
        if self.free.len() < self.max_pooled {
            self.free.push(buf);
        }
    }

    pub fn pooled(&self) -> usize {
        self.free.len()
    }
}

impl<T> Default for ScratchPool<T> {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffers_are_reused_empty() {
        let mut pool: ScratchPool<u32> = ScratchPool::new(4);
        let mut buf = pool.acquire();
        buf.extend([1, 2, 3]);
        let cap = buf.capacity();
        pool.release(buf);
        assert_eq!(pool.pooled(), 1);

        let again = pool.acquire();
        assert!(again.is_empty());
        assert_eq!(again.capacity(), cap);
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn pool_size_is_bounded() {
        let mut pool: ScratchPool<u8> = ScratchPool::new(2);
        for _ in 0..5 {
            pool.release(Vec::with_capacity(8));
        }
        assert_eq!(pool.pooled(), 2);
    }
}
