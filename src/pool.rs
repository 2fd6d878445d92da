//! A small capped free-list pool.
//!
//! Used for exemplar objects, rendering byte buffers, label-validation hash
//! sets, and child-snapshot vectors. Every rented object is returned on all
//! exit paths by its caller; the pool itself only caps how large a returned
//! object it is willing to keep, so a single oversized buffer doesn't pin
//! memory forever.

use parking_lot::Mutex;

/// A capped pool of reusable `T`s, selected by a size function.
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    max_pooled: usize,
    max_item_size: usize,
    size_of: fn(&T) -> usize,
    make: fn() -> T,
}

impl<T> Pool<T> {
    /// Creates a pool that keeps at most `max_pooled` items, each no larger
    /// than `max_item_size` as measured by `size_of`, constructing fresh
    /// items with `make` when the pool is empty.
    pub fn new(
        max_pooled: usize,
        max_item_size: usize,
        size_of: fn(&T) -> usize,
        make: fn() -> T,
    ) -> Self {
        Self { free: Mutex::new(Vec::with_capacity(max_pooled)), max_pooled, max_item_size, size_of, make }
    }

    /// Takes an item from the pool, constructing a new one if the pool is
    /// empty.
    pub fn take(&self) -> T {
        self.free.lock().pop().unwrap_or_else(self.make)
    }

    /// Returns an item to the pool, dropping it instead if the pool is full
    /// or the item exceeds the size threshold.
    pub fn give(&self, item: T) {
        if (self.size_of)(&item) > self.max_item_size {
            return;
        }

        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(item);
        }
    }
}

/// An RAII handle to a rented `String` scratch buffer: dereferences to the
/// buffer and returns it to the pool on every exit path, including an early
/// `?` return or a panic, since the return happens in `Drop` rather than at
/// an explicit call site.
pub struct PooledString<'a> {
    pool: &'a Pool<String>,
    buf: Option<String>,
}

impl<'a> PooledString<'a> {
    /// Rents a buffer from `pool` and clears it for reuse.
    pub fn new(pool: &'a Pool<String>) -> Self {
        let mut buf = pool.take();
        buf.clear();
        Self { pool, buf: Some(buf) }
    }
}

impl std::ops::Deref for PooledString<'_> {
    type Target = String;

    fn deref(&self) -> &String {
        self.buf.as_ref().expect("buf taken only by Drop")
    }
}

impl std::ops::DerefMut for PooledString<'_> {
    fn deref_mut(&mut self) -> &mut String {
        self.buf.as_mut().expect("buf taken only by Drop")
    }
}

impl Drop for PooledString<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give(buf);
        }
    }
}

/// An RAII handle to a rented `Vec<T>` snapshot buffer, with the same
/// return-on-every-exit-path discipline as [`PooledString`].
pub struct PooledVec<'a, T> {
    pool: &'a Pool<Vec<T>>,
    items: Option<Vec<T>>,
}

impl<'a, T> PooledVec<'a, T> {
    /// Rents a vector from `pool` and clears it for reuse.
    pub fn new(pool: &'a Pool<Vec<T>>) -> Self {
        let mut items = pool.take();
        items.clear();
        Self { pool, items: Some(items) }
    }
}

impl<T> std::ops::Deref for PooledVec<'_, T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        self.items.as_ref().expect("items taken only by Drop")
    }
}

impl<T> std::ops::DerefMut for PooledVec<'_, T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        self.items.as_mut().expect("items taken only by Drop")
    }
}

impl<T> Drop for PooledVec<'_, T> {
    fn drop(&mut self) {
        if let Some(items) = self.items.take() {
            self.pool.give(items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_returned_items() {
        let pool: Pool<Vec<u8>> = Pool::new(4, 1024, |v| v.capacity(), Vec::new);
        let mut buf = pool.take();
        buf.extend_from_slice(b"hello");
        pool.give(buf);

        let reused = pool.take();
        assert!(reused.capacity() >= 5);
    }

    #[test]
    fn drops_oversized_items() {
        let pool: Pool<Vec<u8>> = Pool::new(4, 8, |v| v.capacity(), Vec::new);
        let big = Vec::with_capacity(1024);
        pool.give(big);
        assert_eq!(pool.free.lock().len(), 0);
    }

    #[test]
    fn caps_pooled_count() {
        let pool: Pool<Vec<u8>> = Pool::new(1, 1024, |v| v.capacity(), Vec::new);
        pool.give(Vec::new());
        pool.give(Vec::new());
        assert_eq!(pool.free.lock().len(), 1);
    }

    #[test]
    fn pooled_string_returns_capacity_on_drop() {
        let pool: Pool<String> = Pool::new(4, 1024, |s| s.capacity(), String::new);
        {
            let mut buf = PooledString::new(&pool);
            buf.push_str("hello world");
        }
        assert_eq!(pool.free.lock().len(), 1);
        let reused = PooledString::new(&pool);
        assert!(reused.capacity() >= 11);
    }

    #[test]
    fn pooled_string_returns_even_on_early_error_return() {
        fn fails(pool: &Pool<String>) -> Result<(), ()> {
            let mut buf = PooledString::new(pool);
            buf.push_str("scratch");
            Err(())
        }

        let pool: Pool<String> = Pool::new(4, 1024, |s| s.capacity(), String::new);
        assert!(fails(&pool).is_err());
        assert_eq!(pool.free.lock().len(), 1);
    }

    #[test]
    fn pooled_vec_reuses_capacity() {
        let pool: Pool<Vec<u32>> = Pool::new(4, 64, |v| v.capacity(), Vec::new);
        {
            let mut items = PooledVec::new(&pool);
            items.extend([1, 2, 3]);
        }
        let reused = PooledVec::new(&pool);
        assert!(reused.capacity() >= 3);
        assert!(reused.is_empty());
    }
}
