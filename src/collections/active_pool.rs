use super::RawAccess;
use crate::error::PhysicsError;

/// Stored records keep their own handle id so partition swaps can repair the
/// handle-to-position map in O(1).
pub trait PoolItem {
    fn index(&self) -> u32;
    fn set_index(&mut self, index: u32);
}

pub const INVALID_POSITION: u32 = u32::MAX;

/// Fixed-capacity contiguous storage partitioned into an active prefix and an
/// inactive suffix. Handles are stable for the lifetime of the slot; the
/// backing buffer never reallocates, so positions only change through the
/// O(1) boundary swaps performed here.
pub struct ActivePool<T: PoolItem> {
    resource: &'static str,
    data: Vec<T>,
    map: Vec<u32>,
    free: Vec<u32>,
    active_count: usize,
}

impl<T: PoolItem> ActivePool<T> {
    #[must_use]
    pub fn new(resource: &'static str, capacity: usize) -> Self {
        Self {
            resource,
            data: Vec::with_capacity(capacity),
            map: Vec::with_capacity(capacity),
            free: Vec::new(),
            active_count: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Places `item` in the pool and returns its handle. The record lands in
    /// the active prefix or the inactive suffix according to `active`.
    pub fn allocate(&mut self, mut item: T, active: bool) -> Result<u32, PhysicsError> {
        if self.data.len() == self.data.capacity() {
            return Err(PhysicsError::CapacityExceeded {
                resource: self.resource,
                capacity: self.data.capacity(),
            });
        }

        let handle = if let Some(handle) = self.free.pop() {
            handle
        } else {
            self.map.push(INVALID_POSITION);
            self.map.len() as u32 - 1
        };

        item.set_index(handle);
        self.map[handle as usize] = self.data.len() as u32;
        self.data.push(item);

        if active {
            let last = self.data.len() - 1;
            self.swap_positions(self.active_count, last);
            self.active_count += 1;
        }

        Ok(handle)
    }

    /// Removes the record, keeping the partition compact. The handle id is
    /// recycled for later allocations.
    pub fn free(&mut self, handle: u32) -> T {
        let mut position = self.position(handle);

        if position < self.active_count {
            self.swap_positions(position, self.active_count - 1);
            self.active_count -= 1;
            position = self.active_count;
        }

        let last = self.data.len() - 1;
        self.swap_positions(position, last);

        let item = self.data.pop().unwrap_or_else(|| unreachable!());
        self.map[handle as usize] = INVALID_POSITION;
        self.free.push(handle);
        item
    }

    /// O(1) move across the partition boundary. No-op when already on the
    /// requested side.
    pub fn move_active(&mut self, handle: u32, active: bool) {
        let position = self.position(handle);

        if active && position >= self.active_count {
            self.swap_positions(position, self.active_count);
            self.active_count += 1;
        } else if !active && position < self.active_count {
            self.swap_positions(position, self.active_count - 1);
            self.active_count -= 1;
        }
    }

    #[must_use]
    pub fn is_active(&self, handle: u32) -> bool {
        self.position(handle) < self.active_count
    }

    #[must_use]
    pub fn contains(&self, handle: u32) -> bool {
        (handle as usize) < self.map.len() && self.map[handle as usize] != INVALID_POSITION
    }

    #[inline]
    #[must_use]
    pub fn position(&self, handle: u32) -> usize {
        let position = self.map[handle as usize];
        debug_assert_ne!(position, INVALID_POSITION);
        position as usize
    }

    #[inline]
    #[must_use]
    pub fn get(&self, handle: u32) -> &T {
        &self.data[self.position(handle)]
    }

    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, handle: u32) -> &mut T {
        let position = self.position(handle);
        &mut self.data[position]
    }

    #[must_use]
    pub fn active(&self) -> &[T] {
        &self.data[..self.active_count]
    }

    #[must_use]
    pub fn active_mut(&mut self) -> &mut [T] {
        &mut self.data[..self.active_count]
    }

    #[must_use]
    pub fn elements(&self) -> &[T] {
        &self.data
    }

    #[must_use]
    pub fn elements_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Splits the pool into the handle map and a raw view of the records for
    /// the island-parallel phases. Positions are stable for the lifetime of
    /// the access; islands must not touch each other's records.
    pub(crate) fn access(&mut self) -> PoolAccess<'_, T> {
        PoolAccess {
            map: &self.map,
            data: RawAccess::new(&mut self.data),
        }
    }

    fn swap_positions(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.data.swap(a, b);
        self.map[self.data[a].index() as usize] = a as u32;
        self.map[self.data[b].index() as usize] = b as u32;
    }
}

pub(crate) struct PoolAccess<'a, T> {
    map: &'a [u32],
    data: RawAccess<'a, T>,
}

impl<T> PoolAccess<'_, T> {
    /// # Safety
    /// Caller guarantees no other live reference to this record, per the
    /// island partition.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn by_handle(&self, handle: u32) -> &mut T {
        let position = self.map[handle as usize];
        debug_assert_ne!(position, INVALID_POSITION);
        unsafe { self.data.get_mut(position as usize) }
    }

    pub fn read(&self, handle: u32) -> &T {
        let position = self.map[handle as usize];
        debug_assert_ne!(position, INVALID_POSITION);
        self.data.get(position as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Record {
        index: u32,
        tag: u32,
    }

    impl Record {
        const fn new(tag: u32) -> Self {
            Self { index: 0, tag }
        }
    }

    impl PoolItem for Record {
        fn index(&self) -> u32 {
            self.index
        }
        fn set_index(&mut self, index: u32) {
            self.index = index;
        }
    }

    #[test]
    fn partition_tracks_moves() {
        let mut pool = ActivePool::new("records", 8);
        let a = pool.allocate(Record::new(1), true).unwrap();
        let b = pool.allocate(Record::new(2), true).unwrap();
        let c = pool.allocate(Record::new(3), false).unwrap();
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.len(), 3);

        pool.move_active(a, false);
        assert_eq!(pool.active_count(), 1);
        assert!(!pool.is_active(a));
        assert!(pool.is_active(b));

        pool.move_active(c, true);
        assert_eq!(pool.active_count(), 2);
        assert!(pool.is_active(c));

        // handles keep resolving to the right record after all the swaps
        assert_eq!(pool.get(a).tag, 1);
        assert_eq!(pool.get(b).tag, 2);
        assert_eq!(pool.get(c).tag, 3);
    }

    #[test]
    fn move_active_is_idempotent() {
        let mut pool = ActivePool::new("records", 4);
        let a = pool.allocate(Record::new(7), true).unwrap();
        pool.move_active(a, true);
        assert_eq!(pool.active_count(), 1);
        pool.move_active(a, false);
        pool.move_active(a, false);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn free_respects_partition() {
        let mut pool = ActivePool::new("records", 8);
        let a = pool.allocate(Record::new(1), true).unwrap();
        let b = pool.allocate(Record::new(2), true).unwrap();
        let c = pool.allocate(Record::new(3), false).unwrap();

        let freed = pool.free(a);
        assert_eq!(freed.tag, 1);
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(b).tag, 2);
        assert_eq!(pool.get(c).tag, 3);
        assert!(!pool.contains(a));

        // recycled handle
        let d = pool.allocate(Record::new(4), false).unwrap();
        assert_eq!(d, a);
        assert_eq!(pool.get(d).tag, 4);
    }

    #[test]
    fn capacity_exceeded_leaves_pool_unchanged() {
        let mut pool = ActivePool::new("records", 2);
        pool.allocate(Record::new(1), true).unwrap();
        pool.allocate(Record::new(2), false).unwrap();

        let err = pool.allocate(Record::new(3), true).unwrap_err();
        assert!(matches!(err, PhysicsError::CapacityExceeded { .. }));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.active_count(), 1);
    }
}
