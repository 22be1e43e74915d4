//! Device id allocator.

use crate::error::{Result, SvcError};
use crate::protocol::DEVICE_ID_MODULES_START;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Hands out device ids from `[start, bad)`.
///
/// Ids below `start` are never returned, and neither are the SVC and AP
/// ids, whatever `start` says. Ids at or above `bad` are never assigned; running into that
/// region is an allocation failure, not a wraparound.
#[derive(Debug)]
pub struct DeviceIdAllocator {
    start: u8,
    bad: u8,
    allocated: Mutex<BTreeSet<u8>>,
}

impl DeviceIdAllocator {
    pub fn new(start: u8, bad: u8) -> Self {
        Self {
            start: start.max(DEVICE_ID_MODULES_START),
            bad,
            allocated: Mutex::new(BTreeSet::new()),
        }
    }

    /// Allocate the lowest free id.
    pub fn allocate(&self) -> Result<u8> {
        let mut allocated = self.lock();
        let id = (self.start..self.bad)
            .find(|id| !allocated.contains(id))
            .ok_or(SvcError::ResourceExhausted)?;
        allocated.insert(id);
        Ok(id)
    }

    /// Return an id to the pool.
    pub fn free(&self, id: u8) -> Result<()> {
        if self.lock().remove(&id) {
            Ok(())
        } else {
            Err(SvcError::DoubleFree(id))
        }
    }

    pub fn is_allocated(&self, id: u8) -> bool {
        self.lock().contains(&id)
    }

    pub fn allocated_count(&self) -> usize {
        self.lock().len()
    }

    pub fn free_count(&self) -> usize {
        self.capacity() - self.allocated_count()
    }

    pub fn capacity(&self) -> usize {
        usize::from(self.bad.saturating_sub(self.start))
    }

    /// Forget every allocation, returning the ids that were still held.
    pub fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock()).into_iter().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<u8>> {
        // A panic while holding the lock cannot leave the set half-updated.
        self.allocated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DEVICE_ID_AP, DEVICE_ID_BAD, DEVICE_ID_SVC};

    fn allocator() -> DeviceIdAllocator {
        DeviceIdAllocator::new(DEVICE_ID_MODULES_START, DEVICE_ID_BAD)
    }

    #[test]
    fn test_first_id_skips_reserved() {
        let ida = allocator();
        assert_eq!(ida.allocate().unwrap(), 2);
        assert_eq!(ida.allocate().unwrap(), 3);
    }

    #[test]
    fn test_reserved_ids_never_allocated() {
        let ida = DeviceIdAllocator::new(DEVICE_ID_SVC, 4);
        assert_eq!(ida.capacity(), 2);
        let ids = [ida.allocate().unwrap(), ida.allocate().unwrap()];
        assert!(!ids.contains(&DEVICE_ID_SVC));
        assert!(!ids.contains(&DEVICE_ID_AP));
        assert_eq!(ida.allocate(), Err(SvcError::ResourceExhausted));
    }

    #[test]
    fn test_lowest_free_id_is_reused() {
        let ida = allocator();
        let a = ida.allocate().unwrap();
        let b = ida.allocate().unwrap();
        let _c = ida.allocate().unwrap();
        ida.free(a).unwrap();
        ida.free(b).unwrap();
        assert_eq!(ida.allocate().unwrap(), a);
        assert_eq!(ida.allocate().unwrap(), b);
    }

    #[test]
    fn test_free_returns_id_once() {
        let ida = allocator();
        let before = ida.free_count();
        let id = ida.allocate().unwrap();
        assert_eq!(ida.free_count(), before - 1);
        ida.free(id).unwrap();
        assert_eq!(ida.free_count(), before);
        assert_eq!(ida.free(id), Err(SvcError::DoubleFree(id)));
        assert_eq!(ida.free_count(), before);
    }

    #[test]
    fn test_free_unallocated_detected() {
        let ida = allocator();
        assert_eq!(ida.free(7), Err(SvcError::DoubleFree(7)));
        // Reserved ids are never owned by the allocator.
        assert_eq!(ida.free(1), Err(SvcError::DoubleFree(1)));
    }

    #[test]
    fn test_exhaustion_stops_below_bad_id() {
        let ida = DeviceIdAllocator::new(2, 5);
        assert_eq!(ida.capacity(), 3);
        assert_eq!(ida.allocate().unwrap(), 2);
        assert_eq!(ida.allocate().unwrap(), 3);
        assert_eq!(ida.allocate().unwrap(), 4);
        assert_eq!(ida.allocate(), Err(SvcError::ResourceExhausted));
        assert_eq!(ida.free_count(), 0);

        ida.free(3).unwrap();
        assert_eq!(ida.allocate().unwrap(), 3);
    }

    #[test]
    fn test_full_default_range() {
        let ida = allocator();
        for expected in DEVICE_ID_MODULES_START..DEVICE_ID_BAD {
            assert_eq!(ida.allocate().unwrap(), expected);
        }
        assert_eq!(ida.allocate(), Err(SvcError::ResourceExhausted));
    }

    #[test]
    fn test_drain() {
        let ida = allocator();
        ida.allocate().unwrap();
        ida.allocate().unwrap();
        assert_eq!(ida.drain(), vec![2, 3]);
        assert_eq!(ida.allocated_count(), 0);
    }

    #[test]
    fn test_concurrent_allocations_are_unique() {
        let ida = std::sync::Arc::new(allocator());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ida = ida.clone();
                std::thread::spawn(move || (0..10).map(|_| ida.allocate().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<u8> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 40);
    }
}
