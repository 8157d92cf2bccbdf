//! Fixed capacity secondary ray stream, compacted through one atomic counter.

use std::{
    marker::PhantomData,
    sync::atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;

use crate::{geometry::Ray, util::Rgba};

/// What a secondary ray contributes to its pixel, besides the query result.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SecondaryPayload {
    /// Slot of the originating pixel in the accumulation buffer
    pub pixel: u32,
    /// Color (or color filter) and weight carried by the ray
    pub weight: Rgba,
}

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error("Secondary ray queue overflow: {requested} rays emitted, capacity is {capacity}")]
pub struct CapacityExceeded {
    pub requested: usize,
    pub capacity: usize,
}

/// Ray and payload buffers plus the counter of emitted rays.
///
/// After a shading launch the counter holds the number of emit attempts. Slots
/// `0..min(counter, capacity)` are filled, nothing at or past the capacity is ever written.
#[derive(Debug)]
pub struct SecondaryRayQueue {
    rays: Vec<Ray>,
    payloads: Vec<SecondaryPayload>,
    counter: AtomicUsize,
}

impl SecondaryRayQueue {
    pub fn with_capacity(capacity: usize) -> SecondaryRayQueue {
        SecondaryRayQueue {
            rays: vec![Ray::default(); capacity],
            payloads: vec![SecondaryPayload::default(); capacity],
            counter: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.rays.len()
    }

    /// Empties the queue. Exclusive access, no other emitter can be alive.
    pub fn reset(&mut self) {
        *self.counter.get_mut() = 0;
    }

    /// Handle for pushing rays from many threads at once.
    pub fn emitter(&mut self) -> Emitter<'_> {
        Emitter {
            rays: self.rays.as_mut_ptr(),
            payloads: self.payloads.as_mut_ptr(),
            capacity: self.rays.len(),
            counter: &self.counter,
            _marker: PhantomData,
        }
    }

    /// Number of rays in the queue, or an error if more were emitted than fit.
    pub fn len(&self) -> Result<usize, CapacityExceeded> {
        let requested = self.counter.load(Ordering::Acquire);
        if requested > self.capacity() {
            Err(CapacityExceeded {
                requested,
                capacity: self.capacity(),
            })
        } else {
            Ok(requested)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counter.load(Ordering::Acquire) == 0
    }

    /// Clamps the counter to the capacity, keeping the rays that made it in.
    /// Returns the number of rays that were refused.
    pub fn truncate_overflow(&mut self) -> usize {
        let counter = self.counter.get_mut();
        let dropped = counter.saturating_sub(self.rays.len());
        *counter -= dropped;
        dropped
    }

    /// Valid rays, clamped to the capacity.
    pub fn rays(&self) -> &[Ray] {
        &self.rays[..self.valid_len()]
    }

    pub fn payloads(&self) -> &[SecondaryPayload] {
        &self.payloads[..self.valid_len()]
    }

    fn valid_len(&self) -> usize {
        self.counter.load(Ordering::Acquire).min(self.capacity())
    }
}

/// Shared writer into a [`SecondaryRayQueue`].
///
/// Each [`Emitter::emit`] claims a unique slot with `fetch_add` and writes only there.
#[derive(Copy, Clone)]
pub struct Emitter<'a> {
    rays: *mut Ray,
    payloads: *mut SecondaryPayload,
    capacity: usize,
    counter: &'a AtomicUsize,
    _marker: PhantomData<&'a mut SecondaryRayQueue>,
}

// SAFETY: Emitter only writes through the pointers at slots claimed by `fetch_add`, which
// are unique across all threads, and the queue is mutably borrowed for `'a`.
unsafe impl Send for Emitter<'_> {}
unsafe impl Sync for Emitter<'_> {}

impl Emitter<'_> {
    /// Appends a ray with its payload. Returns the slot, or an error if the queue is full.
    /// A refused emit still counts, so that the overflow shows up in [`SecondaryRayQueue::len`].
    pub fn emit(&self, ray: Ray, payload: SecondaryPayload) -> Result<usize, CapacityExceeded> {
        let slot = self.counter.fetch_add(1, Ordering::Relaxed);
        if slot >= self.capacity {
            return Err(CapacityExceeded {
                requested: slot + 1,
                capacity: self.capacity,
            });
        }

        // SAFETY: slot < capacity, which is the length of both buffers, and no other
        // emit call can have received the same slot.
        unsafe {
            self.rays.add(slot).write(ray);
            self.payloads.add(slot).write(payload);
        }

        Ok(slot)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{WorldPoint, WorldVector};
    use assert2::{assert, let_assert};
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn numbered_ray(n: usize) -> Ray {
        Ray::new(WorldPoint::new(n as f32, 0.0, 0.0), WorldVector::x())
    }

    fn payload(n: usize) -> SecondaryPayload {
        SecondaryPayload {
            pixel: n as u32,
            weight: Rgba::new(1.0, 1.0, 1.0, 1.0),
        }
    }

    #[test]
    fn fills_up_to_capacity() {
        let mut queue = SecondaryRayQueue::with_capacity(4);
        {
            let emitter = queue.emitter();
            for i in 0..4 {
                let_assert!(Ok(slot) = emitter.emit(numbered_ray(i), payload(i)));
                assert!(slot == i);
            }
        }
        let_assert!(Ok(4) = queue.len());
        assert!(queue.payloads()[3].pixel == 3);
    }

    #[test]
    fn one_over_capacity_fails() {
        let mut queue = SecondaryRayQueue::with_capacity(4);
        {
            let emitter = queue.emitter();
            for i in 0..4 {
                let_assert!(Ok(_) = emitter.emit(numbered_ray(i), payload(i)));
            }
            let_assert!(
                Err(CapacityExceeded {
                    requested: 5,
                    capacity: 4
                }) = emitter.emit(numbered_ray(4), payload(4))
            );
        }
        let_assert!(
            Err(CapacityExceeded {
                requested: 5,
                capacity: 4
            }) = queue.len()
        );
        // Refused ray didn't overwrite anything
        assert!(queue.rays().len() == 4);
        assert!(queue.rays()[3] == numbered_ray(3));

        assert!(queue.truncate_overflow() == 1);
        let_assert!(Ok(4) = queue.len());
    }

    #[test]
    fn reset_empties() {
        let mut queue = SecondaryRayQueue::with_capacity(2);
        let_assert!(Ok(_) = queue.emitter().emit(numbered_ray(0), payload(0)));
        assert!(!queue.is_empty());
        queue.reset();
        assert!(queue.is_empty());
        assert!(queue.rays().is_empty());
    }

    #[test]
    fn zero_capacity() {
        let mut queue = SecondaryRayQueue::with_capacity(0);
        let_assert!(Err(_) = queue.emitter().emit(numbered_ray(0), payload(0)));
        let_assert!(Err(CapacityExceeded { requested: 1, .. }) = queue.len());
    }

    /// Concurrent emission from many threads fills `0..count` with every ray exactly once.
    #[proptest(ProptestConfig { cases: 32, ..ProptestConfig::default() })]
    fn concurrent_emission_is_compact(
        #[strategy(1usize..16)] thread_count: usize,
        #[strategy(0usize..200)] per_thread: usize,
        #[strategy(0usize..3000)] capacity: usize,
    ) {
        let mut queue = SecondaryRayQueue::with_capacity(capacity);
        let total = thread_count * per_thread;

        {
            let emitter = queue.emitter();
            std::thread::scope(|scope| {
                for t in 0..thread_count {
                    scope.spawn(move || {
                        for i in 0..per_thread {
                            let n = t * per_thread + i;
                            let _ = emitter.emit(numbered_ray(n), payload(n));
                        }
                    });
                }
            });
        }

        if total > capacity {
            let_assert!(Err(CapacityExceeded { requested, .. }) = queue.len());
            assert!(requested == total);
        } else {
            let_assert!(Ok(count) = queue.len());
            assert!(count == total);
        }

        let mut seen = vec![false; total];
        for (ray, payload) in queue.rays().iter().zip(queue.payloads()) {
            let n = payload.pixel as usize;
            assert!(!seen[n], "ray {n} written twice");
            seen[n] = true;
            assert!(*ray == numbered_ray(n));
        }
        assert!(seen.iter().filter(|s| **s).count() == total.min(capacity));
    }
}
