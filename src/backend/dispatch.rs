use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use core_affinity::CoreId;

use super::{BackendError, Dispatch, WORKGROUP_SIZE};

/// Runs kernels on a fixed number of scoped CPU threads.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    worker_count: usize,
    cores: Option<Vec<CoreId>>,
}

impl WorkerPool {
    /// Pool with `worker_count` threads per launch (at least one), optionally pinned to `cores`.
    pub fn new(worker_count: usize, cores: Option<Vec<CoreId>>) -> WorkerPool {
        WorkerPool {
            worker_count: worker_count.max(1),
            cores,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Runs `work` on `thread_count` workers and waits for all of them.
    fn run(
        &self,
        kernel: &'static str,
        thread_count: usize,
        work: &(dyn Fn() + Sync),
    ) -> Result<(), BackendError> {
        thread::scope(|scope| -> Result<(), BackendError> {
            let handles = (0..thread_count)
                .map(|worker_id| {
                    let core = self
                        .cores
                        .as_deref()
                        .filter(|cores| !cores.is_empty())
                        .map(|cores| cores[worker_id % cores.len()]);

                    thread::Builder::new()
                        .name(format!("{kernel}-{worker_id}"))
                        .spawn_scoped(scope, move || {
                            if let Some(core) = core {
                                core_affinity::set_for_current(core);
                            }
                            work();
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let mut panicked = false;
            for handle in handles {
                panicked |= handle.join().is_err();
            }

            if panicked {
                Err(BackendError::KernelPanicked { kernel })
            } else {
                Ok(())
            }
        })
    }
}

impl Dispatch for WorkerPool {
    fn launch(
        &self,
        kernel: &'static str,
        global_size: usize,
        body: &(dyn Fn(usize) + Sync),
    ) -> Result<(), BackendError> {
        let group_count = global_size.div_ceil(WORKGROUP_SIZE);
        if group_count == 0 {
            return Ok(());
        }

        let next_group = AtomicUsize::new(0);
        self.run(kernel, self.worker_count.min(group_count), &|| {
            loop {
                let group = next_group.fetch_add(1, Ordering::Relaxed);
                if group >= group_count {
                    break;
                }

                let first = group * WORKGROUP_SIZE;
                let last = (first + WORKGROUP_SIZE).min(global_size);
                (first..last).for_each(body);
            }
        })
    }

    fn launch_for_each<T: Send>(
        &self,
        kernel: &'static str,
        items: &mut [T],
        body: &(dyn Fn(usize, &mut T) + Sync),
    ) -> Result<(), BackendError> {
        let group_count = items.len().div_ceil(WORKGROUP_SIZE);
        if group_count == 0 {
            return Ok(());
        }

        let chunks = Mutex::new(items.chunks_mut(WORKGROUP_SIZE).enumerate());
        self.run(kernel, self.worker_count.min(group_count), &|| {
            loop {
                // A panicking worker can't leave the iterator in a broken state
                let next = chunks.lock().unwrap_or_else(PoisonError::into_inner).next();
                let Some((group, chunk)) = next else {
                    break;
                };

                for (i, item) in chunk.iter_mut().enumerate() {
                    body(group * WORKGROUP_SIZE + i, item);
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicU64;

    use super::*;
    use assert2::{assert, let_assert};
    use proptest::prelude::*;
    use test_strategy::proptest;

    #[proptest]
    fn launch_visits_every_id_once(
        #[strategy(1usize..9)] worker_count: usize,
        #[strategy(0usize..1000)] global_size: usize,
    ) {
        let pool = WorkerPool::new(worker_count, None);
        let visits: Vec<AtomicUsize> = (0..global_size).map(|_| AtomicUsize::new(0)).collect();

        let_assert!(
            Ok(()) = pool.launch("Visit", global_size, &|i| {
                visits[i].fetch_add(1, Ordering::Relaxed);
            })
        );

        assert!(visits.iter().all(|v| v.load(Ordering::Relaxed) == 1));
    }

    #[proptest]
    fn launch_for_each_passes_matching_index(
        #[strategy(1usize..9)] worker_count: usize,
        #[strategy(proptest::collection::vec(any::<u32>(), 0..500))] items: Vec<u32>,
    ) {
        let mut items = items;
        let pool = WorkerPool::new(worker_count, None);
        let original = items.clone();
        let sum = AtomicU64::new(0);

        let_assert!(
            Ok(()) = pool.launch_for_each("Index", &mut items, &|i, item| {
                sum.fetch_add(*item as u64, Ordering::Relaxed);
                *item = i as u32;
            })
        );

        assert!(items.iter().enumerate().all(|(i, item)| *item == i as u32));
        assert!(sum.load(Ordering::Relaxed) == original.iter().map(|x| *x as u64).sum::<u64>());
    }

    #[test]
    fn panic_is_reported() {
        let pool = WorkerPool::new(2, None);
        let result = pool.launch("Explode", 200, &|i| {
            if i == 150 {
                panic!("Don't panic!");
            }
        });
        let_assert!(Err(BackendError::KernelPanicked { kernel: "Explode" }) = result);
    }

    #[test]
    fn worker_count_is_at_least_one() {
        assert!(WorkerPool::new(0, None).worker_count() == 1);
    }
}
