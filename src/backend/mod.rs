//! Compute backends: where kernels run and how rays are intersected with the scene.
//!
//! The renderer only talks to the [`Dispatch`] and [`Intersector`] traits. The crate
//! ships a CPU implementation of both: [`WorkerPool`] and [`TriangleBvh`].

mod bvh;
mod dispatch;

use std::num::NonZeroUsize;

use thiserror::Error;

use crate::{
    geometry::{BarycentricCoordinates, FloatType, Ray},
    scene::ShapeIdx,
};

pub use bvh::TriangleBvh;
pub use dispatch::WorkerPool;

/// Number of consecutive work items handed to a worker at once.
pub const WORKGROUP_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("No device {device} on platform {platform}")]
    Unavailable { platform: usize, device: usize },

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Kernel {kernel} panicked")]
    KernelPanicked { kernel: &'static str },

    #[error("Failed to start worker: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub kind: DeviceKind,
    pub compute_units: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub devices: Vec<DeviceInfo>,
}

/// Lists the available platforms and their devices.
/// Indices into the result are what [`BackendConfig`] refers to.
pub fn enumerate_devices() -> Vec<PlatformInfo> {
    vec![PlatformInfo {
        name: "Host".to_owned(),
        devices: vec![DeviceInfo {
            name: format!("{} CPU", std::env::consts::ARCH),
            kind: DeviceKind::Cpu,
            compute_units: num_cpus::get(),
        }],
    }]
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WorkerCount {
    /// One worker per compute unit of the device
    #[default]
    Auto,
    Manual(NonZeroUsize),
}

#[derive(Clone, Debug, Default, bon::Builder)]
pub struct BackendConfig {
    #[builder(default)]
    pub platform: usize,
    #[builder(default)]
    pub device: usize,
    #[builder(default)]
    pub worker_count: WorkerCount,
    /// Pin each worker thread to its own core
    #[builder(default)]
    pub pin_workers: bool,
}

/// Opens the configured device.
pub fn init(config: &BackendConfig) -> Result<WorkerPool, BackendError> {
    let unavailable = || BackendError::Unavailable {
        platform: config.platform,
        device: config.device,
    };

    let platforms = enumerate_devices();
    let platform = platforms.get(config.platform).ok_or_else(unavailable)?;
    let device = platform.devices.get(config.device).ok_or_else(unavailable)?;

    let worker_count = match config.worker_count {
        WorkerCount::Auto => device.compute_units,
        WorkerCount::Manual(n) => n.get(),
    };
    if worker_count == 0 {
        return Err(unavailable());
    }

    let cores = if config.pin_workers {
        let cores = core_affinity::get_core_ids();
        if cores.is_none() {
            log::warn!("Can't get the list of CPU cores, workers will not be pinned");
        }
        cores
    } else {
        None
    };

    log::info!(
        "Using {} on {} with {worker_count} workers",
        device.name,
        platform.name
    );

    Ok(WorkerPool::new(worker_count, cores))
}

/// Data parallel kernel launches.
///
/// Both launches return only after every invocation finished, so everything written by
/// the kernel is visible to the caller.
pub trait Dispatch: Sync {
    /// Calls `body` once for each id in `0..global_size`.
    fn launch(
        &self,
        kernel: &'static str,
        global_size: usize,
        body: &(dyn Fn(usize) + Sync),
    ) -> Result<(), BackendError>;

    /// Calls `body` once for each item, with its index.
    fn launch_for_each<T: Send>(
        &self,
        kernel: &'static str,
        items: &mut [T],
        body: &(dyn Fn(usize, &mut T) + Sync),
    ) -> Result<(), BackendError>;
}

/// Closest intersection of a ray with the scene.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Hit {
    pub shape: ShapeIdx,
    /// Triangle index within the shape
    pub primitive: u32,
    pub t: FloatType,
    pub uv: BarycentricCoordinates,
}

/// Batched ray queries. Result `i` always belongs to ray `i`.
pub trait Intersector: Sync {
    fn query_intersection(&self, rays: &[Ray], hits: &mut [Option<Hit>])
    -> Result<(), BackendError>;

    /// Writes true for rays that hit anything inside their interval.
    fn query_occlusion(&self, rays: &[Ray], occluded: &mut [bool]) -> Result<(), BackendError>;
}

pub(crate) fn check_query_lengths(rays: usize, results: usize) -> Result<(), BackendError> {
    if rays == results {
        Ok(())
    } else {
        Err(BackendError::Query(format!(
            "{rays} rays submitted with space for {results} results"
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::{assert, let_assert};

    #[test]
    fn host_device_is_listed() {
        let platforms = enumerate_devices();
        assert!(platforms.len() == 1);
        assert!(platforms[0].devices[0].kind == DeviceKind::Cpu);
        assert!(platforms[0].devices[0].compute_units > 0);
    }

    #[test]
    fn init_default() {
        let_assert!(Ok(pool) = init(&BackendConfig::default()));
        assert!(pool.worker_count() == num_cpus::get());
    }

    #[test]
    fn init_manual_worker_count() {
        let config = BackendConfig::builder()
            .worker_count(WorkerCount::Manual(NonZeroUsize::new(3).unwrap()))
            .build();
        let_assert!(Ok(pool) = init(&config));
        assert!(pool.worker_count() == 3);
    }

    #[test]
    fn missing_device() {
        let config = BackendConfig::builder().platform(0).device(5).build();
        let_assert!(Err(BackendError::Unavailable { platform: 0, device: 5 }) = init(&config));

        let config = BackendConfig::builder().platform(1).build();
        let_assert!(Err(BackendError::Unavailable { .. }) = init(&config));
    }

    #[test]
    fn length_mismatch_is_query_error() {
        let_assert!(Err(BackendError::Query(_)) = check_query_lengths(3, 2));
        assert!(check_query_lengths(2, 2).is_ok());
    }
}
