//! Compute device that runs kernels one workgroup at a time on a thread pool.
//!
//! A dispatch runs every workgroup of its grid in parallel and returns once
//! all of them finished, so everything a dispatch wrote is visible to the
//! next one. Within a workgroup, invocations run in order on one thread,
//! which gives kernels the same guarantees as workgroup shared memory
//! behind a barrier.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::UVec3;
use rayon::prelude::*;
use vizcull_types::DispatchIndirectStruct;

use crate::{util::atomic::IndirectDispatchArgs, DeviceCreationError};

/// Identity of one workgroup of a dispatch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Workgroup {
    pub id: UVec3,
    pub size: UVec3,
    pub count: UVec3,
}

impl Workgroup {
    /// Linear index of the workgroup within the dispatch.
    pub fn flat_id(&self) -> u32 {
        self.id.x + self.count.x * (self.id.y + self.count.y * self.id.z)
    }

    pub fn total_workgroups(&self) -> u32 {
        self.count.x * self.count.y * self.count.z
    }

    pub fn invocation_count(&self) -> u32 {
        self.size.x * self.size.y * self.size.z
    }

    /// Every invocation of the workgroup, x fastest.
    pub fn invocations(&self) -> impl Iterator<Item = Invocation> + '_ {
        (0..self.invocation_count()).map(move |local_index| {
            let local_id = UVec3::new(
                local_index % self.size.x,
                (local_index / self.size.x) % self.size.y,
                local_index / (self.size.x * self.size.y),
            );
            Invocation {
                local_index,
                local_id,
                global_id: self.id * self.size + local_id,
            }
        })
    }
}

/// Identity of one invocation within a workgroup.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub local_index: u32,
    pub local_id: UVec3,
    pub global_id: UVec3,
}

/// Counters of the work the device did since the last reset.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DeviceStatistics {
    pub dispatches: u64,
    pub workgroups: u64,
}

/// The compute device.
pub struct Device {
    pool: rayon::ThreadPool,
    dispatches: AtomicU64,
    workgroups: AtomicU64,
}

impl Device {
    /// Creates a device with `threads` workers, or one per available core.
    pub fn new(threads: Option<usize>) -> Result<Self, DeviceCreationError> {
        let threads = threads.unwrap_or_else(|| std::thread::available_parallelism().map(usize::from).unwrap_or(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("vizcull-device-{i}"))
            .num_threads(threads)
            .build()
            .map_err(DeviceCreationError::ThreadPool)?;

        log::debug!("Created compute device with {threads} workers");

        Ok(Self {
            pool,
            dispatches: AtomicU64::new(0),
            workgroups: AtomicU64::new(0),
        })
    }

    /// Runs `kernel` once per workgroup of a `workgroups` sized grid.
    pub fn dispatch<K>(&self, label: &str, workgroups: UVec3, workgroup_size: UVec3, kernel: K)
    where
        K: Fn(&Workgroup) + Sync,
    {
        profiling::scope!("dispatch", label);

        let total = workgroups.x as u64 * workgroups.y as u64 * workgroups.z as u64;
        log::trace!("dispatch {label}: {workgroups} workgroups of {workgroup_size}");

        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.workgroups.fetch_add(total, Ordering::Relaxed);
        if total == 0 {
            return;
        }

        self.pool.install(|| {
            (0..total).into_par_iter().for_each(|flat| {
                let x = (flat % workgroups.x as u64) as u32;
                let y = ((flat / workgroups.x as u64) % workgroups.y as u64) as u32;
                let z = (flat / (workgroups.x as u64 * workgroups.y as u64)) as u32;
                kernel(&Workgroup {
                    id: UVec3::new(x, y, z),
                    size: workgroup_size,
                    count: workgroups,
                });
            })
        });
    }

    /// Like [`Device::dispatch`], with the grid size read from device memory.
    pub fn dispatch_indirect<K>(&self, label: &str, args: &IndirectDispatchArgs, workgroup_size: UVec3, kernel: K)
    where
        K: Fn(&Workgroup) + Sync,
    {
        let DispatchIndirectStruct { x, y, z } = args.load();
        self.dispatch(label, UVec3::new(x, y, z), workgroup_size, kernel)
    }

    /// Runs `kernel` once per invocation of a one dimensional grid covering
    /// `threads` invocations. The tail of the last workgroup is skipped.
    pub fn dispatch_threads<K>(&self, label: &str, threads: u32, workgroup_size: u32, kernel: K)
    where
        K: Fn(u32) + Sync,
    {
        let workgroups = crate::util::math::round_up_div(threads as u64, workgroup_size as u64) as u32;
        self.dispatch(
            label,
            UVec3::new(workgroups, 1, 1),
            UVec3::new(workgroup_size, 1, 1),
            |group| {
                for invocation in group.invocations() {
                    let thread = invocation.global_id.x;
                    if thread < threads {
                        kernel(thread);
                    }
                }
            },
        );
    }

    pub fn statistics(&self) -> DeviceStatistics {
        DeviceStatistics {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            workgroups: self.workgroups.load(Ordering::Relaxed),
        }
    }

    pub fn reset_statistics(&self) {
        self.dispatches.store(0, Ordering::Relaxed);
        self.workgroups.store(0, Ordering::Relaxed);
    }
}
