//! Work expansion: turns "mesh instance X needs N meshlet threads" into
//! evenly sized indirect dispatches.
//!
//! Producers append one declaration per surviving mesh from any number of
//! invocations at once. Consumers are dispatched indirectly, sized by the
//! arguments the producers grew, and map their thread id back to a
//! `(mesh_instance_index, meshlet_index)` pair with [`WorkExpansion::resolve`].

use bytemuck::{Pod, Zeroable};
use glam::UVec3;
use vizcull::{
    device::Device,
    format_sso,
    util::{
        atomic::{AtomicArray, AtomicCounter, AtomicU64Cell, IndirectDispatchArgs},
        math::{highest_bit, round_up_div},
    },
};
use vizcull_types::DispatchIndirectStruct;

/// Number of power of two buckets; bucket `k` holds runs of `2^k` meshlets.
pub const PO2_EXPANSION_BUCKETS: u32 = 32;
/// Workgroup size of every expansion consumer.
pub const EXPANSION_CONSUMER_WORKGROUP_SIZE: u32 = 128;
const EXPANSION_CONSUMER_WORKGROUP_SIZE_LOG2: u32 = EXPANSION_CONSUMER_WORKGROUP_SIZE.trailing_zeros();

/// A run of `2^k` consecutive meshlets of one mesh instance.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Po2WorkItem {
    pub mesh_instance_index: u32,
    pub meshlet_offset: u32,
}

/// All meshlets of one mesh instance.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PrefixSumWorkItem {
    pub mesh_instance_index: u32,
    pub meshlet_count: u32,
}

struct Po2Bucket {
    counter: AtomicCounter,
    dispatch: IndirectDispatchArgs,
    items: AtomicArray<Po2WorkItem>,
}

/// Workgroups the consumer of bucket `bucket` gains when `slot` is filled.
fn bucket_workgroup_increment(bucket: u32, slot: u32) -> u32 {
    if bucket < EXPANSION_CONSUMER_WORKGROUP_SIZE_LOG2 {
        let items_per_workgroup = EXPANSION_CONSUMER_WORKGROUP_SIZE >> bucket;
        (slot % items_per_workgroup == 0) as u32
    } else {
        1 << (bucket - EXPANSION_CONSUMER_WORKGROUP_SIZE_LOG2)
    }
}

/// Splits a meshlet count into power of two runs, largest first, so the run
/// offsets come out ascending. Yields `(bucket, meshlet_offset)`.
pub fn po2_decompose(meshlet_count: u32) -> impl Iterator<Item = (u32, u32)> {
    let mut remaining = meshlet_count;
    let mut offset = 0;
    std::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let bucket = highest_bit(remaining);
        let run = 1_u32 << bucket;
        remaining &= !run;
        let start = offset;
        offset += run;
        Some((bucket, start))
    })
}

/// Power of two packed expansion.
///
/// Every bucket is sized for one item per mesh instance, as a mesh instance
/// places at most one item in each bucket.
pub struct Po2PackedWorkExpansion {
    buckets: Box<[Po2Bucket]>,
}

impl Po2PackedWorkExpansion {
    pub fn new(max_mesh_instances: u32) -> Self {
        Self {
            buckets: (0..PO2_EXPANSION_BUCKETS)
                .map(|_| Po2Bucket {
                    counter: AtomicCounter::new(max_mesh_instances),
                    dispatch: IndirectDispatchArgs::new(DispatchIndirectStruct::CLEAR),
                    items: AtomicArray::new(max_mesh_instances),
                })
                .collect(),
        }
    }

    pub fn clear(&self, dispatch_clear: DispatchIndirectStruct) {
        for bucket in self.buckets.iter() {
            bucket.counter.reset();
            bucket.dispatch.reset(dispatch_clear);
        }
    }

    pub fn append(&self, mesh_instance_index: u32, meshlet_count: u32) {
        for (k, meshlet_offset) in po2_decompose(meshlet_count) {
            let bucket = &self.buckets[k as usize];
            let Some(slot) = bucket.counter.saturating_increment() else {
                continue;
            };
            bucket.items.store(
                slot,
                Po2WorkItem {
                    mesh_instance_index,
                    meshlet_offset,
                },
            );
            bucket.dispatch.add_x(bucket_workgroup_increment(k, slot));
        }
    }

    /// Thread `thread` of the consumer of bucket `bucket`.
    pub fn resolve(&self, bucket: u32, thread: u64) -> Option<(u32, u32)> {
        let b = self.buckets.get(bucket as usize)?;
        let item_index = thread >> bucket;
        if item_index >= b.counter.load() as u64 {
            return None;
        }
        let item = b.items.load(item_index as u32);
        let in_run = (thread & ((1_u64 << bucket) - 1)) as u32;
        Some((item.mesh_instance_index, item.meshlet_offset + in_run))
    }

    pub fn bucket_len(&self, bucket: u32) -> u32 {
        self.buckets.get(bucket as usize).map_or(0, |b| b.counter.load())
    }

    pub fn bucket_items(&self, bucket: u32) -> Vec<Po2WorkItem> {
        self.buckets
            .get(bucket as usize)
            .map_or_else(Vec::new, |b| b.items.read_to_vec(b.counter.load()))
    }

    pub fn bucket_dispatch(&self, bucket: u32) -> DispatchIndirectStruct {
        self.buckets
            .get(bucket as usize)
            .map_or(DispatchIndirectStruct::default(), |b| b.dispatch.load())
    }

    pub fn total_meshlets(&self) -> u64 {
        (0..PO2_EXPANSION_BUCKETS).map(|k| (self.bucket_len(k) as u64) << k).sum()
    }
}

/// Prefix sum expansion: one flat item list where item `i` starts at the
/// sum of the meshlet counts of all earlier items.
pub struct PrefixSumWorkExpansion {
    // high word: item count, low word: thread count
    head: AtomicU64Cell,
    dispatch: IndirectDispatchArgs,
    items: AtomicArray<PrefixSumWorkItem>,
    offsets: AtomicArray<u32>,
    capacity: u32,
}

impl PrefixSumWorkExpansion {
    pub fn new(max_mesh_instances: u32) -> Self {
        Self {
            head: AtomicU64Cell::new(0),
            dispatch: IndirectDispatchArgs::new(DispatchIndirectStruct::CLEAR),
            items: AtomicArray::new(max_mesh_instances),
            offsets: AtomicArray::new(max_mesh_instances),
            capacity: max_mesh_instances,
        }
    }

    pub fn clear(&self, dispatch_clear: DispatchIndirectStruct) {
        self.head.store(0);
        self.dispatch.reset(dispatch_clear);
    }

    pub fn append(&self, mesh_instance_index: u32, meshlet_count: u32) {
        let previous = self.head.fetch_add((1 << 32) | meshlet_count as u64);
        let item = (previous >> 32) as u32;
        let offset = previous as u32;
        if item >= self.capacity {
            return;
        }
        self.items.store(
            item,
            PrefixSumWorkItem {
                mesh_instance_index,
                meshlet_count,
            },
        );
        self.offsets.store(item, offset);
        let end = offset as u64 + meshlet_count as u64;
        let workgroups = round_up_div(end, EXPANSION_CONSUMER_WORKGROUP_SIZE as u64);
        self.dispatch.max_x(workgroups.min(u32::MAX as u64) as u32);
    }

    pub fn len(&self) -> u32 {
        ((self.head.load() >> 32) as u32).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resolve(&self, thread: u64) -> Option<(u32, u32)> {
        let thread = u32::try_from(thread).ok()?;
        let len = self.len();
        if len == 0 {
            return None;
        }
        // last item whose offset is <= thread
        let (mut low, mut high) = (0_u32, len);
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if self.offsets.load(mid) <= thread {
                low = mid;
            } else {
                high = mid;
            }
        }
        let item = self.items.load(low);
        let meshlet_index = thread.checked_sub(self.offsets.load(low))?;
        (meshlet_index < item.meshlet_count).then_some((item.mesh_instance_index, meshlet_index))
    }

    pub fn items(&self) -> Vec<(PrefixSumWorkItem, u32)> {
        (0..self.len()).map(|i| (self.items.load(i), self.offsets.load(i))).collect()
    }

    pub fn dispatch_args(&self) -> DispatchIndirectStruct {
        self.dispatch.load()
    }

    pub fn total_meshlets(&self) -> u64 {
        self.items().iter().map(|(item, _)| item.meshlet_count as u64).sum()
    }
}

/// The expansion variant a view uses.
pub enum WorkExpansion {
    Po2Packed(Po2PackedWorkExpansion),
    PrefixSum(PrefixSumWorkExpansion),
}

impl WorkExpansion {
    pub fn new(prefix_sum: bool, max_mesh_instances: u32) -> Self {
        if prefix_sum {
            Self::PrefixSum(PrefixSumWorkExpansion::new(max_mesh_instances))
        } else {
            Self::Po2Packed(Po2PackedWorkExpansion::new(max_mesh_instances))
        }
    }

    pub fn clear(&self, dispatch_clear: DispatchIndirectStruct) {
        match self {
            Self::Po2Packed(e) => e.clear(dispatch_clear),
            Self::PrefixSum(e) => e.clear(dispatch_clear),
        }
    }

    /// Declares `meshlet_count` meshlets of a mesh instance. Safe to call from
    /// any number of invocations at once.
    pub fn append(&self, mesh_instance_index: u32, meshlet_count: u32) {
        if meshlet_count == 0 {
            return;
        }
        match self {
            Self::Po2Packed(e) => e.append(mesh_instance_index, meshlet_count),
            Self::PrefixSum(e) => e.append(mesh_instance_index, meshlet_count),
        }
    }

    /// Number of consumer dispatches: one per bucket, or one.
    pub fn dispatch_count(&self) -> u32 {
        match self {
            Self::Po2Packed(_) => PO2_EXPANSION_BUCKETS,
            Self::PrefixSum(_) => 1,
        }
    }

    /// Maps consumer thread `thread` of dispatch `dispatch` to
    /// `(mesh_instance_index, meshlet_index)`.
    pub fn resolve(&self, dispatch: u32, thread: u64) -> Option<(u32, u32)> {
        match self {
            Self::Po2Packed(e) => e.resolve(dispatch, thread),
            Self::PrefixSum(e) => e.resolve(thread),
        }
    }

    fn dispatch_args(&self, dispatch: u32) -> Option<&IndirectDispatchArgs> {
        match self {
            Self::Po2Packed(e) => e.buckets.get(dispatch as usize).map(|b| &b.dispatch),
            Self::PrefixSum(e) => (dispatch == 0).then_some(&e.dispatch),
        }
    }

    /// Runs `kernel` for every expanded meshlet, through indirect dispatches
    /// sized by the producers.
    pub fn consume<K>(&self, device: &Device, label: &str, kernel: K)
    where
        K: Fn(u32, u32) + Sync,
    {
        for dispatch in 0..self.dispatch_count() {
            let Some(args) = self.dispatch_args(dispatch) else {
                continue;
            };
            device.dispatch_indirect(
                &format_sso!("{label} {dispatch}"),
                args,
                UVec3::new(EXPANSION_CONSUMER_WORKGROUP_SIZE, 1, 1),
                |group| {
                    let base = group.flat_id() as u64 * EXPANSION_CONSUMER_WORKGROUP_SIZE as u64;
                    for invocation in group.invocations() {
                        if let Some((mesh_instance_index, meshlet_index)) =
                            self.resolve(dispatch, base + invocation.local_index as u64)
                        {
                            kernel(mesh_instance_index, meshlet_index);
                        }
                    }
                },
            );
        }
    }

    /// Meshlets currently declared, for diagnostics.
    pub fn total_meshlets(&self) -> u64 {
        match self {
            Self::Po2Packed(e) => e.total_meshlets(),
            Self::PrefixSum(e) => e.total_meshlets(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn decomposition_follows_binary_digits() {
        let runs: Vec<_> = po2_decompose(13).collect();
        assert_eq!(runs, vec![(3, 0), (2, 8), (0, 12)]);
        assert_eq!(po2_decompose(0).count(), 0);
        assert_eq!(po2_decompose(u32::MAX).count(), 32);
    }

    #[test]
    fn po2_m13() {
        let expansion = Po2PackedWorkExpansion::new(4);
        expansion.clear(DispatchIndirectStruct::CLEAR);
        expansion.append(7, 13);

        for (bucket, offset) in [(3, 0), (2, 8), (0, 12)] {
            assert_eq!(
                expansion.bucket_items(bucket),
                vec![Po2WorkItem {
                    mesh_instance_index: 7,
                    meshlet_offset: offset,
                }]
            );
            assert_eq!(expansion.bucket_dispatch(bucket), DispatchIndirectStruct::new(1, 1, 1));
        }
        assert_eq!(expansion.bucket_len(1), 0);
        assert_eq!(expansion.bucket_dispatch(1), DispatchIndirectStruct::CLEAR);
        assert_eq!(expansion.total_meshlets(), 13);

        assert_eq!(expansion.resolve(2, 3), Some((7, 11)));
        assert_eq!(expansion.resolve(2, 4), None);
        assert_eq!(expansion.resolve(0, 0), Some((7, 12)));
    }

    #[test]
    fn po2_dispatch_growth() {
        let expansion = Po2PackedWorkExpansion::new(1024);
        expansion.clear(DispatchIndirectStruct::CLEAR);
        // 129 items of one meshlet fill two workgroups
        for i in 0..129 {
            expansion.append(i, 1);
        }
        assert_eq!(expansion.bucket_dispatch(0).x, 2);
        // big runs span several workgroups each
        expansion.append(0, 1 << 9);
        assert_eq!(expansion.bucket_dispatch(9).x, 4);
    }

    #[test]
    fn po2_saturates() {
        let expansion = Po2PackedWorkExpansion::new(2);
        expansion.clear(DispatchIndirectStruct::CLEAR);
        for i in 0..5 {
            expansion.append(i, 3);
        }
        assert_eq!(expansion.bucket_len(0), 2);
        assert_eq!(expansion.bucket_len(1), 2);
        assert_eq!(expansion.total_meshlets(), 6);
    }

    #[test]
    fn prefix_sum_offsets() {
        let expansion = PrefixSumWorkExpansion::new(8);
        expansion.clear(DispatchIndirectStruct::CLEAR);
        expansion.append(0, 5);
        expansion.append(1, 200);
        expansion.append(2, 3);

        let items = expansion.items();
        assert_eq!(items.iter().map(|(_, offset)| *offset).collect::<Vec<_>>(), vec![0, 5, 205]);
        assert_eq!(expansion.dispatch_args().x, 2);
        assert_eq!(expansion.resolve(4), Some((0, 4)));
        assert_eq!(expansion.resolve(5), Some((1, 0)));
        assert_eq!(expansion.resolve(207), Some((2, 2)));
        assert_eq!(expansion.resolve(208), None);
    }

    #[test]
    fn every_variant_expands_exactly() {
        let device = Device::new(Some(4)).unwrap();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let counts: Vec<u32> = (0..300).map(|_| rng.gen_range(0..70)).collect();
        let expected: u64 = counts.iter().map(|&c| c as u64).sum();

        for prefix_sum in [false, true] {
            let expansion = WorkExpansion::new(prefix_sum, 512);
            expansion.clear(DispatchIndirectStruct::CLEAR);
            device.dispatch_threads("append", counts.len() as u32, 64, |i| {
                expansion.append(i, counts[i as usize]);
            });
            assert_eq!(expansion.total_meshlets(), expected);

            let seen: Vec<AtomicU32> = counts.iter().map(|_| AtomicU32::new(0)).collect();
            let threads = AtomicU32::new(0);
            expansion.consume(&device, "consume", |mesh_instance, meshlet| {
                assert!(meshlet < counts[mesh_instance as usize]);
                seen[mesh_instance as usize].fetch_add(1, Ordering::Relaxed);
                threads.fetch_add(1, Ordering::Relaxed);
            });
            assert_eq!(threads.load(Ordering::Relaxed) as u64, expected);
            for (count, seen) in counts.iter().zip(&seen) {
                assert_eq!(*count, seen.load(Ordering::Relaxed));
            }
        }
    }
}
