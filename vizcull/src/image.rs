//! Single channel images in device memory.
//!
//! Texels are atomics so kernels can read and write them from any workgroup.
//! Mip sizes follow the usual texture rules: every level halves, rounding
//! down, and never drops below one texel.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use glam::{IVec2, UVec2};
use wgt::{Extent3d, TextureDimension};
pub use wgt::TextureFormat;

fn extent(size: UVec2) -> Extent3d {
    Extent3d {
        width: size.x,
        height: size.y,
        depth_or_array_layers: 1,
    }
}

/// Size of mip `level` of an image of `size`.
pub fn mip_size(size: UVec2, level: u32) -> UVec2 {
    let mip = extent(size).mip_level_size(level, TextureDimension::D2);
    UVec2::new(mip.width, mip.height)
}

/// Length of a full mip chain for an image of `size`.
pub fn full_mip_count(size: UVec2) -> u32 {
    extent(size).max_mips(TextureDimension::D2)
}

struct MipLevel<A> {
    size: UVec2,
    texels: Box<[A]>,
}

impl<A> MipLevel<A> {
    fn index(&self, coord: UVec2) -> Option<usize> {
        (coord.x < self.size.x && coord.y < self.size.y).then(|| (coord.y * self.size.x + coord.x) as usize)
    }

    fn signed_index(&self, coord: IVec2) -> Option<usize> {
        if coord.x < 0 || coord.y < 0 {
            return None;
        }
        self.index(coord.as_uvec2())
    }
}

/// A floating point image with a mip chain, such as a depth buffer or a HiZ pyramid.
pub struct FloatImage {
    label: String,
    format: TextureFormat,
    mips: Vec<MipLevel<AtomicU32>>,
}

impl FloatImage {
    pub fn new(label: &str, format: TextureFormat, size: UVec2, mip_count: u32, clear: f32) -> Self {
        let mip_count = mip_count.clamp(1, full_mip_count(size));
        let mips = (0..mip_count)
            .map(|level| {
                let size = mip_size(size, level);
                MipLevel {
                    size,
                    texels: (0..size.x * size.y).map(|_| AtomicU32::new(clear.to_bits())).collect(),
                }
            })
            .collect();
        Self {
            label: label.to_owned(),
            format,
            mips,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn size(&self) -> UVec2 {
        self.mip_size(0)
    }

    pub fn mip_count(&self) -> u32 {
        self.mips.len() as u32
    }

    pub fn mip_size(&self, level: u32) -> UVec2 {
        self.mips.get(level as usize).map_or(UVec2::ZERO, |mip| mip.size)
    }

    /// Reads a texel; texels outside the level read as `fill`.
    pub fn load_or(&self, level: u32, coord: IVec2, fill: f32) -> f32 {
        self.mips
            .get(level as usize)
            .and_then(|mip| mip.signed_index(coord).map(|idx| &mip.texels[idx]))
            .map_or(fill, |texel| f32::from_bits(texel.load(Ordering::Relaxed)))
    }

    pub fn load(&self, level: u32, coord: UVec2) -> f32 {
        self.load_or(level, coord.as_ivec2(), 0.0)
    }

    /// The 2×2 footprint with its top left texel at `base`, in the order
    /// (0,0), (1,0), (0,1), (1,1). Out of range texels read as `fill`.
    pub fn gather4(&self, level: u32, base: IVec2, fill: f32) -> [f32; 4] {
        [
            self.load_or(level, base, fill),
            self.load_or(level, base + IVec2::new(1, 0), fill),
            self.load_or(level, base + IVec2::new(0, 1), fill),
            self.load_or(level, base + IVec2::new(1, 1), fill),
        ]
    }

    /// Writes a texel; out of range writes are dropped.
    pub fn store(&self, level: u32, coord: UVec2, value: f32) {
        if let Some(mip) = self.mips.get(level as usize) {
            if let Some(idx) = mip.index(coord) {
                mip.texels[idx].store(value.to_bits(), Ordering::Relaxed);
            }
        }
    }

    pub fn clear(&self, value: f32) {
        for mip in &self.mips {
            for texel in mip.texels.iter() {
                texel.store(value.to_bits(), Ordering::Relaxed);
            }
        }
    }

    /// Copies a mip level out, row major.
    pub fn read_mip(&self, level: u32) -> Vec<f32> {
        self.mips.get(level as usize).map_or_else(Vec::new, |mip| {
            mip.texels
                .iter()
                .map(|t| f32::from_bits(t.load(Ordering::Relaxed)))
                .collect()
        })
    }

    /// Overwrites mip 0 from row major data. Extra data is ignored.
    pub fn write_mip0(&self, data: &[f32]) {
        if let Some(mip) = self.mips.first() {
            for (texel, value) in mip.texels.iter().zip(data) {
                texel.store(value.to_bits(), Ordering::Relaxed);
            }
        }
    }
}

/// A single level unsigned integer image, such as the visibility buffer.
pub struct UintImage {
    label: String,
    mip: MipLevel<AtomicU32>,
}

impl UintImage {
    pub fn new(label: &str, size: UVec2, clear: u32) -> Self {
        Self {
            label: label.to_owned(),
            mip: MipLevel {
                size,
                texels: (0..size.x * size.y).map(|_| AtomicU32::new(clear)).collect(),
            },
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn format(&self) -> TextureFormat {
        TextureFormat::R32Uint
    }

    pub fn size(&self) -> UVec2 {
        self.mip.size
    }

    pub fn load(&self, coord: UVec2) -> Option<u32> {
        self.mip
            .index(coord)
            .map(|idx| self.mip.texels[idx].load(Ordering::Relaxed))
    }

    pub fn store(&self, coord: UVec2, value: u32) {
        if let Some(idx) = self.mip.index(coord) {
            self.mip.texels[idx].store(value, Ordering::Relaxed);
        }
    }

    pub fn clear(&self, value: u32) {
        for texel in self.mip.texels.iter() {
            texel.store(value, Ordering::Relaxed);
        }
    }

    pub fn read(&self) -> Vec<u32> {
        self.mip.texels.iter().map(|t| t.load(Ordering::Relaxed)).collect()
    }
}

/// A 64-bit image written with atomic max, holding depth in the high word
/// and a payload in the low word.
///
/// Storage images of this kind cannot be sampled, so their contents are
/// split into regular images before anything reads them.
pub struct AtomicVisbuffer {
    label: String,
    mip: MipLevel<AtomicU64>,
}

impl AtomicVisbuffer {
    pub fn new(label: &str, size: UVec2, clear: u64) -> Self {
        Self {
            label: label.to_owned(),
            mip: MipLevel {
                size,
                texels: (0..size.x * size.y).map(|_| AtomicU64::new(clear)).collect(),
            },
        }
    }

    pub fn pack(depth: f32, payload: u32) -> u64 {
        ((depth.to_bits() as u64) << 32) | payload as u64
    }

    pub fn unpack(value: u64) -> (f32, u32) {
        (f32::from_bits((value >> 32) as u32), value as u32)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> UVec2 {
        self.mip.size
    }

    /// Keeps the larger of the stored and given values. Non negative depths
    /// compare like their bit patterns, so this is a GREATER depth test.
    pub fn fetch_max(&self, coord: UVec2, depth: f32, payload: u32) {
        if let Some(idx) = self.mip.index(coord) {
            self.mip.texels[idx].fetch_max(Self::pack(depth, payload), Ordering::Relaxed);
        }
    }

    pub fn load(&self, coord: UVec2) -> Option<(f32, u32)> {
        self.mip
            .index(coord)
            .map(|idx| Self::unpack(self.mip.texels[idx].load(Ordering::Relaxed)))
    }

    pub fn clear(&self, value: u64) {
        for texel in self.mip.texels.iter() {
            texel.store(value, Ordering::Relaxed);
        }
    }
}
