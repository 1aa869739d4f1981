use std::collections::HashMap;

use super::GpuContext;
use crate::gate::MAX_WIRE_COUNT;

/// Cell layout of a pooled texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// One complex amplitude per cell, packed `(real, imag)`.
    ComplexF32,
    /// One flag word per cell.
    U32,
}

impl TextureFormat {
    pub fn cell_bytes(self) -> u64 {
        match self {
            TextureFormat::ComplexF32 => 8,
            TextureFormat::U32 => 4,
        }
    }
}

/// Shape key for the pool. Identical requests are served from the same
/// free list, so a recycled texture always matches exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureShape {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureShape {
    /// The near-square grid holding one cell per basis state of
    /// `wire_count` wires.
    ///
    /// # Panics
    /// If `wire_count` exceeds [`MAX_WIRE_COUNT`].
    pub fn for_wire_count(wire_count: u32, format: TextureFormat) -> TextureShape {
        assert!(
            wire_count <= MAX_WIRE_COUNT,
            "wire count {wire_count} exceeds the supported maximum {MAX_WIRE_COUNT}"
        );
        TextureShape {
            width: 1 << wire_count.div_ceil(2),
            height: 1 << (wire_count / 2),
            format,
        }
    }

    pub fn cell_count(self) -> u32 {
        self.width * self.height
    }

    pub fn byte_len(self) -> u64 {
        self.cell_count() as u64 * self.format.cell_bytes()
    }
}

/// A pooled GPU buffer with a 2-D shape identity.
#[derive(Debug)]
pub struct Texture {
    buffer: wgpu::Buffer,
    shape: TextureShape,
    id: u64,
}

impl Texture {
    pub fn shape(&self) -> TextureShape {
        self.shape
    }

    /// Pool-unique identity. Lets callers assert that an operation never
    /// reads and writes the same memory.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// Recycles GPU buffers by exact shape, bounding allocation to a handful
/// of buffers per shape for the process lifetime. Not thread-safe; all
/// evaluation happens on one thread.
#[derive(Default)]
pub struct TexturePool {
    free: HashMap<TextureShape, Vec<Texture>>,
    live: HashMap<TextureShape, usize>,
    next_id: u64,
}

impl TexturePool {
    pub fn new() -> TexturePool {
        TexturePool::default()
    }

    /// Hand out a texture of exactly `shape`, recycling when possible.
    pub fn take(&mut self, gpu: &GpuContext, shape: TextureShape) -> Texture {
        assert!(shape.cell_count() > 0, "textures must hold at least one cell");
        *self.live.entry(shape).or_insert(0) += 1;
        if let Some(texture) = self.free.get_mut(&shape).and_then(Vec::pop) {
            return texture;
        }
        let buffer = gpu.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("pooled texture"),
            size: shape.byte_len(),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = self.next_id;
        self.next_id += 1;
        Texture { buffer, shape, id }
    }

    /// Return `texture` for reuse.
    ///
    /// # Panics
    /// If more textures of its shape are deposited than are live, or the
    /// texture came from another pool.
    pub fn deposit(&mut self, texture: Texture) {
        let live = self
            .live
            .get_mut(&texture.shape)
            .expect("deposit of a texture this pool never issued");
        assert!(*live > 0, "texture deposited twice");
        *live -= 1;
        self.free.entry(texture.shape).or_default().push(texture);
    }

    /// Take a texture, run `f`, and deposit the texture again on every
    /// non-panicking exit path, including early `Err` returns inside `f`.
    pub fn scoped<R>(
        &mut self,
        gpu: &GpuContext,
        shape: TextureShape,
        f: impl FnOnce(&mut TexturePool, &Texture) -> R,
    ) -> R {
        let texture = self.take(gpu, shape);
        let out = f(self, &texture);
        self.deposit(texture);
        out
    }

    /// Textures currently taken and not yet deposited.
    pub fn live_count(&self) -> usize {
        self.live.values().sum()
    }

    /// Textures sitting in the free lists.
    pub fn pooled_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}
