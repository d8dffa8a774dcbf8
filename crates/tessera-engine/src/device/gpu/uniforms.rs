//! std140 packing of reflected uniforms and the per-submission uniform arena.

use crate::shader::{UniformInfo, UniformType, UniformValue};

/// Smallest arena allocation; grown to the next power of two on demand.
const MIN_ARENA_BYTES: u64 = 64 * 1024;

/// `(columns, rows)` of one element as laid out in std140.
fn shape(ty: UniformType) -> (usize, usize) {
    match ty {
        UniformType::Mat2 => (2, 2),
        UniformType::Mat3 => (3, 3),
        UniformType::Mat4 => (4, 4),
        other => (1, other.components() as usize),
    }
}

/// Raw 32-bit words of a value. Integer values keep their bit pattern.
fn words(value: &UniformValue) -> Vec<[u8; 4]> {
    use UniformValue as V;
    match value {
        V::Int(v) => vec![v.to_le_bytes()],
        V::IVec2(v) => v.iter().map(|x| x.to_le_bytes()).collect(),
        V::IVec3(v) => v.iter().map(|x| x.to_le_bytes()).collect(),
        V::IVec4(v) => v.iter().map(|x| x.to_le_bytes()).collect(),
        V::Ints(v) => v.iter().map(|x| x.to_le_bytes()).collect(),
        V::UInt(v) => vec![v.to_le_bytes()],
        V::Sampler(_) => Vec::new(),
        other => other.as_floats().iter().map(|f| f.to_le_bytes()).collect(),
    }
}

/// Writes `value` into a std140 block image at the place reflected in
/// `info`. Matrix columns start on 16-byte boundaries; array elements are
/// `info.stride` apart. Returns `false` when the value does not fit.
pub(super) fn write_std140(block: &mut [u8], info: &UniformInfo, value: &UniformValue) -> bool {
    let (columns, rows) = shape(info.ty);
    let per_element = columns * rows;
    let stride = match info.stride {
        0 => (columns * 16).max(16),
        s => s as usize,
    };

    for (k, word) in words(value).into_iter().enumerate() {
        let element = k / per_element;
        let within = k % per_element;
        let at = info.offset as usize + element * stride + (within / rows) * 16 + (within % rows) * 4;
        let Some(dst) = block.get_mut(at..at + 4) else { return false };
        dst.copy_from_slice(&word);
    }
    true
}

/// Uniform block snapshots of one submission, bound with dynamic offsets.
///
/// Every draw copies the current block images of its program here; the
/// whole arena is uploaded once right before the recorded passes are
/// encoded.
pub(super) struct UniformArena {
    staging: Vec<u8>,
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
    alignment: usize,
}

impl UniformArena {
    pub fn new(alignment: u32) -> Self {
        Self { staging: Vec::new(), buffer: None, capacity: 0, alignment: alignment.max(4) as usize }
    }

    /// Appends a block image and returns its dynamic offset.
    pub fn push(&mut self, data: &[u8]) -> u32 {
        let offset = self.staging.len().next_multiple_of(self.alignment);
        self.staging.resize(offset, 0);
        self.staging.extend_from_slice(data);
        let padded = self.staging.len().next_multiple_of(4);
        self.staging.resize(padded, 0);
        offset as u32
    }

    /// Uploads the staged blocks, growing the buffer when needed.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Option<wgpu::Buffer> {
        if self.staging.is_empty() {
            return self.buffer.clone();
        }
        let needed = self.staging.len() as u64;
        if self.buffer.is_none() || self.capacity < needed {
            self.capacity = needed.next_power_of_two().max(MIN_ARENA_BYTES);
            log::debug!("wgpu: uniform arena grown to {} bytes", self.capacity);
            self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("tessera uniform arena"),
                size: self.capacity,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        if let Some(buffer) = &self.buffer {
            queue.write_buffer(buffer, 0, &self.staging);
        }
        self.buffer.clone()
    }

    pub fn reset(&mut self) {
        self.staging.clear();
    }

    /// Forgets the native buffer (device replaced).
    pub fn invalidate(&mut self, alignment: u32) {
        *self = Self::new(alignment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(ty: UniformType, offset: u32, size: u32, stride: u32) -> UniformInfo {
        UniformInfo { name: "u".into(), location: 0, ty, size, offset, stride, group: 0, binding: 0 }
    }

    fn floats(block: &[u8]) -> Vec<f32> {
        block.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
    }

    #[test]
    fn mat3_columns_are_padded_to_vec4() {
        let mut block = vec![0u8; 48];
        let m = UniformValue::Mat3([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert!(write_std140(&mut block, &info(UniformType::Mat3, 0, 1, 0), &m));
        assert_eq!(
            floats(&block),
            [1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0, 7.0, 8.0, 9.0, 0.0]
        );
    }

    #[test]
    fn float_arrays_use_the_reflected_stride() {
        let mut block = vec![0u8; 48];
        let v = UniformValue::Floats(vec![1.0, 2.0, 3.0]);
        assert!(write_std140(&mut block, &info(UniformType::Float, 0, 3, 16), &v));
        assert_eq!(floats(&block)[0], 1.0);
        assert_eq!(floats(&block)[4], 2.0);
        assert_eq!(floats(&block)[8], 3.0);
    }

    #[test]
    fn ints_keep_their_bits() {
        let mut block = vec![0u8; 16];
        assert!(write_std140(&mut block, &info(UniformType::Int, 4, 1, 0), &UniformValue::Int(-3)));
        assert_eq!(i32::from_le_bytes([block[4], block[5], block[6], block[7]]), -3);
    }

    #[test]
    fn out_of_range_write_is_rejected() {
        let mut block = vec![0u8; 8];
        assert!(!write_std140(&mut block, &info(UniformType::Vec4, 0, 1, 0), &UniformValue::Vec4([1.0; 4])));
    }

    #[test]
    fn arena_offsets_respect_alignment() {
        let mut arena = UniformArena::new(256);
        assert_eq!(arena.push(&[0; 64]), 0);
        assert_eq!(arena.push(&[0; 16]), 256);
        assert_eq!(arena.push(&[0; 16]), 512);
        arena.reset();
        assert_eq!(arena.push(&[0; 16]), 0);
    }
}
