use crate::device::{BackendError, PixelRect};

/// Copies `rect` of one texture level to the CPU as tightly packed RGBA8.
///
/// Blocks until the copy is mapped. The caller submits all pending work
/// beforehand so the read observes it.
pub(super) fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    mip_level: u32,
    rect: PixelRect,
) -> Result<Vec<u8>, BackendError> {
    let (x, y) = (rect.x.max(0) as u32, rect.y.max(0) as u32);
    let (width, height) = (rect.width, rect.height);
    if width == 0 || height == 0 {
        return Ok(Vec::new());
    }

    let unpadded_bpr = width * 4;
    let padded_bpr = unpadded_bpr.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tessera readback"),
        size: padded_bpr as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("tessera readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level,
            origin: wgpu::Origin3d { x, y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = readback.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        drop(sender.send(res));
    });
    loop {
        drop(device.poll(wgpu::PollType::Poll));
        match receiver.try_recv() {
            Ok(Ok(())) => break,
            Ok(Err(e)) => return Err(BackendError::Unsupported(format!("readback mapping failed: {e}"))),
            Err(std::sync::mpsc::TryRecvError::Empty) => std::thread::yield_now(),
            Err(std::sync::mpsc::TryRecvError::Disconnected) => return Err(BackendError::ContextLost),
        }
    }

    let mut out = Vec::with_capacity((unpadded_bpr * height) as usize);
    {
        let mapped = slice.get_mapped_range();
        for row in mapped.chunks_exact(padded_bpr as usize) {
            out.extend_from_slice(&row[..unpadded_bpr as usize]);
        }
    }
    readback.unmap();
    Ok(out)
}
