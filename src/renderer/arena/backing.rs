use std::borrow::Cow;

use super::range::Growth;

/// Storage that sits behind an arena range allocator.
pub trait ArenaBacking {
    /// Enlarge to `growth.new_capacity`, keeping the first `preserve` bytes.
    fn grow(&mut self, growth: Growth, preserve: u64);

    fn write(&mut self, offset: u64, bytes: &[u8]);

    fn capacity(&self) -> u64;

    fn gpu_buffer(&self) -> Option<&wgpu::Buffer> {
        None
    }

    /// CPU-visible contents, available for host-memory backings only.
    fn host_bytes(&self) -> Option<&[u8]> {
        None
    }
}

pub trait BackingFactory {
    fn create(
        &self,
        label: &str,
        usage: wgpu::BufferUsages,
        capacity: u64,
    ) -> Box<dyn ArenaBacking>;
}

/// Plain `Vec<u8>` backing used headless.
pub struct HostBacking {
    bytes: Vec<u8>,
}

impl HostBacking {
    pub fn new(capacity: u64) -> Self {
        Self {
            bytes: vec![0; capacity as usize],
        }
    }
}

impl ArenaBacking for HostBacking {
    fn grow(&mut self, growth: Growth, preserve: u64) {
        debug_assert!(preserve <= growth.old_capacity);
        // bytes above the watermark are unspecified after growth on the GPU path
        let preserve = preserve.min(self.bytes.len() as u64) as usize;
        self.bytes[preserve..].fill(0);
        self.bytes.resize(growth.new_capacity as usize, 0);
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn capacity(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn host_bytes(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HostBackingFactory;

impl BackingFactory for HostBackingFactory {
    fn create(
        &self,
        _label: &str,
        _usage: wgpu::BufferUsages,
        capacity: u64,
    ) -> Box<dyn ArenaBacking> {
        Box::new(HostBacking::new(capacity))
    }
}

/// `wgpu::Buffer` backing. Growth allocates a larger buffer and copies the
/// preserved prefix on the GPU so existing segment offsets stay valid.
pub struct GpuBacking {
    device: wgpu::Device,
    queue: wgpu::Queue,
    label: String,
    usage: wgpu::BufferUsages,
    buffer: wgpu::Buffer,
    capacity: u64,
}

impl GpuBacking {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        usage: wgpu::BufferUsages,
        capacity: u64,
    ) -> Self {
        let usage = usage | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity,
            usage,
            mapped_at_creation: false,
        });

        Self {
            device: device.clone(),
            queue: queue.clone(),
            label: label.to_owned(),
            usage,
            buffer,
            capacity,
        }
    }
}

impl ArenaBacking for GpuBacking {
    fn grow(&mut self, growth: Growth, preserve: u64) {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&self.label),
            size: growth.new_capacity,
            usage: self.usage,
            mapped_at_creation: false,
        });

        let preserve = preserve.min(self.capacity);
        if preserve > 0 {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("ArenaGrowEncoder"),
                });
            encoder.copy_buffer_to_buffer(&self.buffer, 0, &buffer, 0, preserve);
            self.queue.submit(Some(encoder.finish()));
        }

        self.buffer = buffer;
        self.capacity = growth.new_capacity;
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let data = pad_to_copy_alignment(bytes);
        self.queue.write_buffer(&self.buffer, offset, &data);
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn gpu_buffer(&self) -> Option<&wgpu::Buffer> {
        Some(&self.buffer)
    }
}

pub struct GpuBackingFactory {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuBackingFactory {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self {
            device: device.clone(),
            queue: queue.clone(),
        }
    }
}

impl BackingFactory for GpuBackingFactory {
    fn create(
        &self,
        label: &str,
        usage: wgpu::BufferUsages,
        capacity: u64,
    ) -> Box<dyn ArenaBacking> {
        Box::new(GpuBacking::new(
            &self.device,
            &self.queue,
            label,
            usage,
            capacity,
        ))
    }
}

fn pad_to_copy_alignment(bytes: &[u8]) -> Cow<'_, [u8]> {
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    if bytes.len() % align == 0 {
        Cow::Borrowed(bytes)
    } else {
        let mut padded = bytes.to_vec();
        padded.resize(bytes.len().div_ceil(align) * align, 0);
        Cow::Owned(padded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_growth_keeps_preserved_prefix() {
        let mut backing = HostBacking::new(8);
        backing.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        backing.grow(
            Growth {
                old_capacity: 8,
                new_capacity: 16,
            },
            4,
        );
        let bytes = backing.host_bytes().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        assert!(bytes[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn unaligned_writes_are_padded() {
        let padded = pad_to_copy_alignment(&[1, 2, 3, 4, 5]);
        assert_eq!(padded.len(), 8);
        assert_eq!(&padded[..5], &[1, 2, 3, 4, 5]);

        let aligned = pad_to_copy_alignment(&[1, 2, 3, 4]);
        assert!(matches!(aligned, Cow::Borrowed(_)));
    }
}
