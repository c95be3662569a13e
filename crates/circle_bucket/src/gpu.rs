//! GPU buffer creation behind a narrow context trait, plus its `wgpu`
//! implementation.

use crate::error::GpuError;
use std::any::Any;
use std::fmt::Debug;
use wgpu::util::DeviceExt;

/// Stride and attributes of one vertex buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexLayout {
    pub array_stride: u64,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl VertexLayout {
    pub fn as_wgpu(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.array_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }
    }
}

/// A GPU-resident buffer owned by a bucket.
pub trait GpuBuffer: Debug + Send + Sync {
    /// Size in bytes.
    fn size(&self) -> u64;

    /// Releases the GPU memory. The handle must not be drawn afterwards.
    fn destroy(&self);

    fn as_any(&self) -> &dyn Any;
}

pub type BufferHandle = Box<dyn GpuBuffer>;

/// Buffer factory of the thread that owns the GPU device.
pub trait GpuContext {
    fn create_vertex_buffer(
        &self,
        label: &str,
        contents: &[u8],
        layout: &VertexLayout,
    ) -> Result<BufferHandle, GpuError>;

    fn create_index_buffer(&self, label: &str, contents: &[u8]) -> Result<BufferHandle, GpuError>;

    /// Rewrites the start of an existing buffer created by this context.
    fn update_buffer(&self, buffer: &dyn GpuBuffer, contents: &[u8]) -> Result<(), GpuError>;
}

/// A `wgpu` buffer together with the layout it was created for.
#[derive(Debug)]
pub struct WgpuBuffer {
    pub buffer: wgpu::Buffer,
    /// `None` for index buffers.
    pub layout: Option<VertexLayout>,
}

impl GpuBuffer for WgpuBuffer {
    fn size(&self) -> u64 {
        self.buffer.size()
    }

    fn destroy(&self) {
        self.buffer.destroy();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// [`GpuContext`] over a `wgpu` device and queue.
pub struct WgpuContext<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
}

impl<'a> WgpuContext<'a> {
    pub fn new(device: &'a wgpu::Device, queue: &'a wgpu::Queue) -> Self {
        Self { device, queue }
    }

    fn create(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
        layout: Option<VertexLayout>,
    ) -> Result<BufferHandle, GpuError> {
        let max = self.device.limits().max_buffer_size;
        let size = contents.len() as u64;
        if size > max {
            return Err(GpuError::BufferTooLarge {
                label: label.to_string(),
                size,
                max,
            });
        }

        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage: usage | wgpu::BufferUsages::COPY_DST,
        });

        Ok(Box::new(WgpuBuffer { buffer, layout }))
    }
}

impl GpuContext for WgpuContext<'_> {
    fn create_vertex_buffer(
        &self,
        label: &str,
        contents: &[u8],
        layout: &VertexLayout,
    ) -> Result<BufferHandle, GpuError> {
        self.create(label, contents, wgpu::BufferUsages::VERTEX, Some(layout.clone()))
    }

    fn create_index_buffer(&self, label: &str, contents: &[u8]) -> Result<BufferHandle, GpuError> {
        self.create(label, contents, wgpu::BufferUsages::INDEX, None)
    }

    fn update_buffer(&self, buffer: &dyn GpuBuffer, contents: &[u8]) -> Result<(), GpuError> {
        let wb = buffer
            .as_any()
            .downcast_ref::<WgpuBuffer>()
            .ok_or(GpuError::ForeignBuffer)?;

        let size = contents.len() as u64;
        if size > wb.buffer.size() {
            return Err(GpuError::UpdateTooLarge {
                size,
                capacity: wb.buffer.size(),
            });
        }

        self.queue.write_buffer(&wb.buffer, 0, contents);
        Ok(())
    }
}

/// In-memory context that records every call; used by unit tests.
#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct Counters {
        pub vertex_buffers: AtomicUsize,
        pub index_buffers: AtomicUsize,
        pub updates: AtomicUsize,
        pub destroyed: AtomicUsize,
        pub labels: Mutex<Vec<String>>,
    }

    impl Counters {
        pub fn vertex_buffers(&self) -> usize {
            self.vertex_buffers.load(Ordering::SeqCst)
        }
        pub fn index_buffers(&self) -> usize {
            self.index_buffers.load(Ordering::SeqCst)
        }
        pub fn updates(&self) -> usize {
            self.updates.load(Ordering::SeqCst)
        }
        pub fn destroyed(&self) -> usize {
            self.destroyed.load(Ordering::SeqCst)
        }
        pub fn total(&self) -> usize {
            self.vertex_buffers() + self.index_buffers() + self.updates() + self.destroyed()
        }
    }

    #[derive(Debug)]
    pub struct RecordedBuffer {
        pub bytes: Mutex<Vec<u8>>,
        counters: Arc<Counters>,
    }

    impl GpuBuffer for RecordedBuffer {
        fn size(&self) -> u64 {
            self.bytes.lock().map(|b| b.len() as u64).unwrap_or(0)
        }

        fn destroy(&self) {
            self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingContext {
        pub counters: Arc<Counters>,
    }

    impl RecordingContext {
        fn buffer(&self, label: &str, contents: &[u8]) -> BufferHandle {
            self.counters.labels.lock().unwrap().push(label.to_string());
            Box::new(RecordedBuffer {
                bytes: Mutex::new(contents.to_vec()),
                counters: self.counters.clone(),
            })
        }
    }

    impl GpuContext for RecordingContext {
        fn create_vertex_buffer(
            &self,
            label: &str,
            contents: &[u8],
            _layout: &VertexLayout,
        ) -> Result<BufferHandle, GpuError> {
            self.counters.vertex_buffers.fetch_add(1, Ordering::SeqCst);
            Ok(self.buffer(label, contents))
        }

        fn create_index_buffer(&self, label: &str, contents: &[u8]) -> Result<BufferHandle, GpuError> {
            self.counters.index_buffers.fetch_add(1, Ordering::SeqCst);
            Ok(self.buffer(label, contents))
        }

        fn update_buffer(&self, buffer: &dyn GpuBuffer, contents: &[u8]) -> Result<(), GpuError> {
            let rb = buffer
                .as_any()
                .downcast_ref::<RecordedBuffer>()
                .ok_or(GpuError::ForeignBuffer)?;
            self.counters.updates.fetch_add(1, Ordering::SeqCst);
            let mut bytes = rb.bytes.lock().unwrap();
            bytes[..contents.len()].copy_from_slice(contents);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::recording::*;
    use super::*;

    #[test]
    fn test_recording_context_update_rewrites_bytes() {
        let ctx = RecordingContext::default();
        let layout = VertexLayout {
            array_stride: 4,
            attributes: wgpu::vertex_attr_array![0 => Float32].to_vec(),
        };
        let buf = ctx.create_vertex_buffer("t", &[0, 0, 0, 0], &layout).unwrap();
        ctx.update_buffer(buf.as_ref(), &[1, 2, 3, 4]).unwrap();

        let rb = buf.as_any().downcast_ref::<RecordedBuffer>().unwrap();
        assert_eq!(*rb.bytes.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(ctx.counters.updates(), 1);

        buf.destroy();
        assert_eq!(ctx.counters.destroyed(), 1);
    }

    #[test]
    fn test_vertex_layout_as_wgpu() {
        let layout = crate::layout::layout_attributes();
        let wl = layout.as_wgpu();
        assert_eq!(wl.array_stride, 4);
        assert_eq!(wl.step_mode, wgpu::VertexStepMode::Vertex);
        assert_eq!(wl.attributes.len(), 1);
    }
}
