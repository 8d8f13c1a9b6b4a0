//! Upload funnel between loader tasks and the render thread
//!
//! Assemblers never touch the GPU. They push [`UploadRequest`]s into an
//! [`UploadQueue`]; the render thread drains the matching [`UploadReceiver`]
//! once per frame against a [`GpuBufferManager`].

use tokio::sync::mpsc;

use crate::assembly::{InstancedGeometry, PackedBufferSet};
use crate::core::error::Error;
use crate::core::types::{BufferId, Result};

/// A unit of GPU work produced by assembly
#[derive(Clone, Debug)]
pub enum UploadRequest {
    BufferSet(PackedBufferSet),
    Instanced(InstancedGeometry),
    /// Free a previously uploaded buffer
    Release(BufferId),
}

impl UploadRequest {
    pub fn buffer_id(&self) -> BufferId {
        match self {
            UploadRequest::BufferSet(set) => set.id,
            UploadRequest::Instanced(geometry) => geometry.id,
            UploadRequest::Release(id) => *id,
        }
    }
}

/// Owner of GPU-resident buffers
///
/// `Context` is the rendering state an upload needs, passed explicitly on
/// every call.
pub trait GpuBufferManager {
    type Context<'a>;

    fn upload_buffer_set(&mut self, ctx: &Self::Context<'_>, set: &PackedBufferSet) -> Result<()>;

    fn upload_instanced(&mut self, ctx: &Self::Context<'_>, geometry: &InstancedGeometry) -> Result<()>;

    /// Returns false if the id was unknown
    fn release(&mut self, id: BufferId) -> bool;

    fn resident_count(&self) -> usize;
}

/// Sending half, cloned into every assembler of a load
#[derive(Clone, Debug)]
pub struct UploadQueue {
    tx: mpsc::UnboundedSender<UploadRequest>,
}

impl UploadQueue {
    /// Create a connected queue/receiver pair
    pub fn channel() -> (UploadQueue, UploadReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (UploadQueue { tx }, UploadReceiver { rx })
    }

    pub fn send(&self, request: UploadRequest) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|_| Error::GpuResource("upload receiver dropped".into()))
    }

    pub fn release(&self, id: BufferId) -> Result<()> {
        self.send(UploadRequest::Release(id))
    }
}

/// Result of one drain pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub buffer_sets: usize,
    pub instanced: usize,
    pub released: usize,
}

impl DrainStats {
    pub fn total(&self) -> usize {
        self.buffer_sets + self.instanced + self.released
    }
}

/// Receiving half, owned by the render thread
#[derive(Debug)]
pub struct UploadReceiver {
    rx: mpsc::UnboundedReceiver<UploadRequest>,
}

impl UploadReceiver {
    /// Apply every queued request to `manager`.
    ///
    /// On the first GPU failure the remaining queued requests of this pass
    /// are discarded and the error is returned.
    pub fn drain<M: GpuBufferManager>(
        &mut self,
        ctx: &M::Context<'_>,
        manager: &mut M,
    ) -> Result<DrainStats> {
        let mut stats = DrainStats::default();
        while let Ok(request) = self.rx.try_recv() {
            let applied = match &request {
                UploadRequest::BufferSet(set) => manager
                    .upload_buffer_set(ctx, set)
                    .map(|_| stats.buffer_sets += 1),
                UploadRequest::Instanced(geometry) => manager
                    .upload_instanced(ctx, geometry)
                    .map(|_| stats.instanced += 1),
                UploadRequest::Release(id) => {
                    if manager.release(*id) {
                        stats.released += 1;
                    }
                    Ok(())
                }
            };
            if let Err(e) = applied {
                let discarded = self.try_recv_all().len();
                log::error!(
                    "upload of buffer {:?} failed: {}; discarded {} queued requests",
                    request.buffer_id(),
                    e,
                    discarded
                );
                return Err(e);
            }
        }
        if stats.total() > 0 {
            log::debug!(
                "drained {} buffer sets, {} instanced, {} released",
                stats.buffer_sets,
                stats.instanced,
                stats.released
            );
        }
        Ok(stats)
    }

    /// Take every queued request without applying it
    pub fn try_recv_all(&mut self) -> Vec<UploadRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = self.rx.try_recv() {
            requests.push(request);
        }
        requests
    }

    /// Wait for the next request; `None` once every queue is dropped
    pub async fn recv(&mut self) -> Option<UploadRequest> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::assembly::{BufferCapacity, BufferKey, BufferPacker, VertexLayout};
    use crate::assembly::buffer_set::{NormalData, PositionData, VertexBatch};

    /// Records uploads in memory; fails once `budget` bytes are exceeded
    #[derive(Default)]
    struct MockManager {
        pub resident: HashMap<BufferId, usize>,
        pub budget: Option<usize>,
        used: usize,
    }

    impl MockManager {
        fn reserve(&mut self, id: BufferId, bytes: usize) -> Result<()> {
            if let Some(budget) = self.budget {
                if self.used + bytes > budget {
                    return Err(Error::GpuResource(format!("out of memory allocating {} bytes", bytes)));
                }
            }
            self.used += bytes;
            self.resident.insert(id, bytes);
            Ok(())
        }
    }

    impl GpuBufferManager for MockManager {
        type Context<'a> = ();

        fn upload_buffer_set(&mut self, _ctx: &(), set: &PackedBufferSet) -> Result<()> {
            self.reserve(set.id, set.byte_size())
        }

        fn upload_instanced(&mut self, _ctx: &(), geometry: &InstancedGeometry) -> Result<()> {
            self.reserve(geometry.id, geometry.byte_size())
        }

        fn release(&mut self, id: BufferId) -> bool {
            match self.resident.remove(&id) {
                Some(bytes) => {
                    self.used -= bytes;
                    true
                }
                None => false,
            }
        }

        fn resident_count(&self) -> usize {
            self.resident.len()
        }
    }

    fn packed_set() -> PackedBufferSet {
        let capacity = BufferCapacity { max_vertices: 100, max_indices: 100 };
        let mut packer = BufferPacker::new(VertexLayout::new(false, false, false), capacity);
        packer.push(
            BufferKey::new(false, Some([1.0; 4])),
            VertexBatch {
                positions: PositionData::Float(vec![[0.0; 3]; 3]),
                normals: NormalData::Float(vec![[0.0, 0.0, 1.0]; 3]),
                colors: Vec::new(),
                indices: vec![0, 1, 2],
            },
        );
        packer.flush_all().remove(0)
    }

    #[test]
    fn test_drain_applies_and_releases() {
        let (queue, mut receiver) = UploadQueue::channel();
        let set = packed_set();
        let id = set.id;
        queue.send(UploadRequest::BufferSet(set)).unwrap();

        let mut manager = MockManager::default();
        let stats = receiver.drain(&(), &mut manager).unwrap();
        assert_eq!(stats.buffer_sets, 1);
        assert_eq!(manager.resident_count(), 1);

        queue.release(id).unwrap();
        queue.release(BufferId(u64::MAX)).unwrap();
        let stats = receiver.drain(&(), &mut manager).unwrap();
        assert_eq!(stats.released, 1);
        assert_eq!(manager.resident_count(), 0);
    }

    #[test]
    fn test_failure_discards_rest_of_batch() {
        let (queue, mut receiver) = UploadQueue::channel();
        for _ in 0..3 {
            queue.send(UploadRequest::BufferSet(packed_set())).unwrap();
        }
        let one = packed_set().byte_size();
        let mut manager = MockManager { budget: Some(one), ..Default::default() };

        let err = receiver.drain(&(), &mut manager).unwrap_err();
        assert!(matches!(err, Error::GpuResource(_)));
        assert_eq!(manager.resident_count(), 1);
        assert!(receiver.try_recv_all().is_empty());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (queue, receiver) = UploadQueue::channel();
        drop(receiver);
        assert!(matches!(queue.release(BufferId(1)), Err(Error::GpuResource(_))));
    }
}
