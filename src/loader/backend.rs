//! Backend operations consumed by the loader
//!
//! The service exposes three calls: per-tile object counts, starting a
//! download for a query, and an ordered chunk subscription for the returned
//! channel. Query documents are plain serde types so any transport can carry
//! them as JSON.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::error::Error;
use crate::core::types::{GeometryId, Result, RevisionId};
use crate::protocol::WireOptions;

/// Channel buffer between a subscription and its session
pub const CHUNK_CHANNEL_CAPACITY: usize = 16;

/// Identifier returned by `download`, consumed by `subscribe`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

/// Per-tile object count query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileCountQuery {
    pub revision_ids: Vec<RevisionId>,
    pub excluded_types: Vec<String>,
    pub reuse_ids: Vec<GeometryId>,
    pub density_threshold: f32,
    pub depth: u32,
}

/// What a download should contain
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadQuery {
    /// Coarse objects above the density threshold
    Base {
        revision_id: RevisionId,
        density_threshold: f32,
        excluded_types: Vec<String>,
    },
    /// Objects located in one tile
    Tile {
        tile_id: u32,
        bounds: [f64; 6],
        depth: u32,
        density_threshold: f32,
        excluded_types: Vec<String>,
    },
}

impl LoadQuery {
    /// Stable name for the stream this query produces
    pub fn stream_name(&self) -> String {
        match self {
            LoadQuery::Base { revision_id, .. } => format!("base_{}", revision_id),
            LoadQuery::Tile { tile_id, .. } => format!("tile_{}", tile_id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub revision_ids: Vec<RevisionId>,
    pub query: LoadQuery,
    /// Serializer options the stream will be encoded with
    pub wire: WireOptions,
}

/// Remote model service
pub trait ModelBackend: Send + Sync + 'static {
    /// One count per tile, in breadth-first index order
    fn tile_counts(&self, query: &TileCountQuery) -> impl Future<Output = Result<Vec<u32>>> + Send;

    fn download(&self, request: &DownloadRequest) -> impl Future<Output = Result<ChannelId>> + Send;

    /// Ordered binary chunks for a channel; the sender closes after the last one
    fn subscribe(&self, channel: ChannelId) -> impl Future<Output = Result<mpsc::Receiver<Vec<u8>>>> + Send;
}

/// Scripted in-memory backend
#[derive(Default)]
pub struct MemoryBackend {
    tile_counts: Mutex<Option<std::result::Result<Vec<u32>, String>>>,
    streams: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    failing: Mutex<HashSet<String>>,
    channels: Mutex<HashMap<ChannelId, String>>,
    downloads: Mutex<Vec<DownloadRequest>>,
    next_channel: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tile_counts(self, counts: Vec<u32>) -> Self {
        *lock(&self.tile_counts) = Some(Ok(counts));
        self
    }

    /// Make the count query fail
    pub fn with_failing_counts(self, message: &str) -> Self {
        *lock(&self.tile_counts) = Some(Err(message.to_string()));
        self
    }

    /// Serve `chunks` for the stream named `name` (see [`LoadQuery::stream_name`])
    pub fn with_stream(self, name: &str, chunks: Vec<Vec<u8>>) -> Self {
        lock(&self.streams).insert(name.to_string(), chunks);
        self
    }

    /// Make downloads of `name` fail
    pub fn with_failing_stream(self, name: &str) -> Self {
        lock(&self.failing).insert(name.to_string());
        self
    }

    /// Every download request received, in arrival order
    pub fn downloads(&self) -> Vec<DownloadRequest> {
        lock(&self.downloads).clone()
    }
}

impl ModelBackend for MemoryBackend {
    async fn tile_counts(&self, _query: &TileCountQuery) -> Result<Vec<u32>> {
        match lock(&self.tile_counts).clone() {
            Some(Ok(counts)) => Ok(counts),
            Some(Err(message)) => Err(Error::Backend(message)),
            None => Err(Error::Backend("no tile counts configured".into())),
        }
    }

    async fn download(&self, request: &DownloadRequest) -> Result<ChannelId> {
        lock(&self.downloads).push(request.clone());
        let name = request.query.stream_name();
        if lock(&self.failing).contains(&name) {
            return Err(Error::Backend(format!("download of {} failed", name)));
        }
        if !lock(&self.streams).contains_key(&name) {
            return Err(Error::Backend(format!("no stream named {}", name)));
        }
        let channel = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed));
        lock(&self.channels).insert(channel, name);
        Ok(channel)
    }

    async fn subscribe(&self, channel: ChannelId) -> Result<mpsc::Receiver<Vec<u8>>> {
        let name = lock(&self.channels)
            .remove(&channel)
            .ok_or_else(|| Error::Backend(format!("unknown channel {}", channel.0)))?;
        let chunks = lock(&self.streams).get(&name).cloned().unwrap_or_default();
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.try_send(chunk)
                .map_err(|e| Error::Backend(format!("chunk channel: {}", e)))?;
        }
        Ok(rx)
    }
}
