//! Directory-backed backend replaying recorded streams
//!
//! Layout:
//! ```text
//! <dir>/tile_counts.json    JSON array of per-tile counts (breadth-first order)
//! <dir>/<stream>.bgs        recorded chunks, each prefixed with its u32 LE length
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::core::error::Error;
use crate::core::types::Result;
use super::backend::{ChannelId, DownloadRequest, ModelBackend, TileCountQuery, CHUNK_CHANNEL_CAPACITY};

/// File extension of recorded streams
pub const RECORDING_EXTENSION: &str = "bgs";

/// Name of the tile count file
pub const TILE_COUNTS_FILE: &str = "tile_counts.json";

/// Get the file path for a recorded stream
pub fn recording_path(base_dir: &Path, stream: &str) -> PathBuf {
    base_dir.join(format!("{}.{}", stream, RECORDING_EXTENSION))
}

/// Frame chunks as `u32 length + bytes` records
pub fn encode_recording(chunks: &[Vec<u8>]) -> Vec<u8> {
    let total = chunks.iter().map(|c| c.len() + 4).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(chunk);
    }
    out
}

/// Split a recording back into chunks
pub fn decode_recording(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut chunks = Vec::new();
    let mut position = 0usize;
    while position < data.len() {
        let header = data
            .get(position..position + 4)
            .ok_or(Error::OutOfRange { position, requested: 4, len: data.len() })?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        position += 4;
        let chunk = data
            .get(position..position + len)
            .ok_or(Error::OutOfRange { position, requested: len, len: data.len() })?;
        chunks.push(chunk.to_vec());
        position += len;
    }
    Ok(chunks)
}

/// Save a recorded stream to disk
pub async fn save_recording(base_dir: &Path, stream: &str, chunks: &[Vec<u8>]) -> Result<()> {
    tokio::fs::create_dir_all(base_dir).await?;
    tokio::fs::write(recording_path(base_dir, stream), encode_recording(chunks)).await?;
    Ok(())
}

/// Save the per-tile count file
pub async fn save_tile_counts(base_dir: &Path, counts: &[u32]) -> Result<()> {
    tokio::fs::create_dir_all(base_dir).await?;
    let json = serde_json::to_vec_pretty(counts)?;
    tokio::fs::write(base_dir.join(TILE_COUNTS_FILE), json).await?;
    Ok(())
}

/// Load a recorded stream from disk
pub async fn load_recording(path: &Path) -> Result<Vec<Vec<u8>>> {
    let data = tokio::fs::read(path).await?;
    decode_recording(&data)
}

/// Backend serving recordings from a directory
pub struct RecordedBackend {
    base_dir: PathBuf,
    channels: Mutex<HashMap<ChannelId, PathBuf>>,
    next_channel: AtomicU64,
}

impl RecordedBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            channels: Mutex::new(HashMap::new()),
            next_channel: AtomicU64::new(0),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn channels(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelId, PathBuf>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ModelBackend for RecordedBackend {
    async fn tile_counts(&self, _query: &TileCountQuery) -> Result<Vec<u32>> {
        let path = self.base_dir.join(TILE_COUNTS_FILE);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Backend(format!("{}: {}", path.display(), e)))?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn download(&self, request: &DownloadRequest) -> Result<ChannelId> {
        let path = recording_path(&self.base_dir, &request.query.stream_name());
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::Backend(format!("no recording at {}", path.display())));
        }
        let channel = ChannelId(self.next_channel.fetch_add(1, Ordering::Relaxed));
        self.channels().insert(channel, path);
        Ok(channel)
    }

    async fn subscribe(&self, channel: ChannelId) -> Result<mpsc::Receiver<Vec<u8>>> {
        let path = self
            .channels()
            .remove(&channel)
            .ok_or_else(|| Error::Backend(format!("unknown channel {}", channel.0)))?;
        let chunks = load_recording(&path).await?;
        log::debug!("replaying {} chunks from {}", chunks.len(), path.display());

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::backend::LoadQuery;
    use crate::protocol::WireOptions;

    #[test]
    fn test_recording_framing() {
        let chunks = vec![vec![1, 2, 3], vec![], vec![9; 10]];
        let encoded = encode_recording(&chunks);
        assert_eq!(encoded.len(), 3 * 4 + 13);
        assert_eq!(decode_recording(&encoded).unwrap(), chunks);
    }

    #[test]
    fn test_truncated_recording() {
        let mut encoded = encode_recording(&[vec![1, 2, 3, 4]]);
        encoded.pop();
        assert!(matches!(decode_recording(&encoded), Err(Error::OutOfRange { .. })));
    }

    #[tokio::test]
    async fn test_recorded_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        save_tile_counts(dir.path(), &[0, 2, 0]).await.unwrap();
        save_recording(dir.path(), "tile_1", &[vec![7; 5], vec![8; 3]]).await.unwrap();

        let backend = RecordedBackend::new(dir.path());
        let query = TileCountQuery {
            revision_ids: vec![1],
            excluded_types: vec![],
            reuse_ids: vec![],
            density_threshold: 0.5,
            depth: 1,
        };
        assert_eq!(backend.tile_counts(&query).await.unwrap(), vec![0, 2, 0]);

        let request = DownloadRequest {
            revision_ids: vec![1],
            query: LoadQuery::Tile {
                tile_id: 1,
                bounds: [0.0; 6],
                depth: 1,
                density_threshold: 0.5,
                excluded_types: vec![],
            },
            wire: WireOptions::default(),
        };
        let channel = backend.download(&request).await.unwrap();
        let mut rx = backend.subscribe(channel).await.unwrap();
        assert_eq!(rx.recv().await, Some(vec![7; 5]));
        assert_eq!(rx.recv().await, Some(vec![8; 3]));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_missing_recording_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordedBackend::new(dir.path());
        let request = DownloadRequest {
            revision_ids: vec![1],
            query: LoadQuery::Base { revision_id: 3, density_threshold: 0.5, excluded_types: vec![] },
            wire: WireOptions::default(),
        };
        assert!(matches!(backend.download(&request).await, Err(Error::Backend(_))));
    }
}
