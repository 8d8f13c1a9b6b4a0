//! Model load scheduling
//!
//! A load runs in two phases. The base layer streams the coarse objects of
//! each revision on a small executor. Tiles follow: per-tile counts are
//! fetched once, zero-count tiles are marked empty, and every populated tile
//! gets exactly one session, submitted in breadth-first order so coarse
//! levels load before fine ones. Each tile session owns its own assembler.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::assembly::{AssemblerSettings, AssemblyStats, GeometryAssembler};
use crate::config::LoaderConfig;
use crate::core::error::Error;
use crate::core::types::{BufferId, GeometryId, Result, RevisionId};
use crate::loader::{
    BoundedExecutor, CancelToken, DownloadRequest, ExecutorProgress, LoadQuery, LoaderSession,
    ModelBackend, ProgressFn, SessionOutput, TileCountQuery,
};
use crate::math::{Aabb, QuantizationFrames};
use crate::protocol::{StreamDecoder, WireOptions};
use crate::render::upload::UploadQueue;
use super::index::{read_index, write_index, SharedTileIndex, TileId, TileIndex, TileStatus};

/// Name of the cached breadth-first list of populated tiles
pub const POPULATED_TILES: &str = "populated";

/// A revision to load and the bounds its stream is quantized against
#[derive(Clone, Debug, PartialEq)]
pub struct RevisionInfo {
    pub id: RevisionId,
    pub bounds: Aabb,
}

#[derive(Clone, Debug, Default)]
pub struct LoadRequest {
    pub revisions: Vec<RevisionInfo>,
    /// Geometry ids worth instancing, computed upstream
    pub reuse_set: HashSet<GeometryId>,
}

impl LoadRequest {
    pub fn revision_ids(&self) -> Vec<RevisionId> {
        self.revisions.iter().map(|r| r.id).collect()
    }

    /// Union of all revision bounds
    pub fn model_bounds(&self) -> Option<Aabb> {
        self.revisions
            .iter()
            .map(|r| r.bounds)
            .reduce(|a, b| a.union(&b))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadPhase {
    Base,
    Tiles,
}

/// Reported after every finished session
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadProgress {
    pub phase: LoadPhase,
    pub completed: usize,
    pub submitted: usize,
    /// Cumulative over the whole load
    pub visible_triangles: u64,
}

pub type LoadProgressFn = Arc<dyn Fn(LoadProgress) + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub enum LoadOutcome {
    Loaded,
    /// Nothing drawable was produced
    Empty,
    Failed(String),
}

/// Result of one session (a base revision or a tile)
#[derive(Clone, Debug)]
pub struct TileLoadReport {
    /// `None` for base-layer sessions
    pub tile_id: Option<TileId>,
    pub revision_ids: Vec<RevisionId>,
    pub outcome: LoadOutcome,
    pub buffers: Vec<BufferId>,
    pub stats: AssemblyStats,
}

impl TileLoadReport {
    fn from_result(tile_id: Option<TileId>, revision_ids: Vec<RevisionId>, result: Result<SessionOutput>) -> Self {
        match result {
            Ok(output) => Self {
                tile_id,
                revision_ids,
                outcome: if output.assembly.is_empty() {
                    LoadOutcome::Empty
                } else {
                    LoadOutcome::Loaded
                },
                buffers: output.assembly.buffers,
                stats: output.assembly.stats,
            },
            Err(e) => Self {
                tile_id,
                revision_ids,
                outcome: LoadOutcome::Failed(e.to_string()),
                buffers: Vec::new(),
                stats: AssemblyStats::default(),
            },
        }
    }
}

/// Summary of a whole load, reported once
#[derive(Debug)]
pub struct LoadReport {
    pub base: Vec<TileLoadReport>,
    /// Tile sessions in submission order
    pub tiles: Vec<TileLoadReport>,
    /// Set when the tile count query failed
    pub count_error: Option<String>,
    /// Tiles never scheduled
    pub empty_tiles: usize,
    pub index: SharedTileIndex,
}

impl LoadReport {
    fn sessions(&self) -> impl Iterator<Item = &TileLoadReport> {
        self.base.iter().chain(self.tiles.iter())
    }

    pub fn visible_triangles(&self) -> u64 {
        self.sessions().map(|r| r.stats.visible_triangles).sum()
    }

    pub fn hidden_triangles(&self) -> u64 {
        self.sessions().map(|r| r.stats.hidden_triangles).sum()
    }

    pub fn buffer_count(&self) -> usize {
        self.sessions().map(|r| r.buffers.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.sessions()
            .filter(|r| matches!(r.outcome, LoadOutcome::Failed(_)))
            .count()
    }

    pub fn loaded_tiles(&self) -> usize {
        self.tiles
            .iter()
            .filter(|r| r.outcome == LoadOutcome::Loaded)
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed() == 0 && self.count_error.is_none()
    }
}

/// State every session of one load shares
struct StreamContext<B> {
    backend: Arc<B>,
    settings: Arc<AssemblerSettings>,
    reuse_set: Arc<HashSet<GeometryId>>,
    frames: Arc<QuantizationFrames>,
    uploads: UploadQueue,
    cancel: CancelToken,
    wire: WireOptions,
    unit_scale_tolerance: f32,
    visible_triangles: Arc<AtomicU64>,
    next_session: Arc<AtomicU64>,
}

impl<B> Clone for StreamContext<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            settings: self.settings.clone(),
            reuse_set: self.reuse_set.clone(),
            frames: self.frames.clone(),
            uploads: self.uploads.clone(),
            cancel: self.cancel.clone(),
            wire: self.wire,
            unit_scale_tolerance: self.unit_scale_tolerance,
            visible_triangles: self.visible_triangles.clone(),
            next_session: self.next_session.clone(),
        }
    }
}

impl<B: ModelBackend> StreamContext<B> {
    /// Download, subscribe and decode one stream to completion
    async fn run(&self, request: DownloadRequest) -> Result<SessionOutput> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let channel = self.backend.download(&request).await?;
        let chunks = self.backend.subscribe(channel).await?;

        let assembler = GeometryAssembler::new(
            self.settings.clone(),
            self.reuse_set.clone(),
            self.frames.clone(),
            self.uploads.clone(),
        )
        .with_visible_counter(self.visible_triangles.clone());
        let decoder = StreamDecoder::with_tolerance(self.wire, self.unit_scale_tolerance);
        LoaderSession::new(id, decoder, assembler)
            .run(chunks, &self.cancel)
            .await
    }
}

/// Loads a model through a backend into the upload queue
pub struct ModelLoader<B: ModelBackend> {
    backend: Arc<B>,
    config: Arc<LoaderConfig>,
    uploads: UploadQueue,
    cancel: CancelToken,
    on_progress: Option<LoadProgressFn>,
}

impl<B: ModelBackend> ModelLoader<B> {
    pub fn new(backend: Arc<B>, config: LoaderConfig, uploads: UploadQueue) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config: Arc::new(config),
            uploads,
            cancel: CancelToken::new(),
            on_progress: None,
        })
    }

    pub fn with_progress(mut self, on_progress: LoadProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Token that aborts every session of this loader at its next chunk
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Load the base layer, then every populated tile. Session failures are
    /// collected in the report; only an unusable request is an error.
    pub async fn load(&self, request: &LoadRequest) -> Result<LoadReport> {
        let bounds = request
            .model_bounds()
            .ok_or_else(|| Error::Config("load request names no revisions".into()))?;

        let wire = self.config.wire_options();
        let mut frames = QuantizationFrames::new(&bounds);
        if wire.quantized {
            for revision in &request.revisions {
                frames.insert_revision(revision.id, &revision.bounds);
            }
        }

        let ctx = StreamContext {
            backend: self.backend.clone(),
            settings: Arc::new(AssemblerSettings::from_config(&self.config)),
            reuse_set: Arc::new(request.reuse_set.clone()),
            frames: Arc::new(frames),
            uploads: self.uploads.clone(),
            cancel: self.cancel.clone(),
            wire,
            unit_scale_tolerance: self.config.unit_scale_tolerance,
            visible_triangles: Arc::new(AtomicU64::new(0)),
            next_session: Arc::new(AtomicU64::new(0)),
        };
        log::info!(
            "loading {} revisions ({} reusable geometries), tile depth {}",
            request.revisions.len(),
            request.reuse_set.len(),
            self.config.tile_depth
        );

        let base = self.load_base(&ctx, request).await;
        let index = TileIndex::new(bounds, self.config.tile_depth).shared();
        let mut report = LoadReport {
            base,
            tiles: Vec::new(),
            count_error: None,
            empty_tiles: 0,
            index: index.clone(),
        };
        self.load_tiles(&ctx, request, &index, &mut report).await?;

        log::info!(
            "load finished: {}/{} tiles loaded, {} failed sessions, {} buffers, {} visible triangles",
            report.loaded_tiles(),
            report.tiles.len(),
            report.failed(),
            report.buffer_count(),
            report.visible_triangles()
        );
        Ok(report)
    }

    fn progress_fn(&self, phase: LoadPhase, visible: &Arc<AtomicU64>) -> Option<ProgressFn> {
        let callback = self.on_progress.clone()?;
        let visible = visible.clone();
        Some(Arc::new(move |p: ExecutorProgress| {
            callback(LoadProgress {
                phase,
                completed: p.completed,
                submitted: p.submitted,
                visible_triangles: visible.load(Ordering::Relaxed),
            })
        }))
    }

    async fn load_base(&self, ctx: &StreamContext<B>, request: &LoadRequest) -> Vec<TileLoadReport> {
        let executor = BoundedExecutor::with_progress(
            "base",
            self.config.base_concurrency,
            self.progress_fn(LoadPhase::Base, &ctx.visible_triangles),
        );

        let handles: Vec<_> = request
            .revisions
            .iter()
            .map(|revision| {
                let ctx = ctx.clone();
                let download = DownloadRequest {
                    revision_ids: vec![revision.id],
                    query: LoadQuery::Base {
                        revision_id: revision.id,
                        density_threshold: self.config.density_threshold,
                        excluded_types: self.config.excluded_types.clone(),
                    },
                    wire: ctx.wire,
                };
                (revision.id, executor.submit(async move { ctx.run(download).await }))
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (revision, handle) in handles {
            let result = handle.wait().await;
            reports.push(TileLoadReport::from_result(None, vec![revision], result));
        }
        executor.drained().await;
        reports
    }

    async fn load_tiles(
        &self,
        ctx: &StreamContext<B>,
        request: &LoadRequest,
        index: &SharedTileIndex,
        report: &mut LoadReport,
    ) -> Result<()> {
        let mut reuse_ids: Vec<GeometryId> = request.reuse_set.iter().copied().collect();
        reuse_ids.sort_unstable();
        let query = TileCountQuery {
            revision_ids: request.revision_ids(),
            excluded_types: self.config.excluded_types.clone(),
            reuse_ids,
            density_threshold: self.config.density_threshold,
            depth: self.config.tile_depth as u32,
        };

        let applied = match self.backend.tile_counts(&query).await {
            Ok(counts) => write_index(index).apply_population(&counts),
            Err(e) => Err(e),
        };
        if let Err(e) = applied {
            log::warn!("tile count query failed: {}; all tiles marked empty", e);
            let mut idx = write_index(index);
            idx.mark_all_empty();
            report.empty_tiles = idx.len();
            report.count_error = Some(e.to_string());
            return Ok(());
        }

        let queued: Vec<(TileId, Aabb)> = {
            let mut idx = write_index(index);
            let populated = idx.cache_list(POPULATED_TILES, |n| n.population().unwrap_or(0) > 0);
            report.empty_tiles = idx.count_status(TileStatus::Empty);
            let mut queued = Vec::with_capacity(populated.len());
            for &id in populated.iter() {
                idx.set_status(id, TileStatus::Queued)?;
                if let Some(node) = idx.node(id) {
                    queued.push((id, node.bounds));
                }
            }
            queued
        };
        log::info!(
            "{} populated tiles scheduled, {} empty",
            queued.len(),
            report.empty_tiles
        );

        let executor = BoundedExecutor::with_progress(
            "tiles",
            self.config.tile_concurrency,
            self.progress_fn(LoadPhase::Tiles, &ctx.visible_triangles),
        );
        let revision_ids = request.revision_ids();
        let handles: Vec<_> = queued
            .into_iter()
            .map(|(id, bounds)| {
                let ctx = ctx.clone();
                let index = index.clone();
                let download = DownloadRequest {
                    revision_ids: revision_ids.clone(),
                    query: LoadQuery::Tile {
                        tile_id: id,
                        bounds: bounds.to_array(),
                        depth: self.config.tile_depth as u32,
                        density_threshold: self.config.density_threshold,
                        excluded_types: self.config.excluded_types.clone(),
                    },
                    wire: ctx.wire,
                };
                (id, executor.submit(load_tile(ctx, index, id, download)))
            })
            .collect();

        for (id, handle) in handles {
            let result = handle.wait().await;
            report
                .tiles
                .push(TileLoadReport::from_result(Some(id), revision_ids.clone(), result));
        }
        executor.drained().await;
        Ok(())
    }
}

/// Session for one tile; the tile's status is owned by this task
async fn load_tile<B: ModelBackend>(
    ctx: StreamContext<B>,
    index: SharedTileIndex,
    id: TileId,
    download: DownloadRequest,
) -> Result<SessionOutput> {
    write_index(&index).set_status(id, TileStatus::Loading)?;
    let result = ctx.run(download).await;

    let mut idx = write_index(&index);
    match &result {
        Ok(output) if !output.assembly.is_empty() => {
            idx.attach_buffers(id, &output.assembly.buffers)?;
            idx.set_status(id, TileStatus::Loaded)?;
            log::info!(
                "tile {} loaded: {} buffers, {} triangles",
                id,
                output.assembly.buffers.len(),
                output.assembly.stats.visible_triangles
            );
        }
        Ok(_) => {
            idx.set_status(id, TileStatus::Empty)?;
            log::debug!("tile {} produced no visible buffers", id);
        }
        Err(e) => {
            // no retry within this load
            idx.set_status(id, TileStatus::Empty)?;
            log::warn!("tile {} failed: {}", id, e);
        }
    }
    drop(idx);
    result
}
