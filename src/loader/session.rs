//! One loader session: a single stream decoded into one assembler
//!
//! Objects and geometries may arrive in either order. An object whose
//! geometry has not been seen yet is parked in a correlation table keyed by
//! geometry id; when the geometry arrives every parked object is attached in
//! the order it was parked.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use crate::assembly::{AssemblyOutput, GeometryAssembler, GeometryRecord, ObjectRecord};
use crate::core::error::Error;
use crate::core::types::{GeometryId, ObjectId, Result};
use crate::protocol::{DecodeStats, GeometryPayload, ObjectData, Record, StreamDecoder};
use super::cancel::CancelToken;

/// What a completed session produced
#[derive(Clone, Debug)]
pub struct SessionOutput {
    pub session_id: u64,
    pub assembly: AssemblyOutput,
    pub decode: DecodeStats,
    /// Objects whose geometry never arrived
    pub unresolved_objects: usize,
    /// References to a geometry after it had already been materialized
    pub late_references: usize,
}

pub struct LoaderSession {
    id: u64,
    decoder: StreamDecoder,
    assembler: GeometryAssembler,
    geometries: HashMap<GeometryId, GeometryRecord>,
    objects: HashMap<ObjectId, ObjectRecord>,
    waiters: HashMap<GeometryId, Vec<ObjectId>>,
    evicted: HashSet<GeometryId>,
    late_references: usize,
}

impl LoaderSession {
    pub fn new(id: u64, decoder: StreamDecoder, assembler: GeometryAssembler) -> Self {
        Self {
            id,
            decoder,
            assembler,
            geometries: HashMap::new(),
            objects: HashMap::new(),
            waiters: HashMap::new(),
            evicted: HashSet::new(),
            late_references: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Geometries still held by the session
    pub fn resident_geometries(&self) -> usize {
        self.geometries.len()
    }

    /// Objects parked on a geometry that has not arrived yet
    pub fn waiting_objects(&self) -> usize {
        self.waiters.values().map(Vec::len).sum()
    }

    /// Decode and apply one chunk. Returns true once the end record was seen.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Result<bool> {
        for record in self.decoder.decode_chunk(chunk)? {
            match record {
                Record::Start(start) => {
                    log::debug!(
                        "session {}: stream v{} unit scale {}",
                        self.id,
                        start.version,
                        start.unit_scale
                    );
                }
                Record::Geometry(payload) => self.on_geometry(payload)?,
                Record::Object(data) => self.on_object(&data)?,
                Record::End => return Ok(true),
            }
        }
        Ok(false)
    }

    fn on_geometry(&mut self, payload: GeometryPayload) -> Result<()> {
        let id = payload.geometry_id;
        if self.geometries.contains_key(&id) || self.evicted.contains(&id) {
            log::warn!("session {}: duplicate geometry {} ignored", self.id, id);
            return Ok(());
        }
        self.geometries.insert(id, self.assembler.prepare(payload));

        if let Some(waiting) = self.waiters.remove(&id) {
            for oid in waiting {
                self.attach(oid, id)?;
            }
        }
        Ok(())
    }

    fn on_object(&mut self, data: &ObjectData) -> Result<()> {
        let (oid, gid) = (data.oid, data.geometry_data_id);
        if self.objects.contains_key(&oid) {
            // later records for the same object only add geometry
            log::debug!("session {}: object {} re-reported with geometry {}", self.id, oid, gid);
        } else {
            let visible = !self.assembler.is_hidden_type(&data.type_name);
            let object = ObjectRecord::from_data(data, visible, self.decoder.corrects_unit_scale());
            self.objects.insert(oid, object);
        }

        if self.geometries.contains_key(&gid) || self.evicted.contains(&gid) {
            self.attach(oid, gid)
        } else {
            self.waiters.entry(gid).or_default().push(oid);
            Ok(())
        }
    }

    fn attach(&mut self, oid: ObjectId, gid: GeometryId) -> Result<()> {
        match (self.objects.get_mut(&oid), self.geometries.get_mut(&gid)) {
            (Some(object), Some(geometry)) => {
                object.push_geometry(gid);
                if self.assembler.attach(object, geometry)? {
                    self.geometries.remove(&gid);
                    self.evicted.insert(gid);
                    log::debug!("session {}: geometry {} complete", self.id, gid);
                }
            }
            _ => {
                self.late_references += 1;
                log::warn!(
                    "session {}: object {} references geometry {} after it was released",
                    self.id,
                    oid,
                    gid
                );
            }
        }
        Ok(())
    }

    /// Finalize every geometry still held, flush all buffer sets and report
    pub fn finish(mut self) -> Result<SessionOutput> {
        let mut remaining: Vec<GeometryId> = self.geometries.keys().copied().collect();
        remaining.sort_unstable();
        for gid in remaining {
            if let Some(mut geometry) = self.geometries.remove(&gid) {
                if let Err(e) = self.assembler.finalize_incomplete(&mut geometry) {
                    self.discard();
                    return Err(e);
                }
            }
        }

        let unresolved_objects = self.waiting_objects();
        if unresolved_objects > 0 {
            log::warn!(
                "session {}: {} objects reference geometry that never arrived",
                self.id,
                unresolved_objects
            );
        }

        let assembly = match self.assembler.finish() {
            Ok(assembly) => assembly,
            Err(e) => {
                self.discard();
                return Err(e);
            }
        };
        log::info!(
            "session {} complete: {} objects, {} buffers, {} visible / {} hidden triangles",
            self.id,
            self.objects.len(),
            assembly.buffers.len(),
            assembly.stats.visible_triangles,
            assembly.stats.hidden_triangles
        );

        Ok(SessionOutput {
            session_id: self.id,
            assembly,
            decode: self.decoder.stats(),
            unresolved_objects,
            late_references: self.late_references,
        })
    }

    /// Drop all session state and release anything already uploaded
    pub fn discard(&mut self) {
        self.assembler.discard();
        self.geometries.clear();
        self.objects.clear();
        self.waiters.clear();
    }

    /// Feed chunks in arrival order until the end record, the channel closes,
    /// or `cancel` fires.
    pub async fn run(mut self, mut chunks: mpsc::Receiver<Vec<u8>>, cancel: &CancelToken) -> Result<SessionOutput> {
        log::debug!("session {} started", self.id);
        loop {
            if cancel.is_cancelled() {
                self.discard();
                return Err(Error::Cancelled);
            }
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = chunks.recv() => Some(chunk),
            };
            let chunk = match next {
                None => {
                    self.discard();
                    return Err(Error::Cancelled);
                }
                Some(None) => {
                    self.discard();
                    return Err(Error::StreamClosed);
                }
                Some(Some(chunk)) => chunk,
            };
            match self.process_chunk(&chunk) {
                Ok(true) => return self.finish(),
                Ok(false) => {}
                Err(e) => {
                    log::warn!("session {} failed: {}", self.id, e);
                    self.discard();
                    return Err(e);
                }
            }
        }
    }
}
