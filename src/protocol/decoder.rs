//! Record-level decoder for the binary geometry stream
//!
//! One decoder per loader session. Chunks must be fed in arrival order; a
//! chunk may hold several records back to back, and all alignment is
//! relative to the chunk start.

use crate::core::Error;
use crate::core::types::{DMat4, DVec3, Result};
use crate::math::Aabb;
use super::cursor::ByteCursor;
use super::record::{
    GeometryPayload, Normals, ObjectData, Positions, Record, RecordTag, StartRecord, WireOptions,
    ALIGNMENT, MAGIC, PROTOCOL_VERSION,
};

/// Default tolerance band around 1.0 inside which the stream unit scale is
/// left uncorrected. Policy, not physics.
pub const DEFAULT_UNIT_SCALE_TOLERANCE: f32 = 0.01;

/// Decoder lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderState {
    AwaitingStart,
    Streaming,
    Ended,
}

impl DecoderState {
    fn name(self) -> &'static str {
        match self {
            DecoderState::AwaitingStart => "awaiting start",
            DecoderState::Streaming => "streaming",
            DecoderState::Ended => "ended",
        }
    }
}

/// Counters for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub chunks: usize,
    pub bytes: usize,
    pub geometries: usize,
    pub objects: usize,
    /// Objects whose transform got the unit-scale correction
    pub corrected_objects: usize,
    /// Chunks whose tail was dropped at an unknown record tag
    pub skipped_chunks: usize,
}

/// Stateful stream decoder
pub struct StreamDecoder {
    state: DecoderState,
    options: WireOptions,
    tolerance: f32,
    unit_scale: f32,
    /// `(scale(1/m), scale(m))` when the stream scale is outside tolerance
    correction: Option<(DMat4, DMat4)>,
    stats: DecodeStats,
}

impl StreamDecoder {
    pub fn new(options: WireOptions) -> Self {
        Self::with_tolerance(options, DEFAULT_UNIT_SCALE_TOLERANCE)
    }

    pub fn with_tolerance(options: WireOptions, tolerance: f32) -> Self {
        Self {
            state: DecoderState::AwaitingStart,
            options,
            tolerance,
            unit_scale: 1.0,
            correction: None,
            stats: DecodeStats::default(),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn is_ended(&self) -> bool {
        self.state == DecoderState::Ended
    }

    pub fn unit_scale(&self) -> f32 {
        self.unit_scale
    }

    /// True once a Start record outside the tolerance band has been seen
    pub fn corrects_unit_scale(&self) -> bool {
        self.correction.is_some()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Decode every record in one chunk.
    ///
    /// Unknown record tags are logged and the remainder of the chunk is
    /// dropped, since record lengths are not self-describing. All other
    /// errors are fatal to the session.
    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Record>> {
        self.stats.chunks += 1;
        self.stats.bytes += chunk.len();

        let mut cursor = ByteCursor::new(chunk);
        let mut records = Vec::new();

        while !cursor.is_empty() {
            let tag = cursor.read_u8()?;
            if self.state == DecoderState::Ended {
                return Err(Error::UnexpectedRecord { state: self.state.name(), tag });
            }

            let kind = match RecordTag::from_u8(tag).ok_or(Error::UnknownRecordType(tag)) {
                Ok(kind) => kind,
                Err(e) if e.is_recoverable() => {
                    log::warn!("{}, skipping {} bytes", e, cursor.remaining());
                    self.stats.skipped_chunks += 1;
                    break;
                }
                Err(e) => return Err(e),
            };

            let expected = match kind {
                RecordTag::Start => DecoderState::AwaitingStart,
                _ => DecoderState::Streaming,
            };
            if self.state != expected {
                return Err(Error::UnexpectedRecord { state: self.state.name(), tag });
            }

            let record = match kind {
                RecordTag::Start => Record::Start(self.read_start(&mut cursor)?),
                RecordTag::Geometry => Record::Geometry(self.read_geometry(&mut cursor)?),
                RecordTag::Object => Record::Object(self.read_object(&mut cursor)?),
                RecordTag::End => {
                    self.state = DecoderState::Ended;
                    if !cursor.is_empty() {
                        log::warn!("{} trailing bytes after end record", cursor.remaining());
                    }
                    records.push(Record::End);
                    break;
                }
            };
            records.push(record);
        }

        Ok(records)
    }

    fn read_start(&mut self, cursor: &mut ByteCursor<'_>) -> Result<StartRecord> {
        let magic = cursor.read_bytes(3)?;
        if magic != MAGIC {
            return Err(Error::BadMagic([magic[0], magic[1], magic[2]]));
        }
        let version = cursor.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion { expected: PROTOCOL_VERSION, found: version });
        }
        let unit_scale = cursor.read_f32()?;
        cursor.align(ALIGNMENT)?;
        let bounds = Aabb::from_array(cursor.read_f64_n::<6>()?);

        self.unit_scale = unit_scale;
        self.correction = unit_scale_correction(unit_scale, self.tolerance);
        if self.correction.is_some() {
            log::info!("stream unit scale {} outside tolerance, correcting object transforms", unit_scale);
        }
        self.state = DecoderState::Streaming;
        log::debug!("stream started: version {}, unit scale {}", version, unit_scale);

        Ok(StartRecord { version, unit_scale, bounds })
    }

    fn read_geometry(&mut self, cursor: &mut ByteCursor<'_>) -> Result<GeometryPayload> {
        let reuse_count = cursor.read_i32()?.max(1) as u32;
        let type_name = cursor.read_str()?;
        cursor.align(ALIGNMENT)?;
        let owner_revision_id = cursor.read_u64()?;
        let has_transparency = cursor.read_u64()? != 0;
        let geometry_id = cursor.read_u64()?;

        let index_count = read_count(cursor)?;
        let indices: Vec<u32> = if self.options.short_indices {
            cursor
                .read_i16_array(index_count)?
                .into_iter()
                .map(|i| i as u16 as u32)
                .collect()
        } else {
            let raw = cursor.read_i32_array(index_count)?;
            let mut out = Vec::with_capacity(raw.len());
            for i in raw {
                out.push(u32::try_from(i).map_err(|_| {
                    Error::Corrupt(format!("negative index {} in geometry {}", i, geometry_id))
                })?);
            }
            out
        };

        let color = match cursor.read_i32()? {
            0 => None,
            1 => {
                let mut c = [0.0; 4];
                for v in c.iter_mut() {
                    *v = cursor.read_f32()?;
                }
                Some(c)
            }
            other => {
                return Err(Error::Corrupt(format!("color tag {} in geometry {}", other, geometry_id)));
            }
        };

        let position_count = read_count(cursor)?;
        let positions = if self.options.quantized {
            Positions::Quantized(cursor.read_i16_array(position_count)?)
        } else {
            Positions::Float(cursor.read_f32_array(position_count)?)
        };
        cursor.align(ALIGNMENT)?;

        let normal_count = read_count(cursor)?;
        let normals = if self.options.quantized {
            Normals::Quantized(cursor.read_i8_array(normal_count)?)
        } else {
            Normals::Float(cursor.read_f32_array(normal_count)?)
        };
        cursor.align(ALIGNMENT)?;

        let color_count = read_count(cursor)?;
        let colors = if color_count > 0 {
            Some(cursor.read_f32_array(color_count)?)
        } else {
            None
        };

        let payload = GeometryPayload {
            reuse_count,
            type_name,
            owner_revision_id,
            has_transparency,
            geometry_id,
            indices,
            color,
            positions,
            normals,
            colors,
        };
        validate_geometry(&payload)?;

        self.stats.geometries += 1;
        log::debug!(
            "geometry {} ({}): {} vertices, {} triangles, reuse {}",
            geometry_id,
            payload.type_name,
            payload.vertex_count(),
            payload.triangle_count(),
            reuse_count
        );
        Ok(payload)
    }

    fn read_object(&mut self, cursor: &mut ByteCursor<'_>) -> Result<ObjectData> {
        let oid = cursor.read_u64()?;
        let type_name = cursor.read_str()?;
        cursor.align(ALIGNMENT)?;
        let owner_revision_id = cursor.read_u64()?;
        let geometry_info_id = cursor.read_u64()?;
        let has_transparency = cursor.read_u64()? != 0;
        let bounds = Aabb::from_array(cursor.read_f64_n::<6>()?);
        if !bounds.is_valid() {
            log::warn!("object {} has invalid bounds {:?}", oid, bounds);
        }
        let mut matrix = DMat4::from_cols_array(&cursor.read_f64_n::<16>()?);
        let geometry_data_id = cursor.read_u64()?;

        if let Some((inverse_scale, scale)) = self.correction {
            matrix = inverse_scale * matrix * scale;
            self.stats.corrected_objects += 1;
        }

        self.stats.objects += 1;
        Ok(ObjectData {
            oid,
            type_name,
            owner_revision_id,
            geometry_info_id,
            has_transparency,
            bounds,
            matrix,
            geometry_data_id,
        })
    }
}

/// Matrices `(scale(1/m), scale(m))` that restore true units around the
/// server's pre-scaling, or `None` when `m` is within `tolerance` of 1.
pub fn unit_scale_correction(m: f32, tolerance: f32) -> Option<(DMat4, DMat4)> {
    if !m.is_finite() || m <= 0.0 {
        log::warn!("stream unit scale {} is not a positive number, transforms left as sent", m);
        return None;
    }
    if (m - 1.0).abs() <= tolerance {
        return None;
    }
    let m = m as f64;
    Some((
        DMat4::from_scale(DVec3::splat(1.0 / m)),
        DMat4::from_scale(DVec3::splat(m)),
    ))
}

fn read_count(cursor: &mut ByteCursor<'_>) -> Result<usize> {
    let position = cursor.position();
    let count = cursor.read_i32()?;
    usize::try_from(count)
        .map_err(|_| Error::Corrupt(format!("negative element count {} at offset {}", count, position)))
}

fn validate_geometry(g: &GeometryPayload) -> Result<()> {
    let vertices = g.vertex_count();
    if g.positions.len() % 3 != 0 || g.normals.len() % 3 != 0 {
        return Err(Error::Corrupt(format!("geometry {} has ragged vertex arrays", g.geometry_id)));
    }
    if !g.normals.is_empty() && g.normals.len() != g.positions.len() {
        return Err(Error::Corrupt(format!("geometry {} normal count mismatch", g.geometry_id)));
    }
    if let Some(colors) = &g.colors {
        if colors.len() != vertices * 4 {
            return Err(Error::Corrupt(format!("geometry {} color count mismatch", g.geometry_id)));
        }
    }
    if g.indices.len() % 3 != 0 {
        return Err(Error::Corrupt(format!("geometry {} index count not a multiple of 3", g.geometry_id)));
    }
    if let Some(&bad) = g.indices.iter().find(|&&i| i as usize >= vertices) {
        return Err(Error::Corrupt(format!(
            "geometry {} index {} out of {} vertices",
            g.geometry_id, bad, vertices
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::writer::{quad_geometry, StreamWriter};

    fn model_bounds() -> Aabb {
        Aabb::new(DVec3::splat(-50.0), DVec3::splat(50.0))
    }

    fn object(oid: u64, geometry: u64, matrix: DMat4) -> ObjectData {
        ObjectData {
            oid,
            type_name: "IfcWall".into(),
            owner_revision_id: 3,
            geometry_info_id: oid + 1000,
            has_transparency: false,
            bounds: Aabb::new(DVec3::ZERO, DVec3::ONE),
            matrix,
            geometry_data_id: geometry,
        }
    }

    #[test]
    fn test_start_geometry_end_roundtrip() {
        let options = WireOptions { quantized: false, short_indices: false };
        let mut geometry = quad_geometry(42, 3, "IfcSlab", 2, false);
        geometry.color = Some([0.1, 0.2, 0.3, 0.4]);
        geometry.has_transparency = true;
        geometry.colors = Some(vec![0.5; 16]);

        let mut writer = StreamWriter::new(options);
        writer.start(1.0, &model_bounds()).geometry(&geometry).end();
        let chunk = writer.finish();

        let mut decoder = StreamDecoder::new(options);
        let records = decoder.decode_chunk(&chunk).unwrap();
        assert_eq!(records.len(), 3);

        match &records[0] {
            Record::Start(start) => {
                assert_eq!(start.version, PROTOCOL_VERSION);
                assert!((start.unit_scale - 1.0).abs() < f32::EPSILON);
                assert_eq!(start.bounds, model_bounds());
            }
            other => panic!("expected start, got {:?}", other),
        }
        match &records[1] {
            Record::Geometry(decoded) => assert_eq!(decoded, &geometry),
            other => panic!("expected geometry, got {:?}", other),
        }
        assert_eq!(records[2], Record::End);
        assert!(decoder.is_ended());
        assert_eq!(decoder.stats().geometries, 1);
    }

    #[test]
    fn test_quantized_short_index_roundtrip_across_chunks() {
        let options = WireOptions { quantized: true, short_indices: true };
        let mut geometry = quad_geometry(7, 1, "IfcWall", 1, true);
        geometry.indices = vec![0, 1, 2, 2, 1, 3];

        let mut writer = StreamWriter::new(options);
        let start = writer.start(1.0, &model_bounds()).finish();
        let body = writer.geometry(&geometry).finish();
        let end = writer.end().finish();

        let mut decoder = StreamDecoder::new(options);
        assert_eq!(decoder.decode_chunk(&start).unwrap().len(), 1);
        let records = decoder.decode_chunk(&body).unwrap();
        assert_eq!(records, vec![Record::Geometry(geometry)]);
        assert_eq!(decoder.decode_chunk(&end).unwrap(), vec![Record::End]);
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let mut writer = StreamWriter::new(WireOptions::default());
        let chunk = writer.start_raw(*b"XYZ", PROTOCOL_VERSION, 1.0, &model_bounds()).finish();
        let mut decoder = StreamDecoder::new(WireOptions::default());
        assert!(matches!(decoder.decode_chunk(&chunk), Err(Error::BadMagic(m)) if &m == b"XYZ"));
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let mut writer = StreamWriter::new(WireOptions::default());
        let chunk = writer.start_raw(MAGIC, PROTOCOL_VERSION + 1, 1.0, &model_bounds()).finish();
        let mut decoder = StreamDecoder::new(WireOptions::default());
        assert!(matches!(
            decoder.decode_chunk(&chunk),
            Err(Error::UnsupportedVersion { expected, found }) if expected == PROTOCOL_VERSION && found == PROTOCOL_VERSION + 1
        ));
    }

    #[test]
    fn test_geometry_before_start_rejected() {
        let mut writer = StreamWriter::new(WireOptions::default());
        let chunk = writer.geometry(&quad_geometry(1, 1, "IfcWall", 1, false)).finish();
        let mut decoder = StreamDecoder::new(WireOptions::default());
        assert!(matches!(
            decoder.decode_chunk(&chunk),
            Err(Error::UnexpectedRecord { tag: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_record_skips_rest_of_chunk() {
        let options = WireOptions::default();
        let mut writer = StreamWriter::new(options);
        let start = writer.start(1.0, &model_bounds()).finish();
        let chunk = writer
            .raw_tag(3)
            .geometry(&quad_geometry(1, 1, "IfcWall", 1, false))
            .finish();
        let next = writer.geometry(&quad_geometry(2, 1, "IfcWall", 1, false)).end().finish();

        let mut decoder = StreamDecoder::new(options);
        decoder.decode_chunk(&start).unwrap();
        assert!(decoder.decode_chunk(&chunk).unwrap().is_empty());
        assert_eq!(decoder.stats().skipped_chunks, 1);

        // decoding resumes with the next chunk
        let records = decoder.decode_chunk(&next).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], Record::Geometry(g) if g.geometry_id == 2));
    }

    #[test]
    fn test_truncated_geometry_is_out_of_range() {
        let options = WireOptions::default();
        let mut writer = StreamWriter::new(options);
        let start = writer.start(1.0, &model_bounds()).finish();
        let mut chunk = writer.geometry(&quad_geometry(1, 1, "IfcWall", 1, false)).finish();
        chunk.truncate(chunk.len() - 20);

        let mut decoder = StreamDecoder::new(options);
        decoder.decode_chunk(&start).unwrap();
        assert!(matches!(decoder.decode_chunk(&chunk), Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn test_record_after_end_rejected() {
        let options = WireOptions::default();
        let mut writer = StreamWriter::new(options);
        let chunk = writer.start(1.0, &model_bounds()).end().finish();
        let after = writer.end().finish();

        let mut decoder = StreamDecoder::new(options);
        decoder.decode_chunk(&chunk).unwrap();
        assert!(matches!(
            decoder.decode_chunk(&after),
            Err(Error::UnexpectedRecord { state: "ended", .. })
        ));
    }

    #[test]
    fn test_out_of_bounds_index_is_corrupt() {
        let options = WireOptions::default();
        let mut geometry = quad_geometry(1, 1, "IfcWall", 1, false);
        geometry.indices = vec![0, 1, 9];
        let mut writer = StreamWriter::new(options);
        let chunk = writer.start(1.0, &model_bounds()).geometry(&geometry).finish();
        let mut decoder = StreamDecoder::new(options);
        assert!(matches!(decoder.decode_chunk(&chunk), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_object_roundtrip_without_correction() {
        let options = WireOptions::default();
        let matrix = DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0));
        let obj = object(10, 20, matrix);
        let mut writer = StreamWriter::new(options);
        // 0.995 is inside the ±1% band
        let chunk = writer.start(0.995, &model_bounds()).object(&obj).finish();

        let mut decoder = StreamDecoder::new(options);
        let records = decoder.decode_chunk(&chunk).unwrap();
        assert_eq!(records[1], Record::Object(obj));
        assert_eq!(decoder.stats().corrected_objects, 0);
    }

    #[test]
    fn test_unit_scale_correction_identity() {
        let options = WireOptions::default();
        let mut writer = StreamWriter::new(options);
        let chunk = writer
            .start(0.5, &model_bounds())
            .object(&object(1, 2, DMat4::IDENTITY))
            .finish();
        let mut decoder = StreamDecoder::new(options);
        let records = decoder.decode_chunk(&chunk).unwrap();
        match &records[1] {
            Record::Object(o) => assert!(o.matrix.abs_diff_eq(DMat4::IDENTITY, 1e-12)),
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_unit_scale_correction_translation() {
        let options = WireOptions::default();
        let mut writer = StreamWriter::new(options);
        let chunk = writer
            .start(0.5, &model_bounds())
            .object(&object(1, 2, DMat4::from_translation(DVec3::new(10.0, 0.0, 0.0))))
            .finish();
        let mut decoder = StreamDecoder::new(options);
        let records = decoder.decode_chunk(&chunk).unwrap();
        match &records[1] {
            Record::Object(o) => {
                let expected = DMat4::from_translation(DVec3::new(20.0, 0.0, 0.0));
                assert!(o.matrix.abs_diff_eq(expected, 1e-12));
            }
            other => panic!("expected object, got {:?}", other),
        }
        assert_eq!(decoder.stats().corrected_objects, 1);
    }

    #[test]
    fn test_correction_band() {
        assert!(unit_scale_correction(1.0, 0.01).is_none());
        assert!(unit_scale_correction(1.009, 0.01).is_none());
        assert!(unit_scale_correction(1.02, 0.01).is_some());
        assert!(unit_scale_correction(0.001, 0.01).is_some());
        assert!(unit_scale_correction(0.0, 0.01).is_none());
        assert!(unit_scale_correction(-2.0, 0.01).is_none());
        assert!(unit_scale_correction(f32::NAN, 0.01).is_none());
        assert!(unit_scale_correction(f32::INFINITY, 0.01).is_none());
    }

    fn put_str(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn put_f32s(buf: &mut Vec<u8>, values: &[f32]) {
        buf.extend_from_slice(&(values.len() as i32).to_le_bytes());
        for v in values {
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn put_pad(buf: &mut Vec<u8>, n: usize) {
        buf.extend(std::iter::repeat_n(0u8, n));
    }

    const TRIANGLE: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    /// Start, geometry with a color tag and no vertex colors, geometry with
    /// vertex colors, object, end. Offsets are relative to the chunk start.
    fn wire_fixture() -> Vec<u8> {
        let mut b = Vec::new();

        // start: tag, magic, version, unit scale 0.5, pad to 16, bounds
        b.push(0);
        b.extend_from_slice(b"BGS");
        b.push(PROTOCOL_VERSION);
        b.extend_from_slice(&0.5f32.to_le_bytes());
        put_pad(&mut b, 7);
        for v in [-50.0f64, -50.0, -50.0, 50.0, 50.0, 50.0] {
            b.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(b.len(), 64);

        // geometry 11: pad after "IfcWall" is 2 bytes (78 -> 80)
        b.push(1);
        b.extend_from_slice(&2i32.to_le_bytes());
        put_str(&mut b, "IfcWall");
        put_pad(&mut b, 2);
        b.extend_from_slice(&4u64.to_le_bytes());
        b.extend_from_slice(&1u64.to_le_bytes());
        b.extend_from_slice(&11u64.to_le_bytes());
        b.extend_from_slice(&3i32.to_le_bytes());
        for i in [0i32, 1, 2] {
            b.extend_from_slice(&i.to_le_bytes());
        }
        assert_eq!(b.len(), 120);
        b.extend_from_slice(&1i32.to_le_bytes());
        for v in [0.2f32, 0.4, 0.6, 0.5] {
            b.extend_from_slice(&v.to_le_bytes());
        }
        put_f32s(&mut b, &TRIANGLE);
        assert_eq!(b.len(), 180);
        put_pad(&mut b, 4);
        put_f32s(&mut b, &[]);
        put_pad(&mut b, 4);
        put_f32s(&mut b, &[]);
        assert_eq!(b.len(), 196);

        // geometry 12: vertex colors, no color tag; the record ends right
        // after the colors
        b.push(1);
        b.extend_from_slice(&1i32.to_le_bytes());
        put_str(&mut b, "IfcSlab");
        put_pad(&mut b, 6);
        b.extend_from_slice(&4u64.to_le_bytes());
        b.extend_from_slice(&0u64.to_le_bytes());
        b.extend_from_slice(&12u64.to_le_bytes());
        b.extend_from_slice(&3i32.to_le_bytes());
        for i in [2i32, 1, 0] {
            b.extend_from_slice(&i.to_le_bytes());
        }
        b.extend_from_slice(&0i32.to_le_bytes());
        put_f32s(&mut b, &TRIANGLE);
        put_pad(&mut b, 4);
        put_f32s(&mut b, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        assert_eq!(b.len(), 344);
        put_f32s(&mut b, &[1.0; 12]);
        assert_eq!(b.len(), 396);

        // object 5 drawing geometry 11, translated by 10 along x
        b.push(5);
        b.extend_from_slice(&5u64.to_le_bytes());
        put_str(&mut b, "IfcWall");
        put_pad(&mut b, 2);
        b.extend_from_slice(&4u64.to_le_bytes());
        b.extend_from_slice(&500u64.to_le_bytes());
        b.extend_from_slice(&0u64.to_le_bytes());
        for v in [0.0f64, 0.0, 0.0, 1.0, 1.0, 1.0] {
            b.extend_from_slice(&v.to_le_bytes());
        }
        for v in DMat4::from_translation(DVec3::new(10.0, 0.0, 0.0)).to_cols_array() {
            b.extend_from_slice(&v.to_le_bytes());
        }
        b.extend_from_slice(&11u64.to_le_bytes());
        assert_eq!(b.len(), 624);

        b.push(6);
        b
    }

    #[test]
    fn test_decodes_hand_written_fixture() {
        let fixture = wire_fixture();
        let mut decoder = StreamDecoder::new(WireOptions::default());
        let records = decoder.decode_chunk(&fixture).unwrap();
        assert_eq!(records.len(), 5);
        assert!(decoder.is_ended());
        assert!(decoder.corrects_unit_scale());

        match &records[1] {
            Record::Geometry(g) => {
                assert_eq!(g.geometry_id, 11);
                assert_eq!(g.reuse_count, 2);
                assert_eq!(g.owner_revision_id, 4);
                assert!(g.has_transparency);
                assert_eq!(g.color, Some([0.2, 0.4, 0.6, 0.5]));
                assert_eq!(g.positions, Positions::Float(TRIANGLE.to_vec()));
                assert!(g.normals.is_empty());
                assert_eq!(g.colors, None);
            }
            other => panic!("expected geometry, got {:?}", other),
        }
        match &records[2] {
            Record::Geometry(g) => {
                assert_eq!(g.geometry_id, 12);
                assert_eq!(g.type_name, "IfcSlab");
                assert_eq!(g.indices, vec![2, 1, 0]);
                assert_eq!(g.color, None);
                assert_eq!(g.normals.len(), 9);
                assert_eq!(g.colors, Some(vec![1.0; 12]));
            }
            other => panic!("expected geometry, got {:?}", other),
        }
        match &records[3] {
            Record::Object(o) => {
                assert_eq!((o.oid, o.geometry_info_id, o.geometry_data_id), (5, 500, 11));
                // scale 0.5 is outside the band: translation doubles
                let expected = DMat4::from_translation(DVec3::new(20.0, 0.0, 0.0));
                assert!(o.matrix.abs_diff_eq(expected, 1e-12));
            }
            other => panic!("expected object, got {:?}", other),
        }
        assert_eq!(records[4], Record::End);
    }

    #[test]
    fn test_fixture_record_boundaries() {
        let fixture = wire_fixture();
        let options = WireOptions::default();

        // geometry 11 ends at 196 with no trailing padding
        let mut decoder = StreamDecoder::new(options);
        assert_eq!(decoder.decode_chunk(&fixture[..196]).unwrap().len(), 2);
        let mut decoder = StreamDecoder::new(options);
        assert!(matches!(decoder.decode_chunk(&fixture[..195]), Err(Error::OutOfRange { .. })));

        // geometry 12 ends at 396, the object at 624
        let mut decoder = StreamDecoder::new(options);
        assert_eq!(decoder.decode_chunk(&fixture[..396]).unwrap().len(), 3);
        let mut decoder = StreamDecoder::new(options);
        let records = decoder.decode_chunk(&fixture[..624]).unwrap();
        assert_eq!(records.len(), 4);
        assert!(!decoder.is_ended());
    }

    #[test]
    fn test_writer_matches_fixture_layout() {
        let options = WireOptions::default();
        let mut decoder = StreamDecoder::new(options);
        let records = decoder.decode_chunk(&wire_fixture()).unwrap();

        let mut writer = StreamWriter::new(options);
        writer.start(0.5, &model_bounds());
        for record in &records[1..3] {
            if let Record::Geometry(g) = record {
                writer.geometry(g);
            }
        }
        assert_eq!(writer.len(), 396);
        assert_eq!(writer.finish()[..396], wire_fixture()[..396]);
    }
}
