//! Binary geometry stream protocol: cursor, records, decoder and writer

pub mod cursor;
pub mod record;
pub mod decoder;
pub mod writer;
pub mod colors;

pub use cursor::ByteCursor;
pub use record::{
    GeometryPayload, Normals, ObjectData, Positions, Record, RecordTag, StartRecord, WireOptions,
    MAGIC, PROTOCOL_VERSION,
};
pub use decoder::{DecodeStats, DecoderState, StreamDecoder};
pub use writer::StreamWriter;
pub use colors::ColorPolicy;
