//! Decode a recorded geometry stream and print what it contains.
//!
//! Usage:
//!   cargo run --release --bin stream_inspect -- <file.bgs> [--config loader.json]
//!   cargo run --release --bin stream_inspect -- --demo <out.bgs> [--objects N]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use geostream::assembly::{AssemblerSettings, GeometryAssembler};
use geostream::config::LoaderConfig;
use geostream::core::types::{DVec3, Result};
use geostream::core::{logging, Error};
use geostream::loader::recorded::{encode_recording, load_recording};
use geostream::loader::{CancelToken, LoaderSession};
use geostream::math::{Aabb, QuantizationFrames};
use geostream::protocol::writer::{placed_object, quad_geometry};
use geostream::protocol::{Record, StreamDecoder, StreamWriter};
use geostream::render::upload::{UploadQueue, UploadRequest};

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    parse_str_arg(args, flag).and_then(|s| s.parse().ok())
}

fn main() -> ExitCode {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = if let Some(out) = parse_str_arg(&args, "--demo") {
        let objects = parse_usize_arg(&args, "--objects").unwrap_or(64);
        runtime.block_on(write_demo(Path::new(&out), objects))
    } else if let Some(input) = args.get(1).filter(|a| !a.starts_with("--")) {
        let config = match parse_str_arg(&args, "--config") {
            Some(path) => LoaderConfig::from_json_file(Path::new(&path)),
            None => Ok(LoaderConfig::default()),
        };
        config.and_then(|config| runtime.block_on(inspect(PathBuf::from(input), config)))
    } else {
        eprintln!("Usage: stream_inspect <file.bgs> [--config loader.json]");
        eprintln!("       stream_inspect --demo <out.bgs> [--objects N]");
        return ExitCode::FAILURE;
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Write a synthetic recording: a row of walls sharing one geometry
async fn write_demo(out: &Path, objects: usize) -> Result<()> {
    let config = LoaderConfig::default();
    let bounds = Aabb::new(DVec3::ZERO, DVec3::new(objects as f64 + 1.0, 2.0, 2.0));
    let mut writer = StreamWriter::new(config.wire_options());

    let mut chunks = vec![writer.start(1.0, &bounds).finish()];
    chunks.push(
        writer
            .geometry(&quad_geometry(1, 1, "IfcWall", objects as u32, config.quantize_vertices))
            .finish(),
    );
    for batch in (0..objects).collect::<Vec<_>>().chunks(16) {
        for &i in batch {
            writer.object(&placed_object(i as u64 + 1, 1, "IfcWall", [i as f64, 0.0, 0.0]));
        }
        chunks.push(writer.finish());
    }
    chunks.push(writer.end().finish());

    if let Some(parent) = out.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(out, encode_recording(&chunks)).await?;
    println!("wrote {} chunks ({} objects) to {}", chunks.len(), objects, out.display());
    Ok(())
}

async fn inspect(path: PathBuf, config: LoaderConfig) -> Result<()> {
    let chunks = load_recording(&path).await?;
    let first = chunks.first().ok_or(Error::StreamClosed)?;

    // frames come from the stream header
    let bounds = match StreamDecoder::new(config.wire_options()).decode_chunk(first)?.first() {
        Some(Record::Start(start)) => start.bounds,
        _ => return Err(Error::Corrupt("recording does not begin with a start record".into())),
    };

    let (queue, mut uploads) = UploadQueue::channel();
    let assembler = GeometryAssembler::new(
        Arc::new(AssemblerSettings::from_config(&config)),
        Arc::new(HashSet::new()),
        Arc::new(QuantizationFrames::new(&bounds)),
        queue,
    );
    let decoder = StreamDecoder::with_tolerance(config.wire_options(), config.unit_scale_tolerance);
    let session = LoaderSession::new(0, decoder, assembler);

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let feeder = tokio::spawn(async move {
        for chunk in chunks {
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });
    let output = session.run(rx, &CancelToken::new()).await?;
    let _ = feeder.await;

    let (mut sets, mut instanced, mut bytes) = (0usize, 0usize, 0usize);
    for request in uploads.try_recv_all() {
        match request {
            UploadRequest::BufferSet(set) => {
                sets += 1;
                bytes += set.byte_size();
            }
            UploadRequest::Instanced(geometry) => {
                instanced += 1;
                bytes += geometry.byte_size();
            }
            UploadRequest::Release(_) => {}
        }
    }

    let decode = output.decode;
    let stats = output.assembly.stats;
    println!("=== {} ===", path.display());
    println!("Chunks:      {} ({} bytes, {} skipped)", decode.chunks, decode.bytes, decode.skipped_chunks);
    println!("Geometries:  {}", decode.geometries);
    println!("Objects:     {} ({} unit-scale corrected)", decode.objects, decode.corrected_objects);
    println!("Buffer sets: {}", sets);
    println!("Instanced:   {} ({} instances)", instanced, stats.instances);
    println!("Triangles:   {} visible, {} hidden", stats.visible_triangles, stats.hidden_triangles);
    println!("GPU bytes:   {}", bytes);
    if output.unresolved_objects > 0 || output.late_references > 0 {
        println!(
            "Warnings:    {} unresolved objects, {} late references",
            output.unresolved_objects, output.late_references
        );
    }
    Ok(())
}
