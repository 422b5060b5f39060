//! Packed bundle round-trip tests
//!
//! Import, close, reopen and read back, including the in-place reuse and
//! append-on-growth layout rules.

use asset_bundle::packed::{Header, HEADER_SIZE};
use asset_bundle::{
    calc_bundle_checksum, is_bundle_corrupted, AssetAttributes, AssetBundle, BundleError,
    ImportOptions, OpenMode, PackedBundle,
};
use chrono::{TimeZone, Utc};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn scratch(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(name);
    (dir, path)
}

fn header_of(path: &Path) -> Header {
    let bytes = fs::read(path).unwrap();
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&bytes[..HEADER_SIZE]);
    Header::from_bytes(&raw)
}

/// Bytes one index record takes on disk
fn record_size(name: &str, sha1_len: usize, extension: &str) -> u64 {
    (1 + name.len() + 8 + 2 + sha1_len + 16 + 1 + extension.len()) as u64
}

fn sample(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[test]
fn test_round_trip_all_compression_modes() {
    let (_dir, path) = scratch("modes.bundle");
    let text = b"the quick brown fox jumps over the lazy dog ".repeat(200);
    let modes = [
        ("plain.txt", AssetAttributes::NONE),
        ("deflate.txt", AssetAttributes::ZIPPED_DEFLATE),
        ("lzma.txt", AssetAttributes::ZIPPED_LZMA),
        (
            "texture.dds",
            AssetAttributes::ZIPPED_DEFLATE | AssetAttributes::NON_POWER_OF_2_TEXTURE,
        ),
    ];

    let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
    for (name, attributes) in modes {
        bundle
            .import_file(
                name,
                &mut &text[..],
                &ImportOptions::new().attributes(attributes),
            )
            .unwrap();
    }
    assert!(bundle.file_size("deflate.txt").unwrap() < text.len() as u64);
    assert_eq!(bundle.file_size("plain.txt").unwrap(), text.len() as u64);
    bundle.close().unwrap();

    let bundle = PackedBundle::open(&path, OpenMode::ReadOnly).unwrap();
    for (name, attributes) in modes {
        assert_eq!(bundle.read_file(name).unwrap(), text, "{}", name);
        assert_eq!(bundle.attributes(name).unwrap(), attributes);
    }
}

#[test]
fn test_metadata_survives_reopen() {
    let (_dir, path) = scratch("meta.bundle");
    let time = Utc.with_ymd_and_hms(2021, 3, 14, 15, 9, 26).unwrap()
        + chrono::Duration::nanoseconds(535_897_932);
    let sha1 = vec![0xAB; 20];

    let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
    bundle
        .import_file(
            "Models/Ship.mesh",
            &mut &b"mesh"[..],
            &ImportOptions::new()
                .time(time)
                .cooking_rules_sha1(sha1.clone())
                .source_extension(".fbx"),
        )
        .unwrap();
    let written_time = bundle.file_last_write_time("models/ship.mesh").unwrap();
    // Sub-tick precision is dropped on import
    assert_eq!(written_time.timestamp_subsec_nanos(), 535_897_900);
    bundle.close().unwrap();

    let bundle = PackedBundle::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(bundle.file_last_write_time("MODELS\\SHIP.MESH").unwrap(), written_time);
    assert_eq!(bundle.cooking_rules_sha1("models/ship.mesh").unwrap(), Some(sha1));
    assert_eq!(bundle.descriptor("models/ship.mesh").unwrap().source_extension, ".fbx");
    // Enumeration reports the path as it was imported
    let names: Vec<String> = bundle.enumerate_files(None).collect();
    assert_eq!(names, vec!["Models/Ship.mesh"]);
}

#[test]
fn test_reuse_then_append_scenario() {
    let (_dir, path) = scratch("scenario.bundle");
    let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
    let options = ImportOptions::new().reserve(100);

    bundle.import_file("img/a.png", &mut &sample(50, 1)[..], &options).unwrap();
    let d = bundle.descriptor("img/a.png").unwrap().clone();
    assert_eq!((d.offset, d.length, d.allocated_size), (16, 50, 150));
    assert_eq!(bundle.index_offset(), 166);

    // 80 <= 150 <= 180: rewritten in place
    bundle.import_file("img/a.png", &mut &sample(80, 2)[..], &options).unwrap();
    let d = bundle.descriptor("img/a.png").unwrap().clone();
    assert_eq!((d.offset, d.length, d.allocated_size), (16, 80, 150));
    assert_eq!(bundle.index_offset(), 166);
    assert_eq!(bundle.pending_reclaim(), 0);

    let raw = fs::read(&path).unwrap();
    assert!(raw[96..166].iter().all(|&b| b == 0), "slack must be zeroed");
    assert_eq!(bundle.read_file("img/a.png").unwrap(), sample(80, 2));

    // 150 is outside [400, 500]: old span trashed, new one appended
    bundle.import_file("img/a.png", &mut &sample(400, 3)[..], &options).unwrap();
    let d = bundle.descriptor("img/a.png").unwrap().clone();
    assert_eq!((d.offset, d.length, d.allocated_size), (166, 400, 500));
    assert_eq!(bundle.index_offset(), 666);
    assert_eq!(bundle.pending_reclaim(), 1);
    bundle.close().unwrap();

    let bundle = PackedBundle::open(&path, OpenMode::ReadOnly).unwrap();
    let d = bundle.descriptor("img/a.png").unwrap();
    assert_eq!(d.offset, 16);
    assert_eq!(bundle.index_offset(), 516);
    assert_eq!(bundle.read_file("img/a.png").unwrap(), sample(400, 3));

    let file_len = fs::metadata(&path).unwrap().len();
    assert_eq!(file_len, 516 + 4 + record_size("img/a.png", 0, ""));
}

#[test]
fn test_reopen_without_changes_is_idempotent() {
    let (_dir, path) = scratch("idempotent.bundle");
    let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
    for i in 0..10 {
        bundle
            .import_file(
                &format!("data/{}.bin", i),
                &mut &sample(100 + i, i as u8)[..],
                &ImportOptions::new().reserve(16),
            )
            .unwrap();
    }
    bundle.close().unwrap();
    let before = fs::read(&path).unwrap();
    let checksum = calc_bundle_checksum(&path).unwrap();

    let first = PackedBundle::open(&path, OpenMode::ReadOnly).unwrap();
    let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
    assert!(!bundle.is_modified());
    for name in first.enumerate_files(None) {
        assert_eq!(first.descriptor(&name).unwrap(), bundle.descriptor(&name).unwrap());
    }
    bundle.close().unwrap();

    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(calc_bundle_checksum(&path).unwrap(), checksum);
    assert_eq!(header_of(&path).checksum, checksum);
    assert!(!is_bundle_corrupted(&path).unwrap());
}

#[test]
fn test_raw_stream_is_bounded() {
    let (_dir, path) = scratch("raw.bundle");
    let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
    bundle.import_file("a", &mut &b"AAAA"[..], &ImportOptions::new().reserve(4)).unwrap();
    bundle.import_file("b", &mut &b"BBBBBBBB"[..], &ImportOptions::new()).unwrap();
    bundle.close().unwrap();

    let bundle = PackedBundle::open(&path, OpenMode::ReadOnly).unwrap();
    let mut stream = bundle.open_raw("a").unwrap();
    assert_eq!(stream.len(), 4);
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"AAAA");

    assert_eq!(stream.seek(SeekFrom::End(-2)).unwrap(), 2);
    let mut tail = String::new();
    stream.read_to_string(&mut tail).unwrap();
    assert_eq!(tail, "AA");
}

#[test]
fn test_missing_asset_is_not_found() {
    let (_dir, path) = scratch("missing.bundle");
    let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
    assert!(!bundle.file_exists("nope"));
    assert!(matches!(bundle.open_file("nope"), Err(BundleError::NotFound(_))));
    assert!(matches!(bundle.delete_file("nope"), Err(BundleError::NotFound(_))));
    assert!(matches!(bundle.file_size("nope"), Err(BundleError::NotFound(_))));
}

#[test]
fn test_unmodified_new_bundle_stays_empty() {
    let (_dir, path) = scratch("empty.bundle");
    PackedBundle::open(&path, OpenMode::Writable).unwrap().close().unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);

    let bundle = PackedBundle::open(&path, OpenMode::ReadOnly).unwrap();
    assert!(bundle.is_empty());
    assert_eq!(bundle.enumerate_files(None).count(), 0);
}

#[test]
fn test_import_from_path_uses_file_time() {
    let (dir, path) = scratch("from-path.bundle");
    let source = dir.path().join("logo.png");
    fs::write(&source, b"png").unwrap();
    let expected: chrono::DateTime<Utc> = fs::metadata(&source).unwrap().modified().unwrap().into();

    let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
    bundle
        .import_file_from_path(&source, "ui/logo.png", &ImportOptions::new())
        .unwrap();
    let stored = bundle.file_last_write_time("ui/logo.png").unwrap();
    assert_eq!(stored.timestamp(), expected.timestamp());
    assert_eq!(bundle.read_file("ui/logo.png").unwrap(), b"png");
}

#[test]
fn test_drop_flushes_changes() {
    let (_dir, path) = scratch("drop.bundle");
    {
        let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
        bundle.import_file("kept", &mut &b"data"[..], &ImportOptions::new()).unwrap();
    }
    let bundle = PackedBundle::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(bundle.read_file("kept").unwrap(), b"data");
    assert!(!is_bundle_corrupted(&path).unwrap());
}
