//! Property-based tests for bundle layout and content
//!
//! Random import/delete sequences are checked against an in-memory model.

use asset_bundle::packed::index::{encode_index, Index, IndexEntry};
use asset_bundle::packed::HEADER_SIZE;
use asset_bundle::path::index_key;
use asset_bundle::{
    is_bundle_corrupted, AssetAttributes, AssetBundle, BundleError, ImportOptions, OpenMode,
    PackedBundle,
};
use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Op {
    Import {
        slot: usize,
        len: usize,
        fill: u8,
        reserve: u32,
        deflate: bool,
    },
    Delete {
        slot: usize,
    },
    Reopen,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..6, 0usize..1500, any::<u8>(), 0u32..400, any::<bool>()).prop_map(
            |(slot, len, fill, reserve, deflate)| Op::Import { slot, len, fill, reserve, deflate }
        ),
        2 => (0usize..6).prop_map(|slot| Op::Delete { slot }),
        1 => Just(Op::Reopen),
    ]
}

fn name(slot: usize) -> String {
    format!("Slot/{}.bin", slot)
}

fn content(len: usize, fill: u8) -> Vec<u8> {
    (0..len).map(|i| fill.wrapping_add((i / 7) as u8)).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_bundle_matches_model(ops in prop::collection::vec(op(), 1..40)) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prop.bundle");
        let mut model: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();

        for op in ops {
            match op {
                Op::Import { slot, len, fill, reserve, deflate } => {
                    let data = content(len, fill);
                    let attributes = if deflate {
                        AssetAttributes::ZIPPED_DEFLATE
                    } else {
                        AssetAttributes::NONE
                    };
                    bundle.import_file(
                        &name(slot),
                        &mut &data[..],
                        &ImportOptions::new().reserve(reserve).attributes(attributes),
                    ).unwrap();
                    model.insert(name(slot), data);
                }
                Op::Delete { slot } => {
                    let result = bundle.delete_file(&name(slot));
                    if model.remove(&name(slot)).is_some() {
                        prop_assert!(result.is_ok());
                    } else {
                        prop_assert!(matches!(result, Err(BundleError::NotFound(_))));
                    }
                }
                Op::Reopen => {
                    bundle.close().unwrap();
                    bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
                }
            }
        }
        bundle.close().unwrap();

        let bundle = PackedBundle::open(&path, OpenMode::ReadOnly).unwrap();
        let names: Vec<String> = bundle.enumerate_files(None).collect();
        prop_assert_eq!(names.len(), model.len());
        for (path_name, data) in &model {
            prop_assert_eq!(&bundle.read_file(path_name).unwrap(), data);
        }

        if model.is_empty() && bundle.index_offset() as usize == HEADER_SIZE {
            // Either never written or fully compacted
            let len = std::fs::metadata(&path).unwrap().len() as usize;
            prop_assert!(len == 0 || len == HEADER_SIZE + 4);
        } else {
            let index_offset = bundle.index_offset() as u64;
            let mut index = Index::new();
            let mut spans = Vec::new();
            for n in names {
                let d = bundle.descriptor(&n).unwrap().clone();
                prop_assert!(d.offset as usize >= HEADER_SIZE);
                prop_assert!(d.end() <= index_offset);
                prop_assert!(d.length <= d.allocated_size);
                spans.push((d.offset as u64, d.end()));
                index.insert(index_key(&n), IndexEntry { name: n, descriptor: d });
            }
            spans.sort_unstable();
            for pair in spans.windows(2) {
                prop_assert!(pair[0].1 <= pair[1].0);
            }
            let file_len = std::fs::metadata(&path).unwrap().len();
            prop_assert_eq!(file_len, index_offset + encode_index(&index).unwrap().len() as u64);
            prop_assert!(!is_bundle_corrupted(&path).unwrap());
        }
    }

    #[test]
    fn prop_in_place_reuse_window(
        first in 1usize..500,
        second in 1usize..500,
        reserve in 0u32..300,
    ) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reuse.bundle");
        let mut bundle = PackedBundle::open(&path, OpenMode::Writable).unwrap();
        let options = ImportOptions::new().reserve(reserve);

        bundle.import_file("a", &mut &vec![1u8; first][..], &options).unwrap();
        let before = bundle.descriptor("a").unwrap().clone();
        let index_offset = bundle.index_offset();

        bundle.import_file("a", &mut &vec![2u8; second][..], &options).unwrap();
        let after = bundle.descriptor("a").unwrap().clone();

        let allocated = before.allocated_size as usize;
        let reusable = allocated >= second && allocated <= second + reserve as usize;
        if reusable {
            prop_assert_eq!(after.offset, before.offset);
            prop_assert_eq!(bundle.index_offset(), index_offset);
            prop_assert_eq!(bundle.pending_reclaim(), 0);
        } else {
            prop_assert_eq!(after.offset, index_offset);
            prop_assert_eq!(bundle.pending_reclaim(), 1);
        }
        prop_assert_eq!(bundle.read_file("a").unwrap(), vec![2u8; second]);
    }
}
