// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Model-based checks for keyed arrays and ordered transforms: the array
//! must behave exactly like a naive ordered vector of unique keys.

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use grove_tree::{apply_ops, KeyPath, KeyedArray, Props, SegPath, TreeOp};
use proptest::prelude::*;
use proptest::test_runner::{Config as PropConfig, RngAlgorithm, TestRng, TestRunner};
use serde_json::json;

#[derive(Clone, Debug)]
enum ArrayOp {
    Push(u8),
    Remove(u8),
}

fn ops_strategy() -> impl Strategy<Value = Vec<ArrayOp>> {
    prop::collection::vec(
        (any::<bool>(), 0u8..16).prop_map(|(push, key)| {
            if push {
                ArrayOp::Push(key)
            } else {
                ArrayOp::Remove(key)
            }
        }),
        0..64,
    )
}

const SEED_BYTES: [u8; 32] = [
    0x74, 0x72, 0x65, 0x65, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0,
];

fn pinned_runner() -> TestRunner {
    let rng = TestRng::from_seed(RngAlgorithm::ChaCha, &SEED_BYTES);
    TestRunner::new_with_rng(PropConfig::with_cases(128), rng)
}

#[test]
fn keyed_array_matches_a_naive_ordered_model() {
    let mut runner = pinned_runner();
    runner
        .run(&ops_strategy(), |ops| {
            let mut array = KeyedArray::new();
            let mut model: Vec<String> = Vec::new();
            for op in &ops {
                match op {
                    ArrayOp::Push(key) => {
                        let key = format!("k{key}");
                        let accepted = array.push(
                            key.as_str().into(),
                            Props::from_value(&json!({"k": key})).unwrap(),
                        );
                        let expected = !model.contains(&key);
                        prop_assert_eq!(accepted, expected);
                        if expected {
                            model.push(key);
                        }
                    }
                    ArrayOp::Remove(key) => {
                        let key = format!("k{key}");
                        let removed = array.remove(&key.as_str().into()).is_some();
                        let expected = model.contains(&key);
                        prop_assert_eq!(removed, expected);
                        model.retain(|existing| existing != &key);
                    }
                }
            }
            let keys: Vec<String> = array
                .rows()
                .iter()
                .map(|row| row.key.as_str().to_string())
                .collect();
            prop_assert_eq!(&keys, &model);
            // The maintained index agrees with positions after any history.
            for (at, key) in model.iter().enumerate() {
                prop_assert_eq!(array.position(&key.as_str().into()), Some(at));
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn transform_batches_behave_like_sequential_application() {
    let mut runner = pinned_runner();
    let strategy = prop::collection::vec((0u8..8, 0u8..4, any::<bool>()), 1..32);
    runner
        .run(&strategy, |rows| {
            // One batch with interleaved adds/removes must equal applying
            // each op in its own batch.
            let ops: Vec<TreeOp> = rows
                .iter()
                .enumerate()
                .flat_map(|(index, (parent, child, and_remove))| {
                    let parent_key = format!("p{parent}");
                    let child_key = format!("c{index}_{child}");
                    let mut ops = vec![
                        TreeOp::Add {
                            path: SegPath::root(),
                            keys: KeyPath::root(),
                            key: parent_key.as_str().into(),
                            props: Props::new(),
                        },
                        TreeOp::Add {
                            path: SegPath::new(["children"]),
                            keys: KeyPath::new([parent_key.as_str()]),
                            key: child_key.as_str().into(),
                            props: Props::from_value(&json!({"n": index})).unwrap(),
                        },
                    ];
                    if *and_remove {
                        ops.push(TreeOp::Remove {
                            path: SegPath::new(["children"]),
                            keys: KeyPath::new([parent_key.as_str()]),
                            key: child_key.as_str().into(),
                        });
                    }
                    ops
                })
                .collect();

            // Root adds collide for repeated parents; drop duplicates the way
            // the engine would never produce them in the first place.
            let mut seen_roots = std::collections::HashSet::new();
            let ops: Vec<TreeOp> = ops
                .into_iter()
                .filter(|op| match op {
                    TreeOp::Add { path, key, .. } if path.is_root() => {
                        seen_roots.insert(key.clone())
                    }
                    _ => true,
                })
                .collect();

            let batched = apply_ops(KeyedArray::new(), &ops).unwrap();
            let mut sequential = KeyedArray::new();
            for op in &ops {
                sequential = apply_ops(sequential, std::slice::from_ref(op)).unwrap();
            }
            prop_assert_eq!(batched.to_value(), sequential.to_value());
            Ok(())
        })
        .unwrap();
}
