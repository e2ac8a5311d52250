//! Property tests: backends behave like a plain ordered map.

use fieldsync_storage::{FileBackend, InMemoryBackend, StorageBackend, WriteBatch};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Op {
    Put(String, u8),
    Delete(String),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let key = "[a-d]";
    prop_oneof![
        (key, any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
        key.prop_map(Op::Delete),
    ]
}

fn run_ops(backend: &dyn StorageBackend, ops: &[Op]) -> BTreeMap<String, Vec<u8>> {
    let mut model = BTreeMap::new();
    for op in ops {
        match op {
            Op::Put(k, v) => {
                backend.put("t", k, vec![*v]).unwrap();
                model.insert(k.clone(), vec![*v]);
            }
            Op::Delete(k) => {
                backend.delete("t", k).unwrap();
                model.remove(k);
            }
        }
    }
    model
}

proptest! {
    #[test]
    fn memory_matches_model(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let backend = InMemoryBackend::new();
        let model = run_ops(&backend, &ops);
        let scanned: BTreeMap<String, Vec<u8>> = backend.scan("t").unwrap().into_iter().collect();
        prop_assert_eq!(scanned, model);
    }

    #[test]
    fn file_matches_model_after_reopen(ops in prop::collection::vec(op_strategy(), 0..20)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let model = {
            let backend = FileBackend::open(&path).unwrap();
            run_ops(&backend, &ops)
        };
        let reopened = FileBackend::open(&path).unwrap();
        let scanned: BTreeMap<String, Vec<u8>> = reopened.scan("t").unwrap().into_iter().collect();
        prop_assert_eq!(scanned, model);
    }

    #[test]
    fn rejected_batch_changes_nothing(ops in prop::collection::vec(op_strategy(), 0..20)) {
        let backend = InMemoryBackend::new();
        let model = run_ops(&backend, &ops);

        let mut batch = WriteBatch::new();
        batch.expect("t", "zz", Some(vec![1])).put("t", "a", vec![42]).clear("t");
        prop_assert!(!backend.apply(batch).unwrap());

        let scanned: BTreeMap<String, Vec<u8>> = backend.scan("t").unwrap().into_iter().collect();
        prop_assert_eq!(scanned, model);
    }
}
