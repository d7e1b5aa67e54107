//! Integration tests for mergeable stores and their synchronization

use pretty_assertions::assert_eq;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use synapsed_tablestore::*;

const EPOCH_2024: u64 = 1_704_067_200_000;

fn replica(client: &str, time: &Arc<ManualTimeSource>) -> MergeableStore {
    MergeableStore::with_time_source(Some(client), time.clone())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_fixed_clock_stamps_and_hashes() {
    let time = Arc::new(ManualTimeSource::new(EPOCH_2024));
    let mut store = replica("s1", &time);
    store.transaction(|store| {
        store.set_cell("t1", "r1", "c1", 1).set_value("v1", 1);
    });

    let MergeableContent(tables, values) = store.get_mergeable_content();
    let cell = &tables.value["t1"].value["r1"].value["c1"];
    assert_eq!(cell.hlc.as_str(), "Nn1JUF-----7JQY8");
    assert_eq!(cell.hash, Some(1_003_668_370));
    assert_eq!(tables.value["t1"].value["r1"].hash, Some(550_994_372));
    assert_eq!(tables.value["t1"].hash, Some(2_072_644_152));
    assert_eq!(tables.hash, Some(2_620_672_689));
    assert_eq!(tables.hlc.as_str(), "Nn1JUF-----7JQY8");

    let value = &values.value["v1"];
    assert_eq!(value.hlc.as_str(), "Nn1JUF----07JQY8");
    assert_eq!(value.hash, Some(1_130_939_691));
    assert_eq!(values.hash, Some(3_877_632_732));

    assert_eq!(
        serde_json::to_string(&store.get_mergeable_content()).unwrap(),
        concat!(
            r#"[[{"t1":[{"r1":[{"c1":[1,"Nn1JUF-----7JQY8",1003668370]},"Nn1JUF-----7JQY8",550994372]},"#,
            r#""Nn1JUF-----7JQY8",2072644152]},"Nn1JUF-----7JQY8",2620672689],"#,
            r#"[{"v1":[1,"Nn1JUF----07JQY8",1130939691]},"Nn1JUF----07JQY8",3877632732]]"#
        )
    );
}

#[test]
fn test_two_stores_converge_on_one_row() {
    init_tracing();
    let time = Arc::new(ManualTimeSource::new(EPOCH_2024));
    let mut store1 = replica("s1", &time);
    let mut store2 = replica("s2", &time);

    store1.set_cell("pets", "fido", "species", "dog");
    time.advance(1);
    store2.set_cell("pets", "fido", "color", "brown");

    store1.merge(&mut store2);

    let expected: Row = [
        ("species".to_string(), Value::from("dog")),
        ("color".to_string(), Value::from("brown")),
    ]
    .into_iter()
    .collect();
    assert_eq!(store1.get_row("pets", "fido"), expected);
    assert_eq!(store2.get_row("pets", "fido").len(), 2);
    assert_eq!(store1.get_mergeable_content(), store2.get_mergeable_content());
}

#[test]
fn test_ten_replicas_converge_on_greatest_hlc() {
    let time = Arc::new(ManualTimeSource::new(EPOCH_2024));
    let mut replicas: Vec<MergeableStore> = (0..10).map(|i| replica(&format!("replica-{i}"), &time)).collect();

    let mut winner = (Hlc::empty(), None);
    for (i, store) in replicas.iter_mut().enumerate() {
        store.set_cell("t", "r", "c", i as i32);
        let MergeableContent(tables, _) = store.get_mergeable_content();
        let hlc = tables.value["t"].value["r"].value["c"].hlc.clone();
        if hlc > winner.0 {
            winner = (hlc, Some(Value::from(i as i32)));
        }
    }

    let mut sync = DiffSync::new();
    for i in (0..10).rev() {
        for j in 0..i {
            let (left, right) = replicas.split_at_mut(i);
            sync.synchronize(&mut left[j], &mut right[0]);
        }
    }
    for store in &replicas {
        assert_eq!(store.get_cell("t", "r", "c"), winner.1);
    }
    let hashes = replicas[0].get_mergeable_content_hashes();
    assert!(replicas.iter().all(|store| store.get_mergeable_content_hashes() == hashes));
}

#[test]
fn test_later_write_wins_regardless_of_merge_order() {
    let time = Arc::new(ManualTimeSource::new(EPOCH_2024));
    let mut early = replica("early", &time);
    let mut late = replica("late", &time);
    early.set_value("status", "draft");
    time.advance(5);
    late.set_value("status", "published");

    let mut forward = replica("observer-1", &time);
    forward.apply_mergeable_changes(early.get_mergeable_content().into());
    forward.apply_mergeable_changes(late.get_mergeable_content().into());

    let mut backward = replica("observer-2", &time);
    backward.apply_mergeable_changes(late.get_mergeable_content().into());
    backward.apply_mergeable_changes(early.get_mergeable_content().into());

    assert_eq!(forward.get_value("status"), Some(Value::from("published")));
    assert_eq!(backward.get_value("status"), Some(Value::from("published")));
}

#[test]
fn test_deletes_propagate() {
    let time = Arc::new(ManualTimeSource::new(EPOCH_2024));
    let mut a = replica("a", &time);
    let mut b = replica("b", &time);
    a.set_cell("t", "r", "c", 1);
    a.merge(&mut b);
    assert!(b.has_row("t", "r"));

    time.advance(1);
    b.del_row("t", "r");
    b.merge(&mut a);
    assert!(!a.has_table("t"));
    assert_eq!(a.get_mergeable_content_hashes(), b.get_mergeable_content_hashes());
}

#[test]
fn test_transaction_mergeable_changes() {
    let time = Arc::new(ManualTimeSource::new(EPOCH_2024));
    let mut store = replica("s1", &time);
    store.set_cell("t1", "r1", "c1", 1);
    store.transaction(|store| {
        store.set_cell("t1", "r2", "c1", 2).set_value("v1", true);
    });

    let changes = store.get_transaction_mergeable_changes();
    let rows = &changes.tables.value["t1"].value;
    assert_eq!(rows.keys().collect::<Vec<_>>(), vec!["r2"]);
    assert_eq!(changes.values.value["v1"].value, Some(Value::from(true)));

    let wire = serde_json::to_value(&changes).unwrap();
    assert_eq!(wire[2], serde_json::json!(1));
    let back: MergeableChanges = serde_json::from_value(wire).unwrap();
    assert_eq!(back, changes);
}

#[test]
fn test_merges_notify_listeners_of_the_receiver() {
    let time = Arc::new(ManualTimeSource::new(EPOCH_2024));
    let mut source = replica("source", &time);
    let mut target = replica("target", &time);
    let calls = Arc::new(AtomicUsize::new(0));
    let inner = calls.clone();
    target.add_cell_listener(
        Some("t"),
        None,
        None,
        move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
        },
        false,
    );

    source.set_cell("t", "r1", "c", 1).set_cell("t", "r2", "c", 2);
    target.apply_mergeable_changes(source.get_mergeable_content().into());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Nothing new, nothing fires
    target.apply_mergeable_changes(source.get_mergeable_content().into());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_mutator_writes_during_merge_are_stamped() {
    let time = Arc::new(ManualTimeSource::new(EPOCH_2024));
    let mut source = replica("source", &time);
    let mut target = replica("target", &time);
    target.add_cell_listener(
        Some("t"),
        None,
        Some("c"),
        |store, event| {
            if let ListenerEvent::Cell { row_id, .. } = event {
                let row_id = row_id.to_string();
                store.set_cell("t", &row_id, "seen", true);
            }
        },
        true,
    );

    source.set_cell("t", "r", "c", 1);
    target.apply_mergeable_changes(source.get_mergeable_content().into());
    assert_eq!(target.get_cell("t", "r", "seen"), Some(Value::from(true)));

    // The mutator's write is a local write, stamped and replicated like any other
    let MergeableContent(tables, _) = target.get_mergeable_content();
    assert!(tables.value["t"].value["r"].value["seen"].hlc.as_str().ends_with(&target.client_part()));
    source.merge(&mut target);
    assert_eq!(source.get_cell("t", "r", "seen"), Some(Value::from(true)));
    assert_eq!(source.get_mergeable_content_hashes(), target.get_mergeable_content_hashes());
}

#[test]
fn test_content_survives_json() {
    let time = Arc::new(ManualTimeSource::new(EPOCH_2024));
    let mut source = replica("source", &time);
    source.set_cell("t", "r", "c", 1.5).set_value("v", "x").del_value("v", false);

    let json = serde_json::to_string(&source.get_mergeable_content()).unwrap();
    let content: MergeableContent = serde_json::from_str(&json).unwrap();

    let mut copy = replica("copy", &time);
    copy.set_mergeable_content(content);
    assert_eq!(copy.get_content(), source.get_content());
    assert_eq!(copy.get_mergeable_content_hashes(), source.get_mergeable_content_hashes());
}

#[test]
fn test_config_seeds_client_part() {
    let config: MergeableConfig = serde_json::from_str(r#"{"client_id": "s1"}"#).unwrap();
    let from_config = MergeableStore::with_config(config);
    let from_id = MergeableStore::new(Some("s1"));
    assert_eq!(from_config.client_part(), from_id.client_part());
    assert_eq!(from_config.client_part(), "7JQY8");
}

#[test]
fn test_conforming_schema_keeps_stamps() {
    let time = Arc::new(ManualTimeSource::new(EPOCH_2024));
    let mut store = replica("s1", &time);
    store
        .set_cell("t", "r1", "c", 1)
        .set_cell("t", "r2", "c", 2)
        .set_cell("t", "r2", "extra", "x")
        .set_value("v", 1);
    let MergeableContent(before, before_values) = store.get_mergeable_content();
    time.advance(1_000);

    store.set_schema(
        TablesSchema::from([(
            "t".to_string(),
            [("c".to_string(), CellSchema::new(ValueType::Number))].into_iter().collect(),
        )]),
        ValuesSchema::from([("v".to_string(), CellSchema::new(ValueType::Number))]),
    );

    let MergeableContent(after, after_values) = store.get_mergeable_content();
    assert_eq!(after.value["t"].value["r1"], before.value["t"].value["r1"]);
    assert_eq!(after.value["t"].value["r2"].value["c"], before.value["t"].value["r2"].value["c"]);
    assert_eq!(after_values, before_values);

    // Only the cell the schema rejects gets a new stamp
    let extra = &after.value["t"].value["r2"].value["extra"];
    assert_eq!(extra.value, None);
    assert!(extra.hlc > before.value["t"].value["r2"].value["extra"].hlc);
}
