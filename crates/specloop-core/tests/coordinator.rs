//! Coordinator routing: manual switch, serialized iterate, batch fan-out.

use std::sync::Arc;

use serde_json::json;
use specloop_core::{
    AgentCoordinator, BatchItem, ChangeKind, Generator, RefinementConfig, RuleBasedBackend, SessionStatus,
    SpecloopError,
};
use specloop_state::fakes::MemorySpecStore;
use specloop_state::{
    DesignObject, Dimensions, IterationId, IterationKind, MaterialProperties, Position, SpecId, SpecStore, Specification,
};

fn object(id: &str, material: &str, dims: Dimensions) -> DesignObject {
    let (object_type, _) = DesignObject::parse_id(id).unwrap();
    DesignObject {
        object_id: id.to_string(),
        object_type: object_type.to_string(),
        material: MaterialProperties::of_type(material),
        position: Position::default(),
        dimensions: dims,
        rotation: None,
        metadata: Default::default(),
        editable: true,
    }
}

fn lobby(spec_id: &str) -> Specification {
    let mut spec = Specification::new(SpecId::from(spec_id));
    spec.objects = vec![
        object("floor_1", "wood", Dimensions::meters(6.0, 5.0, 0.02)),
        object("wall_1", "plaster", Dimensions::meters(6.0, 0.15, 2.8)),
        object("chair_1", "wood", Dimensions::meters(0.5, 0.5, 1.6)),
    ];
    spec.scene_metadata.insert("design_type".into(), json!("lobby"));
    spec.scene_metadata.insert("category".into(), json!("interior"));
    spec.sync_id_counters();
    spec
}

fn coordinator(store: Arc<MemorySpecStore>, config: RefinementConfig) -> Arc<AgentCoordinator> {
    let generator = Arc::new(Generator::new(Arc::new(RuleBasedBackend::new())));
    Arc::new(AgentCoordinator::new(generator, store, config).unwrap())
}

#[tokio::test]
async fn test_switch_floor_material_is_one_change_and_one_record() {
    let store = Arc::new(MemorySpecStore::new());
    let spec = lobby("spec_switch");
    store.put_spec(&spec.spec_id, &spec).await.unwrap();
    let coord = coordinator(store.clone(), RefinementConfig::default());

    let out = coord.switch_material(&spec.spec_id, "floor_1", "marble").await.unwrap();

    assert!(!out.degraded);
    assert!(out.history_complete);
    assert_eq!(out.changes.len(), 1);
    let change = &out.changes.changes[0];
    assert_eq!(change.object_id, "floor_1");
    assert_eq!(change.field, "material.type");
    assert_eq!(change.kind, ChangeKind::Modified);
    assert_eq!(change.before, json!("wood"));
    assert_eq!(change.after, json!("marble"));

    let history = coord.history(&spec.spec_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, IterationKind::ManualSwitch);
    assert_eq!(history[0].score, None);
    assert_eq!(history[0].iter_id, out.iteration_id);
    assert_eq!(history[0].before_spec.as_ref(), Some(&spec));

    let stored = coord.get_spec(&spec.spec_id).await.unwrap();
    assert_eq!(stored.object("floor_1").unwrap().material.material_type, "marble");
    assert_eq!(stored.object("wall_1"), spec.object("wall_1"));
}

#[tokio::test]
async fn test_switch_validates_target_before_generating() {
    let store = Arc::new(MemorySpecStore::new());
    let spec = lobby("spec_switch_missing");
    store.put_spec(&spec.spec_id, &spec).await.unwrap();
    let coord = coordinator(store.clone(), RefinementConfig::default());

    let err = coord
        .switch_material(&spec.spec_id, "sofa_3", "leather")
        .await
        .unwrap_err();
    assert!(matches!(err, SpecloopError::ObjectNotFound { .. }));
    assert_eq!(store.iteration_count(), 0);
}

#[tokio::test]
async fn test_iterate_unknown_spec_is_not_found() {
    let coord = coordinator(Arc::new(MemorySpecStore::new()), RefinementConfig::default());
    let err = coord.iterate(&SpecId::from("spec_nowhere"), None).await.unwrap_err();
    assert!(matches!(err, SpecloopError::NotFound { ref spec_id } if spec_id == "spec_nowhere"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_iterates_on_one_spec_are_serialized() {
    let store = Arc::new(MemorySpecStore::new());
    let spec = lobby("spec_concurrent");
    store.put_spec(&spec.spec_id, &spec).await.unwrap();
    let config = RefinementConfig {
        max_rounds: 2,
        convergence_threshold: 0.99,
        ..RefinementConfig::default()
    };
    let coord = coordinator(store.clone(), config);

    let (a, b) = tokio::join!(
        {
            let coord = Arc::clone(&coord);
            let id = spec.spec_id.clone();
            async move { coord.iterate(&id, Some("set chair_1.dimensions.height to 0.9")).await }
        },
        {
            let coord = Arc::clone(&coord);
            let id = spec.spec_id.clone();
            async move { coord.iterate(&id, Some("set floor_1.material.type to marble")).await }
        }
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(!a.history.is_empty());
    assert!(!b.history.is_empty());

    let stored = coord.history(&spec.spec_id).await.unwrap();
    assert_eq!(stored.len(), a.history.len() + b.history.len());

    // One session's records form a contiguous block ahead of the other's.
    let position = |iter_id: &IterationId| stored.iter().position(|r| &r.iter_id == iter_id).unwrap();
    let (first, second) = if position(&a.history[0].iter_id) < position(&b.history[0].iter_id) {
        (a, b)
    } else {
        (b, a)
    };
    let ids: Vec<_> = stored.iter().map(|r| r.iter_id.clone()).collect();
    let expected: Vec<_> = first
        .history
        .iter()
        .chain(second.history.iter())
        .map(|r| r.iter_id.clone())
        .collect();
    assert_eq!(ids, expected);

    // The second session started from what the first one left behind.
    assert_eq!(second.history[0].before_spec.as_ref(), first.best_spec.as_ref());

    // Within a session, each round revises the previous round's result.
    for session in [&first, &second] {
        for pair in session.history.windows(2) {
            assert_eq!(pair[1].before_spec.as_ref(), Some(&pair[0].after_spec));
        }
    }
}

#[tokio::test]
async fn test_batch_isolates_items_and_keeps_input_order() {
    let store = Arc::new(MemorySpecStore::new());
    let spec = lobby("spec_batch");
    store.put_spec(&spec.spec_id, &spec).await.unwrap();
    let config = RefinementConfig {
        batch_concurrency_limit: 2,
        max_rounds: 1,
        ..RefinementConfig::default()
    };
    let coord = coordinator(store.clone(), config);

    let items = vec![
        BatchItem::Generate {
            prompt: "Modern office chair".into(),
        },
        BatchItem::Iterate {
            spec_id: SpecId::from("spec_missing"),
            instruction: None,
        },
        BatchItem::Iterate {
            spec_id: spec.spec_id.clone(),
            instruction: Some("set floor_1.material.type to marble".into()),
        },
        BatchItem::Generate { prompt: "   ".into() },
    ];
    let results = coord.batch(items.clone()).await;

    assert_eq!(results.len(), 4);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.index, i);
        assert_eq!(result.item, items[i]);
    }
    assert!(results[0].is_ok());
    assert!(results[1].error.as_deref().unwrap().contains("not found"));
    assert!(results[2].is_ok());
    assert!(results[3].error.as_deref().unwrap().contains("prompt"));

    let generated = results[0].outcome.as_ref().unwrap();
    let iterated = results[2].outcome.as_ref().unwrap();
    assert_ne!(generated.spec_id, iterated.spec_id);
    assert!(matches!(
        iterated.status,
        SessionStatus::Converged | SessionStatus::Exhausted
    ));
    assert!(generated.history.iter().all(|r| r.spec_id == generated.spec_id));
}

#[tokio::test]
async fn test_batch_items_deserialize_from_json() {
    let items: Vec<BatchItem> = serde_json::from_value(json!([
        { "op": "generate", "prompt": "a walnut desk" },
        { "op": "iterate", "spec_id": "spec_x" }
    ]))
    .unwrap();
    assert_eq!(
        items,
        vec![
            BatchItem::Generate {
                prompt: "a walnut desk".into()
            },
            BatchItem::Iterate {
                spec_id: SpecId::from("spec_x"),
                instruction: None
            },
        ]
    );
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let generator = Arc::new(Generator::new(Arc::new(RuleBasedBackend::new())));
    let config = RefinementConfig {
        convergence_threshold: 1.5,
        ..RefinementConfig::default()
    };
    let result = AgentCoordinator::new(Arc::clone(&generator), Arc::new(MemorySpecStore::new()), config);
    assert!(matches!(result, Err(SpecloopError::Config(_))));

    let config = RefinementConfig {
        max_rounds: 0,
        ..RefinementConfig::default()
    };
    let result = AgentCoordinator::new(generator, Arc::new(MemorySpecStore::new()), config);
    assert!(matches!(result, Err(SpecloopError::Config(_))));
}
