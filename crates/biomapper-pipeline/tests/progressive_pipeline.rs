//! End-to-end pipeline tests with deterministic stub collaborators.

use std::collections::HashSet;
use std::sync::Arc;

use biomapper_bridge::{BridgeCandidate, BridgeClient, BridgeMatcherConfig, MockBridgeClient};
use biomapper_common::{Entity, MatchMethod, Ontology};
use biomapper_match::{ReferenceIndex, ReferenceRecord};
use biomapper_pipeline::{
    build_pipeline, InMemoryMappingCache, MappingCache, PipelineConfig, StageStatus,
};
use biomapper_semantic::{Adjudication, MockSemanticBackend, SemanticCandidate};

fn reference_index() -> Arc<ReferenceIndex> {
    Arc::new(ReferenceIndex::from_records(vec![
        ReferenceRecord::new("REF001", "HDL cholesterol", vec![]),
        ReferenceRecord::new("REF002", "Glucose", vec!["D-glucose".to_string()]),
        ReferenceRecord::new("REF003", "Triglycerides", vec![]),
    ]))
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        stage3: BridgeMatcherConfig {
            rate_limit_per_second: 0.0,
            retry_backoff_ms: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn direct_identifier_short_circuits_later_stages() {
    let bridge = Arc::new(MockBridgeClient::new());
    let orchestrator = build_pipeline(
        &fast_config(),
        reference_index(),
        Some(bridge.clone() as Arc<dyn BridgeClient>),
        None,
    )
    .unwrap();

    let entity = Entity::new("Glucose", "arivale").with_identifier(Ontology::PubChem, "5793");
    let outcome = orchestrator.run(vec![entity]).await;

    assert_eq!(outcome.matched.len(), 1);
    let (_, candidate) = &outcome.matched[0];
    assert_eq!(candidate.target_id, "PUBCHEM:5793");
    assert_eq!(candidate.method, MatchMethod::DirectId);
    assert_eq!(candidate.stage, 1);
    assert_eq!(candidate.confidence, 0.98);
    // Matched at stage 1: the bridge never sees it.
    assert_eq!(bridge.call_count(), 0);
    assert_eq!(outcome.statistics.cumulative_coverage, 1.0);
}

#[tokio::test]
async fn abbreviated_name_resolves_via_fuzzy_stage() {
    let orchestrator = build_pipeline(
        &fast_config(),
        reference_index(),
        Some(Arc::new(MockBridgeClient::new())),
        None,
    )
    .unwrap();

    let outcome = orchestrator.run(vec![Entity::new("HDL_C", "arivale")]).await;

    assert_eq!(outcome.matched.len(), 1);
    let (_, candidate) = &outcome.matched[0];
    assert_eq!(candidate.target_id, "REF001");
    assert_eq!(candidate.method, MatchMethod::FuzzyString);
    assert_eq!(candidate.stage, 2);
    assert!(candidate.confidence >= 0.85);
}

#[tokio::test]
async fn unmappable_entity_is_attempted_at_every_enabled_stage() {
    let orchestrator = build_pipeline(
        &fast_config(),
        reference_index(),
        Some(Arc::new(MockBridgeClient::new())),
        None,
    )
    .unwrap();

    let outcome = orchestrator
        .run(vec![Entity::new("Xenobiotic 42", "ukbb")])
        .await;

    assert!(outcome.matched.is_empty());
    assert_eq!(outcome.unmapped.len(), 1);
    for stage in [1u8, 2, 3] {
        let summary = &outcome.statistics.stage_breakdown[&stage];
        assert_eq!(summary.status, StageStatus::Completed);
        assert_eq!(summary.input_count, 1);
    }
    assert_eq!(outcome.statistics.cumulative_coverage, 0.0);
}

#[tokio::test]
async fn bridge_partial_failure_does_not_block_batch() {
    // A times out at the bridge, B resolves there.
    let bridge = MockBridgeClient::new()
        .with_timeout("mystery marker")
        .with(
            "creatinine",
            vec![BridgeCandidate {
                target_id: "CHEBI:16737".to_string(),
                target_name: "creatinine".to_string(),
                score: Some(0.8),
            }],
        );
    let orchestrator = build_pipeline(
        &fast_config(),
        reference_index(),
        Some(Arc::new(bridge)),
        None,
    )
    .unwrap();

    let outcome = orchestrator
        .run(vec![
            Entity::new("Mystery Marker", "arivale"),
            Entity::new("Creatinine", "arivale"),
        ])
        .await;

    assert_eq!(outcome.matched.len(), 1);
    assert_eq!(outcome.matched[0].1.target_id, "CHEBI:16737");
    assert_eq!(outcome.unmapped.len(), 1);
    assert_eq!(outcome.statistics.stage_breakdown[&3].failed_lookups, 1);
}

#[tokio::test]
async fn bridge_outage_degrades_gracefully() {
    let config = PipelineConfig {
        stage4_enabled: true,
        ..fast_config()
    };
    // Stage 4 has no backend, so it runs the strict fuzzy fallback.
    let orchestrator = build_pipeline(
        &config,
        reference_index(),
        Some(Arc::new(MockBridgeClient::new().unavailable())),
        None,
    )
    .unwrap();

    let outcome = orchestrator
        .run(vec![Entity::new("Xenobiotic 42", "ukbb")])
        .await;

    assert_eq!(outcome.statistics.stage_breakdown[&3].status, StageStatus::Failed);
    assert!(outcome.statistics.stage_breakdown[&3].error.is_some());
    // Lookups issued before the outage verdict stay on the ledger:
    // 1 + max_retries attempts for the single entity, each billed.
    assert_eq!(outcome.statistics.stage_breakdown[&3].api_calls, 4);
    assert!(outcome.statistics.total_cost_dollars > 0.0);
    // The pre-stage remainder still reached Stage 4.
    assert_eq!(outcome.statistics.stage_breakdown[&4].input_count, 1);
    assert_eq!(outcome.unmapped.len(), 1);
}

#[tokio::test]
async fn disabled_stages_appear_in_the_ledger() {
    let config = PipelineConfig {
        stage3_enabled: false,
        ..fast_config()
    };
    let orchestrator = build_pipeline(&config, reference_index(), None, None).unwrap();

    let outcome = orchestrator
        .run(vec![Entity::new("Xenobiotic 42", "ukbb")])
        .await;

    assert_eq!(
        outcome.statistics.stage_breakdown[&3].status,
        StageStatus::SkippedDisabled
    );
    assert_eq!(outcome.statistics.stage_breakdown[&3].input_count, 1);
    // Stage 4 is off by default and accounted for the same way.
    assert_eq!(
        outcome.statistics.stage_breakdown[&4].status,
        StageStatus::SkippedDisabled
    );
    assert_eq!(outcome.unmapped.len(), 1);
}

#[tokio::test]
async fn budget_ceiling_skips_costly_stages() {
    let config = PipelineConfig {
        max_total_cost_dollars: Some(0.0),
        ..fast_config()
    };
    let bridge = Arc::new(MockBridgeClient::new());
    let orchestrator = build_pipeline(
        &config,
        reference_index(),
        Some(bridge.clone() as Arc<dyn BridgeClient>),
        None,
    )
    .unwrap();

    let outcome = orchestrator
        .run(vec![Entity::new("Xenobiotic 42", "ukbb")])
        .await;

    assert_eq!(
        outcome.statistics.stage_breakdown[&3].status,
        StageStatus::SkippedBudgetExceeded
    );
    assert_eq!(bridge.call_count(), 0);
    assert_eq!(outcome.statistics.total_cost_dollars, 0.0);
}

#[tokio::test]
async fn semantic_stage_respects_llm_budget_in_full_pipeline() {
    let mut backend = MockSemanticBackend::new();
    let mut entities = Vec::new();
    for i in 0..20 {
        let name = format!("novel compound {i}");
        backend = backend
            .with_candidates(
                &name,
                vec![SemanticCandidate {
                    target_id: format!("REFX{i}"),
                    target_name: format!("Compound {i}"),
                    similarity: 0.95,
                }],
            )
            .with_adjudication(
                &name,
                &format!("REFX{i}"),
                Adjudication {
                    accept: true,
                    confidence: 0.95,
                },
            );
        entities.push(Entity::new(name, "israeli10k"));
    }

    let mut config = PipelineConfig {
        stage4_enabled: true,
        ..fast_config()
    };
    config.stage4.max_llm_calls = 5;

    let backend = Arc::new(backend);
    let orchestrator = build_pipeline(
        &config,
        reference_index(),
        Some(Arc::new(MockBridgeClient::new())),
        Some(backend.clone()),
    )
    .unwrap();

    let outcome = orchestrator.run(entities).await;

    assert_eq!(backend.adjudicate_calls(), 5);
    assert_eq!(outcome.matched.len(), 5);
    assert_eq!(outcome.unmapped.len(), 15);
    assert_eq!(outcome.statistics.stage_breakdown[&4].llm_calls, 5);
    assert!(outcome.statistics.total_cost_dollars > 0.0);
}

#[tokio::test]
async fn completeness_and_uniqueness_across_stages() {
    let entities = vec![
        Entity::new("Glucose", "arivale").with_identifier(Ontology::PubChem, "5793"),
        Entity::new("HDL_C", "arivale"),
        Entity::new("TG", "arivale"),
        Entity::new("Xenobiotic 1", "ukbb"),
        Entity::new("Xenobiotic 2", "ukbb"),
    ];
    let orchestrator = build_pipeline(
        &fast_config(),
        reference_index(),
        Some(Arc::new(MockBridgeClient::new())),
        None,
    )
    .unwrap();

    let outcome = orchestrator.run(entities.clone()).await;

    // P1: nothing lost.
    assert_eq!(outcome.matched.len() + outcome.unmapped.len(), entities.len());
    // P2: nothing matched twice.
    let names: Vec<&str> = outcome
        .matched
        .iter()
        .map(|(e, _)| e.raw_name.as_str())
        .chain(outcome.unmapped.iter().map(|e| e.raw_name.as_str()))
        .collect();
    let unique: HashSet<&str> = names.iter().copied().collect();
    assert_eq!(unique.len(), entities.len());
}

#[tokio::test]
async fn identical_runs_are_idempotent_with_deterministic_collaborators() {
    let entities = vec![
        Entity::new("Glucose", "arivale").with_identifier(Ontology::PubChem, "5793"),
        Entity::new("HDL_C", "arivale"),
        Entity::new("Xenobiotic 42", "ukbb"),
    ];

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let orchestrator = build_pipeline(
            &fast_config(),
            reference_index(),
            Some(Arc::new(MockBridgeClient::new())),
            None,
        )
        .unwrap();
        outcomes.push(orchestrator.run(entities.clone()).await);
    }

    let [a, b] = <[_; 2]>::try_from(outcomes).ok().unwrap();
    assert_eq!(a.matched, b.matched);
    assert_eq!(a.unmapped, b.unmapped);
    assert_eq!(
        a.statistics.cumulative_coverage,
        b.statistics.cumulative_coverage
    );
}

#[tokio::test]
async fn cache_prepass_short_circuits_resolved_entities() {
    let cache = Arc::new(InMemoryMappingCache::new());
    let config = PipelineConfig {
        target_type: "kraken".to_string(),
        ..fast_config()
    };
    let entities = vec![Entity::new("Glucose", "arivale").with_identifier(Ontology::PubChem, "5793")];

    let orchestrator = build_pipeline(
        &config,
        reference_index(),
        Some(Arc::new(MockBridgeClient::new())),
        None,
    )
    .unwrap()
    .with_cache(cache.clone() as Arc<dyn MappingCache>);
    let first = orchestrator.run(entities.clone()).await;
    assert_eq!(first.matched.len(), 1);
    assert_eq!(cache.len().await, 1);

    let orchestrator = build_pipeline(
        &config,
        reference_index(),
        Some(Arc::new(MockBridgeClient::new())),
        None,
    )
    .unwrap()
    .with_cache(cache.clone() as Arc<dyn MappingCache>);
    let second = orchestrator.run(entities).await;

    assert_eq!(second.matched.len(), 1);
    // Resolved in the pre-pass, recorded under the synthetic stage 0.
    assert!(second.statistics.stage_breakdown.contains_key(&0));
    assert_eq!(second.statistics.stage_breakdown[&0].cache_hits, 1);
    assert_eq!(second.statistics.cumulative_coverage, 1.0);
}
