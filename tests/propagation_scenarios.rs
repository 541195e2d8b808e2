use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use namewright::application::engine::Engine;
use namewright::application::propagation::{JobSubmission, SettingsPatch};
use namewright::application::repos::{ConfigRepo, PropagationRepo, Repositories, StringsRepo};
use namewright::cache::{
    CacheConfig, CacheError, CacheKey, CacheStore, CatalogKind, MemoryCacheStore,
};
use namewright::domain::entities::{
    DimensionRecord, DimensionValueRecord, FieldRecord, PlatformRecord, RuleDetailRecord,
    RuleRecord, StringRecord,
};
use namewright::domain::types::{
    DimensionType, JobStatus, JobType, PropagationErrorType, SourceReference,
};
use namewright::infra::memory::MemoryRepositories;
use namewright::infra::queue::MemoryJobQueue;

const WS: i64 = 1;
const CLIENT: i64 = 1;
const YEAR: i64 = 2;
const REGION: i64 = 3;

struct Harness {
    repos: Arc<MemoryRepositories>,
    store: Arc<MemoryCacheStore>,
    engine: Engine,
}

impl Harness {
    fn new() -> Self {
        let repos = Arc::new(MemoryRepositories::new());
        seed_configuration(&repos);
        let store = Arc::new(MemoryCacheStore::new(&CacheConfig::default()));
        let engine = Engine::build(
            repos.clone() as Arc<dyn Repositories>,
            store.clone(),
            Duration::from_secs(1800),
            Arc::new(MemoryJobQueue::new()),
        );
        Self {
            repos,
            store,
            engine,
        }
    }

    async fn settings(&self, patch: SettingsPatch) {
        self.engine
            .propagation
            .update_settings(WS, patch)
            .await
            .expect("valid settings");
    }

    fn value(&self, string_id: i64) -> String {
        self.repos.string_value(string_id).expect("string exists")
    }
}

fn rule(id: i64, pattern: &str, fields: &[(i64, &[i64])]) -> RuleRecord {
    let mut details = Vec::new();
    for (field_id, dimensions) in fields {
        for (index, dimension_id) in dimensions.iter().enumerate() {
            details.push(RuleDetailRecord {
                id: id * 100 + details.len() as i64,
                rule_id: id,
                field_id: *field_id,
                dimension_id: Some(*dimension_id),
                order: index as i32 + 1,
                is_required: true,
            });
        }
    }
    RuleRecord {
        id,
        workspace_id: WS,
        platform_id: 1,
        name: format!("rule-{id}"),
        pattern: pattern.to_string(),
        is_active: true,
        details,
    }
}

fn string(id: i64, rule_id: i64, field_id: i64, parent_id: Option<i64>, value: &str) -> StringRecord {
    StringRecord {
        id,
        workspace_id: WS,
        rule_id,
        field_id,
        parent_id,
        value: value.to_string(),
        version: 1,
        updated_at: OffsetDateTime::now_utc(),
    }
}

fn seed_configuration(repos: &MemoryRepositories) {
    repos.insert_platform(PlatformRecord {
        id: 1,
        name: "Search".to_string(),
        slug: "search".to_string(),
    });
    for (id, name, level, next) in [
        (100, "campaign", 1, Some(101)),
        (101, "ad_group", 2, Some(102)),
        (102, "ad", 3, None),
    ] {
        repos.insert_field(FieldRecord {
            id,
            platform_id: 1,
            name: name.to_string(),
            level,
            next_field_id: next,
        });
    }
    for (id, name) in [(CLIENT, "client"), (YEAR, "year"), (REGION, "region")] {
        repos.insert_dimension(DimensionRecord {
            id,
            workspace_id: WS,
            name: name.to_string(),
            dimension_type: DimensionType::List,
        });
    }
    for (id, dimension_id, value) in [
        (20, CLIENT, "ACME"),
        (21, CLIENT, "GLOBEX"),
        (30, YEAR, "2024"),
        (10, REGION, "US"),
        (11, REGION, "EU"),
    ] {
        repos.insert_dimension_value(DimensionValueRecord {
            id,
            workspace_id: WS,
            dimension_id,
            value: value.to_string(),
            label: value.to_string(),
        });
    }

    let all = [CLIENT, YEAR, REGION];
    repos.insert_rule(rule(
        5,
        "{client}-{year}-{region}",
        &[(100, &all[..]), (101, &all[..])],
    ));

    repos.insert_string(
        string(1, 5, 100, None, "ACME-2024-US"),
        &[(CLIENT, Some(20), None), (YEAR, Some(30), None), (REGION, Some(10), None)],
    );
    repos.insert_string(
        string(2, 5, 100, None, "GLOBEX-2024-US"),
        &[(CLIENT, Some(21), None), (YEAR, Some(30), None), (REGION, Some(10), None)],
    );
    repos.insert_string(
        string(3, 5, 100, None, "ACME-2024-EU"),
        &[(CLIENT, Some(20), None), (YEAR, Some(30), None), (REGION, Some(11), None)],
    );
}

/// Parent tree rooted at 499 plus an unrelated sibling tree rooted at 600.
/// Children own their region and inherit client and year from 499.
fn seed_string_tree(repos: &MemoryRepositories) {
    let all = [CLIENT, YEAR, REGION];
    repos.insert_rule(rule(6, "{client}-{year}", &[(100, &[CLIENT, YEAR][..])]));
    repos.insert_rule(rule(7, "{client}-{year}-{region}", &[(101, &all[..])]));
    repos.insert_rule(rule(
        8,
        "{client}-{year}-{region}",
        &[(101, &all[..]), (102, &all[..])],
    ));

    repos.insert_string(
        string(499, 6, 100, None, "ACME-2024"),
        &[(CLIENT, Some(20), None), (YEAR, Some(30), None)],
    );
    repos.insert_string(
        string(500, 7, 101, Some(499), "ACME-2024-US"),
        &[(REGION, Some(10), None)],
    );
    repos.insert_string(
        string(501, 8, 101, Some(499), "ACME-2024-EU"),
        &[(REGION, Some(11), None)],
    );
    repos.insert_string(string(502, 8, 102, Some(500), "ACME-2024-US"), &[]);
    repos.insert_string(string(503, 8, 102, Some(501), "ACME-2024-EU"), &[]);

    repos.insert_string(
        string(600, 6, 100, None, "GLOBEX-2024"),
        &[(CLIENT, Some(21), None), (YEAR, Some(30), None)],
    );
    repos.insert_string(
        string(601, 7, 101, Some(600), "GLOBEX-2024-US"),
        &[(REGION, Some(10), None)],
    );
}

#[tokio::test]
async fn dimension_value_rename_invalidates_and_regenerates_referencing_strings() {
    let h = Harness::new();
    let key = CacheKey::new(CatalogKind::DimensionCatalog, 5).render();

    h.engine.catalog.dimension_catalog(5).await.expect("catalog");
    assert!(h.store.get(&key).await.unwrap().is_some());

    let before = h
        .repos
        .update_dimension_value(10, "USA", "USA")
        .expect("value exists");
    let after = h.repos.find_dimension_value(10).await.unwrap().unwrap();
    let outcome = h
        .engine
        .trigger
        .dimension_value_updated(&before, &after)
        .await
        .expect("invalidation");

    assert_eq!(outcome.affected_rules, vec![5]);
    for kind in CatalogKind::ALL {
        let key = CacheKey::new(kind, 5).render();
        assert!(h.store.get(&key).await.unwrap().is_none(), "{key} survived");
    }

    let job = outcome.job.expect("job created");
    assert_eq!(job.job_type, JobType::DimensionValueChange);
    assert_eq!(job.status, JobStatus::Pending);

    let status = h.engine.runner.run(job.id).await.unwrap();
    assert_eq!(status, Some(JobStatus::Completed));

    let job = h.engine.propagation.get_job(job.id).await.unwrap();
    let referencing = h
        .repos
        .list_string_ids_by_dimension_value(WS, 10)
        .await
        .unwrap();
    assert_eq!(job.affected_strings_count, referencing.len() as u64);
    assert_eq!(job.affected_strings_count, 2);
    assert_eq!(job.processed_count, job.affected_strings_count);
    assert_eq!(job.failed_count, 0);
    assert!(job.started_at.is_some() && job.completed_at.is_some());

    assert_eq!(h.value(1), "ACME-2024-USA");
    assert_eq!(h.value(2), "GLOBEX-2024-USA");
    assert_eq!(h.value(3), "ACME-2024-EU");
    assert_eq!(h.repos.string_writes(), 2);
}

#[tokio::test]
async fn pattern_reorder_rewrites_every_string_of_the_rule() {
    let h = Harness::new();
    let before = h
        .repos
        .update_rule_pattern(5, "{region}-{client}-{year}")
        .expect("rule exists");
    let after = h.repos.find_rule(5).await.unwrap().unwrap();

    let outcome = h.engine.trigger.rule_updated(&before, &after).await.unwrap();
    let job = outcome.job.expect("job created");
    assert_eq!(job.job_type, JobType::RulePatternChange);
    assert_eq!(job.source, SourceReference::Rule { rule_id: 5 });

    assert_eq!(
        h.engine.runner.run(job.id).await.unwrap(),
        Some(JobStatus::Completed)
    );
    assert_eq!(h.value(1), "US-ACME-2024");
    assert_eq!(h.value(2), "US-GLOBEX-2024");
    assert_eq!(h.value(3), "EU-ACME-2024");

    let job = h.engine.propagation.get_job(job.id).await.unwrap();
    assert_eq!(job.affected_strings_count, 3);
    assert!(h.engine.propagation.list_errors(job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn rule_edit_without_pattern_change_only_invalidates() {
    let h = Harness::new();
    h.engine.catalog.complete_rule_data(5).await.unwrap();
    let rule = h.repos.find_rule(5).await.unwrap().unwrap();

    let outcome = h.engine.trigger.rule_updated(&rule, &rule).await.unwrap();
    assert!(outcome.job.is_none());
    assert_eq!(outcome.keys_deleted, 1);
}

#[tokio::test]
async fn parent_change_targets_exactly_its_descendants() {
    let h = Harness::new();
    seed_string_tree(&h.repos);

    h.repos.update_dimension_value(20, "ACMECO", "Acme Co");
    let before = h
        .repos
        .set_string_value(499, "ACMECO-2024")
        .expect("parent exists");
    let after = h.repos.find_string(499).await.unwrap().unwrap();

    let outcome = h.engine.trigger.string_updated(&before, &after).await.unwrap();
    assert!(outcome.affected_rules.is_empty());
    let job = outcome.job.expect("job created");
    assert_eq!(job.job_type, JobType::ParentStringChange);

    assert_eq!(
        h.engine.runner.run(job.id).await.unwrap(),
        Some(JobStatus::Completed)
    );
    let job = h.engine.propagation.get_job(job.id).await.unwrap();
    assert_eq!(job.target_string_ids, Some(vec![500, 501, 502, 503]));
    assert_eq!(job.affected_strings_count, 4);

    assert_eq!(h.value(500), "ACMECO-2024-US");
    assert_eq!(h.value(501), "ACMECO-2024-EU");
    assert_eq!(h.value(502), "ACMECO-2024-US");
    assert_eq!(h.value(503), "ACMECO-2024-EU");
    assert_eq!(h.value(601), "GLOBEX-2024-US");
}

#[tokio::test]
async fn configuration_error_aborts_the_failing_strings_subtree() {
    let h = Harness::new();
    seed_string_tree(&h.repos);
    h.repos.delete_rule(7);

    let job = h
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: WS,
            job_type: JobType::ParentStringChange,
            source: SourceReference::ParentString { string_id: 499 },
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();

    assert_eq!(
        h.engine.runner.run(job.id).await.unwrap(),
        Some(JobStatus::Partial)
    );

    let job = h.engine.propagation.get_job(job.id).await.unwrap();
    assert_eq!(job.affected_strings_count, 4);
    assert_eq!(job.processed_count, 4);
    assert_eq!(job.failed_count, 2);

    let errors = h.engine.propagation.list_errors(job.id).await.unwrap();
    let mut failed: Vec<i64> = errors.iter().map(|e| e.string_id).collect();
    failed.sort_unstable();
    assert_eq!(failed, vec![500, 502]);
    assert!(
        errors
            .iter()
            .all(|e| e.error_type == PropagationErrorType::ConfigurationError)
    );
    let aborted = errors.iter().find(|e| e.string_id == 502).unwrap();
    assert_eq!(aborted.details["ancestor_string_id"], 500);
}

#[tokio::test]
async fn retry_failed_only_targets_unresolved_errors() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for n in 0..12 {
        let id = 1000 + n;
        let region = format!("R{n}");
        h.repos.insert_string(
            string(id, 5, 101, None, &format!("ACME-2024-{region}")),
            &[
                (CLIENT, Some(20), None),
                (YEAR, Some(30), None),
                (REGION, None, Some(region.as_str())),
            ],
        );
        ids.push(id);
    }
    for n in 0..3 {
        let id = 2000 + n;
        let region = format!("X{n}");
        // Points at a dimension value that does not exist.
        h.repos.insert_string(
            string(id, 5, 101, None, &format!("GONE-2024-{region}")),
            &[
                (CLIENT, Some(999), None),
                (YEAR, Some(30), None),
                (REGION, None, Some(region.as_str())),
            ],
        );
        ids.push(id);
    }

    let job = h
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: WS,
            job_type: JobType::Manual,
            source: SourceReference::Strings { string_ids: ids },
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();
    assert_eq!(job.affected_strings_count, 15);
    assert_eq!(
        h.engine.runner.run(job.id).await.unwrap(),
        Some(JobStatus::Partial)
    );

    let original = h.engine.propagation.get_job(job.id).await.unwrap();
    assert_eq!(original.processed_count, 15);
    assert_eq!(original.failed_count, 3);
    let errors = h.engine.propagation.list_errors(job.id).await.unwrap();
    assert!(
        errors
            .iter()
            .all(|e| e.error_type == PropagationErrorType::InvalidDimensionValue)
    );

    let retry = h.engine.propagation.retry(job.id, true).await.unwrap();
    assert_eq!(retry.affected_strings_count, 3);
    assert_eq!(retry.retry_of, Some(job.id));
    assert_eq!(retry.target_string_ids, Some(vec![2000, 2001, 2002]));

    let full = h.engine.propagation.retry(job.id, false).await.unwrap();
    assert_eq!(full.affected_strings_count, 15);

    let untouched = h.engine.propagation.get_job(job.id).await.unwrap();
    assert_eq!(untouched, original);
}

#[tokio::test]
async fn retry_failed_only_without_failures_completes_immediately() {
    let h = Harness::new();
    let job = h
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: WS,
            job_type: JobType::RulePatternChange,
            source: SourceReference::Rule { rule_id: 5 },
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();
    h.engine.runner.run(job.id).await.unwrap();

    let retry = h.engine.propagation.retry(job.id, true).await.unwrap();
    assert_eq!(retry.affected_strings_count, 0);
    assert_eq!(retry.status, JobStatus::Completed);
}

#[tokio::test]
async fn unchanged_configuration_round_trips_without_writes() {
    let h = Harness::new();
    let job = h
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: WS,
            job_type: JobType::Manual,
            source: SourceReference::Strings {
                string_ids: vec![1, 2, 3],
            },
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();

    assert_eq!(
        h.engine.runner.run(job.id).await.unwrap(),
        Some(JobStatus::Completed)
    );
    assert_eq!(h.repos.string_writes(), 0);
    assert!(h.engine.propagation.list_errors(job.id).await.unwrap().is_empty());
    assert_eq!(h.value(1), "ACME-2024-US");
}

#[tokio::test]
async fn transient_conflicts_are_retried_within_budget() {
    let h = Harness::new();
    h.settings(SettingsPatch {
        retry_attempts: Some(2),
        retry_delay_seconds: Some(0),
        ..Default::default()
    })
    .await;
    h.repos.update_dimension_value(10, "USA", "USA");
    h.repos.inject_write_conflicts(1, 2);
    h.repos.inject_write_conflicts(2, 5);

    let job = h
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: WS,
            job_type: JobType::DimensionValueChange,
            source: SourceReference::DimensionValue {
                dimension_value_id: 10,
            },
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();

    assert_eq!(
        h.engine.runner.run(job.id).await.unwrap(),
        Some(JobStatus::Partial)
    );
    assert_eq!(h.value(1), "ACME-2024-USA");
    assert_eq!(h.value(2), "GLOBEX-2024-US");

    let errors = h.engine.propagation.list_errors(job.id).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].string_id, 2);
    assert_eq!(errors[0].error_type, PropagationErrorType::LockContention);
}

#[tokio::test]
async fn uniqueness_conflict_is_recorded_without_writing() {
    let h = Harness::new();
    // EU renamed to US collides with string 1.
    h.repos.update_dimension_value(11, "US", "US");

    let job = h
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: WS,
            job_type: JobType::DimensionValueChange,
            source: SourceReference::DimensionValue {
                dimension_value_id: 11,
            },
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();

    assert_eq!(
        h.engine.runner.run(job.id).await.unwrap(),
        Some(JobStatus::Failed)
    );
    assert_eq!(h.value(3), "ACME-2024-EU");
    let errors = h.engine.propagation.list_errors(job.id).await.unwrap();
    assert_eq!(errors[0].error_type, PropagationErrorType::UniquenessConflict);
    assert_eq!(errors[0].details["conflicting_string_id"], 1);
}

#[tokio::test]
async fn cancelling_a_running_job_freezes_progress() {
    let h = Harness::new();
    h.settings(SettingsPatch {
        batch_size: Some(1),
        retry_attempts: Some(1),
        retry_delay_seconds: Some(1),
        ..Default::default()
    })
    .await;
    h.repos.update_dimension_value(20, "ACMECO", "Acme Co");
    h.repos.inject_write_conflicts(1, 1);

    let job = h
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: WS,
            job_type: JobType::Manual,
            source: SourceReference::Strings {
                string_ids: vec![1, 2, 3],
            },
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();

    let runner = h.engine.runner.clone();
    let job_id = job.id;
    let running = tokio::spawn(async move { runner.run(job_id).await });

    // The first item is sleeping through its retry backoff.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let cancelled = h.engine.propagation.cancel(job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let status = running.await.expect("runner task").unwrap();
    assert_eq!(status, Some(JobStatus::Cancelled));

    let job = h.engine.propagation.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.processed_count, 1);
    assert_eq!(job.affected_strings_count, 3);
    assert_eq!(h.value(1), "ACMECO-2024-US");
    assert_eq!(h.value(3), "ACME-2024-EU");
}

#[tokio::test]
async fn cancellation_written_by_another_process_stops_within_the_batch() {
    let h = Harness::new();
    h.settings(SettingsPatch {
        retry_attempts: Some(1),
        retry_delay_seconds: Some(1),
        ..Default::default()
    })
    .await;
    h.repos.update_dimension_value(20, "ACMECO", "Acme Co");
    h.repos.inject_write_conflicts(1, 1);

    let job = h
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: WS,
            job_type: JobType::Manual,
            source: SourceReference::Strings {
                string_ids: vec![1, 2, 3],
            },
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();

    let runner = h.engine.runner.clone();
    let job_id = job.id;
    let running = tokio::spawn(async move { runner.run(job_id).await });

    // Written straight to the store, bypassing this process's cancellation flags.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.repos.cancel_job(job_id).await.unwrap());

    let status = running.await.expect("runner task").unwrap();
    assert_eq!(status, Some(JobStatus::Cancelled));

    let job = h.engine.propagation.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.processed_count, 1);
    assert_eq!(h.value(1), "ACMECO-2024-US");
    assert_eq!(h.value(3), "ACME-2024-EU");
    assert_eq!(h.repos.string_writes(), 1);
}

#[tokio::test]
async fn cancelled_pending_job_is_never_claimed() {
    let h = Harness::new();
    let job = h
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: WS,
            job_type: JobType::Manual,
            source: SourceReference::Strings {
                string_ids: vec![1],
            },
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();

    h.engine.propagation.cancel(job.id).await.unwrap();
    assert_eq!(h.engine.runner.run(job.id).await.unwrap(), None);
    assert!(h.engine.propagation.cancel(job.id).await.is_err());
}

#[tokio::test]
async fn approval_gate_holds_auto_created_jobs() {
    let h = Harness::new();
    h.settings(SettingsPatch {
        require_approval: Some(true),
        ..Default::default()
    })
    .await;

    let before = h.repos.update_dimension_value(10, "USA", "USA").unwrap();
    let after = h.repos.find_dimension_value(10).await.unwrap().unwrap();
    let job = h
        .engine
        .trigger
        .dimension_value_updated(&before, &after)
        .await
        .unwrap()
        .job
        .expect("job created");
    assert!(!job.approved);

    assert_eq!(h.engine.runner.run(job.id).await.unwrap(), None);
    assert!(h.repos.list_pending_jobs(10).await.unwrap().is_empty());
    assert_eq!(h.value(1), "ACME-2024-US");

    h.engine.propagation.approve(job.id).await.unwrap();
    assert_eq!(
        h.engine.runner.run(job.id).await.unwrap(),
        Some(JobStatus::Completed)
    );
    assert_eq!(h.value(1), "ACME-2024-USA");
}

#[tokio::test]
async fn disabled_auto_propagation_only_invalidates() {
    let h = Harness::new();
    h.settings(SettingsPatch {
        auto_propagate: Some(false),
        ..Default::default()
    })
    .await;
    h.engine.catalog.dimension_catalog(5).await.unwrap();

    let before = h.repos.update_dimension_value(10, "USA", "USA").unwrap();
    let after = h.repos.find_dimension_value(10).await.unwrap().unwrap();
    let outcome = h
        .engine
        .trigger
        .dimension_value_updated(&before, &after)
        .await
        .unwrap();

    assert!(outcome.job.is_none());
    assert_eq!(outcome.keys_deleted, 1);
    assert!(
        h.engine
            .propagation
            .list_jobs(&Default::default())
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(h.value(1), "ACME-2024-US");
}

#[tokio::test]
async fn rebuilt_catalog_reflects_the_new_value() {
    let h = Harness::new();
    let stale = h.engine.catalog.optimized_dimension_catalog(5).await.unwrap();
    assert_eq!(stale.value_by_id[&10].value, "US");

    let before = h.repos.update_dimension_value(10, "USA", "USA").unwrap();
    let after = h.repos.find_dimension_value(10).await.unwrap().unwrap();
    h.engine
        .trigger
        .dimension_value_updated(&before, &after)
        .await
        .unwrap();

    let fresh = h.engine.catalog.optimized_dimension_catalog(5).await.unwrap();
    assert_eq!(fresh.value_by_id[&10].value, "USA");
}

/// Holds every write back so a rebuild can straddle an invalidation.
struct SlowSetStore {
    inner: MemoryCacheStore,
    delay: Duration,
}

#[async_trait]
impl CacheStore for SlowSetStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set(key, value, ttl).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        self.inner.delete_many(keys).await
    }
}

#[tokio::test]
async fn rebuild_overlapping_an_invalidation_is_not_kept() {
    let repos = Arc::new(MemoryRepositories::new());
    seed_configuration(&repos);
    let store = Arc::new(SlowSetStore {
        inner: MemoryCacheStore::new(&CacheConfig::default()),
        delay: Duration::from_millis(300),
    });
    let engine = Engine::build(
        repos.clone() as Arc<dyn Repositories>,
        store.clone(),
        Duration::from_secs(1800),
        Arc::new(MemoryJobQueue::new()),
    );

    let catalog = engine.catalog.clone();
    let reader = tokio::spawn(async move { catalog.optimized_dimension_catalog(5).await });

    // The reader has built its view from `US` and is now stuck writing it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let before = repos.update_dimension_value(10, "USA", "USA").unwrap();
    let after = repos.find_dimension_value(10).await.unwrap().unwrap();
    let job = engine
        .trigger
        .dimension_value_updated(&before, &after)
        .await
        .unwrap()
        .job
        .expect("job created");

    let served = reader.await.expect("reader task").unwrap();
    assert_eq!(served.value_by_id[&10].value, "US");

    let key = CacheKey::new(CatalogKind::OptimizedDimensionCatalog, 5).render();
    assert!(store.inner.get(&key).await.unwrap().is_none());

    assert_eq!(
        engine.runner.run(job.id).await.unwrap(),
        Some(JobStatus::Completed)
    );
    assert_eq!(repos.string_value(1).as_deref(), Some("ACME-2024-USA"));
    assert_eq!(repos.string_value(2).as_deref(), Some("GLOBEX-2024-USA"));

    let fresh = engine.catalog.optimized_dimension_catalog(5).await.unwrap();
    assert_eq!(fresh.value_by_id[&10].value, "USA");
}

#[tokio::test]
async fn regeneration_ignores_a_stale_cached_view() {
    let h = Harness::new();
    h.engine.catalog.optimized_dimension_catalog(5).await.unwrap();
    h.engine.catalog.complete_rule_data(5).await.unwrap();

    // Changed behind the cache's back: no trigger, so the cached views still say `US`.
    h.repos.update_dimension_value(10, "USA", "USA");
    let job = h
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: WS,
            job_type: JobType::Manual,
            source: SourceReference::Strings {
                string_ids: vec![1],
            },
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();

    assert_eq!(
        h.engine.runner.run(job.id).await.unwrap(),
        Some(JobStatus::Completed)
    );
    assert_eq!(h.value(1), "ACME-2024-USA");
}
