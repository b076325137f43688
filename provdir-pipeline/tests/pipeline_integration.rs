//! End-to-end pipeline tests against stub collaborators and an in-memory
//! database: decision routing, no-drop accounting, queue handling,
//! idempotent re-publication, checkpoint resume, and cancellation.

use provdir_common::config::TomlConfig;
use provdir_common::events::{EventBus, PipelineEvent};
use provdir_pipeline::collaborators::{
    CollabResult, CollaboratorError, Collaborators, DocumentFields, ExtractedList, ExtractedText,
    GeocodedAddress, Geocoder, IdentityMatch, IdentityRegistry, DocumentReader, PhoneVerification,
    SiteContent, SiteExtractor,
};
use provdir_pipeline::db;
use provdir_pipeline::input;
use provdir_pipeline::models::{Decision, PipelineRun, RecordStatus, RunState};
use provdir_pipeline::services::DirectoryNotifier;
use provdir_pipeline::PipelineOrchestrator;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const KNOWN_REGISTRY_NUMBER: &str = "1111111111";
const UNKNOWN_REGISTRY_NUMBER: &str = "0000000000";

struct StubRegistry {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl IdentityRegistry for StubRegistry {
    async fn lookup_identity(&self, identifier: &str) -> CollabResult<IdentityMatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match identifier {
            KNOWN_REGISTRY_NUMBER => Ok(IdentityMatch {
                matched: true,
                name: Some("Dr. Ada Cole".to_string()),
                address: Some("12 Main St, Springfield, IL 62701".to_string()),
                phone: Some("+1 555 0100".to_string()),
                specialty: Some("Cardiology".to_string()),
                license_number: Some("LIC-100".to_string()),
                license_state: Some("IL".to_string()),
                confidence: 1.0,
            }),
            UNKNOWN_REGISTRY_NUMBER => Err(CollaboratorError::NotFound(format!(
                "registry has no record for {}",
                identifier
            ))),
            _ => Err(CollaboratorError::Unavailable("registry offline".to_string())),
        }
    }
}

struct StubGeocoder;

#[async_trait::async_trait]
impl Geocoder for StubGeocoder {
    async fn geocode(&self, address: &str) -> CollabResult<GeocodedAddress> {
        if address.contains("Nowhere") {
            return Err(CollaboratorError::NotFound(format!(
                "no geocoding result for {:?}",
                address
            )));
        }
        Ok(GeocodedAddress {
            formatted_address: address.to_string(),
            lat: 39.78,
            lng: -89.65,
            confidence: 1.0,
        })
    }

    async fn verify_phone(&self, number: &str) -> CollabResult<PhoneVerification> {
        if number.contains("555") {
            Ok(PhoneVerification {
                valid: true,
                confidence: 1.0,
            })
        } else {
            Err(CollaboratorError::NotFound(format!(
                "no listing for phone {:?}",
                number
            )))
        }
    }
}

struct StubDocuments;

#[async_trait::async_trait]
impl DocumentReader for StubDocuments {
    async fn extract_document(&self, _reference: &str) -> CollabResult<DocumentFields> {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "Dr. Ada Cole".to_string());
        fields.insert("license_number".to_string(), "LIC-100".to_string());
        Ok(DocumentFields {
            fields,
            confidence: 1.0,
        })
    }
}

struct StubSite;

#[async_trait::async_trait]
impl SiteExtractor for StubSite {
    async fn extract_site_content(&self, _url: &str) -> CollabResult<SiteContent> {
        Ok(SiteContent {
            education: Some(ExtractedText {
                value: "MD, State University".to_string(),
                confidence: 1.0,
            }),
            services: Some(ExtractedList {
                values: vec!["Consultations".to_string(), "Echocardiograms".to_string()],
                confidence: 1.0,
            }),
            affiliations: Some(ExtractedList {
                values: vec!["Springfield General".to_string()],
                confidence: 1.0,
            }),
        })
    }
}

fn collaborators(registry_calls: Arc<AtomicUsize>) -> Collaborators {
    Collaborators {
        registry: Some(Arc::new(StubRegistry {
            calls: registry_calls,
        })),
        geocoder: Some(Arc::new(StubGeocoder)),
        documents: Some(Arc::new(StubDocuments)),
        site: Some(Arc::new(StubSite)),
        notifier: Some(Arc::new(DirectoryNotifier::default())),
    }
}

async fn pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_tables(&pool).await.unwrap();
    pool
}

const INPUT: &str = "\
provider_id,full_name,address,city,state,phone,specialty,npi,license_number,website,document
P001,Dr. Ada Cole,12 Main St,Springfield,IL,+1 555 0100,Cardiology,1111111111,LIC-100,https://adacole.example.com,doc-001
P002,Dr. Ada Cole,12 Main St,Springfield,IL,+1 555 0100,Cardiology,1111111111,LIC-100,,
P003,Dr. No Body,99 Nowhere Rd,Ghost Town,XX,,Unknown,0000000000,,,
";

fn orchestrator(pool: &SqlitePool, bus: EventBus) -> PipelineOrchestrator {
    let registry_calls = Arc::new(AtomicUsize::new(0));
    PipelineOrchestrator::new(
        pool.clone(),
        TomlConfig::default(),
        bus,
        collaborators(registry_calls),
    )
}

#[tokio::test]
async fn full_run_routes_records_by_confidence() {
    let pool = pool().await;
    let bus = EventBus::new(256);
    let mut rx = bus.subscribe();
    let orchestrator = orchestrator(&pool, bus);

    let parsed = input::parse_batch(INPUT).unwrap();
    assert_eq!(parsed.records.len(), 3);
    assert!(parsed.rejected.is_empty());

    let run = PipelineRun::new("test-batch".to_string());
    let (run, report) = orchestrator
        .execute_run(run, parsed.records, CancellationToken::new())
        .await
        .unwrap();

    // No silent drops: every input record appears in the output counts
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(report.total_records, 3);
    assert_eq!(report.auto, 1);
    assert_eq!(report.review, 1);
    assert_eq!(report.hold, 1);
    assert_eq!(report.published, 1);

    // AUTO record became directory version 1
    let store = orchestrator.store();
    let published = store.get("P001").await.unwrap().unwrap();
    assert_eq!(published.status, RecordStatus::Published);
    assert_eq!(published.version, 1);
    assert_eq!(published.decision, Some(Decision::Auto));
    assert!(published.composite_score.unwrap() >= 0.90);
    assert_eq!(store.history("P001").await.unwrap().len(), 1);

    // REVIEW record was queued, not committed
    assert!(store.get("P002").await.unwrap().is_none());
    let review = db::queues::queue_entries(&pool, "review_queue").await.unwrap();
    assert_eq!(review.len(), 1);
    assert_eq!(review[0].identifier, "P002");

    // HOLD record was queued with a drafted notification
    assert!(store.get("P003").await.unwrap().is_none());
    let hold = db::queues::queue_entries(&pool, "hold_queue").await.unwrap();
    assert_eq!(hold.len(), 1);
    assert_eq!(hold[0].identifier, "P003");
    let subject: Option<String> = sqlx::query_scalar(
        "SELECT notification_subject FROM hold_queue WHERE identifier = 'P003'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(subject.unwrap().contains("Dr. No Body"));

    // Every record got a decision event, then the run completion event
    let mut decided = 0;
    let mut completed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            PipelineEvent::RecordDecided { .. } => decided += 1,
            PipelineEvent::RunCompleted { auto, review, hold, .. } => {
                completed = true;
                assert_eq!((auto, review, hold), (1, 1, 1));
            }
            _ => {}
        }
    }
    assert_eq!(decided, 3);
    assert!(completed);
}

#[tokio::test]
async fn hold_record_has_zero_score_and_failed_checks() {
    let pool = pool().await;
    let orchestrator = orchestrator(&pool, EventBus::new(16));

    let parsed = input::parse_batch(INPUT).unwrap();
    let run = PipelineRun::new("test-batch".to_string());
    let (_, _) = orchestrator
        .execute_run(run, parsed.records, CancellationToken::new())
        .await
        .unwrap();

    let entries = db::queues::queue_entries(&pool, "hold_queue").await.unwrap();
    assert_eq!(entries[0].composite_score, 0.0);
    assert!(entries[0]
        .reasons
        .contains(&"low_identity_confidence".to_string()));
}

#[tokio::test]
async fn re_running_a_batch_at_the_same_score_is_a_no_op() {
    let pool = pool().await;
    let orchestrator = orchestrator(&pool, EventBus::new(16));

    let parsed = input::parse_batch(INPUT).unwrap();
    let run = PipelineRun::new("test-batch".to_string());
    orchestrator
        .execute_run(run, parsed.records, CancellationToken::new())
        .await
        .unwrap();

    // A fresh run over the same input produces identical scores; publishing
    // must not bump versions or duplicate queue entries.
    let parsed = input::parse_batch(INPUT).unwrap();
    let run = PipelineRun::new("test-batch".to_string());
    let (_, report) = orchestrator
        .execute_run(run, parsed.records, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.auto, 1);

    let store = orchestrator.store();
    let published = store.get("P001").await.unwrap().unwrap();
    assert_eq!(published.version, 1, "unchanged score must not bump the version");
    assert_eq!(store.history("P001").await.unwrap().len(), 1);

    let review = db::queues::queue_entries(&pool, "review_queue").await.unwrap();
    assert_eq!(review.len(), 1);
    let hold = db::queues::queue_entries(&pool, "hold_queue").await.unwrap();
    assert_eq!(hold.len(), 1);
}

#[tokio::test]
async fn resumed_run_skips_checkpointed_stages() {
    let pool = pool().await;
    let registry_calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = PipelineOrchestrator::new(
        pool.clone(),
        TomlConfig::default(),
        EventBus::new(16),
        collaborators(registry_calls.clone()),
    );

    let parsed = input::parse_batch(INPUT).unwrap();
    let run = PipelineRun::new("test-batch".to_string());

    // Pretend verification and enrichment already completed and checkpointed
    // in a previous process: run them once, then replay the whole run.
    let (first_run, _) = orchestrator
        .execute_run(run, parsed.records, CancellationToken::new())
        .await
        .unwrap();
    let calls_after_first = registry_calls.load(Ordering::SeqCst);
    assert!(calls_after_first > 0);

    let parsed = input::parse_batch(INPUT).unwrap();
    let mut resumed = PipelineRun::new("test-batch".to_string());
    resumed.run_id = first_run.run_id;
    let (resumed, report) = orchestrator
        .execute_run(resumed, parsed.records, CancellationToken::new())
        .await
        .unwrap();

    // All four stages were checkpointed, so nothing re-ran
    assert_eq!(registry_calls.load(Ordering::SeqCst), calls_after_first);
    assert_eq!(resumed.state, RunState::Completed);
    assert_eq!(report.auto, 1);
}

#[tokio::test]
async fn cancelled_run_stops_without_publishing() {
    let pool = pool().await;
    let orchestrator = orchestrator(&pool, EventBus::new(16));

    let parsed = input::parse_batch(INPUT).unwrap();
    let run = PipelineRun::new("test-batch".to_string());

    let cancel_token = CancellationToken::new();
    cancel_token.cancel();

    let (run, report) = orchestrator
        .execute_run(run, parsed.records, cancel_token)
        .await
        .unwrap();

    assert_eq!(run.state, RunState::Cancelled);
    // Records flowed through untouched: present in the output, unpublished
    assert_eq!(report.total_records, 3);
    assert_eq!(report.published, 0);
    assert!(orchestrator.store().get("P001").await.unwrap().is_none());
}

#[tokio::test]
async fn malformed_rows_are_reported_not_dropped() {
    let pool = pool().await;
    let orchestrator = orchestrator(&pool, EventBus::new(16));

    let input_with_bad_rows = "\
provider_id,full_name,npi
P001,Dr. Ada Cole,1111111111
,Dr. No Id,1111111111
P001,Dr. Duplicate,1111111111
";
    let parsed = input::parse_batch(input_with_bad_rows).unwrap();
    assert_eq!(parsed.records.len(), 1);
    assert_eq!(parsed.rejected.len(), 2);

    let mut run = PipelineRun::new("test-batch".to_string());
    run.rejected = parsed.rejected.clone();

    let (_, report) = orchestrator
        .execute_run(run, parsed.records, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total_records, 1);
    assert_eq!(report.rejected.len(), 2);
    assert_eq!(report.rejected[0].line, 3);
    assert_eq!(report.rejected[1].line, 4);
}

#[tokio::test]
async fn export_renders_published_records_in_both_forms() {
    let pool = pool().await;
    let orchestrator = orchestrator(&pool, EventBus::new(16));

    let parsed = input::parse_batch(INPUT).unwrap();
    let run = PipelineRun::new("test-batch".to_string());
    orchestrator
        .execute_run(run, parsed.records, CancellationToken::new())
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("directory.json");
    let tabular_path = dir.path().join("directory.csv");
    let exported =
        provdir_pipeline::export::export_directory(orchestrator.store(), &json_path, &tabular_path)
            .await
            .unwrap();
    assert_eq!(exported, 1);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["identifier"], "P001");
    assert_eq!(json[0]["status"], "PUBLISHED");

    let tabular = std::fs::read_to_string(&tabular_path).unwrap();
    let mut lines = tabular.lines();
    assert!(lines.next().unwrap().starts_with("provider_id,name,"));
    assert!(lines.next().unwrap().starts_with("P001,"));
}
