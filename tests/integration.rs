//! Integration tests for folio-schema
//!
//! Runs full reconciliations against the in-memory backend, from an empty
//! database through partially migrated ones.

use std::time::Duration;

use folio_schema::reconcile::StepOutcome;
use folio_schema::remote::AttributeChange;
use folio_schema::{Environment, Error, MemoryBackend, ReconcileOptions, Reconciler, SchemaSet};
use serde_json::json;

/// Helper to build fast options for tests
fn options() -> ReconcileOptions {
    ReconcileOptions {
        availability_polls: 2,
        availability_interval: Duration::ZERO,
    }
}

/// Helper to create a reconciler over a borrowed backend
fn reconciler(backend: &MemoryBackend) -> Reconciler<&MemoryBackend> {
    Reconciler::new(backend, "site", SchemaSet::required(), options())
        .expect("Built-in schema should be valid")
}

/// Helper to seed the projects collection with an undersized description
fn legacy_projects() -> MemoryBackend {
    MemoryBackend::new("site")
        .with_collection("projects", "Projects")
        .with_attribute(
            "projects",
            json!({"key": "description", "type": "string", "size": 5000}),
        )
        .with_document("projects", "p1", json!({"description": "hello"}))
}

fn outcome<'a>(
    report: &'a folio_schema::ReconcileReport,
    collection: &str,
    key: &str,
) -> &'a StepOutcome {
    let collection = report
        .collections
        .iter()
        .find(|c| c.id == collection)
        .expect("Collection missing from report");
    &collection
        .attributes
        .iter()
        .find(|a| a.key == key)
        .expect("Attribute missing from report")
        .outcome
}

// =============================================================================
// Empty backend
// =============================================================================

#[tokio::test]
async fn test_empty_backend_gets_full_schema() {
    let backend = MemoryBackend::new("site");

    let report = reconciler(&backend).run().await;

    assert!(report.is_success(), "failures: {:?}", report.failures());
    assert_eq!(backend.collection_ids(), vec!["about", "blogposts", "projects"]);
    assert_eq!(
        backend.attribute_keys("projects"),
        vec![
            "title",
            "description",
            "imageUrl",
            "images",
            "projectUrl",
            "technologies",
            "order"
        ]
    );
    assert_eq!(
        backend.attribute_keys("blogposts"),
        vec!["title", "content", "slug", "publishDate", "tags"]
    );
    assert_eq!(
        backend.attribute_keys("about"),
        vec!["content", "skills", "resumeUrl"]
    );
    assert_eq!(report.documents_migrated(), 0);
}

#[tokio::test]
async fn test_created_attributes_have_declared_shape() {
    let backend = MemoryBackend::new("site");

    reconciler(&backend).run().await;

    let description = backend.attribute("projects", "description").unwrap();
    assert_eq!(description["size"], json!(20000));
    assert_eq!(description["required"], json!(false));

    let images = backend.attribute("projects", "images").unwrap();
    assert_eq!(images["array"], json!(true));
    assert_eq!(images["size"], json!(255));

    assert_eq!(backend.attribute("projects", "order").unwrap()["type"], "integer");
    assert_eq!(
        backend.attribute("blogposts", "publishDate").unwrap()["format"],
        "datetime"
    );
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn test_second_run_only_reads() {
    let backend = MemoryBackend::new("site");
    let reconciler = reconciler(&backend);

    reconciler.run().await;
    backend.clear_calls();

    let report = reconciler.run().await;

    assert!(report.is_success());
    assert_eq!(report.schema_changes(), 0);
    assert_eq!(backend.mutation_count(), 0);
}

#[tokio::test]
async fn test_second_run_after_fallback_only_reads() {
    let backend = legacy_projects().without_attribute_updates();
    let reconciler = reconciler(&backend);

    reconciler.run().await;
    backend.clear_calls();

    let report = reconciler.run().await;

    assert!(report.is_success());
    assert_eq!(report.documents_migrated(), 0);
    assert_eq!(backend.mutation_count(), 0);
}

// =============================================================================
// Widening and fallback
// =============================================================================

#[tokio::test]
async fn test_widening_in_place() {
    let backend = legacy_projects();

    let report = reconciler(&backend).run().await;

    assert!(matches!(
        outcome(&report, "projects", "description"),
        StepOutcome::Applied(AttributeChange::Widened {
            from: Some(5000),
            to: 20000
        })
    ));
    assert_eq!(
        backend.attribute("projects", "description").unwrap()["size"],
        json!(20000)
    );
    assert!(backend.attribute("projects", "descriptionLong").is_none());
}

#[tokio::test]
async fn test_fallback_when_updates_unsupported() {
    let backend = legacy_projects().without_attribute_updates();

    let report = reconciler(&backend).run().await;

    assert!(report.is_success(), "failures: {:?}", report.failures());
    let fallback = backend.attribute("projects", "descriptionLong").unwrap();
    assert_eq!(fallback["size"], json!(20000));

    let document = backend.document("projects", "p1").unwrap();
    assert_eq!(document["descriptionLong"], json!("hello"));
    assert_eq!(document["description"], json!("hello"));
    assert_eq!(
        backend.attribute("projects", "description").unwrap()["size"],
        json!(5000)
    );
    assert_eq!(report.documents_migrated(), 1);
}

#[tokio::test]
async fn test_fallback_backfills_documents_beyond_first_page() {
    let mut backend = MemoryBackend::new("site")
        .with_collection("projects", "Projects")
        .with_attribute(
            "projects",
            json!({"key": "description", "type": "string", "size": 5000}),
        );
    for i in 0..60 {
        backend = backend.with_document(
            "projects",
            &format!("p{}", i),
            json!({"description": format!("project {}", i)}),
        );
    }
    let backend = backend.with_max_page_size(25).without_attribute_updates();

    let report = reconciler(&backend).run().await;

    assert!(report.is_success(), "failures: {:?}", report.failures());
    assert_eq!(report.documents_migrated(), 60);
    assert_eq!(report.warnings(), 0);
    for i in 0..60 {
        let document = backend.document("projects", &format!("p{}", i)).unwrap();
        assert_eq!(document["descriptionLong"], json!(format!("project {}", i)));
    }
}

#[tokio::test]
async fn test_widening_retries_at_server_maximum() {
    let backend = legacy_projects().with_max_string_size(16384);

    let report = reconciler(&backend).run().await;

    assert!(matches!(
        outcome(&report, "projects", "description"),
        StepOutcome::Applied(AttributeChange::Widened {
            from: Some(5000),
            to: 16384
        })
    ));
    assert_eq!(
        backend.attribute("projects", "description").unwrap()["size"],
        json!(16384)
    );
}

#[tokio::test]
async fn test_never_shrinks_larger_attribute() {
    let backend = MemoryBackend::new("site")
        .with_collection("projects", "Projects")
        .with_attribute("projects", json!({"key": "title", "type": "string", "size": 1000}));

    let report = reconciler(&backend).run().await;

    assert!(matches!(
        outcome(&report, "projects", "title"),
        StepOutcome::Applied(AttributeChange::Satisfied)
    ));
    assert_eq!(
        backend.attribute("projects", "title").unwrap()["size"],
        json!(1000)
    );
    assert!(backend
        .calls()
        .iter()
        .all(|c| !c.path.ends_with("/attributes/string/title")));
}

// =============================================================================
// Partial state and failures
// =============================================================================

#[tokio::test]
async fn test_stale_read_conflict_is_tolerated() {
    let backend = MemoryBackend::new("site")
        .with_collection("projects", "Projects")
        .with_stale_reads(1);

    let report = reconciler(&backend).run().await;

    assert!(report.is_success(), "failures: {:?}", report.failures());
    assert!(report.collections[0].failure.is_none());
}

#[tokio::test]
async fn test_array_backfill_is_best_effort() {
    let backend = MemoryBackend::new("site")
        .with_collection("projects", "Projects")
        .with_attribute("projects", json!({"key": "imageUrl", "type": "string", "size": 255}))
        .with_document("projects", "p1", json!({"imageUrl": "one.png"}))
        .with_document("projects", "p2", json!({"imageUrl": "two.png"}))
        .failing_document("p1");

    let report = reconciler(&backend).run().await;

    assert!(report.is_success());
    assert_eq!(report.warnings(), 1);
    assert_eq!(report.documents_migrated(), 1);
    assert_eq!(
        backend.document("projects", "p2").unwrap()["images"],
        json!(["two.png"])
    );
}

#[tokio::test]
async fn test_wrong_database_fails_every_collection() {
    let backend = MemoryBackend::new("other");

    let report = reconciler(&backend).run().await;

    assert!(!report.is_success());
    assert_eq!(report.failures().len(), 3);
    assert!(report.collections.iter().all(|c| c.attributes.is_empty()));
}

// =============================================================================
// Configuration and read-only checks
// =============================================================================

#[test]
fn test_missing_configuration_names_every_variable() {
    let env = Environment::from_pairs([("APPWRITE_ENDPOINT", "https://cloud.example.com/v1")]);

    let result = Reconciler::from_environment(&env, SchemaSet::required(), options());

    match result {
        Err(Error::Configuration { missing }) => assert_eq!(
            missing,
            vec![
                "NEXT_PUBLIC_APPWRITE_PROJECT_ID",
                "NEXT_PUBLIC_APPWRITE_DATABASE_ID",
                "APPWRITE_API_KEY"
            ]
        ),
        Err(other) => panic!("Expected configuration error, got {:?}", other),
        Ok(_) => panic!("Expected configuration error"),
    }
}

#[tokio::test]
async fn test_missing_collections_is_read_only() {
    let backend = MemoryBackend::new("site").with_collection("projects", "Projects");

    let missing = reconciler(&backend).missing_collections().await.unwrap();

    assert_eq!(missing, vec!["blogposts", "about"]);
    assert_eq!(backend.mutation_count(), 0);
}
