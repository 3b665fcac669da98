//! Reconciliation driver
//!
//! Walks a [`SchemaSet`] in order and converges the remote schema as far as
//! it can:
//!
//! ```text
//! for each collection:
//!     ensure collection          (failure skips the collection)
//!     ensure each attribute      (failure is recorded, next attribute)
//!         string widening unsupported + fallback declared
//!             -> ensure fallback, wait until available, backfill it
//!     run each array backfill    (failure is a warning)
//! ```
//!
//! Nothing is persisted between runs. A second run over a converged backend
//! only reads.

use crate::config::ReconcileOptions;
use crate::error::Error;
use crate::migrate::{self, MigrationSummary};
use crate::remote::{AttributeChange, Remote};
use crate::schema::{AttributeSpec, CollectionSpec, FieldKind, SchemaSet};
use crate::transport::Transport;

/// Result of one attribute step
#[derive(Debug)]
pub enum StepOutcome {
    /// The attribute itself now satisfies the schema
    Applied(AttributeChange),
    /// The attribute could not be widened; data lives in the fallback key
    FellBack {
        fallback_key: String,
        change: AttributeChange,
        migration: MigrationSummary,
    },
    Failed(Error),
}

#[derive(Debug)]
pub struct AttributeReport {
    pub key: String,
    pub outcome: StepOutcome,
}

#[derive(Debug)]
pub struct BackfillReport {
    pub from: String,
    pub to: String,
    pub result: Result<MigrationSummary, Error>,
}

#[derive(Debug)]
pub struct CollectionReport {
    pub id: String,
    /// Set when the collection itself could not be ensured
    pub failure: Option<Error>,
    pub attributes: Vec<AttributeReport>,
    pub backfills: Vec<BackfillReport>,
}

impl CollectionReport {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            failure: None,
            attributes: Vec::new(),
            backfills: Vec::new(),
        }
    }
}

/// Everything a run did, step by step
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub collections: Vec<CollectionReport>,
}

impl ReconcileReport {
    /// Every collection and attribute step completed
    pub fn is_success(&self) -> bool {
        self.failures().is_empty()
    }

    /// `(target, error)` for every failed schema step
    pub fn failures(&self) -> Vec<(String, &Error)> {
        let mut failures = Vec::new();
        for collection in &self.collections {
            if let Some(e) = &collection.failure {
                failures.push((collection.id.clone(), e));
            }
            for attribute in &collection.attributes {
                if let StepOutcome::Failed(e) = &attribute.outcome {
                    failures.push((format!("{}.{}", collection.id, attribute.key), e));
                }
            }
        }
        failures
    }

    /// Best-effort problems: failed backfills, failed document writes and
    /// documents a listing never returned
    pub fn warnings(&self) -> usize {
        self.migrations()
            .map(|summary| summary.failed.len() + summary.unlisted)
            .sum::<usize>()
            + self
                .collections
                .iter()
                .flat_map(|c| &c.backfills)
                .filter(|b| b.result.is_err())
                .count()
    }

    /// Documents written across all migrations
    pub fn documents_migrated(&self) -> usize {
        self.migrations().map(|summary| summary.migrated).sum()
    }

    /// Attributes created or widened
    pub fn schema_changes(&self) -> usize {
        self.collections
            .iter()
            .flat_map(|c| &c.attributes)
            .filter(|a| match &a.outcome {
                StepOutcome::Applied(change) | StepOutcome::FellBack { change, .. } => {
                    *change != AttributeChange::Satisfied
                }
                StepOutcome::Failed(_) => false,
            })
            .count()
    }

    fn migrations(&self) -> impl Iterator<Item = &MigrationSummary> + '_ {
        self.collections.iter().flat_map(|collection| {
            let fallbacks = collection.attributes.iter().filter_map(|a| match &a.outcome {
                StepOutcome::FellBack { migration, .. } => Some(migration),
                _ => None,
            });
            let backfills = collection.backfills.iter().filter_map(|b| b.result.as_ref().ok());
            fallbacks.chain(backfills)
        })
    }
}

/// Converge the remote schema towards `schema`
pub async fn reconcile<T: Transport>(
    remote: &Remote<T>,
    schema: &SchemaSet,
    options: &ReconcileOptions,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    for collection in &schema.collections {
        report
            .collections
            .push(reconcile_collection(remote, collection, options).await);
    }

    if report.is_success() {
        tracing::info!("Collections and attributes synced successfully");
    } else {
        tracing::error!(
            "Sync finished with {} failed step(s); re-run after fixing them",
            report.failures().len()
        );
    }
    report
}

async fn reconcile_collection<T: Transport>(
    remote: &Remote<T>,
    spec: &CollectionSpec,
    options: &ReconcileOptions,
) -> CollectionReport {
    let mut report = CollectionReport::new(&spec.id);

    if let Err(e) = remote.ensure_collection(&spec.id, &spec.name).await {
        tracing::error!(
            "Failed to ensure collection {}, skipping its attributes: {}",
            spec.id,
            e
        );
        report.failure = Some(e);
        return report;
    }

    for attribute in &spec.attributes {
        let outcome = ensure_declared(remote, &spec.id, attribute, options).await;
        if let StepOutcome::Failed(e) = &outcome {
            tracing::error!("ensure {}.{} failed: {}", spec.id, attribute.key, e);
        }
        report.attributes.push(AttributeReport {
            key: attribute.key.clone(),
            outcome,
        });
    }

    for backfill in &spec.backfills {
        let result =
            migrate::migrate_array_from_scalar(remote, &spec.id, &backfill.from, &backfill.to)
                .await;
        if let Err(e) = &result {
            tracing::warn!(
                "Array migration warning for {}.{} -> {}: {}",
                spec.id,
                backfill.from,
                backfill.to,
                e
            );
        }
        report.backfills.push(BackfillReport {
            from: backfill.from.clone(),
            to: backfill.to.clone(),
            result,
        });
    }

    report
}

async fn ensure_declared<T: Transport>(
    remote: &Remote<T>,
    collection_id: &str,
    attribute: &AttributeSpec,
    options: &ReconcileOptions,
) -> StepOutcome {
    let fallback = match (&attribute.fallback, &attribute.kind) {
        (Some(key), FieldKind::String { size }) => Some((key.as_str(), *size)),
        _ => None,
    };

    // Once the fallback holds the data, the legacy key is left alone
    if let Some((fallback_key, size)) = fallback {
        if fallback_satisfied(remote, collection_id, fallback_key, size).await {
            tracing::info!(
                "Fallback {}.{} already in place for {}. Skipping update.",
                collection_id,
                fallback_key,
                attribute.key
            );
            return backfill_fallback(
                remote,
                collection_id,
                &attribute.key,
                fallback_key,
                AttributeChange::Satisfied,
            )
            .await;
        }
    }

    match (remote.ensure_attribute(collection_id, attribute).await, fallback) {
        (Ok(change), _) => StepOutcome::Applied(change),
        (Err(e), Some((fallback_key, size))) if e.is_recoverable() => {
            tracing::warn!(
                "Attribute updates not supported on this backend. Creating fallback attribute '{}' and migrating data.",
                fallback_key
            );
            fall_back(remote, collection_id, &attribute.key, fallback_key, size, options).await
        }
        (Err(e), _) => StepOutcome::Failed(e),
    }
}

async fn fallback_satisfied<T: Transport>(
    remote: &Remote<T>,
    collection_id: &str,
    fallback_key: &str,
    size: u32,
) -> bool {
    let Ok(collection) = remote.get_collection(collection_id).await else {
        return false;
    };
    collection.attribute(fallback_key).is_some_and(|attr| {
        attr.matches(&AttributeSpec::string(fallback_key, size))
            && attr.size().is_some_and(|s| s >= size)
    })
}

async fn fall_back<T: Transport>(
    remote: &Remote<T>,
    collection_id: &str,
    legacy_key: &str,
    fallback_key: &str,
    size: u32,
    options: &ReconcileOptions,
) -> StepOutcome {
    let change = match remote
        .ensure_string_attribute(collection_id, fallback_key, size, false)
        .await
    {
        Ok(change) => change,
        Err(e) => return StepOutcome::Failed(e),
    };

    if change == AttributeChange::Created {
        match remote
            .wait_for_attribute(
                collection_id,
                fallback_key,
                options.availability_polls,
                options.availability_interval,
            )
            .await
        {
            Ok(Some(attr)) if attr.is_available() => {}
            Ok(_) => tracing::warn!(
                "Attribute {}.{} is not available yet; backfill may fail",
                collection_id,
                fallback_key
            ),
            Err(e) => tracing::warn!(
                "Could not check availability of {}.{}: {}",
                collection_id,
                fallback_key,
                e
            ),
        }
    }

    backfill_fallback(remote, collection_id, legacy_key, fallback_key, change).await
}

async fn backfill_fallback<T: Transport>(
    remote: &Remote<T>,
    collection_id: &str,
    legacy_key: &str,
    fallback_key: &str,
    change: AttributeChange,
) -> StepOutcome {
    match migrate::migrate_field(remote, collection_id, legacy_key, fallback_key).await {
        Ok(migration) => StepOutcome::FellBack {
            fallback_key: fallback_key.to_string(),
            change,
            migration,
        },
        Err(e) => StepOutcome::Failed(e),
    }
}
