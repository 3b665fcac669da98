//! Document data migration
//!
//! The only part of the reconciler that writes document data. A
//! [`MigrationRule`] decides per document whether a field needs
//! backfilling; each decision becomes a [`MigrationOutcome`] and the
//! outcomes fold into a [`MigrationSummary`].
//!
//! Migration is best-effort: one bad document is logged and counted, the
//! rest are still processed. Documents the listing reported but never
//! returned are counted as unlisted. Only failing to list the documents at
//! all is an error.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::remote::{Document, Remote};
use crate::transport::Transport;

/// How the source value is written to the target field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `target = source`
    Copy,
    /// `target = [source]`
    WrapInArray,
}

/// "If the target is empty and the source is not, fill the target"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRule {
    pub collection_id: String,
    pub source_key: String,
    pub target_key: String,
    pub shape: Shape,
}

impl MigrationRule {
    /// Copy a legacy field into its replacement
    pub fn copy(
        collection_id: impl Into<String>,
        legacy_key: impl Into<String>,
        new_key: impl Into<String>,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            source_key: legacy_key.into(),
            target_key: new_key.into(),
            shape: Shape::Copy,
        }
    }

    /// Wrap a single-value field into its multi-value replacement
    pub fn wrap_in_array(
        collection_id: impl Into<String>,
        scalar_key: impl Into<String>,
        array_key: impl Into<String>,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            source_key: scalar_key.into(),
            target_key: array_key.into(),
            shape: Shape::WrapInArray,
        }
    }

    /// The partial update this document needs, if any
    pub fn plan(&self, document: &Document) -> Option<Map<String, Value>> {
        if document.has_value(&self.target_key) {
            return None;
        }
        let source = document.non_empty_str(&self.source_key)?;

        let value = match self.shape {
            Shape::Copy => Value::String(source.to_string()),
            Shape::WrapInArray => Value::Array(vec![Value::String(source.to_string())]),
        };
        let mut data = Map::new();
        data.insert(self.target_key.clone(), value);
        Some(data)
    }
}

/// What happened to one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated { document_id: String },
    /// Nothing to do: target already set or source empty
    Skipped { document_id: String },
    Failed { document_id: String, error: String },
}

/// Aggregate result of applying a rule to a collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub examined: usize,
    pub migrated: usize,
    pub skipped: usize,
    /// `(document id, error)` for every failed write
    pub failed: Vec<(String, String)>,
    /// Documents counted in the listing's `total` but never returned
    pub unlisted: usize,
}

impl MigrationSummary {
    /// Fold one outcome into the summary
    pub fn record(mut self, outcome: MigrationOutcome) -> Self {
        self.examined += 1;
        match outcome {
            MigrationOutcome::Migrated { .. } => self.migrated += 1,
            MigrationOutcome::Skipped { .. } => self.skipped += 1,
            MigrationOutcome::Failed { document_id, error } => {
                self.failed.push((document_id, error))
            }
        }
        self
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unlisted == 0
    }
}

impl FromIterator<MigrationOutcome> for MigrationSummary {
    fn from_iter<I: IntoIterator<Item = MigrationOutcome>>(iter: I) -> Self {
        iter.into_iter()
            .fold(MigrationSummary::default(), MigrationSummary::record)
    }
}

/// Backfill `new_key` from `legacy_key` on every document that needs it
pub async fn migrate_field<T: Transport>(
    remote: &Remote<T>,
    collection_id: &str,
    legacy_key: &str,
    new_key: &str,
) -> Result<MigrationSummary> {
    apply(remote, &MigrationRule::copy(collection_id, legacy_key, new_key)).await
}

/// Backfill `array_key` with `[scalar_key]` on every document that needs it
pub async fn migrate_array_from_scalar<T: Transport>(
    remote: &Remote<T>,
    collection_id: &str,
    scalar_key: &str,
    array_key: &str,
) -> Result<MigrationSummary> {
    apply(
        remote,
        &MigrationRule::wrap_in_array(collection_id, scalar_key, array_key),
    )
    .await
}

/// Apply a rule to every document of its collection, one write at a time
pub async fn apply<T: Transport>(remote: &Remote<T>, rule: &MigrationRule) -> Result<MigrationSummary> {
    let list = remote.list_documents(&rule.collection_id).await?;
    tracing::info!(
        "Migrating {}.{} -> {} across {} document(s)",
        rule.collection_id,
        rule.source_key,
        rule.target_key,
        list.documents.len()
    );

    let unlisted = usize::try_from(list.total)
        .unwrap_or(usize::MAX)
        .saturating_sub(list.documents.len());
    let pending = list
        .documents
        .into_iter()
        .map(|document| {
            let patch = rule.plan(&document);
            (document.id, patch)
        });

    let mut summary = MigrationSummary {
        unlisted,
        ..Default::default()
    };
    for (document_id, patch) in pending {
        let outcome = match patch {
            None => MigrationOutcome::Skipped { document_id },
            Some(data) => {
                match remote
                    .update_document(&rule.collection_id, &document_id, data)
                    .await
                {
                    Ok(_) => MigrationOutcome::Migrated { document_id },
                    Err(e) => {
                        tracing::warn!(
                            "Failed to migrate document {}.{}: {}",
                            rule.collection_id,
                            document_id,
                            e
                        );
                        MigrationOutcome::Failed {
                            document_id,
                            error: e.to_string(),
                        }
                    }
                }
            }
        };
        summary = summary.record(outcome);
    }

    tracing::info!(
        "Migration {}.{} -> {}: {} migrated, {} skipped, {} failed",
        rule.collection_id,
        rule.source_key,
        rule.target_key,
        summary.migrated,
        summary.skipped,
        summary.failed.len()
    );
    if summary.unlisted > 0 {
        tracing::warn!(
            "{} document(s) of {} were never listed and not checked",
            summary.unlisted,
            rule.collection_id
        );
    }
    Ok(summary)
}
