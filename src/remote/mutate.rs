//! Schema mutation: idempotent create-or-widen operations
//!
//! Every `ensure_*` call reads the current definition first and only writes
//! when the remote schema falls short of the request. Sizes only ever grow.

use serde_json::{json, Map, Value};

use super::inspect::is_not_found;
use super::{decode, Document, Remote, RemoteAttribute, RemoteCollection};
use crate::error::{Error, Result};
use crate::schema::{AttributeSpec, FieldKind};
use crate::transport::{classify, Method, ServerErrorKind, Transport};
use crate::validation;

/// What an `ensure_*` call did to an attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeChange {
    /// The attribute did not exist and was created
    Created,
    /// The attribute existed with a smaller size and was updated in place
    Widened { from: Option<u32>, to: u32 },
    /// The attribute already satisfied the request
    Satisfied,
}

impl<T: Transport> Remote<T> {
    /// Make sure a collection exists, creating it if needed.
    ///
    /// Returns the existing definition untouched when present. A create that
    /// races with another writer (409) re-reads and returns what is there.
    pub async fn ensure_collection(&self, id: &str, name: &str) -> Result<RemoteCollection> {
        validation::validate_collection_id(id)?;

        match self.get_collection(id).await {
            Ok(existing) => {
                tracing::info!("Collection {} already exists. Skipping creation.", id);
                return Ok(existing);
            }
            Err(Error::Transport(err)) if is_not_found(&err) => {}
            Err(e) => return Err(e),
        }

        tracing::info!("Creating collection {} ({})", id, name);
        let payload = json!({
            "collectionId": id,
            "name": name,
            "permissions": [],
            "documentSecurity": true,
        });

        match self
            .transport
            .request(Method::POST, &self.collections_path(), Some(&payload))
            .await
        {
            Ok(value) => decode(value, &format!("created collection '{}'", id)),
            Err(err) if classify(&err) == ServerErrorKind::AlreadyExists => {
                tracing::info!("Collection {} already exists (409). Continuing.", id);
                self.get_collection(id).await
            }
            Err(err) => {
                tracing::error!("Failed to create collection {}: {}", id, err);
                Err(err.into())
            }
        }
    }

    /// Make sure any declared attribute exists, dispatching on its kind
    pub async fn ensure_attribute(
        &self,
        collection_id: &str,
        spec: &AttributeSpec,
    ) -> Result<AttributeChange> {
        match spec.kind {
            FieldKind::String { size } => {
                self.ensure_string_attribute(collection_id, &spec.key, size, spec.array)
                    .await
            }
            FieldKind::Integer | FieldKind::Datetime => {
                self.ensure_fixed_attribute(collection_id, spec).await
            }
        }
    }

    /// Make sure a string attribute exists with at least `desired_size`.
    ///
    /// Widening that the backend cannot perform in place comes back as
    /// [`Error::AttributeUpdateUnsupported`] for the caller to handle.
    pub async fn ensure_string_attribute(
        &self,
        collection_id: &str,
        key: &str,
        desired_size: u32,
        array: bool,
    ) -> Result<AttributeChange> {
        let spec = if array {
            AttributeSpec::string_array(key, desired_size)
        } else {
            AttributeSpec::string(key, desired_size)
        };

        let collection = self.get_collection(collection_id).await?;
        let existing = match collection.attribute(key) {
            None => {
                tracing::info!(
                    "Attribute {}.{} not found. Creating with size {}...",
                    collection_id,
                    key,
                    desired_size
                );
                return self.create_attribute(collection_id, &spec).await;
            }
            Some(attr) if !attr.matches(&spec) => {
                return Err(kind_mismatch(collection_id, &spec, attr));
            }
            Some(attr) => attr,
        };

        let current = existing.size();
        if let Some(size) = current {
            if size >= desired_size {
                tracing::info!(
                    "Attribute {}.{} already has size {} (>= {}). Skipping update.",
                    collection_id,
                    key,
                    size,
                    desired_size
                );
                return Ok(AttributeChange::Satisfied);
            }
        }

        tracing::info!(
            "Attribute {}.{} exists with size {:?}. Attempting update to {}...",
            collection_id,
            key,
            current,
            desired_size
        );

        let err = match self
            .update_string_attribute(collection_id, key, desired_size, array)
            .await
        {
            Ok(()) => {
                return Ok(AttributeChange::Widened {
                    from: current,
                    to: desired_size,
                })
            }
            Err(err) => err,
        };

        match classify(&err) {
            ServerErrorKind::RouteNotFound => {
                tracing::warn!(
                    "Backend does not support updating {}.{} in place",
                    collection_id,
                    key
                );
                Err(Error::AttributeUpdateUnsupported {
                    collection: collection_id.to_string(),
                    key: key.to_string(),
                })
            }
            ServerErrorKind::SizeCeiling(max)
                if max < desired_size && current.map_or(true, |size| size < max) =>
            {
                tracing::warn!(
                    "Update to {} rejected. Retrying with server max {}...",
                    desired_size,
                    max
                );
                self.update_string_attribute(collection_id, key, max, array)
                    .await?;
                Ok(AttributeChange::Widened {
                    from: current,
                    to: max,
                })
            }
            _ => {
                tracing::error!(
                    "Failed to update attribute {}.{}: {}",
                    collection_id,
                    key,
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Make sure an integer attribute exists
    pub async fn ensure_integer_attribute(
        &self,
        collection_id: &str,
        key: &str,
    ) -> Result<AttributeChange> {
        self.ensure_fixed_attribute(collection_id, &AttributeSpec::integer(key))
            .await
    }

    /// Make sure a datetime attribute exists
    pub async fn ensure_datetime_attribute(
        &self,
        collection_id: &str,
        key: &str,
    ) -> Result<AttributeChange> {
        self.ensure_fixed_attribute(collection_id, &AttributeSpec::datetime(key))
            .await
    }

    /// Existence check then create, for kinds that are never widened.
    ///
    /// A failed pre-check is not fatal: the create is attempted anyway and
    /// its own failure is what gets reported.
    async fn ensure_fixed_attribute(
        &self,
        collection_id: &str,
        spec: &AttributeSpec,
    ) -> Result<AttributeChange> {
        match self.get_collection(collection_id).await {
            Ok(collection) => match collection.attribute(&spec.key) {
                Some(attr) if attr.matches(spec) => {
                    tracing::info!(
                        "Attribute {}.{} ({}) already exists. Skipping.",
                        collection_id,
                        spec.key,
                        spec.describe()
                    );
                    return Ok(AttributeChange::Satisfied);
                }
                Some(attr) => return Err(kind_mismatch(collection_id, spec, attr)),
                None => {}
            },
            Err(e) => tracing::warn!(
                "Pre-check for {} attribute {}.{} failed, will attempt create: {}",
                spec.describe(),
                collection_id,
                spec.key,
                e
            ),
        }

        self.create_attribute(collection_id, spec).await
    }

    async fn create_attribute(
        &self,
        collection_id: &str,
        spec: &AttributeSpec,
    ) -> Result<AttributeChange> {
        validation::validate_attribute_key(&spec.key)?;

        let payload = match spec.kind {
            FieldKind::String { size } => json!({
                "key": spec.key,
                "required": false,
                "size": size,
                "array": spec.array,
            }),
            FieldKind::Integer | FieldKind::Datetime if spec.array => json!({
                "key": spec.key,
                "required": false,
                "array": true,
            }),
            FieldKind::Integer | FieldKind::Datetime => json!({
                "key": spec.key,
                "required": false,
            }),
        };
        let path = self.attributes_path(collection_id, spec.kind.as_str());

        match self
            .transport
            .request(Method::POST, &path, Some(&payload))
            .await
        {
            Ok(_) => {
                tracing::info!(
                    "Created attribute {}.{} ({})",
                    collection_id,
                    spec.key,
                    spec.describe()
                );
                Ok(AttributeChange::Created)
            }
            Err(err) if classify(&err) == ServerErrorKind::AlreadyExists => {
                tracing::warn!(
                    "Attribute {}.{} appeared before it could be created. Continuing.",
                    collection_id,
                    spec.key
                );
                Ok(AttributeChange::Satisfied)
            }
            Err(err) => {
                tracing::error!(
                    "Failed to create attribute {}.{}: {}",
                    collection_id,
                    spec.key,
                    err
                );
                Err(err.into())
            }
        }
    }

    async fn update_string_attribute(
        &self,
        collection_id: &str,
        key: &str,
        size: u32,
        array: bool,
    ) -> std::result::Result<(), crate::transport::TransportError> {
        let path = format!("{}/{}", self.attributes_path(collection_id, "string"), key);
        let payload = json!({
            "key": key,
            "required": false,
            "size": size,
            "array": array,
        });
        self.transport
            .request(Method::PUT, &path, Some(&payload))
            .await?;
        tracing::info!("Attribute {}.{} updated to size {}", collection_id, key, size);
        Ok(())
    }

    /// Partially update one document with the given fields
    pub async fn update_document(
        &self,
        collection_id: &str,
        document_id: &str,
        data: Map<String, Value>,
    ) -> Result<Document> {
        validation::validate_document_id(document_id)?;

        let path = format!("{}/{}", self.documents_path(collection_id), document_id);
        let payload = json!({ "data": data });
        let value = self
            .transport
            .request(Method::PATCH, &path, Some(&payload))
            .await?;
        decode(value, &format!("updated document '{}'", document_id))
    }
}

fn kind_mismatch(collection_id: &str, spec: &AttributeSpec, actual: &RemoteAttribute) -> Error {
    Error::AttributeKindMismatch {
        collection: collection_id.to_string(),
        key: spec.key.clone(),
        expected: spec.describe(),
        actual: actual.describe(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryBackend;

    fn projects_with(attribute: Value) -> MemoryBackend {
        MemoryBackend::new("site")
            .with_collection("projects", "Projects")
            .with_attribute("projects", attribute)
    }

    #[tokio::test]
    async fn test_ensure_collection_creates_then_reuses() {
        let backend = MemoryBackend::new("site");
        let remote = Remote::new(&backend, "site");

        let created = remote.ensure_collection("projects", "Projects").await.unwrap();
        assert_eq!(created.id, "projects");
        assert_eq!(backend.mutation_count(), 1);

        let again = remote.ensure_collection("projects", "Projects").await.unwrap();
        assert_eq!(again.id, "projects");
        assert_eq!(backend.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_ensure_collection_tolerates_conflict() {
        // Reads report 404 once, as if the collection was created by someone
        // else between the read and the create.
        let backend = MemoryBackend::new("site")
            .with_collection("projects", "Projects")
            .with_stale_reads(1);
        let remote = Remote::new(&backend, "site");

        let collection = remote.ensure_collection("projects", "Projects").await.unwrap();
        assert_eq!(collection.id, "projects");
    }

    #[tokio::test]
    async fn test_ensure_collection_propagates_unrecognized() {
        let backend = MemoryBackend::new("site").with_unauthorized();
        let remote = Remote::new(&backend, "site");
        let err = remote.ensure_collection("projects", "Projects").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(backend.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_string_attribute_created_when_missing() {
        let backend = MemoryBackend::new("site").with_collection("projects", "Projects");
        let remote = Remote::new(&backend, "site");

        let change = remote
            .ensure_string_attribute("projects", "tags", 255, true)
            .await
            .unwrap();
        assert_eq!(change, AttributeChange::Created);

        let attr = backend.attribute("projects", "tags").unwrap();
        assert_eq!(attr["size"], 255);
        assert_eq!(attr["array"], true);
    }

    #[tokio::test]
    async fn test_string_attribute_never_shrinks() {
        let backend = projects_with(json!({"key": "title", "type": "string", "size": 1000}));
        let remote = Remote::new(&backend, "site");

        let change = remote
            .ensure_string_attribute("projects", "title", 255, false)
            .await
            .unwrap();
        assert_eq!(change, AttributeChange::Satisfied);
        assert_eq!(backend.mutation_count(), 0);
        assert_eq!(backend.attribute("projects", "title").unwrap()["size"], 1000);
    }

    #[tokio::test]
    async fn test_string_attribute_widened_in_place() {
        let backend = projects_with(json!({"key": "description", "type": "string", "size": 5000}));
        let remote = Remote::new(&backend, "site");

        let change = remote
            .ensure_string_attribute("projects", "description", 20000, false)
            .await
            .unwrap();
        assert_eq!(
            change,
            AttributeChange::Widened {
                from: Some(5000),
                to: 20000
            }
        );
        assert_eq!(
            backend.attribute("projects", "description").unwrap()["size"],
            20000
        );
    }

    #[tokio::test]
    async fn test_update_unsupported_is_typed() {
        let backend = projects_with(json!({"key": "description", "type": "string", "size": 5000}))
            .without_attribute_updates();
        let remote = Remote::new(&backend, "site");

        let err = remote
            .ensure_string_attribute("projects", "description", 20000, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttributeUpdateUnsupported { ref key, .. } if key == "description"));
    }

    #[tokio::test]
    async fn test_size_ceiling_retry() {
        let backend = projects_with(json!({"key": "description", "type": "string", "size": 5000}))
            .with_max_string_size(16381);
        let remote = Remote::new(&backend, "site");

        let change = remote
            .ensure_string_attribute("projects", "description", 20000, false)
            .await
            .unwrap();
        assert_eq!(
            change,
            AttributeChange::Widened {
                from: Some(5000),
                to: 16381
            }
        );
        assert_eq!(backend.mutation_count(), 2);
    }

    #[tokio::test]
    async fn test_size_ceiling_not_above_current_propagates() {
        let backend = projects_with(json!({"key": "description", "type": "string", "size": 5000}))
            .with_max_string_size(5000);
        let remote = Remote::new(&backend, "site");

        let err = remote
            .ensure_string_attribute("projects", "description", 20000, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(backend.mutation_count(), 1);
    }

    /// Rejects every update while naming a ceiling above the requested size
    struct GenerousCeiling {
        updates: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Transport for GenerousCeiling {
        async fn request(
            &self,
            method: Method,
            _path: &str,
            _body: Option<&Value>,
        ) -> std::result::Result<Value, crate::transport::TransportError> {
            if method == Method::GET {
                return Ok(json!({
                    "$id": "projects",
                    "name": "Projects",
                    "attributes": [{"key": "description", "type": "string", "size": 5000,
                                    "status": "available", "required": false, "array": false}]
                }));
            }
            self.updates
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(crate::transport::TransportError::Http {
                status: 400,
                status_text: "Bad Request".into(),
                body: r#"{"message":"Invalid `size` param: Value must be a valid integer and no longer than 30000 chars","code":400,"type":"general_argument_invalid"}"#.into(),
            })
        }
    }

    #[tokio::test]
    async fn test_size_ceiling_above_request_propagates() {
        let transport = GenerousCeiling {
            updates: Default::default(),
        };
        let remote = Remote::new(&transport, "site");

        let err = remote
            .ensure_string_attribute("projects", "description", 20000, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(
            transport
                .updates
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_kind_mismatch_reported() {
        let backend = projects_with(json!({"key": "order", "type": "string", "size": 10}));
        let remote = Remote::new(&backend, "site");

        let err = remote
            .ensure_integer_attribute("projects", "order")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttributeKindMismatch { .. }));
        assert_eq!(
            err.to_string(),
            "Attribute 'projects.order' exists as string, expected integer"
        );
    }

    #[tokio::test]
    async fn test_fixed_attributes_idempotent() {
        let backend = MemoryBackend::new("site").with_collection("blogposts", "BlogPosts");
        let remote = Remote::new(&backend, "site");

        assert_eq!(
            remote
                .ensure_datetime_attribute("blogposts", "publishDate")
                .await
                .unwrap(),
            AttributeChange::Created
        );
        assert_eq!(
            remote
                .ensure_datetime_attribute("blogposts", "publishDate")
                .await
                .unwrap(),
            AttributeChange::Satisfied
        );
        assert_eq!(backend.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_update_document_rejects_unsafe_id() {
        let backend = MemoryBackend::new("site").with_collection("projects", "Projects");
        let remote = Remote::new(&backend, "site");

        let err = remote
            .update_document("projects", "../attributes", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier { .. }));
        assert!(backend.calls().is_empty());
    }
}
