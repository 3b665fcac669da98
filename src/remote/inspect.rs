//! Schema inspection: read-only calls against the management API

use std::time::Duration;

use super::{decode, DocumentList, Remote, RemoteAttribute, RemoteCollection};
use crate::error::Result;
use crate::transport::{classify, Method, ServerErrorKind, Transport, TransportError};

/// Documents requested per page when listing a collection
pub const DOCUMENT_PAGE_SIZE: usize = 100;

impl<T: Transport> Remote<T> {
    /// Fetch a collection definition with its attributes.
    ///
    /// A missing collection surfaces as a `TransportError`; use
    /// [`Remote::find_collection`] to get `None` instead.
    pub async fn get_collection(&self, collection_id: &str) -> Result<RemoteCollection> {
        let value = self
            .transport
            .request(Method::GET, &self.collection_path(collection_id), None)
            .await?;
        decode(value, &format!("collection '{}'", collection_id))
    }

    /// Fetch a collection, mapping a not-found response to `None`
    pub async fn find_collection(&self, collection_id: &str) -> Result<Option<RemoteCollection>> {
        match self.get_collection(collection_id).await {
            Ok(collection) => Ok(Some(collection)),
            Err(crate::Error::Transport(err)) if is_not_found(&err) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List every document of a collection, one page at a time.
    ///
    /// Stops once `total` documents have been read or a page comes back
    /// empty; the returned `total` is what the backend reported, so a
    /// shortfall is visible to the caller.
    pub async fn list_documents(&self, collection_id: &str) -> Result<DocumentList> {
        let mut all = DocumentList::default();
        loop {
            let offset = all.documents.len();
            let page = self
                .list_documents_page(collection_id, offset, DOCUMENT_PAGE_SIZE)
                .await?;
            all.total = page.total;
            if page.documents.is_empty() {
                break;
            }
            all.documents.extend(page.documents);
            if all.documents.len() as u64 >= all.total {
                break;
            }
        }

        if (all.documents.len() as u64) < all.total {
            tracing::warn!(
                "Listed {} of {} document(s) in {}",
                all.documents.len(),
                all.total,
                collection_id
            );
        }
        Ok(all)
    }

    /// Read one page of documents starting at `offset`
    pub async fn list_documents_page(
        &self,
        collection_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<DocumentList> {
        let path = format!(
            "{}?{}&{}",
            self.documents_path(collection_id),
            query_param("limit", limit),
            query_param("offset", offset)
        );
        let value = self.transport.request(Method::GET, &path, None).await?;
        decode(
            value,
            &format!("documents of '{}' from offset {}", collection_id, offset),
        )
    }

    /// Poll until an attribute reports `available`.
    ///
    /// Attribute creation is processed asynchronously by the backend, and
    /// document writes that touch a `processing` attribute are rejected.
    /// Returns the last observed definition, available or not.
    pub async fn wait_for_attribute(
        &self,
        collection_id: &str,
        key: &str,
        polls: u32,
        interval: Duration,
    ) -> Result<Option<RemoteAttribute>> {
        let mut last = None;
        for attempt in 0..polls.max(1) {
            if attempt > 0 {
                tokio::time::sleep(interval).await;
            }
            let collection = self.get_collection(collection_id).await?;
            last = collection.attribute(key).cloned();
            match &last {
                Some(attr) if attr.is_available() => return Ok(last),
                Some(attr) => tracing::debug!(
                    "Attribute {}.{} is {:?}, waiting",
                    collection_id,
                    key,
                    attr.status
                ),
                None => tracing::debug!("Attribute {}.{} not visible yet", collection_id, key),
            }
        }
        Ok(last)
    }
}

/// A `queries[]` parameter in the backend's JSON query syntax
fn query_param(method: &str, value: usize) -> String {
    format!(
        "queries[]={}",
        serde_json::json!({ "method": method, "values": [value] })
    )
}

/// Not-found in the sense of "this resource does not exist yet"
pub(crate) fn is_not_found(err: &TransportError) -> bool {
    classify(err) == ServerErrorKind::NotFound
}
