//! In-process backend
//!
//! Emulates the management API routes the reconciler uses, with the same
//! status codes and error `type` markers a real server returns. Every call is
//! recorded so tests can assert on what was (and was not) sent.
//!
//! Server quirks can be switched on:
//! - [`MemoryBackend::without_attribute_updates`]: the attribute update route
//!   does not exist (`general_route_not_found`)
//! - [`MemoryBackend::with_max_string_size`]: updates above a ceiling are
//!   rejected with a "no longer than N chars" message
//! - [`MemoryBackend::failing_document`]: writes to one document fail
//! - [`MemoryBackend::with_stale_reads`]: the first N collection reads 404
//! - [`MemoryBackend::with_max_page_size`]: document pages are capped
//! - [`MemoryBackend::with_unlisted_documents`]: `total` counts documents that
//!   never show up in a page

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{Method, Transport, TransportError};

/// A call the backend received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
}

impl RecordedCall {
    /// POST, PUT, PATCH and DELETE change backend state
    pub fn is_mutation(&self) -> bool {
        self.method != Method::GET
    }
}

#[derive(Debug, Default)]
struct StoredCollection {
    name: String,
    attributes: Vec<Value>,
    documents: Vec<Map<String, Value>>,
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, StoredCollection>,
    calls: Vec<RecordedCall>,
    stale_reads: usize,
}

/// In-memory stand-in for one database on the backend
#[derive(Debug)]
pub struct MemoryBackend {
    database_id: String,
    updates_supported: bool,
    max_string_size: Option<u32>,
    unauthorized: bool,
    failing_documents: HashSet<String>,
    max_page_size: usize,
    unlisted_documents: usize,
    state: Mutex<State>,
}

/// Page size the backend uses when no `limit` query is given
const DEFAULT_PAGE_SIZE: usize = 25;

type Reply = Result<Value, TransportError>;

impl MemoryBackend {
    pub fn new(database_id: impl Into<String>) -> Self {
        Self {
            database_id: database_id.into(),
            updates_supported: true,
            max_string_size: None,
            unauthorized: false,
            failing_documents: HashSet::new(),
            max_page_size: usize::MAX,
            unlisted_documents: 0,
            state: Mutex::new(State::default()),
        }
    }

    /// Answer attribute updates with `general_route_not_found`
    pub fn without_attribute_updates(mut self) -> Self {
        self.updates_supported = false;
        self
    }

    /// Reject string sizes above `max`
    pub fn with_max_string_size(mut self, max: u32) -> Self {
        self.max_string_size = Some(max);
        self
    }

    /// Answer every call with 401
    pub fn with_unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }

    /// Fail every write to the given document
    pub fn failing_document(mut self, document_id: impl Into<String>) -> Self {
        self.failing_documents.insert(document_id.into());
        self
    }

    /// Serve at most `max` documents per page, whatever the `limit` asks for
    pub fn with_max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = max;
        self
    }

    /// Count `count` more documents in `total` than any page will return
    pub fn with_unlisted_documents(mut self, count: usize) -> Self {
        self.unlisted_documents = count;
        self
    }

    /// Report the first `reads` collection reads as not found
    pub fn with_stale_reads(self, reads: usize) -> Self {
        self.lock().stale_reads = reads;
        self
    }

    pub fn with_collection(self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.lock().collections.insert(
            id.into(),
            StoredCollection {
                name: name.into(),
                ..Default::default()
            },
        );
        self
    }

    /// Seed an attribute definition; `status` defaults to `available`
    pub fn with_attribute(self, collection_id: &str, mut attribute: Value) -> Self {
        if let Some(obj) = attribute.as_object_mut() {
            obj.entry("status").or_insert_with(|| json!("available"));
            obj.entry("required").or_insert(json!(false));
            obj.entry("array").or_insert(json!(false));
        }
        self.lock()
            .collections
            .entry(collection_id.to_string())
            .or_default()
            .attributes
            .push(attribute);
        self
    }

    pub fn with_document(self, collection_id: &str, id: &str, fields: Value) -> Self {
        let mut document = fields.as_object().cloned().unwrap_or_default();
        document.insert("$id".to_string(), json!(id));
        document.insert("$collectionId".to_string(), json!(collection_id));
        self.lock()
            .collections
            .entry(collection_id.to_string())
            .or_default()
            .documents
            .push(document);
        self
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of state-changing calls received so far, successful or not
    pub fn mutation_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_mutation()).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn collection_ids(&self) -> Vec<String> {
        self.lock().collections.keys().cloned().collect()
    }

    pub fn attribute(&self, collection_id: &str, key: &str) -> Option<Value> {
        self.lock()
            .collections
            .get(collection_id)?
            .attributes
            .iter()
            .find(|a| a["key"] == key)
            .cloned()
    }

    pub fn attribute_keys(&self, collection_id: &str) -> Vec<String> {
        self.lock()
            .collections
            .get(collection_id)
            .map(|c| {
                c.attributes
                    .iter()
                    .filter_map(|a| a["key"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn document(&self, collection_id: &str, id: &str) -> Option<Value> {
        self.lock()
            .collections
            .get(collection_id)?
            .documents
            .iter()
            .find(|d| d["$id"] == id)
            .map(|d| Value::Object(d.clone()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the next assert
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn route(&self, state: &mut State, method: &Method, path: &str, body: Option<&Value>) -> Reply {
        if self.unauthorized {
            return error(
                401,
                "user_unauthorized",
                "The current user is not authorized to perform the requested action.",
            );
        }

        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match segments.as_slice() {
            ["databases", db, ..] if *db != self.database_id => {
                error(404, "database_not_found", "Database not found")
            }
            ["databases", _, "collections"] if *method == Method::POST => {
                create_collection(state, body)
            }
            ["databases", _, "collections", id] if *method == Method::GET => {
                if state.stale_reads > 0 {
                    state.stale_reads -= 1;
                    return collection_not_found();
                }
                get_collection(state, id)
            }
            ["databases", _, "collections", id, "attributes", kind] if *method == Method::POST => {
                create_attribute(state, id, kind, body)
            }
            ["databases", _, "collections", id, "attributes", "string", key]
                if *method == Method::PUT =>
            {
                if !self.updates_supported {
                    return route_not_found();
                }
                self.update_string_attribute(state, id, key, body)
            }
            ["databases", _, "collections", id, "documents"] if *method == Method::GET => {
                let page = Page::from_query(query);
                self.list_documents(state, id, page)
            }
            ["databases", _, "collections", id, "documents", doc] if *method == Method::PATCH => {
                if self.failing_documents.contains(*doc) {
                    return error(
                        400,
                        "document_invalid_structure",
                        "Invalid document structure",
                    );
                }
                update_document(state, id, doc, body)
            }
            _ => route_not_found(),
        }
    }

    fn list_documents(&self, state: &State, collection_id: &str, page: Page) -> Reply {
        let Some(collection) = state.collections.get(collection_id) else {
            return collection_not_found();
        };
        let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(self.max_page_size);
        let documents: Vec<&Map<String, Value>> = collection
            .documents
            .iter()
            .skip(page.offset)
            .take(limit)
            .collect();
        Ok(json!({
            "total": collection.documents.len() + self.unlisted_documents,
            "documents": documents,
        }))
    }

    fn update_string_attribute(
        &self,
        state: &mut State,
        collection_id: &str,
        key: &str,
        body: Option<&Value>,
    ) -> Reply {
        let size = body.and_then(|b| b["size"].as_u64()).unwrap_or(0);
        if let Some(max) = self.max_string_size {
            if size > u64::from(max) {
                return error(
                    400,
                    "general_argument_invalid",
                    &format!(
                        "Invalid `size` param: Value must be a valid integer and no longer than {} chars",
                        max
                    ),
                );
            }
        }

        let Some(collection) = state.collections.get_mut(collection_id) else {
            return collection_not_found();
        };
        let Some(attribute) = collection
            .attributes
            .iter_mut()
            .find(|a| a["key"] == key && a["type"] == "string")
        else {
            return error(404, "attribute_not_found", "Attribute not found");
        };
        attribute["size"] = json!(size);
        Ok(attribute.clone())
    }
}

#[async_trait]
impl Transport for MemoryBackend {
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Reply {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            method: method.clone(),
            path: path.to_string(),
        });
        self.route(&mut state, &method, path, body)
    }
}

/// `limit` and `offset` taken from `queries[]` parameters
#[derive(Debug, Default)]
struct Page {
    limit: Option<usize>,
    offset: usize,
}

impl Page {
    fn from_query(query: &str) -> Self {
        let mut page = Page::default();
        for param in query.split('&') {
            let Some(raw) = param.strip_prefix("queries[]=") else {
                continue;
            };
            let Ok(parsed) = serde_json::from_str::<Value>(&raw.replace("%22", "\"")) else {
                continue;
            };
            let value = parsed["values"][0].as_u64().map(|v| v as usize);
            match (parsed["method"].as_str(), value) {
                (Some("limit"), Some(limit)) => page.limit = Some(limit),
                (Some("offset"), Some(offset)) => page.offset = offset,
                _ => {}
            }
        }
        page
    }
}

fn collection_json(id: &str, collection: &StoredCollection) -> Value {
    json!({
        "$id": id,
        "name": collection.name,
        "enabled": true,
        "documentSecurity": true,
        "$permissions": [],
        "attributes": collection.attributes,
        "indexes": [],
    })
}

fn create_collection(state: &mut State, body: Option<&Value>) -> Reply {
    let body = body.cloned().unwrap_or(Value::Null);
    let Some(id) = body["collectionId"].as_str() else {
        return error(400, "general_argument_invalid", "Param \"collectionId\" is not optional.");
    };
    if state.collections.contains_key(id) {
        return error(
            409,
            "collection_already_exists",
            "A collection with the requested ID already exists.",
        );
    }
    let collection = StoredCollection {
        name: body["name"].as_str().unwrap_or(id).to_string(),
        ..Default::default()
    };
    let reply = collection_json(id, &collection);
    state.collections.insert(id.to_string(), collection);
    Ok(reply)
}

fn get_collection(state: &State, id: &str) -> Reply {
    match state.collections.get(id) {
        Some(collection) => Ok(collection_json(id, collection)),
        None => collection_not_found(),
    }
}

fn create_attribute(state: &mut State, collection_id: &str, kind: &str, body: Option<&Value>) -> Reply {
    if !matches!(kind, "string" | "integer" | "datetime") {
        return route_not_found();
    }
    let Some(collection) = state.collections.get_mut(collection_id) else {
        return collection_not_found();
    };
    let body = body.cloned().unwrap_or(Value::Null);
    let Some(key) = body["key"].as_str() else {
        return error(400, "general_argument_invalid", "Param \"key\" is not optional.");
    };
    if collection.attributes.iter().any(|a| a["key"] == key) {
        return error(
            409,
            "attribute_already_exists",
            "Attribute with the requested key already exists.",
        );
    }

    let mut attribute = json!({
        "key": key,
        "type": kind,
        "status": "available",
        "required": body["required"].as_bool().unwrap_or(false),
        "array": body["array"].as_bool().unwrap_or(false),
    });
    match kind {
        "string" => attribute["size"] = body["size"].clone(),
        "datetime" => attribute["format"] = json!("datetime"),
        _ => {}
    }
    collection.attributes.push(attribute.clone());
    Ok(attribute)
}

fn update_document(state: &mut State, collection_id: &str, id: &str, body: Option<&Value>) -> Reply {
    let Some(collection) = state.collections.get_mut(collection_id) else {
        return collection_not_found();
    };
    let Some(document) = collection.documents.iter_mut().find(|d| d["$id"] == id) else {
        return error(404, "document_not_found", "Document with the requested ID could not be found.");
    };
    if let Some(data) = body.and_then(|b| b["data"].as_object()) {
        for (key, value) in data {
            if !collection.attributes.iter().any(|a| a["key"] == key.as_str()) {
                return error(
                    400,
                    "document_invalid_structure",
                    &format!("Invalid document structure: Unknown attribute: \"{}\"", key),
                );
            }
            document.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::Object(document.clone()))
}

fn collection_not_found() -> Reply {
    error(
        404,
        "collection_not_found",
        "Collection with the requested ID could not be found.",
    )
}

fn route_not_found() -> Reply {
    error(404, "general_route_not_found", "Route not found. Please ensure the endpoint is configured correctly.")
}

fn error(status: u16, kind: &str, message: &str) -> Reply {
    let status_text = match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        409 => "Conflict",
        _ => "Error",
    };
    Err(TransportError::Http {
        status,
        status_text: status_text.to_string(),
        body: json!({ "message": message, "code": status, "type": kind }).to_string(),
    })
}
