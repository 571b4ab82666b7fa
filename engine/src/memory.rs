//! In-process stand-in for the remote REST API.
//!
//! `MemoryRemote` implements [`Transport`] by routing requests against
//! in-memory collections, the same way the real platform does: `POST
//! /{singular}` creates, `GET|PATCH|DELETE /{singular}/{id}` address one
//! record, and `GET /{plural}` lists with `limit`, `lastId` and `mdbFilter`.
//! Faults can be queued to exercise the client's retry handling.
//!
//! Handles are cheap to clone and share state.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::transport::{HttpRequest, HttpResponse, Method, Transport, TransportError};
use crate::{Filter, ResourceType};

/// A failure to inject in place of normal handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Respond with this status code
    Status(u16),
    /// Fail without a response
    Network,
    /// Give up waiting, as the transport does when its timeout elapses
    Timeout,
    /// Handle the request, then respond with this status anyway
    StatusAfterWrite(u16),
}

type Document = Map<String, Value>;

#[derive(Debug, Default)]
struct State {
    /// Documents by singular resource name, then by id
    collections: HashMap<String, BTreeMap<String, Document>>,
    required: HashMap<String, Vec<String>>,
    api_key: Option<String>,
    /// `None` lets one request through untouched
    faults: VecDeque<Option<Fault>>,
    persistent_fault: Option<Fault>,
    bare_array_lists: bool,
    next_id: u64,
    log: Vec<HttpRequest>,
}

impl State {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:024x}", self.next_id)
    }

    fn insert(&mut self, singular: &str, mut doc: Document) -> Document {
        let id = self.allocate_id();
        let now = Value::String(Utc::now().to_rfc3339());
        doc.insert("id".into(), Value::String(id.clone()));
        doc.insert("createdAt".into(), now.clone());
        doc.insert("updatedAt".into(), now);
        self.collections
            .entry(singular.to_string())
            .or_default()
            .insert(id, doc.clone());
        doc
    }
}

/// Emulated remote platform.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<State>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject requests whose `Authorization` header does not carry `key`.
    pub fn with_api_key(self, key: impl Into<String>) -> Self {
        self.state.lock().api_key = Some(key.into());
        self
    }

    /// Reject creates of `singular` records that lack any of `fields`.
    pub fn require_fields(self, singular: &str, fields: &[&str]) -> Self {
        self.state.lock().required.insert(
            singular.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    /// Answer list requests with a bare array instead of `{ data, nextCursor }`.
    pub fn bare_array_lists(self) -> Self {
        self.state.lock().bare_array_lists = true;
        self
    }

    /// Fail the next request that arrives. Queued faults fire in order.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(Some(fault));
    }

    /// Let `passed` requests through, then fail the next one.
    pub fn inject_after(&self, passed: usize, fault: Fault) {
        let mut state = self.state.lock();
        state.faults.extend(std::iter::repeat(None).take(passed));
        state.faults.push_back(Some(fault));
    }

    /// Fail every request until [`clear_faults`](Self::clear_faults).
    pub fn fail_always(&self, fault: Fault) {
        self.state.lock().persistent_fault = Some(fault);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.faults.clear();
        state.persistent_fault = None;
    }

    /// Insert a document directly, bypassing the request log. Returns its id.
    pub fn insert(&self, singular: &str, doc: Value) -> String {
        let doc = match doc {
            Value::Object(map) => map,
            _ => Document::new(),
        };
        let stored = self.state.lock().insert(singular, doc);
        stored
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Insert many documents directly.
    pub fn seed(&self, singular: &str, docs: impl IntoIterator<Item = Value>) -> Vec<String> {
        docs.into_iter().map(|doc| self.insert(singular, doc)).collect()
    }

    /// Stored documents of one resource, in id order.
    pub fn records(&self, singular: &str) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(singular)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, singular: &str) -> usize {
        self.state
            .lock()
            .collections
            .get(singular)
            .map_or(0, BTreeMap::len)
    }

    /// Every request received, faulted ones included.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().log.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Requests received with the given method.
    pub fn count(&self, method: Method) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub fn reset_log(&self) {
        self.state.lock().log.clear();
    }

    fn handle(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.state.lock();
        state.log.push(request.clone());

        let fault = match state.faults.pop_front() {
            Some(slot) => slot,
            None => state.persistent_fault,
        };
        match fault {
            Some(Fault::Status(status)) => return Ok(injected(status)),
            Some(Fault::Network) => {
                return Err(TransportError::Connect("injected network failure".into()))
            }
            Some(Fault::Timeout) => return Err(TransportError::Timeout),
            Some(Fault::StatusAfterWrite(_)) | None => {}
        }

        if let Some(key) = &state.api_key {
            let expected = format!("API_KEY {key}");
            if request.header_value("Authorization") != Some(expected.as_str()) {
                return Ok(error(401, "Unauthenticated"));
            }
        }

        let segments: Vec<&str> = request
            .path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let response = match (request.method, segments.as_slice()) {
            (Method::Post, [singular]) => create(&mut state, singular, request.body.as_ref()),
            (Method::Get, [plural]) => list(&state, plural, &request),
            (Method::Get, [singular, id]) => state
                .collections
                .get(*singular)
                .and_then(|docs| docs.get(*id))
                .map_or_else(not_found, |doc| ok(doc.clone())),
            (Method::Patch, [singular, id]) => {
                update(&mut state, singular, id, request.body.as_ref())
            }
            (Method::Delete, [singular, id]) => match state
                .collections
                .get_mut(*singular)
                .and_then(|docs| docs.remove(*id))
            {
                Some(_) => HttpResponse::json(200, &json!({})),
                None => not_found(),
            },
            _ => not_found(),
        };

        match fault {
            Some(Fault::StatusAfterWrite(status)) => Ok(injected(status)),
            _ => Ok(response),
        }
    }
}

impl Transport for MemoryRemote {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.handle(request)
    }
}

fn create(state: &mut State, singular: &str, body: Option<&Value>) -> HttpResponse {
    let Some(Value::Object(doc)) = body else {
        return error(400, "Request body must be an object");
    };

    if let Some(required) = state.required.get(singular) {
        for field in required {
            if doc.get(field).map_or(true, Value::is_null) {
                return error(400, &format!("Missing required field: {field}"));
            }
        }
    }

    let mut doc = doc.clone();
    for reserved in ["id", "createdAt", "updatedAt"] {
        doc.remove(reserved);
    }
    ok(state.insert(singular, doc))
}

fn update(state: &mut State, singular: &str, id: &str, body: Option<&Value>) -> HttpResponse {
    let Some(Value::Object(changes)) = body else {
        return error(400, "Request body must be an object");
    };
    let Some(doc) = state
        .collections
        .get_mut(singular)
        .and_then(|docs| docs.get_mut(id))
    else {
        return not_found();
    };

    for (key, value) in changes {
        if !matches!(key.as_str(), "id" | "createdAt") {
            doc.insert(key.clone(), value.clone());
        }
    }
    doc.insert("updatedAt".into(), Value::String(Utc::now().to_rfc3339()));
    ok(doc.clone())
}

fn list(state: &State, plural: &str, request: &HttpRequest) -> HttpResponse {
    let resource = ResourceType::from_plural(plural);
    let limit = match request.query_param("limit").map(str::parse::<usize>) {
        None => 1000,
        Some(Ok(limit)) if limit > 0 => limit,
        Some(_) => return error(400, "limit must be a positive integer"),
    };
    let filter = match request.query_param("mdbFilter") {
        None => None,
        Some(raw) => match serde_json::from_str::<Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|value| Filter::from_json(&value).map_err(|e| e.to_string()))
        {
            Ok(filter) => Some(filter),
            Err(message) => return error(400, &message),
        },
    };
    let after = request.query_param("lastId").unwrap_or_default();

    let mut matching: Vec<Document> = state
        .collections
        .get(resource.singular())
        .into_iter()
        .flat_map(|docs| docs.iter())
        .filter(|(id, _)| id.as_str() > after)
        .map(|(_, doc)| doc)
        .filter(|doc| filter.as_ref().map_or(true, |f| f.matches(doc)))
        .take(limit + 1)
        .cloned()
        .collect();

    let more = matching.len() > limit;
    matching.truncate(limit);

    if state.bare_array_lists {
        let items = matching.into_iter().map(Value::Object).collect();
        return HttpResponse::json(200, &Value::Array(items));
    }

    let next_cursor = if more {
        matching
            .last()
            .and_then(|doc| doc.get("id"))
            .cloned()
            .unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    HttpResponse::json(
        200,
        &json!({
            "data": matching,
            "nextCursor": next_cursor,
        }),
    )
}

fn injected(status: u16) -> HttpResponse {
    error(status, "injected failure")
}

fn ok(doc: Document) -> HttpResponse {
    HttpResponse::json(200, &Value::Object(doc))
}

fn not_found() -> HttpResponse {
    error(404, "Could not find a record for the given id")
}

fn error(status: u16, message: &str) -> HttpResponse {
    HttpResponse::json(status, &json!({ "message": message }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> HttpRequest {
        HttpRequest::new(Method::Get, path)
    }

    fn body(response: HttpResponse) -> Value {
        response.json_body().unwrap()
    }

    #[tokio::test]
    async fn ids_sort_in_creation_order() {
        let remote = MemoryRemote::new();
        let ids = remote.seed("enduser", (0..20).map(|i| json!({ "n": i })));
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids[0].len(), 24);
    }

    #[tokio::test]
    async fn list_pages_past_last_id() {
        let remote = MemoryRemote::new();
        let ids = remote.seed("enduser", (0..3).map(|i| json!({ "n": i })));

        let page = body(
            remote
                .send(get("/endusers").query("limit", "2"))
                .await
                .unwrap(),
        );
        assert_eq!(page["data"].as_array().unwrap().len(), 2);
        assert_eq!(page["nextCursor"], json!(ids[1]));

        let page = body(
            remote
                .send(get("/endusers").query("limit", "2").query("lastId", ids[1].clone()))
                .await
                .unwrap(),
        );
        assert_eq!(page["data"][0]["id"], json!(ids[2]));
        assert_eq!(page["nextCursor"], Value::Null);
    }

    #[tokio::test]
    async fn list_applies_filter() {
        let remote = MemoryRemote::new();
        remote.insert("enduser", json!({ "source": "Canvas", "externalId": "1" }));
        remote.insert("enduser", json!({ "source": "Canvas", "externalId": "2" }));

        let filter = json!({ "source": "Canvas", "externalId": "2" }).to_string();
        let page = body(
            remote
                .send(get("/endusers").query("mdbFilter", filter))
                .await
                .unwrap(),
        );
        assert_eq!(page["data"].as_array().unwrap().len(), 1);

        let response = remote
            .send(get("/endusers").query("mdbFilter", "{\"a\":{\"$regex\":\"x\"}}"))
            .await
            .unwrap();
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn faults_fire_before_handling() {
        let remote = MemoryRemote::new();
        remote.inject(Fault::Status(503));
        remote.inject(Fault::Network);

        assert_eq!(remote.send(get("/endusers")).await.unwrap().status, 503);
        assert!(remote.send(get("/endusers")).await.is_err());
        assert_eq!(remote.send(get("/endusers")).await.unwrap().status, 200);
        assert_eq!(remote.request_count(), 3);
        assert_eq!(remote.count(Method::Get), 3);
    }

    #[tokio::test]
    async fn faults_can_wait_or_land_after_the_write() {
        let remote = MemoryRemote::new();
        remote.inject_after(1, Fault::StatusAfterWrite(502));

        let create = || HttpRequest::new(Method::Post, "/enduser").json(json!({ "n": 1 }));
        assert_eq!(remote.send(create()).await.unwrap().status, 200);
        assert_eq!(remote.send(create()).await.unwrap().status, 502);
        assert_eq!(remote.len("enduser"), 2);
    }

    #[tokio::test]
    async fn create_stamps_server_fields() {
        let remote = MemoryRemote::new();
        let request = HttpRequest::new(Method::Post, "/chat-room")
            .json(json!({ "id": "forged", "title": "Health Discussion" }));
        let created = body(remote.send(request).await.unwrap());

        assert_ne!(created["id"], json!("forged"));
        assert!(created["createdAt"].is_string());
        assert_eq!(remote.len("chat-room"), 1);
        assert_eq!(remote.records("chat-room")[0]["title"], json!("Health Discussion"));
    }

    #[tokio::test]
    async fn api_key_is_enforced() {
        let remote = MemoryRemote::new().with_api_key("secret");
        let denied = remote.send(get("/endusers")).await.unwrap();
        assert_eq!(denied.status, 401);

        let allowed = remote
            .send(get("/endusers").header("Authorization", "API_KEY secret"))
            .await
            .unwrap();
        assert_eq!(allowed.status, 200);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let remote = MemoryRemote::new();
        let response = remote
            .send(HttpRequest::new(Method::Patch, "/enduser"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }
}
