//! Typed client for the remote REST resources.
//!
//! # Retry rules
//!
//! | Response | Handling |
//! |----------|----------|
//! | 2xx | returned |
//! | 429 | backoff and retry, then [`Error::RateLimited`] |
//! | 408, 5xx, network failure | backoff and retry (idempotent methods only), then [`Error::Transient`] |
//! | 401, 403 | [`Error::Auth`] immediately |
//! | 404 | [`Error::NotFound`] immediately |
//! | other 4xx | [`Error::Validation`] immediately |
//!
//! A `POST` that fails transiently is not repeated here: the remote may have
//! written the record before failing, so the caller has to look it up again
//! before deciding to create it a second time.

use std::collections::VecDeque;

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
use crate::{ClientConfig, Error, Filter, RemoteRecord, ResourceType, Result};

/// Outcome of a lookup by remote id.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// Forward-only pagination position.
///
/// Serializable so a long scan can be checkpointed and resumed with
/// [`ResourceClient::resume`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    /// Id of the last record already returned
    pub last_id: Option<String>,
    /// Records requested per page
    pub page_size: usize,
}

impl PageCursor {
    /// A cursor positioned before the first record.
    pub fn start(page_size: usize) -> Self {
        Self {
            last_id: None,
            page_size: page_size.max(1),
        }
    }
}

/// One decoded list response.
#[derive(Debug)]
struct Page {
    records: Vec<RemoteRecord>,
    next_cursor: Option<String>,
    /// The remote said explicitly that nothing follows
    last: bool,
}

/// Client for CRUD and list calls against the remote platform.
#[derive(Debug)]
pub struct ResourceClient<T = ReqwestTransport> {
    config: ClientConfig,
    transport: T,
}

impl ResourceClient<ReqwestTransport> {
    /// Client talking HTTPS to the configured base URL.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::new(config, transport))
    }
}

impl<T: Transport> ResourceClient<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Create a record. The response carries the remote id and timestamps.
    pub async fn create(
        &self,
        resource: &ResourceType,
        fields: &Map<String, Value>,
    ) -> Result<RemoteRecord> {
        let request = HttpRequest::new(Method::Post, resource.collection_path())
            .json(Value::Object(fields.clone()));
        let response = self.execute(request, resource, None).await?;
        let record = RemoteRecord::from_value(response.json_body()?)?;
        debug!("Created {} {}", resource.singular(), record.id);
        Ok(record)
    }

    /// Fetch one record by remote id.
    pub async fn get(&self, resource: &ResourceType, id: &str) -> Result<Lookup<RemoteRecord>> {
        let request = HttpRequest::new(Method::Get, resource.record_path(id));
        match self.execute(request, resource, Some(id)).await {
            Ok(response) => Ok(Lookup::Found(RemoteRecord::from_value(
                response.json_body()?,
            )?)),
            Err(Error::NotFound { .. }) => Ok(Lookup::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Apply a partial update; fields not named are left untouched.
    pub async fn update(
        &self,
        resource: &ResourceType,
        id: &str,
        changes: &Map<String, Value>,
    ) -> Result<RemoteRecord> {
        let request = HttpRequest::new(Method::Patch, resource.record_path(id))
            .json(Value::Object(changes.clone()));
        let response = self.execute(request, resource, Some(id)).await?;
        let record = RemoteRecord::from_value(response.json_body()?)?;
        debug!(
            "Updated {} {} ({} fields)",
            resource.singular(),
            id,
            changes.len()
        );
        Ok(record)
    }

    /// Delete a record. Deleting a record that is already gone succeeds.
    pub async fn delete(&self, resource: &ResourceType, id: &str) -> Result<bool> {
        let request = HttpRequest::new(Method::Delete, resource.record_path(id));
        match self.execute(request, resource, Some(id)).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound { .. }) => {
                debug!("{} {} already deleted", resource.singular(), id);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Lazily list every record matching `filter`, `page_size` at a time.
    pub fn list<'a>(
        &'a self,
        resource: &ResourceType,
        filter: Option<Filter>,
        page_size: usize,
    ) -> impl Stream<Item = Result<RemoteRecord>> + Send + 'a {
        self.pager(resource, filter, page_size).into_stream()
    }

    /// Page-at-a-time iteration with an inspectable cursor.
    pub fn pager(
        &self,
        resource: &ResourceType,
        filter: Option<Filter>,
        page_size: usize,
    ) -> Pager<'_, T> {
        self.resume(resource, filter, PageCursor::start(page_size))
    }

    /// Continue a scan from a checkpointed cursor.
    pub fn resume(
        &self,
        resource: &ResourceType,
        filter: Option<Filter>,
        cursor: PageCursor,
    ) -> Pager<'_, T> {
        Pager {
            client: self,
            resource: resource.clone(),
            filter,
            cursor,
            finished: false,
            requests: 0,
        }
    }

    async fn fetch_page(
        &self,
        resource: &ResourceType,
        filter: Option<&Filter>,
        cursor: &PageCursor,
    ) -> Result<Page> {
        let mut request = HttpRequest::new(Method::Get, resource.list_path())
            .query("limit", cursor.page_size.to_string());
        if let Some(filter) = filter {
            request = request.query("mdbFilter", filter.to_json().to_string());
        }
        if let Some(last_id) = &cursor.last_id {
            request = request.query("lastId", last_id.clone());
        }

        let response = self.execute(request, resource, None).await?;
        let page = decode_page(response.json_body()?)?;
        debug!(
            "Fetched {} {} (last_id={:?})",
            page.records.len(),
            resource.plural(),
            cursor.last_id
        );
        Ok(page)
    }

    /// Send with auth headers, classifying failures and retrying per policy.
    async fn execute(
        &self,
        request: HttpRequest,
        resource: &ResourceType,
        id: Option<&str>,
    ) -> Result<HttpResponse> {
        let request = request
            .header("Authorization", self.config.authorization())
            .header("Content-Type", "application/json");
        let policy = self.config.retry();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let failure = match self.transport.send(request.clone()).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => match response.status {
                    429 => Failure::RateLimited,
                    408 | 500..=599 => Failure::Transient(format!(
                        "HTTP {}: {}",
                        response.status,
                        error_message(&response)
                    )),
                    401 | 403 => return Err(Error::Auth(error_message(&response))),
                    404 => {
                        return Err(Error::NotFound {
                            resource: resource.singular().to_string(),
                            id: id.unwrap_or(&request.path).to_string(),
                        })
                    }
                    _ => return Err(Error::Validation(error_message(&response))),
                },
                Err(e) => Failure::Transient(e.to_string()),
            };

            let retryable =
                matches!(failure, Failure::RateLimited) || request.method.is_idempotent();
            if !retryable || attempt > policy.max_retries {
                return Err(failure.into_error(attempt));
            }

            let delay = policy.delay_for_retry(attempt);
            warn!(
                "{} {} failed ({}), retry {}/{} in {:?}",
                request.method,
                request.path,
                failure.describe(),
                attempt,
                policy.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// A retryable failure of one attempt.
enum Failure {
    RateLimited,
    Transient(String),
}

impl Failure {
    fn describe(&self) -> &str {
        match self {
            Failure::RateLimited => "rate limited",
            Failure::Transient(message) => message,
        }
    }

    fn into_error(self, attempts: u32) -> Error {
        match self {
            Failure::RateLimited => Error::RateLimited { attempts },
            Failure::Transient(message) => Error::Transient { message, attempts },
        }
    }
}

/// Prefer the remote's `message` field, fall back to a body excerpt.
fn error_message(response: &HttpResponse) -> String {
    if let Ok(Value::Object(body)) = serde_json::from_str::<Value>(&response.body) {
        if let Some(message) = body.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    let body = response.body.trim();
    if body.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        body.chars().take(200).collect()
    }
}

/// Lists come back either as a bare array or as `{ data, nextCursor }`.
fn decode_page(body: Value) -> Result<Page> {
    let (items, next_cursor, last) = match body {
        Value::Array(items) => (items, None, false),
        Value::Object(mut obj) => {
            let items = match obj.remove("data") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(Error::MalformedResponse(
                        "list response object has no 'data' array".into(),
                    ))
                }
            };
            match obj.get("nextCursor") {
                Some(Value::String(cursor)) => (items, Some(cursor.clone()), false),
                Some(Value::Null) => (items, None, true),
                _ => (items, None, false),
            }
        }
        other => {
            return Err(Error::MalformedResponse(format!(
                "unexpected list response: {other}"
            )))
        }
    };

    let records = items
        .into_iter()
        .map(RemoteRecord::from_value)
        .collect::<Result<Vec<_>>>()?;

    Ok(Page {
        records,
        next_cursor,
        last,
    })
}

/// Page-at-a-time scan over a filtered resource.
///
/// A failed page leaves the cursor where it was, so calling
/// [`next_page`](Pager::next_page) again repeats the same request.
pub struct Pager<'a, T> {
    client: &'a ResourceClient<T>,
    resource: ResourceType,
    filter: Option<Filter>,
    cursor: PageCursor,
    finished: bool,
    requests: usize,
}

impl<'a, T: Transport> Pager<'a, T> {
    /// Fetch the next page; `None` once the scan is over.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RemoteRecord>>> {
        if self.finished {
            return Ok(None);
        }

        let page = self
            .client
            .fetch_page(&self.resource, self.filter.as_ref(), &self.cursor)
            .await?;
        self.requests += 1;

        if page.last || page.records.len() < self.cursor.page_size {
            self.finished = true;
        }
        if let Some(next) = page.next_cursor.or_else(|| page.records.last().map(|r| r.id.clone()))
        {
            self.cursor.last_id = Some(next);
        }

        if page.records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(page.records))
        }
    }

    /// Position after the last page returned.
    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Whether no further request will be issued.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// List requests issued so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Flatten into a stream of records. The stream ends after the first
    /// error.
    pub fn into_stream(self) -> impl Stream<Item = Result<RemoteRecord>> + Send + 'a {
        stream::try_unfold(
            (self, VecDeque::new()),
            |(mut pager, mut buffer)| async move {
                loop {
                    if let Some(record) = buffer.pop_front() {
                        return Ok(Some((record, (pager, buffer))));
                    }
                    match pager.next_page().await? {
                        Some(page) => buffer.extend(page),
                        None => return Ok(None),
                    }
                }
            },
        )
    }
}
