//! Frappe REST API client.
//!
//! One composed call path for every gateway operation: credential selection
//! (session cookie, bearer token, then the static service key), token-bucket
//! rate limiting, bounded retry with linear backoff, and a read-through
//! document cache invalidated on writes. Works with ERPNext and any other
//! Frappe-based application; the endpoints used are generic Frappe Framework
//! endpoints (`/api/resource/{doctype}`, `/api/method/frappe.*`).

pub mod cache;
pub mod rate_limit;
mod response;
pub mod retry;

pub use cache::DocumentCache;
pub use rate_limit::TokenBucket;
pub use retry::RetryPolicy;

use std::time::Duration;

use reqwest::Method;
use reqwest::header;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::{HEADER_CSRF_TOKEN, Identity, SESSION_COOKIE_NAME, UpstreamCredential};
use crate::config::FrappeConfig;
use crate::types::{
    AggregationRequest, Document, DocumentList, ListRequest, ReportRequest, ReportResponse,
    SearchRequest,
};
use crate::{Error, Result};

use response::{DataEnvelope, ListEnvelope, MessageEnvelope, ReportPayload};

const SEARCH_LINK_METHOD: &str = "/api/method/frappe.desk.search.search_link";
const GET_LIST_METHOD: &str = "/api/method/frappe.client.get_list";
const RUN_REPORT_METHOD: &str = "/api/method/frappe.desk.query_report.run";

#[derive(Debug)]
struct ServiceKey {
    key: String,
    secret: SecretString,
}

/// Credential presented upstream, chosen fresh per logical call.
#[derive(Debug)]
enum SelectedCredential<'a> {
    Session {
        sid: &'a str,
        csrf_token: Option<&'a str>,
    },
    Bearer(&'a str),
    ServiceKey(&'a ServiceKey),
}

/// Client for a Frappe-style document API.
///
/// Shared and long-lived: every operation tolerates arbitrary concurrent
/// callers. Identities are passed by reference into each call and never
/// stored.
pub struct FrappeClient {
    base_url: String,
    service_key: Option<ServiceKey>,
    http: reqwest::Client,
    limiter: TokenBucket,
    retry: RetryPolicy,
    cache: DocumentCache,
    operation_timeout: Duration,
}

impl FrappeClient {
    pub fn new(config: FrappeConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(Error::Network)?;

        let service_key = match (config.api_key.clone(), config.api_secret.clone()) {
            (Some(key), Some(secret)) => Some(ServiceKey { key, secret }),
            _ => None,
        };

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key,
            http,
            limiter: TokenBucket::from_config(&config.rate_limit),
            retry: RetryPolicy::from_config(&config.retry),
            cache: DocumentCache::new(),
            operation_timeout: config.operation_timeout(),
        })
    }

    /// Retrieve a single document. Cache hits return without any network
    /// I/O or rate-limit consumption.
    pub async fn get_document(
        &self,
        caller: Option<&Identity>,
        doctype: &str,
        name: &str,
    ) -> Result<Document> {
        if let Some(document) = self.cache.get(doctype, name) {
            tracing::debug!(doctype, name, "document served from cache");
            return Ok(document);
        }

        let endpoint = format!(
            "/api/resource/{}/{}",
            urlencoding::encode(doctype),
            urlencoding::encode(name)
        );
        let envelope: DataEnvelope<Document> = self
            .dispatch(caller, Method::GET, &endpoint, &[], None, false)
            .await
            .map_err(|e| contextualize(e, "get document", &format!("{doctype}/{name}")))?;

        self.cache.insert(doctype, name, envelope.data.clone());
        tracing::info!(doctype, name, "document retrieved");
        Ok(envelope.data)
    }

    /// List documents of one doctype with field selection, filters,
    /// ordering, and pagination. Never cached.
    pub async fn list_documents(
        &self,
        caller: Option<&Identity>,
        request: &ListRequest,
    ) -> Result<DocumentList> {
        let endpoint = format!("/api/resource/{}", urlencoding::encode(&request.doctype));
        let query = listing_query(
            &request.fields,
            &request.filters,
            request.order_by.as_deref(),
            request.page_size,
            request.page,
        )?;

        let envelope: ListEnvelope = self
            .dispatch(caller, Method::GET, &endpoint, &query, None, false)
            .await
            .map_err(|e| contextualize(e, "list documents", &request.doctype))?;

        let list = page_of(envelope.into_documents(), request.page_size, request.page);
        tracing::info!(
            doctype = %request.doctype,
            count = list.total,
            page = request.page,
            "document list retrieved"
        );
        Ok(list)
    }

    /// Create a document. Invalidates every cached document of the doctype,
    /// since the new document's identity was unknown before creation.
    pub async fn create_document(
        &self,
        caller: Option<&Identity>,
        doctype: &str,
        data: Document,
    ) -> Result<Document> {
        let endpoint = format!("/api/resource/{}", urlencoding::encode(doctype));
        let envelope: DataEnvelope<Document> = self
            .dispatch(
                caller,
                Method::POST,
                &endpoint,
                &[],
                Some(Value::Object(data)),
                true,
            )
            .await
            .map_err(|e| contextualize(e, "create document", doctype))?;

        self.cache.invalidate_doctype(doctype);
        tracing::info!(doctype, "document created");
        Ok(envelope.data)
    }

    /// Update a document. Invalidates the exact cache key.
    pub async fn update_document(
        &self,
        caller: Option<&Identity>,
        doctype: &str,
        name: &str,
        data: Document,
    ) -> Result<Document> {
        let endpoint = format!(
            "/api/resource/{}/{}",
            urlencoding::encode(doctype),
            urlencoding::encode(name)
        );
        let envelope: DataEnvelope<Document> = self
            .dispatch(
                caller,
                Method::PUT,
                &endpoint,
                &[],
                Some(Value::Object(data)),
                true,
            )
            .await
            .map_err(|e| contextualize(e, "update document", &format!("{doctype}/{name}")))?;

        self.cache.invalidate(doctype, name);
        tracing::info!(doctype, name, "document updated");
        Ok(envelope.data)
    }

    /// Delete a document. Invalidates the exact cache key.
    pub async fn delete_document(
        &self,
        caller: Option<&Identity>,
        doctype: &str,
        name: &str,
    ) -> Result<()> {
        let endpoint = format!(
            "/api/resource/{}/{}",
            urlencoding::encode(doctype),
            urlencoding::encode(name)
        );
        let _: serde::de::IgnoredAny = self
            .dispatch(caller, Method::DELETE, &endpoint, &[], None, true)
            .await
            .map_err(|e| contextualize(e, "delete document", &format!("{doctype}/{name}")))?;

        self.cache.invalidate(doctype, name);
        tracing::info!(doctype, name, "document deleted");
        Ok(())
    }

    /// Text search across documents of one doctype. With an empty search
    /// text this behaves as a filtered listing. Never cached.
    pub async fn search_documents(
        &self,
        caller: Option<&Identity>,
        request: &SearchRequest,
    ) -> Result<DocumentList> {
        let mut query = listing_query(
            &request.fields,
            &request.filters,
            request.order_by.as_deref(),
            request.page_size,
            request.page,
        )?;

        let (method, endpoint) = if request.text.is_empty() {
            (
                Method::GET,
                format!("/api/resource/{}", urlencoding::encode(&request.doctype)),
            )
        } else {
            query.push(("txt".into(), request.text.clone()));
            query.push(("doctype".into(), request.doctype.clone()));
            (Method::POST, SEARCH_LINK_METHOD.to_string())
        };

        let envelope: ListEnvelope = self
            .dispatch(caller, method, &endpoint, &query, None, false)
            .await
            .map_err(|e| contextualize(e, "search documents", &request.doctype))?;

        let list = page_of(envelope.into_documents(), request.page_size, request.page);
        tracing::info!(
            doctype = %request.doctype,
            text = %request.text,
            results = list.total,
            "search completed"
        );
        Ok(list)
    }

    /// Run an aggregation query (`group_by` with SUM/COUNT fields) through
    /// the list method endpoint. Never cached.
    pub async fn run_aggregation(
        &self,
        caller: Option<&Identity>,
        request: &AggregationRequest,
    ) -> Result<Vec<Document>> {
        let mut body = serde_json::Map::new();
        body.insert("doctype".into(), request.doctype.clone().into());
        if !request.fields.is_empty() {
            body.insert("fields".into(), request.fields.clone().into());
        }
        if !request.filters.is_empty() {
            body.insert("filters".into(), Value::Object(request.filters.clone()));
        }
        if let Some(group_by) = &request.group_by {
            body.insert("group_by".into(), group_by.clone().into());
        }
        if let Some(order_by) = &request.order_by {
            body.insert("order_by".into(), order_by.clone().into());
        }
        if request.limit > 0 {
            body.insert("limit_page_length".into(), request.limit.into());
        }

        let envelope: MessageEnvelope<Vec<Document>> = self
            .dispatch(
                caller,
                Method::POST,
                GET_LIST_METHOD,
                &[],
                Some(Value::Object(body)),
                false,
            )
            .await
            .map_err(|e| contextualize(e, "aggregation query", &request.doctype))?;

        tracing::info!(
            doctype = %request.doctype,
            group_by = request.group_by.as_deref().unwrap_or(""),
            results = envelope.message.len(),
            "aggregation query executed"
        );
        Ok(envelope.message)
    }

    /// Run a stored report through the query-report runner. Never cached.
    pub async fn run_report(
        &self,
        caller: Option<&Identity>,
        request: &ReportRequest,
    ) -> Result<ReportResponse> {
        let mut body = serde_json::Map::new();
        body.insert("report_name".into(), request.report_name.clone().into());
        if !request.filters.is_empty() {
            body.insert("filters".into(), Value::Object(request.filters.clone()));
        }
        if let Some(user) = &request.user {
            body.insert("user".into(), user.clone().into());
        }

        let envelope: MessageEnvelope<ReportPayload> = self
            .dispatch(
                caller,
                Method::POST,
                RUN_REPORT_METHOD,
                &[],
                Some(Value::Object(body)),
                false,
            )
            .await
            .map_err(|e| contextualize(e, "run report", &request.report_name))?;

        let report = ReportResponse {
            columns: envelope.message.columns,
            data: envelope.message.result,
        };
        tracing::info!(
            report_name = %request.report_name,
            columns = report.columns.len(),
            rows = report.data.len(),
            "report executed"
        );
        Ok(report)
    }

    /// Drop every cached document.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Choose the upstream credential for one logical call.
    ///
    /// Precedence: caller session cookie (user-level permissions, CSRF
    /// required for mutating verbs), caller bearer token, then the static
    /// service key pair. No credential at all fails before any network I/O.
    fn select_credential<'a>(
        &'a self,
        caller: Option<&'a Identity>,
        mutating: bool,
    ) -> Result<SelectedCredential<'a>> {
        if let Some(identity) = caller {
            match identity.credential() {
                Some(UpstreamCredential::Session { sid, csrf_token }) => {
                    if mutating && csrf_token.is_none() {
                        return Err(Error::config(
                            "mutating call requires a CSRF token alongside the session credential",
                        ));
                    }
                    return Ok(SelectedCredential::Session {
                        sid: sid.as_str(),
                        csrf_token: csrf_token.as_deref(),
                    });
                }
                Some(UpstreamCredential::Bearer(token)) => {
                    return Ok(SelectedCredential::Bearer(token.as_str()));
                }
                None => {}
            }
        }

        if let Some(service_key) = &self.service_key {
            return Ok(SelectedCredential::ServiceKey(service_key));
        }

        Err(Error::auth(
            "no authentication credentials available (no session, token, or API key)",
        ))
    }

    /// One logical call: credential selection, whole-call deadline, one
    /// rate-limit token, then the bounded attempt loop.
    ///
    /// The retry loop applies uniformly to every verb, including creates and
    /// updates. A 5xx after a partial upstream commit can therefore produce
    /// a duplicate side effect; callers needing stronger guarantees must
    /// deduplicate upstream.
    async fn dispatch<T: DeserializeOwned>(
        &self,
        caller: Option<&Identity>,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<Value>,
        mutating: bool,
    ) -> Result<T> {
        let credential = self.select_credential(caller, mutating)?;

        let deadline = self.operation_timeout;
        match tokio::time::timeout(
            deadline,
            self.dispatch_with_retry(&credential, method, endpoint, query, body.as_ref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Deadline(deadline)),
        }
    }

    async fn dispatch_with_retry<T: DeserializeOwned>(
        &self,
        credential: &SelectedCredential<'_>,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<T> {
        self.limiter.acquire().await;

        let max_attempts = self.retry.max_attempts();
        let mut last_err: Option<Error> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let mut delay = self.retry.delay_for(attempt);
                if let Some(retry_after) = last_err.as_ref().and_then(Error::retry_after) {
                    delay = delay.max(retry_after);
                }
                tokio::time::sleep(delay).await;
                tracing::debug!(attempt = attempt + 1, ?delay, "retrying upstream request");
            }

            match self
                .attempt(credential, method.clone(), endpoint, query, body)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(error = %e, attempt = attempt + 1, "upstream request failed, will retry");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let Some(last) = last_err else {
            return Err(Error::config("retry policy allows no attempts"));
        };
        Err(Error::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(last),
        })
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        credential: &SelectedCredential<'_>,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(header::CONTENT_TYPE, "application/json");

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request = match credential {
            SelectedCredential::Session { sid, csrf_token } => {
                let mut request =
                    request.header(header::COOKIE, format!("{}={}", SESSION_COOKIE_NAME, sid));
                if let Some(csrf) = csrf_token {
                    request = request.header(HEADER_CSRF_TOKEN, *csrf);
                }
                request
            }
            SelectedCredential::Bearer(token) => {
                request.header(header::AUTHORIZATION, format!("Bearer {}", token))
            }
            SelectedCredential::ServiceKey(service_key) => request.header(
                header::AUTHORIZATION,
                format!(
                    "token {}:{}",
                    service_key.key,
                    service_key.secret.expose_secret()
                ),
            ),
        };

        tracing::debug!(%method, endpoint, "dispatching upstream request");
        let response = request.send().await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let retry_after = response::parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(response::decode_error(status.as_u16(), &body, retry_after));
        }

        let text = response.text().await?;
        let value = if text.trim().is_empty() {
            serde_json::from_value(Value::Null)?
        } else {
            serde_json::from_str(&text)?
        };
        Ok(value)
    }
}

impl std::fmt::Debug for FrappeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrappeClient")
            .field("base_url", &self.base_url)
            .field("service_key", &self.service_key.is_some())
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Query parameters shared by listing and search.
fn listing_query(
    fields: &[String],
    filters: &serde_json::Map<String, Value>,
    order_by: Option<&str>,
    page_size: usize,
    page: usize,
) -> Result<Vec<(String, String)>> {
    let mut query = Vec::new();
    if !fields.is_empty() {
        query.push(("fields".into(), serde_json::to_string(fields)?));
    }
    if !filters.is_empty() {
        query.push(("filters".into(), serde_json::to_string(filters)?));
    }
    if let Some(order_by) = order_by {
        query.push(("order_by".into(), order_by.to_string()));
    }
    if page_size > 0 {
        query.push(("limit_page_length".into(), page_size.to_string()));
    }
    if page > 0 {
        query.push(("limit_start".into(), page.to_string()));
    }
    Ok(query)
}

fn page_of(documents: Vec<Document>, page_size: usize, page: usize) -> DocumentList {
    let total = documents.len();
    DocumentList {
        has_more: page_size > 0 && total == page_size,
        data: documents,
        total,
        page_size,
        page,
    }
}

/// Attach operation context to surfaced upstream failures.
fn contextualize(err: Error, operation: &str, target: &str) -> Error {
    match err {
        Error::Upstream {
            status,
            message,
            exc,
            retry_after,
        } => Error::Upstream {
            status,
            message: format!("{operation} {target}: {message}"),
            exc,
            retry_after,
        },
        Error::RetriesExhausted { attempts, last } => Error::RetriesExhausted {
            attempts,
            last: Box::new(contextualize(*last, operation, target)),
        },
        other => other,
    }
}
