//! # Request and User Context
//!
//! Derives per-request logging context (request id, method, url, user
//! agent, client IP) and per-user context (user id, session id, email)
//! from host-provided header and session sources. Collaborator failures are
//! swallowed and produce empty context; they never reach the caller.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use rand::Rng;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::logger::{Logger, LoggerContext};
use crate::types::Error;

/// Length of generated request ids
pub const REQUEST_ID_LENGTH: usize = 16;

/// Headers consulted for the client IP, highest priority first
pub const CLIENT_IP_HEADERS: [&str; 5] = [
    "x-forwarded-for",
    "x-real-ip",
    "cf-connecting-ip",
    "x-client-ip",
    "x-cluster-client-ip",
];

/// Request headers keyed by lowercase name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: AsRef<str>, V: Into<String>>(&mut self, name: K, value: V) {
        self.0.insert(name.as_ref().to_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Header value with surrounding whitespace removed; empty counts as absent
    fn get_trimmed(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Authenticated user as reported by the session store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: SessionUser,
    pub session: SessionInfo,
}

/// Source of the current request's headers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HeaderSource: Send + Sync {
    async fn headers(&self) -> anyhow::Result<Headers>;
}

/// Session lookup; `Ok(None)` means unauthenticated
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn get_session(&self, headers: &Headers) -> anyhow::Result<Option<Session>>;
}

/// Random id generator
#[cfg_attr(test, mockall::automock)]
pub trait IdGenerator: Send + Sync {
    fn generate(&self, size: usize) -> String;
}

const NANOID_ALPHABET: &[u8; 64] =
    b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";

/// URL-safe random ids from a 64-symbol alphabet
#[derive(Debug, Default, Clone, Copy)]
pub struct NanoIdGenerator;

impl IdGenerator for NanoIdGenerator {
    fn generate(&self, size: usize) -> String {
        let mut rng = rand::thread_rng();
        (0..size)
            .map(|_| NANOID_ALPHABET[rng.gen_range(0..NANOID_ALPHABET.len())] as char)
            .collect()
    }
}

/// Per-request context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Per-user context; all fields empty when unauthenticated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserContext {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.session_id.is_none() && self.email.is_none()
    }
}

impl From<Session> for UserContext {
    fn from(session: Session) -> Self {
        Self {
            user_id: Some(session.user.id),
            session_id: Some(session.session.id),
            email: Some(session.user.email),
        }
    }
}

/// A request as seen by a host that holds the request object
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: Option<String>,
    pub url: Option<String>,
    pub headers: Headers,
}

/// Builds request context from a request object
pub fn request_context_from(request: &RequestInfo, ids: &dyn IdGenerator) -> RequestContext {
    let mut context = request_context_from_headers(&request.headers, ids);
    context.method = request.method.clone();
    context.url = request.url.clone();
    context
}

fn request_context_from_headers(headers: &Headers, ids: &dyn IdGenerator) -> RequestContext {
    RequestContext {
        request_id: headers
            .get_trimmed("x-request-id")
            .map(str::to_string)
            .unwrap_or_else(|| ids.generate(REQUEST_ID_LENGTH)),
        method: None,
        url: None,
        user_agent: headers.get_trimmed("user-agent").map(str::to_string),
    }
}

/// Client IP from proxy headers. `x-forwarded-for` yields its first entry.
pub fn client_ip_from(headers: &Headers) -> Option<String> {
    CLIENT_IP_HEADERS.iter().find_map(|name| {
        let value = headers.get_trimmed(name)?;
        let ip = if *name == "x-forwarded-for" {
            value.split(',').next().unwrap_or("").trim()
        } else {
            value
        };
        (!ip.is_empty()).then(|| ip.to_string())
    })
}

/// Derives logging context from the host's header and session sources
#[derive(Clone)]
pub struct ContextProvider {
    headers: Arc<dyn HeaderSource>,
    sessions: Arc<dyn SessionSource>,
    ids: Arc<dyn IdGenerator>,
}

impl ContextProvider {
    pub fn new(headers: Arc<dyn HeaderSource>, sessions: Arc<dyn SessionSource>) -> Self {
        Self {
            headers,
            sessions,
            ids: Arc::new(NanoIdGenerator),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    async fn load_headers(&self) -> Option<Headers> {
        match self.headers.headers().await {
            Ok(headers) => Some(headers),
            Err(e) => {
                let e = Error::Collaborator(format!("{:#}", e));
                tracing::debug!(error = %e, "Header source failed, using empty request context");
                None
            }
        }
    }

    /// Request context; a fresh id is generated when no `x-request-id` header exists
    pub async fn request_context(&self) -> RequestContext {
        let headers = self.load_headers().await.unwrap_or_default();
        request_context_from_headers(&headers, self.ids.as_ref())
    }

    /// User context; empty when unauthenticated or when the lookup fails
    pub async fn user_context(&self) -> UserContext {
        let headers = self.load_headers().await;
        self.user_context_for(headers.as_ref()).await
    }

    async fn user_context_for(&self, headers: Option<&Headers>) -> UserContext {
        let Some(headers) = headers else {
            return UserContext::default();
        };

        match self.sessions.get_session(headers).await {
            Ok(Some(session)) => session.into(),
            Ok(None) => UserContext::default(),
            Err(e) => {
                let e = Error::Collaborator(format!("{:#}", e));
                tracing::debug!(error = %e, "Session lookup failed, treating request as unauthenticated");
                UserContext::default()
            }
        }
    }

    pub async fn client_ip(&self) -> Option<String> {
        let headers = self.load_headers().await?;
        client_ip_from(&headers)
    }

    /// Request, user and `ip` keys merged into one context; absent values are omitted.
    /// All three parts come from a single header snapshot.
    pub async fn log_context(&self) -> LoggerContext {
        let headers = self.load_headers().await;
        let empty = Headers::default();
        let snapshot = headers.as_ref().unwrap_or(&empty);

        let mut context = LoggerContext::new();

        let request = request_context_from_headers(snapshot, self.ids.as_ref());
        if let Ok(Value::Object(request)) = serde_json::to_value(request) {
            context.extend(request);
        }
        if let Ok(Value::Object(user)) = serde_json::to_value(self.user_context_for(headers.as_ref()).await) {
            context.extend(user);
        }
        if let Some(ip) = client_ip_from(snapshot) {
            context.insert("ip".to_string(), Value::String(ip));
        }

        context
    }

    /// Child of `logger` carrying this request's context
    pub async fn request_logger(&self, logger: &Logger) -> Logger {
        logger.child(self.log_context().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    fn session() -> Session {
        Session {
            user: SessionUser {
                id: "u1".into(),
                email: "a@b.com".into(),
                role: Some("admin".into()),
            },
            session: SessionInfo { id: "s1".into() },
        }
    }

    fn provider(h: Headers, sessions: MockSessionSource) -> ContextProvider {
        let mut header_source = MockHeaderSource::new();
        header_source.expect_headers().returning(move || Ok(h.clone()));

        let mut ids = MockIdGenerator::new();
        ids.expect_generate()
            .with(eq(REQUEST_ID_LENGTH))
            .returning(|_| "generated-id-000".to_string());

        ContextProvider::new(Arc::new(header_source), Arc::new(sessions))
            .with_id_generator(Arc::new(ids))
    }

    #[test]
    fn test_headers_case_insensitive() {
        let h = headers(&[("User-Agent", "curl/8")]);
        assert_eq!(h.get("user-agent"), Some("curl/8"));
        assert_eq!(h.get("USER-AGENT"), Some("curl/8"));
    }

    #[test]
    fn test_client_ip_priority() {
        let h = headers(&[("x-real-ip", "10.0.0.2"), ("x-forwarded-for", " 1.1.1.1 , 2.2.2.2")]);
        assert_eq!(client_ip_from(&h), Some("1.1.1.1".to_string()));

        let h = headers(&[("x-client-ip", "3.3.3.3"), ("cf-connecting-ip", "4.4.4.4")]);
        assert_eq!(client_ip_from(&h), Some("4.4.4.4".to_string()));

        assert_eq!(client_ip_from(&Headers::new()), None);
    }

    #[test]
    fn test_nanoid_shape() {
        let id = NanoIdGenerator.generate(REQUEST_ID_LENGTH);
        assert_eq!(id.len(), REQUEST_ID_LENGTH);
        assert!(id.bytes().all(|b| NANOID_ALPHABET.contains(&b)));
        assert_ne!(id, NanoIdGenerator.generate(REQUEST_ID_LENGTH));
    }

    #[test]
    fn test_request_context_from_request() {
        let request = RequestInfo {
            method: Some("POST".into()),
            url: Some("/api/invitations".into()),
            headers: headers(&[("x-request-id", "req-9")]),
        };
        let context = request_context_from(&request, &NanoIdGenerator);

        assert_eq!(context.request_id, "req-9");
        assert_eq!(context.method.as_deref(), Some("POST"));
        assert_eq!(context.url.as_deref(), Some("/api/invitations"));
        assert_eq!(context.user_agent, None);
    }

    #[tokio::test]
    async fn test_request_context_uses_header_id() {
        let p = provider(
            headers(&[("x-request-id", "abc"), ("user-agent", "Mozilla/5.0")]),
            MockSessionSource::new(),
        );
        let context = p.request_context().await;

        assert_eq!(context.request_id, "abc");
        assert_eq!(context.user_agent.as_deref(), Some("Mozilla/5.0"));
    }

    #[tokio::test]
    async fn test_request_context_generates_id() {
        let p = provider(Headers::new(), MockSessionSource::new());
        assert_eq!(p.request_context().await.request_id, "generated-id-000");
    }

    #[tokio::test]
    async fn test_user_context_from_session() {
        let mut sessions = MockSessionSource::new();
        sessions.expect_get_session().returning(|_| Ok(Some(session())));

        let context = provider(Headers::new(), sessions).user_context().await;
        assert_eq!(context.user_id.as_deref(), Some("u1"));
        assert_eq!(context.session_id.as_deref(), Some("s1"));
        assert_eq!(context.email.as_deref(), Some("a@b.com"));
    }

    #[tokio::test]
    async fn test_user_context_swallows_failures() {
        let mut sessions = MockSessionSource::new();
        sessions
            .expect_get_session()
            .returning(|_| Err(anyhow::anyhow!("session store offline")));

        let context = provider(Headers::new(), sessions).user_context().await;
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_header_failure_gives_defaults() {
        let mut header_source = MockHeaderSource::new();
        header_source
            .expect_headers()
            .returning(|| Err(anyhow::anyhow!("called outside a request")));
        let mut sessions = MockSessionSource::new();
        sessions.expect_get_session().never();

        let p = ContextProvider::new(Arc::new(header_source), Arc::new(sessions));

        assert!(p.user_context().await.is_empty());
        assert_eq!(p.client_ip().await, None);
        assert_eq!(p.request_context().await.request_id.len(), REQUEST_ID_LENGTH);
    }

    #[tokio::test]
    async fn test_log_context_reads_headers_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Each read would return a different request
        let reads = Arc::new(AtomicUsize::new(0));
        let mut header_source = MockHeaderSource::new();
        header_source.expect_headers().times(1).returning(move || {
            let n = reads.fetch_add(1, Ordering::SeqCst);
            let request_id = format!("r-{}", n);
            let ip = format!("10.0.0.{}", n);
            Ok(headers(&[("x-request-id", request_id.as_str()), ("x-real-ip", ip.as_str())]))
        });
        let mut sessions = MockSessionSource::new();
        sessions
            .expect_get_session()
            .withf(|h| h.get("x-request-id") == Some("r-0"))
            .times(1)
            .returning(|_| Ok(Some(session())));

        let p = ContextProvider::new(Arc::new(header_source), Arc::new(sessions));
        let context = p.log_context().await;

        assert_eq!(context["requestId"], "r-0");
        assert_eq!(context["ip"], "10.0.0.0");
        assert_eq!(context["userId"], "u1");
    }

    #[tokio::test]
    async fn test_log_context_merges_everything() {
        let mut sessions = MockSessionSource::new();
        sessions.expect_get_session().returning(|_| Ok(Some(session())));

        let p = provider(
            headers(&[("x-request-id", "r-1"), ("x-real-ip", "9.9.9.9")]),
            sessions,
        );
        let context = p.log_context().await;

        assert_eq!(context["requestId"], "r-1");
        assert_eq!(context["userId"], "u1");
        assert_eq!(context["sessionId"], "s1");
        assert_eq!(context["ip"], "9.9.9.9");
        assert!(!context.contains_key("userAgent"));
    }
}
