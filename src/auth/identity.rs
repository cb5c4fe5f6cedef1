//! Caller identity and the typed inbound credential surface.

use std::fmt;

/// Authorization header prefix for bearer credentials.
pub const BEARER_PREFIX: &str = "Bearer ";
/// Name of the Frappe session cookie.
pub const SESSION_COOKIE_NAME: &str = "sid";
/// Anti-forgery header required alongside a session credential on
/// state-changing calls.
pub const HEADER_CSRF_TOKEN: &str = "X-Frappe-CSRF-Token";
/// Delegated-identity headers, honored only for trusted client ids.
pub const HEADER_DELEGATED_USER_ID: &str = "X-Gateway-User-ID";
pub const HEADER_DELEGATED_USER_EMAIL: &str = "X-Gateway-User-Email";
pub const HEADER_DELEGATED_USER_NAME: &str = "X-Gateway-User-Name";

/// The upstream credential a resolved caller is entitled to present.
///
/// An identity carries at most one credential type; the enum makes a second
/// one unrepresentable.
#[derive(Clone, PartialEq, Eq)]
pub enum UpstreamCredential {
    /// Frappe session, presented as the `sid` cookie. The CSRF token is
    /// required for mutating calls.
    Session {
        sid: String,
        csrf_token: Option<String>,
    },
    /// OAuth2 access token, presented as an authorization header.
    Bearer(String),
}

impl fmt::Debug for UpstreamCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamCredential::Session { csrf_token, .. } => f
                .debug_struct("Session")
                .field("csrf_token", &csrf_token.is_some())
                .finish_non_exhaustive(),
            UpstreamCredential::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// A resolved caller: who is calling, and which upstream credential (if any)
/// they are entitled to present. Immutable once constructed for a call.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    id: String,
    email: String,
    full_name: Option<String>,
    roles: Vec<String>,
    client_id: Option<String>,
    credential: Option<UpstreamCredential>,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            full_name: None,
            roles: Vec::new(),
            client_id: None,
            credential: None,
        }
    }

    /// Fixed identity used when remote validation is bypassed.
    pub fn anonymous() -> Self {
        Self::new("anonymous", "anonymous@example.com")
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_credential(mut self, credential: UpstreamCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Client id of the token that authenticated this caller, when known.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn credential(&self) -> Option<&UpstreamCredential> {
        self.credential.as_ref()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("client_id", &self.client_id)
            .field("roles", &self.roles.len())
            .field("credential", &self.credential)
            .finish()
    }
}

/// Typed view of the inbound credential surface, extracted by the protocol
/// framing layer: authorization header, session cookie, CSRF header, and
/// delegated-identity headers.
#[derive(Clone, Default)]
pub struct RequestMetadata {
    authorization: Option<String>,
    session_cookie: Option<String>,
    csrf_token: Option<String>,
    delegated_user_id: Option<String>,
    delegated_user_email: Option<String>,
    delegated_user_name: Option<String>,
}

impl RequestMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw `Authorization` header value.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Convenience for a bearer credential.
    pub fn with_bearer(self, token: impl AsRef<str>) -> Self {
        self.with_authorization(format!("{}{}", BEARER_PREFIX, token.as_ref()))
    }

    /// Value of the `sid` session cookie.
    pub fn with_session_cookie(mut self, sid: impl Into<String>) -> Self {
        self.session_cookie = Some(sid.into());
        self
    }

    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn with_delegated_identity(
        mut self,
        id: impl Into<String>,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.delegated_user_id = Some(id.into());
        self.delegated_user_email = Some(email.into());
        self.delegated_user_name = Some(name.into());
        self
    }

    /// Bearer token from the authorization header, prefix-stripped. An
    /// empty token after stripping counts as absent.
    pub fn bearer_token(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .and_then(|auth| auth.strip_prefix(BEARER_PREFIX))
            .filter(|token| !token.is_empty())
    }

    pub fn session_cookie(&self) -> Option<&str> {
        self.session_cookie.as_deref().filter(|sid| !sid.is_empty())
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub fn delegated_user_id(&self) -> Option<&str> {
        self.delegated_user_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn delegated_user_email(&self) -> Option<&str> {
        self.delegated_user_email.as_deref()
    }

    pub fn delegated_user_name(&self) -> Option<&str> {
        self.delegated_user_name.as_deref()
    }
}

impl fmt::Debug for RequestMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMetadata")
            .field("authorization", &self.authorization.is_some())
            .field("session_cookie", &self.session_cookie.is_some())
            .field("csrf_token", &self.csrf_token.is_some())
            .field("delegated_user_id", &self.delegated_user_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_extraction() {
        let meta = RequestMetadata::new().with_authorization("Bearer abc123");
        assert_eq!(meta.bearer_token(), Some("abc123"));

        let meta = RequestMetadata::new().with_authorization("Basic dXNlcjpwYXNz");
        assert_eq!(meta.bearer_token(), None);

        // Empty token after stripping counts as absent.
        let meta = RequestMetadata::new().with_authorization("Bearer ");
        assert_eq!(meta.bearer_token(), None);

        let meta = RequestMetadata::new();
        assert_eq!(meta.bearer_token(), None);
    }

    #[test]
    fn test_identity_single_credential() {
        let identity = Identity::new("user123", "user@example.com")
            .with_credential(UpstreamCredential::Bearer("tok".into()));
        assert!(matches!(
            identity.credential(),
            Some(UpstreamCredential::Bearer(_))
        ));

        let identity = identity.with_credential(UpstreamCredential::Session {
            sid: "sid-1".into(),
            csrf_token: None,
        });
        // Replaced, never accumulated.
        assert!(matches!(
            identity.credential(),
            Some(UpstreamCredential::Session { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let identity = Identity::new("user123", "user@example.com")
            .with_credential(UpstreamCredential::Bearer("super-secret-token".into()));
        let rendered = format!("{:?}", identity);
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("user123"));

        let meta = RequestMetadata::new()
            .with_bearer("super-secret-token")
            .with_session_cookie("secret-sid");
        let rendered = format!("{:?}", meta);
        assert!(!rendered.contains("super-secret-token"));
        assert!(!rendered.contains("secret-sid"));
    }

    #[test]
    fn test_has_role() {
        let identity =
            Identity::new("u", "u@example.com").with_roles(["Projects User", "Accounts User"]);
        assert!(identity.has_role("Projects User"));
        assert!(!identity.has_role("System Manager"));
    }
}
