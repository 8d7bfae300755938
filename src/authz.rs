//! Pure, store-generic policy decision functions (§4.3). Kept separate
//! from `policy` so the URL-keying and scheme rules are unit-testable
//! without touching disk or a prompt handler — mirrors the teacher's
//! `authz::net_decision_with` shape.

use crate::policy::{PolicyDecision, PolicyStore};
use std::collections::HashMap;
use url::Url;

fn path_prefix_matches(prefix: &Option<String>, path: &str) -> bool {
    match prefix {
        Some(p) => path.starts_with(p.as_str()),
        None => true,
    }
}

/// How an `api.call` URL resolves before any stored decision is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlClass {
    /// `uicp:`/`tauri:` schemes: internal, allowed by rule.
    InternalAllow,
    /// `http(s)://localhost` or loopback: allowed by rule.
    LocalhostAllow,
    /// Needs a stored or prompted decision, keyed `api:{METHOD}:{origin}`.
    NeedsDecision(String),
    /// Scheme is neither internal, HTTP(S), nor localhost: denied outright.
    UnknownSchemeDeny,
}

fn is_internal_scheme(scheme: &str) -> bool {
    matches!(scheme, "uicp" | "tauri")
}

fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == "localhost" || host == "127.0.0.1" || host == "::1"
}

/// Classifies an `api.call` URL per §4.3's scheme/localhost rules. The
/// caller supplies the method for the `api:{METHOD}:{origin}` key.
pub fn classify_url(url: &Url, method: &str) -> UrlClass {
    let scheme = url.scheme();
    if is_internal_scheme(scheme) {
        return UrlClass::InternalAllow;
    }
    if scheme != "http" && scheme != "https" {
        return UrlClass::UnknownSchemeDeny;
    }
    if let Some(host) = url.host_str() {
        if is_loopback_host(host) {
            return UrlClass::LocalhostAllow;
        }
    }
    let origin = format!(
        "{}://{}{}",
        scheme,
        url.host_str().unwrap_or(""),
        url.port().map(|p| format!(":{p}")).unwrap_or_default()
    );
    UrlClass::NeedsDecision(format!("api:{}:{}", method.to_ascii_uppercase(), origin))
}

/// Session-then-persistent lookup for an already-classified key. Returns
/// `None` when neither tier has an opinion, signalling "ask the prompt".
/// A stored decision with a `pathPrefix` restriction only matches when
/// `path` falls under that prefix (§4.3); otherwise it is as if no decision
/// were on file.
pub fn lookup_decision<S: PolicyStore + ?Sized>(
    store: &S,
    session: &HashMap<String, (PolicyDecision, Option<String>)>,
    key: &str,
    path: &str,
) -> Option<(PolicyDecision, &'static str)> {
    if let Some((decision, prefix)) = session.get(key) {
        if path_prefix_matches(prefix, path) {
            return Some((*decision, "session"));
        }
    }
    let record = store.load().get(key).cloned()?;
    if path_prefix_matches(&record.path_prefix, path) {
        return Some((record.decision, "persistent"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_schemes_allow_by_rule() {
        let url = Url::parse("uicp://intent").unwrap();
        assert_eq!(classify_url(&url, "POST"), UrlClass::InternalAllow);
    }

    #[test]
    fn localhost_allows_by_rule() {
        let url = Url::parse("http://localhost:8080/api").unwrap();
        assert_eq!(classify_url(&url, "GET"), UrlClass::LocalhostAllow);
    }

    #[test]
    fn unknown_scheme_denies() {
        let url = Url::parse("ftp://example.com/file").unwrap();
        assert_eq!(classify_url(&url, "GET"), UrlClass::UnknownSchemeDeny);
    }

    #[test]
    fn remote_https_needs_a_decision_keyed_by_method_and_origin() {
        let url = Url::parse("https://example.com/v1/data").unwrap();
        assert_eq!(
            classify_url(&url, "get"),
            UrlClass::NeedsDecision("api:GET:https://example.com".into())
        );
    }

    #[test]
    fn session_tier_shadows_persistent_tier() {
        use crate::policy::{PolicyDuration, PolicyRecord};

        struct Empty;
        impl PolicyStore for Empty {
            fn load(&self) -> HashMap<String, PolicyRecord> {
                let mut m = HashMap::new();
                m.insert(
                    "api:GET:https://example.com".into(),
                    PolicyRecord {
                        decision: PolicyDecision::Deny,
                        duration: PolicyDuration::Forever,
                        path_prefix: None,
                        created_at: 0,
                        session_only: false,
                    },
                );
                m
            }
            fn persist(&self, _key: &str, _record: PolicyRecord) -> crate::error::Result<()> {
                Ok(())
            }
        }
        let mut session = HashMap::new();
        session.insert("api:GET:https://example.com".to_string(), (PolicyDecision::Allow, None));
        let (decision, source) = lookup_decision(&Empty, &session, "api:GET:https://example.com", "/v1").unwrap();
        assert_eq!(decision, PolicyDecision::Allow);
        assert_eq!(source, "session");
    }

    #[test]
    fn persistent_tier_path_prefix_restriction_is_enforced() {
        use crate::policy::{PolicyDuration, PolicyRecord};

        struct Scoped;
        impl PolicyStore for Scoped {
            fn load(&self) -> HashMap<String, PolicyRecord> {
                let mut m = HashMap::new();
                m.insert(
                    "api:GET:https://example.com".into(),
                    PolicyRecord {
                        decision: PolicyDecision::Allow,
                        duration: PolicyDuration::Forever,
                        path_prefix: Some("/v1".into()),
                        created_at: 0,
                        session_only: false,
                    },
                );
                m
            }
            fn persist(&self, _key: &str, _record: PolicyRecord) -> crate::error::Result<()> {
                Ok(())
            }
        }
        let session = HashMap::new();
        assert!(lookup_decision(&Scoped, &session, "api:GET:https://example.com", "/v1/data").is_some());
        assert!(lookup_decision(&Scoped, &session, "api:GET:https://example.com", "/v2/data").is_none());
    }
}
