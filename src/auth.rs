//! Access control interface. The core consults an [`AccessController`]
//! before every handler; on refusal the controller describes an HTTP
//! challenge whose rendering becomes the `WWW-Authenticate` header of a
//! 401 response. Implementations are irrelevant to the core — a trivial
//! header-presence controller ships for development and tests.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

/// The operations a request wants on a repository, derived from the HTTP
/// method: GET/HEAD ask for pull, mutating methods for push.
#[derive(Debug, Clone)]
pub struct Access {
    pub repository: Option<String>,
    pub pull: bool,
    pub push: bool,
}

impl Access {
    pub fn scope(&self) -> Option<String> {
        let repository = self.repository.as_deref()?;
        let mut actions = Vec::new();
        if self.pull {
            actions.push(format!("repository:{repository}:pull"));
        }
        if self.push {
            actions.push(format!("repository:{repository}:push"));
        }
        if actions.is_empty() {
            None
        } else {
            Some(actions.join(" "))
        }
    }
}

/// Contents of a `WWW-Authenticate` challenge, per RFC 7235.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub scheme: String,
    pub parameters: Vec<(String, String)>,
}

impl Challenge {
    /// Renders a valid `WWW-Authenticate` header value.
    pub fn header_value(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|(k, v)| format!("{k}={v:?}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{} {}", self.scheme, params)
    }
}

#[async_trait::async_trait]
pub trait AccessController: Send + Sync {
    /// Ok when the request is granted the requested access; on refusal, a
    /// challenge the caller must surface with a 401.
    async fn authorized(&self, headers: &HeaderMap, access: &Access) -> Result<(), Challenge>;
}

/// Grants everything. Selected with `REGISTRY_AUTH=none`.
pub struct OpenAccess;

#[async_trait::async_trait]
impl AccessController for OpenAccess {
    async fn authorized(&self, _headers: &HeaderMap, _access: &Access) -> Result<(), Challenge> {
        Ok(())
    }
}

/// Accepts any request that carries an `Authorization` header, without
/// inspecting it. Enough to exercise challenge round trips.
pub struct HeaderPresenceAccess {
    realm: String,
    service: String,
}

impl HeaderPresenceAccess {
    pub fn new(realm: impl Into<String>, service: impl Into<String>) -> Self {
        HeaderPresenceAccess {
            realm: realm.into(),
            service: service.into(),
        }
    }

    fn challenge(&self, access: &Access) -> Challenge {
        let mut parameters = vec![
            ("realm".to_string(), self.realm.clone()),
            ("service".to_string(), self.service.clone()),
        ];
        if let Some(scope) = access.scope() {
            parameters.push(("scope".to_string(), scope));
        }
        Challenge {
            scheme: "Bearer".to_string(),
            parameters,
        }
    }
}

#[async_trait::async_trait]
impl AccessController for HeaderPresenceAccess {
    async fn authorized(&self, headers: &HeaderMap, access: &Access) -> Result<(), Challenge> {
        if headers.get(AUTHORIZATION).is_some() {
            Ok(())
        } else {
            Err(self.challenge(access))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull_access(repo: &str) -> Access {
        Access {
            repository: Some(repo.to_string()),
            pull: true,
            push: false,
        }
    }

    #[test]
    fn scope_strings() {
        assert_eq!(
            pull_access("foo/bar").scope().unwrap(),
            "repository:foo/bar:pull"
        );
        let both = Access {
            repository: Some("foo/bar".to_string()),
            pull: true,
            push: true,
        };
        assert_eq!(
            both.scope().unwrap(),
            "repository:foo/bar:pull repository:foo/bar:push"
        );
        let no_repo = Access {
            repository: None,
            pull: true,
            push: false,
        };
        assert!(no_repo.scope().is_none());
    }

    #[test]
    fn challenge_renders_quoted_parameters() {
        let ctl = HeaderPresenceAccess::new("https://auth.example.com/token", "registry.example.com");
        let challenge = ctl.challenge(&pull_access("foo/bar"));
        assert_eq!(
            challenge.header_value(),
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:foo/bar:pull""#
        );
    }

    #[tokio::test]
    async fn header_presence_grants_with_any_authorization() {
        let ctl = HeaderPresenceAccess::new("r", "s");
        let mut headers = HeaderMap::new();
        assert!(ctl.authorized(&headers, &pull_access("a")).await.is_err());
        headers.insert(AUTHORIZATION, "Bearer whatever".parse().unwrap());
        assert!(ctl.authorized(&headers, &pull_access("a")).await.is_ok());
    }
}
