//! Authorization gate.
//!
//! Handlers are keyed by their upper-cased scheme token (`BASIC`, `DIGEST`).
//! A request is checked against the single handler named by its
//! `Authorization` header; configured schemes are alternatives, not a chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::http::request::Request;
use crate::http::response::StatusCode;

/// Verifies credentials for one authentication scheme.
pub trait AuthorizationHandler: Send + Sync {
    /// Scheme token, e.g. `Basic`.
    fn scheme(&self) -> &str;

    /// Value for the `WWW-Authenticate` header sent with a 401.
    fn challenge(&self) -> String;

    /// Checks the full `Authorization` header value.
    fn authenticate(&self, request: &Request, authorization: &str) -> bool;
}

/// Outcome of [`AuthGate::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allow,
    Deny {
        status: StatusCode,
        /// One `WWW-Authenticate` value per offered scheme.
        challenges: Vec<String>,
    },
}

type HandlerMap = HashMap<String, Arc<dyn AuthorizationHandler>>;

#[derive(Default)]
pub struct AuthGate {
    handlers: ArcSwap<HandlerMap>,
    write_lock: Mutex<()>,
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `handler`, replacing any handler for the same scheme.
    pub fn register(&self, handler: Arc<dyn AuthorizationHandler>) {
        let scheme = handler.scheme().to_ascii_uppercase();
        tracing::debug!(scheme = %scheme, "registering authorization handler");
        self.update(|handlers| {
            handlers.insert(scheme, handler);
        });
    }

    pub fn unregister(&self, scheme: &str) -> Option<Arc<dyn AuthorizationHandler>> {
        let scheme = scheme.to_ascii_uppercase();
        self.update(|handlers| handlers.remove(&scheme))
    }

    pub fn has_handlers(&self) -> bool {
        !self.handlers.load().is_empty()
    }

    /// The handler responsible for an `Authorization` header value.
    pub fn challenge(&self, authorization: &str) -> Option<Arc<dyn AuthorizationHandler>> {
        let scheme = scheme_of(authorization)?;
        self.handlers.load().get(&scheme).cloned()
    }

    pub fn check(&self, request: &Request) -> Authorization {
        let handlers = self.handlers.load();
        if handlers.is_empty() {
            return Authorization::Allow;
        }

        let header = request.header("Authorization");
        let handler = header
            .and_then(scheme_of)
            .and_then(|scheme| handlers.get(&scheme));

        match (handler, header) {
            (Some(handler), Some(value)) => {
                if handler.authenticate(request, value) {
                    Authorization::Allow
                } else {
                    Authorization::Deny {
                        status: StatusCode::Unauthorized,
                        challenges: vec![handler.challenge()],
                    }
                }
            }
            _ => {
                // Offer every configured scheme, in a stable order.
                let mut schemes: Vec<_> = handlers.iter().collect();
                schemes.sort_by(|a, b| a.0.cmp(&b.0));
                Authorization::Deny {
                    status: StatusCode::Unauthorized,
                    challenges: schemes.into_iter().map(|(_, h)| h.challenge()).collect(),
                }
            }
        }
    }

    fn update<R>(&self, change: impl FnOnce(&mut HandlerMap) -> R) -> R {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = HandlerMap::clone(&self.handlers.load());
        let result = change(&mut next);
        self.handlers.store(Arc::new(next));
        result
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<String> = self.handlers.load().keys().cloned().collect();
        schemes.sort();
        f.debug_struct("AuthGate").field("schemes", &schemes).finish()
    }
}

/// Upper-cased token before the first space of an `Authorization` value.
fn scheme_of(authorization: &str) -> Option<String> {
    let token = authorization.split(' ').next()?.trim();
    (!token.is_empty()).then(|| token.to_ascii_uppercase())
}

/// Checks a user name and password.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> bool;
}

impl<F> Authenticator for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn authenticate(&self, username: &str, password: &str) -> bool {
        self(username, password)
    }
}

/// `Basic` scheme: base64 `user:password` checked by an [`Authenticator`].
pub struct BasicAuthorizationHandler<A> {
    authenticator: A,
    realm: String,
}

impl<A: Authenticator> BasicAuthorizationHandler<A> {
    pub fn new(authenticator: A, realm: impl Into<String>) -> Self {
        Self {
            authenticator,
            realm: realm.into(),
        }
    }
}

/// Builds the `Authorization` value a client sends for the `Basic` scheme.
pub fn basic_credentials(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
}

impl<A: Authenticator> AuthorizationHandler for BasicAuthorizationHandler<A> {
    fn scheme(&self) -> &str {
        "Basic"
    }

    fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }

    fn authenticate(&self, _request: &Request, authorization: &str) -> bool {
        let Some((_, encoded)) = authorization.trim().split_once(' ') else {
            return false;
        };
        let Ok(decoded) = BASE64.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((username, password)) => self.authenticator.authenticate(username, password),
            None => false,
        }
    }
}
