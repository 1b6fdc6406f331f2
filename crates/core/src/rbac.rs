//! Token-based access control.
//!
//! Each token carries one permission ordinal per [`Resource`]:
//! `0 = none`, `1 = read`, `2 = read-write`, `3 = admin`. Callers present a
//! bearer token through a [`RequestContext`]; [`Authority::authorize`] checks
//! the ordinal for the resource against the required [`Access`].
//!
//! Two ways in without a stored token:
//! - the configured root token, which is admin on everything;
//! - `create_token` until the first token has ever been created.
//!
//! A token with a non-zero `space_id` is bound to that space and is refused
//! on anything that reaches beyond it: system-wide snapshots, the token
//! table, cluster membership.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use subtle::ConstantTimeEq;

/// Resource types that carry their own permission ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    System,
    Space,
    Version,
    Vector,
    Snapshot,
    Security,
    KeyValue,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resource::System => "system",
            Resource::Space => "space",
            Resource::Version => "version",
            Resource::Vector => "vector",
            Resource::Snapshot => "snapshot",
            Resource::Security => "security",
            Resource::KeyValue => "keyvalue",
        };
        f.write_str(s)
    }
}

/// Minimum ordinal an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    Read = 1,
    Write = 2,
    Admin = 3,
}

/// Highest valid permission ordinal.
pub const MAX_ORDINAL: u8 = 3;

/// Permission ordinals, one per resource type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scopes {
    pub system: u8,
    pub space: u8,
    pub version: u8,
    pub vector: u8,
    pub snapshot: u8,
    pub security: u8,
    pub keyvalue: u8,
}

impl Scopes {
    /// Admin on every resource.
    pub const ADMIN: Scopes = Scopes {
        system: MAX_ORDINAL,
        space: MAX_ORDINAL,
        version: MAX_ORDINAL,
        vector: MAX_ORDINAL,
        snapshot: MAX_ORDINAL,
        security: MAX_ORDINAL,
        keyvalue: MAX_ORDINAL,
    };

    pub fn get(&self, resource: Resource) -> u8 {
        match resource {
            Resource::System => self.system,
            Resource::Space => self.space,
            Resource::Version => self.version,
            Resource::Vector => self.vector,
            Resource::Snapshot => self.snapshot,
            Resource::Security => self.security,
            Resource::KeyValue => self.keyvalue,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let all = [
            Resource::System,
            Resource::Space,
            Resource::Version,
            Resource::Vector,
            Resource::Snapshot,
            Resource::Security,
            Resource::KeyValue,
        ];
        for r in all {
            if self.get(r) > MAX_ORDINAL {
                return Err(Error::validation(format!(
                    "{r} scope must be 0..={MAX_ORDINAL}, got {}",
                    self.get(r)
                )));
            }
        }
        Ok(())
    }
}

/// Settings of a token, as given to create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpec {
    pub user_id: u64,
    /// `0` grants access to every space.
    pub space_id: u64,
    /// Unix seconds; `0` never expires.
    pub expire_time_utc: i64,
    pub scopes: Scopes,
}

/// A stored token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: u64,
    pub token: String,
    pub user_id: u64,
    pub space_id: u64,
    pub expire_time_utc: i64,
    pub scopes: Scopes,
    pub created_time_utc: i64,
    pub updated_time_utc: i64,
}

impl Token {
    pub fn expired(&self, now: i64) -> bool {
        self.expire_time_utc != 0 && now >= self.expire_time_utc
    }
}

/// Credentials of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub token: Option<String>,
}

impl RequestContext {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

/// Who a request was authorized as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Authorization is disabled.
    Open,
    Root,
    /// Bootstrap window: no token has been created yet.
    Bootstrap,
    Token { id: u64, user_id: u64 },
}

/// Token table plus the authorization check.
#[derive(Debug)]
pub struct Authority {
    enabled: bool,
    root_token: Option<String>,
    tokens: RwLock<BTreeMap<String, Token>>,
    next_id: AtomicU64,
    /// Set by the first `create` and never cleared.
    bootstrapped: AtomicBool,
}

impl Authority {
    /// `enabled = false` authorizes every request.
    pub fn new(enabled: bool, root_token: Option<String>) -> Self {
        Self {
            enabled,
            root_token: root_token.filter(|t| !t.is_empty()),
            tokens: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            bootstrapped: AtomicBool::new(false),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn is_root(&self, presented: &str) -> bool {
        self.root_token
            .as_deref()
            .is_some_and(|root| presented.as_bytes().ct_eq(root.as_bytes()).into())
    }

    /// Check that the caller holds `access` on `resource`.
    ///
    /// `space_id` is the id of the space the operation targets, if any. A
    /// token scoped to another space is refused.
    pub fn authorize(
        &self,
        ctx: &RequestContext,
        resource: Resource,
        access: Access,
        space_id: Option<u64>,
    ) -> Result<Principal> {
        self.check(ctx, resource, access, |bound| match space_id {
            Some(target) => bound == target,
            None => true,
        })
    }

    /// Like [`authorize`](Authority::authorize) for operations that are not
    /// confined to one space. Space-bound tokens are refused.
    pub fn authorize_global(
        &self,
        ctx: &RequestContext,
        resource: Resource,
        access: Access,
    ) -> Result<Principal> {
        self.check(ctx, resource, access, |_| false)
    }

    /// `allows_bound` decides whether a token bound to a space may proceed.
    fn check(
        &self,
        ctx: &RequestContext,
        resource: Resource,
        access: Access,
        allows_bound: impl FnOnce(u64) -> bool,
    ) -> Result<Principal> {
        if !self.enabled {
            return Ok(Principal::Open);
        }
        let presented = ctx
            .token
            .as_deref()
            .ok_or_else(|| Error::Unauthenticated("missing bearer token".into()))?;
        if self.is_root(presented) {
            return Ok(Principal::Root);
        }
        let tokens = self.tokens.read();
        let token = tokens
            .get(presented)
            .ok_or_else(|| Error::Unauthenticated("unknown token".into()))?;
        if token.expired(chrono::Utc::now().timestamp()) {
            return Err(Error::Unauthenticated(format!("token {} expired", token.id)));
        }
        if token.space_id != 0 && !allows_bound(token.space_id) {
            return Err(Error::PermissionDenied(format!(
                "token is scoped to space {}",
                token.space_id
            )));
        }
        let held = token.scopes.get(resource);
        if held < access as u8 {
            return Err(Error::PermissionDenied(format!(
                "{resource} scope {held} < {}",
                access as u8
            )));
        }
        Ok(Principal::Token {
            id: token.id,
            user_id: token.user_id,
        })
    }

    /// Whether a token has ever been created.
    pub fn bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }

    /// Authorization for `create_token`: open until the first token exists.
    pub fn authorize_token_creation(&self, ctx: &RequestContext) -> Result<Principal> {
        if self.enabled && !self.bootstrapped() {
            if ctx.token.as_deref().is_some_and(|t| self.is_root(t)) {
                return Ok(Principal::Root);
            }
            return Ok(Principal::Bootstrap);
        }
        self.authorize_global(ctx, Resource::Security, Access::Write)
    }

    // ── Token table ────────────────────────────────────────────────────

    /// Store a new token under the given token string.
    pub fn create(&self, token: String, spec: TokenSpec, at: i64) -> Result<Token> {
        spec.scopes.validate()?;
        let mut tokens = self.tokens.write();
        if tokens.contains_key(&token) {
            return Err(Error::AlreadyExists("token".into()));
        }
        let record = Token {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            token: token.clone(),
            user_id: spec.user_id,
            space_id: spec.space_id,
            expire_time_utc: spec.expire_time_utc,
            scopes: spec.scopes,
            created_time_utc: at,
            updated_time_utc: at,
        };
        tokens.insert(token, record.clone());
        self.bootstrapped.store(true, Ordering::SeqCst);
        tracing::info!(token_id = record.id, user_id = record.user_id, "Token created");
        Ok(record)
    }

    /// Replace the settings of an existing token.
    pub fn update(&self, token: &str, spec: TokenSpec, at: i64) -> Result<Token> {
        spec.scopes.validate()?;
        let mut tokens = self.tokens.write();
        let record = tokens
            .get_mut(token)
            .ok_or_else(|| Error::not_found("token"))?;
        record.user_id = spec.user_id;
        record.space_id = spec.space_id;
        record.expire_time_utc = spec.expire_time_utc;
        record.scopes = spec.scopes;
        record.updated_time_utc = at;
        Ok(record.clone())
    }

    pub fn delete(&self, token: &str) -> Result<()> {
        self.tokens
            .write()
            .remove(token)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("token"))
    }

    /// All tokens, ordered by id.
    pub fn list(&self) -> Vec<Token> {
        let mut all: Vec<Token> = self.tokens.read().values().cloned().collect();
        all.sort_by_key(|t| t.id);
        all
    }

    /// Replace the table, used when loading a checkpoint or a Raft snapshot.
    ///
    /// A closed bootstrap window stays closed.
    pub fn replace(&self, tokens: Vec<Token>, bootstrapped: bool) {
        let next = tokens.iter().map(|t| t.id + 1).max().unwrap_or(1);
        let bootstrapped = bootstrapped || !tokens.is_empty();
        let map = tokens.into_iter().map(|t| (t.token.clone(), t)).collect();
        *self.tokens.write() = map;
        self.next_id.store(next, Ordering::SeqCst);
        self.bootstrapped.fetch_or(bootstrapped, Ordering::SeqCst);
    }
}

/// Fresh opaque token string.
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
