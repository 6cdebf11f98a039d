//! Auth Guard: per-request HTTP Basic authentication and namespace
//! authorization, backed by the reserved `_meta.users` collection.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};

use crate::error::{AppError, AppResult};
use crate::path::NodePath;
use crate::storage::StorageAdapter;

/// Configured admin credentials. An empty `user` disables authentication
/// entirely (spec §4.E: "If configured admin user is empty -> auth
/// disabled").
#[derive(Debug, Clone, Default)]
pub struct AdminCredentials {
    pub user: String,
    pub password: String,
}

/// Principal extracted from an `Authorization: Basic` header.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: String,
    /// MD5 hex digest of the HTTP Basic password. The raw secret never
    /// leaves this struct; only the digest is compared against storage.
    pub secret_digest: String,
}

impl Principal {
    pub fn from_basic_auth(header_value: &str) -> AppResult<Principal> {
        let encoded = header_value
            .strip_prefix("Basic ")
            .ok_or_else(|| AppError::AuthFailure("authorization header is not HTTP Basic".into()))?;
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|_| AppError::AuthFailure("malformed base64 in authorization header".into()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| AppError::AuthFailure("authorization header is not valid UTF-8".into()))?;
        let (user, password) = decoded
            .split_once(':')
            .ok_or_else(|| AppError::AuthFailure("authorization header missing ':'".into()))?;

        Ok(Principal {
            user: user.to_string(),
            secret_digest: md5_hex(password),
        })
    }
}

fn md5_hex(s: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Checks whether `principal` is allowed to act on `target`. `admin` being
/// empty disables the guard entirely. Any failure collapses to
/// `AuthFailure`.
pub async fn authorize(
    admin: &AdminCredentials,
    storage: &dyn StorageAdapter,
    principal: Option<&Principal>,
    target: &NodePath,
) -> AppResult<()> {
    if admin.user.is_empty() {
        return Ok(());
    }

    let principal = principal.ok_or_else(|| AppError::AuthFailure("missing credentials".into()))?;

    if principal.user == admin.user && principal.secret_digest == md5_hex(&admin.password) {
        return Ok(());
    }

    // The reserved `_meta` namespace is accessible to the admin only.
    if target.namespace == "_meta" {
        return Err(AppError::AuthFailure("_meta namespace is admin-only".into()));
    }

    let user_path = NodePath {
        namespace: "_meta".to_string(),
        collection: "users".to_string(),
        label: principal.user.clone(),
    };
    let record = storage
        .select_node(&user_path)
        .await
        .map_err(|_| AppError::AuthFailure(format!("unknown principal `{}`", principal.user)))?;

    let stored_password = record
        .get("password")
        .ok_or_else(|| AppError::AuthFailure("principal record missing password".into()))?;
    if stored_password != &principal.secret_digest {
        return Err(AppError::AuthFailure("password mismatch".into()));
    }

    let granted: Vec<&str> = record
        .get("ns")
        .map(|ns| ns.split(',').map(str::trim).collect())
        .unwrap_or_default();

    let wanted_ns = target.namespace.as_str();
    let wanted_ns_coll = format!("{}.{}", target.namespace, target.collection);
    if granted.contains(&wanted_ns) || granted.contains(&wanted_ns_coll.as_str()) {
        return Ok(());
    }

    Err(AppError::AuthFailure(format!("`{}` is not granted namespace `{}`", principal.user, target.namespace)))
}
