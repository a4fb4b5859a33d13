use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::Authorization;
use headers::authorization::Bearer;
use serde::{Deserialize, Serialize};
use slotkeeper_db::{Repository, Requester};
use tracing::{debug, info};
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;
use crate::helpers::{generate_api_key, hash_api_key};

/// The requester behind `Authorization: Bearer <api key>`.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Requester);

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(auth) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|rejection| {
                    if rejection.is_missing() {
                        AppError::NoRequester
                    } else {
                        AppError::InvalidApiKey
                    }
                })?;

        let api_key_hash = hash_api_key(auth.token());
        let requester = state
            .repo
            .requester_by_token(api_key_hash)
            .await?
            .ok_or(AppError::InvalidApiKey)?;

        debug!(user_id = %requester.user_id, admin = requester.is_admin, internal = requester.is_internal, "resolved requester");
        Ok(Caller(requester))
    }
}

/// Kind of identity an issued api key stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Internal,
    Admin,
}

impl Role {
    fn requester(self, user_id: Uuid) -> Requester {
        match self {
            Role::User => Requester::user(user_id),
            Role::Internal => Requester::internal(user_id),
            Role::Admin => Requester::admin(user_id),
        }
    }
}

/// A freshly issued api key. The plain key is only ever returned here.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedKey {
    pub api_key: String,
    pub user_id: Uuid,
}

/// Issue a new api key for `user_id` (a fresh identity when `None`).
/// Only admins may issue keys; the store keeps the hash.
pub async fn issue_api_key(
    repo: &dyn Repository,
    role: Role,
    user_id: Option<Uuid>,
    issuer: &Requester,
    now: i64,
) -> Result<IssuedKey, AppError> {
    if !issuer.is_admin {
        return Err(AppError::NoPermission);
    }

    let requester = role.requester(user_id.unwrap_or_else(Uuid::new_v4));
    let api_key = generate_api_key();
    repo.issue_token(hash_api_key(&api_key), requester, now).await?;

    info!(user_id = %requester.user_id, ?role, issued_by = %issuer.user_id, "issued api key");
    Ok(IssuedKey {
        api_key,
        user_id: requester.user_id,
    })
}
