use axum::{extract::State, response::Json, routing::post, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::OpIdentity;
use crate::error::Result;
use crate::http::HttpServerState;

pub fn create_route() -> Router<HttpServerState> {
    Router::new().route("/third/fcm_update_token", post(fcm_update_token))
}

#[derive(Debug, Deserialize)]
struct FcmUpdateTokenRequest {
    fcm_token: String,
}

/// POST /third/fcm_update_token
///
/// 为调用者当前平台登记推送 token。
async fn fcm_update_token(
    State(state): State<HttpServerState>,
    identity: OpIdentity,
    Json(request): Json<FcmUpdateTokenRequest>,
) -> Result<Json<Value>> {
    state
        .push_service
        .update_push_registration(&identity.user_id, identity.platform_id, &request.fcm_token)
        .await?;
    Ok(Json(json!({})))
}
