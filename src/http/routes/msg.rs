use axum::{extract::State, response::Json, routing::post, Router};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::OpIdentity;
use crate::error::{Result, ServerError};
use crate::http::HttpServerState;
use crate::push::{MessageEvent, PushOptions, RecipientSelector};

pub fn create_route() -> Router<HttpServerState> {
    Router::new().route("/msg/send_msg", post(send_msg))
}

#[derive(Debug, Deserialize)]
struct SendMsgRequest {
    #[serde(default)]
    client_msg_id: Option<String>,
    #[serde(default)]
    recv_id: Option<String>,
    #[serde(default)]
    group_id: Option<String>,
    content: String,
    #[serde(default)]
    options: PushOptions,
}

#[derive(Debug, Serialize)]
struct SendMsgResponse {
    client_msg_id: String,
    send_time: i64,
}

impl SendMsgRequest {
    fn selector(&self) -> Result<RecipientSelector> {
        match (self.recv_id.as_deref(), self.group_id.as_deref()) {
            (Some(recv_id), None) if !recv_id.is_empty() => {
                Ok(RecipientSelector::Direct(recv_id.to_string()))
            }
            (None, Some(group_id)) if !group_id.is_empty() => {
                Ok(RecipientSelector::Group(group_id.to_string()))
            }
            _ => Err(ServerError::InvalidArgument(
                "exactly one of recv_id / group_id is required".to_string(),
            )),
        }
    }
}

/// POST /msg/send_msg
///
/// 以调用者身份构造 MessageEvent 并写入入站事件流，由 consumer 异步推送。
async fn send_msg(
    State(state): State<HttpServerState>,
    identity: OpIdentity,
    Json(request): Json<SendMsgRequest>,
) -> Result<Json<SendMsgResponse>> {
    let selector = request.selector()?;
    let event = MessageEvent {
        client_msg_id: request
            .client_msg_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        sender_id: identity.user_id.clone(),
        sender_platform_id: Some(identity.platform_id),
        selector,
        payload: Bytes::from(request.content.into_bytes()),
        options: request.options,
        send_time: Utc::now().timestamp_millis(),
    };
    event.validate()?;

    let encoded = serde_json::to_vec(&event)?;
    state.publisher.publish(Bytes::from(encoded)).await?;

    debug!(
        "[MSG] published: sender_id={}, selector={}, client_msg_id={}, operation_id={}",
        event.sender_id, event.selector, event.client_msg_id, identity.operation_id
    );

    Ok(Json(SendMsgResponse {
        client_msg_id: event.client_msg_id,
        send_time: event.send_time,
    }))
}
