//! Conversation endpoints: transcript, synchronous turns and streamed turns.
//!
//! Both send paths persist the owner's message before contacting the agent so the transcript
//! reflects what was asked even when the agent never answers.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderName, HeaderValue},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::{
    AppState,
    api::handlers::claws::load_owned,
    api::models::messages::{MessageCreate, MessageListQuery, MessageListResponse, MessageResponse, SendMessageResponse},
    auth::CurrentOwner,
    bridge::{ByteStream, sse::SseRelay},
    db::{
        handlers::{MessageFilter, MessageStore},
        models::{
            deployments::Deployment,
            messages::{MessageAuthor, MessageCreateDBRequest},
        },
    },
    errors::{Error, Result},
    types::{ClawId, MessageId, abbrev_uuid},
};

/// Frames buffered between the relay task and the HTTP response
const RELAY_BUFFER: usize = 32;

fn require_container(deployment: &Deployment) -> Result<&str> {
    if deployment.has_container() {
        Ok(&deployment.container_ref)
    } else {
        Err(Error::ContainerNotRunning {
            id: deployment.id.to_string(),
        })
    }
}

async fn record_user_message(state: &AppState, deployment: &Deployment, body: &str) -> Result<MessageId> {
    let message = state
        .messages
        .create(&MessageCreateDBRequest::new(deployment.id, MessageAuthor::User, body))
        .await?;
    Ok(message.id)
}

#[utoipa::path(
    get,
    path = "/claws/{id}/messages",
    tag = "messages",
    summary = "List conversation messages",
    params(("id" = uuid::Uuid, Path, description = "Claw ID"), MessageListQuery),
    responses(
        (status = 200, description = "Messages, newest first", body = MessageListResponse),
        (status = 400, description = "Limit out of range"),
        (status = 404, description = "No such claw for this owner"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(claw = %abbrev_uuid(&id)), err)]
pub async fn list_messages(
    State(state): State<AppState>,
    owner: CurrentOwner,
    Path(id): Path<ClawId>,
    Query(query): Query<MessageListQuery>,
) -> Result<Json<MessageListResponse>> {
    let deployment = load_owned(&state, &owner, id).await?;

    let mut filter = MessageFilter::new(query.limit()?);
    if let Some(since) = query.since {
        filter = filter.with_since(since);
    }

    let messages = state.messages.list(deployment.id, &filter).await?;
    Ok(Json(MessageListResponse {
        messages: messages.into_iter().map(MessageResponse::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/claws/{id}/messages",
    tag = "messages",
    summary = "Send a message and wait for the reply",
    params(("id" = uuid::Uuid, Path, description = "Claw ID")),
    request_body = MessageCreate,
    responses(
        (status = 200, description = "Agent reply", body = SendMessageResponse),
        (status = 400, description = "Empty or oversized body"),
        (status = 404, description = "No such claw for this owner"),
        (status = 422, description = "Claw has no container"),
        (status = 502, description = "Agent did not respond"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(claw = %abbrev_uuid(&id)), err)]
pub async fn send_message(
    State(state): State<AppState>,
    owner: CurrentOwner,
    Path(id): Path<ClawId>,
    Json(body): Json<MessageCreate>,
) -> Result<Json<SendMessageResponse>> {
    let deployment = load_owned(&state, &owner, id).await?;
    body.validate()?;

    let container = require_container(&deployment)?;
    let user_message_id = record_user_message(&state, &deployment, &body.body).await?;

    let reply = state.bridge.send(container, &owner.id, &body.body).await?;

    let message = match state
        .messages
        .create(&MessageCreateDBRequest::new(deployment.id, MessageAuthor::Agent, reply.text))
        .await
    {
        Ok(message) => Some(MessageResponse::from(message)),
        Err(e) => {
            warn!(error = %e, "Failed to store agent reply");
            None
        }
    };

    Ok(Json(SendMessageResponse {
        message,
        user_message_id,
        events: reply.events,
    }))
}

#[utoipa::path(
    post,
    path = "/claws/{id}/messages/stream",
    tag = "messages",
    summary = "Send a message and stream the agent's turn",
    description = "Relays the agent's Server-Sent Events as they arrive. Once the agent finishes, the reply is stored and a final `done` event carries `message_id` and `user_message_id`.",
    params(("id" = uuid::Uuid, Path, description = "Claw ID")),
    request_body = MessageCreate,
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 400, description = "Empty or oversized body"),
        (status = 404, description = "No such claw for this owner"),
        (status = 422, description = "Claw has no container"),
        (status = 502, description = "Agent stream could not be opened"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(claw = %abbrev_uuid(&id)), err)]
pub async fn stream_message(
    State(state): State<AppState>,
    owner: CurrentOwner,
    Path(id): Path<ClawId>,
    Json(body): Json<MessageCreate>,
) -> Result<Response> {
    let deployment = load_owned(&state, &owner, id).await?;
    body.validate()?;

    let container = require_container(&deployment)?;
    let user_message_id = record_user_message(&state, &deployment, &body.body).await?;

    // Failing here still lets us answer with a plain error instead of an empty stream
    let upstream = state.bridge.stream(container, &owner.id, &body.body).await?;

    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    tokio::spawn(relay_turn(upstream, tx, state.messages.clone(), deployment.id, user_message_id));

    let events = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok((
        [(HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no"))],
        Sse::new(events),
    )
        .into_response())
}

/// Forward every `data:` frame of an agent turn, then persist the final reply and emit `done`.
///
/// Returns early, dropping the upstream stream, as soon as the caller goes away, even while the
/// agent is silent.
#[instrument(skip_all, fields(claw = %abbrev_uuid(&deployment_id)))]
pub(crate) async fn relay_turn(
    mut upstream: ByteStream,
    tx: mpsc::Sender<Event>,
    messages: Arc<dyn MessageStore>,
    deployment_id: ClawId,
    user_message_id: MessageId,
) {
    let mut relay = SseRelay::new();
    let mut frames = 0usize;

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!(frames, "Client disconnected mid-turn");
                return;
            }
            next = upstream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Agent stream ended with an error");
                break;
            }
        };
        for data in relay.push(&chunk) {
            if tx.send(Event::default().data(data)).await.is_err() {
                debug!(frames, "Client disconnected mid-turn");
                return;
            }
            frames += 1;
        }
    }
    if let Some(data) = relay.finish() {
        if tx.send(Event::default().data(data)).await.is_err() {
            return;
        }
        frames += 1;
    }

    let Some(text) = relay.final_text().map(str::to_string).filter(|t| !t.is_empty()) else {
        debug!(frames, "Agent turn ended without a final reply");
        return;
    };

    let message = match messages
        .create(&MessageCreateDBRequest::new(deployment_id, MessageAuthor::Agent, text))
        .await
    {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Failed to store streamed agent reply");
            return;
        }
    };
    info!(frames, "Streamed agent turn complete");

    let done = json!({
        "type": "done",
        "message_id": message.id,
        "user_message_id": user_message_id,
    });
    let _ = tx.send(Event::default().data(done.to_string())).await;
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use super::*;
    use crate::api::models::messages::{MessageListResponse, SendMessageResponse};
    use crate::bridge::BridgeReply;
    use crate::test_utils::{InMemoryMessages, TEST_OWNER, TestApp};

    const OWNER_HEADER: &str = "x-claw-owner";

    fn data_lines(body: &str) -> Vec<Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_list_messages_since_and_limit() {
        let app = TestApp::new();
        let claw = app.running_claw(TEST_OWNER, "claw-a");
        for body in ["one", "two", "three"] {
            app.state
                .messages
                .create(&MessageCreateDBRequest::new(claw.id, MessageAuthor::User, body))
                .await
                .unwrap();
        }
        let path = format!("/api/v1/claws/{}/messages", claw.id);

        let all: MessageListResponse = app.server.get(&path).add_header(OWNER_HEADER, TEST_OWNER).await.json();
        let bodies: Vec<&str> = all.messages.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["three", "two", "one"]);

        let limited: MessageListResponse = app
            .server
            .get(&path)
            .add_query_param("limit", 1)
            .add_header(OWNER_HEADER, TEST_OWNER)
            .await
            .json();
        assert_eq!(limited.messages.len(), 1);

        let since = (all.messages[1].created_at).to_rfc3339();
        let newer: MessageListResponse = app
            .server
            .get(&path)
            .add_query_param("since", since)
            .add_header(OWNER_HEADER, TEST_OWNER)
            .await
            .json();
        assert_eq!(newer.messages.len(), 1);
        assert_eq!(newer.messages[0].body, "three");

        app.server
            .get(&path)
            .add_query_param("limit", 500)
            .add_header(OWNER_HEADER, TEST_OWNER)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_message_round_trip() {
        let app = TestApp::new();
        let claw = app.running_claw(TEST_OWNER, "claw-a");
        app.bridge.push_bridge_reply(BridgeReply {
            text: "Hello back".to_string(),
            events: vec![json!({"type": "tool", "name": "search"})],
            error: None,
        });

        let response: SendMessageResponse = app
            .server
            .post(&format!("/api/v1/claws/{}/messages", claw.id))
            .add_header(OWNER_HEADER, TEST_OWNER)
            .json(&json!({"body": "Hello"}))
            .await
            .json();

        assert_eq!(response.message.as_ref().unwrap().body, "Hello back");
        assert_eq!(response.events.len(), 1);

        let sent = app.bridge.sent();
        assert_eq!(sent[0].container, "claw-a");
        assert_eq!(sent[0].user_id, TEST_OWNER);
        assert_eq!(sent[0].text, "Hello");

        let transcript = app.messages.for_deployment(claw.id);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].id, response.user_message_id);
        assert_eq!(transcript[0].author, MessageAuthor::User);
        assert_eq!(transcript[1].author, MessageAuthor::Agent);
    }

    #[tokio::test]
    async fn test_send_message_agent_failure_keeps_user_message() {
        let app = TestApp::new();
        let claw = app.running_claw(TEST_OWNER, "claw-a");
        app.bridge.push_error("model overloaded");

        app.server
            .post(&format!("/api/v1/claws/{}/messages", claw.id))
            .add_header(OWNER_HEADER, TEST_OWNER)
            .json(&json!({"body": "Hello"}))
            .await
            .assert_status(StatusCode::BAD_GATEWAY);

        let transcript = app.messages.for_deployment(claw.id);
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].author, MessageAuthor::User);
    }

    #[tokio::test]
    async fn test_send_message_validation() {
        let app = TestApp::new();
        let claw = app.running_claw(TEST_OWNER, "claw-a");

        app.server
            .post(&format!("/api/v1/claws/{}/messages", claw.id))
            .add_header(OWNER_HEADER, TEST_OWNER)
            .json(&json!({"body": "x".repeat(5001)}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        assert!(app.messages.for_deployment(claw.id).is_empty());
        assert!(app.bridge.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_message_without_container() {
        let app = TestApp::new();
        let claw = app.running_claw(TEST_OWNER, "claw-a");
        let mut stored = app.deployments.snapshot(claw.id).unwrap();
        stored.container_ref.clear();
        app.deployments.insert(stored);

        for path in ["messages", "messages/stream"] {
            app.server
                .post(&format!("/api/v1/claws/{}/{path}", claw.id))
                .add_header(OWNER_HEADER, TEST_OWNER)
                .json(&json!({"body": "Hello"}))
                .await
                .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        }
        assert!(app.bridge.sent().is_empty());
        assert!(app.messages.for_deployment(claw.id).is_empty());
    }

    #[tokio::test]
    async fn test_stream_relays_frames_then_done() {
        let app = TestApp::new();
        let claw = app.running_claw(TEST_OWNER, "claw-a");
        app.bridge.set_stream(&[
            "data: {\"type\":\"tool\",\"name\":\"sea",
            "rch\"}\n\ndata: {\"type\":\"end\",\"text\":\"All done\"}\n\n",
        ]);

        let response = app
            .server
            .post(&format!("/api/v1/claws/{}/messages/stream", claw.id))
            .add_header(OWNER_HEADER, TEST_OWNER)
            .json(&json!({"body": "Do the thing"}))
            .await;

        response.assert_status_ok();
        assert_eq!(response.header("x-accel-buffering"), "no");
        assert!(
            response
                .header("content-type")
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let frames = data_lines(&response.text());
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0]["name"], "search");
        assert_eq!(frames[1]["type"], "end");
        assert_eq!(frames[2]["type"], "done");

        let transcript = app.messages.for_deployment(claw.id);
        assert_eq!(transcript.len(), 2);
        assert_eq!(frames[2]["user_message_id"], transcript[0].id.to_string());
        assert_eq!(frames[2]["message_id"], transcript[1].id.to_string());
        assert_eq!(transcript[1].body, "All done");
    }

    #[tokio::test]
    async fn test_stream_open_failure_is_bad_gateway() {
        let app = TestApp::new();
        let claw = app.running_claw(TEST_OWNER, "claw-a");

        app.server
            .post(&format!("/api/v1/claws/{}/messages/stream", claw.id))
            .add_header(OWNER_HEADER, TEST_OWNER)
            .json(&json!({"body": "Hello"}))
            .await
            .assert_status(StatusCode::BAD_GATEWAY);
        assert_eq!(app.messages.for_deployment(claw.id).len(), 1);
    }

    #[tokio::test]
    async fn test_relay_without_end_event_persists_nothing() {
        let messages = Arc::new(InMemoryMessages::default());
        let upstream: ByteStream =
            futures::stream::iter(vec![Ok(bytes::Bytes::from_static(b"data: {\"type\":\"tool\"}\n\n"))]).boxed();
        let (tx, mut rx) = mpsc::channel(8);
        let claw = uuid::Uuid::new_v4();

        relay_turn(upstream, tx, messages.clone(), claw, uuid::Uuid::new_v4()).await;

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
        assert!(messages.for_deployment(claw).is_empty());
    }

    #[tokio::test]
    async fn test_relay_stops_when_client_leaves() {
        let messages = Arc::new(InMemoryMessages::default());
        let upstream: ByteStream = futures::stream::iter(vec![Ok(bytes::Bytes::from_static(
            b"data: {\"type\":\"end\",\"text\":\"late\"}\n\n",
        ))])
        .boxed();
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let claw = uuid::Uuid::new_v4();

        relay_turn(upstream, tx, messages.clone(), claw, uuid::Uuid::new_v4()).await;

        assert!(messages.for_deployment(claw).is_empty());
    }

    #[tokio::test]
    async fn test_relay_stops_when_client_leaves_during_silence() {
        let messages = Arc::new(InMemoryMessages::default());
        let upstream: ByteStream = futures::stream::iter(vec![Ok(bytes::Bytes::from_static(
            b"data: {\"type\":\"tool\"}\n\n",
        ))])
        .chain(futures::stream::pending())
        .boxed();
        let (tx, mut rx) = mpsc::channel(8);
        let claw = uuid::Uuid::new_v4();

        let relay = tokio::spawn(relay_turn(upstream, tx, messages.clone(), claw, uuid::Uuid::new_v4()));
        assert!(rx.recv().await.is_some());
        drop(rx);

        tokio::time::timeout(std::time::Duration::from_secs(5), relay)
            .await
            .expect("relay should return once the client is gone")
            .unwrap();
        assert!(messages.for_deployment(claw).is_empty());
    }
}
