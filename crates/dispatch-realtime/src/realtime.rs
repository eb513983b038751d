//! Websocket change feed
//!
//! Speaks the backend's channel protocol: every frame is a JSON envelope
//! `{topic, event, payload, ref}`. The client joins one topic per
//! subscription, keeps the socket alive with heartbeats and reconnects
//! with exponential backoff until the subscription is cancelled.

use dispatch_backend::BackendConfig;
use dispatch_core::{CallFilter, CallRecord, ChangeEvent, ChangeKind};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{FeedError, FeedResult};
use crate::{ChangeFeed, Subscription};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const JOIN_REF: &str = "1";

// ============================================================================
// PROTOCOL
// ============================================================================

/// Channel protocol envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl ChannelMessage {
    fn to_text(&self) -> FeedResult<Message> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// Row change payload as delivered by the backend
#[derive(Debug, Deserialize)]
struct ChangePayload {
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// What a decoded frame means to the feed
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Change(ChangeEvent),
    Reply {
        reference: Option<String>,
        ok: bool,
        response: Value,
    },
    Closed,
    Ignored,
}

/// Topic for the calls table narrowed by the filter's first column
pub fn topic_for(table: &str, filter: &CallFilter) -> String {
    match filter.query_pairs().into_iter().next() {
        Some((column, value)) => format!("realtime:public:{}:{}={}", table, column, value),
        None => format!("realtime:public:{}", table),
    }
}

pub fn join_message(topic: &str, access_token: &str) -> ChannelMessage {
    ChannelMessage {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload: json!({ "user_token": access_token }),
        reference: Some(JOIN_REF.to_string()),
    }
}

pub fn leave_message(topic: &str, reference: u64) -> ChannelMessage {
    ChannelMessage {
        topic: topic.to_string(),
        event: "phx_leave".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat_message(reference: u64) -> ChannelMessage {
    ChannelMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Decode one text frame
pub fn decode_frame(text: &str) -> FeedResult<Frame> {
    let message: ChannelMessage = serde_json::from_str(text)?;

    match message.event.as_str() {
        "phx_reply" => {
            let ok = message.payload.get("status").and_then(Value::as_str) == Some("ok");
            let response = message.payload.get("response").cloned().unwrap_or(Value::Null);
            Ok(Frame::Reply {
                reference: message.reference,
                ok,
                response,
            })
        }
        "phx_close" | "phx_error" => Ok(Frame::Closed),
        "INSERT" | "UPDATE" | "DELETE" => decode_change(message.payload),
        "postgres_changes" => {
            let data = message.payload.get("data").cloned().unwrap_or(Value::Null);
            decode_change(data)
        }
        _ => Ok(Frame::Ignored),
    }
}

fn decode_change(payload: Value) -> FeedResult<Frame> {
    let change: ChangePayload = serde_json::from_value(payload)?;

    // Rows missing columns (e.g. a delete carrying only the key) read as absent
    let parse = |row: Option<Value>| row.and_then(|v| serde_json::from_value::<CallRecord>(v).ok());
    let new = parse(change.record);
    let old = parse(change.old_record);

    if new.is_none() && old.is_none() {
        return Ok(Frame::Ignored);
    }

    Ok(Frame::Change(ChangeEvent {
        event_type: change.kind,
        new,
        old,
    }))
}

// ============================================================================
// FEED
// ============================================================================

/// Change feed over the backend's realtime websocket
#[derive(Debug, Clone)]
pub struct RealtimeFeed {
    endpoint: String,
    table: String,
    access_token: String,
}

impl RealtimeFeed {
    pub fn new(config: &BackendConfig, access_token: impl Into<String>) -> Self {
        Self {
            endpoint: config.realtime_endpoint(),
            table: config.calls_table.clone(),
            access_token: access_token.into(),
        }
    }
}

impl ChangeFeed for RealtimeFeed {
    fn subscribe(&self, filter: CallFilter) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4();

        let topic = topic_for(&self.table, &filter);
        info!(subscription = %id, topic = %topic, "Opening realtime subscription");

        tokio::spawn(run_connection(
            self.endpoint.clone(),
            topic,
            self.access_token.clone(),
            sender,
            cancel.clone(),
        ));

        Subscription::new(id, receiver, cancel)
    }
}

/// Reconnect loop; ends on cancel, a dropped subscriber or a rejected join
async fn run_connection(
    endpoint: String,
    topic: String,
    access_token: String,
    sender: mpsc::UnboundedSender<ChangeEvent>,
    cancel: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let mut joined = false;
        let session = run_session(&endpoint, &topic, &access_token, &sender, &cancel, &mut joined);
        match session.await {
            Ok(()) => break,
            Err(FeedError::JoinRejected(reason)) => {
                error!(topic = %topic, reason = %reason, "Realtime join rejected");
                break;
            }
            Err(e) => warn!(topic = %topic, error = %e, "Realtime connection lost"),
        }

        if sender.is_closed() {
            break;
        }

        let delay = reconnect_delay(backoff, joined);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        backoff = (delay * 2).min(MAX_BACKOFF);
    }

    debug!(topic = %topic, "Realtime subscription finished");
}

/// Wait before reconnecting; a session that got joined starts over from the shortest wait
fn reconnect_delay(backoff: Duration, joined: bool) -> Duration {
    if joined { INITIAL_BACKOFF } else { backoff }
}

/// One connection. `Ok` means stop for good.
async fn run_session(
    endpoint: &str,
    topic: &str,
    access_token: &str,
    sender: &mpsc::UnboundedSender<ChangeEvent>,
    cancel: &CancellationToken,
    joined: &mut bool,
) -> FeedResult<()> {
    let (socket, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = tokio_tungstenite::connect_async(endpoint) => connected?,
    };
    let (mut sink, mut stream) = socket.split();

    sink.send(join_message(topic, access_token).to_text()?).await?;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.send(leave_message(topic, next_ref).to_text()?).await;
                let _ = sink.close().await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                sink.send(heartbeat_message(next_ref).to_text()?).await?;
                next_ref += 1;
            }
            frame = stream.next() => {
                let text = match frame {
                    None | Some(Ok(Message::Close(_))) => return Err(FeedError::ConnectionClosed),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };

                match decode_frame(text.as_str()) {
                    Ok(Frame::Change(event)) => {
                        if sender.send(event).is_err() {
                            debug!(topic = %topic, "Subscriber gone");
                            return Ok(());
                        }
                    }
                    Ok(Frame::Reply { reference, ok, response }) => {
                        if reference.as_deref() == Some(JOIN_REF) {
                            if !ok {
                                return Err(FeedError::JoinRejected(response.to_string()));
                            }
                            *joined = true;
                            info!(topic = %topic, "Joined realtime channel");
                        }
                    }
                    Ok(Frame::Closed) => return Err(FeedError::ConnectionClosed),
                    Ok(Frame::Ignored) => {}
                    Err(e) => warn!(error = %e, "Undecodable realtime frame"),
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::{CallId, CallStatus};

    const ROW: &str = r#"{
        "id": "7f1c1d0e-8f5b-4a53-9a65-1f0d2b1c9a10",
        "status": "en_route",
        "call_location": "-25.43,-49.275",
        "responder_initial_position": "-25.4284,-49.2733",
        "opened_at": "2024-05-01T12:00:00Z"
    }"#;

    #[test]
    fn test_topic_narrowed_by_call_id() {
        let id: CallId = "7f1c1d0e-8f5b-4a53-9a65-1f0d2b1c9a10".parse().unwrap();
        assert_eq!(
            topic_for("calls", &CallFilter::call(id)),
            "realtime:public:calls:id=eq.7f1c1d0e-8f5b-4a53-9a65-1f0d2b1c9a10"
        );
        assert_eq!(topic_for("calls", &CallFilter::all()), "realtime:public:calls");
    }

    #[test]
    fn test_reconnect_delay_resets_after_join() {
        assert_eq!(reconnect_delay(MAX_BACKOFF, true), INITIAL_BACKOFF);
        assert_eq!(reconnect_delay(Duration::from_secs(8), false), Duration::from_secs(8));
        assert_eq!(reconnect_delay(INITIAL_BACKOFF, false), INITIAL_BACKOFF);
    }

    #[test]
    fn test_join_and_heartbeat_envelopes() {
        let join = serde_json::to_value(join_message("realtime:public:calls", "jwt")).unwrap();
        assert_eq!(join["event"], "phx_join");
        assert_eq!(join["payload"]["user_token"], "jwt");
        assert_eq!(join["ref"], JOIN_REF);

        let beat = serde_json::to_value(heartbeat_message(7)).unwrap();
        assert_eq!(beat["topic"], "phoenix");
        assert_eq!(beat["ref"], "7");
    }

    #[test]
    fn test_decode_update_frame() {
        let text = format!(
            r#"{{"topic":"realtime:public:calls","event":"UPDATE","payload":{{"type":"UPDATE","record":{},"old_record":{{"id":"7f1c1d0e-8f5b-4a53-9a65-1f0d2b1c9a10"}}}},"ref":null}}"#,
            ROW
        );

        match decode_frame(&text).unwrap() {
            Frame::Change(event) => {
                assert_eq!(event.event_type, ChangeKind::Update);
                assert_eq!(event.new.as_ref().map(|r| r.status), Some(CallStatus::EnRoute));
                assert!(event.old.is_none());
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_decode_postgres_changes_frame() {
        let text = format!(
            r#"{{"topic":"realtime:calls","event":"postgres_changes","payload":{{"data":{{"type":"INSERT","record":{}}}}},"ref":null}}"#,
            ROW
        );
        assert!(matches!(
            decode_frame(&text).unwrap(),
            Frame::Change(e) if e.event_type == ChangeKind::Insert
        ));
    }

    #[test]
    fn test_decode_join_reply() {
        let text = r#"{"topic":"realtime:public:calls","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"1"}"#;
        match decode_frame(text).unwrap() {
            Frame::Reply { reference, ok, response } => {
                assert_eq!(reference.as_deref(), Some("1"));
                assert!(!ok);
                assert_eq!(response["reason"], "unauthorized");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_decode_other_frames() {
        let presence = r#"{"topic":"realtime:public:calls","event":"presence_state","payload":{},"ref":null}"#;
        assert_eq!(decode_frame(presence).unwrap(), Frame::Ignored);

        let close = r#"{"topic":"realtime:public:calls","event":"phx_close","payload":{},"ref":"1"}"#;
        assert_eq!(decode_frame(close).unwrap(), Frame::Closed);

        assert!(decode_frame("not json").is_err());
    }

    #[test]
    fn test_feed_uses_backend_endpoint() {
        let config = BackendConfig::new("https://demo.example.co", "anon");
        let feed = RealtimeFeed::new(&config, "jwt");
        assert!(feed.endpoint.starts_with("wss://demo.example.co/realtime/v1/websocket"));
        assert_eq!(feed.table, "calls");
    }
}
