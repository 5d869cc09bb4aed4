//! Change-feed client for the backend's Phoenix-style realtime socket.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use lovisec_types::api::Table;
use lovisec_types::events::{ChangeEvent, ChangeKind};

use crate::backend::{Collection, Subscription};
use crate::error::{ClientError, Result};

/// The server drops sockets that stay silent for 30 seconds.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const JOIN_REF: &str = "1";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;
type SocketStream = SplitStream<Socket>;

#[derive(Debug, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    msg_ref: Option<String>,
}

impl PhoenixMessage {
    fn to_frame(&self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// Row change as carried in a `postgres_changes` payload.
#[derive(Debug, Deserialize)]
struct PostgresChange {
    #[serde(rename = "type")]
    kind: String,
    table: Table,
    #[serde(default)]
    record: Value,
}

#[derive(Debug)]
enum Frame {
    Change(ChangeEvent),
    Closed(String),
    Ignored,
}

pub struct RealtimeClient {
    socket_url: String,
    anon_key: String,
}

impl RealtimeClient {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            socket_url: socket_url(base_url),
            anon_key: anon_key.to_string(),
        }
    }

    /// Open a socket, join the collection's channel and wait for the server to
    /// accept it. Changes are then forwarded until the subscription is dropped
    /// or the socket closes.
    pub async fn subscribe(
        &self,
        collection: &Collection,
        access_token: Option<String>,
    ) -> Result<Subscription> {
        let url = format!("{}?apikey={}&vsn=1.0.0", self.socket_url, self.anon_key);
        let (socket, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| ClientError::Realtime(format!("connect failed: {e}")))?;
        let (mut sender, mut receiver) = socket.split();

        let topic = format!("realtime:{}", collection.channel_name());
        let token = access_token.unwrap_or_else(|| self.anon_key.clone());
        let join = join_message(&topic, collection, &token);
        sender
            .send(join.to_frame()?)
            .await
            .map_err(|e| ClientError::Realtime(e.to_string()))?;

        tokio::time::timeout(JOIN_TIMEOUT, await_join(&mut receiver, &topic))
            .await
            .map_err(|_| ClientError::Realtime(format!("join of {topic} timed out")))??;
        info!("Subscribed to {}", topic);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(sender, receiver, tx, topic));
        Ok(Subscription::new(rx, Some(task)))
    }
}

/// `https://host` -> `wss://host/realtime/v1/websocket`.
fn socket_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/realtime/v1/websocket")
}

fn join_message(topic: &str, collection: &Collection, token: &str) -> PhoenixMessage {
    let mut change = json!({
        "event": "*",
        "schema": "public",
        "table": collection.table.as_str(),
    });
    if let Some(secret_id) = &collection.secret_id {
        change["filter"] = json!(format!("secret_id=eq.{secret_id}"));
    }

    PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change],
            },
            "access_token": token,
        }),
        msg_ref: Some(JOIN_REF.to_string()),
    }
}

async fn await_join(receiver: &mut SocketStream, topic: &str) -> Result<()> {
    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(ClientError::Realtime(e.to_string())),
        };

        let Ok(msg) = serde_json::from_str::<PhoenixMessage>(&text) else {
            continue;
        };
        if msg.topic != topic
            || msg.event != "phx_reply"
            || msg.msg_ref.as_deref() != Some(JOIN_REF)
        {
            continue;
        }

        return match reply_status(&msg.payload) {
            Ok(()) => Ok(()),
            Err(reason) => Err(ClientError::Realtime(format!("join rejected: {reason}"))),
        };
    }

    Err(ClientError::Realtime("socket closed before join".into()))
}

fn reply_status(payload: &Value) -> std::result::Result<(), String> {
    match payload.get("status").and_then(Value::as_str) {
        Some("ok") => Ok(()),
        _ => Err(payload
            .get("response")
            .map(Value::to_string)
            .unwrap_or_else(|| "no reason given".to_string())),
    }
}

/// Interpret one text frame received on `topic`.
fn parse_frame(text: &str, topic: &str) -> Frame {
    let msg: PhoenixMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Ignoring malformed realtime frame: {}", e);
            return Frame::Ignored;
        }
    };
    if msg.topic != topic {
        return Frame::Ignored;
    }

    match msg.event.as_str() {
        "postgres_changes" => {
            let Some(data) = msg.payload.get("data") else {
                return Frame::Ignored;
            };
            match PostgresChange::deserialize(data) {
                Ok(change) => match change.kind.as_str() {
                    "INSERT" => Frame::Change(ChangeEvent {
                        kind: ChangeKind::Insert,
                        table: change.table,
                        record: change.record,
                    }),
                    "UPDATE" => Frame::Change(ChangeEvent {
                        kind: ChangeKind::Update,
                        table: change.table,
                        record: change.record,
                    }),
                    other => {
                        trace!("Ignoring {} change", other);
                        Frame::Ignored
                    }
                },
                Err(e) => {
                    debug!("Ignoring undecodable change: {}", e);
                    Frame::Ignored
                }
            }
        }
        "phx_error" => Frame::Closed("channel crashed".into()),
        "phx_close" => Frame::Closed("channel closed by server".into()),
        "system" => match msg.payload.get("status").and_then(Value::as_str) {
            Some("error") => Frame::Closed(msg.payload.to_string()),
            _ => Frame::Ignored,
        },
        _ => Frame::Ignored,
    }
}

async fn run_channel(
    mut sender: SocketSink,
    mut receiver: SocketStream,
    tx: mpsc::UnboundedSender<ChangeEvent>,
    topic: String,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Realtime socket for {} closed", topic);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Realtime socket for {} failed: {}", topic, e);
                        break;
                    }
                };

                match parse_frame(&text, &topic) {
                    Frame::Change(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Frame::Closed(reason) => {
                        warn!("Realtime channel {} ended: {}", topic, reason);
                        break;
                    }
                    Frame::Ignored => {}
                }
            }
            _ = heartbeat.tick() => {
                let beat = PhoenixMessage {
                    topic: "phoenix".to_string(),
                    event: "heartbeat".to_string(),
                    payload: json!({}),
                    msg_ref: Some(next_ref.to_string()),
                };
                next_ref += 1;

                let Ok(frame) = beat.to_frame() else { break };
                if sender.send(frame).await.is_err() {
                    warn!("Heartbeat on {} failed, dropping socket", topic);
                    break;
                }
            }
            _ = tx.closed() => {
                debug!("Subscriber for {} went away", topic);
                break;
            }
        }
    }

    let _ = sender.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "realtime:comments-s1";

    #[test]
    fn socket_url_switches_scheme() {
        assert_eq!(
            socket_url("https://abc.supabase.co/"),
            "wss://abc.supabase.co/realtime/v1/websocket"
        );
        assert_eq!(
            socket_url("http://localhost:54321"),
            "ws://localhost:54321/realtime/v1/websocket"
        );
    }

    #[test]
    fn join_filters_comment_threads() {
        let join = join_message(TOPIC, &Collection::comments_of("s1"), "tok");
        let change = &join.payload["config"]["postgres_changes"][0];

        assert_eq!(join.event, "phx_join");
        assert_eq!(change["table"], "comments");
        assert_eq!(change["filter"], "secret_id=eq.s1");
        assert_eq!(join.payload["access_token"], "tok");
    }

    #[test]
    fn join_for_secrets_has_no_filter() {
        let join = join_message("realtime:secrets-realtime", &Collection::secrets(), "tok");
        assert!(join.payload["config"]["postgres_changes"][0].get("filter").is_none());
    }

    #[test]
    fn insert_frame_becomes_change() {
        let text = json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "payload": { "ids": [1], "data": {
                "type": "INSERT",
                "table": "comments",
                "schema": "public",
                "record": { "id": "c1", "secret_id": "s1" }
            }},
            "ref": null
        })
        .to_string();

        match parse_frame(&text, TOPIC) {
            Frame::Change(event) => {
                assert_eq!(event.kind, ChangeKind::Insert);
                assert_eq!(event.table, Table::Comments);
                assert_eq!(event.column("id"), Some("c1"));
            }
            other => panic!("expected change, got {other:?}"),
        }
    }

    #[test]
    fn deletes_and_foreign_topics_are_ignored() {
        let delete = json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "payload": { "data": { "type": "DELETE", "table": "comments", "old_record": { "id": "c1" } } }
        })
        .to_string();
        assert!(matches!(parse_frame(&delete, TOPIC), Frame::Ignored));

        let other = json!({ "topic": "realtime:other", "event": "phx_close", "payload": {} }).to_string();
        assert!(matches!(parse_frame(&other, TOPIC), Frame::Ignored));
        assert!(matches!(parse_frame("not json", TOPIC), Frame::Ignored));
    }

    #[test]
    fn server_errors_close_the_channel() {
        let crash = json!({ "topic": TOPIC, "event": "phx_error", "payload": {} }).to_string();
        assert!(matches!(parse_frame(&crash, TOPIC), Frame::Closed(_)));
    }

    #[test]
    fn reply_status_reads_errors() {
        assert!(reply_status(&json!({ "status": "ok", "response": {} })).is_ok());
        let err = reply_status(&json!({ "status": "error", "response": { "reason": "denied" } }));
        assert!(err.unwrap_err().contains("denied"));
    }
}
