// WebSocket surface for the broadcast hub: subscription grammar in,
// event stream out
use crate::hub::{Channel, Subscriber, SubscriptionFilter};
use crate::http::AppState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Close code sent when the hub is at subscriber capacity.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        channel: String,
        #[serde(default)]
        filters: SubscriptionFilter,
    },
    Unsubscribe {
        channel: String,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Connected {
        connection_id: String,
    },
    Subscribed {
        channel: String,
        filters: SubscriptionFilter,
    },
    Unsubscribed {
        channel: String,
    },
    Opportunity {
        timestamp: DateTime<Utc>,
        data: serde_json::Value,
    },
    Transaction {
        timestamp: DateTime<Utc>,
        data: serde_json::Value,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let subscriber = match state.hub.register() {
        Ok(subscriber) => subscriber,
        Err(e) => {
            warn!(err = %e, "rejecting websocket connection");
            let (mut sender, _) = socket.split();
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "subscriber capacity exceeded".into(),
                })))
                .await;
            return;
        }
    };

    let connection_id = subscriber.id;
    info!(%connection_id, "websocket client connected");

    subscriber.push(ServerMessage::Connected {
        connection_id: connection_id.to_string(),
    });

    let (mut sender, mut receiver) = socket.split();

    // single writer per connection: mailbox order is delivery order
    let send_task = tokio::spawn({
        let subscriber = subscriber.clone();
        async move {
            while let Some(message) = subscriber.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(err = %e, "dropping unserializable message");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => handle_client_message(&text, &subscriber),
            Message::Close(_) => {
                debug!(%connection_id, "client sent close");
                break;
            }
            // protocol-level pings are answered by axum; the JSON-level
            // ping/pong pair is handled above
            _ => {}
        }
    }

    state.hub.unregister(connection_id);
    send_task.abort();
    info!(%connection_id, "websocket client disconnected");
}

fn handle_client_message(text: &str, subscriber: &Arc<Subscriber>) {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            subscriber.push(ServerMessage::Error {
                message: format!("invalid message: {}", e),
            });
            return;
        }
    };

    match parsed {
        ClientMessage::Subscribe { channel, filters } => match Channel::from_str(&channel) {
            Ok(parsed_channel) => {
                subscriber.subscribe(parsed_channel, filters.clone());
                subscriber.push(ServerMessage::Subscribed { channel, filters });
            }
            Err(message) => {
                subscriber.push(ServerMessage::Error { message });
            }
        },
        ClientMessage::Unsubscribe { channel } => match Channel::from_str(&channel) {
            Ok(parsed_channel) => {
                subscriber.unsubscribe(parsed_channel);
                subscriber.push(ServerMessage::Unsubscribed { channel });
            }
            Err(message) => {
                subscriber.push(ServerMessage::Error { message });
            }
        },
        ClientMessage::Ping => {
            subscriber.push(ServerMessage::Pong {
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::BroadcastHub;
    use chainpulse_common::MetricsCollector;
    use std::time::Duration;

    fn test_hub() -> BroadcastHub {
        BroadcastHub::new(
            4,
            16,
            Duration::from_secs(30),
            Arc::new(MetricsCollector::new()),
        )
    }

    #[tokio::test]
    async fn subscribe_round_trips_through_the_grammar() {
        let hub = test_hub();
        let subscriber = hub.register().unwrap();

        handle_client_message(
            r#"{"type":"subscribe","channel":"opportunities","filters":{"chain_id":56,"min_profit":100}}"#,
            &subscriber,
        );

        match subscriber.recv().await.unwrap() {
            ServerMessage::Subscribed { channel, filters } => {
                assert_eq!(channel, "opportunities");
                assert_eq!(filters.chain_id, Some(56));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_channel_yields_a_single_error() {
        let hub = test_hub();
        let subscriber = hub.register().unwrap();

        handle_client_message(
            r#"{"type":"subscribe","channel":"liquidations"}"#,
            &subscriber,
        );

        match subscriber.recv().await.unwrap() {
            ServerMessage::Error { message } => {
                assert!(message.contains("liquidations"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        // exactly one reply
        assert!(subscriber.is_empty());
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let hub = test_hub();
        let subscriber = hub.register().unwrap();

        handle_client_message(r#"{"type":"ping"}"#, &subscriber);

        assert!(matches!(
            subscriber.recv().await.unwrap(),
            ServerMessage::Pong { .. }
        ));
    }

    #[tokio::test]
    async fn malformed_json_is_reported_not_fatal() {
        let hub = test_hub();
        let subscriber = hub.register().unwrap();

        handle_client_message("{not json", &subscriber);

        assert!(matches!(
            subscriber.recv().await.unwrap(),
            ServerMessage::Error { .. }
        ));
    }

    #[test]
    fn server_messages_serialize_with_type_tags() {
        let message = ServerMessage::Heartbeat {
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "heartbeat");

        let message = ServerMessage::Connected {
            connection_id: "abc".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["connection_id"], "abc");
    }
}
