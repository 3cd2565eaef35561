//! Client behaviour against a scripted server.

mod common;

use async_trait::async_trait;
use bayeux_client::{
    Advice, ClientError, ClientEvent, ConnectionState, ConnectionType, Extension, Message,
    PublishOptions, Reconnect,
};
use bayeux_protocol::ChannelList;
use common::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WS_AND_LP: &[ConnectionType] = &[ConnectionType::WebSocket, ConnectionType::LongPolling];
const LP: &[ConnectionType] = &[ConnectionType::LongPolling];

fn recorder() -> (
    Arc<Mutex<Vec<Value>>>,
    impl Fn(&str, &Value) + Send + Sync + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |_: &str, data: &Value| {
        sink.lock().unwrap().push(data.clone());
    })
}

fn connects_for(server: &MockServer, client_id: &str) -> usize {
    server
        .on_channel("/meta/connect")
        .iter()
        .filter(|(_, m)| m.client_id.as_deref() == Some(client_id))
        .count()
}

#[tokio::test]
async fn test_handshake_connects_with_client_id() {
    let server = MockServer::new();
    let client = client(&server, WS_AND_LP);

    within(client.handshake()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.client_id().as_deref(), Some("c1"));

    let handshakes = server.on_channel("/meta/handshake");
    assert_eq!(handshakes.len(), 1);
    let handshake = &handshakes[0].1;
    assert_eq!(handshake.version.as_deref(), Some("1.0"));
    let types = handshake.supported_connection_types.clone().unwrap();
    assert!(types.contains(&"long-polling".to_string()));
    assert!(types.contains(&"callback-polling".to_string()));

    wait_until(|| server.count("/meta/connect") >= 1).await;
    let (_, connect) = &server.on_channel("/meta/connect")[0];
    assert_eq!(connect.client_id.as_deref(), Some("c1"));
    assert!(connect.connection_type.is_some());

    // Negotiation settles on the best type the server offered.
    wait_until(|| client.connection_type() == Some(ConnectionType::WebSocket)).await;
}

#[tokio::test]
async fn test_subscribe_while_unconnected() {
    let server = MockServer::new();
    let client = client(&server, LP);
    let (seen, handler) = recorder();

    let subscription = client.subscribe("/foo", handler).unwrap();
    within(subscription.wait()).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].1.channel, "/meta/handshake");

    let subscribes = server.on_channel("/meta/subscribe");
    assert_eq!(subscribes.len(), 1);
    assert_eq!(subscribes[0].1.client_id.as_deref(), Some("c1"));
    assert_eq!(
        subscribes[0].1.subscription,
        Some(ChannelList::One("/foo".to_string()))
    );
    wait_until(|| server.count("/meta/connect") == 1).await;

    server.push(vec![data("/foo", payload()), data("/bar", payload())]);
    wait_until(|| seen.lock().unwrap().len() == 1).await;
    assert_eq!(seen.lock().unwrap()[0], payload());
}

#[tokio::test]
async fn test_wildcard_subscription_receives_children() {
    let server = MockServer::new();
    let client = client(&server, LP);
    let (seen, handler) = recorder();

    let subscription = client.subscribe("/chat/*", handler).unwrap();
    within(subscription.wait()).await.unwrap();

    server.push(vec![
        data("/chat/lobby", json!(1)),
        data("/chat/lobby/deep", json!(2)),
        data("/chat/news", json!(3)),
    ]);
    wait_until(|| seen.lock().unwrap().len() == 2).await;
    assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(3)]);
}

#[tokio::test]
async fn test_publish_acknowledged() {
    let server = MockServer::new();
    server.set_responder(|_, message| {
        if message.channel == "/denied" {
            Reply::Respond(vec![nack(message, "407:/denied:Publish failed")])
        } else {
            default_reply(message)
        }
    });
    let client = client(&server, LP);
    within(client.handshake()).await.unwrap();

    let publication = client.publish("/foo", payload()).unwrap();
    within(publication.wait()).await.unwrap();

    let (_, sent) = &server.on_channel("/foo")[0];
    assert_eq!(sent.data, Some(payload()));
    assert_eq!(sent.client_id.as_deref(), Some("c1"));
    assert!(sent.id.is_some());

    let denied = client.publish("/denied", payload()).unwrap();
    match within(denied.wait()).await {
        Err(ClientError::Protocol(error)) => {
            assert_eq!(error.code, Some(407));
            assert_eq!(error.params, vec!["/denied"]);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn test_websocket_drop_falls_back_to_long_polling() {
    let server = MockServer::new();
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();
    server.set_responder(move |connection_type, message| {
        // Long-polling connects return until the socket has dropped, so the
        // connect cycle moves onto the WebSocket once it is attached.
        if message.channel == "/meta/connect"
            && connection_type == ConnectionType::LongPolling
            && !flag.load(Ordering::SeqCst)
        {
            return Reply::Respond(vec![ack(message)]);
        }
        default_reply(message)
    });

    let client = client(&server, WS_AND_LP);
    let mut events = client.events();
    within(client.handshake()).await.unwrap();

    wait_until(|| {
        server
            .on_channel("/meta/connect")
            .iter()
            .any(|(ct, _)| *ct == ConnectionType::WebSocket)
    })
    .await;
    let (_, held) = server
        .on_channel("/meta/connect")
        .into_iter()
        .rev()
        .find(|(ct, _)| *ct == ConnectionType::WebSocket)
        .unwrap();

    dropped.store(true, Ordering::SeqCst);
    server.set_usable(ConnectionType::WebSocket, false);
    server.drop_connection(ConnectionType::WebSocket);

    wait_until(|| {
        server.on_channel("/meta/connect").iter().any(|(ct, m)| {
            *ct == ConnectionType::LongPolling && m.id == held.id
        })
    })
    .await;
    assert_eq!(client.connection_type(), Some(ConnectionType::LongPolling));

    let mut saw_down = false;
    while let Ok(event) = events.try_recv() {
        saw_down |= event == ClientEvent::TransportDown;
    }
    assert!(saw_down);
}

#[tokio::test]
async fn test_handshake_advice_restarts_session() {
    let server = MockServer::new();
    let handshakes = Arc::new(AtomicUsize::new(0));
    let counter = handshakes.clone();
    server.set_responder(move |_, message| match message.channel.as_str() {
        "/meta/handshake" => {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Reply::Respond(vec![handshake_reply(message, &format!("c{n}"))])
        }
        "/meta/connect" if message.client_id.as_deref() == Some("c1") => {
            Reply::Respond(vec![Message {
                advice: Some(Advice {
                    reconnect: Some(Reconnect::Handshake),
                    interval: Some(0),
                    timeout: None,
                }),
                ..nack(message, "401:c1:Unknown client")
            }])
        }
        _ => default_reply(message),
    });

    let client = client(&server, LP);
    let mut events = client.events();
    let (_, handler) = recorder();
    let subscription = client.subscribe("/foo", handler).unwrap();
    within(subscription.wait()).await.unwrap();

    wait_until(|| client.client_id().as_deref() == Some("c2")).await;
    assert_eq!(handshakes.load(Ordering::SeqCst), 2);

    // Subscriptions are restored under the new client ID.
    wait_until(|| {
        server
            .on_channel("/meta/subscribe")
            .iter()
            .any(|(_, m)| m.client_id.as_deref() == Some("c2"))
    })
    .await;

    let mut saw_reset = false;
    while let Ok(event) = events.try_recv() {
        saw_reset |= event == ClientEvent::StateChanged(ConnectionState::Unconnected);
    }
    assert!(saw_reset);
}

#[tokio::test]
async fn test_connect_reply_from_ended_session_is_ignored() {
    let server = MockServer::new();
    let handshakes = Arc::new(AtomicUsize::new(0));
    let counter = handshakes.clone();
    server.set_responder(move |_, message| match message.channel.as_str() {
        "/meta/handshake" => {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Reply::Respond(vec![handshake_reply(message, &format!("c{n}"))])
        }
        "/trigger" if message.client_id.as_deref() == Some("c1") => {
            Reply::Respond(vec![Message {
                advice: Some(Advice {
                    reconnect: Some(Reconnect::Handshake),
                    interval: Some(0),
                    timeout: None,
                }),
                ..nack(message, "401:c1:Unknown client")
            }])
        }
        _ => default_reply(message),
    });
    let client = client(&server, LP);
    within(client.handshake()).await.unwrap();
    wait_until(|| server.count("/meta/connect") == 1).await;
    let (_, held) = server.on_channel("/meta/connect").remove(0);

    // A publish reply restarts the session while the c1 connect is held.
    let publication = client.publish("/trigger", payload()).unwrap();
    assert!(matches!(
        within(publication.wait()).await,
        Err(ClientError::Protocol(_))
    ));
    wait_until(|| connects_for(&server, "c2") == 1).await;

    server.push(vec![ack(&held)]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connects_for(&server, "c2"), 1);
    assert_eq!(server.count("/meta/connect"), 2);
}

#[tokio::test]
async fn test_unsubscribe_last_subscription() {
    let server = MockServer::new();
    server.set_responder(|_, message| {
        if message.channel == "/meta/unsubscribe" {
            Reply::Hold
        } else {
            default_reply(message)
        }
    });
    let client = client(&server, LP);

    let (first_seen, first) = recorder();
    let (second_seen, second) = recorder();
    let a = client.subscribe("/foo", first).unwrap();
    let b = client.subscribe("/foo", second).unwrap();
    within(a.wait()).await.unwrap();
    within(b.wait()).await.unwrap();

    a.cancel();
    server.push(vec![data("/foo", json!(1))]);
    wait_until(|| second_seen.lock().unwrap().len() == 1).await;
    assert!(first_seen.lock().unwrap().is_empty());
    assert_eq!(server.count("/meta/unsubscribe"), 0);

    client.unsubscribe("/foo", &b);
    wait_until(|| server.count("/meta/unsubscribe") == 1).await;

    // Delivery stops before the server acknowledges.
    server.push(vec![data("/foo", json!(2))]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(second_seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_subscribe_sends_one_request() {
    let server = MockServer::new();
    let client = client(&server, LP);

    let (first_seen, first) = recorder();
    let (second_seen, second) = recorder();
    let a = client.subscribe("/foo", first).unwrap();
    let b = client.subscribe("/foo", second).unwrap();

    within(a.wait()).await.unwrap();
    within(b.wait()).await.unwrap();
    assert_eq!(server.count("/meta/subscribe"), 1);

    server.push(vec![data("/foo", payload())]);
    wait_until(|| {
        first_seen.lock().unwrap().len() == 1 && second_seen.lock().unwrap().len() == 1
    })
    .await;

    // Already subscribed: resolves without a round trip.
    let (_, third) = recorder();
    let c = client.subscribe("/foo", third).unwrap();
    within(c.wait()).await.unwrap();
    assert_eq!(server.count("/meta/subscribe"), 1);

    // Forcing sends a fresh request.
    let (_, fourth) = recorder();
    let d = client.subscribe_with("/foo", true, fourth).unwrap();
    within(d.wait()).await.unwrap();
    assert_eq!(server.count("/meta/subscribe"), 2);
}

#[tokio::test]
async fn test_forced_subscribe_sends_while_request_in_flight() {
    let server = MockServer::new();
    server.set_responder(|_, message| {
        if message.channel == "/meta/subscribe" {
            Reply::Hold
        } else {
            default_reply(message)
        }
    });
    let client = client(&server, LP);

    let (_, first) = recorder();
    let _a = client.subscribe("/foo", first).unwrap();
    wait_until(|| server.count("/meta/subscribe") == 1).await;

    let (_, second) = recorder();
    let _b = client.subscribe_with("/foo", true, second).unwrap();
    wait_until(|| server.count("/meta/subscribe") == 2).await;

    // Without force the caller joins the requests already sent.
    let (_, third) = recorder();
    let _c = client.subscribe("/foo", third).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.count("/meta/subscribe"), 2);
}

#[tokio::test]
async fn test_subscribe_failure_reported() {
    let server = MockServer::new();
    server.set_responder(|_, message| {
        if message.channel == "/meta/subscribe" {
            Reply::Respond(vec![nack(message, "403:/secret:Forbidden channel")])
        } else {
            default_reply(message)
        }
    });
    let client = client(&server, LP);
    let (seen, handler) = recorder();

    let subscription = client.subscribe("/secret", handler).unwrap();
    assert!(matches!(
        within(subscription.wait()).await,
        Err(ClientError::Protocol(_))
    ));

    // The failed subscription no longer receives messages.
    server.push(vec![data("/secret", payload())]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_attempts_bound_delivery() {
    let server = MockServer::new();
    server.set_responder(|_, message| {
        if message.channel == "/foo" {
            Reply::Fail
        } else {
            default_reply(message)
        }
    });
    let client = client(&server, LP);
    within(client.handshake()).await.unwrap();

    let options = PublishOptions {
        attempts: Some(3),
        deadline: None,
    };
    let publication = client.publish_with("/foo", payload(), options).unwrap();
    assert!(matches!(
        within(publication.wait()).await,
        Err(ClientError::DeliveryAborted(_))
    ));
    assert_eq!(server.count("/foo"), 3);

    // Nothing is sent after the envelope is dropped.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.count("/foo"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_delivery() {
    let server = MockServer::new();
    server.set_responder(|_, message| {
        if message.channel == "/foo" {
            Reply::Fail
        } else {
            default_reply(message)
        }
    });
    let client = client(&server, LP);
    within(client.handshake()).await.unwrap();

    let options = PublishOptions {
        attempts: None,
        deadline: Some(Duration::from_millis(2500)),
    };
    let publication = client.publish_with("/foo", payload(), options).unwrap();
    assert!(matches!(
        within(publication.wait()).await,
        Err(ClientError::DeliveryAborted(_))
    ));
    // Sent at 0s, 1s and 2s with a one second retry interval.
    assert_eq!(server.count("/foo"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_none_stops_requests() {
    let server = MockServer::new();
    server.set_responder(|_, message| {
        if message.channel == "/meta/handshake" {
            Reply::Respond(vec![Message {
                advice: Some(Advice {
                    reconnect: Some(Reconnect::None),
                    interval: None,
                    timeout: None,
                }),
                ..nack(message, "300:2.0:Version mismatch")
            }])
        } else {
            default_reply(message)
        }
    });
    let client = client(&server, LP);

    assert_eq!(
        within(client.handshake()).await,
        Err(ClientError::ReconnectForbidden)
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.count("/meta/handshake"), 1);
    assert_eq!(server.count("/meta/connect"), 0);
    assert_eq!(client.state(), ConnectionState::Unconnected);

    let publication = client.publish("/foo", payload()).unwrap();
    assert_eq!(
        within(publication.wait()).await,
        Err(ClientError::ReconnectForbidden)
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_none_on_publish_reply_stops_connects() {
    let server = MockServer::new();
    server.set_responder(|_, message| match message.channel.as_str() {
        "/meta/connect" => Reply::Fail,
        "/foo" => Reply::Respond(vec![Message {
            advice: Some(Advice {
                reconnect: Some(Reconnect::None),
                interval: None,
                timeout: None,
            }),
            ..ack(message)
        }]),
        _ => default_reply(message),
    });
    let client = client(&server, LP);
    within(client.handshake()).await.unwrap();
    wait_until(|| server.count("/meta/connect") >= 1).await;

    within(client.publish("/foo", payload()).unwrap().wait())
        .await
        .unwrap();
    let connects = server.count("/meta/connect");

    // The failing connect is not retried any more.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.count("/meta/connect"), connects);
    assert_eq!(server.count("/meta/handshake"), 1);

    let publication = client.publish("/bar", payload()).unwrap();
    assert_eq!(
        within(publication.wait()).await,
        Err(ClientError::ReconnectForbidden)
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_handshake_is_retried() {
    let server = MockServer::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    server.set_responder(move |_, message| {
        if message.channel == "/meta/handshake" && counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Reply::Respond(vec![nack(message, "500::Internal error")])
        } else {
            default_reply(message)
        }
    });
    let client = client(&server, LP);

    within(client.handshake()).await.unwrap();
    assert_eq!(server.count("/meta/handshake"), 2);
    assert_eq!(client.client_id().as_deref(), Some("c1"));
}

/// Tags outgoing messages and vetoes publishes on `/secret`.
struct Gate;

#[async_trait]
impl Extension for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    async fn outgoing(&self, message: Message) -> Option<Message> {
        if message.channel == "/secret" {
            return None;
        }
        Some(message.with_ext(json!({"token": "abc"})))
    }
}

/// Records the channels it sees going out.
#[derive(Default)]
struct Witness(Mutex<Vec<String>>);

#[async_trait]
impl Extension for Witness {
    async fn outgoing(&self, message: Message) -> Option<Message> {
        self.0.lock().unwrap().push(message.channel.clone());
        Some(message)
    }
}

#[tokio::test]
async fn test_outgoing_veto_short_circuits() {
    let server = MockServer::new();
    let witness = Arc::new(Witness::default());
    let client = bayeux_client::Client::builder(config())
        .transports(factories(&server, LP))
        .extension(Arc::new(Gate))
        .extension(witness.clone())
        .build()
        .unwrap();

    within(client.handshake()).await.unwrap();
    let (_, handshake) = &server.on_channel("/meta/handshake")[0];
    assert_eq!(handshake.ext, Some(json!({"token": "abc"})));

    let vetoed = client.publish("/secret", payload()).unwrap();
    assert_eq!(
        within(vetoed.wait()).await,
        Err(ClientError::Vetoed("/secret".to_string()))
    );
    assert_eq!(server.count("/secret"), 0);
    assert!(!witness.0.lock().unwrap().contains(&"/secret".to_string()));

    within(client.publish("/open", payload()).unwrap().wait())
        .await
        .unwrap();
    assert_eq!(server.count("/open"), 1);
}

#[tokio::test]
async fn test_disconnect_clears_subscriptions() {
    let server = MockServer::new();
    let client = client(&server, LP);
    let (seen, handler) = recorder();

    let subscription = client.subscribe("/foo", handler).unwrap();
    within(subscription.wait()).await.unwrap();

    within(client.disconnect().wait()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.client_id(), None);

    let (_, disconnect) = &server.on_channel("/meta/disconnect")[0];
    assert_eq!(disconnect.client_id.as_deref(), Some("c1"));

    server.push(vec![data("/foo", payload())]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(seen.lock().unwrap().is_empty());

    let (_, handler) = recorder();
    let late = client.subscribe("/foo", handler).unwrap();
    assert_eq!(within(late.wait()).await, Err(ClientError::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_tears_down_without_reply() {
    let server = MockServer::new();
    server.set_responder(|_, message| {
        if message.channel == "/meta/disconnect" {
            Reply::Hold
        } else {
            default_reply(message)
        }
    });
    let client = client(&server, LP);
    within(client.handshake()).await.unwrap();
    wait_until(|| server.count("/meta/connect") == 1).await;

    let started = tokio::time::Instant::now();
    let publication = client.disconnect();
    wait_until(|| server.closed() == 1 && client.connection_type().is_none()).await;
    assert_eq!(server.count("/meta/disconnect"), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.client_id(), None);

    // The caller is released once the reply is overdue.
    publication.wait().await.unwrap();
    assert!(started.elapsed() <= Duration::from_secs(61));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(server.count("/meta/connect"), 1);
    assert_eq!(server.count("/meta/disconnect"), 1);
}
