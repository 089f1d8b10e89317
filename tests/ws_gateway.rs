//! 会话网关套接字级测试：真实WS握手、绑定、收发与顶号
//! Socket-level gateway tests: real WS handshake, binding, send/receive and
//! session replacement

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use relay_im::cache::memory::MemoryCache;
use relay_im::queue::memory::MemoryQueue;
use relay_im::{MessageStore, RelayImServer, Settings};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_gateway() -> (Arc<RelayImServer>, String) {
    let settings = Arc::new(Settings::default());
    let store = Arc::new(MessageStore::open_temporary().expect("open storage"));
    let cache = Arc::new(MemoryCache::new());
    let queue = Arc::new(MemoryQueue::new(5, Duration::from_millis(20)));
    let server = Arc::new(RelayImServer::new(
        settings,
        store,
        cache.clone(),
        cache.clone(),
        cache,
        queue,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(relay_im::ws::server::run_ws_listener(server.clone(), listener));
    tokio::spawn(relay_im::service::dispatch::run_dispatcher(server.clone()));
    (server, format!("ws://{}", addr))
}

async fn connect(base: &str, user_id: &str) -> Client {
    let (ws, _) = connect_async(format!("{}/?userId={}", base, user_id))
        .await
        .expect("connect");
    ws
}

/// 握手返回与服务端绑定是并发的，等绑定可见再继续
/// The handshake return races the server-side bind; wait until the binding is
/// visible
async fn wait_for_bind(server: &RelayImServer, user_id: &str) {
    timeout(Duration::from_secs(2), async {
        while !server.registry.has(user_id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("bind never became visible");
}

async fn recv_json(ws: &mut Client) -> serde_json::Value {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("ws error");
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(&text).expect("event is json");
        }
    }
}

async fn send_json(ws: &mut Client, value: serde_json::Value) {
    ws.send(WsMessage::Text(value.to_string())).await.expect("send");
}

#[tokio::test]
async fn handshake_without_user_id_closes_the_transport() {
    let (server, base) = start_gateway().await;
    let (mut ws, _) = connect_async(format!("{}/", base)).await.expect("connect");

    let frame = timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for close");
    match frame {
        None | Some(Ok(WsMessage::Close(_))) | Some(Err(_)) => {}
        other => panic!("expected close, got {:?}", other),
    }
    assert_eq!(server.registry.count(), 0);
}

#[tokio::test]
async fn online_delivery_over_sockets() {
    let (server, base) = start_gateway().await;
    let mut alice = connect(&base, "u_alice").await;
    let mut bob = connect(&base, "u_bob").await;
    wait_for_bind(&server, "u_alice").await;
    wait_for_bind(&server, "u_bob").await;

    send_json(
        &mut alice,
        serde_json::json!({
            "type": "send_message",
            "data": {
                "receiver_id": "u_bob",
                "content": "hi",
                "message_id_by_client": 7,
                "timestamp": 1_700_000_000_000_i64,
            }
        }),
    )
    .await;

    let receipt = recv_json(&mut alice).await;
    assert_eq!(receipt["type"], "message_received");
    assert_eq!(receipt["data"]["action"], "message_received");
    assert_eq!(receipt["data"]["message_id_by_client"], 7);
    let message_id = receipt["data"]["message_id"].as_str().unwrap().to_string();

    let incoming = recv_json(&mut bob).await;
    assert_eq!(incoming["type"], "incoming_message");
    assert_eq!(incoming["data"]["message_id"], message_id.as_str());
    assert_eq!(incoming["data"]["sender_id"], "u_alice");
    assert_eq!(incoming["data"]["content"], "hi");
    assert_eq!(incoming["data"]["timestamp"], 1_700_000_000_000_i64);

    send_json(
        &mut bob,
        serde_json::json!({
            "type": "message_delivered",
            "data": { "message_id": message_id, "timestamp": 1_700_000_000_001_i64 }
        }),
    )
    .await;

    // 确认是异步处理的，轮询至落库 / the ack lands asynchronously, poll the store
    let delivered = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(row) = server.store.find_by_id(&message_id) {
                if !row.undelivered {
                    return row;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("ack never landed");
    assert!(delivered.delivered_at.is_some());
    assert!(server.inbox.get_inbox("u_bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_content_is_rejected_with_an_error_event() {
    let (server, base) = start_gateway().await;
    let mut alice = connect(&base, "u_alice").await;

    send_json(
        &mut alice,
        serde_json::json!({
            "type": "send_message",
            "data": {
                "receiver_id": "u_bob",
                "content": "x".repeat(1001),
                "message_id_by_client": 1,
                "timestamp": 0,
            }
        }),
    )
    .await;

    let event = recv_json(&mut alice).await;
    assert_eq!(event["type"], "error");
    // 越界发送不落库 / the rejected send left no row
    assert!(server.store.find_undelivered("u_bob").unwrap().is_empty());
}

#[tokio::test]
async fn reconnect_replaces_the_session_over_sockets() {
    let (server, base) = start_gateway().await;
    let mut first = connect(&base, "u_alice").await;
    wait_for_bind(&server, "u_alice").await;
    let mut second = connect(&base, "u_alice").await;

    // 旧传输收到关闭帧 / the first transport gets a close frame
    let frame = timeout(Duration::from_secs(2), first.next())
        .await
        .expect("timed out waiting for close");
    match frame {
        None | Some(Ok(WsMessage::Close(_))) | Some(Err(_)) => {}
        other => panic!("expected close, got {:?}", other),
    }

    // 新会话照常工作 / the second session works
    send_json(
        &mut second,
        serde_json::json!({
            "type": "send_message",
            "data": {
                "receiver_id": "u_bob",
                "content": "still here",
                "message_id_by_client": 2,
                "timestamp": 1_700_000_000_000_i64,
            }
        }),
    )
    .await;
    let receipt = recv_json(&mut second).await;
    assert_eq!(receipt["type"], "message_received");
    assert_eq!(server.registry.count(), 1);
}

#[tokio::test]
async fn offline_backlog_replays_on_reconnect_over_sockets() {
    let (server, base) = start_gateway().await;
    let mut alice = connect(&base, "u_alice").await;

    for (i, content) in ["a", "b"].iter().enumerate() {
        send_json(
            &mut alice,
            serde_json::json!({
                "type": "send_message",
                "data": {
                    "receiver_id": "u_bob",
                    "content": content,
                    "message_id_by_client": i as i64 + 1,
                    "timestamp": 1_700_000_000_000_i64 + i as i64,
                }
            }),
        )
        .await;
        let receipt = recv_json(&mut alice).await;
        assert_eq!(receipt["type"], "message_received");
    }

    // 等分发器完成离线暂存 / wait for the dispatcher to finish the deposit
    timeout(Duration::from_secs(5), async {
        loop {
            if server.inbox.get_inbox("u_bob").await.unwrap().len() == 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("deposit never happened");

    // 鲍勃上线即按序补投 / bob connects and the backlog replays in order
    let mut bob = connect(&base, "u_bob").await;
    let first = recv_json(&mut bob).await;
    let second = recv_json(&mut bob).await;
    assert_eq!(first["data"]["content"], "a");
    assert_eq!(second["data"]["content"], "b");
}
