use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use uuid::Uuid;

use crate::domain::event;
use crate::domain::WireEnvelope;
use crate::registry::SessionHandle;
use crate::server::RelayImServer;

/// 从握手查询串取用户身份；生产部署应换成可校验凭证
/// User identity from the handshake query string; production deployments
/// should substitute a verifiable credential
fn user_id_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "userId")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// 处理新连接 / Handle new connection
///
/// 会话状态机：握手解析身份 → 绑定（顶掉旧会话）→ 补投 → 事件循环 → 摘除
/// Session lifecycle: resolve identity at handshake → bind (evicting a prior
/// session) → drain → event loop → unbind
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    server: Arc<RelayImServer>,
) -> Result<()> {
    tracing::info!("📨 New connection from: {}", peer_addr);

    let mut user_id: Option<String> = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        user_id = user_id_from_query(req.uri().query());
        Ok(resp)
    })
    .await?;

    // 无身份直接关闭，不发任何事件 / no identity: close without emitting
    let Some(user_id) = user_id else {
        tracing::warn!("🚷 Connection from {} carried no userId, closing", peer_addr);
        let mut ws_stream = ws_stream;
        let _ = ws_stream.close(None).await;
        return Ok(());
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let handle = SessionHandle::new(Uuid::new_v4().to_string(), peer_addr, tx);

    let writer_handle_id = handle.handle_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                tracing::error!("Failed to send on session {}: {}", writer_handle_id, e);
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    // 绑定：单用户单会话，旧会话收到关闭帧
    // Bind: one session per user, the prior one gets a close frame
    if let Some(evicted) = server.registry.add(&user_id, handle.clone()) {
        tracing::info!("♻️  Session for {} replaced, closing {}", user_id, evicted.handle_id);
        server.send_close(&evicted, "session replaced");
    }
    if let Err(e) = server
        .presence
        .set_user_connection(&user_id, server.server_id())
        .await
    {
        tracing::warn!("⚠️  Presence set for {} failed: {}", user_id, e);
    }
    tracing::info!("✅ User {} bound on session {} from {}", user_id, handle.handle_id, peer_addr);

    // 重连补投 / reconnect drain
    match server.drain_inbox(&user_id).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("📬 Replayed {} pending messages to {}", n, user_id),
        Err(e) => tracing::warn!("⚠️  Inbox drain for {} failed: {}", user_id, e),
    }

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle.touch();
                handle_client_event(&server, &handle, &text).await;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => handle.touch(),
            Ok(Message::Close(frame)) => {
                tracing::info!("🔒 Session {} requested close: {:?}", handle.handle_id, frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("WebSocket error on session {}: {}", handle.handle_id, e);
                break;
            }
        }
    }

    // 摘除；与顶号竞争时互为空操作，不得清掉新会话的在线提示
    // Unbind; mutual no-op with a racing eviction, must not wipe the new
    // session's presence hint
    if server
        .registry
        .remove_if_current(&user_id, &handle.handle_id)
        .is_some()
    {
        if let Err(e) = server.presence.remove_user_connection(&user_id).await {
            tracing::warn!("⚠️  Presence removal for {} failed: {}", user_id, e);
        }
    }
    send_task.abort();
    tracing::info!("👋 User {} disconnected (session {})", user_id, handle.handle_id);
    Ok(())
}

/// 入站事件分发 / Inbound event dispatch
///
/// 发送方身份取自注册表中的会话绑定；被顶掉的会话视为未绑定
/// Sender identity comes from the registry binding; an evicted session counts
/// as unbound
async fn handle_client_event(server: &RelayImServer, handle: &SessionHandle, text: &str) {
    let WireEnvelope { event_type, data } = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(_) => {
            let _ = server.send_to_handle(handle, &event::error_event("Invalid JSON format"));
            return;
        }
    };
    let bound_user = server.registry.user_of(&handle.handle_id);

    match event_type.as_str() {
        "send_message" => {
            let Some(user_id) = bound_user else {
                let err = crate::error::RelayError::NotAuthenticated;
                let _ = server.send_to_handle(handle, &event::error_event(&err.to_string()));
                return;
            };
            let payload = match event::decode_send_message(data) {
                Ok(p) => p,
                Err(e) => {
                    let _ = server.send_to_handle(handle, &event::error_event(&e.to_string()));
                    return;
                }
            };
            match server.ingest_message(&user_id, &payload).await {
                Ok(msg) => {
                    let receipt = event::message_received(
                        &msg.message_id,
                        payload.message_id_by_client,
                        Utc::now().timestamp_millis(),
                    );
                    let _ = server.send_to_handle(handle, &receipt);
                }
                Err(e) => {
                    tracing::warn!("⚠️  send_message from {} failed: {}", user_id, e);
                    let _ = server.send_to_handle(handle, &event::error_event("message not accepted"));
                }
            }
        }
        "message_delivered" => {
            // 未绑定时静默丢弃 / silently dropped when unbound
            let Some(user_id) = bound_user else {
                tracing::debug!("🚮 message_delivered on unbound session {}", handle.handle_id);
                return;
            };
            let payload = match event::decode_message_delivered(data) {
                Ok(p) => p,
                Err(e) => {
                    let _ = server.send_to_handle(handle, &event::error_event(&e.to_string()));
                    return;
                }
            };
            if let Err(e) = server
                .acknowledge_delivery(&user_id, &payload.message_id)
                .await
            {
                tracing::warn!(
                    "⚠️  Delivery ack of {} by {} failed: {}",
                    payload.message_id,
                    user_id,
                    e
                );
            }
        }
        "ping" => {
            let _ = server.send_to_handle(handle, &event::pong(Utc::now().timestamp_millis()));
        }
        other => {
            let _ = server.send_to_handle(
                handle,
                &event::error_event(&format!("Unknown event type: {}", other)),
            );
        }
    }
}
