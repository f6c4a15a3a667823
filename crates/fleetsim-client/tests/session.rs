//! Client session tests against an in-process fake CSMS

use fleetsim_client::{
    BasicAuth, CallHandler, CallRejection, ClientConfig, ClientError, OcppClient,
};
use fleetsim_types::{CallFrame, Frame};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Bind a listener and hand the single accepted OCPP session to `session`.
/// The handshake echoes the ocpp1.6 subprotocol and reports the request
/// path and authorization header through the returned channel.
async fn spawn_csms<F, Fut>(session: F) -> (SocketAddr, tokio::sync::mpsc::UnboundedReceiver<(String, Option<String>)>)
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (meta_tx, meta_rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let meta_tx = meta_tx.clone();
        let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, mut resp: Response| {
            let auth = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let _ = meta_tx.send((req.uri().path().to_string(), auth));
            resp.headers_mut()
                .insert("Sec-WebSocket-Protocol", "ocpp1.6".parse().unwrap());
            Ok(resp)
        })
        .await
        .unwrap();
        session(ws).await;
    });

    (addr, meta_rx)
}

fn client_for(addr: SocketAddr, charger_id: &str) -> Arc<OcppClient> {
    OcppClient::new(ClientConfig::new(
        charger_id,
        format!("ws://{addr}/ocpp"),
    ))
}

/// Reply to every Call with a CallResult built by `respond`
async fn answer_calls<F>(mut ws: WebSocketStream<TcpStream>, respond: F)
where
    F: Fn(&CallFrame) -> serde_json::Value + Send,
{
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            if let Ok(Frame::Call(call)) = Frame::from_wire(&text) {
                let reply = Frame::call_result(call.message_id.clone(), respond(&call));
                ws.send(Message::Text(reply.to_wire().unwrap()))
                    .await
                    .unwrap();
            }
        }
    }
}

#[tokio::test]
async fn handshake_appends_charger_id_and_credentials() {
    let (addr, mut meta_rx) = spawn_csms(|ws| async move {
        answer_calls(ws, |_| json!({})).await;
    })
    .await;

    let mut config = ClientConfig::new("CP007", format!("ws://{addr}/ocpp"));
    config.basic_auth = Some(BasicAuth {
        username: "station".into(),
        password: "secret".into(),
    });
    let client = OcppClient::new(config);
    client.connect().await.unwrap();

    let (path, auth) = meta_rx.recv().await.unwrap();
    assert_eq!(path, "/ocpp/CP007");
    // "station:secret" base64-encoded
    assert_eq!(auth.as_deref(), Some("Basic c3RhdGlvbjpzZWNyZXQ="));

    client.disconnect().await;
}

#[tokio::test]
async fn call_result_resolves_matching_pending_call() {
    let (addr, _meta) = spawn_csms(|ws| async move {
        answer_calls(ws, |call| {
            assert_eq!(call.action, "Heartbeat");
            json!({"currentTime": "2024-05-01T10:00:00Z"})
        })
        .await;
    })
    .await;

    let client = client_for(addr, "CP001");
    client.connect().await.unwrap();

    let response = client
        .send_call_value("Heartbeat", json!({}), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(response["currentTime"], "2024-05-01T10:00:00Z");
    assert_eq!(client.pending_calls(), 0);

    client.disconnect().await;
}

#[tokio::test]
async fn call_error_is_surfaced_as_rejection() {
    let (addr, _meta) = spawn_csms(|mut ws| async move {
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            if let Ok(Frame::Call(call)) = Frame::from_wire(&text) {
                let reply = Frame::call_error(
                    call.message_id,
                    fleetsim_types::CallErrorCode::InternalError,
                    "backend unavailable",
                );
                ws.send(Message::Text(reply.to_wire().unwrap()))
                    .await
                    .unwrap();
            }
        }
    })
    .await;

    let client = client_for(addr, "CP001");
    client.connect().await.unwrap();

    let err = client
        .send_call_value("Heartbeat", json!({}), Duration::from_secs(2))
        .await
        .unwrap_err();
    match err {
        ClientError::Rejected { code, description } => {
            assert_eq!(code, fleetsim_types::CallErrorCode::InternalError);
            assert_eq!(description, "backend unavailable");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }

    client.disconnect().await;
}

#[tokio::test]
async fn call_timeout_removes_pending_and_keeps_socket_usable() {
    // the CSMS stays silent for the first call, then answers normally
    let (addr, _meta) = spawn_csms(|mut ws| async move {
        let mut seen = 0u32;
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            if let Ok(Frame::Call(call)) = Frame::from_wire(&text) {
                seen += 1;
                if seen == 1 {
                    continue; // never reply to the first call
                }
                let reply = Frame::call_result(call.message_id, json!({}));
                ws.send(Message::Text(reply.to_wire().unwrap()))
                    .await
                    .unwrap();
            }
        }
    })
    .await;

    let client = client_for(addr, "CP001");
    client.connect().await.unwrap();

    let err = client
        .send_call_value("Heartbeat", json!({}), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout { .. }));
    assert_eq!(client.pending_calls(), 0);
    assert!(client.is_connected());

    // a later call on the same socket succeeds
    client
        .send_call_value("Heartbeat", json!({}), Duration::from_secs(2))
        .await
        .unwrap();

    client.disconnect().await;
}

#[tokio::test]
async fn responses_route_by_message_id_regardless_of_order() {
    // answer calls in reverse arrival order
    let (addr, _meta) = spawn_csms(|mut ws| async move {
        let mut held: Vec<CallFrame> = Vec::new();
        while held.len() < 2 {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(Frame::Call(call)) = Frame::from_wire(&text) {
                        held.push(call);
                    }
                }
                _ => return,
            }
        }
        for call in held.into_iter().rev() {
            let reply =
                Frame::call_result(call.message_id, json!({"echo": call.payload["seq"]}));
            ws.send(Message::Text(reply.to_wire().unwrap()))
                .await
                .unwrap();
        }
    })
    .await;

    let client = client_for(addr, "CP001");
    client.connect().await.unwrap();

    let first = client.send_call_value("DataTransfer", json!({"seq": 1}), Duration::from_secs(2));
    let second = client.send_call_value("DataTransfer", json!({"seq": 2}), Duration::from_secs(2));
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap()["echo"], 1);
    assert_eq!(second.unwrap()["echo"], 2);

    client.disconnect().await;
}

struct AcceptingHandler;

#[async_trait::async_trait]
impl CallHandler for AcceptingHandler {
    async fn handle_call(&self, call: CallFrame) -> Result<serde_json::Value, CallRejection> {
        match call.action.as_str() {
            "RemoteStartTransaction" => Ok(json!({"status": "Accepted"})),
            _ => Err(CallRejection::new(
                fleetsim_types::CallErrorCode::NotImplemented,
                "unknown action",
            )),
        }
    }
}

#[tokio::test]
async fn inbound_call_is_answered_via_handler() {
    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel();

    let (addr, _meta) = spawn_csms(move |mut ws| async move {
        let call = Frame::Call(CallFrame {
            message_id: "m1".into(),
            action: "RemoteStartTransaction".into(),
            payload: json!({"connectorId": 1, "idTag": "U1"}),
        });
        ws.send(Message::Text(call.to_wire().unwrap()))
            .await
            .unwrap();

        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let _ = reply_tx.send(text);
        }
    })
    .await;

    let client = client_for(addr, "CP001");
    let handler: Arc<dyn CallHandler> = Arc::new(AcceptingHandler);
    let weak: std::sync::Weak<dyn CallHandler> = Arc::downgrade(&handler);
    client.set_handler(weak);
    client.connect().await.unwrap();

    let mut inbound = client.subscribe_inbound();
    let action = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(action, "RemoteStartTransaction");

    let reply = tokio::time::timeout(Duration::from_secs(2), reply_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, r#"[3,"m1",{"status":"Accepted"}]"#);

    client.disconnect().await;
}

#[tokio::test]
async fn subprotocol_rejection_fails_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // accept the upgrade without echoing any subprotocol
        let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let client = client_for(addr, "CP001");
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::SubprotocolRejected));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn peer_close_fails_pending_calls_with_connection_lost() {
    let (addr, _meta) = spawn_csms(|mut ws| async move {
        // read the call, then slam the connection shut without replying
        let _ = ws.next().await;
        let _ = ws.close(None).await;
    })
    .await;

    let client = client_for(addr, "CP001");
    client.connect().await.unwrap();

    let err = client
        .send_call_value("Heartbeat", json!({}), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::ConnectionLost | ClientError::Rejected { .. }
    ));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn abort_tears_down_without_close_frame() {
    let (saw_close_tx, mut saw_close_rx) = tokio::sync::mpsc::unbounded_channel();

    let (addr, _meta) = spawn_csms(move |mut ws| async move {
        let mut saw_close = false;
        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Close(_)) {
                saw_close = true;
            }
        }
        let _ = saw_close_tx.send(saw_close);
    })
    .await;

    let client = client_for(addr, "CP001");
    client.connect().await.unwrap();
    client.abort().await;

    let saw_close = tokio::time::timeout(Duration::from_secs(2), saw_close_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!saw_close, "abort must not send a close frame");
    assert!(!client.is_connected());
}
