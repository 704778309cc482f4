use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use script_hub_rs::{build_router, config::Config, AppState};
use serde_json::{json, Value};
use std::{net::SocketAddr, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::frame::coding::CloseCode, Message},
    MaybeTlsStream, WebSocketStream,
};
use tower::ServiceExt;

type Agent = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestHub {
    addr: SocketAddr,
    app: Router,
    state: AppState,
}

fn test_config() -> Config {
    Config {
        addr: "127.0.0.1:0".to_string(),
        ping_interval: Duration::ZERO,
        write_timeout: Duration::from_secs(1),
        ..Config::default()
    }
}

async fn start_hub() -> TestHub {
    start_hub_with(test_config()).await
}

async fn start_hub_with(config: Config) -> TestHub {
    let state = AppState::new(config);
    let app = build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = app.clone();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            server.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    TestHub { addr, app, state }
}

async fn connect(hub: &TestHub) -> (Agent, u64) {
    let (mut ws, _) = connect_async(format!("ws://{}/ws", hub.addr))
        .await
        .expect("connect");
    let assign = read_json(&mut ws).await;
    assert_eq!(assign["action"], "assignId");
    let id = assign["id"].as_u64().expect("numeric id");
    (ws, id)
}

async fn read_frame(ws: &mut Agent) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("read timeout")
            .expect("stream ended")
            .expect("read error");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn read_json(ws: &mut Agent) -> Value {
    match read_frame(ws).await {
        Message::Text(text) => serde_json::from_str(&text).expect("json"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn send_json(ws: &mut Agent, value: Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("send");
}

async fn register(ws: &mut Agent, user_id: &str, username: &str) {
    send_json(
        ws,
        json!({
            "action": "register",
            "userId": user_id,
            "username": username,
            "jobId": "job-1",
            "gameName": "Game"
        }),
    )
    .await;
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn get_clients(hub: &TestHub) -> Vec<Value> {
    let response = hub
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/clients")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    match body_json(response).await {
        Value::Array(items) => items,
        other => panic!("expected array, got {other}"),
    }
}

async fn wait_for_clients(hub: &TestHub, count: usize) -> Vec<Value> {
    for _ in 0..150 {
        let clients = get_clients(hub).await;
        if clients.len() == count {
            return clients;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("registry never reached {count} clients");
}

async fn post_command(hub: &TestHub, body: Value) -> (StatusCode, Value) {
    let response = hub
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/send-command")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn register_list_and_message_scenario() {
    let hub = start_hub().await;
    let (mut agent, id) = connect(&hub).await;
    assert_eq!(id, 1);
    assert!(get_clients(&hub).await.is_empty());

    register(&mut agent, "42", "Bob").await;
    let clients = wait_for_clients(&hub, 1).await;
    let entry = &clients[0];
    assert_eq!(entry["id"], 1);
    assert_eq!(entry["userId"], "42");
    assert_eq!(entry["username"], "Bob");
    assert_eq!(entry["jobId"], "job-1");
    assert_eq!(entry["gameName"], "Game");
    assert!(entry["connectedAt"].is_string());
    assert_eq!(entry.as_object().map(|o| o.len()), Some(6));

    let (status, body) = post_command(
        &hub,
        json!({"clientId": 1, "command": "message", "params": {"message": "hi"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"success": true, "message": "Command sent to client 1"})
    );
    assert_eq!(
        read_json(&mut agent).await,
        json!({"action": "command", "command": "message", "params": {"message": "hi"}})
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn command_to_unknown_client_is_not_found() {
    let hub = start_hub().await;
    let (status, body) = post_command(&hub, json!({"clientId": 99, "command": "kick"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({"success": false, "error": "Client not found or disconnected"})
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_reports_delivered_count() {
    let hub = start_hub().await;
    let (status, body) = post_command(&hub, json!({"clientId": "all", "command": "message"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Command sent to 0 clients");

    let mut agents = Vec::new();
    for name in ["A", "B", "C"] {
        let (mut agent, _) = connect(&hub).await;
        register(&mut agent, "1", name).await;
        agents.push(agent);
    }
    wait_for_clients(&hub, 3).await;

    let (status, body) = post_command(
        &hub,
        json!({"clientId": "all", "command": "message", "params": {"message": "all"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Command sent to 3 clients");
    for agent in &mut agents {
        let frame = read_json(agent).await;
        assert_eq!(frame["command"], "message");
        assert_eq!(frame["params"], json!({"message": "all"}));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_removes_client_and_ids_are_not_reused() {
    let hub = start_hub().await;
    let (mut agent, id) = connect(&hub).await;
    register(&mut agent, "42", "Bob").await;
    wait_for_clients(&hub, 1).await;

    agent.close(None).await.expect("close");
    wait_for_clients(&hub, 0).await;

    let (status, _) = post_command(&hub, json!({"clientId": id, "command": "message"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_next, next_id) = connect(&hub).await;
    assert_eq!(next_id, id + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_and_unknown_frames_do_not_close_connection() {
    let hub = start_hub().await;
    let (mut agent, id) = connect(&hub).await;

    agent
        .send(Message::Text("{not json".to_string()))
        .await
        .expect("send garbage");
    send_json(&mut agent, json!({"action": "log", "text": "booting"})).await;
    send_json(&mut agent, json!({"action": "register", "userId": "1"})).await;
    send_json(
        &mut agent,
        json!({"action": "register", "id": id + 5, "userId": "1", "username": "Spoof"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(get_clients(&hub).await.is_empty());

    let register = json!({
        "action": "register",
        "userId": 7,
        "username": "Ann",
        "jobId": "job-2",
        "gameName": "Game"
    });
    agent
        .send(Message::Binary(register.to_string().into_bytes()))
        .await
        .expect("send binary register");
    let clients = wait_for_clients(&hub, 1).await;
    assert_eq!(clients[0]["id"], id);
    assert_eq!(clients[0]["userId"], "7");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kick_delivers_command_then_closes_socket() {
    let hub = start_hub().await;
    let (mut agent, id) = connect(&hub).await;
    register(&mut agent, "42", "Bob").await;
    let (mut other, _) = connect(&hub).await;
    register(&mut other, "43", "Ann").await;
    wait_for_clients(&hub, 2).await;

    let (status, body) = post_command(
        &hub,
        json!({"clientId": id.to_string(), "command": "kick", "params": {"message": "bye"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let frame = read_json(&mut agent).await;
    assert_eq!(
        frame,
        json!({"action": "command", "command": "kick", "params": {"message": "bye"}})
    );
    match read_frame(&mut agent).await {
        Message::Close(Some(close)) => {
            assert_eq!(close.code, CloseCode::Normal);
            assert_eq!(close.reason, "bye");
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    let remaining = get_clients(&hub).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["username"], "Ann");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_requests_are_rejected() {
    let hub = start_hub().await;

    let (status, body) = post_command(&hub, json!({"command": "message"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required fields");

    let (status, _) = post_command(&hub, json!({"clientId": 1, "command": ""})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_command(&hub, json!({"clientId": "everyone", "command": "x"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid client id");

    let (status, body) =
        post_command(&hub, json!({"clientId": 1, "command": "x", "params": [1]})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "params must be an object");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reregistration_updates_listed_identity() {
    let hub = start_hub().await;
    let (mut agent, id) = connect(&hub).await;
    register(&mut agent, "42", "Bob").await;
    wait_for_clients(&hub, 1).await;

    send_json(
        &mut agent,
        json!({
            "action": "register",
            "userId": 43,
            "username": "Robert",
            "jobId": "job-9",
            "gameName": null
        }),
    )
    .await;
    for _ in 0..150 {
        let clients = get_clients(&hub).await;
        if clients[0]["username"] == "Robert" {
            assert_eq!(clients.len(), 1);
            assert_eq!(clients[0]["id"], id);
            assert_eq!(clients[0]["userId"], "43");
            assert_eq!(clients[0]["jobId"], "job-9");
            assert_eq!(clients[0]["gameName"], "");
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("identity was never updated");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn keepalive_pings_reach_agent() {
    let hub = start_hub_with(Config {
        ping_interval: Duration::from_millis(100),
        ..test_config()
    })
    .await;
    let (mut agent, _) = connect(&hub).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let msg = tokio::time::timeout_at(deadline, agent.next())
            .await
            .expect("no ping before deadline")
            .expect("stream ended")
            .expect("read error");
        if matches!(msg, Message::Ping(_)) {
            break;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_agent_is_dropped_from_registry() {
    let hub = start_hub_with(Config {
        queue_capacity: 2,
        ..test_config()
    })
    .await;
    let (mut stalled, id) = connect(&hub).await;
    register(&mut stalled, "1", "Stalled").await;
    let (mut healthy, _) = connect(&hub).await;
    register(&mut healthy, "2", "Healthy").await;
    wait_for_clients(&hub, 2).await;

    let filler = "x".repeat(256 * 1024);
    let mut rejected = false;
    for _ in 0..400 {
        let (status, _) = post_command(
            &hub,
            json!({"clientId": id, "command": "message", "params": {"message": filler}}),
        )
        .await;
        if status == StatusCode::NOT_FOUND {
            rejected = true;
            break;
        }
    }
    assert!(rejected, "stalled agent kept accepting commands");

    let remaining = wait_for_clients(&hub, 1).await;
    assert_eq!(remaining[0]["username"], "Healthy");
    let (status, _) = post_command(&hub, json!({"clientId": "all", "command": "message"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read_json(&mut healthy).await["command"], "message");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hub_side_close_without_frame_still_closes_socket_promptly() {
    let hub = start_hub_with(Config {
        write_timeout: Duration::from_secs(10),
        ..test_config()
    })
    .await;
    let (mut agent, id) = connect(&hub).await;
    register(&mut agent, "1", "Bob").await;
    wait_for_clients(&hub, 1).await;

    let envelope = hub
        .state
        .hub
        .registry()
        .get(id)
        .await
        .expect("registered");
    assert!(envelope.handle().mark_closing());

    match read_frame(&mut agent).await {
        Message::Close(_) => {}
        other => panic!("expected close frame, got {other:?}"),
    }
    wait_for_clients(&hub, 0).await;
}
