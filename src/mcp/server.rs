use actix_web::http::StatusCode;
use actix_web::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use actix_web::web::Bytes;
use actix_web::{App, HttpRequest, HttpResponse, HttpResponseBuilder, HttpServer, web};
use chrono::Utc;
use futures::stream::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::mcp::{
    PROTOCOL_VERSION_HEADER, SERVER_NAME, SERVER_VERSION, SESSION_ID_HEADER,
    broker::CommandBroker,
    dispatcher::{Dispatcher, RequestContext},
    errors::{JsonRpcError, MCPResult, SessionError},
    is_supported_protocol_version,
    protocol::{MCPMessage, MessageParser},
    session::{SessionCleanupService, SessionManager},
    snapshot::SnapshotStore,
    tools::{ToolRegistry, register_builtin_tools},
    transport::SseTransport,
};

/// Composition root: every shared component, built fresh per instance
pub struct AppState {
    pub config: BridgeConfig,
    pub sessions: Arc<SessionManager>,
    pub snapshots: Arc<SnapshotStore>,
    pub broker: Arc<CommandBroker>,
    pub tools: Arc<ToolRegistry>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub async fn new(config: BridgeConfig) -> MCPResult<Self> {
        let snapshots = Arc::new(SnapshotStore::new(config.snapshot_stale_after()));
        let sessions = Arc::new(SessionManager::new(snapshots.clone()));
        let broker = Arc::new(CommandBroker::new(
            sessions.clone(),
            config.command_timeout(),
        ));

        let tools = Arc::new(ToolRegistry::new());
        register_builtin_tools(&tools).await?;

        let dispatcher = Arc::new(Dispatcher::new(
            sessions.clone(),
            snapshots.clone(),
            broker.clone(),
            tools.clone(),
            config.command_timeout(),
        ));

        Ok(Self {
            config,
            sessions,
            snapshots,
            broker,
            tools,
            dispatcher,
        })
    }
}

fn header_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn rpc_error(status: StatusCode, id: Value, error: impl Into<JsonRpcError>) -> HttpResponse {
    HttpResponseBuilder::new(status).json(MCPMessage::error_response(id, error.into()))
}

/// Status code for a session-level rejection
fn session_status(error: &SessionError) -> StatusCode {
    match error {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Resolve the session a non-handshake POST belongs to: the id header must
/// name a live session and any version header must match its negotiation.
fn established_session(
    req: &HttpRequest,
    state: &AppState,
    reply_id: Value,
) -> Result<String, HttpResponse> {
    let Some(session_id) = header_value(req, SESSION_ID_HEADER) else {
        return Err(rpc_error(
            StatusCode::BAD_REQUEST,
            reply_id,
            SessionError::MissingSessionId,
        ));
    };
    if !state.sessions.touch_session(&session_id) {
        return Err(rpc_error(
            StatusCode::NOT_FOUND,
            reply_id,
            SessionError::NotFound(session_id),
        ));
    }
    let version_header = header_value(req, PROTOCOL_VERSION_HEADER);
    if let Err(e) = state
        .sessions
        .check_protocol_version(&session_id, version_header.as_deref())
    {
        warn!("Rejected request on session {}: {}", session_id, e);
        return Err(rpc_error(session_status(&e), reply_id, e));
    }
    Ok(session_id)
}

/// POST /mcp: exactly one JSON-RPC message per body
pub async fn handle_post(
    req: HttpRequest,
    body: Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let frame = MessageParser::parse_frame(&body);

    if let Some(error) = frame.errors.into_iter().next() {
        warn!("Rejected malformed frame");
        return HttpResponse::BadRequest().json(error);
    }
    if frame.accepted_one_way {
        return match established_session(&req, &state, Value::Null) {
            Ok(session_id) => {
                debug!("Accepted one-way message on session {}", session_id);
                HttpResponse::Accepted().finish()
            }
            Err(rejection) => rejection,
        };
    }
    let Some(request) = frame.requests.into_iter().next() else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            Value::Null,
            JsonRpcError::invalid_request("Invalid Request: empty frame"),
        );
    };

    let reply_id = request.id.clone().unwrap_or(Value::Null);
    let session_header = header_value(&req, SESSION_ID_HEADER);
    let version_header = header_value(&req, PROTOCOL_VERSION_HEADER);

    if request.is_initialize() {
        if let Some(version) = version_header.as_deref() {
            if !is_supported_protocol_version(version) {
                return rpc_error(
                    StatusCode::BAD_REQUEST,
                    reply_id,
                    SessionError::UnsupportedProtocolVersion(version.to_string()),
                );
            }
        }

        // Re-initializing a live session keeps its id
        let session_id = match session_header {
            Some(id) if state.sessions.contains(&id) => id,
            _ => SessionManager::generate_session_id(),
        };
        state.sessions.create_session(&session_id);

        let context = RequestContext::for_session(session_id.clone());
        return match state.dispatcher.handle(request, &context).await {
            Some(response) => HttpResponse::Ok()
                .insert_header((SESSION_ID_HEADER, session_id))
                .json(response),
            None => HttpResponse::Accepted().finish(),
        };
    }

    let session_id = match established_session(&req, &state, reply_id) {
        Ok(session_id) => session_id,
        Err(rejection) => return rejection,
    };

    let context = RequestContext::for_session(session_id);
    match state.dispatcher.handle(request, &context).await {
        Some(response) => HttpResponse::Ok().json(response),
        None => HttpResponse::Accepted().finish(),
    }
}

/// GET /mcp: open the server-to-client event stream for a negotiated session
pub async fn open_stream(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let accepts_sse = req
        .headers()
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("text/event-stream"))
        .unwrap_or(false);
    if !accepts_sse {
        return HttpResponse::NotAcceptable().body("Accept must include text/event-stream");
    }

    let Some(session_id) = header_value(&req, SESSION_ID_HEADER) else {
        return rpc_error(StatusCode::BAD_REQUEST, Value::Null, SessionError::MissingSessionId);
    };
    if !state.sessions.touch_session(&session_id) {
        return rpc_error(
            StatusCode::NOT_FOUND,
            Value::Null,
            SessionError::NotFound(session_id),
        );
    }
    if state.sessions.protocol_version(&session_id).is_none() {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            Value::Null,
            JsonRpcError::invalid_request(SessionError::NotNegotiated(session_id).to_string()),
        );
    }
    let version_header = header_value(&req, PROTOCOL_VERSION_HEADER);
    if let Err(e) = state
        .sessions
        .check_protocol_version(&session_id, version_header.as_deref())
    {
        return rpc_error(session_status(&e), Value::Null, e);
    }

    let (transport, receiver) = SseTransport::open(
        &session_id,
        state.config.sse_buffer,
        state.config.sse_write_timeout(),
    );
    if !state.sessions.set_transport(&session_id, transport.clone()) {
        return rpc_error(
            StatusCode::NOT_FOUND,
            Value::Null,
            SessionError::NotFound(session_id),
        );
    }

    info!(
        "SSE stream {} opened for session {}",
        transport.id(),
        session_id
    );
    spawn_push_loop(
        state.sessions.clone(),
        transport.clone(),
        state.config.keepalive_interval(),
    );

    // The body ends as soon as the transport closes, for whatever reason
    let closed = {
        let transport = transport.clone();
        Box::pin(async move { transport.wait_closed().await })
    };
    let body = ReceiverStream::new(receiver)
        .map(Ok::<Bytes, actix_web::Error>)
        .take_until(closed);

    HttpResponse::Ok()
        .insert_header((CONTENT_TYPE, "text/event-stream"))
        .insert_header((CACHE_CONTROL, "no-cache"))
        .insert_header((SESSION_ID_HEADER, session_id))
        .streaming(body)
}

/// Owns a stream's lifetime: keep-alives, disconnect detection, and the
/// single compare-and-clear unbind once the transport is closed.
fn spawn_push_loop(
    sessions: Arc<SessionManager>,
    transport: Arc<SseTransport>,
    keepalive: Duration,
) {
    tokio::spawn(async move {
        if let Err(e) = transport.send_comment("connected").await {
            debug!("SSE stream {} failed before start: {}", transport.id(), e);
        }

        let mut ticker = tokio::time::interval(keepalive);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = transport.wait_closed() => break,
                _ = transport.disconnected() => {
                    debug!("SSE client for stream {} disconnected", transport.id());
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = transport.send_comment("keep-alive").await {
                        debug!("Keep-alive failed on stream {}: {}", transport.id(), e);
                        break;
                    }
                }
            }
        }

        transport.close();
        if sessions.clear_transport_if_match(transport.session_id(), &transport) {
            info!(
                "SSE stream {} closed for session {}",
                transport.id(),
                transport.session_id()
            );
        }
    });
}

/// DELETE /mcp: terminate a session
pub async fn terminate_session(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let Some(session_id) = header_value(&req, SESSION_ID_HEADER) else {
        return rpc_error(StatusCode::BAD_REQUEST, Value::Null, SessionError::MissingSessionId);
    };

    if state.sessions.remove_session(&session_id) {
        HttpResponse::NoContent().finish()
    } else {
        rpc_error(
            StatusCode::NOT_FOUND,
            Value::Null,
            SessionError::NotFound(session_id),
        )
    }
}

/// GET /health
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": SERVER_NAME,
        "version": SERVER_VERSION,
        "sessions": state.sessions.session_count(),
        "pendingCommands": state.broker.pending_count(),
        "snapshots": state.snapshots.len(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/mcp", web::post().to(handle_post))
        .route("/mcp", web::get().to(open_stream))
        .route("/mcp", web::delete().to(terminate_session))
        .route("/health", web::get().to(health));
}

/// Build the shared state, start the idle sweep and serve until shutdown
pub async fn run_server(config: BridgeConfig) -> std::io::Result<()> {
    let bind_addr = (config.host.clone(), config.port);
    let max_body_bytes = config.max_body_bytes;

    let state = AppState::new(config)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let cleanup_task = SessionCleanupService::new(
        state.sessions.clone(),
        state.config.session_timeout(),
        state.config.cleanup_interval(),
    )
    .start();

    let state = web::Data::new(state);
    info!(
        "{} {} listening on http://{}:{}/mcp",
        SERVER_NAME, SERVER_VERSION, bind_addr.0, bind_addr.1
    );

    let result = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run()
    .await;

    cleanup_task.abort();
    info!("Server stopped");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::{BoxBody, MessageBody};
    use actix_web::test;
    use std::pin::Pin;
    use std::rc::Rc;

    async fn state() -> web::Data<AppState> {
        let config = BridgeConfig {
            keepalive_interval_secs: 60,
            ..Default::default()
        };
        web::Data::new(AppState::new(config).await.unwrap())
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .configure(configure_routes),
            )
            .await
        };
    }

    fn post(body: Value) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/mcp")
            .insert_header((CONTENT_TYPE, "application/json"))
            .set_payload(body.to_string())
    }

    fn initialize_body(id: i64) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "1.0" }
            }
        })
    }

    fn tool_call(id: i64, name: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        })
    }

    async fn next_frame(body: &mut BoxBody) -> Option<String> {
        let chunk = futures::future::poll_fn(|cx| Pin::new(&mut *body).poll_next(cx)).await?;
        chunk
            .ok()
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
    }

    #[actix_web::test]
    async fn test_initialize_assigns_session() {
        let state = state().await;
        let app = app!(state);

        let resp = test::call_service(&app, post(initialize_body(1)).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let session_id = resp
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
        assert_eq!(
            state.sessions.protocol_version(&session_id).as_deref(),
            Some("2025-06-18")
        );
    }

    #[actix_web::test]
    async fn test_batch_body_yields_single_invalid_request() {
        let state = state().await;
        let app = app!(state);

        let batch = json!([
            { "jsonrpc": "2.0", "id": 1, "method": "ping" },
            { "jsonrpc": "2.0", "id": 2, "method": "ping" }
        ]);
        let resp = test::call_service(&app, post(batch).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert!(body.is_object());
        assert_eq!(body["error"]["code"], -32600);
        assert_eq!(body["id"], Value::Null);
        assert_eq!(state.sessions.session_count(), 0);
    }

    #[actix_web::test]
    async fn test_session_header_rules() {
        let state = state().await;
        let app = app!(state);
        let ping = json!({ "jsonrpc": "2.0", "id": 5, "method": "ping" });

        let resp = test::call_service(&app, post(ping.clone()).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            post(ping.clone())
                .insert_header((SESSION_ID_HEADER, "nope"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = test::call_service(&app, post(initialize_body(1)).to_request()).await;
        let session_id = resp.headers().get(SESSION_ID_HEADER).unwrap().clone();

        // Header omitted after negotiation is fine
        let resp = test::call_service(
            &app,
            post(ping.clone())
                .insert_header((SESSION_ID_HEADER, session_id.clone()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        // A different supported version is a mismatch
        let resp = test::call_service(
            &app,
            post(ping.clone())
                .insert_header((SESSION_ID_HEADER, session_id.clone()))
                .insert_header((PROTOCOL_VERSION_HEADER, "2025-03-26"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_unnegotiated_session_requires_version_header() {
        let state = state().await;
        let app = app!(state);
        state.sessions.create_session("raw");

        let resp = test::call_service(
            &app,
            post(json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
                .insert_header((SESSION_ID_HEADER, "raw"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/mcp")
                .insert_header((ACCEPT, "text/event-stream"))
                .insert_header((SESSION_ID_HEADER, "raw"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_unsupported_version_on_initialize() {
        let state = state().await;
        let app = app!(state);

        let resp = test::call_service(
            &app,
            post(initialize_body(1))
                .insert_header((PROTOCOL_VERSION_HEADER, "1999-01-01"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.sessions.session_count(), 0);
    }

    #[actix_web::test]
    async fn test_notifications_and_one_way_are_accepted() {
        let state = state().await;
        let app = app!(state);

        let resp = test::call_service(&app, post(initialize_body(1)).to_request()).await;
        let session_id = resp.headers().get(SESSION_ID_HEADER).unwrap().clone();

        let resp = test::call_service(
            &app,
            post(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
                .insert_header((SESSION_ID_HEADER, session_id.clone()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(state.sessions.is_initialized(session_id.to_str().unwrap()));

        let one_way = || post(json!({ "jsonrpc": "2.0", "id": "srv-1", "result": {} }));

        let resp = test::call_service(
            &app,
            one_way()
                .insert_header((SESSION_ID_HEADER, session_id.clone()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[actix_web::test]
    async fn test_one_way_message_requires_live_session() {
        let state = state().await;
        let app = app!(state);
        let one_way = || {
            post(json!({
                "jsonrpc": "2.0",
                "id": "srv-2",
                "error": { "code": -1, "message": "plugin refused" }
            }))
        };

        let resp = test::call_service(&app, one_way().to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body["error"]["code"],
            crate::mcp::errors::JsonRpcErrorCode::InvalidRequest as i32
        );

        let resp = test::call_service(
            &app,
            one_way()
                .insert_header((SESSION_ID_HEADER, "ghost"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.sessions.session_count(), 0);
    }

    #[actix_web::test]
    async fn test_stream_requires_event_stream_accept() {
        let state = state().await;
        let app = app!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/mcp").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/mcp")
                .insert_header((ACCEPT, "text/event-stream"))
                .insert_header((SESSION_ID_HEADER, "ghost"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_delete_closes_stream_and_removes_session() {
        let state = state().await;
        let app = app!(state);

        let resp = test::call_service(&app, post(initialize_body(1)).to_request()).await;
        let session_id = resp
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();

        let stream = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/mcp")
                .insert_header((ACCEPT, "text/event-stream"))
                .insert_header((SESSION_ID_HEADER, session_id.as_str()))
                .to_request(),
        )
        .await;
        assert_eq!(stream.status(), StatusCode::OK);
        let transport = state.sessions.transport(&session_id).unwrap();

        let resp = test::call_service(
            &app,
            test::TestRequest::delete()
                .uri("/mcp")
                .insert_header((SESSION_ID_HEADER, session_id.as_str()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(transport.is_closed());
        assert!(!state.sessions.contains(&session_id));

        // The event stream terminates once its transport is closed
        let mut body = stream.into_body().boxed();
        tokio::time::timeout(Duration::from_secs(1), async {
            while next_frame(&mut body).await.is_some() {}
        })
        .await
        .unwrap();

        let resp = test::call_service(
            &app,
            test::TestRequest::delete()
                .uri("/mcp")
                .insert_header((SESSION_ID_HEADER, session_id.as_str()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_health() {
        let state = state().await;
        let app = app!(state);

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 0);
        assert_eq!(body["pendingCommands"], 0);
    }

    #[actix_web::test]
    async fn test_command_round_trip_through_event_stream() {
        let state = state().await;
        let app = Rc::new(app!(state));

        // The editor plugin connects, initializes and opens its stream
        let resp = test::call_service(&*app, post(initialize_body(1)).to_request()).await;
        let plugin = resp
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        test::call_service(
            &*app,
            post(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
                .insert_header((SESSION_ID_HEADER, plugin.as_str()))
                .to_request(),
        )
        .await;

        let stream = test::call_service(
            &*app,
            test::TestRequest::get()
                .uri("/mcp")
                .insert_header((ACCEPT, "text/event-stream"))
                .insert_header((SESSION_ID_HEADER, plugin.as_str()))
                .to_request(),
        )
        .await;
        let mut events = stream.into_body().boxed();

        let resp = test::call_service(
            &*app,
            post(tool_call(
                2,
                "bridge_sync_snapshot",
                json!({ "sceneSummary": { "scene": "res://main.tscn" } }),
            ))
            .insert_header((SESSION_ID_HEADER, plugin.as_str()))
            .to_request(),
        )
        .await;
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["result"]["isError"], false);

        // An AI client asks the editor to run the project
        let resp = test::call_service(&*app, post(initialize_body(1)).to_request()).await;
        let client = resp
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();

        let run = {
            let app = app.clone();
            let client = client.clone();
            actix_web::rt::spawn(async move {
                let resp = test::call_service(
                    &*app,
                    post(tool_call(3, "run_project", json!({})))
                        .insert_header((SESSION_ID_HEADER, client.as_str()))
                        .to_request(),
                )
                .await;
                test::read_body_json::<Value, _>(resp).await
            })
        };

        let command_id = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let frame = next_frame(&mut events).await.expect("stream ended");
                if !frame.contains("bridge/command") {
                    continue;
                }
                let data = frame
                    .lines()
                    .find_map(|line| line.strip_prefix("data: "))
                    .unwrap();
                let message: Value = serde_json::from_str(data).unwrap();
                assert_eq!(message["params"]["command"], "run-project");
                return message["params"]["commandId"].as_str().unwrap().to_string();
            }
        })
        .await
        .unwrap();

        let resp = test::call_service(
            &*app,
            post(tool_call(
                4,
                "bridge_ack_command",
                json!({ "commandId": command_id, "success": true, "result": { "running": true } }),
            ))
            .insert_header((SESSION_ID_HEADER, plugin.as_str()))
            .to_request(),
        )
        .await;
        let ack: Value = test::read_body_json(resp).await;
        assert_eq!(ack["result"]["isError"], false);

        let result = run.await.unwrap();
        assert_eq!(result["result"]["isError"], false);
        assert_eq!(
            result["result"]["structuredContent"]["result"]["running"],
            true
        );
        assert_eq!(state.broker.pending_count(), 0);
    }
}
