//! Loopback HTTP control surface.
//!
//! Requests arrive on a `tiny_http` accept thread and each one is handled on
//! its own thread. Handlers never touch the host. Anything host-related or
//! persistent goes through the [`TaskQueue`] and waits for the host tick to run it.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, WaitError};
use crate::exec::{ExecOutcome, execute};
use crate::host::Host;
use crate::inspect::{InspectReport, ScreenshotReport, capture_screenshot, inspect_active};
use crate::queue::TaskQueue;
use crate::store::{Store, ToolDefinition};
use crate::token::Token;

pub const TOKEN_HEADER: &str = "X-Bridge-Token";
pub const ALLOWED_METHODS: &str = "POST, GET, PUT, DELETE, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type, X-Bridge-Token";

pub fn liveness_message() -> String {
    format!("Host Bridge Online v{}", env!("CARGO_PKG_VERSION"))
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Text,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub kind: ContentKind,
    pub body: String,
    pub preflight: bool,
}

impl Reply {
    pub fn raw_json(status: u16, body: String) -> Self {
        Self { status, kind: ContentKind::Json, body, preflight: false }
    }

    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self::raw_json(status, body),
            Err(err) => {
                warn!("encode response failed: {err}");
                Self::raw_json(500, json!({ "error": "failed to encode response" }).to_string())
            }
        }
    }

    pub fn text(status: u16, body: String) -> Self {
        Self { status, kind: ContentKind::Text, body, preflight: false }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::raw_json(status, json!({ "error": message.into() }).to_string())
    }

    pub fn success(ok: bool) -> Self {
        Self::raw_json(200, json!({ "success": ok }).to_string())
    }

    pub fn preflight() -> Self {
        Self { status: 200, kind: ContentKind::Empty, body: String::new(), preflight: true }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub token: Option<String>,
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct DeleteToolRequest {
    trigger: String,
}

/// Path component of a request target, without query or fragment.
/// The path is matched verbatim: no dot-segment or authority handling.
pub fn route_path(raw: &str) -> String {
    raw.split(['?', '#']).next().unwrap_or(raw).to_string()
}

// ── Routing ─────────────────────────────────────────────────────────────

pub struct Router<H> {
    queue: Arc<TaskQueue<H>>,
    token: Token,
    store: Store,
    wait_timeout: Duration,
}

impl<H: Host> Router<H> {
    pub fn new(queue: Arc<TaskQueue<H>>, token: Token, store: Store, wait_timeout: Duration) -> Self {
        Self { queue, token, store, wait_timeout }
    }

    /// Answers preflights and rejects bad credentials before any body is read
    /// or any task is queued. `None` means the request may proceed.
    pub fn gate(&self, method: &Method, token: Option<&str>) -> Option<Reply> {
        if *method == Method::Options {
            return Some(Reply::preflight());
        }
        if !self.token.matches(token) {
            return Some(Reply::error(401, "Invalid or missing token"));
        }
        None
    }

    pub fn handle(&self, req: &ApiRequest) -> Reply {
        if let Some(reply) = self.gate(&req.method, req.token.as_deref()) {
            return reply;
        }
        let path = route_path(&req.path);
        match (&req.method, path.as_str()) {
            (Method::Get, "/") => Reply::text(200, liveness_message()),
            (Method::Get, "/history") => self.get_history(),
            (Method::Get, "/inspect") => self.get_inspect(),
            (Method::Get, "/screenshot") => self.get_screenshot(),
            (Method::Get, "/memory") => self.get_memory(),
            (Method::Get, "/tools") => self.get_tools(),
            (Method::Post, "/execute") => self.post_execute(&req.body),
            (Method::Post, "/history") => self.post_history(req.body.clone()),
            (Method::Post, "/memory") => self.post_memory(req.body.clone()),
            (Method::Post, "/tools") => self.post_tools(&req.body),
            (Method::Put, "/memory") => self.put_memory(req.body.clone()),
            (Method::Delete, "/tools") => self.delete_tools(&req.body),
            (Method::Get | Method::Post | Method::Put | Method::Delete, _) => {
                Reply::error(404, format!("not found: {path}"))
            }
            _ => Reply::error(405, "method not allowed"),
        }
    }

    fn run<T, F>(&self, what: &str, task: F) -> Result<T, WaitError>
    where
        T: Send + 'static,
        F: FnOnce(&mut H) -> T + Send + 'static,
    {
        let result = self.queue.submit_and_wait(task, self.wait_timeout);
        if let Err(err) = &result {
            warn!("{what}: {err}");
        }
        result
    }

    fn write<F>(&self, what: &str, task: F) -> Reply
    where
        F: FnOnce(&Store) -> bool + Send + 'static,
    {
        let store = self.store.clone();
        let ok = self.run(what, move |_: &mut H| task(&store)).unwrap_or(false);
        Reply::success(ok)
    }

    fn get_history(&self) -> Reply {
        let store = self.store.clone();
        match self.run("read history", move |_: &mut H| store.read_history()) {
            Ok(text) => Reply::raw_json(200, text),
            Err(_) => Reply::raw_json(200, "null".to_string()),
        }
    }

    fn get_inspect(&self) -> Reply {
        inspect_reply(self.run("inspect", |host: &mut H| inspect_active(host)))
    }

    fn get_screenshot(&self) -> Reply {
        let report = self
            .run("screenshot", |host: &mut H| capture_screenshot(host))
            .unwrap_or_else(|_| ScreenshotReport::empty());
        Reply::json(200, &report)
    }

    fn get_memory(&self) -> Reply {
        let store = self.store.clone();
        let text = self
            .run("read memory", move |_: &mut H| store.read_memory())
            .unwrap_or_default();
        Reply::text(200, text)
    }

    fn get_tools(&self) -> Reply {
        let store = self.store.clone();
        let tools = self
            .run("read tools", move |_: &mut H| store.visible_tools())
            .unwrap_or_default();
        Reply::json(200, &tools)
    }

    fn post_execute(&self, body: &str) -> Reply {
        let request: ExecuteRequest = match serde_json::from_str(body) {
            Ok(r) => r,
            Err(err) => return Reply::error(400, format!("Invalid request: {err}")),
        };
        let code = request.code;
        let outcome = match self.run("execute", move |host: &mut H| execute(host, &code)) {
            Ok(outcome) => outcome,
            Err(WaitError::Timeout) => ExecOutcome::timed_out(),
            Err(err) => ExecOutcome {
                success: false,
                stdout: String::new(),
                stderr: err.to_string(),
            },
        };
        Reply::json(200, &outcome)
    }

    fn post_history(&self, body: String) -> Reply {
        self.write("write history", move |store| store.write_history(&body))
    }

    fn post_memory(&self, body: String) -> Reply {
        self.write("append memory", move |store| store.append_memory(&body))
    }

    fn put_memory(&self, body: String) -> Reply {
        self.write("overwrite memory", move |store| store.overwrite_memory(&body))
    }

    fn post_tools(&self, body: &str) -> Reply {
        let tool = match ToolDefinition::from_json(body) {
            Ok(tool) => tool,
            Err(err) => return Reply::error(400, format!("Invalid tool definition: {err}")),
        };
        self.write("upsert tool", move |store| store.upsert_tool(&tool))
    }

    fn delete_tools(&self, body: &str) -> Reply {
        let request: DeleteToolRequest = match serde_json::from_str(body) {
            Ok(r) => r,
            Err(err) => return Reply::error(400, format!("Invalid delete request: {err}")),
        };
        self.write("delete tool", move |store| store.delete_tool(&request.trigger))
    }
}

fn inspect_reply(result: Result<InspectReport, WaitError>) -> Reply {
    match result {
        Ok(report) => Reply::json(200, &report),
        Err(WaitError::TaskFailed(msg)) => Reply::error(200, msg),
        Err(_) => Reply::raw_json(200, "null".to_string()),
    }
}

// ── tiny_http glue ──────────────────────────────────────────────────────

fn header(name: &str, value: &str) -> Option<Header> {
    let parsed = Header::from_bytes(name, value);
    if parsed.is_err() {
        warn!("invalid response header {name}: {value}");
    }
    parsed.ok()
}

fn header_value(request: &Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_string())
}

fn read_body(request: &mut Request, limit: usize) -> Result<String, Reply> {
    if request.body_length().is_some_and(|len| len > limit) {
        return Err(Reply::error(413, "request body too large"));
    }
    let mut buf = Vec::new();
    request
        .as_reader()
        .take(limit as u64 + 1)
        .read_to_end(&mut buf)
        .map_err(|e| Reply::error(400, format!("read body: {e}")))?;
    if buf.len() > limit {
        return Err(Reply::error(413, "request body too large"));
    }
    String::from_utf8(buf).map_err(|_| Reply::error(400, "request body is not UTF-8"))
}

fn respond(request: Request, reply: Reply) {
    let mut response = Response::from_data(reply.body.into_bytes()).with_status_code(reply.status);
    let mut headers = vec![header("Access-Control-Allow-Origin", "*")];
    match reply.kind {
        ContentKind::Json => headers.push(header("Content-Type", "application/json")),
        ContentKind::Text => headers.push(header("Content-Type", "text/plain; charset=utf-8")),
        ContentKind::Empty => {}
    }
    if reply.preflight {
        headers.push(header("Access-Control-Allow-Methods", ALLOWED_METHODS));
        headers.push(header("Access-Control-Allow-Headers", ALLOWED_HEADERS));
    }
    for h in headers.into_iter().flatten() {
        response.add_header(h);
    }
    if let Err(err) = request.respond(response) {
        debug!("client went away before the response was sent: {err}");
    }
}

fn serve_request<H: Host>(router: &Router<H>, mut request: Request, max_body: usize) {
    let method = request.method().clone();
    let path = request.url().to_string();
    let token = header_value(&request, TOKEN_HEADER);

    if let Some(reply) = router.gate(&method, token.as_deref()) {
        if reply.status == 401 {
            debug!("rejected {method} {path}: bad token");
        }
        respond(request, reply);
        return;
    }
    let body = match read_body(&mut request, max_body) {
        Ok(body) => body,
        Err(reply) => {
            respond(request, reply);
            return;
        }
    };
    let reply = router.handle(&ApiRequest { method, path, token, body });
    respond(request, reply);
}

/// A running listener. Dropping it stops accepting and closes the socket.
pub struct HttpServer {
    server: Arc<Server>,
    accept: Option<JoinHandle<()>>,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn spawn<H: Host>(addr: &str, router: Arc<Router<H>>, max_body: usize) -> Result<Self, BridgeError> {
        let server = Server::http(addr).map_err(|e| BridgeError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        let local = server.server_addr().to_ip().ok_or_else(|| BridgeError::Bind {
            addr: addr.to_string(),
            reason: "listener has no IP address".to_string(),
        })?;
        let server = Arc::new(server);
        let listener = Arc::clone(&server);
        let accept = thread::Builder::new()
            .name("bridge-accept".to_string())
            .spawn(move || {
                for request in listener.incoming_requests() {
                    let router = Arc::clone(&router);
                    thread::spawn(move || serve_request(&router, request, max_body));
                }
                debug!("accept loop finished");
            })
            .map_err(|e| BridgeError::Bind {
                addr: addr.to_string(),
                reason: format!("spawn accept thread: {e}"),
            })?;
        info!("bridge listening on http://{local}");
        Ok(Self { server, accept: Some(accept), addr: local })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(mut self) {
        self.stop_accepting();
    }

    fn stop_accepting(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.accept.take() {
            if handle.join().is_err() {
                warn!("accept thread panicked");
            }
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop_accepting();
    }
}
