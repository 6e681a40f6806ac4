//! Gated HTTP service
//!
//! Every request goes through the startup gate first. Allow-listed admin
//! endpoints answer during an upgrade; everything else gets the deferred
//! response until the upgrade completes.

use may_minihttp::{HttpServer, HttpService, Request, Response};
use moduleguard::{GateDecision, StartupGate};
use std::io;
use std::sync::Arc;

const JSON: &str = "Content-Type: application/json";
const TEXT: &str = "Content-Type: text/plain; charset=utf-8";

/// A rendered HTTP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub reason: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    fn text(status: u16, reason: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            content_type: TEXT,
            body: body.into(),
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        404 => "Not Found",
        409 => "Conflict",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

/// Route one request path through the gate
pub fn route(gate: &StartupGate, path: &str) -> Reply {
    if let GateDecision::Defer(deferred) = gate.admit(path) {
        return Reply::text(deferred.status, reason(deferred.status), deferred.message);
    }

    let path_only = path.split('?').next().unwrap_or(path);
    match path_only {
        "/admin/status" => match gate.guard().status().to_json() {
            Ok(body) => Reply {
                status: 200,
                reason: "OK",
                content_type: JSON,
                body,
            },
            Err(e) => Reply::text(500, reason(500), e.to_string()),
        },
        "/admin/upgrade" => match gate.guard().start_background_upgrade() {
            Ok(Some(_job)) => Reply::text(202, reason(202), "Upgrade started"),
            Ok(None) => Reply::text(
                409,
                reason(409),
                format!("No upgrade to start ({})", gate.guard().upgrade_state()),
            ),
            Err(e) => Reply::text(500, reason(500), e.to_string()),
        },
        "/metrics" => Reply::text(200, "OK", moduleguard::metrics::render()),
        _ => Reply::text(404, reason(404), "Not Found"),
    }
}

#[derive(Clone)]
pub struct GateService {
    gate: Arc<StartupGate>,
}

impl GateService {
    pub fn new(gate: Arc<StartupGate>) -> Self {
        Self { gate }
    }
}

impl HttpService for GateService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let reply = route(&self.gate, req.path());
        res.status_code(usize::from(reply.status), reply.reason);
        res.header(reply.content_type);
        res.body_vec(reply.body.into_bytes());
        Ok(())
    }
}

/// Serve until the server stops
///
/// # Errors
///
/// Returns an I/O error if the listener cannot be bound or the server fails.
pub fn serve(gate: Arc<StartupGate>, addr: &str) -> io::Result<()> {
    let server = HttpServer(GateService::new(gate)).start(addr)?;
    log::info!("Listening on http://{}", addr);
    server
        .join()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("server stopped: {e:?}")))
}
