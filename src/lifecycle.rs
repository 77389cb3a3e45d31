//! Start/stop control and the host-side tick.
//!
//! A [`Bridge`] owns the session token, the task queue and the listener. The
//! host calls [`Bridge::tick`] on its own thread; everything else may be called
//! from anywhere.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::host::Host;
use crate::queue::TaskQueue;
use crate::server::{HttpServer, Router};
use crate::store::Store;
use crate::token::Token;

pub struct Bridge<H> {
    config: BridgeConfig,
    token: Token,
    queue: Arc<TaskQueue<H>>,
    store: Store,
    server: Mutex<Option<HttpServer>>,
}

impl<H: Host> Bridge<H> {
    /// Creates a stopped bridge with a fresh session token.
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_token(config, Token::generate())
    }

    pub fn with_token(config: BridgeConfig, token: Token) -> Self {
        let store = Store::new(config.data_dir.clone());
        let queue = Arc::new(TaskQueue::new());
        queue.close();
        Self {
            config,
            token,
            queue,
            store,
            server: Mutex::new(None),
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<TaskQueue<H>> {
        &self.queue
    }

    fn slot(&self) -> MutexGuard<'_, Option<HttpServer>> {
        self.server.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Binds the listener. Starting a running bridge returns its current
    /// address. A failed bind leaves the bridge stopped.
    pub fn start(&self) -> Result<SocketAddr, BridgeError> {
        let mut slot = self.slot();
        if let Some(server) = slot.as_ref() {
            info!("bridge already running on {}", server.addr());
            return Ok(server.addr());
        }

        self.queue.reopen();
        let router = Arc::new(Router::new(
            Arc::clone(&self.queue),
            self.token.clone(),
            self.store.clone(),
            self.config.wait_timeout(),
        ));
        match HttpServer::spawn(&self.config.bind_addr(), router, self.config.max_body_bytes) {
            Ok(server) => {
                let addr = server.addr();
                info!(data_dir = %self.store.dir().display(), "bridge started on {addr}");
                *slot = Some(server);
                Ok(addr)
            }
            Err(err) => {
                self.queue.close();
                warn!("bridge not started: {err}");
                Err(err)
            }
        }
    }

    /// Stops accepting connections and drops queued tasks. Waiting handlers
    /// observe a disconnect. Returns `false` if the bridge was not running.
    pub fn stop(&self) -> bool {
        let Some(server) = self.slot().take() else {
            return false;
        };
        let addr = server.addr();
        server.shutdown();
        let dropped = self.queue.close();
        info!("bridge on {addr} stopped ({dropped} queued tasks dropped)");
        true
    }

    pub fn is_running(&self) -> bool {
        self.slot().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.slot().as_ref().map(HttpServer::addr)
    }

    /// One host tick: runs every task queued so far. Returns the delay until
    /// the next tick, or `None` once the bridge is stopped.
    pub fn tick(&self, host: &mut H) -> Option<Duration> {
        if !self.is_running() {
            return None;
        }
        let report = self.queue.drain(host);
        if report.executed > 0 {
            debug!(executed = report.executed, failed = report.failed, "drained host tasks");
        }
        Some(self.config.tick_interval())
    }

    /// Ticks on the calling thread until the bridge stops.
    pub fn run_host_loop(&self, host: &mut H) {
        while let Some(delay) = self.tick(host) {
            thread::sleep(delay);
        }
    }

    /// Client launch URL carrying the token and port as query parameters.
    pub fn launch_url(&self, client_url: &str) -> Result<String, BridgeError> {
        let port = self.local_addr().map_or(self.config.port, |addr| addr.port());
        let mut url = Url::parse(client_url)
            .map_err(|e| BridgeError::Config(format!("invalid client url {client_url}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("token", self.token.as_str())
            .append_pair("port", &port.to_string());
        Ok(url.into())
    }
}
