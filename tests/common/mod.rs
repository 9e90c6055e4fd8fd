//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use sales_api::{App, Error, Server, ServerConfig, SignalWatcher, handlers};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A server running on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub token: CancellationToken,
    pub task: JoinHandle<Result<(), Error>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Cancels the server and waits for the drain to finish.
    pub async fn stop(self) -> Result<(), Error> {
        self.token.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

pub async fn spawn(app: App, config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = Server::from_listener(listener, config);
    let addr = server.local_addr().unwrap();
    let token = CancellationToken::new();
    let task = tokio::spawn(server.serve(app, token.clone()));
    TestServer { addr, token, task }
}

/// The production API routes, with a watcher that has no OS hooks.
pub fn api(watcher: &SignalWatcher) -> App {
    handlers::api_mux(handlers::ApiMuxConfig {
        shutdown: watcher.handle(),
        vars: Default::default(),
        write_timeout: Duration::from_secs(10),
    })
    .unwrap()
}
