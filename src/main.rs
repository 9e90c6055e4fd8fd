use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use clap::error::ErrorKind;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sales_api::config::{BUILD, Config, LogConfig};
use sales_api::expvar::Expvar;
use sales_api::{Server, SignalWatcher, debug, handlers, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = match Config::try_parse() {
        Ok(cfg) => cfg,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            logging::init(&LogConfig::default());
            error!(error = %e, "parsing config");
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    logging::init(&cfg.log);

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "service stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let workers = tokio::runtime::Handle::current().metrics().num_workers();
    info!(build = BUILD, workers, "startup");

    // Hooks go in before anything else starts so an early signal is not lost.
    let mut watcher = SignalWatcher::install().context("installing signal handlers")?;

    info!(status = "starting service", build = BUILD, "startup");
    info!(config = %cfg, "startup config");

    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder not installed");
            None
        }
    };

    let build: Arc<str> = Arc::from(BUILD);
    let vars = Arc::new(Expvar::new());
    let server_config = cfg.web.server();
    let token = CancellationToken::new();

    // Debug listener. Its failures are logged by the task itself.
    let debug_app = debug::mux(debug::DebugMuxConfig {
        build: Arc::clone(&build),
        shutdown: watcher.handle(),
        vars: Arc::clone(&vars),
        prometheus,
        write_timeout: cfg.web.write_timeout,
    })
    .context("building debug routes")?;
    let debug_task = debug::spawn(cfg.web.debug_host, debug_app, server_config, token.clone());

    // API listener.
    let api_app = handlers::api_mux(handlers::ApiMuxConfig {
        shutdown: watcher.handle(),
        vars,
        write_timeout: cfg.web.write_timeout,
    })
    .context("building api routes")?;
    let server = Server::bind(cfg.web.api_host, server_config)
        .await
        .with_context(|| format!("binding api host {}", cfg.web.api_host))?;
    info!(status = "api router started", host = %server.local_addr()?, "startup");

    let mut api_task = tokio::spawn(server.serve(api_app, token.clone()));

    let signal = tokio::select! {
        res = &mut api_task => {
            token.cancel();
            join_debug(debug_task).await;
            res.context("api server task")?.context("server error")?;
            anyhow::bail!("api server stopped unexpectedly");
        }
        signal = watcher.recv() => signal,
    };

    info!(status = "shutdown started", %signal, "shutdown");
    token.cancel();

    // Only an operator can cut the drain short; more app requests are ignored.
    let drained = tokio::select! {
        res = &mut api_task => res
            .context("api server task")
            .and_then(|res| res.context("could not stop server gracefully")),
        signal = watcher.recv_external() => {
            api_task.abort();
            debug_task.abort();
            Err(anyhow::anyhow!("{signal} received during shutdown, forcing exit"))
        }
    };
    join_debug(debug_task).await;

    info!(status = "shutdown complete", "shutdown");
    drained
}

async fn join_debug(task: JoinHandle<()>) {
    match task.await {
        Err(e) if e.is_panic() => warn!(error = %e, "debug router task panicked"),
        _ => {}
    }
}
