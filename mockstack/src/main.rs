//! MockStack - a cloud service fleet behind a single endpoint
//!
//! The gateway authenticates-by-parsing, resolves the target service from
//! the credential header and dispatches to the registered backend. The
//! queueing service is fully implemented; the other known services answer
//! with routing stubs.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mockstack_gateway::{GatewaySession, RoutingTable, SessionConfig, StubHandler};
use mockstack_sqs::{
    MemoryMessageStore, MemoryQueueStore, MessageEngine, MessageReaper, QueueEngine, SqsHandler,
};

#[derive(Parser, Debug)]
#[command(name = "mockstack")]
#[command(about = "Cloud service fleet emulator behind a single endpoint", long_about = None)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "MOCKSTACK_PORT")]
    port: Option<u16>,

    /// Host to bind to (overrides the config file)
    #[arg(long, env = "MOCKSTACK_HOST")]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MOCKSTACK_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = config::Config::load().context("loading configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mockstack={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Shared stores; the engines are their only mutators.
    let queue_store = Arc::new(MemoryQueueStore::new());
    let message_store = Arc::new(MemoryMessageStore::new());
    let queue_engine = Arc::new(QueueEngine::new(queue_store.clone(), message_store.clone()));
    let message_engine = Arc::new(MessageEngine::new(queue_store.clone(), message_store));

    // One routing entry per emulated service; known-but-unimplemented
    // services answer 501 instead of failing routing.
    let mut routes = RoutingTable::builder();
    if config.services.sqs {
        routes = routes.register(
            "sqs",
            Arc::new(SqsHandler::new(queue_engine, message_engine.clone())),
        );
    }
    if config.services.s3 {
        routes = routes.register("s3", Arc::new(StubHandler::new("s3")));
    }
    if config.services.dynamodb {
        routes = routes.register("dynamodb", Arc::new(StubHandler::new("dynamodb")));
    }
    if config.services.lambda {
        routes = routes.register("lambda", Arc::new(StubHandler::new("lambda")));
    }
    if config.services.cognito {
        routes = routes.register("cognito-idp", Arc::new(StubHandler::new("cognito-idp")));
    }
    let routes = Arc::new(routes.build());

    info!(services = ?routes.service_names(), "starting MockStack");

    let reaper = Arc::new(MessageReaper::new(
        queue_store,
        message_engine,
        Duration::from_secs(config.sqs.reap_interval_secs),
    ));
    let reaper_task = reaper.spawn();

    let session_config = SessionConfig {
        max_body_bytes: config.server.max_body_bytes,
        pipeline_depth: config.server.pipeline_depth,
    };

    let host = args.host.unwrap_or(config.server.host);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address: {host}:{port}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!("Listening on http://{addr}");

    serve(listener, routes, session_config).await;

    reaper_task.abort();
    info!("MockStack stopped");
    Ok(())
}

/// Accept loop: one session task per connection, until ctrl-c
async fn serve(listener: TcpListener, routes: Arc<RoutingTable>, config: SessionConfig) {
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                debug!(peer = %peer_addr, "accepted connection");
                let session = GatewaySession::new(routes.clone(), config.clone());
                tokio::spawn(async move {
                    session.run(stream).await;
                });
            }

            () = &mut shutdown => break,
        }
    }
}
