// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use eventbus::{
    bus::EventBus,
    channel::dial,
    configs::{Configs, LOG_ENV_VAR},
    connection::{Connection, QoS},
    exchange::ExchangeType,
    handlers::HandlerRegistry,
    proto::events_service_server::EventsServiceServer,
    router::EventRouter,
    service::EventBusServer,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::Notify;
use tonic::transport::Server;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cfg = Configs::load()?;
    let addr: SocketAddr = cfg.server.addr().parse()?;

    let amqp = dial(&cfg).await?;
    amqp.on_error(|err| {
        error!(error = err.to_string(), "amqp connection lost");
        std::process::exit(1);
    });

    let conn = Connection::new(amqp, QoS::from(&cfg.rabbitmq)).await?;
    info!(prefetch = conn.qos().prefetch_count, "amqp channel ready");

    let bus = EventBus::with_reserved(
        conn.clone(),
        &cfg.rabbitmq.exchange,
        ExchangeType::Default,
        &[cfg.rabbitmq.router_queue.as_str()],
    )
    .await?;

    let registry = HandlerRegistry::<()>::new();
    if registry.is_empty() {
        warn!(queue = cfg.rabbitmq.router_queue.as_str(), "no handlers registered, work queue events are dropped");
    }

    let stop = Arc::new(Notify::new());
    let router = EventRouter::new(bus.clone(), Arc::new(registry), Arc::new(()), &cfg.rabbitmq.router_queue);
    let router_task = tokio::spawn({
        let stop = stop.clone();
        async move { router.run(async move { stop.notified().await }).await }
    });

    info!(addr = addr.to_string(), exchange = cfg.rabbitmq.exchange.as_str(), "serving events");

    Server::builder()
        .add_service(EventsServiceServer::new(EventBusServer::new(bus.clone())))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    stop.notify_one();
    if let Err(err) = router_task.await {
        error!(error = err.to_string(), "router task panicked");
    }

    bus.shutdown().await;
    conn.close().await?;

    Ok(())
}
