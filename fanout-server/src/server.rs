use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{bot::BotDispatcher, config::ServerConfig, router::MessageRouter, transport};

pub struct Server {
    listener: TcpListener,
    router: Arc<MessageRouter>,
    config: ServerConfig,
}

impl Server {
    /// Server with the built-in bot commands.
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self::with_commands(listener, config, BotDispatcher::with_builtin_commands())
    }

    pub fn with_commands(listener: TcpListener, config: ServerConfig, bots: BotDispatcher) -> Self {
        Self {
            listener,
            router: Arc::new(MessageRouter::new(bots)),
            config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn router(&self) -> Arc<MessageRouter> {
        Arc::clone(&self.router)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            router,
            config,
        } = self;

        let app = transport::routes(Arc::clone(&router), &config.path, config.outbound_buffer)
            .layer(TraceLayer::new_for_http());

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                router.announce_shutdown();
            })
            .await?;

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}
