//! Relay Server
//!
//! Binds the listener, starts the audio ticker and serves the router until
//! the shutdown future resolves.

use crate::{
    config::Config,
    responder::Responder,
    router::create_router,
    state::AppState,
    ws::ticker::run_audio_ticker,
};
use anyhow::{Context, Result};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

pub struct Relay {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Relay {
    /// Binds `config.bind_address`. Port `0` picks an ephemeral port; see
    /// [`Relay::local_addr`].
    pub async fn bind(config: Config, responder: Arc<dyn Responder>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_address))?;
        Ok(Self {
            listener,
            state: Arc::new(AppState::new(config, responder)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Serves clients until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let ticker = tokio::spawn(run_audio_ticker(self.state.clone()));
        let app = create_router(self.state);

        info!(%addr, "Relay listening on ws://{addr}");
        let served = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        ticker.abort();
        served.context("Relay server failed")?;
        info!("Relay has shut down.");
        Ok(())
    }
}
