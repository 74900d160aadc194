//! # Serveur HTTP d'OndeRadio
//!
//! Enveloppe mince autour d'Axum : montage de routers fournis par les crates
//! métier, écoute sur l'adresse configurée et arrêt gracieux sur Ctrl+C.
//!
//! ```no_run
//! use ondeserver::Server;
//!
//! # async fn example(router: axum::Router) -> anyhow::Result<()> {
//! let mut server = Server::new_configured("OndeRadio");
//! server.mount("/queue", router);
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use ondeconfig::get_config;
use tokio::signal;
use tracing::info;

/// Serveur principal.
pub struct Server {
    name: String,
    bind: String,
    http_port: u16,
    router: Router,
}

impl Server {
    /// Crée un serveur sur une adresse et un port explicites.
    pub fn new(name: impl Into<String>, bind: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            bind: bind.into(),
            http_port,
            router: Router::new(),
        }
    }

    /// Crée un serveur à partir de la configuration globale.
    pub fn new_configured(name: impl Into<String>) -> Self {
        let config = get_config();
        Self::new(name, config.get_bind_address(), config.get_http_port())
    }

    /// Monte un router sous un préfixe de chemin.
    pub fn mount(&mut self, path: &str, router: Router) {
        self.router = std::mem::take(&mut self.router).nest(path, router);
    }

    /// Fusionne un router à la racine.
    pub fn merge(&mut self, router: Router) {
        self.router = std::mem::take(&mut self.router).merge(router);
    }

    /// Écoute et sert jusqu'à Ctrl+C.
    pub async fn serve(self) -> Result<()> {
        let address: SocketAddr = format!("{}:{}", self.bind, self.http_port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.bind, self.http_port))?;

        let listener = tokio::net::TcpListener::bind(address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;

        info!("{} listening on http://{}", self.name, address);
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("http server terminated abnormally")?;

        info!("{} stopped", self.name);
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("failed to listen for the shutdown signal: {e}");
        return;
    }
    info!("shutdown signal received");
}
