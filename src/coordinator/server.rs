//! Coordinator server

use crate::common::{CoordinatorConfig, Result, WorkerPool};
use crate::coordinator::handler::{handle_client, handle_registration};
use crate::coordinator::ring::ReplicaRing;
use crate::coordinator::tpc::TpcMaster;
use crate::coordinator::transport::TcpTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct Coordinator {
    config: CoordinatorConfig,
    master: Arc<TpcMaster<TcpTransport>>,
    client_listener: TcpListener,
    register_listener: TcpListener,
}

impl Coordinator {
    /// Bind both listeners. Ports of 0 pick free ports; see [`Self::client_addr`].
    pub async fn bind(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;

        let ring = Arc::new(ReplicaRing::new(config.replicas));
        let master = Arc::new(TpcMaster::new(&config, ring, TcpTransport));

        let client_listener = TcpListener::bind(config.client_addr).await?;
        let register_listener = TcpListener::bind(config.register_addr).await?;

        Ok(Self {
            config,
            master,
            client_listener,
            register_listener,
        })
    }

    pub fn client_addr(&self) -> Result<SocketAddr> {
        Ok(self.client_listener.local_addr()?)
    }

    pub fn register_addr(&self) -> Result<SocketAddr> {
        Ok(self.register_listener.local_addr()?)
    }

    pub fn master(&self) -> Arc<TpcMaster<TcpTransport>> {
        self.master.clone()
    }

    /// Accept clients and replicas until either listener fails.
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting coordinator");
        tracing::info!("  Client API: {}", self.client_addr()?);
        tracing::info!("  Registration: {}", self.register_addr()?);
        tracing::info!("  Replicas: {}", self.config.replicas);
        tracing::info!(
            "  Cache: {} sets x {} entries",
            self.config.cache.num_sets,
            self.config.cache.max_elems_per_set
        );

        let client_pool = WorkerPool::new("client", self.config.workers);
        let register_pool = WorkerPool::new("register", self.config.workers);
        let timeout = self.config.timeout();

        let clients = accept_clients(&self.client_listener, &client_pool, &self.master, timeout);
        let registrations = accept_registrations(
            &self.register_listener,
            &register_pool,
            self.master.ring(),
            timeout,
        );

        tracing::info!("✓ Coordinator ready");

        let res = tokio::select! {
            res = clients => res,
            res = registrations => res,
        };

        if let Err(e) = &res {
            tracing::error!("Coordinator listener error: {}", e);
        }
        Ok(res?)
    }
}

async fn accept_clients(
    listener: &TcpListener,
    pool: &WorkerPool,
    master: &Arc<TpcMaster<TcpTransport>>,
    timeout: Duration,
) -> std::io::Result<()> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let master = master.clone();
        pool.submit(async move {
            if let Err(e) = handle_client(&master, &mut stream, timeout).await {
                tracing::warn!("Client {} dropped: {}", peer, e);
            }
        });
    }
}

async fn accept_registrations(
    listener: &TcpListener,
    pool: &WorkerPool,
    ring: &Arc<ReplicaRing>,
    timeout: Duration,
) -> std::io::Result<()> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let ring = ring.clone();
        pool.submit(async move {
            if let Err(e) = handle_registration(&ring, &mut stream, timeout).await {
                tracing::warn!("Registration from {} dropped: {}", peer, e);
            }
        });
    }
}
