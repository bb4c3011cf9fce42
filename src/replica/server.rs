//! Replica server

use crate::common::message::registration_ack;
use crate::common::{
    net, Backoff, Error, KvMessage, KvStore, MemStore, ReplicaConfig, Result, WorkerPool,
};
use crate::replica::handler::{handle_connection, PhaseHandler};
use crate::replica::kvserver::KvServer;
use crate::replica::log::RecoveryLog;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const REGISTER_RETRY_INITIAL: Duration = Duration::from_millis(200);
const REGISTER_RETRY_MAX: Duration = Duration::from_secs(5);

pub struct ReplicaServer {
    config: ReplicaConfig,
    handler: Arc<PhaseHandler>,
    listener: TcpListener,
}

impl ReplicaServer {
    /// Rebuild local state from the recovery log and bind the listener.
    pub async fn bind(config: ReplicaConfig) -> Result<Self> {
        config.validate()?;

        let store = open_store(&config)?;
        let log = RecoveryLog::open(&config.log_path, &*store)?;
        let server = Arc::new(KvServer::new(&config.cache, store));
        let listener = TcpListener::bind(config.bind_addr).await?;

        Ok(Self {
            config,
            handler: Arc::new(PhaseHandler::new(server, log)),
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Registration string, `<id>@<host>:<port>`, using the bound port.
    pub fn info(&self) -> Result<String> {
        Ok(format!(
            "{}@{}:{}",
            self.config.id,
            self.config.advertised_host(),
            self.local_addr()?.port()
        ))
    }

    pub fn handler(&self) -> Arc<PhaseHandler> {
        self.handler.clone()
    }

    /// Register with the coordinator (in the background, retrying until
    /// acknowledged) and serve coordinator connections.
    pub async fn serve(self) -> Result<()> {
        let info = self.info()?;
        tracing::info!("Starting replica {}", info);
        tracing::info!("  Listening on: {}", self.local_addr()?);
        tracing::info!("  Coordinator: {}", self.config.coordinator);
        tracing::info!("  Log path: {}", self.config.log_path.display());

        let registration = tokio::spawn(register_until_acknowledged(
            self.config.coordinator.clone(),
            info,
            self.config.timeout(),
        ));

        let pool = WorkerPool::new("replica", self.config.workers);
        let res = accept_loop(&self.listener, &pool, &self.handler, self.config.timeout()).await;

        registration.abort();
        tracing::error!("Replica listener error: {:?}", res);
        Ok(res?)
    }
}

fn open_store(config: &ReplicaConfig) -> Result<Arc<dyn KvStore>> {
    match &config.store_path {
        None => Ok(Arc::new(MemStore::new())),
        #[cfg(feature = "sled-backend")]
        Some(path) => Ok(Arc::new(crate::common::storage::SledStore::open(path)?)),
        #[cfg(not(feature = "sled-backend"))]
        Some(path) => Err(Error::InvalidConfig(format!(
            "store_path {} requires the sled-backend feature",
            path.display()
        ))),
    }
}

/// One registration attempt; succeeds only on the coordinator's
/// acknowledgement of exactly `info`.
pub async fn register_once(coordinator: &str, info: &str, timeout: Duration) -> Result<()> {
    let reply = net::exchange(coordinator, &KvMessage::register(info), timeout).await?;
    match reply.message {
        Some(text) if text == registration_ack(info) => Ok(()),
        Some(text) => Err(Error::Aborted(text)),
        None => Err(Error::InvalidFormat),
    }
}

async fn register_until_acknowledged(coordinator: String, info: String, timeout: Duration) {
    let mut backoff = Backoff::new(REGISTER_RETRY_INITIAL, REGISTER_RETRY_MAX);
    loop {
        match register_once(&coordinator, &info, timeout).await {
            Ok(()) => {
                tracing::info!("✓ Registered with coordinator {} as {}", coordinator, info);
                return;
            }
            Err(e) => {
                tracing::warn!("Registration with {} failed: {}", coordinator, e);
                backoff.wait().await;
            }
        }
    }
}

async fn accept_loop(
    listener: &TcpListener,
    pool: &WorkerPool,
    handler: &Arc<PhaseHandler>,
    timeout: Duration,
) -> std::io::Result<()> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let handler = handler.clone();
        pool.submit(async move {
            if let Err(e) = handle_connection(&handler, &mut stream, timeout).await {
                tracing::warn!("Coordinator connection {} dropped: {}", peer, e);
            }
        });
    }
}
