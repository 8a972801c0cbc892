//! Main gateway role
//!
//! The main node accepts subordinate connections on the management port and
//! serves read-only status routes on the application port.

pub mod connections;
pub mod handler;
pub mod manager;
pub(crate) mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use gateway_core::{GatewayConfig, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub use connections::{ConnectionHandle, ConnectionId};
pub use handler::ManagementState;
pub use manager::{DispatchOutcome, FrameOutcome, MainHub, TaskRequest};

use crate::status::StatusCell;
use handler::management_ws_handler;

const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Listeners of a started main node
pub struct MainNode {
    hub: Arc<MainHub>,
    management_addr: SocketAddr,
    application_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    servers: Vec<JoinHandle<()>>,
}

impl MainNode {
    /// Bind both listeners and start serving. Nothing is spawned when a bind
    /// fails.
    pub(crate) async fn start(
        config: &GatewayConfig,
        hub: Arc<MainHub>,
        status: Arc<StatusCell>,
    ) -> Result<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let management = Router::new()
            .route("/", get(management_ws_handler))
            .route("/ws", get(management_ws_handler))
            .with_state(ManagementState {
                hub: Arc::clone(&hub),
                shutdown: shutdown_rx.clone(),
            });
        let application = routes::router(Arc::clone(&hub), status);

        let management_port = config.management_port();
        let mut servers = Vec::with_capacity(2);
        let (management_addr, application_addr) = if management_port == config.port
            && config.port != 0
        {
            let listener = bind(config.port).await?;
            let addr = listener.local_addr()?;
            info!("Management and application endpoints listening on {}", addr);
            servers.push(serve(
                listener,
                management.merge(application),
                shutdown_rx,
            ));
            (addr, addr)
        } else {
            let management_listener = bind(management_port).await?;
            let application_listener = bind(config.port).await?;
            let management_addr = management_listener.local_addr()?;
            let application_addr = application_listener.local_addr()?;
            info!("Management endpoint listening on {}", management_addr);
            info!("Application endpoint listening on {}", application_addr);
            servers.push(serve(management_listener, management, shutdown_rx.clone()));
            servers.push(serve(application_listener, application, shutdown_rx));
            (management_addr, application_addr)
        };

        Ok(Self {
            hub,
            management_addr,
            application_addr,
            shutdown,
            servers,
        })
    }

    pub fn management_addr(&self) -> SocketAddr {
        self.management_addr
    }

    pub fn application_addr(&self) -> SocketAddr {
        self.application_addr
    }

    /// Close every connection, stop both listeners and clear routing state
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        for mut server in self.servers {
            if tokio::time::timeout(SERVER_STOP_TIMEOUT, &mut server)
                .await
                .is_err()
            {
                warn!("Server did not stop in time, aborting");
                server.abort();
            }
        }
        self.hub.reset().await;
        info!("Main gateway {} stopped", self.hub.gateway_id());
    }
}

async fn bind(port: u16) -> Result<TcpListener> {
    Ok(TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?)
}

fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { crate::stopped(&mut shutdown).await })
        .await;

        if let Err(e) = result {
            error!("Server error: {}", e);
        }
    })
}
