//! Role runtime: one entry point that runs a node as main or auxiliary

use std::net::SocketAddr;
use std::sync::Arc;

use gateway_core::protocol::{GatewayRole, GatewayStatus, TaskOutcome, TaskResultBody};
use gateway_core::{
    ConnectedGateway, EventBus, GatewayConfig, GatewayError, GatewayEvent, GatewayFilter,
    Result, TaskRecord,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::auxiliary::AuxiliaryNode;
use crate::hub::{DispatchOutcome, MainHub, MainNode, TaskRequest};
use crate::status::{RuntimeStatus, StatusCell};

enum RoleEngine {
    Main(MainNode),
    Auxiliary(AuxiliaryNode),
}

/// A gateway node in the role its config names.
///
/// Role-specific operations called on the other role fail with
/// [`GatewayError::WrongRole`].
pub struct GatewayRuntime {
    config: GatewayConfig,
    events: EventBus,
    status: Arc<StatusCell>,
    /// Routing state, present for the main role only
    hub: Option<Arc<MainHub>>,
    engine: Mutex<Option<RoleEngine>>,
}

impl GatewayRuntime {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new();
        let hub = match config.role {
            GatewayRole::Main => Some(Arc::new(
                MainHub::new(
                    config.gateway_id.clone(),
                    config.allowed_gateway_ips.clone(),
                    events.clone(),
                )
                .with_heartbeat_interval(config.heartbeat_interval),
            )),
            _ => None,
        };

        Ok(Self {
            status: Arc::new(StatusCell::new(events.clone())),
            config,
            events,
            hub,
            engine: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn gateway_id(&self) -> &str {
        &self.config.gateway_id
    }

    pub fn role(&self) -> GatewayRole {
        self.config.role
    }

    /// Subscribe to every event this node emits from now on
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// Bring the node online.
    ///
    /// Starting a node that is already online or connecting does nothing.
    /// Bind and connect failures are returned and leave the node in `error`.
    pub async fn start(&self) -> Result<()> {
        let mut engine = self.engine.lock().await;
        if engine.is_some() {
            warn!(
                "Gateway {} already started ({})",
                self.config.gateway_id,
                self.status.get()
            );
            return Ok(());
        }

        info!(
            "Starting {} gateway {}",
            self.config.role, self.config.gateway_id
        );
        let started = match (self.config.role, &self.hub) {
            (GatewayRole::Main, Some(hub)) => {
                self.status.set(GatewayStatus::Connecting);
                match MainNode::start(&self.config, Arc::clone(hub), Arc::clone(&self.status))
                    .await
                {
                    Ok(node) => {
                        self.status.set(GatewayStatus::Online);
                        RoleEngine::Main(node)
                    }
                    Err(e) => {
                        self.status.set(GatewayStatus::Error);
                        return Err(e);
                    }
                }
            }
            (GatewayRole::Auxiliary, _) => RoleEngine::Auxiliary(
                AuxiliaryNode::start(
                    self.config.clone(),
                    Arc::clone(&self.status),
                    self.events.clone(),
                )
                .await?,
            ),
            (role, _) => return Err(GatewayError::UnsupportedRole(role)),
        };

        *engine = Some(started);
        Ok(())
    }

    /// Take the node offline. Stopping a stopped node does nothing.
    pub async fn stop(&self) {
        let Some(engine) = self.engine.lock().await.take() else {
            return;
        };

        match engine {
            RoleEngine::Main(node) => node.stop().await,
            RoleEngine::Auxiliary(node) => node.stop().await,
        }
        self.status.set(GatewayStatus::Offline);
    }

    pub fn current_status(&self) -> GatewayStatus {
        self.status.get()
    }

    pub async fn status(&self) -> RuntimeStatus {
        let status = self.status.get();
        if let Some(hub) = &self.hub {
            return hub.status_snapshot(status).await;
        }

        let pending_tasks = match self.engine.lock().await.as_ref() {
            Some(RoleEngine::Auxiliary(node)) => node.active_task_count().await,
            _ => 0,
        };
        RuntimeStatus {
            gateway_id: self.config.gateway_id.clone(),
            role: self.config.role,
            status,
            connected_gateways: 0,
            pending_tasks,
        }
    }

    /// Route a task to one registered subordinate (main only)
    pub async fn dispatch_task(&self, to: &str, task: &TaskRequest) -> Result<()> {
        self.main_hub("dispatch_task")?.dispatch_task(to, task).await
    }

    /// Route a task to every registered auxiliary (main only)
    pub async fn broadcast_task(&self, task: &TaskRequest) -> Result<Vec<DispatchOutcome>> {
        Ok(self.main_hub("broadcast_task")?.broadcast_task(task).await)
    }

    pub async fn connected_gateways(&self, filter: &GatewayFilter) -> Result<Vec<ConnectedGateway>> {
        Ok(self
            .main_hub("connected_gateways")?
            .list_gateways(filter)
            .await)
    }

    pub async fn task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        Ok(self.main_hub("task")?.task(task_id).await)
    }

    /// Report a task outcome to the main gateway (auxiliary only)
    pub async fn send_task_result(
        &self,
        task_id: &str,
        status: TaskOutcome,
        result: TaskResultBody,
    ) -> Result<()> {
        if self.config.role != GatewayRole::Auxiliary {
            return Err(self.wrong_role("send_task_result"));
        }

        match self.engine.lock().await.as_ref() {
            Some(RoleEngine::Auxiliary(node)) => {
                node.send_task_result(task_id, status, result).await
            }
            _ => Err(GatewayError::connection_lost(
                "not connected to main gateway",
            )),
        }
    }

    /// Bound management listener (main only, while running)
    pub async fn management_addr(&self) -> Option<SocketAddr> {
        match self.engine.lock().await.as_ref() {
            Some(RoleEngine::Main(node)) => Some(node.management_addr()),
            _ => None,
        }
    }

    /// Bound application listener (main only, while running)
    pub async fn application_addr(&self) -> Option<SocketAddr> {
        match self.engine.lock().await.as_ref() {
            Some(RoleEngine::Main(node)) => Some(node.application_addr()),
            _ => None,
        }
    }

    fn main_hub(&self, operation: &'static str) -> Result<&MainHub> {
        self.hub
            .as_deref()
            .ok_or_else(|| self.wrong_role(operation))
    }

    fn wrong_role(&self, operation: &'static str) -> GatewayError {
        GatewayError::WrongRole {
            role: self.config.role,
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_config() -> GatewayConfig {
        let mut config = GatewayConfig::main("gw-main");
        config.port = 0;
        config.management_port = Some(0);
        config
    }

    #[test]
    fn test_branch_runtime_is_rejected() {
        let mut config = GatewayConfig::main("gw-branch");
        config.role = GatewayRole::Branch;
        assert!(matches!(
            GatewayRuntime::new(config),
            Err(GatewayError::UnsupportedRole(GatewayRole::Branch))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = GatewayConfig::auxiliary("gw-aux", "ws://127.0.0.1:1");
        config.main_gateway_url = None;
        assert!(matches!(
            GatewayRuntime::new(config),
            Err(GatewayError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_main_start_and_stop_cycle_status() {
        let runtime = GatewayRuntime::new(main_config()).unwrap();
        let mut events = runtime.subscribe();

        runtime.start().await.unwrap();
        assert_eq!(runtime.current_status(), GatewayStatus::Online);
        assert!(runtime.management_addr().await.is_some());
        assert_ne!(
            runtime.management_addr().await,
            runtime.application_addr().await
        );

        runtime.stop().await;
        assert_eq!(runtime.current_status(), GatewayStatus::Offline);
        assert!(runtime.management_addr().await.is_none());

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let GatewayEvent::StatusChange { to, .. } = event {
                transitions.push(to);
            }
        }
        assert_eq!(
            transitions,
            vec![
                GatewayStatus::Connecting,
                GatewayStatus::Online,
                GatewayStatus::Offline
            ]
        );
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let runtime = GatewayRuntime::new(main_config()).unwrap();
        runtime.start().await.unwrap();
        let addr = runtime.management_addr().await;

        runtime.start().await.unwrap();

        assert_eq!(runtime.management_addr().await, addr);
        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_auxiliary_operations_on_main_fail_with_wrong_role() {
        let runtime = GatewayRuntime::new(main_config()).unwrap();
        let err = runtime
            .send_task_result("t-1", TaskOutcome::Success, TaskResultBody::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::WrongRole {
                role: GatewayRole::Main,
                operation: "send_task_result"
            }
        ));
    }

    #[tokio::test]
    async fn test_main_operations_on_auxiliary_fail_with_wrong_role() {
        let runtime =
            GatewayRuntime::new(GatewayConfig::auxiliary("gw-aux", "ws://127.0.0.1:1")).unwrap();

        let err = runtime
            .dispatch_task("gw-a", &TaskRequest::new("t-1", "dev", "build"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::WrongRole { .. }));
        assert!(runtime.connected_gateways(&GatewayFilter::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_send_task_result_before_start_is_connection_lost() {
        let runtime =
            GatewayRuntime::new(GatewayConfig::auxiliary("gw-aux", "ws://127.0.0.1:1")).unwrap();
        let err = runtime
            .send_task_result("t-1", TaskOutcome::Success, TaskResultBody::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn test_auxiliary_initial_connect_failure_is_returned() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let runtime = GatewayRuntime::new(GatewayConfig::auxiliary(
            "gw-aux",
            format!("ws://127.0.0.1:{}", port),
        ))
        .unwrap();

        let err = runtime.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionLost { .. }));
        assert_eq!(runtime.current_status(), GatewayStatus::Error);
    }

    #[tokio::test]
    async fn test_main_bind_failure_moves_to_error() {
        let taken = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let mut config = main_config();
        config.management_port = Some(taken.local_addr().unwrap().port());

        let runtime = GatewayRuntime::new(config).unwrap();
        assert!(matches!(runtime.start().await, Err(GatewayError::Io(_))));
        assert_eq!(runtime.current_status(), GatewayStatus::Error);

        drop(taken);
    }
}
