//! Auxiliary gateway role
//!
//! An auxiliary keeps one outbound WebSocket to its main gateway. A single
//! supervisor task owns the socket, the outbound queue and the heartbeat
//! timer, and reconnects with a fixed delay whenever the socket drops.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gateway_core::protocol::{
    message_type, tags, validate_task_dispatch, GatewayInfo, GatewayMessage, GatewayRole,
    GatewayStatus, LoadSample, MessageBody, RegisterStatus, TaskAckStatus, TaskOutcome,
    TaskResultBody, MAIN_RECIPIENT,
};
use gateway_core::{EventBus, GatewayConfig, GatewayError, GatewayEvent, Result};
use rand::Rng;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::status::StatusCell;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_CAPACITY: usize = 100;
const SUPERVISOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Shutdown,
}

struct Shared {
    config: GatewayConfig,
    status: Arc<StatusCell>,
    events: EventBus,
    /// Outbound queue of the open session, if any
    link: RwLock<Option<mpsc::Sender<GatewayMessage>>>,
    /// Identity of the main gateway, learned from the registration ack
    main_id: RwLock<String>,
    /// Tasks received but not yet reported
    active_tasks: Mutex<HashSet<String>>,
}

impl Shared {
    /// Publish the outbound queue of a new session. The main gateway's
    /// identity is unknown until the next registration ack.
    async fn begin_session(&self, link: mpsc::Sender<GatewayMessage>) {
        *self.link.write().await = Some(link);
        *self.main_id.write().await = MAIN_RECIPIENT.to_string();
    }

    async fn main_id(&self) -> String {
        self.main_id.read().await.clone()
    }

    fn info(&self) -> GatewayInfo {
        GatewayInfo {
            host: self.config.advertised_host.clone(),
            port: self.config.port,
            agent_count: self.config.agent_count,
            status: GatewayStatus::Online,
            device_fingerprint: self.config.device_fingerprint.clone(),
        }
    }

    async fn load_sample(&self) -> LoadSample {
        let active_tasks = self.active_tasks.lock().await.len() as u32;
        let mut rng = rand::thread_rng();
        LoadSample {
            cpu: rng.gen_range(0.0..100.0),
            memory: rng.gen_range(0.0..100.0),
            active_tasks,
        }
    }
}

pub struct AuxiliaryNode {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

impl AuxiliaryNode {
    /// Connect to the main gateway and hand the socket to a supervisor.
    ///
    /// A failed first connection is returned to the caller; the node then
    /// sits in `error` with nothing running in the background.
    pub(crate) async fn start(
        config: GatewayConfig,
        status: Arc<StatusCell>,
        events: EventBus,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            config,
            status,
            events,
            link: RwLock::new(None),
            main_id: RwLock::new(MAIN_RECIPIENT.to_string()),
            active_tasks: Mutex::new(HashSet::new()),
        });

        shared.status.set(GatewayStatus::Connecting);
        let ws = match connect(&shared.config).await {
            Ok(ws) => ws,
            Err(e) => {
                error!("Initial connection to main gateway failed: {}", e);
                shared.status.set(GatewayStatus::Error);
                return Err(e);
            }
        };
        shared.status.set(GatewayStatus::Online);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = tokio::spawn(supervise(Arc::clone(&shared), ws, shutdown_rx));

        Ok(Self {
            shared,
            shutdown,
            supervisor,
        })
    }

    /// Report a task outcome to the main gateway.
    ///
    /// The report is queued without waiting for the main gateway's ack.
    pub async fn send_task_result(
        &self,
        task_id: &str,
        status: TaskOutcome,
        result: TaskResultBody,
    ) -> Result<()> {
        let Some(link) = self.shared.link.read().await.clone() else {
            return Err(GatewayError::connection_lost(
                "not connected to main gateway",
            ));
        };

        let message = GatewayMessage::task_result(
            task_id,
            &self.shared.config.gateway_id,
            &self.shared.main_id().await,
            status,
            result,
        );
        link.send(message)
            .await
            .map_err(|_| GatewayError::connection_lost("connection to main gateway closed"))?;

        self.shared.active_tasks.lock().await.remove(task_id);
        info!("Reported {} for task {}", status.as_str(), task_id);
        Ok(())
    }

    /// Number of received tasks without a reported result
    pub async fn active_task_count(&self) -> usize {
        self.shared.active_tasks.lock().await.len()
    }

    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        let mut supervisor = self.supervisor;
        if tokio::time::timeout(SUPERVISOR_STOP_TIMEOUT, &mut supervisor)
            .await
            .is_err()
        {
            warn!("Supervisor did not stop in time, aborting");
            supervisor.abort();
        }
        *self.shared.link.write().await = None;
        self.shared.active_tasks.lock().await.clear();
        info!("Auxiliary gateway {} stopped", self.shared.config.gateway_id);
    }
}

async fn connect(config: &GatewayConfig) -> Result<WsStream> {
    let url = config
        .main_gateway_url
        .as_deref()
        .ok_or_else(|| GatewayError::Config("auxiliary gateway requires mainGatewayUrl".to_string()))?;

    let mut request = url
        .into_client_request()
        .map_err(|e| GatewayError::Config(format!("invalid mainGatewayUrl {}: {}", url, e)))?;
    if let Some(token) = config.main_gateway_token.as_deref() {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| GatewayError::Config(format!("invalid mainGatewayToken: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    info!("Connecting to main gateway at {}", url);
    let (ws, _) = connect_async(request)
        .await
        .map_err(|e| GatewayError::connection_lost(format!("connect to {} failed: {}", url, e)))?;
    Ok(ws)
}

/// Run sessions until shutdown, reconnecting after every loss
async fn supervise(shared: Arc<Shared>, first: WsStream, mut shutdown: watch::Receiver<bool>) {
    let delay = shared.config.reconnect_delay;
    let mut next = Some(first);

    loop {
        if let Some(ws) = next.take() {
            if run_session(&shared, ws, &mut shutdown).await == SessionEnd::Shutdown {
                break;
            }
            warn!("Connection to main gateway lost");
        }

        shared.status.set(GatewayStatus::Offline);
        tokio::select! {
            _ = crate::stopped(&mut shutdown) => break,
            _ = tokio::time::sleep(delay) => {}
        }

        shared.status.set(GatewayStatus::Connecting);
        let attempt = tokio::select! {
            _ = crate::stopped(&mut shutdown) => break,
            attempt = connect(&shared.config) => attempt,
        };
        match attempt {
            Ok(ws) => {
                info!("Reconnected to main gateway");
                shared.status.set(GatewayStatus::Online);
                next = Some(ws);
            }
            Err(e) => warn!("Reconnect failed, retrying in {:?}: {}", delay, e),
        }
    }

    debug!("Supervisor for {} exiting", shared.config.gateway_id);
}

/// Drive one connected socket: register, heartbeat, and route frames both
/// ways until the socket drops or shutdown is signalled
async fn run_session(
    shared: &Shared,
    ws: WsStream,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<GatewayMessage>(OUTBOUND_CAPACITY);
    shared.begin_session(tx).await;

    let register = GatewayMessage::register(
        &shared.config.gateway_id,
        GatewayRole::Auxiliary,
        shared.info(),
    );

    let end = if send_frame(&mut sink, &register).await.is_err() {
        SessionEnd::Lost
    } else {
        let mut heartbeat = tokio::time::interval(shared.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = crate::stopped(shutdown) => break SessionEnd::Shutdown,
                _ = heartbeat.tick() => {
                    let message = GatewayMessage::heartbeat(
                        &shared.config.gateway_id,
                        &shared.main_id().await,
                        shared.load_sample().await,
                    );
                    if send_frame(&mut sink, &message).await.is_err() {
                        break SessionEnd::Lost;
                    }
                }
                Some(message) = rx.recv() => {
                    if send_frame(&mut sink, &message).await.is_err() {
                        break SessionEnd::Lost;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_incoming(shared, text.as_str()).await {
                            if send_frame(&mut sink, &reply).await.is_err() {
                                break SessionEnd::Lost;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break SessionEnd::Lost,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error from main gateway: {}", e);
                        break SessionEnd::Lost;
                    }
                },
            }
        }
    };

    if end == SessionEnd::Shutdown {
        let _ = sink.close().await;
    }
    *shared.link.write().await = None;
    end
}

async fn send_frame<S>(sink: &mut S, message: &GatewayMessage) -> Result<()>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = message.to_json()?;
    sink.send(Message::Text(json.into())).await.map_err(|e| {
        error!("Failed to send {}: {}", message.message_type(), e);
        GatewayError::connection_lost(e.to_string())
    })
}

/// React to one frame from the main gateway, returning an optional reply
async fn handle_incoming(shared: &Shared, text: &str) -> Option<GatewayMessage> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("Dropping malformed frame from main gateway: {}", e);
            shared.events.emit(GatewayEvent::error(&GatewayError::InvalidParams {
                errors: vec![format!("malformed JSON: {}", e)],
            }));
            return None;
        }
    };
    let kind = message_type(&value).unwrap_or_default().to_string();
    debug!("Received {} from main gateway", kind);

    if kind == tags::TASK_DISPATCH {
        let report = validate_task_dispatch(&value);
        if !report.valid {
            let task_id = value
                .get("taskId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let err = GatewayError::InvalidParams {
                errors: report.errors,
            };
            warn!("Rejecting task dispatch {}: {}", task_id, err);
            shared.events.emit(GatewayEvent::error(&err));
            return Some(GatewayMessage::task_ack(
                &shared.config.gateway_id,
                &shared.main_id().await,
                &task_id,
                TaskAckStatus::Error,
                Some(err.to_string()),
            ));
        }
    }

    let message = match serde_json::from_value::<GatewayMessage>(value) {
        Ok(message) => message,
        Err(e) => {
            let err = if kind.is_empty() || !is_known_type(&kind) {
                GatewayError::InvalidMessageType { message_type: kind }
            } else {
                GatewayError::InvalidParams {
                    errors: vec![e.to_string()],
                }
            };
            warn!("Dropping frame from main gateway: {}", err);
            shared.events.emit(GatewayEvent::error(&err));
            return None;
        }
    };

    match message.body {
        MessageBody::RegisterAck {
            status: RegisterStatus::Success,
            ref assigned_id,
            ..
        } => {
            let gateway_id = assigned_id
                .clone()
                .unwrap_or_else(|| shared.config.gateway_id.clone());
            *shared.main_id.write().await = message.envelope.from.clone();
            info!(
                "Registered with main gateway {} as {}",
                message.envelope.from, gateway_id
            );
            shared
                .events
                .emit(GatewayEvent::GatewayRegistered { gateway_id });
            None
        }
        MessageBody::RegisterAck { ref message, .. } => {
            let err = GatewayError::registration_failed(
                message.clone().unwrap_or_else(|| "registration rejected".to_string()),
            );
            error!("{}", err);
            shared.events.emit(GatewayEvent::error(&err));
            None
        }
        MessageBody::TaskDispatch {
            task_id, payload, ..
        } => {
            info!(
                "Received task {} for agent {}: {}",
                task_id, payload.agent_id, payload.command
            );
            shared.active_tasks.lock().await.insert(task_id.clone());
            shared.events.emit(GatewayEvent::TaskReceived {
                task_id: task_id.clone(),
                agent_id: payload.agent_id,
                command: payload.command,
                params: payload.params,
            });
            Some(GatewayMessage::task_ack(
                &shared.config.gateway_id,
                &shared.main_id().await,
                &task_id,
                TaskAckStatus::Received,
                None,
            ))
        }
        MessageBody::TaskAck { .. } => {
            shared.events.emit(GatewayEvent::TaskAck { message });
            None
        }
        MessageBody::TaskResultAck { .. } => {
            shared.events.emit(GatewayEvent::TaskResultAck { message });
            None
        }
        MessageBody::HeartbeatAck { pending_tasks, .. } => {
            debug!("Heartbeat acknowledged (pending tasks: {:?})", pending_tasks);
            None
        }
        MessageBody::Register { .. }
        | MessageBody::Heartbeat { .. }
        | MessageBody::TaskResult { .. } => {
            let err = GatewayError::InvalidMessageType {
                message_type: message.message_type().to_string(),
            };
            warn!("Unexpected message from main gateway: {}", err);
            shared.events.emit(GatewayEvent::error(&err));
            None
        }
    }
}

fn is_known_type(kind: &str) -> bool {
    [
        tags::REGISTER,
        tags::REGISTER_ACK,
        tags::HEARTBEAT,
        tags::HEARTBEAT_ACK,
        tags::TASK_DISPATCH,
        tags::TASK_ACK,
        tags::TASK_RESULT,
        tags::TASK_RESULT_ACK,
    ]
    .contains(&kind)
}
