//! The node protocol engine.
//!
//! A single actor task owns every piece of connection state: the transport,
//! the handshake, pending commands, the tunnel and the one-shot slot.
//! [`NodeHandle`] talks to it over a command channel; transports, timers,
//! command tasks and the tunnel talk to it over an internal channel. Events
//! are tagged with the transport generation they belong to, so anything from
//! a torn-down transport is discarded.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time;

use clawsy_core::codec::{self, CommandRequest, CorrelationId, Inbound};
use clawsy_core::messages::ConnectParams;
use clawsy_core::{short_id, ClientInfo, CommandOutcome, NodeError, NodeResult, RpcError};

use crate::auth;
use crate::capabilities::{ApprovalHandler, CapabilityProvider};
use crate::config::{tunnel_url, ConnectionConfig, TUNNEL_LOCAL_PORT};
use crate::device::DeviceIdentity;
use crate::dispatch::Dispatcher;
use crate::permissions::{PermissionCategory, PermissionGate};
use crate::transport::{Connector, Transport, TransportDiagnosis, TransportEvent, WebSocketConnector};
use crate::tunnel::{SshLauncher, TunnelFailure, TunnelLauncher, TunnelReport, TunnelSpec, TunnelSupervisor};

/// Timings and client identity.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Bound on opening the transport.
    pub watchdog: Duration,
    /// Time allowed between transport open and the gateway's hello.
    pub handshake_timeout: Duration,
    /// How long a fresh tunnel must survive before it is used.
    pub tunnel_grace: Duration,
    /// Bound on a single command, user approval included.
    pub command_timeout: Duration,
    pub one_shot_timeout: Duration,
    /// Delay between a one-shot send and the automatic disconnect.
    pub one_shot_linger: Duration,
    pub tunnel_local_port: u16,
    pub client: ClientInfo,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            watchdog: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            tunnel_grace: Duration::from_secs(5),
            command_timeout: Duration::from_secs(120),
            one_shot_timeout: Duration::from_secs(10),
            one_shot_linger: Duration::from_secs(1),
            tunnel_local_port: TUNNEL_LOCAL_PORT,
            client: ClientInfo::current(env!("CARGO_PKG_VERSION")),
        }
    }
}

/// External collaborators injected into the engine.
#[derive(Clone)]
pub struct NodeServices {
    pub connector: Arc<dyn Connector>,
    pub launcher: Arc<dyn TunnelLauncher>,
    pub provider: Arc<dyn CapabilityProvider>,
    pub approver: Arc<dyn ApprovalHandler>,
}

impl NodeServices {
    /// WebSocket transport and the system `ssh`.
    pub fn new(provider: Arc<dyn CapabilityProvider>, approver: Arc<dyn ApprovalHandler>) -> Self {
        Self {
            connector: Arc::new(WebSocketConnector),
            launcher: Arc::new(SshLauncher),
            provider,
            approver,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn TunnelLauncher>) -> Self {
        self.launcher = launcher;
        self
    }
}

/// Why the last attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Transport(TransportDiagnosis),
    Handshake(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Transport open, waiting for the challenge / hello.
    Connected,
    Paired,
    TunnelStarting,
    TunnelFailed(TunnelFailure),
    Failed(FailureReason),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected, awaiting handshake"),
            Self::Paired => f.write_str("paired"),
            Self::TunnelStarting => f.write_str("starting ssh tunnel"),
            Self::TunnelFailed(failure) => write!(f, "tunnel failed: {failure}"),
            Self::Failed(FailureReason::Transport(diagnosis)) => write!(f, "failed: {diagnosis}"),
            Self::Failed(FailureReason::Handshake(msg)) => write!(f, "handshake failed: {msg}"),
        }
    }
}

/// Snapshot published on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeStatus {
    pub state: ConnectionState,
    /// The current or last attempt goes through the SSH tunnel.
    pub tunneled: bool,
    pub attempt: u32,
}

enum Command {
    Connect(oneshot::Sender<NodeResult<()>>),
    Disconnect(oneshot::Sender<()>),
    Reconfigure(Box<ConnectionConfig>, oneshot::Sender<NodeResult<()>>),
    SendEvent {
        kind: String,
        payload: Value,
        reply: oneshot::Sender<NodeResult<()>>,
    },
    SendOneShot {
        kind: String,
        payload: Value,
        reply: oneshot::Sender<bool>,
    },
    Shutdown(oneshot::Sender<()>),
}

enum Internal {
    Transport { generation: u64, event: TransportEvent },
    Watchdog { generation: u64 },
    HandshakeDeadline { generation: u64 },
    Tunnel(TunnelReport),
    CommandReady { seq: u64 },
    CommandDone { seq: u64, outcome: CommandOutcome },
    OneShotExpired { seq: u64 },
    Linger { generation: u64 },
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<NodeStatus>,
    permissions: Arc<PermissionGate>,
    device_id: Arc<str>,
}

impl NodeHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> NodeResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| NodeError::EngineStopped)?;
        rx.await.map_err(|_| NodeError::EngineStopped)
    }

    /// Start a connection attempt. Fails synchronously only on bad config.
    pub async fn connect(&self) -> NodeResult<()> {
        self.request(Command::Connect).await?
    }

    /// Tear everything down. Safe in any state.
    pub async fn disconnect(&self) -> NodeResult<()> {
        self.request(Command::Disconnect).await
    }

    /// Replace the connection settings. Refused while an attempt is in flight.
    pub async fn reconfigure(&self, config: ConnectionConfig) -> NodeResult<()> {
        self.request(|reply| Command::Reconfigure(Box::new(config), reply))
            .await?
    }

    /// Send a `node.event`. Only allowed while paired.
    pub async fn send_event(&self, kind: impl Into<String>, payload: Value) -> NodeResult<()> {
        let kind = kind.into();
        self.request(|reply| Command::SendEvent {
            kind,
            payload,
            reply,
        })
        .await?
    }

    /// Send one event, connecting first if needed. Resolves to whether the
    /// event went out.
    pub async fn send_one_shot(&self, kind: impl Into<String>, payload: Value) -> bool {
        let kind = kind.into();
        self.request(|reply| Command::SendOneShot {
            kind,
            payload,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    pub fn revoke(&self, category: PermissionCategory) {
        self.permissions.revoke(category);
    }

    pub fn permissions(&self) -> Arc<PermissionGate> {
        self.permissions.clone()
    }

    pub fn status(&self) -> NodeStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `pred`.
    pub async fn wait_for(&self, mut pred: impl FnMut(&NodeStatus) -> bool) -> NodeResult<NodeStatus> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|s| pred(s))
            .await
            .map_err(|_| NodeError::EngineStopped)?
            .clone();
        Ok(status)
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.status.borrow().state,
            ConnectionState::Connected | ConnectionState::Paired
        )
    }

    pub fn is_paired(&self) -> bool {
        self.status.borrow().state == ConnectionState::Paired
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Disconnect and stop the engine task.
    pub async fn shutdown(&self) {
        let _ = self.request(Command::Shutdown).await;
    }
}

/// The live transport plus the task forwarding its events.
struct CurrentTransport {
    generation: u64,
    transport: Box<dyn Transport>,
    forwarder: JoinHandle<()>,
    open: bool,
}

impl Drop for CurrentTransport {
    fn drop(&mut self) {
        self.transport.close();
        self.forwarder.abort();
    }
}

/// A dispatched command awaiting its terminal response.
struct PendingRequest {
    id: CorrelationId,
    command: String,
    generation: u64,
    worker: AbortHandle,
    supervisor: AbortHandle,
}

struct OneShot {
    seq: u64,
    kind: String,
    payload: Value,
    reply: oneshot::Sender<bool>,
    timer: JoinHandle<()>,
    /// The one-shot opened the connection and closes it afterwards.
    owns_connection: bool,
}

/// Entry point: spawn the engine task.
pub struct NodeEngine;

impl NodeEngine {
    pub fn spawn(
        config: ConnectionConfig,
        identity: DeviceIdentity,
        options: NodeOptions,
        services: NodeServices,
    ) -> NodeHandle {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(NodeStatus::default());
        let permissions = Arc::new(PermissionGate::new());
        let device_id: Arc<str> = Arc::from(identity.device_id());

        let dispatcher = Dispatcher::new(
            services.provider.clone(),
            services.approver.clone(),
            permissions.clone(),
            &config.shared_folder,
        );

        let engine = Engine {
            tunnel: TunnelSupervisor::new(services.launcher.clone()),
            config,
            options,
            identity,
            services,
            dispatcher,
            permissions: permissions.clone(),
            status_tx,
            internal_tx,
            state: ConnectionState::Disconnected,
            transport: None,
            generation: 0,
            attempt: 0,
            tunneled: false,
            paired: false,
            watchdog: None,
            handshake_timer: None,
            pending: HashMap::new(),
            next_seq: 0,
            one_shot: None,
        };
        tokio::spawn(engine.run(command_rx, internal_rx));

        NodeHandle {
            commands: command_tx,
            status: status_rx,
            permissions,
            device_id,
        }
    }
}

struct Engine {
    config: ConnectionConfig,
    options: NodeOptions,
    identity: DeviceIdentity,
    services: NodeServices,
    dispatcher: Dispatcher,
    permissions: Arc<PermissionGate>,
    tunnel: TunnelSupervisor,
    status_tx: watch::Sender<NodeStatus>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    state: ConnectionState,
    transport: Option<CurrentTransport>,
    generation: u64,
    attempt: u32,
    tunneled: bool,
    paired: bool,
    watchdog: Option<JoinHandle<()>>,
    handshake_timer: Option<JoinHandle<()>>,
    pending: HashMap<u64, PendingRequest>,
    next_seq: u64,
    one_shot: Option<OneShot>,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => {
                        self.stop(ConnectionState::Disconnected);
                        break;
                    }
                },
                Some(event) = internal.recv() => self.handle_internal(event),
            }
        }
        tracing::debug!("node engine stopped");
    }

    /// Returns false once the engine should exit.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Connect(reply) => {
                let _ = reply.send(self.connect());
            }
            Command::Disconnect(reply) => {
                tracing::info!("disconnect requested");
                self.stop(ConnectionState::Disconnected);
                let _ = reply.send(());
            }
            Command::Reconfigure(config, reply) => {
                let _ = reply.send(self.reconfigure(*config));
            }
            Command::SendEvent {
                kind,
                payload,
                reply,
            } => {
                let result = if self.paired {
                    self.send_frame(&codec::encode_event(&kind, payload));
                    Ok(())
                } else {
                    tracing::warn!(kind = %kind, "event dropped, not paired");
                    Err(NodeError::NotPaired)
                };
                let _ = reply.send(result);
            }
            Command::SendOneShot {
                kind,
                payload,
                reply,
            } => self.one_shot(kind, payload, reply),
            Command::Shutdown(reply) => {
                self.stop(ConnectionState::Disconnected);
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Transport { generation, event } => {
                if self.is_current(generation) {
                    self.on_transport_event(event);
                } else {
                    tracing::trace!(generation, "stale transport event");
                }
            }
            Internal::Watchdog { generation } => {
                let still_opening = self
                    .transport
                    .as_ref()
                    .is_some_and(|t| t.generation == generation && !t.open);
                if still_opening {
                    tracing::warn!(
                        secs = self.options.watchdog.as_secs(),
                        "connection watchdog fired"
                    );
                    self.attempt_failed(format!(
                        "connection timed out after {}s",
                        self.options.watchdog.as_secs()
                    ));
                }
            }
            Internal::HandshakeDeadline { generation } => {
                if self.is_current(generation) && !self.paired {
                    tracing::warn!("gateway did not complete the handshake in time");
                    self.stop(ConnectionState::Failed(FailureReason::Handshake(
                        "timed out waiting for the gateway".into(),
                    )));
                }
            }
            Internal::Tunnel(report) => self.on_tunnel_report(report),
            Internal::CommandReady { seq } => self.on_command_ready(seq),
            Internal::CommandDone { seq, outcome } => self.on_command_done(seq, outcome),
            Internal::OneShotExpired { seq } => {
                if self.one_shot.as_ref().is_some_and(|o| o.seq == seq) {
                    if let Some(pending) = self.one_shot.take() {
                        tracing::warn!(kind = %pending.kind, "one-shot send timed out");
                        let _ = pending.reply.send(false);
                        if pending.owns_connection {
                            self.stop(ConnectionState::Disconnected);
                        }
                    }
                }
            }
            Internal::Linger { generation } => {
                if self.is_current(generation) {
                    tracing::debug!("one-shot delivered, disconnecting");
                    self.stop(ConnectionState::Disconnected);
                }
            }
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    fn connect(&mut self) -> NodeResult<()> {
        self.config.validate()?;

        if self.attempt == 0 {
            self.tunneled = false;
            self.tunnel.stop();
        } else if self.tunnel.is_starting() {
            // A connect during the grace period supersedes the tunnel start.
            tracing::debug!("cancelling tunnel start");
            self.tunnel.stop();
        }
        self.attempt += 1;
        self.drop_transport();

        let url = if self.tunneled {
            tunnel_url(self.options.tunnel_local_port)
        } else {
            self.config.direct_url()
        };

        self.generation += 1;
        let generation = self.generation;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = self
            .services
            .connector
            .open(&url, self.options.watchdog, events_tx);

        let internal = self.internal_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if internal
                    .send(Internal::Transport { generation, event })
                    .is_err()
                {
                    break;
                }
            }
        });

        self.transport = Some(CurrentTransport {
            generation,
            transport,
            forwarder,
            open: false,
        });
        self.watchdog = Some(self.schedule(self.options.watchdog, Internal::Watchdog { generation }));

        tracing::info!(url = %url, attempt = self.attempt, tunneled = self.tunneled, "connecting to gateway");
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    fn reconfigure(&mut self, config: ConnectionConfig) -> NodeResult<()> {
        let in_flight = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::TunnelStarting
        );
        if in_flight {
            return Err(NodeError::AttemptInProgress);
        }

        self.dispatcher = Dispatcher::new(
            self.services.provider.clone(),
            self.services.approver.clone(),
            self.permissions.clone(),
            &config.shared_folder,
        );
        self.config = config;
        tracing::info!(host = %self.config.host, port = self.config.port, "configuration updated");
        Ok(())
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                cancel(&mut self.watchdog);
                let generation = self.generation;
                if let Some(current) = self.transport.as_mut() {
                    current.open = true;
                }
                self.attempt = 0;
                self.handshake_timer = Some(self.schedule(
                    self.options.handshake_timeout,
                    Internal::HandshakeDeadline { generation },
                ));
                tracing::info!("transport open, waiting for challenge");
                self.set_state(ConnectionState::Connected);
            }
            TransportEvent::Text(text) => self.on_frame(&text),
            TransportEvent::Disconnected(reason) => {
                if self.paired {
                    tracing::info!(reason = ?reason, "gateway closed the connection");
                    self.stop(ConnectionState::Disconnected);
                } else {
                    self.attempt_failed(
                        reason.unwrap_or_else(|| "connection closed before pairing".into()),
                    );
                }
            }
            TransportEvent::Error(message) => {
                if self.paired {
                    tracing::warn!(error = %message, "transport error");
                    let diagnosis = TransportDiagnosis::classify(&message);
                    self.stop(ConnectionState::Failed(FailureReason::Transport(diagnosis)));
                } else {
                    self.attempt_failed(message);
                }
            }
        }
    }

    /// A transport failure before pairing: fall back to the tunnel once, or give up.
    fn attempt_failed(&mut self, message: String) {
        self.drop_transport();

        if self.tunnel.is_starting() {
            return;
        }

        if self.config.ssh_fallback && !self.tunneled {
            let Some(user) = self.config.ssh_user().map(str::to_string) else {
                tracing::warn!(error = %message, "direct connection failed and no ssh user is configured");
                self.stop(ConnectionState::TunnelFailed(TunnelFailure::MissingUser));
                return;
            };

            let spec = TunnelSpec {
                ssh_user: user,
                host: self.config.bare_host().to_string(),
                remote_port: self.config.port,
                local_port: self.options.tunnel_local_port,
            };
            tracing::info!(error = %message, host = %spec.host, "direct connection failed, starting ssh tunnel");

            let tx = self.internal_tx.clone();
            let started = self.tunnel.begin(spec, self.options.tunnel_grace, move |report| {
                let _ = tx.send(Internal::Tunnel(report));
            });
            if started {
                self.set_state(ConnectionState::TunnelStarting);
            }
            return;
        }

        let diagnosis = TransportDiagnosis::classify(&message);
        tracing::warn!(error = %message, %diagnosis, tunneled = self.tunneled, "connection failed");
        self.stop(ConnectionState::Failed(FailureReason::Transport(diagnosis)));
    }

    fn on_tunnel_report(&mut self, report: TunnelReport) {
        match self.tunnel.settle(report) {
            None => tracing::debug!("discarding report from a cancelled tunnel start"),
            Some(Ok(())) => {
                tracing::info!(port = self.options.tunnel_local_port, "ssh tunnel up");
                self.tunneled = true;
                if let Err(e) = self.connect() {
                    tracing::error!(error = %e, "cannot connect through tunnel");
                    self.stop(ConnectionState::Disconnected);
                }
            }
            Some(Err(failure)) => {
                tracing::error!(%failure, "ssh tunnel failed");
                self.stop(ConnectionState::TunnelFailed(failure));
            }
        }
    }

    /// End the current attempt or session and publish `state`.
    fn stop(&mut self, state: ConnectionState) {
        self.drop_transport();
        self.tunnel.stop();
        self.attempt = 0;

        if let Some(pending) = self.one_shot.take() {
            pending.timer.abort();
            tracing::debug!(kind = %pending.kind, "one-shot abandoned");
            let _ = pending.reply.send(false);
        }

        self.set_state(state);
    }

    /// Close the transport and forget everything bound to it.
    fn drop_transport(&mut self) {
        cancel(&mut self.watchdog);
        cancel(&mut self.handshake_timer);
        self.paired = false;

        if let Some(current) = self.transport.take() {
            tracing::debug!(generation = current.generation, "closing transport");
        }

        for (_, request) in self.pending.drain() {
            tracing::debug!(id = %request.id, command = %request.command, "aborting command, transport gone");
            request.worker.abort();
            request.supervisor.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|t| t.generation == generation)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::info!(state = %state, "connection state changed");
        }
        self.state = state.clone();
        self.status_tx.send_replace(NodeStatus {
            state,
            tunneled: self.tunneled,
            attempt: self.attempt,
        });
    }

    fn schedule(&self, after: Duration, event: Internal) -> JoinHandle<()> {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            time::sleep(after).await;
            let _ = tx.send(event);
        })
    }

    fn send_frame(&self, frame: &Value) {
        match &self.transport {
            Some(current) => {
                tracing::debug!(frame = %frame, "send");
                current.transport.send(frame.to_string());
            }
            None => tracing::debug!("no transport, frame dropped"),
        }
    }

    // ── Frames ───────────────────────────────────────────────────────

    fn on_frame(&mut self, text: &str) {
        let inbound = match codec::parse_frame(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match inbound {
            Inbound::Heartbeat | Inbound::Ignored => tracing::trace!("frame ignored"),
            Inbound::Challenge { nonce } => self.answer_challenge(&nonce),
            Inbound::ConnectResponse(Ok(_)) => {
                if self.paired {
                    tracing::debug!("duplicate connect response");
                    return;
                }
                cancel(&mut self.handshake_timer);
                self.paired = true;
                tracing::info!(device = short_id(self.identity.device_id()), "paired with gateway");
                self.set_state(ConnectionState::Paired);
                self.flush_one_shot();
            }
            Inbound::ConnectResponse(Err(err)) => {
                tracing::error!(code = err.code, message = %err.message, "gateway rejected connect");
                self.stop(ConnectionState::Failed(FailureReason::Handshake(err.message)));
            }
            Inbound::Response { id } => {
                tracing::debug!(id = ?id.map(|i| i.to_string()), "gateway response");
            }
            Inbound::Command(request) => {
                if self.paired {
                    self.dispatch(request);
                } else {
                    tracing::warn!(command = %request.command, "command before pairing ignored");
                }
            }
        }
    }

    fn answer_challenge(&mut self, nonce: &str) {
        if self.paired {
            tracing::debug!("challenge while paired ignored");
            return;
        }

        let signed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        let frame = auth::sign_device(
            &self.identity,
            &self.options.client.id,
            &self.config.auth_token,
            nonce,
            signed_at,
        )
        .and_then(|device| {
            let params = ConnectParams::new(self.options.client.clone(), &self.config.auth_token, device);
            codec::encode_connect(&params)
        });

        match frame {
            Ok(frame) => {
                tracing::debug!("answering challenge");
                self.send_frame(&frame);
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot sign challenge");
                self.stop(ConnectionState::Failed(FailureReason::Handshake(e.to_string())));
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    fn dispatch(&mut self, request: CommandRequest) {
        let CommandRequest {
            id,
            command,
            params,
        } = request;
        tracing::debug!(id = %id, command = %command, "dispatching command");

        let seq = self.next_seq;
        self.next_seq += 1;

        let dispatcher = self.dispatcher.clone();
        let name = command.clone();
        let ready = self.internal_tx.clone();
        let mut worker = tokio::spawn(async move {
            dispatcher
                .execute_with_ack(&name, params, move || {
                    let _ = ready.send(Internal::CommandReady { seq });
                })
                .await
        });
        let worker_abort = worker.abort_handle();

        let timeout = self.options.command_timeout;
        let tx = self.internal_tx.clone();
        let name = command.clone();
        let supervisor = tokio::spawn(async move {
            let outcome = match time::timeout(timeout, &mut worker).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(command = %name, "command handler panicked");
                    Err(RpcError::server("command handler panicked"))
                }
                Ok(Err(_)) => Err(RpcError::server("command cancelled")),
                Err(_) => {
                    worker.abort();
                    Err(RpcError::timed_out(format!(
                        "{name} timed out after {}s",
                        timeout.as_secs()
                    )))
                }
            };
            let _ = tx.send(Internal::CommandDone { seq, outcome });
        });

        self.pending.insert(
            seq,
            PendingRequest {
                id,
                command,
                generation: self.generation,
                worker: worker_abort,
                supervisor: supervisor.abort_handle(),
            },
        );
    }

    /// The command passed its checks; tell the gateway it is being worked on.
    fn on_command_ready(&mut self, seq: u64) {
        let Some(request) = self.pending.get(&seq) else {
            return;
        };
        if !self.paired || !self.is_current(request.generation) {
            return;
        }
        if let Some(ack) = codec::encode_ack(&request.id) {
            self.send_frame(&ack);
        }
    }

    fn on_command_done(&mut self, seq: u64, outcome: CommandOutcome) {
        let Some(request) = self.pending.remove(&seq) else {
            return;
        };
        if !self.paired || !self.is_current(request.generation) {
            tracing::warn!(id = %request.id, command = %request.command, "result dropped, transport gone");
            return;
        }

        match &outcome {
            Ok(_) => tracing::debug!(id = %request.id, command = %request.command, "command completed"),
            Err(err) => tracing::warn!(
                id = %request.id,
                command = %request.command,
                code = err.code,
                message = %err.message,
                "command failed"
            ),
        }

        let frame = codec::encode_response(&request.id, &outcome, self.identity.device_id());
        self.send_frame(&frame);
    }

    // ── One-shot events ──────────────────────────────────────────────

    fn one_shot(&mut self, kind: String, payload: Value, reply: oneshot::Sender<bool>) {
        if self.paired {
            self.send_frame(&codec::encode_event(&kind, payload));
            let _ = reply.send(true);
            return;
        }

        let idle = matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Failed(_) | ConnectionState::TunnelFailed(_)
        );
        let mut owns_connection = idle;

        if let Some(previous) = self.one_shot.take() {
            tracing::debug!(kind = %previous.kind, "one-shot superseded");
            previous.timer.abort();
            owns_connection |= previous.owns_connection;
            let _ = previous.reply.send(false);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let timer = self.schedule(self.options.one_shot_timeout, Internal::OneShotExpired { seq });
        self.one_shot = Some(OneShot {
            seq,
            kind,
            payload,
            reply,
            timer,
            owns_connection,
        });

        if idle {
            if let Err(e) = self.connect() {
                tracing::warn!(error = %e, "one-shot cannot connect");
                if let Some(pending) = self.one_shot.take() {
                    pending.timer.abort();
                    let _ = pending.reply.send(false);
                }
            }
        }
    }

    fn flush_one_shot(&mut self) {
        let Some(pending) = self.one_shot.take() else {
            return;
        };
        pending.timer.abort();
        tracing::info!(kind = %pending.kind, "sending one-shot event");
        self.send_frame(&codec::encode_event(&pending.kind, pending.payload));
        let _ = pending.reply.send(true);

        if pending.owns_connection {
            let generation = self.generation;
            // Never cancelled: a stale linger fails the generation check.
            drop(self.schedule(self.options.one_shot_linger, Internal::Linger { generation }));
        }
    }
}

fn cancel(timer: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = timer.take() {
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::capabilities::{ApprovalDecision, CapabilityResult, StaticApprover};
    use crate::dispatch::testing::FakeProvider;
    use crate::tunnel::testing::FakeLauncher;
    use clawsy_core::messages::codes;

    /// Test side of one opened transport.
    struct Gateway {
        url: String,
        events: mpsc::UnboundedSender<TransportEvent>,
        sent: mpsc::UnboundedReceiver<String>,
    }

    impl Gateway {
        fn open(&self) {
            let _ = self.events.send(TransportEvent::Connected);
        }

        fn fail(&self, message: &str) {
            let _ = self.events.send(TransportEvent::Error(message.into()));
        }

        fn push(&self, frame: Value) {
            let _ = self.events.send(TransportEvent::Text(frame.to_string()));
        }

        async fn next_frame(&mut self) -> Value {
            let text = self.sent.recv().await.expect("transport closed");
            serde_json::from_str(&text).unwrap()
        }

        async fn closed(&mut self) {
            while self.sent.recv().await.is_some() {}
        }
    }

    struct FakeTransport {
        sent: Option<mpsc::UnboundedSender<String>>,
    }

    impl Transport for FakeTransport {
        fn send(&self, text: String) {
            if let Some(tx) = &self.sent {
                let _ = tx.send(text);
            }
        }

        fn close(&mut self) {
            self.sent = None;
        }
    }

    struct FakeConnector {
        gateways: mpsc::UnboundedSender<Gateway>,
    }

    impl Connector for FakeConnector {
        fn open(
            &self,
            url: &str,
            _timeout: Duration,
            events: mpsc::UnboundedSender<TransportEvent>,
        ) -> Box<dyn Transport> {
            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let _ = self.gateways.send(Gateway {
                url: url.to_string(),
                events,
                sent: sent_rx,
            });
            Box::new(FakeTransport {
                sent: Some(sent_tx),
            })
        }
    }

    /// Never answers the clipboard.
    struct HangingProvider;

    #[async_trait]
    impl CapabilityProvider for HangingProvider {
        async fn read_clipboard(&self) -> CapabilityResult<String> {
            std::future::pending().await
        }
    }

    struct Harness {
        node: NodeHandle,
        gateways: mpsc::UnboundedReceiver<Gateway>,
        launcher: Arc<FakeLauncher>,
        _tmp: tempfile::TempDir,
    }

    fn harness_with(mut config: ConnectionConfig, provider: Arc<dyn CapabilityProvider>) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        config.shared_folder = tmp.path().to_string_lossy().into_owned();

        let (gateways_tx, gateways) = mpsc::unbounded_channel();
        let launcher = Arc::new(FakeLauncher::default());
        let services = NodeServices::new(
            provider,
            Arc::new(StaticApprover(ApprovalDecision::Once)),
        )
        .with_connector(Arc::new(FakeConnector {
            gateways: gateways_tx,
        }))
        .with_launcher(launcher.clone());

        let node = NodeEngine::spawn(config, DeviceIdentity::generate(), NodeOptions::default(), services);
        Harness {
            node,
            gateways,
            launcher,
            _tmp: tmp,
        }
    }

    fn direct_only() -> ConnectionConfig {
        let mut config = ConnectionConfig::new("agenthost", "t1");
        config.ssh_fallback = false;
        config
    }

    fn harness(config: ConnectionConfig) -> Harness {
        let provider = FakeProvider::default();
        *provider.clipboard.lock().unwrap() = "hello".into();
        harness_with(config, Arc::new(provider))
    }

    async fn pair(h: &mut Harness) -> Gateway {
        h.node.connect().await.unwrap();
        let mut gw = h.gateways.recv().await.unwrap();
        gw.open();
        gw.push(json!({"type": "event", "event": "connect.challenge", "payload": {"nonce": "abc"}}));
        let connect = gw.next_frame().await;
        assert_eq!(connect["method"], "connect");
        gw.push(json!({"type": "res", "id": "1", "result": {}}));
        h.node
            .wait_for(|s| s.state == ConnectionState::Paired)
            .await
            .unwrap();
        gw
    }

    fn is_failed(status: &NodeStatus) -> bool {
        matches!(
            status.state,
            ConnectionState::Failed(_) | ConnectionState::TunnelFailed(_)
        )
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_signs_the_challenge_and_pairs() {
        let mut h = harness(ConnectionConfig::new("agenthost", "t1"));
        h.node.connect().await.unwrap();

        let mut gw = h.gateways.recv().await.unwrap();
        assert_eq!(gw.url, "wss://agenthost:18789");
        gw.open();
        h.node
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();

        gw.push(json!({"type": "event", "event": "connect.challenge", "payload": {"nonce": "abc"}}));
        let frame = gw.next_frame().await;
        assert_eq!(frame["type"], "req");
        assert_eq!(frame["id"], "1");
        assert_eq!(frame["method"], "connect");

        let params = &frame["params"];
        let device = &params["device"];
        assert_eq!(device["nonce"], "abc");
        assert_eq!(device["id"], h.node.device_id());
        assert_eq!(params["auth"]["token"], "t1");
        assert_eq!(params["role"], "node");

        let payload = auth::SigningPayload {
            device_id: h.node.device_id(),
            client_id: params["client"]["id"].as_str().unwrap(),
            signed_at_ms: device["signedAt"].as_i64().unwrap(),
            token: "t1",
            nonce: "abc",
        }
        .render();
        assert!(auth::verify_payload(
            device["publicKey"].as_str().unwrap(),
            device["signature"].as_str().unwrap(),
            &payload
        ));

        gw.push(json!({"type": "res", "id": "1", "result": {}}));
        h.node
            .wait_for(|s| s.state == ConnectionState::Paired)
            .await
            .unwrap();
        assert!(h.node.is_connected());
        assert!(h.node.is_paired());
    }

    #[tokio::test(start_paused = true)]
    async fn hello_ok_payload_also_pairs() {
        let mut h = harness(direct_only());
        h.node.connect().await.unwrap();
        let mut gw = h.gateways.recv().await.unwrap();
        gw.open();
        gw.push(json!({"event": "connect.challenge", "payload": {"nonce": "n"}}));
        gw.next_frame().await;
        gw.push(json!({"type": "res", "id": "1", "ok": true, "payload": {"type": "hello-ok"}}));
        h.node
            .wait_for(|s| s.state == ConnectionState::Paired)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_handshake_fails() {
        let mut h = harness(direct_only());
        h.node.connect().await.unwrap();
        let mut gw = h.gateways.recv().await.unwrap();
        gw.open();
        gw.push(json!({"event": "connect.challenge", "payload": {"nonce": "n"}}));
        gw.next_frame().await;
        gw.push(json!({"type": "res", "id": "1", "error": {"code": 401, "message": "bad signature"}}));

        let status = h.node.wait_for(is_failed).await.unwrap();
        assert_eq!(
            status.state,
            ConnectionState::Failed(FailureReason::Handshake("bad signature".into()))
        );
        gw.closed().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_config_fails_synchronously() {
        let mut h = harness(ConnectionConfig::new("", "t1"));
        assert!(matches!(h.node.connect().await, Err(NodeError::Config(_))));
        assert!(h.gateways.try_recv().is_err());
        assert_eq!(h.node.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn command_is_answered_on_its_id() {
        let mut h = harness(direct_only());
        let mut gw = pair(&mut h).await;

        gw.push(json!({"id": "42", "method": "clipboard.read"}));
        assert_eq!(
            gw.next_frame().await,
            json!({"type": "res", "id": "42", "result": {"text": "hello"}})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_get_no_answer() {
        let mut h = harness(direct_only());
        let mut gw = pair(&mut h).await;

        gw.push(json!({"type": "event", "event": "tick", "payload": {}}));
        gw.push(json!({"id": 1, "method": "clipboard.read"}));
        let frame = gw.next_frame().await;
        assert_eq!(frame["id"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_commands_get_errors_and_keep_the_pairing() {
        let mut h = harness(direct_only());
        let mut gw = pair(&mut h).await;

        gw.push(json!({"id": "7", "method": "teleport"}));
        let frame = gw.next_frame().await;
        assert_eq!(frame["error"]["code"], codes::METHOD_NOT_FOUND);

        gw.push(json!({"id": "8", "method": "clipboard.write", "params": {}}));
        let frame = gw.next_frame().await;
        assert_eq!(frame["error"]["code"], codes::INVALID_PARAMS);

        gw.push(json!("not an object"));
        gw.push(json!({"id": "9", "method": "clipboard.read"}));
        assert_eq!(gw.next_frame().await["id"], "9");
        assert!(h.node.is_paired());
    }

    #[tokio::test(start_paused = true)]
    async fn invocation_and_wrapped_dialects() {
        let mut h = harness(direct_only());
        let mut gw = pair(&mut h).await;

        gw.push(json!({
            "type": "event",
            "event": "node.invoke.request",
            "payload": {"id": "inv-1", "command": "clipboard.read", "paramsJSON": "{}"}
        }));
        let frame = gw.next_frame().await;
        assert_eq!(frame["method"], "node.invoke.result");
        assert_eq!(frame["params"]["id"], "inv-1");
        assert_eq!(frame["params"]["nodeId"], h.node.device_id());
        assert_eq!(frame["params"]["payload"]["text"], "hello");

        gw.push(json!({"id": 5, "method": "node.invoke", "params": {"command": "clipboard.read", "params": {}}}));
        assert_eq!(
            gw.next_frame().await,
            json!({"type": "res", "id": 5, "result": {"ok": true, "payload": {"text": "hello"}}})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn file_commands_are_acked_first() {
        let mut h = harness(direct_only());
        let mut gw = pair(&mut h).await;

        gw.push(json!({"type": "req", "id": "f1", "method": "file.list", "params": {}}));
        assert_eq!(
            gw.next_frame().await,
            json!({"type": "ack", "id": "f1", "status": "processing"})
        );
        let frame = gw.next_frame().await;
        assert_eq!(frame["id"], "f1");
        assert!(frame["result"]["files"].is_array());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_file_commands_are_not_acked() {
        let mut h = harness(direct_only());
        let mut gw = pair(&mut h).await;

        gw.push(json!({"type": "req", "id": "f2", "method": "file.get", "params": {"name": "../etc/passwd"}}));
        let frame = gw.next_frame().await;
        assert_eq!(frame["id"], "f2");
        assert_eq!(frame["error"]["code"], codes::INVALID_PARAMS);

        h._tmp.close().unwrap();
        gw.push(json!({"type": "req", "id": "f3", "method": "file.list", "params": {}}));
        let frame = gw.next_frame().await;
        assert_eq!(frame["id"], "f3");
        assert_eq!(frame["error"]["message"], "Folder not configured");
    }

    #[tokio::test(start_paused = true)]
    async fn hung_capability_times_out_with_an_error() {
        let mut h = harness_with(direct_only(), Arc::new(HangingProvider));
        let mut gw = pair(&mut h).await;

        gw.push(json!({"id": "slow", "method": "clipboard.read"}));
        let frame = gw.next_frame().await;
        assert_eq!(frame["id"], "slow");
        assert_eq!(frame["error"]["code"], codes::TIMED_OUT);
        assert!(h.node.is_paired());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_starts_the_tunnel_once() {
        let mut config = ConnectionConfig::new("agenthost", "t1");
        config.ssh_user = Some("alice".into());
        let mut h = harness(config);

        h.node.connect().await.unwrap();
        let direct = h.gateways.recv().await.unwrap();
        assert_eq!(direct.url, "wss://agenthost:18789");
        direct.fail("IO error: Connection refused (os error 111)");

        let tunneled = h.gateways.recv().await.unwrap();
        assert_eq!(tunneled.url, "ws://127.0.0.1:18790");
        assert!(h.node.status().tunneled);
        tunneled.fail("IO error: Connection refused (os error 111)");

        let status = h.node.wait_for(is_failed).await.unwrap();
        assert_eq!(
            status.state,
            ConnectionState::Failed(FailureReason::Transport(TransportDiagnosis::Refused))
        );
        assert_eq!(h.launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(h.launcher.freed.load(Ordering::SeqCst), 1);
        assert_eq!(h.launcher.killed.load(Ordering::SeqCst), 1);
        assert!(h.gateways.try_recv().is_err());

        // A fresh connect may use the tunnel again.
        h.node.connect().await.unwrap();
        let direct = h.gateways.recv().await.unwrap();
        assert_eq!(direct.url, "wss://agenthost:18789");
        direct.fail("Connection refused");
        let tunneled = h.gateways.recv().await.unwrap();
        assert_eq!(tunneled.url, "ws://127.0.0.1:18790");
        assert_eq!(h.launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_during_tunnel_start_keeps_the_new_session() {
        let mut config = ConnectionConfig::new("agenthost", "t1");
        config.ssh_user = Some("alice".into());
        let mut h = harness(config);

        h.node.connect().await.unwrap();
        h.gateways.recv().await.unwrap().fail("Connection refused");
        h.node
            .wait_for(|s| s.state == ConnectionState::TunnelStarting)
            .await
            .unwrap();

        let mut gw = pair(&mut h).await;
        assert_eq!(gw.url, "wss://agenthost:18789");

        // Past the grace period of the abandoned start.
        time::sleep(Duration::from_secs(6)).await;
        let status = h.node.status();
        assert_eq!(status.state, ConnectionState::Paired);
        assert!(!status.tunneled);
        assert!(h.gateways.try_recv().is_err());
        assert_eq!(h.launcher.killed.load(Ordering::SeqCst), 1);

        gw.push(json!({"id": "after", "method": "clipboard.read"}));
        assert_eq!(gw.next_frame().await["id"], "after");
    }

    #[tokio::test(start_paused = true)]
    async fn tunnel_that_dies_is_reported() {
        let mut config = ConnectionConfig::new("agenthost", "t1");
        config.ssh_user = Some("alice".into());
        let mut h = harness(config);
        h.launcher.die_on_start.store(true, Ordering::SeqCst);

        h.node.connect().await.unwrap();
        h.gateways.recv().await.unwrap().fail("Connection refused");

        let status = h.node.wait_for(is_failed).await.unwrap();
        assert_eq!(status.state, ConnectionState::TunnelFailed(TunnelFailure::Exited));
        assert!(h.gateways.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_without_ssh_user() {
        let mut h = harness(ConnectionConfig::new("agenthost", "t1"));
        h.node.connect().await.unwrap();
        h.gateways.recv().await.unwrap().fail("Connection refused");

        let status = h.node.wait_for(is_failed).await.unwrap();
        assert_eq!(status.state, ConnectionState::TunnelFailed(TunnelFailure::MissingUser));
        assert_eq!(h.launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_times_out_a_silent_open() {
        let mut h = harness(direct_only());
        h.node.connect().await.unwrap();
        let _gw = h.gateways.recv().await.unwrap();

        let status = h.node.wait_for(is_failed).await.unwrap();
        assert_eq!(
            status.state,
            ConnectionState::Failed(FailureReason::Transport(TransportDiagnosis::TimedOut))
        );
        assert_eq!(status.attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_events_are_ignored_after_disconnect() {
        let mut h = harness(direct_only());
        h.node.connect().await.unwrap();
        let gw = h.gateways.recv().await.unwrap();

        h.node.disconnect().await.unwrap();
        h.node.disconnect().await.unwrap();
        gw.open();
        gw.push(json!({"type": "res", "id": "1", "result": {}}));

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.node.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn events_require_pairing() {
        let mut h = harness(direct_only());
        assert!(matches!(
            h.node.send_event("clipboard", json!({"text": "x"})).await,
            Err(NodeError::NotPaired)
        ));

        let mut gw = pair(&mut h).await;
        h.node.send_event("clipboard", json!({"text": "x"})).await.unwrap();
        let frame = gw.next_frame().await;
        assert_eq!(frame["method"], "node.event");
        assert_eq!(frame["params"]["event"], "clipboard");
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_connects_sends_and_disconnects() {
        let mut h = harness(direct_only());
        let node = h.node.clone();
        let sent = tokio::spawn(async move {
            node.send_one_shot("agent.request", json!({"message": "hi"})).await
        });

        let mut gw = h.gateways.recv().await.unwrap();
        gw.open();
        gw.push(json!({"event": "connect.challenge", "payload": {"nonce": "n"}}));
        assert_eq!(gw.next_frame().await["method"], "connect");
        gw.push(json!({"type": "res", "id": "1", "result": {}}));

        let event = gw.next_frame().await;
        assert_eq!(event["method"], "node.event");
        assert_eq!(event["params"]["event"], "agent.request");
        assert_eq!(event["params"]["payload"]["message"], "hi");
        assert!(sent.await.unwrap());

        gw.closed().await;
        h.node
            .wait_for(|s| s.state == ConnectionState::Disconnected)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_gives_up_when_the_gateway_never_pairs() {
        let mut h = harness(direct_only());
        let node = h.node.clone();
        let sent = tokio::spawn(async move { node.send_one_shot("note", json!("x")).await });

        let gw = h.gateways.recv().await.unwrap();
        gw.open();
        assert!(!sent.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_one_shot_supersedes_older() {
        let mut h = harness(direct_only());
        let first_node = h.node.clone();
        let first = tokio::spawn(async move { first_node.send_one_shot("a", json!(1)).await });
        let gw = h.gateways.recv().await.unwrap();

        let second_node = h.node.clone();
        let second = tokio::spawn(async move { second_node.send_one_shot("b", json!(2)).await });
        assert!(!first.await.unwrap());

        let mut gw = gw;
        gw.open();
        gw.push(json!({"event": "connect.challenge", "payload": {"nonce": "n"}}));
        gw.next_frame().await;
        gw.push(json!({"type": "res", "id": "1", "result": {}}));
        assert_eq!(gw.next_frame().await["params"]["event"], "b");
        assert!(second.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_is_refused_mid_attempt() {
        let mut h = harness(direct_only());
        h.node.connect().await.unwrap();
        let _gw = h.gateways.recv().await.unwrap();

        assert!(matches!(
            h.node.reconfigure(ConnectionConfig::new("other", "t2")).await,
            Err(NodeError::AttemptInProgress)
        ));

        h.node.disconnect().await.unwrap();
        h.node
            .reconfigure(ConnectionConfig::new("localhost", "t2"))
            .await
            .unwrap();
        h.node.connect().await.unwrap();
        assert_eq!(h.gateways.recv().await.unwrap().url, "ws://localhost:18789");
    }

    #[tokio::test(start_paused = true)]
    async fn results_after_disconnect_are_dropped() {
        let mut h = harness_with(direct_only(), Arc::new(HangingProvider));
        let gw = pair(&mut h).await;

        gw.push(json!({"id": "slow", "method": "clipboard.read"}));
        time::sleep(Duration::from_millis(10)).await;
        h.node.disconnect().await.unwrap();
        time::sleep(Duration::from_secs(200)).await;
        assert_eq!(h.node.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn revoke_clears_a_grant() {
        let h = harness(direct_only());
        h.node
            .permissions()
            .grant(PermissionCategory::File, Some(Duration::from_secs(60)));
        assert!(h.node.permissions().is_granted(PermissionCategory::File));
        h.node.revoke(PermissionCategory::File);
        assert!(!h.node.permissions().is_granted(PermissionCategory::File));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_engine() {
        let h = harness(direct_only());
        h.node.shutdown().await;
        assert!(matches!(h.node.connect().await, Err(NodeError::EngineStopped)));
    }
}
