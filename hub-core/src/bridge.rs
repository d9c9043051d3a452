//! Execution Bridge.
//!
//! The single public entry point: composes the Command Registry (C1), the
//! Input Validator (C2), the Rate Limiter (C3), the Audit Sink (C4), the
//! Subprocess Runner (C5), the Stream Multiplexer (C6), and the Connection
//! Registry (C11) into `execute` and `execute_stream`. Nothing outside this
//! module is allowed to invoke the Subprocess Runner directly.

use std::sync::Arc;
use std::time::Duration;

use hub_protocol::command::CommandSpec;
use hub_protocol::execution::ExecutionRequest;
use hub_protocol::execution::ExecutionResult;
use hub_protocol::stream::Subscription;
use hub_protocol::AuditEvent;
use hub_protocol::AuditOutcome;
use hub_protocol::CommandId;
use hub_protocol::HubError;
use hub_protocol::StreamHandle;
use hub_protocol::UserIdentity;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::info;
use tracing::warn;

use crate::audit::AuditSink;
use crate::command_registry::CommandRegistry;
use crate::config::CoreConfig;
use crate::connections::ConnectionRegistry;
use crate::rate_limiter::RateLimiter;
use crate::runner::ExecParams;
use crate::runner::Runner;
use crate::stream::StreamMultiplexer;
use crate::validator::Validator;

/// Translates a [`CommandSpec`] and validated arguments into the concrete
/// program/args/env the Subprocess Runner should invoke. The bridge never
/// builds this by string concatenation; implementers choose the mapping
/// from `CommandId` to an external binary invocation.
pub trait CommandMapper: Send + Sync {
    fn map(
        &self,
        spec: &CommandSpec,
        user: &UserIdentity,
        validated: &[(String, crate::validator::ValidatedArg)],
    ) -> ExecParams;
}

pub struct ExecutionBridge {
    config: CoreConfig,
    registry: CommandRegistry,
    rate_limiter: RateLimiter,
    audit: Arc<dyn AuditSink>,
    runner: Runner,
    streams: Arc<StreamMultiplexer>,
    connections: Arc<ConnectionRegistry>,
    mapper: Arc<dyn CommandMapper>,
}

impl ExecutionBridge {
    pub fn new(
        config: CoreConfig,
        registry: CommandRegistry,
        audit: Arc<dyn AuditSink>,
        mapper: Arc<dyn CommandMapper>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(&config);
        let runner = Runner::new(config.max_stdout_bytes, config.max_stderr_bytes);
        let streams = Arc::new(StreamMultiplexer::new(
            config.stream_subscriber_queue_len,
            config.stream_post_terminal_grace,
        ));
        let connections = Arc::new(ConnectionRegistry::new());
        spawn_heartbeat(
            streams.clone(),
            connections.clone(),
            config.heartbeat_interval,
            config.heartbeat_missed_pings_limit,
        );
        Self {
            config,
            registry,
            rate_limiter,
            audit,
            runner,
            streams,
            connections,
            mapper,
        }
    }

    /// Validate, admit, run, and audit a non-streaming invocation end to
    /// end. Validation (step 2) always runs before rate-limit admission
    /// (step 4): a malformed request is rejected without spending a slot in
    /// the caller's token bucket.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, HubError> {
        let spec = self.lookup_and_authorize(&request)?;

        let validated = match Validator::new(&self.config).validate(spec, &request.raw_args) {
            Ok(validated) => validated,
            Err(err) => {
                self.audit_reject(&request, AuditOutcome::RejectedValidation, &err).await;
                return Err(err);
            }
        };

        if let Err(err) = self.admit(&request, spec) {
            self.audit_reject(&request, AuditOutcome::RejectedRate, &err).await;
            return Err(err);
        }

        self.audit
            .append(AuditEvent::new(
                request.user.clone(),
                request.command_id.clone(),
                request.request_id,
                AuditOutcome::Admitted,
                "",
            ))
            .await;

        let params = self.build_params(spec, &request, &validated);

        self.audit
            .append(AuditEvent::new(
                request.user.clone(),
                request.command_id.clone(),
                request.request_id,
                AuditOutcome::Started,
                "",
            ))
            .await;

        let cancel = Arc::new(Notify::new());
        let outcome = self.runner.run(params, cancel).await;

        let audit_outcome = match &outcome {
            Ok(output) if output.exit_code == 0 => AuditOutcome::Completed,
            Ok(_) => AuditOutcome::Failed,
            Err(HubError::Cancelled(_)) => AuditOutcome::Cancelled,
            Err(_) => AuditOutcome::Failed,
        };
        self.audit
            .append(AuditEvent::new(
                request.user.clone(),
                request.command_id.clone(),
                request.request_id,
                audit_outcome,
                "",
            ))
            .await;

        let output = outcome?;
        Ok(ExecutionResult {
            success: output.exit_code == 0,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            started_at: chrono::Utc::now() - chrono::Duration::from_std(output.wall_time).unwrap_or_default(),
            finished_at: chrono::Utc::now(),
            output_truncated: output.output_truncated,
        })
    }

    /// Validate, admit, and begin a streaming invocation, returning the
    /// stream handle the caller subscribes against. Same step ordering as
    /// [`Self::execute`]: validation before rate-limit admission.
    pub async fn execute_stream(
        &self,
        request: ExecutionRequest,
    ) -> Result<StreamHandle, HubError> {
        let spec = self.lookup_and_authorize(&request)?;
        if !spec.streaming_capable {
            return Err(HubError::Forbidden(format!(
                "{} is not streaming-capable",
                request.command_id
            )));
        }

        let validated = match Validator::new(&self.config).validate(spec, &request.raw_args) {
            Ok(validated) => validated,
            Err(err) => {
                self.audit_reject(&request, AuditOutcome::RejectedValidation, &err).await;
                return Err(err);
            }
        };

        if let Err(err) = self.admit(&request, spec) {
            self.audit_reject(&request, AuditOutcome::RejectedRate, &err).await;
            return Err(err);
        }

        self.audit
            .append(AuditEvent::new(
                request.user.clone(),
                request.command_id.clone(),
                request.request_id,
                AuditOutcome::Admitted,
                "",
            ))
            .await;

        let params = self.build_params(spec, &request, &validated);

        self.audit
            .append(AuditEvent::new(
                request.user.clone(),
                request.command_id.clone(),
                request.request_id,
                AuditOutcome::Started,
                "",
            ))
            .await;

        let handle = self
            .streams
            .open(
                request.command_id.clone(),
                request.user.clone(),
                self.config.stream_ring_buffer_len,
            )
            .await;

        let (event_tx, event_rx) = mpsc::channel(256);
        let cancel = Arc::new(Notify::new());
        let runner = Runner::new(self.config.max_stdout_bytes, self.config.max_stderr_bytes);
        let run_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = runner.run_streaming(params, run_cancel, event_tx).await {
                warn!(error = %err, "streaming invocation failed to start");
            }
        });

        let streams = self.streams.clone();
        let stream_id = handle.stream_id;
        let pump_cancel = cancel.clone();
        tokio::spawn(async move {
            streams.pump(stream_id, event_rx, pump_cancel).await;
        });

        info!(stream_id = %handle.stream_id, command = %request.command_id, "streaming invocation started");
        Ok(handle)
    }

    /// Authorize `user` against the stream's owner and register the
    /// resulting subscription with the Connection Registry before handing
    /// back its receiver. Any caller who isn't the stream's owner is
    /// rejected before a subscriber slot is ever created.
    pub async fn subscribe(
        &self,
        stream_id: uuid::Uuid,
        user: &UserIdentity,
    ) -> Result<(Subscription, mpsc::Receiver<hub_protocol::stream::Frame>), HubError> {
        let owner = self
            .streams
            .owner(stream_id)
            .await
            .ok_or(HubError::StreamNotFound(stream_id))?;
        if owner.user_id != user.user_id {
            return Err(HubError::Forbidden(format!(
                "{user} is not the owner of stream {stream_id}"
            )));
        }

        let (subscriber_id, rx) = self.streams.subscribe(stream_id).await?;
        let subscription = Subscription {
            stream_id,
            subscriber_id,
            cursor: 0,
        };
        self.connections.register(subscription.clone(), user).await;
        Ok((subscription, rx))
    }

    pub async fn unsubscribe(&self, stream_id: uuid::Uuid, subscriber_id: uuid::Uuid) {
        self.streams.unsubscribe(stream_id, subscriber_id).await;
        self.connections.deregister(subscriber_id).await;
    }

    pub fn connections(&self) -> Arc<ConnectionRegistry> {
        self.connections.clone()
    }

    /// Emit a `ServerShutdown` terminal frame to every live stream, for an
    /// orderly process shutdown.
    pub async fn shutdown(&self) {
        self.streams.shutdown().await;
    }

    fn lookup_and_authorize(&self, request: &ExecutionRequest) -> Result<&CommandSpec, HubError> {
        let spec = self
            .registry
            .lookup(&request.command_id)
            .ok_or_else(|| HubError::UnknownCommand(request.command_id.as_str().to_string()))?;
        if !request.user.has_all_scopes(&spec.required_scopes) {
            return Err(HubError::Forbidden(format!(
                "{} lacks a required scope for {}",
                request.user, request.command_id
            )));
        }
        Ok(spec)
    }

    fn admit(&self, request: &ExecutionRequest, spec: &CommandSpec) -> Result<(), HubError> {
        self.rate_limiter
            .try_admit(&request.user, &request.command_id)
            .map_err(HubError::RateLimited)?;
        let _ = spec;
        Ok(())
    }

    async fn audit_reject(&self, request: &ExecutionRequest, outcome: AuditOutcome, err: &HubError) {
        self.audit
            .append(AuditEvent::new(
                request.user.clone(),
                request.command_id.clone(),
                request.request_id,
                outcome,
                err.to_string(),
            ))
            .await;
    }

    fn build_params(
        &self,
        spec: &CommandSpec,
        request: &ExecutionRequest,
        validated: &[(String, crate::validator::ValidatedArg)],
    ) -> ExecParams {
        let mut params = self.mapper.map(spec, &request.user, validated);
        // A deadline override may only shorten the command's own ceiling,
        // never lengthen it.
        params.timeout = match request.deadline_override {
            Some(deadline) => deadline.min(spec.max_runtime),
            None => spec.max_runtime,
        };
        params
    }
}

/// Periodically sweep every registered subscription and disconnect any
/// whose owning stream has already been reaped by the multiplexer without
/// the client calling `unsubscribe` (a crashed or disappeared client).
/// `missed_pings_limit` consecutive ticks of "stream gone" are tolerated
/// before the entry is dropped, guarding against a race with the
/// post-terminal grace window.
fn spawn_heartbeat(
    streams: Arc<StreamMultiplexer>,
    connections: Arc<ConnectionRegistry>,
    interval: Duration,
    missed_pings_limit: u32,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for subscriber_id in connections.all_subscriber_ids().await {
                let Some(stream_id) = connections.stream_id_for(subscriber_id).await else {
                    continue;
                };
                let alive = streams.state(stream_id).await.is_some();
                let disconnect = connections
                    .record_heartbeat(subscriber_id, alive, missed_pings_limit)
                    .await;
                if disconnect {
                    warn!(subscriber = %subscriber_id, stream_id = %stream_id, "missed heartbeat limit exceeded, disconnecting");
                    streams.unsubscribe(stream_id, subscriber_id).await;
                    connections.deregister(subscriber_id).await;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_protocol::ArgSpec;
    use hub_protocol::ArgType;
    use hub_protocol::Scope;
    use hub_protocol::UserIdentity;
    use std::collections::HashMap;

    struct EchoMapper;
    impl CommandMapper for EchoMapper {
        fn map(
            &self,
            _spec: &CommandSpec,
            _user: &UserIdentity,
            _validated: &[(String, crate::validator::ValidatedArg)],
        ) -> ExecParams {
            ExecParams {
                program: "echo".to_string(),
                args: vec!["ok".to_string()],
                env: HashMap::new(),
                timeout: Duration::from_secs(5),
            }
        }
    }

    fn specs() -> Vec<CommandSpec> {
        vec![
            CommandSpec {
                command_id: CommandId::new("server_enable"),
                args: vec![ArgSpec::required("server", ArgType::String)],
                max_runtime: Duration::from_secs(5),
                streaming_capable: false,
                required_scopes: vec![Scope::new("server:enable")],
            },
            CommandSpec {
                command_id: CommandId::new("server_logs"),
                args: vec![ArgSpec::required("server", ArgType::String)],
                max_runtime: Duration::from_secs(5),
                streaming_capable: true,
                required_scopes: vec![Scope::new("server:enable")],
            },
        ]
    }

    fn bridge() -> ExecutionBridge {
        let registry = CommandRegistry::from_specs(specs());
        ExecutionBridge::new(
            CoreConfig::default(),
            registry,
            crate::audit::InMemoryAuditSink::new(16),
            Arc::new(EchoMapper),
        )
    }

    fn bridge_with_audit() -> (ExecutionBridge, Arc<crate::audit::InMemoryAuditSink>) {
        let registry = CommandRegistry::from_specs(specs());
        let audit = crate::audit::InMemoryAuditSink::new(16);
        let bridge = ExecutionBridge::new(CoreConfig::default(), registry, audit.clone(), Arc::new(EchoMapper));
        (bridge, audit)
    }

    fn user() -> UserIdentity {
        UserIdentity::new(uuid::Uuid::new_v4(), "acme").with_scopes([Scope::new("server:enable")])
    }

    #[tokio::test]
    async fn rejects_unknown_command() {
        let bridge = bridge();
        let request = ExecutionRequest::new(CommandId::new("rm_rf"), user());
        let err = bridge.execute(request).await.unwrap_err();
        assert!(matches!(err, HubError::UnknownCommand(_)));
    }

    #[tokio::test]
    async fn rejects_missing_scope() {
        let bridge = bridge();
        let unscoped = UserIdentity::new(uuid::Uuid::new_v4(), "acme");
        let request = ExecutionRequest::new(CommandId::new("server_enable"), unscoped)
            .with_arg("server", "web-1");
        let err = bridge.execute(request).await.unwrap_err();
        assert!(matches!(err, HubError::Forbidden(_)));
    }

    #[tokio::test]
    async fn executes_a_well_formed_request() {
        let bridge = bridge();
        let request =
            ExecutionRequest::new(CommandId::new("server_enable"), user()).with_arg("server", "web-1");
        let result = bridge.execute(request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.stdout_lossy().trim(), "ok");
    }

    #[tokio::test]
    async fn streaming_requires_a_streaming_capable_command() {
        let bridge = bridge();
        let request =
            ExecutionRequest::new(CommandId::new("server_enable"), user()).with_arg("server", "web-1");
        let err = bridge.execute_stream(request).await.unwrap_err();
        assert!(matches!(err, HubError::Forbidden(_)));
    }

    #[tokio::test]
    async fn a_well_formed_request_is_admitted_before_it_starts() {
        let (bridge, audit) = bridge_with_audit();
        let caller = user();
        let request = ExecutionRequest::new(CommandId::new("server_enable"), caller.clone())
            .with_arg("server", "web-1");
        let request_id = request.request_id;
        bridge.execute(request).await.unwrap();

        let events = audit.events_for(&caller).await;
        let admitted_at = events
            .iter()
            .position(|e| e.request_id == request_id && e.outcome == AuditOutcome::Admitted);
        let started_at = events
            .iter()
            .position(|e| e.request_id == request_id && e.outcome == AuditOutcome::Started);
        assert!(admitted_at.is_some() && started_at.is_some());
        assert!(admitted_at < started_at);
    }

    #[tokio::test]
    async fn a_malformed_request_is_rejected_before_rate_limiting() {
        let (bridge, audit) = bridge_with_audit();
        let caller = user();
        // Missing the required "server" argument fails validation.
        let request = ExecutionRequest::new(CommandId::new("server_enable"), caller.clone());
        let request_id = request.request_id;
        let err = bridge.execute(request).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidArguments(_)));

        let events = audit.events_for(&caller).await;
        assert!(events
            .iter()
            .any(|e| e.request_id == request_id && e.outcome == AuditOutcome::RejectedValidation));
        assert!(!events
            .iter()
            .any(|e| e.request_id == request_id && e.outcome == AuditOutcome::Admitted));
    }

    #[tokio::test]
    async fn subscribe_rejects_a_caller_who_does_not_own_the_stream() {
        let bridge = bridge();
        let owner = user();
        let request = ExecutionRequest::new(CommandId::new("server_logs"), owner).with_arg("server", "web-1");
        let handle = bridge.execute_stream(request).await.unwrap();

        let stranger = UserIdentity::new(uuid::Uuid::new_v4(), "acme").with_scopes([Scope::new("server:enable")]);
        let err = bridge.subscribe(handle.stream_id, &stranger).await.unwrap_err();
        assert!(matches!(err, HubError::Forbidden(_)));
    }

    #[tokio::test]
    async fn subscribe_succeeds_for_the_stream_owner() {
        let bridge = bridge();
        let owner = user();
        let request =
            ExecutionRequest::new(CommandId::new("server_logs"), owner.clone()).with_arg("server", "web-1");
        let handle = bridge.execute_stream(request).await.unwrap();

        let (subscription, _rx) = bridge.subscribe(handle.stream_id, &owner).await.unwrap();
        assert_eq!(subscription.stream_id, handle.stream_id);
        assert_eq!(bridge.connections().len().await, 1);
    }
}
