use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use switchboard_gateway::{ErrorKind, ToolExecutor, ToolFailure};
use tracing::{debug, info, warn};

use super::connection::VendorSink;
use super::model::{ToolCallRecord, ToolOutcome};
use super::state::SessionState;
use crate::agents::{AgentRegistry, ToolRoute};
use crate::errors::SessionError;
use crate::events::OutboundEvent;

/// A completed function call as announced by the vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptorState {
    Idle,
    AwaitingToolResult { call_id: String },
    RefreshingSession { call_id: String },
}

/// Turns vendor function calls into a tool result, a configuration refresh and a
/// request for the next turn, in that order.
///
/// Calls are handled one at a time. The refresh is sent after every call, switch or
/// not, because the vendor does not retain the active agent across tool round-trips.
///
/// A call runs in three steps so that callers sharing the session state can release
/// it while the tool executes: [`begin`](Self::begin) and [`finish`](Self::finish)
/// need the state, [`execute`](Self::execute) does not.
pub struct ToolCallInterceptor {
    registry: Arc<AgentRegistry>,
    executor: Arc<dyn ToolExecutor>,
    tool_timeout: Duration,
    state: InterceptorState,
}

/// A call whose route has been resolved but whose result is not yet delivered.
#[derive(Debug)]
pub struct PendingCall {
    call: FunctionCall,
    started_at: DateTime<Utc>,
    start: Instant,
    arguments: Option<Value>,
    switched: bool,
    dispatch: Dispatch,
}

#[derive(Debug)]
enum Dispatch {
    Execute { tool: String, arguments: Value },
    Ready(Result<Value, ToolFailure>),
}

impl PendingCall {
    pub fn call_id(&self) -> &str {
        &self.call.call_id
    }
}

impl ToolCallInterceptor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        executor: Arc<dyn ToolExecutor>,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            executor,
            tool_timeout,
            state: InterceptorState::Idle,
        }
    }

    pub fn state(&self) -> &InterceptorState {
        &self.state
    }

    /// Run all three steps against exclusively held state.
    pub async fn handle<S: VendorSink + ?Sized>(
        &mut self,
        call: FunctionCall,
        shared: &mut SessionState,
        sink: &mut S,
    ) -> Result<ToolCallRecord, SessionError> {
        let mut pending = self.begin(call, shared);
        self.execute(&mut pending).await;
        self.finish(pending, shared, sink).await
    }

    /// Parse the arguments and resolve the call against the active agent.
    ///
    /// Switches take effect here. Only tools the active agent exposes are routed;
    /// anything else fails as an unknown tool.
    pub fn begin(&mut self, call: FunctionCall, shared: &mut SessionState) -> PendingCall {
        self.state = InterceptorState::AwaitingToolResult {
            call_id: call.call_id.clone(),
        };
        let started_at = Utc::now();
        let start = Instant::now();

        let arguments = parse_arguments(&call.arguments);
        let route = self.registry.route_for(&shared.session, &call.name).cloned();
        let mut switched = false;
        let dispatch = match (route, &arguments) {
            (_, Err(failure)) => Dispatch::Ready(Err(failure.clone())),
            (Some(ToolRoute::Switch(target)), Ok(_)) => {
                let outcome = self.switch(shared, &target);
                switched = outcome.is_ok();
                Dispatch::Ready(outcome)
            }
            (Some(ToolRoute::Execute(tool)), Ok(args)) => Dispatch::Execute {
                tool,
                arguments: args.clone(),
            },
            (None, Ok(_)) => Dispatch::Ready(Err(ToolFailure::not_found(&call.name))),
        };

        PendingCall {
            call,
            started_at,
            start,
            arguments: arguments.ok(),
            switched,
            dispatch,
        }
    }

    /// Run the tool, bounded by the configured timeout. Needs no session state.
    pub async fn execute(&self, pending: &mut PendingCall) {
        if let Dispatch::Execute { tool, arguments } = &pending.dispatch {
            let outcome = self
                .executor
                .execute(tool, arguments.clone(), self.tool_timeout)
                .await;
            pending.dispatch = Dispatch::Ready(outcome);
        }
    }

    /// Deliver the result, refresh the active agent and request the next turn.
    pub async fn finish<S: VendorSink + ?Sized>(
        &mut self,
        pending: PendingCall,
        shared: &mut SessionState,
        sink: &mut S,
    ) -> Result<ToolCallRecord, SessionError> {
        let result = self.deliver(pending, shared, sink).await;
        self.state = InterceptorState::Idle;
        result
    }

    async fn deliver<S: VendorSink + ?Sized>(
        &mut self,
        pending: PendingCall,
        shared: &mut SessionState,
        sink: &mut S,
    ) -> Result<ToolCallRecord, SessionError> {
        let PendingCall {
            call,
            started_at,
            start,
            arguments,
            switched,
            dispatch,
        } = pending;
        let outcome = match dispatch {
            Dispatch::Ready(outcome) => outcome,
            Dispatch::Execute { tool, .. } => Err(ToolFailure::new(
                ErrorKind::Unavailable,
                format!("Tool {} was never executed", tool),
            )),
        };

        let output = match &outcome {
            Ok(value) => value.clone(),
            Err(failure) => failure.to_output(),
        };
        sink.send(OutboundEvent::function_call_output(&call.call_id, &output))
            .await?;

        self.state = InterceptorState::RefreshingSession {
            call_id: call.call_id.clone(),
        };
        let active = self.registry.active_definition(&shared.session)?;
        let config = shared.config.apply(&active.config_layer());
        sink.send(OutboundEvent::SessionUpdate { session: config })
            .await?;
        sink.send(OutboundEvent::ResponseCreate).await?;

        shared.session.tools_invoked.insert(call.name.clone());
        let duration = start.elapsed();
        let outcome = match outcome {
            Ok(_) if switched => ToolOutcome::Switched {
                agent: shared.session.active_agent.clone(),
            },
            Ok(_) => ToolOutcome::Succeeded,
            Err(failure) => {
                warn!(
                    session_id = %shared.session.id,
                    call_id = %call.call_id,
                    tool = %call.name,
                    kind = %failure.kind,
                    duration_ms = duration.as_millis() as u64,
                    "tool call failed: {}",
                    failure.message
                );
                ToolOutcome::Failed {
                    kind: failure.kind.to_string(),
                    message: failure.message,
                }
            }
        };
        if !matches!(outcome, ToolOutcome::Failed { .. }) {
            info!(
                session_id = %shared.session.id,
                call_id = %call.call_id,
                tool = %call.name,
                agent = %shared.session.active_agent,
                duration_ms = duration.as_millis() as u64,
                "tool call completed"
            );
        }

        Ok(ToolCallRecord {
            call_id: call.call_id,
            name: call.name,
            arguments: arguments.unwrap_or(Value::Null),
            started_at,
            outcome,
            duration,
        })
    }

    fn switch(&self, shared: &mut SessionState, target: &str) -> Result<Value, ToolFailure> {
        let previous = self
            .registry
            .set_active(&mut shared.session, target)
            .map_err(|_| ToolFailure::not_found(target))?;
        info!(
            session_id = %shared.session.id,
            from = %previous,
            to = %target,
            "agent switched from {} to {}",
            previous,
            target
        );
        Ok(json!({"status": "switched", "agent": target}))
    }
}

fn parse_arguments(raw: &str) -> Result<Value, ToolFailure> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| {
        debug!(error = %e, "unparseable tool arguments");
        ToolFailure::new(
            ErrorKind::InvalidArguments,
            format!("Arguments are not valid JSON: {}", e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentCatalog, AgentSpec, LoadContext};
    use crate::collaborators::StaticTopics;
    use crate::config::{LayeredConfig, SessionConfigLayer};
    use crate::session::model::Session;
    use async_trait::async_trait;
    use switchboard_protocol::Tool;

    /// Records every event the interceptor emits.
    #[derive(Default)]
    struct RecordingSink(Vec<OutboundEvent>);

    #[async_trait]
    impl VendorSink for RecordingSink {
        async fn send(&mut self, event: OutboundEvent) -> Result<(), SessionError> {
            self.0.push(event);
            Ok(())
        }
    }

    struct FakeExecutor;

    #[async_trait]
    impl ToolExecutor for FakeExecutor {
        async fn execute(
            &self,
            name: &str,
            arguments: Value,
            timeout: Duration,
        ) -> Result<Value, ToolFailure> {
            match name {
                "lookup_order" => Ok(json!({
                    "order_id": arguments["order_id"],
                    "status": "shipped"
                })),
                "slow_search" => match tokio::time::timeout(
                    timeout,
                    tokio::time::sleep(Duration::from_secs(60)),
                )
                .await
                {
                    Ok(()) => Ok(json!({})),
                    Err(_) => Err(ToolFailure::timeout(name)),
                },
                _ => Err(ToolFailure::not_found(name)),
            }
        }

        fn tools(&self) -> Vec<Tool> {
            vec![
                Tool::new("lookup_order", "Look up an order", json!({"type": "object"})),
                Tool::new("slow_search", "Search slowly", json!({"type": "object"})),
            ]
        }
    }

    fn spec(id: &str, instructions: &str, tools: &[&str], transfers: &[&str]) -> AgentSpec {
        AgentSpec {
            id: id.into(),
            description: format!("Handles {}", id),
            instructions: instructions.into(),
            tools: tools.iter().map(|s| s.to_string()).collect(),
            transfers: transfers.iter().map(|s| s.to_string()).collect(),
            dynamic_description: false,
            session: SessionConfigLayer::default(),
        }
    }

    async fn setup(active: &str) -> (ToolCallInterceptor, SessionState) {
        let catalog = AgentCatalog::new(
            vec![
                spec("root", "You route requests.", &["slow_search"], &["database_agent"]),
                spec("database_agent", "You manage records.", &["lookup_order"], &["root"]),
            ],
            "root",
        )
        .unwrap();
        let executor: Arc<dyn ToolExecutor> = Arc::new(FakeExecutor);
        let tools = executor.tools();
        let registry = AgentRegistry::load(
            &catalog,
            LoadContext {
                customer: None,
                topics: &StaticTopics(vec![]),
                tools: &tools,
            },
        )
        .await
        .unwrap();

        let defaults = SessionConfigLayer::new()
            .with("voice", json!("alloy"))
            .with("turn_detection", json!({"type": "server_vad", "threshold": 0.5}));
        let state = SessionState::new(
            Session::new(None, active),
            LayeredConfig::new(Arc::new(defaults)),
        );
        let interceptor =
            ToolCallInterceptor::new(Arc::new(registry), executor, Duration::from_millis(50));
        (interceptor, state)
    }

    fn call(name: &str, arguments: &str) -> FunctionCall {
        FunctionCall {
            call_id: "call_1".into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    fn output_of(event: &OutboundEvent) -> Value {
        match event {
            OutboundEvent::ItemCreate {
                item: crate::events::OutputItem::FunctionCallOutput { output, .. },
            } => serde_json::from_str(output).unwrap(),
            other => panic!("expected function_call_output, got {:?}", other),
        }
    }

    fn assert_refresh_then_turn(events: &[OutboundEvent]) {
        assert_eq!(events.len(), 3, "unexpected events: {:?}", events);
        assert!(matches!(events[1], OutboundEvent::SessionUpdate { .. }));
        assert_eq!(events[2], OutboundEvent::ResponseCreate);
    }

    #[tokio::test]
    async fn test_successful_tool_call_refreshes_current_agent() {
        let (mut interceptor, mut state) = setup("database_agent").await;
        let mut sink = RecordingSink::default();

        let record = interceptor
            .handle(call("lookup_order", r#"{"order_id":"123"}"#), &mut state, &mut sink)
            .await
            .unwrap();

        assert_refresh_then_turn(&sink.0);
        assert_eq!(
            output_of(&sink.0[0]),
            json!({"order_id": "123", "status": "shipped"})
        );
        match &sink.0[1] {
            OutboundEvent::SessionUpdate { session } => {
                assert_eq!(session.instructions(), Some("You manage records."));
                assert_eq!(session.tool_names(), vec!["lookup_order", "transfer_to_root"]);
                assert_eq!(session.get("voice"), Some(&json!("alloy")));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(record.outcome, ToolOutcome::Succeeded);
        assert_eq!(record.arguments, json!({"order_id": "123"}));
        assert!(state.session.tools_invoked.contains("lookup_order"));
        assert_eq!(interceptor.state(), &InterceptorState::Idle);
    }

    #[tokio::test]
    async fn test_switch_updates_active_agent() {
        let (mut interceptor, mut state) = setup("root").await;
        let mut sink = RecordingSink::default();

        let record = interceptor
            .handle(call("transfer_to_database_agent", ""), &mut state, &mut sink)
            .await
            .unwrap();

        assert_refresh_then_turn(&sink.0);
        assert_eq!(
            output_of(&sink.0[0]),
            json!({"status": "switched", "agent": "database_agent"})
        );
        match &sink.0[1] {
            OutboundEvent::SessionUpdate { session } => {
                assert_eq!(session.instructions(), Some("You manage records."));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(state.session.active_agent, "database_agent");
        assert!(state.session.agents_used.contains("database_agent"));
        assert_eq!(
            record.outcome,
            ToolOutcome::Switched {
                agent: "database_agent".into()
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_output() {
        let (mut interceptor, mut state) = setup("root").await;
        let mut sink = RecordingSink::default();

        let record = interceptor
            .handle(call("slow_search", "{}"), &mut state, &mut sink)
            .await
            .unwrap();

        assert_refresh_then_turn(&sink.0);
        assert_eq!(output_of(&sink.0[0])["error"]["kind"], "timeout");
        assert!(matches!(
            record.outcome,
            ToolOutcome::Failed { ref kind, .. } if kind == "timeout"
        ));
        assert_eq!(state.session.active_agent, "root");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_tool_error() {
        let (mut interceptor, mut state) = setup("root").await;
        let mut sink = RecordingSink::default();

        interceptor
            .handle(call("transfer_to_nowhere", "{}"), &mut state, &mut sink)
            .await
            .unwrap();

        assert_refresh_then_turn(&sink.0);
        assert_eq!(output_of(&sink.0[0])["error"]["kind"], "not_found");
        assert_eq!(state.session.active_agent, "root");
    }

    #[tokio::test]
    async fn test_tools_of_other_agents_are_not_routed() {
        let (mut interceptor, mut state) = setup("root").await;
        let mut sink = RecordingSink::default();

        for name in ["lookup_order", "transfer_to_root"] {
            interceptor
                .handle(call(name, r#"{"order_id":"123"}"#), &mut state, &mut sink)
                .await
                .unwrap();
        }

        assert_eq!(sink.0.len(), 6);
        assert_eq!(output_of(&sink.0[0])["error"]["kind"], "not_found");
        assert_eq!(output_of(&sink.0[3])["error"]["kind"], "not_found");
        assert_eq!(state.session.active_agent, "root");
    }

    #[tokio::test]
    async fn test_state_may_change_while_tool_executes() {
        let (mut interceptor, mut state) = setup("database_agent").await;
        let mut sink = RecordingSink::default();

        let mut pending =
            interceptor.begin(call("lookup_order", r#"{"order_id":"7"}"#), &mut state);
        assert_eq!(pending.call_id(), "call_1");
        assert_eq!(
            interceptor.state(),
            &InterceptorState::AwaitingToolResult {
                call_id: "call_1".into()
            }
        );

        interceptor.execute(&mut pending).await;
        state
            .config
            .apply(&SessionConfigLayer::new().with("voice", json!("ash")));
        interceptor
            .finish(pending, &mut state, &mut sink)
            .await
            .unwrap();

        assert_refresh_then_turn(&sink.0);
        assert_eq!(output_of(&sink.0[0])["status"], "shipped");
        match &sink.0[1] {
            OutboundEvent::SessionUpdate { session } => {
                assert_eq!(session.get("voice"), Some(&json!("ash")));
                assert_eq!(session.instructions(), Some("You manage records."));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(interceptor.state(), &InterceptorState::Idle);
    }

    #[tokio::test]
    async fn test_invalid_arguments_skip_execution() {
        let (mut interceptor, mut state) = setup("database_agent").await;
        let mut sink = RecordingSink::default();

        interceptor
            .handle(call("lookup_order", "{order_id: 1"), &mut state, &mut sink)
            .await
            .unwrap();

        assert_refresh_then_turn(&sink.0);
        assert_eq!(output_of(&sink.0[0])["error"]["kind"], "invalid_arguments");
    }

    #[tokio::test]
    async fn test_every_call_gets_exactly_one_refresh() {
        let (mut interceptor, mut state) = setup("root").await;
        let mut sink = RecordingSink::default();

        for (name, args) in [
            ("transfer_to_database_agent", ""),
            ("lookup_order", r#"{"order_id":"9"}"#),
            ("no_such_tool", "{}"),
            ("transfer_to_root", "{}"),
        ] {
            interceptor
                .handle(call(name, args), &mut state, &mut sink)
                .await
                .unwrap();
        }

        let mut refreshes_since_output = None;
        for event in &sink.0 {
            match event {
                OutboundEvent::ItemCreate { .. } => {
                    assert_eq!(refreshes_since_output, None);
                    refreshes_since_output = Some(0);
                }
                OutboundEvent::SessionUpdate { .. } => {
                    *refreshes_since_output.as_mut().unwrap() += 1;
                }
                OutboundEvent::ResponseCreate => {
                    assert_eq!(refreshes_since_output.take(), Some(1));
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(sink.0.len(), 12);
        assert_eq!(state.session.active_agent, "root");
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent_without_changes() {
        let (mut interceptor, mut state) = setup("database_agent").await;
        let mut sink = RecordingSink::default();

        for _ in 0..2 {
            interceptor
                .handle(call("lookup_order", r#"{"order_id":"1"}"#), &mut state, &mut sink)
                .await
                .unwrap();
        }
        assert_eq!(sink.0[1], sink.0[4]);
    }
}
