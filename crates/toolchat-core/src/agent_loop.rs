use crate::error::AgentError;
use crate::provider::ChatModel;
use crate::tool_registry::ToolRegistry;
use crate::types::{Message, ToolSchema};

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reply appended when the model keeps calling tools past the iteration cap.
pub const MAX_ITERATIONS_REPLY: &str = "[Agent reached maximum tool iterations]";

/// Agent Runtime: model + tools composed into a reasoning loop.
///
/// Holds no per-request state, so one instance is shared by every in-flight
/// request.
pub struct AgentRuntime {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    schemas: Vec<ToolSchema>,
    max_iterations: usize,
}

/// Messages produced by one invocation, following the input.
#[derive(Debug, Clone)]
pub struct AgentTrace {
    pub messages: Vec<Message>,
    input_len: usize,
}

impl AgentTrace {
    /// Only what the reasoning loop added, in emission order.
    pub fn generated(&self) -> &[Message] {
        &self.messages[self.input_len.min(self.messages.len())..]
    }
}

impl AgentRuntime {
    /// Compose a runtime. Rejects tool sets the model could not address
    /// unambiguously.
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        max_iterations: usize,
    ) -> Result<Self, AgentError> {
        if max_iterations == 0 {
            return Err(AgentError::Session("max_iterations must be at least 1".into()));
        }

        let schemas = tools.schemas();
        let mut seen = HashSet::new();
        for schema in &schemas {
            if schema.name.trim().is_empty() {
                return Err(AgentError::Session("tool with empty name".into()));
            }
            if !seen.insert(schema.name.as_str()) {
                return Err(AgentError::Session(format!("duplicate tool name: {}", schema.name)));
            }
            if !schema.parameters.is_object() {
                return Err(AgentError::Session(format!(
                    "tool '{}' has a non-object parameter schema",
                    schema.name
                )));
            }
        }

        Ok(Self {
            model,
            tools,
            schemas,
            max_iterations,
        })
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.list_names()
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Run the reasoning loop over `messages` until the model answers without
    /// requesting tools. Tool failures are fed back to the model as text; only
    /// model errors abort the invocation.
    pub async fn invoke(&self, messages: Vec<Message>) -> Result<AgentTrace, AgentError> {
        let input_len = messages.len();
        let mut running = messages;

        for iteration in 1..=self.max_iterations {
            debug!("Agent loop iteration {}", iteration);

            let mut reply = self.model.complete(&running, &self.schemas).await?;

            if let Some(calls) = reply.tool_calls.as_mut() {
                // Some providers omit ids; the tool result must still reference its call.
                for call in calls.iter_mut().filter(|c| c.id.is_empty()) {
                    call.id = format!("call_{}", Uuid::new_v4().simple());
                }
            }

            let calls = reply.requested_tool_calls().to_vec();
            running.push(reply);

            if calls.is_empty() {
                return Ok(AgentTrace {
                    messages: running,
                    input_len,
                });
            }

            for call in &calls {
                info!("Tool used: {}", call.name);
                let output = match serde_json::from_str::<serde_json::Value>(&call.arguments) {
                    Ok(args) => self.tools.execute(&call.name, &call.id, args).await,
                    Err(e) => crate::types::ToolOutput {
                        tool_call_id: call.id.clone(),
                        content: format!("Invalid JSON arguments: {}", e),
                        is_error: true,
                    },
                };
                if output.is_error {
                    warn!(tool = %call.name, "Tool call failed: {}", output.content);
                }
                running.push(Message::tool_result(&output.tool_call_id, &call.name, output.content));
            }
        }

        warn!(
            "Hit max tool iterations ({}), forcing text response",
            self.max_iterations
        );
        running.push(Message::assistant(MAX_ITERATIONS_REPLY));
        Ok(AgentTrace {
            messages: running,
            input_len,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tool_registry::Tool;
    use crate::types::{Role, ToolCall};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Model that replays a fixed script of replies.
    pub(crate) struct ScriptedModel {
        replies: Mutex<VecDeque<Result<Message, AgentError>>>,
        pub(crate) seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(replies: Vec<Result<Message, AgentError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: &[Message], _tools: &[ToolSchema]) -> Result<Message, AgentError> {
            self.seen.lock().await.push(messages.to_vec());
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(Message::assistant("(script exhausted)")))
        }
    }

    pub(crate) fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args.to_string(),
        }
    }

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase text"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, args: Value) -> Result<String, AgentError> {
            Ok(args["text"].as_str().unwrap_or_default().to_uppercase())
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut r = ToolRegistry::new();
        r.register(Arc::new(Upper));
        Arc::new(r)
    }

    #[tokio::test]
    async fn test_tool_round_trip_then_answer() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(Message::assistant_with_tool_calls(
                "",
                vec![call("c1", "upper", json!({"text": "abc"}))],
            )),
            Ok(Message::assistant("Result is ABC")),
        ]));
        let runtime = AgentRuntime::new(model.clone(), registry(), 5).unwrap();

        let trace = runtime
            .invoke(vec![Message::system("sys"), Message::user("go")])
            .await
            .unwrap();
        let generated = trace.generated();
        assert_eq!(generated.len(), 3);
        assert_eq!(generated[1].role, Role::Tool);
        assert_eq!(generated[1].content, "ABC");
        assert_eq!(generated[1].name.as_deref(), Some("upper"));
        assert_eq!(generated[1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(generated[2].content, "Result is ABC");

        // Second model call saw the tool result.
        let seen = model.seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].len(), 4);
    }

    #[tokio::test]
    async fn test_bad_arguments_and_unknown_tool_are_fed_back() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(Message::assistant_with_tool_calls(
                "",
                vec![
                    ToolCall {
                        id: "c1".into(),
                        name: "upper".into(),
                        arguments: "{not json".into(),
                    },
                    call("c2", "missing", json!({})),
                ],
            )),
            Ok(Message::assistant("sorry")),
        ]));
        let runtime = AgentRuntime::new(model, registry(), 5).unwrap();
        let trace = runtime.invoke(vec![Message::user("go")]).await.unwrap();
        let generated = trace.generated();
        assert!(generated[1].content.starts_with("Invalid JSON arguments"));
        assert_eq!(generated[2].content, "Tool not found: missing");
        assert_eq!(generated[3].content, "sorry");
    }

    #[tokio::test]
    async fn test_missing_call_ids_are_filled() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(Message::assistant_with_tool_calls(
                "",
                vec![call("", "upper", json!({"text": "x"}))],
            )),
            Ok(Message::assistant("ok")),
        ]));
        let runtime = AgentRuntime::new(model, registry(), 5).unwrap();
        let trace = runtime.invoke(vec![Message::user("go")]).await.unwrap();
        let generated = trace.generated();
        let id = &generated[0].requested_tool_calls()[0].id;
        assert!(id.starts_with("call_"));
        assert_eq!(generated[1].tool_call_id.as_ref(), Some(id));
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let looping: Vec<_> = (0..3)
            .map(|i| {
                Ok(Message::assistant_with_tool_calls(
                    "",
                    vec![call(&format!("c{}", i), "upper", json!({"text": "x"}))],
                ))
            })
            .collect();
        let runtime = AgentRuntime::new(Arc::new(ScriptedModel::new(looping)), registry(), 2).unwrap();
        let trace = runtime.invoke(vec![Message::user("go")]).await.unwrap();
        assert_eq!(trace.generated().last().unwrap().content, MAX_ITERATIONS_REPLY);
    }

    #[tokio::test]
    async fn test_model_error_aborts() {
        let model = Arc::new(ScriptedModel::new(vec![Err(AgentError::Provider("429".into()))]));
        let runtime = AgentRuntime::new(model, registry(), 5).unwrap();
        let err = runtime.invoke(vec![Message::user("go")]).await.unwrap_err();
        assert_eq!(err.to_string(), "Provider error: 429");
    }

    #[test]
    fn test_composition_rejects_bad_tool_sets() {
        let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::new(vec![]));
        assert!(AgentRuntime::new(model.clone(), registry(), 0).is_err());
        let runtime = AgentRuntime::new(model, registry(), 3).unwrap();
        assert_eq!(runtime.tool_names(), vec!["upper"]);
        assert_eq!(runtime.model_name(), "scripted");
    }
}
