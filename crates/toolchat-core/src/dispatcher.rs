//! Request Dispatcher: turns one chat request into a [`ChatOutcome`].
//!
//! Work is handed to the background host, which runs the reasoning loop as
//! its own task. The dispatcher waits for that task under the request
//! timeout; on expiry the task is left running and only the wait ends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::history::{format_history, truncate_input};
use crate::host::AgentHandle;
use crate::types::{ChatOutcome, FailureKind, HistoryEntry, Message, Role, ToolInvocation, ToolOutputRecord};

/// Reply used when the agent finished without any text of its own.
pub const FALLBACK_REPLY: &str =
    "Done! Let me know if anything needs clarifying or if there is more you would like me to do.";

const STARTING_UP_REPLY: &str = "**Starting up**\n\n\
I'm still getting my tools ready. Give me a moment and try again.\n\n\
- Connecting to the tool server\n\
- Loading web capabilities";

const NOT_READY_REPLY: &str = "**Technical difficulties**\n\n\
I can't reach my agent right now. Please try again in a moment.";

const TIMEOUT_REPLY: &str = "**Request timeout**\n\n\
This is taking longer than expected, usually because the query is complex \
or a site is slow to respond.\n\n\
**Try this:**\n\
- Break the question into smaller parts\n\
- Rephrase it more simply";

fn internal_error_reply(detail: &str) -> String {
    format!(
        "**Processing error**\n\nI ran into a problem: {}\n\n\
**Next steps:**\n\
- Try rephrasing your question\n\
- Make the request more specific\n\
- Wait a moment and try again",
        detail
    )
}

#[derive(Debug, Clone)]
struct DispatchSettings {
    system_prompt: Arc<str>,
    max_input_chars: usize,
    preview_chars: usize,
    request_timeout: Duration,
}

/// Bridges request handlers to the background host.
#[derive(Clone)]
pub struct Dispatcher {
    host: AgentHandle,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(host: AgentHandle, config: &AppConfig) -> Self {
        Self {
            host,
            settings: DispatchSettings {
                system_prompt: Arc::from(config.system_prompt.as_str()),
                max_input_chars: config.agent.max_input_chars,
                preview_chars: config.agent.tool_output_preview_chars,
                request_timeout: config.agent.request_timeout(),
            },
        }
    }

    /// Override the per-request wall-clock bound.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.settings.request_timeout = timeout;
        self
    }

    pub fn host(&self) -> &AgentHandle {
        &self.host
    }

    /// Process one chat request. Never panics or errors; every failure is a
    /// [`ChatOutcome::Failure`].
    pub async fn process_chat(&self, message: String, history: Vec<HistoryEntry>) -> ChatOutcome {
        if !self.host.is_initialized() {
            return not_initialized();
        }

        let job = run_chat(self.host.clone(), self.settings.clone(), message, history);
        match self.host.submit(job).await {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => {
                error!("Chat task failed: {}", e);
                ChatOutcome::failure(
                    FailureKind::InternalError,
                    e.to_string(),
                    internal_error_reply(&e.to_string()),
                )
            }
            None => {
                warn!("Agent host not running; cannot process chat");
                ChatOutcome::failure(
                    FailureKind::NotReady,
                    "Failed to process message",
                    NOT_READY_REPLY,
                )
            }
        }
    }
}

fn not_initialized() -> ChatOutcome {
    ChatOutcome::failure(
        FailureKind::NotInitialized,
        "Agent is not initialized",
        STARTING_UP_REPLY,
    )
}

/// Runs on the background context.
async fn run_chat(
    host: AgentHandle,
    settings: DispatchSettings,
    message: String,
    history: Vec<HistoryEntry>,
) -> ChatOutcome {
    let Some(runtime) = host.snapshot().runtime else {
        return not_initialized();
    };

    let input = truncate_input(&message, settings.max_input_chars);
    let mut messages = format_history(&settings.system_prompt, &history);
    messages.push(Message::user(input.into_owned()));

    let started = Instant::now();
    let invocation = tokio::spawn(async move { runtime.invoke(messages).await });

    match tokio::time::timeout(settings.request_timeout, invocation).await {
        Ok(Ok(Ok(trace))) => {
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "Agent invocation finished");
            collect_outcome(trace.generated(), settings.preview_chars)
        }
        Ok(Ok(Err(e))) => {
            error!(kind = e.kind(), "Error during agent invocation: {}", e);
            let detail = e.to_string();
            ChatOutcome::failure(FailureKind::InternalError, &detail, internal_error_reply(&detail))
        }
        Ok(Err(join_err)) => {
            error!("Agent invocation aborted: {}", join_err);
            let detail = join_err.to_string();
            ChatOutcome::failure(FailureKind::InternalError, &detail, internal_error_reply(&detail))
        }
        Err(_) => {
            error!(
                timeout_secs = settings.request_timeout.as_secs_f64(),
                "Agent invocation timed out"
            );
            ChatOutcome::failure(
                FailureKind::Timeout,
                format!(
                    "Request timed out after {:?}. Please try a simpler query.",
                    settings.request_timeout
                ),
                TIMEOUT_REPLY,
            )
        }
    }
}

/// Walk the messages one invocation produced and build the success payload.
pub fn collect_outcome(messages: &[Message], preview_chars: usize) -> ChatOutcome {
    let mut ai_text = String::new();
    let mut tool_invocations = Vec::new();
    let mut tool_outputs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::Assistant => {
                let calls = msg.requested_tool_calls();
                for call in calls {
                    let args = serde_json::from_str(&call.arguments)
                        .unwrap_or_else(|_| Value::String(call.arguments.clone()));
                    tool_invocations.push(ToolInvocation {
                        name: call.name.clone(),
                        args,
                        id: call.id.clone(),
                    });
                }
                // Preambles of tool-calling turns are not answers.
                if calls.is_empty() && !msg.content.trim().is_empty() {
                    ai_text = msg.content.clone();
                }
            }
            Role::Tool => {
                let name = msg.name.clone().unwrap_or_default();
                info!(tool = %name, chars = msg.content.chars().count(), "Tool output");
                tool_outputs.push(ToolOutputRecord {
                    name,
                    content: preview(&msg.content, preview_chars),
                    full_content: msg.content.clone(),
                });
            }
            Role::System | Role::User => {}
        }
    }

    if ai_text.is_empty() {
        ai_text = FALLBACK_REPLY.to_string();
    }

    ChatOutcome::Success {
        ai_text,
        tool_invocations,
        tool_outputs,
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::tests::{call, ScriptedModel};
    use crate::error::AgentError;
    use crate::host::AgentHost;
    use crate::lifecycle::tests::{test_config, FailAt, FakeBackend, FakeBridge};
    use crate::provider::ChatModel;
    use crate::types::{ToolCall, ToolSchema};
    use async_trait::async_trait;
    use serde_json::json;
    use tracing::instrument::WithSubscriber;

    const WAIT: Duration = Duration::from_secs(5);

    async fn started(backend: FakeBackend) -> Dispatcher {
        let config = test_config();
        let handle = AgentHost::start(config.clone(), Arc::new(backend)).unwrap();
        assert!(tokio::time::timeout(WAIT, handle.wait_initialized()).await.unwrap());
        Dispatcher::new(handle, &config)
    }

    /// Model that echoes the last user message, calling one tool first when
    /// asked to.
    struct EchoModel {
        delay: Duration,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, messages: &[Message], _tools: &[ToolSchema]) -> Result<Message, AgentError> {
            tokio::time::sleep(self.delay).await;
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            match messages.last().map(|m| m.role) {
                Some(Role::User) if last.starts_with("tool:") => {
                    let tag = last.trim_start_matches("tool:").to_string();
                    Ok(Message::assistant_with_tool_calls(
                        "",
                        vec![call(&format!("id-{}", tag), "firecrawl_scrape", json!({"tag": tag}))],
                    ))
                }
                Some(Role::Tool) => Ok(Message::assistant(format!("tool said {}", last))),
                _ => Ok(Message::assistant(format!("echo {}", last))),
            }
        }
    }

    #[tokio::test]
    async fn test_success_collects_tools_and_last_text() {
        let backend = FakeBackend::new(FailAt::Nowhere).with_model(|| {
            Arc::new(EchoModel {
                delay: Duration::ZERO,
            })
        });
        let dispatcher = started(backend).await;

        let outcome = dispatcher
            .process_chat("tool:a".into(), vec![HistoryEntry::user("earlier"), HistoryEntry::bot("reply")])
            .await;
        match outcome {
            ChatOutcome::Success {
                ai_text,
                tool_invocations,
                tool_outputs,
            } => {
                assert_eq!(tool_invocations.len(), 1);
                assert_eq!(tool_invocations[0].name, "firecrawl_scrape");
                assert_eq!(tool_invocations[0].id, "id-a");
                assert_eq!(tool_invocations[0].args, json!({"tag": "a"}));
                assert_eq!(tool_outputs.len(), 1);
                assert_eq!(tool_outputs[0].full_content, r#"firecrawl_scrape <- {"tag":"a"}"#);
                assert_eq!(ai_text, r#"tool said firecrawl_scrape <- {"tag":"a"}"#);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        dispatcher.host().shutdown(WAIT).await;
    }

    #[tokio::test]
    async fn test_not_initialized_skips_runtime() {
        let config = test_config();
        let handle = AgentHost::start(config.clone(), Arc::new(FakeBackend::new(FailAt::Connect))).unwrap();
        let dispatcher = Dispatcher::new(handle, &config);

        let outcome = dispatcher.process_chat("hello".into(), vec![]).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::NotInitialized));
        match outcome {
            ChatOutcome::Failure { error, user_message, .. } => {
                assert_eq!(error, "not_initialized: Agent is not initialized");
                assert!(user_message.contains("Starting up"));
            }
            _ => unreachable!(),
        }
        dispatcher.host().shutdown(WAIT).await;
    }

    #[tokio::test]
    async fn test_missing_background_context_is_not_ready() {
        let dispatcher = Dispatcher::new(AgentHandle::detached(), &test_config());
        let outcome = dispatcher.process_chat("hello".into(), vec![]).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::NotReady));
    }

    #[tokio::test]
    async fn test_timeout_abandons_invocation() {
        let backend = FakeBackend::new(FailAt::Nowhere).with_model(|| {
            Arc::new(EchoModel {
                delay: Duration::from_secs(30),
            })
        });
        let dispatcher = started(backend)
            .await
            .with_request_timeout(Duration::from_millis(50));

        let begun = Instant::now();
        let outcome = dispatcher.process_chat("hello".into(), vec![]).await;
        assert!(begun.elapsed() < Duration::from_secs(5));
        match outcome {
            ChatOutcome::Failure { kind, error, user_message } => {
                assert_eq!(kind, FailureKind::Timeout);
                assert!(error.starts_with("timeout:"));
                assert!(user_message.contains("timeout"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        dispatcher.host().shutdown(WAIT).await;
    }

    #[tokio::test]
    async fn test_model_error_is_internal_error() {
        let backend = FakeBackend::new(FailAt::Nowhere).with_model(|| {
            Arc::new(ScriptedModel::new(vec![Err(AgentError::Provider(
                "quota exceeded".into(),
            ))]))
        });
        let dispatcher = started(backend).await;

        match dispatcher.process_chat("hello".into(), vec![]).await {
            ChatOutcome::Failure { kind, error, user_message } => {
                assert_eq!(kind, FailureKind::InternalError);
                assert_eq!(error, "internal_error: Provider error: quota exceeded");
                assert!(user_message.contains("quota exceeded"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        dispatcher.host().shutdown(WAIT).await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_stay_independent() {
        let backend = FakeBackend::new(FailAt::Nowhere)
            .with_bridge(FakeBridge {
                tools: vec!["firecrawl_scrape"],
                call_delay: Some(Duration::from_millis(20)),
                ..Default::default()
            })
            .with_model(|| {
                Arc::new(EchoModel {
                    delay: Duration::from_millis(10),
                })
            });
        let dispatcher = started(backend).await;

        let tags: Vec<String> = (0..8).map(|i| format!("t{}", i)).collect();
        let outcomes = futures::future::join_all(
            tags.iter()
                .map(|tag| dispatcher.process_chat(format!("tool:{}", tag), vec![])),
        )
        .await;

        for (tag, outcome) in tags.iter().zip(outcomes) {
            match outcome {
                ChatOutcome::Success {
                    tool_invocations,
                    tool_outputs,
                    ai_text,
                } => {
                    assert_eq!(tool_invocations.len(), 1);
                    assert_eq!(tool_invocations[0].id, format!("id-{}", tag));
                    assert_eq!(tool_outputs.len(), 1);
                    assert!(tool_outputs[0].full_content.contains(tag.as_str()));
                    assert!(ai_text.contains(tag.as_str()));
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        dispatcher.host().shutdown(WAIT).await;
    }

    #[tokio::test]
    async fn test_long_message_truncated_before_runtime() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(Message::assistant("ok"))]));
        let seen_by = model.clone();
        let backend = FakeBackend::new(FailAt::Nowhere).with_model(move || model.clone());
        let dispatcher = started(backend).await;

        let outcome = dispatcher.process_chat("x".repeat(175_123), vec![]).await;
        assert!(outcome.is_success());
        let seen = seen_by.seen.lock().await;
        let user = seen[0].last().unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content.chars().count(), 175_000);
        dispatcher.host().shutdown(WAIT).await;
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock().unwrap()).matches(needle).count()
        }
    }

    #[tokio::test]
    async fn test_truncation_warns_once_per_request() {
        let backend = FakeBackend::new(FailAt::Nowhere).with_model(|| {
            Arc::new(ScriptedModel::new(vec![
                Ok(Message::assistant("first")),
                Ok(Message::assistant("second")),
            ]))
        });
        let dispatcher = started(backend).await;

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing::Dispatch::new(
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .finish(),
        );

        let over = run_chat(
            dispatcher.host.clone(),
            dispatcher.settings.clone(),
            "x".repeat(175_001),
            vec![],
        )
        .with_subscriber(subscriber.clone())
        .await;
        assert!(over.is_success());
        assert_eq!(logs.count("Message truncated"), 1);

        let exact = run_chat(
            dispatcher.host.clone(),
            dispatcher.settings.clone(),
            "x".repeat(175_000),
            vec![],
        )
        .with_subscriber(subscriber)
        .await;
        assert!(exact.is_success());
        assert_eq!(logs.count("Message truncated"), 1);
        dispatcher.host().shutdown(WAIT).await;
    }

    #[test]
    fn test_collect_outcome_preview_and_fallback() {
        let long = "y".repeat(1500);
        let messages = vec![
            Message::assistant_with_tool_calls(
                "Let me look.",
                vec![ToolCall {
                    id: "c1".into(),
                    name: "firecrawl_search".into(),
                    arguments: "not json".into(),
                }],
            ),
            Message::tool_result("c1", "firecrawl_search", long.clone()),
            Message::assistant("   "),
        ];

        match collect_outcome(&messages, 1000) {
            ChatOutcome::Success {
                ai_text,
                tool_invocations,
                tool_outputs,
            } => {
                assert_eq!(ai_text, FALLBACK_REPLY);
                assert_eq!(tool_invocations[0].args, json!("not json"));
                assert_eq!(tool_outputs[0].content.len(), 1003);
                assert!(tool_outputs[0].content.ends_with("..."));
                assert_eq!(tool_outputs[0].full_content, long);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        match collect_outcome(&[], 1000) {
            ChatOutcome::Success { ai_text, .. } => assert_eq!(ai_text, FALLBACK_REPLY),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_preview_keeps_short_output() {
        assert_eq!(preview("short", 1000), "short");
        assert_eq!(preview(&"z".repeat(1000), 1000).len(), 1000);
    }
}
