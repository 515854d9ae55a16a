use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool call ID this message is responding to (for tool results).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced this message (for tool results).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls requested by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Tool calls carried by an assistant message, empty for anything else.
    pub fn requested_tool_calls(&self) -> &[ToolCall] {
        match (&self.role, &self.tool_calls) {
            (Role::Assistant, Some(calls)) => calls,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as produced by the model.
    pub arguments: String,
}

/// Schema definition for a tool's parameters, sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// A caller-supplied conversation turn: `{"type": "user"|"bot", "content": "..."}`.
///
/// `type` is kept as raw JSON so that unknown or non-string values can be
/// dropped instead of failing the whole request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type", default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            kind: Some(Value::String("user".into())),
            content: content.into(),
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            kind: Some(Value::String("bot".into())),
            content: content.into(),
        }
    }

    pub fn kind_str(&self) -> Option<&str> {
        self.kind.as_ref().and_then(Value::as_str)
    }
}

/// A tool call made during one request, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Value,
    pub id: String,
}

/// A tool result produced during one request, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutputRecord {
    pub name: String,
    /// Display copy, cut to the preview length with a trailing `...`.
    pub content: String,
    pub full_content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotInitialized,
    NotReady,
    Timeout,
    InternalError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotInitialized => "not_initialized",
            FailureKind::NotReady => "not_ready",
            FailureKind::Timeout => "timeout",
            FailureKind::InternalError => "internal_error",
        }
    }
}

/// Result of one chat request.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Success {
        ai_text: String,
        tool_invocations: Vec<ToolInvocation>,
        tool_outputs: Vec<ToolOutputRecord>,
    },
    Failure {
        kind: FailureKind,
        /// Machine-readable `"<kind>: <detail>"`.
        error: String,
        /// Human-phrased reply for the chat window.
        user_message: String,
    },
}

impl ChatOutcome {
    pub fn failure(kind: FailureKind, detail: impl AsRef<str>, user_message: impl Into<String>) -> Self {
        ChatOutcome::Failure {
            kind,
            error: format!("{}: {}", kind.as_str(), detail.as_ref()),
            user_message: user_message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ChatOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ChatOutcome::Failure { kind, .. } => Some(*kind),
            ChatOutcome::Success { .. } => None,
        }
    }
}
