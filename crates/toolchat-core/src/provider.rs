//! Model Client: one chat-completion round trip against the language model.

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::AgentError;
use crate::types::{Message, Role, ToolCall, ToolSchema};

/// A language model that answers a message list with one assistant message,
/// possibly carrying tool calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Message, AgentError>;
}

/// [`ChatModel`] over any OpenAI-compatible chat completions endpoint.
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    config: ProviderConfig,
}

impl OpenAiModel {
    /// Build the client. Fails when no API key can be resolved.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, AgentError> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            AgentError::Config(format!(
                "{} environment variable is required for model '{}'",
                config.api_key_env, config.model
            ))
        })?;
        if config.model.trim().is_empty() {
            return Err(AgentError::Config("provider.model must not be empty".into()));
        }

        let openai_config = OpenAIConfig::new()
            .with_api_base(&config.api_base)
            .with_api_key(api_key);

        Ok(Self {
            client: Client::with_config(openai_config),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<Message, AgentError> {
        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder
            .model(&self.config.model)
            .messages(to_openai_messages(messages)?)
            .temperature(self.config.temperature)
            .max_completion_tokens(self.config.max_tokens);

        if !tools.is_empty() {
            request_builder.tools(to_openai_tools(tools)?);
        }

        let request = request_builder
            .build()
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Provider("No choices in response".into()))?;

        let content = choice.message.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        debug!(
            model = %self.config.model,
            tool_calls = tool_calls.len(),
            chars = content.len(),
            "Model replied"
        );

        if tool_calls.is_empty() {
            Ok(Message::assistant(content))
        } else {
            Ok(Message::assistant_with_tool_calls(content, tool_calls))
        }
    }
}

fn to_openai_tools(tools: &[ToolSchema]) -> Result<Vec<ChatCompletionTool>, AgentError> {
    tools
        .iter()
        .map(|s| {
            let func = FunctionObjectArgs::default()
                .name(&s.name)
                .description(&s.description)
                .parameters(s.parameters.clone())
                .build()
                .map_err(|e| AgentError::Provider(format!("function '{}': {}", s.name, e)))?;
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(func)
                .build()
                .map_err(|e| AgentError::Provider(format!("tool '{}': {}", s.name, e)))
        })
        .collect()
}

/// Convert our Message types to async-openai request messages.
fn to_openai_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
    let provider_err = |e: async_openai::error::OpenAIError| AgentError::Provider(e.to_string());
    let mut result = Vec::with_capacity(messages.len());

    for msg in messages {
        let converted: ChatCompletionRequestMessage = match msg.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.as_str())
                .build()
                .map_err(provider_err)?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(msg.content.as_str())
                .build()
                .map_err(provider_err)?
                .into(),
            Role::Assistant => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                if !msg.content.is_empty() {
                    builder.content(msg.content.as_str());
                }
                let calls = msg.requested_tool_calls();
                if !calls.is_empty() {
                    builder.tool_calls(
                        calls
                            .iter()
                            .map(|tc| ChatCompletionMessageToolCall {
                                id: tc.id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: FunctionCall {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect::<Vec<_>>(),
                    );
                }
                builder.build().map_err(provider_err)?.into()
            }
            Role::Tool => ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(msg.tool_call_id.as_deref().unwrap_or(""))
                .content(msg.content.as_str())
                .build()
                .map_err(provider_err)?
                .into(),
        };
        result.push(converted);
    }

    Ok(result)
}
