use crate::config::AgentConfig;
use crate::llm::{LlmError, ModelRequest, ModelService};
use crate::models::{Conversation, ConversationTurn, TokenUsage, ToolInvocation};
use crate::tools::{Dispatcher, ToolSpec};

pub const DEFAULT_MAX_TURNS: usize = 20;

pub const SYSTEM_PROMPT: &str = r#"You are a helpful AI coding agent operating in a local codebase.

Before producing any final answer, verify whether the user's request relates to local files by making at least one function call (listing directories or reading file contents).

Treat every request as potentially related to local files until direct inspection shows otherwise.

How to work:
1. Form a concrete hypothesis about which files or directories are relevant.
2. Check it with the available functions:
   - List files and directories to discover structure
   - Read file contents to confirm relevance
   - Execute scripts only when running them is necessary
   - Write or overwrite files when a change is required
3. Do not ask the user clarifying questions.
4. Do not answer from general knowledge alone.
5. If nothing relevant turns up after reasonable inspection, say so and list the searches you performed.

All paths are relative to the working directory. The working directory is injected automatically; never specify it.

Only give the final answer after tool-based verification has been attempted."#;

/// A run that could not reach a final answer.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("turn budget exhausted: no final answer after {max_turns} model turns")]
    BudgetExceeded { max_turns: usize },
    #[error("model service returned a malformed response: {0}")]
    MalformedResponse(String),
    #[error("model service call failed: {0}")]
    Service(LlmError),
}

impl RunError {
    /// Stable status tag, recorded with stored transcripts.
    pub fn code(&self) -> &'static str {
        match self {
            RunError::BudgetExceeded { .. } => "budget_exceeded",
            RunError::MalformedResponse(_) => "malformed_response",
            RunError::Service(_) => "service_error",
        }
    }
}

impl From<LlmError> for RunError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::InvalidResponse(message) => RunError::MalformedResponse(message),
            other => RunError::Service(other),
        }
    }
}

/// Everything a finished run leaves behind, successful or not.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: Result<String, RunError>,
    pub conversation: Conversation,
    /// Model calls made.
    pub turns: usize,
    pub tool_calls: usize,
    pub usage: TokenUsage,
}

impl RunReport {
    pub fn into_result(self) -> Result<String, RunError> {
        self.outcome
    }
}

enum RunState {
    AwaitingModel,
    DispatchingTools(Vec<ToolInvocation>),
    Done(String),
}

/// Drives the model ↔ tool cycle for one prompt.
pub struct Orchestrator<M> {
    model: M,
    dispatcher: Dispatcher,
    tools: Vec<ToolSpec>,
    system_prompt: String,
    max_turns: usize,
}

impl<M: ModelService> Orchestrator<M> {
    pub fn new(model: M, dispatcher: Dispatcher) -> Self {
        let tools = dispatcher.catalog();
        Self {
            model,
            dispatcher,
            tools,
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn from_config(model: M, config: AgentConfig) -> Self {
        Self::new(model, Dispatcher::new(config.tools)).with_max_turns(config.max_turns)
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Run until the model answers without tool calls, the turn budget runs
    /// out, or the model service fails.
    ///
    /// Tool calls from one reply are dispatched one at a time in reply order,
    /// so a later call sees the effects of an earlier one.
    pub async fn run(&self, prompt: &str) -> RunReport {
        let mut conversation = Conversation::new();
        conversation.push(ConversationTurn::user(prompt));

        let mut turns = 0;
        let mut tool_calls = 0;
        let mut usage = TokenUsage::default();
        let mut state = RunState::AwaitingModel;

        let outcome = loop {
            state = match state {
                RunState::AwaitingModel => {
                    if turns >= self.max_turns {
                        tracing::warn!(max_turns = self.max_turns, "turn budget exhausted");
                        break Err(RunError::BudgetExceeded {
                            max_turns: self.max_turns,
                        });
                    }
                    debug_assert!(conversation.unanswered_calls().is_empty());

                    turns += 1;
                    let request = ModelRequest {
                        system_instruction: &self.system_prompt,
                        conversation: &conversation,
                        tools: &self.tools,
                    };
                    let response = match self.model.generate(request).await {
                        Ok(response) => response,
                        Err(e) => break Err(RunError::from(e)),
                    };
                    usage += response.usage;
                    tracing::debug!(
                        turn = turns,
                        prompt_tokens = response.usage.prompt_tokens,
                        completion_tokens = response.usage.completion_tokens,
                        tool_calls = response.invocations.len(),
                        "model turn"
                    );

                    let has_text = response.text.as_deref().is_some_and(|t| !t.is_empty());
                    if response.invocations.is_empty() && !has_text {
                        break Err(RunError::MalformedResponse(
                            "response has neither text nor tool calls".to_string(),
                        ));
                    }

                    conversation.push(ConversationTurn::model(
                        response.text.clone(),
                        &response.invocations,
                    ));

                    if response.invocations.is_empty() {
                        RunState::Done(response.text.unwrap_or_default())
                    } else {
                        RunState::DispatchingTools(response.invocations)
                    }
                }
                RunState::DispatchingTools(invocations) => {
                    for invocation in &invocations {
                        tracing::info!(tool = %invocation.name, "calling function");
                        tracing::debug!(tool = %invocation.name, args = ?invocation.arguments, "function arguments");

                        let result = self.dispatcher.dispatch(invocation).await;
                        tracing::debug!(tool = %invocation.name, result = %result.payload(), "function result");

                        conversation.push(ConversationTurn::tool(result.to_response()));
                        tool_calls += 1;
                    }
                    RunState::AwaitingModel
                }
                RunState::Done(text) => break Ok(text),
            };
        };

        RunReport {
            outcome,
            conversation,
            turns,
            tool_calls,
            usage,
        }
    }
}
