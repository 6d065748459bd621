use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use ai_agent::llm::{LlmError, ModelRequest, ModelResponse, ModelService};
use ai_agent::models::{Part, Role, TokenUsage, ToolInvocation};
use ai_agent::tools::{Dispatcher, SandboxRoot, ToolConfig};
use ai_agent::workflows::{Orchestrator, RunError};

/// Replays canned replies and remembers what each request carried.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

struct SeenRequest {
    turns: usize,
    last_tool_content: Option<String>,
    tool_names: Vec<String>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<ModelResponse, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::default(),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn generate(&self, request: ModelRequest<'_>) -> Result<ModelResponse, LlmError> {
        let last_tool_content = request
            .conversation
            .turns()
            .iter()
            .rev()
            .find(|t| t.role == Role::Tool)
            .and_then(|t| {
                t.parts.iter().find_map(|p| match p {
                    Part::Response(r) => Some(r.content.clone()),
                    _ => None,
                })
            });
        self.seen.lock().unwrap().push(SeenRequest {
            turns: request.conversation.len(),
            last_tool_content,
            tool_names: request.tools.iter().map(|t| t.name.to_string()).collect(),
        });

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(call_reply(vec![call("list", "get_files_info", json!({}))])))
    }
}

fn usage() -> TokenUsage {
    TokenUsage {
        prompt_tokens: 10,
        completion_tokens: 5,
    }
}

fn text_reply(text: &str) -> ModelResponse {
    ModelResponse {
        text: Some(text.to_string()),
        invocations: vec![],
        usage: usage(),
    }
}

fn call_reply(invocations: Vec<ToolInvocation>) -> ModelResponse {
    ModelResponse {
        text: None,
        invocations,
        usage: usage(),
    }
}

fn call(id: &str, name: &str, args: Value) -> ToolInvocation {
    ToolInvocation {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args.as_object().cloned().unwrap_or_default(),
    }
}

fn orchestrator(temp: &TempDir, model: Arc<ScriptedModel>) -> Orchestrator<Arc<ScriptedModel>> {
    let root = SandboxRoot::new(temp.path()).unwrap();
    Orchestrator::new(model, Dispatcher::new(ToolConfig::new(root)))
}

#[tokio::test]
async fn test_text_reply_finishes_first_turn() {
    let temp = TempDir::new().unwrap();
    let model = ScriptedModel::new(vec![Ok(text_reply("Nothing to do."))]);

    let report = orchestrator(&temp, model.clone()).run("hello").await;

    assert_eq!(report.turns, 1);
    assert_eq!(report.tool_calls, 0);
    assert_eq!(report.usage.prompt_tokens, 10);
    assert_eq!(report.conversation.len(), 2);
    assert_eq!(report.into_result().unwrap(), "Nothing to do.");

    let seen = model.seen.lock().unwrap();
    assert_eq!(
        seen[0].tool_names,
        vec!["get_files_info", "get_file_content", "write_file", "run_python_file"]
    );
}

#[tokio::test]
async fn test_tool_round_then_answer() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("main.py"), "print('hi')\n").unwrap();
    let model = ScriptedModel::new(vec![
        Ok(call_reply(vec![call(
            "c1",
            "get_file_content",
            json!({ "file_path": "main.py" }),
        )])),
        Ok(text_reply("It prints hi.")),
    ]);

    let report = orchestrator(&temp, model.clone()).run("what does main.py print?").await;

    assert_eq!(report.turns, 2);
    assert_eq!(report.tool_calls, 1);
    assert_eq!(report.usage.prompt_tokens, 20);
    assert_eq!(report.usage.completion_tokens, 10);
    assert!(report.conversation.unanswered_calls().is_empty());

    let roles: Vec<Role> = report.conversation.turns().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Model, Role::Tool, Role::Model]);

    let seen = model.seen.lock().unwrap();
    assert_eq!(seen[1].turns, 3);
    assert_eq!(seen[1].last_tool_content.as_deref(), Some("print('hi')\n"));
    drop(seen);

    assert_eq!(report.into_result().unwrap(), "It prints hi.");
}

#[tokio::test]
async fn test_budget_exceeded_after_exact_turn_count() {
    let temp = TempDir::new().unwrap();
    let model = ScriptedModel::new(vec![]);

    let report = orchestrator(&temp, model.clone())
        .with_max_turns(3)
        .run("keep listing")
        .await;

    assert_eq!(model.calls(), 3);
    assert_eq!(report.turns, 3);
    assert_eq!(report.tool_calls, 3);
    assert!(report.conversation.unanswered_calls().is_empty());
    assert!(matches!(
        report.into_result(),
        Err(RunError::BudgetExceeded { max_turns: 3 })
    ));
}

#[tokio::test]
async fn test_calls_in_one_reply_run_in_order() {
    let temp = TempDir::new().unwrap();
    let model = ScriptedModel::new(vec![
        Ok(call_reply(vec![
            call(
                "w",
                "write_file",
                json!({ "file_path": "notes/todo.txt", "content": "ship it" }),
            ),
            call("r", "get_file_content", json!({ "file_path": "notes/todo.txt" })),
        ])),
        Ok(text_reply("Done.")),
    ]);

    let report = orchestrator(&temp, model.clone()).run("write then read").await;

    assert_eq!(report.tool_calls, 2);
    let seen = model.seen.lock().unwrap();
    assert_eq!(seen[1].last_tool_content.as_deref(), Some("ship it"));
    drop(seen);

    let responses: Vec<String> = report
        .conversation
        .turns()
        .iter()
        .flat_map(|t| t.parts.iter())
        .filter_map(|p| match p {
            Part::Response(r) => Some(r.call_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(responses, vec!["w", "r"]);
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_tool_errors_feed_back_and_loop_continues() {
    let temp = TempDir::new().unwrap();
    let model = ScriptedModel::new(vec![
        Ok(call_reply(vec![
            call("a", "delete_everything", json!({})),
            call("b", "get_file_content", json!({ "file_path": "../../etc/passwd" })),
        ])),
        Ok(text_reply("I cannot do that.")),
    ]);

    let report = orchestrator(&temp, model.clone()).run("be bad").await;

    let errors: Vec<String> = report
        .conversation
        .turns()
        .iter()
        .flat_map(|t| t.parts.iter())
        .filter_map(|p| match p {
            Part::Response(r) => Some(r.content.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors[0], "Error: Unknown function: delete_everything");
    assert!(errors[1].starts_with("Error: Cannot read"));
    assert!(errors[1].contains("outside the permitted working directory"));
    assert_eq!(report.into_result().unwrap(), "I cannot do that.");
}

#[tokio::test]
async fn test_empty_reply_is_malformed() {
    let temp = TempDir::new().unwrap();
    let model = ScriptedModel::new(vec![Ok(ModelResponse {
        text: Some(String::new()),
        invocations: vec![],
        usage: usage(),
    })]);

    let report = orchestrator(&temp, model.clone()).run("hi").await;

    assert_eq!(model.calls(), 1);
    assert!(matches!(
        report.into_result(),
        Err(RunError::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn test_service_errors_end_the_run() {
    let temp = TempDir::new().unwrap();
    let model = ScriptedModel::new(vec![
        Err(LlmError::InvalidResponse("missing usage metadata".into())),
    ]);
    let report = orchestrator(&temp, model).run("hi").await;
    assert!(matches!(
        report.into_result(),
        Err(RunError::MalformedResponse(m)) if m == "missing usage metadata"
    ));

    let model = ScriptedModel::new(vec![Err(LlmError::Api {
        status: 401,
        message: "Invalid API key".into(),
    })]);
    let report = orchestrator(&temp, model).run("hi").await;
    assert!(matches!(
        report.into_result(),
        Err(RunError::Service(LlmError::Api { status: 401, .. }))
    ));
}
