use async_trait::async_trait;
use serde::Deserialize;
use tether_core::markup::{escape_attr, escape_text, Tag};
use tether_core::tasks::{Task, TaskStatus};
use tether_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

use crate::tasks::{TaskPatch, TaskStore};

const TAG: &str = "tether-todo";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoAction {
    Create,
    Update,
    Clear,
}

#[derive(Debug, Deserialize)]
pub struct TodoWriteArgs {
    pub action: TodoAction,
    #[serde(default)]
    pub todos: Vec<TaskPatch>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TodoWritePartial {
    action: Option<String>,
    todos: Option<Vec<PartialTodo>>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialTodo {
    id: Option<String>,
    description: Option<String>,
    status: Option<String>,
    dependency: Option<String>,
}

struct TaskLine<'a> {
    id: &'a str,
    status: &'a str,
    dependency: Option<&'a str>,
    description: &'a str,
}

fn list_markup<'a>(tasks: impl ExactSizeIterator<Item = TaskLine<'a>>, is_complete: bool) -> String {
    let tag = Tag::new(TAG)
        .attr("count", tasks.len().to_string())
        .attr_if(!is_complete, "loading", "true");

    if tasks.len() == 0 {
        return tag.empty();
    }

    let lines: Vec<String> = tasks
        .map(|t| {
            let dependency = t
                .dependency
                .map(|d| format!(" dependency=\"{}\"", escape_attr(d)))
                .unwrap_or_default();
            format!(
                "  <task id=\"{}\" status=\"{}\"{dependency}>{}</task>",
                escape_attr(t.id),
                escape_attr(t.status),
                escape_text(t.description),
            )
        })
        .collect();

    tag.wrap(&format!("\n{}\n", lines.join("\n")))
}

/// Finalized list markup for a stored task list.
pub fn task_list_markup(tasks: &[Task]) -> String {
    list_markup(
        tasks.iter().map(|t| TaskLine {
            id: &t.id,
            status: t.status.as_str(),
            dependency: t.dependency.as_deref(),
            description: &t.description,
        }),
        true,
    )
}

/// Writes the conversation's task list.
pub struct TodoWriteTool {
    store: TaskStore,
}

impl TodoWriteTool {
    pub fn new(store: TaskStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    type Args = TodoWriteArgs;
    type Partial = TodoWritePartial;

    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create and manage a structured task list for the current conversation. \
         Use it for multi-step or multi-file work, when the user asks for a plan or \
         checklist, or when verification steps (tests, builds) must not be forgotten. \
         Do not use it for single atomic edits, purely informational questions, or \
         conversational prompts. 'create' replaces the list, 'update' changes tasks by id \
         and appends new ones, 'clear' removes every task."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["action"],
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "update", "clear"],
                    "description": "'create' to add new tasks (or replace all), 'update' to modify existing tasks, 'clear' to remove all tasks"
                },
                "todos": {
                    "type": "array",
                    "description": "Todo items (required for 'create' and 'update')",
                    "items": {
                        "type": "object",
                        "required": ["id"],
                        "properties": {
                            "id": {
                                "type": "string",
                                "description": "Unique identifier for the task (e.g. 'task-1', 'auth-setup')"
                            },
                            "description": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "blocked"]
                            },
                            "dependency": {
                                "type": "string",
                                "description": "ID of another task that should be completed first"
                            }
                        }
                    }
                }
            }
        })
    }

    fn render(&self, partial: &TodoWritePartial, is_complete: bool) -> Option<String> {
        let loading = Tag::new(TAG).attr("loading", "true").empty();
        let Some(action) = partial.action.as_deref() else {
            return Some(loading);
        };

        if let Some(todos) = partial.todos.as_ref().filter(|t| !t.is_empty()) {
            let lines = todos.iter().map(|t| TaskLine {
                id: t.id.as_deref().unwrap_or_default(),
                status: t.status.as_deref().unwrap_or(TaskStatus::Pending.as_str()),
                dependency: t.dependency.as_deref(),
                description: t.description.as_deref().unwrap_or_default(),
            });
            return Some(list_markup(lines, is_complete));
        }

        if action == "clear" {
            return Some(
                Tag::new(TAG)
                    .attr("count", "0")
                    .attr("cleared", "true")
                    .empty(),
            );
        }

        Some(loading)
    }

    async fn execute(&self, args: TodoWriteArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let conversation_id = ctx.conversation_id;

        let (tasks, summary) = match args.action {
            TodoAction::Create => {
                let tasks = args
                    .todos
                    .into_iter()
                    .map(|patch| {
                        let status = patch.status.ok_or_else(|| {
                            ToolError::InvalidArguments(format!("task {:?} needs a status", patch.id))
                        })?;
                        let description = patch.description.ok_or_else(|| {
                            ToolError::InvalidArguments(format!(
                                "task {:?} needs a description",
                                patch.id
                            ))
                        })?;
                        Ok(Task {
                            id: patch.id,
                            description,
                            status,
                            dependency: patch.dependency,
                        })
                    })
                    .collect::<Result<Vec<_>, ToolError>>()?;
                let tasks = self.store.create(conversation_id, tasks).await;
                let summary = format!("Created {} todo(s)", tasks.len());
                (tasks, summary)
            }
            TodoAction::Update => {
                let tasks = self.store.update(conversation_id, args.todos).await?;
                let summary = format!("Updated {} todo(s)", tasks.len());
                (tasks, summary)
            }
            TodoAction::Clear => {
                self.store.clear(conversation_id).await;
                (Vec::new(), "Cleared all todos".to_string())
            }
        };

        tracing::debug!(%conversation_id, count = tasks.len(), "task list written");
        Ok(ToolOutput::text(summary).with_markup(task_list_markup(&tasks)))
    }
}
