//! Queue trigger surface: named tasks with string arguments, run with retries.

use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::sync::{SyncReport, Synchronizer};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub const INDEX_ADD_NODE: &str = "index_add_node";
pub const INDEX_ADD_DOCS: &str = "index_add_docs";
pub const INDEX_REMOVE_NODE: &str = "index_remove_node";
pub const INDEX_ADD_PAGES: &str = "index_add_pages";
pub const INDEX_UPDATE: &str = "index_update";

/// Wire form of a task: `{"name": "...", "args": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A validated synchronization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    AddNode { node_id: String },
    AddDocuments { document_ids: Vec<String> },
    RemoveItems { item_ids: Vec<String> },
    AddPages { page_ids: Vec<String> },
    SwapVersion { add_version_id: String, remove_version_id: String },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::AddNode { .. } => INDEX_ADD_NODE,
            Task::AddDocuments { .. } => INDEX_ADD_DOCS,
            Task::RemoveItems { .. } => INDEX_REMOVE_NODE,
            Task::AddPages { .. } => INDEX_ADD_PAGES,
            Task::SwapVersion { .. } => INDEX_UPDATE,
        }
    }

    /// Build a task from its name and positional arguments.
    pub fn from_message(message: &TaskMessage) -> Result<Self> {
        let args = message.args.as_slice();
        let task = match message.name.as_str() {
            INDEX_ADD_NODE => Task::AddNode {
                node_id: single_string(args)?,
            },
            INDEX_ADD_DOCS => Task::AddDocuments {
                document_ids: string_list(args)?,
            },
            INDEX_REMOVE_NODE => Task::RemoveItems {
                item_ids: string_list(args)?,
            },
            INDEX_ADD_PAGES => Task::AddPages {
                page_ids: string_list(args)?,
            },
            INDEX_UPDATE => match args {
                [Value::String(add), Value::String(remove)] => Task::SwapVersion {
                    add_version_id: add.clone(),
                    remove_version_id: remove.clone(),
                },
                _ => return Err(bad_args(message)),
            },
            other => return Err(Error::validation("task name", other)),
        };
        Ok(task)
    }

    pub fn to_message(&self) -> TaskMessage {
        let strings = |values: &[String]| vec![Value::from(values.to_vec())];
        let args = match self {
            Task::AddNode { node_id } => vec![Value::from(node_id.as_str())],
            Task::AddDocuments { document_ids } => strings(document_ids),
            Task::RemoveItems { item_ids } => strings(item_ids),
            Task::AddPages { page_ids } => strings(page_ids),
            Task::SwapVersion {
                add_version_id,
                remove_version_id,
            } => vec![
                Value::from(add_version_id.as_str()),
                Value::from(remove_version_id.as_str()),
            ],
        };
        TaskMessage {
            name: self.name().to_string(),
            args,
        }
    }
}

impl std::str::FromStr for Task {
    type Err = Error;

    /// Parse a JSON task message.
    fn from_str(line: &str) -> Result<Self> {
        let message: TaskMessage = serde_json::from_str(line)
            .map_err(|error| Error::validation("task message", format!("{line} ({error})")))?;
        Task::from_message(&message)
    }
}

fn bad_args(message: &TaskMessage) -> Error {
    Error::validation(
        "task arguments",
        format!("{} {}", message.name, Value::from(message.args.clone())),
    )
}

fn single_string(args: &[Value]) -> Result<String> {
    match args {
        [Value::String(value)] => Ok(value.clone()),
        _ => Err(Error::validation("task arguments", Value::from(args.to_vec()).to_string())),
    }
}

/// Accepts either one JSON array of strings or the strings as separate args.
fn string_list(args: &[Value]) -> Result<Vec<String>> {
    let values = match args {
        [Value::Array(items)] => items.as_slice(),
        items => items,
    };
    values
        .iter()
        .map(|value| match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(Error::validation("task arguments", other.to_string())),
        })
        .collect()
}

/// Outcome counts of a worker loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub succeeded: usize,
    pub failed: usize,
    pub rejected: usize,
}

/// Executes tasks, retrying transient failures per the [`RetryPolicy`].
#[derive(Clone)]
pub struct TaskRunner {
    sync: Synchronizer,
    policy: RetryPolicy,
}

impl TaskRunner {
    pub fn new(sync: Synchronizer, policy: RetryPolicy) -> Self {
        Self { sync, policy }
    }

    /// Run `task` once, without retries.
    pub async fn execute(&self, task: &Task) -> Result<SyncReport> {
        match task {
            Task::AddNode { node_id } => self.sync.add_node(node_id).await,
            Task::AddDocuments { document_ids } => self.sync.add_documents(document_ids).await,
            Task::RemoveItems { item_ids } => self.sync.remove_items(item_ids).await,
            Task::AddPages { page_ids } => self.sync.add_pages(page_ids).await,
            Task::SwapVersion {
                add_version_id,
                remove_version_id,
            } => {
                self.sync
                    .swap_version(add_version_id, remove_version_id)
                    .await
            }
        }
    }

    /// Run `task`, re-running it after retryable failures.
    pub async fn run(&self, task: &Task) -> Result<SyncReport> {
        let mut attempt: u32 = 0;
        loop {
            match self.execute(task).await {
                Ok(report) => {
                    tracing::debug!(
                        task = task.name(),
                        attempt,
                        added = report.added,
                        removed = report.removed,
                        "task finished"
                    );
                    return Ok(report);
                }
                Err(error) if error.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        task = task.name(),
                        attempt,
                        max_retries = self.policy.max_retries,
                        %error,
                        "task failed, retrying"
                    );
                    tokio::time::sleep(self.policy.countdown()).await;
                }
                Err(error) => {
                    tracing::error!(task = task.name(), attempt, %error, "task failed permanently");
                    return Err(error);
                }
            }
        }
    }

    /// Read one JSON task per line and run each until the input ends.
    ///
    /// Malformed lines are logged and dropped; failed tasks do not stop the loop.
    pub async fn run_lines<R>(&self, reader: R) -> Result<WorkerStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut stats = WorkerStats::default();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| Error::Other(anyhow::anyhow!("failed to read task input: {e}")))?
        {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let task: Task = match line.parse() {
                Ok(task) => task,
                Err(error) => {
                    tracing::error!(%error, "rejected task message");
                    stats.rejected += 1;
                    continue;
                }
            };

            match self.run(&task).await {
                Ok(_) => stats.succeeded += 1,
                Err(_) => stats.failed += 1,
            }
        }

        tracing::info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            rejected = stats.rejected,
            "task input exhausted"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::index::{IndexEntity, MemoryIndex, SearchIndex, SearchQuery, SearchResults};
    use crate::models::NodeId;
    use crate::test_support::{Fixture, memory_database};

    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` adds, then behaves like a memory index.
    struct FailingFirst {
        inner: MemoryIndex,
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SearchIndex for FailingFirst {
        async fn add(&self, entity: &IndexEntity) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(IndexError::LanceDb("connection refused".into()).into());
            }
            self.inner.add(entity).await
        }

        async fn remove(&self, id: &str) -> Result<()> {
            self.inner.remove(id).await
        }

        async fn remove_all(&self) -> Result<()> {
            self.inner.remove_all().await
        }

        async fn get(&self, id: &str) -> Result<Option<IndexEntity>> {
            self.inner.get(id).await
        }

        async fn count(&self) -> Result<usize> {
            self.inner.count().await
        }

        async fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
            self.inner.search(query).await
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            countdown_secs: 0,
        }
    }

    #[test]
    fn messages_parse_into_tasks() {
        let task: Task = r#"{"name": "index_update", "args": ["a", "b"]}"#.parse().expect("parse");
        assert_eq!(
            task,
            Task::SwapVersion {
                add_version_id: "a".into(),
                remove_version_id: "b".into()
            }
        );

        let task: Task = r#"{"name": "index_add_docs", "args": [["x", "y"]]}"#
            .parse()
            .expect("parse");
        assert_eq!(
            task,
            Task::AddDocuments {
                document_ids: vec!["x".into(), "y".into()]
            }
        );

        let round_trip = Task::from_message(&task.to_message()).expect("round trip");
        assert_eq!(round_trip, task);
    }

    #[test]
    fn bad_messages_are_validation_errors() {
        for line in [
            r#"{"name": "index_add_node", "args": []}"#,
            r#"{"name": "index_add_node", "args": [1]}"#,
            r#"{"name": "index_update", "args": ["only-one"]}"#,
            r#"{"name": "unknown", "args": []}"#,
            "not json",
        ] {
            let error = line.parse::<Task>().unwrap_err();
            assert!(matches!(error, Error::Validation { .. }), "{line}");
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let db = memory_database().await;
        let fixture = Fixture::new(&db).await;
        let folder = fixture.folder("Inbox", None).await;
        let index = Arc::new(FailingFirst {
            inner: MemoryIndex::new(),
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let runner = TaskRunner::new(Synchronizer::new(db, index.clone()), policy(3));

        let task = Task::AddNode {
            node_id: folder.to_string(),
        };
        runner.run(&task).await.expect("eventually succeeds");

        assert_eq!(index.calls.load(Ordering::SeqCst), 3);
        assert_eq!(index.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let db = memory_database().await;
        let fixture = Fixture::new(&db).await;
        let folder = fixture.folder("Inbox", None).await;
        let index = Arc::new(FailingFirst {
            inner: MemoryIndex::new(),
            failures: 10,
            calls: AtomicUsize::new(0),
        });
        let runner = TaskRunner::new(Synchronizer::new(db, index.clone()), policy(2));

        let task = Task::AddNode {
            node_id: folder.to_string(),
        };
        assert!(runner.run(&task).await.is_err());
        assert_eq!(index.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let db = memory_database().await;
        let index = Arc::new(FailingFirst {
            inner: MemoryIndex::new(),
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let runner = TaskRunner::new(Synchronizer::new(db, index.clone()), policy(5));

        let missing = Task::AddNode {
            node_id: NodeId::new_v4().to_string(),
        };
        assert!(runner.run(&missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn worker_loop_counts_outcomes() {
        let db = memory_database().await;
        let fixture = Fixture::new(&db).await;
        let folder = fixture.folder("Inbox", None).await;
        let index = Arc::new(MemoryIndex::new());
        let runner = TaskRunner::new(Synchronizer::new(db, index.clone()), policy(0));

        let input = format!(
            "{}\n\n{}\ngarbage\n",
            serde_json::json!({"name": INDEX_ADD_NODE, "args": [folder.to_string()]}),
            serde_json::json!({"name": INDEX_ADD_NODE, "args": [NodeId::new_v4().to_string()]}),
        );
        let stats = runner.run_lines(input.as_bytes()).await.expect("run lines");

        assert_eq!(
            stats,
            WorkerStats {
                succeeded: 1,
                failed: 1,
                rejected: 1
            }
        );
        assert!(index.get(&folder.to_string()).await.expect("get").is_some());
    }
}
