//! Task registry: correlation token -> pending operation state.
//!
//! Transport callbacks may arrive on a different thread than the one that
//! dispatched the request, so every mutation goes through one mutex. Callbacks
//! into consumer code never run while that mutex is held.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::file::{FileInfoTask, FileStreamTask, FileTask};
use crate::transfer::TransferTask;

/// Opaque correlation id linking a dispatched operation to its events.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Token(uuid::Uuid);

impl Token {
    /// Fresh token, unique among active tasks.
    pub fn new() -> Self {
        Token(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Token {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Token)
    }
}

/// What a registered (or slotted) operation is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Transfer,
    FileInfo,
    FileStream,
    NetworkQuery,
}

/// Pending state for one in-flight operation.
pub(crate) enum Task {
    Transfer(TransferTask),
    FileInfo(FileInfoTask),
    FileStream(FileStreamTask),
}

impl Task {
    pub(crate) fn kind(&self) -> TaskKind {
        match self {
            Task::Transfer(_) => TaskKind::Transfer,
            Task::FileInfo(_) => TaskKind::FileInfo,
            Task::FileStream(_) => TaskKind::FileStream,
        }
    }

    pub(crate) fn into_transfer(self) -> Result<TransferTask, Task> {
        match self {
            Task::Transfer(t) => Ok(t),
            other => Err(other),
        }
    }

    pub(crate) fn into_file_info(self) -> Result<FileInfoTask, Task> {
        match self {
            Task::FileInfo(t) => Ok(t),
            other => Err(other),
        }
    }

    pub(crate) fn into_file_stream(self) -> Result<FileStreamTask, Task> {
        match self {
            Task::FileStream(t) => Ok(t),
            other => Err(other),
        }
    }

    /// Either file kind; both terminate on a file error.
    pub(crate) fn into_file_task(self) -> Result<FileTask, Task> {
        match self {
            Task::FileInfo(t) => Ok(FileTask::Info(t)),
            Task::FileStream(t) => Ok(FileTask::Stream(t)),
            other => Err(other),
        }
    }
}

/// Outcome of removing a task for a terminal event.
pub(crate) enum Taken<T> {
    Found(T),
    /// No task under this token: the event is orphaned.
    Missing,
    /// A task of another kind owns this token. It stays registered.
    Mismatched(TaskKind),
}

#[derive(Default)]
pub(crate) struct TaskRegistry {
    tasks: Mutex<HashMap<Token, Task>>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Token, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert unconditionally. A colliding token is a dispatcher bug; the
    /// displaced task is dropped, which settles its pending result as disposed.
    pub(crate) fn register(&self, token: Token, task: Task) {
        let kind = task.kind();
        if let Some(previous) = self.lock().insert(token, task) {
            tracing::error!(%token, ?kind, previous = ?previous.kind(), "token collision in task registry");
        }
    }

    /// Run `f` against the task for `token`, if any, under the registry lock.
    /// `f` must not call back into consumer code.
    pub(crate) fn lookup<R>(&self, token: &Token, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        self.lock().get_mut(token).map(f)
    }

    pub(crate) fn kind(&self, token: &Token) -> Option<TaskKind> {
        self.lookup(token, |task| task.kind())
    }

    /// Remove the task under `token` if `project` accepts it. A rejected task
    /// is put back before the lock is released.
    pub(crate) fn take<T>(
        &self,
        token: &Token,
        project: impl FnOnce(Task) -> Result<T, Task>,
    ) -> Taken<T> {
        let mut tasks = self.lock();
        let Some(task) = tasks.remove(token) else {
            return Taken::Missing;
        };
        match project(task) {
            Ok(t) => Taken::Found(t),
            Err(task) => {
                let kind = task.kind();
                tasks.insert(*token, task);
                Taken::Mismatched(kind)
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop every task. Their pending results settle as disposed.
    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<Task> = self.lock().drain().map(|(_, task)| task).collect();
        let n = drained.len();
        drop(drained);
        n
    }
}

/// Log an event whose token has no registered task.
pub(crate) fn orphaned(event: &str, token: &Token) {
    tracing::warn!(%token, event, "event for unknown task (orphaned)");
}

/// Log an event whose token belongs to a task of another kind.
pub(crate) fn mismatched(event: &str, token: &Token, kind: TaskKind) {
    tracing::warn!(%token, event, ?kind, "event does not match task kind; ignored");
}
