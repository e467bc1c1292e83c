//! # Task group: the tasks owned by one service.
//!
//! Every task spawned through a service is registered here until it ends,
//! however it ends (completion, fault, panic, abort). Membership is tracked by
//! a guard owned by the task's future, so an aborted task leaves the group as
//! soon as its future is dropped.
//!
//! ## Teardown
//! ```text
//! stop(timeout)
//!   ├─► join_all(timeout)      cooperative: wait for the group to drain
//!   │     └─ drained ─► done
//!   └─► kill_all(kill_grace)   forced: abort survivors, wait for them to unwind
//! ```
//! The two phases are never merged: the forced phase is what bounds `stop`
//! when work ignores its cancellation token.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{self, AbortHandle, JoinHandle};
use tokio::time;

use crate::error::Fault;

/// Registration of one task, keyed by a group-local sequence number.
///
/// The task records its own id on first poll; the spawner records the abort
/// handle right after spawning. Either may happen first.
#[derive(Debug, Default)]
struct Member {
    id: Option<task::Id>,
    abort: Option<AbortHandle>,
}

type Members = HashMap<u64, Member>;

/// How a supervised task ended.
#[derive(Debug)]
pub enum TaskExit {
    /// The task returned `Ok(())`.
    Completed,
    /// The task faulted and a registered handler absorbed the fault.
    Handled(Fault),
    /// The task faulted and no handler matched; the fault went to the
    /// background-fault path.
    Failed(Fault),
    /// The task was aborted (kill phase of `stop`, or [`TaskHandle::abort`]).
    Killed,
}

impl TaskExit {
    /// True for [`TaskExit::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskExit::Completed)
    }

    /// True for [`TaskExit::Handled`].
    pub fn is_handled(&self) -> bool {
        matches!(self, TaskExit::Handled(_))
    }

    /// True for [`TaskExit::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskExit::Failed(_))
    }

    /// True for [`TaskExit::Killed`].
    pub fn is_killed(&self) -> bool {
        matches!(self, TaskExit::Killed)
    }
}

/// Handle to a task spawned on a service.
///
/// Awaiting the handle yields its [`TaskExit`]. Dropping it detaches the task;
/// the task stays in its group and is still joined/killed by `stop`.
#[derive(Debug)]
pub struct TaskHandle {
    join: JoinHandle<TaskExit>,
}

impl TaskHandle {
    /// Runtime id of the task.
    pub fn id(&self) -> task::Id {
        self.join.id()
    }

    /// Requests cancellation of this task only.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// True once the task has ended.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Future for TaskHandle {
    type Output = TaskExit;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Panics are caught inside the task, so a join error means cancellation.
        Pin::new(&mut self.join)
            .poll(cx)
            .map(|res| res.unwrap_or(TaskExit::Killed))
    }
}

/// Removes the task from its group when the task's future is dropped.
struct Membership {
    members: Arc<watch::Sender<Members>>,
    key: u64,
}

impl Membership {
    fn record_current(&self) {
        let key = self.key;
        if let Some(id) = task::try_id() {
            self.members.send_if_modified(|m| {
                if let Some(member) = m.get_mut(&key) {
                    member.id = Some(id);
                }
                false
            });
        }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        let key = self.key;
        self.members.send_if_modified(|m| m.remove(&key).is_some());
    }
}

/// Set of concurrently running tasks owned by one service.
#[derive(Debug)]
pub struct TaskGroup {
    members: Arc<watch::Sender<Members>>,
    next_key: AtomicU64,
}

impl TaskGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Members::new());
        Self {
            members: Arc::new(tx),
            next_key: AtomicU64::new(0),
        }
    }

    /// Spawns `fut` as an independent task registered in this group.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, fut: F) -> TaskHandle
    where
        F: Future<Output = TaskExit> + Send + 'static,
    {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.members.send_modify(|m| {
            m.insert(key, Member::default());
        });
        let membership = Membership {
            members: Arc::clone(&self.members),
            key,
        };
        let tracked = async move {
            membership.record_current();
            let out = fut.await;
            drop(membership);
            out
        };

        let join = tokio::spawn(tracked);
        let (id, abort) = (join.id(), join.abort_handle());
        // The task may already have ended and left the group.
        self.members.send_if_modified(|m| {
            if let Some(member) = m.get_mut(&key) {
                member.id = Some(id);
                member.abort = Some(abort);
            }
            false
        });
        TaskHandle { join }
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.members.borrow().len()
    }

    /// True if no task is running.
    pub fn is_empty(&self) -> bool {
        self.members.borrow().is_empty()
    }

    /// True if the task with `id` belongs to this group.
    pub fn contains(&self, id: task::Id) -> bool {
        self.members
            .borrow()
            .values()
            .any(|member| member.id == Some(id))
    }

    /// True if the caller is running inside one of this group's tasks.
    pub fn contains_current(&self) -> bool {
        task::try_id().is_some_and(|id| self.contains(id))
    }

    /// Waits until every task has ended or `timeout` elapses.
    ///
    /// Returns `true` if the group drained.
    pub async fn join_all(&self, timeout: Duration) -> bool {
        let mut rx = self.members.subscribe();
        time::timeout(timeout, rx.wait_for(|m| m.is_empty()))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Aborts every running task and waits up to `timeout` for them to end.
    ///
    /// Returns the number of tasks still alive afterwards.
    pub async fn kill_all(&self, timeout: Duration) -> usize {
        let handles: Vec<AbortHandle> = self
            .members
            .borrow()
            .values()
            .filter_map(|member| member.abort.clone())
            .collect();
        for h in &handles {
            h.abort();
        }
        if self.join_all(timeout).await {
            0
        } else {
            self.len()
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn finished_tasks_leave_the_group() {
        let group = TaskGroup::new();
        let handle = group.spawn(async { TaskExit::Completed });
        assert!(handle.await.is_completed());
        assert!(group.join_all(Duration::from_secs(1)).await);
        assert!(group.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn join_all_times_out_on_stuck_tasks() {
        let group = TaskGroup::new();
        let _h = group.spawn(async {
            futures::future::pending::<()>().await;
            TaskExit::Completed
        });
        assert_eq!(group.len(), 1);
        assert!(!group.join_all(Duration::from_millis(100)).await);
        assert_eq!(group.kill_all(Duration::from_secs(1)).await, 0);
        assert!(group.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn killed_tasks_report_killed_and_never_resume() {
        let group = TaskGroup::new();
        let resumed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&resumed);
        let handle = group.spawn(async move {
            time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            TaskExit::Completed
        });

        assert_eq!(group.kill_all(Duration::from_millis(10)).await, 0);
        assert!(handle.await.is_killed());
        time::sleep(Duration::from_secs(10)).await;
        assert!(!resumed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn current_task_membership_is_detected() {
        let group = Arc::new(TaskGroup::new());
        assert!(!group.contains_current());

        let inner = Arc::clone(&group);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = group.spawn(async move {
            let _ = tx.send(inner.contains_current());
            TaskExit::Completed
        });
        assert!(rx.await.expect("membership report"));
        handle.await;
    }
}
