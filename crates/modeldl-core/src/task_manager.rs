//! Task Manager: maps a [`RepositoryId`] to its single active coordinating
//! task, so that cancelling or checking a repository's download never races
//! against a second download of the same repository starting concurrently
//! (spec §4.7).

use crate::cancel::CancellationToken;
use crate::models::RepositoryId;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A running coordinator task plus the means to stop it. `on_cancel` is
/// called before the supervising task is aborted, so it can reach into
/// whatever cancellation mechanism the coordinator actually uses (a shared
/// [`CancellationToken`], a per-URL fetcher cancel, or both).
pub struct CoordinatingTask {
    on_cancel: Box<dyn Fn() + Send + Sync>,
    handle: JoinHandle<()>,
}

impl CoordinatingTask {
    pub fn new(on_cancel: impl Fn() + Send + Sync + 'static, handle: JoinHandle<()>) -> Self {
        Self {
            on_cancel: Box::new(on_cancel),
            handle,
        }
    }

    /// Convenience constructor for the common case of a plain
    /// [`CancellationToken`] with no additional cleanup.
    pub fn from_token(token: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self::new(move || token.cancel(), handle)
    }

    fn cancel(&self) {
        (self.on_cancel)();
        self.handle.abort();
    }
}

/// Exclusive registry of in-flight coordinating tasks, one per
/// [`RepositoryId`]. All access is serialized through a single lock — the
/// registry itself is small and short-held, so this never becomes a
/// bottleneck relative to the network I/O it supervises.
#[derive(Default)]
pub struct TaskManager {
    tasks: Mutex<HashMap<RepositoryId, CoordinatingTask>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` for `repo_id`, cancelling and replacing any prior
    /// task for the same repository.
    pub async fn store(&self, repo_id: RepositoryId, task: CoordinatingTask) {
        let mut guard = self.tasks.lock().await;
        if let Some(prior) = guard.insert(repo_id, task) {
            prior.cancel();
        }
    }

    /// Cancel and remove the task for `repo_id`, if any. Returns whether a
    /// task was present.
    pub async fn cancel(&self, repo_id: &RepositoryId) -> bool {
        let mut guard = self.tasks.lock().await;
        match guard.remove(repo_id) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a task's bookkeeping without cancelling it — used once a task
    /// has already reached a terminal state on its own.
    pub async fn remove(&self, repo_id: &RepositoryId) {
        self.tasks.lock().await.remove(repo_id);
    }

    pub async fn cancel_all(&self) {
        let mut guard = self.tasks.lock().await;
        for (_, task) in guard.drain() {
            task.cancel();
        }
    }

    pub async fn is_downloading(&self, repo_id: &RepositoryId) -> bool {
        self.tasks.lock().await.contains_key(repo_id)
    }

    pub async fn active_download_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn get_active_repository_ids(&self) -> Vec<RepositoryId> {
        self.tasks.lock().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RepositoryId;

    fn spawn_noop() -> (CancellationToken, JoinHandle<()>) {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            while !waiter.is_cancelled() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });
        (token, handle)
    }

    #[tokio::test]
    async fn store_then_is_downloading() {
        let manager = TaskManager::new();
        let repo = RepositoryId::parse("org/model").unwrap();
        let (token, handle) = spawn_noop();
        manager.store(repo.clone(), CoordinatingTask::from_token(token, handle)).await;

        assert!(manager.is_downloading(&repo).await);
        assert_eq!(manager.active_download_count().await, 1);
    }

    #[tokio::test]
    async fn cancel_removes_and_cancels() {
        let manager = TaskManager::new();
        let repo = RepositoryId::parse("org/model").unwrap();
        let (token, handle) = spawn_noop();
        manager.store(repo.clone(), CoordinatingTask::from_token(token.clone(), handle)).await;

        assert!(manager.cancel(&repo).await);
        assert!(token.is_cancelled());
        assert!(!manager.is_downloading(&repo).await);
    }

    #[tokio::test]
    async fn cancel_unknown_repo_returns_false() {
        let manager = TaskManager::new();
        let repo = RepositoryId::parse("org/model").unwrap();
        assert!(!manager.cancel(&repo).await);
    }

    #[tokio::test]
    async fn storing_twice_cancels_the_prior_task() {
        let manager = TaskManager::new();
        let repo = RepositoryId::parse("org/model").unwrap();
        let (first_token, first_handle) = spawn_noop();
        manager
            .store(repo.clone(), CoordinatingTask::from_token(first_token.clone(), first_handle))
            .await;

        let (second_token, second_handle) = spawn_noop();
        manager
            .store(repo.clone(), CoordinatingTask::from_token(second_token, second_handle))
            .await;

        assert!(first_token.is_cancelled());
        assert_eq!(manager.active_download_count().await, 1);
    }

    #[tokio::test]
    async fn get_active_repository_ids_reflects_registry() {
        let manager = TaskManager::new();
        let repo_a = RepositoryId::parse("org/a").unwrap();
        let repo_b = RepositoryId::parse("org/b").unwrap();
        let (token_a, handle_a) = spawn_noop();
        let (token_b, handle_b) = spawn_noop();
        manager.store(repo_a.clone(), CoordinatingTask::from_token(token_a, handle_a)).await;
        manager.store(repo_b.clone(), CoordinatingTask::from_token(token_b, handle_b)).await;

        let mut ids = manager.get_active_repository_ids().await;
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(ids.len(), 2);
    }
}
