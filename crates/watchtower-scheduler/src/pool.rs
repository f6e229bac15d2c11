// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use watchtower_utils::{probe, Error, Result};

/// Runs dispatched actions in the background, at most `max_concurrent` at a
/// time.
///
/// Actions only return `Err` for errors they could not record; those are
/// reported through [`ActionPool::join_next`].
#[derive(Debug)]
pub struct ActionPool {
    tasks: JoinSet<Result<()>>,
    permits: Arc<Semaphore>,
}

impl ActionPool {
    /// An empty pool.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Starts `action` once a slot is free.
    pub async fn spawn<F>(&mut self, action: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permit = self.reserve().await?;
        self.spawn_with(permit, action);
        Ok(())
    }

    /// Waits for a free slot without starting anything, so the caller can
    /// give up while waiting.
    pub async fn reserve(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Generic("action pool closed"))
    }

    /// Starts `action` in the slot held by `permit`.
    pub fn spawn_with<F>(&mut self, permit: OwnedSemaphorePermit, action: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(async move {
            let result = action.await;
            drop(permit);
            result
        });
    }

    /// Number of actions still running.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no action is running.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for the next action to finish. `None` when the pool is empty.
    pub async fn join_next(&mut self) -> Option<Result<()>> {
        let joined = self.tasks.join_next().await?;
        Some(joined.map_err(Error::from).and_then(|result| result))
    }

    /// Waits for every running action.
    ///
    /// Stops at the first fatal error; others are logged.
    pub async fn drain(&mut self) -> Result<()> {
        if !self.is_empty() {
            tracing::event!(
                target: probe::TARGET,
                tracing::Level::DEBUG,
                kind = %probe::Kind::Lifecycle,
                in_flight = self.len(),
                "Draining in-flight actions",
            );
        }
        while let Some(result) = self.join_next().await {
            check(result)?;
        }
        Ok(())
    }
}

/// Passes fatal errors through, logs the rest.
pub(crate) fn check(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::error!("Action failed: {e}");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}
