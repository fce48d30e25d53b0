// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

/// Lets a background task observe a shutdown request.
pub struct StopHandle {
    shutdown_rx: oneshot::Receiver<()>,
}

impl StopHandle {
    /// Resolves once shutdown is requested or the owning [`ServiceHandle`] is dropped.
    ///
    /// Cancel safe, so it can sit in a `tokio::select!` loop.
    pub async fn signaled(&mut self) {
        (&mut self.shutdown_rx).await.unwrap_or_default();
    }
}

/// Owner side of a background task started with [`spawn_service`].
pub struct ServiceHandle {
    join: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ServiceHandle {
    pub fn request_shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Requests cooperative shutdown and waits for the task to finish.
    pub async fn shutdown(mut self) -> Result<(), JoinError> {
        self.request_shutdown();
        self.join.await
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn abort(self) {
        self.join.abort();
    }
}

/// Spawns `f` on the tokio runtime, handing it a [`StopHandle`].
pub fn spawn_service<Fut, Func>(f: Func) -> ServiceHandle
where
    Fut: Future<Output=()> + Send + 'static,
    Func: FnOnce(StopHandle) -> Fut + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let stop = StopHandle { shutdown_rx };
    let join = tokio::spawn(async move {
        f(stop).await;
    });
    ServiceHandle {
        join,
        shutdown_tx: Some(shutdown_tx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn shutdown_signals_and_joins_the_task() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let handle = spawn_service(move |mut stop| async move {
            stop.signaled().await;
            flag.store(true, Ordering::SeqCst);
        });

        handle.shutdown().await.unwrap();

        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn task_may_finish_on_its_own() {
        let handle = spawn_service(|_stop| async {});
        tokio::task::yield_now().await;

        handle.shutdown().await.unwrap();
    }
}
