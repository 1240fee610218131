use std::{future::Future, io, panic};

use tokio::{
    signal::unix::{signal, Signal, SignalKind},
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;

/// A spawned task that stops when its token is cancelled.
pub struct CancellableTask<T> {
    join_handle: JoinHandle<T>,
    token: CancellationToken,
}

impl<T: Send + 'static> CancellableTask<T> {
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let token = CancellationToken::new();
        let join_handle = tokio::spawn(f(token.clone()));
        Self { join_handle, token }
    }

    /// Asks the task to stop and waits until it does.
    ///
    /// Returns `None` if the task was aborted before it produced an output.
    pub async fn cancel(self) -> Option<T> {
        self.token.cancel();
        joined(self.join_handle.await)
    }
}

fn joined<T>(result: Result<T, JoinError>) -> Option<T> {
    match result {
        Ok(output) => Some(output),
        Err(err) => match err.try_into_panic() {
            Ok(payload) => panic::resume_unwind(payload),
            Err(err) => {
                log::warn!("task ended without output: {err}");
                None
            }
        },
    }
}

/// Runs `task` until it finishes on its own or `shutdown` resolves.
///
/// On shutdown the task is cancelled and awaited, so whatever it was doing completes first.
/// A panic inside the task is resumed here. `None` means the task was aborted
/// or the runtime shut down underneath it.
pub async fn supervise<T: Send + 'static>(
    mut task: CancellableTask<T>,
    shutdown: impl Future<Output = ()>,
) -> Option<T> {
    tokio::select! {
        output = &mut task.join_handle => joined(output),
        () = shutdown => {
            log::info!("shutdown signal received, exiting...");
            task.cancel().await
        }
    }
}

/// Handlers for SIGINT and SIGTERM, installed up front so registration errors surface at startup.
pub struct ShutdownSignal {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignal {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolves on the first SIGINT or SIGTERM.
    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => log::debug!("received SIGINT"),
            _ = self.terminate.recv() => log::debug!("received SIGTERM"),
        }
    }
}
