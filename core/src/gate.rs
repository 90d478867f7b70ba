//! Holds caller operations until the engine has finished initializing.
//!
//! Calls made while the engine starts are buffered in arrival order and replayed
//! FIFO once it is ready; arrivals during the replay queue up behind the
//! backlog. If initialization fails every buffered call is rejected with the
//! same reason, and so is every new call until a fresh start succeeds.

use crate::{Result, SpeechError, ENGINE_INIT_FAILED};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, info, warn};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum InitStatus {
    NotStarted,
    Initializing,
    Ready,
    Failed(String),
}

/// A buffered call, type-erased over its result
trait Deferred<C>: Send {
    fn replay(self: Box<Self>, ctx: C) -> BoxFuture<()>;

    fn reject(self: Box<Self>, reason: &str);
}

struct DeferredCall<C, T> {
    op: Box<dyn FnOnce(C) -> BoxFuture<Result<T>> + Send>,
    reply: oneshot::Sender<Result<T>>,
}

impl<C: Send + 'static, T: Send + 'static> Deferred<C> for DeferredCall<C, T> {
    fn replay(self: Box<Self>, ctx: C) -> BoxFuture<()> {
        let DeferredCall { op, reply } = *self;
        Box::pin(async move {
            let result = op(ctx).await;
            // The caller may have given up waiting
            let _ = reply.send(result);
        })
    }

    fn reject(self: Box<Self>, reason: &str) {
        let _ = self
            .reply
            .send(Err(SpeechError::EngineUnavailable(reason.to_string())));
    }
}

/// What the caller should do with an operation it submitted
pub enum Admission<T, F> {
    /// Engine ready: run the operation now
    RunNow(F),
    /// Buffered; the result arrives on `reply`. `start_init` asks the caller to
    /// kick off initialization because nobody has yet.
    Queued {
        reply: oneshot::Receiver<Result<T>>,
        start_init: bool,
    },
    /// Initialization failed earlier
    Rejected(String),
}

struct GateInner<C> {
    status: InitStatus,
    backlog: Vec<Box<dyn Deferred<C>>>,
}

pub struct PendingCallGate<C> {
    inner: Mutex<GateInner<C>>,
    // Woken whenever an initialization finishes or the gate is reset
    settled: Notify,
}

impl<C: Clone + Send + 'static> Default for PendingCallGate<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clone + Send + 'static> PendingCallGate<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                status: InitStatus::NotStarted,
                backlog: Vec::new(),
            }),
            settled: Notify::new(),
        }
    }

    pub async fn status(&self) -> InitStatus {
        self.inner.lock().await.status.clone()
    }

    /// Wait until no initialization is running and return the resulting status.
    pub async fn settled(&self) -> InitStatus {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let status = self.status().await;
            if status != InitStatus::Initializing {
                return status;
            }
            notified.await;
        }
    }

    pub async fn backlog_len(&self) -> usize {
        self.inner.lock().await.backlog.len()
    }

    /// Decide whether `op` may run now or must wait for initialization.
    pub async fn admit<T, F>(&self, op: F) -> Admission<T, F>
    where
        T: Send + 'static,
        F: FnOnce(C) -> BoxFuture<Result<T>> + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        let start_init = match inner.status.clone() {
            InitStatus::Ready => return Admission::RunNow(op),
            InitStatus::Failed(reason) => return Admission::Rejected(reason),
            InitStatus::Initializing => false,
            InitStatus::NotStarted => {
                inner.status = InitStatus::Initializing;
                true
            }
        };
        let (tx, rx) = oneshot::channel();
        inner.backlog.push(Box::new(DeferredCall {
            op: Box::new(op),
            reply: tx,
        }));
        debug!(target: "gate", backlog = inner.backlog.len(), "Buffered call until engine is ready");
        Admission::Queued {
            reply: rx,
            start_init,
        }
    }

    /// Move to `Initializing` for an explicit (re)start. Returns false when an
    /// initialization is already running.
    pub async fn begin(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.status == InitStatus::Initializing {
            return false;
        }
        inner.status = InitStatus::Initializing;
        true
    }

    /// Forget readiness; the next call triggers a fresh initialization.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        let backlog = std::mem::take(&mut inner.backlog);
        inner.status = InitStatus::NotStarted;
        drop(inner);
        self.settled.notify_waiters();
        for call in backlog {
            call.reject("engine shut down");
        }
    }

    /// Report the initialization outcome, replaying or rejecting the backlog.
    pub async fn complete(&self, ctx: C, outcome: std::result::Result<(), String>) {
        match outcome {
            Ok(()) => {
                let mut replayed = 0usize;
                loop {
                    let batch = {
                        let mut inner = self.inner.lock().await;
                        if inner.backlog.is_empty() {
                            inner.status = InitStatus::Ready;
                            break;
                        }
                        std::mem::take(&mut inner.backlog)
                    };
                    for call in batch {
                        call.replay(ctx.clone()).await;
                        replayed += 1;
                    }
                }
                self.settled.notify_waiters();
                info!(target: "gate", replayed, "Engine ready");
            }
            Err(reason) => {
                let backlog = {
                    let mut inner = self.inner.lock().await;
                    inner.status = InitStatus::Failed(reason.clone());
                    std::mem::take(&mut inner.backlog)
                };
                self.settled.notify_waiters();
                warn!(target: "gate", %reason, rejected = backlog.len(), "Engine failed to initialize");
                for call in backlog {
                    call.reject(ENGINE_INIT_FAILED);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    type Log = Arc<StdMutex<Vec<u32>>>;

    async fn submit(gate: &PendingCallGate<Log>, n: u32) -> oneshot::Receiver<Result<u32>> {
        let op = move |log: Log| -> BoxFuture<Result<u32>> {
            Box::pin(async move {
                log.lock().unwrap().push(n);
                Ok(n)
            })
        };
        match gate.admit(op).await {
            Admission::Queued { reply, .. } => reply,
            _ => panic!("expected call to be buffered"),
        }
    }

    #[tokio::test]
    async fn test_first_call_requests_initialization() {
        let gate: PendingCallGate<Log> = PendingCallGate::new();
        let op = |_: Log| -> BoxFuture<Result<()>> { Box::pin(async { Ok(()) }) };
        match gate.admit(op).await {
            Admission::Queued { start_init, .. } => assert!(start_init),
            _ => panic!("expected queued"),
        }
        let op = |_: Log| -> BoxFuture<Result<()>> { Box::pin(async { Ok(()) }) };
        match gate.admit(op).await {
            Admission::Queued { start_init, .. } => assert!(!start_init),
            _ => panic!("expected queued"),
        }
        assert_eq!(gate.status().await, InitStatus::Initializing);
    }

    #[tokio::test]
    async fn test_replay_in_arrival_order() {
        let gate: PendingCallGate<Log> = PendingCallGate::new();
        let log: Log = Arc::default();
        let mut replies = Vec::new();
        for n in 1..=4 {
            replies.push(submit(&gate, n).await);
        }
        gate.complete(Arc::clone(&log), Ok(())).await;

        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4]);
        for (n, reply) in (1..=4).zip(replies) {
            assert_eq!(reply.await.unwrap().unwrap(), n);
        }
        assert_eq!(gate.status().await, InitStatus::Ready);
    }

    #[tokio::test]
    async fn test_failure_rejects_backlog_and_new_calls() {
        let gate: PendingCallGate<Log> = PendingCallGate::new();
        let first = submit(&gate, 1).await;
        let second = submit(&gate, 2).await;
        gate.complete(Arc::default(), Err("no engine".into())).await;

        for reply in [first, second] {
            match reply.await.unwrap() {
                Err(SpeechError::EngineUnavailable(reason)) => {
                    assert_eq!(reason, ENGINE_INIT_FAILED)
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        let op = |_: Log| -> BoxFuture<Result<()>> { Box::pin(async { Ok(()) }) };
        assert!(matches!(gate.admit(op).await, Admission::Rejected(_)));
    }

    #[tokio::test]
    async fn test_settled_waits_for_running_initialization() {
        let gate: Arc<PendingCallGate<Log>> = Arc::new(PendingCallGate::new());
        assert_eq!(gate.settled().await, InitStatus::NotStarted);
        assert!(gate.begin().await);
        assert!(!gate.begin().await);

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.settled().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        gate.complete(Arc::default(), Ok(())).await;
        assert_eq!(waiter.await.unwrap(), InitStatus::Ready);
    }
}
