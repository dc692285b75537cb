//! A running kernel: the live [`Kernel`] record plus the worker task that
//! owns its backend connection.

use std::sync::Arc;

use chrono::Utc;
use gateway_core::backend::{BackendConnector, ExecutionBackend};
use gateway_core::ids::{ConnectionId, KernelId};
use gateway_core::kernel::{BackendLanguage, ExecutionState, Kernel, KernelFlavor};
use gateway_core::{Envelope, GatewayError, Target};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Failure text reported for an evaluation abandoned by an interrupt.
pub const INTERRUPTED: &str = "interrupted";

const COMMAND_QUEUE: usize = 32;
const INTERRUPT_QUEUE: usize = 4;
const IOPUB_CAPACITY: usize = 256;

/// An iopub message published to every connection watching a kernel.
#[derive(Clone, Debug)]
pub struct Published {
    pub origin: ConnectionId,
    pub envelope: Envelope,
}

/// Result of one execution that reached the backend.
#[derive(Debug)]
pub struct Execution {
    pub execution_count: u64,
    pub output: Result<String, GatewayError>,
}

struct Evaluation {
    code: String,
    language: BackendLanguage,
    reply: oneshot::Sender<Result<String, GatewayError>>,
}

type InterruptReply = oneshot::Sender<Result<(), GatewayError>>;

/// Handle to the task that owns one backend.
struct Worker {
    evaluations: mpsc::Sender<Evaluation>,
    /// Served ahead of queued evaluations and while one is running.
    interrupts: mpsc::Sender<InterruptReply>,
    stop: CancellationToken,
    interruptible: bool,
    task: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(backend: Box<dyn ExecutionBackend>, kernel_id: KernelId) -> Self {
        let (evaluations, evaluation_rx) = mpsc::channel(COMMAND_QUEUE);
        let (interrupts, interrupt_rx) = mpsc::channel(INTERRUPT_QUEUE);
        let stop = CancellationToken::new();
        let interruptible = backend.supports_interrupt();
        let task = tokio::spawn(run_worker(backend, evaluation_rx, interrupt_rx, stop.clone(), kernel_id));
        Self {
            evaluations,
            interrupts,
            stop,
            interruptible,
            task: Some(task),
        }
    }

    /// Stop the task and wait until the backend has been terminated.
    async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "kernel worker ended abnormally");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

enum Outcome {
    Finished(Result<String, GatewayError>),
    Interrupted(InterruptReply),
    Stopped,
}

async fn run_worker(
    mut backend: Box<dyn ExecutionBackend>,
    mut evaluations: mpsc::Receiver<Evaluation>,
    mut interrupts: mpsc::Receiver<InterruptReply>,
    stop: CancellationToken,
    kernel_id: KernelId,
) {
    loop {
        let evaluation = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            Some(ack) = interrupts.recv() => {
                let _ = ack.send(backend.interrupt().await);
                continue;
            }
            next = evaluations.recv() => match next {
                Some(evaluation) => evaluation,
                None => break,
            },
        };

        let outcome = tokio::select! {
            biased;
            () = stop.cancelled() => Outcome::Stopped,
            Some(ack) = interrupts.recv() => Outcome::Interrupted(ack),
            result = backend.evaluate(&evaluation.code, evaluation.language) => Outcome::Finished(result),
        };
        match outcome {
            Outcome::Finished(result) => {
                let _ = evaluation.reply.send(result);
            }
            Outcome::Interrupted(ack) => {
                let _ = evaluation
                    .reply
                    .send(Err(GatewayError::ExecutionFailure(INTERRUPTED.into())));
                let _ = ack.send(backend.interrupt().await);
            }
            Outcome::Stopped => {
                let _ = evaluation
                    .reply
                    .send(Err(GatewayError::backend("kernel is shutting down")));
                break;
            }
        }
    }
    backend.terminate().await;
    debug!(kernel_id = %kernel_id, "kernel worker stopped");
}

struct ProcessState {
    kernel: Kernel,
    execution_count: u64,
    generation: u64,
    in_flight: u32,
    worker: Option<Worker>,
}

/// One kernel of a namespace. Cheap to share; all mutable fields sit behind
/// one short-lived lock and the backend is only touched by the worker.
pub struct Process {
    id: KernelId,
    flavor: KernelFlavor,
    state: Mutex<ProcessState>,
    iopub: broadcast::Sender<Published>,
}

impl Process {
    pub fn start(kernel: Kernel, flavor: KernelFlavor, backend: Box<dyn ExecutionBackend>) -> Arc<Self> {
        let id = kernel.id.clone();
        let worker = Worker::spawn(backend, id.clone());
        let (iopub, _) = broadcast::channel(IOPUB_CAPACITY);
        Arc::new(Self {
            id,
            flavor,
            state: Mutex::new(ProcessState {
                kernel,
                execution_count: 0,
                generation: 0,
                in_flight: 0,
                worker: Some(worker),
            }),
            iopub,
        })
    }

    pub fn id(&self) -> &KernelId {
        &self.id
    }

    pub fn flavor(&self) -> KernelFlavor {
        self.flavor
    }

    pub fn kernel(&self) -> Kernel {
        self.state.lock().kernel.clone()
    }

    pub fn execution_count(&self) -> u64 {
        self.state.lock().execution_count
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().worker.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.iopub.subscribe()
    }

    /// Fan an iopub message out to subscribers. Nobody listening is fine.
    pub fn publish(&self, origin: &ConnectionId, envelope: &Envelope) {
        let _ = self.iopub.send(Published {
            origin: origin.clone(),
            envelope: envelope.clone(),
        });
    }

    /// Run code on the backend.
    pub async fn execute(&self, code: &str, language: BackendLanguage) -> Result<Execution, GatewayError> {
        self.execute_with(code, language, |_| {}).await
    }

    /// Run code on the backend, calling `on_start` with the execution count
    /// once the request is queued and before the backend answers.
    ///
    /// The count is assigned at queue time, so concurrent callers get
    /// counts in the order the worker runs them. `Err` means the code never
    /// reached a backend (kernel stopped, restarting or saturated) and
    /// neither the counter nor `on_start` was touched.
    pub async fn execute_with<F>(
        &self,
        code: &str,
        language: BackendLanguage,
        on_start: F,
    ) -> Result<Execution, GatewayError>
    where
        F: FnOnce(u64),
    {
        let (reply, rx) = oneshot::channel();
        let evaluation = Evaluation {
            code: code.to_string(),
            language,
            reply,
        };
        let (generation, execution_count) = {
            let mut st = self.state.lock();
            let queued = match &st.worker {
                Some(worker) => worker.evaluations.try_send(evaluation),
                None => return Err(self.not_running()),
            };
            queued.map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    GatewayError::backend(format!("kernel {} has too many queued requests", self.id))
                }
                mpsc::error::TrySendError::Closed(_) => self.not_running(),
            })?;
            st.execution_count += 1;
            st.in_flight += 1;
            st.kernel.execution_state = ExecutionState::Busy;
            st.kernel.last_activity = Utc::now();
            (st.generation, st.execution_count)
        };
        on_start(execution_count);

        let output = rx
            .await
            .unwrap_or_else(|_| Err(GatewayError::backend("kernel worker stopped")));

        let mut st = self.state.lock();
        if st.generation != generation {
            // A restart replaced the backend; this result belongs to the old one.
            return Err(GatewayError::backend(format!("kernel {} restarted during execution", self.id)));
        }
        st.in_flight = st.in_flight.saturating_sub(1);
        if st.in_flight == 0 {
            st.kernel.execution_state = ExecutionState::Idle;
        }
        st.kernel.last_activity = Utc::now();
        Ok(Execution { execution_count, output })
    }

    /// Abandon the evaluation in flight and ask the backend to abort it.
    /// Queued evaluations stay queued.
    pub async fn interrupt(&self) -> Result<(), GatewayError> {
        let interrupts = {
            let st = self.state.lock();
            let worker = st.worker.as_ref().ok_or_else(|| self.not_running())?;
            if !worker.interruptible {
                return Err(GatewayError::Unsupported(format!(
                    "kernel {} cannot be interrupted",
                    self.id
                )));
            }
            worker.interrupts.clone()
        };
        let (reply, rx) = oneshot::channel();
        interrupts
            .send(reply)
            .await
            .map_err(|_| GatewayError::backend("kernel worker stopped"))?;
        rx.await
            .map_err(|_| GatewayError::backend("kernel worker stopped"))?
    }

    /// Replace the backend with a fresh connection, keeping the kernel id.
    #[instrument(skip_all, fields(kernel_id = %self.id))]
    pub async fn restart(&self, connector: &dyn BackendConnector, target: &Target) -> Result<Kernel, GatewayError> {
        let old = {
            let mut st = self.state.lock();
            st.generation += 1;
            st.in_flight = 0;
            st.kernel.execution_state = ExecutionState::Starting;
            st.worker.take()
        };
        if let Some(old) = old {
            old.shutdown().await;
        }

        let backend = connector.connect(target).await.map_err(|e| {
            warn!(error = %e, "kernel restart failed");
            GatewayError::kernel_start(format!("Failed to start kernel process on {} - {e}", target.key))
        })?;

        let surplus = {
            let mut st = self.state.lock();
            if st.worker.is_some() {
                // A concurrent restart got there first; keep its backend.
                Some(backend)
            } else {
                st.worker = Some(Worker::spawn(backend, self.id.clone()));
                st.execution_count = 0;
                st.kernel.execution_state = ExecutionState::Idle;
                st.kernel.last_activity = Utc::now();
                None
            }
        };
        match surplus {
            Some(mut backend) => backend.terminate().await,
            None => info!("kernel restarted"),
        }
        Ok(self.kernel())
    }

    /// Stop the worker and terminate the backend. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let worker = {
            let mut st = self.state.lock();
            st.generation += 1;
            st.worker.take()
        };
        if let Some(worker) = worker {
            worker.shutdown().await;
        }
    }

    fn not_running(&self) -> GatewayError {
        GatewayError::backend(format!("kernel {} is not running", self.id))
    }
}
