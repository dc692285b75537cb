//! Kernels and sessions of one namespace.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use gateway_core::backend::BackendConnector;
use gateway_core::ids::{KernelId, SessionId};
use gateway_core::kernel::{CreateSession, Kernel, KernelFlavor, Session, DISABLED_KERNEL};
use gateway_core::{GatewayError, NamespaceKey, Target};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::process::Process;

#[derive(Default)]
struct Tables {
    /// Keyed by session name.
    sessions: HashMap<String, Session>,
    processes: HashMap<KernelId, Arc<Process>>,
}

/// Registry of sessions and their kernel processes for a single target.
///
/// Callers only ever see snapshots; the maps never leave this type.
pub struct NamespaceRegistry {
    target: Target,
    connector: Arc<dyn BackendConnector>,
    tables: Mutex<Tables>,
    disposed: AtomicBool,
}

impl fmt::Debug for NamespaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("NamespaceRegistry")
            .field("key", &self.target.key.to_string())
            .field("sessions", &tables.sessions.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl NamespaceRegistry {
    pub fn new(target: Target, connector: Arc<dyn BackendConnector>) -> Self {
        Self {
            target,
            connector,
            tables: Mutex::new(Tables::default()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &NamespaceKey {
        &self.target.key
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Return the session called `request.name`, creating it and opening a
    /// backend for its kernel when it does not exist yet.
    #[instrument(skip_all, fields(ns = %self.target.key, name = %request.name, kernel = %request.kernel.name))]
    pub async fn get_or_create_session(&self, request: CreateSession) -> Result<Session, GatewayError> {
        if let Some(existing) = self.session_by_name(&request.name) {
            return Ok(existing);
        }
        let kernel_name = request.kernel.name.as_str();
        if kernel_name == DISABLED_KERNEL {
            return Err(GatewayError::no_kernels(format!(
                "Namespace '{}' on server '{}' cannot run kernels. Check hover tip on kernel selector for more information.",
                self.target.namespace(),
                self.target.server()
            )));
        }
        let flavor = KernelFlavor::from_name(kernel_name)
            .ok_or_else(|| GatewayError::backend(format!("Unknown kernel '{kernel_name}'")))?;
        self.ensure_live()?;

        let backend = self.connector.connect(&self.target).await.map_err(|e| {
            GatewayError::kernel_start(format!("Failed to start kernel process on {} - {e}", self.target.key))
        })?;

        let mut backend = Some(backend);
        let session = {
            let mut tables = self.tables.lock();
            match tables.sessions.get(&request.name) {
                Some(existing) => refreshed(existing, &tables.processes),
                None => {
                    let kernel = Kernel::new(kernel_name);
                    let process = match backend.take() {
                        Some(backend) => Process::start(kernel.clone(), flavor, backend),
                        None => return Err(GatewayError::backend("backend already consumed")),
                    };
                    let session = Session {
                        id: SessionId::new(),
                        name: request.name.clone(),
                        path: request.path,
                        kind: request.kind,
                        kernel,
                    };
                    tables.processes.insert(session.kernel.id.clone(), process);
                    tables.sessions.insert(request.name, session.clone());
                    session
                }
            }
        };

        match backend {
            Some(mut surplus) => {
                debug!("session created concurrently; discarding extra backend");
                surplus.terminate().await;
            }
            None => info!(session_id = %session.id, kernel_id = %session.kernel.id, "session created"),
        }
        Ok(session)
    }

    /// Reconnect a kernel's backend in place.
    pub async fn restart_kernel(&self, id: &KernelId) -> Result<Kernel, GatewayError> {
        self.ensure_live()?;
        let process = self.require(id)?;
        process.restart(self.connector.as_ref(), &self.target).await
    }

    pub async fn interrupt(&self, id: &KernelId) -> Result<(), GatewayError> {
        self.require(id)?.interrupt().await
    }

    /// Remove a kernel and the session that owns it.
    pub async fn delete_kernel(&self, id: &KernelId) -> Result<(), GatewayError> {
        let process = {
            let mut tables = self.tables.lock();
            let process = tables
                .processes
                .remove(id)
                .ok_or_else(|| GatewayError::KernelNotFound(id.to_string()))?;
            tables.sessions.retain(|_, s| &s.kernel.id != id);
            process
        };
        process.shutdown().await;
        info!(kernel_id = %id, "kernel deleted");
        Ok(())
    }

    /// Remove a session and its kernel. Returns whether it existed.
    pub async fn delete_session(&self, id: &SessionId) -> bool {
        let process = {
            let mut tables = self.tables.lock();
            let Some(name) = tables
                .sessions
                .iter()
                .find(|(_, s)| &s.id == id)
                .map(|(name, _)| name.clone())
            else {
                return false;
            };
            tables
                .sessions
                .remove(&name)
                .and_then(|s| tables.processes.remove(&s.kernel.id))
        };
        if let Some(process) = process {
            process.shutdown().await;
        }
        info!(session_id = %id, "session deleted");
        true
    }

    pub fn sessions(&self) -> Vec<Session> {
        let tables = self.tables.lock();
        let mut sessions: Vec<Session> = tables
            .sessions
            .values()
            .map(|s| refreshed(s, &tables.processes))
            .collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        sessions
    }

    pub fn kernels(&self) -> Vec<Kernel> {
        let mut kernels: Vec<Kernel> = self.tables.lock().processes.values().map(|p| p.kernel()).collect();
        kernels.sort_by(|a, b| a.id.cmp(&b.id));
        kernels
    }

    pub fn kernel(&self, id: &KernelId) -> Option<Kernel> {
        self.process(id).map(|p| p.kernel())
    }

    pub fn session_by_name(&self, name: &str) -> Option<Session> {
        let tables = self.tables.lock();
        tables.sessions.get(name).map(|s| refreshed(s, &tables.processes))
    }

    pub fn process(&self, id: &KernelId) -> Option<Arc<Process>> {
        self.tables.lock().processes.get(id).cloned()
    }

    /// Terminate every backend. Later calls do nothing.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let processes: Vec<Arc<Process>> = {
            let mut tables = self.tables.lock();
            tables.sessions.clear();
            tables.processes.drain().map(|(_, p)| p).collect()
        };
        let count = processes.len();
        join_all(processes.iter().map(|p| p.shutdown())).await;
        info!(ns = %self.target.key, kernels = count, "namespace registry disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn require(&self, id: &KernelId) -> Result<Arc<Process>, GatewayError> {
        self.process(id)
            .ok_or_else(|| GatewayError::KernelNotFound(id.to_string()))
    }

    fn ensure_live(&self) -> Result<(), GatewayError> {
        if self.is_disposed() {
            warn!(ns = %self.target.key, "registry used after dispose");
            return Err(GatewayError::backend(format!(
                "kernels for {} have been shut down",
                self.target.key
            )));
        }
        Ok(())
    }
}

/// Session snapshot carrying the live kernel state.
fn refreshed(session: &Session, processes: &HashMap<KernelId, Arc<Process>>) -> Session {
    let mut session = session.clone();
    if let Some(process) = processes.get(&session.kernel.id) {
        session.kernel = process.kernel();
    }
    session
}
