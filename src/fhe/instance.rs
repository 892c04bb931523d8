use std::future::Future;
use std::sync::Arc;

use log::{debug, error};
use tokio::sync::OnceCell;

use super::FheBackend;
use crate::error::ProtocolError;

pub type SharedBackend = Arc<dyn FheBackend>;

/// Lazily created backend handle with single-flight initialization.
///
/// Concurrent `initialize` calls wait on the one in-flight initializer and
/// all receive the same instance. A failed initialization is not cached, the
/// next caller runs its initializer again.
pub struct BackendCell {
    cell: OnceCell<SharedBackend>,
}
impl BackendCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }
    pub async fn initialize<F, Fut>(&self, init: F) -> Result<SharedBackend, ProtocolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<SharedBackend>>,
    {
        let backend = self
            .cell
            .get_or_try_init(|| async move {
                debug!("Initializing encryption backend");
                init().await.map_err(|e| {
                    error!("Failed to initialize encryption backend: {:#}", e);
                    ProtocolError::BackendInitFailed(format!("{:#}", e))
                })
            })
            .await?;
        Ok(backend.clone())
    }
    pub fn get_instance(&self) -> Result<SharedBackend, ProtocolError> {
        self.cell
            .get()
            .cloned()
            .ok_or(ProtocolError::UninitializedEncryptionBackend)
    }
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }
}
impl Default for BackendCell {
    fn default() -> Self {
        Self::new()
    }
}

static BACKEND: BackendCell = BackendCell::new();

/// Initializes the process wide backend, or returns the existing one.
pub async fn initialize<F, Fut>(init: F) -> Result<SharedBackend, ProtocolError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<SharedBackend>>,
{
    BACKEND.initialize(init).await
}
pub fn get_instance() -> Result<SharedBackend, ProtocolError> {
    BACKEND.get_instance()
}
pub fn global() -> &'static BackendCell {
    &BACKEND
}
