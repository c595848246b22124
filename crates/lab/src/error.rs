use agentsim_kernel::KernelError;
use agentsim_persist::StoreError;

/// Errors from the experiment layer.
#[derive(Debug, thiserror::Error)]
pub enum LabError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid state for agent {agent}: {reason}")]
    AgentState { agent: String, reason: String },
}
