use crate::descriptor::TransferId;

/// Errors from the upload manager's caller API.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),
    #[error("upload manager is shut down")]
    ShutDown,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
