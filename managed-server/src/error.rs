use std::time::Duration;

use crate::model::NodeState;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    /// Retrying won't help, the resource definition has to change.
    #[error("{0}")]
    NonRecoverable(String),

    #[error("Server {id} has not reached state {state:?}. Waited for {} seconds", .waited.as_secs())]
    Timeout {
        id: String,
        state: NodeState,
        waited: Duration,
    },

    #[error("Server {id} disappeared while waiting for state {state:?}")]
    Vanished { id: String, state: NodeState },
}

impl ServerError {
    pub fn non_recoverable(message: impl Into<String>) -> Self {
        ServerError::NonRecoverable(message.into())
    }
}

pub fn is_non_recoverable(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ServerError>(),
        Some(ServerError::NonRecoverable(_))
    )
}
