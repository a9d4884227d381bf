use thiserror::Error;

use crate::job::{ParseError, TriggerKind, ValidationError};
use crate::selector::SelectorError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid node filter: {0}")]
    Selector(#[from] SelectorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("job `{job_id}` cannot be triggered ({kind}): execution or schedule is disabled")]
    TriggerDisabled { job_id: String, kind: TriggerKind },
}
