use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::dataflow::DataflowError;
use crate::frontend::RegType;
use crate::verifier::VerifyError;
use thiserror::Error;

/// Errors that abort an optimization run
///
/// Infeasibility is not among them: the optimizer reports it as a missing
/// result so callers can retry with relaxed settings.
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("no register of class {ty} is a valid choice for `{register}` in `{inst}` (restriction: {restriction:?})")]
    NoRenamingCandidates {
        inst: String,
        register: String,
        ty: RegType,
        restriction: Option<Vec<String>>,
    },

    #[error("register `{register}` has no entry in the {direction} renaming policy")]
    UnknownRegister {
        register: String,
        direction: &'static str,
    },

    #[error("no instruction carries the source id `{0}`")]
    UnknownSourceId(String),

    #[error("loop copies of `{inst}` have incompatible renaming options for output {slot}")]
    PeriodicCandidates { inst: String, slot: usize },

    #[error("out of {0} registers while assigning global inputs and outputs statically")]
    OutOfRegisters(RegType),

    #[error("an optimizer instance may only be used once")]
    AlreadyUsed,

    #[error("locked prefix and suffix cannot be combined with software pipelining")]
    LockedRegionInLoop,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataflow(#[from] DataflowError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Verify(#[from] VerifyError),
}
