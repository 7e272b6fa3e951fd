use lattix_ir::{FuncRef, InstId};

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// A call names a function that the module doesn't define.
    #[error("failed to find function {0}")]
    UnknownFunction(FuncRef),

    /// A call target that should have been lowered before the analysis.
    #[error("unexpected call target `{kind}` in `{func}` at {}", .inst.as_u32())]
    UnexpectedCallTarget {
        func: String,
        inst: InstId,
        kind: String,
    },

    #[error("the body of `{0}` doesn't end with `end_function`")]
    MissingEndFunction(String),

    #[error("`{0}` has no instruction to analyze")]
    EmptyBody(String),

    #[error("no summary was computed for `{0}`")]
    MissingSummary(String),

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// A stored summary names a function that the module doesn't declare.
    #[error("no function named `{0}` in the module")]
    UnknownFunctionName(String),

    #[error("failed to access the summary store: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed summary file: {0}")]
    Json(#[from] serde_json::Error),

    /// An error raised by a domain.
    #[error(transparent)]
    Domain(Box<dyn std::error::Error + Send + Sync>),
}

impl AnalysisError {
    pub fn domain(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Domain(Box::new(err))
    }

    /// Returns `true` if the error stems from a malformed input program rather
    /// than from the domain or the summary store.
    pub fn is_invariant_violation(&self) -> bool {
        !matches!(
            self,
            Self::Domain(_)
                | Self::Unsupported(_)
                | Self::UnknownFunctionName(_)
                | Self::Io(_)
                | Self::Json(_)
        )
    }
}
