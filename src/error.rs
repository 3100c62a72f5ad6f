pub type Result<T> = anyhow::Result<T>;

/// Fatal pipeline error classes. Everything here aborts the run; the
/// messages carry the offending team, match, or diagnostic so the operator
/// can fix the input rather than guess.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unknown team in lookup: {name}")]
    UnknownTeam { name: String },

    #[error("non-positive match weight {weight} for {home} vs {away} on {date}")]
    NonPositiveWeight {
        weight: f64,
        home: String,
        away: String,
        date: String,
    },

    #[error("no training matches left after filtering: {reason}")]
    EmptyTrainingSet { reason: String },

    #[error("failed to initialize sampler: {reason}")]
    BadInitialization { reason: String },

    #[error("sampler did not converge: {detail}")]
    NotConverged { detail: String },

    #[error("posterior ensemble does not match registry: {detail}")]
    EnsembleMismatch { detail: String },

    #[error("fit artifact rejected: {reason}")]
    ArtifactRejected { reason: String },
}
