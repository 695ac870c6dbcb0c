use thiserror::Error;

/// The unrecoverable failures of the merge engine.
///
/// Recoverable problems never surface here: inconsistencies discovered while
/// interpreting the PCS structure degrade the affected subtree to a
/// line-based merge, and disagreements between revisions are reported as
/// conflicts in the output, counted in the merge result.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MergeError {
    /// An external matcher failed to produce a matching.
    #[error("matcher error: {0}")]
    Matcher(String),
    /// More than one non-base role survived role disambiguation,
    /// which indicates a bug in the merge itself.
    #[error("role resolution failed: {0}")]
    RoleResolution(String),
    /// Root conflicts survived the single allowed rebuild of the
    /// class-representative map.
    #[error("root conflicts persisted after retrying with pruned matchings")]
    RootConflictRetry,
}
