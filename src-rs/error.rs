use thiserror::Error;

/// Why a submission attempt ended without results.
///
/// Every variant is terminal for one attempt only: the surface, variables and
/// annotations are left exactly as they were, so the user can retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The recognition service could not be reached or exited abnormally.
    #[error("recognition service unreachable: {0}")]
    TransportFailure(String),
    /// The service answered, but not with a usable result list.
    #[error("malformed recognition response: {0}")]
    InvalidResponse(String),
    /// Nothing has been drawn, so there is nothing to recognize.
    #[error("nothing to submit: the surface has no drawn content")]
    EmptySurface,
    /// Another submission is still waiting for its response.
    #[error("a submission is already in flight")]
    InFlight,
}
