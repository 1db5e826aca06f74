use crate::response::PendingResponse;
use http::StatusCode;

/// All errors that can end the handling of a request in this crate.
///
/// Every variant is local to the request that produced it.
/// Use [`Error::status`] to map it to the HTTP status that is sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The `Authorization` header could not be parsed or is missing required parameters.
    #[error("malformed credentials: {0}")]
    MalformedCredentials(String),

    /// The account named in the credentials does not exist, or is inactive.
    #[error("unknown or inactive account {username:?}")]
    UnknownOrInactiveAccount {
        /// The user name sent by the client.
        username: String,
    },

    /// The credentials were parsed, but did not verify.
    #[error("credentials for {username:?} did not verify")]
    BadCredentials {
        /// The user name sent by the client.
        username: String,
    },

    /// A digest response was correct, but its nonce has expired.
    /// The client may retry with a fresh nonce without asking the user again.
    #[error("stale digest nonce")]
    StaleNonce,

    /// The caller is not allowed to run the requested operation.
    /// The message is shown to the client.
    #[error("{0}")]
    NotAuthorized(String),

    /// The caller must authenticate before the request can be served.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The repository does not exist or is not visible to the caller.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A collaborator failed, e.g. the persistent session store or the token signer.
    /// The detail is logged but never sent to the client.
    #[error("internal failure: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// The HTTP status code this error is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedCredentials(_) | Self::NotAuthorized(_) => StatusCode::FORBIDDEN,
            Self::UnknownOrInactiveAccount { .. }
            | Self::BadCredentials { .. }
            | Self::StaleNonce
            | Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::RepositoryNotFound(_) => StatusCode::NOT_FOUND,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Turn this error into the response sent to the client.
    ///
    /// Only [`Error::NotAuthorized`] and [`Error::RepositoryNotFound`] carry a body;
    /// internal failures are logged here and answered with a bare 500.
    pub fn into_response(self) -> PendingResponse {
        let mut response = PendingResponse::new(self.status());
        match &self {
            Self::NotAuthorized(reason) => response.set_text_body(reason),
            Self::RepositoryNotFound(_) => response.set_text_body("Repository not found"),
            Self::Config(_) | Self::Internal(_) => {
                log::error!("{self}");
            }
            _ => {}
        }
        response
    }
}
