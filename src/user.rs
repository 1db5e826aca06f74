//! The caller of a request, as seen by authorization checks.

use crate::session::AccountId;
use std::fmt::{Display, Formatter};

/// How a request reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessPath {
    /// The web UI, authenticated by the session cookie.
    WebBrowser,
    /// Git smart-HTTP.
    Git,
    /// The REST API under `/a/`.
    RestApi,
}

impl AccessPath {
    const fn bit(self) -> u8 {
        match self {
            Self::WebBrowser => 1,
            Self::Git => 1 << 1,
            Self::RestApi => 1 << 2,
        }
    }
}

/// A set of [`AccessPath`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessPaths(u8);

impl AccessPaths {
    /// The empty set.
    pub const fn none() -> Self {
        Self(0)
    }

    /// Returns true if `path` is in the set.
    pub fn contains(self, path: AccessPath) -> bool {
        self.0 & path.bit() != 0
    }

    /// Add or remove `path`.
    pub fn set(&mut self, path: AccessPath, ok: bool) {
        if ok {
            self.0 |= path.bit();
        } else {
            self.0 &= !path.bit();
        }
    }
}

/// The user a request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentUser {
    /// Nobody signed in.
    Anonymous,
    /// A known account.
    Identified {
        /// The account.
        account_id: AccountId,
        /// The path the request arrived on.
        access_path: AccessPath,
    },
}

impl CurrentUser {
    /// The account, if the user is identified.
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Self::Anonymous => None,
            Self::Identified { account_id, .. } => Some(*account_id),
        }
    }

    /// Returns true if the user is identified.
    pub fn is_identified(&self) -> bool {
        matches!(self, Self::Identified { .. })
    }
}

impl Display for CurrentUser {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "ANONYMOUS"),
            Self::Identified { account_id, .. } => write!(f, "account {account_id}"),
        }
    }
}
