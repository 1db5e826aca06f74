//! HTTP Digest authentication (RFC 2617, `qop=auth` only).
//!
//! Nonces are signed tokens bound to the client address, so the server keeps no nonce state.
//! A correct response computed over an expired nonce is answered with `stale=true`, which lets
//! clients retry without asking the user for the password again.
//! Nonces may be replayed within their lifetime.

use super::{authorization, bind_account, lookup_name, remote_addr, secrets_match, AuthOutcome};
use crate::account::AccountManager;
use crate::config::AuthConfig;
use crate::session_store::SessionPersistence;
use crate::token_signer::{TokenCheck, TokenSigner};
use crate::web_session::WebSession;
use crate::{Error, Result};
use chrono::Utc;
use http::Request;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

const SCHEME: &str = "Digest ";

/// The only quality of protection that is accepted.
pub const QOP_AUTH: &str = "auth";

/// A `WWW-Authenticate: Digest` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    /// Realm the credentials belong to.
    pub realm: String,
    /// Protection space, the server's URL.
    pub domain: String,
    /// Fresh nonce.
    pub nonce: String,
    /// The rejected response was correct, only its nonce expired.
    pub stale: bool,
}

impl Display for DigestChallenge {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Digest realm=\"{}\", domain=\"{}\", qop=\"{QOP_AUTH}\", stale={}, nonce=\"{}\"",
            self.realm, self.domain, self.stale, self.nonce
        )
    }
}

/// Verifies `Authorization: Digest` credentials against the accounts' HTTP passwords.
pub struct DigestAuthenticator {
    accounts: Arc<dyn AccountManager>,
    signer: Arc<dyn TokenSigner>,
    realm: String,
    domain: String,
    case_insensitive: bool,
}

impl DigestAuthenticator {
    /// Create an authenticator for `config` whose nonces are issued by `signer`.
    pub fn new(
        accounts: Arc<dyn AccountManager>,
        signer: Arc<dyn TokenSigner>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            accounts,
            signer,
            realm: config.realm.clone(),
            domain: config.digest_domain().to_string(),
            case_insensitive: config.user_name_case_insensitive,
        }
    }

    /// A challenge with a fresh nonce for the client of `request`.
    pub fn challenge<B>(&self, request: &Request<B>, stale: bool) -> Result<DigestChallenge> {
        let nonce = self.signer.new_token(&remote_addr(request), Utc::now())?;
        Ok(DigestChallenge {
            realm: self.realm.clone(),
            domain: self.domain.clone(),
            nonce,
            stale,
        })
    }

    /// Verify the request's Digest credentials, if it carries any.
    pub async fn authenticate<P: SessionPersistence, B>(
        &self,
        request: &Request<B>,
        session: &mut WebSession<P>,
    ) -> Result<AuthOutcome> {
        let Some(header) = authorization(request).filter(|value| value.starts_with(SCHEME)) else {
            return Ok(AuthOutcome::Anonymous);
        };
        let params = parse_authorization(header).ok_or_else(|| {
            Error::MalformedCredentials("unparsable digest parameters".to_string())
        })?;
        let credentials = DigestCredentials::from_params(&params)?;
        if credentials.realm != self.realm {
            return Err(Error::MalformedCredentials(format!(
                "realm {:?} is not {:?}",
                credentials.realm, self.realm
            )));
        }

        let username = lookup_name(credentials.username, self.case_insensitive);
        let account = self
            .accounts
            .by_username(&username)
            .await?
            .filter(|account| account.active)
            .ok_or_else(|| Error::UnknownOrInactiveAccount {
                username: username.clone(),
            })?;
        let Some(password) = account.http_password.as_deref() else {
            return Err(Error::BadCredentials { username });
        };

        let expected = credentials.expected_response(password, request.method().as_str());
        if !secrets_match(&expected, credentials.response) {
            return Err(Error::BadCredentials { username });
        }

        match self
            .signer
            .check_token(credentials.nonce, &remote_addr(request), Utc::now())?
        {
            TokenCheck::Valid => {
                bind_account(session, account.account_id);
                Ok(AuthOutcome::Authenticated(account.account_id))
            }
            TokenCheck::Expired => Err(Error::StaleNonce),
            TokenCheck::Invalid => Err(Error::BadCredentials { username }),
        }
    }
}

impl Debug for DigestAuthenticator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestAuthenticator")
            .field("realm", &self.realm)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// The parameters of a Digest authorization header that take part in verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DigestCredentials<'a> {
    username: &'a str,
    realm: &'a str,
    nonce: &'a str,
    uri: &'a str,
    response: &'a str,
    qop: &'a str,
    nc: &'a str,
    cnonce: &'a str,
}

impl<'a> DigestCredentials<'a> {
    fn from_params(params: &'a HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| {
            params.get(name).map(String::as_str).ok_or_else(|| {
                Error::MalformedCredentials(format!("missing digest parameter {name}"))
            })
        };
        let qop = get("qop")?;
        if qop != QOP_AUTH {
            return Err(Error::MalformedCredentials(format!("unsupported qop {qop:?}")));
        }
        Ok(Self {
            username: get("username")?,
            realm: get("realm")?,
            nonce: get("nonce")?,
            uri: get("uri")?,
            response: get("response")?,
            qop,
            nc: get("nc")?,
            cnonce: get("cnonce")?,
        })
    }

    fn expected_response(&self, password: &str, method: &str) -> String {
        response_digest(
            &format!("{}:{}:{password}", self.username, self.realm),
            &format!("{method}:{}", self.uri),
            &[self.nonce, self.nc, self.cnonce, self.qop],
        )
    }
}

/// `KD(H(A1), nonce:nc:cnonce:qop:H(A2))` with MD5 as `H`.
fn response_digest(a1: &str, a2: &str, nonce_parts: &[&str]) -> String {
    let mut data = md5_hex(a1);
    for part in nonce_parts {
        data.push(':');
        data.push_str(part);
    }
    data.push(':');
    data.push_str(&md5_hex(a2));
    md5_hex(&data)
}

fn md5_hex(data: &str) -> String {
    format!("{:x}", md5::compute(data))
}

/// Split the parameters of a Digest authorization header.
///
/// Values may be quoted or bare; a bare value ends at the next space or comma.
/// Returns `None` if a parameter has no value or a quote is not closed.
pub fn parse_authorization(header: &str) -> Option<HashMap<String, String>> {
    let mut params = HashMap::new();
    let mut rest = header.strip_prefix(SCHEME)?;
    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if rest.is_empty() {
            return Some(params);
        }
        let (name, after) = rest.split_once('=')?;
        let value;
        if let Some(quoted) = after.strip_prefix('"') {
            let (inner, tail) = quoted.split_once('"')?;
            value = inner;
            rest = tail;
        } else {
            if after.is_empty() {
                return None;
            }
            let end = after.find([' ', ',']).unwrap_or(after.len());
            value = &after[..end];
            rest = &after[end..];
        }
        params.insert(name.trim().to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc_2617_example() {
        let credentials = DigestCredentials {
            username: "Mufasa",
            realm: "testrealm@host.com",
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            uri: "/dir/index.html",
            response: "6629fae49393a05397450978507c4ef1",
            qop: "auth",
            nc: "00000001",
            cnonce: "0a4f113b",
        };
        assert_eq!(
            credentials.expected_response("Circle Of Life", "GET"),
            credentials.response
        );
    }

    #[test]
    fn quoted_and_bare_values() {
        let params = parse_authorization(
            "Digest username=\"Mufasa\", realm=\"testrealm@host.com\", qop=auth, nc=00000001,cnonce=\"0a4f113b\"",
        )
        .unwrap();
        assert_eq!(params["username"], "Mufasa");
        assert_eq!(params["realm"], "testrealm@host.com");
        assert_eq!(params["qop"], "auth");
        assert_eq!(params["nc"], "00000001");
        assert_eq!(params["cnonce"], "0a4f113b");
    }

    #[test]
    fn quoted_values_keep_commas() {
        let params = parse_authorization("Digest uri=\"/a/changes/?q=a,b\", nc=1").unwrap();
        assert_eq!(params["uri"], "/a/changes/?q=a,b");
        assert_eq!(params["nc"], "1");
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        assert!(parse_authorization("Digest username=\"Mufasa").is_none());
        assert!(parse_authorization("Digest username=").is_none());
        assert!(parse_authorization("Digest username").is_none());
    }

    #[test]
    fn missing_parameters_are_malformed() {
        let params = parse_authorization("Digest username=\"Mufasa\", qop=auth").unwrap();
        assert!(matches!(
            DigestCredentials::from_params(&params),
            Err(Error::MalformedCredentials(_))
        ));

        let params = parse_authorization(
            "Digest username=a, realm=r, nonce=n, uri=/, response=x, qop=auth-int, nc=1, cnonce=c",
        )
        .unwrap();
        assert!(matches!(
            DigestCredentials::from_params(&params),
            Err(Error::MalformedCredentials(_))
        ));
    }

    #[test]
    fn challenge_format() {
        let challenge = DigestChallenge {
            realm: "Gerrit Code Review".to_string(),
            domain: "/".to_string(),
            nonce: "abc$".to_string(),
            stale: true,
        };
        assert_eq!(
            challenge.to_string(),
            "Digest realm=\"Gerrit Code Review\", domain=\"/\", qop=\"auth\", stale=true, nonce=\"abc$\""
        );
    }
}
