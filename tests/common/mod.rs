#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use session_gateway::account::{AccountError, AccountManager, AccountState, AuthRequest, AuthResult};
use session_gateway::advertised::ObjectId;
use session_gateway::auth::oauth::{OAuthLoginError, OAuthLoginProvider, OAuthUserInfo};
use session_gateway::config::{AuthConfig, SessionConfig};
use session_gateway::gateway::{
    Capable, GitBackend, GitInvocation, ProjectAccess, ProjectPermission, ProjectState,
};
use session_gateway::session_store::key_generator::DebugSessionKeyGenerator;
use session_gateway::user::CurrentUser;
use session_gateway::{
    AccountId, CookieSettings, MemoryStore, PendingResponse, SessionStore, WebSession,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const USER: AccountId = AccountId::new(1000);
pub const OTHER: AccountId = AccountId::new(1001);
pub const INACTIVE: AccountId = AccountId::new(1002);

/// A fixed point in time, so tests do not depend on the clock.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn session_store() -> Arc<SessionStore<MemoryStore>> {
    Arc::new(
        SessionStore::new(MemoryStore::new_with_logger(), &SessionConfig::default())
            .with_key_generator(DebugSessionKeyGenerator::default()),
    )
}

pub fn anonymous_session(store: &Arc<SessionStore<MemoryStore>>) -> WebSession<MemoryStore> {
    WebSession::anonymous(store.clone(), CookieSettings::from_config(&AuthConfig::default()))
}

/// Accounts `user` (HTTP password `secret`, directory password `ldap-secret`), `other`
/// (no HTTP password) and the inactive `gone`.
#[derive(Debug, Default)]
pub struct TestAccounts {
    accounts: HashMap<String, AccountState>,
    directory_passwords: HashMap<String, String>,
    external_ids: Mutex<HashMap<String, AccountId>>,
    pub requests: Mutex<Vec<AuthRequest>>,
}

impl TestAccounts {
    pub fn new() -> Arc<Self> {
        let mut accounts = HashMap::new();
        for (id, name, active, password) in [
            (USER, "user", true, Some("secret")),
            (OTHER, "other", true, None),
            (INACTIVE, "gone", false, Some("secret")),
        ] {
            accounts.insert(
                name.to_string(),
                AccountState {
                    account_id: id,
                    username: name.to_string(),
                    active,
                    http_password: password.map(str::to_string),
                },
            );
        }
        Arc::new(Self {
            accounts,
            directory_passwords: HashMap::from([("user".to_string(), "ldap-secret".to_string())]),
            external_ids: Mutex::new(HashMap::from([("github:77".to_string(), USER)])),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AccountManager for TestAccounts {
    async fn by_username(&self, username: &str) -> anyhow::Result<Option<AccountState>> {
        Ok(self.accounts.get(username).cloned())
    }

    async fn authenticate(&self, request: AuthRequest) -> Result<AuthResult, AccountError> {
        self.requests.lock().push(request.clone());
        if let Some(account_id) = self.external_ids.lock().get(&request.external_id) {
            return Ok(AuthResult {
                account_id: *account_id,
                external_id: request.external_id.clone(),
                is_new: false,
            });
        }
        let username = request
            .username
            .clone()
            .ok_or_else(|| AccountError::NoSuchUser(request.external_id.clone()))?;
        let account = self
            .accounts
            .get(&username)
            .ok_or_else(|| AccountError::NoSuchUser(username.clone()))?;
        match (self.directory_passwords.get(&username), &request.password) {
            (Some(expected), Some(password)) if expected == password => Ok(AuthResult {
                account_id: account.account_id,
                external_id: request.external_id,
                is_new: false,
            }),
            _ => Err(AccountError::AuthenticationFailed(username)),
        }
    }
}

/// Accepts the token `good-token` for `user`.
#[derive(Debug, Default)]
pub struct TestOAuthProvider {
    pub logins: Mutex<Vec<(Option<String>, String)>>,
}

#[async_trait]
impl OAuthLoginProvider for TestOAuthProvider {
    async fn login(
        &self,
        username: Option<&str>,
        token: &str,
    ) -> Result<OAuthUserInfo, OAuthLoginError> {
        self.logins
            .lock()
            .push((username.map(str::to_string), token.to_string()));
        if token == "good-token" && username == Some("user") {
            Ok(OAuthUserInfo {
                external_id: "github:77".to_string(),
                username: Some("user".to_string()),
                email: Some("user@example.com".to_string()),
                display_name: None,
            })
        } else {
            Err(OAuthLoginError::Rejected("unknown token".to_string()))
        }
    }
}

/// Projects `public` (anyone reads, `user` pushes), `secret` (only `user` sees it),
/// `locked` (pushes denied) and the hidden `hidden`.
#[derive(Debug)]
pub struct TestProjects {
    pub check_reachable: bool,
}

#[async_trait]
impl ProjectAccess for TestProjects {
    async fn project_state(&self, name: &str) -> anyhow::Result<Option<ProjectState>> {
        Ok(match name {
            "public" | "secret" | "locked" | "hidden" => Some(ProjectState {
                name: name.to_string(),
                permits_read: name != "hidden",
                check_reachable: self.check_reachable,
            }),
            "broken" => anyhow::bail!("project index unavailable"),
            _ => None,
        })
    }

    async fn check(
        &self,
        user: &CurrentUser,
        project: &str,
        permission: ProjectPermission,
    ) -> anyhow::Result<bool> {
        let is_user = user.account_id() == Some(USER);
        Ok(match (project, permission) {
            ("secret", _) => is_user,
            (_, ProjectPermission::Access | ProjectPermission::RunUploadPack) => true,
            (_, ProjectPermission::RunReceivePack) => user.is_identified(),
        })
    }

    async fn can_push(&self, user: &CurrentUser, project: &str) -> anyhow::Result<Capable> {
        Ok(if project == "locked" || user.account_id() != Some(USER) {
            Capable::Denied(format!("{user} cannot push to {project}"))
        } else {
            Capable::Ok
        })
    }
}

pub fn object(byte: u8) -> ObjectId {
    ObjectId::from_bytes([byte; 20])
}

/// Advertises the objects in `refs`; records the advertised set every push starts with.
#[derive(Debug, Default)]
pub struct TestGitBackend {
    pub refs: Mutex<HashSet<ObjectId>>,
    pub pushes: Mutex<Vec<HashSet<ObjectId>>>,
    pub fetches: Mutex<Vec<String>>,
}

#[async_trait]
impl GitBackend for TestGitBackend {
    async fn upload_pack(
        &self,
        invocation: GitInvocation<'_>,
        response: &mut PendingResponse,
    ) -> anyhow::Result<()> {
        self.fetches.lock().push(invocation.project.to_string());
        response.set_body("application/x-git-upload-pack-result", b"PACK".to_vec());
        Ok(())
    }

    async fn receive_pack(
        &self,
        invocation: GitInvocation<'_>,
        advertised: &mut HashSet<ObjectId>,
        response: &mut PendingResponse,
    ) -> anyhow::Result<()> {
        if invocation.advertisement {
            advertised.extend(self.refs.lock().iter().copied());
            response.set_body(
                "application/x-git-receive-pack-advertisement",
                b"001f# service=git-receive-pack\n".to_vec(),
            );
        } else {
            self.pushes.lock().push(advertised.clone());
            response.set_body("application/x-git-receive-pack-result", b"unpack ok\n".to_vec());
        }
        Ok(())
    }
}
