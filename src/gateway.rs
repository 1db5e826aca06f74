//! Authorization around git smart-HTTP.
//!
//! [`GitProtocolGateway`] resolves the project of a git request, applies the read and push
//! gates and hands the request to a [`GitBackend`] that speaks the actual protocol.
//! For pushes it carries the advertised objects from the `GET info/refs` over to the following
//! `POST git-receive-pack`, see [`crate::advertised`].

use crate::advertised::{AdvertisedObjectsCache, AdvertisedObjectsCacheKey, ObjectId};
use crate::config::GitConfig;
use crate::response::PendingResponse;
use crate::session_store::SessionPersistence;
use crate::user::{AccessPath, CurrentUser};
use crate::web_session::WebSession;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use http::{Method, Request};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Paths served by the gateway, optionally under `/a/` and `/p/`.
pub const GIT_URL_REGEX: &str =
    r"^(?:/a)?(?:/p/|/)(.*/(?:info/refs|git-upload-pack|git-receive-pack))$";

static GIT_URL: Lazy<Regex> = Lazy::new(|| Regex::new(GIT_URL_REGEX).expect("valid regex"));

const INFO_REFS: &str = "/info/refs";
const UPLOAD_PACK: &str = "git-upload-pack";
const RECEIVE_PACK: &str = "git-receive-pack";

/// The two git services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    /// Fetch and clone.
    UploadPack,
    /// Push.
    ReceivePack,
}

impl Display for GitService {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::UploadPack => UPLOAD_PACK,
            Self::ReceivePack => RECEIVE_PACK,
        })
    }
}

/// A parsed git request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRoute {
    /// Project name with trailing `/` and `.git` removed.
    pub project: String,
    /// The service asked for.
    pub service: GitService,
    /// A `GET`, which asks for the ref advertisement.
    pub advertisement: bool,
}

impl GitRoute {
    /// Returns true if `path` is a git smart-HTTP path.
    pub fn matches(path: &str) -> bool {
        GIT_URL.is_match(path)
    }

    /// Parse the path and query of `request`.
    ///
    /// `info/refs` without a `service` parameter is treated as upload-pack.
    /// Whether the request is an advertisement depends on the method alone.
    pub fn parse<B>(request: &Request<B>) -> Option<Self> {
        let captures = GIT_URL.captures(request.uri().path())?;
        let matched = captures.get(1)?.as_str();

        let (project, service) = if let Some(project) = matched.strip_suffix(INFO_REFS) {
            let service = match query_param(request.uri().query(), "service").as_deref() {
                Some(RECEIVE_PACK) => GitService::ReceivePack,
                _ => GitService::UploadPack,
            };
            (project, service)
        } else if let Some(project) = matched.strip_suffix(UPLOAD_PACK) {
            (project, GitService::UploadPack)
        } else {
            (matched.strip_suffix(RECEIVE_PACK)?, GitService::ReceivePack)
        };
        let advertisement = *request.method() == Method::GET;

        let project = normalize_project_name(project);
        if project.is_empty() {
            return None;
        }
        Some(Self {
            project: project.to_string(),
            service,
            advertisement,
        })
    }
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<Cow<'a, str>> {
    let (_, value) = query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)?;
    urlencoding::decode(value).ok()
}

/// Strip trailing slashes and a `.git` suffix from a project name.
pub fn normalize_project_name(name: &str) -> &str {
    let name = name.trim_end_matches('/');
    let name = name.strip_suffix(".git").unwrap_or(name);
    name.trim_end_matches('/')
}

/// What the project directory knows about a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectState {
    /// Canonical project name.
    pub name: String,
    /// The project's state allows reads at all (it is not hidden).
    pub permits_read: bool,
    /// Receive-pack must check that referenced objects are reachable.
    pub check_reachable: bool,
}

/// Project permissions checked by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectPermission {
    /// See that the project exists.
    Access,
    /// Fetch.
    RunUploadPack,
    /// Push.
    RunReceivePack,
}

/// Whether an account may push to at least one ref of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capable {
    /// Pushes are possible.
    Ok,
    /// Pushes are refused; the message is shown to the client.
    Denied(String),
}

/// The project directory and permission backend.
#[async_trait]
pub trait ProjectAccess: Send + Sync {
    /// The state of project `name`, or `None` if there is no such project.
    async fn project_state(&self, name: &str) -> anyhow::Result<Option<ProjectState>>;

    /// Returns true if `user` holds `permission` on `project`.
    async fn check(
        &self,
        user: &CurrentUser,
        project: &str,
        permission: ProjectPermission,
    ) -> anyhow::Result<bool>;

    /// Whether `user` may push to `project`.
    async fn can_push(&self, user: &CurrentUser, project: &str) -> anyhow::Result<Capable>;
}

/// One git request, as handed to the [`GitBackend`].
#[derive(Debug, Clone, Copy)]
pub struct GitInvocation<'a> {
    /// The canonical project name.
    pub project: &'a str,
    /// The caller.
    pub user: &'a CurrentUser,
    /// A `GET` rather than a `POST`.
    pub advertisement: bool,
    /// The request body.
    pub body: &'a [u8],
}

/// Runs the git protocol itself.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Serve an upload-pack advertisement or negotiation.
    async fn upload_pack(
        &self,
        invocation: GitInvocation<'_>,
        response: &mut PendingResponse,
    ) -> anyhow::Result<()>;

    /// Serve a receive-pack advertisement or push.
    ///
    /// `advertised` holds objects to treat as advertised; an advertisement adds what it sent.
    async fn receive_pack(
        &self,
        invocation: GitInvocation<'_>,
        advertised: &mut HashSet<ObjectId>,
        response: &mut PendingResponse,
    ) -> anyhow::Result<()>;
}

/// Authorizes git requests and runs them with a [`GitBackend`].
pub struct GitProtocolGateway {
    projects: Arc<dyn ProjectAccess>,
    backend: Arc<dyn GitBackend>,
    advertised: AdvertisedObjectsCache,
    receive_enabled: bool,
    requests_started: AtomicU64,
}

impl GitProtocolGateway {
    /// Create a gateway for `config`.
    pub fn new(
        projects: Arc<dyn ProjectAccess>,
        backend: Arc<dyn GitBackend>,
        config: &GitConfig,
    ) -> Self {
        Self {
            projects,
            backend,
            advertised: AdvertisedObjectsCache::new(
                config.advertised_objects_ttl(),
                config.advertised_objects_max_entries,
            ),
            receive_enabled: config.receive_enabled,
            requests_started: AtomicU64::new(0),
        }
    }

    /// The cache of objects advertised to pushing clients.
    pub fn advertised_objects(&self) -> &AdvertisedObjectsCache {
        &self.advertised
    }

    /// Number of git requests handled so far.
    pub fn requests_started(&self) -> u64 {
        self.requests_started.load(Ordering::Relaxed)
    }

    /// Serve a git request for the caller bound to `session`.
    ///
    /// A `401` in the result carries no challenge yet; the authenticator adds it with
    /// [`crate::auth::Authenticator::finish`].
    pub async fn handle<P, B>(
        &self,
        request: &Request<B>,
        session: &mut WebSession<P>,
    ) -> PendingResponse
    where
        P: SessionPersistence,
        B: AsRef<[u8]>,
    {
        self.requests_started.fetch_add(1, Ordering::Relaxed);
        session.set_access_path(AccessPath::Git);
        let user = session.current_user();

        let Some(route) = GitRoute::parse(request) else {
            return Error::RepositoryNotFound(request.uri().path().to_string()).into_response();
        };
        let response = match self.serve(&route, &user, request.body().as_ref()).await {
            Ok(response) => response,
            Err(error) => {
                log::debug!("{} on {} refused for {user}: {error}", route.service, route.project);
                error.into_response()
            }
        };

        log::info!(
            target: "audit",
            "{} | {} | {} {} | {} | {}",
            session
                .record()
                .and_then(|record| record.session_id.as_deref())
                .unwrap_or("-"),
            user,
            route.service,
            route.project,
            request.method(),
            response.status().as_u16(),
        );
        response
    }

    async fn serve(
        &self,
        route: &GitRoute,
        user: &CurrentUser,
        body: &[u8],
    ) -> Result<PendingResponse> {
        let state = self.resolve(&route.project, user).await?;
        let invocation = GitInvocation {
            project: &state.name,
            user,
            advertisement: route.advertisement,
            body,
        };
        let mut response = PendingResponse::ok();
        match route.service {
            GitService::UploadPack => {
                if !self
                    .projects
                    .check(user, &state.name, ProjectPermission::RunUploadPack)
                    .await?
                {
                    return Err(Error::NotAuthorized(
                        "upload-pack not permitted on this server".to_string(),
                    ));
                }
                self.backend.upload_pack(invocation, &mut response).await?;
            }
            GitService::ReceivePack => {
                if !self.receive_enabled {
                    return Err(Error::NotAuthorized("receive-pack not enabled".to_string()));
                }
                let Some(account_id) = user.account_id() else {
                    return Err(Error::AuthenticationRequired);
                };
                if !self
                    .projects
                    .check(user, &state.name, ProjectPermission::RunReceivePack)
                    .await?
                {
                    return Err(Error::NotAuthorized(
                        "receive-pack not permitted on this server".to_string(),
                    ));
                }
                if let Capable::Denied(reason) = self.projects.can_push(user, &state.name).await? {
                    return Err(Error::NotAuthorized(reason));
                }

                if !state.check_reachable {
                    self.backend
                        .receive_pack(invocation, &mut HashSet::new(), &mut response)
                        .await?;
                    return Ok(response);
                }

                let key = AdvertisedObjectsCacheKey::new(account_id, state.name.as_str());
                let mut advertised = HashSet::new();
                if route.advertisement {
                    self.advertised.invalidate(&key);
                } else if let Some(cached) = self.advertised.take(&key, Utc::now()) {
                    log::debug!(
                        "reusing {} advertised objects for {user} on {}",
                        cached.len(),
                        state.name
                    );
                    advertised.extend(cached.iter().copied());
                }
                self.backend
                    .receive_pack(invocation, &mut advertised, &mut response)
                    .await?;
                if route.advertisement {
                    self.advertised.put(key, advertised, Utc::now());
                }
            }
        }
        Ok(response)
    }

    /// Find the project and check that `user` may see it.
    async fn resolve(&self, name: &str, user: &CurrentUser) -> Result<ProjectState> {
        let state = self
            .projects
            .project_state(name)
            .await?
            .filter(|state| state.permits_read)
            .ok_or_else(|| Error::RepositoryNotFound(name.to_string()))?;
        if self
            .projects
            .check(user, &state.name, ProjectPermission::Access)
            .await?
        {
            Ok(state)
        } else if user.is_identified() {
            Err(Error::NotAuthorized(format!("{user} may not access {}", state.name)))
        } else {
            Err(Error::AuthenticationRequired)
        }
    }
}

impl Debug for GitProtocolGateway {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitProtocolGateway")
            .field("receive_enabled", &self.receive_enabled)
            .field("requests_started", &self.requests_started())
            .finish_non_exhaustive()
    }
}
