use thiserror::Error;
use tokio::sync::oneshot;
use url::Url;

use crate::bundle;
use crate::handlers;
use crate::response::Reply;
use crate::tree::FileTree;

/// Path prefix under which all plain webdav requests arrive.
pub const DEFAULT_ROOT_PATH: &str = "/owncloud/remote.php/webdav/";
/// Path prefix of bundle upload endpoints; the principal name is appended.
pub const DEFAULT_BUNDLE_ROOT_PATH: &str = "/remote.php/dav/files/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Propfind,
    Get,
    Put,
    Mkcol,
    Delete,
    Move,
    /// Bundle upload.
    Post,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("reply channel closed before delivery")]
    Canceled,
}

/// One protocol request: a verb, an absolute url under the configured root,
/// and for PUT/POST a body.
#[derive(Debug, Clone)]
pub struct Request {
    pub verb: Verb,
    pub url: Url,
    /// Raw `Destination` header for MOVE; an absolute url or a bare path.
    pub destination: Option<String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(verb: Verb, url: &str) -> Result<Self, RequestError> {
        Ok(Self {
            verb,
            url: Url::parse(url)?,
            destination: None,
            body: Vec::new(),
        })
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }
}

/// Completion signal for a dispatched request. The tree mutation is already
/// applied by the time [`FakeServer::submit`] returns, so waiting can only
/// fail if the server side was torn down first.
pub struct ReplyHandle {
    rx: oneshot::Receiver<Reply>,
}

impl ReplyHandle {
    pub async fn wait(self) -> Result<Reply, DispatchError> {
        self.rx.await.map_err(|_| DispatchError::Canceled)
    }
}

/// The simulated remote server: owns the resource tree, routes verbs to
/// their handlers, and applies the forced-error path list before any
/// handler runs. Requests must be serialized by the caller; each one runs
/// to completion as a single atomic mutation.
pub struct FakeServer {
    tree: FileTree,
    error_paths: Vec<String>,
    root_path: String,
    bundle_root_path: String,
}

impl FakeServer {
    pub fn new(initial: FileTree) -> Self {
        Self::with_roots(initial, DEFAULT_ROOT_PATH, DEFAULT_BUNDLE_ROOT_PATH)
    }

    pub fn with_roots(initial: FileTree, root_path: &str, bundle_root_path: &str) -> Self {
        Self {
            tree: initial,
            error_paths: Vec::new(),
            root_path: root_path.to_string(),
            bundle_root_path: bundle_root_path.to_string(),
        }
    }

    /// Current remote state.
    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    /// Remote-side modifier, for tests that change the server state behind
    /// the client's back.
    pub fn tree_mut(&mut self) -> &mut FileTree {
        &mut self.tree
    }

    /// Relative paths that answer 500 regardless of verb, without mutation.
    pub fn error_paths_mut(&mut self) -> &mut Vec<String> {
        &mut self.error_paths
    }

    /// Handles the request and returns the completion handle. The reply is
    /// sent into the channel before this returns; callers may also drop the
    /// handle and observe the mutation directly.
    pub fn submit(&mut self, request: Request) -> ReplyHandle {
        let reply = self.handle(&request);
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(reply);
        ReplyHandle { rx }
    }

    fn handle(&mut self, request: &Request) -> Reply {
        if let Some(target) = request.url.path().strip_prefix(&self.root_path)
            && self.error_paths.iter().any(|path| path == target)
        {
            return Reply::with_status(500);
        }

        match request.verb {
            Verb::Propfind => {
                handlers::propfind(&self.tree, &self.root_path, &self.target(request))
            }
            Verb::Get => handlers::get(&self.tree, &self.target(request)),
            Verb::Put => {
                let target = self.target(request);
                handlers::put(&mut self.tree, &target, &request.body)
            }
            Verb::Mkcol => {
                let target = self.target(request);
                handlers::mkcol(&mut self.tree, &target)
            }
            Verb::Delete => {
                let target = self.target(request);
                handlers::delete(&mut self.tree, &target)
            }
            Verb::Move => {
                let target = self.target(request);
                let Some(destination) = request.destination.as_deref() else {
                    panic!("move request requires a Destination header");
                };
                let to = self.destination_target(destination);
                handlers::move_resource(&mut self.tree, &target, &to)
            }
            Verb::Post => self.handle_bundle(request),
        }
    }

    fn handle_bundle(&mut self, request: &Request) -> Reply {
        let principal = request.url.username();
        if principal == bundle::RESERVED_ERROR_PRINCIPAL {
            return bundle::forbidden();
        }
        let bundle_href = format!("{}{principal}", self.bundle_root_path);
        assert!(
            request.url.path().ends_with(&bundle_href),
            "bundle request path must end with the principal's bundle root"
        );
        bundle::bundle_post(&mut self.tree, &bundle_href, &request.body)
    }

    /// Target path relative to the webdav root; a request outside the root
    /// prefix is a caller bug.
    fn target(&self, request: &Request) -> String {
        let Some(target) = request.url.path().strip_prefix(&self.root_path) else {
            panic!(
                "request path {:?} must lie under the webdav root {:?}",
                request.url.path(),
                self.root_path
            );
        };
        target.trim_end_matches('/').to_string()
    }

    fn destination_target(&self, destination: &str) -> String {
        let path = match Url::parse(destination) {
            Ok(url) => url.path().to_string(),
            Err(_) => destination.to_string(),
        };
        let Some(target) = path.strip_prefix(&self.root_path) else {
            panic!("destination {destination:?} must lie under the webdav root");
        };
        target.trim_end_matches('/').to_string()
    }
}
