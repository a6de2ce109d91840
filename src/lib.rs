mod bundle;
mod handlers;
mod paths;
mod response;
mod server;
mod tree;

pub use bundle::{BundlePart, parse_bundle};
pub use response::{DavResponse, ErrorDocument, Multistatus, Reply, ResponseProps};
pub use server::{
    DEFAULT_BUNDLE_ROOT_PATH, DEFAULT_ROOT_PATH, DispatchError, FakeServer, ReplyHandle, Request,
    RequestError, Verb,
};
pub use tree::{DEFAULT_CONTENT_CHAR, DEFAULT_FILE_SIZE, FileModifier, FileNode, FileTree, NodeId};
