use crate::response::{DavResponse, Multistatus, Reply, ResponseProps};
use crate::tree::{FileNode, FileTree};

pub(crate) const STATUS_LINE_OK: &str = "HTTP/1.1 200 OK";

/// 207 listing: one entry for the target itself, then one per direct child
/// in name order.
pub(crate) fn propfind(tree: &FileTree, root_path: &str, target: &str) -> Reply {
    let Some(id) = tree.find(target) else {
        panic!("propfind target {target:?} does not exist");
    };
    let mut responses = vec![resource_entry(root_path, tree.node(id))];
    responses.extend(tree.children(id).map(|child| resource_entry(root_path, child)));
    Reply::multistatus(&Multistatus { responses })
}

pub(crate) fn get(tree: &FileTree, target: &str) -> Reply {
    let Some(node) = tree.get(target) else {
        panic!("get target {target:?} does not exist");
    };
    let mut reply = Reply::with_status(200);
    reply.set_header("OC-ETag", &node.etag);
    reply.set_header("ETag", &node.etag);
    reply.set_header("OC-FileId", &node.file_id);
    reply.set_body(vec![node.content_char; node.size as usize]);
    reply
}

/// Overwrite-or-create from the request body; the body is assumed to be one
/// repeated byte, so only its length and first byte matter.
pub(crate) fn put(tree: &mut FileTree, target: &str, body: &[u8]) -> Reply {
    let Some(&fill) = body.first() else {
        panic!("put request for {target:?} has an empty body");
    };
    let id = tree.upsert_file(target, body.len() as u64, fill);
    let etag = tree.node(id).etag.clone();
    let mut reply = Reply::with_status(200);
    reply.set_header("OC-ETag", &etag);
    reply.set_header("ETag", &etag);
    reply.set_header("X-OC-MTime", "accepted");
    reply
}

pub(crate) fn mkcol(tree: &mut FileTree, target: &str) -> Reply {
    let id = tree.create_dir(target);
    let mut reply = Reply::with_status(201);
    reply.set_header("OC-FileId", &tree.node(id).file_id);
    reply
}

pub(crate) fn delete(tree: &mut FileTree, target: &str) -> Reply {
    tree.remove(target);
    Reply::with_status(204)
}

pub(crate) fn move_resource(tree: &mut FileTree, from: &str, to: &str) -> Reply {
    tree.rename(from, to);
    Reply::with_status(201)
}

fn resource_entry(root_path: &str, node: &FileNode) -> DavResponse {
    DavResponse {
        href: format!("{root_path}{}", node.path()),
        props: ResponseProps::Resource {
            collection: node.is_dir,
            last_modified: httpdate::fmt_http_date(node.last_modified.into()),
            content_length: node.size,
            etag: node.etag.clone(),
            permissions: permissions_for(node),
            file_id: node.file_id.clone(),
        },
        status: STATUS_LINE_OK.to_string(),
    }
}

fn permissions_for(node: &FileNode) -> String {
    if node.is_shared { "SRDNVCKW" } else { "RDNVCKW" }.to_string()
}
