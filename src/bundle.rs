//! Parser and handler for the proprietary multipart "bundle upload": a batch
//! of PUT operations packed into a single POST body.

use crate::handlers::STATUS_LINE_OK;
use crate::response::{DavResponse, ErrorDocument, Multistatus, Reply, ResponseProps};
use crate::tree::{FileNode, FileTree};

/// Requests issued under this principal are rejected wholesale with a 403
/// error document instead of a per-part multistatus.
pub(crate) const RESERVED_ERROR_PRINCIPAL: &str = "erroruser";

const SECTION_END: &[u8] = b"\r\n\r\n";
const HEADER_END: &[u8] = b"\r\n";
const METHOD_HEADER: &[u8] = b"X-OC-Method: ";
const PATH_HEADER: &[u8] = b"X-OC-Path: ";
const LENGTH_HEADER: &[u8] = b"Content-Length: ";

/// One decoded bundle part: where to write, how many bytes, and the fill
/// byte standing in for the part's entire content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePart {
    pub path: String,
    pub size: u64,
    pub content_char: u8,
}

/// Decodes a bundle body into its parts. Each part is a header block
/// (`X-OC-Method`, `X-OC-Path`, `Content-Length`) terminated by a blank
/// line, followed by the part body whose first byte is taken as the fill
/// byte. Parsing stops at the first point where no further header/body
/// delimiter exists; a delimited block with missing or non-PUT headers is a
/// caller bug.
pub fn parse_bundle(payload: &[u8]) -> Vec<BundlePart> {
    let mut parts = Vec::new();
    let mut cursor = 0;
    while let Some(delimiter) = find(payload, SECTION_END, cursor) {
        let headers = &payload[cursor..delimiter];
        let Some(method) = header_value(headers, METHOD_HEADER) else {
            panic!("bundle part is missing the X-OC-Method header");
        };
        assert_eq!(method, "PUT", "bundle parts must carry the PUT method");
        let Some(raw_path) = header_value(headers, PATH_HEADER) else {
            panic!("bundle part is missing the X-OC-Path header");
        };
        let Some(raw_length) = header_value(headers, LENGTH_HEADER) else {
            panic!("bundle part is missing the Content-Length header");
        };
        let Ok(size) = raw_length.trim().parse::<u64>() else {
            panic!("bundle Content-Length {raw_length:?} is not a number");
        };
        let body = delimiter + SECTION_END.len();
        assert!(body < payload.len(), "bundle part body must not be empty");
        parts.push(BundlePart {
            path: raw_path.trim_start_matches('/').to_string(),
            size,
            content_char: payload[body],
        });
        cursor = body + (size as usize).max(1);
    }
    parts
}

/// Applies every part to the tree and reports one multistatus entry per
/// part. Parts whose path carries a reserved error suffix still mutate the
/// tree but yield the matching error entry.
pub(crate) fn bundle_post(tree: &mut FileTree, bundle_href: &str, payload: &[u8]) -> Reply {
    let mut responses = Vec::new();
    for part in parse_bundle(payload) {
        let id = tree.upsert_file(&part.path, part.size, part.content_char);
        responses.push(entry_for(bundle_href, &part.path, tree.node(id)));
    }
    Reply::multistatus(&Multistatus { responses })
}

pub(crate) fn forbidden() -> Reply {
    let message = "URL endpoint has to be instance of \\OCA\\DAV\\Files\\FilesHome";
    let document = ErrorDocument {
        exception: "OCA\\DAV\\Connector\\Sabre\\Exception\\Forbidden".to_string(),
        message: message.to_string(),
        retry: false,
        reason: message.to_string(),
    };
    Reply::error_document(403, &document)
}

fn entry_for(bundle_href: &str, path: &str, node: &FileNode) -> DavResponse {
    let oc_path = format!("/{}", node.path());
    if path.ends_with("normalerrorfile") {
        error_entry(
            bundle_href,
            oc_path,
            "Sabre\\DAV\\Exception\\BadRequest",
            "Method not allowed - file exists - update of the file is not supported!",
            "HTTP/1.1 400 Bad Request",
        )
    } else if path.ends_with("fatalerrorfile") {
        error_entry(
            bundle_href,
            oc_path,
            "Sabre\\DAV\\Exception\\ServiceUnavailable",
            "Failed to check file size",
            "HTTP/1.1 503 Service Unavailable",
        )
    } else if path.ends_with("softerrorfile") {
        error_entry(
            bundle_href,
            oc_path,
            "OCA\\DAV\\Connector\\Sabre\\Exception\\FileLocked",
            "Target file is locked by another process.",
            "HTTP/1.1 423 Locked (WebDAV; RFC 4918)",
        )
    } else {
        DavResponse {
            href: bundle_href.to_string(),
            props: ResponseProps::BundleSuccess {
                etag: node.etag.clone(),
                file_id: node.file_id.clone(),
                path: oc_path,
            },
            status: STATUS_LINE_OK.to_string(),
        }
    }
}

fn error_entry(
    bundle_href: &str,
    oc_path: String,
    exception: &str,
    message: &str,
    status: &str,
) -> DavResponse {
    DavResponse {
        href: bundle_href.to_string(),
        props: ResponseProps::BundleError {
            exception: exception.to_string(),
            message: message.to_string(),
            path: oc_path,
        },
        status: status.to_string(),
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| from + position)
}

fn header_value<'a>(headers: &'a [u8], name: &[u8]) -> Option<&'a str> {
    let start = find(headers, name, 0)? + name.len();
    let end = find(headers, HEADER_END, start).unwrap_or(headers.len());
    std::str::from_utf8(&headers[start..end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part_bytes(path: &str, fill: u8, size: usize) -> Vec<u8> {
        let mut part = format!(
            "X-OC-Method: PUT\r\nX-OC-Path: /{path}\r\nContent-Length: {size}\r\n\r\n"
        )
        .into_bytes();
        part.extend(std::iter::repeat_n(fill, size));
        part.extend_from_slice(b"\r\n");
        part
    }

    #[test]
    fn parses_each_part_into_a_triple() {
        let mut payload = part_bytes("A/one", b'X', 4);
        payload.extend(part_bytes("B/two", b'Y', 7));

        let parts = parse_bundle(&payload);

        assert_eq!(
            parts,
            vec![
                BundlePart {
                    path: "A/one".to_string(),
                    size: 4,
                    content_char: b'X',
                },
                BundlePart {
                    path: "B/two".to_string(),
                    size: 7,
                    content_char: b'Y',
                },
            ]
        );
    }

    #[test]
    fn stops_when_no_delimiter_remains() {
        let mut payload = part_bytes("A/one", b'X', 4);
        payload.extend_from_slice(b"trailing garbage without a blank line");
        assert_eq!(parse_bundle(&payload).len(), 1);

        assert!(parse_bundle(b"").is_empty());
        assert!(parse_bundle(b"X-OC-Method: PUT\r\n").is_empty());
    }

    #[test]
    #[should_panic(expected = "PUT method")]
    fn non_put_method_panics() {
        let payload = b"X-OC-Method: GET\r\nX-OC-Path: /a\r\nContent-Length: 1\r\n\r\nW";
        parse_bundle(payload);
    }

    #[test]
    fn forbidden_reply_is_a_403_error_document() {
        let reply = forbidden();
        assert_eq!(reply.status, 403);
        let body = reply.text().into_owned();
        assert!(body.contains("<d:error"));
        assert!(body.contains("Forbidden"));
        assert!(body.contains("<oc:retry>false</oc:retry>"));
    }
}
