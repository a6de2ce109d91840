use serde::Serialize;

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";
const NAMESPACES: &str =
    " xmlns:d=\"DAV:\" xmlns:oc=\"http://owncloud.org/ns\" xmlns:s=\"http://sabredav.org/ns\"";

/// Root collection of per-resource response entries (207 Multi-Status body).
#[derive(Debug, Clone, Serialize)]
pub struct Multistatus {
    pub responses: Vec<DavResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DavResponse {
    pub href: String,
    pub props: ResponseProps,
    /// Per-entry status line, e.g. `"HTTP/1.1 200 OK"`.
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum ResponseProps {
    /// PROPFIND property block for one resource.
    Resource {
        collection: bool,
        last_modified: String,
        content_length: u64,
        etag: String,
        permissions: String,
        file_id: String,
    },
    /// Successful bundle part; the target path is repeated in the
    /// provider-specific `oc-path` field.
    BundleSuccess {
        etag: String,
        file_id: String,
        path: String,
    },
    /// Failed bundle part. The mutation was still applied; this only shapes
    /// the reported entry.
    BundleError {
        exception: String,
        message: String,
        path: String,
    },
}

/// Top-level error body used when an entire bundle request is rejected.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDocument {
    pub exception: String,
    pub message: String,
    pub retry: bool,
    pub reason: String,
}

impl Multistatus {
    pub fn to_xml(&self) -> String {
        let mut out = String::from(XML_DECLARATION);
        out.push_str("<d:multistatus");
        out.push_str(NAMESPACES);
        out.push('>');
        for response in &self.responses {
            write_response(&mut out, response);
        }
        out.push_str("</d:multistatus>");
        out
    }
}

impl ErrorDocument {
    pub fn to_xml(&self) -> String {
        let mut out = String::from(XML_DECLARATION);
        out.push_str("<d:error");
        out.push_str(NAMESPACES);
        out.push('>');
        text_element(&mut out, "s:exception", &self.exception);
        text_element(&mut out, "s:message", &self.message);
        text_element(&mut out, "oc:retry", if self.retry { "true" } else { "false" });
        text_element(&mut out, "oc:reason", &self.reason);
        out.push_str("</d:error>");
        out
    }
}

fn write_response(out: &mut String, response: &DavResponse) {
    out.push_str("<d:response>");
    text_element(out, "d:href", &response.href);
    out.push_str("<d:propstat><d:prop>");
    match &response.props {
        ResponseProps::Resource {
            collection,
            last_modified,
            content_length,
            etag,
            permissions,
            file_id,
        } => {
            if *collection {
                out.push_str("<d:resourcetype><d:collection/></d:resourcetype>");
            } else {
                out.push_str("<d:resourcetype/>");
            }
            text_element(out, "d:getlastmodified", last_modified);
            text_element(out, "d:getcontentlength", &content_length.to_string());
            text_element(out, "d:getetag", etag);
            text_element(out, "oc:permissions", permissions);
            text_element(out, "oc:id", file_id);
        }
        ResponseProps::BundleSuccess {
            etag,
            file_id,
            path,
        } => {
            text_element(out, "d:oc-etag", etag);
            text_element(out, "d:etag", etag);
            text_element(out, "d:oc-fileid", file_id);
            text_element(out, "d:x-oc-mtime", "accepted");
            text_element(out, "d:oc-path", path);
        }
        ResponseProps::BundleError {
            exception,
            message,
            path,
        } => {
            out.push_str("<d:error>");
            text_element(out, "s:exception", exception);
            text_element(out, "s:message", message);
            out.push_str("</d:error>");
            text_element(out, "d:oc-path", path);
        }
    }
    out.push_str("</d:prop>");
    text_element(out, "d:status", &response.status);
    out.push_str("</d:propstat></d:response>");
}

fn text_element(out: &mut String, name: &str, value: &str) {
    out.push('<');
    out.push_str(name);
    out.push('>');
    escape_into(out, value);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape_into(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

/// What the simulator hands back for one request: a status code, response
/// headers, and the raw body bytes.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub(crate) fn multistatus(document: &Multistatus) -> Self {
        Self::xml_body(207, document.to_xml())
    }

    pub(crate) fn error_document(status: u16, document: &ErrorDocument) -> Self {
        Self::xml_body(status, document.to_xml())
    }

    fn xml_body(status: u16, xml: String) -> Self {
        let mut reply = Self::with_status(status);
        reply.set_header("Content-Type", "application/xml; charset=utf-8");
        reply.set_body(xml.into_bytes());
        reply
    }

    pub(crate) fn set_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub(crate) fn set_body(&mut self, body: Vec<u8>) {
        self.set_header("Content-Length", &body.len().to_string());
        self.body = body;
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
