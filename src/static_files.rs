use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use http::StatusCode;
use log::{error, info, warn};

use crate::http::{format_http_date, parse_http_date, Request, Response, SERVER_NAME};

const INDEX_FILE: &str = "index.html";

/// Extension-to-content-type table fixed at startup. The four pinned
/// entries carry an explicit charset; everything else goes through
/// `mime_guess`.
pub struct MimeRegistry {
    pinned: HashMap<&'static str, &'static str>,
}

impl MimeRegistry {
    pub fn new() -> Self {
        let pinned = HashMap::from([
            ("js", "application/javascript; charset=utf-8"),
            ("json", "application/json; charset=utf-8"),
            ("css", "text/css; charset=utf-8"),
            ("html", "text/html; charset=utf-8"),
        ]);
        Self { pinned }
    }

    pub fn content_type(&self, path: &Path) -> String {
        let ext = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);
        if let Some(ext) = ext.as_deref() {
            if let Some(pinned) = self.pinned.get(ext) {
                return (*pinned).to_string();
            }
        }
        mime_guess::from_path(path)
            .first_or(mime::APPLICATION_OCTET_STREAM)
            .to_string()
    }
}

/// File-serving scope: one canonical root directory plus the MIME table.
/// No request ever resolves to a path outside the root.
pub struct StaticFiles {
    root: PathBuf,
    mime: MimeRegistry,
}

enum ByteRange {
    Whole,
    Slice(u64, u64),
    Unsatisfiable,
}

impl StaticFiles {
    /// `root` must already be canonical (see `Config::resolve_root`).
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            mime: MimeRegistry::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn has_root_index(&self) -> bool {
        self.root.join(INDEX_FILE).is_file()
    }

    /// Landing page for `/` when the root carries no index file.
    pub fn placeholder(&self, base_url: &str) -> Response {
        let body = format!(
            "<h1>{}</h1><pre>Root: {}\nURL : {}/</pre>",
            SERVER_NAME,
            self.root.display(),
            base_url
        );
        Response::ok("text/html; charset=utf-8", body.into_bytes())
    }

    pub fn handle(&self, request: &Request) -> Response {
        match self.resolve(request.path()) {
            Ok(path) => self.file_response(&path, request),
            Err(response) => response,
        }
    }

    /// Map a URL path onto a file under the root. Traversal protection:
    /// `..` components are refused outright, and the canonicalized result
    /// must still live under the canonical root.
    fn resolve(&self, url_path: &str) -> Result<PathBuf, Response> {
        let decoded = match urlencoding::decode(url_path) {
            Ok(s) => s.into_owned(),
            Err(_) => return Err(Response::bad_request("Malformed percent-encoding in path.")),
        };
        if decoded.contains('\0') {
            return Err(Response::bad_request("Invalid path."));
        }

        let mut relative = PathBuf::new();
        for component in Path::new(decoded.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::ParentDir => {
                    warn!("Path traversal attempt: {}", url_path);
                    return Err(Response::forbidden());
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }

        let canonical = match self.root.join(relative).canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Not found: {}", decoded);
                return Err(Response::not_found());
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                warn!("Permission denied resolving: {}", decoded);
                return Err(Response::forbidden());
            }
            Err(e) => {
                error!("Failed to resolve {}: {}", decoded, e);
                return Err(Response::internal_server_error());
            }
        };

        if !canonical.starts_with(&self.root) {
            warn!(
                "Refusing path outside root: {} -> {}",
                url_path,
                canonical.display()
            );
            return Err(Response::forbidden());
        }

        if canonical.is_dir() {
            let index = canonical.join(INDEX_FILE);
            if index.is_file() {
                return Ok(index);
            }
            return Err(Response::forbidden());
        }

        Ok(canonical)
    }

    fn file_response(&self, path: &Path, request: &Request) -> Response {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) => return io_error_response(path, e),
        };
        let modified: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::from);

        // Conditional GET; mtimes compare at whole-second precision since
        // that is all an HTTP date carries.
        if let (Some(mtime), Some(header)) = (modified, request.header("if-modified-since")) {
            if let Some(since) = parse_http_date(header) {
                if mtime.timestamp() <= since.timestamp() {
                    let mut response = Response::not_modified();
                    response
                        .headers
                        .insert("Last-Modified".to_string(), format_http_date(mtime));
                    return response;
                }
            }
        }

        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => return io_error_response(path, e),
        };
        let total = bytes.len() as u64;
        let content_type = self.mime.content_type(path);

        let mut response = match byte_range(request.header("range"), total) {
            ByteRange::Whole => Response::ok(&content_type, bytes),
            ByteRange::Slice(start, end) => {
                let slice = bytes[start as usize..=end as usize].to_vec();
                let mut partial =
                    Response::new(StatusCode::PARTIAL_CONTENT, &content_type, slice);
                partial.headers.insert(
                    "Content-Range".to_string(),
                    format!("bytes {}-{}/{}", start, end, total),
                );
                partial
            }
            ByteRange::Unsatisfiable => Response::range_not_satisfiable(total),
        };

        if let Some(mtime) = modified {
            response
                .headers
                .insert("Last-Modified".to_string(), format_http_date(mtime));
        }
        response
            .headers
            .insert("Accept-Ranges".to_string(), "bytes".to_string());

        info!("Served {} ({} bytes)", path.display(), total);
        response
    }
}

fn io_error_response(path: &Path, e: std::io::Error) -> Response {
    match e.kind() {
        ErrorKind::NotFound => Response::not_found(),
        ErrorKind::PermissionDenied => {
            warn!("Permission denied: {}", path.display());
            Response::forbidden()
        }
        _ => {
            error!("Error reading {}: {}", path.display(), e);
            Response::internal_server_error()
        }
    }
}

/// Interpret a `Range` header against a body of `len` bytes. Only a single
/// `bytes=` range is honored; anything malformed (including multipart
/// ranges) falls back to the whole body, while a well-formed range that
/// cannot be satisfied yields `Unsatisfiable`.
fn byte_range(header: Option<&str>, len: u64) -> ByteRange {
    let Some(ranges) = header.and_then(|h| h.strip_prefix("bytes=")) else {
        return ByteRange::Whole;
    };
    if ranges.contains(',') {
        return ByteRange::Whole;
    }
    let Some((start, end)) = ranges.split_once('-') else {
        return ByteRange::Whole;
    };

    match (start.is_empty(), end.is_empty()) {
        // bytes=-n : final n bytes
        (true, false) => match end.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(n) => {
                if len == 0 {
                    ByteRange::Unsatisfiable
                } else {
                    ByteRange::Slice(len.saturating_sub(n), len - 1)
                }
            }
            Err(_) => ByteRange::Whole,
        },
        // bytes=a- : from a to the end
        (false, true) => match start.parse::<u64>() {
            Ok(a) if a < len => ByteRange::Slice(a, len - 1),
            Ok(_) => ByteRange::Unsatisfiable,
            Err(_) => ByteRange::Whole,
        },
        // bytes=a-b
        (false, false) => match (start.parse::<u64>(), end.parse::<u64>()) {
            (Ok(a), Ok(b)) if a <= b => {
                if a < len {
                    ByteRange::Slice(a, b.min(len - 1))
                } else {
                    ByteRange::Unsatisfiable
                }
            }
            _ => ByteRange::Whole,
        },
        (true, true) => ByteRange::Whole,
    }
}
