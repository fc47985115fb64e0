//! Thin HTTP/1.1 service adapter over [`RegistryStore`]: a hand-rolled
//! request reader and a tiny multipart/form-data splitter, in the same
//! style as this crate's existing JSON-RPC facade. Routing and wire
//! concerns live entirely here; business logic never leaves the store.

use crate::qlog;
use crate::registry::RegistryStore;
use serde_json::json;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time;

const MAX_HEADER_BYTES: usize = 32 * 1024;
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BYTES_PER_FILE: usize = 10 * 1024 * 1024;
const MIN_BYTES_PER_FILE: usize = 1024;
const MAX_BYTES_PER_FILE: usize = 100 * 1024 * 1024;

struct HttpRequest {
    method: String,
    path: String,
    query: String,
    headers: std::collections::HashMap<String, String>,
    body: Vec<u8>,
}

/// Runs the service adapter, binding `listen_addr` and serving requests
/// until the process is terminated.
pub async fn run_server(store: Arc<RegistryStore>, listen_addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    let ingress = Arc::new(Semaphore::new(store.config().max_concurrent_inhales.max(1)));
    qlog!("SIGILS", "LISTEN", "addr" => listen_addr);
    loop {
        let (mut stream, _) = listener.accept().await?;
        let store = Arc::clone(&store);
        let ingress = Arc::clone(&ingress);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(&mut stream, &store, &ingress).await {
                qlog!("SIGILS", "CONN_ERROR", "err" => err);
            }
        });
    }
}

async fn handle_connection(
    stream: &mut TcpStream,
    store: &Arc<RegistryStore>,
    ingress: &Arc<Semaphore>,
) -> io::Result<()> {
    let req = match read_http_request(stream, MAX_HEADER_BYTES, MAX_BODY_BYTES, REQUEST_TIMEOUT).await {
        Ok(req) => req,
        Err(err) => {
            return respond(stream, "400 Bad Request", &json_error(&err.to_string()), &[]).await;
        }
    };

    let route = format!("{} {}", req.method, req.path);
    let result = dispatch(&req, store, ingress).await;
    qlog!("SIGILS", "REQUEST", "route" => route, "status" => result.0);
    respond(stream, result.0, &result.1, &result.2).await
}

/// `(status, body, extra_headers)`.
type Response = (&'static str, String, Vec<(&'static str, String)>);

async fn dispatch(req: &HttpRequest, store: &Arc<RegistryStore>, ingress: &Arc<Semaphore>) -> Response {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/sigils/healthz") => (
            "200 OK",
            json!({"status": "ok", "service": "kaid"}).to_string(),
            vec![],
        ),
        ("POST", "/sigils/inhale") => handle_inhale(req, store, ingress).await,
        ("GET", "/sigils/seal") => handle_seal(req, store),
        ("GET", "/sigils/state") => handle_state(req, store),
        ("GET", "/sigils/urls") => handle_urls(req, store),
        ("GET", "/sigils/exhale") => handle_exhale(req, store),
        _ => ("404 Not Found", json_error("not found"), vec![]),
    }
}

fn etag_response(etag: &str, body: String, if_none_match: Option<&str>) -> Response {
    if if_none_match == Some(etag) {
        return ("304 Not Modified", String::new(), vec![("ETag", format!("\"{etag}\""))]);
    }
    (
        "200 OK",
        body,
        vec![
            ("ETag", format!("\"{etag}\"")),
            (
                "Cache-Control",
                "private, max-age=0, must-revalidate".to_string(),
            ),
        ],
    )
}

fn handle_seal(req: &HttpRequest, store: &Arc<RegistryStore>) -> Response {
    let seal = store.get_seal();
    let inm = req.headers.get("if-none-match").map(|v| v.trim_matches('"'));
    etag_response(&seal, json!({"seal": seal}).to_string(), inm)
}

fn handle_state(req: &HttpRequest, store: &Arc<RegistryStore>) -> Response {
    let state = store.get_state();
    let inm = req.headers.get("if-none-match").map(|v| v.trim_matches('"'));
    let body = serde_json::to_string(&state).unwrap_or_else(|_| "{}".to_string());
    etag_response(&state.state_seal, body, inm)
}

fn handle_urls(req: &HttpRequest, store: &Arc<RegistryStore>) -> Response {
    let params = crate::extract::parse_params(req.query.trim_start_matches('?'));
    let offset: usize = params
        .iter()
        .find(|(k, _)| k == "offset")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    let limit: usize = params
        .iter()
        .find(|(k, _)| k == "limit")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(100);
    let (page, total) = store.exhale_urls_page(offset, limit);
    let seal = store.get_seal();
    let body = json!({"urls": page, "total": total, "seal": seal}).to_string();
    if offset == 0 {
        let inm = req.headers.get("if-none-match").map(|v| v.trim_matches('"'));
        etag_response(&seal, body, inm)
    } else {
        ("200 OK", body, vec![])
    }
}

fn handle_exhale(req: &HttpRequest, store: &Arc<RegistryStore>) -> Response {
    let params = crate::extract::parse_params(req.query.trim_start_matches('?'));
    let mode = params
        .iter()
        .find(|(k, _)| k == "mode")
        .map(|(_, v)| v.as_str())
        .unwrap_or("urls");
    match mode {
        "state" => {
            let state = store.get_state();
            (
                "200 OK",
                serde_json::to_string(&state).unwrap_or_else(|_| "{}".to_string()),
                vec![],
            )
        }
        _ => {
            let urls = store.exhale_urls();
            ("200 OK", json!({"urls": urls}).to_string(), vec![])
        }
    }
}

async fn handle_inhale(req: &HttpRequest, store: &Arc<RegistryStore>, ingress: &Arc<Semaphore>) -> Response {
    let _permit = match ingress.clone().try_acquire_owned() {
        Ok(p) => p,
        Err(_) => return ("429 Too Many Requests", json_error("too many concurrent inhales"), vec![]),
    };

    let params = crate::extract::parse_params(req.query.trim_start_matches('?'));
    let max_bytes_per_file: usize = params
        .iter()
        .find(|(k, _)| k == "max_bytes_per_file")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_BYTES_PER_FILE)
        .clamp(MIN_BYTES_PER_FILE, MAX_BYTES_PER_FILE);

    let boundary = match req
        .headers
        .get("content-type")
        .and_then(|ct| multipart_boundary(ct))
    {
        Some(b) => b,
        None => return ("400 Bad Request", json_error("missing multipart boundary"), vec![]),
    };

    let mut errors = Vec::new();
    let parts = parse_multipart(&req.body, &boundary);
    let mut files = Vec::with_capacity(parts.len());
    for part in parts {
        if part.bytes.is_empty() {
            errors.push(format!("{}: empty file, skipped", part.filename));
            continue;
        }
        if part.bytes.len() > max_bytes_per_file {
            errors.push(format!(
                "{}: exceeds max_bytes_per_file ({} > {})",
                part.filename,
                part.bytes.len(),
                max_bytes_per_file
            ));
            continue;
        }
        files.push((part.filename, part.bytes));
    }

    if files.is_empty() {
        errors.push("no files accepted: nothing to inhale".to_string());
        return (
            "400 Bad Request",
            json!({"status": "error", "errors": errors}).to_string(),
            vec![],
        );
    }

    let mut report = store.inhale(&files);
    report.errors.extend(errors);

    let mut body = serde_json::to_value(&report).unwrap_or_else(|_| json!({}));
    body["status"] = json!("ok");
    if report.registry_urls <= store.config().max_inline_urls {
        body["urls"] = json!(store.exhale_urls());
    } else {
        report
            .errors
            .push("urls omitted: registry_urls exceeds KAI_MAX_INLINE_URLS".to_string());
    }
    if report.registry_urls <= store.config().max_inline_state_urls {
        body["state"] = serde_json::to_value(store.get_state()).unwrap_or_else(|_| json!({}));
    } else {
        report
            .errors
            .push("state omitted: registry_urls exceeds KAI_MAX_INLINE_STATE_URLS".to_string());
    }
    body["errors"] = json!(report.errors);

    ("200 OK", body.to_string(), vec![])
}

struct MultipartFile {
    filename: String,
    bytes: Vec<u8>,
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
}

/// Splits a multipart/form-data body into `(filename, bytes)` parts.
/// Accepts any field name that carries a filename; parts without one are
/// skipped (they carry form fields this adapter does not use).
fn parse_multipart(body: &[u8], boundary: &str) -> Vec<MultipartFile> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut files = Vec::new();
    let mut rest = body;

    loop {
        let start = match find(rest, &delimiter) {
            Some(i) => i + delimiter.len(),
            None => break,
        };
        rest = &rest[start..];
        if rest.starts_with(b"--") {
            break;
        }
        let header_end = match find(rest, b"\r\n\r\n") {
            Some(i) => i,
            None => break,
        };
        let header_text = String::from_utf8_lossy(&rest[..header_end]);
        let body_start = header_end + 4;
        let next_delim = find(&rest[body_start..], &delimiter).unwrap_or(rest.len() - body_start);
        let mut part_body = &rest[body_start..body_start + next_delim];
        // multipart parts are terminated by \r\n before the next boundary.
        if part_body.ends_with(b"\r\n") {
            part_body = &part_body[..part_body.len() - 2];
        }

        if let Some(filename) = parse_filename(&header_text) {
            files.push(MultipartFile {
                filename,
                bytes: part_body.to_vec(),
            });
        }

        rest = &rest[body_start + next_delim..];
    }

    files
}

fn parse_filename(header_text: &str) -> Option<String> {
    for line in header_text.split("\r\n") {
        if !line.to_ascii_lowercase().starts_with("content-disposition:") {
            continue;
        }
        for segment in line.split(';') {
            let segment = segment.trim();
            if let Some(v) = segment.strip_prefix("filename=") {
                return Some(v.trim_matches('"').to_string());
            }
        }
        return Some("upload".to_string());
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn json_error(message: &str) -> String {
    json!({"error": message}).to_string()
}

async fn respond(
    stream: &mut TcpStream,
    status: &str,
    body: &str,
    extra_headers: &[(&'static str, String)],
) -> io::Result<()> {
    let mut header_lines = String::new();
    for (name, value) in extra_headers {
        header_lines.push_str(&format!("{name}: {value}\r\n"));
    }
    let resp = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: application/json\r\n\
         {header_lines}\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(resp.as_bytes()).await?;
    stream.shutdown().await
}

async fn read_http_request(
    stream: &mut TcpStream,
    max_header_bytes: usize,
    max_body_bytes: usize,
    timeout: Duration,
) -> io::Result<HttpRequest> {
    let mut buf = Vec::new();
    let mut header_end = None;
    loop {
        let mut tmp = [0u8; 8192];
        let n = time::timeout(timeout, stream.read(&mut tmp))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timeout"))??;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.len() > max_header_bytes && header_end.is_none() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "header too large"));
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            header_end = Some(pos + 4);
            break;
        }
    }

    let end = header_end
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "malformed request"))?;
    let header_str = std::str::from_utf8(&buf[..end])
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid header"))?;
    let mut lines = header_str.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing request line"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let raw_target = parts.next().unwrap_or("").to_string();
    let (path, query) = match raw_target.split_once('?') {
        Some((p, q)) => (p.to_string(), format!("?{q}")),
        None => (raw_target, String::new()),
    };

    let mut headers = std::collections::HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_len: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_len > max_body_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "content-length exceeds limit",
        ));
    }

    let mut body = if end < buf.len() { buf[end..].to_vec() } else { Vec::new() };
    while body.len() < content_len {
        let remaining = content_len - body.len();
        let mut tmp = vec![0u8; remaining.min(64 * 1024)];
        let n = time::timeout(timeout, stream.read(&mut tmp))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timeout"))??;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&tmp[..n]);
    }
    if body.len() < content_len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete request body",
        ));
    }

    Ok(HttpRequest {
        method,
        path,
        query,
        headers,
        body,
    })
}
