use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::config::SyncCredentials;

/// WebDAV client for sync operations.
///
/// Every method resolves the server's response into a typed result at
/// this boundary; nothing above it ever inspects a raw HTTP response.
#[derive(Debug)]
pub struct WebDAVClient {
    client: Client,
    base_url: String,
    credentials: SyncCredentials,
}

#[derive(Error, Debug)]
pub enum WebDAVError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication failed")]
    AuthFailed,
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("remote changed during sync: {0}")]
    PreconditionFailed(String),
    #[error("server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl WebDAVError {
    /// HTTP status behind this error, when one exists
    pub fn status(&self) -> Option<u16> {
        match self {
            WebDAVError::AuthFailed => Some(401),
            WebDAVError::NotFound(_) => Some(404),
            WebDAVError::PreconditionFailed(_) => Some(412),
            WebDAVError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a retry can plausibly help. Client errors other than
    /// timeouts and rate limits are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            WebDAVError::Http(err) => err.is_timeout() || err.is_connect(),
            WebDAVError::Server { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            _ => false,
        }
    }

    /// Whether the server rejected the request outright (any 4xx).
    /// Used to detect "deep listing unsupported" without retrying.
    pub fn is_client_rejection(&self) -> bool {
        matches!(self.status(), Some(status) if (400..500).contains(&status))
    }
}

/// PROPFIND depth header value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    fn header_value(self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        }
    }
}

/// Response from a HEAD operation
#[derive(Debug)]
pub struct HeadResponse {
    pub etag: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
    pub exists: bool,
}

/// Response from a PUT operation
#[derive(Debug)]
pub struct PutResponse {
    pub etag: Option<String>,
}

/// File/directory info from PROPFIND
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Server path with the base-URL prefix stripped, no surrounding slashes
    pub path: String,
    pub is_collection: bool,
    pub etag: Option<String>,
    /// Raw `getlastmodified` value (RFC 2822)
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
}

impl WebDAVClient {
    /// Create a new WebDAV client with the given request timeout
    pub fn new(
        base_url: String,
        credentials: SyncCredentials,
        timeout: Duration,
    ) -> Result<Self, WebDAVError> {
        // Normalize URL - ensure no trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(WebDAVError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// Build full URL for a path
    fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// PROPFIND - list a directory or the whole subtree
    pub async fn propfind(&self, path: &str, depth: Depth) -> Result<Vec<ResourceInfo>, WebDAVError> {
        let url = self.url(path);

        let response = self
            .client
            .request(Method::from_bytes(b"PROPFIND").unwrap(), &url)
            .header("Depth", depth.header_value())
            .header("Content-Type", "application/xml")
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .body(PROPFIND_BODY)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(WebDAVError::AuthFailed);
            }
            StatusCode::NOT_FOUND => {
                return Err(WebDAVError::NotFound(path.to_string()));
            }
            status if !status.is_success() && status != StatusCode::MULTI_STATUS => {
                return Err(WebDAVError::Server {
                    status: status.as_u16(),
                    message: response.text().await.unwrap_or_default(),
                });
            }
            _ => {}
        }

        let xml = response.text().await?;
        Ok(parse_propfind_response(&xml, &self.base_url))
    }

    /// GET - download file contents, capturing the ETag
    pub async fn get(&self, path: &str) -> Result<(Vec<u8>, Option<String>), WebDAVError> {
        let url = self.url(path);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(WebDAVError::AuthFailed);
            }
            StatusCode::NOT_FOUND => {
                return Err(WebDAVError::NotFound(path.to_string()));
            }
            status if !status.is_success() => {
                return Err(WebDAVError::Server {
                    status: status.as_u16(),
                    message: response.text().await.unwrap_or_default(),
                });
            }
            _ => {}
        }

        let etag = header_etag(&response);
        let data = response.bytes().await?.to_vec();
        Ok((data, etag))
    }

    /// HEAD - check existence and fetch metadata without a download
    pub async fn head(&self, path: &str) -> Result<HeadResponse, WebDAVError> {
        let url = self.url(path);

        let response = self
            .client
            .head(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(WebDAVError::AuthFailed);
            }
            StatusCode::NOT_FOUND => {
                return Ok(HeadResponse {
                    etag: None,
                    content_length: None,
                    last_modified: None,
                    exists: false,
                });
            }
            status if !status.is_success() => {
                return Err(WebDAVError::Server {
                    status: status.as_u16(),
                    message: String::new(),
                });
            }
            _ => {}
        }

        let etag = header_etag(&response);
        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        let last_modified = response
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| chrono::DateTime::parse_from_rfc2822(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));

        Ok(HeadResponse {
            etag,
            content_length,
            last_modified,
            exists: true,
        })
    }

    /// PUT - upload file contents with optional `If-Match` locking
    pub async fn put(
        &self,
        path: &str,
        data: &[u8],
        if_match: Option<&str>,
    ) -> Result<PutResponse, WebDAVError> {
        let url = self.url(path);

        let mut request = self
            .client
            .put(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .body(data.to_vec());

        if let Some(etag) = if_match {
            request = request.header("If-Match", format!("\"{}\"", etag));
        }

        let response = request.send().await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT | StatusCode::OK => Ok(PutResponse {
                etag: header_etag(&response),
            }),
            StatusCode::PRECONDITION_FAILED => {
                Err(WebDAVError::PreconditionFailed(path.to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(WebDAVError::AuthFailed),
            status => Err(WebDAVError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// MKCOL - create a directory. An existing directory is not an error.
    pub async fn mkcol(&self, path: &str) -> Result<(), WebDAVError> {
        let url = self.url(path);

        let response = self
            .client
            .request(Method::from_bytes(b"MKCOL").unwrap(), &url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(WebDAVError::AuthFailed),
            status => Err(WebDAVError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Create directory structure recursively
    pub async fn mkdir_p(&self, path: &str) -> Result<(), WebDAVError> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        let mut current_path = String::new();

        for part in parts {
            if part.is_empty() {
                continue;
            }
            current_path = if current_path.is_empty() {
                part.to_string()
            } else {
                format!("{}/{}", current_path, part)
            };

            // Try to create, ignore if already exists
            let _ = self.mkcol(&current_path).await;
        }

        Ok(())
    }

    /// DELETE - remove file or directory. A missing resource is not an error.
    pub async fn delete(&self, path: &str) -> Result<(), WebDAVError> {
        let url = self.url(path);

        let response = self
            .client
            .delete(&url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(WebDAVError::AuthFailed),
            status => Err(WebDAVError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// MOVE - rename a resource on the server
    pub async fn move_to(&self, from: &str, to: &str) -> Result<(), WebDAVError> {
        let url = self.url(from);
        let destination = self.url(to);

        let response = self
            .client
            .request(Method::from_bytes(b"MOVE").unwrap(), &url)
            .header("Destination", destination)
            .header("Overwrite", "T")
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(WebDAVError::NotFound(from.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(WebDAVError::AuthFailed),
            status => Err(WebDAVError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

fn header_etag(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_string())
}

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:getlastmodified/>
    <D:getetag/>
    <D:getcontentlength/>
    <D:resourcetype/>
  </D:prop>
</D:propfind>"#;

/// Parse a PROPFIND multistatus body.
///
/// The body is split per `<response>` element so both pretty-printed and
/// single-line server output parse the same way; within each element the
/// interesting properties are extracted by tag name (`D:`/`d:` prefixes).
fn parse_propfind_response(xml: &str, base_url: &str) -> Vec<ResourceInfo> {
    let mut resources = Vec::new();
    let mut rest = xml;

    loop {
        let Some(start) = find_tag(rest, &["<D:response>", "<d:response>"]) else {
            break;
        };
        let after = &rest[start..];
        let Some((end, close_len)) = find_close(after, &["</D:response>", "</d:response>"]) else {
            break;
        };
        let segment = &after[..end];
        rest = &after[end + close_len..];

        let Some(href) = extract_tag(segment, "href") else {
            continue;
        };
        let had_trailing_slash = href.ends_with('/');
        let path = strip_base(href, base_url);
        let path = path.trim_matches('/');
        let path = urlencoding::decode(path)
            .unwrap_or_else(|_| path.into())
            .to_string();

        let etag = extract_tag(segment, "getetag").map(|v| v.trim_matches('"').to_string());
        let last_modified = extract_tag(segment, "getlastmodified").map(str::to_string);
        let content_length = extract_tag(segment, "getcontentlength").and_then(|v| v.parse().ok());

        // A resourcetype collection marker decides directory-ness; a
        // trailing slash on the href is the fallback when it's absent.
        let is_collection = segment.contains("<D:collection")
            || segment.contains("<d:collection")
            || had_trailing_slash;

        resources.push(ResourceInfo {
            path,
            is_collection,
            etag,
            last_modified,
            content_length,
        });
    }

    log::debug!(
        "parse_propfind: parsed {} resources from response",
        resources.len()
    );

    resources
}

fn find_tag(haystack: &str, needles: &[&str]) -> Option<usize> {
    needles.iter().filter_map(|n| haystack.find(n)).min()
}

fn find_close(haystack: &str, needles: &[&str]) -> Option<(usize, usize)> {
    needles
        .iter()
        .filter_map(|n| haystack.find(n).map(|pos| (pos, n.len())))
        .min()
}

fn extract_tag<'a>(segment: &'a str, tag: &str) -> Option<&'a str> {
    for prefix in ["D", "d"] {
        let open = format!("<{prefix}:{tag}>");
        let close = format!("</{prefix}:{tag}>");
        if let Some(start) = segment.find(&open) {
            let rest = &segment[start + open.len()..];
            if let Some(end) = rest.find(&close) {
                return Some(&rest[..end]);
            }
        }
    }
    None
}

/// Remove the base URL (or its path component) from an href. Servers
/// differ on whether hrefs are absolute URLs or absolute paths.
fn strip_base<'a>(href: &'a str, base_url: &str) -> &'a str {
    if let Some(stripped) = href.strip_prefix(base_url) {
        return stripped;
    }
    if let Some(scheme_end) = base_url.find("://") {
        let after_scheme = &base_url[scheme_end + 3..];
        let base_path = after_scheme
            .find('/')
            .map(|i| &after_scheme[i..])
            .unwrap_or("");
        let base_path = base_path.trim_end_matches('/');
        if !base_path.is_empty() {
            if let Some(stripped) = href.strip_prefix(base_path) {
                return stripped;
            }
        }
    }
    href
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> SyncCredentials {
        SyncCredentials {
            username: "user".to_string(),
            password: "secret".to_string(),
        }
    }

    fn make_client(server: &MockServer) -> WebDAVClient {
        WebDAVClient::new(server.uri(), credentials(), Duration::from_secs(5)).unwrap()
    }

    const MULTISTATUS: &str = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/library/</D:href>
    <D:propstat><D:prop>
      <D:resourcetype><D:collection/></D:resourcetype>
      <D:getlastmodified>Mon, 06 Jul 2026 10:00:00 GMT</D:getlastmodified>
    </D:prop></D:propstat>
  </D:response>
  <D:response>
    <D:href>/library/notes%20and%20ideas.md</D:href>
    <D:propstat><D:prop>
      <D:resourcetype/>
      <D:getetag>"abc123"</D:getetag>
      <D:getcontentlength>42</D:getcontentlength>
      <D:getlastmodified>Mon, 06 Jul 2026 11:00:00 GMT</D:getlastmodified>
    </D:prop></D:propstat>
  </D:response>
</D:multistatus>"#;

    #[tokio::test]
    async fn test_propfind_parses_files_and_collections() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/library"))
            .and(header("Depth", "1"))
            .respond_with(ResponseTemplate::new(207).set_body_string(MULTISTATUS))
            .mount(&server)
            .await;

        let client = make_client(&server);
        let entries = client.propfind("library", Depth::One).await.unwrap();
        assert_eq!(entries.len(), 2);

        assert!(entries[0].is_collection);
        assert_eq!(entries[0].path, "library");

        assert!(!entries[1].is_collection);
        assert_eq!(entries[1].path, "library/notes and ideas.md");
        assert_eq!(entries[1].etag.as_deref(), Some("abc123"));
        assert_eq!(entries[1].content_length, Some(42));
    }

    #[tokio::test]
    async fn test_propfind_parses_single_line_body() {
        let server = MockServer::start().await;
        let flat = MULTISTATUS.replace('\n', "");
        Mock::given(method("PROPFIND"))
            .respond_with(ResponseTemplate::new(207).set_body_string(flat))
            .mount(&server)
            .await;

        let client = make_client(&server);
        let entries = client.propfind("library", Depth::One).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_put_returns_etag() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/library/a.md"))
            .respond_with(ResponseTemplate::new(201).insert_header("etag", "\"tag-9\""))
            .mount(&server)
            .await;

        let client = make_client(&server);
        let put = client.put("library/a.md", b"alpha", None).await.unwrap();
        assert_eq!(put.etag.as_deref(), Some("tag-9"));
    }

    #[tokio::test]
    async fn test_put_precondition_failure() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;

        let client = make_client(&server);
        let err = client
            .put("library/a.md", b"alpha", Some("stale"))
            .await
            .unwrap_err();
        assert!(matches!(err, WebDAVError::PreconditionFailed(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_move_sends_destination_header() {
        let server = MockServer::start().await;
        let destination = format!("{}/library/new.md", server.uri());
        Mock::given(method("MOVE"))
            .and(path("/library/old.md"))
            .and(header("Destination", destination.as_str()))
            .and(header("Overwrite", "T"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_client(&server);
        client.move_to("library/old.md", "library/new.md").await.unwrap();
    }

    #[tokio::test]
    async fn test_mkcol_tolerates_existing_directory() {
        let server = MockServer::start().await;
        Mock::given(method("MKCOL"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;

        let client = make_client(&server);
        client.mkcol("library").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_resource() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = make_client(&server);
        client.delete("library/gone.md").await.unwrap();
    }

    #[test]
    fn test_error_classification() {
        let forbidden = WebDAVError::Server {
            status: 403,
            message: String::new(),
        };
        assert!(!forbidden.is_retryable());
        assert!(forbidden.is_client_rejection());

        let unavailable = WebDAVError::Server {
            status: 503,
            message: String::new(),
        };
        assert!(unavailable.is_retryable());
        assert!(!unavailable.is_client_rejection());

        assert!(WebDAVError::AuthFailed.is_client_rejection());
        assert!(WebDAVError::NotFound("x".into()).is_client_rejection());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = WebDAVClient::new(
            "ftp://example.com".to_string(),
            credentials(),
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, WebDAVError::InvalidUrl(_)));
    }
}
