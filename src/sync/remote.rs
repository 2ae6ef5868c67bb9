//! Remote tree scanning.
//!
//! Two-tier strategy: one deep listing request for the whole subtree
//! where the server supports it, otherwise a breadth-first walk with
//! bounded fan-out. The walk records directory properties as hints but
//! never prunes on them, so renames and out-of-band deletions are always
//! observed.

use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use std::collections::{HashMap, HashSet};

use super::backoff::{with_retry, Backoff};
use super::metadata::DirRecord;
use super::scanner::{is_supported, FileEntry};
use super::webdav::{Depth, ResourceInfo, WebDAVClient, WebDAVError};

/// Concurrent directory listings during the fallback walk
const WALK_FAN_OUT: usize = 8;

/// Result of scanning the remote subtree
#[derive(Debug, Default)]
pub struct RemoteTree {
    pub files: HashMap<String, FileEntry>,
    pub dirs: HashMap<String, DirRecord>,
}

/// Scan the remote subtree rooted at `root`.
///
/// A 4xx on the deep listing means the server does not support it; the
/// scan falls back to the walk without retrying that request. Transient
/// failures on either tier go through the retry decorator.
pub async fn scan_remote(
    client: &WebDAVClient,
    root: &str,
    backoff: &Backoff,
) -> Result<RemoteTree, WebDAVError> {
    match with_retry(backoff, "deep listing", || {
        client.propfind(root, Depth::Infinity)
    })
    .await
    {
        Ok(entries) => {
            log::debug!("Remote scan: deep listing returned {} entries", entries.len());
            let mut tree = RemoteTree::default();
            for entry in entries {
                ingest(&mut tree, root, &entry);
            }
            Ok(tree)
        }
        Err(err) if err.is_client_rejection() => {
            log::info!(
                "Remote scan: deep listing rejected ({}), walking directories instead",
                err
            );
            walk_remote(client, root, backoff).await
        }
        Err(err) => Err(err),
    }
}

/// Breadth-first fallback walk, one `Depth: 1` listing per directory with
/// bounded concurrency per level.
async fn walk_remote(
    client: &WebDAVClient,
    root: &str,
    backoff: &Backoff,
) -> Result<RemoteTree, WebDAVError> {
    let mut tree = RemoteTree::default();
    let mut visited: HashSet<String> = HashSet::new();
    let mut level = vec![root.trim_matches('/').to_string()];

    while !level.is_empty() {
        let batch: Vec<String> = level
            .drain(..)
            .filter(|dir| visited.insert(dir.clone()))
            .collect();

        let listings: Vec<(String, Result<Vec<ResourceInfo>, WebDAVError>)> = stream::iter(batch)
            .map(|dir| async move {
                let listing = with_retry(backoff, "directory listing", || {
                    client.propfind(&dir, Depth::One)
                })
                .await;
                (dir, listing)
            })
            .buffer_unordered(WALK_FAN_OUT)
            .collect()
            .await;

        for (dir, listing) in listings {
            let entries = match listing {
                Ok(entries) => entries,
                Err(WebDAVError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            for entry in &entries {
                // Skip the listed directory itself
                if entry.path.trim_matches('/') == dir {
                    continue;
                }
                if ingest(&mut tree, root, entry) && entry.is_collection {
                    level.push(entry.path.trim_matches('/').to_string());
                }
            }
        }
    }

    Ok(tree)
}

/// Add one listing entry to the tree. Returns whether the entry belongs
/// to the subtree and passed the name filters (i.e. is worth descending
/// into when it is a directory).
fn ingest(tree: &mut RemoteTree, root: &str, entry: &ResourceInfo) -> bool {
    let Some(rel) = relative_key(root, &entry.path) else {
        return false;
    };
    if is_hidden_path(&rel) {
        return false;
    }

    if entry.is_collection {
        tree.dirs.insert(
            rel,
            DirRecord {
                mtime: parse_http_date(entry.last_modified.as_deref()),
                etag: entry.etag.clone(),
            },
        );
        return true;
    }

    let name = rel.rsplit('/').next().unwrap_or(&rel);
    if !is_supported(name) {
        return false;
    }

    tree.files.insert(
        rel.clone(),
        FileEntry {
            path: rel,
            mtime: parse_http_date(entry.last_modified.as_deref()),
            size: entry.content_length.unwrap_or(0),
            hash: None,
            etag: entry.etag.clone(),
        },
    );
    true
}

/// Normalize a server path to a forward-slash key relative to the remote
/// root. Returns `None` for the root itself and for paths outside it.
pub(crate) fn relative_key(root: &str, path: &str) -> Option<String> {
    let root = root.trim_matches('/');
    let path = path.trim_matches('/');
    if root.is_empty() {
        return if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        };
    }
    if path == root {
        return None;
    }
    path.strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
}

/// Server path for a profile-relative key
pub(crate) fn remote_path_for(root: &str, rel: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        rel.to_string()
    } else {
        format!("{root}/{rel}")
    }
}

fn is_hidden_path(rel: &str) -> bool {
    rel.split('/').any(|component| component.starts_with('.'))
}

fn parse_http_date(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::config::SyncCredentials;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_client(server: &MockServer) -> WebDAVClient {
        WebDAVClient::new(
            server.uri(),
            SyncCredentials {
                username: "user".to_string(),
                password: "secret".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn quick_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(2), false)
    }

    const DEEP_LISTING: &str = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/library/</D:href>
    <D:propstat><D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop></D:propstat>
  </D:response>
  <D:response>
    <D:href>/library/a.md</D:href>
    <D:propstat><D:prop>
      <D:resourcetype/>
      <D:getetag>"etag-a"</D:getetag>
      <D:getcontentlength>5</D:getcontentlength>
      <D:getlastmodified>Mon, 06 Jul 2026 11:00:00 GMT</D:getlastmodified>
    </D:prop></D:propstat>
  </D:response>
  <D:response>
    <D:href>/library/sub/</D:href>
    <D:propstat><D:prop>
      <D:resourcetype><D:collection/></D:resourcetype>
      <D:getetag>"etag-sub"</D:getetag>
    </D:prop></D:propstat>
  </D:response>
  <D:response>
    <D:href>/library/sub/b.md</D:href>
    <D:propstat><D:prop>
      <D:resourcetype/>
      <D:getetag>"etag-b"</D:getetag>
      <D:getcontentlength>4</D:getcontentlength>
    </D:prop></D:propstat>
  </D:response>
  <D:response>
    <D:href>/library/.trash/gone.md</D:href>
    <D:propstat><D:prop><D:resourcetype/></D:prop></D:propstat>
  </D:response>
  <D:response>
    <D:href>/library/image.png</D:href>
    <D:propstat><D:prop><D:resourcetype/></D:prop></D:propstat>
  </D:response>
</D:multistatus>"#;

    const ROOT_LISTING: &str = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/library/</D:href>
    <D:propstat><D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop></D:propstat>
  </D:response>
  <D:response>
    <D:href>/library/a.md</D:href>
    <D:propstat><D:prop>
      <D:resourcetype/>
      <D:getetag>"etag-a"</D:getetag>
      <D:getcontentlength>5</D:getcontentlength>
    </D:prop></D:propstat>
  </D:response>
  <D:response>
    <D:href>/library/sub/</D:href>
    <D:propstat><D:prop>
      <D:resourcetype><D:collection/></D:resourcetype>
      <D:getetag>"etag-sub"</D:getetag>
    </D:prop></D:propstat>
  </D:response>
</D:multistatus>"#;

    const SUB_LISTING: &str = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/library/sub/</D:href>
    <D:propstat><D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop></D:propstat>
  </D:response>
  <D:response>
    <D:href>/library/sub/b.md</D:href>
    <D:propstat><D:prop>
      <D:resourcetype/>
      <D:getetag>"etag-b"</D:getetag>
      <D:getcontentlength>4</D:getcontentlength>
    </D:prop></D:propstat>
  </D:response>
</D:multistatus>"#;

    #[tokio::test]
    async fn test_deep_listing_builds_tree() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/library"))
            .and(header("Depth", "infinity"))
            .respond_with(ResponseTemplate::new(207).set_body_string(DEEP_LISTING))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_client(&server);
        let tree = scan_remote(&client, "library", &quick_backoff())
            .await
            .unwrap();

        assert_eq!(tree.files.len(), 2);
        assert_eq!(tree.files["a.md"].etag.as_deref(), Some("etag-a"));
        assert_eq!(tree.files["sub/b.md"].size, 4);
        assert!(tree.files["a.md"].mtime.is_some());
        assert_eq!(tree.dirs["sub"].etag.as_deref(), Some("etag-sub"));
        // Hidden and unsupported entries never enter the index
        assert!(!tree.files.contains_key(".trash/gone.md"));
        assert!(!tree.files.contains_key("image.png"));
    }

    #[tokio::test]
    async fn test_forbidden_deep_listing_falls_back_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/library"))
            .and(header("Depth", "infinity"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PROPFIND"))
            .and(path("/library"))
            .and(header("Depth", "1"))
            .respond_with(ResponseTemplate::new(207).set_body_string(ROOT_LISTING))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PROPFIND"))
            .and(path("/library/sub"))
            .and(header("Depth", "1"))
            .respond_with(ResponseTemplate::new(207).set_body_string(SUB_LISTING))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_client(&server);
        let tree = scan_remote(&client, "library", &quick_backoff())
            .await
            .unwrap();

        assert_eq!(tree.files.len(), 2);
        assert!(tree.files.contains_key("a.md"));
        assert!(tree.files.contains_key("sub/b.md"));
        assert_eq!(tree.dirs["sub"].etag.as_deref(), Some("etag-sub"));
    }

    #[tokio::test]
    async fn test_missing_root_yields_empty_tree() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = make_client(&server);
        let tree = scan_remote(&client, "library", &quick_backoff())
            .await
            .unwrap();
        assert!(tree.files.is_empty());
    }

    #[test]
    fn test_relative_key_normalization() {
        assert_eq!(
            relative_key("library", "/library/notes/a.md").as_deref(),
            Some("notes/a.md")
        );
        assert_eq!(relative_key("library", "library/"), None);
        assert_eq!(relative_key("library", "elsewhere/a.md"), None);
        assert_eq!(relative_key("", "a.md").as_deref(), Some("a.md"));
    }
}
