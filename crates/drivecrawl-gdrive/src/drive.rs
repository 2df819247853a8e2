//! Google Drive v3 as a [`RemoteTree`].

use std::path::PathBuf;

use drivecrawl_core::{
    ChildDescriptor, ChildPage, NodeInfo, PageRequest, Permission, PermissionType, RemoteError,
    RemoteTree, RemoteTreeFactory, Role,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::credential::{Credential, TokenStore};
use crate::http::{http_client, send_json};

pub const FILES_ENDPOINT: &str = "https://www.googleapis.com/drive/v3/files";

const NODE_FIELDS: &str = "id, name";

const LIST_FIELDS: &str = "nextPageToken, files(id, mimeType, name, size, trashed, driveId, \
    createdTime, modifiedTime, parents, webViewLink, \
    permissions(allowFileDiscovery, domain, emailAddress, role, type))";

/// Query parameters for one `files.list` page.
fn list_query(request: &PageRequest<'_>) -> Vec<(&'static str, String)> {
    let mut query = vec![
        (
            "q",
            format!(
                "'{}' in parents and trashed = {}",
                request.parent_id.replace('\'', "\\'"),
                request.trashed
            ),
        ),
        ("orderBy", "name".to_string()),
        ("pageSize", request.page_size.to_string()),
        ("fields", LIST_FIELDS.to_string()),
        ("supportsAllDrives", "true".to_string()),
        ("includeItemsFromAllDrives", "true".to_string()),
    ];
    if let Some(token) = request.page_token {
        query.push(("pageToken", token.to_string()));
    }
    query
}

#[derive(Debug, Deserialize)]
struct DriveNode {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    name: String,
    /// int64 fields arrive as JSON strings
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    trashed: bool,
    #[serde(default)]
    drive_id: Option<String>,
    #[serde(default)]
    created_time: Option<String>,
    #[serde(default)]
    modified_time: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    web_view_link: Option<String>,
    #[serde(default)]
    permissions: Vec<DrivePermission>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrivePermission {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    email_address: String,
    #[serde(default)]
    domain: String,
    role: String,
    #[serde(default)]
    allow_file_discovery: bool,
}

impl From<DrivePermission> for Permission {
    fn from(p: DrivePermission) -> Self {
        Permission {
            kind: PermissionType::from(p.kind),
            email: p.email_address,
            domain: p.domain,
            role: Role::from(p.role),
            allow_discovery: p.allow_file_discovery,
        }
    }
}

impl From<DriveFile> for ChildDescriptor {
    fn from(f: DriveFile) -> Self {
        let size = f.size.as_deref().and_then(|s| s.parse::<u64>().ok());
        ChildDescriptor {
            id: f.id,
            mime_type: f.mime_type,
            name: f.name,
            size,
            trashed: f.trashed,
            shared_container_id: f.drive_id,
            created_time: f.created_time,
            modified_time: f.modified_time,
            parents: f.parents,
            url: f.web_view_link,
            permissions: f.permissions.into_iter().map(Permission::from).collect(),
        }
    }
}

/// Send a request built with the current bearer token.
///
/// A 401 drops the cached token and tries once more with a fresh one.
pub(crate) fn authorized<T, F>(
    credential: &mut Credential,
    id: Option<&str>,
    build: F,
) -> Result<T, RemoteError>
where
    T: DeserializeOwned,
    F: Fn(&str) -> reqwest::RequestBuilder,
{
    let token = credential.bearer()?;
    match send_json(build(&token), id) {
        Err(RemoteError::Auth(msg)) => {
            log::debug!("Access token rejected for {}: {msg}", credential.identity());
            credential.invalidate();
            let token = credential.bearer()?;
            send_json(build(&token), id)
        }
        other => other,
    }
}

/// Drive client for one worker, owning its own credential.
pub struct DriveTree {
    credential: Credential,
}

impl DriveTree {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

impl RemoteTree for DriveTree {
    fn get_node(&mut self, id: &str) -> Result<NodeInfo, RemoteError> {
        let url = format!("{FILES_ENDPOINT}/{id}");
        let node: DriveNode = authorized(&mut self.credential, Some(id), |token| {
            http_client()
                .get(&url)
                .bearer_auth(token)
                .query(&[("fields", NODE_FIELDS), ("supportsAllDrives", "true")])
        })?;
        Ok(NodeInfo {
            id: node.id,
            name: node.name,
        })
    }

    fn list_page(&mut self, request: &PageRequest<'_>) -> Result<ChildPage, RemoteError> {
        let query = list_query(request);
        let list: FileList = authorized(&mut self.credential, Some(request.parent_id), |token| {
            http_client()
                .get(FILES_ENDPOINT)
                .bearer_auth(token)
                .query(&query)
        })?;
        Ok(ChildPage {
            children: list.files.into_iter().map(ChildDescriptor::from).collect(),
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

/// Opens one [`DriveTree`] per worker from a token file.
#[derive(Debug, Clone)]
pub struct DriveConnector {
    token_file: PathBuf,
    identity: Option<String>,
}

impl DriveConnector {
    pub fn new(token_file: impl Into<PathBuf>, identity: Option<String>) -> Self {
        Self {
            token_file: token_file.into(),
            identity,
        }
    }

    /// Load the credential once and return the resolved identity.
    ///
    /// Lets callers fail fast on a bad token file before starting a crawl.
    pub fn resolve(&self) -> Result<(String, Credential), RemoteError> {
        TokenStore::load(&self.token_file)?.get_credential(self.identity.as_deref())
    }
}

impl RemoteTreeFactory for DriveConnector {
    fn open(&self) -> Result<Box<dyn RemoteTree>, RemoteError> {
        let (_, credential) = self.resolve()?;
        Ok(Box::new(DriveTree::new(credential)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_value<'a>(query: &'a [(&str, String)], key: &str) -> Option<&'a str> {
        query.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn list_query_first_page() {
        let request = PageRequest {
            parent_id: "abc",
            trashed: false,
            page_size: 1000,
            page_token: None,
        };
        let query = list_query(&request);
        assert_eq!(
            query_value(&query, "q"),
            Some("'abc' in parents and trashed = false")
        );
        assert_eq!(query_value(&query, "orderBy"), Some("name"));
        assert_eq!(query_value(&query, "pageSize"), Some("1000"));
        assert_eq!(query_value(&query, "includeItemsFromAllDrives"), Some("true"));
        assert_eq!(query_value(&query, "pageToken"), None);
        assert!(query_value(&query, "fields").unwrap().contains("permissions("));
    }

    #[test]
    fn list_query_trashed_with_token() {
        let request = PageRequest {
            parent_id: "abc",
            trashed: true,
            page_size: 50,
            page_token: Some("tok"),
        };
        let query = list_query(&request);
        assert_eq!(
            query_value(&query, "q"),
            Some("'abc' in parents and trashed = true")
        );
        assert_eq!(query_value(&query, "pageToken"), Some("tok"));
    }

    #[test]
    fn list_query_escapes_quotes() {
        let request = PageRequest {
            parent_id: "a'b",
            trashed: false,
            page_size: 10,
            page_token: None,
        };
        assert_eq!(
            query_value(&list_query(&request), "q"),
            Some("'a\\'b' in parents and trashed = false")
        );
    }

    #[test]
    fn file_list_maps_to_children() {
        let body = r#"{
            "nextPageToken": "next",
            "files": [
                {
                    "id": "f1", "mimeType": "application/pdf", "name": "report.pdf",
                    "size": "20480", "trashed": false, "driveId": "d1",
                    "createdTime": "2018-04-30T05:16:22.797Z",
                    "modifiedTime": "2018-05-01T00:00:00.000Z",
                    "parents": ["root"],
                    "webViewLink": "https://drive.google.com/file/d/f1/view",
                    "permissions": [
                        {"type": "user", "emailAddress": "a@x.com", "role": "owner"},
                        {"type": "anyone", "role": "reader", "allowFileDiscovery": true}
                    ]
                },
                {"id": "d2", "mimeType": "application/vnd.google-apps.folder", "name": "Sub"}
            ]
        }"#;
        let list: FileList = serde_json::from_str(body).unwrap();
        assert_eq!(list.next_page_token.as_deref(), Some("next"));
        let children: Vec<ChildDescriptor> =
            list.files.into_iter().map(ChildDescriptor::from).collect();

        let file = &children[0];
        assert_eq!(file.size, Some(20480));
        assert_eq!(file.shared_container_id.as_deref(), Some("d1"));
        assert_eq!(file.parents, vec!["root".to_string()]);
        assert_eq!(file.permissions.len(), 2);
        assert_eq!(file.permissions[0].kind, PermissionType::User);
        assert_eq!(file.permissions[0].email, "a@x.com");
        assert_eq!(file.permissions[0].role, Role::Owner);
        assert_eq!(file.permissions[1].kind, PermissionType::Anyone);
        assert!(file.permissions[1].allow_discovery);

        let folder = &children[1];
        assert_eq!(folder.size, None);
        assert!(folder.permissions.is_empty());
        assert!(folder.url.is_none());
    }

    #[test]
    fn empty_list_body() {
        let list: FileList = serde_json::from_str("{}").unwrap();
        assert!(list.files.is_empty());
        assert!(list.next_page_token.is_none());
    }

    #[test]
    fn unknown_permission_kinds_kept() {
        let p: DrivePermission =
            serde_json::from_str(r#"{"type": "team", "role": "organizer"}"#).unwrap();
        let p = Permission::from(p);
        assert_eq!(p.kind, PermissionType::Other("team".to_string()));
        assert_eq!(p.role, Role::Other("organizer".to_string()));
    }

    #[test]
    fn connector_fails_on_missing_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let connector = DriveConnector::new(dir.path().join("tokens.json"), None);
        assert!(matches!(connector.open(), Err(RemoteError::Auth(_))));
    }

    #[test]
    fn connector_opens_with_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(
            &path,
            r#"{"client_id": "c", "client_secret": "s",
                "identities": {"a@x.com": {"refresh_token": "r"}, "b@x.com": {"refresh_token": "r"}}}"#,
        )
        .unwrap();
        let connector = DriveConnector::new(&path, Some("b@x.com".to_string()));
        assert_eq!(connector.resolve().unwrap().0, "b@x.com");
        assert!(connector.open().is_ok());
    }
}
