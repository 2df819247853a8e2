//! Flattened inventory records and permission summaries

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::provider::ChildDescriptor;

/// MIME type the remote service uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// One folder waiting to be expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderTask {
    pub id: String,
    /// Display path accumulated from the crawl root
    pub path: String,
}

impl FolderTask {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Join a parent display path and a leaf name.
pub fn display_path(parent: &str, separator: &str, name: &str) -> String {
    let mut path = String::with_capacity(parent.len() + separator.len() + name.len());
    path.push_str(parent);
    path.push_str(separator);
    path.push_str(name);
    path
}

/// Grantee kind of a permission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PermissionType {
    User,
    Group,
    Domain,
    Anyone,
    Other(String),
}

impl PermissionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Domain => "domain",
            Self::Anyone => "anyone",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for PermissionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "user" => Self::User,
            "group" => Self::Group,
            "domain" => Self::Domain,
            "anyone" => Self::Anyone,
            _ => Self::Other(s),
        }
    }
}

impl From<PermissionType> for String {
    fn from(t: PermissionType) -> Self {
        t.as_str().to_string()
    }
}

/// Access level granted by a permission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Owner,
    Writer,
    Commenter,
    Reader,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Owner => "owner",
            Self::Writer => "writer",
            Self::Commenter => "commenter",
            Self::Reader => "reader",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "owner" => Self::Owner,
            "writer" => Self::Writer,
            "commenter" => Self::Commenter,
            "reader" => Self::Reader,
            _ => Self::Other(s),
        }
    }
}

impl From<Role> for String {
    fn from(r: Role) -> Self {
        r.as_str().to_string()
    }
}

/// A single grant on a file. Missing email/domain are empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(rename = "type")]
    pub kind: PermissionType,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub domain: String,
    pub role: Role,
    #[serde(default)]
    pub allow_discovery: bool,
}

impl Permission {
    /// User grants without an email are placeholders the service never shows.
    pub fn is_stub(&self) -> bool {
        self.kind == PermissionType::User && self.email.is_empty()
    }

    /// Human readable grantee, as shown in the summary columns.
    pub fn identity(&self) -> Option<String> {
        let with_link = if self.allow_discovery {
            ""
        } else {
            " with the link"
        };
        match &self.kind {
            PermissionType::User | PermissionType::Group => Some(self.email.clone()),
            PermissionType::Domain => Some(format!("Anyone in {}{with_link}", self.domain)),
            PermissionType::Anyone => Some(format!("Anyone on the web{with_link}")),
            PermissionType::Other(_) => None,
        }
    }
}

/// Column names of the synthesized permission summary
pub const SUMMARY_COLUMNS: [&str; 4] = ["owners", "can_edit", "can_comment", "can_view"];

/// Permissions grouped by role into comma separated identity lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSummary {
    pub owners: String,
    pub can_edit: String,
    pub can_comment: String,
    pub can_view: String,
}

impl PermissionSummary {
    pub fn from_permissions(file_id: &str, permissions: &[Permission]) -> Self {
        let mut summary = Self::default();
        for permission in permissions {
            let identity = permission.identity().unwrap_or_else(|| {
                log::error!(
                    "unknown permission type {} on file {file_id}",
                    permission.kind.as_str()
                );
                "ERROR".to_string()
            });
            let slot = match permission.role {
                Role::Owner => &mut summary.owners,
                Role::Writer => &mut summary.can_edit,
                Role::Commenter => &mut summary.can_comment,
                Role::Reader => &mut summary.can_view,
                Role::Other(ref role) => {
                    log::warn!("unknown role {role} for {identity} on file {file_id}");
                    continue;
                }
            };
            if !slot.is_empty() {
                slot.push_str(", ");
            }
            slot.push_str(&identity);
        }
        summary
    }

    /// Value of one of [`SUMMARY_COLUMNS`]
    pub fn get(&self, column: &str) -> Option<&str> {
        match column {
            "owners" => Some(&self.owners),
            "can_edit" => Some(&self.can_edit),
            "can_comment" => Some(&self.can_comment),
            "can_view" => Some(&self.can_view),
            _ => None,
        }
    }
}

/// Sink-agnostic description of one discovered item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub mime_type: String,
    /// Full display path, not just the leaf name
    pub name: String,
    pub size: Option<u64>,
    pub trashed: bool,
    pub shared_container_id: Option<String>,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub parents: Vec<String>,
    pub url: Option<String>,
    pub permissions: Vec<Permission>,
}

impl FileRecord {
    /// Flatten a listed child found under `parent_path`.
    pub fn from_child(child: &ChildDescriptor, parent_path: &str, separator: &str) -> Self {
        let mut parents: Vec<String> = Vec::with_capacity(child.parents.len());
        for parent in &child.parents {
            if !parents.contains(parent) {
                parents.push(parent.clone());
            }
        }
        Self {
            id: child.id.clone(),
            mime_type: child.mime_type.clone(),
            name: display_path(parent_path, separator, &child.name),
            size: child.size,
            trashed: child.trashed,
            shared_container_id: child.shared_container_id.clone(),
            created_time: child.created_time.clone(),
            modified_time: child.modified_time.clone(),
            parents,
            url: child.url.clone(),
            permissions: child.permissions.clone(),
        }
    }

    /// Record as a field-name → value map, every field present.
    pub fn to_row(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Field names as exposed to sinks
    pub fn field_names(&self) -> Vec<String> {
        self.to_row().into_iter().map(|(k, _)| k).collect()
    }

    pub fn permission_summary(&self) -> PermissionSummary {
        PermissionSummary::from_permissions(&self.id, &self.permissions)
    }
}

/// Render a row value as spreadsheet/CSV cell text.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(cell_text).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn user(email: &str, role: Role) -> Permission {
        Permission {
            kind: PermissionType::User,
            email: email.to_string(),
            domain: String::new(),
            role,
            allow_discovery: false,
        }
    }

    pub(crate) fn record(id: &str, name: &str) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            mime_type: "text/csv".to_string(),
            name: name.to_string(),
            size: Some(42),
            trashed: false,
            shared_container_id: None,
            created_time: Some("2018-04-30T05:16:22.797Z".to_string()),
            modified_time: Some("2019-01-02T03:04:05.000Z".to_string()),
            parents: vec!["root".to_string()],
            url: Some(format!("https://example.test/{id}")),
            permissions: vec![user("owner@x.com", Role::Owner)],
        }
    }

    #[test]
    fn path_concatenates_with_separator() {
        assert_eq!(
            display_path("Shared\\Finance", "\\", "report.csv"),
            "Shared\\Finance\\report.csv"
        );
    }

    #[test]
    fn from_child_builds_full_path() {
        let child = ChildDescriptor {
            id: "f1".to_string(),
            name: "report.csv".to_string(),
            mime_type: "text/csv".to_string(),
            parents: vec!["p1".to_string(), "p2".to_string(), "p1".to_string()],
            ..ChildDescriptor::default()
        };
        let rec = FileRecord::from_child(&child, "Shared\\Finance", "\\");
        assert_eq!(rec.name, "Shared\\Finance\\report.csv");
        assert_eq!(rec.parents, vec!["p1", "p2"]);
    }

    #[test]
    fn can_view_summary() {
        let perms = vec![
            user("a@x.com", Role::Reader),
            user("b@x.com", Role::Reader),
            Permission {
                kind: PermissionType::Anyone,
                email: String::new(),
                domain: String::new(),
                role: Role::Reader,
                allow_discovery: false,
            },
        ];
        let summary = PermissionSummary::from_permissions("f", &perms);
        assert_eq!(
            summary.can_view,
            "a@x.com, b@x.com, Anyone on the web with the link"
        );
        assert_eq!(summary.owners, "");
    }

    #[test]
    fn domain_identity_with_discovery() {
        let perm = Permission {
            kind: PermissionType::Domain,
            email: String::new(),
            domain: "x.com".to_string(),
            role: Role::Writer,
            allow_discovery: true,
        };
        assert_eq!(perm.identity().as_deref(), Some("Anyone in x.com"));
        let summary = PermissionSummary::from_permissions("f", &[perm]);
        assert_eq!(summary.can_edit, "Anyone in x.com");
    }

    #[test]
    fn unknown_role_skipped() {
        let perms = vec![user("a@x.com", Role::Other("organizer".to_string()))];
        assert_eq!(
            PermissionSummary::from_permissions("f", &perms),
            PermissionSummary::default()
        );
    }

    #[test]
    fn stub_permission_detected() {
        assert!(user("", Role::Reader).is_stub());
        assert!(!user("a@x.com", Role::Reader).is_stub());
    }

    #[test]
    fn permission_serde_uses_plain_strings() {
        let json = serde_json::to_value(user("a@x.com", Role::Commenter)).unwrap();
        assert_eq!(json["type"], "user");
        assert_eq!(json["role"], "commenter");
        assert_eq!(json["allowDiscovery"], false);
        let back: Permission = serde_json::from_value(json).unwrap();
        assert_eq!(back.role, Role::Commenter);
    }

    #[test]
    fn field_names_are_camel_case() {
        let names = record("1", "a").field_names();
        for expected in [
            "id",
            "mimeType",
            "name",
            "size",
            "trashed",
            "sharedContainerId",
            "createdTime",
            "modifiedTime",
            "parents",
            "url",
            "permissions",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn cell_text_renders_lists_and_nulls() {
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&serde_json::json!(["a", "b"])), "a, b");
        assert_eq!(cell_text(&serde_json::json!(true)), "true");
        assert_eq!(cell_text(&serde_json::json!(12)), "12");
    }
}
