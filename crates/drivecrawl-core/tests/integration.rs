#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use drivecrawl_core::{
    ChildDescriptor, ChildPage, CrawlOptions, Crawler, FOLDER_MIME_TYPE, Filters, NodeInfo,
    OutputTarget, PageRequest, Permission, PermissionType, RemoteError, RemoteTree,
    RemoteTreeFactory, RetryPolicy, Role, WorkerConfig, WriterConfig,
};
use duckdb::Connection;
use tempfile::TempDir;

/// Subfolders per folder
const FAN_OUT: usize = 3;
/// Folder levels below the root
const DEPTH: usize = 3;
/// Plain files per folder
const FILES_PER_FOLDER: usize = 2;
/// Listed in every leaf folder
const SHARED_FILE: &str = "shared-file";

/// Deterministic in-memory tree, served in small pages
#[derive(Clone, Default)]
struct SyntheticTree {
    names: HashMap<String, String>,
    children: HashMap<String, Vec<ChildDescriptor>>,
}

fn owner() -> Permission {
    Permission {
        kind: PermissionType::User,
        email: "owner@example.com".to_string(),
        domain: String::new(),
        role: Role::Owner,
        allow_discovery: false,
    }
}

fn folder(id: &str, name: &str, parent: &str) -> ChildDescriptor {
    ChildDescriptor {
        id: id.to_string(),
        mime_type: FOLDER_MIME_TYPE.to_string(),
        name: name.to_string(),
        parents: vec![parent.to_string()],
        ..ChildDescriptor::default()
    }
}

fn file(id: &str, name: &str, parent: &str) -> ChildDescriptor {
    ChildDescriptor {
        id: id.to_string(),
        mime_type: "application/pdf".to_string(),
        name: name.to_string(),
        size: Some(1024),
        created_time: Some("2020-01-02T03:04:05.678Z".to_string()),
        modified_time: Some("2021-01-02T03:04:05.678Z".to_string()),
        parents: vec![parent.to_string()],
        url: Some(format!("https://drive.example/{id}")),
        permissions: vec![owner()],
        ..ChildDescriptor::default()
    }
}

impl SyntheticTree {
    fn build() -> Self {
        let mut tree = Self::default();
        tree.names.insert("top".to_string(), "Top".to_string());
        tree.grow("top", 0);
        tree
    }

    fn grow(&mut self, id: &str, level: usize) {
        let mut children = Vec::new();
        for i in 0..FILES_PER_FOLDER {
            children.push(file(&format!("{id}-file{i}"), &format!("doc{i}.pdf"), id));
        }
        if level == DEPTH {
            children.push(file(SHARED_FILE, "shared.pdf", id));
        } else {
            for i in 0..FAN_OUT {
                let child = format!("{id}-{i}");
                children.push(folder(&child, &format!("dir{i}"), id));
                self.names.insert(child.clone(), format!("dir{i}"));
                self.grow(&child, level + 1);
            }
        }
        self.children.insert(id.to_string(), children);
    }

    fn folder_count() -> usize {
        (0..=DEPTH).map(|level| FAN_OUT.pow(level as u32)).sum()
    }

    fn leaf_count() -> usize {
        FAN_OUT.pow(DEPTH as u32)
    }

    /// Distinct records below the root
    fn unique_records() -> usize {
        let subfolders = Self::folder_count() - 1;
        subfolders + Self::folder_count() * FILES_PER_FOLDER + 1
    }
}

impl RemoteTree for SyntheticTree {
    fn get_node(&mut self, id: &str) -> Result<NodeInfo, RemoteError> {
        self.names
            .get(id)
            .map(|name| NodeInfo {
                id: id.to_string(),
                name: name.clone(),
            })
            .ok_or_else(|| RemoteError::NotFound { id: id.to_string() })
    }

    fn list_page(&mut self, request: &PageRequest<'_>) -> Result<ChildPage, RemoteError> {
        if request.trashed {
            return Ok(ChildPage::default());
        }
        let all = self.children.get(request.parent_id).cloned().unwrap_or_default();
        let start: usize = request
            .page_token
            .map(|t| t.parse().unwrap_or(0))
            .unwrap_or(0);
        let end = (start + request.page_size as usize).min(all.len());
        Ok(ChildPage {
            children: all[start..end].to_vec(),
            next_page_token: (end < all.len()).then(|| end.to_string()),
        })
    }
}

impl RemoteTreeFactory for SyntheticTree {
    fn open(&self) -> Result<Box<dyn RemoteTree>, RemoteError> {
        Ok(Box::new(self.clone()))
    }
}

fn options(path: &Path) -> CrawlOptions {
    let mut options = CrawlOptions::new(WriterConfig::new(OutputTarget::parse(path).unwrap()));
    options.workers = 4;
    options.worker = WorkerConfig {
        separator: "/".to_string(),
        flush_threshold: 5,
        retry: RetryPolicy::immediate(3),
        page_size: 2,
        ..WorkerConfig::default()
    };
    options.writer.chunk_size = 7;
    options
}

fn crawl(options: CrawlOptions) -> drivecrawl_core::CrawlSummary {
    let crawler = Crawler::new(Arc::new(SyntheticTree::build()));
    crawler.run(&["top".to_string()], options).unwrap()
}

#[test]
fn crawl_tree_to_csv() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inventory.csv");
    let summary = crawl(options(&path));

    assert_eq!(summary.folders, SyntheticTree::folder_count());
    assert_eq!(
        summary.records_found,
        SyntheticTree::unique_records() + SyntheticTree::leaf_count() - 1
    );
    assert_eq!(summary.rows_written, SyntheticTree::unique_records());
    assert_eq!(summary.failed_workers, 0);
    assert!(!summary.cancelled);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("\u{feff}id,name,"));
    assert_eq!(text.lines().count(), SyntheticTree::unique_records() + 1);
    assert!(text.contains("Top/dir0/dir1/dir2/doc0.pdf"));
    assert_eq!(text.lines().filter(|l| l.starts_with(SHARED_FILE)).count(), 1);
}

#[test]
fn crawl_tree_to_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inventory.json");
    crawl(options(&path));

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let files = doc["files"].as_array().unwrap();
    assert_eq!(files.len(), SyntheticTree::unique_records());
    let pdf = files
        .iter()
        .find(|f| f["id"] == "top-file0")
        .expect("root file present");
    assert_eq!(pdf["name"], "Top/doc0.pdf");
    assert_eq!(pdf["mimeType"], "application/pdf");
}

#[test]
fn crawl_tree_to_duckdb() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inventory.duckdb");
    let summary = crawl(options(&path));
    assert_eq!(summary.sink, Some("relational"));

    let conn = Connection::open(&path).unwrap();
    let tables: Vec<String> = conn
        .prepare("SELECT table_name FROM information_schema.tables ORDER BY table_name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(tables.len(), 4);
    let prefix = tables
        .iter()
        .find_map(|t| t.strip_suffix("_file_parents"))
        .unwrap()
        .to_string();

    let count = |suffix: &str| -> usize {
        conn.query_row(
            &format!("SELECT count(*) FROM \"{prefix}_{suffix}\""),
            [],
            |row| row.get::<_, i64>(0),
        )
        .unwrap() as usize
    };
    let unique_files = SyntheticTree::folder_count() * FILES_PER_FOLDER + 1;
    assert_eq!(count("files"), SyntheticTree::unique_records());
    assert_eq!(count("permissions"), 1);
    assert_eq!(count("file_permissions"), unique_files);
    assert_eq!(count("file_parents"), SyntheticTree::unique_records());
}

#[test]
fn crawl_tree_to_sqlite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inventory.sqlite3");
    let summary = crawl(options(&path));
    assert_eq!(summary.sink, Some("relational"));
    assert_eq!(summary.rows_written, SyntheticTree::unique_records());

    let conn = rusqlite::Connection::open(&path).unwrap();
    let prefix: String = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE '%_files'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    let prefix = prefix.strip_suffix("_files").unwrap().to_string();
    let count = |suffix: &str| -> usize {
        conn.query_row(
            &format!("SELECT count(*) FROM \"{prefix}_{suffix}\""),
            [],
            |row| row.get::<_, i64>(0),
        )
        .unwrap() as usize
    };
    assert_eq!(count("files"), SyntheticTree::unique_records());
    assert_eq!(count("permissions"), 1);
    assert_eq!(count("file_parents"), SyntheticTree::unique_records());
}

#[test]
fn filters_and_list_mode() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("top.tsv");
    let mut options = options(&path).list();
    options.worker.filters = Filters::new(r"^doc1\.", "pdf", false).unwrap();
    let summary = crawl(options);

    assert_eq!(summary.folders, 1);
    assert_eq!(summary.rows_written, 1);
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("Top/doc1.pdf"));
    assert!(!text.contains("dir0"));
}

#[test]
fn unknown_root_alongside_known() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inventory.csv");
    let crawler = Crawler::new(Arc::new(SyntheticTree::build()));
    let summary = crawler
        .run(&["missing".to_string(), "top".to_string()], options(&path))
        .unwrap();
    assert_eq!(summary.roots, 2);
    assert_eq!(summary.roots_skipped, 1);
    assert_eq!(summary.rows_written, SyntheticTree::unique_records());
}
