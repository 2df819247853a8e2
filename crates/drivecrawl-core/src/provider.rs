//! Remote tree provider seam and the paginating, retrying adapter over it

use crate::error::RemoteError;
use crate::retry::RetryPolicy;
use crate::shutdown::CancelToken;

/// Largest page the remote service accepts
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Minimal node lookup result, used to seed crawl roots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: String,
    pub name: String,
}

/// One child as listed by the remote service (leaf name only).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildDescriptor {
    pub id: String,
    pub mime_type: String,
    pub name: String,
    pub size: Option<u64>,
    pub trashed: bool,
    pub shared_container_id: Option<String>,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub parents: Vec<String>,
    pub url: Option<String>,
    pub permissions: Vec<crate::record::Permission>,
}

impl ChildDescriptor {
    pub fn is_folder(&self) -> bool {
        self.mime_type == crate::record::FOLDER_MIME_TYPE
    }
}

/// A single list request against a folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest<'a> {
    pub parent_id: &'a str,
    /// List trashed children instead of live ones
    pub trashed: bool,
    pub page_size: u32,
    pub page_token: Option<&'a str>,
}

/// One page of children plus the continuation token, if any
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChildPage {
    pub children: Vec<ChildDescriptor>,
    pub next_page_token: Option<String>,
}

/// Raw remote calls; implementations handle auth and wire format only.
pub trait RemoteTree: Send {
    /// Look up a node. Unknown ids fail with [`RemoteError::NotFound`].
    fn get_node(&mut self, id: &str) -> Result<NodeInfo, RemoteError>;

    /// Fetch exactly one page of children.
    fn list_page(&mut self, request: &PageRequest<'_>) -> Result<ChildPage, RemoteError>;
}

/// Creates one independent [`RemoteTree`] per worker.
///
/// Each instance holds its own credential, refreshed on its own.
pub trait RemoteTreeFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn RemoteTree>, RemoteError>;
}

/// Provider adapter: every call goes through the retry policy and
/// pagination is folded into a single result.
pub struct TreeAdapter {
    remote: Box<dyn RemoteTree>,
    retry: RetryPolicy,
    page_size: u32,
    cancel: CancelToken,
}

impl TreeAdapter {
    pub fn new(remote: Box<dyn RemoteTree>, retry: RetryPolicy) -> Self {
        Self {
            remote,
            retry,
            page_size: MAX_PAGE_SIZE,
            cancel: CancelToken::new(),
        }
    }

    /// Abandon retry backoff once `cancel` trips
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the page size (clamped to `1..=MAX_PAGE_SIZE`)
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn get_node(&mut self, id: &str) -> Result<NodeInfo, RemoteError> {
        let remote = &mut self.remote;
        self.retry
            .call_until(&format!("get {id}"), &self.cancel, || remote.get_node(id))
    }

    /// All children of `id`; trashed children are appended when requested.
    pub fn list_children(
        &mut self,
        id: &str,
        include_trashed: bool,
    ) -> Result<Vec<ChildDescriptor>, RemoteError> {
        let mut children = self.list_pass(id, false)?;
        if include_trashed {
            log::debug!("{id}: including trashed children");
            children.extend(self.list_pass(id, true)?);
        }
        Ok(children)
    }

    fn list_pass(&mut self, id: &str, trashed: bool) -> Result<Vec<ChildDescriptor>, RemoteError> {
        let label = format!("list {id}");
        let mut children = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let request = PageRequest {
                parent_id: id,
                trashed,
                page_size: self.page_size,
                page_token: page_token.as_deref(),
            };
            let remote = &mut self.remote;
            let page = self
                .retry
                .call_until(&label, &self.cancel, || remote.list_page(&request))?;
            children.extend(page.children);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(children)
    }
}
