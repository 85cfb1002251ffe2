//! Cross-page context memory.
//!
//! Keeps a bounded, newest-first list of recently visited pages and renders
//! the ones relevant to the current page as prompt context.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{Storage, keys};

/// Characters of page content included per entry in rendered context.
const CONTEXT_SNIPPET_CHARS: usize = 500;

/// Separator between rendered context entries.
const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Condensed snapshot of one visited page. Identity is the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub content: String,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl PageContext {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            timestamp,
        }
    }

    /// Snapshot stamped with the current time.
    pub fn now(url: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(url, title, content, chrono::Utc::now().timestamp_millis())
    }

    fn render(&self) -> String {
        format!(
            "[Source: {} ({})]\n{}...",
            self.title,
            self.url,
            truncate_chars(&self.content, CONTEXT_SNIPPET_CHARS)
        )
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Move `page` to the front, dropping any older entry for the same URL, and
/// trim to `limit`.
fn insert_front(mut pages: Vec<PageContext>, page: PageContext, limit: usize) -> Vec<PageContext> {
    pages.retain(|p| p.url != page.url);
    pages.insert(0, page);
    pages.truncate(limit);
    pages
}

/// In-process view of the store.
#[derive(Default)]
struct SessionView {
    pages: Vec<PageContext>,
    /// Set when the last write failed; `pages` is then authoritative.
    unsynced: bool,
}

/// Bounded recency-ordered store of visited pages.
///
/// Every mutation is a read-modify-write of the `page_memory` key performed
/// under that key's storage lock, so concurrent `add_page` calls never drop
/// each other's inserts.
pub struct ContextMemory {
    storage: Storage,
    session: Mutex<SessionView>,
}

impl ContextMemory {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            session: Mutex::new(SessionView::default()),
        }
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut SessionView) -> R) -> R {
        let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *guard)
    }

    async fn load(&self) -> Vec<PageContext> {
        if let Some(pages) = self.with_session(|s| s.unsynced.then(|| s.pages.clone())) {
            return pages;
        }
        match self.storage.get_json::<Vec<PageContext>>(keys::PAGE_MEMORY).await {
            Ok(pages) => {
                let pages = pages.unwrap_or_default();
                // A write may have failed while this read was in flight.
                self.with_session(|s| {
                    if s.unsynced {
                        s.pages.clone()
                    } else {
                        s.pages = pages.clone();
                        pages
                    }
                })
            }
            Err(e) => {
                warn!(error = %e, "Failed to read page memory, using session copy");
                self.with_session(|s| s.pages.clone())
            }
        }
    }

    /// Remember `page`, keeping at most `limit` entries. `limit == 0` is a
    /// no-op that does not touch storage.
    ///
    /// A failed write is logged and otherwise ignored; the session copy stays
    /// correct and is retried on the next mutation.
    pub async fn add_page(&self, page: PageContext, limit: usize) {
        if limit == 0 {
            return;
        }

        let _guard = self.storage.lock_key(keys::PAGE_MEMORY).await;
        let url = page.url.clone();
        let pages = insert_front(self.load().await, page, limit);

        let result = self.storage.set_json(keys::PAGE_MEMORY, &pages).await;
        let stored = pages.len();
        self.with_session(|s| {
            s.pages = pages;
            s.unsynced = result.is_err();
        });

        match result {
            Ok(()) => debug!(url = %url, stored, limit, "Page remembered"),
            Err(e) => warn!(url = %url, error = %e, "Failed to persist page memory"),
        }
    }

    /// The full store, newest first.
    pub async fn get_memory(&self) -> Vec<PageContext> {
        self.load().await
    }

    /// Forget every page.
    pub async fn clear_memory(&self) {
        let _guard = self.storage.lock_key(keys::PAGE_MEMORY).await;
        let result = self.storage.remove(keys::PAGE_MEMORY).await;
        self.with_session(|s| {
            s.pages.clear();
            s.unsynced = result.is_err();
        });
        if let Err(e) = result {
            warn!(error = %e, "Failed to clear page memory");
        }
    }

    /// Look up a remembered page by URL.
    pub async fn find_page(&self, url: &str) -> Option<PageContext> {
        self.load().await.into_iter().find(|p| p.url == url)
    }

    /// Render up to `limit` remembered pages other than `current_url` as a
    /// prompt context block. An empty string means there is nothing to add.
    pub async fn get_relevant_context(&self, current_url: &str, limit: usize) -> String {
        if limit == 0 {
            return String::new();
        }

        self.load()
            .await
            .iter()
            .filter(|p| p.url != current_url)
            .take(limit)
            .map(PageContext::render)
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }

    /// Case-insensitive substring search over title, URL and content,
    /// newest first.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<PageContext> {
        let needle = query.trim().to_lowercase();
        self.load()
            .await
            .into_iter()
            .filter(|p| {
                needle.is_empty()
                    || p.title.to_lowercase().contains(&needle)
                    || p.url.to_lowercase().contains(&needle)
                    || p.content.to_lowercase().contains(&needle)
            })
            .take(limit)
            .collect()
    }
}
