//! Context/page registry.
//!
//! Maps opaque identifiers to isolated browsing contexts and the tabs that
//! live inside them. Both maps are mutated under a single write lock, so a
//! concurrent lookup can never observe a page whose owning context has
//! already been removed — context closure is atomic from the reader's point
//! of view, and engine-side teardown happens only after the registry state
//! is consistent.

use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::Target::CreateTarget;
use headless_chrome::Tab;
use periscope_common::ViewportSize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cdp;
use crate::engine::{EngineError, EngineHandle};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Browser not started")]
    EngineNotStarted,
    #[error("context {0} does not exist")]
    ContextNotFound(String),
    #[error("page {0} does not exist")]
    PageNotFound(String),
    #[error("engine operation failed: {0}")]
    Engine(String),
}

impl From<EngineError> for RegistryError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotStarted => Self::EngineNotStarted,
            EngineError::Launch(msg) => Self::Engine(msg),
        }
    }
}

/// Cheap clone of one registered page, handed to the dispatcher.
#[derive(Clone)]
pub struct PageHandle {
    pub page_id: String,
    pub context_id: String,
    pub viewport: ViewportSize,
    pub tab: Arc<Tab>,
}

impl std::fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle")
            .field("page_id", &self.page_id)
            .field("context_id", &self.context_id)
            .field("viewport", &self.viewport)
            .finish()
    }
}

struct ContextEntry {
    /// CDP BrowserContext id backing this context.
    cdp_context_id: String,
    viewport: ViewportSize,
    user_agent: Option<String>,
    created_at: Instant,
}

struct PageEntry {
    context_id: String,
    tab: Arc<Tab>,
}

#[derive(Default)]
struct RegistryState {
    contexts: HashMap<String, ContextEntry>,
    pages: HashMap<String, PageEntry>,
}

pub struct PageRegistry {
    engine: Arc<EngineHandle>,
    state: RwLock<RegistryState>,
}

impl PageRegistry {
    pub fn new(engine: Arc<EngineHandle>) -> Self {
        Self {
            engine,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Create an isolated browsing context under `context_id`.
    ///
    /// Replace-semantics: if the id is already taken the previous context
    /// (and every page in it) is closed first.
    pub async fn create_context(
        &self,
        context_id: &str,
        viewport: Option<ViewportSize>,
        user_agent: Option<String>,
    ) -> Result<(), RegistryError> {
        let browser = self.engine.browser().await?;
        let viewport = viewport.unwrap_or(self.engine.config().viewport);

        if self.state.read().await.contexts.contains_key(context_id) {
            warn!("Context {} already exists - replacing it", context_id);
            // Ignore a NotFound race with another replace/close.
            let _ = self.close_context(context_id).await;
        }

        let cdp_context_id = {
            let browser = browser.clone();
            tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
                let context = browser.new_context()?;
                Ok(context.get_id().to_string())
            })
            .await
            .map_err(|e| RegistryError::Engine(format!("context task failed: {}", e)))?
            .map_err(|e| RegistryError::Engine(e.to_string()))?
        };

        let mut state = self.state.write().await;
        state.contexts.insert(
            context_id.to_string(),
            ContextEntry {
                cdp_context_id,
                viewport,
                user_agent,
                created_at: Instant::now(),
            },
        );

        info!("Created context {} ({})", context_id, viewport);
        Ok(())
    }

    /// Close a context and every page that belongs to it.
    ///
    /// Returns the ids of the pages that were removed. Registry entries for
    /// the context and its pages disappear atomically; the tabs are torn
    /// down afterwards. Chrome disposes the backing CDP BrowserContext once
    /// its last tab is gone.
    pub async fn close_context(&self, context_id: &str) -> Result<Vec<String>, RegistryError> {
        let (page_ids, tabs, age) = {
            let mut state = self.state.write().await;

            let Some(entry) = state.contexts.remove(context_id) else {
                return Err(RegistryError::ContextNotFound(context_id.to_string()));
            };

            let page_ids: Vec<String> = state
                .pages
                .iter()
                .filter(|(_, page)| page.context_id == context_id)
                .map(|(id, _)| id.clone())
                .collect();

            let mut tabs = Vec::with_capacity(page_ids.len());
            for id in &page_ids {
                if let Some(page) = state.pages.remove(id) {
                    tabs.push(page.tab);
                }
            }

            (page_ids, tabs, entry.created_at.elapsed())
        };

        close_tabs(tabs).await;

        info!(
            "Closed context {} ({} page(s), lived {:?})",
            context_id,
            page_ids.len(),
            age
        );
        Ok(page_ids)
    }

    /// Create a page (tab) inside an existing context. Replace-semantics on
    /// a colliding page id.
    pub async fn create_page(&self, page_id: &str, context_id: &str) -> Result<(), RegistryError> {
        let browser = self.engine.browser().await?;

        let (cdp_context_id, viewport, user_agent) = {
            let state = self.state.read().await;
            let Some(entry) = state.contexts.get(context_id) else {
                return Err(RegistryError::ContextNotFound(context_id.to_string()));
            };
            (
                entry.cdp_context_id.clone(),
                entry.viewport,
                entry.user_agent.clone(),
            )
        };

        if self.state.read().await.pages.contains_key(page_id) {
            warn!("Page {} already exists - replacing it", page_id);
            let _ = self.close_page(page_id).await;
        }

        let tab = {
            let page_id = page_id.to_string();
            tokio::task::spawn_blocking(move || -> anyhow::Result<Arc<Tab>> {
                let create_target = CreateTarget {
                    url: "about:blank".to_string(),
                    left: None,
                    top: None,
                    width: viewport.width.try_into().ok(),
                    height: viewport.height.try_into().ok(),
                    window_state: None,
                    browser_context_id: Some(cdp_context_id),
                    enable_begin_frame_control: None,
                    new_window: None,
                    background: None,
                    for_tab: None,
                    hidden: None,
                };

                let tab = browser.new_tab_with_options(create_target)?;

                if let Some(ua) = user_agent.as_deref() {
                    tab.set_user_agent(ua, None, None)?;
                }

                wire_page_observers(&tab, &page_id);
                Ok(tab)
            })
            .await
            .map_err(|e| RegistryError::Engine(format!("page task failed: {}", e)))?
            .map_err(|e| RegistryError::Engine(e.to_string()))?
        };

        let mut state = self.state.write().await;
        state.pages.insert(
            page_id.to_string(),
            PageEntry {
                context_id: context_id.to_string(),
                tab,
            },
        );

        info!("Created page {} in context {}", page_id, context_id);
        Ok(())
    }

    pub async fn close_page(&self, page_id: &str) -> Result<(), RegistryError> {
        let tab = {
            let mut state = self.state.write().await;
            let Some(entry) = state.pages.remove(page_id) else {
                return Err(RegistryError::PageNotFound(page_id.to_string()));
            };
            entry.tab
        };

        close_tabs(vec![tab]).await;
        info!("Closed page {}", page_id);
        Ok(())
    }

    /// Look up a page for dispatching a command against it.
    pub async fn get(&self, page_id: &str) -> Result<PageHandle, RegistryError> {
        let state = self.state.read().await;

        let Some(page) = state.pages.get(page_id) else {
            return Err(RegistryError::PageNotFound(page_id.to_string()));
        };

        let viewport = state
            .contexts
            .get(&page.context_id)
            .map(|c| c.viewport)
            .unwrap_or_default();

        Ok(PageHandle {
            page_id: page_id.to_string(),
            context_id: page.context_id.clone(),
            viewport,
            tab: page.tab.clone(),
        })
    }

    pub async fn context_count(&self) -> usize {
        self.state.read().await.contexts.len()
    }

    pub async fn page_count(&self) -> usize {
        self.state.read().await.pages.len()
    }

    /// Drop every context and page. Used when the engine is being stopped.
    pub async fn close_all(&self) {
        let (contexts, pages, tabs) = {
            let mut state = self.state.write().await;
            let contexts = state.contexts.len();
            let pages = state.pages.len();
            state.contexts.clear();
            let tabs: Vec<Arc<Tab>> = state.pages.drain().map(|(_, page)| page.tab).collect();
            (contexts, pages, tabs)
        };

        close_tabs(tabs).await;

        if contexts > 0 || pages > 0 {
            info!("Closed all contexts ({}) and pages ({})", contexts, pages);
        }
    }
}

/// Close tabs off the async runtime. Close failures are logged and ignored:
/// the tab may already be gone along with its browser.
async fn close_tabs(tabs: Vec<Arc<Tab>>) {
    if tabs.is_empty() {
        return;
    }

    let result = tokio::task::spawn_blocking(move || {
        for tab in tabs {
            if let Err(e) = tab.close(false) {
                debug!("Tab close reported: {}", e);
            }
        }
    })
    .await;

    if let Err(e) = result {
        warn!("Tab close task failed: {}", e);
    }
}

/// Attach the passive console/page-error observers.
///
/// Diagnostics only: a failure here is logged and never affects page
/// creation or any later request.
fn wire_page_observers(tab: &Arc<Tab>, page_id: &str) {
    if let Err(e) = cdp::enable_page_events(tab) {
        warn!("Could not enable event domains for page {}: {}", page_id, e);
        return;
    }

    let observer_page_id = page_id.to_string();
    let listener = Arc::new(move |event: &Event| match event {
        Event::LogEntryAdded(entry) => {
            debug!(
                page_id = %observer_page_id,
                "console [{:?}]: {}",
                entry.params.entry.level,
                entry.params.entry.text
            );
        }
        Event::RuntimeExceptionThrown(exception) => {
            warn!(
                page_id = %observer_page_id,
                "page error: {}",
                exception.params.exception_details.text
            );
        }
        _ => {}
    });

    if let Err(e) = tab.add_event_listener(listener) {
        warn!("Could not attach observers for page {}: {}", page_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use periscope_common::EngineConfig;

    fn registry() -> PageRegistry {
        PageRegistry::new(Arc::new(EngineHandle::new(EngineConfig::default())))
    }

    // These tests cover the registry's bookkeeping paths that do not need a
    // live engine; creation paths are exercised end-to-end against a real
    // browser binary.

    #[tokio::test]
    async fn test_create_context_requires_engine() {
        let registry = registry();
        let err = registry
            .create_context("ctx", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::EngineNotStarted));
    }

    #[tokio::test]
    async fn test_close_unknown_context_is_not_found() {
        let registry = registry();
        let err = registry.close_context("nope").await.unwrap_err();
        assert!(matches!(err, RegistryError::ContextNotFound(_)));
    }

    #[tokio::test]
    async fn test_close_unknown_page_is_not_found() {
        let registry = registry();
        let err = registry.close_page("nope").await.unwrap_err();
        assert!(matches!(err, RegistryError::PageNotFound(_)));
    }

    #[tokio::test]
    async fn test_lookup_unknown_page_is_not_found() {
        let registry = registry();
        let err = registry.get("nope").await.unwrap_err();
        assert!(matches!(err, RegistryError::PageNotFound(_)));
        assert_eq!(registry.page_count().await, 0);
        assert_eq!(registry.context_count().await, 0);
    }
}
