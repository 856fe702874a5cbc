//! In-memory page model
//!
//! A scripted stand-in for a browser tab: a set of pages keyed by URL, each
//! holding the elements that exist once it has loaded. Used by the CLI
//! replay and by tests across the workspace.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    errors::ActionError,
    primitives::DomActions,
    types::{ElementHandle, PageEvent, Selector},
};

fn default_true() -> bool {
    true
}

/// Static description of one element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSpec {
    pub xpath: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    /// Initial value or text content
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Refuses fills and clicks
    #[serde(default)]
    pub disabled: bool,
    /// Contains a nested `<button>`
    #[serde(default)]
    pub has_button: bool,
    /// Appears this long after the page finished loading
    #[serde(default)]
    pub appear_after_ms: Option<u64>,
    /// Clicking navigates here
    #[serde(default)]
    pub navigates_to: Option<String>,
}

impl ElementSpec {
    pub fn xpath(xpath: impl Into<String>) -> Self {
        Self {
            xpath: xpath.into(),
            visible: true,
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn with_button(mut self) -> Self {
        self.has_button = true;
        self
    }

    pub fn appearing_after(mut self, delay: Duration) -> Self {
        self.appear_after_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn navigating_to(mut self, url: impl Into<String>) -> Self {
        self.navigates_to = Some(url.into());
        self
    }

    fn matches(&self, selector: &Selector) -> bool {
        match selector {
            Selector::XPath(expr) => self.xpath.trim() == expr.trim(),
            Selector::Css(css) => {
                if let Some(id) = css.strip_prefix('#') {
                    return self.id.as_deref() == Some(id);
                }
                match css
                    .strip_prefix("input[name=\"")
                    .and_then(|rest| rest.strip_suffix("\"]"))
                {
                    Some(name) => self.name.as_deref() == Some(name),
                    None => false,
                }
            }
        }
    }
}

/// Serializable page set loaded by the CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFixture {
    pub start_url: String,
    /// URL (without query or fragment) -> elements present on that page
    #[serde(default)]
    pub pages: BTreeMap<String, Vec<ElementSpec>>,
}

impl PageFixture {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            pages: BTreeMap::new(),
        }
    }

    pub fn page(mut self, url: impl Into<String>, elements: Vec<ElementSpec>) -> Self {
        self.pages.insert(url.into(), elements);
        self
    }
}

/// Recorded interaction, for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Fill { xpath: String, value: String },
    Click { xpath: String },
    Navigate { url: String },
}

struct LiveElement {
    id: u64,
    spec: ElementSpec,
    value: String,
}

struct PageState {
    url: String,
    loaded_at: Instant,
    elements: Vec<LiveElement>,
    next_id: u64,
    interactions: Vec<Interaction>,
}

/// Scripted tab implementing [`DomActions`]
pub struct InMemoryPage {
    fixture: Arc<PageFixture>,
    load_delay: Duration,
    state: Arc<Mutex<PageState>>,
    events: broadcast::Sender<PageEvent>,
}

impl InMemoryPage {
    pub fn new(fixture: PageFixture) -> Self {
        let (events, _) = broadcast::channel(64);
        let url = fixture.start_url.clone();
        let mut state = PageState {
            url: url.clone(),
            loaded_at: Instant::now(),
            elements: Vec::new(),
            next_id: 1,
            interactions: Vec::new(),
        };
        Self::load_elements(&fixture, &mut state, &url);
        Self {
            fixture: Arc::new(fixture),
            load_delay: Duration::from_millis(50),
            state: Arc::new(Mutex::new(state)),
            events,
        }
    }

    /// Time between a navigation starting and the new page reporting complete.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    pub fn interactions(&self) -> Vec<Interaction> {
        self.state.lock().interactions.clone()
    }

    /// Values written by fills, keyed by element xpath
    pub fn filled_values(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .interactions
            .iter()
            .filter_map(|i| match i {
                Interaction::Fill { xpath, value } => Some((xpath.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    /// Adds an element to the current page at runtime.
    pub fn insert_element(&self, spec: ElementSpec) {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let value = spec.text.clone();
        state.elements.push(LiveElement { id, spec, value });
    }

    pub fn remove_element(&self, xpath: &str) {
        self.state
            .lock()
            .elements
            .retain(|e| e.spec.xpath.trim() != xpath.trim());
    }

    fn page_key(url: &str) -> &str {
        let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
        &url[..end]
    }

    fn load_elements(fixture: &PageFixture, state: &mut PageState, url: &str) {
        let specs = fixture
            .pages
            .get(url)
            .or_else(|| fixture.pages.get(Self::page_key(url)))
            .cloned()
            .unwrap_or_default();
        state.elements.clear();
        for spec in specs {
            let id = state.next_id;
            state.next_id += 1;
            let value = spec.text.clone();
            state.elements.push(LiveElement { id, spec, value });
        }
        state.loaded_at = Instant::now();
    }

    fn is_present(spec: &ElementSpec, loaded_at: Instant) -> bool {
        match spec.appear_after_ms {
            Some(ms) => loaded_at
                .checked_add(Duration::from_millis(ms))
                .map_or(false, |at| Instant::now() >= at),
            None => true,
        }
    }

    fn with_element<T>(
        &self,
        element: &ElementHandle,
        f: impl FnOnce(&mut LiveElement, &mut Vec<Interaction>) -> T,
    ) -> Result<T, ActionError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let loaded_at = state.loaded_at;
        let live = state
            .elements
            .iter_mut()
            .find(|e| e.id == element.id && Self::is_present(&e.spec, loaded_at))
            .ok_or_else(|| {
                ActionError::ElementNotFound(format!("stale element {}", element.selector))
            })?;
        Ok(f(live, &mut state.interactions))
    }

    fn begin_navigation(&self, url: &str) {
        {
            let mut state = self.state.lock();
            state.interactions.push(Interaction::Navigate {
                url: url.to_string(),
            });
            // The old document is gone as soon as unloading starts.
            state.elements.clear();
            state.url = url.to_string();
        }
        info!(url, "page navigation started");
        let _ = self.events.send(PageEvent::Loading {
            url: url.to_string(),
        });
    }

    fn complete_navigation(
        fixture: &PageFixture,
        state: &Mutex<PageState>,
        events: &broadcast::Sender<PageEvent>,
        url: &str,
    ) {
        {
            let mut state = state.lock();
            if state.url != url {
                // superseded by a later navigation
                return;
            }
            Self::load_elements(fixture, &mut state, url);
        }
        debug!(url, "page load complete");
        let _ = events.send(PageEvent::Complete {
            url: url.to_string(),
        });
    }
}

#[async_trait]
impl DomActions for InMemoryPage {
    async fn find_elements(&self, selector: &Selector) -> Result<Vec<ElementHandle>, ActionError> {
        let state = self.state.lock();
        Ok(state
            .elements
            .iter()
            .filter(|e| e.spec.matches(selector) && Self::is_present(&e.spec, state.loaded_at))
            .map(|e| ElementHandle {
                id: e.id,
                selector: selector.clone(),
            })
            .collect())
    }

    async fn fill_element(&self, element: &ElementHandle, value: &str) -> Result<bool, ActionError> {
        self.with_element(element, |live, log| {
            if live.spec.disabled {
                return false;
            }
            live.value = value.to_string();
            log.push(Interaction::Fill {
                xpath: live.spec.xpath.clone(),
                value: value.to_string(),
            });
            true
        })
    }

    async fn click_element(&self, element: &ElementHandle) -> Result<bool, ActionError> {
        let outcome = self.with_element(element, |live, log| {
            if live.spec.disabled {
                return (false, None);
            }
            log.push(Interaction::Click {
                xpath: live.spec.xpath.clone(),
            });
            (true, live.spec.navigates_to.clone())
        })?;
        if let (true, Some(url)) = &outcome {
            self.navigate(url).await?;
        }
        Ok(outcome.0)
    }

    async fn nested_button(
        &self,
        element: &ElementHandle,
    ) -> Result<Option<ElementHandle>, ActionError> {
        self.with_element(element, |live, _| {
            live.spec.has_button.then(|| ElementHandle {
                id: live.id,
                selector: Selector::xpath(format!("{}//button", live.spec.xpath)),
            })
        })
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), ActionError> {
        self.with_element(element, |_, _| ())
    }

    async fn highlight(&self, element: &ElementHandle) -> Result<(), ActionError> {
        self.with_element(element, |_, _| ())
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool, ActionError> {
        self.with_element(element, |live, _| live.spec.visible)
    }

    async fn read_value(&self, element: &ElementHandle) -> Result<String, ActionError> {
        self.with_element(element, |live, _| live.value.clone())
    }

    async fn current_url(&self) -> Result<String, ActionError> {
        Ok(self.state.lock().url.clone())
    }

    async fn navigate(&self, url: &str) -> Result<(), ActionError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ActionError::InvalidUrl("empty URL".to_string()));
        }
        self.begin_navigation(url);

        // The load finishes on its own even if the caller's context is torn down.
        let fixture = Arc::clone(&self.fixture);
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let delay = self.load_delay;
        let url = url.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::complete_navigation(&fixture, &state, &events, &url);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> PageFixture {
        PageFixture::new("https://app.test/form")
            .page(
                "https://app.test/form",
                vec![
                    ElementSpec::xpath("//input[@id='name']").with_name("name").with_id("name"),
                    ElementSpec::xpath("//span[@id='total']").with_text("42.50"),
                    ElementSpec::xpath("//input[@id='locked']").disabled(),
                    ElementSpec::xpath("//div[@id='late']")
                        .appearing_after(Duration::from_millis(500)),
                ],
            )
            .page("https://app.test/done", vec![ElementSpec::xpath("//h1")])
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_xpath_name_and_id() {
        let page = InMemoryPage::new(fixture());
        for selector in [
            Selector::xpath("//input[@id='name']"),
            Selector::input_name("name"),
            Selector::id("name"),
        ] {
            assert_eq!(page.find_elements(&selector).await.unwrap().len(), 1, "{}", selector);
        }
        assert!(page
            .find_element(&Selector::id("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fill_click_and_read() {
        let page = InMemoryPage::new(fixture());
        let input = page
            .find_element(&Selector::xpath("//input[@id='name']"))
            .await
            .unwrap()
            .unwrap();
        assert!(page.fill_element(&input, "Alice").await.unwrap());
        assert_eq!(page.read_value(&input).await.unwrap(), "Alice");

        let locked = page
            .find_element(&Selector::xpath("//input[@id='locked']"))
            .await
            .unwrap()
            .unwrap();
        assert!(!page.fill_element(&locked, "x").await.unwrap());
        assert!(!page.click_element(&locked).await.unwrap());
        assert_eq!(
            page.filled_values().get("//input[@id='name']").map(String::as_str),
            Some("Alice")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_elements_appear() {
        let page = InMemoryPage::new(fixture());
        let late = Selector::xpath("//div[@id='late']");
        assert!(page.find_element(&late).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(page.find_element(&late).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_emits_events_and_swaps_elements() {
        let page = InMemoryPage::new(fixture());
        let mut events = page.subscribe();
        page.navigate("https://app.test/done?ok=1").await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            PageEvent::Loading {
                url: "https://app.test/done?ok=1".into()
            }
        );
        assert!(matches!(events.recv().await.unwrap(), PageEvent::Complete { .. }));
        assert!(page
            .find_element(&Selector::xpath("//input[@id='name']"))
            .await
            .unwrap()
            .is_none());
        assert!(page.find_element(&Selector::xpath("//h1")).await.unwrap().is_some());
        assert!(page.navigate("  ").await.is_err());
    }
}
