//! Primitive DOM-action contract
//!
//! The command interpreter treats "fill an element" and "click an element" as
//! black boxes. A provider resolves selectors against the live page and
//! reports success or failure; widget-specific input handling stays behind
//! this trait.

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    errors::ActionError,
    types::{ElementHandle, Selector},
};

/// Element interaction provider
#[async_trait]
pub trait DomActions: Send + Sync {
    /// All elements matching `selector`, in document order
    async fn find_elements(&self, selector: &Selector) -> Result<Vec<ElementHandle>, ActionError>;

    /// First element matching `selector`
    async fn find_element(&self, selector: &Selector) -> Result<Option<ElementHandle>, ActionError> {
        Ok(self.find_elements(selector).await?.into_iter().next())
    }

    /// Writes `value` into the element. `Ok(false)` means the element refused it.
    async fn fill_element(&self, element: &ElementHandle, value: &str) -> Result<bool, ActionError>;

    async fn click_element(&self, element: &ElementHandle) -> Result<bool, ActionError>;

    /// A `<button>` nested inside `element`, if any
    async fn nested_button(&self, element: &ElementHandle)
        -> Result<Option<ElementHandle>, ActionError>;

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), ActionError>;

    async fn highlight(&self, element: &ElementHandle) -> Result<(), ActionError>;

    /// Rendered and not hidden
    async fn is_visible(&self, element: &ElementHandle) -> Result<bool, ActionError>;

    /// Form value if the element has one, otherwise its text content
    async fn read_value(&self, element: &ElementHandle) -> Result<String, ActionError>;

    async fn current_url(&self) -> Result<String, ActionError>;

    /// Starts a navigation. The calling page context may be destroyed before
    /// the returned future resolves.
    async fn navigate(&self, url: &str) -> Result<(), ActionError>;
}

#[async_trait]
impl<D> DomActions for Arc<D>
where
    D: DomActions + ?Sized,
{
    async fn find_elements(&self, selector: &Selector) -> Result<Vec<ElementHandle>, ActionError> {
        (**self).find_elements(selector).await
    }

    async fn find_element(&self, selector: &Selector) -> Result<Option<ElementHandle>, ActionError> {
        (**self).find_element(selector).await
    }

    async fn fill_element(&self, element: &ElementHandle, value: &str) -> Result<bool, ActionError> {
        (**self).fill_element(element, value).await
    }

    async fn click_element(&self, element: &ElementHandle) -> Result<bool, ActionError> {
        (**self).click_element(element).await
    }

    async fn nested_button(
        &self,
        element: &ElementHandle,
    ) -> Result<Option<ElementHandle>, ActionError> {
        (**self).nested_button(element).await
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), ActionError> {
        (**self).scroll_into_view(element).await
    }

    async fn highlight(&self, element: &ElementHandle) -> Result<(), ActionError> {
        (**self).highlight(element).await
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool, ActionError> {
        (**self).is_visible(element).await
    }

    async fn read_value(&self, element: &ElementHandle) -> Result<String, ActionError> {
        (**self).read_value(element).await
    }

    async fn current_url(&self) -> Result<String, ActionError> {
        (**self).current_url().await
    }

    async fn navigate(&self, url: &str) -> Result<(), ActionError> {
        (**self).navigate(url).await
    }
}
