//! Element handles over whichever document model a backend produces.
//!
//! Query paths are CSS selectors. Relative queries match descendants of
//! the element they are issued from. An element can be *absent* (a query
//! that found nothing); every read on an absent element yields `None` or
//! an empty list rather than an error.

pub mod html;

use crate::convert;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use self::html::{HtmlDocument, HtmlElement};

#[async_trait]
pub trait Element: Sized + Send + Sync {
    /// Attribute value, trimmed.
    async fn attribute(&self, name: &str) -> Option<String>;

    /// Text of the node, trimmed. What counts as text is backend-specific.
    async fn text(&self) -> Option<String>;

    /// Outer markup of the node.
    async fn html(&self) -> Option<String>;

    async fn query_all(&self, path: &str) -> Vec<Self>;

    /// First match, or an absent element.
    async fn query_single(&self, path: &str) -> Self;

    fn is_absent(&self) -> bool;

    async fn attribute_as(&self, name: &str, tag: &str, args: &[&str]) -> Result<Value> {
        let raw = self.attribute(name).await;
        convert::convert_opt(raw.as_deref(), tag, args)
    }

    async fn text_as(&self, tag: &str, args: &[&str]) -> Result<Value> {
        let raw = self.text().await;
        convert::convert_opt(raw.as_deref(), tag, args)
    }
}
