//! Render request types.
//!
//! These mirror the JSON body accepted by the rendering service, so they
//! deserialize with the same defaults: a product without `image` uses
//! `cover.jpg`, a request without `return_mode` gets a zip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// Template folder name under the templates root.
    pub template: String,

    /// Values exposed to the template as `data`.
    #[serde(default)]
    pub placeholders: Map<String, Value>,

    /// Products exposed to the template as `products`.
    #[serde(default)]
    pub products: Vec<ProductItem>,

    #[serde(default)]
    pub return_mode: ReturnMode,
}

impl RenderRequest {
    /// A request for `template` with no data and the default return mode.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            placeholders: Map::new(),
            products: Vec::new(),
            return_mode: ReturnMode::default(),
        }
    }
}

/// A product to place in the offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductItem {
    /// Folder name under the products root.
    pub product_id: String,

    /// Page the product should appear on. Default: 1.
    #[serde(default = "default_page")]
    pub page: u32,

    /// Position on the page (`hero`, `main`, `grid_1`, …). Default: `main`.
    #[serde(default = "default_slot")]
    pub slot: String,

    #[serde(default)]
    pub sequence: Option<u32>,

    /// Image file inside the product folder. Default: `cover.jpg`.
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ProductItem {
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            page: default_page(),
            slot: default_slot(),
            sequence: None,
            image: default_image(),
            data: Map::new(),
        }
    }
}

fn default_page() -> u32 {
    1
}

fn default_slot() -> String {
    "main".to_string()
}

fn default_image() -> String {
    "cover.jpg".to_string()
}

/// Shape of the render result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMode {
    /// The first page as a single JPEG.
    FirstPageInline,
    /// Every page in one zip archive. (default)
    #[default]
    Zip,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_request_gets_defaults() {
        let req: RenderRequest = serde_json::from_value(json!({
            "template": "wolftax",
            "products": [{ "product_id": "p-17" }]
        }))
        .unwrap();
        assert_eq!(req.return_mode, ReturnMode::Zip);
        assert!(req.placeholders.is_empty());
        let p = &req.products[0];
        assert_eq!(p.page, 1);
        assert_eq!(p.slot, "main");
        assert_eq!(p.image, "cover.jpg");
        assert_eq!(p.sequence, None);
        assert_eq!(*p, ProductItem::new("p-17"));
    }

    #[test]
    fn return_mode_names() {
        let req: RenderRequest = serde_json::from_value(json!({
            "template": "t",
            "return_mode": "first_page_inline"
        }))
        .unwrap();
        assert_eq!(req.return_mode, ReturnMode::FirstPageInline);
        assert!(serde_json::from_value::<RenderRequest>(json!({
            "template": "t",
            "return_mode": "pdf"
        }))
        .is_err());
    }

    #[test]
    fn missing_template_is_rejected() {
        assert!(serde_json::from_value::<RenderRequest>(json!({ "placeholders": {} })).is_err());
    }
}
