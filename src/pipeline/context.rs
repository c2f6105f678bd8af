//! Expansion context: the data a template is expanded against.
//!
//! Templates see two top-level names: `data` (the request placeholders) and
//! `products` (each request item plus `image_abs`, the absolute path of its
//! image or `null`). Images are embedded through [`ExpansionContext::inline_image`],
//! which yields [`InlineImage::Empty`] for missing files so a template can
//! always call it unconditionally.

use crate::error::{Missing, RenderError};
use crate::pipeline::input::validate_component;
use crate::request::{ProductItem, RenderRequest};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Width used by `inline_image` when the template does not pass one.
pub const DEFAULT_IMAGE_WIDTH_MM: u32 = 120;

/// A request product with its image resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductContext {
    #[serde(flatten)]
    pub item: ProductItem,
    /// Absolute image path, or None if the file does not exist.
    pub image_abs: Option<PathBuf>,
}

/// An image reference a template engine can embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InlineImage {
    Image { path: PathBuf, width_mm: u32 },
    /// Renders as nothing.
    Empty,
}

/// Everything a [`crate::pipeline::TemplateExpander`] needs besides the
/// template itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpansionContext {
    pub data: Map<String, Value>,
    pub products: Vec<ProductContext>,
    /// Default width for `inline_image`; serialized so external engines
    /// can size images the same way.
    pub inline_image_width_mm: u32,
}

impl ExpansionContext {
    /// Build the context for `request`, resolving product images under
    /// `products_root`.
    ///
    /// # Errors
    /// [`RenderError::NotFound`] when a product folder does not exist,
    /// [`RenderError::InvalidRequest`] for a product id or image name that is
    /// not a plain file name.
    pub fn build(request: &RenderRequest, products_root: &Path) -> Result<Self, RenderError> {
        let products = request
            .products
            .iter()
            .map(|item| resolve_product(item, products_root))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            data: request.placeholders.clone(),
            products,
            inline_image_width_mm: DEFAULT_IMAGE_WIDTH_MM,
        })
    }

    /// Embeddable reference to `path`, or [`InlineImage::Empty`] when the
    /// path is absent or does not name an existing file.
    pub fn inline_image(&self, path: Option<&Path>, width_mm: Option<u32>) -> InlineImage {
        match path {
            Some(p) if p.is_file() => InlineImage::Image {
                path: p.to_path_buf(),
                width_mm: width_mm.unwrap_or(self.inline_image_width_mm),
            },
            _ => InlineImage::Empty,
        }
    }

    /// Serialize for an out-of-process template engine.
    pub fn to_json(&self) -> Result<Vec<u8>, RenderError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| RenderError::Internal(format!("Cannot serialize context: {e}")))
    }
}

fn resolve_product(item: &ProductItem, products_root: &Path) -> Result<ProductContext, RenderError> {
    validate_component("Product id", &item.product_id)?;
    validate_component("Product image", &item.image)?;

    let dir = products_root.join(&item.product_id);
    if !dir.is_dir() {
        return Err(RenderError::NotFound {
            what: Missing::ProductFolder,
            path: dir,
        });
    }

    let image = dir.join(&item.image);
    let image_abs = if image.is_file() {
        Some(std::path::absolute(&image).unwrap_or(image))
    } else {
        warn!(
            "Product '{}' has no image '{}'",
            item.product_id, item.image
        );
        None
    };
    debug!("Product '{}' image: {:?}", item.product_id, image_abs);

    Ok(ProductContext {
        item: item.clone(),
        image_abs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn request(products: Vec<ProductItem>) -> RenderRequest {
        let mut req = RenderRequest::new("t");
        req.placeholders.insert("client".into(), json!("ACME"));
        req.products = products;
        req
    }

    #[test]
    fn products_get_absolute_image_paths() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("p1")).unwrap();
        fs::write(root.path().join("p1/cover.jpg"), b"jpg").unwrap();
        fs::create_dir(root.path().join("p2")).unwrap();

        let ctx = ExpansionContext::build(
            &request(vec![ProductItem::new("p1"), ProductItem::new("p2")]),
            root.path(),
        )
        .unwrap();

        let img = ctx.products[0].image_abs.as_ref().unwrap();
        assert!(img.is_absolute());
        assert!(img.ends_with("p1/cover.jpg"));
        assert_eq!(ctx.products[1].image_abs, None);
        assert_eq!(ctx.data["client"], json!("ACME"));
    }

    #[test]
    fn missing_product_folder_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let err = ExpansionContext::build(&request(vec![ProductItem::new("ghost")]), root.path())
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::NotFound {
                what: Missing::ProductFolder,
                ..
            }
        ));
    }

    #[test]
    fn traversal_in_product_fields_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut item = ProductItem::new("ok");
        item.image = "../../secret.jpg".into();
        fs::create_dir(root.path().join("ok")).unwrap();
        assert!(matches!(
            ExpansionContext::build(&request(vec![item]), root.path()).unwrap_err(),
            RenderError::InvalidRequest(_)
        ));
    }

    #[test]
    fn inline_image_resolves_or_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let img = root.path().join("a.jpg");
        fs::write(&img, b"jpg").unwrap();
        let ctx = ExpansionContext::build(&request(vec![]), root.path()).unwrap();

        assert_eq!(
            ctx.inline_image(Some(&img), None),
            InlineImage::Image {
                path: img.clone(),
                width_mm: 120
            }
        );
        assert_eq!(
            ctx.inline_image(Some(&img), Some(60)),
            InlineImage::Image {
                path: img,
                width_mm: 60
            }
        );
        assert_eq!(ctx.inline_image(Some(&root.path().join("no.jpg")), None), InlineImage::Empty);
        assert_eq!(ctx.inline_image(None, None), InlineImage::Empty);
    }

    #[test]
    fn serialized_shape() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("p1")).unwrap();
        let ctx = ExpansionContext::build(&request(vec![ProductItem::new("p1")]), root.path())
            .unwrap();
        let v: Value = serde_json::from_slice(&ctx.to_json().unwrap()).unwrap();
        assert_eq!(v["data"]["client"], json!("ACME"));
        assert_eq!(v["products"][0]["product_id"], json!("p1"));
        assert_eq!(v["products"][0]["slot"], json!("main"));
        assert_eq!(v["products"][0]["image_abs"], Value::Null);
        assert_eq!(v["inline_image_width_mm"], json!(120));
    }
}
