//! Standalone HTML output.
//!
//! The post page is parsed, edited in place and serialized back through
//! html5ever:
//!
//! - stylesheet `<link>`s whose text was fetched become `<style>` blocks
//! - `<img>`s whose bytes were fetched get a base64 `data:` URI in `src`
//!   and lose their lazy-loading attributes; the rest are left untouched
//! - scripts, iframes and site chrome (header, login prompt, footer CTA)
//!   are dropped
//! - an attribution block is placed right after the title element

use crate::scrapers::page::{image_url, is_stylesheet_link, stylesheet_url, title_element};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use ego_tree::NodeId;
use html5ever::{Attribute, LocalName, Namespace, QualName};
use scraper::node::{Element, Text};
use scraper::{ElementRef, Html, Node, StrTendril};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

const STRIPPED_ELEMENTS: [&str; 3] = ["script", "noscript", "iframe"];
const CHROME_CLASSES: [&str; 3] = ["substack-header", "pencraft-login-form", "post-footer-cta"];
const LAZY_IMAGE_ATTRS: [&str; 4] = ["src", "srcset", "data-src", "loading"];

const ATTRIBUTION_STYLE: &str = "color: #666; font-size: 0.9em; margin-bottom: 20px; border-bottom: 1px solid #eee; padding-bottom: 10px;";

/// Encode image bytes as a `data:` URI.
///
/// The MIME label is always `image/jpeg`; browsers sniff the real format.
pub fn image_data_uri(bytes: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes))
}

/// Everything fetched for one page, keyed by absolute URL.
#[derive(Debug, Default, Clone)]
pub struct PageEdits {
    /// Stylesheet URL to CSS text.
    pub stylesheets: HashMap<String, String>,
    /// Image URL to `data:` URI.
    pub images: HashMap<String, String>,
    /// Text of the block injected after the title element.
    pub attribution: String,
}

/// One change to the parsed tree, planned while it is borrowed immutably.
enum TreeEdit {
    Detach(NodeId),
    InlineStyle { link: NodeId, css: String },
    ReplaceImage { img: NodeId, element: Element },
    Attribution { after: NodeId },
}

/// Serialize `html` (fetched from `base`) with `edits` applied.
pub fn render(html: &str, base: &Url, edits: &PageEdits) -> String {
    let mut document = Html::parse_document(html);
    let plan = plan_edits(&document, base, edits);

    for edit in plan {
        apply(&mut document, edit, edits);
    }
    document.html()
}

fn plan_edits(document: &Html, base: &Url, edits: &PageEdits) -> Vec<TreeEdit> {
    let mut plan = Vec::new();

    for el in document.tree.root().descendants().filter_map(ElementRef::wrap) {
        let element = el.value();

        if is_stripped(element) {
            plan.push(TreeEdit::Detach(el.id()));
        } else if is_removed(el) {
            continue;
        } else if is_stylesheet_link(el) {
            if let Some(css) = stylesheet_url(el, base).and_then(|url| edits.stylesheets.get(&url)) {
                plan.push(TreeEdit::InlineStyle {
                    link: el.id(),
                    css: css.clone(),
                });
            }
        } else if element.name() == "img" {
            if let Some(data_uri) = image_url(el, base).and_then(|url| edits.images.get(&url)) {
                plan.push(TreeEdit::ReplaceImage {
                    img: el.id(),
                    element: inlined_image(element, data_uri),
                });
            }
        }
    }

    if let Some((title, _)) = title_element(document).filter(|(title, _)| !is_removed(*title)) {
        plan.push(TreeEdit::Attribution { after: title.id() });
    }
    plan
}

fn is_stripped(element: &Element) -> bool {
    STRIPPED_ELEMENTS.contains(&element.name())
        || element.classes().any(|class| CHROME_CLASSES.contains(&class))
}

/// True when `el` or one of its ancestors is dropped from the output.
fn is_removed(el: ElementRef<'_>) -> bool {
    std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .any(|e| is_stripped(e.value()))
}

fn apply(document: &mut Html, edit: TreeEdit, edits: &PageEdits) {
    match edit {
        TreeEdit::Detach(id) => {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
        TreeEdit::InlineStyle { link, css } => {
            if let Some(mut node) = document.tree.get_mut(link) {
                let ns = match node.value() {
                    Node::Element(el) => el.name.ns.clone(),
                    _ => return,
                };
                node.insert_before(element(ns, "style", Vec::new()))
                    .append(text(&css));
                node.detach();
            }
        }
        TreeEdit::ReplaceImage { img, element } => {
            if let Some(mut node) = document.tree.get_mut(img) {
                *node.value() = Node::Element(element);
            }
        }
        TreeEdit::Attribution { after } => {
            if let Some(mut node) = document.tree.get_mut(after) {
                let ns = match node.value() {
                    Node::Element(el) => el.name.ns.clone(),
                    _ => return,
                };
                let style = vec![attribute("style", ATTRIBUTION_STYLE)];
                node.insert_after(element(ns, "div", style))
                    .append(text(&edits.attribution));
            }
        }
    }
}

/// Copy of an `<img>` with `src` set to `data_uri` and lazy loading removed.
///
/// Other attributes keep their qualified names.
fn inlined_image(img: &Element, data_uri: &str) -> Element {
    let mut attrs: Vec<Attribute> = img
        .attrs
        .iter()
        .filter(|(name, _)| {
            name.prefix.is_some() || !LAZY_IMAGE_ATTRS.contains(&&*name.local)
        })
        .map(|(name, value)| Attribute {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    attrs.push(attribute("src", data_uri));
    Element::new(img.name.clone(), attrs)
}

fn element(ns: Namespace, name: &str, attrs: Vec<Attribute>) -> Node {
    Node::Element(Element::new(
        QualName::new(None, ns, LocalName::from(name)),
        attrs,
    ))
}

fn attribute(name: &str, value: &str) -> Attribute {
    Attribute {
        name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
        value: StrTendril::from(value),
    }
}

fn text(content: &str) -> Node {
    Node::Text(Text {
        text: StrTendril::from(content),
    })
}

/// Write a rendered page to disk as UTF-8.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_page(path: &Path, html: &str) -> std::io::Result<()> {
    fs::write(path, html).await?;
    info!(bytes = html.len(), "Wrote archived page");
    Ok(())
}
