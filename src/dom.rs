//! JavaScript evaluated inside the page.
//!
//! Every script is read-only except [`fill_js`] and [`scroll_js`], and every
//! script that returns structured data returns it as a JSON string so the
//! value survives the CDP round trip unchanged.

use serde::de::DeserializeOwned;

use crate::error::AgentError;
use crate::types::MAX_TEXT_CHARS;

/// Walks the visible DOM in document order and reports interactive or
/// text-bearing nodes with their computed role and accessible name.
///
/// The walk:
///   1. Skips script, style, noscript, svg and link subtrees.
///   2. Stops descending past depth 25.
///   3. Keeps interactive elements (links, buttons, form controls, anything
///      with a role or tabindex) and leaf nodes carrying text.
///   4. Stops after `__LIMIT__` nodes.
const AX_TREE_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK','META','TEMPLATE']);
  const INTERACTIVE = new Set(['a','button','input','textarea','select','summary']);
  const IMPLICIT = {a:'link', button:'button', input:'textbox', textarea:'textbox',
    select:'combobox', img:'img', nav:'navigation', main:'main', header:'banner',
    footer:'contentinfo', form:'form', h1:'heading', h2:'heading', h3:'heading'};
  const LIMIT = __LIMIT__;
  const MAX_TEXT = __MAX_TEXT__;
  const out = [];

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && getComputedStyle(el).position !== 'fixed') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function nameOf(el) {
    const aria = el.getAttribute('aria-label');
    if (aria) return aria.trim();
    if (el.tagName === 'IMG') return (el.alt || '').trim();
    if (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA') {
      return (el.placeholder || el.value || el.name || '').trim();
    }
    return (el.innerText || el.textContent || '').trim().replace(/\s+/g, ' ');
  }

  function walk(node, depth) {
    if (depth > 25 || out.length >= LIMIT) return;
    for (const child of node.children) {
      if (out.length >= LIMIT) return;
      if (SKIP.has(child.tagName)) continue;
      const tag = child.tagName.toLowerCase();
      const role = child.getAttribute('role') || IMPLICIT[tag] || null;
      const interactive = INTERACTIVE.has(tag) || child.hasAttribute('tabindex')
        || child.getAttribute('role') !== null;
      const leafText = child.children.length === 0 && (child.textContent || '').trim().length > 2;
      if (interactive || leafText || tag === 'img') {
        out.push({
          tag,
          role,
          name: nameOf(child).slice(0, MAX_TEXT),
          id: child.id || null,
          name_attr: child.getAttribute('name'),
          aria_label: child.getAttribute('aria-label'),
          classes: Array.from(child.classList).slice(0, 3),
          visible: isVisible(child),
          interactive,
        });
      }
      walk(child, depth + 1);
    }
  }

  if (document.body) walk(document.body, 0);
  return JSON.stringify(out);
})()
"#;

/// Reads each matched element into a record. Product-card fields (name,
/// price, link) are filled when recognizable. Sponsored cards are dropped
/// before the limit applies.
const EXTRACT_JS: &str = r#"
(() => {
  const PRICE = /[$€£¥]\s?\d[\d,]*(?:\.\d{1,2})?|\d[\d,]*\.\d{2}/;
  const SPONSORED = __SPONSORED__;
  const sponsored = (el) => SPONSORED.some((sel) => el.matches(sel) || el.querySelector(sel));
  const nodes = Array.from(document.querySelectorAll(__SELECTOR__))
    .filter((el) => !sponsored(el))
    .slice(0, __LIMIT__);
  const text = (el) => el ? (el.innerText || el.textContent || '').trim().replace(/\s+/g, ' ') : '';
  return JSON.stringify(nodes.map((el) => {
    const titleEl = el.querySelector('h2 a span, h2 span, h2, h3, [data-title], .a-text-normal');
    const offscreen = el.querySelector('.a-price .a-offscreen');
    let price = offscreen ? text(offscreen) : null;
    if (!price) {
      const whole = text(el.querySelector('.a-price-whole')).replace(/[.,]$/, '');
      const frac = text(el.querySelector('.a-price-fraction')) || '00';
      if (whole) price = whole + '.' + frac;
    }
    if (!price) {
      const m = text(el).match(PRICE);
      price = m ? m[0] : null;
    }
    const link = el.tagName === 'A' ? el : el.querySelector('a[href]');
    const attributes = {};
    for (const attr of Array.from(el.attributes).slice(0, 8)) {
      attributes[attr.name] = attr.value.slice(0, 200);
    }
    return {
      text: text(el).slice(0, 2000),
      name: titleEl ? text(titleEl) : null,
      price,
      url: link ? link.href : null,
      attributes,
    };
  }));
})()
"#;

/// Marks an ad inside a result card.
pub const SPONSORED_MARKERS: &[&str] = &[
    "[aria-label='Sponsored']",
    ".s-sponsored-label-text",
    ".puis-sponsored-label-text",
];

/// Lowercase page fragments that identify a bot check instead of content.
pub const BLOCK_MARKERS: &[&str] = &[
    "/errors/validatecaptcha",
    "enter the characters you see",
    "robot check",
    "captcha",
];

const BLOCK_MARKER_JS: &str = r#"
(() => {
  const html = document.documentElement ? document.documentElement.outerHTML.toLowerCase() : '';
  return __MARKERS__.find((m) => html.includes(m)) || null;
})()
"#;

const FILL_JS: &str = r#"
(() => {
  const el = document.querySelector(__SELECTOR__);
  if (!el) return false;
  el.focus();
  el.value = __VALUE__;
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
})()
"#;

const SCROLL_ELEMENT_JS: &str = r#"
(() => {
  const el = document.querySelector(__SELECTOR__);
  if (!el) return false;
  el.scrollIntoView({ block: 'center' });
  return true;
})()
"#;

const SCROLL_PAGE_JS: &str = "(() => { window.scrollBy(0, window.innerHeight); return true; })()";

/// Render a Rust string as a JavaScript string literal.
fn js_string(raw: &str) -> String {
    serde_json::Value::String(raw.to_string()).to_string()
}

pub fn accessibility_tree_js(limit: usize) -> String {
    AX_TREE_JS
        .replace("__LIMIT__", &limit.to_string())
        .replace("__MAX_TEXT__", &MAX_TEXT_CHARS.to_string())
}

pub fn query_js(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_string(selector))
}

pub fn extract_js(selector: &str, limit: usize) -> String {
    EXTRACT_JS
        .replace("__SPONSORED__", &serde_json::json!(SPONSORED_MARKERS).to_string())
        .replace("__SELECTOR__", &js_string(selector))
        .replace("__LIMIT__", &limit.to_string())
}

pub fn block_marker_js() -> String {
    BLOCK_MARKER_JS.replace("__MARKERS__", &serde_json::json!(BLOCK_MARKERS).to_string())
}

pub fn fill_js(selector: &str, value: &str) -> String {
    FILL_JS
        .replace("__SELECTOR__", &js_string(selector))
        .replace("__VALUE__", &js_string(value))
}

pub fn scroll_js(selector: Option<&str>) -> String {
    match selector {
        Some(selector) => SCROLL_ELEMENT_JS.replace("__SELECTOR__", &js_string(selector)),
        None => SCROLL_PAGE_JS.to_string(),
    }
}

/// Decode a script result that was returned as a JSON string.
pub fn decode_json<T: DeserializeOwned>(value: Option<serde_json::Value>) -> Result<T, AgentError> {
    let raw = value
        .as_ref()
        .and_then(|v| v.as_str())
        .ok_or_else(|| AgentError::Browser("script returned no JSON string".into()))?;
    serde_json::from_str(raw).map_err(|e| AgentError::Browser(format!("bad script result: {e}")))
}

pub fn decode_bool(value: Option<serde_json::Value>) -> bool {
    value.and_then(|v| v.as_bool()).unwrap_or(false)
}
