#![doc = include_str!("../README.md")]

use lol_html::{
    ElementContentHandlers, HandlerResult, HtmlRewriter, Selector, Settings,
    errors::{RewritingError, SelectorError},
    html_content::{ContentType, Element},
};
use std::{borrow::Cow, cell::Cell, str::FromStr};
use thiserror::Error;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Rewriting is aborted through a content handler "error" once the scan has
/// seen what it came for; swallow that marker and surface everything else
macro_rules! swallow_halt {
    ($error_expr:expr) => {{
        match { $error_expr } {
            Err(::lol_html::errors::RewritingError::ContentHandlerError(..)) => return Ok(true),
            other => other,
        }
    }};
}

#[derive(Debug, Error)]
#[error("stop signal for the lol_html machinery")]
struct Halt;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),

    #[error(transparent)]
    RewriteError(#[from] RewritingError),
}

#[inline]
fn assert_handler<F>(uwu: F) -> F
where
    F: FnMut(&mut Element<'_, '_>) -> HandlerResult,
{
    uwu
}

#[inline]
fn assert_sink<F>(uwu: F) -> F
where
    F: FnMut(&[u8]),
{
    uwu
}

/// Escape a value for use inside a double-quoted attribute
fn escape_attribute(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '"']) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '"' => escaped.push_str("&quot;"),
            ch => escaped.push(ch),
        }
    }

    Cow::Owned(escaped)
}

/// Check whether the query string of `href` already carries a parameter
/// named `field`
fn query_has_field(href: &str, field: &str) -> bool {
    let Some((_, query)) = href.split_once('?') else {
        return false;
    };

    query
        .split('&')
        .any(|pair| pair.split('=').next() == Some(field))
}

pub struct Injector {
    field_name: String,
    form_selector: Selector,
    stale_field_selector: Selector,
    link_selector: Selector,
}

impl Injector {
    /// Compile the selectors for a hidden field called `field_name` and for
    /// anchors carrying `data-module="<link_marker>"`
    pub fn new(field_name: &str, link_marker: &str) -> Result<Self> {
        Ok(Self {
            field_name: field_name.to_string(),
            form_selector: Selector::from_str("form[method=\"post\" i]")?,
            stale_field_selector: Selector::from_str(&format!(
                "form[method=\"post\" i] input[name=\"{field_name}\"][type=\"hidden\"]",
            ))?,
            link_selector: Selector::from_str(&format!("a[data-module=\"{link_marker}\"]"))?,
        })
    }

    /// Whether the document contains anything `inject` would touch
    ///
    /// Bails out of the parse at the first hit
    pub fn contains_targets<I>(&self, input: I) -> Result<bool>
    where
        I: AsRef<[u8]>,
    {
        let found = Cell::new(false);

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    (
                        Cow::Borrowed(&self.form_selector),
                        ElementContentHandlers::default().element(assert_handler(
                            |_el: &mut Element<'_, '_>| {
                                found.set(true);
                                Err(Box::new(Halt))
                            },
                        )),
                    ),
                    (
                        Cow::Borrowed(&self.link_selector),
                        ElementContentHandlers::default().element(assert_handler(
                            |_el: &mut Element<'_, '_>| {
                                found.set(true);
                                Err(Box::new(Halt))
                            },
                        )),
                    ),
                ],
                ..Settings::new()
            },
            assert_sink(|_| {}),
        );

        swallow_halt!(rewriter.write(input.as_ref()))?;
        swallow_halt!(rewriter.end())?;

        Ok(found.get())
    }

    /// Stamp `value` into the document
    ///
    /// POST forms get a hidden input named after the configured field
    /// directly after their opening tag; any hidden input of that name left
    /// over from an earlier pass is dropped first, so running the stamp over
    /// its own output converges. Confirmation anchors get the value appended
    /// to their `href` query string unless one of its parameters already has
    /// the field's name.
    pub fn inject(&self, input: &str, value: &str) -> Result<String> {
        let hidden_field = format!(
            "<input type=\"hidden\" name=\"{}\" value=\"{}\"/>",
            self.field_name,
            escape_attribute(value),
        );

        let mut output = Vec::with_capacity(input.len() + hidden_field.len());
        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    (
                        Cow::Borrowed(&self.stale_field_selector),
                        ElementContentHandlers::default().element(assert_handler(
                            |el: &mut Element<'_, '_>| {
                                el.remove();
                                Ok(())
                            },
                        )),
                    ),
                    (
                        Cow::Borrowed(&self.form_selector),
                        ElementContentHandlers::default().element(assert_handler(
                            |el: &mut Element<'_, '_>| {
                                el.prepend(&hidden_field, ContentType::Html);
                                Ok(())
                            },
                        )),
                    ),
                    (
                        Cow::Borrowed(&self.link_selector),
                        ElementContentHandlers::default().element(assert_handler(
                            |el: &mut Element<'_, '_>| {
                                let Some(href) = el.get_attribute("href") else {
                                    return Ok(());
                                };

                                if query_has_field(&href, &self.field_name) {
                                    return Ok(());
                                }

                                let separator = if href.contains('?') { '&' } else { '?' };
                                let href =
                                    format!("{href}{separator}{}={value}", self.field_name);
                                el.set_attribute("href", &href)?;

                                Ok(())
                            },
                        )),
                    ),
                ],
                ..Settings::new()
            },
            assert_sink(|chunk: &[u8]| output.extend_from_slice(chunk)),
        );

        rewriter.write(input.as_bytes())?;
        rewriter.end()?;

        Ok(String::from_utf8(output).expect("[Bug] Rewriter emitted invalid UTF-8"))
    }
}
