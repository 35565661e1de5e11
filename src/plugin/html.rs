//! Built-in HTML support (`tape-html`).
//!
//! Transform registers every local file referenced from a known tag
//! attribute and lifts `<style>` and inline `<script>` bodies out as embedded
//! assets. Each lifted block's open tag is marked with `data-tape-id` so
//! package can put the processed content back and drop the marker.
//!
//! Scanning is lexical: tags are matched with regexes, comments are skipped
//! and raw text elements are jumped over, which is all reference discovery
//! needs. No tree is built.

use std::ops::Range;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use enumset::EnumSet;
use regex::Regex;
use serde::Deserialize;

use super::edits::TextEdits;
use super::registry::PluginLoader;
use super::{Asset, PackageContext, Plugin, Stage, TransformContext, Transformed};
use crate::identity::AssetId;
use crate::reporter::Diagnostic;
use crate::utils::path::local_path_range;

pub const NAME: &str = "tape-html";
const TAPE_ID_ATTR: &str = "data-tape-id";

/// Attributes that may reference a file, per tag.
const TAG_ATTRS: &[(&str, &[&str])] = &[
    ("script", &["src", "href", "xlink:href"]),
    ("img", &["src", "srcset"]),
    ("audio", &["src"]),
    ("video", &["src", "poster"]),
    ("source", &["src", "srcset"]),
    ("track", &["src"]),
    ("iframe", &["src"]),
    ("embed", &["src"]),
    ("amp-img", &["src"]),
    ("link", &["href", "imagesrcset"]),
    ("a", &["href"]),
    ("use", &["href", "xlink:href"]),
    ("image", &["xlink:href"]),
    ("object", &["data"]),
    ("meta", &["content"]),
];

/// `<meta>` tags whose `content` is a file (Open Graph, Twitter, MS tiles, schema.org).
const META_ATTRS: &[(&str, &[&str])] = &[
    (
        "property",
        &[
            "og:image",
            "og:image:url",
            "og:image:secure_url",
            "og:audio",
            "og:audio:secure_url",
            "og:video",
            "og:video:secure_url",
            "vk:image",
        ],
    ),
    (
        "name",
        &[
            "twitter:image",
            "msapplication-square150x150logo",
            "msapplication-square310x310logo",
            "msapplication-square70x70logo",
            "msapplication-wide310x150logo",
            "msapplication-TileImage",
            "msapplication-config",
        ],
    ),
    (
        "itemprop",
        &["image", "logo", "screenshot", "thumbnailUrl", "contentUrl", "downloadUrl"],
    ),
];

// ============================================================================
// Plugin
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HtmlOptions {
    /// Skip references whose source file cannot be read instead of failing.
    pub ignore_missing_assets: bool,
}

#[derive(Debug)]
pub struct HtmlPlugin {
    options: HtmlOptions,
    exts: Vec<String>,
}

impl HtmlPlugin {
    pub fn new(options: HtmlOptions) -> Self {
        Self {
            options,
            exts: vec![".html".to_string()],
        }
    }

    pub fn from_config(config: &toml::Table) -> anyhow::Result<Self> {
        let options: HtmlOptions = toml::Value::Table(config.clone()).try_into()?;
        Ok(Self::new(options))
    }
}

impl Default for HtmlPlugin {
    fn default() -> Self {
        Self::new(HtmlOptions::default())
    }
}

/// Loader for registering this plugin with a config table.
pub fn loader() -> PluginLoader {
    PluginLoader::new(|config| Ok(Arc::new(HtmlPlugin::from_config(config)?)))
}

#[async_trait]
impl Plugin for HtmlPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn exts(&self) -> &[String] {
        &self.exts
    }

    fn stages(&self) -> EnumSet<Stage> {
        Stage::Transform | Stage::Package
    }

    async fn transform(&self, cx: &TransformContext<'_>) -> anyhow::Result<Transformed> {
        let html = cx.asset.content.as_str();
        let tags = scan(html);

        for reference in find_references(html, &tags) {
            if self.options.ignore_missing_assets
                && cx.source_content(reference.path.as_str()).await?.is_none()
            {
                crate::debug!("html"; "skipping missing {}", reference.path);
                continue;
            }
            cx.add_dependency(reference.path.as_str());
        }

        let mut edits = TextEdits::new(html);
        let mut parts = Vec::new();
        for (index, doc) in find_embedded(&tags).into_iter().enumerate() {
            let id = cx.asset.id.embedded(index);
            parts.push(Asset::embedded(
                id.clone(),
                format!(".{}", doc.kind),
                &html[doc.body.clone()],
            ));
            cx.add_dependency(&id);

            match doc.marker {
                Some(marker) => edits.overwrite(marker.value, id.to_string()),
                None => edits.insert(doc.name_end, format!(" {TAPE_ID_ATTR}=\"{id}\"")),
            }
        }

        let content = edits.apply();
        Ok(Transformed::with_embedded(
            cx.asset.clone().with_content(content),
            parts,
        ))
    }

    async fn package(&self, cx: &PackageContext<'_>) -> anyhow::Result<Asset> {
        let html = cx.asset.content.as_str();
        let tags = scan(html);
        let mut edits = TextEdits::new(html);

        for reference in find_references(html, &tags) {
            if let Some(resolved) = cx.resolve_asset(reference.path.as_str()) {
                edits.overwrite(reference.range, resolved);
            }
        }

        for doc in find_embedded(&tags) {
            let Some(marker) = doc.marker else {
                continue;
            };
            let id = AssetId::new(&html[marker.value.clone()]);
            let Some(content) = cx.asset_content(&id) else {
                cx.report.error(Diagnostic::error(format!(
                    "Embedded asset `{id}` was not packaged."
                )))?;
                continue;
            };
            edits.remove(marker.attr);
            edits.overwrite(doc.body, content);
        }

        Ok(cx.asset.clone().with_content(edits.apply()))
    }
}

// ============================================================================
// Scanner
// ============================================================================

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<!--.*?-->|<([a-zA-Z][a-zA-Z0-9:-]*)((?:\s+[^\s"'>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*)\s*/?>"#,
    )
    .unwrap()
});

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s+([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap()
});

static STYLE_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</style\s*>").unwrap());
static SCRIPT_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</script\s*>").unwrap());

#[derive(Debug)]
struct Attr<'a> {
    /// Lowercased name
    name: String,
    value: Option<&'a str>,
    value_range: Option<Range<usize>>,
    /// Whole attribute including leading whitespace
    range: Range<usize>,
}

#[derive(Debug)]
struct Tag<'a> {
    /// Lowercased name
    name: String,
    /// Offset right after the tag name
    name_end: usize,
    attrs: Vec<Attr<'a>>,
    /// Raw text content of `<style>`/`<script>`
    body: Option<Range<usize>>,
}

impl<'a> Tag<'a> {
    fn attr(&self, name: &str) -> Option<&Attr<'a>> {
        self.attrs.iter().find(|a| a.name == name)
    }

    fn value(&self, name: &str) -> Option<&'a str> {
        self.attr(name).and_then(|a| a.value)
    }
}

/// Every open tag in document order, skipping comments.
fn scan(html: &str) -> Vec<Tag<'_>> {
    let mut tags = Vec::new();
    let mut pos = 0;

    while let Some(caps) = TAG_RE.captures_at(html, pos) {
        let Some(whole) = caps.get(0) else {
            break;
        };
        pos = whole.end();

        let Some(name) = caps.get(1) else {
            continue; // comment
        };
        let name_lower = name.as_str().to_ascii_lowercase();
        let attrs = caps
            .get(2)
            .map(|m| parse_attrs(html, m.start(), m.as_str()))
            .unwrap_or_default();

        let mut body = None;
        let self_closing = whole.as_str().ends_with("/>");
        if !self_closing && matches!(name_lower.as_str(), "style" | "script") {
            let close = if name_lower == "style" {
                &STYLE_CLOSE_RE
            } else {
                &SCRIPT_CLOSE_RE
            };
            let (end, resume) = close
                .find_at(html, pos)
                .map_or((html.len(), html.len()), |m| (m.start(), m.end()));
            body = Some(pos..end);
            pos = resume;
        }

        tags.push(Tag {
            name: name_lower,
            name_end: name.end(),
            attrs,
            body,
        });
    }

    tags
}

fn parse_attrs<'a>(html: &'a str, offset: usize, raw: &'a str) -> Vec<Attr<'a>> {
    ATTR_RE
        .captures_iter(raw)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            let value = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4));
            let value_range = value.map(|v| offset + v.start()..offset + v.end());
            Some(Attr {
                name: name.as_str().to_ascii_lowercase(),
                value: value_range.clone().map(|r| &html[r]),
                value_range,
                range: offset + whole.start()..offset + whole.end(),
            })
        })
        .collect()
}

// ============================================================================
// References
// ============================================================================

/// A local file reference and the byte range of its path.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reference {
    path: String,
    range: Range<usize>,
}

fn find_references(html: &str, tags: &[Tag<'_>]) -> Vec<Reference> {
    let mut found = Vec::new();

    for tag in tags {
        let Some((_, names)) = TAG_ATTRS.iter().find(|(t, _)| *t == tag.name) else {
            continue;
        };
        if tag.name == "meta" && !is_file_meta(tag) {
            continue;
        }

        for attr in tag.attrs.iter().filter(|a| names.contains(&a.name.as_str())) {
            let (Some(value), Some(range)) = (attr.value, attr.value_range.clone()) else {
                continue;
            };

            // `<a href>` without an extension is a route, not a file
            if tag.name == "a" && value.rfind('.').is_none_or(|i| i < 1) {
                continue;
            }

            if attr.name.ends_with("srcset") {
                for candidate in split_srcset(value, range.start) {
                    push_reference(html, &mut found, candidate);
                }
            } else {
                push_reference(html, &mut found, range);
            }
        }
    }

    found
}

fn is_file_meta(tag: &Tag<'_>) -> bool {
    let Some(content) = tag.value("content") else {
        return false;
    };
    if content.is_empty() {
        return false;
    }
    if tag.value("name") == Some("msapplication-config") && content == "none" {
        return false;
    }

    META_ATTRS.iter().any(|(attr, values)| {
        tag.value(attr).is_some_and(|v| values.contains(&v))
    })
}

/// URL ranges of a `srcset` list (`a.png 1x, b.png 2x`).
fn split_srcset(value: &str, offset: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for candidate in value.split(',') {
        let lead = candidate.len() - candidate.trim_start().len();
        let url_len = candidate.trim_start().split_whitespace().next().map_or(0, str::len);
        if url_len > 0 {
            let from = offset + start + lead;
            ranges.push(from..from + url_len);
        }
        start += candidate.len() + 1;
    }
    ranges
}

fn push_reference(html: &str, found: &mut Vec<Reference>, range: Range<usize>) {
    let Some(local) = local_path_range(&html[range.clone()]) else {
        return;
    };
    let range = range.start + local.start..range.start + local.end;
    found.push(Reference {
        path: html[range.clone()].to_string(),
        range,
    });
}

// ============================================================================
// Embedded documents
// ============================================================================

#[derive(Debug)]
struct Marker {
    attr: Range<usize>,
    value: Range<usize>,
}

#[derive(Debug)]
struct EmbeddedDoc {
    /// Extension without the dot: `css`, `javascript`, `scss`, ...
    kind: String,
    body: Range<usize>,
    name_end: usize,
    marker: Option<Marker>,
}

fn find_embedded(tags: &[Tag<'_>]) -> Vec<EmbeddedDoc> {
    tags.iter()
        .filter_map(|tag| {
            let body = tag.body.clone()?;
            let default_kind = match tag.name.as_str() {
                "style" => "css",
                "script" => "javascript",
                _ => return None,
            };
            if tag.name == "script" && ["src", "href", "xlink:href"].iter().any(|a| tag.attr(a).is_some()) {
                return None;
            }

            let kind = tag
                .value("type")
                .and_then(|t| t.trim().rsplit('/').next())
                .filter(|t| !t.is_empty())
                .unwrap_or(default_kind)
                .to_ascii_lowercase();

            let marker = tag.attr(TAPE_ID_ATTR).and_then(|a| {
                Some(Marker {
                    attr: a.range.clone(),
                    value: a.value_range.clone()?,
                })
            });

            Some(EmbeddedDoc {
                kind,
                body,
                name_end: tag.name_end,
                marker,
            })
        })
        .collect()
}
