//! Built-in CSS support (`tape-css`).
//!
//! `@import` targets and `url()` values are registered as dependencies in
//! transform and rewritten to their output paths in package.

use std::ops::Range;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use enumset::EnumSet;
use regex::{Captures, Regex};

use super::edits::TextEdits;
use super::registry::PluginLoader;
use super::{Asset, PackageContext, Plugin, Stage, TransformContext, Transformed};
use crate::utils::path::local_path_range;

pub const NAME: &str = "tape-css";

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"@import\s*(?:url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)|"([^"]*)"|'([^']*)')"#,
    )
    .unwrap()
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#).unwrap()
});

#[derive(Debug)]
pub struct CssPlugin {
    exts: Vec<String>,
}

impl Default for CssPlugin {
    fn default() -> Self {
        Self {
            exts: vec![".css".to_string()],
        }
    }
}

pub fn loader() -> PluginLoader {
    PluginLoader::new(|_| Ok(Arc::new(CssPlugin::default())))
}

#[async_trait]
impl Plugin for CssPlugin {
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
        let css = cx.asset.content.as_str();
        for range in find_references(css) {
            cx.add_dependency(&css[range]);
        }
        Ok(cx.asset.clone().into())
    }

    async fn package(&self, cx: &PackageContext<'_>) -> anyhow::Result<Asset> {
        let css = cx.asset.content.as_str();
        let mut edits = TextEdits::new(css);
        for range in find_references(css) {
            if let Some(resolved) = cx.resolve_asset(&css[range.clone()]) {
                edits.overwrite(range, resolved);
            }
        }
        Ok(cx.asset.clone().with_content(edits.apply()))
    }
}

/// Byte ranges of local paths in `@import` rules and `url()` values.
fn find_references(css: &str) -> Vec<Range<usize>> {
    let mut imports: Vec<Range<usize>> = Vec::new();
    let mut found = Vec::new();

    for caps in IMPORT_RE.captures_iter(css) {
        if let Some(whole) = caps.get(0) {
            imports.push(whole.range());
        }
        found.extend(local_range(&caps));
    }

    for caps in URL_RE.captures_iter(css) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        // already covered by an `@import url(...)`
        if imports.iter().any(|r| r.start < whole.end() && whole.start() < r.end) {
            continue;
        }
        found.extend(local_range(&caps));
    }

    found.sort_by_key(|r| r.start);
    found
}

fn local_range(caps: &Captures<'_>) -> Option<Range<usize>> {
    let value = caps.iter().skip(1).flatten().next()?;
    let local = local_path_range(value.as_str())?;
    Some(value.start() + local.start..value.start() + local.end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(css: &str) -> Vec<&str> {
        find_references(css).into_iter().map(|r| &css[r]).collect()
    }

    #[test]
    fn test_import_forms() {
        let css = r#"
            @import 'reset.css';
            @import "theme.css";
            @import url(print.css);
            @import url("fonts.css") screen;
            @import 'https://cdn.example.com/x.css';
        "#;
        assert_eq!(paths(css), ["reset.css", "theme.css", "print.css", "fonts.css"]);
    }

    #[test]
    fn test_url_values() {
        let css = r#"
            body { background: url(bg.png) no-repeat, url('layer.png'); }
            @font-face { src: url("font.woff?#iefix") format("woff"); }
            .icon { mask: url(#mask); background: url(data:image/png;base64,AAAA); }
        "#;
        assert_eq!(paths(css), ["bg.png", "layer.png", "font.woff"]);
    }

    #[test]
    fn test_self_import() {
        assert_eq!(paths("@import 'style.css'"), ["style.css"]);
    }
}
