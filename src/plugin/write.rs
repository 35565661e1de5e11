//! Default write plugin (`tape-write`).
//!
//! Injected when no other plugin can write. The output path is the source
//! path with its original extension swapped for the current one, so
//! `/style.scss` transformed into CSS is written as `/style.css`.

use async_trait::async_trait;
use enumset::EnumSet;

use super::{Asset, PackageContext, Plugin, Stage};

pub const NAME: &str = "tape-write";

#[derive(Debug, Default)]
pub struct WritePlugin;

#[async_trait]
impl Plugin for WritePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn stages(&self) -> EnumSet<Stage> {
        EnumSet::only(Stage::Write)
    }

    async fn write(&self, cx: &PackageContext<'_>) -> anyhow::Result<String> {
        Ok(output_path(&cx.asset))
    }
}

/// Source path with the original extension replaced by the current one.
pub fn output_path(asset: &Asset) -> String {
    let path = asset.source.path.as_str();
    let stem = path.strip_suffix(asset.source.ext.as_str()).unwrap_or(path);
    format!("{stem}{}", asset.ext)
}
