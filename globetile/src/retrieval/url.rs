//! Tile URL construction.

use crate::error::ConfigurationError;
use crate::tile::TileKey;

/// Builds the URL of a tile's resource.
pub trait UrlBuilder {
    /// The URL for `key` in `format`, or `None` when the tile has no resource.
    fn url_for_tile(&self, key: &TileKey, format: &str) -> Option<String>;
}

/// A URL template with `{x}`, `{y}`, `{z}`, `{level}` and `{format}`
/// placeholders.
///
/// `{x}` is the tile column, `{y}` the row, `{level}` the zero-based level
/// number and `{z}` the one-based level number many tile servers expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateUrlBuilder {
    template: String,
}

impl TemplateUrlBuilder {
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidUrlTemplate`] when the template
    /// lacks `{x}`, `{y}`, or both `{z}` and `{level}`.
    pub fn new(template: impl Into<String>) -> Result<Self, ConfigurationError> {
        let template = template.into();
        let invalid = |reason: &str| ConfigurationError::InvalidUrlTemplate {
            template: template.clone(),
            reason: reason.to_string(),
        };

        if !template.contains("{x}") || !template.contains("{y}") {
            return Err(invalid("missing {x} or {y}"));
        }
        if !template.contains("{z}") && !template.contains("{level}") {
            return Err(invalid("missing {z} or {level}"));
        }

        Ok(Self { template })
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

impl UrlBuilder for TemplateUrlBuilder {
    fn url_for_tile(&self, key: &TileKey, format: &str) -> Option<String> {
        Some(
            self.template
                .replace("{x}", &key.column.to_string())
                .replace("{y}", &key.row.to_string())
                .replace("{z}", &(key.level + 1).to_string())
                .replace("{level}", &key.level.to_string())
                .replace("{format}", format),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_substituted() {
        let builder =
            TemplateUrlBuilder::new("http://localhost/elev?x={x}&y={y}&z={z}&f={format}").unwrap();
        let url = builder.url_for_tile(&TileKey::new(2, 5, 7), "application/bil16");
        assert_eq!(
            url.as_deref(),
            Some("http://localhost/elev?x=7&y=5&z=3&f=application/bil16")
        );
    }

    #[test]
    fn test_level_placeholder_is_zero_based() {
        let builder = TemplateUrlBuilder::new("tiles/{level}/{y}/{x}.png").unwrap();
        let url = builder.url_for_tile(&TileKey::new(0, 1, 2), "image/png");
        assert_eq!(url.as_deref(), Some("tiles/0/1/2.png"));
    }

    #[test]
    fn test_rejects_incomplete_templates() {
        assert!(TemplateUrlBuilder::new("tiles/{y}.png").is_err());
        assert!(TemplateUrlBuilder::new("tiles/{x}/{y}.png").is_err());
    }
}
