use comrak::{markdown_to_html, Options};

use crate::error::RenderError;

/// Turns document source into preview HTML
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, source: &str) -> Result<String, RenderError>;
}

/// CommonMark + GFM renderer used by the dev server preview
#[derive(Debug, Default, Clone)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn render(&self, source: &str) -> Result<String, RenderError> {
        let mut options = Options::default();
        options.extension.table = true;
        options.extension.strikethrough = true;
        options.extension.tasklist = true;
        options.extension.autolink = true;
        options.extension.footnotes = true;
        Ok(markdown_to_html(source, &options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_headings_and_tables() {
        let html = MarkdownRenderer
            .render("# Intro\n\n| a | b |\n|---|---|\n| 1 | 2 |\n")
            .unwrap();
        assert!(html.contains("<h1>Intro</h1>"));
        assert!(html.contains("<table>"));
    }
}
