//! Renderers and query preprocessors

use async_trait::async_trait;
use pulldown_cmark::{Options, Parser, html};

/// Turns message text into its presentational form
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, text: &str) -> anyhow::Result<String>;
}

/// Rewrites a raw query before it is recorded and sent
#[async_trait]
pub trait QueryPreprocessor: Send + Sync {
    async fn preprocess(&self, query: &str) -> anyhow::Result<String>;
}

/// Markdown to HTML
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

#[async_trait]
impl Renderer for MarkdownRenderer {
    async fn render(&self, text: &str) -> anyhow::Result<String> {
        let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
        let parser = Parser::new_ext(text, options);
        let mut out = String::with_capacity(text.len() + text.len() / 2);
        html::push_html(&mut out, parser);
        Ok(out)
    }
}

/// HTML-escaped text, no markup interpretation
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

#[async_trait]
impl Renderer for PlainTextRenderer {
    async fn render(&self, text: &str) -> anyhow::Result<String> {
        Ok(escape_html(text))
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Adapts a synchronous closure into a [`Renderer`]
pub struct FnRenderer<F>(F);

/// Wrap a closure as a renderer
pub fn render_fn<F>(f: F) -> FnRenderer<F>
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    FnRenderer(f)
}

#[async_trait]
impl<F> Renderer for FnRenderer<F>
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    async fn render(&self, text: &str) -> anyhow::Result<String> {
        (self.0)(text)
    }
}

/// Passes the query through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreprocessor;

#[async_trait]
impl QueryPreprocessor for IdentityPreprocessor {
    async fn preprocess(&self, query: &str) -> anyhow::Result<String> {
        Ok(query.to_string())
    }
}

/// Adapts a synchronous closure into a [`QueryPreprocessor`]
pub struct FnPreprocessor<F>(F);

/// Wrap a closure as a query preprocessor
pub fn preprocess_fn<F>(f: F) -> FnPreprocessor<F>
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    FnPreprocessor(f)
}

#[async_trait]
impl<F> QueryPreprocessor for FnPreprocessor<F>
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    async fn preprocess(&self, query: &str) -> anyhow::Result<String> {
        (self.0)(query)
    }
}

/// Render `text`, falling back to the raw text if the renderer fails.
pub(crate) async fn render_or_raw(renderer: &dyn Renderer, text: &str) -> String {
    match renderer.render(text).await {
        Ok(rendered) => rendered,
        Err(e) => {
            tracing::warn!("Renderer failed, keeping raw text: {:#}", e);
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_markdown_renders_html() {
        let html = MarkdownRenderer.render("**4**").await.unwrap();
        assert_eq!(html, "<p><strong>4</strong></p>\n");
    }

    #[tokio::test]
    async fn test_markdown_code_block() {
        let html = MarkdownRenderer
            .render("```\nlet x = 1;\n```")
            .await
            .unwrap();
        assert!(html.contains("<pre><code>let x = 1;\n</code></pre>"), "got: {}", html);
    }

    #[tokio::test]
    async fn test_plain_text_escapes() {
        let out = PlainTextRenderer.render("<b>a & b</b>").await.unwrap();
        assert_eq!(out, "&lt;b&gt;a &amp; b&lt;/b&gt;");
    }

    #[tokio::test]
    async fn test_render_or_raw_falls_back() {
        let failing = render_fn(|_| anyhow::bail!("renderer exploded"));
        assert_eq!(render_or_raw(&failing, "raw *text*").await, "raw *text*");
    }

    #[tokio::test]
    async fn test_preprocess_fn() {
        let upper = preprocess_fn(|q| Ok(q.to_uppercase()));
        assert_eq!(upper.preprocess("what is 2+2?").await.unwrap(), "WHAT IS 2+2?");
        assert_eq!(IdentityPreprocessor.preprocess("same").await.unwrap(), "same");
    }
}
