//! # Markup Rendering
//!
//! Default `MarkupRenderer`: escapes all HTML, then applies a small set of
//! block rules. Output is safe to embed unescaped.

use crate::traits::MarkupRenderer;

/// Paragraphs split on blank lines, single newlines become `<br />`,
/// `> ` lines become blockquotes and ``` fences become `<pre><code>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscapingRenderer;

impl MarkupRenderer for EscapingRenderer {
    fn render(&self, markdown: &str) -> String {
        let mut out = Vec::new();
        let mut paragraph: Vec<String> = Vec::new();
        let mut quote: Vec<String> = Vec::new();
        let mut code: Option<Vec<String>> = None;

        for line in markdown.lines() {
            if let Some(block) = code.as_mut() {
                if line.trim_start().starts_with("```") {
                    out.push(format!("<pre><code>{}</code></pre>", block.join("\n")));
                    code = None;
                } else {
                    block.push(html_escape::encode_safe(line).to_string());
                }
                continue;
            }

            if line.trim_start().starts_with("```") {
                flush(&mut out, &mut paragraph, &mut quote);
                code = Some(Vec::new());
            } else if line.trim().is_empty() {
                flush(&mut out, &mut paragraph, &mut quote);
            } else if let Some(rest) = line.strip_prefix('>') {
                flush_paragraph(&mut out, &mut paragraph);
                quote.push(html_escape::encode_safe(rest.trim_start()).to_string());
            } else {
                flush_quote(&mut out, &mut quote);
                paragraph.push(html_escape::encode_safe(line).to_string());
            }
        }

        // Unterminated fence: keep what was written.
        if let Some(block) = code {
            out.push(format!("<pre><code>{}</code></pre>", block.join("\n")));
        }
        flush(&mut out, &mut paragraph, &mut quote);
        out.join("\n")
    }
}

fn flush(out: &mut Vec<String>, paragraph: &mut Vec<String>, quote: &mut Vec<String>) {
    flush_paragraph(out, paragraph);
    flush_quote(out, quote);
}

fn flush_paragraph(out: &mut Vec<String>, paragraph: &mut Vec<String>) {
    if !paragraph.is_empty() {
        out.push(format!("<p>{}</p>", paragraph.join("<br />")));
        paragraph.clear();
    }
}

fn flush_quote(out: &mut Vec<String>, quote: &mut Vec<String>) {
    if !quote.is_empty() {
        out.push(format!("<blockquote>{}</blockquote>", quote.join("<br />")));
        quote.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escapes_html() {
        let html = EscapingRenderer.render("<script>alert('x')</script>");
        assert!(!html.contains("<script>"));
        assert!(html.starts_with("<p>&lt;script&gt;"));
    }

    #[test]
    fn test_paragraphs_and_breaks() {
        let html = EscapingRenderer.render("line one\nline two\n\nsecond");
        assert_eq!(html, "<p>line one<br />line two</p>\n<p>second</p>");
    }

    #[test]
    fn test_quote_and_code_blocks() {
        let html = EscapingRenderer.render("> quoted\nplain\n```\nfn main() {}\n<b>\n```");
        assert_eq!(
            html,
            "<blockquote>quoted</blockquote>\n<p>plain</p>\n<pre><code>fn main() {}\n&lt;b&gt;</code></pre>"
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(EscapingRenderer.render(""), "");
    }
}
