//! Markdown rendering for the wiki
//!
//! Converts a story's markdown into Confluence "storage" representation,
//! which is XHTML plus Confluence macros. Output must be well-formed XML, so
//! raw HTML embedded in the markdown is escaped rather than passed through,
//! and fenced code becomes a `code` macro with a CDATA body.
//!
//! # Example
//!
//! ```
//! use chronicler::services::markdown::render_storage;
//!
//! let xhtml = render_storage("# Session 3\n\nThe party **won**.");
//! assert!(xhtml.contains("<h1>Session 3</h1>"));
//! ```

use pulldown_cmark::{html, CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

/// Render markdown to Confluence storage format
pub fn render_storage(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);

    let parser = Parser::new_ext(markdown, options);
    let events = process_events(parser);

    let mut output = String::new();
    html::push_html(&mut output, events.into_iter());
    output
}

/// Rewrites code blocks into macros and neutralizes raw HTML
fn process_events<'a>(parser: Parser<'a>) -> Vec<Event<'a>> {
    let mut events = Vec::new();
    let mut in_code_block = false;
    let mut code_lang: Option<String> = None;
    let mut code_content = String::new();

    for event in parser {
        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                code_content.clear();
                code_lang = match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                    _ => None,
                };
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                events.push(Event::Html(
                    code_macro(&code_content, code_lang.as_deref()).into(),
                ));
                code_lang = None;
            }
            Event::Text(text) if in_code_block => {
                code_content.push_str(&text);
            }
            // Text events are escaped by the HTML writer
            Event::Html(raw) | Event::InlineHtml(raw) => {
                events.push(Event::Text(raw));
            }
            _ => events.push(event),
        }
    }

    events
}

/// Confluence code macro; `]]>` is split so it cannot close the CDATA early
fn code_macro(code: &str, lang: Option<&str>) -> String {
    let language = lang
        .map(|lang| {
            format!(
                "<ac:parameter ac:name=\"language\">{}</ac:parameter>",
                xml_escape(lang)
            )
        })
        .unwrap_or_default();

    format!(
        "<ac:structured-macro ac:name=\"code\">{}<ac:plain-text-body><![CDATA[{}]]></ac:plain-text-body></ac:structured-macro>\n",
        language,
        code.replace("]]>", "]]]]><![CDATA[>")
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
