use regex::{Captures, Regex};

const BOILERPLATE_TAGS: [&str; 9] = [
    "script", "style", "nav", "header", "footer", "aside", "noscript", "form", "svg",
];

/// Strips page chrome from HTML and rewrites the remaining structure as
/// Markdown, so headings survive as hints for the chunker.
pub struct HtmlCleaner {
    boilerplate: Vec<Regex>,
    comment: Regex,
    content_root: Vec<Regex>,
    heading: Regex,
    pre: Regex,
    code: Regex,
    list_item: Regex,
    cell_end: Regex,
    block: Regex,
    tag: Regex,
    blank_lines: Regex,
}

impl HtmlCleaner {
    pub fn new() -> Result<Self, regex::Error> {
        let boilerplate = BOILERPLATE_TAGS
            .iter()
            .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")))
            .collect::<Result<Vec<_>, _>>()?;
        let content_root = ["main", "article", "body"]
            .iter()
            .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*)</{tag}\s*>")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            boilerplate,
            comment: Regex::new(r"(?s)<!--.*?-->")?,
            content_root,
            heading: Regex::new(r"(?is)<h([1-6])\b[^>]*>(.*?)</h[1-6]\s*>")?,
            pre: Regex::new(r"(?is)<pre\b[^>]*>(.*?)</pre\s*>")?,
            code: Regex::new(r"(?is)<code\b[^>]*>(.*?)</code\s*>")?,
            list_item: Regex::new(r"(?i)<li\b[^>]*>")?,
            cell_end: Regex::new(r"(?i)</t[dh]\s*>")?,
            block: Regex::new(r"(?i)</?(p|div|section|article|main|ul|ol|table|thead|tbody|tr|br|hr|dl|dt|dd)\b[^>]*>")?,
            tag: Regex::new(r"(?s)<[^>]+>")?,
            blank_lines: Regex::new(r"\n{3,}")?,
        })
    }

    pub fn to_markdown(&self, html: &str) -> String {
        let mut text = self.comment.replace_all(html, "").into_owned();
        for pattern in &self.boilerplate {
            text = pattern.replace_all(&text, "").into_owned();
        }

        if let Some(inner) = self
            .content_root
            .iter()
            .find_map(|pattern| pattern.captures(&text).and_then(|c| c.get(1)))
        {
            text = inner.as_str().to_string();
        }

        text = self
            .pre
            .replace_all(&text, |captures: &Captures| {
                let body = self.strip_tags(captures.get(1).map_or("", |m| m.as_str()));
                format!("\n\n```\n{}\n```\n\n", body.trim_matches('\n'))
            })
            .into_owned();

        text = self
            .heading
            .replace_all(&text, |captures: &Captures| {
                let level = captures
                    .get(1)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .unwrap_or(1);
                let title = self.strip_tags(captures.get(2).map_or("", |m| m.as_str()));
                format!("\n\n{} {}\n\n", "#".repeat(level), collapse(&title))
            })
            .into_owned();

        text = self
            .code
            .replace_all(&text, |captures: &Captures| {
                format!("`{}`", self.strip_tags(captures.get(1).map_or("", |m| m.as_str())))
            })
            .into_owned();
        text = self.list_item.replace_all(&text, "\n* ").into_owned();
        text = self.cell_end.replace_all(&text, " | ").into_owned();
        text = self.block.replace_all(&text, "\n").into_owned();
        text = self.strip_tags(&text);

        let mut in_fence = false;
        let lines: Vec<String> = text
            .split('\n')
            .map(|line| {
                if line.trim_start().starts_with("```") {
                    in_fence = !in_fence;
                    return line.trim().to_string();
                }
                if in_fence {
                    line.trim_end().to_string()
                } else {
                    collapse(line)
                }
            })
            .collect();

        self.blank_lines
            .replace_all(&lines.join("\n"), "\n\n")
            .trim()
            .to_string()
    }

    fn strip_tags(&self, fragment: &str) -> String {
        decode_entities(&self.tag.replace_all(fragment, ""))
    }
}

fn collapse(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
