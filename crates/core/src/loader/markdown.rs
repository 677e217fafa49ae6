use crate::models::{RawDocument, StructuralHint};
use regex::Regex;
use std::collections::BTreeMap;

/// Turns Markdown into text plus heading hints.
///
/// YAML front matter is lifted into `RawDocument::front_matter`. Lines
/// inside fenced code blocks are never treated as headings, so HCL
/// comments like `# enable versioning` stay part of the example.
pub struct MarkdownParser {
    heading: Regex,
    fence: Regex,
}

impl MarkdownParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            heading: Regex::new(r"^(#{1,6})[ \t]+(.+?)[ \t]*#*[ \t]*$")?,
            fence: Regex::new(r"^\s*(```|~~~)")?,
        })
    }

    pub fn parse(&self, input: &str) -> RawDocument {
        let normalized = input.replace("\r\n", "\n");
        let (front_matter, body) = split_front_matter(&normalized);
        let text = body.trim_start_matches('\n').trim_end().to_string();

        let mut hints = Vec::new();
        let mut in_fence = false;
        let mut offset = 0usize;

        for line in text.split('\n') {
            if self.fence.is_match(line) {
                in_fence = !in_fence;
            } else if !in_fence {
                if let Some(captures) = self.heading.captures(line) {
                    let level = captures.get(1).map_or(1, |m| m.as_str().len()) as u8;
                    let title = captures
                        .get(2)
                        .map(|m| m.as_str().trim().to_string())
                        .unwrap_or_default();
                    if !title.is_empty() {
                        hints.push(StructuralHint::Heading {
                            level,
                            title,
                            offset,
                        });
                    }
                }
            }
            offset += line.len() + 1;
        }

        RawDocument {
            text,
            hints,
            front_matter,
        }
    }
}

fn split_front_matter(text: &str) -> (BTreeMap<String, String>, &str) {
    let mut values = BTreeMap::new();
    let Some(rest) = text.strip_prefix("---\n") else {
        return (values, text);
    };

    let Some(end) = rest.find("\n---") else {
        return (values, text);
    };

    for line in rest[..end].lines() {
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            if !key.trim().is_empty() && !value.is_empty() {
                values.insert(key.trim().to_string(), value.to_string());
            }
        }
    }

    let after = &rest[end + 4..];
    let body = after.split_once('\n').map_or("", |(_, body)| body);
    (values, body)
}

#[cfg(test)]
mod tests {
    use super::MarkdownParser;
    use crate::models::StructuralHint;

    const DOC: &str = "---\nsubcategory: \"S3 (Simple Storage)\"\nlayout: \"aws\"\n---\n\n# Resource: aws_s3_bucket\n\nProvides a S3 bucket resource.\n\n## Example Usage\n\n```terraform\n# a comment, not a heading\nresource \"aws_s3_bucket\" \"b\" {}\n```\n\n## Argument Reference\n\n* `bucket` - (Optional) Name of the bucket.\n";

    #[test]
    fn front_matter_is_lifted_out_of_the_text() -> Result<(), Box<dyn std::error::Error>> {
        let document = MarkdownParser::new()?.parse(DOC);
        assert_eq!(
            document.front_matter.get("subcategory").map(String::as_str),
            Some("S3 (Simple Storage)")
        );
        assert!(document.text.starts_with("# Resource: aws_s3_bucket"));
        Ok(())
    }

    #[test]
    fn headings_inside_code_fences_are_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let document = MarkdownParser::new()?.parse(DOC);
        let titles: Vec<_> = document
            .hints
            .iter()
            .filter_map(|hint| match hint {
                StructuralHint::Heading { level, title, .. } => Some((*level, title.as_str())),
                _ => None,
            })
            .collect();

        assert_eq!(
            titles,
            vec![
                (1, "Resource: aws_s3_bucket"),
                (2, "Example Usage"),
                (2, "Argument Reference"),
            ]
        );
        assert_eq!(document.title(), Some("Resource: aws_s3_bucket"));
        Ok(())
    }

    #[test]
    fn heading_offsets_point_at_heading_lines() -> Result<(), Box<dyn std::error::Error>> {
        let document = MarkdownParser::new()?.parse(DOC);
        for hint in &document.hints {
            if let StructuralHint::Heading { offset, .. } = hint {
                assert!(document.text[*offset..].starts_with('#'));
            }
        }
        Ok(())
    }

    #[test]
    fn text_without_front_matter_is_kept_whole() -> Result<(), Box<dyn std::error::Error>> {
        let document = MarkdownParser::new()?.parse("plain words\n\nmore words");
        assert!(document.front_matter.is_empty());
        assert!(document.hints.is_empty());
        assert_eq!(document.text, "plain words\n\nmore words");
        Ok(())
    }
}
