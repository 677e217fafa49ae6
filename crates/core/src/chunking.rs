use crate::config::ChunkingSettings;
use crate::models::{Chunk, ChunkType, DocumentSource, RawDocument, StructuralHint};
use regex::Regex;
use std::collections::VecDeque;

pub const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl From<ChunkingSettings> for ChunkingConfig {
    fn from(value: ChunkingSettings) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingSettings::default().into()
    }
}

/// Splits `text` into trimmed, nonempty pieces of at most `chunk_size` characters.
pub fn split_recursive(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_with(text, &SEPARATORS, config)
        .into_iter()
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn split_with(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let (index, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, separator)| separator.is_empty() || text.contains(**separator))
        .map(|(index, separator)| (index, *separator))
        .unwrap_or((separators.len().saturating_sub(1), ""));
    let remaining = separators.get(index + 1..).unwrap_or_default();

    let pieces: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(start, c)| &text[start..start + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|piece| !piece.is_empty()).collect()
    };

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in pieces {
        if char_len(piece) < config.chunk_size {
            pending.push(piece);
            continue;
        }

        if !pending.is_empty() {
            chunks.extend(merge_pieces(&pending, separator, config));
            pending.clear();
        }

        if remaining.is_empty() {
            chunks.push(piece.to_string());
        } else {
            chunks.extend(split_with(piece, remaining, config));
        }
    }

    if !pending.is_empty() {
        chunks.extend(merge_pieces(&pending, separator, config));
    }

    chunks
}

fn merge_pieces(pieces: &[&str], separator: &str, config: ChunkingConfig) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut merged = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        let joint = if window.is_empty() { 0 } else { separator_len };

        if total + len + joint > config.chunk_size && !window.is_empty() {
            merged.push(join(&window, separator));

            loop {
                let joint = if window.is_empty() { 0 } else { separator_len };
                let must_shrink = total > config.chunk_overlap
                    || (total > 0 && total + len + joint > config.chunk_size);
                if !must_shrink {
                    break;
                }
                let Some(first) = window.pop_front() else {
                    break;
                };
                let removed = char_len(first) + if window.is_empty() { 0 } else { separator_len };
                total = total.saturating_sub(removed);
            }
        }

        let joint = if window.is_empty() { 0 } else { separator_len };
        window.push_back(piece);
        total += len + joint;
    }

    if !window.is_empty() {
        merged.push(join(&window, separator));
    }

    merged
}

fn join(window: &VecDeque<&str>, separator: &str) -> String {
    window.iter().copied().collect::<Vec<_>>().join(separator)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    Required,
    Optional,
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    name: String,
    requirement: Option<Requirement>,
    description: String,
}

#[derive(Debug)]
struct Section<'a> {
    title: &'a str,
    body: &'a str,
}

struct SectionPatterns {
    argument_after: Regex,
    argument_before: Regex,
    plain_field: Regex,
    fence: Regex,
}

impl SectionPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            argument_after: Regex::new(
                r"^\s*[-*]\s+`([A-Za-z0-9_.\[\]]+)`\s*\((Required|Optional)\)\s*[-:]?\s*(.*)$",
            )?,
            argument_before: Regex::new(
                r"^\s*[-*]\s+`([A-Za-z0-9_.\[\]]+)`\s*[-:]\s*\((Required|Optional)[^)]*\)\s*(.*)$",
            )?,
            plain_field: Regex::new(r"^\s*[-*]\s+`([A-Za-z0-9_.\[\]]+)`\s*[-:]\s*(.*)$")?,
            fence: Regex::new(r"^\s*(```|~~~)")?,
        })
    }

    fn parse_fields(&self, body: &str, with_requirement: bool) -> Vec<Field> {
        let mut fields: Vec<Field> = Vec::new();

        for line in body.lines() {
            let marked = if with_requirement {
                self.argument_after
                    .captures(line)
                    .or_else(|| self.argument_before.captures(line))
                    .map(|captures| Field {
                        name: capture(&captures, 1),
                        requirement: Some(if capture(&captures, 2) == "Required" {
                            Requirement::Required
                        } else {
                            Requirement::Optional
                        }),
                        description: capture(&captures, 3),
                    })
            } else {
                None
            };
            let parsed = marked.or_else(|| {
                self.plain_field.captures(line).map(|captures| Field {
                    name: capture(&captures, 1),
                    requirement: None,
                    description: capture(&captures, 2),
                })
            });

            if let Some(field) = parsed {
                fields.push(field);
                continue;
            }

            // Indented lines continue the previous bullet.
            let trimmed = line.trim();
            let is_continuation = line.starts_with(char::is_whitespace)
                && !trimmed.is_empty()
                && !trimmed.starts_with("* ")
                && !trimmed.starts_with("- ");
            if let Some(current) = fields.last_mut().filter(|_| is_continuation) {
                current.description.push(' ');
                current.description.push_str(trimmed);
            }
        }

        if fields.is_empty() {
            fields = parse_table(body);
        }

        fields
    }

    fn code_blocks(&self, body: &str) -> Vec<String> {
        let mut blocks = Vec::new();
        let mut current: Option<Vec<&str>> = None;

        for line in body.lines() {
            if self.fence.is_match(line) {
                match current.take() {
                    Some(lines) => blocks.push(lines.join("\n")),
                    None => current = Some(Vec::new()),
                }
                continue;
            }
            if let Some(lines) = current.as_mut() {
                lines.push(line);
            }
        }

        if blocks.is_empty() {
            blocks = indented_blocks(body);
        }

        blocks
            .into_iter()
            .filter(|block| !block.trim().is_empty())
            .collect()
    }

    fn notes(&self, text: &str) -> Vec<String> {
        const MARKERS: [&str; 5] = ["NOTE:", "Note:", "Warning:", "WARNING:", "Tip:"];
        let mut in_fence = false;
        let mut notes = Vec::new();

        for line in text.lines() {
            if self.fence.is_match(line) {
                in_fence = !in_fence;
                continue;
            }
            let trimmed = line.trim();
            if in_fence || !(trimmed.starts_with('>') || trimmed.starts_with("~>") || trimmed.starts_with("->")) {
                continue;
            }
            if MARKERS.iter().any(|marker| trimmed.contains(marker)) {
                let content = trimmed.trim_start_matches(['>', '~', '-', ' ']).trim();
                if !content.is_empty() {
                    notes.push(content.to_string());
                }
            }
        }

        notes
    }
}

fn capture(captures: &regex::Captures<'_>, index: usize) -> String {
    captures
        .get(index)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

fn parse_table(body: &str) -> Vec<Field> {
    let lines: Vec<&str> = body.lines().collect();
    let Some(separator) = lines
        .iter()
        .position(|line| line.contains('|') && line.contains("---"))
    else {
        return Vec::new();
    };
    if separator == 0 {
        return Vec::new();
    }

    let header: Vec<String> = split_row(lines[separator - 1])
        .into_iter()
        .map(|cell| cell.to_lowercase())
        .collect();
    let column = |needle: &str| header.iter().position(|cell| cell.contains(needle));
    let name_column = column("name").unwrap_or(0);
    let required_column = column("required");
    let description_column = column("description");

    lines[separator + 1..]
        .iter()
        .take_while(|row| row.contains('|'))
        .filter_map(|row| {
            let cells = split_row(row);
            let name = cells.get(name_column)?.trim_matches('`').to_string();
            if name.is_empty() {
                return None;
            }
            Some(Field {
                name,
                requirement: required_column.and_then(|index| {
                    cells.get(index).map(|cell| match cell.to_lowercase().as_str() {
                        "yes" | "required" | "true" => Requirement::Required,
                        _ => Requirement::Optional,
                    })
                }),
                description: description_column
                    .and_then(|index| cells.get(index).cloned())
                    .unwrap_or_default(),
            })
        })
        .collect()
}

fn split_row(row: &str) -> Vec<String> {
    row.trim()
        .trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect()
}

fn indented_blocks(body: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.starts_with("    ") || line.starts_with('\t') {
            current.push(line.strip_prefix("    ").unwrap_or(line.trim_start_matches('\t')));
        } else if line.trim().is_empty() && !current.is_empty() {
            current.push("");
        } else if !current.is_empty() {
            blocks.push(current.join("\n").trim_end().to_string());
            current.clear();
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n").trim_end().to_string());
    }

    blocks
}

fn render_fields(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|field| {
            let marker = match field.requirement {
                Some(Requirement::Required) => " (required)",
                Some(Requirement::Optional) => " (optional)",
                None => "",
            };
            if field.description.is_empty() {
                format!("- {}{marker}", field.name)
            } else {
                format!("- {}{marker}: {}", field.name, field.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits loaded documents into chunks according to their doc_type.
pub struct Chunker {
    config: ChunkingConfig,
    patterns: SectionPatterns,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            config,
            patterns: SectionPatterns::new()?,
        })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn chunk(&self, document: &RawDocument, source: &DocumentSource) -> Vec<Chunk> {
        if source.doc_type.is_structured() {
            let structured = self.chunk_structured(document, source);
            if !structured.is_empty() {
                return structured;
            }
        }
        self.chunk_recursive(document, source)
    }

    pub fn chunk_recursive(&self, document: &RawDocument, source: &DocumentSource) -> Vec<Chunk> {
        split_recursive(&document.text, self.config)
            .into_iter()
            .enumerate()
            .map(|(ordinal, content)| {
                let chunk = Chunk::from_source(source, ChunkType::Content, ordinal, content)
                    .with_metadata("chunking_method", "recursive");
                with_document_metadata(chunk, document)
            })
            .collect()
    }

    fn chunk_structured(&self, document: &RawDocument, source: &DocumentSource) -> Vec<Chunk> {
        let sections = sections(document);
        let find = |needle: &str| {
            sections
                .iter()
                .find(|section| section.title.to_lowercase().contains(needle))
        };

        let description = description(document);
        let arguments = find("argument").map(|section| {
            let fields = self.patterns.parse_fields(section.body, true);
            if fields.is_empty() {
                section.body.trim().to_string()
            } else {
                render_fields(&fields)
            }
        });
        let attributes = find("attribute").map(|section| {
            let fields = self.patterns.parse_fields(section.body, false);
            if fields.is_empty() {
                section.body.trim().to_string()
            } else {
                render_fields(&fields)
            }
        });
        let examples = find("example").map(|section| {
            let blocks = self.patterns.code_blocks(section.body);
            if blocks.is_empty() {
                section.body.trim().to_string()
            } else {
                blocks
                    .iter()
                    .enumerate()
                    .map(|(index, block)| format!("Example {}:\n{}", index + 1, block))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        });
        let notes = self.patterns.notes(&document.text);

        let has_sections = [&arguments, &attributes, &examples]
            .iter()
            .any(|section| section.as_deref().is_some_and(|body| !body.trim().is_empty()));
        if !has_sections && description.is_empty() {
            return Vec::new();
        }

        let header = format!(
            "Provider: {}\nService: {}\nName: {}\nType: {}",
            source.provider,
            source.service.as_deref().unwrap_or_default(),
            source.name,
            source.doc_type
        );

        let mut parts: Vec<(ChunkType, String)> = Vec::new();
        parts.push((
            ChunkType::Overview,
            if description.is_empty() {
                header.clone()
            } else {
                format!("{header}\nDescription: {description}")
            },
        ));
        for (chunk_type, label, body) in [
            (ChunkType::Arguments, "Arguments", arguments),
            (ChunkType::Attributes, "Attributes", attributes),
            (ChunkType::Examples, "Examples", examples),
        ] {
            if let Some(body) = body.filter(|body| !body.trim().is_empty()) {
                parts.push((chunk_type, format!("{header}\n\n{label}:\n{body}")));
            }
        }
        if !notes.is_empty() {
            let listed = notes
                .iter()
                .map(|note| format!("- {note}"))
                .collect::<Vec<_>>()
                .join("\n");
            parts.push((ChunkType::Notes, format!("{header}\n\nNotes:\n{listed}")));
        }

        parts
            .into_iter()
            .map(|(chunk_type, content)| {
                let chunk = Chunk::from_source(source, chunk_type, 0, content)
                    .with_metadata("chunking_method", "structured");
                with_document_metadata(chunk, document)
            })
            .collect()
    }
}

fn with_document_metadata(mut chunk: Chunk, document: &RawDocument) -> Chunk {
    if let Some(title) = document.title() {
        chunk = chunk.with_metadata("title", title);
    }
    if let Some(subcategory) = document.front_matter.get("subcategory") {
        chunk = chunk.with_metadata("subcategory", subcategory.clone());
    }
    chunk
}

/// Sections below level 1, each extending to the next heading of the same
/// or a higher level.
fn sections(document: &RawDocument) -> Vec<Section<'_>> {
    let headings: Vec<(u8, &str, usize)> = document
        .hints
        .iter()
        .filter_map(|hint| match hint {
            StructuralHint::Heading {
                level,
                title,
                offset,
            } => Some((*level, title.as_str(), *offset)),
            _ => None,
        })
        .collect();

    headings
        .iter()
        .enumerate()
        .filter(|(_, (level, _, _))| *level > 1)
        .map(|(index, (level, title, offset))| {
            let start = body_start(&document.text, *offset);
            let end = headings[index + 1..]
                .iter()
                .find(|(next_level, _, _)| next_level <= level)
                .map_or(document.text.len(), |(_, _, next_offset)| *next_offset);
            Section {
                title,
                body: document.text.get(start..end.max(start)).unwrap_or_default(),
            }
        })
        .collect()
}

/// Prose following the level 1 heading, or the document start when there
/// is none, up to the next heading.
fn description(document: &RawDocument) -> String {
    let headings: Vec<(u8, usize)> = document
        .hints
        .iter()
        .filter_map(|hint| match hint {
            StructuralHint::Heading { level, offset, .. } => Some((*level, *offset)),
            _ => None,
        })
        .collect();

    let (start, next) = match headings.iter().position(|(level, _)| *level == 1) {
        Some(index) => (
            body_start(&document.text, headings[index].1),
            headings.get(index + 1).map(|(_, offset)| *offset),
        ),
        None => (0, headings.first().map(|(_, offset)| *offset)),
    };
    let end = next.unwrap_or(document.text.len()).max(start);

    document
        .text
        .get(start..end)
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn body_start(text: &str, heading_offset: usize) -> usize {
    text[heading_offset..]
        .find('\n')
        .map_or(text.len(), |newline| heading_offset + newline + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MarkdownParser;
    use crate::models::{DocFormat, DocType};

    const S3_BUCKET: &str = r#"---
subcategory: "S3 (Simple Storage)"
layout: "aws"
page_title: "AWS: aws_s3_bucket"
---

# Resource: aws_s3_bucket

Provides a S3 bucket resource.

## Example Usage

### Private Bucket With Tags

```terraform
# bucket names are global
resource "aws_s3_bucket" "example" {
  bucket = "my-tf-test-bucket"
}
```

## Argument Reference

This resource supports the following arguments:

* `bucket` - (Optional, Forces new resource) Name of the bucket.
* `force_destroy` - (Optional, Default:`false`) Whether all objects should be deleted
  when the bucket is destroyed.
* `tags` - (Optional) Map of tags to assign to the bucket.

## Import

Import is supported using the bucket name.
"#;

    fn s3_source() -> DocumentSource {
        DocumentSource {
            uri: "https://example.test/r/s3_bucket.html.markdown".to_string(),
            format: DocFormat::Markdown,
            doc_type: DocType::Resource,
            provider: "aws".to_string(),
            service: Some("S3".to_string()),
            name: "aws_s3_bucket".to_string(),
        }
    }

    fn chunker(chunk_size: usize, chunk_overlap: usize) -> Result<Chunker, regex::Error> {
        Chunker::new(ChunkingConfig {
            chunk_size,
            chunk_overlap,
        })
    }

    #[test]
    fn words_are_merged_with_overlap() {
        let pieces = split_recursive(
            "a b c d e f g h i j",
            ChunkingConfig {
                chunk_size: 5,
                chunk_overlap: 2,
            },
        );
        assert_eq!(pieces, vec!["a b c", "c d e", "e f g", "g h i", "i j"]);
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let config = ChunkingConfig {
            chunk_size: 5,
            chunk_overlap: 2,
        };
        let pieces = split_recursive(&"x".repeat(12), config);
        assert_eq!(pieces.len(), 4);
        assert!(pieces.iter().all(|piece| piece.chars().count() <= 5));
    }

    #[test]
    fn paragraphs_stay_within_chunk_size() {
        let paragraph = "Enable default encryption on every bucket and rotate keys yearly. ";
        let text = (0..40)
            .map(|index| format!("{index}. {}", paragraph.repeat(3)))
            .collect::<Vec<_>>()
            .join("\n\n");

        let pieces = split_recursive(&text, ChunkingConfig::default());
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|piece| !piece.trim().is_empty()));
        assert!(pieces.iter().all(|piece| piece.chars().count() <= 1000));
    }

    #[test]
    fn whitespace_only_text_yields_nothing() {
        assert!(split_recursive(" \n\n \t ", ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn resource_without_attributes_omits_attribute_chunk() -> Result<(), Box<dyn std::error::Error>> {
        let document = MarkdownParser::new()?.parse(S3_BUCKET);
        let chunks = chunker(1000, 200)?.chunk(&document, &s3_source());

        let kinds: Vec<ChunkType> = chunks.iter().map(|chunk| chunk.chunk_type).collect();
        assert_eq!(
            kinds,
            vec![ChunkType::Overview, ChunkType::Arguments, ChunkType::Examples]
        );
        Ok(())
    }

    #[test]
    fn structured_chunks_render_sections() -> Result<(), Box<dyn std::error::Error>> {
        let document = MarkdownParser::new()?.parse(S3_BUCKET);
        let chunks = chunker(1000, 200)?.chunk(&document, &s3_source());

        let overview = &chunks[0].content;
        assert!(overview.starts_with("Provider: aws\nService: S3\nName: aws_s3_bucket\nType: resource"));
        assert!(overview.ends_with("Description: Provides a S3 bucket resource."));

        let arguments = &chunks[1].content;
        assert!(arguments.contains("- bucket (optional): Name of the bucket."));
        assert!(arguments.contains(
            "- force_destroy (optional): Whether all objects should be deleted when the bucket is destroyed."
        ));
        assert!(arguments.contains("- tags (optional): Map of tags to assign to the bucket."));

        let examples = &chunks[2].content;
        assert!(examples.contains("Example 1:\n# bucket names are global\nresource \"aws_s3_bucket\""));
        assert_eq!(
            chunks[0].source_metadata.get("subcategory").map(String::as_str),
            Some("S3 (Simple Storage)")
        );
        Ok(())
    }

    #[test]
    fn attributes_and_notes_are_extracted() -> Result<(), Box<dyn std::error::Error>> {
        let text = "# Data Source: aws_vpc\n\nLooks up a VPC.\n\n~> **NOTE:** Filters must match exactly one VPC.\n\n## Argument Reference\n\n* `id` - (Optional) ID of the VPC.\n\n## Attribute Reference\n\n* `arn` - ARN of VPC.\n* `cidr_block` - CIDR block of the VPC.\n";
        let document = MarkdownParser::new()?.parse(text);
        let mut source = s3_source();
        source.doc_type = DocType::DataSource;
        source.name = "aws_vpc".to_string();
        source.service = Some("VPC".to_string());

        let chunks = chunker(1000, 200)?.chunk(&document, &source);
        let kinds: Vec<ChunkType> = chunks.iter().map(|chunk| chunk.chunk_type).collect();
        assert_eq!(
            kinds,
            vec![
                ChunkType::Overview,
                ChunkType::Arguments,
                ChunkType::Attributes,
                ChunkType::Notes
            ]
        );
        assert!(chunks[2].content.ends_with("Attributes:\n- arn: ARN of VPC.\n- cidr_block: CIDR block of the VPC."));
        assert!(chunks[3].content.contains("- **NOTE:** Filters must match exactly one VPC."));
        assert!(chunks[0].content.contains("Type: data_source"));
        Ok(())
    }

    #[test]
    fn table_arguments_are_parsed() {
        let body = "\n| Name | Required | Description |\n|------|----------|-------------|\n| `name` | yes | Queue name |\n| `delay` | no | Delay seconds |\n";
        let fields = parse_table(body);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "name");
        assert_eq!(fields[0].requirement, Some(Requirement::Required));
        assert_eq!(fields[1].description, "Delay seconds");
    }

    #[test]
    fn resource_page_without_sections_keeps_overview() -> Result<(), Box<dyn std::error::Error>> {
        let document = MarkdownParser::new()?.parse("");
        assert!(chunker(1000, 200)?.chunk(&document, &s3_source()).is_empty());

        let document = MarkdownParser::new()?.parse("Just some words without structure.");
        let chunks = chunker(1000, 200)?.chunk(&document, &s3_source());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::Overview);
        Ok(())
    }

    #[test]
    fn every_chunk_inherits_source_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let mut source = s3_source();
        source.doc_type = DocType::Readme;
        source.service = None;
        let text = "# Module\n\n".to_string() + &"Keep state in a versioned bucket. ".repeat(120);
        let document = MarkdownParser::new()?.parse(&text);

        let chunks = chunker(300, 50)?.chunk(&document, &source);
        assert!(chunks.len() > 1);
        for (index, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.provider, source.provider);
            assert_eq!(chunk.service, source.service);
            assert_eq!(chunk.name, source.name);
            assert_eq!(chunk.doc_type, source.doc_type);
            assert_eq!(chunk.chunk_type, ChunkType::Content);
            assert_eq!(chunk.source_metadata.get("chunk_index"), Some(&index.to_string()));
            assert!(!chunk.content.trim().is_empty());
        }
        Ok(())
    }
}
