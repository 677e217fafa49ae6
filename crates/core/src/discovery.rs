use crate::config::{ExtraDocument, IngestionSettings};
use crate::error::{ConfigError, LoadError};
use crate::models::{DocFormat, DocType, DocumentSource};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub sources: Vec<DocumentSource>,
    pub errors: Vec<String>,
}

pub struct SourceDiscovery {
    provider: String,
    docs_base_url: String,
    index_path: PathBuf,
    extra_documents: Vec<ExtraDocument>,
    service_heading: Regex,
    asset_link: Regex,
    asset_name: Regex,
    best_practice: GlobSet,
    readme: GlobSet,
}

fn case_insensitive(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).case_insensitive(true).build()
}

impl SourceDiscovery {
    pub fn new(settings: &IngestionSettings) -> Result<Self, ConfigError> {
        let glob_error = |error: globset::Error| ConfigError::Invalid(format!("glob: {error}"));

        let best_practice = GlobSetBuilder::new()
            .add(case_insensitive("**/*best_practice*.{md,pdf}").map_err(glob_error)?)
            .build()
            .map_err(glob_error)?;
        let readme = GlobSetBuilder::new()
            .add(case_insensitive("**/README.md").map_err(glob_error)?)
            .build()
            .map_err(glob_error)?;

        Ok(Self {
            provider: settings.provider.clone(),
            docs_base_url: settings.docs_base_url.trim_end_matches('/').to_string(),
            index_path: settings.index_path.clone(),
            extra_documents: settings.extra_documents.clone(),
            service_heading: Regex::new(r"^##\s+(.+)$")?,
            asset_link: Regex::new(r"^- \[([^\]]+)\]\((https://registry\.terraform\.io[^)]+)\)")?,
            asset_name: Regex::new(r"^aws_[A-Za-z0-9_]+$")?,
            best_practice,
            readme,
        })
    }

    /// Sources for `types`, in discovery order: index, scans, extras.
    pub fn discover(&self, types: &BTreeSet<DocType>, scan_dirs: &[PathBuf]) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();

        if types.iter().any(DocType::is_structured) {
            match fs::read_to_string(&self.index_path) {
                Ok(contents) => outcome.sources.extend(
                    self.parse_index(&contents)
                        .into_iter()
                        .filter(|source| types.contains(&source.doc_type)),
                ),
                Err(error) => outcome.errors.push(format!(
                    "provider index {}: {error}",
                    self.index_path.display()
                )),
            }
        }

        for doc_type in [DocType::BestPractice, DocType::Readme] {
            if !types.contains(&doc_type) {
                continue;
            }
            for dir in scan_dirs {
                match self.scan_dir(dir, doc_type) {
                    Ok(found) => outcome.sources.extend(found),
                    Err(error) => outcome.errors.push(error),
                }
            }
        }

        for extra in &self.extra_documents {
            if types.contains(&extra.doc_type) {
                match self.extra_source(extra) {
                    Some(source) => outcome.sources.push(source),
                    None => outcome
                        .errors
                        .push(LoadError::UnsupportedFormat(extra.path.clone()).to_string()),
                }
            }
        }

        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        outcome.sources.retain(|source| {
            let fresh = seen.insert(source.identity());
            if !fresh {
                duplicates.push(format!("duplicate document {} ({})", source.name, source.uri));
            }
            fresh
        });
        outcome.errors.extend(duplicates);

        for error in &outcome.errors {
            warn!(error = %error, "discovery problem");
        }
        debug!(sources = outcome.sources.len(), "discovery finished");
        outcome
    }

    pub fn parse_index(&self, contents: &str) -> Vec<DocumentSource> {
        let mut sources = Vec::new();
        let mut seen = HashSet::new();
        let mut service: Option<String> = None;
        let mut doc_type: Option<DocType> = None;

        for line in contents.lines() {
            let line = line.trim_end();
            if line.starts_with("### Resources") {
                doc_type = Some(DocType::Resource);
                continue;
            }
            if line.starts_with("### Data Sources") {
                doc_type = Some(DocType::DataSource);
                continue;
            }
            if let Some(captures) = self.service_heading.captures(line) {
                service = Some(captures[1].trim().to_string());
                continue;
            }

            let (Some(captures), Some(current_type)) = (self.asset_link.captures(line), doc_type)
            else {
                continue;
            };
            let name = captures[1].trim();
            if !self.asset_name.is_match(name) {
                debug!(name, "skipping invalid asset name");
                continue;
            }
            if !seen.insert((name.to_string(), current_type)) {
                continue;
            }

            sources.push(DocumentSource {
                uri: self.docs_url(name, current_type),
                format: DocFormat::Markdown,
                doc_type: current_type,
                provider: self.provider.clone(),
                service: service.clone(),
                name: name.to_string(),
            });
        }

        sources
    }

    fn docs_url(&self, name: &str, doc_type: DocType) -> String {
        let folder = if doc_type == DocType::DataSource { "d" } else { "r" };
        let page = name.strip_prefix("aws_").unwrap_or(name);
        format!("{}/{folder}/{page}.html.markdown", self.docs_base_url)
    }

    pub fn scan_dir(&self, dir: &Path, doc_type: DocType) -> Result<Vec<DocumentSource>, String> {
        if !dir.is_dir() {
            return Err(format!("scan dir {} is not a readable directory", dir.display()));
        }
        let patterns = match doc_type {
            DocType::BestPractice => &self.best_practice,
            DocType::Readme => &self.readme,
            _ => return Ok(Vec::new()),
        };

        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.strip_prefix(dir)
                    .map(|relative| patterns.is_match(relative))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort_unstable();

        Ok(paths
            .into_iter()
            .filter_map(|path| {
                let mut source = self.local_source(&path, doc_type, None)?;
                source.name = scanned_name(dir, &path)?;
                Some(source)
            })
            .collect())
    }

    fn extra_source(&self, extra: &ExtraDocument) -> Option<DocumentSource> {
        let mut source = self.local_source(Path::new(&extra.path), extra.doc_type, extra.service.clone())?;
        if extra.path.starts_with("http://") || extra.path.starts_with("https://") {
            source.uri = extra.path.clone();
        }
        Some(source)
    }

    fn local_source(
        &self,
        path: &Path,
        doc_type: DocType,
        service: Option<String>,
    ) -> Option<DocumentSource> {
        let uri = path.to_string_lossy().to_string();
        let format = DocFormat::detect(&uri)?;
        let name = path.file_stem()?.to_string_lossy().to_string();
        Some(DocumentSource {
            uri,
            format,
            doc_type,
            provider: self.provider.clone(),
            service,
            name,
        })
    }
}

/// Path below the scan root without its extension, e.g. `mod_a/README`.
fn scanned_name(dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(dir).ok()?.with_extension("");
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Applies type and service filters. Runs before any load.
pub fn filter_sources(
    sources: Vec<DocumentSource>,
    types: &BTreeSet<DocType>,
    services: Option<&[String]>,
) -> Vec<DocumentSource> {
    sources
        .into_iter()
        .filter(|source| types.contains(&source.doc_type))
        .filter(|source| services.map_or(true, |services| source.matches_services(services)))
        .collect()
}
