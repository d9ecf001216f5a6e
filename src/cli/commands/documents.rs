//! Documents management command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;

use super::{open_files, open_store};
use crate::cli::DocumentAction;
use crate::config::Settings;
use crate::storage::{DocumentRepository, FileStorage};
use crate::types::{CourseId, Document, DocumentType, NewDocument, SemesterId};

pub async fn run(action: DocumentAction, config: &Settings) -> Result<()> {
    match action {
        DocumentAction::Add {
            course,
            semester,
            paths,
            title,
            doc_type,
        } => run_add(config, course, semester, &paths, title, doc_type).await,
        DocumentAction::List { json } => run_list(config, json).await,
    }
}

/// Expand glob patterns; plain paths pass through unchanged.
pub fn expand_paths(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let is_glob = pattern.contains(['*', '?', '[']);
        if !is_glob {
            files.push(PathBuf::from(pattern));
            continue;
        }

        let mut matched = false;
        for entry in glob::glob(pattern).with_context(|| format!("invalid pattern '{pattern}'"))? {
            let path = entry?;
            if path.is_file() {
                files.push(path);
                matched = true;
            }
        }
        if !matched {
            eprintln!("Warning: pattern '{pattern}' matched no files");
        }
    }
    Ok(files)
}

fn file_title(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

async fn run_add(
    config: &Settings,
    course: u32,
    semester: u32,
    patterns: &[String],
    title: Option<String>,
    doc_type: Option<DocumentType>,
) -> Result<()> {
    let course_id = CourseId::from_u32(course).context("course id must be positive")?;
    let semester_id = SemesterId::from_u32(semester).context("semester id must be positive")?;

    let paths = expand_paths(patterns)?;
    if paths.is_empty() {
        bail!("no files to add");
    }
    if title.is_some() && paths.len() > 1 {
        bail!("--title can only be used with a single file");
    }

    let store = open_store(config)?;
    let files = open_files(config)?;

    for path in paths {
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let kind = doc_type.unwrap_or_else(|| {
            DocumentType::from_extension(
                path.extension().and_then(|e| e.to_str()).unwrap_or_default(),
            )
        });

        let stored = files.save(course_id, &file_name, &content).await?;
        let document = store
            .create_document(NewDocument {
                course_id,
                semester_id,
                title: title.clone().unwrap_or_else(|| file_title(&path)),
                source: stored.locator.clone(),
                checksum: stored.checksum,
                doc_type: kind,
            })
            .await;

        match document {
            Ok(document) => println!(
                "Added document {} '{}' ({}, {} bytes)",
                document.id,
                document.title,
                document.doc_type,
                content.len()
            ),
            Err(e) => {
                // Keep storage and records in step
                if let Err(cleanup) = files.delete(&stored.locator).await {
                    tracing::warn!(target: "cli", "failed to remove {}: {cleanup}", stored.locator);
                }
                return Err(e.into());
            }
        }
    }

    println!("Run 'lecture-rag sync' to index new documents.");
    Ok(())
}

#[derive(Serialize)]
struct DocumentRow<'a> {
    #[serde(flatten)]
    document: &'a Document,
    chunks: usize,
}

async fn run_list(config: &Settings, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let documents = store.list_documents().await?;

    let mut rows = Vec::with_capacity(documents.len());
    for document in &documents {
        let chunks = store.chunk_count(document.id).await?;
        rows.push(DocumentRow { document, chunks });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No documents. Add some with 'lecture-rag documents add'.");
        return Ok(());
    }

    println!(
        "{:>5}  {:>6}  {:>8}  {:<8}  {:>6}  TITLE",
        "ID", "COURSE", "SEMESTER", "TYPE", "CHUNKS"
    );
    for row in &rows {
        let d = row.document;
        println!(
            "{:>5}  {:>6}  {:>8}  {:<8}  {:>6}  {}",
            d.id.to_string(),
            d.course_id.to_string(),
            d.semester_id.to_string(),
            d.doc_type.as_str(),
            row.chunks,
            d.title
        );
    }
    Ok(())
}
