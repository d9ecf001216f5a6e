//! Ask command: answer one question from a course's materials.

use std::io::Write;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use super::{build_embedder, build_generator, build_vectors, cancel_on_ctrl_c, open_store};
use crate::answer::AnswerSynthesizer;
use crate::config::Settings;
use crate::qa::{AskRequest, QaService};
use crate::retrieval::HybridRetriever;
use crate::types::{CourseId, RetrievedChunk};

pub async fn run(
    config: &Settings,
    course: u32,
    question: String,
    stream: bool,
    json: bool,
) -> Result<()> {
    let course_id = CourseId::from_u32(course).context("course id must be positive")?;

    let store = open_store(config)?;
    let embedder = build_embedder(config)?;
    let vectors = build_vectors(config, embedder.dimension())?;
    let generator = build_generator(config)?;

    let retriever =
        HybridRetriever::new(store, vectors, embedder).with_top_k(config.retrieval.top_k);
    let service = QaService::new(retriever, AnswerSynthesizer::new(generator))
        .with_fusion(config.retrieval.rrf_k, config.retrieval.fused_top_n);

    let request = AskRequest::new(course_id, question);
    let cancel = cancel_on_ctrl_c();

    if stream {
        let (tx, mut rx) = mpsc::channel::<String>(32);
        let printer = tokio::spawn(async move {
            let mut stdout = std::io::stdout();
            while let Some(piece) = rx.recv().await {
                print!("{piece}");
                let _ = stdout.flush();
            }
            println!();
        });

        let result = service.ask_stream(request, tx, &cancel).await;
        printer.await?;
        print_sources(&result?);
        return Ok(());
    }

    let answer = service.ask(request, &cancel).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        println!("{}", answer.text);
        print_sources(&answer.sources);
    }
    Ok(())
}

fn print_sources(sources: &[RetrievedChunk]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (i, source) in sources.iter().enumerate() {
        let chunk = &source.chunk;
        println!(
            "  [{}] document {} chunk {} (chars {}-{}, score {:.4})",
            i + 1,
            chunk.document_id,
            chunk.chunk_index,
            chunk.start_offset,
            chunk.end_offset,
            source.score
        );
    }
}
