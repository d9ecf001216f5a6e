//! CLI argument parsing using clap.
//!
//! Contains the Cli struct, Commands enum, and all subcommand enums.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::types::DocumentType;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

const QUICK_START: &str = "Quick Start:
  $ lecture-rag init                               # Create .lecture-rag/settings.toml
  $ lecture-rag documents add 1 1 slides/*.pdf     # Upload lecture files for course 1
  $ lecture-rag sync                               # Chunk, embed and index new documents
  $ lecture-rag ask 1 \"What is a binary heap?\"     # Answer from course 1 materials";

/// Lecture material question answering
#[derive(Parser)]
#[command(
    name = "lecture-rag",
    version = env!("CARGO_PKG_VERSION"),
    about = "Answer questions from lecture materials",
    long_about = "Ingest lecture documents, index them for hybrid retrieval, and answer questions grounded in them.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = QUICK_START
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .lecture-rag directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings from .lecture-rag/settings.toml")]
    Config,

    /// Manage uploaded documents
    #[command(about = "Add and list lecture documents")]
    Documents {
        #[command(subcommand)]
        action: DocumentAction,
    },

    /// Index every document that has no chunks yet
    #[command(
        about = "Chunk, embed and index pending documents",
        after_help = "Documents that fail are logged and left for a later run.\nCtrl-C stops between units of work."
    )]
    Sync,

    /// Answer a question
    #[command(
        about = "Answer a question from a course's materials",
        after_help = "Examples:\n  lecture-rag ask 1 \"What is amortized analysis?\"\n  lecture-rag ask 1 \"Explain heap sort\" --stream\n  lecture-rag ask 1 \"Define a trie\" --json"
    )]
    Ask {
        /// Course to search
        course: u32,

        /// Question text
        question: String,

        /// Print the answer as it is generated
        #[arg(long, conflicts_with = "json")]
        stream: bool,

        /// Output answer and sources as JSON
        #[arg(long)]
        json: bool,
    },

    /// Vector collection maintenance
    #[command(about = "Manage the vector collection")]
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
}

/// Document management actions
#[derive(Subcommand)]
pub enum DocumentAction {
    /// Upload files and register them as documents
    #[command(
        about = "Store files and create document records",
        after_help = "Examples:\n  lecture-rag documents add 1 2 notes/week1.md\n  lecture-rag documents add 1 2 \"slides/*.pdf\" --type slides"
    )]
    Add {
        /// Course the documents belong to
        course: u32,

        /// Semester the documents belong to
        semester: u32,

        /// Files or glob patterns
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<String>,

        /// Title (single file only; defaults to the file name)
        #[arg(long)]
        title: Option<String>,

        /// Document type (defaults to a guess from the extension)
        #[arg(long = "type", value_name = "TYPE")]
        doc_type: Option<DocumentType>,
    },

    /// List documents with their chunk counts
    #[command(about = "List documents and indexing state")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Vector collection actions
#[derive(Subcommand)]
pub enum CollectionAction {
    /// Drop and recreate the collection
    #[command(about = "Drop every vector and recreate an empty collection")]
    Reset,
}
