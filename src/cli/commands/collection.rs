//! Collection maintenance command.

use anyhow::Result;

use super::{build_embedder, build_vectors};
use crate::cli::CollectionAction;
use crate::config::Settings;

pub async fn run(action: CollectionAction, config: &Settings) -> Result<()> {
    match action {
        CollectionAction::Reset => {
            let embedder = build_embedder(config)?;
            let vectors = build_vectors(config, embedder.dimension())?;
            vectors.recreate_collection().await?;
            println!("Vector collection recreated ({} dimensions).", embedder.dimension());
            println!(
                "Existing chunks keep their rows; clear the store to re-embed them with 'lecture-rag sync'."
            );
            Ok(())
        }
    }
}
