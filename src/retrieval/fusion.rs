//! Reciprocal Rank Fusion.

use std::collections::HashMap;

use crate::types::{ChunkId, RetrievedChunk};

/// RRF smoothing constant from Cormack, Clarke and Buettcher (SIGIR 2009).
pub const RRF_K: f32 = 60.0;

/// Chunks kept after fusion unless configured otherwise.
pub const DEFAULT_TOP_N: usize = 3;

/// Merge two ranked lists with Reciprocal Rank Fusion.
///
/// Each chunk at zero-based rank `r` in a list contributes `1 / (r + k)`;
/// chunks present in both lists sum their contributions. The payload kept for
/// a chunk is the one from the first list it was seen in (`results_a` before
/// `results_b`). The returned `score` is the fused score.
///
/// Ordering is by fused score descending. Exactly equal scores keep
/// first-seen order.
pub fn reciprocal_rank_fusion(
    results_a: &[RetrievedChunk],
    results_b: &[RetrievedChunk],
    k: f32,
    top_n: usize,
) -> Vec<RetrievedChunk> {
    let mut positions: HashMap<ChunkId, usize> = HashMap::new();
    let mut fused: Vec<RetrievedChunk> = Vec::new();

    for list in [results_a, results_b] {
        for (rank, item) in list.iter().enumerate() {
            let contribution = 1.0 / (rank as f32 + k);
            match positions.get(&item.chunk.id) {
                Some(&pos) => fused[pos].score += contribution,
                None => {
                    positions.insert(item.chunk.id, fused.len());
                    fused.push(RetrievedChunk::new(item.chunk.clone(), contribution));
                }
            }
        }
    }

    // Stable sort keeps first-seen order for ties
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(top_n);
    fused
}
