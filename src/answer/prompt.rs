//! Prompt assembly for grounded answers.

use crate::types::RetrievedChunk;

/// Answer returned when retrieval produced no context.
pub const NO_CONTEXT_MESSAGE: &str =
    "I could not find any relevant information in the provided materials to answer your question.";

const SYSTEM_TEMPLATE: &str = "You are an excellent AI assistant for university lectures.
Please answer the user's question based ONLY on the provided context information below.
If the context does not contain the answer, state that you cannot answer based on the provided materials.
Do not make up information. Be concise, helpful, and accurate.

---
{context}
---
";

/// Numbered reference block, in the given order, starting at 1.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    let mut context = String::from("--- Context Information ---\n");
    for (i, retrieved) in chunks.iter().enumerate() {
        context.push_str(&format!("\n[Reference {}]\n{}\n", i + 1, retrieved.chunk.text));
    }
    context.push_str("--- End of Context ---\n");
    context
}

/// Instruction template with the context block embedded.
pub fn system_prompt(chunks: &[RetrievedChunk]) -> String {
    SYSTEM_TEMPLATE.replace("{context}", &build_context(chunks))
}
