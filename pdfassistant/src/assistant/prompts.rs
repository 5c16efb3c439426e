pub const ASSISTANT_INSTRUCTIONS: &str = "You are a helpful assistant that answers questions about a PDF document. \
Base your answers on the references from the knowledge base when they are relevant. \
If the references do not contain the answer, say so instead of guessing.";

pub fn format_system_prompt(references: Option<&str>) -> String {
    match references {
        Some(references) if !references.is_empty() => format!(
            "{}\n\nUse the following references from the knowledge base if they help answer the question.\n\
            <references>\n{}\n</references>",
            ASSISTANT_INSTRUCTIONS, references
        ),
        _ => ASSISTANT_INSTRUCTIONS.to_string(),
    }
}

pub fn format_tool_call(query: &str) -> String {
    format!("Running: search_knowledge_base(query: {})", query)
}
