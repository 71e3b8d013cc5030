//! Prompt templates.
//!
//! Each prompt has a built-in text; a Markdown file with the same name in the
//! `prompts/` directory overrides it.

use std::path::PathBuf;

use tracing::debug;

use crate::{Error, Result};

const KNOWLEDGE_GRAPH_ANSWER: &str = r#"You are a compliance assistant. Do not address the user as "Val" in your responses.

{history}
Current User Question: {question}

{context}

Instructions:
1. CAREFULLY REVIEW the knowledge graph content above. It contains valuable information about compliance standards, documents, and requirements.
2. When using information from the knowledge graph, cite the specific source as follows:
   - For standards like EN 50600 or ISO/IEC 30134-2, use: (Source: EN 50600) or (Source: ISO/IEC 30134-2)
   - For other entities, use their type: (Source: Standard) or (Source: Regulation)
   - DO NOT use "Message - Untitled" or HTML tags in your citations
3. Only say "The Knowledge Graph doesn't contain specific information about this topic" if there is ABSOLUTELY NO related information.
4. Look for indirect or partial matches - check for related standards and technical specifications.
5. Even if the information seems only loosely related, use it to provide context and supplement with your general knowledge.
6. Use bullet points for clarity where appropriate
7. Maintain a professional tone
8. Be concise but thorough
9. IMPORTANT: If the current question seems to be referring to previous questions or answers, use the conversation history to understand the context.

Answer:
"#;

const FALLBACK_PREAMBLE: &str =
    "Gemini integration is not available. Please configure Google Generative AI properly.";

/// Available prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Question answering over knowledge graph context.
    KnowledgeGraphAnswer,
    /// First line of the generation-free fallback answer.
    FallbackPreamble,
}

impl Prompt {
    /// Prompt file name (Markdown).
    pub fn filename(&self) -> &'static str {
        match self {
            Prompt::KnowledgeGraphAnswer => "knowledge_graph_answer.md",
            Prompt::FallbackPreamble => "fallback_preamble.md",
        }
    }

    /// Built-in text used when no override file exists.
    pub fn builtin(&self) -> &'static str {
        match self {
            Prompt::KnowledgeGraphAnswer => KNOWLEDGE_GRAPH_ANSWER,
            Prompt::FallbackPreamble => FALLBACK_PREAMBLE,
        }
    }

    /// Load from file.
    pub fn load(&self) -> Result<String> {
        load_prompt(self.filename())
    }

    /// Override file if present, built-in text otherwise.
    pub fn load_or_builtin(&self) -> String {
        match self.load() {
            Ok(text) => text,
            Err(err) => {
                debug!("Using built-in prompt {:?}: {}", self, err);
                self.builtin().to_string()
            }
        }
    }
}

/// Load a prompt by file name.
pub fn load_prompt(filename: &str) -> Result<String> {
    let path = prompts_dir().join(filename);
    std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Failed to load prompt {}: {}", filename, e)))
}

/// Prompt directory.
pub fn prompts_dir() -> PathBuf {
    let candidates = [
        PathBuf::from("prompts"),
        PathBuf::from("../prompts"),
        PathBuf::from("../../prompts"),
    ];

    for path in candidates {
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("prompts")
}

/// All prompts.
pub fn list_prompts() -> Vec<Prompt> {
    vec![Prompt::KnowledgeGraphAnswer, Prompt::FallbackPreamble]
}

/// Substitute `{name}` placeholders in a single pass, so substituted values
/// are never re-scanned for placeholders.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let name = &after[..end];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, end))
        });
        match replaced {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
