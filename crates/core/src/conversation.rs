use crate::chat::{ChatMessage, ChatModel, ChatPrompt};
use crate::embeddings::Embedder;
use crate::error::ChatError;
use crate::index::FlatIndex;
use crate::models::{ScoredChunk, Speaker, Turn};
use std::sync::Arc;
use tracing::debug;

/// Fixed reply the assistant must give when the documents don't cover a question.
pub const NOT_FOUND_REPLY: &str = "I couldn't find that in your files.";

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant for 'TalkDocs'.
Always answer based only on the provided documents.
If the answer is not found in the documents, say \"I couldn't find that in your files.\"
Provide clear, concise, and well-formatted responses.
You can also compare the contents of the documents and judge which one is better or best.";

const CONDENSE_PROMPT: &str = "Given the following conversation and a follow up question, \
rephrase the follow up question to be a standalone question, in its original language.";

/// Prompt asking the model to rewrite a follow-up into a standalone question.
/// Returns `None` when there is no history to resolve against.
pub fn condense_question(history: &[Turn], question: &str) -> Option<ChatPrompt> {
    if history.is_empty() {
        return None;
    }

    let transcript = history
        .iter()
        .map(|turn| match turn.speaker {
            Speaker::User => format!("Human: {}", turn.message),
            Speaker::Bot => format!("Assistant: {}", turn.message),
        })
        .collect::<Vec<_>>()
        .join("\n");

    Some(ChatPrompt {
        messages: vec![ChatMessage::user(format!(
            "{CONDENSE_PROMPT}\n\nChat History:\n{transcript}\nFollow Up Input: {question}\nStandalone question:"
        ))],
    })
}

/// Lays out the answer prompt: instruction and retrieved context as the
/// system message, earlier turns in order, then the new question.
pub fn build_prompt(
    system: &str,
    chunks: &[ScoredChunk],
    history: &[Turn],
    question: &str,
) -> ChatPrompt {
    let context = chunks
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(format!(
        "{system}\n\nContext from the uploaded documents:\n----------------\n{context}"
    )));

    for turn in history {
        messages.push(match turn.speaker {
            Speaker::User => ChatMessage::user(turn.message.clone()),
            Speaker::Bot => ChatMessage::assistant(turn.message.clone()),
        });
    }

    messages.push(ChatMessage::user(question));
    ChatPrompt { messages }
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub reply: String,
    /// Query actually used for retrieval, after condensing.
    pub query: String,
    pub sources: Vec<ScoredChunk>,
}

/// Retrieval, prompting and model call bound to one vector index, with its
/// own running memory. Replaced, never updated, when documents are reprocessed.
pub struct Conversation {
    embedder: Arc<dyn Embedder>,
    index: FlatIndex,
    model: Arc<dyn ChatModel>,
    memory: Vec<Turn>,
    top_k: usize,
}

impl Conversation {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: FlatIndex,
        model: Arc<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            model,
            memory: Vec::new(),
            top_k: top_k.max(1),
        }
    }

    pub fn memory(&self) -> &[Turn] {
        &self.memory
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, ChatError> {
        let query_vector = self.embedder.embed_query(query).await?;
        Ok(self.index.search(&query_vector, k)?)
    }

    async fn standalone_question(&self, question: &str) -> Result<String, ChatError> {
        let Some(prompt) = condense_question(&self.memory, question) else {
            return Ok(question.to_string());
        };

        let rewritten = self.model.complete(&prompt).await?;
        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            Ok(question.to_string())
        } else {
            Ok(rewritten.to_string())
        }
    }

    pub async fn answer(&mut self, question: &str) -> Result<Answer, ChatError> {
        let query = self.standalone_question(question).await?;
        let sources = self.retrieve(&query, self.top_k).await?;
        debug!(query = %query, sources = sources.len(), "retrieved context");

        let prompt = build_prompt(SYSTEM_PROMPT, &sources, &self.memory, question);
        let reply = self.model.complete(&prompt).await?;

        self.memory.push(Turn::user(question));
        self.memory.push(Turn::bot(reply.clone()));

        Ok(Answer {
            reply,
            query,
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Role;
    use crate::models::Chunk;

    fn hit(text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                index: 0,
                text: text.to_string(),
            },
            distance: 0.0,
        }
    }

    #[test]
    fn system_prompt_contains_verbatim_fallback() {
        assert!(SYSTEM_PROMPT.contains(NOT_FOUND_REPLY));
        assert!(SYSTEM_PROMPT.contains("only on the provided documents"));
    }

    #[test]
    fn prompt_puts_context_in_system_message_and_question_last() {
        let history = vec![Turn::user("Who sent it?"), Turn::bot("ACME Corp.")];
        let prompt = build_prompt(
            SYSTEM_PROMPT,
            &[hit("Invoice Total: $42.00"), hit("Sender: ACME Corp.")],
            &history,
            "What is the invoice total?",
        );

        let roles: Vec<Role> = prompt.messages.iter().map(|message| message.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );

        let system = &prompt.messages[0].content;
        assert!(system.starts_with(SYSTEM_PROMPT));
        assert!(system.contains("Invoice Total: $42.00\n\nSender: ACME Corp."));
        assert_eq!(prompt.messages[3].content, "What is the invoice total?");
    }

    #[test]
    fn condensing_needs_history() {
        assert!(condense_question(&[], "What about the second one?").is_none());

        let history = vec![Turn::user("List the reports"), Turn::bot("Q1 and Q2.")];
        let prompt = condense_question(&history, "What about the second one?")
            .expect("history should produce a prompt");
        let content = &prompt.messages[0].content;
        assert!(content.contains("Human: List the reports\nAssistant: Q1 and Q2."));
        assert!(content.ends_with("Follow Up Input: What about the second one?\nStandalone question:"));
    }
}
