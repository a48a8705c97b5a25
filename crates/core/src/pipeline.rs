//! Retrieve-then-generate conversation pipeline.
//!
//! Each call runs a fixed two-step state machine over a fresh
//! [`ConversationState`]: `Retrieve` looks up context for the latest user
//! message, `Generate` calls the chat model once and appends its reply. The
//! pipeline itself keeps no conversation state, so one instance can serve
//! concurrent conversations.

use crate::config::{Settings, DEFAULT_TOP_K};
use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::index::IndexStore;
use crate::llm::ChatModel;
use crate::models::{Answer, ChatMessage, Role, SourceRef};
use crate::retriever::Retriever;
use std::sync::Arc;
use tracing::{debug, info};

pub const SYSTEM_PROMPT: &str = "You are a Regulatory Document Intelligence Agent specialised in \
analysing FDA drug review documents. You help pharmaceutical scientists, regulatory affairs \
professionals and medical affairs teams extract insights from FDA approval packages.

Answer from the retrieved context below. Do not print your reasoning steps as a separate \
chain-of-thought transcript; present the final, structured answer.

INSTRUCTIONS:
1. Think step by step before answering. Break complex regulatory questions into parts.
2. Always cite the document and page each statement comes from.
3. If the context does not contain enough information, say so clearly. Never fabricate FDA data.
4. When comparing drugs, organise the response by evaluation criteria.
5. For safety or efficacy questions, separate what the FDA reviewer stated from what the \
sponsor claimed.

ANSWER STRUCTURE for complex questions:
- Step 1: Identify - what information the question requires.
- Step 2: Locate - what the retrieved documents say.
- Step 3: Analyze - how that information answers the question.
- Step 4: Conclude - a clear answer with citations.

For simple factual lookups, answer directly with citations.";

pub const CONTEXT_HEADER: &str = "RETRIEVED CONTEXT FROM DOCUMENTS:";
pub const NO_CONTEXT_MARKER: &str = "No relevant context was found in the document database.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    pub context: String,
    pub sources: Vec<SourceRef>,
}

impl ConversationState {
    /// Seeds a state from caller-owned history plus the new question.
    pub fn new(history: &[ChatMessage], question: &str) -> Self {
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(question));
        Self {
            messages,
            context: String::new(),
            sources: Vec::new(),
        }
    }

    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
    }

    pub fn latest_assistant_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.content.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Retrieve,
    Generate,
    Done,
}

pub struct ConversationPipeline {
    retriever: Retriever,
    model: Arc<dyn ChatModel>,
    top_k: usize,
}

impl ConversationPipeline {
    pub fn new(retriever: Retriever, model: Arc<dyn ChatModel>) -> Self {
        Self {
            retriever,
            model,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Loads the persisted index and wires a pipeline from `settings`.
    pub fn open(
        settings: &Settings,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
    ) -> Result<Self, QueryError> {
        let index = IndexStore::new(&settings.index_dir).load(embedder.as_ref())?;
        info!(
            entries = index.len(),
            model = %index.manifest().embedding_model,
            chat_model = model.model_name(),
            "pipeline ready"
        );
        let retriever =
            Retriever::new(Arc::new(index), embedder).with_excerpt_chars(settings.excerpt_chars);
        Ok(Self::new(retriever, model).with_top_k(settings.top_k))
    }

    /// Answers `question` given the prior turns in `history`. The caller
    /// owns the history and appends the returned answer to it.
    pub async fn answer(
        &self,
        question: &str,
        history: &[ChatMessage],
    ) -> Result<Answer, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let state = self.run(ConversationState::new(history, question)).await?;
        let answer = state
            .latest_assistant_message()
            .unwrap_or_default()
            .to_string();

        Ok(Answer {
            answer,
            sources: state.sources,
        })
    }

    /// Drives `state` from `Retrieve` to `Done`.
    pub async fn run(&self, mut state: ConversationState) -> Result<ConversationState, QueryError> {
        let mut step = PipelineStep::Retrieve;
        loop {
            debug!(?step, "pipeline step");
            step = match step {
                PipelineStep::Retrieve => {
                    self.retrieve(&mut state)?;
                    PipelineStep::Generate
                }
                PipelineStep::Generate => {
                    self.generate(&mut state).await?;
                    PipelineStep::Done
                }
                PipelineStep::Done => return Ok(state),
            };
        }
    }

    fn retrieve(&self, state: &mut ConversationState) -> Result<(), QueryError> {
        let Some(question) = state.latest_user_message() else {
            return Ok(());
        };

        let retrieval = self.retriever.retrieve(question, self.top_k)?;
        state.context = retrieval.context;
        state.sources = retrieval.sources;
        Ok(())
    }

    async fn generate(&self, state: &mut ConversationState) -> Result<(), QueryError> {
        let system = system_prompt(&state.context);
        let reply = self.model.complete(&system, &state.messages).await?;
        info!(
            sources = state.sources.len(),
            reply_chars = reply.len(),
            "generated answer"
        );
        state.messages.push(ChatMessage::assistant(reply));
        Ok(())
    }
}

pub fn system_prompt(context: &str) -> String {
    if context.is_empty() {
        format!("{SYSTEM_PROMPT}\n\n{NO_CONTEXT_MARKER}")
    } else {
        format!("{SYSTEM_PROMPT}\n\n{CONTEXT_HEADER}\n{context}")
    }
}
