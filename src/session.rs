//! A question-answering session over one corpus directory.
//!
//! [`RapidReviewSession`] ties the pipeline together. For every query it
//! budgets the generator's input window, chunks the corpus to fit, indexes
//! and embeds the chunks, retrieves the best `top_k`, and asks the generator
//! for an answer:
//!
//! ```text
//! plan ─▶ scan corpus ─▶ chunk ─▶ store ─▶ embed ─▶ retrieve ─▶ prompt ─▶ generate
//! ```
//!
//! The corpus is rescanned and rechunked on every query, so files added,
//! edited or removed between queries are picked up. Chunks that are no longer
//! produced are dropped from the store; chunks whose text is unchanged keep
//! their vectors and are not embedded again.

use anyhow::Result;
use std::collections::HashSet;

use crate::budget::{BudgetError, ContextBudget, ContextPlan};
use crate::chunk::chunk_corpus;
use crate::config::Config;
use crate::corpus::scan_articles;
use crate::generator::{create_generator, Generator};
use crate::models::QueryOutput;
use crate::progress::{NoProgress, ProgressReporter};
use crate::prompt::{AnswerParser, PromptTemplate};
use crate::retriever;
use crate::store::DocumentStore;
use crate::tokenize::{create_tokenizer, TokenCounter};

/// Per-query overrides.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// Number of chunks to retrieve; falls back to `retriever.top_k`.
    pub top_k: Option<usize>,
}

pub struct RapidReviewSession {
    config: Config,
    store: Box<dyn DocumentStore>,
    tokenizer: Box<dyn TokenCounter>,
    generator: Box<dyn Generator>,
    progress: Box<dyn ProgressReporter>,
}

impl RapidReviewSession {
    pub fn new(config: Config, store: Box<dyn DocumentStore>) -> Result<Self> {
        let tokenizer = create_tokenizer(&config.tokenizer, config.generator.max_seq_length)?;
        let generator = create_generator(&config.generator)?;

        tracing::info!(
            max_seq_length = config.retriever.max_seq_length,
            provider = %config.retriever.provider,
            "retriever"
        );
        tracing::info!(
            max_seq_length = tokenizer.model_max_length(),
            model = generator.model_name(),
            tokenizer = tokenizer.name(),
            "generator"
        );

        Ok(Self {
            config,
            store,
            tokenizer,
            generator,
            progress: Box::new(NoProgress),
        })
    }

    pub fn with_generator(mut self, generator: Box<dyn Generator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn budget(&self) -> ContextBudget {
        ContextBudget {
            generator_max_length: self.tokenizer.model_max_length(),
            retriever_max_length: self.config.retriever.max_seq_length,
            max_answer_tokens: self.config.generator.max_answer_tokens,
            seq_length_buffer: self.config.budget.seq_length_buffer,
            min_context_size: self.config.budget.min_context_size,
        }
    }

    /// Context size and chunk size for `prompt` and `query`.
    pub fn plan(&self, prompt: &str, query: &str, top_k: usize) -> Result<ContextPlan> {
        let template = PromptTemplate::new(prompt);
        let prompt_tokens = self.tokenizer.count_tokens(&template.static_text())?;
        let query_tokens = self.tokenizer.count_tokens(query)?;
        let plan = self.budget().plan(prompt_tokens, query_tokens, top_k)?;
        tracing::debug!(
            prompt_tokens,
            query_tokens,
            context_size = plan.context_size,
            chunk_size = plan.chunk_size,
            "context plan"
        );
        Ok(plan)
    }

    fn resolve_top_k(&self, params: &QueryParams) -> Result<usize> {
        let top_k = params.top_k.unwrap_or(self.config.retriever.top_k);
        if top_k == 0 {
            return Err(BudgetError::ZeroTopK.into());
        }
        Ok(top_k)
    }

    /// Chunk the corpus at `chunk_size` and sync it into the store, embedding
    /// new or changed chunks when the retriever mode needs vectors.
    async fn prepare_index(&self, chunk_size: usize) -> Result<()> {
        let entries = scan_articles(
            &self.config.session.src_dir,
            &self.config.session.extension,
        )?;
        let chunks = chunk_corpus(
            &entries,
            self.tokenizer.as_ref(),
            chunk_size,
            self.progress.as_ref(),
        )?;

        let keep: HashSet<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
        let removed = self.store.retain_chunks(&keep).await?;
        self.store.write_chunks(&chunks).await?;
        tracing::info!(
            articles = entries.len(),
            chunks = chunks.len(),
            removed,
            chunk_size,
            "indexed corpus"
        );

        if self.config.retriever.mode != "keyword" {
            retriever::update_embeddings(
                self.store.as_ref(),
                &self.config.retriever,
                self.progress.as_ref(),
            )
            .await?;
        }
        Ok(())
    }

    /// Run every step except generation.
    pub async fn retrieve_only(
        &self,
        prompt: &str,
        query: &str,
        article_id: Option<&str>,
        params: &QueryParams,
    ) -> Result<QueryOutput> {
        let top_k = self.resolve_top_k(params)?;
        let plan = self.plan(prompt, query, top_k)?;
        self.prepare_index(plan.chunk_size).await?;

        let retrieved = retriever::retrieve(
            self.store.as_ref(),
            &self.config.retriever,
            query,
            top_k,
            article_id,
        )
        .await?;

        Ok(QueryOutput {
            run_id: uuid::Uuid::new_v4(),
            query: query.to_string(),
            plan,
            retrieved,
            answers: Vec::new(),
        })
    }

    /// Answer `query` from the corpus, optionally restricted to one article.
    pub async fn run_query(
        &self,
        prompt: &str,
        query: &str,
        article_id: Option<&str>,
        params: &QueryParams,
    ) -> Result<QueryOutput> {
        let mut output = self.retrieve_only(prompt, query, article_id, params).await?;

        let template = PromptTemplate::new(prompt);
        let rendered = template.render(query, &output.retrieved);
        let raw = self
            .generator
            .generate(&rendered, self.config.generator.max_answer_tokens)
            .await?;

        let chunk_ids: Vec<String> = output
            .retrieved
            .iter()
            .map(|c| c.chunk_id.clone())
            .collect();
        output.answers.push(AnswerParser::parse(
            &raw,
            query,
            &chunk_ids,
            self.generator.model_name(),
        ));

        tracing::info!(run_id = %output.run_id, documents = chunk_ids.len(), "answered query");
        Ok(output)
    }
}
