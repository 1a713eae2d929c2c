//! Context budget and chunk size arithmetic.
//!
//! The generator sees `prompt + query + retrieved chunks + answer` in one
//! input window. Whatever the prompt, query, safety buffer, and answer do
//! not consume is the context budget, shared evenly by the `top_k` chunks
//! the retriever returns:
//!
//! ```text
//! context_size = generator_max − query − prompt − buffer − max_answer
//! chunk_size   = context_size / top_k
//! ```

use serde::Serialize;
use thiserror::Error;

/// Why a prompt/query pair cannot be served with the configured models.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("Prompt + Query is too long: context size {context_size} is below the minimum of {min_context_size} tokens")]
    PromptTooLong {
        context_size: i64,
        min_context_size: usize,
    },
    #[error("Retriever top_k must be >= 1")]
    ZeroTopK,
    #[error("Chunk size ({chunk_size}) is longer than Retriever MAX SEQ LENGTH ({limit})")]
    ChunkExceedsRetriever { chunk_size: usize, limit: usize },
    #[error("Chunk size ({chunk_size}) is longer than QA model MAX SEQ LENGTH ({limit})")]
    ChunkExceedsGenerator { chunk_size: usize, limit: usize },
}

/// Model limits and reservations the budget is computed against.
#[derive(Debug, Clone, Copy)]
pub struct ContextBudget {
    pub generator_max_length: usize,
    pub retriever_max_length: usize,
    pub max_answer_tokens: usize,
    pub seq_length_buffer: usize,
    pub min_context_size: usize,
}

/// Outcome of budgeting one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextPlan {
    pub prompt_tokens: usize,
    pub query_tokens: usize,
    pub context_size: usize,
    pub chunk_size: usize,
    pub top_k: usize,
}

impl ContextBudget {
    /// Tokens left for retrieved context.
    pub fn context_size(
        &self,
        prompt_tokens: usize,
        query_tokens: usize,
    ) -> Result<usize, BudgetError> {
        let context_size = self.generator_max_length as i64
            - query_tokens as i64
            - prompt_tokens as i64
            - self.seq_length_buffer as i64
            - self.max_answer_tokens as i64;

        if context_size < self.min_context_size as i64 {
            return Err(BudgetError::PromptTooLong {
                context_size,
                min_context_size: self.min_context_size,
            });
        }
        Ok(context_size as usize)
    }

    /// Per-chunk share of `context_size` when `top_k` chunks are retrieved.
    pub fn chunk_size(&self, context_size: usize, top_k: usize) -> Result<usize, BudgetError> {
        if top_k == 0 {
            return Err(BudgetError::ZeroTopK);
        }
        let chunk_size = context_size / top_k;

        if chunk_size > self.retriever_max_length {
            return Err(BudgetError::ChunkExceedsRetriever {
                chunk_size,
                limit: self.retriever_max_length,
            });
        }
        if chunk_size > self.generator_max_length {
            return Err(BudgetError::ChunkExceedsGenerator {
                chunk_size,
                limit: self.generator_max_length,
            });
        }
        Ok(chunk_size)
    }

    pub fn plan(
        &self,
        prompt_tokens: usize,
        query_tokens: usize,
        top_k: usize,
    ) -> Result<ContextPlan, BudgetError> {
        if top_k == 0 {
            return Err(BudgetError::ZeroTopK);
        }
        let context_size = self.context_size(prompt_tokens, query_tokens)?;
        let chunk_size = self.chunk_size(context_size, top_k)?;
        Ok(ContextPlan {
            prompt_tokens,
            query_tokens,
            context_size,
            chunk_size,
            top_k,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> ContextBudget {
        ContextBudget {
            generator_max_length: 1024,
            retriever_max_length: 512,
            max_answer_tokens: 256,
            seq_length_buffer: 50,
            min_context_size: 200,
        }
    }

    #[test]
    fn test_context_size_subtracts_everything() {
        // 1024 - 10 - 40 - 50 - 256 = 668
        assert_eq!(budget().context_size(40, 10).unwrap(), 668);
    }

    #[test]
    fn test_context_below_minimum_is_rejected() {
        // 1024 - 300 - 300 - 50 - 256 = 118 < 200
        let err = budget().context_size(300, 300).unwrap_err();
        assert_eq!(
            err,
            BudgetError::PromptTooLong {
                context_size: 118,
                min_context_size: 200
            }
        );
        assert!(err.to_string().starts_with("Prompt + Query is too long"));
    }

    #[test]
    fn test_context_exactly_minimum_is_allowed() {
        // 1024 - 259 - 259 - 50 - 256 = 200
        assert_eq!(budget().context_size(259, 259).unwrap(), 200);
    }

    #[test]
    fn test_negative_budget_does_not_underflow() {
        let err = budget().context_size(5000, 5000).unwrap_err();
        assert!(matches!(err, BudgetError::PromptTooLong { context_size, .. } if context_size < 0));
    }

    #[test]
    fn test_chunk_size_integer_division() {
        assert_eq!(budget().chunk_size(668, 3).unwrap(), 222);
        assert_eq!(budget().chunk_size(668, 4).unwrap(), 167);
    }

    #[test]
    fn test_chunk_size_zero_top_k() {
        assert_eq!(budget().chunk_size(668, 0), Err(BudgetError::ZeroTopK));
    }

    #[test]
    fn test_chunk_exceeding_retriever_limit() {
        // top_k = 1 puts the whole 668-token context in one chunk > 512
        let err = budget().chunk_size(668, 1).unwrap_err();
        assert_eq!(
            err,
            BudgetError::ChunkExceedsRetriever {
                chunk_size: 668,
                limit: 512
            }
        );
    }

    #[test]
    fn test_chunk_exceeding_generator_limit() {
        let b = ContextBudget {
            generator_max_length: 300,
            retriever_max_length: 4096,
            max_answer_tokens: 0,
            seq_length_buffer: 0,
            min_context_size: 0,
        };
        // A context larger than the generator window can only come from a
        // caller-supplied size.
        let err = b.chunk_size(600, 1).unwrap_err();
        assert!(matches!(err, BudgetError::ChunkExceedsGenerator { .. }));
    }

    #[test]
    fn test_plan() {
        let plan = budget().plan(40, 10, 3).unwrap();
        assert_eq!(
            plan,
            ContextPlan {
                prompt_tokens: 40,
                query_tokens: 10,
                context_size: 668,
                chunk_size: 222,
                top_k: 3,
            }
        );
        assert!(plan.chunk_size * plan.top_k <= plan.context_size);
    }
}
