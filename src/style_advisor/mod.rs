//! LLM-backed visual style advisor.
//!
//! Suggests visual styles for a track from its analysis statistics and
//! refines free-text image prompts.

mod claude;
mod types;

pub use claude::{parse_suggestions, strip_code_fences, ClaudeStyleAdvisor};
pub use types::{AdvisorError, AudioSummary, StyleSuggestion, StyleSuggestionResponse};

use async_trait::async_trait;

#[async_trait]
pub trait StyleAdvisor: Send + Sync {
    async fn suggest_styles(
        &self,
        summary: &AudioSummary,
    ) -> Result<StyleSuggestionResponse, AdvisorError>;

    async fn refine_prompt(
        &self,
        prompt: &str,
        summary: &AudioSummary,
    ) -> Result<String, AdvisorError>;
}
