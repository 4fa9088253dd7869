//! LLM prompts for the keyword research pipeline.
//!
//! One system/user pair per phase, built from the phase's [`ContextBlob`].
//!
//! - [`research`] - Domain analysis and search research (phases 1-4)
//! - [`phrases`] - Phrase generation, intent and relevance (phases 5-7)
//!
//! # Usage
//!
//! ```rust,ignore
//! use keyword_forge::prompts::build_phase_prompt;
//!
//! let prompt = build_phase_prompt(Phase::SearchPatterns, &blob, 25);
//! let request = GenerationRequest::new(model, vec![
//!     Message::system(prompt.system),
//!     Message::user(prompt.user),
//! ]);
//! ```

mod phrases;
mod research;

use crate::context::ContextBlob;
use crate::pipeline::phases::Phase;

/// System and user message for one phase execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePrompt {
    pub system: String,
    pub user: String,
}

impl PhasePrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Build the prompt for `phase` from its context.
///
/// `phrases_per_keyword` only affects phrase generation.
pub fn build_phase_prompt(
    phase: Phase,
    blob: &ContextBlob,
    phrases_per_keyword: usize,
) -> PhasePrompt {
    match phase {
        Phase::SemanticAnalysis => research::semantic_analysis(blob),
        Phase::CommunityInsights => research::community_insights(blob),
        Phase::CompetitorResearch => research::competitor_research(blob),
        Phase::SearchPatterns => research::search_patterns(blob),
        Phase::PhraseGeneration => phrases::phrase_generation(blob, phrases_per_keyword),
        Phase::IntentClassification => phrases::intent_classification(blob),
        Phase::RelevanceScoring => phrases::relevance_scoring(blob),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextAggregator;
    use crate::pipeline::types::{Domain, Keyword, PhaseExecution, PhaseStatus, Scope, ScopeKind};
    use chrono::Utc;
    use serde_json::json;

    fn blob(target: Phase) -> ContextBlob {
        let domain = Domain {
            id: "d1".into(),
            context: "Handmade leather wallets shipped across Europe.".into(),
            locale: None,
        };
        let keyword = Keyword {
            id: "k1".into(),
            domain_id: "d1".into(),
            term: "leather wallet".into(),
        };
        let row = PhaseExecution {
            scope_id: "k1".into(),
            scope_kind: ScopeKind::Keyword,
            domain_id: "d1".into(),
            phase: Phase::PhraseGeneration,
            status: PhaseStatus::Completed,
            progress: 100,
            result: Some(json!({"phrases": [
                {"text": "slim leather wallet"},
                {"text": "  "},
                {"text": "leather wallet gift"}
            ]})),
            degraded: false,
            error: None,
            input_fingerprint: None,
            started_at: None,
            ended_at: None,
            updated_at: Utc::now(),
        };
        ContextAggregator::default().build(
            &Scope::keyword(&keyword),
            target,
            &domain,
            Some(&keyword),
            &[row],
        )
    }

    #[test]
    fn test_every_phase_has_a_json_prompt() {
        for phase in Phase::ALL {
            let prompt = build_phase_prompt(phase, &blob(phase), 10);
            assert!(prompt.system.contains("JSON"), "{}", phase);
            assert!(!prompt.user.is_empty());
        }
    }

    #[test]
    fn test_phrase_generation_mentions_count_and_seed() {
        let prompt = build_phase_prompt(Phase::PhraseGeneration, &blob(Phase::PhraseGeneration), 25);
        assert!(prompt.user.contains("Generate 25 search phrases"));
        assert!(prompt.user.contains("\"leather wallet\""));
    }

    #[test]
    fn test_intent_prompt_lists_generated_phrases() {
        let prompt = build_phase_prompt(
            Phase::IntentClassification,
            &blob(Phase::IntentClassification),
            25,
        );
        assert!(prompt.user.contains("- slim leather wallet\n"));
        assert!(prompt.user.contains("- leather wallet gift\n"));
        assert!(!prompt.user.contains("-   \n"));
    }
}
