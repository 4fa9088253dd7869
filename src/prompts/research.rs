//! Prompts for the research phases (1-4).
//!
//! Phase 1 runs against the generation backend, phases 2-4 against the
//! search backend. Every prompt asks for a single JSON object matching the
//! result struct in [`crate::pipeline::phases`].

use super::PhasePrompt;
use crate::context::ContextBlob;
use crate::pipeline::phases::{CompetitorResearch, Phase, SemanticAnalysis};

const SEMANTIC_ANALYSIS_SYSTEM: &str = r#"You are a senior SEO strategist analysing a business before keyword research.

Read the business description and extract what the business actually offers, who it serves and the vocabulary its customers would use.

## OUTPUT FORMAT

Output a JSON object:
{
  "summary": "Two or three sentences describing the business",
  "core_topics": ["topic", ...],
  "audience": ["segment", ...],
  "value_propositions": ["proposition", ...],
  "vocabulary": ["customer-facing term", ...]
}

Output ONLY the JSON object. No additional text or explanation."#;

const COMMUNITY_INSIGHTS_SYSTEM: &str = r#"You are a market researcher with live web search access.

Search forums, Q&A sites and social communities where the target audience of this business talks. Report what people struggle with and how they phrase it in their own words.

## OUTPUT FORMAT

Output a JSON object:
{
  "pain_points": ["pain point", ...],
  "questions": ["question as people ask it", ...],
  "communities": ["community or forum name", ...],
  "language_patterns": ["recurring phrasing", ...]
}

Output ONLY the JSON object. No additional text or explanation."#;

const COMPETITOR_RESEARCH_SYSTEM: &str = r#"You are a competitive intelligence analyst with live web search access.

Identify the businesses competing for the same customers, how they position themselves and which topics they leave uncovered.

## OUTPUT FORMAT

Output a JSON object:
{
  "competitors": [{"name": "...", "url": "...", "positioning": "..."}],
  "content_gaps": ["topic competitors miss", ...],
  "target_terms": ["term competitors rank for", ...]
}

Output ONLY the JSON object. No additional text or explanation."#;

const SEARCH_PATTERNS_SYSTEM: &str = r#"You are a search behaviour analyst with live web search access.

For the seed keyword, find how people actually search around it: modifiers they add, questions they type, adjacent terms, and whether interest is rising or falling.

## OUTPUT FORMAT

Output a JSON object:
{
  "modifiers": ["best", "near me", ...],
  "questions": ["how do I ...", ...],
  "related_terms": ["term", ...],
  "trends": [{"term": "...", "direction": "rising|stable|declining"}]
}

Output ONLY the JSON object. No additional text or explanation."#;

pub(super) fn semantic_analysis(blob: &ContextBlob) -> PhasePrompt {
    let user = format!(
        "Analyse this business.\n\n{}\nRespond with the JSON object only.",
        blob.render()
    );
    PhasePrompt::new(SEMANTIC_ANALYSIS_SYSTEM, user)
}

pub(super) fn community_insights(blob: &ContextBlob) -> PhasePrompt {
    let semantic: SemanticAnalysis = blob.section(Phase::SemanticAnalysis);
    let focus = if semantic.audience.is_empty() {
        String::new()
    } else {
        format!(
            "\nFocus on these audiences: {}\n",
            semantic.audience.join(", ")
        )
    };

    let user = format!(
        "Research the communities around this business.\n{}\n{}\nRespond with the JSON object only.",
        focus,
        blob.render()
    );
    PhasePrompt::new(COMMUNITY_INSIGHTS_SYSTEM, user)
}

pub(super) fn competitor_research(blob: &ContextBlob) -> PhasePrompt {
    let semantic: SemanticAnalysis = blob.section(Phase::SemanticAnalysis);
    let topics = if semantic.core_topics.is_empty() {
        String::new()
    } else {
        format!("\nCore topics: {}\n", semantic.core_topics.join(", "))
    };

    let user = format!(
        "Research the competitors of this business.\n{}\n{}\nRespond with the JSON object only.",
        topics,
        blob.render()
    );
    PhasePrompt::new(COMPETITOR_RESEARCH_SYSTEM, user)
}

pub(super) fn search_patterns(blob: &ContextBlob) -> PhasePrompt {
    let term = blob.keyword_term.as_deref().unwrap_or_default();
    let competitors: CompetitorResearch = blob.section(Phase::CompetitorResearch);
    let known_terms = if competitors.target_terms.is_empty() {
        String::new()
    } else {
        format!(
            "\nTerms competitors already target: {}\n",
            competitors.target_terms.join(", ")
        )
    };

    let user = format!(
        "Seed keyword: \"{}\"\n{}\nBusiness context:\n{}\nRespond with the JSON object only.",
        term,
        known_terms,
        blob.render()
    );
    PhasePrompt::new(SEARCH_PATTERNS_SYSTEM, user)
}
