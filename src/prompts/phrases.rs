//! Prompts for the phrase stage (phases 5-7).

use super::PhasePrompt;
use crate::context::ContextBlob;
use crate::pipeline::phases::{Phase, PhraseGeneration};

const PHRASE_GENERATION_SYSTEM: &str = r#"You are an SEO copywriter producing long-tail search phrases.

Combine the business analysis, community language, competitor gaps and observed search patterns into phrases real people would type into a search engine.

## RULES

- Every phrase must contain or clearly relate to the seed keyword
- Prefer the wording customers use over marketing language
- No duplicates, no numbering, no brand names of competitors
- Tag each phrase with the research inputs it came from: "semantic", "community", "competitor", "search"

## OUTPUT FORMAT

Output a JSON object:
{
  "phrases": [
    {"text": "phrase", "source_tags": ["community", "search"], "trend": "rising|stable|declining|unknown"}
  ]
}

Output ONLY the JSON object. No additional text or explanation."#;

const INTENT_CLASSIFICATION_SYSTEM: &str = r#"You are a search intent classifier.

Label each phrase with exactly one intent and a confidence between 0.0 and 1.0.

## INTENTS

- informational: the searcher wants to learn something
- navigational: the searcher looks for a specific site or brand
- commercial: the searcher compares options before buying
- transactional: the searcher is ready to act or buy

## OUTPUT FORMAT

Output a JSON object with one entry per phrase, copying the phrase text verbatim:
{
  "classifications": [
    {"phrase": "phrase", "intent": "commercial", "confidence": 0.85}
  ]
}

Output ONLY the JSON object. No additional text or explanation."#;

const RELEVANCE_SCORING_SYSTEM: &str = r#"You are an SEO analyst scoring keyword relevance.

Score how well each phrase matches what the business sells and who it sells to, from 0 (irrelevant) to 100 (perfect fit).

## OUTPUT FORMAT

Output a JSON object with one entry per phrase, copying the phrase text verbatim:
{
  "scores": [
    {"phrase": "phrase", "score": 82}
  ]
}

Output ONLY the JSON object. No additional text or explanation."#;

pub(super) fn phrase_generation(blob: &ContextBlob, phrases_per_keyword: usize) -> PhasePrompt {
    let term = blob.keyword_term.as_deref().unwrap_or_default();
    let user = format!(
        "Generate {} search phrases for the seed keyword \"{}\".\n\nResearch:\n{}\nRespond with the JSON object only.",
        phrases_per_keyword,
        term,
        blob.render()
    );
    PhasePrompt::new(PHRASE_GENERATION_SYSTEM, user)
}

pub(super) fn intent_classification(blob: &ContextBlob) -> PhasePrompt {
    let user = format!(
        "Classify the intent of these phrases for the seed keyword \"{}\":\n\n{}\nRespond with the JSON object only.",
        blob.keyword_term.as_deref().unwrap_or_default(),
        phrase_list(blob)
    );
    PhasePrompt::new(INTENT_CLASSIFICATION_SYSTEM, user)
}

pub(super) fn relevance_scoring(blob: &ContextBlob) -> PhasePrompt {
    let summary = blob
        .sections
        .get(&Phase::SemanticAnalysis)
        .and_then(|v| v.get("summary"))
        .and_then(|v| v.as_str())
        .unwrap_or(blob.domain_context.as_str());

    let user = format!(
        "Business: {}\n\nScore the relevance of these phrases:\n\n{}\nRespond with the JSON object only.",
        summary.trim(),
        phrase_list(blob)
    );
    PhasePrompt::new(RELEVANCE_SCORING_SYSTEM, user)
}

fn phrase_list(blob: &ContextBlob) -> String {
    let generated: PhraseGeneration = blob.section(Phase::PhraseGeneration);
    generated
        .phrases
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| format!("- {}\n", p.text.trim()))
        .collect()
}
