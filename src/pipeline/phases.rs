//! The seven fixed pipeline phases and the result shape each one produces.
//!
//! | # | Phase | Scope | Backend |
//! |---|-------|-------|---------|
//! | 1 | semantic_analysis | domain | generation |
//! | 2 | community_insights | domain | search |
//! | 3 | competitor_research | domain | search |
//! | 4 | search_patterns | keyword | search |
//! | 5 | phrase_generation | keyword | generation |
//! | 6 | intent_classification | keyword | generation |
//! | 7 | relevance_scoring | keyword | generation |
//!
//! Result structs use `#[serde(default)]` throughout so partially recovered
//! backend output still deserializes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::ScopeKind;
use crate::executor::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    SemanticAnalysis,
    CommunityInsights,
    CompetitorResearch,
    SearchPatterns,
    PhraseGeneration,
    IntentClassification,
    RelevanceScoring,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::SemanticAnalysis,
        Phase::CommunityInsights,
        Phase::CompetitorResearch,
        Phase::SearchPatterns,
        Phase::PhraseGeneration,
        Phase::IntentClassification,
        Phase::RelevanceScoring,
    ];

    /// Domain-scoped phases, in execution order.
    pub const DOMAIN: [Phase; 3] = [
        Phase::SemanticAnalysis,
        Phase::CommunityInsights,
        Phase::CompetitorResearch,
    ];

    /// Keyword-scoped phases, in execution order.
    pub const KEYWORD: [Phase; 4] = [
        Phase::SearchPatterns,
        Phase::PhraseGeneration,
        Phase::IntentClassification,
        Phase::RelevanceScoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::SemanticAnalysis => "semantic_analysis",
            Phase::CommunityInsights => "community_insights",
            Phase::CompetitorResearch => "competitor_research",
            Phase::SearchPatterns => "search_patterns",
            Phase::PhraseGeneration => "phrase_generation",
            Phase::IntentClassification => "intent_classification",
            Phase::RelevanceScoring => "relevance_scoring",
        }
    }

    /// 1-based position in the fixed dependency order.
    pub fn order(&self) -> u8 {
        match self {
            Phase::SemanticAnalysis => 1,
            Phase::CommunityInsights => 2,
            Phase::CompetitorResearch => 3,
            Phase::SearchPatterns => 4,
            Phase::PhraseGeneration => 5,
            Phase::IntentClassification => 6,
            Phase::RelevanceScoring => 7,
        }
    }

    pub fn scope_kind(&self) -> ScopeKind {
        if self.order() <= 3 {
            ScopeKind::Domain
        } else {
            ScopeKind::Keyword
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Phase::CommunityInsights | Phase::CompetitorResearch | Phase::SearchPatterns => {
                Backend::Search
            }
            _ => Backend::Generation,
        }
    }

    /// Phases 6 and 7 are driven by the phrase-generation stage.
    pub fn is_phrase_stage(&self) -> bool {
        matches!(
            self,
            Phase::PhraseGeneration | Phase::IntentClassification | Phase::RelevanceScoring
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| format!("unknown phase '{}'", s))
    }
}

/// Phase 1 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticAnalysis {
    pub summary: String,
    pub core_topics: Vec<String>,
    pub audience: Vec<String>,
    pub value_propositions: Vec<String>,
    pub vocabulary: Vec<String>,
}

/// Phase 2 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityInsights {
    pub pain_points: Vec<String>,
    pub questions: Vec<String>,
    pub communities: Vec<String>,
    pub language_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Competitor {
    pub name: String,
    pub url: String,
    pub positioning: String,
}

/// Phase 3 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompetitorResearch {
    pub competitors: Vec<Competitor>,
    pub content_gaps: Vec<String>,
    pub target_terms: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendSignal {
    pub term: String,
    /// "rising", "stable", "declining" or free text from the backend.
    pub direction: String,
}

/// Phase 4 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPatterns {
    pub modifiers: Vec<String>,
    pub questions: Vec<String>,
    pub related_terms: Vec<String>,
    pub trends: Vec<TrendSignal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhraseCandidate {
    pub text: String,
    pub source_tags: Vec<String>,
    pub trend: String,
}

/// Phase 5 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhraseGeneration {
    pub phrases: Vec<PhraseCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentLabel {
    pub phrase: String,
    pub intent: String,
    pub confidence: f64,
}

/// Phase 6 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentClassification {
    pub classifications: Vec<IntentLabel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceEntry {
    pub phrase: String,
    pub score: f64,
}

/// Phase 7 output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceScoring {
    pub scores: Vec<RelevanceEntry>,
}

/// Intent labels the classifier may assign; anything else maps to `unknown`.
pub const INTENT_LABELS: [&str; 4] = [
    "informational",
    "navigational",
    "commercial",
    "transactional",
];

pub const UNKNOWN_INTENT: &str = "unknown";

/// Lowercase an intent label and map unrecognised values to `unknown`.
pub fn normalize_intent(label: &str) -> String {
    let label = label.trim().to_lowercase();
    if INTENT_LABELS.contains(&label.as_str()) {
        label
    } else {
        UNKNOWN_INTENT.to_string()
    }
}

/// Key used to join phrase text across phases 5-7.
pub fn phrase_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
