//! Context aggregation for phase prompts.
//!
//! [`ContextAggregator::build`] is a pure function: given the domain, the
//! optional keyword and the checkpoint rows already read from the store, it
//! selects the completed results a phase may depend on and packs them into a
//! [`ContextBlob`]. Same inputs, same blob, same fingerprint.

use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::pipeline::phases::Phase;
use crate::pipeline::types::{Domain, Keyword, PhaseExecution, Scope, ScopeKind};

/// Default cap on the domain description carried into prompts.
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 12_000;

/// Inputs available to one phase execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlob {
    pub scope: Scope,
    pub target: Phase,
    pub domain_id: String,
    pub domain_context: String,
    pub context_truncated: bool,
    pub locale: Option<String>,
    pub keyword_term: Option<String>,
    /// Completed upstream results keyed (and therefore ordered) by phase.
    pub sections: BTreeMap<Phase, Value>,
    /// Upstream phases whose result was degraded.
    pub degraded_inputs: Vec<Phase>,
}

impl ContextBlob {
    pub fn has(&self, phase: Phase) -> bool {
        self.sections.contains_key(&phase)
    }

    /// Typed view of an upstream result. Missing or ill-shaped sections come
    /// back as `T::default()`.
    pub fn section<T>(&self, phase: Phase) -> T
    where
        T: DeserializeOwned + Default,
    {
        self.sections
            .get(&phase)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_inputs.is_empty()
    }

    /// Stable text rendering used in prompts and for the fingerprint.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "## Domain ({})", self.domain_id);
        if let Some(locale) = &self.locale {
            let _ = writeln!(out, "Locale: {}", locale);
        }
        out.push_str(self.domain_context.trim());
        out.push('\n');
        if self.context_truncated {
            out.push_str("[domain description truncated]\n");
        }

        if let Some(term) = &self.keyword_term {
            let _ = writeln!(out, "\n## Seed keyword\n{}", term);
        }

        for (phase, value) in &self.sections {
            let body = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            let _ = writeln!(out, "\n## {} result\n{}", phase, body);
        }

        if self.is_degraded() {
            let names: Vec<&str> = self.degraded_inputs.iter().map(|p| p.as_str()).collect();
            let _ = writeln!(
                out,
                "\nNote: these inputs were partially recovered and may be incomplete: {}",
                names.join(", ")
            );
        }

        out
    }

    /// Hex SHA-256 of [`render`](Self::render).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.target.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.render().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Builds [`ContextBlob`]s from persisted checkpoints.
#[derive(Debug, Clone)]
pub struct ContextAggregator {
    max_context_chars: usize,
}

impl Default for ContextAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTEXT_CHARS)
    }
}

impl ContextAggregator {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    /// Assemble the inputs for `target` running on `scope`.
    ///
    /// Only completed rows that belong to the scope (or, for keyword scopes,
    /// to the owning domain) and precede `target` in phase order are used.
    pub fn build(
        &self,
        scope: &Scope,
        target: Phase,
        domain: &Domain,
        keyword: Option<&Keyword>,
        records: &[PhaseExecution],
    ) -> ContextBlob {
        let mut sections = BTreeMap::new();
        let mut degraded_inputs = Vec::new();

        for record in records {
            if !record.is_completed() || record.phase.order() >= target.order() {
                continue;
            }
            let visible = match record.scope_kind {
                ScopeKind::Domain => record.scope_id == scope.domain_id,
                ScopeKind::Keyword => {
                    scope.kind == ScopeKind::Keyword && record.scope_id == scope.id
                }
            };
            if !visible {
                continue;
            }
            let Some(result) = &record.result else {
                continue;
            };
            if sections.insert(record.phase, result.clone()).is_none() && record.degraded {
                degraded_inputs.push(record.phase);
            }
        }
        degraded_inputs.sort();

        let (domain_context, context_truncated) =
            truncate_chars(&domain.context, self.max_context_chars);

        ContextBlob {
            scope: scope.clone(),
            target,
            domain_id: domain.id.clone(),
            domain_context,
            context_truncated,
            locale: domain.locale.clone(),
            keyword_term: keyword.map(|k| k.term.clone()),
            sections,
            degraded_inputs,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}
