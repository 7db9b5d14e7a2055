use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Below this many characters a request carries too little signal.
const MIN_SIGNAL_LEN: usize = 10;

const ACTION_VERBS: &str = "change|update|fix|add|remove|delete|modify|replace|rename|move|create|\
    implement|refactor|optimi[sz]e|improve|enhance|correct|adjust|alter|revise|edit|write|make|set|\
    turn|switch|convert|transform|migrate";

// ---------------------------------------------------------------------------
// RequestKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Asks for a change; gets edit-capable tools.
    Actionable,
    /// Asks for an explanation or review; gets read-only tools.
    Informational,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Actionable => "actionable",
            RequestKind::Informational => "informational",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Heuristics
// ---------------------------------------------------------------------------

/// A named pattern. `exclude` stands in for a negative lookahead: the
/// heuristic fires when `include` matches and `exclude` does not.
struct Heuristic {
    name: &'static str,
    include: Regex,
    exclude: Option<Regex>,
}

impl Heuristic {
    fn matches(&self, text: &str) -> bool {
        self.include.is_match(text) && !self.exclude.as_ref().is_some_and(|r| r.is_match(text))
    }
}

type PatternSpec = (&'static str, String, Option<String>);

fn informational_specs() -> Vec<PatternSpec> {
    vec![
        (
            "question-opener",
            r"^\s*(what|why|how|when|where|who|which|is|are|does|do|did)\b".to_string(),
            Some(format!(
                r"^\s*\w+\s+(you\s+|we\s+)?(please\s+)?({ACTION_VERBS})\b"
            )),
        ),
        (
            "explain-request",
            r"\b(explain|describe|clarify|summari[sz]e|tell me|walk me through|help me understand)\b"
                .to_string(),
            None,
        ),
        (
            "analysis-vocabulary",
            r"\b(analy[sz]e|analysis|overview|review|assess|evaluate|feedback|thoughts on)\b"
                .to_string(),
            None,
        ),
        (
            "documentation-question",
            r"\b(documentation|docs|what does|how does|meaning of|purpose of)\b".to_string(),
            None,
        ),
        ("trailing-question-mark", r"\?\s*$".to_string(), None),
    ]
}

fn actionable_specs() -> Vec<PatternSpec> {
    vec![
        (
            "imperative-verb",
            format!(r"^\s*(please\s+)?({ACTION_VERBS})\b"),
            None,
        ),
        (
            "polite-request",
            format!(
                r"\b(please|kindly|can you|could you|would you|will you|can we|could we)\s+(also\s+)?({ACTION_VERBS})\b"
            ),
            None,
        ),
        (
            "stated-intent",
            format!(
                r"\b(i need you to|i want you to|i'd like you to|we need to|we should|let's|lets|go ahead and)\s+({ACTION_VERBS})\b"
            ),
            None,
        ),
        (
            "style-adjustment",
            r"\b(red|green|blue|yellow|black|white|gr[ae]y|orange|purple|pink|bigger|smaller|larger|wider|narrower|taller|shorter|bold|italic)\s+(button|text|colou?r|background|font|border|header|footer|icon|link|title|label|margin|padding)s?\b"
                .to_string(),
            None,
        ),
        (
            "bug-with-fix-intent",
            r"(?s)\b(bug|error|issue|crash|broken|typo|problem)\b.*\b(fix|resolve|patch|correct)\w*\b"
                .to_string(),
            None,
        ),
        (
            "fix-the-bug",
            r"(?s)\bfix(es|ing)?\b.*\b(bug|error|issue|crash|typo|problem)s?\b".to_string(),
            None,
        ),
    ]
}

fn compile(specs: Vec<PatternSpec>) -> Vec<Heuristic> {
    let build = |pattern: &str| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| tracing::error!(pattern, error = %e, "invalid classifier pattern"))
            .ok()
    };
    specs
        .into_iter()
        .filter_map(|(name, include, exclude)| {
            let include = build(&include)?;
            let exclude = match exclude {
                Some(p) => Some(build(&p)?),
                None => None,
            };
            Some(Heuristic {
                name,
                include,
                exclude,
            })
        })
        .collect()
}

static INFORMATIONAL: OnceLock<Vec<Heuristic>> = OnceLock::new();
static ACTIONABLE: OnceLock<Vec<Heuristic>> = OnceLock::new();

fn informational() -> &'static [Heuristic] {
    INFORMATIONAL.get_or_init(|| compile(informational_specs()))
}

fn actionable() -> &'static [Heuristic] {
    ACTIONABLE.get_or_init(|| compile(actionable_specs()))
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Decision plus the evidence behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub kind: RequestKind,
    pub confidence: f64,
    pub actionable_matches: Vec<String>,
    pub informational_matches: Vec<String>,
}

/// Full classification with matched heuristic names.
///
/// Actionable wins whenever any actionable heuristic fires; informational
/// is also the default when nothing fires.
pub fn explain(text: &str) -> Classification {
    let text = text.trim();
    if text.chars().count() < MIN_SIGNAL_LEN {
        return Classification {
            kind: RequestKind::Informational,
            confidence: 0.5,
            actionable_matches: Vec::new(),
            informational_matches: Vec::new(),
        };
    }

    let matched = |set: &[Heuristic]| -> Vec<String> {
        set.iter()
            .filter(|h| h.matches(text))
            .map(|h| h.name.to_string())
            .collect()
    };
    let actionable_matches = matched(actionable());
    let informational_matches = matched(informational());

    let kind = if actionable_matches.is_empty() {
        RequestKind::Informational
    } else {
        RequestKind::Actionable
    };

    let total = actionable_matches.len() + informational_matches.len();
    let confidence = if total == 0 {
        0.5
    } else {
        let dominant = match kind {
            RequestKind::Actionable => actionable_matches.len(),
            RequestKind::Informational => informational_matches.len(),
        };
        dominant as f64 / total as f64
    };

    Classification {
        kind,
        confidence,
        actionable_matches,
        informational_matches,
    }
}

pub fn classify(text: &str) -> RequestKind {
    explain(text).kind
}

/// Diagnostic only; never used for the tool decision.
pub fn confidence(text: &str) -> f64 {
    explain(text).confidence
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(informational().len(), informational_specs().len());
        assert_eq!(actionable().len(), actionable_specs().len());
    }

    #[test]
    fn short_text_is_informational() {
        for text in ["fix it", "add x", "", "   rename  ", "fix bug"] {
            assert_eq!(classify(text), RequestKind::Informational, "{text:?}");
        }
    }

    #[test]
    fn polite_fix_request_is_actionable() {
        assert_eq!(
            classify("please fix the null check on line 42"),
            RequestKind::Actionable
        );
    }

    #[test]
    fn imperative_verbs_are_actionable() {
        for text in [
            "Refactor the retry loop into a helper",
            "rename this variable to something clearer",
            "Migrate the config parser to serde",
            "can you update the README with install steps",
            "I need you to remove the deprecated endpoint",
        ] {
            assert_eq!(classify(text), RequestKind::Actionable, "{text:?}");
        }
    }

    #[test]
    fn questions_and_explanations_are_informational() {
        for text in [
            "what does this function return?",
            "explain how the cache invalidation works",
            "Give me an overview of this module",
            "why is the timeout thirty minutes",
        ] {
            assert_eq!(classify(text), RequestKind::Informational, "{text:?}");
        }
    }

    #[test]
    fn actionable_wins_over_informational() {
        let text = "explain this and then fix the off-by-one error?";
        let c = explain(text);
        assert!(!c.informational_matches.is_empty());
        assert_eq!(c.kind, RequestKind::Actionable);
    }

    #[test]
    fn question_opener_followed_by_verb_is_not_informational() {
        let c = explain("could you please add logging to the worker");
        assert_eq!(c.kind, RequestKind::Actionable);
        assert!(!c.informational_matches.contains(&"question-opener".to_string()));
    }

    #[test]
    fn domain_phrasing_is_actionable() {
        assert_eq!(classify("the header needs a blue background"), RequestKind::Actionable);
        assert_eq!(
            classify("There is a bug in parsing, please get it fixed"),
            RequestKind::Actionable
        );
    }

    #[test]
    fn no_signal_defaults_to_informational_with_half_confidence() {
        let c = explain("the quarterly numbers look fine to me");
        assert_eq!(c.kind, RequestKind::Informational);
        assert_eq!(c.confidence, 0.5);
    }

    #[test]
    fn confidence_is_dominant_fraction() {
        assert_eq!(confidence("please fix the null check on line 42"), 1.0);
        let mixed = confidence("explain this and then fix the off-by-one error?");
        assert!(mixed > 0.0 && mixed < 1.0);
    }
}
