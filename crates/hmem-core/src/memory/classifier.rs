//! Sector Classification
//!
//! Assigns content to one of the five cognitive sectors using a policy table
//! of regex signals. Each matching pattern counts as one signal; the sector
//! with the most signals wins and ties fall back to [`PRECEDENCE`].

use regex::Regex;
use std::sync::OnceLock;

use crate::types::Sector;

/// Tie-break order, strongest first. Semantic is the fallback.
pub const PRECEDENCE: [Sector; 5] = [
    Sector::Emotional,
    Sector::Procedural,
    Sector::Episodic,
    Sector::Reflective,
    Sector::Semantic,
];

/// Signals contributed by each tag that names a sector
const TAG_WEIGHT: usize = 2;

/// Caller-supplied classification context
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    /// Overrides every pattern signal when set
    pub hint: Option<Sector>,
    /// Free-form tags; tags naming a sector add signals for it
    pub tags: Vec<String>,
}

impl ClassifyContext {
    pub fn with_hint(hint: Option<Sector>) -> Self {
        Self {
            hint,
            ..Default::default()
        }
    }
}

struct Policy {
    sector: Sector,
    patterns: Vec<Regex>,
}

fn policy_table() -> &'static [Policy] {
    static TABLE: OnceLock<Vec<Policy>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let build = |sector, patterns: &[&str]| Policy {
            sector,
            patterns: patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        };

        vec![
            build(
                Sector::Emotional,
                &[
                    r"(?i)\b(feel|feeling|felt|feelings)\b",
                    r"(?i)\b(happy|sad|angry|afraid|scared|anxious|nervous|excited|upset|lonely|proud|ashamed|grateful|worried)\b",
                    r"(?i)\b(love|loved|hate|hated|frustrat\w*|disappoint\w*|overwhelm\w*)\b",
                    r"!{2,}",
                ],
            ),
            build(
                Sector::Procedural,
                &[
                    r"(?i)\bhow to\b",
                    r"(?i)\b(step \d+|steps?)\b",
                    r"(?i)\b(first|then|next|finally),",
                    r"(?i)\b(install|configure|run|execute|click|deploy|compile)\b",
                    r"(?i)\b(procedure|instructions?|recipe|workflow)\b",
                    r"(?m)^\s*\d+[.)]\s+\S",
                ],
            ),
            build(
                Sector::Episodic,
                &[
                    r"(?i)\b(yesterday|today|tonight|tomorrow|this morning|this afternoon)\b",
                    r"(?i)\blast (week|month|year|night|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
                    r"(?i)\b(met|went|visited|happened|attended|arrived)\b",
                    r"(?i)\b(meeting|trip|conversation|event)\b",
                    r"\b\d{4}-\d{2}-\d{2}\b",
                    r"(?i)\bat \d{1,2}(:\d{2})?\s?(am|pm)\b",
                ],
            ),
            build(
                Sector::Reflective,
                &[
                    r"(?i)\bi (think|believe|realized|realised|learned|wonder)\b",
                    r"(?i)\b(in hindsight|looking back|on reflection)\b",
                    r"(?i)\b(lesson|insight|takeaway)s?\b",
                    r"(?i)\bshould have\b",
                    r"(?i)\breflect\w*\b",
                ],
            ),
            build(
                Sector::Semantic,
                &[
                    r"(?i)\b(is a|are a|is an|refers to|defined as|means)\b",
                    r"(?i)\b(fact|definition|concept|theory)\b",
                ],
            ),
        ]
    })
}

/// Pure, deterministic sector classifier
#[derive(Debug, Default, Clone, Copy)]
pub struct SectorClassifier;

impl SectorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify content into a sector
    pub fn classify(&self, content: &str, context: &ClassifyContext) -> Sector {
        if let Some(hint) = context.hint {
            return hint;
        }

        let scores = self.signals(content, context);
        let best = PRECEDENCE
            .iter()
            .copied()
            .max_by(|a, b| {
                // on equal scores the lower rank compares greater
                scores[rank(*a)]
                    .cmp(&scores[rank(*b)])
                    .then_with(|| rank(*b).cmp(&rank(*a)))
            })
            .unwrap_or(Sector::Semantic);

        if scores[rank(best)] == 0 {
            Sector::Semantic
        } else {
            best
        }
    }

    /// Signal count per sector, indexed by precedence rank
    fn signals(&self, content: &str, context: &ClassifyContext) -> [usize; 5] {
        let mut scores = [0usize; 5];

        for policy in policy_table() {
            let hits = policy
                .patterns
                .iter()
                .filter(|p| p.is_match(content))
                .count();
            scores[rank(policy.sector)] += hits;
        }

        for tag in &context.tags {
            if let Some(sector) = Sector::from_str(&tag.to_lowercase()) {
                scores[rank(sector)] += TAG_WEIGHT;
            }
        }

        scores
    }
}

fn rank(sector: Sector) -> usize {
    match sector {
        Sector::Emotional => 0,
        Sector::Procedural => 1,
        Sector::Episodic => 2,
        Sector::Reflective => 3,
        Sector::Semantic => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(content: &str) -> Sector {
        SectorClassifier::new().classify(content, &ClassifyContext::default())
    }

    #[test]
    fn test_policy_table_compiles() {
        let total: usize = policy_table().iter().map(|p| p.patterns.len()).sum();
        assert_eq!(total, 23);
    }

    #[test]
    fn test_basic_sectors() {
        assert_eq!(classify("I feel so anxious about the launch"), Sector::Emotional);
        assert_eq!(
            classify("How to deploy: first, run the build. Then, configure the host."),
            Sector::Procedural
        );
        assert_eq!(classify("Yesterday we met with the vendor"), Sector::Episodic);
        assert_eq!(
            classify("Looking back, I think we should have shipped earlier"),
            Sector::Reflective
        );
        assert_eq!(classify("A mutex is a mutual exclusion primitive"), Sector::Semantic);
    }

    #[test]
    fn test_unclassifiable_defaults_to_semantic() {
        assert_eq!(classify("Q3 planning notes"), Sector::Semantic);
        assert_eq!(classify(""), Sector::Semantic);
    }

    #[test]
    fn test_ties_follow_precedence() {
        // one emotional signal ("excited") and one episodic signal ("yesterday")
        assert_eq!(classify("excited about yesterday"), Sector::Emotional);
    }

    #[test]
    fn test_hint_overrides_signals() {
        let ctx = ClassifyContext::with_hint(Some(Sector::Procedural));
        let sector = SectorClassifier::new().classify("I feel happy!!", &ctx);
        assert_eq!(sector, Sector::Procedural);
    }

    #[test]
    fn test_tags_add_signals() {
        let ctx = ClassifyContext {
            hint: None,
            tags: vec!["Reflective".into()],
        };
        assert_eq!(
            SectorClassifier::new().classify("notes from the meeting", &ctx),
            Sector::Reflective
        );
    }

    #[test]
    fn test_deterministic() {
        let text = "Step 1) install the toolchain\n2) run the tests";
        assert_eq!(classify(text), classify(text));
        assert_eq!(classify(text), Sector::Procedural);
    }
}
