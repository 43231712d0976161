//! Cognitive dimension extraction.
//!
//! Derives a fixed 16-slot feature vector from raw text, grouped in four
//! families of four: emotional, temporal, contextual, and social. Emotional
//! scores come from a small built-in affect lexicon; temporal scores from
//! weighted regex cues; contextual and social scores from multi-label keyword
//! classifiers. The cue tables below are the configuration surface — scores
//! are clamped to the declared range of each slot.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Width of the dimensional feature vector.
pub const DIMENSION_SLOTS: usize = 16;

/// Slot names in layout order. The first family slot (`valence`) ranges over
/// `[-1, 1]`; every other slot over `[0, 1]`.
pub const DIMENSION_NAMES: [&str; DIMENSION_SLOTS] = [
    // emotional
    "valence",
    "arousal",
    "frustration",
    "satisfaction",
    // temporal
    "urgency",
    "deadline_proximity",
    "recency_reference",
    "duration_scope",
    // contextual
    "technical",
    "exploratory",
    "instructional",
    "reflective",
    // social
    "collaborative",
    "authoritative",
    "interpersonal",
    "isolated",
];

// ── Affect lexicon ───────────────────────────────────────────────────────────

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "works", "working", "fixed", "solved", "clean", "fast",
    "love", "nice", "success", "successful", "passed", "happy", "helpful", "elegant",
    "correct", "stable", "finally",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "broken", "fails", "failed", "failing", "bug", "error", "crash", "wrong",
    "slow", "hate", "awful", "confusing", "stuck", "regression", "flaky", "messy",
    "annoying", "terrible", "worse",
];

const INTENSIFIERS: &[&str] = &[
    "very", "extremely", "really", "absolutely", "completely", "totally", "critical",
    "severe", "massive",
];

const FRUSTRATION_WORDS: &[&str] = &[
    "stuck", "frustrating", "frustrated", "annoying", "blocked", "broken", "again",
    "hopeless", "giving",
];

const SATISFACTION_WORDS: &[&str] = &[
    "finally", "works", "fixed", "solved", "done", "shipped", "success", "passed",
    "resolved", "merged",
];

// ── Temporal cue tables ──────────────────────────────────────────────────────

/// Weighted regex cues per temporal slot. Each distinct pattern contributes
/// its weight once; the slot score is the clamped sum.
static URGENCY_CUES: LazyLock<Vec<(Regex, f32)>> = LazyLock::new(|| {
    cue_table(&[
        (r"\burgent(ly)?\b", 1.0),
        (r"\basap\b", 1.0),
        (r"\bimmediately\b", 0.9),
        (r"\bright away\b", 0.8),
        (r"\bcritical\b", 0.6),
        (r"\bnow\b", 0.3),
    ])
});

static DEADLINE_CUES: LazyLock<Vec<(Regex, f32)>> = LazyLock::new(|| {
    cue_table(&[
        (r"\bdue (today|tomorrow|tonight)\b", 1.0),
        (r"\bdeadline\b", 0.9),
        (r"\bby (monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b", 0.8),
        (r"\b(eod|end of day|end of week)\b", 0.8),
        (r"\bdue\b", 0.5),
    ])
});

static RECENCY_CUES: LazyLock<Vec<(Regex, f32)>> = LazyLock::new(|| {
    cue_table(&[
        (r"\bjust (now|did|finished|saw)\b", 0.9),
        (r"\b(earlier today|this morning)\b", 0.8),
        (r"\byesterday\b", 0.7),
        (r"\brecently\b", 0.6),
        (r"\blast (week|night)\b", 0.5),
    ])
});

static DURATION_CUES: LazyLock<Vec<(Regex, f32)>> = LazyLock::new(|| {
    cue_table(&[
        (r"\blong[- ]term\b", 0.9),
        (r"\bongoing\b", 0.8),
        (r"\bfor (months|years|weeks)\b", 0.8),
        (r"\broadmap\b", 0.6),
        (r"\b(quick|briefly|short)\b", 0.2),
    ])
});

// ── Contextual / social keyword tables ───────────────────────────────────────

const TECHNICAL_TERMS: &[&str] = &[
    "code", "function", "api", "bug", "compile", "database", "server", "deploy", "query",
    "test", "build", "commit", "branch", "error", "config", "thread", "memory", "cache",
    "endpoint", "schema",
];

const EXPLORATORY_TERMS: &[&str] = &[
    "wonder", "explore", "maybe", "perhaps", "investigate", "curious", "experiment",
    "hypothesis", "alternative", "what",
];

const INSTRUCTIONAL_TERMS: &[&str] = &[
    "how", "steps", "first", "then", "install", "run", "guide", "setup", "configure",
    "follow", "tutorial", "usage",
];

const REFLECTIVE_TERMS: &[&str] = &[
    "learned", "realized", "retrospective", "looking", "hindsight", "mistake", "lesson",
    "review", "reflection", "takeaway",
];

const COLLABORATIVE_TERMS: &[&str] = &[
    "we", "our", "team", "together", "pair", "paired", "collaborate", "sync", "standup",
    "everyone",
];

const AUTHORITATIVE_TERMS: &[&str] = &[
    "must", "should", "always", "never", "require", "required", "mandatory", "policy",
    "standard", "forbidden",
];

const INTERPERSONAL_TERMS: &[&str] = &[
    "you", "they", "meeting", "discussion", "asked", "told", "agreed", "disagreed",
    "feedback", "conversation",
];

const ISOLATED_TERMS: &[&str] = &[
    "alone", "myself", "solo", "independently", "quietly", "uninterrupted", "focus",
    "heads-down",
];

fn cue_table(entries: &[(&str, f32)]) -> Vec<(Regex, f32)> {
    entries
        .iter()
        .map(|(pattern, weight)| (Regex::new(pattern).expect("valid cue regex"), *weight))
        .collect()
}

// ── Profile ──────────────────────────────────────────────────────────────────

/// The 16 extracted dimension scores for one text.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionProfile {
    slots: [f32; DIMENSION_SLOTS],
}

impl DimensionProfile {
    /// All-zero profile (used for empty input).
    pub fn zero() -> Self {
        Self {
            slots: [0.0; DIMENSION_SLOTS],
        }
    }

    pub fn slots(&self) -> &[f32; DIMENSION_SLOTS] {
        &self.slots
    }

    /// Look up a slot by name.
    pub fn get(&self, name: &str) -> Option<f32> {
        DIMENSION_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.slots[i])
    }

    /// Named map form, stored alongside each memory.
    pub fn named(&self) -> BTreeMap<String, f64> {
        DIMENSION_NAMES
            .iter()
            .zip(self.slots.iter())
            .map(|(name, score)| (name.to_string(), *score as f64))
            .collect()
    }
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Stateless dimension extractor. All cue tables are compiled once.
#[derive(Debug, Default, Clone, Copy)]
pub struct DimensionExtractor;

impl DimensionExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract all 16 dimension scores from `text`.
    pub fn extract(&self, text: &str) -> DimensionProfile {
        if text.trim().is_empty() {
            return DimensionProfile::zero();
        }

        let lower = text.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|t| !t.is_empty())
            .collect();

        let mut slots = [0.0f32; DIMENSION_SLOTS];

        // emotional
        slots[0] = valence(&tokens);
        slots[1] = arousal(text, &tokens);
        slots[2] = keyword_score(&tokens, FRUSTRATION_WORDS);
        slots[3] = keyword_score(&tokens, SATISFACTION_WORDS);

        // temporal
        slots[4] = cue_score(&lower, &URGENCY_CUES);
        slots[5] = cue_score(&lower, &DEADLINE_CUES);
        slots[6] = cue_score(&lower, &RECENCY_CUES);
        slots[7] = cue_score(&lower, &DURATION_CUES);

        // contextual
        slots[8] = keyword_score(&tokens, TECHNICAL_TERMS);
        slots[9] = keyword_score(&tokens, EXPLORATORY_TERMS);
        slots[10] = keyword_score(&tokens, INSTRUCTIONAL_TERMS);
        slots[11] = keyword_score(&tokens, REFLECTIVE_TERMS);

        // social
        slots[12] = keyword_score(&tokens, COLLABORATIVE_TERMS);
        slots[13] = keyword_score(&tokens, AUTHORITATIVE_TERMS);
        slots[14] = keyword_score(&tokens, INTERPERSONAL_TERMS);
        slots[15] = keyword_score(&tokens, ISOLATED_TERMS);

        DimensionProfile { slots }
    }
}

/// Valence in `[-1, 1]`: balance of positive vs. negative lexicon hits.
fn valence(tokens: &[&str]) -> f32 {
    let pos = count_hits(tokens, POSITIVE_WORDS) as f32;
    let neg = count_hits(tokens, NEGATIVE_WORDS) as f32;
    if pos + neg == 0.0 {
        return 0.0;
    }
    ((pos - neg) / (pos + neg)).clamp(-1.0, 1.0)
}

/// Arousal in `[0, 1]`: exclamation marks, shouted words, intensifiers.
fn arousal(raw: &str, tokens: &[&str]) -> f32 {
    let exclamations = raw.matches('!').count();
    let shouted = raw
        .split_whitespace()
        .filter(|w| w.len() >= 3 && w.chars().all(|c| c.is_ascii_uppercase()))
        .count();
    let intensity = count_hits(tokens, INTENSIFIERS);
    (0.25 * (exclamations + shouted + intensity) as f32).clamp(0.0, 1.0)
}

/// Saturating keyword score: 1 hit -> 0.4, 2 -> 0.8, 3+ -> 1.0.
fn keyword_score(tokens: &[&str], table: &[&str]) -> f32 {
    let hits = count_hits(tokens, table);
    (0.4 * hits as f32).clamp(0.0, 1.0)
}

fn count_hits(tokens: &[&str], table: &[&str]) -> usize {
    tokens.iter().filter(|t| table.contains(t)).count()
}

/// Sum the weights of every distinct cue pattern that matches, clamped.
fn cue_score(lower: &str, cues: &[(Regex, f32)]) -> f32 {
    let sum: f32 = cues
        .iter()
        .filter(|(re, _)| re.is_match(lower))
        .map(|(_, w)| w)
        .sum();
    sum.clamp(0.0, 1.0)
}
