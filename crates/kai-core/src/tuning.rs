//! Empirically tuned constants, kept in one place.

/// Heuristic router confidences.
pub mod router {
    /// No entity, history or group signal.
    pub const BASELINE_CONFIDENCE: f32 = 0.5;
    pub const DIRECT_FACULTY_CONFIDENCE: f32 = 0.95;
    pub const DIRECT_DEPARTMENT_CONFIDENCE: f32 = 0.98;
    pub const HISTORY_FACULTY_CONFIDENCE: f32 = 0.70;
    pub const HISTORY_DEPARTMENT_CONFIDENCE: f32 = 0.75;
    pub const GROUP_CONFIDENCE: f32 = 0.60;

    /// History turns inspected for context.
    pub const HISTORY_WINDOW: usize = 6;
    /// Questions up to this many words may be treated as pure greetings.
    pub const GREETING_MAX_WORDS: usize = 3;
    pub const SYNONYM_TERMS: usize = 3;
    pub const INTENT_TERMS: usize = 3;
    pub const MAX_ENHANCEMENT_KEYWORDS: usize = 5;
}

/// Result fusion weights.
pub mod fusion {
    /// Vector score: `(DISTANCE_CEILING - d) * DISTANCE_WEIGHT`.
    pub const DISTANCE_CEILING: f32 = 2.0;
    pub const DISTANCE_WEIGHT: f32 = 50.0;
    /// Rank bonus: `(RANK_HORIZON - rank) * RANK_WEIGHT`.
    pub const RANK_HORIZON: f32 = 10.0;
    pub const RANK_WEIGHT: f32 = 5.0;
    /// Lexical score multiplier for documents also found by vector search.
    pub const HYBRID_LEXICAL_WEIGHT: f32 = 2.0;
    /// Lexical score multiplier for lexical-only documents.
    pub const LEXICAL_ONLY_WEIGHT: f32 = 3.0;
    pub const ROUTE_BONUS: f32 = 0.1;
}

/// Lexical scorer weights.
pub mod lexical {
    pub const TITLE_HIT: f32 = 30.0;
    pub const BODY_OCCURRENCE: f32 = 3.0;
    pub const TITLE_FUZZY: f32 = 8.0;
    pub const BODY_FUZZY: f32 = 4.0;
    /// Fuzzy similarity must exceed this (0-100 scale).
    pub const FUZZY_THRESHOLD: f32 = 85.0;
    /// Keywords shorter than this get no fuzzy bonus.
    pub const FUZZY_MIN_CHARS: usize = 4;
    /// Tokens of this length or shorter are dropped.
    pub const MIN_TOKEN_CHARS: usize = 2;
    /// At most this many keywords triggers the phrase keyword.
    pub const PHRASE_BOOST_MAX: usize = 2;
    /// Synthetic distance for lexical hits: `1 - score / DISTANCE_SCALE`.
    pub const DISTANCE_SCALE: f32 = 10.0;
}

/// Vector search conversion.
pub mod vector {
    /// `relevance = max(0, 1 - d / RELEVANCE_SCALE)`.
    pub const RELEVANCE_SCALE: f32 = 4.0;

    /// Passages are cut to this many characters before encoding.
    pub const PASSAGE_CHARS: usize = 4000;
}

/// Validator fallback and presentation.
pub mod validator {
    pub const FALLBACK_CONFIDENCE: f32 = 0.3;
    pub const FALLBACK_SELECTION: usize = 3;
    /// Characters of content shown per hit.
    pub const PREVIEW_CHARS: usize = 150;
}
