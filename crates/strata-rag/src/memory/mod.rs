//! # Session memory
//!
//! Learns user preferences from their messages with a fixed rule table and
//! remembers problem patterns the agent resolved. Both are persisted under
//! `pref::` and `exp::` keys and rendered into a compact prompt block.

mod rules;
mod session;

pub use rules::{default_rules, Extractor, PreferenceRule};
pub use session::{
    normalize_pattern, Experience, Preference, SessionMemory, CONFIDENCE_STEP,
    INITIAL_CONFIDENCE, PROMPT_MIN_CONFIDENCE, TRUNCATION_MARKER,
};
