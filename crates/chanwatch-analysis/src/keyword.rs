//! Deterministic keyword detection engine.
//!
//! Matches lower-cased, token-split comment text against per-category stem
//! tables. A single-word stem matches any token it prefixes; a multi-word
//! pattern requires its leading words to equal whole tokens and its last
//! word to prefix the following token. Pure and offline: the same input
//! always produces the same verdict, which the resume contract relies on.
//!
//! Patterns cover Russian and Ukrainian; text in other languages simply
//! matches nothing.

use std::collections::BTreeSet;

use chanwatch_core::{Category, Verdict};

/// Stamped into every keyword [`chanwatch_core::AnalysisRecord`].
pub const RULESET_VERSION: &str = "keyword-rules/1";

const DEATH_WISHES: &[&str] = &[
    "смерть москал",
    "смерть орк",
    "смерть русск",
    "смерть русн",
    "смерть росіян",
    "вбивати москал",
    "вбивати русск",
    "убивать москал",
    "убивать русск",
    "боже бомб",
    "боже, бомб",
];

const ETHNIC_SLURS: &[&str] = &[
    "русорез", "русоріз", "москал", "кацап", "чурк", "узки", "уззки", "уzки", "уzzки", "рузг",
    "руззг", "руzг", "руzzг", "монгол", "орд",
];

const DEHUMANIZATION: &[&str] = &[
    "хуйл", "пыня", "пыни", "пыне", "пыню", "пынi", "пып", "орк", "ватник", "ват", "ватян",
    "совок", "совк", "русн", "рашк", "раша", "раши", "рашe", "мордор", "русак", "руz", "роz",
    "пидор", "пидар", "жмур", "оккупант", "окупант", "перде",
];

const VIOLENCE_CALLS: &[&str] = &[
    "порва", "вирізат", "вырезат", "знищ", "уничтож", "спалит", "сжечь", "сожг", "сожж",
    "розірва", "разорва", "бомбi",
];

fn patterns(category: Category) -> &'static [&'static str] {
    match category {
        Category::DeathWishes => DEATH_WISHES,
        Category::EthnicSlurs => ETHNIC_SLURS,
        Category::Dehumanization => DEHUMANIZATION,
        Category::ViolenceCalls => VIOLENCE_CALLS,
    }
}

/// A stem pattern split into its words, done once at engine construction.
struct CompiledPattern {
    category: Category,
    words: Vec<String>,
    canonical: String,
}

pub struct KeywordEngine {
    compiled: Vec<CompiledPattern>,
}

impl Default for KeywordEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordEngine {
    #[must_use]
    pub fn new() -> Self {
        let mut compiled = Vec::new();
        for category in Category::ALL {
            for pattern in patterns(category) {
                let words: Vec<String> = tokenize(pattern).map(str::to_string).collect();
                if words.is_empty() {
                    continue;
                }
                compiled.push(CompiledPattern {
                    category,
                    canonical: words.join(" "),
                    words,
                });
            }
        }
        Self { compiled }
    }

    /// Classify one comment text. Returns the set of all matching categories
    /// (not just the first) together with the stems that matched.
    #[must_use]
    pub fn classify(&self, text: &str) -> Verdict {
        let mut categories = BTreeSet::new();
        let mut matches = BTreeSet::new();

        if !text.is_empty() {
            let lowered = text.to_lowercase();
            let tokens: Vec<&str> = tokenize(&lowered).collect();
            for pattern in &self.compiled {
                if pattern_matches(&pattern.words, &tokens) {
                    categories.insert(pattern.category);
                    matches.insert(pattern.canonical.clone());
                }
            }
        }

        Verdict::Keyword {
            categories,
            matches: matches.into_iter().collect(),
        }
    }
}

/// Tokens are maximal runs of alphanumeric characters; everything else
/// (whitespace and punctuation) is a boundary.
fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}

/// All pattern words but the last must equal whole tokens; the last word
/// matches as a token prefix (so `орк` matches `орков` but not `морков`).
fn pattern_matches(words: &[String], tokens: &[&str]) -> bool {
    let n = words.len();
    if n == 0 || tokens.len() < n {
        return false;
    }
    for start in 0..=(tokens.len() - n) {
        let exact_ok = words[..n - 1]
            .iter()
            .zip(&tokens[start..])
            .all(|(word, token)| word == token);
        if exact_ok && tokens[start + n - 1].starts_with(words[n - 1].as_str()) {
            return true;
        }
    }
    false
}
