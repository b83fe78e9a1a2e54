//! Mention scanner: finds candidate entity names in untrusted generated text.
//!
//! Candidates come from four literal heuristics:
//! - capitalized runs ("Captain Vale", "Order of the Silver Flame", "Warehouse 7");
//! - single capitalized words mid-sentence, or at sentence start when the same
//!   word also shows up capitalized mid-sentence;
//! - bracketed references (`[[Saltmarsh]]`, `[the old mill]`);
//! - short quoted names (`"The Gray Lady"`).
//!
//! No language understanding is attempted beyond that.

use super::index::{MatchIndex, MatchOutcome};
use super::{Discovery, DiscoveryBatch, DiscoveryKey, DiscoverySource, FuzzySuggestion};
use crate::model::EntityKind;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Default upper bound on scanned input.
const DEFAULT_MAX_INPUT_BYTES: usize = 256 * 1024;

/// Default number of characters kept on each side of a mention.
const DEFAULT_CONTEXT_RADIUS: usize = 80;

/// Default cap on words in a capitalized run; longer runs are headings, not names.
const DEFAULT_MAX_NAME_WORDS: usize = 6;

/// Maximum words in a quoted name.
const MAX_QUOTED_WORDS: usize = 4;

/// Errors from scanning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("input too large: {len} bytes (limit {max})")]
    TooLarge { len: usize, max: usize },

    #[error("input contains NUL bytes")]
    Binary,
}

/// Scanner limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Inputs longer than this are rejected.
    pub max_input_bytes: usize,
    /// Characters of context kept on each side of a mention.
    pub context_radius: usize,
    /// Longest capitalized run treated as a name.
    pub max_name_words: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            context_radius: DEFAULT_CONTEXT_RADIUS,
            max_name_words: DEFAULT_MAX_NAME_WORDS,
        }
    }
}

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'’\-]*").unwrap();
    static ref BRACKETED: Regex =
        Regex::new(r"\[\[([^\[\]\n]{1,80})\]\]|\[([^\[\]\n]{1,80})\]").unwrap();
    static ref QUOTED: Regex = Regex::new(r#"["“]([^"“”\n]{1,60})["”]"#).unwrap();

    /// Capitalized words that never start or form a name on their own.
    static ref STOP_WORDS: HashSet<&'static str> = [
        "a", "an", "the", "and", "but", "or", "nor", "so", "yet", "for", "if", "then", "when",
        "while", "after", "before", "as", "at", "in", "on", "of", "to", "from", "with", "by",
        "into", "onto", "over", "under", "through", "he", "she", "it", "they", "we", "you", "i",
        "his", "her", "its", "their", "our", "your", "my", "him", "them", "us", "me", "this",
        "that", "these", "those", "there", "here", "what", "who", "whom", "which", "where",
        "why", "how", "yes", "no", "not", "all", "some", "every", "each", "any", "none",
        "meanwhile", "suddenly", "however", "still", "now", "later", "soon", "once", "perhaps",
        "maybe", "even", "also", "just", "only", "finally", "instead", "although", "though",
        "because", "since", "until", "unless", "beyond", "behind", "inside", "outside",
        "despite", "whatever", "whoever", "nothing", "everything", "someone", "everyone",
        "chapter", "part", "scene", "oh", "ah", "alas", "well", "indeed",
        "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
        "january", "february", "march", "april", "may", "june", "july", "august",
        "september", "october", "november", "december",
    ]
    .into_iter()
    .collect();

    /// Lowercase words allowed between capitalized words of one name.
    static ref CONNECTORS: HashSet<&'static str> =
        ["of", "the", "de", "von", "van", "du", "la", "le", "del", "da"]
            .into_iter()
            .collect();
}

/// Words inside a name that give away its kind.
const NAME_KIND_KEYWORDS: &[(&str, EntityKind)] = &[
    ("tavern", EntityKind::Location),
    ("inn", EntityKind::Location),
    ("pub", EntityKind::Location),
    ("keep", EntityKind::Location),
    ("tower", EntityKind::Location),
    ("castle", EntityKind::Location),
    ("citadel", EntityKind::Location),
    ("city", EntityKind::Location),
    ("town", EntityKind::Location),
    ("village", EntityKind::Location),
    ("harbor", EntityKind::Location),
    ("harbour", EntityKind::Location),
    ("port", EntityKind::Location),
    ("street", EntityKind::Location),
    ("district", EntityKind::Location),
    ("temple", EntityKind::Location),
    ("forest", EntityKind::Location),
    ("woods", EntityKind::Location),
    ("mountain", EntityKind::Location),
    ("mountains", EntityKind::Location),
    ("river", EntityKind::Location),
    ("isle", EntityKind::Location),
    ("island", EntityKind::Location),
    ("market", EntityKind::Location),
    ("warehouse", EntityKind::Location),
    ("manor", EntityKind::Location),
    ("mine", EntityKind::Location),
    ("cave", EntityKind::Location),
    ("bridge", EntityKind::Location),
    ("captain", EntityKind::Npc),
    ("lord", EntityKind::Npc),
    ("lady", EntityKind::Npc),
    ("sir", EntityKind::Npc),
    ("king", EntityKind::Npc),
    ("queen", EntityKind::Npc),
    ("prince", EntityKind::Npc),
    ("princess", EntityKind::Npc),
    ("duke", EntityKind::Npc),
    ("baron", EntityKind::Npc),
    ("baroness", EntityKind::Npc),
    ("brother", EntityKind::Npc),
    ("sister", EntityKind::Npc),
    ("mother", EntityKind::Npc),
    ("father", EntityKind::Npc),
    ("magistrate", EntityKind::Npc),
    ("commander", EntityKind::Npc),
    ("sergeant", EntityKind::Npc),
    ("guild", EntityKind::Faction),
    ("order", EntityKind::Faction),
    ("brotherhood", EntityKind::Faction),
    ("company", EntityKind::Faction),
    ("cult", EntityKind::Faction),
    ("circle", EntityKind::Faction),
    ("league", EntityKind::Faction),
    ("syndicate", EntityKind::Faction),
    ("clan", EntityKind::Faction),
    ("council", EntityKind::Faction),
    ("sword", EntityKind::Item),
    ("blade", EntityKind::Item),
    ("amulet", EntityKind::Item),
    ("ring", EntityKind::Item),
    ("crown", EntityKind::Item),
    ("staff", EntityKind::Item),
    ("tome", EntityKind::Item),
    ("dagger", EntityKind::Item),
    ("shield", EntityKind::Item),
    ("orb", EntityKind::Item),
    ("chalice", EntityKind::Item),
    ("dragon", EntityKind::Creature),
    ("wyrm", EntityKind::Creature),
    ("hydra", EntityKind::Creature),
    ("golem", EntityKind::Creature),
    ("wraith", EntityKind::Creature),
    ("troll", EntityKind::Creature),
];

/// Words near a mention that hint at its kind.
const CONTEXT_KIND_KEYWORDS: &[(&str, EntityKind)] = &[
    ("said", EntityKind::Npc),
    ("says", EntityKind::Npc),
    ("told", EntityKind::Npc),
    ("asked", EntityKind::Npc),
    ("smiled", EntityKind::Npc),
    ("he", EntityKind::Npc),
    ("she", EntityKind::Npc),
    ("visited", EntityKind::Location),
    ("arrived", EntityKind::Location),
    ("travelled", EntityKind::Location),
    ("traveled", EntityKind::Location),
    ("located", EntityKind::Location),
    ("streets", EntityKind::Location),
    ("walls", EntityKind::Location),
    ("members", EntityKind::Faction),
    ("joined", EntityKind::Faction),
    ("faction", EntityKind::Faction),
    ("wields", EntityKind::Item),
    ("carries", EntityKind::Item),
    ("forged", EntityKind::Item),
    ("enchanted", EntityKind::Item),
    ("beast", EntityKind::Creature),
    ("monster", EntityKind::Creature),
    ("creature", EntityKind::Creature),
    ("roars", EntityKind::Creature),
    ("quest", EntityKind::Quest),
    ("mission", EntityKind::Quest),
];

/// A candidate span before dedup.
#[derive(Debug)]
struct Candidate {
    start: usize,
    end: usize,
    name: String,
    confidence: f32,
}

/// A word token with its position.
#[derive(Debug)]
struct Token<'a> {
    start: usize,
    end: usize,
    text: &'a str,
    sentence_start: bool,
    /// Only whitespace separates this token from the previous one.
    joined: bool,
}

impl Token<'_> {
    fn is_capitalized(&self) -> bool {
        self.text.chars().next().is_some_and(char::is_uppercase)
    }

    fn is_numeric(&self) -> bool {
        self.text.chars().next().is_some_and(|c| c.is_ascii_digit())
    }

    fn lower(&self) -> String {
        self.text.to_lowercase()
    }
}

/// Finds candidate entity names in text.
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    config: ScanConfig,
    excluded: HashSet<DiscoveryKey>,
}

impl Scanner {
    /// Create a scanner with the given limits.
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            excluded: HashSet::new(),
        }
    }

    /// Never report this name (the entity currently being authored).
    pub fn excluding(mut self, name: &str) -> Self {
        if let Some(key) = DiscoveryKey::from_name(name) {
            self.excluded.insert(key);
        }
        self
    }

    /// Scan text for names not already in the index.
    ///
    /// Each identity is reported once, with the context of its first
    /// occurrence, in first-occurrence order.
    pub fn scan(&self, text: &str, index: &MatchIndex) -> Result<DiscoveryBatch, ScanError> {
        if text.len() > self.config.max_input_bytes {
            return Err(ScanError::TooLarge {
                len: text.len(),
                max: self.config.max_input_bytes,
            });
        }
        if text.contains('\0') {
            return Err(ScanError::Binary);
        }

        let mut candidates = forced_candidates(text);
        let forced_spans: Vec<(usize, usize)> =
            candidates.iter().map(|c| (c.start, c.end)).collect();
        candidates.extend(
            self.run_candidates(text)
                .into_iter()
                .filter(|c| !forced_spans.iter().any(|&(s, e)| c.start < e && s < c.end)),
        );
        candidates.sort_by_key(|c| c.start);

        let mut seen = HashSet::new();
        let mut batch = DiscoveryBatch::new();
        for candidate in candidates {
            let Some(mut discovery) = Discovery::new(&candidate.name, DiscoverySource::Scan) else {
                continue;
            };
            if self.excluded.contains(&discovery.key) || !seen.insert(discovery.key.clone()) {
                continue;
            }

            match index.match_name(&discovery.name) {
                MatchOutcome::Exact(_) => continue,
                MatchOutcome::Fuzzy { id, score } => {
                    let name = index.name_of(id).unwrap_or_default().to_string();
                    discovery = discovery.with_suggestion(FuzzySuggestion {
                        entity_id: id,
                        name,
                        score,
                    });
                }
                MatchOutcome::None => {}
            }

            let context = snippet(text, candidate.start, candidate.end, self.config.context_radius);
            let kind = kind_from_name(&discovery.name).or_else(|| kind_from_context(&context));
            discovery.context = context;
            discovery.suggested_kind = kind;
            discovery.confidence = discovery.confidence.max(candidate.confidence);
            batch.push(discovery);
        }

        debug!(found = batch.len(), bytes = text.len(), "scanned narrative");
        Ok(batch)
    }

    /// Capitalized-run candidates.
    fn run_candidates(&self, text: &str) -> Vec<Candidate> {
        let tokens = tokenize(text);
        let mid_caps: HashSet<String> = tokens
            .iter()
            .filter(|t| t.is_capitalized() && !t.sentence_start)
            .map(|t| strip_possessive(&t.lower()).to_string())
            .collect();
        let mut start_counts: HashMap<String, usize> = HashMap::new();
        for token in tokens.iter().filter(|t| t.is_capitalized() && t.sentence_start) {
            *start_counts
                .entry(strip_possessive(&token.lower()).to_string())
                .or_insert(0) += 1;
        }

        let mut out = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if !tokens[i].is_capitalized() {
                i += 1;
                continue;
            }
            let end = extend_run(&tokens, i);
            let mut run = &tokens[i..=end];
            i = end + 1;

            while let Some(first) = run.first() {
                let lower = first.lower();
                let keep_article = lower == "the" && run.len() > 1;
                if STOP_WORDS.contains(lower.as_str()) && !keep_article {
                    run = &run[1..];
                } else {
                    break;
                }
            }
            if run.is_empty() || run.len() > self.config.max_name_words {
                continue;
            }

            let (first, last) = (&run[0], &run[run.len() - 1]);
            let mut name = text[first.start..last.end].to_string();
            let trimmed_len = strip_possessive(&name).len();
            name.truncate(trimmed_len);

            let confidence = if run.len() == 1 {
                let word = strip_possessive(&first.lower()).to_string();
                if STOP_WORDS.contains(word.as_str()) {
                    continue;
                }
                // A sentence-start word needs a mid-sentence capital or a second sentence start.
                let repeated = start_counts.get(&word).is_some_and(|&n| n > 1);
                if first.sentence_start && !mid_caps.contains(&word) && !repeated {
                    continue;
                }
                0.4
            } else {
                0.6
            };

            out.push(Candidate {
                start: first.start,
                end: first.start + name.len(),
                name,
                confidence,
            });
        }
        out
    }
}

/// Bracketed and quoted candidates; these bypass capitalization rules.
fn forced_candidates(text: &str) -> Vec<Candidate> {
    let mut out = Vec::new();

    for caps in BRACKETED.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        // Markdown link text, not a reference.
        if text[whole.end()..].starts_with('(') {
            continue;
        }
        if let Some(inner) = caps.get(1).or_else(|| caps.get(2)) {
            out.push(Candidate {
                start: whole.start(),
                end: whole.end(),
                name: inner.as_str().to_string(),
                confidence: 0.8,
            });
        }
    }

    for caps in QUOTED.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if looks_like_quoted_name(inner.as_str()) {
            out.push(Candidate {
                start: whole.start(),
                end: whole.end(),
                name: inner.as_str().to_string(),
                confidence: 0.7,
            });
        }
    }

    out
}

/// A quote holds a name, not dialogue: short, unpunctuated, capitalized.
fn looks_like_quoted_name(inner: &str) -> bool {
    let inner = inner.trim();
    if inner.ends_with(['.', ',', '!', '?', ';', ':']) {
        return false;
    }
    let words: Vec<&str> = inner.split_whitespace().collect();
    if words.is_empty() || words.len() > MAX_QUOTED_WORDS {
        return false;
    }
    let mut capitalized = 0;
    for word in &words {
        if word.chars().next().is_some_and(char::is_uppercase) {
            capitalized += 1;
        } else if !CONNECTORS.contains(word.to_lowercase().as_str()) {
            return false;
        }
    }
    capitalized > 0 && !(words.len() == 1 && STOP_WORDS.contains(words[0].to_lowercase().as_str()))
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens: Vec<Token<'_>> = Vec::new();
    let mut prev_end = 0;
    for m in WORD.find_iter(text) {
        let gap = &text[prev_end..m.start()];
        let sentence_start = tokens.is_empty() || gap.contains(['.', '!', '?', '\n', ':']);
        let joined = !tokens.is_empty() && !gap.is_empty() && gap.chars().all(|c| c == ' ');
        tokens.push(Token {
            start: m.start(),
            end: m.end(),
            text: m.as_str(),
            sentence_start,
            joined,
        });
        prev_end = m.end();
    }
    tokens
}

/// Index of the last token in the capitalized run starting at `start`.
fn extend_run(tokens: &[Token<'_>], start: usize) -> usize {
    let mut end = start;
    loop {
        let next = end + 1;
        let Some(token) = tokens.get(next) else { break };
        if !token.joined || token.sentence_start {
            break;
        }
        if token.is_capitalized() || token.is_numeric() {
            end = next;
            continue;
        }

        // Allow up to two lowercase connectors ("of the") before another capital.
        let mut probe = next;
        while probe < tokens.len()
            && probe - next < 2
            && tokens[probe].joined
            && CONNECTORS.contains(tokens[probe].lower().as_str())
        {
            probe += 1;
        }
        match tokens.get(probe) {
            Some(t) if probe > next && t.joined && t.is_capitalized() => end = probe,
            _ => break,
        }
    }
    end
}

fn strip_possessive(word: &str) -> &str {
    word.strip_suffix("'s")
        .or_else(|| word.strip_suffix("’s"))
        .unwrap_or(word)
}

/// Text around a mention, snapped to character boundaries and single-spaced.
fn snippet(text: &str, start: usize, end: usize, radius: usize) -> String {
    let mut from = start.saturating_sub(radius);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + radius).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }
    text[from..to].split_whitespace().collect::<Vec<_>>().join(" ")
}

fn kind_from_name(name: &str) -> Option<EntityKind> {
    name.split_whitespace()
        .map(|w| strip_possessive(&w.to_lowercase()).to_string())
        .find_map(|word| {
            NAME_KIND_KEYWORDS
                .iter()
                .find(|(keyword, _)| *keyword == word)
                .map(|(_, kind)| *kind)
        })
}

fn kind_from_context(context: &str) -> Option<EntityKind> {
    let mut votes: HashMap<EntityKind, usize> = HashMap::new();
    for word in WORD.find_iter(context) {
        let word = word.as_str().to_lowercase();
        if let Some((_, kind)) = CONTEXT_KIND_KEYWORDS.iter().find(|(k, _)| *k == word) {
            *votes.entry(*kind).or_default() += 1;
        }
    }
    votes
        .into_iter()
        .max_by(|(ka, a), (kb, b)| a.cmp(b).then_with(|| kb.cmp(ka)))
        .map(|(kind, _)| kind)
}
