use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::Context;
use regex::{Captures, Regex};
use tracing::debug;
use uuid::Uuid;

use crate::models::{NameMapping, StudentRecord, Substitution, Translation};
use crate::store::StudentStore;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

const MATCH_THRESHOLD: f64 = 0.6;
const SEARCH_THRESHOLD: f64 = 0.3;

const UUID_PATTERN: &str =
    r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";

/// Identifier surface forms, most specific first. Alternation is leftmost-first,
/// so a wrapped identifier is always consumed together with its wrapper.
static ID_FORMS: LazyLock<Regex> = LazyLock::new(|| {
    let template = r#"\[student:(?P<token>UUID)\]|\[(?P<bracketed>UUID)\]|\((?P<paren>UUID)\)|"(?P<quoted>UUID)"|'(?P<single>UUID)'|(?i:\b(?:student\s+id|student|id)\s*[:#]?\s*)(?P<prefixed>UUID)|\b(?P<bare>UUID)\b"#;
    Regex::new(&template.replace("UUID", UUID_PATTERN)).expect("identifier pattern")
});

static LEFTOVER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[student:([^\]]*)\]").expect("token pattern"));

const ID_GROUPS: [&str; 7] = [
    "token",
    "bracketed",
    "paren",
    "quoted",
    "single",
    "prefixed",
    "bare",
];

pub fn canonical_token(student_id: Uuid) -> String {
    format!("[student:{student_id}]")
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Case-insensitive similarity in `[0, 1]`.
pub fn similarity(query: &str, target: &str) -> f64 {
    let query = normalize(query);
    let target = normalize(target);
    if query.is_empty() || target.is_empty() {
        return 0.0;
    }
    if query == target {
        return 1.0;
    }
    if target.contains(&query) || query.contains(&target) {
        return 0.8;
    }

    let query_words: Vec<&str> = query.split(' ').filter(|w| w.chars().count() > 1).collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let target_words: Vec<&str> = target.split(' ').filter(|w| w.chars().count() > 1).collect();

    let matched = query_words
        .iter()
        .filter(|q| {
            target_words
                .iter()
                .any(|t| t.starts_with(**q) || q.starts_with(*t))
        })
        .count();

    matched as f64 / query_words.len() as f64
}

fn lookup_keys(student: &StudentRecord) -> Vec<String> {
    let mut keys = vec![normalize(&student.full_name())];

    if let Some(initial) = student.last_name.trim().chars().next() {
        let short = normalize(&format!("{} {}", student.first_name, initial));
        keys.push(format!("{short}."));
        keys.push(short);
    }
    keys.push(normalize(&format!("{}, {}", student.last_name, student.first_name)));

    if let Some(reference) = student.reference_number.as_deref() {
        let reference = reference.trim();
        if !reference.is_empty() {
            keys.push(reference.to_string());
        }
    }
    keys
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uninitialized,
    Cached,
    Stale,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub student: StudentRecord,
    pub score: f64,
}

/// Identifier/name lookup tables, rebuilt wholesale from the store whenever they expire.
#[derive(Debug)]
pub struct NameCache {
    ttl: Duration,
    refreshed_at: Option<Instant>,
    mappings: HashMap<Uuid, NameMapping>,
    ids_by_key: HashMap<String, Uuid>,
    students: Vec<StudentRecord>,
}

impl Default for NameCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl NameCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            refreshed_at: None,
            mappings: HashMap::new(),
            ids_by_key: HashMap::new(),
            students: Vec::new(),
        }
    }

    pub fn state(&self) -> CacheState {
        match self.refreshed_at {
            None => CacheState::Uninitialized,
            Some(at) if at.elapsed() >= self.ttl => CacheState::Stale,
            Some(_) => CacheState::Cached,
        }
    }

    pub fn student_count(&self) -> usize {
        self.students.len()
    }

    pub fn mapping(&self, student_id: Uuid) -> Option<&NameMapping> {
        self.mappings.get(&student_id)
    }

    pub async fn refresh<S: StudentStore>(&mut self, store: &S) -> anyhow::Result<()> {
        let students = store
            .all_students()
            .await
            .context("failed to load students for the name cache")?;

        let mut mappings = HashMap::with_capacity(students.len());
        let mut ids_by_key = HashMap::new();

        for student in &students {
            for key in lookup_keys(student) {
                ids_by_key.entry(key).or_insert(student.id);
            }
            mappings.insert(
                student.id,
                NameMapping {
                    student_id: student.id,
                    full_name: student.full_name(),
                    reference_number: student.reference_number.clone(),
                },
            );
        }

        self.mappings = mappings;
        self.ids_by_key = ids_by_key;
        self.students = students;
        self.refreshed_at = Some(Instant::now());
        debug!(students = self.students.len(), "name cache refreshed");
        Ok(())
    }

    async fn ensure_fresh<S: StudentStore>(&mut self, store: &S) -> anyhow::Result<()> {
        if self.state() != CacheState::Cached {
            self.refresh(store).await?;
        }
        Ok(())
    }

    fn student(&self, id: Uuid) -> Option<&StudentRecord> {
        self.students.iter().find(|s| s.id == id)
    }

    fn lookup(&self, query: &str) -> Option<&StudentRecord> {
        let key = normalize(query);
        if key.is_empty() {
            return None;
        }
        if let Some(id) = self.ids_by_key.get(&key) {
            return self.student(*id);
        }

        let mut best: Option<(&StudentRecord, f64)> = None;
        for student in &self.students {
            let score = similarity(&key, &student.full_name());
            if score > MATCH_THRESHOLD && best.map_or(true, |(_, top)| score > top) {
                best = Some((student, score));
            }
        }
        best.map(|(student, _)| student)
    }

    pub async fn find_student_by_name<S: StudentStore>(
        &mut self,
        store: &S,
        query: &str,
    ) -> anyhow::Result<Option<StudentRecord>> {
        self.ensure_fresh(store).await?;
        Ok(self.lookup(query).cloned())
    }

    pub async fn search_students_by_name<S: StudentStore>(
        &mut self,
        store: &S,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        self.ensure_fresh(store).await?;
        let needle = normalize(query);
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .students
            .iter()
            .filter_map(|student| {
                let name = student.full_name();
                let score = similarity(&needle, &name);
                (score > SEARCH_THRESHOLD || normalize(&name).contains(&needle)).then(|| {
                    SearchHit {
                        student: student.clone(),
                        score,
                    }
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.student.full_name().cmp(&b.student.full_name()))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Replaces student names and reference numbers in `text` with canonical tokens.
    ///
    /// Candidates are tried in one left-to-right pass. At each position a quoted
    /// string (double or single quotes) wins over a two-word name, which wins over
    /// a reference number. Single letters never form part of a two-word name. An
    /// unresolved candidate only advances one word, so a name starting inside it is
    /// still found.
    pub async fn translate_names_to_ids<S: StudentStore>(
        &mut self,
        store: &S,
        text: &str,
    ) -> anyhow::Result<Translation> {
        self.ensure_fresh(store).await?;

        let words = word_spans(text);
        let quotes = quoted_spans(text);
        let mut found: Vec<(Range<usize>, Uuid)> = Vec::new();
        let mut consumed = 0usize;
        let mut wi = 0usize;
        let mut qi = 0usize;

        loop {
            while qi < quotes.len() && quotes[qi].start < consumed {
                qi += 1;
            }
            while wi < words.len() && words[wi].start < consumed {
                wi += 1;
            }

            let quote = quotes.get(qi);
            let word = words.get(wi);

            if let Some(quote) = quote {
                if word.map_or(true, |w| quote.start <= w.start) {
                    let inner = &text[quote.start + 1..quote.end - 1];
                    if let Some(student) = self.lookup(inner) {
                        found.push((quote.clone(), student.id));
                        consumed = quote.end;
                    }
                    qi += 1;
                    continue;
                }
            }

            let Some(word) = word else {
                break;
            };

            if let Some(next) = words.get(wi + 1) {
                let first = &text[word.clone()];
                let second = &text[next.clone()];
                let gap = &text[word.end..next.start];
                let adjacent = !gap.is_empty() && gap.chars().all(|c| c == ' ');
                let shape = name_shape(first);
                if adjacent && shape.is_some() && shape == name_shape(second) {
                    let candidate = &text[word.start..next.end];
                    if let Some(student) = self.lookup(candidate) {
                        found.push((word.start..next.end, student.id));
                        consumed = next.end;
                        continue;
                    }
                }
            }

            let token = &text[word.clone()];
            if is_reference_number(token) {
                if let Some(student) = self.lookup(token) {
                    found.push((word.clone(), student.id));
                    consumed = word.end;
                    continue;
                }
            }
            wi += 1;
        }

        let mut output = String::with_capacity(text.len());
        let mut substitutions = Vec::with_capacity(found.len());
        let mut cursor = 0usize;

        for (range, student_id) in found {
            output.push_str(&text[cursor..range.start]);
            output.push_str(&canonical_token(student_id));
            substitutions.push(Substitution {
                original: text[range.clone()].to_string(),
                student_id,
                display_name: self
                    .mappings
                    .get(&student_id)
                    .map(|m| m.full_name.clone())
                    .unwrap_or_default(),
            });
            cursor = range.end;
        }
        output.push_str(&text[cursor..]);

        Ok(Translation {
            text: output,
            substitutions,
        })
    }

    /// Replaces student identifiers in `text` with display names. Unknown
    /// identifiers stay in place, minus any `[student:...]` wrapper.
    pub async fn translate_ids_to_names<S: StudentStore>(
        &mut self,
        store: &S,
        text: &str,
    ) -> anyhow::Result<String> {
        self.ensure_fresh(store).await?;

        let replaced = ID_FORMS.replace_all(text, |caps: &Captures| {
            let resolved = ID_GROUPS
                .iter()
                .find_map(|group| caps.name(group))
                .and_then(|m| Uuid::parse_str(m.as_str()).ok())
                .and_then(|id| self.mappings.get(&id));

            match resolved {
                Some(mapping) => mapping.full_name.clone(),
                None => caps[0].to_string(),
            }
        });

        Ok(LEFTOVER_TOKEN.replace_all(&replaced, "$1").into_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameShape {
    Capitalized,
    Upper,
    Lower,
}

fn name_shape(word: &str) -> Option<NameShape> {
    let mut chars = word.chars();
    let first = chars.next()?;
    if !first.is_alphabetic() || !word.chars().all(|c| c.is_alphabetic() || c == '\'' || c == '-') {
        return None;
    }

    let letters: Vec<char> = word.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < 2 {
        return None;
    }
    if letters.iter().all(|c| c.is_uppercase()) {
        Some(NameShape::Upper)
    } else if letters.iter().all(|c| c.is_lowercase()) {
        Some(NameShape::Lower)
    } else if first.is_uppercase() && chars.filter(|c| c.is_alphabetic()).any(|c| c.is_lowercase()) {
        Some(NameShape::Capitalized)
    } else {
        None
    }
}

fn is_reference_number(word: &str) -> bool {
    (6..=9).contains(&word.len()) && word.bytes().all(|b| b.is_ascii_digit())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '\'' || c == '-'
}

fn word_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (index, c) in text.char_indices() {
        match (is_word_char(c), start) {
            (true, None) => start = Some(index),
            (false, Some(begin)) => {
                spans.push(begin..index);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(begin) = start {
        spans.push(begin..text.len());
    }
    spans
}

/// Quoted regions including both quote marks, ordered by start; a dangling quote
/// is ignored. A single quote opens only after a non-alphanumeric character and
/// closes only before one, so apostrophes inside words never count.
fn quoted_spans(text: &str) -> Vec<Range<usize>> {
    let bounded = |neighbour: Option<char>| neighbour.map_or(true, |c| !c.is_alphanumeric());
    let mut spans = Vec::new();
    let mut open_double: Option<usize> = None;
    let mut open_single: Option<usize> = None;
    let mut previous: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        match c {
            '"' => match open_double.take() {
                Some(begin) if index > begin + 1 => spans.push(begin..index + 1),
                Some(_) => {}
                None => open_double = Some(index),
            },
            '\'' => match open_single {
                Some(begin) if bounded(next) => {
                    if index > begin + 1 {
                        spans.push(begin..index + 1);
                    }
                    open_single = None;
                }
                None if bounded(previous) => open_single = Some(index),
                _ => {}
            },
            _ => {}
        }
        previous = Some(c);
    }

    spans.sort_by_key(|span| span.start);
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn roster() -> MemoryStore {
        MemoryStore::with_students(&["John Smith", "Jane Smith", "Bob Jones"])
    }

    #[test]
    fn similarity_tiers() {
        assert_eq!(similarity("John Smith", "john smith"), 1.0);
        assert_eq!(similarity("smith", "John Smith"), 0.8);
        assert_eq!(similarity("Mr John Smith", "John Smith"), 0.8);
        assert_eq!(similarity("jo smi", "John Smith"), 1.0);
        assert_eq!(similarity("jo xavier", "John Smith"), 0.5);
        assert_eq!(similarity("j q", "John Smith"), 0.0);
        assert_eq!(similarity("", "John Smith"), 0.0);
    }

    #[tokio::test]
    async fn exact_lookup_is_case_insensitive() {
        let store = roster();
        let mut cache = NameCache::default();

        let found = cache
            .find_student_by_name(&store, "john smith")
            .await
            .expect("lookup");
        assert_eq!(found, Some(store.student("John Smith")));

        let by_last_first = cache
            .find_student_by_name(&store, "Jones,  Bob")
            .await
            .expect("lookup");
        assert_eq!(by_last_first, Some(store.student("Bob Jones")));

        let by_initial = cache
            .find_student_by_name(&store, "Jane S.")
            .await
            .expect("lookup");
        assert_eq!(by_initial, Some(store.student("Jane Smith")));

        let by_reference = cache
            .find_student_by_name(&store, "4100202")
            .await
            .expect("lookup");
        assert_eq!(by_reference, Some(store.student("Bob Jones")));
    }

    #[tokio::test]
    async fn fuzzy_lookup_respects_threshold() {
        let store = roster();
        let mut cache = NameCache::default();

        let close = cache
            .find_student_by_name(&store, "Mr Bob Jones")
            .await
            .expect("lookup");
        assert_eq!(close, Some(store.student("Bob Jones")));

        let weak = cache
            .find_student_by_name(&store, "Jo Xavier")
            .await
            .expect("lookup");
        assert_eq!(weak, None);

        let unknown = cache
            .find_student_by_name(&store, "Priya Raman")
            .await
            .expect("lookup");
        assert_eq!(unknown, None);
    }

    #[tokio::test]
    async fn fresh_cache_is_not_reloaded() {
        let store = roster();
        let mut cache = NameCache::default();
        assert_eq!(cache.state(), CacheState::Uninitialized);

        cache.refresh(&store).await.expect("refresh");
        assert_eq!(cache.state(), CacheState::Cached);
        assert_eq!(cache.student_count(), 3);

        cache
            .find_student_by_name(&store, "Bob Jones")
            .await
            .expect("lookup");
        cache
            .search_students_by_name(&store, "smi", 5)
            .await
            .expect("search");
        assert_eq!(store.student_loads.get(), 1);
    }

    #[tokio::test]
    async fn stale_cache_reloads_on_lookup() {
        let store = roster();
        let mut cache = NameCache::new(Duration::ZERO);

        cache.refresh(&store).await.expect("refresh");
        assert_eq!(cache.state(), CacheState::Stale);

        cache
            .find_student_by_name(&store, "Bob Jones")
            .await
            .expect("lookup");
        assert_eq!(store.student_loads.get(), 2);
    }

    #[tokio::test]
    async fn refresh_failure_propagates() {
        let store = roster();
        store.fail.set(true);
        let mut cache = NameCache::default();

        let result = cache.find_student_by_name(&store, "John Smith").await;
        assert!(result.is_err());
        assert_eq!(cache.state(), CacheState::Uninitialized);
    }

    #[tokio::test]
    async fn search_ranks_substring_matches_first() {
        let store = roster();
        let mut cache = NameCache::default();

        let hits = cache
            .search_students_by_name(&store, "smi", 10)
            .await
            .expect("search");
        let names: Vec<String> = hits.iter().map(|h| h.student.full_name()).collect();
        assert_eq!(names[..2], ["Jane Smith".to_string(), "John Smith".to_string()]);
        assert!(!names[2..].contains(&"Bob Jones".to_string()));

        let limited = cache
            .search_students_by_name(&store, "smi", 1)
            .await
            .expect("search");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn names_round_trip_through_tokens() {
        let store = roster();
        let john = store.student("John Smith");
        let mut cache = NameCache::default();
        let original = "Please review John Smith before Friday.";

        let translated = cache
            .translate_names_to_ids(&store, original)
            .await
            .expect("to ids");
        assert_eq!(
            translated.text,
            format!("Please review {} before Friday.", canonical_token(john.id))
        );
        assert_eq!(translated.substitutions.len(), 1);
        assert_eq!(translated.substitutions[0].original, "John Smith");
        assert_eq!(translated.substitutions[0].display_name, "John Smith");

        let restored = cache
            .translate_ids_to_names(&store, &translated.text)
            .await
            .expect("to names");
        assert_eq!(restored, original);
    }

    #[tokio::test]
    async fn names_to_ids_handles_each_candidate_shape() {
        let store = roster();
        let jane = store.student("Jane Smith");
        let bob = store.student("Bob Jones");
        let john = store.student("John Smith");
        let mut cache = NameCache::default();

        let translated = cache
            .translate_names_to_ids(
                &store,
                "ask about \"Jane Smith\", BOB JONES and for john smith see 4100202 too",
            )
            .await
            .expect("to ids");

        assert_eq!(
            translated.text,
            format!(
                "ask about {}, {} and for {} see {} too",
                canonical_token(jane.id),
                canonical_token(bob.id),
                canonical_token(john.id),
                canonical_token(bob.id)
            )
        );
        let originals: Vec<&str> = translated
            .substitutions
            .iter()
            .map(|s| s.original.as_str())
            .collect();
        assert_eq!(originals, ["\"Jane Smith\"", "BOB JONES", "john smith", "4100202"]);
    }

    #[tokio::test]
    async fn unresolved_text_is_unchanged() {
        let store = roster();
        let mut cache = NameCache::default();
        let text = "Nothing to see here, \"Priya Raman\" 123";

        let translated = cache
            .translate_names_to_ids(&store, text)
            .await
            .expect("to ids");
        assert_eq!(translated.text, text);
        assert!(translated.substitutions.is_empty());
    }

    #[tokio::test]
    async fn single_letters_are_not_swallowed_into_names() {
        let store = roster();
        let mut cache = NameCache::default();
        let text = "i saw a bob today";

        let translated = cache
            .translate_names_to_ids(&store, text)
            .await
            .expect("to ids");
        assert_eq!(translated.text, text);
        assert!(translated.substitutions.is_empty());

        let restored = cache
            .translate_ids_to_names(&store, &translated.text)
            .await
            .expect("to names");
        assert_eq!(restored, text);
    }

    #[tokio::test]
    async fn single_quoted_names_resolve_but_apostrophes_do_not() {
        let store = roster();
        let bob = store.student("Bob Jones");
        let mut cache = NameCache::default();

        let translated = cache
            .translate_names_to_ids(&store, "call 'Bob Jones' now")
            .await
            .expect("to ids");
        assert_eq!(
            translated.text,
            format!("call {} now", canonical_token(bob.id))
        );
        assert_eq!(translated.substitutions.len(), 1);
        assert_eq!(translated.substitutions[0].original, "'Bob Jones'");

        let text = "don't worry, it's Jane's turn";
        let untouched = cache
            .translate_names_to_ids(&store, text)
            .await
            .expect("to ids");
        assert_eq!(untouched.text, text);
        assert!(untouched.substitutions.is_empty());
    }

    #[tokio::test]
    async fn ids_to_names_handles_surface_forms() {
        let store = roster();
        let john = store.student("John Smith");
        let bob = store.student("Bob Jones");
        let stranger = Uuid::new_v4();
        let mut cache = NameCache::default();

        let text = format!(
            "({}) met Student ID: {} and \"{}\"; bare {}; unknown [student:{}]",
            john.id, bob.id, john.id, bob.id, stranger
        );
        let restored = cache
            .translate_ids_to_names(&store, &text)
            .await
            .expect("to names");
        assert_eq!(
            restored,
            format!("John Smith met Bob Jones and John Smith; bare Bob Jones; unknown {stranger}")
        );
    }

    #[tokio::test]
    async fn ids_to_names_handles_bracketed_and_single_quoted_ids() {
        let store = roster();
        let jane = store.student("Jane Smith");
        let bob = store.student("Bob Jones");
        let stranger = Uuid::new_v4();
        let mut cache = NameCache::default();

        let text = format!("[{}] and '{}' but not [{}]", jane.id, bob.id, stranger);
        let restored = cache
            .translate_ids_to_names(&store, &text)
            .await
            .expect("to names");
        assert_eq!(
            restored,
            format!("Jane Smith and Bob Jones but not [{stranger}]")
        );
    }
}
