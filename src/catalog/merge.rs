//! Title normalization and candidate coalescing.

use super::{BookApiResult, Candidate, PLACEHOLDER_COVER, UNKNOWN_AUTHOR, UNKNOWN_TITLE};
use std::collections::{HashMap, HashSet};

/// Lowercase a title, drop punctuation and collapse whitespace.
///
/// Titles made only of punctuation fall back to their trimmed lowercase
/// form so that they still key to something.
pub fn normalize_title(title: &str) -> String {
    let mut key = String::with_capacity(title.len());
    let mut pending_space = false;

    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_space && !key.is_empty() {
                key.push(' ');
            }
            pending_space = false;
            key.extend(c.to_lowercase());
        } else if c == '\'' || c == '\u{2019}' {
            // Apostrophes join: "Don't" keys as "dont".
        } else {
            pending_space = true;
        }
    }

    if key.is_empty() {
        title.trim().to_lowercase()
    } else {
        key
    }
}

/// Whether two normalized keys name the same book.
///
/// Keys match when equal, when one contains the other, or when both are
/// longer than `prefix_len` characters and share that many leading ones.
/// Empty keys only match each other.
pub fn titles_similar(a: &str, b: &str, prefix_len: usize) -> bool {
    if a == b {
        return true;
    }
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.contains(b) || b.contains(a) {
        return true;
    }
    if prefix_len == 0 {
        return false;
    }

    a.chars().count() > prefix_len
        && b.chars().count() > prefix_len
        && a.chars().take(prefix_len).eq(b.chars().take(prefix_len))
}

/// Words of a title longer than `min_len` characters, punctuation trimmed.
pub fn significant_words(title: &str, min_len: usize) -> Vec<String> {
    title
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.chars().count() > min_len)
        .map(str::to_string)
        .collect()
}

/// Add genres missing from `target`, keeping first-seen order.
///
/// Comparison ignores case and surrounding whitespace.
pub fn union_genres(target: &mut Vec<String>, extra: &[String]) {
    for genre in extra {
        let genre = genre.trim();
        if genre.is_empty() {
            continue;
        }
        let folded = genre.to_lowercase();
        if !target.iter().any(|g| g.trim().to_lowercase() == folded) {
            target.push(genre.to_string());
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn has_cover(value: &Option<String>) -> bool {
    value
        .as_deref()
        .is_some_and(|v| !v.trim().is_empty() && v != PLACEHOLDER_COVER)
}

/// Fill fields missing in `target` from `other`. Present fields are kept.
pub fn fill_missing(target: &mut Candidate, other: &Candidate) {
    if target.title.trim().is_empty() && !other.title.trim().is_empty() {
        target.title = other.title.clone();
    }
    if is_blank(&target.author) && !is_blank(&other.author) {
        target.author = other.author.clone();
    }
    if !has_cover(&target.cover_url) && has_cover(&other.cover_url) {
        target.cover_url = other.cover_url.clone();
    }
    union_genres(&mut target.genres, &other.genres);
    if target.page_count.is_none() {
        target.page_count = other.page_count;
    }
    if is_blank(&target.synopsis) && !is_blank(&other.synopsis) {
        target.synopsis = other.synopsis.clone();
    }
}

/// Merge a group of similar candidates into one record.
///
/// Longest title and synopsis win; author, cover and page count come from
/// the first member that has one; genres are unioned.
pub fn merge_group<'a>(members: impl IntoIterator<Item = &'a Candidate>) -> Candidate {
    let mut merged = Candidate::default();
    let mut title_len = 0;
    let mut synopsis_len = 0;

    for member in members {
        let len = member.title.trim().chars().count();
        if len > title_len {
            title_len = len;
            merged.title = member.title.clone();
        }
        if is_blank(&merged.author) && !is_blank(&member.author) {
            merged.author = member.author.clone();
        }
        if !has_cover(&merged.cover_url) && has_cover(&member.cover_url) {
            merged.cover_url = member.cover_url.clone();
        }
        union_genres(&mut merged.genres, &member.genres);
        if merged.page_count.is_none() {
            merged.page_count = member.page_count;
        }
        let len = member
            .synopsis
            .as_deref()
            .map(|s| s.trim().chars().count())
            .unwrap_or(0);
        if len > synopsis_len {
            synopsis_len = len;
            merged.synopsis = member.synopsis.clone();
        }
    }

    merged
}

/// Union-find over candidate indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lowest index stays root so groups keep insertion order.
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

/// Partition keys into groups of transitively similar titles.
///
/// Groups are ordered by their first member; members keep input order.
pub fn similarity_groups(keys: &[String], prefix_len: usize) -> Vec<Vec<usize>> {
    let mut set = DisjointSet::new(keys.len());
    for i in 0..keys.len() {
        for j in (i + 1)..keys.len() {
            if titles_similar(&keys[i], &keys[j], prefix_len) {
                set.union(i, j);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot: HashMap<usize, usize> = HashMap::new();
    for i in 0..keys.len() {
        let root = set.find(i);
        let idx = *slot.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[idx].push(i);
    }
    groups
}

impl Candidate {
    /// Convert to a search result, substituting defaults for missing fields.
    pub fn finalize(self) -> BookApiResult {
        let title = self.title.trim();
        let author = self.author.as_deref().map(str::trim).unwrap_or_default();

        BookApiResult {
            title: if title.is_empty() {
                UNKNOWN_TITLE.to_string()
            } else {
                title.to_string()
            },
            author: if author.is_empty() {
                UNKNOWN_AUTHOR.to_string()
            } else {
                author.to_string()
            },
            cover_url: match self.cover_url {
                Some(url) if !url.trim().is_empty() => url,
                _ => PLACEHOLDER_COVER.to_string(),
            },
            genres: self.genres,
            page_count: self.page_count.filter(|&p| p > 0),
            synopsis: self.synopsis.filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Candidates collected during one search, indexed by normalized title.
#[derive(Debug)]
pub struct CandidatePool {
    entries: Vec<(String, Candidate)>,
    index: HashMap<String, usize>,
    prefix_len: usize,
}

impl CandidatePool {
    /// Create an empty pool.
    pub fn new(prefix_len: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            prefix_len,
        }
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, key: String, candidate: Candidate) {
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, candidate));
    }

    /// Fill the candidate with the same key, or add a new one.
    pub fn insert_or_fill(&mut self, candidate: Candidate) {
        let key = normalize_title(&candidate.title);
        match self.index.get(&key) {
            Some(&i) => fill_missing(&mut self.entries[i].1, &candidate),
            None => self.push(key, candidate),
        }
    }

    /// Fill the first candidate with a similar title, or add a new one.
    pub fn fill_similar_or_insert(&mut self, candidate: Candidate) {
        let key = normalize_title(&candidate.title);
        let similar = self
            .index
            .get(&key)
            .copied()
            .or_else(|| {
                self.entries
                    .iter()
                    .position(|(k, _)| titles_similar(k, &key, self.prefix_len))
            });
        match similar {
            Some(i) => fill_missing(&mut self.entries[i].1, &candidate),
            None => self.push(key, candidate),
        }
    }

    /// Add the candidate only if its key is new. Returns whether it was added.
    pub fn insert_new(&mut self, candidate: Candidate) -> bool {
        let key = normalize_title(&candidate.title);
        if self.index.contains_key(&key) {
            return false;
        }
        self.push(key, candidate);
        true
    }

    /// Merge every group of similar titles and write the result back onto
    /// each member.
    pub fn merge_similar(&mut self) {
        let keys: Vec<String> = self.entries.iter().map(|(k, _)| k.clone()).collect();
        for group in similarity_groups(&keys, self.prefix_len) {
            if group.len() < 2 {
                continue;
            }
            let merged = merge_group(group.iter().map(|&i| &self.entries[i].1));
            for &i in &group {
                self.entries[i].1 = merged.clone();
            }
        }
    }

    /// Final results: one per distinct normalized title, defaults applied.
    pub fn finish(self) -> Vec<BookApiResult> {
        let mut seen = HashSet::new();
        self.entries
            .into_iter()
            .map(|(_, candidate)| candidate)
            .filter(|c| seen.insert(normalize_title(&c.title)))
            .map(Candidate::finalize)
            .collect()
    }
}
