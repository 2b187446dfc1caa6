use std::collections::{HashMap, HashSet};

/// BM25 parameters, tuned for code search.
const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

/// Tokenize text for lexical scoring. Underscores stay inside tokens so
/// snake_case identifiers survive.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter_map(|token| {
            let token = token.trim().to_lowercase();
            if token.len() >= 2 {
                Some(token)
            } else {
                None
            }
        })
        .collect()
}

/// Query terms used by boost predicates: whitespace-split, lowercased,
/// short noise words dropped.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .filter(|w| w.len() >= 3)
        .map(|w| w.to_lowercase())
        .collect()
}

/// BM25 index over a candidate set of documents.
#[derive(Default, Clone)]
pub struct Bm25Index {
    doc_freq: HashMap<String, usize>,
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lengths: Vec<usize>,
    avg_doc_len: f32,
    num_docs: usize,
}

impl Bm25Index {
    pub fn build(documents: &[&str]) -> Self {
        let num_docs = documents.len();
        if num_docs == 0 {
            return Self::default();
        }

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut term_freqs: Vec<HashMap<String, usize>> = Vec::with_capacity(num_docs);
        let mut doc_lengths: Vec<usize> = Vec::with_capacity(num_docs);
        let mut total_len = 0usize;

        for doc in documents {
            let tokens = tokenize(doc);
            doc_lengths.push(tokens.len());
            total_len += tokens.len();

            let mut tf: HashMap<String, usize> = HashMap::new();
            let mut seen: HashSet<String> = HashSet::new();
            for token in tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
                if seen.insert(token.clone()) {
                    *doc_freq.entry(token).or_insert(0) += 1;
                }
            }
            term_freqs.push(tf);
        }

        Self {
            doc_freq,
            term_freqs,
            doc_lengths,
            avg_doc_len: total_len as f32 / num_docs as f32,
            num_docs,
        }
    }

    pub fn score(&self, query: &str, doc_idx: usize) -> f32 {
        if doc_idx >= self.num_docs {
            return 0.0;
        }

        let query_tokens = tokenize(query);
        let doc_len = self.doc_lengths[doc_idx] as f32;
        let tf_map = &self.term_freqs[doc_idx];

        let mut score = 0.0;
        for term in &query_tokens {
            let tf = *tf_map.get(term).unwrap_or(&0) as f32;
            let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
            if df == 0.0 || tf == 0.0 {
                continue;
            }

            let idf = ((self.num_docs as f32 - df + 0.5) / (df + 0.5) + 1.0).ln();
            let tf_norm = (tf * (BM25_K1 + 1.0))
                / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / self.avg_doc_len));

            score += idf * tf_norm;
        }
        score
    }

    /// All documents with a nonzero score, sorted descending.
    pub fn rank(&self, query: &str) -> Vec<(usize, f32)> {
        let mut scores: Vec<(usize, f32)> = (0..self.num_docs)
            .map(|i| (i, self.score(query, i)))
            .filter(|(_, s)| *s > 0.0)
            .collect();

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores
    }
}
