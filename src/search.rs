use crate::similarity::cosine_similarity;
use crate::types::{HistoryEntry, SearchResult};

pub const DEFAULT_TOP_K: usize = 3;
/// Results at or below this similarity are not worth offering.
pub const MIN_SCORE: f64 = 0.1;

/// Ranks `entries` against `query` and returns at most `k` results above
/// `min_score`, best first.
///
/// A candidate only displaces a ranked slot with a strictly greater score, so
/// among equal scores the entry stored first ranks higher. The threshold is
/// applied after ranking.
pub fn top_k(
    query: &[f64],
    entries: &[HistoryEntry],
    k: usize,
    min_score: f64,
) -> Vec<SearchResult> {
    if k == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<SearchResult> = Vec::with_capacity(k + 1);
    for entry in entries {
        let score = cosine_similarity(query, &entry.embedding);
        let slot = ranked.iter().position(|r| score > r.score);
        match slot {
            Some(i) => {
                ranked.insert(
                    i,
                    SearchResult {
                        command: entry.command.clone(),
                        score,
                    },
                );
                ranked.truncate(k);
            }
            None if ranked.len() < k => ranked.push(SearchResult {
                command: entry.command.clone(),
                score,
            }),
            None => {}
        }
    }

    ranked.retain(|r| r.score > min_score);
    ranked
}
