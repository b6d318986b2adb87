use std::collections::HashSet;

use crate::models::job::JobRow;

/// Description words longer than this many characters become keywords.
const MIN_DESCRIPTION_WORD_LEN: usize = 5;
const MAX_DESCRIPTION_WORDS: usize = 5;

/// Subject keywords for a scan: each job title, the first few long words of
/// each description, then the integration's own keywords. Duplicates are
/// dropped, keeping the first occurrence.
pub fn scan_keywords(jobs: &[JobRow], custom: &[String]) -> Vec<String> {
    let mut candidates = Vec::new();
    for job in jobs {
        candidates.push(job.title.as_str());
        candidates.extend(
            job.description
                .split_whitespace()
                .filter(|w| w.chars().count() > MIN_DESCRIPTION_WORD_LEN)
                .take(MAX_DESCRIPTION_WORDS),
        );
    }
    candidates.extend(custom.iter().map(String::as_str));

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(str::trim)
        .filter(|kw| !kw.is_empty())
        .filter(|kw| seen.insert(*kw))
        .map(str::to_string)
        .collect()
}
