//! 实体模糊匹配：把自然语言片段（如「开会那个」）映射到具体记录 id
//!
//! 相似度为 `2 * M / (|a| + |b|)`，M 是最长公共子序列长度，按 Unicode 字符计算，先 trim 并转小写。
//! 短片段对长标题（「开会」对「明天下午三点开会」）也能得到可用的分数。

/// 默认匹配阈值
pub const DEFAULT_THRESHOLD: f64 = 0.3;

/// 候选记录
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub id: i64,
    pub label: String,
}

impl Candidate {
    pub fn new(id: i64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

/// 匹配结果
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Match { id: i64, score: f64 },
    NoMatch,
}

/// 取得分最高的候选；同分取靠前者；低于阈值返回 NoMatch
pub fn resolve(candidates: &[Candidate], query: &str, threshold: f64) -> Resolution {
    let mut best: Option<(i64, f64)> = None;
    for candidate in candidates {
        let score = similarity(&candidate.label, query);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate.id, score));
        }
    }
    match best {
        Some((id, score)) if score >= threshold => Resolution::Match { id, score },
        _ => Resolution::NoMatch,
    }
}

/// 归一化相似度，范围 [0, 1]；两个空串为 1.0
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * common_subsequence(&a, &b) as f64 / total as f64
}

fn common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0; b.len() + 1];
    let mut curr = vec![0; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<Candidate> {
        vec![Candidate::new(1, "开会"), Candidate::new(2, "买菜")]
    }

    #[test]
    fn test_exact_match_scores_one() {
        assert_eq!(
            resolve(&candidates(), "开会", DEFAULT_THRESHOLD),
            Resolution::Match { id: 1, score: 1.0 }
        );
    }

    #[test]
    fn test_unrelated_query_is_no_match() {
        assert_eq!(resolve(&candidates(), "xyz", DEFAULT_THRESHOLD), Resolution::NoMatch);
        assert_eq!(resolve(&[], "开会", DEFAULT_THRESHOLD), Resolution::NoMatch);
    }

    #[test]
    fn test_partial_phrase_matches_closest() {
        let list = vec![
            Candidate::new(7, "明天下午三点开会"),
            Candidate::new(8, "去超市买菜"),
        ];
        match resolve(&list, "明天开会", DEFAULT_THRESHOLD) {
            Resolution::Match { id, score } => {
                assert_eq!(id, 7);
                assert!(score >= DEFAULT_THRESHOLD && score < 1.0);
            }
            Resolution::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_short_fragment_matches_long_label() {
        let list = vec![
            Candidate::new(7, "明天下午三点开会"),
            Candidate::new(8, "买菜"),
        ];
        match resolve(&list, "开会", DEFAULT_THRESHOLD) {
            Resolution::Match { id, score } => {
                assert_eq!(id, 7);
                assert!((score - 0.4).abs() < 1e-9);
            }
            Resolution::NoMatch => panic!("expected a match"),
        }
        assert_eq!(resolve(&list, "xyz", DEFAULT_THRESHOLD), Resolution::NoMatch);
    }

    #[test]
    fn test_ties_go_to_earliest_candidate() {
        let list = vec![Candidate::new(3, "ab"), Candidate::new(4, "ab")];
        assert_eq!(
            resolve(&list, "ab", DEFAULT_THRESHOLD),
            Resolution::Match { id: 3, score: 1.0 }
        );
    }

    #[test]
    fn test_similarity_normalizes_case_and_whitespace() {
        assert_eq!(similarity("  Report ", "report"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert!((similarity("kitten", "sitting") - 8.0 / 13.0).abs() < 1e-9);
    }
}
