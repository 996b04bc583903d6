//! RRF (Reciprocal Rank Fusion)
//!
//! 여러 검색 패스의 순위를 하나로 합칩니다. 원점수는 쓰지 않고 순위만 봅니다.
//!
//! `score(e) = Σ_pass 1 / (k + rank_pass(e))`
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;

/// 기본 스무딩 상수
pub const DEFAULT_RRF_K: f64 = 50.0;

/// 한 패스의 후보 (rank는 1부터)
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate<K> {
    pub entity_id: K,
    pub rank: usize,
    pub raw_score: f64,
}

impl<K> RankedCandidate<K> {
    pub fn new(entity_id: K, rank: usize, raw_score: f64) -> Self {
        Self {
            entity_id,
            rank,
            raw_score,
        }
    }
}

/// 융합 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedCandidate<K> {
    pub entity_id: K,
    pub fused_score: f64,
}

/// RRF 융합
///
/// - 같은 패스 안에서 중복된 엔티티는 가장 좋은 순위만 반영
/// - 패스 간 기여도는 합산, 없는 패스는 0
/// - rank 0은 잘못된 입력으로 보고 무시
/// - 점수 내림차순, 동점은 entity_id 오름차순
///
/// 기여도를 정렬 후 합산하므로 패스 순서를 바꿔도 결과가 비트 단위로 같습니다.
pub fn reciprocal_rank_fusion<K>(passes: &[Vec<RankedCandidate<K>>], k: f64) -> Vec<FusedCandidate<K>>
where
    K: Clone + Eq + Hash + Ord,
{
    let mut contributions: HashMap<K, Vec<f64>> = HashMap::new();

    for pass in passes {
        let mut best: HashMap<&K, usize> = HashMap::new();
        for candidate in pass.iter().filter(|c| c.rank > 0) {
            best.entry(&candidate.entity_id)
                .and_modify(|r| *r = (*r).min(candidate.rank))
                .or_insert(candidate.rank);
        }

        for (entity_id, rank) in best {
            contributions
                .entry(entity_id.clone())
                .or_default()
                .push(1.0 / (k + rank as f64));
        }
    }

    let mut fused: Vec<FusedCandidate<K>> = contributions
        .into_iter()
        .map(|(entity_id, mut parts)| {
            parts.sort_by(f64::total_cmp);
            FusedCandidate {
                entity_id,
                fused_score: parts.iter().sum(),
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });

    fused
}

// ============================================================================
// Tests
// ============================================================================
