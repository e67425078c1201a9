use super::name::SegmentId;

/// Picks the oldest segments to evict so the remaining total fits in `max_bytes`.
///
/// `segments` must be sorted by ascending id. The newest segment is never
/// evicted, even if it alone exceeds the budget.
pub fn plan_eviction(segments: &[(SegmentId, u64)], max_bytes: u64) -> Vec<SegmentId> {
    let mut total: u64 = segments.iter().map(|(_, size)| size).sum();
    let mut evicted = Vec::new();

    for (id, size) in segments.iter().take(segments.len().saturating_sub(1)) {
        if total <= max_bytes {
            break;
        }
        total -= size;
        evicted.push(*id);
    }

    evicted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_evicted_under_budget() {
        let segments = [(1, 10), (2, 10), (3, 10)];
        assert!(plan_eviction(&segments, 30).is_empty());
    }

    #[test]
    fn test_oldest_evicted_first() {
        let segments = [(1, 10), (2, 10), (4, 10), (5, 10)];
        assert_eq!(plan_eviction(&segments, 25), vec![1, 2]);
    }

    #[test]
    fn test_newest_always_kept() {
        let segments = [(7, 100), (8, 100)];
        assert_eq!(plan_eviction(&segments, 10), vec![7]);
    }

    #[test]
    fn test_empty_input() {
        assert!(plan_eviction(&[], 0).is_empty());
    }
}
