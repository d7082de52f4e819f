//! Best-of-k selection over one query's judged replicas.
//!
//! Both selectors take replicas lazily in scan order, so the SFT selector
//! stops pulling (and judging) replicas after the first satisfying one.

use super::Judgment;

/// One judged candidate response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replica<'a> {
    /// Replica ordinal within the query
    pub index: usize,
    pub response: &'a str,
    pub judgment: Judgment,
}

/// SFT pick for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SftChoice<'a> {
    pub replica: Replica<'a>,
    /// `false` when no replica satisfied and this is the last one scanned
    pub resolved: bool,
}

/// Pick the first satisfying replica, or fall back to the last one scanned.
///
/// Returns `None` only for an empty input.
pub fn select_sft<'a>(replicas: impl IntoIterator<Item = Replica<'a>>) -> Option<SftChoice<'a>> {
    let mut last = None;
    for replica in replicas {
        if replica.judgment.is_satisfied() {
            return Some(SftChoice {
                replica,
                resolved: true,
            });
        }
        last = Some(replica);
    }
    last.map(|replica| SftChoice {
        replica,
        resolved: false,
    })
}

/// DPO pick for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpoChoice<'a> {
    pub chosen: Replica<'a>,
    pub rejected: Replica<'a>,
}

/// Pair the last satisfying replica with the last violating one.
///
/// Unparseable judgments take neither side. Queries where every replica
/// agrees carry no preference signal and yield `None`.
pub fn select_dpo<'a>(replicas: impl IntoIterator<Item = Replica<'a>>) -> Option<DpoChoice<'a>> {
    let mut chosen = None;
    let mut rejected = None;
    for replica in replicas {
        match replica.judgment {
            Judgment::Satisfied => chosen = Some(replica),
            Judgment::Violated => rejected = Some(replica),
            Judgment::Unparseable => {}
        }
    }
    Some(DpoChoice {
        chosen: chosen?,
        rejected: rejected?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use Judgment::*;

    const RESPONSES: [&str; 4] = ["r1", "r2", "r3", "r4"];

    fn replicas(judgments: &[Judgment]) -> Vec<Replica<'static>> {
        judgments
            .iter()
            .enumerate()
            .map(|(index, &judgment)| Replica {
                index,
                response: RESPONSES[index],
                judgment,
            })
            .collect()
    }

    #[test]
    fn test_sft_first_satisfied_wins() {
        let choice = select_sft(replicas(&[Violated, Satisfied, Satisfied])).unwrap();
        assert!(choice.resolved);
        assert_eq!(choice.replica.response, "r2");
    }

    #[test]
    fn test_sft_stops_scanning() {
        let mut pulled = 0;
        let iter = replicas(&[Satisfied, Violated, Violated])
            .into_iter()
            .inspect(|_| pulled += 1);
        let choice = select_sft(iter).unwrap();
        assert_eq!(choice.replica.index, 0);
        assert_eq!(pulled, 1);
    }

    #[test]
    fn test_sft_falls_back_to_last() {
        let choice = select_sft(replicas(&[Violated, Unparseable, Violated])).unwrap();
        assert!(!choice.resolved);
        assert_eq!(choice.replica.response, "r3");
    }

    #[test]
    fn test_sft_empty() {
        assert_eq!(select_sft(Vec::new()), None);
    }

    #[test]
    fn test_dpo_last_of_each_side() {
        let choice = select_dpo(replicas(&[Satisfied, Violated, Satisfied])).unwrap();
        assert_eq!(choice.chosen.response, "r3");
        assert_eq!(choice.rejected.response, "r2");

        let choice = select_dpo(replicas(&[Violated, Satisfied, Violated, Unparseable])).unwrap();
        assert_eq!(choice.chosen.response, "r2");
        assert_eq!(choice.rejected.response, "r3");
    }

    #[test]
    fn test_dpo_needs_disagreement() {
        assert_eq!(select_dpo(replicas(&[Satisfied, Satisfied, Satisfied])), None);
        assert_eq!(select_dpo(replicas(&[Violated, Violated])), None);
        assert_eq!(select_dpo(replicas(&[Satisfied, Unparseable])), None);
    }
}
