use proptest::prelude::*;
use std::collections::BTreeSet;

use audit_tally::{decide, MemoryStream, TallyPolicy, TallyResult, UrlTallier, VoteBlockStream};
use audit_types::{compare_urls, Digest, VoteBlock, VoteBlockVersion};

fn sorted(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut v: Vec<String> = urls.into_iter().collect();
    v.sort_by(|a, b| compare_urls(a, b));
    v.dedup();
    v
}

fn stream(urls: &[String]) -> Option<Box<dyn VoteBlockStream>> {
    let blocks = urls
        .iter()
        .map(|u| {
            VoteBlock::with_versions(
                u.clone(),
                vec![VoteBlockVersion::new(Digest::from_slice(&[1]), Digest::from_slice(&[2]))],
            )
        })
        .collect();
    Some(Box::new(MemoryStream::new(blocks)))
}

proptest! {
    /// Swapping agree and disagree mirrors the decision.
    #[test]
    fn decision_is_symmetric(
        agree in 0usize..40,
        disagree in 0usize..40,
        quorum in 1usize..10,
        margin in 50u32..=100,
    ) {
        let policy = TallyPolicy::default();
        let forward = decide(agree, disagree, 0, quorum, margin, &policy);
        let mirrored = decide(disagree, agree, 0, quorum, margin, &policy);
        let expected = match forward {
            TallyResult::Won if agree != disagree => TallyResult::Lost,
            TallyResult::Lost if agree != disagree => TallyResult::Won,
            other => other,
        };
        prop_assert_eq!(mirrored, expected);
    }

    /// Below quorum nothing else matters.
    #[test]
    fn below_quorum_is_no_quorum(
        agree in 0usize..10,
        disagree in 0usize..10,
        poller_only in 0usize..10,
        margin in 0u32..=100,
    ) {
        let total = agree + disagree;
        let result = decide(agree, disagree, poller_only.min(disagree), total + 1, margin, &TallyPolicy::default());
        prop_assert_eq!(result, TallyResult::NoQuorum);
    }

    /// The merge visits the sorted union of every participant's URLs,
    /// each exactly once.
    #[test]
    fn merge_visits_sorted_union(
        sets in prop::collection::vec(prop::collection::btree_set("[ab/]{1,4}", 0..8), 1..6)
    ) {
        let participants: Vec<Vec<String>> = sets.iter().map(|s| sorted(s.iter().cloned())).collect();
        let union: BTreeSet<String> = sets.iter().flatten().cloned().collect();
        let expected = sorted(union);

        let mut tallier = UrlTallier::new(participants.iter().map(|p| stream(p)).collect());
        let mut visited = Vec::new();
        while let Some(url) = tallier.peek_url() {
            let tally = tallier.tally_voter_url(&url).unwrap();
            let holders = participants.iter().filter(|p| p.contains(&url)).count();
            prop_assert_eq!(tally.tallied_count(), holders);
            visited.push(url);
        }
        prop_assert_eq!(visited, expected);
        prop_assert_eq!(tallier.spoiled_count(), 0);
    }
}
