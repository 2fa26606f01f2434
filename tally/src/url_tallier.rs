//! K-way merge over every participant's sorted vote block stream.
//!
//! Each participant contributes a stream of [`VoteBlock`]s in strictly
//! increasing canonical URL order. The tallier keeps one peeked head per
//! participant and walks all of them in lockstep, so exactly one tally is
//! produced per distinct URL and only one block per participant is held in
//! memory at a time.
//!
//! A participant whose stream fails, goes out of order or repeats a URL is
//! *spoiled*: its stream is released and it contributes nothing further.
//!
//! Any other error from a tally leaves the tallier halted. The merge may
//! already have moved some participants past the URL, so every stream is
//! released and each later call fails with a contract violation.

use audit_types::{compare_urls, VoteBlock};
use std::cmp::Ordering;
use tracing::{debug, warn};

use crate::block_tally::BlockTally;
use crate::comparer::Comparer;
use crate::error::HashSide;
use crate::vote_block_tallier::VoteBlockTallier;
use crate::vote_blocks::VoteBlockStream;
use crate::TallyError;

struct Cursor {
    stream: Option<Box<dyn VoteBlockStream>>,
    head: Option<VoteBlock>,
    last_url: Option<String>,
    spoiled: bool,
}

impl Cursor {
    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
        self.head = None;
    }

    fn spoil(&mut self, participant: usize, reason: &str) {
        if !self.spoiled {
            warn!(participant, reason, "spoiling participant vote stream");
        }
        self.spoiled = true;
        self.release();
    }

    /// Replace the head with the next block from the stream.
    fn advance(&mut self, participant: usize) {
        self.head = None;
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match stream.next_block() {
            Ok(Some(block)) => {
                let in_order = self
                    .last_url
                    .as_deref()
                    .map_or(true, |last| compare_urls(&block.url, last) == Ordering::Greater);
                if !in_order {
                    self.spoil(participant, "vote blocks out of order");
                    return;
                }
                self.last_url = Some(block.url.clone());
                self.head = Some(block);
            }
            Ok(None) => self.release(),
            Err(e) => self.spoil(participant, &e.to_string()),
        }
    }
}

pub struct UrlTallier {
    cursors: Vec<Cursor>,
    /// No participant head is before this URL.
    position: Option<String>,
    last_tallied: Option<String>,
    halted: Option<String>,
}

impl UrlTallier {
    /// One entry per participant, by participant index. A participant
    /// without a stream is spoiled from the start.
    pub fn new(streams: Vec<Option<Box<dyn VoteBlockStream>>>) -> Self {
        let mut cursors: Vec<Cursor> = streams
            .into_iter()
            .map(|stream| Cursor {
                spoiled: stream.is_none(),
                stream,
                head: None,
                last_url: None,
            })
            .collect();
        for (participant, cursor) in cursors.iter_mut().enumerate() {
            cursor.advance(participant);
        }
        Self {
            cursors,
            position: None,
            last_tallied: None,
            halted: None,
        }
    }

    pub fn participant_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_spoiled(&self, participant: usize) -> bool {
        self.cursors.get(participant).map_or(true, |c| c.spoiled)
    }

    pub fn spoiled_count(&self) -> usize {
        self.cursors.iter().filter(|c| c.spoiled).count()
    }

    /// Smallest head URL among live participants, or `None` once every
    /// stream is exhausted or spoiled.
    pub fn peek_url(&self) -> Option<String> {
        self.cursors
            .iter()
            .filter_map(|c| c.head.as_ref())
            .map(|b| b.url.as_str())
            .min_by(|a, b| compare_urls(a, b))
            .map(str::to_string)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    fn check_usable(&self, url: &str, op: &str) -> Result<(), TallyError> {
        match &self.halted {
            Some(reason) => Err(TallyError::ContractViolation(format!(
                "{op}({url}) on a tallier halted by: {reason}"
            ))),
            None => Ok(()),
        }
    }

    fn check_not_behind(&self, url: &str, op: &str) -> Result<(), TallyError> {
        self.check_usable(url, op)?;
        if let Some(position) = &self.position {
            if compare_urls(url, position) == Ordering::Less {
                return Err(TallyError::ContractViolation(format!(
                    "{op}({url}) is before current position {position}"
                )));
            }
        }
        if let Some(last) = &self.last_tallied {
            if compare_urls(url, last) != Ordering::Greater {
                return Err(TallyError::ContractViolation(format!(
                    "{op}({url}) does not follow last tallied URL {last}"
                )));
            }
        }
        Ok(())
    }

    /// Skip every participant forward to `url`, discarding blocks before it.
    pub fn seek(&mut self, url: &str) -> Result<(), TallyError> {
        self.check_not_behind(url, "seek")?;
        for (participant, cursor) in self.cursors.iter_mut().enumerate() {
            while cursor
                .head
                .as_ref()
                .is_some_and(|b| compare_urls(&b.url, url) == Ordering::Less)
            {
                cursor.advance(participant);
            }
        }
        self.position = Some(url.to_string());
        Ok(())
    }

    /// Tally a URL only voters hold. `url` must be the current
    /// [`peek_url`](Self::peek_url).
    pub fn tally_voter_url(&mut self, url: &str) -> Result<BlockTally, TallyError> {
        let mut tally = BlockTally::new(url, false);
        {
            let mut tallier = VoteBlockTallier::for_voter_url().with_sink(&mut tally);
            self.tally_voter_url_with(url, &mut tallier)?;
        }
        Ok(tally)
    }

    pub fn tally_voter_url_with(
        &mut self,
        url: &str,
        tallier: &mut VoteBlockTallier<'_>,
    ) -> Result<(), TallyError> {
        self.check_usable(url, "tally_voter_url")?;
        match self.peek_url() {
            Some(peek) if peek == url => self.vote_all_participants(url, tallier),
            other => Err(TallyError::ContractViolation(format!(
                "tally_voter_url({url}) but next URL is {}",
                other.as_deref().unwrap_or("<none>")
            ))),
        }
    }

    /// Tally a URL the poller holds, against `comparer` built from the
    /// poller's hashes. `url` must not be past the current
    /// [`peek_url`](Self::peek_url); voters lacking it are counted as
    /// missing.
    pub fn tally_poller_url(
        &mut self,
        url: &str,
        comparer: &dyn Comparer,
    ) -> Result<BlockTally, TallyError> {
        let mut tally = BlockTally::new(url, true);
        {
            let mut tallier = VoteBlockTallier::for_poller_url(comparer).with_sink(&mut tally);
            self.tally_poller_url_with(url, &mut tallier)?;
        }
        Ok(tally)
    }

    pub fn tally_poller_url_with(
        &mut self,
        url: &str,
        tallier: &mut VoteBlockTallier<'_>,
    ) -> Result<(), TallyError> {
        self.check_usable(url, "tally_poller_url")?;
        if let Some(peek) = self.peek_url() {
            if compare_urls(url, &peek) == Ordering::Greater {
                return Err(TallyError::ContractViolation(format!(
                    "tally_poller_url({url}) skips voter URL {peek}"
                )));
            }
        }
        self.vote_all_participants(url, tallier)
    }

    fn vote_all_participants(
        &mut self,
        url: &str,
        tallier: &mut VoteBlockTallier<'_>,
    ) -> Result<(), TallyError> {
        self.check_not_behind(url, "tally")?;
        let mut failure = None;
        for (participant, cursor) in self.cursors.iter_mut().enumerate() {
            if cursor.spoiled {
                tallier.vote_spoiled(participant);
                continue;
            }
            let has_url = cursor.head.as_ref().is_some_and(|b| b.url == url);
            if !has_url {
                tallier.vote_missing(participant);
                continue;
            }
            let Some(block) = cursor.head.take() else {
                continue;
            };
            match tallier.vote(&block, participant) {
                Ok(()) => cursor.advance(participant),
                Err(TallyError::IllegalByteArray {
                    side: HashSide::Remote,
                    ..
                }) => {
                    cursor.spoil(participant, "illegal hash bytes in vote");
                    tallier.vote_spoiled(participant);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            warn!(url, error = %e, "halting tally");
            self.halted = Some(e.to_string());
            self.release();
            return Err(e);
        }
        debug!(url, "tallied URL");
        self.position = Some(url.to_string());
        self.last_tallied = Some(url.to_string());
        Ok(())
    }

    /// Release every remaining stream. Safe to call more than once.
    pub fn release(&mut self) {
        for cursor in &mut self.cursors {
            cursor.release();
        }
    }
}

impl Drop for UrlTallier {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vote_blocks::MemoryStream;
    use crate::HashBlockComparer;
    use audit_types::{Digest, HashBlock, HashBlockVersion, VoteBlockVersion};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn d(b: u8) -> Digest {
        Digest::from_slice(&[b; 32])
    }

    fn block(url: &str) -> VoteBlock {
        VoteBlock::with_versions(url, vec![VoteBlockVersion::new(d(1), d(2))])
    }

    fn stream(urls: &[&str]) -> Option<Box<dyn VoteBlockStream>> {
        Some(Box::new(MemoryStream::new(urls.iter().map(|u| block(u)).collect())))
    }

    /// Yields `urls` then fails; counts releases.
    struct FailingStream {
        urls: Vec<String>,
        releases: Arc<AtomicUsize>,
    }

    impl VoteBlockStream for FailingStream {
        fn next_block(&mut self) -> Result<Option<VoteBlock>, TallyError> {
            if self.urls.is_empty() {
                return Err(TallyError::Stream("disk gone".into()));
            }
            Ok(Some(block(&self.urls.remove(0))))
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    fn walk(tallier: &mut UrlTallier) -> Vec<String> {
        let mut seen = Vec::new();
        while let Some(url) = tallier.peek_url() {
            tallier.tally_voter_url(&url).unwrap();
            seen.push(url);
        }
        seen
    }

    #[test]
    fn visits_sorted_union_once() {
        let mut tallier = UrlTallier::new(vec![
            stream(&["http://a/1", "http://a/3", "http://a/5"]),
            stream(&["http://a/2", "http://a/3"]),
            stream(&["http://a/1", "http://a/4", "http://a/5"]),
        ]);
        assert_eq!(
            walk(&mut tallier),
            vec!["http://a/1", "http://a/2", "http://a/3", "http://a/4", "http://a/5"]
        );
    }

    #[test]
    fn voter_url_counts_holders_only() {
        let mut tallier = UrlTallier::new(vec![
            stream(&["http://a/1"]),
            stream(&["http://a/2"]),
            stream(&["http://a/1"]),
        ]);
        let tally = tallier.tally_voter_url("http://a/1").unwrap();
        assert!(tally.is_voter_only());
        assert_eq!(tally.tallied_count(), 2);
        assert_eq!(tally.voter_only_voters().len(), 2);
    }

    #[test]
    fn tallying_other_than_peek_is_a_contract_violation() {
        let mut tallier = UrlTallier::new(vec![stream(&["http://a/1", "http://a/2"])]);
        assert!(matches!(
            tallier.tally_voter_url("http://a/2"),
            Err(TallyError::ContractViolation(_))
        ));
        tallier.tally_voter_url("http://a/1").unwrap();
        assert!(matches!(
            tallier.tally_voter_url("http://a/1"),
            Err(TallyError::ContractViolation(_))
        ));
        tallier.tally_voter_url("http://a/2").unwrap();
        assert!(matches!(
            tallier.tally_voter_url("http://a/3"),
            Err(TallyError::ContractViolation(_))
        ));
    }

    #[test]
    fn seek_backwards_is_a_contract_violation() {
        let mut tallier = UrlTallier::new(vec![stream(&["http://a/1", "http://a/3"])]);
        tallier.seek("http://a/2").unwrap();
        assert_eq!(tallier.peek_url().as_deref(), Some("http://a/3"));
        assert!(matches!(
            tallier.seek("http://a/1"),
            Err(TallyError::ContractViolation(_))
        ));
    }

    #[test]
    fn failing_stream_spoils_only_that_participant() {
        let releases = Arc::new(AtomicUsize::new(0));
        let failing = FailingStream {
            urls: vec!["http://a/1".into()],
            releases: releases.clone(),
        };
        let mut tallier = UrlTallier::new(vec![
            stream(&["http://a/1", "http://a/2", "http://a/3"]),
            Some(Box::new(failing)),
            stream(&["http://a/2", "http://a/3"]),
        ]);
        let first = tallier.tally_voter_url("http://a/1").unwrap();
        assert_eq!(first.tallied_count(), 2);
        assert!(tallier.is_spoiled(1));
        assert!(!tallier.is_spoiled(0));

        let rest = walk(&mut tallier);
        assert_eq!(rest, vec!["http://a/2", "http://a/3"]);
        tallier.release();
        drop(tallier);
        assert_eq!(releases.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn out_of_order_stream_is_spoiled() {
        let mut tallier = UrlTallier::new(vec![
            stream(&["http://a/2", "http://a/1"]),
            stream(&["http://a/1", "http://a/2"]),
        ]);
        let t = tallier.tally_voter_url("http://a/1").unwrap();
        assert_eq!(t.tallied_count(), 1);
        let t = tallier.tally_voter_url("http://a/2").unwrap();
        // Participant 0 went backwards after its head and is spoiled.
        assert!(tallier.is_spoiled(0));
        assert_eq!(t.tallied_count(), 2);
        assert!(tallier.peek_url().is_none());
    }

    #[test]
    fn duplicate_url_spoils() {
        let mut tallier = UrlTallier::new(vec![stream(&["http://a/1", "http://a/1"])]);
        tallier.tally_voter_url("http://a/1").unwrap();
        assert!(tallier.is_spoiled(0));
        assert!(tallier.peek_url().is_none());
    }

    #[test]
    fn missing_stream_is_spoiled_from_start() {
        let tallier = UrlTallier::new(vec![None, stream(&["http://a/1"])]);
        assert!(tallier.is_spoiled(0));
        assert_eq!(tallier.spoiled_count(), 1);
    }

    #[test]
    fn poller_url_counts_missing_voters() {
        let local = HashBlock::with_versions(
            "http://a/1",
            vec![HashBlockVersion::new(d(1), vec![d(2), d(2), d(2)])],
        );
        let comparer = HashBlockComparer::new(&local).unwrap();
        let mut tallier = UrlTallier::new(vec![
            stream(&["http://a/1"]),
            stream(&["http://a/2"]),
            None,
        ]);
        let tally = tallier.tally_poller_url("http://a/1", &comparer).unwrap();
        assert_eq!(tally.agree_count(), 1);
        assert_eq!(tally.poller_only_voters().len(), 1);
        assert_eq!(tally.tallied_count(), 2);

        // The poller may tally a URL no voter has, as long as it does not
        // skip past one.
        let local0 = HashBlock::with_versions("http://a/10", vec![]);
        let c0 = HashBlockComparer::new(&local0).unwrap();
        let t = tallier.tally_poller_url("http://a/10", &c0).unwrap();
        assert_eq!(t.poller_only_voters().len(), 2);
        let local3 = HashBlock::with_versions("http://a/3", vec![]);
        let c3 = HashBlockComparer::new(&local3).unwrap();
        assert!(matches!(
            tallier.tally_poller_url("http://a/3", &c3),
            Err(TallyError::ContractViolation(_))
        ));
    }

    #[test]
    fn remote_illegal_bytes_spoil_participant() {
        let local = HashBlock::with_versions(
            "http://a/1",
            vec![HashBlockVersion::new(d(1), vec![d(2), d(2)])],
        );
        let comparer = HashBlockComparer::new(&local).unwrap();
        let bad = VoteBlock::with_versions("http://a/1", vec![VoteBlockVersion::new(d(1), Digest::EMPTY)]);
        let mut tallier = UrlTallier::new(vec![
            Some(Box::new(MemoryStream::new(vec![bad, block("http://a/2")]))),
            stream(&["http://a/1", "http://a/2"]),
        ]);
        let tally = tallier.tally_poller_url("http://a/1", &comparer).unwrap();
        assert!(tallier.is_spoiled(0));
        assert_eq!(tally.tallied_count(), 1);
        assert_eq!(tally.agree_count(), 1);
    }

    #[test]
    fn local_corruption_propagates() {
        let local = HashBlock::with_versions(
            "http://a/1",
            vec![HashBlockVersion::new(d(1), vec![Digest::EMPTY])],
        );
        let comparer = HashBlockComparer::new(&local).unwrap();
        let mut tallier = UrlTallier::new(vec![stream(&["http://a/1"])]);
        let err = tallier.tally_poller_url("http://a/1", &comparer).unwrap_err();
        assert!(err.is_local_corruption());
        assert!(!tallier.is_spoiled(0));
    }

    #[test]
    fn local_corruption_halts_the_merge() {
        // The bad nonced hash is only reached for participant 1, after
        // participant 0 has already been advanced past the URL.
        let local = HashBlock::with_versions(
            "http://a/1",
            vec![HashBlockVersion::new(d(1), vec![d(2), Digest::EMPTY])],
        );
        let comparer = HashBlockComparer::new(&local).unwrap();
        let mut tallier = UrlTallier::new(vec![
            stream(&["http://a/1", "http://a/2"]),
            stream(&["http://a/1", "http://a/2"]),
        ]);
        let err = tallier.tally_poller_url("http://a/1", &comparer).unwrap_err();
        assert!(err.is_local_corruption());
        assert!(tallier.is_halted());
        assert_eq!(tallier.peek_url(), None);

        assert!(matches!(
            tallier.tally_voter_url("http://a/2"),
            Err(TallyError::ContractViolation(_))
        ));
        assert!(matches!(tallier.seek("http://a/3"), Err(TallyError::ContractViolation(_))));
    }
}
