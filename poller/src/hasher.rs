//! Time-sliced hashing of local content into [`HashBlock`]s.
//!
//! A [`BlockHasher`] walks repository URLs in canonical order. Each call to
//! [`BlockHasher::step`] hashes at most one step of bytes, so the caller can
//! check deadlines, yield to other tasks, or give up between steps.

use audit_crypto::{HashAlgorithm, VersionHasher};
use audit_store::ContentRepository;
use audit_types::{compare_urls, Clock, HashBlock, HashBlockVersion, Nonce, Timestamp};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::PollerError;

/// Result of one hashing step.
#[derive(Debug)]
pub enum HashStep {
    /// Bytes hashed in this step; the current URL is not finished.
    Progress(u64),
    /// Every version of a URL has been hashed.
    Block(HashBlock),
    /// Every URL has been hashed.
    Done,
}

struct InProgress {
    url: String,
    version_count: usize,
    version: usize,
    offset: u64,
    hasher: Option<VersionHasher>,
    block: HashBlock,
}

pub struct BlockHasher {
    repository: Arc<dyn ContentRepository>,
    algorithm: HashAlgorithm,
    nonce_pairs: Vec<(Nonce, Nonce)>,
    step_bytes: usize,
    urls: VecDeque<String>,
    current: Option<InProgress>,
    cancel: Arc<AtomicBool>,
    deadline: Option<(Timestamp, Arc<dyn Clock>)>,
    bytes_hashed: u64,
    blocks_done: usize,
}

impl BlockHasher {
    /// Hash every URL in the repository.
    pub fn new(
        repository: Arc<dyn ContentRepository>,
        algorithm: HashAlgorithm,
        nonce_pairs: Vec<(Nonce, Nonce)>,
        step_bytes: usize,
    ) -> Result<Self, PollerError> {
        let urls = repository.urls()?;
        Ok(Self::for_urls(repository, algorithm, nonce_pairs, step_bytes, urls))
    }

    /// Hash only `urls`.
    pub fn for_urls(
        repository: Arc<dyn ContentRepository>,
        algorithm: HashAlgorithm,
        nonce_pairs: Vec<(Nonce, Nonce)>,
        step_bytes: usize,
        mut urls: Vec<String>,
    ) -> Self {
        urls.sort_by(|a, b| compare_urls(a, b));
        urls.dedup();
        Self {
            repository,
            algorithm,
            nonce_pairs,
            step_bytes: step_bytes.max(1),
            urls: urls.into(),
            current: None,
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: None,
            bytes_hashed: 0,
            blocks_done: 0,
        }
    }

    /// Share a cancellation flag; setting it fails the next step.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail the next step once `clock` reaches `deadline`.
    pub fn with_deadline(mut self, deadline: Timestamp, clock: Arc<dyn Clock>) -> Self {
        self.deadline = Some((deadline, clock));
        self
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    pub fn blocks_done(&self) -> usize {
        self.blocks_done
    }

    pub fn step(&mut self) -> Result<HashStep, PollerError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(PollerError::Cancelled);
        }
        if let Some((deadline, clock)) = &self.deadline {
            if deadline.has_passed(clock.now()) {
                return Err(PollerError::DeadlinePassed(format!("hashing past {deadline}")));
            }
        }
        let Some(mut current) = self.current.take() else {
            return Ok(match self.start_next_url() {
                Some(progress) => {
                    self.current = Some(progress);
                    HashStep::Progress(0)
                }
                None => HashStep::Done,
            });
        };
        if current.version >= current.version_count {
            self.blocks_done += 1;
            debug!(url = %current.url, versions = current.block.versions.len(), "block hashed");
            return Ok(HashStep::Block(current.block));
        }
        let hashed = self.hash_chunk(&mut current);
        self.current = Some(current);
        Ok(HashStep::Progress(hashed))
    }

    /// Run every remaining step and collect the blocks.
    pub fn hash_all(&mut self) -> Result<Vec<HashBlock>, PollerError> {
        let mut blocks = Vec::new();
        loop {
            match self.step()? {
                HashStep::Progress(_) => {}
                HashStep::Block(block) => blocks.push(block),
                HashStep::Done => return Ok(blocks),
            }
        }
    }

    fn start_next_url(&mut self) -> Option<InProgress> {
        let url = self.urls.pop_front()?;
        let version_count = match self.repository.version_count(&url) {
            Ok(n) => n,
            Err(e) => {
                warn!(%url, error = %e, "cannot list versions");
                let block = HashBlock::with_versions(url.clone(), vec![HashBlockVersion::errored()]);
                return Some(InProgress {
                    url,
                    version_count: 0,
                    version: 0,
                    offset: 0,
                    hasher: None,
                    block,
                });
            }
        };
        Some(InProgress {
            block: HashBlock::new(url.clone()),
            url,
            version_count,
            version: 0,
            offset: 0,
            hasher: Some(VersionHasher::new(self.algorithm, &self.nonce_pairs)),
        })
    }

    fn hash_chunk(&mut self, current: &mut InProgress) -> u64 {
        let chunk = self.repository.read_range(
            &current.url,
            current.version,
            current.offset,
            self.step_bytes,
        );
        match chunk {
            Ok(bytes) if !bytes.is_empty() => {
                if let Some(hasher) = current.hasher.as_mut() {
                    hasher.update(&bytes);
                }
                let n = bytes.len() as u64;
                current.offset += n;
                self.bytes_hashed += n;
                n
            }
            Ok(_) => {
                if let Some(hasher) = current.hasher.take() {
                    let (plain, nonced) = hasher.finish();
                    current.block.add_version(
                        HashBlockVersion::new(plain, nonced)
                            .with_lengths(current.offset, current.offset),
                    );
                }
                self.next_version(current);
                0
            }
            Err(e) => {
                warn!(url = %current.url, version = current.version, error = %e, "version hash error");
                current.block.add_version(HashBlockVersion::errored());
                self.next_version(current);
                0
            }
        }
    }

    fn next_version(&self, current: &mut InProgress) {
        current.version += 1;
        current.offset = 0;
        current.hasher = (current.version < current.version_count)
            .then(|| VersionHasher::new(self.algorithm, &self.nonce_pairs));
    }
}

/// Fails once hashing runs past its allowance.
pub struct OverrunGuard {
    started: Instant,
    allowance: Duration,
}

impl OverrunGuard {
    pub fn new(allowance: Duration) -> Self {
        Self::started_at(Instant::now(), allowance)
    }

    pub fn started_at(started: Instant, allowance: Duration) -> Self {
        Self { started, allowance }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn check(&self) -> Result<(), PollerError> {
        let elapsed = self.elapsed();
        if elapsed > self.allowance {
            return Err(PollerError::HashOverrun {
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                allowed_ms: u64::try_from(self.allowance.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(())
    }
}
