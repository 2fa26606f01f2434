//! The tally engine for replica audit polls.
//!
//! - [`comparer`]: does one participant's vote for a URL match local hashes.
//! - [`block_tally`]: agree/disagree accounting and the per-URL decision.
//! - [`version_counts`]: support per content version, for choosing repairers.
//! - [`vote_block_tallier`]: fan one vote out to several sinks.
//! - [`url_tallier`]: the k-way merge over all participants' vote streams.

pub mod block_tally;
pub mod comparer;
pub mod error;
pub mod participant_tallies;
pub mod url_tallier;
pub mod version_counts;
pub mod vote_block_tallier;
pub mod vote_blocks;

pub use block_tally::{decide, BlockTally, TallyPolicy, TallyResult};
pub use comparer::{Comparer, HashBlockComparer, ParticipantComparer, VoteBlockComparer};
pub use error::{HashSide, TallyError};
pub use participant_tallies::{ParticipantCounts, ParticipantTallies};
pub use url_tallier::UrlTallier;
pub use version_counts::VersionCounts;
pub use vote_block_tallier::{Verdict, VoteBlockTallier, VoteSink};
pub use vote_blocks::{DiskVoteBlocks, MemoryStream, VoteBlockStream, VoteBlocks};
