//! Storage for one participant's vote blocks and streams over it.
//!
//! Small votes stay in memory. Large votes can be spilled to a file of
//! consecutive `bincode` records so a poll never holds every participant's
//! full vote at once.

use audit_types::VoteBlock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::TallyError;

/// A lazily read sequence of vote blocks.
pub trait VoteBlockStream: Send {
    fn next_block(&mut self) -> Result<Option<VoteBlock>, TallyError>;

    /// Free any resource held by the stream. Called at most once.
    fn release(&mut self) {}
}

/// In-memory stream over a shared block list. Blocks are cloned one at a
/// time as they are read.
pub struct MemoryStream {
    blocks: Arc<Vec<VoteBlock>>,
    next: usize,
}

impl MemoryStream {
    pub fn new(blocks: Vec<VoteBlock>) -> Self {
        Self::shared(Arc::new(blocks))
    }

    pub fn shared(blocks: Arc<Vec<VoteBlock>>) -> Self {
        Self { blocks, next: 0 }
    }
}

impl VoteBlockStream for MemoryStream {
    fn next_block(&mut self) -> Result<Option<VoteBlock>, TallyError> {
        let block = self.blocks.get(self.next).cloned();
        if block.is_some() {
            self.next += 1;
        }
        Ok(block)
    }

    fn release(&mut self) {
        self.blocks = Arc::default();
        self.next = 0;
    }
}

/// Stream over a spill file.
pub struct DiskStream {
    reader: Option<BufReader<File>>,
    remaining: usize,
}

impl VoteBlockStream for DiskStream {
    fn next_block(&mut self) -> Result<Option<VoteBlock>, TallyError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| TallyError::Stream("stream already released".into()))?;
        let block = bincode::deserialize_from(reader)
            .map_err(|e| TallyError::Stream(e.to_string()))?;
        self.remaining -= 1;
        Ok(Some(block))
    }

    fn release(&mut self) {
        self.reader = None;
    }
}

/// A spill file of `count` consecutive records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskVoteBlocks {
    path: PathBuf,
    count: usize,
}

/// One participant's vote blocks, in the order received.
///
/// Cloning is cheap for both variants: memory blocks are shared until the
/// next write, and a disk store is only a path and a count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteBlocks {
    Memory(Arc<Vec<VoteBlock>>),
    Disk(DiskVoteBlocks),
}

impl Default for VoteBlocks {
    fn default() -> Self {
        Self::Memory(Arc::default())
    }
}

impl VoteBlocks {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Start an empty spill file at `path`, truncating any existing file.
    pub fn on_disk(path: impl AsRef<Path>) -> Result<Self, TallyError> {
        let path = path.as_ref().to_path_buf();
        File::create(&path)?;
        Ok(Self::Disk(DiskVoteBlocks { path, count: 0 }))
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Memory(blocks) => blocks.len(),
            Self::Disk(disk) => disk.count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, block: VoteBlock) -> Result<(), TallyError> {
        self.extend(std::iter::once(block))
    }

    pub fn extend(&mut self, blocks: impl IntoIterator<Item = VoteBlock>) -> Result<(), TallyError> {
        match self {
            Self::Memory(stored) => {
                Arc::make_mut(stored).extend(blocks);
                Ok(())
            }
            Self::Disk(disk) => {
                let file = OpenOptions::new().append(true).open(&disk.path)?;
                let mut writer = BufWriter::new(file);
                for block in blocks {
                    bincode::serialize_into(&mut writer, &block)?;
                    disk.count += 1;
                }
                writer.flush()?;
                Ok(())
            }
        }
    }

    /// A fresh stream from the first block.
    pub fn stream(&self) -> Result<Box<dyn VoteBlockStream>, TallyError> {
        match self {
            Self::Memory(blocks) => Ok(Box::new(MemoryStream::shared(Arc::clone(blocks)))),
            Self::Disk(disk) => {
                let file = File::open(&disk.path)?;
                Ok(Box::new(DiskStream {
                    reader: Some(BufReader::new(file)),
                    remaining: disk.count,
                }))
            }
        }
    }

    /// The first block for `url`, by linear scan.
    pub fn find(&self, url: &str) -> Result<Option<VoteBlock>, TallyError> {
        let mut stream = self.stream()?;
        while let Some(block) = stream.next_block()? {
            if block.url == url {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    /// Delete any spill file. The store is empty afterwards.
    pub fn release(&mut self) -> Result<(), TallyError> {
        if let Self::Disk(disk) = self {
            match fs::remove_file(&disk.path) {
                Ok(()) => debug!(path = %disk.path.display(), "released vote spill file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        *self = Self::in_memory();
        Ok(())
    }
}
