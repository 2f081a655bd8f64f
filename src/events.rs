//! Transfer events and the sources that page them into the replay.
//!
//! Sources are forward-only and finite. Reopening a token through an
//! [`EventStore`] restarts from the beginning of its history, which is what
//! lets an aborted batch be rerun from scratch.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::{Result, SnapshotError};

/// Default page size when reading events (records per page).
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// One ERC-20 `Transfer` log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub block_number: u64,
    /// Position of the log inside its block.
    pub log_position: u64,
    pub from: Address,
    pub to: Address,
    #[serde(deserialize_with = "deserialize_value")]
    pub value: U256,
}

impl TransferEvent {
    /// Total order key: (block, log position).
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_position)
    }

    pub fn is_mint(&self) -> bool {
        self.from == Address::ZERO
    }

    pub fn is_burn(&self) -> bool {
        !self.is_mint() && self.to == Address::ZERO
    }
}

// Accepts "0x…" hex, decimal strings, or plain JSON integers.
fn deserialize_value<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<U256, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(U256::from(v)),
        Raw::Text(text) => U256::from_str(text.trim())
            .map_err(|e| D::Error::custom(format!("invalid transfer value {text:?}: {e}"))),
    }
}

/// A paginated, ordered stream of one token's transfers.
pub trait EventSource {
    /// Next page in ascending (block, log position) order, `None` once exhausted.
    fn next_page(&mut self) -> Result<Option<Vec<TransferEvent>>>;
}

/// Opens a fresh [`EventSource`] per token replay.
///
/// `Sync` so that tokens of one batch can be replayed on separate threads,
/// each with its own source.
pub trait EventStore: Sync {
    fn open(&self, token: Address, from_block: u64, to_block: u64) -> Result<Box<dyn EventSource + '_>>;
}

/// Pages out of an already materialised vector.
pub struct VecEventSource {
    events: std::vec::IntoIter<TransferEvent>,
    page_size: usize,
}

impl VecEventSource {
    pub fn new(events: Vec<TransferEvent>, page_size: usize) -> Self {
        Self {
            events: events.into_iter(),
            page_size: page_size.max(1),
        }
    }
}

impl EventSource for VecEventSource {
    fn next_page(&mut self) -> Result<Option<Vec<TransferEvent>>> {
        let page: Vec<TransferEvent> = self.events.by_ref().take(self.page_size).collect();
        Ok(if page.is_empty() { None } else { Some(page) })
    }
}

/// In-memory store keyed by token address.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    events: HashMap<Address, Vec<TransferEvent>>,
    page_size: usize,
}

impl MemoryEventStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            events: HashMap::new(),
            page_size,
        }
    }

    pub fn insert(&mut self, token: Address, events: Vec<TransferEvent>) {
        self.events.insert(token, events);
    }
}

impl EventStore for MemoryEventStore {
    fn open(&self, token: Address, from_block: u64, to_block: u64) -> Result<Box<dyn EventSource + '_>> {
        let events = self
            .events
            .get(&token)
            .map(|all| {
                all.iter()
                    .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(VecEventSource::new(events, self.page_size)))
    }
}

/// Reads `<dir>/<lowercase token address>.jsonl`, one event per line,
/// streaming so that memory stays bounded by the page size.
#[derive(Debug, Clone)]
pub struct JsonlEventStore {
    dir: PathBuf,
    page_size: usize,
}

impl JsonlEventStore {
    pub fn new(dir: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            dir: dir.into(),
            page_size: page_size.max(1),
        }
    }

    pub fn token_path(&self, token: Address) -> PathBuf {
        self.dir.join(format!("{}.jsonl", token.to_string().to_lowercase()))
    }
}

impl EventStore for JsonlEventStore {
    fn open(&self, token: Address, from_block: u64, to_block: u64) -> Result<Box<dyn EventSource + '_>> {
        let path = self.token_path(token);
        debug!("[EVENTS] opening {} for blocks {}..={}", path.display(), from_block, to_block);
        let file = File::open(&path).map_err(|e| {
            SnapshotError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        Ok(Box::new(JsonlEventSource {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
            from_block,
            to_block,
            page_size: self.page_size,
            done: false,
        }))
    }
}

struct JsonlEventSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    from_block: u64,
    to_block: u64,
    page_size: usize,
    done: bool,
}

impl JsonlEventSource {
    fn parse_line(path: &Path, line_no: usize, line: &str) -> Result<TransferEvent> {
        serde_json::from_str(line).map_err(|e| {
            SnapshotError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}:{}: {}", path.display(), line_no, e),
            ))
        })
    }
}

impl EventSource for JsonlEventSource {
    fn next_page(&mut self) -> Result<Option<Vec<TransferEvent>>> {
        let mut page = Vec::new();
        while !self.done && page.len() < self.page_size {
            let Some(line) = self.lines.next() else {
                self.done = true;
                break;
            };
            let line = line?;
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let event = Self::parse_line(&self.path, self.line_no, &line)?;
            if event.block_number < self.from_block {
                continue;
            }
            // Files are sorted, nothing past the range end can matter.
            if event.block_number > self.to_block {
                self.done = true;
                break;
            }
            page.push(event);
        }
        Ok(if page.is_empty() { None } else { Some(page) })
    }
}
