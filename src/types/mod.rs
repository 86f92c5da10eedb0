//! Identifiers, page keys and the crate-wide error type.

use std::fmt;
use std::path::PathBuf;

mod checksum;

pub use checksum::{page_checksum, Checksum, Crc32Fast};

/// Object identifier used for tablespaces, databases and relation files.
pub type Oid = u32;
/// Block index within one relation fork.
pub type BlockNumber = u32;
/// Owning backend of a relation; `INVALID_BACKEND_ID` for shared relations.
pub type BackendId = i32;

/// Marker for "no block".
pub const INVALID_BLOCK_NUMBER: BlockNumber = u32::MAX;
/// Backend id used by every relation replayed from WAL.
pub const INVALID_BACKEND_ID: BackendId = -1;
/// Tablespace holding cluster-wide relations.
pub const GLOBAL_TABLESPACE_OID: Oid = 1664;
/// Default tablespace for database relations.
pub const DEFAULT_TABLESPACE_OID: Oid = 1663;

/// Log sequence number: a byte position in the WAL stream.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The "no position" LSN.
    pub const INVALID: Lsn = Lsn(0);

    /// Returns true unless this is [`Lsn::INVALID`].
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Advances the position by `bytes`.
    pub fn advance(self, bytes: u64) -> Lsn {
        Lsn(self.0.saturating_add(bytes))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 as u32)
    }
}

impl std::str::FromStr for Lsn {
    type Err = RedoError;

    /// Parses the `HI/LO` hexadecimal form produced by `Display`.
    fn from_str(s: &str) -> Result<Self> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or(RedoError::Invalid("LSN must look like HI/LO"))?;
        let hi = u32::from_str_radix(hi, 16).map_err(|_| RedoError::Invalid("bad LSN high half"))?;
        let lo = u32::from_str_radix(lo, 16).map_err(|_| RedoError::Invalid("bad LSN low half"))?;
        Ok(Lsn((u64::from(hi) << 32) | u64::from(lo)))
    }
}

/// Timeline a WAL segment belongs to.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TimeLineId(pub u32);

impl fmt::Display for TimeLineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical identity of a relation's storage.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RelFileNode {
    /// Tablespace oid.
    pub spc_node: Oid,
    /// Database oid; zero for shared relations.
    pub db_node: Oid,
    /// Relation file node.
    pub rel_node: Oid,
}

impl RelFileNode {
    /// Creates a relation identity.
    pub const fn new(spc_node: Oid, db_node: Oid, rel_node: Oid) -> Self {
        Self {
            spc_node,
            db_node,
            rel_node,
        }
    }

    /// Returns the data-directory relative path of `fork` of this relation.
    ///
    /// Shared relations live under `global/`, default-tablespace relations
    /// under `base/<db>/`, everything else under `pg_tblspc/<spc>/<db>/`.
    pub fn path(&self, fork: ForkNumber) -> String {
        let base = if self.spc_node == GLOBAL_TABLESPACE_OID {
            format!("global/{}", self.rel_node)
        } else if self.spc_node == DEFAULT_TABLESPACE_OID {
            format!("base/{}/{}", self.db_node, self.rel_node)
        } else {
            format!(
                "pg_tblspc/{}/{}/{}",
                self.spc_node, self.db_node, self.rel_node
            )
        };
        match fork.suffix() {
            Some(suffix) => format!("{base}_{suffix}"),
            None => base,
        }
    }
}

impl fmt::Display for RelFileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.spc_node, self.db_node, self.rel_node)
    }
}

/// Independently block-addressed stream of a relation.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum ForkNumber {
    /// Main data.
    Main,
    /// Free space map.
    FreeSpaceMap,
    /// Visibility map.
    VisibilityMap,
    /// Reset-on-crash content of unlogged relations.
    Init,
}

impl ForkNumber {
    /// Every fork, in on-disk numbering order.
    pub const ALL: [ForkNumber; 4] = [
        ForkNumber::Main,
        ForkNumber::FreeSpaceMap,
        ForkNumber::VisibilityMap,
        ForkNumber::Init,
    ];

    /// File name suffix for non-main forks.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            ForkNumber::Main => None,
            ForkNumber::FreeSpaceMap => Some("fsm"),
            ForkNumber::VisibilityMap => Some("vm"),
            ForkNumber::Init => Some("init"),
        }
    }

    /// Numeric fork id.
    pub const fn as_u8(self) -> u8 {
        match self {
            ForkNumber::Main => 0,
            ForkNumber::FreeSpaceMap => 1,
            ForkNumber::VisibilityMap => 2,
            ForkNumber::Init => 3,
        }
    }
}

impl TryFrom<u8> for ForkNumber {
    type Error = RedoError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ForkNumber::Main),
            1 => Ok(ForkNumber::FreeSpaceMap),
            2 => Ok(ForkNumber::VisibilityMap),
            3 => Ok(ForkNumber::Init),
            _ => Err(RedoError::Invalid("unknown fork number")),
        }
    }
}

impl fmt::Display for ForkNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix().unwrap_or("main"))
    }
}

/// Persistence class of a relation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Persistence {
    /// Regular WAL-logged relation.
    Permanent,
    /// Not WAL-logged; reset from its init fork after a crash.
    Unlogged,
    /// Session-local relation.
    Temp,
}

/// Identity of one page reference; used as the invalid-page hash key.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageKey {
    /// Relation the page belongs to.
    pub node: RelFileNode,
    /// Fork within the relation.
    pub fork: ForkNumber,
    /// Block within the fork.
    pub block: BlockNumber,
}

impl PageKey {
    /// Creates a page key.
    pub const fn new(node: RelFileNode, fork: ForkNumber, block: BlockNumber) -> Self {
        Self { node, fork, block }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} of relation {}", self.block, self.node.path(self.fork))
    }
}

/// Target of one resolution request. Structurally a [`PageKey`].
pub type BlockRef = PageKey;

/// Errors raised by the redo engine.
///
/// Every variant is fatal to the replay that produced it; callers abort
/// recovery after logging it.
#[derive(thiserror::Error, Debug)]
pub enum RedoError {
    /// Underlying OS error on page files.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A WAL segment needed for reading no longer exists.
    #[error("requested WAL segment {0} has already been removed")]
    SegmentRemoved(PathBuf),
    /// Open, seek or read failure on a WAL segment.
    #[error("could not {op} log segment {path} at offset {offset}: {source}")]
    SegmentIo {
        /// Operation that failed.
        op: &'static str,
        /// Segment path.
        path: PathBuf,
        /// Offset within the segment.
        offset: u64,
        /// OS error.
        #[source]
        source: std::io::Error,
    },
    /// On-disk content failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller passed an unusable argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The record has no block reference with this id.
    #[error("failed to locate backup block with ID {0}")]
    InvalidBlockId(u8),
    /// Redo routine and WAL record disagree about block reinitialization.
    #[error("{key}: {detail}")]
    WillInitMismatch {
        /// Block that was requested.
        key: PageKey,
        /// Which direction the disagreement goes.
        detail: &'static str,
    },
    /// A full-page image could not be applied.
    #[error("failed to restore block image of {key}: {detail}")]
    ImageRestore {
        /// Block being restored.
        key: PageKey,
        /// What was wrong with the image.
        detail: &'static str,
    },
    /// Page LSN is ahead of the prior-LSN hint carried by the record.
    #[error("lsn check error for {key}: lsn in record {expected}, lsn in current page {found}, record end {record}")]
    LsnCheck {
        /// Block being replayed.
        key: PageKey,
        /// Prior LSN the record expected on the page.
        expected: Lsn,
        /// LSN actually found on the page.
        found: Lsn,
        /// End LSN of the record.
        record: Lsn,
    },
    /// Unresolved invalid pages remained at end of recovery.
    #[error("WAL contains references to invalid pages, count: {0}")]
    InvalidPages(usize),
    /// End-of-recovery merge attempted before every worker handed over.
    #[error("invalid-page merge started with {pending} redo worker(s) still running")]
    WorkersStillRunning {
        /// Workers that have not handed over their tables.
        pending: usize,
    },
    /// Options failed to load or validate.
    #[error(transparent)]
    Config(#[from] crate::options::ConfigError),
    /// Waiting for WAL to become available exceeded the configured bound.
    #[error("timed out waiting for WAL up to {target}")]
    WalWaitTimeout {
        /// Position that was waited for.
        target: Lsn,
    },
}

impl RedoError {
    /// Returns true for OS-level I/O failures on WAL segments or page files.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            RedoError::Io(_) | RedoError::SegmentRemoved(_) | RedoError::SegmentIo { .. }
        )
    }
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, RedoError>;
