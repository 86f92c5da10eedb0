//! WAL access for replay: local segment files and decoded-record views.

mod follow;
mod record;
mod segment;

pub use follow::{LocalWalPageReader, WalAvailability};
pub use record::{BlockImage, DecodedBlock, DecodedRecord, RecordView, MAX_BLOCK_ID};
pub use segment::{segment_file_name, SegmentFileReader};
