#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::types::{Lsn, RedoError, Result, TimeLineId};

/// Builds the file name of segment `seg_no` on `timeline`.
///
/// Names are 24 hex digits: timeline, then the segment number split into the
/// log id and the segment within that log id.
pub fn segment_file_name(timeline: TimeLineId, seg_no: u64, segment_size: u64) -> String {
    let per_id = segments_per_xlog_id(segment_size);
    format!(
        "{:08X}{:08X}{:08X}",
        timeline.0,
        seg_no / per_id,
        seg_no % per_id
    )
}

fn segments_per_xlog_id(segment_size: u64) -> u64 {
    (0x1_0000_0000u64 / segment_size).max(1)
}

struct OpenSegment {
    file: File,
    path: PathBuf,
    seg_no: u64,
    timeline: TimeLineId,
    offset: u64,
}

/// Sequential reader over local WAL segment files.
///
/// At most one segment file is open at a time. It stays open across calls
/// while reads remain in the same segment and timeline.
pub struct SegmentFileReader {
    wal_dir: PathBuf,
    segment_size: u64,
    current: Option<OpenSegment>,
}

impl SegmentFileReader {
    /// Creates a reader for segments of `segment_size` bytes under `wal_dir`.
    pub fn new(wal_dir: impl AsRef<Path>, segment_size: u64) -> Self {
        Self {
            wal_dir: wal_dir.as_ref().to_path_buf(),
            segment_size,
            current: None,
        }
    }

    /// Segment size in bytes.
    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Segment number and timeline of the open file, if any.
    pub fn current_segment(&self) -> Option<(u64, TimeLineId)> {
        self.current.as_ref().map(|seg| (seg.seg_no, seg.timeline))
    }

    /// Fills `buf` with WAL bytes starting at `start` on `timeline`.
    ///
    /// Reads never cross a segment boundary in one OS call; the reader
    /// moves to the next segment file as the position advances.
    pub fn read(&mut self, buf: &mut [u8], timeline: TimeLineId, start: Lsn) -> Result<()> {
        let segment_size = self.segment_size;
        let mut recptr = start.0;
        let mut filled = 0usize;
        while filled < buf.len() {
            let seg_no = recptr / segment_size;
            let start_off = recptr % segment_size;
            let segment = self.segment_for(seg_no, timeline)?;
            if segment.offset != start_off {
                segment
                    .file
                    .seek(SeekFrom::Start(start_off))
                    .map_err(|source| RedoError::SegmentIo {
                        op: "seek in",
                        path: segment.path.clone(),
                        offset: start_off,
                        source,
                    })?;
                segment.offset = start_off;
            }
            let remaining = (buf.len() - filled) as u64;
            let seg_bytes = remaining.min(segment_size - start_off) as usize;
            let read = segment
                .file
                .read(&mut buf[filled..filled + seg_bytes])
                .map_err(|source| RedoError::SegmentIo {
                    op: "read from",
                    path: segment.path.clone(),
                    offset: start_off,
                    source,
                })?;
            if read == 0 {
                return Err(RedoError::SegmentIo {
                    op: "read from",
                    path: segment.path.clone(),
                    offset: start_off,
                    source: ErrorKind::UnexpectedEof.into(),
                });
            }
            segment.offset += read as u64;
            recptr += read as u64;
            filled += read;
        }
        trace!(start = %start, len = buf.len(), "wal.segment.read");
        Ok(())
    }

    fn segment_for(&mut self, seg_no: u64, timeline: TimeLineId) -> Result<&mut OpenSegment> {
        let reuse = self
            .current
            .as_ref()
            .is_some_and(|seg| seg.seg_no == seg_no && seg.timeline == timeline);
        if !reuse {
            self.close();
            let name = segment_file_name(timeline, seg_no, self.segment_size);
            let path = self.wal_dir.join(&name);
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(RedoError::SegmentRemoved(path));
                }
                Err(source) => {
                    return Err(RedoError::SegmentIo {
                        op: "open",
                        path,
                        offset: 0,
                        source,
                    });
                }
            };
            debug!(segment = %name, "wal.segment.open");
            self.current = Some(OpenSegment {
                file,
                path,
                seg_no,
                timeline,
                offset: 0,
            });
        }
        self.current
            .as_mut()
            .ok_or(RedoError::Invalid("no open WAL segment"))
    }

    /// Closes the open segment file, if any.
    pub fn close(&mut self) {
        if let Some(seg) = self.current.take() {
            debug!(path = %seg.path.display(), "wal.segment.close");
        }
    }
}
