#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::segment::SegmentFileReader;
use crate::types::{Lsn, RedoError, Result, TimeLineId};

/// Signal announcing how far WAL has been flushed locally.
pub struct WalAvailability {
    state: Mutex<(Lsn, TimeLineId)>,
    advanced: Condvar,
}

impl WalAvailability {
    /// Starts with WAL available up to `upto` on `timeline`.
    pub fn new(upto: Lsn, timeline: TimeLineId) -> Self {
        Self {
            state: Mutex::new((upto, timeline)),
            advanced: Condvar::new(),
        }
    }

    /// Announces WAL flushed up to `upto` on `timeline`. Positions never move
    /// backwards on the same timeline.
    pub fn advance(&self, upto: Lsn, timeline: TimeLineId) {
        let mut state = self.state.lock();
        if timeline != state.1 || upto > state.0 {
            *state = (upto, timeline);
            self.advanced.notify_all();
        }
    }

    /// Current flush position and timeline.
    pub fn available(&self) -> (Lsn, TimeLineId) {
        *self.state.lock()
    }

    /// Blocks until WAL up to `target` is available or `timeout` elapses.
    ///
    /// A timeout too large to form a deadline waits without one.
    pub fn wait_for(&self, target: Lsn, timeout: Duration) -> Result<(Lsn, TimeLineId)> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while state.0 < target {
            trace!(target = %target, upto = %state.0, "wal.follow.wait");
            let Some(deadline) = deadline else {
                self.advanced.wait(&mut state);
                continue;
            };
            if self.advanced.wait_until(&mut state, deadline).timed_out() && state.0 < target {
                return Err(RedoError::WalWaitTimeout { target });
            }
        }
        Ok(*state)
    }
}

/// Reads whole WAL pages from local segments, waiting for WAL to arrive.
pub struct LocalWalPageReader {
    reader: SegmentFileReader,
    availability: Arc<WalAvailability>,
    page_size: usize,
    timeout: Duration,
}

impl LocalWalPageReader {
    /// Creates a page reader on top of `reader`.
    pub fn new(
        reader: SegmentFileReader,
        availability: Arc<WalAvailability>,
        page_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            reader,
            availability,
            page_size,
            timeout,
        }
    }

    /// Reads the WAL page starting at `target_page` into `buf`, first waiting
    /// until `req_len` bytes past it have been flushed.
    ///
    /// The whole page is always read. Bytes past the flushed position are
    /// zeroed. Returns how many bytes are valid: the full page when WAL
    /// extends past it, otherwise the flushed prefix. Fails with
    /// [`RedoError::WalWaitTimeout`] if `req_len` bytes never arrive.
    pub fn read_page(&mut self, target_page: Lsn, req_len: usize, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.page_size {
            return Err(RedoError::Invalid("WAL page buffer smaller than a page"));
        }
        let loc = target_page.advance(req_len as u64);
        let (upto, timeline) = self.availability.wait_for(loc, self.timeout)?;
        let count = if target_page.advance(self.page_size as u64) <= upto {
            self.page_size
        } else {
            (upto.0 - target_page.0) as usize
        };
        let page = &mut buf[..self.page_size];
        self.reader.read(page, timeline, target_page)?;
        page[count..].fill(0);
        debug!(target = %target_page, valid = count, "wal.follow.read_page");
        Ok(count)
    }

    /// Closes the underlying segment file.
    pub fn close(&mut self) {
        self.reader.close();
    }
}
