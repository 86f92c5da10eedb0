#![forbid(unsafe_code)]

use tracing::{debug, error, trace};

use crate::buffer::ReadMethod;
use crate::primitives::page;
use crate::redo::{ReadBufferMode, RedoAction, RedoBufferResolver, ResolvedPage};
use crate::types::{ForkNumber, Lsn, RedoError, Result, INVALID_BACKEND_ID};
use crate::wal::{DecodedBlock, RecordView};

const WILL_INIT_NOT_ZEROED: &str =
    "block with WILL_INIT flag in WAL record must be zeroed by redo routine";
const ZEROED_WITHOUT_WILL_INIT: &str =
    "block to be initialized in redo routine must be marked with WILL_INIT flag in the WAL record";

/// Decides, per block reference, whether a record's change still has to be
/// applied, restoring full-page images on the way.
pub struct RedoApplier<'a> {
    resolver: RedoBufferResolver<'a>,
    strict_lsn_check: bool,
}

impl<'a> RedoApplier<'a> {
    pub(crate) fn new(resolver: RedoBufferResolver<'a>, strict_lsn_check: bool) -> Self {
        Self {
            resolver,
            strict_lsn_check,
        }
    }

    /// Resolves block `block_id` of `record` and classifies it.
    ///
    /// `NeedsRedo` and `Restored` hand back the locked page; `Done` and
    /// `NotFound` hand back nothing. A block carrying an image is always
    /// restored, whatever the page held before.
    pub fn apply_or_skip(
        &mut self,
        record: &dyn RecordView,
        block_id: u8,
        mode: ReadBufferMode,
        cleanup_lock: bool,
        method: ReadMethod,
    ) -> Result<(RedoAction, Option<ResolvedPage>)> {
        let block = record
            .block(block_id)
            .ok_or(RedoError::InvalidBlockId(block_id))?;
        let key = block.key();
        let end_lsn = record.end_lsn();

        if block.will_init && !mode.is_zero() {
            error!(page = %key, ?mode, "redo.apply.will_init_mismatch");
            return Err(RedoError::WillInitMismatch {
                key,
                detail: WILL_INIT_NOT_ZEROED,
            });
        }
        if !block.will_init && mode.is_zero() {
            error!(page = %key, ?mode, "redo.apply.will_init_mismatch");
            return Err(RedoError::WillInitMismatch {
                key,
                detail: ZEROED_WITHOUT_WILL_INIT,
            });
        }

        let mode = if block.image.is_some() {
            if cleanup_lock {
                ReadBufferMode::ZeroAndCleanupLock
            } else {
                ReadBufferMode::ZeroAndLock
            }
        } else {
            mode
        };

        let Some(resolved) = self.resolver.resolve(key, mode, cleanup_lock, method)? else {
            trace!(page = %key, lsn = %end_lsn, "redo.apply.not_found");
            return Ok((RedoAction::NotFound, None));
        };
        let mut resolved = resolved.with_replay_lsn(end_lsn);

        if let Some(image) = &block.image {
            page::restore_block_image(
                &image.bytes,
                image.hole_offset,
                image.hole_length,
                resolved.data_mut(),
            )
            .map_err(|err| match err {
                RedoError::Corruption(detail) => RedoError::ImageRestore { key, detail },
                other => other,
            })?;
            // An all-zero image stays new; stamping it would make it look initialized.
            if !page::is_new(resolved.data()) {
                resolved.set_page_lsn(end_lsn);
            }
            page::set_just_after_fpw(resolved.data_mut());
            resolved.mark_dirty();
            if key.fork == ForkNumber::Init {
                resolved.flush()?;
                self.resolver
                    .env()
                    .smgr()
                    .open(key.node, INVALID_BACKEND_ID)
                    .immedsync(ForkNumber::Init)?;
            }
            trace!(page = %key, lsn = %end_lsn, "redo.apply.restored");
            return Ok((RedoAction::Restored, Some(resolved)));
        }

        let page_lsn = resolved.page_lsn();
        if end_lsn <= page_lsn {
            trace!(page = %key, lsn = %end_lsn, page_lsn = %page_lsn, "redo.apply.done");
            resolved.release()?;
            return Ok((RedoAction::Done, None));
        }

        if self.strict_lsn_check {
            check_prior_lsn(block, &resolved, end_lsn)?;
        }
        page::clear_just_after_fpw(resolved.data_mut());
        Ok((RedoAction::NeedsRedo, Some(resolved)))
    }
}

/// Compares the page LSN with the record's prior-LSN hint on the main fork.
///
/// A page ahead of the hint is fatal unless the block is reinitialized, the
/// hint is unset, the page is all-visible, or an image was just restored
/// onto it. Other mismatches are only logged.
fn check_prior_lsn(block: &DecodedBlock, resolved: &ResolvedPage, end_lsn: Lsn) -> Result<()> {
    if block.fork != ForkNumber::Main {
        return Ok(());
    }
    let key = block.key();
    let Some(expected) = block.prev_lsn else {
        error!(page = %key, lsn = %end_lsn, "redo.lsn_check.missing_hint");
        return Err(RedoError::Invalid("record carries no prior-LSN hint for strict check"));
    };
    let found = resolved.page_lsn();
    if found == expected {
        return Ok(());
    }
    let data = resolved.data();
    let exempt = block.will_init
        || !expected.is_valid()
        || page::is_all_visible(data)
        || page::is_just_after_fpw(data);
    if found > expected && !exempt {
        error!(page = %key, expected = %expected, found = %found, lsn = %end_lsn, "redo.lsn_check.failed");
        return Err(RedoError::LsnCheck {
            key,
            expected,
            found,
            record: end_lsn,
        });
    }
    debug!(
        page = %key,
        expected = %expected,
        found = %found,
        lsn = %end_lsn,
        exempt,
        "redo.lsn_check.mismatch"
    );
    Ok(())
}
