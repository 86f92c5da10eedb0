#![forbid(unsafe_code)]
//! Slotted-page header layout shared by every relation fork.
//!
//! Only the header is interpreted here. Line pointers and tuple content
//! belong to the redo routines that receive a resolved page.

use core::convert::TryInto;

use crate::types::{page_checksum, BlockNumber, Lsn, RedoError, Result};

/// Default size of a relation page.
pub const DEFAULT_PAGE_SIZE: usize = 8192;
/// Length of the fixed page header.
pub const PAGE_HDR_LEN: usize = 24;
/// Layout version stored in the low byte of the size/version field.
pub const PAGE_LAYOUT_VERSION: u16 = 4;

pub mod header {
    //! Byte offsets for fixed header fields (little-endian).
    use core::ops::Range;

    pub const LSN: Range<usize> = 0..8;
    pub const CHECKSUM: Range<usize> = 8..12;
    pub const FLAGS: Range<usize> = 12..14;
    pub const LOWER: Range<usize> = 14..16;
    pub const UPPER: Range<usize> = 16..18;
    pub const SPECIAL: Range<usize> = 18..20;
    pub const SIZE_VERSION: Range<usize> = 20..22;
    pub const RESERVED: Range<usize> = 22..24;
}

pub mod flags {
    //! Bits of the header flag word.

    /// Some tuples may have free line pointers.
    pub const HAS_FREE_LINES: u16 = 0x0001;
    /// Not enough free space for a new tuple.
    pub const PAGE_FULL: u16 = 0x0002;
    /// Every tuple on the page is visible to everyone.
    pub const ALL_VISIBLE: u16 = 0x0004;
    /// Page content was just restored from a full-page image.
    pub const JUST_AFTER_FPW: u16 = 0x0010;
}

fn read_u16(page: &[u8], range: core::ops::Range<usize>) -> u16 {
    u16::from_le_bytes(page[range].try_into().unwrap_or([0; 2]))
}

fn write_u16(page: &mut [u8], range: core::ops::Range<usize>, value: u16) {
    page[range].copy_from_slice(&value.to_le_bytes());
}

fn check_len(page: &[u8]) -> Result<()> {
    if page.len() < PAGE_HDR_LEN {
        return Err(RedoError::Invalid("page buffer smaller than header"));
    }
    Ok(())
}

/// Initializes `page` as an empty page reserving `special_size` trailing bytes.
pub fn init(page: &mut [u8], special_size: usize) -> Result<()> {
    check_len(page)?;
    let size = page.len();
    if size > u16::MAX as usize + 1 || special_size > size - PAGE_HDR_LEN {
        return Err(RedoError::Invalid("page size or special size out of range"));
    }
    page.fill(0);
    let special = (size - special_size) as u16;
    write_u16(page, header::LOWER, PAGE_HDR_LEN as u16);
    write_u16(page, header::UPPER, special);
    write_u16(page, header::SPECIAL, special);
    write_u16(
        page,
        header::SIZE_VERSION,
        ((size as u16) & 0xFF00) | PAGE_LAYOUT_VERSION,
    );
    Ok(())
}

/// Returns true if the page has never been initialized.
///
/// An all-zero block read from disk reports new; so does any page whose
/// upper pointer was never set.
pub fn is_new(page: &[u8]) -> bool {
    page.len() < PAGE_HDR_LEN || read_u16(page, header::UPPER) == 0
}

/// LSN of the last change applied to the page.
pub fn lsn(page: &[u8]) -> Lsn {
    if page.len() < PAGE_HDR_LEN {
        return Lsn::INVALID;
    }
    Lsn(u64::from_le_bytes(
        page[header::LSN].try_into().unwrap_or([0; 8]),
    ))
}

/// Stamps the page LSN.
pub fn set_lsn(page: &mut [u8], lsn: Lsn) {
    page[header::LSN].copy_from_slice(&lsn.0.to_le_bytes());
}

/// Raw header flag word.
pub fn flags(page: &[u8]) -> u16 {
    if page.len() < PAGE_HDR_LEN {
        return 0;
    }
    read_u16(page, header::FLAGS)
}

fn set_flags(page: &mut [u8], value: u16) {
    write_u16(page, header::FLAGS, value);
}

/// True if the all-visible bit is set.
pub fn is_all_visible(page: &[u8]) -> bool {
    flags(page) & flags::ALL_VISIBLE != 0
}

/// Sets the all-visible bit.
pub fn set_all_visible(page: &mut [u8]) {
    let value = flags(page) | flags::ALL_VISIBLE;
    set_flags(page, value);
}

/// True if the page was restored from an image and not yet redone since.
pub fn is_just_after_fpw(page: &[u8]) -> bool {
    flags(page) & flags::JUST_AFTER_FPW != 0
}

/// Marks the page as just restored from a full-page image.
pub fn set_just_after_fpw(page: &mut [u8]) {
    let value = flags(page) | flags::JUST_AFTER_FPW;
    set_flags(page, value);
}

/// Clears the just-restored marker.
pub fn clear_just_after_fpw(page: &mut [u8]) {
    let value = flags(page) & !flags::JUST_AFTER_FPW;
    set_flags(page, value);
}

/// Free-space bounds `(lower, upper)`.
pub fn bounds(page: &[u8]) -> (u16, u16) {
    (read_u16(page, header::LOWER), read_u16(page, header::UPPER))
}

/// Checksum stored in the header.
pub fn stored_checksum(page: &[u8]) -> u32 {
    u32::from_le_bytes(page[header::CHECKSUM].try_into().unwrap_or([0; 4]))
}

/// Computes and stores the checksum of `page` as block `block`.
pub fn stamp_checksum(block: BlockNumber, page: &mut [u8]) {
    let crc = page_checksum(block, page, header::CHECKSUM);
    page[header::CHECKSUM].copy_from_slice(&crc.to_le_bytes());
}

/// Verifies the stored checksum. New pages carry none and always pass.
pub fn verify_checksum(block: BlockNumber, page: &[u8]) -> bool {
    if is_new(page) {
        return true;
    }
    page_checksum(block, page, header::CHECKSUM) == stored_checksum(page)
}

/// Rebuilds a page from a full-page image whose hole was elided.
///
/// Bytes `[hole_offset, hole_offset + hole_length)` are zero-filled, the rest
/// come from `image` in order. A zero `hole_length` means the image is the
/// whole page.
pub fn restore_block_image(
    image: &[u8],
    hole_offset: u16,
    hole_length: u16,
    page: &mut [u8],
) -> Result<()> {
    let hole_start = hole_offset as usize;
    let hole_end = hole_start + hole_length as usize;
    if hole_end > page.len() {
        return Err(RedoError::Corruption("image hole extends past page end"));
    }
    if image.len() + hole_length as usize != page.len() {
        return Err(RedoError::Corruption("image length does not match page size"));
    }
    if hole_length == 0 {
        page.copy_from_slice(image);
        return Ok(());
    }
    let (head, tail) = image.split_at(hole_start);
    page[..hole_start].copy_from_slice(head);
    page[hole_start..hole_end].fill(0);
    page[hole_end..].copy_from_slice(tail);
    Ok(())
}
