//! Color-depth preconditions.
//!
//! Many FreeImage operations only accept certain bit depths and misbehave
//! (or crash) on others. Each guarded operation in
//! [`BitmapOps`](super::BitmapOps) checks the bitmap against one of these
//! sets before the native call.

use super::BitmapOps;
use crate::error::{Error, Result};

pub const COL_1TO8: &[u32] = &[1, 4, 8];
pub const COL_16TO32: &[u32] = &[16, 24, 32];
pub const COL_1TO32: &[u32] = &[1, 4, 8, 16, 24, 32];
pub const COL_1TO48: &[u32] = &[1, 4, 8, 16, 24, 32, 48];
pub const COL_8: &[u32] = &[8];
pub const COL_24: &[u32] = &[24];
pub const COL_8_32: &[u32] = &[8, 32];
pub const COL_24_32: &[u32] = &[24, 32];
pub const COL_8_24_32: &[u32] = &[8, 24, 32];

/// Fail with [`Error::WrongDepth`] unless `bitmap`'s depth is in `allowed`.
///
/// Returns the depth on success.
pub fn require_depth<B>(bitmap: &B, operation: &'static str, allowed: &'static [u32]) -> Result<u32>
where
    B: BitmapOps + ?Sized,
{
    let depth = bitmap.bpp()?;
    if allowed.contains(&depth) {
        Ok(depth)
    } else {
        log::debug!("{operation} rejected {depth}-bit bitmap");
        Err(Error::WrongDepth {
            depth,
            operation,
            allowed,
        })
    }
}
