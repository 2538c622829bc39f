//! Proof-of-work: compact difficulty decoding, work per header, and the
//! header PoW check.
//!
//! # Compact difficulty
//!
//! `bits` packs a 256-bit target as `mantissa * 256^(exponent - 3)` where the
//! exponent is the top byte and the mantissa is the low 23 bits. Bit 23 is a
//! sign bit. Decoding follows Bitcoin's `SetCompact`: a set sign bit with a
//! non-zero mantissa is negative, and exponents that push the mantissa past
//! 256 bits overflow. Both are rejected by [`check_proof_of_work`] and count
//! as zero work in [`calc_work`].
//!
//! # Hash comparison
//!
//! Hashes are stored in wire (little-endian) order, so they are read as
//! little-endian integers before comparing against the target.

use primitive_types::U256;

use crate::error::PowError;
use crate::header::Header;
use crate::types::Hash256;

/// Highest target any header may claim: 2^255 - 1.
pub const POW_LIMIT: U256 = U256([u64::MAX, u64::MAX, u64::MAX, u64::MAX >> 1]);

const SIGN_BIT: u32 = 0x0080_0000;
const MANTISSA_MASK: u32 = 0x007f_ffff;

/// Decode compact `bits` into a target.
///
/// Fails with [`PowError::NonPositiveTarget`] for zero or negative targets
/// and [`PowError::TargetAboveLimit`] when the encoding overflows 256 bits.
/// The result is not checked against [`POW_LIMIT`].
pub fn compact_to_target(bits: u32) -> Result<U256, PowError> {
    let exponent = bits >> 24;
    let mut mantissa = bits & MANTISSA_MASK;

    if mantissa != 0 && bits & SIGN_BIT != 0 {
        return Err(PowError::NonPositiveTarget);
    }
    let overflow = mantissa != 0
        && (exponent > 34
            || (mantissa > 0xff && exponent > 33)
            || (mantissa > 0xffff && exponent > 32));
    if overflow {
        return Err(PowError::TargetAboveLimit);
    }

    let target = if exponent <= 3 {
        mantissa >>= 8 * (3 - exponent);
        U256::from(mantissa)
    } else {
        U256::from(mantissa) << (8 * (exponent - 3) as usize)
    };
    if target.is_zero() {
        return Err(PowError::NonPositiveTarget);
    }
    Ok(target)
}

/// Encode a target in compact form (Bitcoin's `GetCompact`).
///
/// Precision below the top three significant bytes is lost.
pub fn target_to_compact(target: U256) -> u32 {
    let mut size = target.bits().div_ceil(8) as u32;
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3) as usize)).low_u32()
    };
    // Keep the mantissa clear of the sign bit.
    if compact & SIGN_BIT != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | (size << 24)
}

/// Interpret a wire-order hash as a 256-bit integer.
pub fn hash_to_u256(hash: &Hash256) -> U256 {
    U256::from_little_endian(hash.as_bytes())
}

/// Expected number of hashes to meet `bits`: `2^256 / (target + 1)`.
///
/// Zero for targets that do not decode to a positive value.
pub fn calc_work(bits: u32) -> U256 {
    match compact_to_target(bits) {
        Ok(target) => work_for_target(target),
        Err(_) => U256::zero(),
    }
}

fn work_for_target(target: U256) -> U256 {
    // 2^256 does not fit in a U256; use (~target / (target + 1)) + 1 instead.
    match target.checked_add(U256::one()) {
        Some(denominator) => (!target / denominator) + U256::one(),
        None => U256::one(),
    }
}

/// Verify that a header's merge-mined parent meets the claimed difficulty.
///
/// Pure: consults nothing but the header.
pub fn check_proof_of_work(header: &Header) -> Result<(), PowError> {
    let target = compact_to_target(header.bits)?;
    if target > POW_LIMIT {
        return Err(PowError::TargetAboveLimit);
    }
    if hash_to_u256(&header.pow_hash()) > target {
        return Err(PowError::HashAboveTarget);
    }
    Ok(())
}
