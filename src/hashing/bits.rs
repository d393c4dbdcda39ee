// Fingerprint encodings and Hamming distances

use bitvec::prelude::*;

use crate::error::{Result, VidHashError};

/// Number of differing bits between two integer fingerprints.
pub fn hamming_u64(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Hamming distance between two equal-length bit sequences.
pub fn hamming_bits(a: &BitSlice<u8, Msb0>, b: &BitSlice<u8, Msb0>) -> Result<u32> {
    if a.len() != b.len() {
        return Err(VidHashError::Precondition(format!(
            "cannot compare fingerprints of {} and {} bits",
            a.len(),
            b.len()
        )));
    }

    let differing = a
        .iter()
        .by_vals()
        .zip(b.iter().by_vals())
        .fold(0u32, |acc, (x, y)| acc + u32::from(x != y));
    Ok(differing)
}

pub fn parse_int_fingerprint(value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        VidHashError::Precondition(format!("fingerprint {:?} is not an unsigned 64-bit integer", value))
    })
}

/// Parse a stored `0`/`1` fingerprint.
pub fn parse_bitstring(value: &str) -> Result<BitVec<u8, Msb0>> {
    value
        .chars()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(VidHashError::Precondition(format!(
                "fingerprint contains {:?}, expected a bit-string",
                other
            ))),
        })
        .collect()
}

pub fn to_bitstring(bits: &BitSlice<u8, Msb0>) -> String {
    bits.iter().by_vals().map(|b| if b { '1' } else { '0' }).collect()
}

/// First `width` bits of the fraction `0.d0 d1 d2 ...` written in base 256,
/// i.e. `floor(value / 256^n * 2^width)`. Short inputs are padded with zero bits.
pub fn fraction_bits(digits: &[u8], width: usize) -> BitVec<u8, Msb0> {
    let mut bits = BitVec::<u8, Msb0>::from_slice(digits);
    bits.resize(width, false);
    bits
}
