//! Stored value envelope
//!
//! Values are tagged with their encoding so small values skip compression.

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Zstd,
}

impl Encoding {
    pub fn as_byte(&self) -> u8 {
        match self {
            Encoding::Raw => 0,
            Encoding::Zstd => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Encoding::Raw),
            1 => Some(Encoding::Zstd),
            _ => None,
        }
    }
}

/// Wrap a value for storage, compressing it when it is at least `threshold` bytes
pub fn pack(data: &[u8], threshold: usize, level: i32) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() + 1);
    if data.len() >= threshold {
        output.push(Encoding::Zstd.as_byte());
        output.extend(zstd::encode_all(data, level)?);
    } else {
        output.push(Encoding::Raw.as_byte());
        output.extend_from_slice(data);
    }
    Ok(output)
}

pub fn unpack(stored: &[u8]) -> Result<Vec<u8>> {
    let (&tag, body) = stored
        .split_first()
        .ok_or_else(|| Error::Corruption("Empty stored value".into()))?;

    match Encoding::from_byte(tag) {
        Some(Encoding::Raw) => Ok(body.to_vec()),
        Some(Encoding::Zstd) => zstd::decode_all(body)
            .map_err(|e| Error::Corruption(format!("Failed to decompress value: {}", e))),
        None => Err(Error::Corruption(format!("Invalid value encoding: {}", tag))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_stay_raw() {
        let packed = pack(b"tiny", 16, 3).unwrap();
        assert_eq!(packed[0], Encoding::Raw.as_byte());
        assert_eq!(&packed[1..], b"tiny");
        assert_eq!(unpack(&packed).unwrap(), b"tiny");
    }

    #[test]
    fn test_large_values_are_compressed() {
        let data = vec![42u8; 4096];
        let packed = pack(&data, 16, 3).unwrap();
        assert_eq!(packed[0], Encoding::Zstd.as_byte());
        assert!(packed.len() < data.len());
        assert_eq!(unpack(&packed).unwrap(), data);
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(matches!(unpack(&[]), Err(Error::Corruption(_))));
        assert!(matches!(unpack(&[9, 1, 2]), Err(Error::Corruption(_))));
    }
}
