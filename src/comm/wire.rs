//! Byte-level casts for exchange and reduction payloads.
//!
//! Staging buffers and reduction partials cross process boundaries as plain
//! byte slices; everything sent is `#[repr(C)]` + `Pod` so the casts here
//! are alloc-free. Received buffers come back as `Vec<u8>` with no alignment
//! guarantee, hence the unaligned read.

use bytemuck::Pod;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_from<T: Pod>(v: &[u8]) -> &[T] {
    bytemuck::cast_slice(v)
}

/// Read one `T` from a received byte buffer without assuming alignment.
pub fn read_unaligned<T: Pod>(bytes: &[u8]) -> T {
    bytemuck::pod_read_unaligned(bytes)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_cast_roundtrip() {
        let v: Vec<i64> = vec![-3, 70_000, 5];
        let bytes = cast_slice(&v).to_vec();
        assert_eq!(cast_slice_from::<i64>(&bytes), &v[..]);
    }

    #[test]
    fn unaligned_read() {
        let x: f64 = 0.125;
        let mut bytes = vec![0u8; 1 + std::mem::size_of::<f64>()];
        bytes[1..].copy_from_slice(cast_slice(std::slice::from_ref(&x)));
        let back: f64 = read_unaligned(&bytes[1..]);
        assert_eq!(back, 0.125);
    }

    #[test]
    fn length_guard() {
        assert!(expect_exact_len(8, 8).is_ok());
        assert!(expect_exact_len(4, 8).is_err());
    }
}
