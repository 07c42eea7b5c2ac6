//! Zero-run compression for persisted save-data blobs
//!
//! Format: the 16-byte [`NULLCOMP_HEADER`], then the blob with every run of
//! `0x00` bytes replaced by `0x00, count` (count 1..=255; longer runs are
//! split). Nonzero bytes are stored verbatim.

use crate::constants::{MAX_BLOB_SIZE, NULLCOMP_HEADER};
use crate::error::CompressionError;

/// Compress a blob. Never fails; the `Result` mirrors [`decompress`].
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::with_capacity(NULLCOMP_HEADER.len() + data.len() / 2);
    out.extend_from_slice(NULLCOMP_HEADER);

    let mut i = 0;
    while i < data.len() {
        if data[i] != 0 {
            out.push(data[i]);
            i += 1;
            continue;
        }

        let run = data[i..]
            .iter()
            .take(u8::MAX as usize)
            .take_while(|&&b| b == 0)
            .count();
        out.push(0x00);
        out.push(run as u8);
        i += run;
    }

    Ok(out)
}

/// Decompress a blob.
///
/// Blobs without the header were stored before compression was introduced
/// and are returned unchanged. Output past [`MAX_BLOB_SIZE`] is an error.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let Some(body) = data.strip_prefix(NULLCOMP_HEADER.as_slice()) else {
        return Ok(data.to_vec());
    };

    let mut out = Vec::with_capacity((body.len() * 2).min(MAX_BLOB_SIZE));
    let mut iter = body.iter().enumerate();
    while let Some((offset, &b)) = iter.next() {
        if b != 0 {
            check_size(out.len() + 1)?;
            out.push(b);
            continue;
        }
        let (_, &count) = iter
            .next()
            .ok_or(CompressionError::TruncatedRun {
                offset: NULLCOMP_HEADER.len() + offset,
            })?;
        check_size(out.len() + count as usize)?;
        out.resize(out.len() + count as usize, 0);
    }

    Ok(out)
}

fn check_size(size: usize) -> Result<(), CompressionError> {
    if size > MAX_BLOB_SIZE {
        return Err(CompressionError::TooLarge {
            size,
            max: MAX_BLOB_SIZE,
        });
    }
    Ok(())
}

/// Whether `data` carries the compression header
pub fn is_compressed(data: &[u8]) -> bool {
    data.starts_with(NULLCOMP_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    const MAX_SAVE_SIZE: usize = 150_000;

    #[test]
    fn test_empty() {
        let compressed = compress(&[]).unwrap();
        assert_eq!(compressed, NULLCOMP_HEADER.to_vec());
        assert!(decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_zero_runs() {
        let compressed = compress(&[0x01, 0x00, 0x00, 0x00, 0x02, 0x00]).unwrap();
        assert_eq!(&compressed[16..], &[0x01, 0x00, 0x03, 0x02, 0x00, 0x01]);

        let long = vec![0u8; 600];
        let compressed = compress(&long).unwrap();
        assert_eq!(&compressed[16..], &[0x00, 0xFF, 0x00, 0xFF, 0x00, 0x5A]);
        assert_eq!(decompress(&compressed).unwrap(), long);
    }

    #[test]
    fn test_large_zero_blob() {
        let data = vec![0u8; MAX_SAVE_SIZE];
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < 2000);
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_large_random_blob() {
        let mut data = vec![0u8; MAX_SAVE_SIZE];
        StdRng::seed_from_u64(0x5EED).fill_bytes(&mut data);
        let compressed = compress(&data).unwrap();
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_uncompressed_passthrough() {
        let raw = b"legacy row without header".to_vec();
        assert!(!is_compressed(&raw));
        assert_eq!(decompress(&raw).unwrap(), raw);
        assert!(decompress(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_run() {
        let mut data = NULLCOMP_HEADER.to_vec();
        data.extend_from_slice(&[0x05, 0x00]);
        assert_eq!(
            decompress(&data),
            Err(CompressionError::TruncatedRun { offset: 17 })
        );
    }

    #[test]
    fn test_output_capped() {
        // 4113 full runs expand past 1 MiB
        let mut data = NULLCOMP_HEADER.to_vec();
        for _ in 0..4113 {
            data.extend_from_slice(&[0x00, 0xFF]);
        }
        assert_eq!(
            decompress(&data),
            Err(CompressionError::TooLarge {
                size: 4113 * 255,
                max: MAX_BLOB_SIZE,
            })
        );

        let at_limit = vec![0x01u8; MAX_BLOB_SIZE];
        assert_eq!(decompress(&compress(&at_limit).unwrap()).unwrap(), at_limit);

        let mut over = compress(&at_limit).unwrap();
        over.push(0x02);
        assert_eq!(
            decompress(&over),
            Err(CompressionError::TooLarge {
                size: MAX_BLOB_SIZE + 1,
                max: MAX_BLOB_SIZE,
            })
        );
    }

    #[test]
    fn test_zero_count_run_is_accepted() {
        let mut data = NULLCOMP_HEADER.to_vec();
        data.extend_from_slice(&[0x07, 0x00, 0x00, 0x08]);
        assert_eq!(decompress(&data).unwrap(), vec![0x07, 0x08]);
    }
}
