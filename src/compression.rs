use std::io::Read;

use anyhow::Error;
use flate2::bufread::GzDecoder;

use crate::error::MirrorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionType {
    Gzip,
    Bzip2,
}

/// Decompress a metadata payload.
///
/// `name` is only used for error messages. Output grows as needed, so there's no fixed
/// expansion ratio an index has to stay under.
pub fn decompress(data: &[u8], compression: CompressionType, name: &str) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();

    let res = match compression {
        CompressionType::Gzip => GzDecoder::new(data).read_to_end(&mut buf),
        CompressionType::Bzip2 => bzip2::read::BzDecoder::new(data).read_to_end(&mut buf),
    };

    if let Err(err) = res {
        return Err(MirrorError::Decompression {
            file: name.to_string(),
            reason: err.to_string(),
        }
        .into());
    }

    if buf.is_empty() {
        return Err(MirrorError::Decompression {
            file: name.to_string(),
            reason: "archive contains no data".to_string(),
        }
        .into());
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const PACKAGES: &[u8] = b"Package: a\nFilename: debs/a.deb\n\nPackage: b\nFilename: debs/b.deb\n";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn bzip2(data: &[u8]) -> Vec<u8> {
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decompresses_gzip() {
        let out = decompress(&gzip(PACKAGES), CompressionType::Gzip, "Packages.gz").unwrap();
        assert_eq!(out, PACKAGES);
    }

    #[test]
    fn decompresses_bzip2() {
        let out = decompress(&bzip2(PACKAGES), CompressionType::Bzip2, "Packages.bz2").unwrap();
        assert_eq!(out, PACKAGES);
    }

    #[test]
    fn handles_high_expansion_ratio() {
        let big = vec![b'x'; 4 * 1024 * 1024];
        let compressed = gzip(&big);
        assert!(compressed.len() * 10 < big.len());

        let out = decompress(&compressed, CompressionType::Gzip, "Packages.gz").unwrap();
        assert_eq!(out.len(), big.len());
    }

    #[test]
    fn rejects_invalid_stream() {
        let err = decompress(b"definitely not gzip", CompressionType::Gzip, "Packages.gz")
            .unwrap_err();
        let err = err.downcast_ref::<MirrorError>().unwrap();
        assert!(matches!(err, MirrorError::Decompression { file, .. } if file == "Packages.gz"));

        assert!(decompress(&gzip(PACKAGES), CompressionType::Bzip2, "Packages.bz2").is_err());
    }

    #[test]
    fn rejects_empty_archive() {
        let err = decompress(&gzip(b""), CompressionType::Gzip, "Packages.gz").unwrap_err();
        assert!(err.to_string().contains("no data"));
    }
}
