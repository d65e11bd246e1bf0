//! SHA-256 validation for downloaded release archives, matching the
//! checksums published in the release manifests.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::MirrorError;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Compute the hex SHA-256 digest of a file, streaming it in chunks.
pub async fn sha256_file(path: impl AsRef<Path>) -> Result<String, MirrorError> {
    let mut file = File::open(path.as_ref()).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Whether the file's digest matches `expected` (hex, case-insensitive).
pub async fn verify_file(path: impl AsRef<Path>, expected: &str) -> Result<bool, MirrorError> {
    let actual = sha256_file(path).await?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn test_sha256_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        assert_eq!(sha256_file(&path).await.unwrap(), HELLO_SHA256);
    }

    #[tokio::test]
    async fn test_verify_match_and_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        assert!(verify_file(&path, HELLO_SHA256).await.unwrap());
        assert!(
            verify_file(&path, &HELLO_SHA256.to_uppercase())
                .await
                .unwrap()
        );
        assert!(!verify_file(&path, "deadbeef").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sha256_file(dir.path().join("absent")).await.is_err());
    }
}
