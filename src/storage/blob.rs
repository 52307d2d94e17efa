//!  Blob operations for raw content storage.
//!
//! Blobs are opaque byte streams identified by the hash of their content.
//! Writing the same bytes twice yields the same hash and stores nothing new.
//!
//! Both directions come in a whole-buffer and a streaming flavour. The
//! streaming flavours hand a `Write`/`Read` to a caller supplied closure and
//! release the underlying stream when the closure returns, whether it
//! succeeded or not.

use std::io::{self, Read, Write};

use git2::{Blob, ErrorCode, ObjectType, Repository};

use crate::storage::error::{ShelveError, ShelveResult};
use crate::storage::types::ContentHash;

fn map_lookup_error(hash: &ContentHash, err: git2::Error) -> ShelveError {
    if err.code() == ErrorCode::NotFound {
        ShelveError::ObjectNotFound(hash.to_hex())
    } else {
        ShelveError::Git(err)
    }
}

fn unexpected_kind(hash: &ContentHash, kind: Option<ObjectType>) -> ShelveError {
    ShelveError::UnexpectedObjectType {
        id: hash.to_hex(),
        expected: "blob".to_string(),
        found: kind.map_or("unknown", |k| k.str()).to_string(),
    }
}

/// look up `hash`, failing with `UnexpectedObjectType` if it is not a blob
fn find_blob(repo: &Repository, hash: ContentHash) -> ShelveResult<Blob<'_>> {
    let object = repo
        .find_object(hash.raw(), None)
        .map_err(|e| map_lookup_error(&hash, e))?;
    object
        .into_blob()
        .map_err(|other| unexpected_kind(&hash, other.kind()))
}

/// write a byte buffer as a blob
///
/// returns the content hash (SHA-1 of the git blob)
pub fn write_blob(repo: &Repository, data: &[u8]) -> ShelveResult<ContentHash> {
    let oid = repo.blob(data)?;
    Ok(ContentHash::new(oid))
}

/// write a blob by streaming into a sink
///
/// the closure may write any amount of data in any number of chunks; nothing
/// is buffered here beyond what libgit2 keeps for hashing. If the closure
/// fails, the partially written stream is dropped and no hash is produced.
pub fn write_blob_streaming<F>(repo: &Repository, f: F) -> ShelveResult<ContentHash>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let mut writer = repo.blob_writer(None)?;
    f(&mut writer)?;
    writer.flush()?;
    let oid = writer.commit()?;
    Ok(ContentHash::new(oid))
}

/// read a blob's content from the repository
pub fn read_blob(repo: &Repository, hash: ContentHash) -> ShelveResult<Vec<u8>> {
    let blob = find_blob(repo, hash)?;
    Ok(blob.content().to_vec())
}

/// read a blob through a streaming reader
///
/// loose objects are streamed straight from the object database. Packed
/// objects cannot be streamed by libgit2, so for those the closure reads
/// from the inflated blob contents instead, which holds the whole blob in
/// memory.
pub fn read_blob_streaming<T, F>(repo: &Repository, hash: ContentHash, f: F) -> ShelveResult<T>
where
    F: FnOnce(&mut dyn Read) -> io::Result<T>,
{
    let odb = repo.odb()?;
    if !odb.exists(hash.raw()) {
        return Err(ShelveError::ObjectNotFound(hash.to_hex()));
    }

    let result = match odb.reader(hash.raw()) {
        Ok((mut reader, _size, kind)) => {
            if kind != ObjectType::Blob {
                return Err(unexpected_kind(&hash, Some(kind)));
            }
            f(&mut reader)?
        }
        Err(_) => {
            let blob = find_blob(repo, hash)?;
            let mut content: &[u8] = blob.content();
            f(&mut content)?
        }
    };
    Ok(result)
}

/// check whether a blob is present in the object database
pub fn blob_exists(repo: &Repository, hash: ContentHash) -> ShelveResult<bool> {
    let odb = repo.odb()?;
    Ok(odb.exists(hash.raw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_write_and_read() {
        let (_dir, repo) = setup_repo();
        let hash = write_blob(&repo, b"hallo test\n123\n").unwrap();
        assert_eq!(hash.to_hex().len(), 40);
        assert_eq!(read_blob(&repo, hash).unwrap(), b"hallo test\n123\n");
    }

    #[test]
    fn test_identical_content_same_hash() {
        let (_dir, repo) = setup_repo();
        let a = write_blob(&repo, b"same bytes").unwrap();
        let b = write_blob(&repo, b"same bytes").unwrap();
        assert_eq!(a, b);

        let streamed = write_blob_streaming(&repo, |w| w.write_all(b"same bytes")).unwrap();
        assert_eq!(a, streamed);
    }

    #[test]
    fn test_streaming_write_in_chunks() {
        let (_dir, repo) = setup_repo();
        let chunk = b"hallo test\n123\n";
        let hash = write_blob_streaming(&repo, |w| {
            for _ in 0..2000 {
                w.write_all(chunk)?;
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(read_blob(&repo, hash).unwrap(), chunk.repeat(2000));
    }

    #[test]
    fn test_streaming_read_in_small_increments() {
        let (_dir, repo) = setup_repo();
        let data = b"hallo test\n123\n".repeat(2000);
        assert_eq!(data.len(), 30000);
        let hash = write_blob(&repo, &data).unwrap();

        let read = read_blob_streaming(&repo, hash, |r| {
            let mut out = Vec::new();
            let mut buf = [0u8; 200];
            loop {
                let n = r.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            Ok(out)
        })
        .unwrap();

        assert_eq!(read, data);
    }

    #[test]
    fn test_failed_stream_produces_nothing() {
        let (_dir, repo) = setup_repo();
        let result = write_blob_streaming(&repo, |w| {
            w.write_all(b"partial")?;
            Err(io::Error::new(io::ErrorKind::Other, "producer gave up"))
        });
        assert!(matches!(result, Err(ShelveError::Io(_))));

        let hash = ContentHash::new(git2::Oid::hash_object(ObjectType::Blob, b"partial").unwrap());
        assert!(!blob_exists(&repo, hash).unwrap());
    }

    #[test]
    fn test_non_blob_hash_is_rejected_alike() {
        let (_dir, repo) = setup_repo();
        let blob = write_blob(&repo, b"inside").unwrap();
        let mut tree = repo.treebuilder(None).unwrap();
        tree.insert("f", blob.raw(), 0o100644).unwrap();
        let tree_hash = ContentHash::new(tree.write().unwrap());

        let whole = read_blob(&repo, tree_hash);
        let streamed = read_blob_streaming(&repo, tree_hash, |r| {
            let mut v = Vec::new();
            r.read_to_end(&mut v)?;
            Ok(v)
        });

        for result in [whole, streamed] {
            assert!(matches!(
                result,
                Err(ShelveError::UnexpectedObjectType { ref found, .. }) if found == "tree"
            ));
        }
    }

    #[test]
    fn test_missing_blob() {
        let (_dir, repo) = setup_repo();
        let hash = ContentHash::from_hex("e30b41f7fbe195d45e702f3cafd0f48ab8d62a50").unwrap();

        assert!(matches!(read_blob(&repo, hash), Err(ShelveError::ObjectNotFound(_))));
        let streamed = read_blob_streaming(&repo, hash, |r| {
            let mut v = Vec::new();
            r.read_to_end(&mut v)?;
            Ok(v)
        });
        assert!(matches!(streamed, Err(ShelveError::ObjectNotFound(_))));
        assert!(!blob_exists(&repo, hash).unwrap());
    }
}
