//! File write path (C8, §4.8): staged-temp-file writer, streaming block
//! writer, create-empty-file policy, and append/rapid-finalize via
//! `compose`.
//!
//! Buffer-to-temp-file-then-upload for small files, plus a second,
//! streaming mode for large files per §4.8 that pushes fixed-size blocks
//! to a `ChunkWriter` as they fill rather than staging a whole file
//! first.

use std::io::{Seek, SeekFrom, Write as _};

use bucketfs_core::domain::{Generation, ObjectName, ObjectRecord};
use bucketfs_core::error::BucketFsError;
use bucketfs_core::ports::bucket_store::{BucketStore, ChunkWriter, Precondition};
use bytes::{Bytes, BytesMut};

use crate::handle::WriteBlockBuffer;

fn to_bfs_error(err: anyhow::Error) -> BucketFsError {
    match err.downcast::<BucketFsError>() {
        Ok(bfs) => bfs,
        Err(err) => BucketFsError::IoError(err.to_string()),
    }
}

/// Decides whether `create()` should eagerly materialize an empty object
/// on `O_CREAT` (§4.8's `write.create-empty-file`) or defer creation
/// until the first `flush`/`release`.
pub fn should_create_empty_eagerly(create_empty_file: bool) -> bool {
    create_empty_file
}

/// Writes `data` into a staged-temp-file writer at `offset`, growing the
/// file as needed. FUSE write requests on a given handle may arrive
/// out of order relative to a preceding `seek`-less stream, so this
/// always seeks explicitly rather than relying on the file's cursor.
pub fn staged_write(file: &mut std::fs::File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    Ok(())
}

/// Uploads the full contents of a staged temp file as a single `create`
/// call (§4.8's legacy path), applying `precondition`.
pub async fn finalize_staged(
    store: &dyn BucketStore,
    name: &ObjectName,
    file: &mut std::fs::File,
    precondition: Precondition,
) -> Result<ObjectRecord, BucketFsError> {
    file.seek(SeekFrom::Start(0)).map_err(BucketFsError::from)?;
    let mut data = Vec::new();
    std::io::Read::read_to_end(file, &mut data).map_err(BucketFsError::from)?;
    store.create(name, data, precondition).await.map_err(to_bfs_error)
}

/// Feeds `data` into the streaming block writer (§4.8), flushing full
/// blocks through `writer` as they accumulate. `data` need not be block-
/// aligned; partial blocks accumulate across calls.
pub async fn stream_write(
    buffer: &mut WriteBlockBuffer,
    writer: &mut dyn ChunkWriter,
    data: &[u8],
) -> Result<(), BucketFsError> {
    buffer.buffer.extend_from_slice(data);
    buffer.bytes_written += data.len() as u64;

    while buffer.buffer.len() >= buffer.block_size {
        let chunk: Bytes = buffer.buffer.split_to(buffer.block_size).freeze();
        writer.write_chunk(chunk.to_vec()).await.map_err(to_bfs_error)?;
        buffer.block_start += buffer.block_size as u64;
    }
    Ok(())
}

/// Flushes any remaining partial block and commits the upload session
/// (§4.8). The writer must not be reused afterward.
pub async fn finalize_stream(
    buffer: &mut WriteBlockBuffer,
    writer: Box<dyn ChunkWriter>,
) -> Result<ObjectRecord, BucketFsError> {
    let mut writer = writer;
    if !buffer.buffer.is_empty() {
        let remaining = std::mem::replace(&mut buffer.buffer, BytesMut::new());
        writer.write_chunk(remaining.to_vec()).await.map_err(to_bfs_error)?;
    }
    writer.finalize().await.map_err(to_bfs_error)
}

/// Abandons a streaming upload session, e.g. on an interrupted write or
/// an error partway through (§4.8: "the bucket must not retain a partial
/// object").
pub async fn abort_stream(writer: Box<dyn ChunkWriter>) -> Result<(), BucketFsError> {
    writer.abort().await.map_err(to_bfs_error)
}

/// Append/rapid-finalize (§4.8, `write.enable-rapid-appends`): commits
/// `appended` bytes by composing the existing object with a small new
/// object holding just the appended tail, avoiding a full re-upload.
pub async fn rapid_append(
    store: &dyn BucketStore,
    name: &ObjectName,
    base_generation: Generation,
    appended: Vec<u8>,
) -> Result<ObjectRecord, BucketFsError> {
    let append_name = ObjectName::new(format!("{}.bucketfs-append-tmp", name.as_str()))
        .map_err(|e| BucketFsError::InvalidArgument(e.to_string()))?;

    let append_record = store
        .create(&append_name, appended, Precondition::Any)
        .await
        .map_err(to_bfs_error)?;

    let composed = store
        .compose(
            &[(name.clone(), base_generation), (append_name.clone(), append_record.generation)],
            name,
            Precondition::Any,
        )
        .await
        .map_err(to_bfs_error);

    // Best-effort cleanup of the temporary append object regardless of
    // whether the compose itself succeeded.
    let _ = store.delete(&append_name, None).await;

    composed
}

/// Reconciles a finalize against the source generation observed when the
/// write began (§4.4's write-back reconciliation). `Ok(true)` means the
/// precondition held and `new_record` is now authoritative; `Ok(false)`
/// means the caller must discard local changes and re-read.
pub fn reconcile_finalize(expected: Generation, result: &Result<ObjectRecord, BucketFsError>) -> bool {
    match result {
        Ok(_) => true,
        Err(BucketFsError::PreconditionFailed(_)) => {
            let _ = expected;
            false
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    #[test]
    fn staged_write_grows_file_at_offset() {
        let mut file = tempfile().unwrap();
        staged_write(&mut file, 0, b"hello").unwrap();
        staged_write(&mut file, 10, b"world").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut file, &mut buf).unwrap();
        assert_eq!(&buf[0..5], b"hello");
        assert_eq!(&buf[10..15], b"world");
    }

    #[test]
    fn reconcile_finalize_detects_precondition_failure() {
        let ok = reconcile_finalize(Generation(1), &Err(BucketFsError::PreconditionFailed("x".into())));
        assert!(!ok);
        let transient = reconcile_finalize(Generation(1), &Err(BucketFsError::Transient("x".into())));
        assert!(!transient);
    }
}
