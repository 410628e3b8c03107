//! Filesystem helpers for uploads and worker logs.

use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};

use crate::error::RunnerResult;

/// Stream `reader` into a new file at `path`.
///
/// The data is flushed and synced before returning, so a worker spawned
/// afterwards never sees a partial file. On failure the partial file is
/// removed.
///
/// Returns the number of bytes written.
pub async fn persist_upload<R>(path: impl AsRef<Path>, reader: &mut R) -> RunnerResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let path = path.as_ref();

    match write_stream(path, reader).await {
        Ok(written) => Ok(written),
        Err(e) => {
            if let Err(rm) = fs::remove_file(path).await {
                if rm.kind() != ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial upload {}: {}", path.display(), rm);
                }
            }
            Err(e)
        }
    }
}

async fn write_stream<R>(path: &Path, reader: &mut R) -> RunnerResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let file = File::create(path).await?;
    let mut writer = BufWriter::with_capacity(1024 * 1024, file);

    let written = tokio::io::copy(reader, &mut writer).await?;
    writer.flush().await?;
    writer.into_inner().sync_all().await?;

    Ok(written)
}

/// Read the last `tail` bytes of a log file as text.
///
/// Returns `None` when the file does not exist yet. A tail larger than the
/// file returns the whole file. Invalid UTF-8 (including a character cut in
/// half by the tail boundary) is replaced, not rejected.
pub async fn tail_log(path: impl AsRef<Path>, tail: u64) -> RunnerResult<Option<String>> {
    let mut file = match File::open(path.as_ref()).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    // The worker may still be appending; only read up to the size seen here.
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(tail);
    file.seek(SeekFrom::Start(start)).await?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.take(len - start).read_to_end(&mut buf).await?;

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}
