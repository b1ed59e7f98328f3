//! Chunked file transfer
//!
//! A file travels as a `FILE_INFO` header line followed by its bytes split into
//! fixed-size chunks, written back-to-back with no delimiter. The receiver
//! relies entirely on the advertised size to find chunk boundaries, so both
//! ends derive the same [`ChunkPlan`] from `(file_size, chunk_size)`.

use crate::codec::LineStream;
use crate::error::{Error, Result};
use crate::protocol_core::Response;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Chunk layout for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub file_size: u64,
    pub chunk_size: u32,
    pub chunk_count: u32,
}

/// Compute the chunk layout. An empty file is one chunk of length 0.
pub fn chunking_plan(file_size: u64, chunk_size: u32) -> Result<ChunkPlan> {
    if chunk_size == 0 {
        return Err(Error::protocol("chunk size must be positive"));
    }
    let count = if file_size == 0 {
        1
    } else {
        (file_size + chunk_size as u64 - 1) / chunk_size as u64
    };
    let chunk_count = u32::try_from(count).map_err(|_| {
        Error::protocol(format!(
            "file of {} bytes needs {} chunks of {} bytes",
            file_size, count, chunk_size
        ))
    })?;
    Ok(ChunkPlan {
        file_size,
        chunk_size,
        chunk_count,
    })
}

impl ChunkPlan {
    /// Length of chunk `index` (0-based).
    pub fn chunk_len(&self, index: u32) -> u64 {
        let offset = index as u64 * self.chunk_size as u64;
        self.file_size
            .saturating_sub(offset)
            .min(self.chunk_size as u64)
    }

    pub fn chunk_sizes(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.chunk_count).map(move |i| self.chunk_len(i))
    }
}

/// Client-side bookkeeping for one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    pub file_size: u64,
    pub chunk_count: u32,
    pub bytes_received: u64,
}

impl TransferState {
    pub fn new(plan: &ChunkPlan) -> Self {
        Self {
            file_size: plan.file_size,
            chunk_count: plan.chunk_count,
            bytes_received: 0,
        }
    }

    /// Account for `n` more bytes. Never lets the total pass `file_size`.
    pub fn record(&mut self, n: u64) -> Result<()> {
        let total = self.bytes_received + n;
        if total > self.file_size {
            return Err(Error::SizeMismatch {
                expected: self.file_size,
                received: total,
            });
        }
        self.bytes_received = total;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_received == self.file_size
    }
}

/// Snapshot passed to a [`ProgressObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub name: String,
    /// 0 for the initial notification, then 1..=chunk_count
    pub chunk_index: u32,
    pub chunk_count: u32,
    pub bytes_so_far: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            if self.chunk_index >= self.chunk_count {
                1.0
            } else {
                0.0
            }
        } else {
            self.bytes_so_far as f64 / self.total_bytes as f64
        }
    }
}

/// Receives progress notifications: once at transfer start, then after every chunk.
pub trait ProgressObserver: Send {
    fn on_progress(&mut self, progress: &TransferProgress);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&TransferProgress) + Send,
{
    fn on_progress(&mut self, progress: &TransferProgress) {
        self(progress)
    }
}

pub struct NoProgress;
impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _progress: &TransferProgress) {}
}

/// A served file opened and sized, ready to stream.
pub struct OutgoingFile {
    file: File,
    name: String,
    size: u64,
}

impl OutgoingFile {
    pub async fn open(path: &Path, name: &str) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let md = file.metadata().await?;
        if !md.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            file,
            name: name.to_string(),
            size: md.len(),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Send `FILE_INFO` and then every chunk of `outgoing`.
///
/// Chunks follow the header without any acknowledgement. An empty file still
/// produces one (empty) payload write. If the file yields fewer bytes than
/// advertised the stream can no longer be framed and an error is returned;
/// the caller must drop the connection.
pub async fn send_file<S>(
    ls: &mut LineStream<S>,
    mut outgoing: OutgoingFile,
    chunk_size: u32,
) -> Result<ChunkPlan>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let plan = chunking_plan(outgoing.size, chunk_size)?;
    let header = Response::FileInfo {
        name: outgoing.name.clone(),
        size: plan.file_size,
        chunk_count: plan.chunk_count,
    };
    ls.write_line(&header.to_string()).await?;

    let mut buf = vec![0u8; (chunk_size as u64).min(plan.file_size) as usize];
    for len in plan.chunk_sizes() {
        let len = len as usize;
        outgoing.file.read_exact(&mut buf[..len]).await?;
        ls.write_bytes(&buf[..len]).await?;
    }
    ls.flush().await?;
    Ok(plan)
}

/// Receive the payload announced by a `FILE_INFO` header into `dest`.
///
/// Bytes are written to a temporary file next to `dest` as each chunk
/// arrives; it is renamed to `dest` only once the full advertised size has
/// been received. On any failure the temporary file is removed, so `dest`
/// never holds a truncated download.
pub async fn receive_file<S>(
    ls: &mut LineStream<S>,
    name: &str,
    file_size: u64,
    chunk_count: u32,
    chunk_size: u32,
    dest: &Path,
    observer: &mut dyn ProgressObserver,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let plan = chunking_plan(file_size, chunk_size)?;
    if plan.chunk_count != chunk_count {
        return Err(Error::protocol(format!(
            "server announced {} chunks for {} bytes, expected {}",
            chunk_count, file_size, plan.chunk_count
        )));
    }

    let dir = dest
        .parent()
        .map(Path::to_path_buf)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&dir).await?;
    // `tmp` owns the path (removed on drop); payload goes through `out`.
    let tmp = tempfile::Builder::new()
        .prefix(".chunkwire-")
        .suffix(".part")
        .tempfile_in(&dir)?;
    let mut out = File::from_std(tmp.reopen()?);

    let mut state = TransferState::new(&plan);
    let mut progress = TransferProgress {
        name: name.to_string(),
        chunk_index: 0,
        chunk_count: plan.chunk_count,
        bytes_so_far: 0,
        total_bytes: plan.file_size,
    };
    observer.on_progress(&progress);

    for (i, len) in plan.chunk_sizes().enumerate() {
        let chunk = ls.read_chunk(len as usize).await?;
        out.write_all(&chunk).await?;
        state.record(chunk.len() as u64)?;
        progress.chunk_index = i as u32 + 1;
        progress.bytes_so_far = state.bytes_received;
        observer.on_progress(&progress);
    }

    if !state.is_complete() {
        return Err(Error::SizeMismatch {
            expected: state.file_size,
            received: state.bytes_received,
        });
    }
    out.flush().await?;
    drop(out);
    tmp.persist(dest).map_err(|e| Error::Io(e.error))?;
    Ok(state.bytes_received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::CHUNK_SIZE;
    use tempfile::TempDir;
    use tokio::io::duplex;

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_chunking_plan_zero_size() {
        let plan = chunking_plan(0, CHUNK_SIZE).unwrap();
        assert_eq!(plan.chunk_count, 1);
        assert_eq!(plan.chunk_sizes().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_chunking_plan_sizes_sum_to_file_size() {
        let cs = 16u32;
        for size in 0..200u64 {
            let plan = chunking_plan(size, cs).unwrap();
            let sizes: Vec<u64> = plan.chunk_sizes().collect();
            assert_eq!(sizes.len() as u32, plan.chunk_count);
            assert_eq!(sizes.iter().sum::<u64>(), size, "size {}", size);
            if size > 0 {
                assert_eq!(plan.chunk_count as u64, (size + 15) / 16);
                assert!(sizes[..sizes.len() - 1].iter().all(|s| *s == 16));
                assert!(*sizes.last().unwrap() > 0);
            }
        }
    }

    #[test]
    fn test_chunking_plan_boundaries() {
        let cs = CHUNK_SIZE as u64;
        assert_eq!(chunking_plan(1, CHUNK_SIZE).unwrap().chunk_count, 1);
        assert_eq!(chunking_plan(cs - 1, CHUNK_SIZE).unwrap().chunk_count, 1);
        assert_eq!(chunking_plan(cs, CHUNK_SIZE).unwrap().chunk_count, 1);
        let plan = chunking_plan(cs + 1, CHUNK_SIZE).unwrap();
        assert_eq!(plan.chunk_count, 2);
        assert_eq!(plan.chunk_len(1), 1);
        let plan = chunking_plan(2 * cs + 50_000, CHUNK_SIZE).unwrap();
        assert_eq!(plan.chunk_count, 3);
        assert_eq!(plan.chunk_len(2), 50_000);
    }

    #[test]
    fn test_chunking_plan_rejects_bad_input() {
        assert!(chunking_plan(10, 0).is_err());
        assert!(chunking_plan(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_transfer_state_invariant() {
        let plan = chunking_plan(10, 4).unwrap();
        let mut st = TransferState::new(&plan);
        st.record(4).unwrap();
        st.record(4).unwrap();
        assert!(!st.is_complete());
        let err = st.record(4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert_eq!(st.bytes_received, 8);
        st.record(2).unwrap();
        assert!(st.is_complete());
    }

    #[tokio::test]
    async fn test_send_file_writes_header_then_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let body = pattern(40);
        std::fs::write(&path, &body).unwrap();

        let (a, mut b) = duplex(4096);
        let mut ls = LineStream::new(a);
        let out = OutgoingFile::open(&path, "data.bin").await.unwrap();
        let plan = send_file(&mut ls, out, 16).await.unwrap();
        assert_eq!(plan.chunk_count, 3);
        drop(ls);

        let mut got = Vec::new();
        b.read_to_end(&mut got).await.unwrap();
        let mut expected = b"FILE_INFO<|>data.bin<|>40<|>3\n".to_vec();
        expected.extend_from_slice(&body);
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_send_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let (a, mut b) = duplex(256);
        let mut ls = LineStream::new(a);
        let out = OutgoingFile::open(&path, "empty").await.unwrap();
        send_file(&mut ls, out, CHUNK_SIZE).await.unwrap();
        drop(ls);

        let mut got = Vec::new();
        b.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"FILE_INFO<|>empty<|>0<|>1\n");
    }

    #[tokio::test]
    async fn test_send_file_that_shrank_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shrinks.bin");
        std::fs::write(&path, pattern(40)).unwrap();

        let (a, _b) = duplex(4096);
        let mut ls = LineStream::new(a);
        let out = OutgoingFile::open(&path, "shrinks.bin").await.unwrap();
        assert_eq!(out.size(), 40);
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(10)
            .unwrap();
        let err = send_file(&mut ls, out, 16).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn test_receive_with_payload_already_buffered() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.bin");
        let body = pattern(37);

        let (a, mut b) = duplex(4096);
        let mut wire = b"FILE_INFO<|>out.bin<|>37<|>3\n".to_vec();
        wire.extend_from_slice(&body);
        b.write_all(&wire).await.unwrap();

        let mut ls = LineStream::new(a);
        let line = ls.read_line().await.unwrap();
        assert_eq!(
            Response::parse(&line).unwrap(),
            Response::FileInfo {
                name: "out.bin".into(),
                size: 37,
                chunk_count: 3
            }
        );
        assert_eq!(ls.buffered().len(), 37);

        let mut seen = Vec::new();
        let mut obs = |p: &TransferProgress| seen.push((p.chunk_index, p.bytes_so_far));
        let n = receive_file(&mut ls, "out.bin", 37, 3, 16, &dest, &mut obs)
            .await
            .unwrap();
        assert_eq!(n, 37);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert_eq!(seen, vec![(0, 0), (1, 16), (2, 32), (3, 37)]);
    }

    #[tokio::test]
    async fn test_receive_empty_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("empty");
        let (a, _b) = duplex(64);
        let mut ls = LineStream::new(a);
        let mut calls = 0;
        let mut obs = |p: &TransferProgress| {
            calls += 1;
            if p.chunk_index == 1 {
                assert_eq!(p.fraction(), 1.0);
            }
        };
        let n = receive_file(&mut ls, "empty", 0, 1, CHUNK_SIZE, &dest, &mut obs)
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(calls, 2);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_receive_rejects_inconsistent_chunk_count() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("x");
        let (a, _b) = duplex(64);
        let mut ls = LineStream::new(a);
        let err = receive_file(&mut ls, "x", 100, 1, 16, &dest, &mut NoProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_receive_closed_mid_transfer_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("cut.bin");
        let (a, mut b) = duplex(4096);
        b.write_all(&pattern(20)).await.unwrap();
        drop(b);

        let mut ls = LineStream::new(a);
        let err = receive_file(&mut ls, "cut.bin", 50, 4, 16, &dest, &mut NoProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
