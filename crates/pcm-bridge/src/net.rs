//! TCP ingestion: accept clients and forward their bytes as sample-aligned chunks.
//!
//! Sockets are read on background threads; everything they produce is sent as [`Ingest`]
//! messages to the single thread that owns the player.

use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::Sender;

const READ_BUF_BYTES: usize = 16 * 1024;

/// Messages delivered to the playback thread.
#[derive(Debug)]
pub(crate) enum Ingest {
    Connected { id: u64, peer: SocketAddr },
    Chunk { id: u64, bytes: Vec<u8> },
    Closed { id: u64, error: Option<String> },
    Shutdown,
}

/// Re-chunks a byte stream on sample boundaries.
///
/// Socket reads split data arbitrarily; a sample cut in half is carried over to the next read
/// so that every emitted chunk is a whole number of samples.
#[derive(Debug)]
pub(crate) struct SampleChunker {
    sample_width: usize,
    carry: Vec<u8>,
}

impl SampleChunker {
    pub(crate) fn new(sample_width: usize) -> Self {
        Self {
            sample_width: sample_width.max(1),
            carry: Vec::with_capacity(sample_width),
        }
    }

    /// Append `data` and return the aligned prefix, if any.
    pub(crate) fn push(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        let total = self.carry.len() + data.len();
        let aligned = total - total % self.sample_width;
        if aligned == 0 {
            self.carry.extend_from_slice(data);
            return None;
        }
        let mut out = Vec::with_capacity(aligned);
        out.append(&mut self.carry);
        let take = aligned - out.len();
        out.extend_from_slice(&data[..take]);
        self.carry.extend_from_slice(&data[take..]);
        Some(out)
    }

    /// Bytes held back waiting for the rest of a sample.
    pub(crate) fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Accept connections forever, evicting the previous client when a new one arrives.
pub(crate) fn spawn_acceptor(
    listener: TcpListener,
    sample_width: usize,
    tx: Sender<Ingest>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let current: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));
        let mut next_id = 0u64;
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("accept error: {e}");
                    continue;
                }
            };
            let peer = match stream.peer_addr() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("peer address unavailable: {e}");
                    continue;
                }
            };
            if let Ok(mut guard) = current.lock() {
                if let Some(prev) = guard.take() {
                    let _ = prev.shutdown(Shutdown::Both);
                    tracing::info!("previous client evicted");
                }
                if let Ok(clone) = stream.try_clone() {
                    *guard = Some(clone);
                }
            }

            next_id += 1;
            let id = next_id;
            if tx.send(Ingest::Connected { id, peer }).is_err() {
                return;
            }
            let tx = tx.clone();
            thread::spawn(move || read_client(id, stream, sample_width, tx));
        }
    })
}

/// Read one client until EOF or error, forwarding aligned chunks.
fn read_client(id: u64, mut stream: TcpStream, sample_width: usize, tx: Sender<Ingest>) {
    let mut chunker = SampleChunker::new(sample_width);
    let mut buf = vec![0u8; READ_BUF_BYTES];
    let error = loop {
        match stream.read(&mut buf) {
            Ok(0) => break None,
            Ok(n) => {
                if let Some(bytes) = chunker.push(&buf[..n]) {
                    if tx.send(Ingest::Chunk { id, bytes }).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Some(e.to_string()),
        }
    };
    if chunker.pending() > 0 {
        tracing::debug!(bytes = chunker.pending(), "discarding trailing partial sample");
    }
    let _ = tx.send(Ingest::Closed { id, error });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn chunker_passes_aligned_reads_through() {
        let mut c = SampleChunker::new(2);
        assert_eq!(c.push(&[1, 2, 3, 4]), Some(vec![1, 2, 3, 4]));
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn chunker_carries_split_samples() {
        let mut c = SampleChunker::new(4);
        assert_eq!(c.push(&[1, 2, 3, 4, 5, 6]), Some(vec![1, 2, 3, 4]));
        assert_eq!(c.pending(), 2);
        assert_eq!(c.push(&[7]), None);
        assert_eq!(c.pending(), 3);
        assert_eq!(c.push(&[8, 9]), Some(vec![5, 6, 7, 8]));
        assert_eq!(c.pending(), 1);
    }

    #[test]
    fn chunker_output_is_always_aligned() {
        let data: Vec<u8> = (0..=255).collect();
        for width in [1usize, 2, 4] {
            let mut c = SampleChunker::new(width);
            let mut out = Vec::new();
            for piece in data.chunks(7) {
                if let Some(chunk) = c.push(piece) {
                    assert_eq!(chunk.len() % width, 0);
                    out.extend(chunk);
                }
            }
            assert_eq!(out.len() + c.pending(), data.len());
            assert_eq!(&out[..], &data[..out.len()]);
        }
    }

    #[test]
    fn acceptor_forwards_client_bytes_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let _acceptor = spawn_acceptor(listener, 2, tx);

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&[1, 2, 3]).unwrap();
        client.write_all(&[4, 5]).unwrap();
        drop(client);

        let timeout = Duration::from_secs(5);
        let id = match rx.recv_timeout(timeout).unwrap() {
            Ingest::Connected { id, .. } => id,
            other => panic!("unexpected message: {other:?}"),
        };
        let mut received = Vec::new();
        loop {
            match rx.recv_timeout(timeout).unwrap() {
                Ingest::Chunk { id: chunk_id, bytes } => {
                    assert_eq!(chunk_id, id);
                    assert_eq!(bytes.len() % 2, 0);
                    received.extend(bytes);
                }
                Ingest::Closed { id: closed_id, error } => {
                    assert_eq!(closed_id, id);
                    assert!(error.is_none());
                    break;
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
        assert_eq!(received, vec![1, 2, 3, 4]);
    }
}
