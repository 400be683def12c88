use std::io::{self, Read, Write};

use arkiv_types::{Error, Result};

/// Sentinel length value terminating a multiplexed stream.
const END_MARKER: u64 = u64::MAX;

/// Writer side of the bulk transfer framing. Each entry is a length-prefixed
/// blob:
///
/// ```text
/// [8 bytes: entry length (little-endian u64)]
/// [N bytes: entry payload]
/// ```
///
/// The stream ends with a length of `u64::MAX`, written by [`finish`].
///
/// [`finish`]: MultiplexedStreamWriter::finish
pub struct MultiplexedStreamWriter<W: Write> {
    inner: W,
}

impl<W: Write> MultiplexedStreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Append one entry.
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        self.inner.write_all(&(payload.len() as u64).to_le_bytes())?;
        self.inner.write_all(payload)?;
        Ok(())
    }

    /// Append one entry of known size, streamed from `reader`. Fails if the
    /// reader yields fewer bytes than announced.
    pub fn append_reader<R: Read>(&mut self, size: u64, reader: &mut R) -> Result<()> {
        self.inner.write_all(&size.to_le_bytes())?;
        let copied = io::copy(&mut reader.take(size), &mut self.inner)?;
        if copied != size {
            return Err(Error::illegal_argument(format!(
                "entry shorter than announced: {copied} of {size} bytes"
            )));
        }
        Ok(())
    }

    /// Write the end marker and hand back the underlying writer, flushed.
    pub fn finish(mut self) -> Result<W> {
        self.inner.write_all(&END_MARKER.to_le_bytes())?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Reader side of the bulk transfer framing. Entries are surfaced one at a
/// time as bounded readers; an entry left partially consumed is drained
/// before the next one is framed.
pub struct MultiplexedStreamReader<R: Read> {
    inner: R,
    pending: u64,
    finished: bool,
}

impl<R: Read> MultiplexedStreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: 0,
            finished: false,
        }
    }

    /// Frame the next entry, or `None` once the end marker is reached. A
    /// stream that ends without the marker is reported as truncated.
    pub fn next_entry(&mut self) -> Result<Option<EntryReader<'_, R>>> {
        self.drain_pending()?;
        if self.finished {
            return Ok(None);
        }
        let mut header = [0u8; 8];
        self.inner
            .read_exact(&mut header)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => {
                    Error::illegal_argument("multiplexed stream truncated before end marker")
                }
                _ => Error::from(e),
            })?;
        let length = u64::from_le_bytes(header);
        if length == END_MARKER {
            self.finished = true;
            return Ok(None);
        }
        self.pending = length;
        Ok(Some(EntryReader { parent: self }))
    }

    /// Verify the stream carries nothing after the end marker.
    pub fn finish(mut self) -> Result<()> {
        self.drain_pending()?;
        if !self.finished {
            return Err(Error::illegal_argument(
                "multiplexed stream closed before end marker",
            ));
        }
        let mut probe = [0u8; 1];
        match self.inner.read(&mut probe)? {
            0 => Ok(()),
            _ => Err(Error::illegal_argument(
                "trailing data after multiplexed stream end marker",
            )),
        }
    }

    fn drain_pending(&mut self) -> Result<()> {
        while self.pending > 0 {
            let skipped = io::copy(
                &mut (&mut self.inner).take(self.pending),
                &mut io::sink(),
            )?;
            if skipped == 0 {
                return Err(Error::illegal_argument(
                    "multiplexed stream truncated mid-entry",
                ));
            }
            self.pending -= skipped;
        }
        Ok(())
    }
}

/// Bounded reader over one multiplexed entry.
pub struct EntryReader<'a, R: Read> {
    parent: &'a mut MultiplexedStreamReader<R>,
}

impl<R: Read> EntryReader<'_, R> {
    /// Bytes of this entry not yet read.
    pub fn remaining(&self) -> u64 {
        self.parent.pending
    }
}

impl<R: Read> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.parent.pending == 0 || buf.is_empty() {
            return Ok(0);
        }
        let capped = buf.len().min(self.parent.pending.min(usize::MAX as u64) as usize);
        let read = self.parent.inner.read(&mut buf[..capped])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "multiplexed stream truncated mid-entry",
            ));
        }
        self.parent.pending -= read as u64;
        Ok(read)
    }
}
