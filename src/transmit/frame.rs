//! Payload chunk framing.
//!
//! chunk      = [stored_len u32 > 0][raw_len u32][crc32 u32 of stored bytes] + stored bytes
//! terminator = [0 u32][0 u32][0 u32]
//!
//! FrameWriter/FrameReader adapt the engine's opaque byte stream to/from chunks. Both record the
//! first fault on the outer side (sink/source) so the caller can report that instead of the
//! engine's secondary "broken pipe"-style failure.

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use std::io::{self, Read, Write};

use crate::config::StreamCodec;
use crate::consts::{CHUNK_HDR_SIZE, MAX_CHUNK_SIZE};
use crate::error::{Result, VolError};

/// Stored size allowed for a compressed chunk of `raw` bytes (incompressible data grows a bit).
fn stored_bound(raw: usize) -> usize {
    raw + raw / 128 + 1024
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(bytes);
    h.finalize()
}

fn copy_err(e: &io::Error) -> io::Error {
    io::Error::new(e.kind(), e.to_string())
}

// ----- writer -----

pub struct FrameWriter<'a> {
    sink: &'a mut dyn Write,
    codec: StreamCodec,
    zstd_level: i32,
    chunk_size: usize,
    buf: Vec<u8>,
    raw_bytes: u64,
    wire_bytes: u64,
    chunks: u64,
    fault: Option<io::Error>,
}

impl<'a> FrameWriter<'a> {
    pub fn new(
        sink: &'a mut dyn Write,
        codec: StreamCodec,
        zstd_level: i32,
        chunk_size: usize,
    ) -> Self {
        let chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        Self {
            sink,
            codec,
            zstd_level,
            chunk_size,
            buf: Vec::with_capacity(chunk_size),
            raw_bytes: 0,
            wire_bytes: 0,
            chunks: 0,
            fault: None,
        }
    }

    /// Payload bytes accepted so far (before compression).
    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes
    }

    /// Bytes written to the sink so far (chunk headers included).
    pub fn wire_bytes(&self) -> u64 {
        self.wire_bytes
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// First sink error, if any.
    pub fn take_fault(&mut self) -> Option<io::Error> {
        self.fault.take()
    }

    fn sink_write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Some(e) = &self.fault {
            return Err(copy_err(e));
        }
        match self.sink.write_all(bytes) {
            Ok(()) => {
                self.wire_bytes += bytes.len() as u64;
                Ok(())
            }
            Err(e) => {
                let ret = copy_err(&e);
                self.fault = Some(e);
                Err(ret)
            }
        }
    }

    fn emit_chunk(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let raw = std::mem::take(&mut self.buf);
        let compressed;
        let stored: &[u8] = match self.codec {
            StreamCodec::None => &raw,
            StreamCodec::Zstd => {
                compressed = zstd::bulk::compress(&raw, self.zstd_level)?;
                &compressed
            }
        };
        let mut hdr = [0u8; CHUNK_HDR_SIZE];
        LittleEndian::write_u32(&mut hdr[0..4], stored.len() as u32);
        LittleEndian::write_u32(&mut hdr[4..8], raw.len() as u32);
        LittleEndian::write_u32(&mut hdr[8..12], crc32(stored));
        self.sink_write(&hdr)?;
        self.sink_write(stored)?;
        self.chunks += 1;
        self.buf = raw;
        self.buf.clear();
        Ok(())
    }

    /// Flush the last partial chunk and write the terminator.
    pub fn finish(mut self) -> Result<FrameStats> {
        let mut res = self.emit_chunk();
        if res.is_ok() {
            res = self.sink_write(&[0u8; CHUNK_HDR_SIZE]);
        }
        if res.is_ok() {
            res = self.sink.flush();
        }
        if let Some(e) = self.fault.take() {
            return Err(VolError::io("write stream payload", e));
        }
        res.map_err(|e| VolError::io("finish stream payload", e))?;
        Ok(FrameStats {
            raw_bytes: self.raw_bytes,
            wire_bytes: self.wire_bytes,
            chunks: self.chunks,
        })
    }
}

impl Write for FrameWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        self.raw_bytes += n as u64;
        if self.buf.len() >= self.chunk_size {
            self.emit_chunk()?;
        }
        Ok(n)
    }

    /// Chunks are emitted when full; flush only pushes what is already framed.
    fn flush(&mut self) -> io::Result<()> {
        if let Some(e) = &self.fault {
            return Err(copy_err(e));
        }
        self.sink.flush()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub raw_bytes: u64,
    pub wire_bytes: u64,
    pub chunks: u64,
}

// ----- reader -----

pub struct FrameReader<'a> {
    source: &'a mut dyn Read,
    codec: StreamCodec,
    cur: Vec<u8>,
    pos: usize,
    done: bool,
    raw_bytes: u64,
    wire_bytes: u64,
    fault: Option<VolError>,
}

impl<'a> FrameReader<'a> {
    pub fn new(source: &'a mut dyn Read, codec: StreamCodec) -> Self {
        Self {
            source,
            codec,
            cur: Vec::new(),
            pos: 0,
            done: false,
            raw_bytes: 0,
            wire_bytes: 0,
            fault: None,
        }
    }

    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes
    }

    pub fn wire_bytes(&self) -> u64 {
        self.wire_bytes
    }

    /// First framing/source failure seen while the engine was reading, if any.
    pub fn take_fault(&mut self) -> Option<VolError> {
        self.fault.take()
    }

    fn read_source(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        match self.source.read_exact(buf) {
            Ok(()) => {
                self.wire_bytes += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(VolError::CorruptStream(
                format!("truncated payload ({})", what),
            )),
            Err(e) => Err(VolError::io(format!("read stream payload ({})", what), e)),
        }
    }

    /// Load the next chunk into `cur`. Sets `done` on the terminator.
    fn next_chunk(&mut self) -> Result<()> {
        let mut hdr = [0u8; CHUNK_HDR_SIZE];
        self.read_source(&mut hdr, "chunk header")?;
        let stored_len = LittleEndian::read_u32(&hdr[0..4]) as usize;
        let raw_len = LittleEndian::read_u32(&hdr[4..8]) as usize;
        let crc = LittleEndian::read_u32(&hdr[8..12]);

        if stored_len == 0 {
            if raw_len != 0 || crc != 0 {
                return Err(VolError::CorruptStream("malformed terminator".into()));
            }
            self.done = true;
            self.cur.clear();
            self.pos = 0;
            return Ok(());
        }
        if raw_len == 0 || raw_len > MAX_CHUNK_SIZE {
            return Err(VolError::CorruptStream(format!(
                "chunk raw length {} out of range",
                raw_len
            )));
        }
        let stored_ok = match self.codec {
            StreamCodec::None => stored_len == raw_len,
            StreamCodec::Zstd => stored_len <= stored_bound(raw_len),
        };
        if !stored_ok {
            return Err(VolError::CorruptStream(format!(
                "chunk stored length {} inconsistent with raw length {}",
                stored_len, raw_len
            )));
        }

        let mut stored = vec![0u8; stored_len];
        self.read_source(&mut stored, "chunk body")?;
        if crc32(&stored) != crc {
            return Err(VolError::CorruptStream("chunk checksum mismatch".into()));
        }
        let raw = match self.codec {
            StreamCodec::None => stored,
            StreamCodec::Zstd => zstd::bulk::decompress(&stored, raw_len).map_err(|e| {
                VolError::CorruptStream(format!("chunk decompression failed: {}", e))
            })?,
        };
        if raw.len() != raw_len {
            return Err(VolError::CorruptStream(format!(
                "chunk decoded to {} bytes, header says {}",
                raw.len(),
                raw_len
            )));
        }
        self.cur = raw;
        self.pos = 0;
        Ok(())
    }

    /// Confirm the payload ended exactly at the terminator.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(f) = self.fault.take() {
            return Err(f);
        }
        if self.pos < self.cur.len() {
            return Err(VolError::CorruptStream(
                "payload continues past the end of the engine stream".into(),
            ));
        }
        if !self.done {
            self.next_chunk()?;
            if !self.done {
                return Err(VolError::CorruptStream(
                    "payload continues past the end of the engine stream".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Read for FrameReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if let Some(f) = &self.fault {
            return Err(io::Error::new(io::ErrorKind::Other, f.to_string()));
        }
        while self.pos >= self.cur.len() {
            if self.done {
                return Ok(0);
            }
            if let Err(e) = self.next_chunk() {
                let ret = io::Error::new(io::ErrorKind::Other, e.to_string());
                self.fault = Some(e);
                return Err(ret);
            }
        }
        let n = out.len().min(self.cur.len() - self.pos);
        out[..n].copy_from_slice(&self.cur[self.pos..self.pos + n]);
        self.pos += n;
        self.raw_bytes += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8).collect()
    }

    fn frame(data: &[u8], codec: StreamCodec, chunk: usize) -> (Vec<u8>, FrameStats) {
        let mut wire = Vec::new();
        let stats = {
            let mut w = FrameWriter::new(&mut wire, codec, 3, chunk);
            w.write_all(data).unwrap();
            w.finish().unwrap()
        };
        (wire, stats)
    }

    #[test]
    fn multi_chunk_payload_reads_back_for_both_codecs() {
        let data = sample(10_000);
        for codec in [StreamCodec::None, StreamCodec::Zstd] {
            let (wire, stats) = frame(&data, codec, 4096);
            assert_eq!(stats.raw_bytes, data.len() as u64);
            assert_eq!(stats.chunks, 3);
            assert_eq!(stats.wire_bytes, wire.len() as u64);

            let mut src = wire.as_slice();
            let mut r = FrameReader::new(&mut src, codec);
            let mut got = Vec::new();
            r.read_to_end(&mut got).unwrap();
            assert_eq!(got, data);
            r.finish().unwrap();
            assert_eq!(r.raw_bytes(), data.len() as u64);
        }
    }

    #[test]
    fn empty_payload_is_just_a_terminator() {
        let (wire, stats) = frame(&[], StreamCodec::None, 4096);
        assert_eq!(wire, vec![0u8; CHUNK_HDR_SIZE]);
        assert_eq!(stats.chunks, 0);
    }

    #[test]
    fn missing_terminator_is_corrupt_on_finish() {
        let (mut wire, _) = frame(&sample(100), StreamCodec::None, 4096);
        wire.truncate(wire.len() - CHUNK_HDR_SIZE);
        let mut src = wire.as_slice();
        let mut r = FrameReader::new(&mut src, StreamCodec::None);
        let mut got = vec![0u8; 100];
        r.read_exact(&mut got).unwrap();
        let err = r.finish().unwrap_err();
        assert_eq!(err.kind(), "CorruptStream");
    }

    #[test]
    fn checksum_mismatch_is_recorded_as_fault() {
        let (mut wire, _) = frame(&sample(100), StreamCodec::None, 4096);
        wire[CHUNK_HDR_SIZE + 10] ^= 0xFF;
        let mut src = wire.as_slice();
        let mut r = FrameReader::new(&mut src, StreamCodec::None);
        let mut got = Vec::new();
        assert!(r.read_to_end(&mut got).is_err());
        match r.take_fault() {
            Some(VolError::CorruptStream(m)) => assert!(m.contains("checksum"), "{m}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unread_payload_is_corrupt_on_finish() {
        let (wire, _) = frame(&sample(100), StreamCodec::None, 16);
        let mut src = wire.as_slice();
        let mut r = FrameReader::new(&mut src, StreamCodec::None);
        let mut got = vec![0u8; 20];
        r.read_exact(&mut got).unwrap();
        assert_eq!(r.finish().unwrap_err().kind(), "CorruptStream");
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_failure_is_kept_as_fault() {
        let mut sink = FailingSink;
        let mut w = FrameWriter::new(&mut sink, StreamCodec::None, 3, 8);
        assert!(w.write_all(&sample(64)).is_err());
        let fault = w.take_fault().unwrap();
        assert_eq!(fault.kind(), io::ErrorKind::BrokenPipe);
    }
}
