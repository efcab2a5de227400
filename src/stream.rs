//! Pipeline stages: byte sources that can be stacked into decode chains.
//!
//! Every stage exclusively owns its upstream, so dropping the outermost
//! handle drops the whole chain. Stages over borrowed data (the file image,
//! a caller's content stream) borrow instead of owning, which is how "keep
//! the upstream alive past this stage" is expressed here.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::crypt::Decoder;
use crate::enc::{self, Compression, Jbig2Globals};
use crate::error::*;
use crate::object::{GenNr, ObjNr};

/// A byte source in a decode pipeline.
///
/// `read` returns zero only at end of stream. `tell` reports the number of
/// bytes handed out so far; decode stages may buffer internally but never
/// reorder.
pub trait StreamSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn tell(&self) -> u64;
}

impl<'a, S: StreamSource + ?Sized> StreamSource for &'a mut S {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }
    fn tell(&self) -> u64 {
        (**self).tell()
    }
}

/// View over a borrowed byte slice; the length-bounded raw frame over the
/// file image.
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}
impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> SliceReader<'a> {
        SliceReader { data, pos: 0 }
    }
}
impl<'a> StreamSource for SliceReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos .. self.pos + n]);
        self.pos += n;
        Ok(n)
    }
    fn tell(&self) -> u64 {
        self.pos as u64
    }
}

/// Reader over a shared buffer, for xref entries with pre-decoded contents.
/// Cloning the `Arc` adds an owner; the entry keeps its copy.
pub struct BufferReader {
    data: Arc<[u8]>,
    pos: usize,
}
impl BufferReader {
    pub fn new(data: Arc<[u8]>) -> BufferReader {
        BufferReader { data, pos: 0 }
    }
}
impl StreamSource for BufferReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos .. self.pos + n]);
        self.pos += n;
        Ok(n)
    }
    fn tell(&self) -> u64 {
        self.pos as u64
    }
}

/// Reads at most `limit` bytes from the upstream's current position. Used to
/// frame inline streams, whose payload has no `endstream` terminator.
pub struct TakeReader<'a> {
    upstream: Box<dyn StreamSource + 'a>,
    remaining: usize,
    pos: u64,
}
impl<'a> TakeReader<'a> {
    pub fn new(upstream: Box<dyn StreamSource + 'a>, limit: usize) -> TakeReader<'a> {
        TakeReader { upstream, remaining: limit, pos: 0 }
    }
}
impl<'a> StreamSource for TakeReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = buf.len().min(self.remaining);
        if want == 0 {
            return Ok(0);
        }
        let n = self.upstream.read(&mut buf[..want])?;
        self.remaining -= n;
        self.pos += n as u64;
        Ok(n)
    }
    fn tell(&self) -> u64 {
        self.pos
    }
}

/// Streams its parts in order. With `pad`, a newline is emitted after each
/// part so tokens cannot run together across part boundaries.
pub struct ConcatReader<'a> {
    parts: Vec<Box<dyn StreamSource + 'a>>,
    current: usize,
    pad: bool,
    pad_pending: bool,
    pos: u64,
}
impl<'a> ConcatReader<'a> {
    pub fn new(pad: bool) -> ConcatReader<'a> {
        ConcatReader {
            parts: Vec::new(),
            current: 0,
            pad,
            pad_pending: false,
            pos: 0,
        }
    }
    pub fn push(&mut self, part: Box<dyn StreamSource + 'a>) {
        self.parts.push(part);
    }
}
impl<'a> StreamSource for ConcatReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pad_pending {
                self.pad_pending = false;
                buf[0] = b'\n';
                self.pos += 1;
                return Ok(1);
            }
            match self.parts.get_mut(self.current) {
                None => return Ok(0),
                Some(part) => {
                    let n = part.read(buf)?;
                    if n > 0 {
                        self.pos += n as u64;
                        return Ok(n);
                    }
                    self.current += 1;
                    self.pad_pending = self.pad;
                }
            }
        }
    }
    fn tell(&self) -> u64 {
        self.pos
    }
}

/// Copies everything read through it into a side buffer the caller holds on
/// to. Used to capture still-compressed bytes while a decode stage above
/// consumes them.
pub struct Leecher<'a> {
    upstream: Box<dyn StreamSource + 'a>,
    sink: Rc<RefCell<Vec<u8>>>,
}
impl<'a> Leecher<'a> {
    pub fn new(upstream: Box<dyn StreamSource + 'a>, sink: Rc<RefCell<Vec<u8>>>) -> Leecher<'a> {
        Leecher { upstream, sink }
    }
}
impl<'a> StreamSource for Leecher<'a> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.upstream.read(buf)?;
        self.sink.borrow_mut().extend_from_slice(&buf[..n]);
        Ok(n)
    }
    fn tell(&self) -> u64 {
        self.upstream.tell()
    }
}

/// What a `FilterStage` does to the bytes passing through it.
pub enum StageKind<'a> {
    AsciiHex,
    Ascii85,
    /// The generic decompressor, driven by a resolved descriptor.
    Decomp(Compression),
    Jbig2(Option<Arc<Jbig2Globals>>),
    /// Default per-object decryption, keyed by the original object id.
    Decrypt { decoder: &'a Decoder, num: ObjNr, gen: GenNr },
    /// One of the document's named crypt filters.
    CryptFilter { decoder: &'a Decoder, name: String, num: ObjNr, gen: GenNr },
}

/// A deferred decode stage: drains its upstream on the first read, applies
/// the filter, then serves the decoded bytes in order.
pub struct FilterStage<'a> {
    upstream: Box<dyn StreamSource + 'a>,
    kind: StageKind<'a>,
    decoded: Option<Vec<u8>>,
    pos: usize,
}
impl<'a> FilterStage<'a> {
    pub fn new(upstream: Box<dyn StreamSource + 'a>, kind: StageKind<'a>) -> FilterStage<'a> {
        FilterStage {
            upstream,
            kind,
            decoded: None,
            pos: 0,
        }
    }
    fn fill(&mut self) -> Result<()> {
        let mut raw = read_all(&mut *self.upstream, 0)?;
        let out = match self.kind {
            StageKind::AsciiHex => enc::decode_hex(&raw)?,
            StageKind::Ascii85 => enc::decode_85(&raw)?,
            StageKind::Decomp(ref params) => enc::decompress(&raw, params)?,
            StageKind::Jbig2(ref globals) => enc::jbig2_decode(&raw, globals.as_deref())?,
            StageKind::Decrypt { decoder, num, gen } => {
                decoder.decrypt(num, gen, &mut raw)?.to_vec()
            }
            StageKind::CryptFilter { decoder, ref name, num, gen } => {
                decoder.decrypt_with_filter(name, num, gen, &mut raw)?.to_vec()
            }
        };
        self.decoded = Some(out);
        Ok(())
    }
}
impl<'a> StreamSource for FilterStage<'a> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.decoded.is_none() {
            self.fill()?;
        }
        let data = match self.decoded {
            Some(ref data) => data,
            None => return Ok(0),
        };
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos .. self.pos + n]);
        self.pos += n;
        Ok(n)
    }
    fn tell(&self) -> u64 {
        self.pos as u64
    }
}

// Initial allocations follow the caller's estimate, but a hostile /Length
// must not reserve unbounded memory up front.
const MAX_PREALLOC: usize = 8 << 20;

/// Drain a stream into a buffer. `size_hint` is a capacity hint only; the
/// buffer grows as needed and is never clipped to it.
pub fn read_all(stm: &mut dyn StreamSource, size_hint: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(size_hint.min(MAX_PREALLOC));
    let mut chunk = [0; 4096];
    loop {
        let n = stm.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf)
}

/// Like `read_all`, but read errors end the stream instead of failing it:
/// the bytes gathered so far are returned and `truncated` is set.
pub fn read_best(stm: &mut dyn StreamSource, size_hint: usize, truncated: &mut bool) -> Vec<u8> {
    *truncated = false;
    let mut buf = Vec::with_capacity(size_hint.min(MAX_PREALLOC));
    let mut chunk = [0; 4096];
    loop {
        match stm.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                warn!("read error, stream truncated: {}", e);
                *truncated = true;
                break;
            }
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailAfter {
        data: Vec<u8>,
        pos: usize,
    }
    impl StreamSource for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            if self.pos == self.data.len() {
                bail!("broken source");
            }
            let n = buf.len().min(self.data.len() - self.pos).min(1);
            buf[..n].copy_from_slice(&self.data[self.pos .. self.pos + n]);
            self.pos += n;
            Ok(n)
        }
        fn tell(&self) -> u64 {
            self.pos as u64
        }
    }

    #[test]
    fn slice_and_take() {
        let data = b"0123456789";
        let mut inner = SliceReader::new(data);
        let mut tmp = [0; 4];
        inner.read(&mut tmp).unwrap();
        assert_eq!(inner.tell(), 4);

        // take starts at the current position
        let mut take = TakeReader::new(Box::new(&mut inner), 3);
        assert_eq!(read_all(&mut take, 0).unwrap(), b"456");
        assert_eq!(take.tell(), 3);
        drop(take);

        // the upstream survives the take and continues where it left off
        assert_eq!(read_all(&mut inner, 0).unwrap(), b"789");
    }

    #[test]
    fn take_clamps_at_upstream_end() {
        let data = b"ab";
        let mut inner = SliceReader::new(data);
        let mut take = TakeReader::new(Box::new(&mut inner), 10);
        assert_eq!(read_all(&mut take, 0).unwrap(), b"ab");
    }

    #[test]
    fn concat_pads_parts() {
        let a = b"first";
        let b = b"second";
        let mut concat = ConcatReader::new(true);
        concat.push(Box::new(SliceReader::new(a)));
        concat.push(Box::new(SliceReader::new(b)));
        assert_eq!(read_all(&mut concat, 0).unwrap(), b"first\nsecond\n");

        let mut plain = ConcatReader::new(false);
        plain.push(Box::new(SliceReader::new(a)));
        plain.push(Box::new(SliceReader::new(b)));
        assert_eq!(read_all(&mut plain, 0).unwrap(), b"firstsecond");
    }

    #[test]
    fn leecher_captures_reads() {
        let sink = Rc::new(RefCell::new(Vec::new()));
        let mut leech = Leecher::new(Box::new(SliceReader::new(b"payload")), Rc::clone(&sink));
        assert_eq!(read_all(&mut leech, 0).unwrap(), b"payload");
        assert_eq!(&*sink.borrow(), b"payload");
    }

    #[test]
    fn filter_stage_decodes_lazily() {
        let mut stage = FilterStage::new(
            Box::new(SliceReader::new(b"48656c6c6f>")),
            StageKind::AsciiHex,
        );
        assert_eq!(stage.tell(), 0);
        assert_eq!(read_all(&mut stage, 0).unwrap(), b"Hello");
        assert_eq!(stage.tell(), 5);
    }

    #[test]
    fn read_best_tolerates_errors() {
        let mut stm = FailAfter { data: b"abc".to_vec(), pos: 0 };
        let mut truncated = false;
        assert_eq!(read_best(&mut stm, 0, &mut truncated), b"abc");
        assert!(truncated);

        let mut stm = FailAfter { data: b"abc".to_vec(), pos: 0 };
        assert!(read_all(&mut stm, 0).is_err());
    }
}
