//! Document-level stream access: raw framing, filter chains, buffer loading.
//!
//! The facade comes in two axes: *raw* streams apply only the raw frame
//! (length-bounded, decrypted, still compressed), *decoded* streams run the
//! full filter pipeline; each can be *opened* as a pipeline or *loaded* into
//! a buffer. Image loaders pass a descriptor out-parameter to short-stop the
//! terminal filter and receive still-compressed bytes.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::Backend;
use crate::cache::JBIG2_GLOBALS;
use crate::crypt::Decoder;
use crate::enc::{Compression, Jbig2Globals};
use crate::error::*;
use crate::object::{GenNr, ObjNr, PlainRef, Resolve};
use crate::primitive::{Dictionary, Primitive};
use crate::stream::{
    read_all, read_best, BufferReader, ConcatReader, FilterStage, Leecher, SliceReader, StageKind,
    StreamSource, TakeReader,
};
use crate::xref::{XRefEntry, XRefTable};

/// A byte buffer that is still compressed, along with the descriptor needed
/// to finish decoding it. Produced by the short-stop paths.
#[derive(Debug, Clone)]
pub struct CompressedBuffer {
    pub data: Arc<[u8]>,
    pub params: Compression,
}

static DOC_SERIAL: AtomicU64 = AtomicU64::new(1);

/// One open PDF document: the file image, its cross-reference table and the
/// optional decryption state. All stream operations are keyed by object
/// number against this.
///
/// Operations on one document must be serialized by the caller; the document
/// itself spawns no background work.
pub struct Document<B: Backend> {
    backend: B,
    refs: XRefTable,
    decoder: Option<Decoder>,
    start_offset: usize,
    serial: u64,
}

impl<B: Backend> Resolve for Document<B> {
    fn resolve(&self, r: PlainRef) -> Result<Primitive> {
        Ok(self.refs.get(r.id)?.obj.clone())
    }
}

impl<B: Backend> Drop for Document<B> {
    fn drop(&mut self) {
        let serial = self.serial;
        JBIG2_GLOBALS.remove_if(|&(doc, _)| doc == serial);
    }
}

impl<B: Backend> Document<B> {
    pub fn new(backend: B, refs: XRefTable) -> Document<B> {
        Document::with_start_offset(backend, refs, 0)
    }

    /// `start_offset` is where the `%PDF-` header sits; all stream offsets
    /// are taken relative to it.
    pub fn with_start_offset(backend: B, refs: XRefTable, start_offset: usize) -> Document<B> {
        Document {
            backend,
            refs,
            decoder: None,
            start_offset,
            serial: DOC_SERIAL.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn set_decoder(&mut self, decoder: Decoder) {
        self.decoder = Some(decoder);
    }
    pub fn decoder(&self) -> Option<&Decoder> {
        self.decoder.as_ref()
    }
    pub fn xref(&self) -> &XRefTable {
        &self.refs
    }
    pub fn backend(&self) -> &B {
        &self.backend
    }

    //////////////////
    // Stream predicate

    /// Whether the object is a stream. Never fails: out-of-range numbers and
    /// non-stream objects simply report false.
    pub fn is_stream_num(&self, num: ObjNr) -> bool {
        match self.refs.lookup(num) {
            Some(entry) => entry.is_stream(),
            None => false,
        }
    }

    pub fn is_stream(&self, r: PlainRef) -> bool {
        self.is_stream_num(r.id)
    }

    //////////////////
    // Helpers over the object model

    fn resolve_prim(&self, p: &Primitive) -> Result<Primitive> {
        match *p {
            Primitive::Reference(r) => self.resolve(r),
            ref p => Ok(p.clone()),
        }
    }

    /// `/Length` of a stream dictionary; anything that is not a non-negative
    /// integer counts as zero.
    fn stream_len(&self, stmobj: &Dictionary) -> Result<usize> {
        let p = match stmobj.get("Length") {
            Some(p) => self.resolve_prim(p)?,
            None => return Ok(0),
        };
        Ok(match p.as_integer() {
            Ok(n) if n >= 0 => n as usize,
            _ => {
                warn!("stream without a usable /Length");
                0
            }
        })
    }

    /// Scan a stream dictionary for an explicit /Crypt filter.
    fn stream_has_crypt(&self, stmobj: &Dictionary) -> Result<bool> {
        let filters = match stmobj.get_either("Filter", "F") {
            Some(p) => self.resolve_prim(p)?,
            None => return Ok(false),
        };
        Ok(match filters {
            Primitive::Name(ref name) => name == "Crypt",
            Primitive::Array(ref parts) => parts
                .iter()
                .any(|p| matches!(*p, Primitive::Name(ref name) if name == "Crypt")),
            _ => false,
        })
    }

    /// The decode-parameter dictionary belonging to filter `i`: element `i`
    /// of an array, a single dictionary applied to every filter, or empty.
    fn nth_params(&self, params: &Primitive, i: usize) -> Result<Dictionary> {
        let p = match *params {
            Primitive::Array(ref parts) => match parts.get(i) {
                Some(p) => self.resolve_prim(p)?,
                None => Primitive::Null,
            },
            ref p => p.clone(),
        };
        Ok(match p {
            Primitive::Dictionary(dict) => dict,
            _ => Dictionary::new(),
        })
    }

    fn file_slice(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let total = self.backend.len();
        let start = self
            .start_offset
            .saturating_add(offset as usize)
            .min(total);
        let end = start.saturating_add(len).min(total);
        self.backend.read(start..end)
    }

    //////////////////
    // Raw framing

    /// Build the raw frame for a stream: a view bounded to `/Length` bytes at
    /// `offset`, decrypted unless the filter list carries its own /Crypt
    /// entry. Returns the original object number and generation that seeded
    /// decryption, for use further up the chain.
    ///
    /// A cached pre-decoded buffer short-circuits the file entirely. Object
    /// numbers outside the xref range (the xref stream itself, mid-parse) get
    /// generation 0 and skip the cache.
    fn open_raw_filter<'a>(
        &'a self,
        stmobj: &Dictionary,
        num: ObjNr,
        offset: u64,
    ) -> Result<(Box<dyn StreamSource + 'a>, ObjNr, GenNr)> {
        let mut orig_gen = 0;
        if let Some(entry) = self.refs.lookup(num) {
            orig_gen = entry.gen;
            if let Some(ref buf) = entry.stm_buf {
                return Ok((Box::new(BufferReader::new(buf.clone())), num, orig_gen));
            }
        }

        let len = self.stream_len(stmobj)?;
        let data = self.file_slice(offset, len)?;
        let mut chain: Box<dyn StreamSource + 'a> = Box::new(SliceReader::new(data));

        if let Some(ref decoder) = self.decoder {
            if !self.stream_has_crypt(stmobj)? {
                chain = Box::new(FilterStage::new(
                    chain,
                    StageKind::Decrypt { decoder, num, gen: orig_gen },
                ));
            }
        }
        Ok((chain, num, orig_gen))
    }

    //////////////////
    // Filter-chain builder

    /// Wrap `chain` in the stage for one filter. With `shortstop` given (only
    /// ever for the terminal filter), a filter that resolves to a non-raw
    /// descriptor is *not* applied: the descriptor is written out and the
    /// chain returned unchanged, so the caller can feed still-compressed
    /// bytes straight to a decoder.
    fn build_filter<'a>(
        &'a self,
        chain: Box<dyn StreamSource + 'a>,
        name: &str,
        params: &Dictionary,
        num: ObjNr,
        gen: GenNr,
        shortstop: Option<&mut Compression>,
    ) -> Result<Box<dyn StreamSource + 'a>> {
        let c = Compression::from_filter(name, params, self)?;
        if !c.is_raw() {
            if let Some(out) = shortstop {
                *out = c;
                return Ok(chain);
            }
            return Ok(Box::new(FilterStage::new(chain, StageKind::Decomp(c))));
        }

        match name {
            "ASCIIHexDecode" | "AHx" => {
                Ok(Box::new(FilterStage::new(chain, StageKind::AsciiHex)))
            }
            "ASCII85Decode" | "A85" => {
                Ok(Box::new(FilterStage::new(chain, StageKind::Ascii85)))
            }
            "JBIG2Decode" => {
                let globals = match params.get("JBIG2Globals") {
                    Some(&Primitive::Reference(r)) => Some(self.load_jbig2_globals(r)?),
                    _ => None,
                };
                Ok(Box::new(FilterStage::new(chain, StageKind::Jbig2(globals))))
            }
            // JPX decoding is special cased in the image loading code
            "JPXDecode" => Ok(chain),
            "Crypt" => {
                let decoder = match self.decoder {
                    Some(ref decoder) => decoder,
                    None => {
                        warn!("crypt filter in unencrypted document");
                        return Ok(chain);
                    }
                };
                match params.get("Name") {
                    Some(&Primitive::Name(ref filter_name)) => {
                        Ok(Box::new(FilterStage::new(chain, StageKind::CryptFilter {
                            decoder,
                            name: filter_name.clone(),
                            num,
                            gen,
                        })))
                    }
                    _ => Ok(chain),
                }
            }
            _ => {
                warn!("unknown filter name ({})", name);
                Ok(chain)
            }
        }
    }

    /// Build a chain of filters in declared order; the leftmost filter reads
    /// from the raw frame first. `filters` is a name, an array of names, or
    /// null.
    fn build_filter_chain<'a>(
        &'a self,
        mut chain: Box<dyn StreamSource + 'a>,
        filters: &Primitive,
        params: &Primitive,
        num: ObjNr,
        gen: GenNr,
        mut shortstop: Option<&mut Compression>,
    ) -> Result<Box<dyn StreamSource + 'a>> {
        match *filters {
            Primitive::Name(ref name) => {
                let p = self.nth_params(params, 0)?;
                self.build_filter(chain, name, &p, num, gen, shortstop)
            }
            Primitive::Array(ref parts) => {
                let n = parts.len();
                for (i, part) in parts.iter().enumerate() {
                    let part = self.resolve_prim(part)?;
                    let name = part.as_name()?;
                    let p = self.nth_params(params, i)?;
                    let stop = if i + 1 == n { shortstop.take() } else { None };
                    chain = self.build_filter(chain, name, &p, num, gen, stop)?;
                }
                Ok(chain)
            }
            Primitive::Null => Ok(chain),
            ref p => Err(PdfError::UnexpectedPrimitive {
                expected: "Name, Array or Null",
                found: p.get_debug_name(),
            }),
        }
    }

    /// Raw frame plus the declared filter chain.
    fn open_filter<'a>(
        &'a self,
        stmobj: &Dictionary,
        num: ObjNr,
        offset: u64,
        mut shortstop: Option<&mut Compression>,
    ) -> Result<Box<dyn StreamSource + 'a>> {
        let filters = match stmobj.get_either("Filter", "F") {
            Some(p) => self.resolve_prim(p)?,
            None => Primitive::Null,
        };
        let params = match stmobj.get_either("DecodeParms", "DP") {
            Some(p) => self.resolve_prim(p)?,
            None => Primitive::Null,
        };

        if let Some(out) = shortstop.as_deref_mut() {
            *out = Compression::Raw;
        }

        let (chain, orig_num, orig_gen) = self.open_raw_filter(stmobj, num, offset)?;
        self.build_filter_chain(chain, &filters, &params, orig_num, orig_gen, shortstop)
    }

    fn stream_entry(&self, num: ObjNr) -> Result<&XRefEntry> {
        let entry = self.refs.get(num)?;
        if !entry.is_stream() {
            err!(PdfError::NotAStream { num });
        }
        Ok(entry)
    }

    fn stream_dict<'e>(&self, num: ObjNr, entry: &'e XRefEntry) -> Result<&'e Dictionary> {
        entry.obj.as_dict().map_err(|_| PdfError::NotAStream { num })
    }

    //////////////////
    // Facade: open

    /// Open a stream for reading the raw (compressed but decrypted) data.
    pub fn open_raw_stream_num(&self, num: ObjNr) -> Result<Box<dyn StreamSource + '_>> {
        let entry = self.refs.get(num)?;
        if entry.stm_ofs == 0 {
            err!(PdfError::NotAStream { num });
        }
        let dict = self.stream_dict(num, entry)?;
        let (stm, _, _) = self.open_raw_filter(dict, num, entry.stm_ofs)?;
        Ok(stm)
    }

    /// Open a stream for reading decoded data. With `params`, the terminal
    /// filter may be short-stopped; see [`Document::build_filter`].
    pub fn open_image_stream(
        &self,
        num: ObjNr,
        params: Option<&mut Compression>,
    ) -> Result<Box<dyn StreamSource + '_>> {
        let entry = self.stream_entry(num)?;
        let dict = self.stream_dict(num, entry)?;
        self.open_filter(dict, num, entry.stm_ofs, params)
    }

    /// Open a stream for reading fully decoded data.
    pub fn open_stream_num(&self, num: ObjNr) -> Result<Box<dyn StreamSource + '_>> {
        self.open_image_stream(num, None)
    }

    /// Open a stream at an explicit offset with an explicit dictionary; used
    /// while parsing new-format xref sections, which cannot be located
    /// through the xref yet.
    pub fn open_stream_with_offset(
        &self,
        num: ObjNr,
        dict: &Dictionary,
        stm_ofs: u64,
    ) -> Result<Box<dyn StreamSource + '_>> {
        if stm_ofs == 0 {
            err!(PdfError::NotAStream { num });
        }
        self.open_filter(dict, num, stm_ofs, None)
    }

    //////////////////
    // Facade: load

    /// Load the raw (compressed but decrypted) contents of a stream.
    pub fn load_raw_stream_num(&self, num: ObjNr) -> Result<Arc<[u8]>> {
        if let Some(entry) = self.refs.lookup(num) {
            if let Some(ref buf) = entry.stm_buf {
                return Ok(buf.clone());
            }
        }
        let entry = self.refs.get(num)?;
        let dict = self.stream_dict(num, entry)?;
        let len = self.stream_len(dict)?;
        let mut stm = self.open_raw_stream_num(num)?;
        read_all(&mut *stm, len).map(Arc::from)
    }

    /// Load the decoded contents of a stream.
    pub fn load_stream_num(&self, num: ObjNr) -> Result<Arc<[u8]>> {
        self.load_image_stream(num, None, None)
    }

    /// Like [`Document::load_stream_num`], but read errors yield the best
    /// partial buffer and set `truncated` instead of failing.
    pub fn load_stream_truncated(&self, num: ObjNr, truncated: &mut bool) -> Result<Arc<[u8]>> {
        self.load_image_stream(num, None, Some(truncated))
    }

    /// Load a stream while short-stopping the terminal filter: the returned
    /// buffer holds bytes as they were before that filter, and the descriptor
    /// says what decoding remains.
    pub fn load_compressed_stream(&self, num: ObjNr) -> Result<CompressedBuffer> {
        let mut params = Compression::Raw;
        let data = self.load_image_stream(num, Some(&mut params), None)?;
        Ok(CompressedBuffer { data, params })
    }

    fn load_image_stream(
        &self,
        num: ObjNr,
        mut params: Option<&mut Compression>,
        truncated: Option<&mut bool>,
    ) -> Result<Arc<[u8]>> {
        if let Some(entry) = self.refs.lookup(num) {
            if self.can_reuse_buffer(entry, params.as_deref_mut())? {
                if let Some(ref buf) = entry.stm_buf {
                    return Ok(buf.clone());
                }
            }
        }

        let entry = self.stream_entry(num)?;
        let dict = self.stream_dict(num, entry)?;
        let mut len = self.stream_len(dict)?;
        match dict.get_either("Filter", "F") {
            Some(p) => match self.resolve_prim(p)? {
                Primitive::Name(ref name) => len = guess_filter_length(len, name),
                Primitive::Array(ref parts) => {
                    for part in parts {
                        if let Primitive::Name(ref name) = self.resolve_prim(part)? {
                            len = guess_filter_length(len, name);
                        }
                    }
                }
                _ => {}
            },
            None => {}
        }

        let mut stm = self.open_image_stream(num, params)?;
        match truncated {
            Some(flag) => Ok(read_best(&mut *stm, len, flag).into()),
            None => read_all(&mut *stm, len).map(Arc::from),
        }
    }

    /// Whether an entry's cached buffer can stand in for opening a pipeline:
    /// only if the stream is uncompressed, or compressed purely by a filter
    /// we can hand back as a descriptor (and the caller asked for one).
    /// Filter arrays longer than one are never reusable.
    fn can_reuse_buffer(
        &self,
        entry: &XRefEntry,
        mut params: Option<&mut Compression>,
    ) -> Result<bool> {
        if entry.stm_buf.is_none() {
            return Ok(false);
        }
        let dict = match entry.obj.as_dict() {
            Ok(dict) => dict,
            Err(_) => return Ok(false),
        };
        if let Some(out) = params.as_deref_mut() {
            *out = Compression::Raw;
        }

        let f = match dict.get_either("Filter", "F") {
            Some(p) => self.resolve_prim(p)?,
            None => return Ok(true),
        };
        let mut p = match dict.get_either("DecodeParms", "DP") {
            Some(p) => self.resolve_prim(p)?,
            None => Primitive::Null,
        };
        let f = match f {
            Primitive::Array(parts) => match parts.len() {
                0 => return Ok(true),
                1 => {
                    p = match p {
                        Primitive::Array(mut elems) => {
                            if elems.is_empty() {
                                Primitive::Null
                            } else {
                                self.resolve_prim(&elems.remove(0))?
                            }
                        }
                        p => p,
                    };
                    self.resolve_prim(&parts[0])?
                }
                _ => return Ok(false),
            },
            f => f,
        };
        match f {
            Primitive::Null => Ok(true),
            Primitive::Name(ref name) => {
                // compressed: only usable if the caller can short-stop
                let out = match params {
                    Some(out) => out,
                    None => return Ok(false),
                };
                let pd = match p {
                    Primitive::Dictionary(dict) => dict,
                    _ => Dictionary::new(),
                };
                let c = Compression::from_filter(name, &pd, self)?;
                if c.is_raw() {
                    Ok(false)
                } else {
                    *out = c;
                    Ok(true)
                }
            }
            _ => Ok(false),
        }
    }

    //////////////////
    // Facade: by direct reference

    pub fn open_stream(&self, r: PlainRef) -> Result<Box<dyn StreamSource + '_>> {
        if self.is_stream(r) {
            self.open_stream_num(r.id)
        } else {
            Err(PdfError::NotAStream { num: r.id })
        }
    }

    pub fn open_raw_stream(&self, r: PlainRef) -> Result<Box<dyn StreamSource + '_>> {
        if self.is_stream(r) {
            self.open_raw_stream_num(r.id)
        } else {
            Err(PdfError::NotAStream { num: r.id })
        }
    }

    pub fn load_stream(&self, r: PlainRef) -> Result<Arc<[u8]>> {
        if self.is_stream(r) {
            self.load_stream_num(r.id)
        } else {
            Err(PdfError::NotAStream { num: r.id })
        }
    }

    pub fn load_raw_stream(&self, r: PlainRef) -> Result<Arc<[u8]>> {
        if self.is_stream(r) {
            self.load_raw_stream_num(r.id)
        } else {
            Err(PdfError::NotAStream { num: r.id })
        }
    }

    //////////////////
    // Inline streams

    /// Open image data embedded in a content stream. Inline data has no
    /// object identity and no encryption, and the caller keeps ownership of
    /// its chain: this borrows it, applies the declared filters (or a
    /// length-bounded view at the current position when there are none) and
    /// honors the same short-stop contract as the standard path.
    pub fn open_inline_stream<'a>(
        &'a self,
        stmobj: &Dictionary,
        length: usize,
        chain: &'a mut dyn StreamSource,
        mut shortstop: Option<&mut Compression>,
    ) -> Result<Box<dyn StreamSource + 'a>> {
        let filters = match stmobj.get_either("Filter", "F") {
            Some(p) => self.resolve_prim(p)?,
            None => Primitive::Null,
        };
        let params = match stmobj.get_either("DecodeParms", "DP") {
            Some(p) => self.resolve_prim(p)?,
            None => Primitive::Null,
        };

        if let Some(out) = shortstop.as_deref_mut() {
            *out = Compression::Raw;
        }

        let has_filters = match filters {
            Primitive::Name(_) => true,
            Primitive::Array(ref parts) => !parts.is_empty(),
            _ => false,
        };
        if has_filters {
            return self.build_filter_chain(Box::new(chain), &filters, &params, 0, 0, shortstop);
        }
        Ok(Box::new(TakeReader::new(Box::new(chain), length)))
    }

    /// Load an inline image: the decoded bytes, plus the still-compressed
    /// bytes of the terminal stage teed off through a leecher so they can be
    /// handed to an image decoder later.
    pub fn load_compressed_inline<'a>(
        &'a self,
        stmobj: &Dictionary,
        length: usize,
        chain: &'a mut dyn StreamSource,
    ) -> Result<(CompressedBuffer, Vec<u8>)> {
        let mut params = Compression::Raw;
        let stm = self.open_inline_stream(stmobj, length, chain, Some(&mut params))?;

        let sink = Rc::new(RefCell::new(Vec::with_capacity(length)));
        let mut stm: Box<dyn StreamSource + 'a> =
            Box::new(Leecher::new(stm, Rc::clone(&sink)));
        if !params.is_raw() {
            stm = Box::new(FilterStage::new(stm, StageKind::Decomp(params.clone())));
        }
        let decoded = read_all(&mut *stm, length)?;
        drop(stm);

        let data: Arc<[u8]> = match Rc::try_unwrap(sink) {
            Ok(cell) => cell.into_inner().into(),
            Err(rc) => rc.borrow().clone().into(),
        };
        Ok((CompressedBuffer { data, params }, decoded))
    }

    //////////////////
    // Content streams

    /// Open a page's contents: a single stream object, or an array of stream
    /// objects streamed back to back. Broken array parts are skipped with a
    /// warning; a part that is merely not loaded yet (`TryLater`) aborts the
    /// whole open so the caller can retry.
    pub fn open_contents_stream(&self, obj: &Primitive) -> Result<Box<dyn StreamSource + '_>> {
        match *obj {
            Primitive::Array(ref parts) => self.open_object_array(parts),
            Primitive::Reference(r) => {
                if self.is_stream(r) {
                    self.open_stream_num(r.id)
                } else {
                    Err(PdfError::ContentsPartMissing { num: r.id })
                }
            }
            ref p => Err(PdfError::UnexpectedPrimitive {
                expected: "Array or Reference",
                found: p.get_debug_name(),
            }),
        }
    }

    fn open_object_array(&self, parts: &[Primitive]) -> Result<Box<dyn StreamSource + '_>> {
        let n = parts.len();
        let mut concat = ConcatReader::new(true);
        for (i, part) in parts.iter().enumerate() {
            let opened = match *part {
                Primitive::Reference(r) if self.is_stream(r) => self.open_stream_num(r.id),
                Primitive::Reference(r) => Err(PdfError::ContentsPartMissing { num: r.id }),
                ref p => Err(PdfError::UnexpectedPrimitive {
                    expected: "Reference",
                    found: p.get_debug_name(),
                }),
            };
            match opened {
                Ok(stm) => concat.push(stm),
                Err(e) if e.is_try_later() => return Err(e),
                Err(e) => warn!("cannot load content stream part {}/{}: {}", i + 1, n, e),
            }
        }
        Ok(Box::new(concat))
    }

    //////////////////
    // JBIG2 globals

    /// Shared globals for JBIG2 streams, keyed by the identity of the globals
    /// object in a process-wide cache. Entries are weighted by buffer size
    /// and survive as long as the longest holder.
    fn load_jbig2_globals(&self, r: PlainRef) -> Result<Arc<Jbig2Globals>> {
        let key = (self.serial, r);
        if let Some(globals) = JBIG2_GLOBALS.find(&key) {
            return Ok(globals);
        }
        let buf = self.load_stream_num(r.id)?;
        let globals = Arc::new(Jbig2Globals::new(buf));
        JBIG2_GLOBALS.store(key, globals.clone(), globals.storage_size());
        Ok(globals)
    }
}

fn guess_filter_length(len: usize, filter: &str) -> usize {
    match filter {
        "ASCIIHexDecode" => len / 2,
        "ASCII85Decode" => len * 4 / 5,
        "FlateDecode" => len * 3,
        "RunLengthDecode" => len * 3,
        "LZWDecode" => len * 2,
        _ => len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::{CryptFilter, CryptMethod};
    use crate::enc;
    use std::collections::HashMap;

    fn dict(entries: &[(&str, Primitive)]) -> Dictionary {
        let mut d = Dictionary::new();
        for (k, v) in entries {
            d.insert(*k, v.clone());
        }
        d
    }

    /// A file image with a stream payload at a fixed offset.
    fn single_stream_doc(payload: &[u8], dict: Dictionary) -> Document<Vec<u8>> {
        let offset = 32;
        let mut data = vec![b'%'; offset];
        data.extend_from_slice(payload);
        let mut refs = XRefTable::new(3);
        refs.set(1, XRefEntry::stream(0, offset as u64, dict)).unwrap();
        Document::new(data, refs)
    }

    fn rc4_encrypt(decoder: &Decoder, num: ObjNr, gen: GenNr, data: &[u8]) -> Vec<u8> {
        // V2 is an involution, so "decrypting" the plaintext encrypts it
        let mut buf = data.to_vec();
        decoder.decrypt(num, gen, &mut buf).unwrap();
        buf
    }

    #[test]
    fn encrypted_raw_stream_is_decrypted() {
        let decoder = Decoder::with_key([3; 16], 16, CryptMethod::V2, HashMap::new());
        let cipher = rc4_encrypt(&decoder, 1, 0, b"secret contents");

        let info = dict(&[("Length", Primitive::Integer(cipher.len() as i32))]);
        let mut doc = single_stream_doc(&cipher, info);
        doc.set_decoder(Decoder::with_key([3; 16], 16, CryptMethod::V2, HashMap::new()));

        assert_eq!(&*doc.load_raw_stream_num(1).unwrap(), b"secret contents");
        assert_eq!(&*doc.load_stream_num(1).unwrap(), b"secret contents");
    }

    #[test]
    fn generation_seeds_decryption() {
        let decoder = Decoder::with_key([3; 16], 16, CryptMethod::V2, HashMap::new());
        let cipher = rc4_encrypt(&decoder, 1, 5, b"gen five");

        let offset = 16u64;
        let mut data = vec![0; offset as usize];
        data.extend_from_slice(&cipher);
        let mut refs = XRefTable::new(2);
        let entry = XRefEntry::stream(5, offset, dict(&[("Length", Primitive::Integer(cipher.len() as i32))]));
        refs.set(1, entry).unwrap();
        let mut doc = Document::new(data, refs);
        doc.set_decoder(Decoder::with_key([3; 16], 16, CryptMethod::V2, HashMap::new()));

        assert_eq!(&*doc.load_stream_num(1).unwrap(), b"gen five");
    }

    #[test]
    fn explicit_crypt_filter_skips_default_decryption() {
        // S4: Filter [/Crypt /FlateDecode], DecodeParms [<</Name /Identity>> null].
        // The raw frame must not decrypt; the named Identity stage passes the
        // bytes through and Flate runs afterwards.
        use std::io::Write;
        let payload = b"filter chain with explicit crypt";
        let mut enc = libflate::zlib::Encoder::new(Vec::new()).unwrap();
        enc.write_all(payload).unwrap();
        let compressed = enc.finish().into_result().unwrap();

        let info = dict(&[
            ("Length", Primitive::Integer(compressed.len() as i32)),
            ("Filter", Primitive::Array(vec![
                Primitive::name("Crypt"),
                Primitive::name("FlateDecode"),
            ])),
            ("DecodeParms", Primitive::Array(vec![
                Primitive::Dictionary(dict(&[("Name", Primitive::name("Identity"))])),
                Primitive::Null,
            ])),
        ]);
        let mut doc = single_stream_doc(&compressed, info);
        doc.set_decoder(Decoder::with_key([9; 16], 16, CryptMethod::V2, HashMap::new()));

        // raw output equals the undecrypted file bytes
        assert_eq!(&*doc.load_raw_stream_num(1).unwrap(), &compressed[..]);
        // the full pipeline decodes to the payload
        assert_eq!(&*doc.load_stream_num(1).unwrap(), payload);
    }

    #[test]
    fn named_crypt_filter_applies_in_declared_position() {
        let decoder = Decoder::with_key([4; 16], 16, CryptMethod::V2, HashMap::new());
        let cipher = rc4_encrypt(&decoder, 1, 0, b"named filter data");

        let mut filters = HashMap::new();
        filters.insert("StdCF".to_string(), CryptFilter { method: CryptMethod::V2, length: None });

        let info = dict(&[
            ("Length", Primitive::Integer(cipher.len() as i32)),
            ("Filter", Primitive::name("Crypt")),
            ("DecodeParms", Primitive::Dictionary(dict(&[("Name", Primitive::name("StdCF"))]))),
        ]);
        let mut doc = single_stream_doc(&cipher, info);
        doc.set_decoder(Decoder::with_key([4; 16], 16, CryptMethod::V2, filters));

        // raw: no default decryption because /Crypt is declared
        assert_eq!(&*doc.load_raw_stream_num(1).unwrap(), &cipher[..]);
        // decoded: the named filter decrypts
        assert_eq!(&*doc.load_stream_num(1).unwrap(), b"named filter data");
    }

    #[test]
    fn crypt_filter_in_unencrypted_document_warns_and_passes() {
        let info = dict(&[
            ("Length", Primitive::Integer(5)),
            ("Filter", Primitive::name("Crypt")),
        ]);
        let doc = single_stream_doc(b"plain", info);
        assert_eq!(&*doc.load_stream_num(1).unwrap(), b"plain");
    }

    fn install_test_jbig2_decoder() {
        enc::set_jbig2_decoder(Box::new(|data, globals| {
            let mut out = Vec::new();
            if let Some(globals) = globals {
                out.extend_from_slice(globals);
            }
            out.extend_from_slice(data);
            Ok(out)
        }));
    }

    #[test]
    fn jbig2_globals_are_shared() {
        install_test_jbig2_decoder();

        let offset_g = 16u64;
        let offset_a = 32u64;
        let offset_b = 48u64;
        let mut data = vec![0; 64];
        data[offset_g as usize..offset_g as usize + 4].copy_from_slice(b"GLO!");
        data[offset_a as usize..offset_a as usize + 4].copy_from_slice(b"imgA");
        data[offset_b as usize..offset_b as usize + 4].copy_from_slice(b"imgB");

        let parms = Primitive::Dictionary(dict(&[(
            "JBIG2Globals",
            Primitive::Reference(PlainRef::new(1, 0)),
        )]));
        let jbig2_dict = |parms: &Primitive| dict(&[
            ("Length", Primitive::Integer(4)),
            ("Filter", Primitive::name("JBIG2Decode")),
            ("DecodeParms", parms.clone()),
        ]);

        let mut refs = XRefTable::new(4);
        refs.set(1, XRefEntry::stream(0, offset_g, dict(&[("Length", Primitive::Integer(4))]))).unwrap();
        refs.set(2, XRefEntry::stream(0, offset_a, jbig2_dict(&parms))).unwrap();
        refs.set(3, XRefEntry::stream(0, offset_b, jbig2_dict(&parms))).unwrap();
        let doc = Document::new(data, refs);

        assert_eq!(&*doc.load_stream_num(2).unwrap(), b"GLO!imgA");
        assert_eq!(&*doc.load_stream_num(3).unwrap(), b"GLO!imgB");

        // both streams resolved the same globals instance through the cache
        let a = doc.load_jbig2_globals(PlainRef::new(1, 0)).unwrap();
        let b = doc.load_jbig2_globals(PlainRef::new(1, 0)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // closing the document drops its cache entries
        let serial = doc.serial;
        drop(doc);
        assert!(JBIG2_GLOBALS.find(&(serial, PlainRef::new(1, 0))).is_none());
    }

    #[test]
    fn cached_buffer_reuse() {
        let decoded: Arc<[u8]> = Vec::from(&b"already decoded"[..]).into();

        // no filters: both loaders reuse the cached buffer
        let mut refs = XRefTable::new(2);
        refs.set(1, XRefEntry::cached(0, decoded.clone(), dict(&[("Length", Primitive::Integer(15))]))).unwrap();
        let doc = Document::new(Vec::<u8>::new(), refs);
        let loaded = doc.load_stream_num(1).unwrap();
        assert!(Arc::ptr_eq(&loaded, &decoded));
        let raw = doc.load_raw_stream_num(1).unwrap();
        assert!(Arc::ptr_eq(&raw, &decoded));

        // single non-raw filter: reusable only with an out-descriptor
        let jpeg: Arc<[u8]> = Vec::from(&b"jfif bytes"[..]).into();
        let info = dict(&[
            ("Length", Primitive::Integer(10)),
            ("Filter", Primitive::Array(vec![Primitive::name("DCTDecode")])),
        ]);
        let mut refs = XRefTable::new(2);
        refs.set(1, XRefEntry::cached(0, jpeg.clone(), info)).unwrap();
        let doc = Document::new(Vec::<u8>::new(), refs);

        let compressed = doc.load_compressed_stream(1).unwrap();
        assert!(Arc::ptr_eq(&compressed.data, &jpeg));
        assert!(matches!(compressed.params, Compression::Jpeg(_)));

        // without the descriptor the loader would have to decode, and the
        // cached bytes still carry DCT, so decoding fails in jpeg-decoder
        assert!(doc.load_stream_num(1).is_err());
    }

    #[test]
    fn filter_arrays_longer_than_one_never_reuse() {
        let buf: Arc<[u8]> = Vec::from(&b"x"[..]).into();
        let info = dict(&[
            ("Length", Primitive::Integer(1)),
            ("Filter", Primitive::Array(vec![
                Primitive::name("ASCIIHexDecode"),
                Primitive::name("DCTDecode"),
            ])),
        ]);
        let mut refs = XRefTable::new(2);
        refs.set(1, XRefEntry::cached(0, buf, info)).unwrap();
        let doc = Document::new(Vec::<u8>::new(), refs);
        let entry = doc.xref().get(1).unwrap();
        let mut params = Compression::Raw;
        assert!(!doc.can_reuse_buffer(entry, Some(&mut params)).unwrap());
    }

    #[test]
    fn open_with_offset_frames_the_xref_stream() {
        // the xref stream itself: not yet reachable through the table
        let mut data = vec![0; 8];
        data.extend_from_slice(b"xref stream body");
        let refs = XRefTable::new(1);
        let doc = Document::new(data, refs);

        let info = dict(&[("Length", Primitive::Integer(16))]);
        let mut stm = doc.open_stream_with_offset(7, &info, 8).unwrap();
        assert_eq!(read_all(&mut *stm, 0).unwrap(), b"xref stream body");

        assert!(matches!(
            doc.open_stream_with_offset(7, &info, 0),
            Err(PdfError::NotAStream { num: 7 })
        ));
    }
}
