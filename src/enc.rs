#![allow(clippy::many_single_char_names)]

use std::io::Read;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::*;
use crate::object::{Object, Resolve};
use crate::primitive::Dictionary;

fn entry<T: Object>(dict: &Dictionary, key: &str, r: &impl Resolve, default: T) -> Result<T> {
    match dict.get(key) {
        Some(p) => T::from_primitive(p.clone(), r),
        None => Ok(default),
    }
}

/// Parameters shared by `FlateDecode` and `LZWDecode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LZWFlateParams {
    pub predictor: i32,
    pub n_components: i32,
    pub bits_per_component: i32,
    pub columns: i32,
    pub early_change: i32,
}
impl Default for LZWFlateParams {
    fn default() -> LZWFlateParams {
        LZWFlateParams {
            predictor: 1,
            n_components: 1,
            bits_per_component: 8,
            columns: 1,
            early_change: 1
        }
    }
}
impl LZWFlateParams {
    pub fn from_dict(dict: &Dictionary, r: &impl Resolve) -> Result<LZWFlateParams> {
        Ok(LZWFlateParams {
            predictor: entry(dict, "Predictor", r, 1)?,
            n_components: entry(dict, "Colors", r, 1)?,
            bits_per_component: entry(dict, "BitsPerComponent", r, 8)?,
            columns: entry(dict, "Columns", r, 1)?,
            early_change: entry(dict, "EarlyChange", r, 1)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DCTDecodeParams {
    /// 0: no transformation. 1: RGB to YUV (or CMYK to YUVK) was applied
    /// before encoding. -1: not specified, let the decoder decide.
    pub color_transform: i32,
}
impl Default for DCTDecodeParams {
    fn default() -> DCTDecodeParams {
        DCTDecodeParams { color_transform: -1 }
    }
}
impl DCTDecodeParams {
    pub fn from_dict(dict: &Dictionary, r: &impl Resolve) -> Result<DCTDecodeParams> {
        Ok(DCTDecodeParams {
            color_transform: entry(dict, "ColorTransform", r, -1)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CCITTFaxDecodeParams {
    pub k: i32,
    pub end_of_line: bool,
    pub encoded_byte_align: bool,
    pub columns: u32,
    pub rows: u32,
    pub end_of_block: bool,
    pub black_is_1: bool,
}
impl Default for CCITTFaxDecodeParams {
    fn default() -> CCITTFaxDecodeParams {
        CCITTFaxDecodeParams {
            k: 0,
            end_of_line: false,
            encoded_byte_align: false,
            columns: 1728,
            rows: 0,
            end_of_block: true,
            black_is_1: false,
        }
    }
}
impl CCITTFaxDecodeParams {
    pub fn from_dict(dict: &Dictionary, r: &impl Resolve) -> Result<CCITTFaxDecodeParams> {
        Ok(CCITTFaxDecodeParams {
            k: entry(dict, "K", r, 0)?,
            end_of_line: entry(dict, "EndOfLine", r, false)?,
            encoded_byte_align: entry(dict, "EncodedByteAlign", r, false)?,
            columns: entry(dict, "Columns", r, 1728)?,
            rows: entry(dict, "Rows", r, 0)?,
            end_of_block: entry(dict, "EndOfBlock", r, true)?,
            black_is_1: entry(dict, "BlackIs1", r, false)?,
        })
    }
}

/// What compression remains on a byte buffer, with everything needed to undo
/// it. Absent dictionary keys are defaulted at resolve time, so consumers
/// never see "unset".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compression {
    Raw,
    Fax(CCITTFaxDecodeParams),
    Jpeg(DCTDecodeParams),
    RunLength,
    Flate(LZWFlateParams),
    Lzw(LZWFlateParams),
}

impl Compression {
    /// Resolve one `Filter` entry and its decode-parameter dictionary.
    ///
    /// Filters that do not decompress to a descriptor-expressible form (the
    /// ASCII armors, JBIG2, JPX, Crypt, and anything unrecognized) resolve to
    /// `Raw`; the chain builder dispatches those by name.
    pub fn from_filter(name: &str, params: &Dictionary, r: &impl Resolve) -> Result<Compression> {
        Ok(match name {
            "CCITTFaxDecode" | "CCF" => Compression::Fax(CCITTFaxDecodeParams::from_dict(params, r)?),
            "DCTDecode" | "DCT" => Compression::Jpeg(DCTDecodeParams::from_dict(params, r)?),
            "RunLengthDecode" | "RL" => Compression::RunLength,
            "FlateDecode" | "Fl" => Compression::Flate(LZWFlateParams::from_dict(params, r)?),
            "LZWDecode" | "LZW" => Compression::Lzw(LZWFlateParams::from_dict(params, r)?),
            _ => Compression::Raw,
        })
    }

    pub fn is_raw(&self) -> bool {
        matches!(*self, Compression::Raw)
    }
}

/// Apply a resolved descriptor to a buffer. This is the decoder behind the
/// generic decompression stage, and what short-stopping callers run
/// themselves on the bytes they were handed.
pub fn decompress(data: &[u8], c: &Compression) -> Result<Vec<u8>> {
    match *c {
        Compression::Raw => Ok(data.to_vec()),
        Compression::Fax(ref params) => fax_decode(data, params),
        Compression::Jpeg(ref params) => dct_decode(data, params),
        Compression::RunLength => run_length_decode(data),
        Compression::Flate(ref params) => flate_decode(data, params),
        Compression::Lzw(ref params) => lzw_decode(data, params),
    }
}

#[inline]
pub fn decode_nibble(c: u8) -> Option<u8> {
    match c {
        n @ b'0' ..= b'9' => Some(n - b'0'),
        a @ b'a' ..= b'f' => Some(a - b'a' + 0xa),
        a @ b'A' ..= b'F' => Some(a - b'A' + 0xA),
        _ => None
    }
}

pub fn decode_hex(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut high = None;
    for (pos, &b) in data.iter().enumerate() {
        if b == b'>' {
            break;
        }
        if is_pdf_whitespace(b) {
            continue;
        }
        let n = decode_nibble(b).ok_or(PdfError::HexDecode { pos, byte: b })?;
        match high.take() {
            None => high = Some(n),
            Some(h) => out.push(h << 4 | n),
        }
    }
    // an odd trailing digit counts as the high nibble of a final byte
    if let Some(h) = high {
        out.push(h << 4);
    }
    Ok(out)
}

#[inline]
fn is_pdf_whitespace(b: u8) -> bool {
    matches!(b, 0 | 9 | 10 | 12 | 13 | 32)
}

/// Value of one five-digit base-85 group, big-endian. Rejects digits above
/// 'u' and groups exceeding 32 bits.
fn group_85(digits: &[u8; 5]) -> Result<[u8; 4]> {
    let mut acc: u64 = 0;
    for &digit in digits {
        acc = acc * 85 + digit as u64;
    }
    if acc > u32::MAX as u64 {
        return Err(PdfError::Ascii85TailError);
    }
    Ok((acc as u32).to_be_bytes())
}

pub fn decode_85(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 5 * 4 + 4);
    let mut group = [0u8; 5];
    let mut filled = 0;
    let mut bytes = data.iter().copied();

    let mut terminated = false;
    for b in bytes.by_ref() {
        match b {
            b'~' => {
                terminated = true;
                break;
            }
            b if is_pdf_whitespace(b) => {}
            b'z' if filled == 0 => out.extend_from_slice(&[0; 4]),
            b'!'..=b'u' => {
                group[filled] = b - b'!';
                filled += 1;
                if filled == 5 {
                    out.extend_from_slice(&group_85(&group)?);
                    filled = 0;
                }
            }
            _ => return Err(PdfError::Ascii85TailError),
        }
    }
    if !terminated {
        return Err(PdfError::Ascii85TailError);
    }

    // a partial group of n digits carries n-1 bytes; pad with the top digit
    if filled > 0 {
        for slot in group[filled..].iter_mut() {
            *slot = 84;
        }
        out.extend_from_slice(&group_85(&group)?[..filled - 1]);
    }

    // only the '>' half of the terminator may follow
    if bytes.find(|&b| !is_pdf_whitespace(b)) != Some(b'>') {
        return Err(PdfError::Ascii85TailError);
    }
    if bytes.any(|b| !is_pdf_whitespace(b)) {
        return Err(PdfError::Ascii85TailError);
    }
    Ok(out)
}

pub fn flate_decode(data: &[u8], params: &LZWFlateParams) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    match libflate::zlib::Decoder::new(data) {
        Ok(mut zlib) => {
            zlib.read_to_end(&mut decoded)?;
        }
        Err(_) => {
            info!("invalid zlib header. trying raw deflate");
            decoded.clear();
            libflate::deflate::Decoder::new(data).read_to_end(&mut decoded)?;
        }
    }
    unpredict(decoded, params)
}

pub fn lzw_decode(data: &[u8], params: &LZWFlateParams) -> Result<Vec<u8>> {
    use weezl::{BitOrder, decode::Decoder};
    let mut out = vec![];

    let mut decoder = if params.early_change != 0 {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };

    decoder
        .into_stream(&mut out)
        .decode_all(data)
        .status
        .map_err(|e| PdfError::Other { msg: format!("lzw: {}", e) })?;
    unpredict(out, params)
}

pub fn dct_decode(data: &[u8], _params: &DCTDecodeParams) -> Result<Vec<u8>> {
    fn jpeg_err(e: jpeg_decoder::Error) -> PdfError {
        PdfError::Other { msg: format!("jpeg: {}", e) }
    }
    let mut decoder = jpeg_decoder::Decoder::new(data);
    decoder.read_info().map_err(jpeg_err)?;
    decoder.decode().map_err(jpeg_err)
}

pub fn fax_decode(data: &[u8], params: &CCITTFaxDecodeParams) -> Result<Vec<u8>> {
    use fax::decoder::{decode_g4, pels};
    use fax::Color;

    // only pure two-dimensional (Group 4) coding is handled
    if params.k >= 0 {
        bail!("CCITT K >= 0 is not supported");
    }
    let width = params.columns as u16;
    let height = match params.rows {
        0 => None,
        rows => Some(rows as u16),
    };
    let mut image = Vec::with_capacity(params.columns as usize * params.rows as usize);
    decode_g4(data.iter().copied(), width, height, |transitions| {
        image.extend(pels(transitions, width).map(|pel| match pel {
            Color::Black => 0u8,
            Color::White => 255,
        }));
    })
    .ok_or(PdfError::Other { msg: "fax decode failed".into() })?;

    if params.rows != 0 {
        let expected = params.columns as usize * params.rows as usize;
        if image.len() != expected {
            bail!("fax decode produced {} bytes, expected {}", image.len(), expected);
        }
    }
    Ok(image)
}

pub fn run_length_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0;
    // each run opens with a control byte: 0..=127 takes that many plus one
    // literal bytes, 129..=255 repeats the next byte 257 - n times, and 128
    // ends the data
    while let Some(&control) = data.get(pos) {
        pos += 1;
        match control {
            0..=127 => {
                let count = control as usize + 1;
                match data.get(pos..pos + count) {
                    Some(literal) => out.extend_from_slice(literal),
                    None => {
                        // truncated literal run: keep what is there
                        out.extend_from_slice(&data[pos..]);
                        break;
                    }
                }
                pos += count;
            }
            128 => break,
            _ => {
                let count = 257 - control as usize;
                match data.get(pos) {
                    Some(&fill) => out.extend(std::iter::repeat(fill).take(count)),
                    None => break,
                }
                pos += 1;
            }
        }
    }
    Ok(out)
}

/// Shared decoder context for JBIG2 streams referencing a common globals
/// stream. Holds the loaded globals stream contents; every stream that names
/// the same globals object shares one instance through the item cache.
#[derive(Debug)]
pub struct Jbig2Globals {
    data: Arc<[u8]>,
}
impl Jbig2Globals {
    pub fn new(data: Arc<[u8]>) -> Jbig2Globals {
        Jbig2Globals { data }
    }
    pub fn data(&self) -> &[u8] {
        &self.data
    }
    /// Storage footprint, used as the item-cache weight.
    pub fn storage_size(&self) -> usize {
        self.data.len()
    }
}

pub type Jbig2DecodeFn = dyn Fn(&[u8], Option<&[u8]>) -> Result<Vec<u8>> + Sync + Send + 'static;
static JBIG2_DECODER: OnceCell<Box<Jbig2DecodeFn>> = OnceCell::new();

/// Install a JBIG2 decoder. The second argument receives the globals stream
/// contents when the filter carries a `JBIG2Globals` reference.
pub fn set_jbig2_decoder(f: Box<Jbig2DecodeFn>) {
    let _ = JBIG2_DECODER.set(f);
}

pub fn jbig2_decode(data: &[u8], globals: Option<&Jbig2Globals>) -> Result<Vec<u8>> {
    let f = JBIG2_DECODER.get()
        .ok_or_else(|| PdfError::Other { msg: "jbig2 decoder not set".into() })?;
    f(data, globals.map(|g| g.data()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PredictorType {
    NoFilter = 0,
    Sub = 1,
    Up = 2,
    Avg = 3,
    Paeth = 4
}

impl PredictorType {
    pub fn from_u8(n: u8) -> Result<PredictorType> {
        match n {
            0 => Ok(PredictorType::NoFilter),
            1 => Ok(PredictorType::Sub),
            2 => Ok(PredictorType::Up),
            3 => Ok(PredictorType::Avg),
            4 => Ok(PredictorType::Paeth),
            n => Err(PdfError::IncorrectPredictorType { n })
        }
    }
}

/// Undo PNG-style row prediction when the parameters ask for it
/// (`Predictor > 10`). Each row is `columns * colors` samples wide and is
/// preceded by one tag byte naming the predictor used for that row.
fn unpredict(inp: Vec<u8>, params: &LZWFlateParams) -> Result<Vec<u8>> {
    if params.predictor <= 10 {
        return Ok(inp);
    }
    let bpp = params.n_components as usize;
    let stride = params.columns as usize * bpp;
    if stride == 0 {
        bail!("predictor with zero columns");
    }

    let mut out = Vec::with_capacity(inp.len() / (stride + 1) * stride);
    let mut prev = vec![0u8; stride];
    for tagged_row in inp.chunks_exact(stride + 1) {
        let tag = PredictorType::from_u8(tagged_row[0])?;
        let mut row = vec![0u8; stride];
        reconstruct_row(tag, bpp, &prev, &tagged_row[1..], &mut row);
        out.extend_from_slice(&row);
        prev = row;
    }
    Ok(out)
}

/// PNG Paeth predictor: whichever neighbor is closest to left + up - corner.
fn paeth(left: u8, up: u8, corner: u8) -> u8 {
    let estimate = left as i32 + up as i32 - corner as i32;
    let dl = (estimate - left as i32).abs();
    let du = (estimate - up as i32).abs();
    let dc = (estimate - corner as i32).abs();
    if dl <= du && dl <= dc {
        left
    } else if du <= dc {
        up
    } else {
        corner
    }
}

fn reconstruct_row(tag: PredictorType, bpp: usize, prev: &[u8], raw: &[u8], out: &mut [u8]) {
    for i in 0..raw.len() {
        let left = if i < bpp { 0 } else { out[i - bpp] };
        let up = prev[i];
        let corner = if i < bpp { 0 } else { prev[i - bpp] };
        let prediction = match tag {
            PredictorType::NoFilter => 0,
            PredictorType::Sub => left,
            PredictorType::Up => up,
            PredictorType::Avg => ((left as u16 + up as u16) / 2) as u8,
            PredictorType::Paeth => paeth(left, up, corner),
        };
        out[i] = raw[i].wrapping_add(prediction);
    }
}
