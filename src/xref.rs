//! Cross-reference table: where each object's stream payload lives.

use crate::error::*;
use crate::object::{GenNr, ObjNr};
use crate::primitive::{Dictionary, Primitive};

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// One object's slot in the cross-reference table, as populated by the host's
/// object loader.
#[derive(Clone, Debug, Default)]
pub struct XRefEntry {
    pub gen: GenNr,

    /// File offset of the stream payload. Zero means the object is not a
    /// stream (unless `stm_buf` is set).
    pub stm_ofs: u64,

    /// Pre-decoded stream contents. Supersedes the file when present.
    pub stm_buf: Option<Arc<[u8]>>,

    /// The object's value. For stream objects this is the stream dictionary.
    pub obj: Primitive,
}

impl XRefEntry {
    pub fn free() -> XRefEntry {
        XRefEntry::default()
    }
    pub fn object(gen: GenNr, obj: Primitive) -> XRefEntry {
        XRefEntry { gen, obj, ..XRefEntry::default() }
    }
    /// A stream object located in the file.
    pub fn stream(gen: GenNr, stm_ofs: u64, dict: Dictionary) -> XRefEntry {
        XRefEntry {
            gen,
            stm_ofs,
            stm_buf: None,
            obj: Primitive::Dictionary(dict),
        }
    }
    /// A stream object whose decoded contents are already in memory.
    pub fn cached(gen: GenNr, buf: Arc<[u8]>, dict: Dictionary) -> XRefEntry {
        XRefEntry {
            gen,
            stm_ofs: 0,
            stm_buf: Some(buf),
            obj: Primitive::Dictionary(dict),
        }
    }
    pub fn is_stream(&self) -> bool {
        self.stm_ofs != 0 || self.stm_buf.is_some()
    }
}

/// Runtime lookup table of all objects. Entry index is the object number;
/// object number zero is always invalid.
pub struct XRefTable {
    entries: Vec<XRefEntry>,
}

impl XRefTable {
    pub fn new(num_objects: usize) -> XRefTable {
        let mut entries = Vec::new();
        entries.resize(num_objects, XRefEntry::free());
        XRefTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Infallible lookup; `None` for object number zero and anything past the
    /// end of the table.
    pub fn lookup(&self, num: ObjNr) -> Option<&XRefEntry> {
        if num == 0 {
            return None;
        }
        self.entries.get(num as usize)
    }

    pub fn get(&self, num: ObjNr) -> Result<&XRefEntry> {
        self.lookup(num).ok_or(PdfError::ObjOutOfRange { num })
    }

    pub fn set(&mut self, num: ObjNr, entry: XRefEntry) -> Result<()> {
        if num == 0 || num as usize >= self.entries.len() {
            err!(PdfError::ObjOutOfRange { num });
        }
        self.entries[num as usize] = entry;
        Ok(())
    }

    pub fn push(&mut self, entry: XRefEntry) {
        self.entries.push(entry);
    }
}

impl Debug for XRefTable {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            match (entry.stm_ofs, &entry.stm_buf) {
                (0, None) => writeln!(f, "{:4}: {:05} -", i, entry.gen)?,
                (ofs, None) => writeln!(f, "{:4}: {:05} stream at {:010}", i, entry.gen, ofs)?,
                (_, Some(buf)) => writeln!(f, "{:4}: {:05} cached, {} bytes", i, entry.gen, buf.len())?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_totality() {
        let mut refs = XRefTable::new(3);
        refs.set(1, XRefEntry::stream(0, 100, Dictionary::new())).unwrap();

        assert!(refs.lookup(0).is_none());
        assert!(refs.lookup(1).unwrap().is_stream());
        assert!(!refs.lookup(2).unwrap().is_stream());
        assert!(refs.lookup(3).is_none());
        assert!(matches!(refs.get(7), Err(PdfError::ObjOutOfRange { num: 7 })));
    }

    #[test]
    fn entry_kinds() {
        assert!(!XRefEntry::free().is_stream());
        assert!(XRefEntry::stream(0, 1, Dictionary::new()).is_stream());
        let buf: Arc<[u8]> = Vec::from(&b"x"[..]).into();
        assert!(XRefEntry::cached(0, buf, Dictionary::new()).is_stream());
    }
}
