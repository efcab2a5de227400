//! `Object` and `Resolve` traits, plus plain references.

use crate::error::*;
use crate::primitive::{Dictionary, PdfString, Primitive};

pub type ObjNr = u64;
pub type GenNr = u16;

/// Follow indirect references into the containing document.
pub trait Resolve {
    fn resolve(&self, r: PlainRef) -> Result<Primitive>;
}

pub struct NoResolve;
impl Resolve for NoResolve {
    fn resolve(&self, _: PlainRef) -> Result<Primitive> {
        Err(PdfError::Reference)
    }
}

/// Anything that can be read out of a `Primitive`.
pub trait Object: Sized {
    /// Convert primitive to Self
    fn from_primitive(p: Primitive, resolve: &impl Resolve) -> Result<Self>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PlainRef {
    pub id:  ObjNr,
    pub gen: GenNr,
}
impl PlainRef {
    pub fn new(id: ObjNr, gen: GenNr) -> PlainRef {
        PlainRef { id, gen }
    }
}
impl Object for PlainRef {
    fn from_primitive(p: Primitive, _: &impl Resolve) -> Result<Self> {
        p.into_reference()
    }
}

//////////////////////////////////////
// Object for Primitives & other types
//////////////////////////////////////

impl Object for i32 {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        match p {
            Primitive::Reference(id) => r.resolve(id)?.as_integer(),
            p => p.as_integer(),
        }
    }
}

impl Object for u32 {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        match p {
            Primitive::Reference(id) => r.resolve(id)?.as_u32(),
            p => p.as_u32(),
        }
    }
}

impl Object for usize {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        match p {
            Primitive::Reference(id) => Ok(r.resolve(id)?.as_u32()? as usize),
            p => Ok(p.as_u32()? as usize),
        }
    }
}

impl Object for bool {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        match p {
            Primitive::Reference(id) => r.resolve(id)?.as_bool(),
            p => p.as_bool(),
        }
    }
}

impl Object for Dictionary {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        match p {
            Primitive::Dictionary(dict) => Ok(dict),
            Primitive::Reference(id) => Dictionary::from_primitive(r.resolve(id)?, r),
            p => Err(PdfError::UnexpectedPrimitive {
                expected: "Dictionary",
                found:    p.get_debug_name(),
            }),
        }
    }
}

impl Object for String {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        match p {
            Primitive::Reference(id) => r.resolve(id)?.into_name(),
            p => p.into_name(),
        }
    }
}

impl Object for PdfString {
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        match p {
            Primitive::String(string) => Ok(string),
            Primitive::Reference(id) => PdfString::from_primitive(r.resolve(id)?, &NoResolve),
            p => Err(PdfError::UnexpectedPrimitive {
                expected: "String",
                found:    p.get_debug_name(),
            }),
        }
    }
}

impl<T: Object> Object for Vec<T> {
    /// Will try to convert `p` to `T` first, then try to convert `p` to Vec<T>
    fn from_primitive(p: Primitive, r: &impl Resolve) -> Result<Self> {
        Ok(match p {
            Primitive::Array(parts) => parts
                .into_iter()
                .map(|p| T::from_primitive(p, r))
                .collect::<Result<Vec<T>>>()?,
            Primitive::Null => Vec::new(),
            Primitive::Reference(id) => Self::from_primitive(r.resolve(id)?, r)?,
            p => vec![T::from_primitive(p, r)?],
        })
    }
}

impl Object for Primitive {
    fn from_primitive(p: Primitive, _: &impl Resolve) -> Result<Self> {
        Ok(p)
    }
}
