use crate::object::ObjNr;
use std::io;

#[derive(Debug, Snafu)]
pub enum PdfError {
    //////////////////
    // Stream access
    #[snafu(display("object id out of range ({} 0 R)", num))]
    ObjOutOfRange { num: ObjNr },

    #[snafu(display("object is not a stream ({} 0 R)", num))]
    NotAStream { num: ObjNr },

    #[snafu(display("content stream part missing ({} 0 R)", num))]
    ContentsPartMissing { num: ObjNr },

    /// Not enough of the document is loaded yet to satisfy the request.
    /// Never swallowed; callers retry once their prerequisites arrive.
    #[snafu(display("data not available yet, try later"))]
    TryLater,

    #[snafu(display("Cannot follow reference - no resolve fn given."))]
    Reference,

    //////////////////
    // Encode/decode
    #[snafu(display("Invalid hex character {:#04x} at position {}", byte, pos))]
    HexDecode { pos: usize, byte: u8 },

    #[snafu(display("Ascii85 tail error"))]
    Ascii85TailError,

    #[snafu(display("Failed to convert '{}' into PredictorType", n))]
    IncorrectPredictorType { n: u8 },

    //////////////////
    // Dictionary
    #[snafu(display("Field /{} is missing in dictionary for type {}.", field, typ))]
    MissingEntry {
        typ: &'static str,
        field: String,
    },

    #[snafu(display("Expected primitive {}, found primitive {} instead.", expected, found))]
    UnexpectedPrimitive {
        expected: &'static str,
        found: &'static str,
    },

    //////////////////
    // Crypt
    #[snafu(display("Decryption failure"))]
    DecryptionFailure,

    #[snafu(display("Invalid user password"))]
    InvalidPassword,

    //////////////////
    // Misc
    #[snafu(display("IO Error"))]
    Io { source: io::Error },

    #[snafu(display("{}", msg))]
    Other { msg: String },
}

impl PdfError {
    pub fn is_try_later(&self) -> bool {
        matches!(*self, PdfError::TryLater)
    }
}

pub type Result<T, E = PdfError> = std::result::Result<T, E>;

impl From<io::Error> for PdfError {
    fn from(source: io::Error) -> PdfError {
        PdfError::Io { source }
    }
}
impl From<String> for PdfError {
    fn from(msg: String) -> PdfError {
        PdfError::Other { msg }
    }
}

macro_rules! err {
    ($e: expr) => ({
        return Err($e);
    })
}
macro_rules! bail {
    ($($t:tt)*) => {
        err!($crate::PdfError::Other { msg: format!($($t)*) })
    }
}
