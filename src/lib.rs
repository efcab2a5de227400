#![allow(clippy::len_zero, clippy::manual_map)]

#[macro_use] extern crate snafu;
#[macro_use] extern crate log;

#[macro_use]
pub mod error;
pub mod object;
pub mod primitive;
pub mod xref;
pub mod backend;
pub mod stream;
pub mod cache;
pub mod file;

pub mod enc;
pub mod crypt;

pub use crate::error::PdfError;
