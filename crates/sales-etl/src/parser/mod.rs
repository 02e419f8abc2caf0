//! Header and cell parsing
//!
//! - [`normalize`]: pure value conversions (dates, numbers, header names)
//! - [`header`]: maps a worksheet's header row onto the recognised columns

pub mod header;
pub mod normalize;

pub use header::{Column, SheetHeader};
pub use normalize::{clean_number, clean_text, normalize_header_name, parse_date};
