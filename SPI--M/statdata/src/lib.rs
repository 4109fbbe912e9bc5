#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Stockholm Price Intelligence data layer: statistics export decoders and
//! canonical training-table preparation.

/// Decoder, table and preparation errors.
#[path = "../error.rs"]
pub mod error;

/// Column-oriented table with CSV I/O.
#[path = "../table.rs"]
pub mod table;

/// Mixed-radix enumeration of category combinations.
#[path = "../cartesian.rs"]
pub mod cartesian;

/// JSON-stat2 cube decoder.
#[path = "../jsonstat.rs"]
pub mod jsonstat;

/// PC-Axis columnar decoder.
#[path = "../pcaxis.rs"]
pub mod pcaxis;

/// Export download and format sniffing.
#[path = "../fetch.rs"]
pub mod fetch;

/// Canonical schema mapping and row filters.
#[path = "../prepare.rs"]
pub mod prepare;

/// Synthetic listing generator.
#[path = "../synth.rs"]
pub mod synth;

pub use error::{DecodeError, FetchError, PrepareError, TableError};
pub use fetch::{decode_as, decode_auto, fetch_export, ExportFormat};
pub use jsonstat::{decode_cube, decode_cube_str, UNKNOWN_CATEGORY};
pub use pcaxis::{decode_px, PxMetadata};
pub use prepare::{prepare, prepare_files, DatasetSummary, PrepareOptions, CANONICAL_COLUMNS};
pub use synth::synthesize;
pub use table::{Column, Table};
