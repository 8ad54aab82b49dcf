#![forbid(unsafe_code)]
//! TrenchBroom `.map` document model and text parser.

pub mod coords;
pub mod document;
pub mod parser;

pub use document::{Brush, Entity, Face, Map, Plane, PlayerStart};
pub use parser::{load_map_file, parse_map, MapError, ParseReport, ParsedMap};
