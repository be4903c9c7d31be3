//! Domain types for klinesync

pub mod bar;
pub mod resolution;
pub mod symbol;
pub mod window;

pub use bar::Bar;
pub use resolution::{Resolution, ResolutionRequest};
pub use symbol::{normalize_ticker, Symbol, Venue};
pub use window::{truncate_to_day, TimeWindow, WindowError};
