//! # fieldprod Colormap
//!
//! Class-map rendering for productivity zones.
//!
//! Classes 1..=N+1 map to palette entries in order; classes beyond the end
//! of the palette reuse its last colour and class 0 (unclassified) is fully
//! transparent. The main entry points are [`classes_to_rgba`] and
//! [`render_png`].
//!
//! ```ignore
//! use fieldprod_colormap::{render_png, Palette};
//!
//! let png = render_png(&analysis.class_map, &Palette::default())?;
//! std::fs::write("zones.png", png)?;
//! ```

mod palette;
mod render;

pub use palette::{Palette, Rgb, PRODUCTIVITY_HEX};
pub use render::{classes_to_rgba, render_png};
