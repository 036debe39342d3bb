//! Colour detection primitives for the sorting pipeline.
//!
//! The crate is deliberately small and synchronous: a calibrated colour
//! model, an atomically shared active range, and the two pure image stages
//! (segmentation and shape qualification) that the pipeline runs per frame.

pub use color::{ColorClass, HsvRange, ParseColorClassError};
pub use params::ActiveRange;
pub use qualify::{MIN_QUALIFYING_RADIUS, QualifyingRegion, first_qualifying, qualify};
pub use segment::segment;

mod color;
mod params;
mod qualify;
mod segment;
