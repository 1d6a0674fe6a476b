//! Rasterization path, kept as an alternative strategy to ray tracing

mod strategy;

pub use strategy::{full_viewport, RasterStrategy};
