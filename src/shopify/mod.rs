//! Shopify resources, their decomposition rules and windowed extraction

pub mod entities;
mod extractor;
mod resources;
mod windows;

pub use extractor::{PAGE_LIMIT, WindowedExtractor};
pub use resources::Resource;
pub use windows::{DateWindow, format_timestamp, split_windows};
