//! Loader trait for loading data to destinations

use eyre::Result;

/// Loader trait for writing items to a destination
///
/// Loading is synchronous: a batch is fully written before the next one is
/// pulled from the extractor.
///
/// # Example
/// ```
/// use shopify_extractor::etl::Loader;
/// use eyre::Result;
///
/// struct Counter(usize);
///
/// impl Loader for Counter {
///     type Item = String;
///
///     fn load(&mut self, items: Vec<Self::Item>) -> Result<usize> {
///         self.0 += items.len();
///         Ok(items.len())
///     }
/// }
/// ```
pub trait Loader {
    /// The type of items to load
    type Item;

    /// Load items to the destination
    ///
    /// Returns the number of items successfully loaded
    ///
    /// # Errors
    /// Returns an error if loading fails (I/O, validation, etc.)
    fn load(&mut self, items: Vec<Self::Item>) -> Result<usize>;
}
