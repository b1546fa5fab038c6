//! Extractor trait for paged data extraction

use eyre::Result;

/// Extractor trait for pulling items from a source one batch at a time
///
/// Implementors decide what a batch is; for the Shopify API it is one page of
/// one query window. `Ok(None)` means the source is exhausted.
///
/// # Example
/// ```no_run
/// use shopify_extractor::etl::Extractor;
/// use eyre::Result;
///
/// struct Countdown(u32);
///
/// impl Extractor for Countdown {
///     type Item = u32;
///
///     async fn next_batch(&mut self) -> Result<Option<Vec<Self::Item>>> {
///         if self.0 == 0 {
///             return Ok(None);
///         }
///         self.0 -= 1;
///         Ok(Some(vec![self.0]))
///     }
/// }
/// ```
pub trait Extractor: Send {
    /// The type of items extracted
    type Item: Send;

    /// Pull the next batch from the source
    ///
    /// # Errors
    /// Returns an error if extraction fails (network, I/O, parsing, etc.)
    fn next_batch(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Option<Vec<Self::Item>>>> + Send;
}
