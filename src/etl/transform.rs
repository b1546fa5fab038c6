//! Transformer trait for record transformation

use eyre::Result;

/// Transformer trait for turning one item into another
///
/// Used by the storage layer to turn nested record remainders into
/// one-level rows before they are persisted.
///
/// # Example
/// ```
/// use shopify_extractor::etl::Transformer;
/// use eyre::Result;
///
/// struct FieldDropper {
///     fields: Vec<String>,
/// }
///
/// impl Transformer for FieldDropper {
///     type Input = serde_json::Value;
///     type Output = serde_json::Value;
///
///     fn transform(&self, mut input: Self::Input) -> Result<Self::Output> {
///         if let Some(obj) = input.as_object_mut() {
///             for field in &self.fields {
///                 obj.remove(field);
///             }
///         }
///         Ok(input)
///     }
/// }
/// ```
pub trait Transformer: Send + Sync {
    /// Input item type
    type Input: Send;

    /// Output item type after transformation
    type Output: Send;

    /// Transform a single item
    ///
    /// # Errors
    /// Returns an error if the item cannot be transformed
    fn transform(&self, input: Self::Input) -> Result<Self::Output>;

    /// Transform multiple items (default batch implementation)
    fn transform_many(&self, inputs: Vec<Self::Input>) -> Result<Vec<Self::Output>> {
        inputs.into_iter().map(|i| self.transform(i)).collect()
    }
}
