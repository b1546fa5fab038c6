//! Pipeline orchestration for ETL operations

use super::{Extractor, Loader, Transformer};
use crate::storage::Record;
use eyre::{Result, eyre};
use serde_json::Value;

/// ETL Pipeline that drains an extractor through a transformer into a loader
///
/// # Type Parameters
/// - `E`: Extractor type
/// - `T`: Transformer type (must transform from E::Item)
/// - `L`: Loader type (must load T::Output)
///
/// # Example
/// ```no_run
/// use shopify_extractor::etl::Pipeline;
/// # use shopify_extractor::etl::{Extractor, Transformer, Loader};
/// # use eyre::Result;
/// # struct MyExtractor(bool);
/// # impl Extractor for MyExtractor {
/// #     type Item = i32;
/// #     async fn next_batch(&mut self) -> Result<Option<Vec<Self::Item>>> {
/// #         Ok(std::mem::take(&mut self.0).then(|| vec![1, 2]))
/// #     }
/// # }
/// # struct MyTransformer;
/// # impl Transformer for MyTransformer {
/// #     type Input = i32;
/// #     type Output = i32;
/// #     fn transform(&self, input: Self::Input) -> Result<Self::Output> { Ok(input) }
/// # }
/// # struct MyLoader;
/// # impl Loader for MyLoader {
/// #     type Item = i32;
/// #     fn load(&mut self, items: Vec<Self::Item>) -> Result<usize> { Ok(items.len()) }
/// # }
///
/// # async fn example() -> Result<()> {
/// let mut pipeline = Pipeline::new(
///     MyExtractor(true),
///     MyTransformer,
///     MyLoader,
/// );
///
/// let count = pipeline.run().await?;
/// println!("Processed {} items", count);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<E, T, L> {
    extractor: E,
    transformer: T,
    loader: L,
}

impl<E, T, L> Pipeline<E, T, L>
where
    E: Extractor,
    T: Transformer<Input = E::Item>,
    L: Loader<Item = T::Output>,
{
    /// Create a new pipeline
    pub fn new(extractor: E, transformer: T, loader: L) -> Self {
        Self {
            extractor,
            transformer,
            loader,
        }
    }

    /// Run the pipeline until the extractor is exhausted
    ///
    /// Each batch is extracted, transformed and loaded before the next one is
    /// requested.
    ///
    /// Returns the number of items successfully loaded
    ///
    /// # Errors
    /// Returns an error as soon as any stage fails
    pub async fn run(&mut self) -> Result<usize> {
        log::debug!("Starting ETL pipeline");

        let mut batches = 0usize;
        let mut count = 0usize;
        while let Some(items) = self.extractor.next_batch().await? {
            batches += 1;
            if items.is_empty() {
                log::debug!("Batch {} is empty", batches);
                continue;
            }
            log::debug!("Extracted {} items in batch {}", items.len(), batches);

            let transformed = self.transformer.transform_many(items)?;
            count += self.loader.load(transformed)?;
        }

        if count == 0 {
            log::debug!("No items extracted, pipeline complete");
        } else {
            log::debug!("Loaded {} items from {} batches", count, batches);
        }
        Ok(count)
    }

    /// Give back the loader, e.g. to close its writers
    pub fn into_loader(self) -> L {
        self.loader
    }
}

/// Turns raw API items into records
///
/// Anything other than a JSON object is rejected; nulls are kept as empty
/// records, which the decomposer skips.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordTransformer;

impl Transformer for RecordTransformer {
    type Input = Value;
    type Output = Record;

    fn transform(&self, input: Self::Input) -> Result<Self::Output> {
        match input {
            Value::Object(record) => Ok(record),
            Value::Null => Ok(Record::new()),
            other => Err(eyre!("Expected a record object, got {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::Result;
    use serde_json::json;

    struct MockExtractor(Vec<Vec<i32>>);

    impl Extractor for MockExtractor {
        type Item = i32;
        async fn next_batch(&mut self) -> Result<Option<Vec<Self::Item>>> {
            if self.0.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.0.remove(0)))
            }
        }
    }

    struct DoubleTransformer;

    impl Transformer for DoubleTransformer {
        type Input = i32;
        type Output = i32;
        fn transform(&self, input: Self::Input) -> Result<Self::Output> {
            Ok(input * 2)
        }
    }

    #[derive(Default)]
    struct SumLoader {
        sum: i32,
        loads: usize,
    }

    impl Loader for SumLoader {
        type Item = i32;
        fn load(&mut self, items: Vec<Self::Item>) -> Result<usize> {
            self.sum += items.iter().sum::<i32>();
            self.loads += 1;
            Ok(items.len())
        }
    }

    #[tokio::test]
    async fn test_pipeline() {
        let mut pipeline = Pipeline::new(
            MockExtractor(vec![vec![1, 2], vec![], vec![3]]),
            DoubleTransformer,
            SumLoader::default(),
        );

        let count = pipeline.run().await.unwrap();
        assert_eq!(count, 3);

        let loader = pipeline.into_loader();
        assert_eq!(loader.sum, 12); // (1+2+3)*2 = 12
        assert_eq!(loader.loads, 2);
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let mut pipeline = Pipeline::new(
            MockExtractor(vec![]),
            DoubleTransformer,
            SumLoader::default(),
        );

        let count = pipeline.run().await.unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_record_transformer() {
        let record = RecordTransformer.transform(json!({"id": 1})).unwrap();
        assert_eq!(record["id"], json!(1));
        assert!(RecordTransformer.transform(Value::Null).unwrap().is_empty());
        assert!(RecordTransformer.transform(json!(5)).is_err());
    }
}
