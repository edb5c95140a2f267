//! The schema metadata collaborator.

use rolap_core::{AggregationFunction, CatalogError, MeasureId, RolapResult, SchemaId, StarId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Schema metadata the cache needs about stars and measures.
pub trait SchemaCatalog: Send + Sync {
    /// Aggregation function of a stored measure.
    fn aggregator(&self, star: &StarId, measure: &MeasureId) -> RolapResult<AggregationFunction>;

    /// Schema a star belongs to.
    fn schema_of(&self, star: &StarId) -> RolapResult<SchemaId>;

    /// The finest-grain dimension columns of a star. Writeback allocates
    /// over cells fixed on all of these.
    fn leaf_columns(&self, star: &StarId) -> RolapResult<Vec<String>>;
}

/// Definition of one star.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarDefinition {
    pub schema: SchemaId,
    pub star: StarId,
    pub leaf_columns: Vec<String>,
    pub measures: BTreeMap<MeasureId, AggregationFunction>,
}

impl StarDefinition {
    pub fn new(schema: impl Into<SchemaId>, star: impl Into<StarId>) -> Self {
        Self {
            schema: schema.into(),
            star: star.into(),
            leaf_columns: Vec::new(),
            measures: BTreeMap::new(),
        }
    }

    pub fn with_leaf_column(mut self, column: impl Into<String>) -> Self {
        self.leaf_columns.push(column.into());
        self
    }

    pub fn with_measure(
        mut self,
        measure: impl Into<MeasureId>,
        aggregator: AggregationFunction,
    ) -> Self {
        self.measures.insert(measure.into(), aggregator);
        self
    }
}

/// A catalog held in memory, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    stars: HashMap<StarId, StarDefinition>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_star(mut self, definition: StarDefinition) -> Self {
        self.stars.insert(definition.star.clone(), definition);
        self
    }

    fn star(&self, star: &StarId) -> Result<&StarDefinition, CatalogError> {
        self.stars.get(star).ok_or_else(|| CatalogError::UnknownStar {
            star: star.to_string(),
        })
    }
}

impl SchemaCatalog for InMemoryCatalog {
    fn aggregator(&self, star: &StarId, measure: &MeasureId) -> RolapResult<AggregationFunction> {
        let definition = self.star(star)?;
        definition.measures.get(measure).copied().ok_or_else(|| {
            CatalogError::UnknownMeasure {
                star: star.to_string(),
                measure: measure.to_string(),
            }
            .into()
        })
    }

    fn schema_of(&self, star: &StarId) -> RolapResult<SchemaId> {
        Ok(self.star(star)?.schema.clone())
    }

    fn leaf_columns(&self, star: &StarId) -> RolapResult<Vec<String>> {
        Ok(self.star(star)?.leaf_columns.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolap_core::RolapError;

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new().with_star(
            StarDefinition::new("FoodMart", "sales")
                .with_leaf_column("family")
                .with_leaf_column("product")
                .with_measure("unit_sales", AggregationFunction::Sum)
                .with_measure("customer_count", AggregationFunction::DistinctCount),
        )
    }

    #[test]
    fn test_lookup_measures() {
        let catalog = catalog();
        assert_eq!(
            catalog
                .aggregator(&"sales".into(), &"customer_count".into())
                .unwrap(),
            AggregationFunction::DistinctCount
        );
        assert_eq!(
            catalog.schema_of(&"sales".into()).unwrap(),
            SchemaId::new("FoodMart")
        );
        assert_eq!(catalog.leaf_columns(&"sales".into()).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_names() {
        let catalog = catalog();
        assert!(matches!(
            catalog.aggregator(&"inventory".into(), &"units".into()),
            Err(RolapError::Catalog(CatalogError::UnknownStar { .. }))
        ));
        assert!(matches!(
            catalog.aggregator(&"sales".into(), &"profit".into()),
            Err(RolapError::Catalog(CatalogError::UnknownMeasure { .. }))
        ));
    }
}
