//! The SQL execution collaborator.
//!
//! The cache never renders SQL. A load hands the collaborator a structured
//! [`AggregationStatement`] together with the pooled connection it may use,
//! and receives grouped rows back.

use crate::pool::ConnectionLease;
use async_trait::async_trait;
use rolap_core::{
    AggregatedRow, AggregationFunction, ColumnPredicate, CompoundPredicate, HeaderId, MeasureId,
    RolapResult, SchemaId, SegmentHeader, StarId,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// A grouped aggregation over one star.
///
/// Rows must come back keyed by `group_by` in order, one row per distinct
/// key, with the measure aggregated by `aggregator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationStatement {
    pub segment: HeaderId,
    pub schema: SchemaId,
    pub star: StarId,
    pub measure: MeasureId,
    pub aggregator: AggregationFunction,
    pub group_by: Vec<String>,
    /// Constrained columns only; unconstrained columns are omitted.
    pub filters: BTreeMap<String, ColumnPredicate>,
    pub compound: Vec<CompoundPredicate>,
}

impl AggregationStatement {
    /// The statement that loads `header` as is.
    pub fn for_header(header: &SegmentHeader, aggregator: AggregationFunction) -> Self {
        Self {
            segment: header.unique_id(),
            schema: header.schema().clone(),
            star: header.star().clone(),
            measure: header.measure().clone(),
            aggregator,
            group_by: header.column_names(),
            filters: header
                .columns()
                .iter()
                .filter(|(_, p)| !p.is_unconstrained())
                .map(|(c, p)| (c.clone(), p.clone()))
                .collect(),
            compound: header.compound().iter().cloned().collect(),
        }
    }

    /// Drop the filter on `column`; used when the filter admits every value
    /// the column has.
    pub fn without_filter(mut self, column: &str) -> Self {
        self.filters.remove(column);
        self
    }
}

/// Runs queries against the warehouse.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Number of distinct values of `column` in `star`.
    ///
    /// Issued as a nested query on behalf of an in-flight load.
    async fn cardinality(
        &self,
        connection: &ConnectionLease,
        star: &StarId,
        column: &str,
    ) -> RolapResult<u64>;

    /// Run an aggregation and return its grouped rows.
    async fn execute(
        &self,
        connection: &ConnectionLease,
        statement: &AggregationStatement,
    ) -> RolapResult<Vec<AggregatedRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_for_header() {
        let header = SegmentHeader::builder("FoodMart", "sales", "unit_sales")
            .column("family", ColumnPredicate::any_of(["Drink", "Food"]))
            .unconstrained("state")
            .build();
        let statement = AggregationStatement::for_header(&header, AggregationFunction::Sum);
        assert_eq!(statement.group_by, vec!["family".to_string(), "state".to_string()]);
        assert_eq!(statement.filters.len(), 1);
        assert_eq!(statement.segment, header.unique_id());

        let unfiltered = statement.without_filter("family");
        assert!(unfiltered.filters.is_empty());
    }
}
