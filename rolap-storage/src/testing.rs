//! Scripted SQL executor for unit tests.

use crate::executor::{AggregationStatement, SqlExecutor};
use crate::pool::ConnectionLease;
use async_trait::async_trait;
use rolap_core::{AggregatedRow, ColumnValue, RolapResult, SegmentError, StarId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Answers every statement from a fixed row set keyed by the statement's
/// group-by columns, applying the statement's filters.
pub(crate) struct ScriptedExecutor {
    rows: Vec<AggregatedRow>,
    cardinality: u64,
    latency: Duration,
    fail_on: Option<ColumnValue>,
    execute_calls: AtomicUsize,
    cardinality_calls: AtomicUsize,
    statements: Mutex<Vec<AggregationStatement>>,
}

impl ScriptedExecutor {
    pub(crate) fn new(rows: Vec<AggregatedRow>) -> Self {
        Self {
            rows,
            cardinality: 1000,
            latency: Duration::ZERO,
            fail_on: None,
            execute_calls: AtomicUsize::new(0),
            cardinality_calls: AtomicUsize::new(0),
            statements: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_cardinality(mut self, cardinality: u64) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail any statement whose filters mention `value`.
    pub(crate) fn failing_on(mut self, value: impl Into<ColumnValue>) -> Self {
        self.fail_on = Some(value.into());
        self
    }

    pub(crate) fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cardinality_calls(&self) -> usize {
        self.cardinality_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn statements(&self) -> Vec<AggregationStatement> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn cardinality(
        &self,
        _connection: &ConnectionLease,
        _star: &StarId,
        _column: &str,
    ) -> RolapResult<u64> {
        self.cardinality_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.cardinality)
    }

    async fn execute(
        &self,
        _connection: &ConnectionLease,
        statement: &AggregationStatement,
    ) -> RolapResult<Vec<AggregatedRow>> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.statements.lock().unwrap().push(statement.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(bad) = &self.fail_on {
            if statement.filters.values().any(|p| p.accepts(bad) && !p.is_unconstrained()) {
                return Err(SegmentError::LoadFailed {
                    segment: statement.segment.short().to_string(),
                    reason: format!("injected failure on {}", bad),
                }
                .into());
            }
        }

        Ok(self
            .rows
            .iter()
            .filter(|row| row.key.len() == statement.group_by.len())
            .filter(|row| {
                statement.filters.iter().all(|(column, predicate)| {
                    statement
                        .group_by
                        .iter()
                        .position(|c| c == column)
                        .is_some_and(|i| predicate.accepts(&row.key[i]))
                })
            })
            .cloned()
            .collect())
    }
}
