use serde::Serialize;
use vellum_core::element::{Element, ValidationScenario};
use vellum_core::query::ElementQuery;
use vellum_core::types::{DbId, SiteId};

use super::save::{SaveOptions, SaveOutcome};
use super::ElementService;
use crate::error::ElementError;
use crate::unit_of_work::UnitOfWork;

/// Options for bulk resaves and propagations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Keep going after a failed element. Falls back to the engine config.
    pub continue_on_error: Option<bool>,
    pub update_search_index: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_error: None,
            update_search_index: true,
        }
    }
}

impl BatchOptions {
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = Some(continue_on_error);
        self
    }

    pub fn without_search_index(mut self) -> Self {
        self.update_search_index = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub element_id: Option<DbId>,
    pub message: String,
}

/// What a bulk operation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

impl ElementService {
    /// Resave every element the query matches.
    ///
    /// Each element is saved in its own transaction with the essentials
    /// rules and propagated to its other sites. With `continue_on_error`, a
    /// failure is logged and recorded in the report; otherwise the first
    /// failure is returned and the remaining elements are left alone.
    /// Elements saved before the failure stay saved.
    ///
    /// Cache tags from all saves are invalidated in a single batch at the
    /// end.
    pub async fn resave_many(
        &self,
        uow: &mut UnitOfWork,
        query: &ElementQuery,
        options: BatchOptions,
    ) -> Result<BatchReport, ElementError> {
        let continue_on_error = options
            .continue_on_error
            .unwrap_or(self.config.continue_on_error);
        let save_options = SaveOptions {
            update_search_index: options.update_search_index,
            ..SaveOptions::default()
        };
        let elements = self.store.query(query).await?;

        self.begin_tags(uow);
        let mut report = BatchReport::default();
        for mut element in elements {
            report.processed += 1;
            element.resaving = true;
            element.scenario = ValidationScenario::Essentials;
            let result = match self.save_element(uow, &mut element, save_options).await {
                Ok(SaveOutcome::Saved) => Ok(()),
                Ok(SaveOutcome::Invalid) => Err(ElementError::ValidationFailed {
                    element_id: element.id,
                    errors: element.errors().clone(),
                }),
                Ok(SaveOutcome::Vetoed(reason)) => Err(ElementError::Vetoed(reason)),
                Err(e) => Err(e),
            };
            if let Err(e) = settle(&mut report, &element, result, continue_on_error) {
                self.flush_tags(uow).await;
                return Err(e);
            }
        }
        self.flush_tags(uow).await;

        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed(),
            "Resaved elements"
        );
        Ok(report)
    }

    /// Propagate every element the query matches into `target_site`, or
    /// into all of each element's other sites.
    pub async fn propagate_many(
        &self,
        uow: &mut UnitOfWork,
        query: &ElementQuery,
        target_site: Option<SiteId>,
        options: BatchOptions,
    ) -> Result<BatchReport, ElementError> {
        let continue_on_error = options
            .continue_on_error
            .unwrap_or(self.config.continue_on_error);
        let elements = self.store.query(query).await?;

        self.begin_tags(uow);
        let mut report = BatchReport::default();
        for mut element in elements {
            report.processed += 1;
            element.resaving = true;
            let result = self.propagate(uow, &mut element, target_site).await.map(|_| ());
            if let Err(e) = settle(&mut report, &element, result, continue_on_error) {
                self.flush_tags(uow).await;
                return Err(e);
            }
        }
        self.flush_tags(uow).await;

        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed(),
            ?target_site,
            "Propagated elements"
        );
        Ok(report)
    }
}

/// Record one element's result, or hand the error back when the batch
/// should stop.
fn settle(
    report: &mut BatchReport,
    element: &Element,
    result: Result<(), ElementError>,
    continue_on_error: bool,
) -> Result<(), ElementError> {
    match result {
        Ok(()) => {
            report.succeeded += 1;
            Ok(())
        }
        Err(e) if continue_on_error => {
            tracing::warn!(
                element_id = ?element.id,
                site_id = element.site_id,
                error = %e,
                "Skipping element after failure"
            );
            report.failures.push(BatchFailure {
                element_id: element.id,
                message: e.to_string(),
            });
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn settle_records_failures_when_continuing() {
        let mut report = BatchReport::default();
        let element = Element::new("entry", 1);
        settle(&mut report, &element, Ok(()), true).unwrap();
        settle(
            &mut report,
            &element,
            Err(ElementError::Vetoed("locked".into())),
            true,
        )
        .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed(), 1);
        assert!(report.failures[0].message.contains("locked"));
    }

    #[test]
    fn settle_returns_the_error_when_stopping() {
        let mut report = BatchReport::default();
        let element = Element::new("entry", 1);
        let result = settle(
            &mut report,
            &element,
            Err(ElementError::Vetoed("locked".into())),
            false,
        );
        assert_matches!(result, Err(ElementError::Vetoed(_)));
        assert!(report.failures.is_empty());
    }
}
