// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Reporting windows for cost queries.
//!
//! A [`TimeWindow`] is a pair of calendar dates with `end` strictly after
//! `start`. Callers either supply both bounds as `YYYY-MM-DD` strings or
//! neither, in which case the window runs from the first of the current month
//! to today. On the first day of a month the window ends on
//! [`FIRST_OF_MONTH_END_DAY`] instead, since today's usage has usually not
//! propagated to Cost Explorer yet.
//!
//! Dates are always re-serialized in the canonical format so that the same
//! window produces the same cache key however the caller spelled it.

use std::fmt;

use chrono::{Datelike, NaiveDate, Utc};

use crate::constants::{DATE_FORMAT, FIRST_OF_MONTH_END_DAY};
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TimeWindow {
    /// Resolves optional caller-supplied bounds against today's UTC date.
    pub fn resolve(start: Option<&str>, end: Option<&str>) -> Result<Self, AppError> {
        Self::resolve_on(start, end, Utc::now().date_naive())
    }

    /// Resolves optional bounds against an explicit `today`.
    ///
    /// Empty strings count as absent.
    pub fn resolve_on(
        start: Option<&str>,
        end: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, AppError> {
        let start = start.map(str::trim).filter(|s| !s.is_empty());
        let end = end.map(str::trim).filter(|s| !s.is_empty());

        match (start, end) {
            (None, None) => Ok(Self::default_for(today)),
            (Some(start), Some(end)) => Self::parse(start, end),
            (Some(_), None) => Err(AppError::BadRequest(
                "end must be provided together with start".to_string(),
            )),
            (None, Some(_)) => Err(AppError::BadRequest(
                "start must be provided together with end".to_string(),
            )),
        }
    }

    /// The default window for `today`: month-to-date, widened on the 1st.
    pub fn default_for(today: NaiveDate) -> Self {
        let start = today.with_day(1).unwrap_or(today);
        let end = if today.day() == 1 {
            today.with_day(FIRST_OF_MONTH_END_DAY).unwrap_or(today)
        } else {
            today
        };
        Self { start, end }
    }

    /// Parses both bounds and checks that `end` is after `start`.
    pub fn parse(start: &str, end: &str) -> Result<Self, AppError> {
        let start = parse_date("start", start)?;
        let end = parse_date("end", end)?;

        if end <= start {
            return Err(AppError::BadRequest("end must be after start".to_string()));
        }

        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Canonical `YYYY-MM-DD` start date.
    pub fn start_date(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    /// Canonical `YYYY-MM-DD` end date.
    pub fn end_date(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start_date(), self.end_date())
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| {
        tracing::debug!("[cost-api] failed to parse {} date {:?}: {}", field, value, e);
        AppError::BadRequest(format!(
            "invalid {} date '{}', expected YYYY-MM-DD",
            field, value
        ))
    })
}
