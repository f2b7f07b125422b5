//! Filter expressions for the permits layer.
//!
//! Every user supplied literal goes through [`escape_literal`] before it is
//! interpolated, so a value such as `O'Brien` can neither break the predicate
//! nor smuggle in extra clauses.

use std::fmt;

use arcgis_feature::models::MATCH_ALL;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::{PermitError, Result};

pub const FIELD_ADDRESS: &str = "Address";
pub const FIELD_NEIGHBORHOOD: &str = "Neighborhood";
pub const FIELD_CASE_NUMBER: &str = "CaseNumber";
pub const FIELD_ISSUED_DATE: &str = "IssuedDate";

const DATE_FORMAT: &str = "%Y-%m-%d";
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// A search intent that renders to a filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermitFilter {
    /// Matches every permit
    All,
    /// `Address LIKE '%…%'`
    AddressContains(String),
    /// `Neighborhood LIKE '%…%'`
    NeighborhoodContains(String),
    /// `CaseNumber = '…'`
    CaseNumber(String),
    /// Issued between two epoch-millisecond bounds, both inclusive
    IssuedBetween { start_ms: i64, end_ms: i64 },
    /// Issued at or after an epoch-millisecond cutoff
    IssuedSince(i64),
    /// Caller supplied predicate, passed through untouched
    Raw(String),
}

impl PermitFilter {
    /// Substring match on the address. An empty value matches everything.
    pub fn address(address: &str) -> Self {
        if address.is_empty() {
            Self::All
        } else {
            Self::AddressContains(address.to_owned())
        }
    }

    /// Substring match on the neighborhood. An empty value matches everything.
    pub fn neighborhood(neighborhood: &str) -> Self {
        if neighborhood.is_empty() {
            Self::All
        } else {
            Self::NeighborhoodContains(neighborhood.to_owned())
        }
    }

    /// Exact match on the case number.
    pub fn case_number(case_number: &str) -> Self {
        Self::CaseNumber(case_number.to_owned())
    }

    /// Permits issued between two `YYYY-MM-DD` dates.
    ///
    /// Each bound is midnight UTC of its date. A bound that is not a valid
    /// `YYYY-MM-DD` date is a validation error naming the value.
    pub fn date_range(start_date: &str, end_date: &str) -> Result<Self> {
        let start_ms = parse_date_millis("start_date", start_date)?;
        let end_ms = parse_date_millis("end_date", end_date)?;
        Ok(Self::IssuedBetween { start_ms, end_ms })
    }

    /// Permits issued since the start of the day `days` days before `now`.
    pub fn issued_within_days(days: u32, now: DateTime<Utc>) -> Self {
        Self::IssuedSince(recent_cutoff_millis(days, now))
    }

    /// A raw predicate. Blank input matches everything.
    pub fn raw(predicate: &str) -> Self {
        if predicate.trim().is_empty() {
            Self::All
        } else {
            Self::Raw(predicate.to_owned())
        }
    }

    /// Render the filter expression sent as `where`.
    pub fn where_clause(&self) -> String {
        match self {
            Self::All => MATCH_ALL.to_owned(),
            Self::AddressContains(value) => {
                format!("{FIELD_ADDRESS} LIKE '%{}%'", escape_literal(value))
            }
            Self::NeighborhoodContains(value) => {
                format!("{FIELD_NEIGHBORHOOD} LIKE '%{}%'", escape_literal(value))
            }
            Self::CaseNumber(value) => {
                format!("{FIELD_CASE_NUMBER} = '{}'", escape_literal(value))
            }
            Self::IssuedBetween { start_ms, end_ms } => format!(
                "{FIELD_ISSUED_DATE} >= {start_ms} AND {FIELD_ISSUED_DATE} <= {end_ms}"
            ),
            Self::IssuedSince(cutoff_ms) => format!("{FIELD_ISSUED_DATE} >= {cutoff_ms}"),
            Self::Raw(predicate) => predicate.clone(),
        }
    }
}

impl fmt::Display for PermitFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.where_clause())
    }
}

/// Double embedded single quotes so the value is safe inside `'…'`.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Parse a strict `YYYY-MM-DD` date into epoch milliseconds at midnight UTC.
///
/// `field` names the argument in the error message.
pub fn parse_date_millis(field: &str, value: &str) -> Result<i64> {
    let invalid = |reason: String| {
        PermitError::validation_error(format!(
            "Invalid date format. Please use YYYY-MM-DD format. Error: {field} '{value}' {reason}"
        ))
    };

    // chrono accepts unpadded months and days; the exact shape is required here
    let well_formed = value.len() == 10
        && value.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return Err(invalid("does not match YYYY-MM-DD".to_owned()));
    }

    let date = NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|err| invalid(format!("is not a valid date ({err})")))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
}

/// Calendar date (UTC) of an epoch-millisecond timestamp.
pub fn millis_to_date(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

/// Start of today (UTC) minus `days` days, in epoch milliseconds.
pub fn recent_cutoff_millis(days: u32, now: DateTime<Utc>) -> i64 {
    let start_of_today = now
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp_millis();
    start_of_today - i64::from(days) * MILLIS_PER_DAY
}
