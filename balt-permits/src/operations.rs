//! Named operations exposed to tool-calling agents.
//!
//! Each operation validates its arguments, builds a [`PermitFilter`], runs the
//! paged fetch and renders the result as text. Validation problems come back
//! as ordinary text, fetch failures as a single error block, and only an
//! unknown operation name is returned as `Err`.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::client::PermitClient;
use crate::error::{PermitError, Result};
use crate::filter::PermitFilter;
use crate::format::{format_permit, format_permits};

pub const DEFAULT_LIMIT: u32 = 50;
pub const DEFAULT_DAYS: u32 = 30;

/// The operations this crate can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SearchByAddress,
    SearchByDateRange,
    SearchByNeighborhood,
    SearchByCaseNumber,
    RecentPermits,
    CountPermits,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::SearchByAddress,
        Operation::SearchByDateRange,
        Operation::SearchByNeighborhood,
        Operation::SearchByCaseNumber,
        Operation::RecentPermits,
        Operation::CountPermits,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::SearchByAddress => "search_permits_by_address",
            Operation::SearchByDateRange => "search_permits_by_date_range",
            Operation::SearchByNeighborhood => "search_permits_by_neighborhood",
            Operation::SearchByCaseNumber => "search_permits_by_case_number",
            Operation::RecentPermits => "get_recent_permits",
            Operation::CountPermits => "count_permits",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn spec(self) -> OperationSpec {
        let limit = json!({
            "type": "integer",
            "minimum": 1,
            "description": "Maximum number of results to return (default: 50)",
            "default": DEFAULT_LIMIT
        });

        let (description, input_schema) = match self {
            Operation::SearchByAddress => (
                "Search for building permits by address or address pattern. Returns permits matching the address search.",
                json!({
                    "type": "object",
                    "properties": {
                        "address": {"type": "string", "description": "Address or part of address to search for (e.g., '100 Main St' or 'Main')"},
                        "limit": limit
                    },
                    "required": ["address"]
                }),
            ),
            Operation::SearchByDateRange => (
                "Search for permits issued within a date range. Dates should be in YYYY-MM-DD format.",
                json!({
                    "type": "object",
                    "properties": {
                        "start_date": {"type": "string", "description": "Start date in YYYY-MM-DD format (e.g., '2024-01-01')"},
                        "end_date": {"type": "string", "description": "End date in YYYY-MM-DD format (e.g., '2024-12-31')"},
                        "limit": limit
                    },
                    "required": ["start_date", "end_date"]
                }),
            ),
            Operation::SearchByNeighborhood => (
                "Search for permits in a specific neighborhood.",
                json!({
                    "type": "object",
                    "properties": {
                        "neighborhood": {"type": "string", "description": "Neighborhood name (e.g., 'Fells Point', 'Canton')"},
                        "limit": limit
                    },
                    "required": ["neighborhood"]
                }),
            ),
            Operation::SearchByCaseNumber => (
                "Get a specific permit by case number (e.g., 'COM2018-86246').",
                json!({
                    "type": "object",
                    "properties": {
                        "case_number": {"type": "string", "description": "Permit case number (e.g., 'COM2018-86246')"}
                    },
                    "required": ["case_number"]
                }),
            ),
            Operation::RecentPermits => (
                "Get recently issued permits. Returns the most recent permits up to the specified limit.",
                json!({
                    "type": "object",
                    "properties": {
                        "limit": limit,
                        "days": {
                            "type": "integer",
                            "minimum": 0,
                            "description": "Number of days to look back (default: 30)",
                            "default": DEFAULT_DAYS
                        }
                    }
                }),
            ),
            Operation::CountPermits => (
                "Count permits matching a query. Useful for checking how many permits match criteria before fetching details.",
                json!({
                    "type": "object",
                    "properties": {
                        "where_clause": {"type": "string", "description": "SQL WHERE clause for filtering (e.g., \"Address LIKE '%Main%'\", \"Council_District = 1\")"}
                    },
                    "required": ["where_clause"]
                }),
            ),
        };

        OperationSpec {
            name: self.name(),
            description,
            input_schema,
        }
    }
}

/// Name, description and JSON Schema of one operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSpec {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Every declared operation, in a stable order.
pub fn operation_specs() -> Vec<OperationSpec> {
    Operation::ALL.into_iter().map(Operation::spec).collect()
}

/// Text produced by one operation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutput {
    pub content: Vec<String>,
    pub is_error: bool,
}

impl OperationOutput {
    fn text<S: Into<String>>(text: S) -> Self {
        Self {
            content: vec![text.into()],
            is_error: false,
        }
    }

    fn error<S: Into<String>>(text: S) -> Self {
        Self {
            content: vec![text.into()],
            is_error: true,
        }
    }

    /// All blocks joined, mostly for logging and tests.
    pub fn joined(&self) -> String {
        self.content.join("\n")
    }
}

#[derive(Debug, Deserialize)]
struct AddressParams {
    address: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct DateRangeParams {
    start_date: String,
    end_date: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct NeighborhoodParams {
    neighborhood: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct CaseNumberParams {
    case_number: String,
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default = "default_days")]
    days: u32,
}

#[derive(Debug, Deserialize)]
struct CountParams {
    where_clause: String,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

fn default_days() -> u32 {
    DEFAULT_DAYS
}

fn parse_args<T>(operation: Operation, arguments: Value) -> Result<T>
where
    T: DeserializeOwned,
{
    serde_json::from_value(arguments).map_err(|err| {
        PermitError::validation_error(format!("Invalid arguments for {}: {err}", operation.name()))
    })
}

fn checked_limit(limit: u32) -> Result<usize> {
    if limit == 0 {
        return Err(PermitError::validation_error("limit must be at least 1"));
    }
    Ok(limit as usize)
}

/// Dispatches operation calls to a shared [`PermitClient`].
#[derive(Debug)]
pub struct PermitOperations {
    client: PermitClient,
}

impl PermitOperations {
    pub fn new(client: PermitClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &PermitClient {
        &self.client
    }

    pub fn specs(&self) -> Vec<OperationSpec> {
        operation_specs()
    }

    /// Run the operation called `name` with JSON `arguments`.
    ///
    /// Absent arguments are treated as an empty object.
    pub async fn call(&self, name: &str, arguments: Option<Value>) -> Result<OperationOutput> {
        let operation =
            Operation::from_name(name).ok_or_else(|| PermitError::unknown_operation(name))?;
        let arguments = match arguments {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(value) => value,
        };

        info!(operation = name, "calling operation");
        match self.run(operation, arguments).await {
            Ok(text) => Ok(OperationOutput::text(text)),
            Err(PermitError::ValidationError { message }) => {
                info!(operation = name, %message, "rejected arguments");
                Ok(OperationOutput::text(message))
            }
            Err(err @ PermitError::FetchError(_)) => {
                warn!(operation = name, error = %err, "operation failed");
                Ok(OperationOutput::error(format!("Error: {err}")))
            }
            Err(err) => Err(err),
        }
    }

    async fn run(&self, operation: Operation, arguments: Value) -> Result<String> {
        match operation {
            Operation::SearchByAddress => {
                let params: AddressParams = parse_args(operation, arguments)?;
                let limit = checked_limit(params.limit)?;
                let fetched = self
                    .client
                    .search(&PermitFilter::address(&params.address), Some(limit))
                    .await?;
                if fetched.is_empty() {
                    return Ok(format!(
                        "No permits found matching address: {}",
                        params.address
                    ));
                }
                Ok(format!(
                    "Found {} permit(s) matching '{}':\n\n{}",
                    fetched.total_retrieved,
                    params.address,
                    format_permits(&fetched.features)
                ))
            }
            Operation::SearchByDateRange => {
                let params: DateRangeParams = parse_args(operation, arguments)?;
                let filter = PermitFilter::date_range(&params.start_date, &params.end_date)?;
                let limit = checked_limit(params.limit)?;
                let fetched = self.client.search(&filter, Some(limit)).await?;
                if fetched.is_empty() {
                    return Ok(format!(
                        "No permits found for date range {} to {}",
                        params.start_date, params.end_date
                    ));
                }
                Ok(format!(
                    "Found {} permit(s) from {} to {}:\n\n{}",
                    fetched.total_retrieved,
                    params.start_date,
                    params.end_date,
                    format_permits(&fetched.features)
                ))
            }
            Operation::SearchByNeighborhood => {
                let params: NeighborhoodParams = parse_args(operation, arguments)?;
                let limit = checked_limit(params.limit)?;
                let fetched = self
                    .client
                    .search(&PermitFilter::neighborhood(&params.neighborhood), Some(limit))
                    .await?;
                if fetched.is_empty() {
                    return Ok(format!(
                        "No permits found in neighborhood: {}",
                        params.neighborhood
                    ));
                }
                Ok(format!(
                    "Found {} permit(s) in '{}':\n\n{}",
                    fetched.total_retrieved,
                    params.neighborhood,
                    format_permits(&fetched.features)
                ))
            }
            Operation::SearchByCaseNumber => {
                let params: CaseNumberParams = parse_args(operation, arguments)?;
                if params.case_number.trim().is_empty() {
                    return Err(PermitError::validation_error(
                        "case_number must not be empty",
                    ));
                }
                match self.client.find_by_case_number(&params.case_number).await? {
                    Some(permit) => Ok(format!("Permit details:\n\n{}", format_permit(&permit))),
                    None => Ok(format!(
                        "No permit found with case number: {}",
                        params.case_number
                    )),
                }
            }
            Operation::RecentPermits => {
                let params: RecentParams = parse_args(operation, arguments)?;
                let limit = checked_limit(params.limit)?;
                let permits = self.client.recent(params.days, limit, Utc::now()).await?;
                if permits.is_empty() {
                    return Ok(format!(
                        "No permits found in the last {} days",
                        params.days
                    ));
                }
                Ok(format!(
                    "Found {} recent permit(s) (last {} days):\n\n{}",
                    permits.len(),
                    params.days,
                    format_permits(&permits)
                ))
            }
            Operation::CountPermits => {
                let params: CountParams = parse_args(operation, arguments)?;
                let filter = PermitFilter::raw(&params.where_clause);
                let count = self.client.count(&filter).await?;
                Ok(format!(
                    "Found {count} permit(s) matching the query: {}",
                    filter.where_clause()
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PermitConfig;
    use crate::paginate::testing::{ScriptedSource, permit};
    use std::sync::Arc;

    fn operations_over(source: Arc<ScriptedSource>) -> PermitOperations {
        PermitOperations::new(PermitClient::with_source(source, PermitConfig::new()))
    }

    #[test]
    fn registry_lists_every_operation_once() {
        let names: Vec<_> = operation_specs().iter().map(|spec| spec.name).collect();
        assert_eq!(
            names,
            vec![
                "search_permits_by_address",
                "search_permits_by_date_range",
                "search_permits_by_neighborhood",
                "search_permits_by_case_number",
                "get_recent_permits",
                "count_permits",
            ]
        );
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
        }
    }

    #[test]
    fn schemas_declare_required_arguments_and_defaults() {
        let spec = Operation::SearchByDateRange.spec();
        assert_eq!(spec.input_schema["required"], json!(["start_date", "end_date"]));
        assert_eq!(spec.input_schema["properties"]["limit"]["default"], json!(50));

        let spec = Operation::RecentPermits.spec();
        assert!(spec.input_schema.get("required").is_none());
        assert_eq!(spec.input_schema["properties"]["days"]["default"], json!(30));
    }

    #[tokio::test]
    async fn unknown_operation_is_an_error() {
        let ops = operations_over(Arc::new(ScriptedSource::with_records(1)));
        let err = ops.call("delete_all_permits", None).await.unwrap_err();
        assert!(matches!(err, PermitError::UnknownOperation { .. }));
        assert_eq!(err.to_string(), "Unknown tool: delete_all_permits");
    }

    #[tokio::test]
    async fn empty_address_matches_everything_up_to_limit() {
        let source = Arc::new(ScriptedSource::with_records(40));
        let ops = operations_over(source.clone());

        let output = ops
            .call("search_permits_by_address", Some(json!({"address": "", "limit": 10})))
            .await
            .unwrap();

        assert!(!output.is_error);
        assert!(output.joined().starts_with("Found 10 permit(s) matching '':"));
        assert_eq!(output.joined().matches("\n---").count(), 10);
        assert_eq!(source.requests()[0].where_clause, "1=1");
    }

    #[tokio::test]
    async fn address_default_limit_and_escaping() {
        let source = Arc::new(ScriptedSource::with_records(0));
        let ops = operations_over(source.clone());

        let output = ops
            .call("search_permits_by_address", Some(json!({"address": "O'Brien"})))
            .await
            .unwrap();

        assert_eq!(output.joined(), "No permits found matching address: O'Brien");
        let request = &source.requests()[0];
        assert_eq!(request.where_clause, "Address LIKE '%O''Brien%'");
        assert_eq!(request.result_record_count, Some(50));
    }

    #[tokio::test]
    async fn neighborhood_quotes_are_escaped() {
        let source = Arc::new(ScriptedSource::with_records(0));
        let ops = operations_over(source.clone());

        let output = ops
            .call(
                "search_permits_by_neighborhood",
                Some(json!({"neighborhood": "O'Brien"})),
            )
            .await
            .unwrap();

        assert!(!output.is_error);
        assert_eq!(output.joined(), "No permits found in neighborhood: O'Brien");
        let request = &source.requests()[0];
        assert_eq!(request.where_clause, "Neighborhood LIKE '%O''Brien%'");
    }

    #[tokio::test]
    async fn bad_dates_come_back_as_text() {
        let source = Arc::new(ScriptedSource::with_records(5));
        let ops = operations_over(source.clone());

        let output = ops
            .call(
                "search_permits_by_date_range",
                Some(json!({"start_date": "01/01/2024", "end_date": "2024-12-31"})),
            )
            .await
            .unwrap();

        assert!(!output.is_error);
        assert!(output.joined().contains("Invalid date format"));
        assert!(output.joined().contains("01/01/2024"));
        assert_eq!(source.rounds(), 0);
    }

    #[tokio::test]
    async fn missing_required_argument_is_reported() {
        let ops = operations_over(Arc::new(ScriptedSource::with_records(5)));
        let output = ops.call("search_permits_by_date_range", Some(json!({"start_date": "2024-01-01"}))).await.unwrap();
        assert!(output.joined().contains("end_date"));

        let output = ops.call("search_permits_by_neighborhood", None).await.unwrap();
        assert!(output.joined().contains("neighborhood"));
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let source = Arc::new(ScriptedSource::with_records(5));
        let ops = operations_over(source.clone());
        let output = ops
            .call("get_recent_permits", Some(json!({"limit": 0})))
            .await
            .unwrap();
        assert_eq!(output.joined(), "limit must be at least 1");
        assert_eq!(source.rounds(), 0);
    }

    #[tokio::test]
    async fn unknown_case_number_is_not_an_error() {
        let ops = operations_over(Arc::new(ScriptedSource::with_records(0)));
        let output = ops
            .call("search_permits_by_case_number", Some(json!({"case_number": "NOPE-0000"})))
            .await
            .unwrap();
        assert!(!output.is_error);
        assert_eq!(output.joined(), "No permit found with case number: NOPE-0000");
    }

    #[tokio::test]
    async fn case_number_found() {
        let ops = operations_over(Arc::new(ScriptedSource::with_records(3)));
        let output = ops
            .call("search_permits_by_case_number", Some(json!({"case_number": "COM-0"})))
            .await
            .unwrap();
        assert!(output.joined().starts_with("Permit details:\n\nPermit: COM-0"));
    }

    #[tokio::test]
    async fn recent_permits_are_sorted_newest_first() {
        let out_of_order = [1_700_000_000_000_i64, 1_720_000_000_000, 1_710_000_000_000, 1_715_000_000_000]
            .into_iter()
            .map(permit)
            .collect();
        let ops = operations_over(Arc::new(ScriptedSource::from_features(out_of_order)));

        let output = ops
            .call("get_recent_permits", Some(json!({"limit": 2, "days": 30})))
            .await
            .unwrap();
        let text = output.joined();
        assert!(text.starts_with("Found 2 recent permit(s) (last 30 days):"));
        let first = text.find("COM-1720000000000").unwrap();
        let second = text.find("COM-1715000000000").unwrap();
        assert!(first < second);
        assert!(!text.contains("COM-1700000000000"));
    }

    #[tokio::test]
    async fn count_never_fetches_records() {
        let source = Arc::new(ScriptedSource::with_records(321));
        let ops = operations_over(source.clone());

        let output = ops
            .call("count_permits", Some(json!({"where_clause": "1=1"})))
            .await
            .unwrap();
        assert_eq!(output.joined(), "Found 321 permit(s) matching the query: 1=1");
        assert_eq!(source.rounds(), 0);
        assert_eq!(source.count_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_becomes_an_error_block() {
        let mut source = ScriptedSource::with_records(2000);
        source.fail_on_round = Some(2);
        let ops = operations_over(Arc::new(source));

        let output = ops
            .call("search_permits_by_neighborhood", Some(json!({"neighborhood": "Canton", "limit": 1500})))
            .await
            .unwrap();
        assert!(output.is_error);
        assert_eq!(output.content.len(), 1);
        assert!(output.content[0].starts_with("Error: Failed to fetch permit data:"));
    }
}
