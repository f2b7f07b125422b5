use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Filter expression that matches every record.
pub const MATCH_ALL: &str = "1=1";

/// Parameters of a single `query` request.
///
/// A `QueryParams` is never mutated in place once built: paging produces a new
/// value per page through [`QueryParams::with_offset`] and
/// [`QueryParams::with_record_count`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    /// Filter expression (`where`)
    pub where_clause: String,
    /// Comma separated field list, or `*` for all fields (`outFields`)
    pub out_fields: String,
    /// Index of the first record to return (`resultOffset`)
    pub result_offset: Option<u64>,
    /// Number of records to return (`resultRecordCount`)
    pub result_record_count: Option<u32>,
    /// Include point geometry in the response (`returnGeometry`)
    pub return_geometry: bool,
    /// Ask for a record count instead of records (`returnCountOnly`)
    pub return_count_only: bool,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            where_clause: MATCH_ALL.to_owned(),
            out_fields: "*".to_owned(),
            result_offset: None,
            result_record_count: None,
            return_geometry: true,
            return_count_only: false,
        }
    }
}

impl QueryParams {
    /// Create query parameters for the given filter expression, selecting all fields.
    pub fn new<S: Into<String>>(where_clause: S) -> Self {
        Self {
            where_clause: where_clause.into(),
            ..Self::default()
        }
    }

    /// Select a subset of fields.
    pub fn with_out_fields<S: Into<String>>(mut self, out_fields: S) -> Self {
        self.out_fields = out_fields.into();
        self
    }

    /// Copy of these parameters starting at `offset`.
    pub fn with_offset(&self, offset: u64) -> Self {
        Self {
            result_offset: Some(offset),
            ..self.clone()
        }
    }

    /// Copy of these parameters asking for `count` records.
    pub fn with_record_count(&self, count: u32) -> Self {
        Self {
            result_record_count: Some(count),
            ..self.clone()
        }
    }

    /// Copy of these parameters in count-only mode. Paging fields are dropped.
    pub fn count_only(&self) -> Self {
        Self {
            result_offset: None,
            result_record_count: None,
            return_count_only: true,
            ..self.clone()
        }
    }

    /// Query string pairs in the order the service documents them.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("where", self.where_clause.clone()),
            ("outFields", self.out_fields.clone()),
            ("f", "geojson".to_owned()),
            ("returnGeometry", self.return_geometry.to_string()),
        ];
        if let Some(offset) = self.result_offset {
            pairs.push(("resultOffset", offset.to_string()));
        }
        if let Some(count) = self.result_record_count {
            pairs.push(("resultRecordCount", count.to_string()));
        }
        if self.return_count_only {
            pairs.push(("returnCountOnly", "true".to_owned()));
        }
        pairs
    }
}

/// One GeoJSON feature: scalar attributes plus optional geometry.
///
/// Geometry is kept as raw JSON so that non-point layers still deserialize;
/// [`Feature::point`] extracts point coordinates when present. `properties`
/// or `geometry` that are not JSON objects read as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default, deserialize_with = "object_or_none")]
    pub properties: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "object_value_or_none")]
    pub geometry: Option<Value>,
}

impl Feature {
    /// Attribute value by field name. JSON `null` is reported as absent.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties
            .as_ref()
            .and_then(|props| props.get(key))
            .filter(|value| !value.is_null())
    }

    /// Point coordinates as `(longitude, latitude)`.
    pub fn point(&self) -> Option<(f64, f64)> {
        let coordinates = self.geometry.as_ref()?.get("coordinates")?.as_array()?;
        match coordinates.as_slice() {
            [lon, lat, ..] => Some((lon.as_f64()?, lat.as_f64()?)),
            _ => None,
        }
    }
}

/// A page of features as returned by a GeoJSON query.
///
/// Decoding is lenient: `"features": null` is an empty page, and an entry that
/// is not an object becomes an empty [`Feature`] so the page keeps its length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(default, deserialize_with = "lenient_features")]
    pub features: Vec<Feature>,
    #[serde(
        default,
        rename = "exceededTransferLimit",
        deserialize_with = "bool_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub exceeded_transfer_limit: Option<bool>,
    #[serde(
        default,
        deserialize_with = "object_or_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub properties: Option<Map<String, Value>>,
}

impl FeatureCollection {
    /// Whether the service reported more matching records beyond this page.
    ///
    /// The flag is read from the top level first and then from the collection
    /// `properties`, where some service versions place it in GeoJSON output.
    pub fn exceeded_transfer_limit(&self) -> bool {
        self.exceeded_transfer_limit
            .or_else(|| {
                self.properties
                    .as_ref()
                    .and_then(|props| props.get("exceededTransferLimit"))
                    .and_then(Value::as_bool)
            })
            .unwrap_or(false)
    }
}

fn object_or_none<'de, D>(deserializer: D) -> Result<Option<Map<String, Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    })
}

fn object_value_or_none<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.filter(Value::is_object))
}

fn bool_or_none<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|value| value.as_bool()))
}

fn lenient_features<'de, D>(deserializer: D) -> Result<Vec<Feature>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::Array(entries)) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            // every field of Feature is itself lenient, so objects always decode
            Value::Object(_) => serde_json::from_value(entry).unwrap_or_default(),
            _ => Feature::default(),
        })
        .collect())
}

/// Extract the record count from a count-only response.
///
/// Two shapes are accepted: `{"properties": {"count": n}}` and `{"count": n}`.
/// Which one a given service returns is not documented, so both are read.
pub fn count_from_response(body: &Value) -> u64 {
    body.get("properties")
        .and_then(|props| props.get("count"))
        .or_else(|| body.get("count"))
        .and_then(|count| {
            count
                .as_u64()
                .or_else(|| count.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64))
        })
        .unwrap_or(0)
}

/// Error object ArcGIS embeds in a successful HTTP response when a query fails.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ServiceError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<String>,
}

impl ServiceError {
    pub(crate) fn from_body(body: &Value) -> Option<Self> {
        body.get("error")
            .filter(|err| err.is_object())
            .and_then(|err| serde_json::from_value(err.clone()).ok())
    }

    pub(crate) fn describe(&self) -> String {
        let mut message = self
            .message
            .clone()
            .unwrap_or_else(|| "Feature service reported an error".to_owned());
        if !self.details.is_empty() {
            message.push_str(": ");
            message.push_str(&self.details.join("; "));
        }
        message
    }
}
