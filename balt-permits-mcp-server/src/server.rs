use balt_permits::{OperationOutput, PermitClient, PermitConfig, PermitError, PermitOperations};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::env;
use thiserror::Error;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

const SERVER_NAME: &str = "balt-permit-mcp-server";
const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct PermitMcpServer {
    operations: PermitOperations,
}

impl PermitMcpServer {
    pub async fn bootstrap() -> Result<(), ServerError> {
        let server = Self::from_env()?;
        server.run().await
    }

    fn from_env() -> Result<Self, ServerError> {
        let base_url = env::var("BALT_PERMITS_BASE_URL").ok();
        let user_agent = env::var("BALT_PERMITS_USER_AGENT").ok();

        let mut config = PermitConfig::new();
        if let Some(url) = base_url {
            config = config.with_base_url(url);
        }
        if let Some(ua) = user_agent {
            config = config.with_user_agent(ua);
        }

        Ok(Self::new(PermitClient::with_config(config)?))
    }

    fn new(client: PermitClient) -> Self {
        Self {
            operations: PermitOperations::new(client),
        }
    }

    async fn run(self) -> Result<(), ServerError> {
        let reader = BufReader::new(io::stdin());
        let writer = BufWriter::new(io::stdout());
        tracing::info!(endpoint = %self.operations.client().config().base_url, "permit MCP server ready");
        self.serve(reader, writer).await
    }

    async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request = match serde_json::from_str::<Request>(trimmed) {
                Ok(request) => request,
                Err(err) => {
                    tracing::warn!("invalid request: {err}");
                    let response = Response::error(None, ServerError::Json(err));
                    write_response(&mut writer, &response).await?;
                    continue;
                }
            };

            if request.id.is_none() {
                tracing::debug!(method = %request.method, "notification");
                continue;
            }

            let response = self.handle_request(request).await;
            write_response(&mut writer, &response).await?;
        }

        Ok(())
    }

    async fn handle_request(&self, request: Request) -> Response {
        match self.dispatch(&request.method, request.params).await {
            Ok(result) => Response::success(request.id, result),
            Err(err) => Response::error(request.id, err),
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, ServerError> {
        match method {
            "initialize" => {
                let params: InitializeParams = parse_optional_params(method, params)?;
                let result = InitializeResult::new(params.protocol_version);
                Ok(serde_json::to_value(result).map_err(ServerError::Serialization)?)
            }
            "initialized" | "notifications/initialized" => Ok(Value::Null),
            "ping" => Ok(json!({})),
            "shutdown" => Ok(Value::Null),
            "tools/list" => {
                let params: ListToolsParams = parse_optional_params(method, params)?;
                let _ = params.cursor;
                let result = json!({ "tools": self.operations.specs() });
                Ok(result)
            }
            "tools/call" => {
                let params: CallToolParams = parse_required_params(method, params)?;
                let output = self.operations.call(&params.name, params.arguments).await?;
                let response = ToolResponse::from(output);
                serde_json::to_value(response).map_err(ServerError::Serialization)
            }
            other => Err(ServerError::InvalidMethod(other.to_string())),
        }
    }
}

async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_string(response).map_err(ServerError::Serialization)?;
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default, rename = "jsonrpc")]
    _jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ResponseError>,
}

impl Response {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, error: ServerError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ResponseError::from(error)),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseError {
    code: i32,
    message: String,
}

impl From<ServerError> for ResponseError {
    fn from(err: ServerError) -> Self {
        let code = match &err {
            ServerError::InvalidMethod(_) => -32601,
            ServerError::InvalidParams(_) => -32602,
            ServerError::Json(_) => -32700,
            ServerError::Io(_) => -32020,
            ServerError::Permit(PermitError::UnknownOperation { .. }) => -32601,
            ServerError::Permit(_) => -32010,
            ServerError::Serialization(_) => -32603,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unknown method: {0}")]
    InvalidMethod(String),
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Permit(#[from] PermitError),
    #[error("serialization error: {0}")]
    Serialization(serde_json::Error),
}

type ServerResult<T> = Result<T, ServerError>;

fn parse_required_params<T>(method: &str, params: Option<Value>) -> ServerResult<T>
where
    T: DeserializeOwned,
{
    match params {
        Some(value) => serde_json::from_value(value)
            .map_err(|err| ServerError::InvalidParams(format!("{method}: {err}"))),
        None => Err(ServerError::InvalidParams(format!(
            "{method}: missing parameters"
        ))),
    }
}

fn parse_optional_params<T>(method: &str, params: Option<Value>) -> ServerResult<T>
where
    T: DeserializeOwned + Default,
{
    match params {
        Some(Value::Null) | None => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|err| ServerError::InvalidParams(format!("{method}: {err}"))),
    }
}

#[derive(Debug, Default, Deserialize)]
struct InitializeParams {
    #[serde(default, rename = "protocolVersion")]
    protocol_version: Option<String>,
}

#[derive(Debug, Serialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
    #[serde(rename = "serverInfo")]
    server_info: ServerInfo,
    capabilities: Value,
}

impl InitializeResult {
    fn new(requested_version: Option<String>) -> Self {
        Self {
            protocol_version: requested_version.unwrap_or_else(|| PROTOCOL_VERSION.to_string()),
            server_info: ServerInfo {
                name: SERVER_NAME,
                version: env!("CARGO_PKG_VERSION"),
            },
            capabilities: json!({
                "tools": {
                    "listChanged": false
                }
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ServerInfo {
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct ListToolsParams {
    #[serde(default, rename = "cursor")]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ToolResponse {
    content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl From<OperationOutput> for ToolResponse {
    fn from(output: OperationOutput) -> Self {
        Self {
            content: output
                .content
                .into_iter()
                .map(|text| ToolContent::Text { text })
                .collect(),
            is_error: output.is_error,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn server_for(base_url: &str) -> PermitMcpServer {
        let config = PermitConfig::new().with_base_url(base_url);
        PermitMcpServer::new(PermitClient::with_config(config).unwrap())
    }

    async fn exchange(server: &PermitMcpServer, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn initialize_and_list_tools() {
        let server = server_for("http://127.0.0.1:9/query");
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","clientInfo":{"name":"test"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n"
        );

        let responses = exchange(&server, input).await;
        assert_eq!(responses.len(), 2, "notifications get no response");

        assert_eq!(responses[0]["id"], json!(1));
        assert_eq!(responses[0]["result"]["protocolVersion"], json!("2025-03-26"));
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], json!(SERVER_NAME));

        let tools = responses[1]["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 6);
        assert_eq!(tools[0]["name"], json!("search_permits_by_address"));
        assert!(tools[0]["inputSchema"]["properties"]["address"].is_object());
    }

    #[tokio::test]
    async fn protocol_errors_use_json_rpc_codes() {
        let server = server_for("http://127.0.0.1:9/query");
        let input = concat!(
            "this is not json\n",
            r#"{"jsonrpc":"2.0","id":"a","method":"resources/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":"b","method":"tools/call"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":"c","method":"tools/call","params":{"name":"drop_table","arguments":{}}}"#,
            "\n"
        );

        let responses = exchange(&server, input).await;
        let codes: Vec<_> = responses.iter().map(|r| r["error"]["code"].clone()).collect();
        assert_eq!(codes, vec![json!(-32700), json!(-32601), json!(-32602), json!(-32601)]);
        assert_eq!(responses[3]["error"]["message"], json!("Unknown tool: drop_table"));
    }

    #[tokio::test]
    async fn tools_call_returns_text_content() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("returnCountOnly", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 12})))
            .mount(&mock)
            .await;

        let server = server_for(&format!("{}/query", mock.uri()));
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"count_permits","arguments":{"where_clause":"1=1"}}}"#,
            "\n"
        );

        let responses = exchange(&server, input).await;
        let result = &responses[0]["result"];
        assert_eq!(result["isError"], json!(false));
        assert_eq!(result["content"][0]["type"], json!("text"));
        assert_eq!(
            result["content"][0]["text"],
            json!("Found 12 permit(s) matching the query: 1=1")
        );
    }

    #[tokio::test]
    async fn validation_problems_are_tool_text_not_rpc_errors() {
        let server = server_for("http://127.0.0.1:9/query");
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"search_permits_by_date_range","arguments":{"start_date":"2024-13-01","end_date":"2024-12-31"}}}"#,
            "\n"
        );

        let responses = exchange(&server, input).await;
        assert!(responses[0].get("error").is_none());
        let text = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Invalid date format"));
    }
}
