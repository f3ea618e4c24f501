use std::{collections::HashMap, path::PathBuf, time::Duration};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::credentials::{CredentialSource, TokenProvider};
use super::{ApiError, Warehouse, WarehouseError, CLICK_SCHEMA};
use crate::models::{ClickEvent, ClickStatistic};

#[derive(Clone, Debug)]
pub struct BigQueryConfig {
    /// Falls back to the project named by the credentials.
    pub project_id: Option<String>,
    pub dataset: String,
    pub table: String,
    pub credentials_file: Option<PathBuf>,
    pub location: Option<String>,
    pub api_url: String,
    pub poll_interval: Duration,
    pub query_timeout: Duration,
}

/// BigQuery over its REST API. Built once at startup and shared by all
/// requests; the only mutable state is the cached access token.
pub struct BigQueryClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    project_id: String,
    dataset: String,
    table: String,
    location: Option<String>,
    api_url: String,
    poll_interval: Duration,
    query_timeout: Duration,
}

impl BigQueryClient {
    pub async fn connect(config: BigQueryConfig) -> Result<Self, WarehouseError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| WarehouseError::Init(format!("http client: {err}")))?;
        let source = CredentialSource::discover(config.credentials_file.as_deref(), &http).await?;
        Self::from_parts(config, source, http)
    }

    fn from_parts(
        config: BigQueryConfig,
        source: CredentialSource,
        http: reqwest::Client,
    ) -> Result<Self, WarehouseError> {
        let project_id = config
            .project_id
            .or_else(|| source.project_id().map(str::to_string))
            .ok_or_else(|| {
                WarehouseError::Init(
                    "no BigQuery project configured and the credentials name none".to_string(),
                )
            })?;

        tracing::info!(
            project = project_id.as_str(),
            dataset = config.dataset.as_str(),
            table = config.table.as_str(),
            credentials = source.kind(),
            "BigQuery client ready"
        );

        Ok(Self {
            tokens: TokenProvider::new(source, http.clone()),
            http,
            project_id,
            dataset: config.dataset,
            table: config.table,
            location: config.location,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval,
            query_timeout: config.query_timeout,
        })
    }

    pub fn table_ref(&self, dataset: &str, table: &str) -> String {
        format!("{}.{dataset}.{table}", self.project_id)
    }

    /// Run a standard-SQL query with named parameters and collect every row.
    pub async fn query(&self, sql: &str, params: &[QueryParameter]) -> Result<Vec<QueryRow>, ApiError> {
        let body = query_request_body(
            sql,
            params,
            self.query_timeout.as_millis() as u64,
            self.location.as_deref(),
        );
        let token = self.tokens.bearer().await?;
        let response = self
            .http
            .post(format!("{}/bigquery/v2/projects/{}/queries", self.api_url, self.project_id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let mut page: QueryResponse = read_json(response).await?;

        let mut columns: Option<Vec<String>> = None;
        let mut rows = Vec::new();
        loop {
            if !page.job_complete {
                tokio::time::sleep(self.poll_interval).await;
                page = self.query_results(&page, None).await?;
                continue;
            }

            if columns.is_none() {
                columns = page
                    .schema
                    .as_ref()
                    .map(|schema| schema.fields.iter().map(|field| field.name.clone()).collect());
            }
            let names = columns.as_deref().unwrap_or_default();
            rows.extend(page.rows.iter().map(|row| QueryRow::from_cells(names, row)));

            match page.page_token.clone() {
                Some(token) => page = self.query_results(&page, Some(token.as_str())).await?,
                None => break,
            }
        }

        tracing::debug!(rows = rows.len(), "query finished");
        Ok(rows)
    }

    async fn query_results(
        &self,
        page: &QueryResponse,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, ApiError> {
        let job = page
            .job_reference
            .as_ref()
            .ok_or_else(|| ApiError::Decode("query response without job reference".to_string()))?;

        let mut query = vec![("timeoutMs", self.query_timeout.as_millis().to_string())];
        if let Some(location) = job.location.as_deref().or(self.location.as_deref()) {
            query.push(("location", location.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let token = self.tokens.bearer().await?;
        let response = self
            .http
            .get(format!(
                "{}/bigquery/v2/projects/{}/queries/{}",
                self.api_url, job.project_id, job.job_id
            ))
            .query(&query)
            .bearer_auth(token)
            .send()
            .await?;
        read_json(response).await
    }

    async fn run_load_job(&self, rows: &[ClickEvent], dataset: &str, table: &str) -> Result<(), ApiError> {
        let job_id = format!("click_load_{}", Uuid::new_v4().simple());
        let metadata = load_job_body(&self.project_id, dataset, table, &job_id, self.location.as_deref());
        let boundary = format!("clickstream_{}", Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, &encode_rows(rows)?);

        let token = self.tokens.bearer().await?;
        let response = self
            .http
            .post(format!(
                "{}/upload/bigquery/v2/projects/{}/jobs",
                self.api_url, self.project_id
            ))
            .query(&[("uploadType", "multipart")])
            .bearer_auth(token)
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(body)
            .send()
            .await?;
        let job: JobResource = read_json(response).await?;
        self.wait_for_job(job).await
    }

    // No deadline: a job that never finishes holds the request open.
    async fn wait_for_job(&self, mut job: JobResource) -> Result<(), ApiError> {
        loop {
            if let Some(result) = job.outcome() {
                return result;
            }
            tokio::time::sleep(self.poll_interval).await;

            let reference = &job.job_reference;
            let mut query = Vec::new();
            if let Some(location) = reference.location.as_deref().or(self.location.as_deref()) {
                query.push(("location", location.to_string()));
            }
            let token = self.tokens.bearer().await?;
            let response = self
                .http
                .get(format!(
                    "{}/bigquery/v2/projects/{}/jobs/{}",
                    self.api_url, reference.project_id, reference.job_id
                ))
                .query(&query)
                .bearer_auth(token)
                .send()
                .await?;
            job = read_json(response).await?;
        }
    }

    fn user_clicks_sql(&self) -> String {
        format!(
            "SELECT tab_name, COUNT(*) AS click_count\n\
             FROM `{}`\n\
             WHERE user_id = @user_id\n\
             GROUP BY tab_name\n\
             ORDER BY click_count DESC",
            self.table_ref(&self.dataset, &self.table)
        )
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn load_rows(
        &self,
        rows: &[ClickEvent],
        dataset: &str,
        table: &str,
    ) -> Result<(), WarehouseError> {
        let table_ref = self.table_ref(dataset, table);
        if rows.is_empty() {
            tracing::debug!(table = table_ref.as_str(), "no rows to load");
            return Ok(());
        }

        self.run_load_job(rows, dataset, table)
            .await
            .map_err(|source| WarehouseError::Write {
                table: table_ref.clone(),
                source,
            })?;
        tracing::info!(rows = rows.len(), table = table_ref.as_str(), "loaded rows");
        Ok(())
    }

    async fn query_user_clicks(&self, user_id: &str) -> Result<Vec<ClickStatistic>, WarehouseError> {
        let params = [QueryParameter::string("user_id", user_id)];
        let rows = self
            .query(&self.user_clicks_sql(), &params)
            .await
            .map_err(|source| WarehouseError::Query { source })?;
        into_statistics(rows).map_err(|source| WarehouseError::Query { source })
    }
}

/// A named, typed query parameter bound server-side.
#[derive(Clone, Debug)]
pub struct QueryParameter {
    name: String,
    kind: &'static str,
    value: String,
}

impl QueryParameter {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "STRING",
            value: value.into(),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "parameterType": { "type": self.kind },
            "parameterValue": { "value": self.value },
        })
    }
}

/// One result row keyed by column name. Scalars arrive as strings.
#[derive(Clone, Debug, Default)]
pub struct QueryRow(HashMap<String, Value>);

impl QueryRow {
    fn from_cells(columns: &[String], row: &TableRow) -> Self {
        Self(
            columns
                .iter()
                .cloned()
                .zip(row.f.iter().map(|cell| cell.v.clone()))
                .collect(),
        )
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }
}

fn into_statistics(rows: Vec<QueryRow>) -> Result<Vec<ClickStatistic>, ApiError> {
    let mut stats = rows
        .iter()
        .map(|row| {
            let raw = row
                .get_str("click_count")
                .ok_or_else(|| ApiError::Decode("row without click_count".to_string()))?;
            let click_count = raw
                .parse::<i64>()
                .map_err(|err| ApiError::Decode(format!("click_count {raw:?}: {err}")))?;
            Ok(ClickStatistic {
                tab_name: row.get_str("tab_name").map(str::to_string),
                click_count,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;
    // Stable, so ties keep the warehouse's order.
    stats.sort_by(|a, b| b.click_count.cmp(&a.click_count));
    Ok(stats)
}

#[derive(Serialize)]
struct LoadRow<'a> {
    user_id: Option<&'a str>,
    tab_name: Option<&'a str>,
    click_timestamp: String,
    session_id: Option<&'a str>,
    app_version: Option<&'a str>,
    device_info: Option<&'a str>,
}

fn encode_rows(rows: &[ClickEvent]) -> Result<String, ApiError> {
    let mut out = String::new();
    for event in rows {
        let row = LoadRow {
            user_id: event.user_id.as_deref(),
            tab_name: event.tab_name.as_deref(),
            click_timestamp: event
                .click_timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            session_id: event.session_id.as_deref(),
            app_version: event.app_version.as_deref(),
            device_info: event.device_info.as_deref(),
        };
        let line = serde_json::to_string(&row)
            .map_err(|err| ApiError::Decode(format!("encode row: {err}")))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn load_job_body(
    project: &str,
    dataset: &str,
    table: &str,
    job_id: &str,
    location: Option<&str>,
) -> Value {
    let fields: Vec<Value> = CLICK_SCHEMA
        .iter()
        .map(|(name, kind)| json!({ "name": name, "type": kind, "mode": "NULLABLE" }))
        .collect();
    let mut reference = json!({ "projectId": project, "jobId": job_id });
    if let Some(location) = location {
        reference["location"] = json!(location);
    }

    json!({
        "jobReference": reference,
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": project,
                    "datasetId": dataset,
                    "tableId": table,
                },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": "WRITE_APPEND",
                "schema": { "fields": fields },
            }
        }
    })
}

fn multipart_related(boundary: &str, metadata: &Value, data: &str) -> String {
    format!(
        "--{boundary}\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\r\n\
         {metadata}\r\n\
         --{boundary}\r\n\
         Content-Type: application/octet-stream\r\n\r\n\
         {data}\r\n\
         --{boundary}--\r\n"
    )
}

fn query_request_body(
    sql: &str,
    params: &[QueryParameter],
    timeout_ms: u64,
    location: Option<&str>,
) -> Value {
    let mut body = json!({
        "query": sql,
        "useLegacySql": false,
        "parameterMode": "NAMED",
        "queryParameters": params.iter().map(QueryParameter::to_json).collect::<Vec<_>>(),
        "timeoutMs": timeout_ms,
    });
    if let Some(location) = location {
        body["location"] = json!(location);
    }
    body
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ApiError::Api {
            status: status.as_u16(),
            message: api_error_message(&body),
        });
    }
    serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))
}

fn api_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorProto,
    }

    serde_json::from_str::<Envelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.chars().take(512).collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    status: Option<JobStatus>,
}

impl JobResource {
    /// `None` while the job is still pending or running.
    fn outcome(&self) -> Option<Result<(), ApiError>> {
        let status = self.status.as_ref().filter(|status| status.state == "DONE")?;
        Some(match &status.error_result {
            Some(error) => Err(ApiError::Job {
                job_id: self.job_reference.job_id.clone(),
                message: error.message.clone(),
            }),
            None => Ok(()),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}
