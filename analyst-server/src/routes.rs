//! HTTP route handlers for the analyst API.

use std::path::{Path, PathBuf};

use analyst::agents::evaluator::ChartEvaluator;
use analyst::agents::generator::CodeGenerator;
use analyst::core::request::RunRequest;
use analyst::io::config::AnalystConfig;
use analyst::io::dataset::parse_csv;
use analyst::io::inference::{CodexInference, InferenceFailure};
use analyst::io::sandbox::PythonSandbox;
use analyst::run::{RunConfig, RunReport, run_analysis};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::state::{AppState, RUN_DIR_PREFIX};

/// Build the API router.
///
/// Only rendered charts are served; scratch files next to them stay private.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/charts", delete(clear_charts))
        .route("/charts/{run_id}/{file}", get(get_chart))
}

/// JSON error body `{"error": "..."}` with a status code.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "chart not found".to_string(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Map a failed run: inference failures are upstream errors, the rest are ours.
    fn from_run(err: &anyhow::Error) -> Self {
        let status = if err.chain().any(|cause| cause.is::<InferenceFailure>()) {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn welcome() -> Json<Value> {
    Json(json!({
        "message": "Chart analyst API. POST a CSV file and a user_query to /analyze."
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "OK", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Serialize)]
struct AnalyzeResponse {
    response: RunReport,
}

/// Fields of the `/analyze` multipart form.
#[derive(Default)]
struct AnalyzeForm {
    file: Option<Bytes>,
    user_query: Option<String>,
    max_retry: Option<String>,
}

impl AnalyzeForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::bad_request(format!("invalid multipart body: {err}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|err| ApiError::bad_request(format!("read file: {err}")))?;
                    form.file = Some(bytes);
                }
                "user_query" | "max_retry" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|err| ApiError::bad_request(format!("read {name}: {err}")))?;
                    if name == "user_query" {
                        form.user_query = Some(text);
                    } else {
                        form.max_retry = Some(text);
                    }
                }
                other => warn!(field = other, "ignoring unknown form field"),
            }
        }
        Ok(form)
    }
}

/// POST /analyze - run the chart loop on an uploaded CSV.
#[instrument(skip_all)]
async fn analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let form = AnalyzeForm::read(multipart).await?;
    let file = form
        .file
        .ok_or_else(|| ApiError::bad_request("missing form field: file"))?;
    let query = form
        .user_query
        .ok_or_else(|| ApiError::bad_request("missing form field: user_query"))?;
    let max_retry = parse_max_retry(form.max_retry.as_deref(), state.config.default_max_retry)?;

    let dataset = parse_csv(&file[..])
        .map_err(|err| ApiError::bad_request(format!("invalid csv: {err:#}")))?;
    let request = RunRequest::new(
        query,
        dataset.rows,
        dataset.schema,
        max_retry,
        state.config.max_retry_limit,
    )
    .map_err(|err| ApiError::bad_request(err.to_string()))?;

    let run_id = state.next_run_id();
    let run_dir = state.run_dir(&run_id);
    info!(%run_id, max_retry, "starting run");

    let config = state.config.clone();
    let report = tokio::task::spawn_blocking(move || execute_run(&config, &request, run_dir))
        .await
        .map_err(|err| ApiError::internal(format!("run task failed: {err}")))?
        .map_err(|err| {
            warn!(%run_id, error = %format!("{err:#}"), "run failed");
            ApiError::from_run(&err)
        })?;

    info!(%run_id, termination = ?report.termination, charts = report.charts.len(), "run finished");
    Ok(Json(AnalyzeResponse {
        response: with_chart_urls(report, &run_id),
    }))
}

/// DELETE /charts - remove every stored chart.
async fn clear_charts(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let removed = tokio::task::spawn_blocking(move || state.clear_all())
        .await
        .map_err(|err| ApiError::internal(format!("clear task failed: {err}")))?
        .map_err(|err| ApiError::internal(format!("{err:#}")))?;
    info!(removed, "cleared charts");
    Ok(Json(json!({ "removed": removed })))
}

/// GET /charts/{run_id}/{file} - one rendered chart as PNG.
async fn get_chart(
    State(state): State<AppState>,
    UrlPath((run_id, file)): UrlPath<(String, String)>,
) -> Result<Response, ApiError> {
    if !is_run_id(&run_id) || !is_chart_file(&file) {
        return Err(ApiError::not_found());
    }
    let path = state.run_dir(&run_id).join(&file);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::not_found())?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

fn is_run_id(name: &str) -> bool {
    name.starts_with(RUN_DIR_PREFIX)
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// `chart_v{index}.png` and nothing else.
fn is_chart_file(name: &str) -> bool {
    name.strip_prefix("chart_v")
        .and_then(|rest| rest.strip_suffix(".png"))
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}

fn execute_run(
    config: &AnalystConfig,
    request: &RunRequest,
    run_dir: PathBuf,
) -> anyhow::Result<RunReport> {
    let backend = CodexInference::from_config(&config.inference);
    let generator = CodeGenerator::new(&backend, config.inference.output_limit_bytes)?;
    let evaluator = ChartEvaluator::new(
        &backend,
        config.evaluator.clone(),
        config.inference.output_limit_bytes,
    )?;
    let sandbox = PythonSandbox::from_config(&config.sandbox);
    let run_config = RunConfig::from_config(config, run_dir);
    run_analysis(request, &generator, &sandbox, &evaluator, &run_config, |_| {})
}

fn parse_max_retry(raw: Option<&str>, default: u32) -> Result<u32, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ApiError::bad_request(format!("max_retry must be an integer (got {value:?})"))),
    }
}

/// Replace filesystem chart paths with the URLs they are served at.
fn with_chart_urls(mut report: RunReport, run_id: &str) -> RunReport {
    for chart in &mut report.charts {
        if let Some(name) = Path::new(chart.as_str()).file_name().and_then(|n| n.to_str()) {
            *chart = format!("/charts/{run_id}/{name}");
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst::core::types::Termination;
    use analyst::io::inference::InferenceStage;

    #[test]
    fn max_retry_defaults_when_absent_or_blank() {
        assert_eq!(parse_max_retry(None, 3).expect("default"), 3);
        assert_eq!(parse_max_retry(Some("  "), 3).expect("blank"), 3);
        assert_eq!(parse_max_retry(Some(" 5 "), 3).expect("five"), 5);
    }

    #[test]
    fn max_retry_rejects_non_integers() {
        let err = parse_max_retry(Some("many"), 3).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("many"));
    }

    #[test]
    fn inference_failures_are_bad_gateway() {
        let err = anyhow::Error::new(InferenceFailure::new(InferenceStage::Generate, "timeout"))
            .context("generate candidate 0");
        assert_eq!(ApiError::from_run(&err).status, StatusCode::BAD_GATEWAY);
        let other = anyhow::anyhow!("disk full");
        assert_eq!(
            ApiError::from_run(&other).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn only_chart_files_are_servable() {
        assert!(is_chart_file("chart_v0.png"));
        assert!(is_chart_file("chart_v12.png"));
        assert!(!is_chart_file("chart_v.png"));
        assert!(!is_chart_file("dataset.json"));
        assert!(!is_chart_file("chart_v0.png.bak"));
        assert!(is_run_id("run-20250101-120000-3"));
        assert!(!is_run_id(".scratch"));
        assert!(!is_run_id("run-..%2f"));
        assert!(!is_run_id("other"));
    }

    #[tokio::test]
    async fn scratch_files_are_not_served() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = AppState::new(AnalystConfig::default(), temp.path().to_path_buf());
        let run = state.run_dir("run-20250101-120000-0");
        std::fs::create_dir_all(run.join(".scratch/v0")).expect("scratch");
        std::fs::write(run.join(".scratch/v0/dataset.json"), b"[]").expect("dataset");
        std::fs::write(run.join("chart_v0.png"), b"png").expect("chart");

        let chart = get_chart(
            State(state.clone()),
            UrlPath(("run-20250101-120000-0".to_string(), "chart_v0.png".to_string())),
        )
        .await
        .expect("chart");
        assert_eq!(chart.status(), StatusCode::OK);
        assert_eq!(chart.headers()[header::CONTENT_TYPE], "image/png");

        let scratch = get_chart(
            State(state.clone()),
            UrlPath(("run-20250101-120000-0".to_string(), "dataset.json".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(scratch.status, StatusCode::NOT_FOUND);

        let missing = get_chart(
            State(state),
            UrlPath(("run-20250101-120000-0".to_string(), "chart_v5.png".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn chart_paths_become_urls() {
        let report = RunReport {
            query: "q".to_string(),
            charts: vec![
                "/srv/charts/run-1/chart_v0.png".to_string(),
                "/srv/charts/run-1/chart_v1.png".to_string(),
            ],
            rubric_feedback: Vec::new(),
            termination: Termination::BudgetExhausted,
        };
        let report = with_chart_urls(report, "run-1");
        assert_eq!(
            report.charts,
            vec!["/charts/run-1/chart_v0.png", "/charts/run-1/chart_v1.png"]
        );
    }
}
