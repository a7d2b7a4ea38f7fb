use std::sync::Arc;
use std::time::Duration;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::app::{AnalysisReport, App, TracingSink};
use crate::config::ResolvedConfig;
use crate::domain::{Gender, NewPatient, PatientId, TechnicianId};
use crate::error::LabError;
use crate::store::SqliteStore;
use crate::uploads::{TransientFiles, UploadDir};

pub const PATIENT_ID_FIELD: &str = "paciente_id";
pub const TECHNICIAN_HEADER: &str = "laboratorista_id";

pub type LabApp = App<SqliteStore, UploadDir>;

#[derive(Clone)]
pub struct AppState {
    pub app: Arc<LabApp>,
}

impl AppState {
    pub fn new(app: LabApp) -> Self {
        Self { app: Arc::new(app) }
    }
}

/// HTTP-facing wrapper that renders a [`LabError`] as `{ "error": ... }`.
#[derive(Debug)]
pub struct ApiError(pub LabError);

impl From<LabError> for ApiError {
    fn from(err: LabError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LabError::MissingUpload
            | LabError::MissingField(_)
            | LabError::InvalidPatientId(_)
            | LabError::InvalidTechnicianId(_)
            | LabError::InvalidGender(_) => StatusCode::BAD_REQUEST,
            LabError::BadUpload { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            LabError::TechnicianNotFound(_) | LabError::PatientNotFound(_) => StatusCode::NOT_FOUND,
            LabError::DuplicateEmail(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/", get(root_handler))
        .route(
            "/api/analisis/subir-adn",
            post(upload_handler).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/analisis/analisis", get(analyses_handler))
        .route(
            "/api/pacientes",
            get(list_patients_handler).post(create_patient_handler),
        )
        .route("/api/pacientes/{id}", get(patient_handler))
        .layer(cors)
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({ "message": "server running" }))
}

/// Keeps the status axum assigns to a multipart failure (413 for an
/// oversized body, 400 for a malformed one).
fn rejected_upload(err: MultipartError) -> ApiError {
    let status = err.status();
    if status.is_client_error() {
        warn!(status = status.as_u16(), error = %err.body_text(), "upload rejected");
    }
    ApiError(LabError::BadUpload {
        status: status.as_u16(),
        message: err.body_text(),
    })
}

struct UploadForm {
    file_name: Option<String>,
    content: Option<Vec<u8>>,
    patient_id: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm {
        file_name: None,
        content: None,
        patient_id: None,
    };
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(rejected_upload)?
    {
        if field.file_name().is_some() {
            if form.content.is_some() {
                warn!("ignoring additional file field");
                continue;
            }
            form.file_name = field.file_name().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(rejected_upload)?;
            form.content = Some(bytes.to_vec());
        } else if field.name() == Some(PATIENT_ID_FIELD) {
            let text = field
                .text()
                .await
                .map_err(rejected_upload)?;
            form.patient_id = Some(text);
        }
    }
    Ok(form)
}

async fn upload_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AnalysisReport>, ApiError> {
    let form = read_upload_form(multipart).await?;
    let content = form.content.ok_or(LabError::MissingUpload)?;
    let patient_id: PatientId = form
        .patient_id
        .ok_or(LabError::MissingField(PATIENT_ID_FIELD))?
        .parse()?;
    info!(patient_id = %patient_id, bytes = content.len(), "marker upload received");

    let app = state.app.clone();
    let report = tokio::task::spawn_blocking(move || {
        let upload = app.files().stage(form.file_name.as_deref(), &content)?;
        app.analyze(patient_id, upload, &TracingSink)
    })
    .await
    .map_err(|err| LabError::Server(err.to_string()))??;
    Ok(Json(report))
}

async fn analyses_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let app = state.app.clone();
    let analyses = tokio::task::spawn_blocking(move || app.list_analyses())
        .await
        .map_err(|err| LabError::Server(err.to_string()))??;
    if analyses.is_empty() {
        info!("no analyses stored");
    }
    Ok(Json(analyses).into_response())
}

#[derive(Debug, Deserialize)]
struct PatientPayload {
    nombre: Option<String>,
    apellido: Option<String>,
    edad: Option<u32>,
    genero: Option<String>,
    laboratorista_id: Option<i64>,
}

impl PatientPayload {
    fn into_new_patient(self) -> Result<NewPatient, LabError> {
        fn present(value: Option<String>, name: &'static str) -> Result<String, LabError> {
            value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(LabError::MissingField(name))
        }
        let first_name = present(self.nombre, "nombre")?;
        let last_name = present(self.apellido, "apellido")?;
        let age = self
            .edad
            .filter(|age| *age > 0)
            .ok_or(LabError::MissingField("edad"))?;
        let gender: Gender = present(self.genero, "genero")?.parse()?;
        let technician_id = self
            .laboratorista_id
            .filter(|id| *id > 0)
            .map(TechnicianId::new)
            .ok_or(LabError::MissingField("laboratorista_id"))?;
        Ok(NewPatient {
            first_name,
            last_name,
            age,
            gender,
            technician_id,
        })
    }
}

async fn create_patient_handler(
    State(state): State<AppState>,
    Json(payload): Json<PatientPayload>,
) -> Result<Response, ApiError> {
    let new_patient = payload.into_new_patient()?;
    let app = state.app.clone();
    let patient = tokio::task::spawn_blocking(move || app.store().create_patient(new_patient))
        .await
        .map_err(|err| LabError::Server(err.to_string()))??;
    info!(patient_id = %patient.id, technician_id = %patient.technician_id, "patient created");
    Ok((StatusCode::CREATED, Json(patient)).into_response())
}

fn technician_from_headers(headers: &HeaderMap) -> Result<TechnicianId, LabError> {
    let raw = headers
        .get(TECHNICIAN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(LabError::MissingField(TECHNICIAN_HEADER))?;
    raw.parse()
}

async fn list_patients_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let technician_id = technician_from_headers(&headers)?;
    let app = state.app.clone();
    let patients = tokio::task::spawn_blocking(move || app.store().list_patients_for(technician_id))
        .await
        .map_err(|err| LabError::Server(err.to_string()))??;
    Ok(Json(patients).into_response())
}

async fn patient_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let patient_id: PatientId = id.parse()?;
    let technician_id = technician_from_headers(&headers)?;
    let app = state.app.clone();
    let patient =
        tokio::task::spawn_blocking(move || app.store().find_patient(patient_id, technician_id))
            .await
            .map_err(|err| LabError::Server(err.to_string()))??
            .ok_or(LabError::PatientNotFound(patient_id.get()))?;
    Ok(Json(patient).into_response())
}

pub async fn serve(config: ResolvedConfig) -> Result<(), LabError> {
    info!(database = %config.database, "opening record store");
    let store = SqliteStore::open(&config.database)?;
    let uploads = UploadDir::new(config.upload_dir.clone());
    uploads.ensure_root()?;

    let state = AppState::new(App::new(store, uploads));
    let router = build_router(state, config.max_upload_bytes);

    let address = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|err| LabError::Server(format!("bind {address}: {err}")))?;
    info!("server running on {address}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| LabError::Server(err.to_string()))?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("received ctrl-c, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(err) => {
                warn!(error = %err, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}
