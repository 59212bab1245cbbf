use axum::{
    Json,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

use super::{AppState, BusEvent};
use crate::{
    ServoError,
    bus::{IdChange, MoveReport, ServoRecord, SweepPlan},
    session::PortOpener,
    telemetry::ServoTelemetry,
};

const INDEX_HTML: &str = include_str!("../../static/index.html");

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid {field}: {value:?} is not an integer")]
    InvalidInteger { field: &'static str, value: String },
    #[error(transparent)]
    Servo(#[from] ServoError),
    #[error("servo bus lock poisoned")]
    Poisoned,
    #[error("bus worker failed: {0}")]
    Worker(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidInteger { .. }
            | ApiError::Servo(ServoError::InvalidIdRange | ServoError::InvalidServoId(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Servo(ServoError::NotConnected) => StatusCode::CONFLICT,
            ApiError::Servo(_) => StatusCode::BAD_GATEWAY,
            ApiError::Poisoned | ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("request failed: {}", self);
        (status, Json(Outcome::failure(self))).into_response()
    }
}

/// Integer fields arrive either as JSON numbers or as numeric strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i64),
    Str(String),
}

impl IntOrString {
    fn parse(&self, field: &'static str) -> Result<i64, ApiError> {
        match self {
            IntOrString::Int(value) => Ok(*value),
            IntOrString::Str(text) => {
                text.trim()
                    .parse()
                    .map_err(|_| ApiError::InvalidInteger {
                        field,
                        value: text.clone(),
                    })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectBody {
    port: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeIdBody {
    old_id: IntOrString,
    new_id: IntOrString,
}

#[derive(Debug, Deserialize)]
pub struct MoveBody {
    servo_id: IntOrString,
    angle: IntOrString,
}

#[derive(Debug, Serialize)]
pub struct Outcome {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Outcome {
    fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }

    fn from_result<E: ToString>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(e) => Self::failure(e),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepOutcome {
    position: i32,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&MoveReport> for StepOutcome {
    fn from(report: &MoveReport) -> Self {
        Self {
            position: report.position,
            success: report.is_success(),
            error: report.error().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SweepOutcome {
    #[serde(flatten)]
    outcome: Outcome,
    steps: Vec<StepOutcome>,
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn scan_ports<O: PortOpener>(
    State(state): State<AppState<O>>,
) -> Result<Json<Vec<String>>, ApiError> {
    let ports = state.list_ports().await?;
    Ok(Json(ports))
}

pub async fn connect_port<O: PortOpener>(
    State(state): State<AppState<O>>,
    Json(body): Json<ConnectBody>,
) -> Result<Json<Outcome>, ApiError> {
    let baud_rate = state.config.baud_rate;
    let result = state
        .with_bus(move |bus, notifier| {
            let result = bus.connect(&body.port, baud_rate);
            match &result {
                Ok(()) => notifier.log(format!("Connected to {}", body.port)),
                Err(e) => notifier.log(format!("Failed to connect to {}: {}", body.port, e)),
            }
            result
        })
        .await?;
    Ok(Json(Outcome::from_result(result)))
}

pub async fn get_servo_info<O: PortOpener>(
    State(state): State<AppState<O>>,
) -> Result<Json<Vec<ServoRecord>>, ApiError> {
    let ids = state.config.probe_ids();
    let servos = state
        .with_bus(move |bus, notifier| bus.enumerate(ids, notifier))
        .await?;
    Ok(Json(servos))
}

pub async fn change_servo_id<O: PortOpener>(
    State(state): State<AppState<O>>,
    Json(body): Json<ChangeIdBody>,
) -> Result<Json<Outcome>, ApiError> {
    let old_id = body.old_id.parse("old_id")?;
    let new_id = body.new_id.parse("new_id")?;
    let change = match IdChange::new(old_id, new_id) {
        Ok(change) => change,
        Err(e) => {
            state
                .notifier
                .log(format!("Failed to change ID from {} to {}: {}", old_id, new_id, e));
            return Ok(Json(Outcome::failure(e)));
        }
    };

    let result = state
        .with_bus(move |bus, notifier| bus.reassign(change, notifier))
        .await?;
    Ok(Json(Outcome::from_result(result)))
}

pub async fn move_servo<O: PortOpener>(
    State(state): State<AppState<O>>,
    Json(body): Json<MoveBody>,
) -> Result<Json<SweepOutcome>, ApiError> {
    let servo_id = body.servo_id.parse("servo_id")?;
    let servo_id = u8::try_from(servo_id).map_err(|_| ServoError::InvalidServoId(servo_id))?;
    let angle = body.angle.parse("angle")?;
    let step_size = i32::try_from(angle).map_err(|_| ApiError::InvalidInteger {
        field: "angle",
        value: angle.to_string(),
    })?;

    let plan = SweepPlan::new(servo_id, step_size).with_pause(state.config.sweep_pause());
    let policy = state.config.sweep_policy;
    let report = state
        .with_bus(move |bus, notifier| bus.sweep(&plan, notifier, std::thread::sleep))
        .await??;

    let steps: Vec<StepOutcome> = report.steps.iter().map(StepOutcome::from).collect();
    let outcome = if report.is_success(policy) {
        Outcome::success()
    } else {
        Outcome::failure(format!(
            "{} of {} steps failed",
            report.failed_steps(),
            report.steps.len()
        ))
    };
    Ok(Json(SweepOutcome { outcome, steps }))
}

pub async fn servo_status<O: PortOpener>(
    State(state): State<AppState<O>>,
    Path(servo_id): Path<u8>,
) -> Result<Json<ServoTelemetry>, ApiError> {
    let telemetry = state
        .with_bus(move |bus, _| bus.telemetry(servo_id))
        .await??;
    Ok(Json(telemetry))
}

pub async fn events<O: PortOpener>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<O>>,
) -> Response {
    let receiver = state.notifier.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, receiver))
}

async fn forward_events(mut socket: WebSocket, mut events: broadcast::Receiver<BusEvent>) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let frame = match serde_json::to_string(&event) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("observer fell behind, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("observer disconnected");
}
