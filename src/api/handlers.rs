use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use utoipa::OpenApi;

use super::{
    dto::{
        parse_bool, AggregatedPointDto, ControlCommandDto, ControlPollResponse, ControlQuery,
        ControlQueuedResponse, ControlRequest, DeviceDto, DeviceStatusRequest, HistoryPointDto,
        HistoryResponse, IngestResponse, LatestReadingDto, ReadingDto, RegisterDeviceRequest,
        ScanReportDto, SensorDataQuery, SensorDataRequest,
    },
    errors::AppError,
    state::AppState,
};
use crate::{
    db::models::{DeviceRegistration, DeviceStatus},
    query::{history::DEFAULT_LIMIT, Timescale},
};

// ---------------------------------------------------------------------------
// Sensor data
// ---------------------------------------------------------------------------

/// Ingest one telemetry report. The server stamps it with its own clock.
#[utoipa::path(
    post,
    path = "/sensor-data",
    request_body = SensorDataRequest,
    responses(
        (status = 201, description = "Reading stored", body = IngestResponse),
        (status = 400, description = "Missing device key or malformed value"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "sensor-data"
)]
pub async fn post_sensor_data(
    State(state): State<AppState>,
    Json(body): Json<SensorDataRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    let reading = state.sensors.ingest(body.into(), Utc::now()).await?;
    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            message: "Data received successfully".to_owned(),
            data: reading.into(),
        }),
    ))
}

/// Latest reading (default) or downsampled history when `history` is set.
#[utoipa::path(
    get,
    path = "/sensor-data",
    params(SensorDataQuery),
    responses(
        (status = 200, description = "Latest reading; a `HistoryResponse` when `history=true`", body = LatestReadingDto),
        (status = 400, description = "Bad timescale or limit"),
        (status = 404, description = "No reading in the lookback window"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "sensor-data"
)]
pub async fn get_sensor_data(
    State(state): State<AppState>,
    Query(q): Query<SensorDataQuery>,
) -> Result<Response, AppError> {
    let device_key = q.device_key.as_deref().map(str::trim).filter(|k| !k.is_empty());
    let now = Utc::now();

    if parse_bool(q.history.as_deref(), false) {
        let timescale = match q.timescale.as_deref() {
            Some(t) => t.parse::<Timescale>()?,
            None => Timescale::default(),
        };
        let limit = match q.limit {
            None => DEFAULT_LIMIT,
            Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
            Some(_) => return Err(AppError::bad_request("limit must be a positive integer")),
        };
        let history = state.history.history(device_key, timescale, limit, now).await?;
        return Ok(Json(HistoryResponse::from(history)).into_response());
    }

    match state.latest.latest(device_key, now).await? {
        Some(latest) => Ok(Json(LatestReadingDto::from(latest)).into_response()),
        None => Err(AppError::not_found(match device_key {
            Some(key) => format!("No data available for device {key}"),
            None => "No data available".to_owned(),
        })),
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/devices",
    request_body = RegisterDeviceRequest,
    responses(
        (status = 201, description = "Device registered or refreshed", body = DeviceDto),
        (status = 400, description = "Missing ip or invalid port"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "devices"
)]
pub async fn register_device(
    State(state): State<AppState>,
    Json(body): Json<RegisterDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceDto>), AppError> {
    let port = body
        .port
        .map(|p| i32::try_from(p).map_err(|_| AppError::bad_request(format!("port {p} is out of range"))))
        .transpose()?;
    let reg = DeviceRegistration {
        device_key: body.ip.unwrap_or_default(),
        id: body.id,
        port,
        kind: body.device_type,
    };
    let record = state.sensors.register(reg, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

#[utoipa::path(
    get,
    path = "/devices/{device_key}",
    params(("device_key" = String, Path, description = "Device key (IP address)")),
    responses(
        (status = 200, description = "Device record", body = DeviceDto),
        (status = 404, description = "Unknown device"),
    ),
    tag = "devices"
)]
pub async fn get_device(
    State(state): State<AppState>,
    Path(device_key): Path<String>,
) -> Result<Json<DeviceDto>, AppError> {
    state
        .sensors
        .device(&device_key)
        .await?
        .map(|d| Json(d.into()))
        .ok_or_else(|| AppError::not_found(format!("Device {device_key} not found")))
}

/// Liveness ping. Creates the device record if it does not exist yet.
#[utoipa::path(
    post,
    path = "/devices/{device_key}/heartbeat",
    params(("device_key" = String, Path, description = "Device key (IP address)")),
    responses(
        (status = 200, description = "Updated device record", body = DeviceDto),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "devices"
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(device_key): Path<String>,
) -> Result<Json<DeviceDto>, AppError> {
    let record = state.sensors.heartbeat(&device_key, Utc::now()).await?;
    Ok(Json(record.into()))
}

/// Deactivate or reactivate a device. Inactive devices are never alerted on.
#[utoipa::path(
    put,
    path = "/devices/{device_key}/status",
    params(("device_key" = String, Path, description = "Device key (IP address)")),
    request_body = DeviceStatusRequest,
    responses(
        (status = 200, description = "Updated device record", body = DeviceDto),
        (status = 404, description = "Unknown device"),
    ),
    tag = "devices"
)]
pub async fn set_device_status(
    State(state): State<AppState>,
    Path(device_key): Path<String>,
    Json(body): Json<DeviceStatusRequest>,
) -> Result<Json<DeviceDto>, AppError> {
    state
        .sensors
        .set_status(&device_key, body.status)
        .await?
        .map(|d| Json(d.into()))
        .ok_or_else(|| AppError::not_found(format!("Device {device_key} not found")))
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/control",
    request_body = ControlRequest,
    responses(
        (status = 200, description = "Command queued", body = ControlQueuedResponse),
        (status = 400, description = "Missing device key or command"),
    ),
    tag = "control"
)]
pub async fn post_control(
    State(state): State<AppState>,
    Json(body): Json<ControlRequest>,
) -> Result<Json<ControlQueuedResponse>, AppError> {
    let device_key = body.device_key.as_deref().map(str::trim).unwrap_or_default();
    let command = body.command.as_deref().map(str::trim).unwrap_or_default();
    if device_key.is_empty() || command.is_empty() {
        return Err(AppError::bad_request("deviceIp and command are required"));
    }

    let cmd = state
        .commands
        .push(device_key, command, body.payload, Utc::now())
        .await;
    tracing::info!(device_key = %device_key, command = %command, "Control command queued");

    Ok(Json(ControlQueuedResponse {
        message: "Command queued".to_owned(),
        command: cmd.into(),
    }))
}

/// Device poll. Consumes the pending command unless `consume=false`.
#[utoipa::path(
    get,
    path = "/control",
    params(ControlQuery),
    responses(
        (status = 200, description = "Pending command or idle marker", body = ControlPollResponse),
        (status = 400, description = "Missing device key"),
    ),
    tag = "control"
)]
pub async fn get_control(
    State(state): State<AppState>,
    Query(q): Query<ControlQuery>,
) -> Result<Json<ControlPollResponse>, AppError> {
    let device_key = q.device_key.as_deref().map(str::trim).unwrap_or_default();
    if device_key.is_empty() {
        return Err(AppError::bad_request("deviceIp is required"));
    }

    let pending = if parse_bool(q.consume.as_deref(), true) {
        state.commands.take(device_key).await
    } else {
        state.commands.peek(device_key).await
    };

    Ok(Json(match pending {
        Some(cmd) => ControlPollResponse::Pending(cmd.into()),
        None => ControlPollResponse::Idle {
            device_key: device_key.to_owned(),
            command: None,
            status: "idle".to_owned(),
        },
    }))
}

// ---------------------------------------------------------------------------
// Monitor / health
// ---------------------------------------------------------------------------

/// Run one liveness scan now, outside the periodic schedule.
#[utoipa::path(
    post,
    path = "/monitor/scan",
    responses(
        (status = 200, description = "Scan finished", body = ScanReportDto),
        (status = 409, description = "A scan is already running"),
        (status = 503, description = "Store unavailable"),
    ),
    tag = "monitor"
)]
pub async fn run_scan(State(state): State<AppState>) -> Result<Json<ScanReportDto>, AppError> {
    match state.monitor.try_scan(Utc::now()).await {
        Some(report) => Ok(Json(report?.into())),
        None => Err(AppError::conflict("A liveness scan is already running")),
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up")),
    tag = "monitor"
)]
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec struct (used in api/mod.rs)
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        post_sensor_data,
        get_sensor_data,
        register_device,
        get_device,
        heartbeat,
        set_device_status,
        post_control,
        get_control,
        run_scan,
        health,
    ),
    components(schemas(
        SensorDataRequest,
        RegisterDeviceRequest,
        DeviceStatusRequest,
        DeviceStatus,
        ControlRequest,
        ReadingDto,
        DeviceDto,
        LatestReadingDto,
        AggregatedPointDto,
        HistoryPointDto,
        HistoryResponse,
        IngestResponse,
        ControlCommandDto,
        ControlQueuedResponse,
        ControlPollResponse,
        ScanReportDto,
    )),
    tags(
        (name = "sensor-data", description = "Telemetry ingestion and queries"),
        (name = "devices", description = "Device registry"),
        (name = "control", description = "Pending device commands"),
        (name = "monitor", description = "Liveness monitoring and health"),
    ),
    info(
        title = "Soil Telemetry Service API",
        version = "0.1.0",
        description = "REST API for soil sensor telemetry and device liveness"
    )
)]
pub struct ApiDoc;
