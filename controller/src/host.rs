use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use greenhouse_common::{
    ActuatorId, ControlError, GrowthPhase, OverrideVariable, RequestResultPayload, ResolveError,
    RuntimeConfig, SensorAveragesPayload, SensorSnapshot, TOPIC_CMD_ADVANCE, TOPIC_CMD_OVERRIDE, TOPIC_CMD_RESTART, TOPIC_CMD_START,
    TOPIC_SENSOR_AIR_HUMIDITY, TOPIC_SENSOR_AIR_TEMPERATURE, TOPIC_SENSOR_LIGHT,
    TOPIC_SENSOR_SOIL_MOISTURE, TOPIC_SENSOR_SOIL_TEMPERATURE, TOPIC_SENSOR_STATUS,
};

use crate::{
    clock::{Clock, SystemClock},
    cycle::{ControlCycle, CycleDeps},
    phases::{EngineError, PhaseEngine},
    relays::{RelayBank, RelayBoard},
    requests::{handle_command, handle_request, ExternalRequest, OverrideCommand},
    sensors::{SensorCache, SensorKind},
    signal::ResetSignal,
    status::{PhaseStatus, StatusBoard},
    store::{load_runtime_config, GreenhouseStore, StoreError},
};

#[derive(Clone)]
struct AppState {
    store: Arc<GreenhouseStore>,
    engine: Arc<PhaseEngine>,
    sensors: Arc<SensorCache>,
    status: Arc<StatusBoard>,
    reset: Arc<ResetSignal>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct ActuatorView {
    actuator: ActuatorId,
    active: bool,
    reason: String,
}

#[derive(Debug, Serialize)]
struct StatusView {
    #[serde(rename = "greenhouseId")]
    greenhouse_id: String,
    plant: Option<String>,
    phase: GrowthPhase,
    #[serde(rename = "phaseStartEpoch")]
    phase_start_epoch: Option<i64>,
    #[serde(rename = "systemEnabled")]
    system_enabled: bool,
    #[serde(rename = "nextAdvanceEpoch")]
    next_advance_epoch: Option<i64>,
    #[serde(rename = "lastPhaseReport")]
    last_phase_report: Option<PhaseStatus>,
    actuators: Vec<ActuatorView>,
    sensors: SensorSnapshot,
    #[serde(rename = "sensorAverages")]
    sensor_averages: Option<SensorAveragesPayload>,
    #[serde(rename = "lastRequest")]
    last_request: Option<RequestResultPayload>,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("GREENHOUSE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.greenhouse"));

    let mut runtime = load_runtime_config(&data_dir).await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });
    runtime.controller.sanitize();
    if let Ok(id) = std::env::var("GREENHOUSE_ID") {
        runtime.greenhouse_id = id;
    }

    let timezone = runtime.timezone.parse::<Tz>().unwrap_or_else(|err| {
        warn!("invalid timezone {}: {err}", runtime.timezone);
        chrono_tz::America::Sao_Paulo
    });

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let client_id = format!("greenhouse-controller-{}", runtime.greenhouse_id);
    let mut mqtt_options = MqttOptions::new(client_id, mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let store = Arc::new(
        GreenhouseStore::open(&data_dir, runtime.greenhouse_id.clone())
            .await
            .context("failed to open greenhouse store")?,
    );
    info!(plants = ?store.presets().plants(), "preset book loaded");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let reset = Arc::new(ResetSignal::new());
    let status = Arc::new(StatusBoard::new(
        runtime.greenhouse_id.clone(),
        Some(mqtt.clone()),
    ));
    let relays: Arc<dyn RelayBank> = Arc::new(RelayBoard::new());
    let sensors = Arc::new(SensorCache::new(Duration::from_millis(
        runtime.controller.sensor_stale_timeout_ms,
    )));
    let engine = PhaseEngine::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        Arc::clone(&reset),
        Arc::clone(&status),
    );

    let cycle = Arc::new(ControlCycle::new(
        CycleDeps {
            store: Arc::clone(&store),
            engine: Arc::clone(&engine),
            sensors: Arc::clone(&sensors),
            relays,
            status: Arc::clone(&status),
            reset: Arc::clone(&reset),
            clock,
        },
        &runtime.controller,
        timezone,
    ));

    match engine.schedule_advance().await {
        Ok(Some(fire_at)) => info!(%fire_at, "pending phase advance restored"),
        Ok(None) => {}
        Err(err) => warn!("could not schedule phase advance at startup: {err}"),
    }

    let app_state = AppState {
        store,
        engine,
        sensors,
        status,
        reset,
    };

    subscribe_topics(&mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    let control_loop = tokio::spawn(Arc::clone(&cycle).run());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/presets", get(handle_get_presets))
        .route("/api/start", post(handle_start))
        .route("/api/advance", post(handle_advance))
        .route("/api/restart", post(handle_restart))
        .route("/api/overrides/{variable}", put(handle_put_override))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!(
        greenhouse = %runtime.greenhouse_id,
        timezone = %timezone,
        "controller listening on http://{addr}"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    control_loop.abort();
    let _ = control_loop.await;
    cycle.all_off("controller shutting down").await;
    info!("all actuators off, controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SENSOR_AIR_TEMPERATURE,
        TOPIC_SENSOR_AIR_HUMIDITY,
        TOPIC_SENSOR_SOIL_TEMPERATURE,
        TOPIC_SENSOR_SOIL_MOISTURE,
        TOPIC_SENSOR_LIGHT,
        TOPIC_SENSOR_STATUS,
        TOPIC_CMD_START,
        TOPIC_CMD_ADVANCE,
        TOPIC_CMD_RESTART,
        TOPIC_CMD_OVERRIDE,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;

    if topic == TOPIC_SENSOR_STATUS {
        info!("sensor node is {}", message.trim());
        return Ok(());
    }

    if let Some(kind) = SensorKind::from_topic(&topic) {
        match message.trim().parse::<f32>() {
            Ok(value) => {
                if !app_state.sensors.record(kind, value).await {
                    warn!("dropping out-of-range reading {value} on {topic}");
                }
            }
            Err(_) => warn!("dropping non-numeric reading on {topic}"),
        }
        return Ok(());
    }

    let outcome = handle_command(
        &app_state.engine,
        &app_state.store,
        &app_state.reset,
        &app_state.status,
        &topic,
        &message,
    )
    .await?;
    if let Some(outcome) = outcome {
        info!(?outcome, %topic, "mqtt request handled");
    }
    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let document = match state.store.document().await {
        Ok(document) => document,
        Err(err) => return error_response(StatusCode::NOT_FOUND, &err.to_string()),
    };

    let actuators = state
        .status
        .actuators()
        .into_iter()
        .map(|(actuator, decision)| ActuatorView {
            actuator,
            active: decision.active,
            reason: decision.reason,
        })
        .collect();

    let view = StatusView {
        greenhouse_id: state.store.greenhouse_id().to_string(),
        plant: document.plant,
        phase: document.phase,
        phase_start_epoch: document.phase_start.map(|start| start.timestamp()),
        system_enabled: document.system_enabled,
        next_advance_epoch: state
            .engine
            .scheduled_at()
            .await
            .map(|fire_at| fire_at.timestamp()),
        last_phase_report: state.status.phase(),
        actuators,
        sensors: state.sensors.snapshot().await,
        sensor_averages: state.status.sensor_averages(),
        last_request: state.status.last_request(),
    };
    Json(view).into_response()
}

async fn handle_get_presets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.presets().clone())
}

async fn handle_start(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(plant) = params.get("plant") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'plant' parameter");
    };
    let Some(phase) = params.get("phase") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'phase' parameter");
    };
    let phase = match phase.parse::<GrowthPhase>() {
        Ok(phase) => phase,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    let request = ExternalRequest::Start {
        plant: plant.clone(),
        phase,
    };
    dispatch(state, request).await
}

async fn handle_advance(State(state): State<AppState>) -> impl IntoResponse {
    dispatch(state, ExternalRequest::ForcedAdvance).await
}

async fn handle_restart(State(state): State<AppState>) -> impl IntoResponse {
    dispatch(state, ExternalRequest::Restart).await
}

async fn handle_put_override(
    State(state): State<AppState>,
    Path(variable): Path<String>,
    Json(command): Json<OverrideCommand>,
) -> impl IntoResponse {
    let variable = match variable.parse::<OverrideVariable>() {
        Ok(variable) => variable,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };
    dispatch(state, ExternalRequest::override_changed(variable, command)).await
}

async fn dispatch(state: AppState, request: ExternalRequest) -> axum::response::Response {
    match handle_request(&state.engine, &state.store, &state.reset, request).await {
        Ok(outcome) => {
            info!(?outcome, "http request handled");
            handle_get_status(State(state)).await.into_response()
        }
        Err(err) => engine_error_response(err),
    }
}

fn engine_error_response(err: EngineError) -> axum::response::Response {
    let status = match &err {
        EngineError::Control(ControlError::NoNextPhase(_)) => StatusCode::CONFLICT,
        EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        EngineError::Resolve(ResolveError::PresetNotFound { .. })
        | EngineError::Resolve(ResolveError::GreenhouseNotFound(_))
        | EngineError::Store(StoreError::Missing(_)) => StatusCode::NOT_FOUND,
        _ => {
            warn!("request failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_http_status() {
        let status = |err: EngineError| engine_error_response(err).status();

        assert_eq!(
            status(ControlError::NoNextPhase(GrowthPhase::Harvest).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(EngineError::InvalidRequest("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(
                ResolveError::PresetNotFound {
                    plant: "Basil".to_string(),
                    phase: GrowthPhase::Growth,
                }
                .into()
            ),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(StoreError::Persist(anyhow::anyhow!("disk full")).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
