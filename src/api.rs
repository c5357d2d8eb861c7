//! REST API for the stowage service.
//!
//! A thin HTTP surface over one shared `StationState`. Every request takes the
//! station lock once, so each call is a single exclusive section.
//! Uses Axum as the web framework and supports CORS.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Json, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::config::{ApiConfig, PlacementSettings, StationConfig};
use crate::error::{ErrorKind, StowageError};
use crate::lifecycle::{ItemRef, SimulationReport, UsageChange, UsageEvent, simulate_days};
use crate::model::{Container, Item, Placement, ValidationError, WasteReason};
use crate::placement::{
    PlacementConfig, PlacementOutcome, RearrangementAction, RearrangementStep, UnplacedItem,
    UnplacedReason, place_item_at, place_items_with_config, place_items_with_progress,
};
use crate::retrieval::{
    ItemLocation, ItemQuery, RetrievalAction, RetrievalPlan, RetrievalReport, RetrievalStep,
    locate_item, retrieve_item,
};
use crate::station::StationState;
use crate::types::{Coords, Rotation};
use crate::waste::{
    ReturnItem, ReturnManifest, ReturnPlan, ReturnRequest, ReturnStep, SkippedWaste,
    UndockingReport, WasteItem, WastePosition, complete_undocking, identify_waste,
    plan_waste_return,
};

#[derive(Clone)]
struct ApiState {
    station: Arc<Mutex<StationState>>,
    activity: Arc<Mutex<ActivityLog>>,
    placement_config: PlacementConfig,
    return_budget: f64,
}

impl ApiState {
    fn new(placement: &PlacementSettings, station: &StationConfig) -> Self {
        Self {
            station: Arc::new(Mutex::new(StationState::new(station.start_date()))),
            activity: Arc::new(Mutex::new(ActivityLog::default())),
            placement_config: placement.placement_config(),
            return_budget: station.return_budget(),
        }
    }

    fn record(&self, headers: &HeaderMap, action: &str, details: impl Into<String>) {
        let user_id = headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("anonymous");
        lock(&self.activity).record(action, user_id, details.into());
    }
}

/// Locks the mutex, recovering the guard if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

const USER_HEADER: &str = "x-user-id";

/// One entry of the in-memory activity log.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub user_id: String,
    pub details: String,
}

/// Bounded log of API actions; the oldest entries are dropped first.
#[derive(Debug, Default)]
struct ActivityLog {
    entries: VecDeque<LogEntry>,
}

impl ActivityLog {
    const CAPACITY: usize = 1000;

    fn record(&mut self, action: &str, user_id: &str, details: String) {
        if self.entries.len() == Self::CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Utc::now(),
            action: action.to_string(),
            user_id: user_id.to_string(),
            details,
        });
    }

    fn query(&self, filter: &LogQuery) -> Vec<LogEntry> {
        let matching: Vec<&LogEntry> = self
            .entries
            .iter()
            .filter(|entry| {
                filter
                    .action
                    .as_deref()
                    .is_none_or(|action| entry.action == action)
            })
            .collect();
        let skip = filter
            .limit
            .map_or(0, |limit| matching.len().saturating_sub(limit));
        matching.into_iter().skip(skip).cloned().collect()
    }
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>station-stowage API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"
            integrity="sha384-2YH8WDRaj7V2OqU/trsmzSagmk/E2SutiCsGkdgoQwC9pNUJV1u/141DHB6jgs8t"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                const ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
                    layout: "StandaloneLayout",
                });
                window.ui = ui;
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

fn default_usage_limit() -> u32 {
    1
}

/// Item record as delivered by the import layer.
#[derive(Deserialize, Clone, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "id": "001",
    "name": "Food Packet",
    "width": 10, "depth": 10, "height": 20,
    "mass": 5.0,
    "priority": 80,
    "expiryDate": "2025-05-20",
    "usageLimit": 30,
    "preferredZone": "Crew Quarters"
}))]
pub struct ItemRecord {
    pub id: String,
    pub name: String,
    pub width: u32,
    pub depth: u32,
    pub height: u32,
    pub mass: f64,
    pub priority: u8,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default = "default_usage_limit")]
    pub usage_limit: u32,
    #[serde(default)]
    pub remaining_uses: Option<u32>,
    #[serde(default)]
    pub preferred_zone: String,
}

impl ItemRecord {
    fn into_item(self) -> Result<Item, ValidationError> {
        let item = Item::new(
            self.id,
            self.name,
            Coords::new(self.width, self.depth, self.height),
            self.mass,
            self.priority,
        )?
        .with_expiry(self.expiry_date)
        .with_usage_limit(self.usage_limit)
        .with_preferred_zone(self.preferred_zone);
        match self.remaining_uses {
            Some(remaining) => item.with_remaining_uses(remaining),
            None => Ok(item),
        }
    }
}

#[derive(Deserialize, Clone, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: String,
    pub zone: String,
    pub width: u32,
    pub depth: u32,
    pub height: u32,
}

impl ContainerRecord {
    fn into_container(self) -> Result<Container, ValidationError> {
        Container::new(
            self.id,
            self.zone,
            Coords::new(self.width, self.depth, self.height),
        )
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ImportItemsRequest {
    pub items: Vec<ItemRecord>,
}

#[derive(Deserialize, ToSchema)]
pub struct ImportContainersRequest {
    pub containers: Vec<ContainerRecord>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub success: bool,
    pub imported: usize,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub current_date: NaiveDate,
    pub items: usize,
    pub containers: usize,
}

/// Container with its occupancy summary.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub id: String,
    pub zone: String,
    pub width: u32,
    pub depth: u32,
    pub height: u32,
    pub occupied_volume: u64,
    pub free_volume: u64,
    pub utilization_percent: f64,
    pub placed_item_ids: Vec<String>,
}

impl From<&Container> for ContainerSummary {
    fn from(container: &Container) -> Self {
        Self {
            id: container.id.clone(),
            zone: container.zone.clone(),
            width: container.dims.width,
            depth: container.dims.depth,
            height: container.dims.height,
            occupied_volume: container.occupied_volume(),
            free_volume: container.free_volume(),
            utilization_percent: container.utilization_percent(),
            placed_item_ids: container.placed_item_ids(),
        }
    }
}

/// Request for the placement endpoints.
///
/// Without `itemIds`, every unplaced non-waste item is placed. The optional
/// flags override the server configuration for this request only.
#[derive(Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({ "itemIds": ["001", "002"], "allowRotations": true }))]
pub struct PlacementRequest {
    #[serde(default)]
    pub item_ids: Option<Vec<String>>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub allow_rotations: Option<bool>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub allow_rearrangement: Option<bool>,
}

impl PlacementRequest {
    fn apply_overrides(&self, mut config: PlacementConfig) -> PlacementConfig {
        if let Some(allow_rotations) = self.allow_rotations {
            config.allow_item_rotation = allow_rotations;
        }
        if let Some(allow_rearrangement) = self.allow_rearrangement {
            config.allow_rearrangement = allow_rearrangement;
        }
        config
    }

    fn describe(&self) -> String {
        match &self.item_ids {
            Some(ids) => format!("{} requested items", ids.len()),
            None => "all unplaced items".to_string(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceRequest {
    pub item_id: String,
    pub container_id: String,
    pub start: Coords,
    #[serde(default)]
    pub rotation: Rotation,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveRequest {
    pub item_id: String,
}

fn default_days() -> i64 {
    1
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({ "numOfDays": 1, "itemsToBeUsed": [{ "itemId": "001" }, { "name": "Water Bottle" }] }))]
pub struct SimulateRequest {
    #[serde(default = "default_days")]
    pub num_of_days: i64,
    #[serde(default)]
    pub items_to_be_used: Vec<UsageEvent>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnPlanRequest {
    pub undocking_container_id: String,
    /// Falls back to the configured return budget.
    #[serde(default)]
    #[schema(nullable = true)]
    pub max_mass: Option<f64>,
    #[serde(default)]
    pub undocking_date: Option<NaiveDate>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UndockingRequest {
    pub undocking_container_id: String,
}

#[derive(Deserialize, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogQuery {
    /// Only entries with this action
    pub action: Option<String>,
    /// Only the newest `limit` entries
    pub limit: Option<usize>,
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn query_error(err: QueryRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid query parameters",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

fn status_for(err: &StowageError) -> StatusCode {
    match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidArgument => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn stowage_error(err: StowageError) -> Response {
    let title = match err.kind() {
        ErrorKind::NotFound => "Not found",
        ErrorKind::Conflict => "Conflict",
        ErrorKind::InvalidArgument => "Invalid argument",
    };
    error_response(status_for(&err), title, err.to_string())
}

fn parse_json<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload
        .map(|Json(value)| value)
        .map_err(json_deserialize_error)
}

fn ok_json<T: Serialize>(value: T) -> Response {
    (StatusCode::OK, Json(value)).into_response()
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handle_health,
        handle_import_items,
        handle_import_containers,
        handle_list_items,
        handle_list_containers,
        handle_placement,
        handle_placement_stream,
        handle_place,
        handle_search,
        handle_retrieve,
        handle_simulate,
        handle_identify_waste,
        handle_return_plan,
        handle_complete_undocking,
        handle_logs
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            ItemRecord,
            ContainerRecord,
            ImportItemsRequest,
            ImportContainersRequest,
            ImportResponse,
            ContainerSummary,
            Item,
            WasteReason,
            Coords,
            Rotation,
            Placement,
            PlacementRequest,
            PlacementOutcome,
            UnplacedItem,
            UnplacedReason,
            RearrangementStep,
            RearrangementAction,
            PlaceRequest,
            ItemLocation,
            RetrievalPlan,
            RetrievalStep,
            RetrievalAction,
            RetrieveRequest,
            RetrievalReport,
            SimulateRequest,
            UsageEvent,
            SimulationReport,
            UsageChange,
            ItemRef,
            WasteItem,
            WastePosition,
            ReturnPlanRequest,
            ReturnPlan,
            ReturnStep,
            ReturnManifest,
            ReturnItem,
            SkippedWaste,
            UndockingRequest,
            UndockingReport,
            LogEntry
        )
    ),
    tags(
        (name = "station", description = "Items, containers and health"),
        (name = "placement", description = "Stowing items into containers"),
        (name = "retrieval", description = "Finding and retrieving items"),
        (name = "lifecycle", description = "Time simulation"),
        (name = "waste", description = "Waste identification and return"),
        (name = "logs", description = "Activity log")
    )
)]
struct ApiDoc;

fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/import/items", post(handle_import_items))
        .route("/api/import/containers", post(handle_import_containers))
        .route("/api/items", get(handle_list_items))
        .route("/api/containers", get(handle_list_containers))
        .route("/api/placement", post(handle_placement))
        .route("/api/placement/stream", post(handle_placement_stream))
        .route("/api/place", post(handle_place))
        .route("/api/search", get(handle_search))
        .route("/api/retrieve", post(handle_retrieve))
        .route("/api/simulate/day", post(handle_simulate))
        .route("/api/waste/identify", get(handle_identify_waste))
        .route("/api/waste/return-plan", post(handle_return_plan))
        .route("/api/waste/complete-undocking", post(handle_complete_undocking))
        .route("/api/logs", get(handle_logs))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server and blocks until it terminates.
///
/// Configures CORS for cross-origin requests.
pub async fn start_api_server(
    config: ApiConfig,
    placement: PlacementSettings,
    station: StationConfig,
) -> std::io::Result<()> {
    let state = ApiState::new(&placement, &station);
    let app = router(state);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|err| {
        error!("❌ Could not bind API server to {}: {}", addr, err);
        err
    })?;

    let display_host = config.display_host().to_string();
    info!(
        "🚀 Server running on http://{}:{}",
        display_host,
        config.port()
    );
    if config.binds_to_all_interfaces() && config.uses_default_host() {
        info!("💡 Local access: http://localhost:{}", config.port());
    }
    info!("🗓️ Station date: {}", station.start_date());
    info!("📦 API endpoints under /api, documentation at /docs");

    axum::serve(listener, app).await.map_err(|err| {
        error!("❌ API server terminated with an error: {err}");
        err
    })
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "station"
)]
async fn handle_health(State(state): State<ApiState>) -> Response {
    let station = lock(&state.station);
    ok_json(HealthResponse {
        status: "ok".to_string(),
        current_date: station.current_date(),
        items: station.items().len(),
        containers: station.containers().len(),
    })
}

/// Registers items. The batch is applied completely or not at all.
#[utoipa::path(
    post,
    path = "/api/import/items",
    request_body = ImportItemsRequest,
    responses(
        (status = 200, description = "Items imported", body = ImportResponse),
        (status = CONFLICT, description = "Duplicate item id", body = ErrorResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid item record", body = ErrorResponse)
    ),
    tag = "station"
)]
async fn handle_import_items(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<ImportItemsRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let mut items = Vec::with_capacity(request.items.len());
    for record in request.items {
        let id = record.id.clone();
        match record.into_item() {
            Ok(item) => items.push(item),
            Err(err) => return validation_error(format!("item {id}: {err}")),
        }
    }
    let imported = items.len();

    let mut station = lock(&state.station);
    let mut scratch = station.clone();
    for item in items {
        if let Err(err) = scratch.insert_item(item) {
            return stowage_error(err);
        }
    }
    *station = scratch;
    drop(station);

    info!("📥 Imported {} items", imported);
    state.record(&headers, "import_items", format!("{imported} items"));
    ok_json(ImportResponse {
        success: true,
        imported,
    })
}

/// Registers containers. The batch is applied completely or not at all.
#[utoipa::path(
    post,
    path = "/api/import/containers",
    request_body = ImportContainersRequest,
    responses(
        (status = 200, description = "Containers imported", body = ImportResponse),
        (status = CONFLICT, description = "Duplicate container id", body = ErrorResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid container record", body = ErrorResponse)
    ),
    tag = "station"
)]
async fn handle_import_containers(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<ImportContainersRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let mut containers = Vec::with_capacity(request.containers.len());
    for record in request.containers {
        let id = record.id.clone();
        match record.into_container() {
            Ok(container) => containers.push(container),
            Err(err) => return validation_error(format!("container {id}: {err}")),
        }
    }
    let imported = containers.len();

    let mut station = lock(&state.station);
    let mut scratch = station.clone();
    for container in containers {
        if let Err(err) = scratch.insert_container(container) {
            return stowage_error(err);
        }
    }
    *station = scratch;
    drop(station);

    info!("📥 Imported {} containers", imported);
    state.record(&headers, "import_containers", format!("{imported} containers"));
    ok_json(ImportResponse {
        success: true,
        imported,
    })
}

#[utoipa::path(
    get,
    path = "/api/items",
    responses((status = 200, description = "All items", body = [Item])),
    tag = "station"
)]
async fn handle_list_items(State(state): State<ApiState>) -> Response {
    ok_json(lock(&state.station).items().to_vec())
}

#[utoipa::path(
    get,
    path = "/api/containers",
    responses((status = 200, description = "All containers", body = [ContainerSummary])),
    tag = "station"
)]
async fn handle_list_containers(State(state): State<ApiState>) -> Response {
    let station = lock(&state.station);
    let summaries: Vec<ContainerSummary> =
        station.containers().iter().map(ContainerSummary::from).collect();
    ok_json(summaries)
}

/// Places items into containers.
///
/// Items that find no room are reported as unplaced with a reason; this is a
/// normal result, not an error.
#[utoipa::path(
    post,
    path = "/api/placement",
    request_body = PlacementRequest,
    responses(
        (status = 200, description = "Placement outcome", body = PlacementOutcome),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "placement"
)]
async fn handle_placement(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<PlacementRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let config = request.apply_overrides(state.placement_config);

    info!("📥 New placement request: {}", request.describe());
    let outcome = {
        let mut station = lock(&state.station);
        place_items_with_config(&mut station, request.item_ids.as_deref(), config)
    };
    info!(
        "📦 Result: {} placed, {} rearrangement steps, {} unplaced",
        outcome.placed_count(),
        outcome.rearrangements.len(),
        outcome.unplaced_count()
    );

    state.record(
        &headers,
        "placement",
        format!(
            "{} placed, {} unplaced",
            outcome.placed_count(),
            outcome.unplaced_count()
        ),
    );
    ok_json(outcome)
}

/// Streams placement events as Server-Sent Events (text/event-stream).
#[utoipa::path(
    post,
    path = "/api/placement/stream",
    request_body = PlacementRequest,
    responses(
        (
            status = 200,
            description = "Streams placement events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "placement"
)]
async fn handle_placement_stream(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<PlacementRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let config = request.apply_overrides(state.placement_config);
    state.record(&headers, "placement_stream", request.describe());

    let (tx, rx) = mpsc::channel::<String>(32);
    let station = Arc::clone(&state.station);
    let item_ids = request.item_ids;

    tokio::task::spawn_blocking(move || {
        // The lock is released before the first send, so a slow client
        // never holds up other requests.
        let events = collect_placement_events(&station, item_ids.as_deref(), config);
        for json in events {
            if tx.blocking_send(json).is_err() {
                break;
            }
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Runs a placement under the station lock and returns its events as JSON.
fn collect_placement_events(
    station: &Mutex<StationState>,
    item_ids: Option<&[String]>,
    config: PlacementConfig,
) -> Vec<String> {
    let mut events = Vec::new();
    let mut station = lock(station);
    place_items_with_progress(&mut station, item_ids, config, |evt| {
        match serde_json::to_string(evt) {
            Ok(json) => events.push(json),
            Err(err) => error!("❌ Could not serialize placement event: {}", err),
        }
    });
    events
}

/// Places one item at an explicit position.
#[utoipa::path(
    post,
    path = "/api/place",
    request_body = PlaceRequest,
    responses(
        (status = 200, description = "Item placed", body = Placement),
        (status = NOT_FOUND, description = "Unknown item or container", body = ErrorResponse),
        (status = CONFLICT, description = "Position is occupied or out of bounds", body = ErrorResponse)
    ),
    tag = "placement"
)]
async fn handle_place(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<PlaceRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = {
        let mut station = lock(&state.station);
        place_item_at(
            &mut station,
            &request.item_id,
            &request.container_id,
            request.start,
            request.rotation,
        )
    };
    match result {
        Ok(placement) => {
            state.record(
                &headers,
                "place",
                format!("{} -> {}", placement.item_id, placement.container_id),
            );
            ok_json(placement)
        }
        Err(err) => stowage_error(err),
    }
}

/// Locates an item by id or name and plans its retrieval.
#[utoipa::path(
    get,
    path = "/api/search",
    params(ItemQuery),
    responses(
        (status = 200, description = "Item location and retrieval steps", body = ItemLocation),
        (status = NOT_FOUND, description = "No placed item matches", body = ErrorResponse)
    ),
    tag = "retrieval"
)]
async fn handle_search(
    State(state): State<ApiState>,
    query: Result<Query<ItemQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(err) => return query_error(err),
    };
    let result = locate_item(&lock(&state.station), &query);
    match result {
        Ok(location) => ok_json(location),
        Err(err) => stowage_error(err),
    }
}

/// Takes an item out of its container and records one use.
#[utoipa::path(
    post,
    path = "/api/retrieve",
    request_body = RetrieveRequest,
    responses(
        (status = 200, description = "Item retrieved", body = RetrievalReport),
        (status = NOT_FOUND, description = "Unknown or unplaced item", body = ErrorResponse)
    ),
    tag = "retrieval"
)]
async fn handle_retrieve(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<RetrieveRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = retrieve_item(&mut lock(&state.station), &request.item_id);
    match result {
        Ok(report) => {
            state.record(
                &headers,
                "retrieve",
                format!(
                    "{} ({} steps)",
                    report.plan.item_id,
                    report.plan.steps.len()
                ),
            );
            ok_json(report)
        }
        Err(err) => stowage_error(err),
    }
}

/// Advances the simulated date, applying item usages first.
#[utoipa::path(
    post,
    path = "/api/simulate/day",
    request_body = SimulateRequest,
    responses(
        (status = 200, description = "Simulation report", body = SimulationReport),
        (status = UNPROCESSABLE_ENTITY, description = "Negative day count", body = ErrorResponse)
    ),
    tag = "lifecycle"
)]
async fn handle_simulate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<SimulateRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = simulate_days(
        &mut lock(&state.station),
        request.num_of_days,
        &request.items_to_be_used,
    );
    match result {
        Ok(report) => {
            info!(
                "🗓️ Simulated {} days, now {}",
                request.num_of_days, report.new_date
            );
            state.record(
                &headers,
                "simulate",
                format!("{} -> {}", report.previous_date, report.new_date),
            );
            ok_json(report)
        }
        Err(err) => stowage_error(err),
    }
}

#[utoipa::path(
    get,
    path = "/api/waste/identify",
    responses((status = 200, description = "All waste items", body = [WasteItem])),
    tag = "waste"
)]
async fn handle_identify_waste(State(state): State<ApiState>) -> Response {
    ok_json(identify_waste(&mut lock(&state.station)))
}

/// Stages waste items in the undocking container within a mass budget.
#[utoipa::path(
    post,
    path = "/api/waste/return-plan",
    request_body = ReturnPlanRequest,
    responses(
        (status = 200, description = "Return plan and manifest", body = ReturnPlan),
        (status = NOT_FOUND, description = "Unknown undocking container", body = ErrorResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid mass budget", body = ErrorResponse)
    ),
    tag = "waste"
)]
async fn handle_return_plan(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<ReturnPlanRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let request = ReturnRequest {
        undocking_container_id: request.undocking_container_id,
        max_mass: request.max_mass.unwrap_or(state.return_budget),
        undocking_date: request.undocking_date,
    };

    let result = plan_waste_return(&mut lock(&state.station), &request);
    match result {
        Ok(plan) => {
            state.record(
                &headers,
                "waste_return_plan",
                format!(
                    "{} items, {} kg to {}",
                    plan.return_manifest.return_items.len(),
                    plan.return_manifest.total_mass,
                    plan.return_manifest.undocking_container_id
                ),
            );
            ok_json(plan)
        }
        Err(err) => stowage_error(err),
    }
}

/// Removes all waste stowed in the undocking container from the station.
#[utoipa::path(
    post,
    path = "/api/waste/complete-undocking",
    request_body = UndockingRequest,
    responses(
        (status = 200, description = "Waste removed", body = UndockingReport),
        (status = NOT_FOUND, description = "Unknown container", body = ErrorResponse)
    ),
    tag = "waste"
)]
async fn handle_complete_undocking(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<UndockingRequest>, JsonRejection>,
) -> Response {
    let request = match parse_json(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = complete_undocking(&mut lock(&state.station), &request.undocking_container_id);
    match result {
        Ok(report) => {
            state.record(
                &headers,
                "complete_undocking",
                format!("{} items from {}", report.items_removed, report.container_id),
            );
            ok_json(report)
        }
        Err(err) => stowage_error(err),
    }
}

#[utoipa::path(
    get,
    path = "/api/logs",
    params(LogQuery),
    responses((status = 200, description = "Activity log, oldest first", body = [LogEntry])),
    tag = "logs"
)]
async fn handle_logs(
    State(state): State<ApiState>,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(err) => return query_error(err),
    };
    ok_json(lock(&state.activity).query(&query))
}

async fn serve_openapi_json() -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}
