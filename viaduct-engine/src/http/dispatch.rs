//! URI routing and JSON framing (§4.K, §4.J).
//!
//! Each handler parses its `{coords}` path segment and query string into a
//! params record, hands it to the matching `service` function, and wraps
//! the outcome as the reply shape §4.K describes: `{"code": "Ok", ...}` on
//! success, `{"code": <ErrorCode>, "message": ...}` with the matching HTTP
//! status otherwise. No routing logic lives here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::{json, Value};

use crate::http::state::ServerState;
use crate::mode::Mode;
use crate::params::{parse_coordinates, parse_match_params, parse_nearest_params, parse_route_params, parse_table_params, parse_trip_params};
use crate::service;
use viaduct_common::Error;

/// A raw-querystring extractor: axum's `Query<T>` needs a `Deserialize`
/// target, but this grammar has its own hand-rolled parser (§4.I), so the
/// handlers take the query string as-is.
pub struct RawQuery(pub String);

impl<S> axum::extract::FromRequestParts<S> for RawQuery
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RawQuery(parts.uri.query().unwrap_or("").to_string()))
    }
}

fn error_response(err: Error) -> Response {
    let status = StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "code": err.code.as_str(), "message": err.message }))).into_response()
}

fn ok_response(mut body: Value) -> Response {
    body["code"] = json!("Ok");
    Json(body).into_response()
}

fn waypoints_json(waypoints: &[service::Waypoint]) -> Value {
    json!(waypoints
        .iter()
        .map(|w| json!({
            "location": [w.snapped.lon_degrees(), w.snapped.lat_degrees()],
            "distance": w.distance_to_input_m,
        }))
        .collect::<Vec<_>>())
}

#[derive(Serialize)]
struct RouteResponse {
    waypoints: Value,
    routes: Vec<Value>,
}

fn route_json(result: &crate::annotate::RouteResult) -> Value {
    json!({
        "distance": result.total_distance_m,
        "duration": result.total_duration_ds,
        "legs": result.segments.iter().map(|s| json!({
            "name_id": s.name_id,
            "name": s.name,
            "distance": s.length_m,
            "duration": s.duration_ds,
            "mode": s.travel_mode,
            "maneuver": {
                "type": s.turn_instruction.turn_type,
                "modifier": s.turn_instruction.modifier,
                "bearing_before": s.bearing_pre,
                "bearing_after": s.bearing_post,
            },
        })).collect::<Vec<_>>(),
    })
}

fn resolve_mode<'a>(state: &'a ServerState, profile: &str) -> Result<(Mode, &'a crate::loader::ModeData), Response> {
    let mode = Mode::parse(profile).map_err(error_response)?;
    let data = state.mode_data(mode).map_err(error_response)?;
    Ok((mode, data))
}

pub async fn route_handler(
    State(state): State<Arc<ServerState>>,
    Path((profile, coords)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Response {
    let (mode, data) = match resolve_mode(&state, &profile) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let coordinates = match parse_coordinates(&coords) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    let params = match parse_route_params(&coordinates, &query) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    match service::route(data, mode, &params) {
        Ok((waypoints, result)) => ok_response(json!({
            "waypoints": waypoints_json(&waypoints),
            "routes": [route_json(&result)],
        })),
        Err(e) => error_response(e),
    }
}

pub async fn nearest_handler(
    State(state): State<Arc<ServerState>>,
    Path((profile, coords)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Response {
    let (_, data) = match resolve_mode(&state, &profile) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let coordinates = match parse_coordinates(&coords) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    let params = match parse_nearest_params(&coordinates, &query) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    match service::nearest(data, &params) {
        Ok(waypoints) => ok_response(json!({ "waypoints": waypoints_json(&waypoints) })),
        Err(e) => error_response(e),
    }
}

pub async fn table_handler(
    State(state): State<Arc<ServerState>>,
    Path((profile, coords)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Response {
    let (mode, data) = match resolve_mode(&state, &profile) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let coordinates = match parse_coordinates(&coords) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    let params = match parse_table_params(&coordinates, &query) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    match service::table(data, mode, &params) {
        Ok(result) => ok_response(json!({
            "sources": waypoints_json(&result.sources),
            "destinations": waypoints_json(&result.destinations),
            "durations": chunk(&result.durations_ds, result.destinations.len()),
            "distances": chunk(&result.distances_m, result.destinations.len()),
        })),
        Err(e) => error_response(e),
    }
}

fn chunk<T: Serialize + Copy>(flat: &[T], row_len: usize) -> Vec<Vec<T>> {
    if row_len == 0 {
        return Vec::new();
    }
    flat.chunks(row_len).map(|row| row.to_vec()).collect()
}

pub async fn trip_handler(
    State(state): State<Arc<ServerState>>,
    Path((profile, coords)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Response {
    let (_, data) = match resolve_mode(&state, &profile) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let coordinates = match parse_coordinates(&coords) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    let params = match parse_trip_params(&coordinates, &query) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    match service::trip(data, &params) {
        Ok(()) => ok_response(json!({})),
        Err(e) => error_response(e),
    }
}

pub async fn match_handler(
    State(state): State<Arc<ServerState>>,
    Path((profile, coords)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Response {
    let (_, data) = match resolve_mode(&state, &profile) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let coordinates = match parse_coordinates(&coords) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    let params = match parse_match_params(&coordinates, &query) {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    match service::map_match(data, &params) {
        Ok(()) => ok_response(json!({})),
        Err(e) => error_response(e),
    }
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
