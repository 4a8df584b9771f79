//! axum router: per-mountpoint listener audio streams plus the admin JSON
//! API for relay control.
//!
//! Grounded on the teacher's `server/routes.rs` (`create_router`,
//! `stream_audio`'s `async_stream::stream!` body + ICY chunk injection,
//! `Body::from_stream`), generalized from a single fixed ICY interval and
//! one wire format to the four [`ListenerMode`]s this crate supports, with
//! FLV's tag wrapping delegated to [`FlvPackager`] at this layer since the
//! cursor-stepping `ListenerWriter` itself stays format-agnostic about tag
//! framing.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{RelayCoreError, RelayResult};
use crate::flv_packager::{flv_stream_header, wrap_script_tag, FlvPackager, InMemoryFlvPackager};
use crate::listener::{ListenerMode, ListenerStep};
use crate::mount::MountRegistry;
use crate::mpeg_sync::Layer;
use crate::relay::{redirect_location, ControllerCommand, RedirectorPool, RelayController};

#[derive(Clone)]
pub struct AdminState {
    pub mounts: Arc<MountRegistry>,
    pub relay_controller: Arc<RelayController>,
    pub redirector: Arc<RedirectorPool>,
}

fn is_legacy_flash_client(headers: &HeaderMap) -> bool {
    if headers.contains_key("x-flash-version") {
        return true;
    }
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.contains("MSIE"))
        .unwrap_or(false)
}

pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/relays", get(list_relays))
        .route("/admin/relays/{mount}/toggle", post(toggle_relay))
        .route("/admin/update-all-mounts", post(update_all_mounts))
        .route("/{*mountpoint}", get(stream_audio))
        .with_state(state)
}

fn pick_mode(headers: &HeaderMap, path: &str) -> ListenerMode {
    let wants_icy = headers
        .get("icy-metadata")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "1")
        .unwrap_or(false);
    let wants_iceblocks = headers
        .get("iceblocks")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("1."))
        .unwrap_or(false);

    if path.ends_with(".flv") {
        ListenerMode::Flv
    } else if wants_iceblocks {
        ListenerMode::Iceblock
    } else if wants_icy {
        ListenerMode::IcyInterleaved
    } else {
        ListenerMode::Plain
    }
}

async fn stream_audio(
    Path(mountpoint): Path<String>,
    headers: HeaderMap,
    State(state): State<AdminState>,
) -> impl IntoResponse {
    let path = format!("/{mountpoint}");
    let mount = match state.mounts.get(&path) {
        Some(m) => m,
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "mount_not_found", "message": path })),
            )
                .into_response();
        }
    };

    if mount.is_terminating() {
        if let Some(target) = state.redirector.pick(std::time::Instant::now()) {
            let location = redirect_location(&target, &path, None, None);
            return Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, location)
                .body(Body::empty())
                .unwrap()
                .into_response();
        }
    }

    let mode = pick_mode(&headers, &path);
    let listener_id = match mount.add_listener(mode) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };

    let content_type = match mode {
        ListenerMode::Flv => "video/x-flv",
        _ => "audio/mpeg",
    };

    let is_icy = mode == ListenerMode::IcyInterleaved;
    let icy_metaint = mount.config.icy_metaint;
    let mount_for_stream = Arc::clone(&mount);

    let body_stream = async_stream::stream! {
        if mode == ListenerMode::Flv {
            let (is_aac, samplerate_hz, bitrate_bps) = {
                let source = mount_for_stream.source.lock();
                (
                    matches!(source.sync_layer(), Some(Layer::Aac)),
                    source.sync_samplerate().unwrap_or(0),
                    source.sync_bitrate().unwrap_or(0),
                )
            };
            let mut packager = InMemoryFlvPackager::new(
                mount_for_stream.config.stream_name.clone().unwrap_or_default(),
                mount_for_stream.config.stream_description.clone().unwrap_or_default(),
                is_aac,
                samplerate_hz,
                bitrate_bps,
            );
            yield Ok::<_, Infallible>(flv_stream_header());
            yield Ok(packager.script_tag());

            loop {
                let Some(handle) = mount_for_stream.listener(listener_id) else { break };
                let step = { handle.writer.lock().step(&mount_for_stream.queue) };
                match step {
                    ListenerStep::FlvData { audio, new_meta } => {
                        if let Some(meta) = new_meta {
                            yield Ok(wrap_script_tag(&meta));
                        }
                        if !audio.is_empty() {
                            yield Ok(packager.wrap_audio(&audio, 0.0));
                        }
                    }
                    ListenerStep::Data(_) => {}
                    ListenerStep::Pending => mount_for_stream.queue.notified().await,
                    ListenerStep::Overran { .. } => {}
                }
            }
        } else {
            loop {
                let Some(handle) = mount_for_stream.listener(listener_id) else { break };
                let step = { handle.writer.lock().step(&mount_for_stream.queue) };
                match step {
                    ListenerStep::Data(bytes) if !bytes.is_empty() => yield Ok(bytes),
                    ListenerStep::Data(_) => {}
                    ListenerStep::FlvData { .. } => {}
                    ListenerStep::Pending => mount_for_stream.queue.notified().await,
                    ListenerStep::Overran { .. } => {}
                }
            }
        }

        mount_for_stream.remove_listener(listener_id);
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::CONNECTION, "keep-alive")
        .header(header::EXPIRES, "Mon, 26 Jul 1997 05:00:00 GMT")
        .header(header::PRAGMA, "no-cache");

    if is_icy {
        response = response
            .header("icy-metaint", icy_metaint.to_string())
            .header("icy-name", mount.config.stream_name.clone().unwrap_or_default());
    }

    if is_legacy_flash_client(&headers) {
        response = response.header(header::CONTENT_LENGTH, "221183499");
    }

    response.body(Body::from_stream(body_stream)).unwrap().into_response()
}

#[derive(Serialize)]
struct RelaySummary {
    localmount: String,
    state: String,
}

async fn list_relays(State(state): State<AdminState>) -> impl IntoResponse {
    let relays: Vec<RelaySummary> = state
        .mounts
        .mountpoints()
        .into_iter()
        .filter_map(|mp| {
            state
                .relay_controller
                .state_of(&mp)
                .map(|relay_state| RelaySummary {
                    localmount: mp,
                    state: format!("{relay_state:?}"),
                })
        })
        .collect();
    Json(serde_json::json!({ "relays": relays }))
}

async fn toggle_relay(Path(mount): Path<String>, State(state): State<AdminState>) -> impl IntoResponse {
    let mountpoint = format!("/{mount}");
    match state.relay_controller.toggle(&mountpoint) {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Deserialize)]
struct UpdateAllMountsRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn update_all_mounts(
    State(state): State<AdminState>,
    body: Option<Json<UpdateAllMountsRequest>>,
) -> impl IntoResponse {
    let reason = body.and_then(|Json(b)| b.reason).unwrap_or_default();
    log::info!("admin requested update-all-mounts ({})", reason);
    let result: RelayResult<()> = state
        .relay_controller
        .command_sender()
        .try_send(ControllerCommand::UpdateAllMounts)
        .map_err(|e| RelayCoreError::Internal(e.to_string()));
    match result {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(err) => err.into_response(),
    }
}
