//! ICE server discovery
//!
//! `GET /api/cast/ice-servers` returns the STUN servers both peers should use.
//! There is no TURN relay, so no credentials are ever issued.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::http::AppState;

/// One ICE server entry in the browser's `RTCIceServer` shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerEntry {
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetIceServersResponse {
    pub servers: Vec<IceServerEntry>,
}

/// Get the configured STUN servers
///
/// # Response
/// ```json
/// { "servers": [ { "urls": ["stun:stun.l.google.com:19302"] } ] }
/// ```
pub async fn get_ice_servers(State(state): State<AppState>) -> Json<GetIceServersResponse> {
    let servers = if state.ice_servers.urls.is_empty() {
        Vec::new()
    } else {
        vec![IceServerEntry {
            urls: state.ice_servers.urls.clone(),
        }]
    };

    Json(GetIceServersResponse { servers })
}
