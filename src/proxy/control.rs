//! Management endpoints under `/control`

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::message::{HttpRequest, HttpResponse};
use crate::network::HttpHandler;
use crate::pact::PactSelector;
use crate::{ProxyError, Result};

use super::controller::ProxyController;

/// Path prefix of the management endpoints
pub const CONTROL_PREFIX: &str = "/control";

/// Check if a request path belongs to the control API
#[must_use]
pub fn is_control_path(path: &str) -> bool {
    path.strip_prefix(CONTROL_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'))
}

/// Handle a control request
pub async fn handle(controller: &Arc<ProxyController>, request: &HttpRequest) -> HttpResponse {
    let (path, query) = request
        .path
        .split_once('?')
        .unwrap_or((request.path.as_str(), ""));
    let params = parse_query(query);
    let method = request.method.to_ascii_uppercase();

    debug!("Control request {} {}", method, path);

    let result = match (method.as_str(), path.trim_end_matches('/')) {
        ("POST", "/control/current") => set_current(controller, &params).await,
        ("GET", "/control/current") => Ok(get_current(controller).await),
        ("DELETE", "/control/current") => controller
            .unset_current_pact()
            .await
            .map(|_| HttpResponse::new(204)),
        ("POST", "/control/reset") => reset(controller, &params).await,
        (_, "/control/current" | "/control/reset") => Ok(HttpResponse::json(
            405,
            &json!({
                "error": "MethodNotAllowed",
                "message": format!("{method} is not supported on {path}"),
            }),
        )),
        _ => Ok(HttpResponse::json(
            404,
            &json!({
                "error": "NotFound",
                "message": format!("Unknown control endpoint {path}"),
            }),
        )),
    };

    result.unwrap_or_else(|e| HttpHandler::error_response(&e))
}

async fn set_current(controller: &ProxyController, params: &[(String, String)]) -> Result<HttpResponse> {
    let titles: Vec<String> = values(params, "title").map(ToString::to_string).collect();
    let selector = match value(params, "id") {
        Some(id) => PactSelector::Id(id.to_string()),
        None if !titles.is_empty() => PactSelector::Titles(titles),
        None => {
            return Err(ProxyError::Config(
                "Either 'id' or 'title' is required".to_string(),
            ))
        }
    };

    let clear = flag(params, "clear")?.unwrap_or(false);
    let recording = flag(params, "recording")?;

    let mut summary = controller.set_current_pact(selector, clear).await?;
    if let Some(recording) = recording {
        controller.set_recording(recording).await?;
        if let Some(current) = controller.current().await {
            summary = current;
        }
    }
    Ok(HttpResponse::json(200, &serde_json::to_value(summary)?))
}

async fn get_current(controller: &ProxyController) -> HttpResponse {
    match controller.current().await {
        Some(summary) => match serde_json::to_value(summary) {
            Ok(body) => HttpResponse::json(200, &body),
            Err(e) => HttpHandler::error_response(&e.into()),
        },
        None => HttpResponse::json(
            404,
            &json!({
                "error": "NotFound",
                "message": "No active pact",
            }),
        ),
    }
}

async fn reset(controller: &ProxyController, params: &[(String, String)]) -> Result<HttpResponse> {
    let mut modes = controller.modes().await;
    if let Some(mode) = value(params, "mode") {
        modes.mode = mode.parse()?;
    }
    if let Some(recording_mode) = value(params, "recordingMode").or_else(|| value(params, "recording_mode")) {
        modes.recording_mode = recording_mode.parse()?;
    }

    controller.reset(modes).await?;
    Ok(HttpResponse::json(200, &serde_json::to_value(modes)?))
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(component: &str) -> String {
    let component = component.replace('+', " ");
    urlencoding::decode(&component).map_or(component.clone(), |s| s.into_owned())
}

fn values<'a>(params: &'a [(String, String)], name: &'a str) -> impl Iterator<Item = &'a str> {
    params
        .iter()
        .filter(move |(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn value<'a>(params: &'a [(String, String)], name: &'a str) -> Option<&'a str> {
    values(params, name).next()
}

/// Boolean query flag; a bare `?clear` counts as true
fn flag(params: &[(String, String)], name: &str) -> Result<Option<bool>> {
    match value(params, name) {
        None => Ok(None),
        Some("" | "true" | "1") => Ok(Some(true)),
        Some("false" | "0") => Ok(Some(false)),
        Some(other) => Err(ProxyError::Config(format!(
            "Invalid value for '{name}': {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pact::{Modes, OperatingMode, RecordingMode};
    use tempfile::TempDir;

    fn controller(dir: &TempDir) -> Arc<ProxyController> {
        ProxyController::builder(Config::new("http://127.0.0.1:9", dir.path()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_is_control_path() {
        assert!(is_control_path("/control"));
        assert!(is_control_path("/control/current?id=x"));
        assert!(!is_control_path("/controller/items"));
        assert!(!is_control_path("/inventory/control"));
    }

    #[test]
    fn test_parse_query() {
        let params = parse_query("title=Inventory&title=creates%20a+device&clear");
        let titles: Vec<_> = values(&params, "title").collect();

        assert_eq!(titles, vec!["Inventory", "creates a device"]);
        assert_eq!(flag(&params, "clear").unwrap(), Some(true));
        assert_eq!(flag(&params, "recording").unwrap(), None);
    }

    #[tokio::test]
    async fn test_current_lifecycle() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);

        let none = handle(&controller, &HttpRequest::new("GET", "/control/current")).await;
        assert_eq!(none.status, 404);

        let set = handle(
            &controller,
            &HttpRequest::new("POST", "/control/current?title=suite&title=case&recording=true"),
        )
        .await;
        assert_eq!(set.status, 200);
        let body = set.json_body().unwrap();
        assert_eq!(body["id"], "suite__case");
        assert_eq!(body["modes"]["mode"], "record");
        assert_eq!(body["pendingWrite"], false);

        let get = handle(&controller, &HttpRequest::new("GET", "/control/current")).await;
        assert_eq!(get.json_body().unwrap()["id"], "suite__case");

        let delete = handle(&controller, &HttpRequest::new("DELETE", "/control/current")).await;
        assert_eq!(delete.status, 204);
        assert!(controller.current().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);

        let missing = handle(&controller, &HttpRequest::new("POST", "/control/current")).await;
        assert_eq!(missing.status, 400);

        let traversal = handle(&controller, &HttpRequest::new("POST", "/control/current?id=../x")).await;
        assert_eq!(traversal.status, 400);
        assert_eq!(traversal.json_body().unwrap()["error"], "InvalidPactId");

        let method = handle(&controller, &HttpRequest::new("PUT", "/control/current")).await;
        assert_eq!(method.status, 405);

        let unknown = handle(&controller, &HttpRequest::new("GET", "/control/other")).await;
        assert_eq!(unknown.status, 404);

        let apply = handle(&controller, &HttpRequest::new("POST", "/control/reset?mode=apply")).await;
        assert_eq!(apply.status, 400);
    }

    #[tokio::test]
    async fn test_reset_modes() {
        let dir = TempDir::new().unwrap();
        let controller = controller(&dir);
        let modes = Modes::new(OperatingMode::Mock, RecordingMode::Refresh);
        let query = format!(
            "{CONTROL_PREFIX}/reset?mode={}&recordingMode={}",
            modes.mode, modes.recording_mode
        );

        let response = handle(&controller, &HttpRequest::new("POST", &query)).await;

        assert_eq!(response.status, 200);
        assert_eq!(controller.modes().await, modes);
    }
}
