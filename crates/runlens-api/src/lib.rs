#![forbid(unsafe_code)]

use serde_json::{json, Value};

pub mod dto;
pub mod errors;
pub mod params;

pub use dto::{
    BuildEvent, ReportUrlResponse, SessionResponse, ViewerFailure, ViewerResponse,
    ViewerStateName,
};
pub use errors::{ApiError, ApiErrorCode};
pub use params::{ArtifactFormat, ReportStrategy};

pub const CRATE_NAME: &str = "runlens-api";

/// Machine-readable summary of the HTTP surface, served at `/v1/openapi.json`.
#[must_use]
pub fn openapi_v1_spec() -> Value {
    let error = json!({"application/json": {"schema": {"$ref": "#/components/schemas/ApiError"}}});
    let repo_params = json!([
        {"name": "owner", "in": "query", "required": true, "schema": {"type": "string"}},
        {"name": "repo", "in": "query", "required": true, "schema": {"type": "string"}}
    ]);
    json!({
      "openapi": "3.0.3",
      "info": {"title": "runlens API", "version": "v1"},
      "paths": {
        "/healthz": {"get": {"responses": {"200": {"description": "ok"}}}},
        "/readyz": {"get": {"responses": {"200": {"description": "ready"}, "503": {"description": "not ready"}}}},
        "/artifacts/{artifactId}": {
          "get": {
            "parameters": repo_params,
            "responses": {
              "200": {"description": "report url or raw zip archive"},
              "400": {"description": "missing owner/repo", "content": error},
              "401": {"description": "no valid credential", "content": error},
              "413": {"description": "artifact exceeds size ceiling", "content": error},
              "500": {"description": "processing failed", "content": error}
            }
          }
        },
        "/reports/{artifactId}/viewers": {
          "post": {
            "parameters": repo_params,
            "responses": {
              "201": {"description": "viewer created"},
              "401": {"description": "no valid credential", "content": error}
            }
          }
        },
        "/api/builds/events": {
          "get": {
            "parameters": repo_params,
            "responses": {
              "200": {"description": "text/event-stream of connected and workflow_run events"},
              "401": {"description": "no valid credential", "content": error}
            }
          }
        }
      },
      "components": {
        "schemas": {
          "ApiError": {
            "type": "object",
            "required": ["error", "code", "details", "request_id"],
            "properties": {
              "error": {"type": "string"},
              "code": {"type": "string"},
              "details": {"type": "object"},
              "request_id": {"type": "string"}
            }
          }
        }
      }
    })
}
