//! [`HttpPlanner`] – reqwest-backed [`Planner`] implementation.
//!
//! Endpoints:
//!
//! | Call | Request | Response |
//! |---|---|---|
//! | `POST /path` | `{"obstacles": [...], "mode": "..."}` | `{"data":{"commands":[...],"path":[...]}}` |
//! | `POST /image` | multipart `file` field | `{"image_id":"...","obstacle_id":"..."}` |
//! | `POST /stitch` | `{"images":[...]}` | composed image bytes |
//! | `GET /status` | – | 2xx when alive |

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use wayhub_types::{Command, ImageRecResult, Obstacle, Opcode, Plan, RobotPose};

use crate::{ApiError, Planner};

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// An async client for the planning service.
///
/// Construct once and share; the underlying connection pool is reused
/// across calls.
#[derive(Debug, Clone)]
pub struct HttpPlanner {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct PathRequest<'a> {
    obstacles: &'a [Obstacle],
    mode: &'a str,
}

#[derive(Deserialize)]
struct PathResponse {
    data: PathData,
}

#[derive(Deserialize)]
struct PathData {
    commands: Vec<String>,
    #[serde(default)]
    path: Vec<RobotPose>,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    image_id: String,
    #[serde(default)]
    obstacle_id: Option<String>,
}

#[derive(Serialize)]
struct StitchRequest<'a> {
    images: &'a [String],
}

impl HttpPlanner {
    /// Create a client pointing at `base_url`, e.g. `"http://192.168.2.11:5000"`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn request_path(&self, obstacles: &[Obstacle], mode: &str) -> Result<Plan, ApiError> {
        let response = self
            .client
            .post(self.url("path"))
            .json(&PathRequest { obstacles, mode })
            .send()
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status().as_u16()));
        }

        let body: PathResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;

        let mut commands = VecDeque::with_capacity(body.data.commands.len());
        for frame in &body.data.commands {
            let opcode = Opcode::decode(frame).map_err(|e| ApiError::Malformed(e.to_string()))?;
            commands.push_back(Command::planned(opcode));
        }
        debug!(
            commands = commands.len(),
            path_points = body.data.path.len(),
            "path received"
        );
        Ok(Plan {
            commands,
            path: body.data.path,
        })
    }

    async fn classify(
        &self,
        obstacle_id: u8,
        frame: Vec<u8>,
    ) -> Result<ImageRecResult, ApiError> {
        let filename = format!("{}_{obstacle_id}.jpg", chrono::Utc::now().timestamp());
        let part = reqwest::multipart::Part::bytes(frame)
            .file_name(filename)
            .mime_str("image/jpeg")
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("image"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status().as_u16()));
        }

        let body: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        Ok(ImageRecResult {
            image_id: body.image_id,
            obstacle_id: body
                .obstacle_id
                .unwrap_or_else(|| obstacle_id.to_string()),
        })
    }

    async fn request_stitch(&self, image_ids: &[String]) -> Result<Vec<u8>, ApiError> {
        let response = self
            .client
            .post(self.url("stitch"))
            .json(&StitchRequest { images: image_ids })
            .send()
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status().as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn check_alive(&self) -> bool {
        match self
            .client
            .get(self.url("status"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayhub_types::Direction;

    /// Nothing listens here; connection attempts fail fast.
    const DEAD_URL: &str = "http://127.0.0.1:9";

    #[test]
    fn path_request_serializes_wire_shape() {
        let obstacles = [Obstacle {
            id: 1,
            x: 5,
            y: 10,
            d: Direction::East,
        }];
        let json = serde_json::to_string(&PathRequest {
            obstacles: &obstacles,
            mode: "0",
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"obstacles":[{"id":1,"x":5,"y":10,"d":2}],"mode":"0"}"#
        );
    }

    #[test]
    fn path_response_decodes_with_and_without_path() {
        let body: PathResponse = serde_json::from_str(
            r#"{"data":{"commands":["RS00","FW10","SNAP1","FIN"],"path":[{"x":5,"y":20,"d":0}]}}"#,
        )
        .unwrap();
        assert_eq!(body.data.commands.len(), 4);
        assert_eq!(body.data.path, vec![RobotPose::new(5, 20, Direction::North)]);

        let body: PathResponse =
            serde_json::from_str(r#"{"data":{"commands":["FIN"]}}"#).unwrap();
        assert!(body.data.path.is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_maps_to_unavailable() {
        let planner = HttpPlanner::new(DEAD_URL);
        let result = planner.request_path(&[], "0").await;
        assert!(matches!(result, Err(ApiError::Unavailable(_))));
    }

    #[tokio::test]
    async fn unreachable_service_fails_probe() {
        let planner = HttpPlanner::new(DEAD_URL);
        assert!(!planner.check_alive().await);
    }

    #[tokio::test]
    async fn unreachable_service_fails_stitch() {
        let planner = HttpPlanner::new(DEAD_URL);
        let result = planner.request_stitch(&["36".to_string()]).await;
        assert!(matches!(result, Err(ApiError::Unavailable(_))));
    }

    #[test]
    fn base_url_trailing_slash_tolerated() {
        let planner = HttpPlanner::new("http://host:5000/");
        assert_eq!(planner.url("path"), "http://host:5000/path");
    }
}
