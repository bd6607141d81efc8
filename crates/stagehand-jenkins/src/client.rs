//! HTTP client for a Jenkins-compatible CI engine.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use stagehand_config::JenkinsConfig;
use stagehand_core::build::JobName;
use stagehand_core::ci::{BuildParameters, CiEngine, CiError, CiResult, LastBuild, QueueState};
use tracing::debug;
use url::Url;

/// Jenkins API client.
pub struct JenkinsClient {
    client: reqwest::Client,
    base_url: Url,
    user: Option<String>,
    token: Option<String>,
    intake_job: String,
}

impl JenkinsClient {
    pub fn from_config(config: &JenkinsConfig) -> CiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("stagehand")
            .build()
            .map_err(|e| CiError::Transport(e.to_string()))?;

        // Relative joins drop the last path segment unless the base ends in '/'.
        let mut base_url = config.url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            user: config.user.clone(),
            token: config.token.clone(),
            intake_job: config.intake_job.clone(),
        })
    }

    fn intake_path(&self, suffix: &str) -> String {
        format!("job/{}/{}", urlencoding::encode(&self.intake_job), suffix)
    }

    fn job_path(job: &JobName, suffix: &str) -> String {
        format!("job/{}/{}", urlencoding::encode(job.as_str()), suffix)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> CiResult<reqwest::RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| CiError::Transport(format!("invalid URL for {}: {}", path, e)))?;
        let builder = self.client.request(method, url);
        Ok(match &self.user {
            Some(user) => builder.basic_auth(user, self.token.as_deref()),
            None => builder,
        })
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> CiResult<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|e| CiError::Transport(e.to_string()))
    }

    /// GET a JSON document, failing on any non-success status.
    async fn get_json(&self, path: &str) -> CiResult<Value> {
        let response = self.send(self.request(reqwest::Method::GET, path)?).await?;
        let status = response.status();
        debug!(path = %path, status = %status, "CI engine response");

        if !status.is_success() {
            return Err(CiError::Http {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| CiError::Transport(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| CiError::Malformed {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

/// Deserialize `T` from a JSON document after checking that `fields` are present.
fn decode<T: DeserializeOwned>(value: Value, fields: &[&'static str], path: &str) -> CiResult<T> {
    for &field in fields {
        if value.get(field).is_none() {
            return Err(CiError::MissingField {
                field,
                path: path.to_string(),
            });
        }
    }
    serde_json::from_value(value).map_err(|e| CiError::Malformed {
        path: path.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl CiEngine for JenkinsClient {
    fn name(&self) -> &'static str {
        "jenkins"
    }

    async fn intake_queue(&self) -> CiResult<QueueState> {
        let path = self.intake_path("api/json");
        let value = self.get_json(&path).await?;
        decode(value, &["inQueue"], &path)
    }

    async fn intake_last_build(&self) -> CiResult<LastBuild> {
        let path = self.intake_path("lastBuild/api/json");
        let value = self.get_json(&path).await?;
        decode(value, &["inProgress"], &path)
    }

    async fn start_build(&self, job: &JobName, params: &BuildParameters) -> CiResult<()> {
        let path = Self::job_path(job, "buildWithParameters");
        let builder = self
            .request(reqwest::Method::POST, &path)?
            .form(params.as_pairs());
        let response = self.send(builder).await?;
        let status = response.status();
        debug!(job = %job, status = %status, "Start build response");

        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(CiError::JobNotFound(job.to_string()))
        } else {
            Err(CiError::Http {
                status: status.as_u16(),
                path,
            })
        }
    }

    async fn job_exists(&self, job: &JobName) -> CiResult<bool> {
        let path = Self::job_path(job, "api/json");
        let response = self.send(self.request(reqwest::Method::GET, &path)?).await?;
        let status = response.status();

        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(CiError::Http {
                status: status.as_u16(),
                path,
            })
        }
    }

    async fn delete_job(&self, job: &JobName) -> CiResult<()> {
        // The engine exposes job deletion under a nested `job/job/` prefix.
        let path = format!("job/{}", Self::job_path(job, "doDelete"));
        let response = self.send(self.request(reqwest::Method::POST, &path)?).await?;
        let status = response.status();
        debug!(job = %job, status = %status, "Delete job response");

        // Deletion answers with a redirect to the parent folder.
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(CiError::JobNotFound(job.to_string()))
        } else {
            Err(CiError::Http {
                status: status.as_u16(),
                path,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagehand_core::ci::BuildResult;
    use stagehand_core::{OwnerId, ProjectId};
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> JenkinsClient {
        let config = JenkinsConfig {
            url: Url::parse(&server.uri()).unwrap(),
            ..Default::default()
        };
        JenkinsClient::from_config(&config).unwrap()
    }

    fn job() -> JobName {
        JobName::new(ProjectId::new(5), OwnerId::new(8), "release")
    }

    #[tokio::test]
    async fn test_intake_queue_reads_in_queue() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/create_jobs/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "create_jobs",
                "inQueue": true
            })))
            .mount(&server)
            .await;

        let state = client_for(&server).intake_queue().await.unwrap();
        assert!(state.in_queue);
    }

    #[tokio::test]
    async fn test_intake_queue_missing_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/create_jobs/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "buildable": true })))
            .mount(&server)
            .await;

        let err = client_for(&server).intake_queue().await.unwrap_err();
        assert!(matches!(err, CiError::MissingField { field: "inQueue", .. }));
    }

    #[tokio::test]
    async fn test_intake_queue_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/create_jobs/api/json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).intake_queue().await.unwrap_err();
        assert!(matches!(err, CiError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/create_jobs/lastBuild/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).intake_last_build().await.unwrap_err();
        assert!(matches!(err, CiError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_last_build_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/create_jobs/lastBuild/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "inProgress": false,
                "result": "FAILURE",
                "number": 31
            })))
            .mount(&server)
            .await;

        let last = client_for(&server).intake_last_build().await.unwrap();
        assert!(!last.in_progress);
        assert_eq!(last.result, Some(BuildResult::Failure));
    }

    #[tokio::test]
    async fn test_start_build_posts_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/job/5_8_release/buildWithParameters"))
            .and(body_string_contains("TAG_NAME=release"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let params = BuildParameters::for_build(&stagehand_core::build::BuildRequest {
            id: stagehand_core::BuildId::new(1),
            project_id: ProjectId::new(5),
            owner_id: OwnerId::new(8),
            developer: "lee".to_string(),
            uploaded_at: chrono_now(),
            tag_name: "release".to_string(),
            tag_description: String::new(),
            file_name: "src.zip".to_string(),
            file_hash: "ff00".to_string(),
            status: stagehand_core::BuildStatus::Uploaded,
            send_notification: false,
            deleted: false,
            updated_at: chrono_now(),
        });
        client_for(&server)
            .start_build(&job(), &params)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_build_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/job/5_8_release/buildWithParameters"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .start_build(&job(), &BuildParameters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CiError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_job_exists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/job/5_8_release/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "5_8_release" })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.job_exists(&job()).await.unwrap());

        let missing = JobName::new(ProjectId::new(5), OwnerId::new(8), "gone");
        assert!(!client.job_exists(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_job_path_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/job/job/5_8_release/doDelete"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(302))
            .expect(1)
            .mount(&server)
            .await;

        let config = JenkinsConfig {
            url: Url::parse(&server.uri()).unwrap(),
            user: Some("ci".to_string()),
            token: Some("token".to_string()),
            ..Default::default()
        };
        let client = JenkinsClient::from_config(&config).unwrap();
        client.delete_job(&job()).await.unwrap();
    }

    #[tokio::test]
    async fn test_base_url_with_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jenkins/job/create_jobs/api/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "inQueue": false })))
            .mount(&server)
            .await;

        let config = JenkinsConfig {
            url: Url::parse(&format!("{}/jenkins", server.uri())).unwrap(),
            ..Default::default()
        };
        let client = JenkinsClient::from_config(&config).unwrap();
        assert!(!client.intake_queue().await.unwrap().in_queue);
    }

    fn chrono_now() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}
