use crate::engine::{ChunkStream, JobApi};
use crate::errors::JobError;
use crate::model::{ControllerConfig, JobDescriptor, RunRequest, StatusReply};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use reqwest::{Response, Url};
use std::time::Duration;

/// Lower bound on how long a `/status` query may take.
const MIN_STATUS_TIMEOUT: Duration = Duration::from_secs(2);

/// `JobApi` over the server's HTTP endpoints.
#[derive(Clone)]
pub struct HttpJobApi {
    http: reqwest::Client,
    base_url: Url,
    run_url: Url,
    stop_url: Url,
    status_url: Url,
    status_timeout: Duration,
}

impl HttpJobApi {
    pub fn new(cfg: &ControllerConfig) -> Result<Self> {
        let mut base_url = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base url: {}", cfg.base_url))?;
        // Endpoints resolve relative to the base, so keep any path prefix.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let endpoint = |name: &str| {
            base_url
                .join(name)
                .with_context(|| format!("cannot build /{name} url from {base_url}"))
        };
        let run_url = endpoint("run")?;
        let stop_url = endpoint("stop")?;
        let status_url = endpoint("status")?;

        // No overall timeout: `/run` streams for as long as the job lives.
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url,
            run_url,
            stop_url,
            status_url,
            status_timeout: (cfg.poll_interval * 5).max(MIN_STATUS_TIMEOUT),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

/// Turn a non-2xx reply into a protocol error carrying the body text.
async fn reject(endpoint: &'static str, resp: Response) -> JobError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    JobError::Protocol {
        endpoint,
        status,
        body: body.trim().to_string(),
    }
}

impl JobApi for HttpJobApi {
    fn run(&self, descriptor: &JobDescriptor) -> BoxFuture<'static, Result<ChunkStream, JobError>> {
        let req = self
            .http
            .post(self.run_url.clone())
            .json(&RunRequest {
                file: descriptor.as_str(),
            });
        async move {
            let resp = req.send().await?;
            if !resp.status().is_success() {
                return Err(reject("/run", resp).await);
            }
            let stream: ChunkStream = resp
                .bytes_stream()
                .map(|chunk| chunk.map_err(JobError::from))
                .boxed();
            Ok(stream)
        }
        .boxed()
    }

    fn stop(&self) -> BoxFuture<'static, Result<String, JobError>> {
        let req = self.http.post(self.stop_url.clone());
        async move {
            let resp = req.send().await?;
            if !resp.status().is_success() {
                return Err(reject("/stop", resp).await);
            }
            Ok(resp.text().await?)
        }
        .boxed()
    }

    fn status(&self) -> BoxFuture<'static, Result<StatusReply, JobError>> {
        let req = self
            .http
            .get(self.status_url.clone())
            .timeout(self.status_timeout);
        async move {
            let resp = req.send().await?;
            if !resp.status().is_success() {
                return Err(reject("/status", resp).await);
            }
            let body = resp.text().await?;
            serde_json::from_str::<StatusReply>(&body)
                .map_err(|e| JobError::MalformedStatus(e.to_string()))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_sit_under_the_base_url() {
        let api = HttpJobApi::new(&ControllerConfig::default()).unwrap();
        assert_eq!(api.run_url.as_str(), "http://127.0.0.1:5000/run");
        assert_eq!(api.stop_url.as_str(), "http://127.0.0.1:5000/stop");
        assert_eq!(api.status_url.path(), "/status");
    }

    #[test]
    fn base_url_path_prefix_is_kept() {
        for base in ["http://jobs.local/api", "http://jobs.local/api/"] {
            let cfg = ControllerConfig {
                base_url: base.into(),
                ..Default::default()
            };
            let api = HttpJobApi::new(&cfg).unwrap();
            assert_eq!(api.run_url.as_str(), "http://jobs.local/api/run");
            assert_eq!(api.status_url.as_str(), "http://jobs.local/api/status");
        }
    }

    #[test]
    fn status_timeout_follows_poll_interval() {
        let api = HttpJobApi::new(&ControllerConfig::default()).unwrap();
        assert_eq!(api.status_timeout, Duration::from_secs(5));
        let cfg = ControllerConfig {
            poll_interval: Duration::from_millis(100),
            ..Default::default()
        };
        let api = HttpJobApi::new(&cfg).unwrap();
        assert_eq!(api.status_timeout, MIN_STATUS_TIMEOUT);
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let cfg = ControllerConfig {
            base_url: "not a url".into(),
            ..Default::default()
        };
        assert!(HttpJobApi::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        // Port 9 (discard) on localhost is essentially never listening.
        let cfg = ControllerConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        };
        let api = HttpJobApi::new(&cfg).unwrap();
        let err = api.status().await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err:?}");
    }
}
