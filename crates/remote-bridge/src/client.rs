use crate::error::BridgeError;
use broker_core::{LogsView, RemoteStatusResponse, RemoteSubmitRequest, RemoteSubmitResponse};
use std::time::Duration;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Thin HTTP forwards to the Remote Server (spec.md §4.3). The base
/// URL is a loopback address an externally maintained SSH tunnel maps
/// to the remote host; this crate never touches the tunnel itself.
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteClient {
    pub fn new(base_url: String) -> Self {
        RemoteClient {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn submit(&self, req: &RemoteSubmitRequest) -> Result<RemoteSubmitResponse, BridgeError> {
        let url = format!("{}/api/submit", self.base_url);
        let resp = self
            .http
            .post(url)
            .json(req)
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await
            .map_err(|e| BridgeError::RemoteUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BridgeError::RemoteError(format!(
                "remote submit returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| BridgeError::RemoteError(e.to_string()))
    }

    pub async fn status(&self, slurm_job_id: &str) -> Result<RemoteStatusResponse, BridgeError> {
        let url = format!("{}/api/status/{}", self.base_url, slurm_job_id);
        let resp = self
            .http
            .get(url)
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| BridgeError::RemoteUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BridgeError::RemoteError(format!(
                "remote status returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| BridgeError::RemoteError(e.to_string()))
    }

    pub async fn cancel(&self, slurm_job_id: &str) -> Result<(), BridgeError> {
        let url = format!("{}/api/cancel/{}", self.base_url, slurm_job_id);
        let resp = self
            .http
            .post(url)
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| BridgeError::RemoteUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BridgeError::RemoteError(format!(
                "remote cancel returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    pub async fn logs(&self, task_id: &str, username: &str) -> Result<LogsView, BridgeError> {
        let url = format!("{}/api/logs/{}?username={}", self.base_url, task_id, username);
        let resp = self
            .http
            .get(url)
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| BridgeError::RemoteUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BridgeError::RemoteError(format!(
                "remote logs returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| BridgeError::RemoteError(e.to_string()))
    }

    /// Stream the fetch response body into `dest_path`.
    pub async fn fetch(
        &self,
        task_id: &str,
        username: &str,
        workdir: &str,
        paths: &[String],
        dest_path: &std::path::Path,
    ) -> Result<(), BridgeError> {
        let paths_json = serde_json::to_string(paths).unwrap_or_else(|_| "[]".to_string());
        let url = format!(
            "{}/api/fetch/{}?username={}&workdir={}&paths={}",
            self.base_url,
            task_id,
            username,
            workdir,
            urlencode(&paths_json)
        );
        let mut resp = self
            .http
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| BridgeError::RemoteUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BridgeError::RemoteError(format!(
                "remote fetch returned {}",
                resp.status()
            )));
        }
        let mut file = tokio::fs::File::create(dest_path).await?;
        use tokio::io::AsyncWriteExt;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| BridgeError::RemoteError(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        Ok(())
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
