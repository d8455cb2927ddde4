//! JSON-over-HTTP clients for remote target and evaluator runners
//!
//! Both endpoints take the invocation as the request body and answer with
//! the output object. Failures answer with `{"code": .., "message": ..}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use super::{
    EvaluatorInvocation, EvaluatorInvoker, EvaluatorOutput, TargetInvocation, TargetInvoker,
    TargetOutput,
};
use crate::core::constants::COLLABORATOR_HTTP_TIMEOUT_SECS;
use crate::domain::error::{ServiceError, unwrap_rpc_error};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<i32>,
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
struct JsonEndpoint {
    client: Client,
    url: String,
}

impl JsonEndpoint {
    fn new(url: &str) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(COLLABORATOR_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ServiceError::InvalidConfig(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        body: &B,
    ) -> Result<R, ServiceError> {
        tracing::debug!(url = %self.url, "Calling collaborator");
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| ServiceError::Transient(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| ServiceError::Fatal(format!("malformed response: {}", e)));
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::Transient(format!("HTTP {}: {}", status, text)));
        }
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(unwrap_rpc_error(body.code, body.message)),
            Err(_) => Err(unwrap_rpc_error(None, format!("HTTP {}: {}", status, text))),
        }
    }
}

pub struct HttpTargetInvoker {
    endpoint: JsonEndpoint,
}

impl HttpTargetInvoker {
    pub fn new(url: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(url)?,
        })
    }
}

#[async_trait]
impl TargetInvoker for HttpTargetInvoker {
    async fn invoke(&self, request: &TargetInvocation) -> Result<TargetOutput, ServiceError> {
        self.endpoint.post(request).await
    }
}

pub struct HttpEvaluatorInvoker {
    endpoint: JsonEndpoint,
}

impl HttpEvaluatorInvoker {
    pub fn new(url: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(url)?,
        })
    }
}

#[async_trait]
impl EvaluatorInvoker for HttpEvaluatorInvoker {
    async fn evaluate(
        &self,
        request: &EvaluatorInvocation,
    ) -> Result<EvaluatorOutput, ServiceError> {
        self.endpoint.post(request).await
    }
}
