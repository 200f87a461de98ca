use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use url::Url;

use crate::{
    config::SyncConfig,
    dto::{
        progress::{ProgressPayload, RawProgressSnapshot, RawTopicProgress, WriteReceipt},
        quiz::{QuizSubmitPayload, QuizSubmitResult},
    },
};

use super::{CredentialStore, ProgressApi, TransportError, TransportResult};

const PROGRESS_PATH: &str = "progress";
const QUIZ_SUBMIT_PATH: [&str; 2] = ["quiz", "submit"];
/// Application codes meaning success inside the `{code, message, data}` envelope.
const SUCCESS_CODES: [i64; 2] = [0, 20_000];

/// [`ProgressApi`] speaking JSON over HTTP to the learning service.
#[derive(Clone)]
pub struct HttpProgressApi {
    client: Client,
    base_url: Arc<str>,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpProgressApi {
    /// Build the client with the configured per-request timeout.
    pub fn new(config: &SyncConfig, credentials: Arc<dyn CredentialStore>) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| TransportError::ClientBuilder { source })?;

        let base_url = config.api_base_url.trim_end_matches('/');
        Url::parse(base_url).map_err(|source| TransportError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url),
            credentials,
        })
    }

    fn url(&self, segments: &[&str]) -> TransportResult<Url> {
        let invalid = |source| TransportError::InvalidUrl {
            url: self.base_url.to_string(),
            source,
        };
        let mut url = Url::parse(&self.base_url).map_err(invalid)?;
        url.path_segments_mut()
            .map_err(|()| invalid(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn call<B, T>(self, method: Method, segments: Vec<String>, body: Option<B>) -> TransportResult<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let path = format!("/{}", segments.join("/"));
        let url = self.url(&segments)?;

        let mut builder = self.client.request(method, url);
        if let Some(token) = self.credentials.access_token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|source| TransportError::RequestSend {
                path: path.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::RequestStatus { path, status });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| TransportError::DecodeResponse {
                path: path.clone(),
                source,
            })?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|source| TransportError::DeserializeValue {
                path: path.clone(),
                source,
            })?
        };

        let payload = unwrap_envelope(&path, body)?;
        serde_json::from_value(payload)
            .map_err(|source| TransportError::DeserializeValue { path, source })
    }
}

/// Strip the `{code, message, data}` envelope, turning non-success codes into rejections.
///
/// Bodies without an envelope are returned whole; a missing body becomes an empty object.
fn unwrap_envelope(path: &str, body: Value) -> TransportResult<Value> {
    if let Some(code) = body.get("code").and_then(Value::as_i64) {
        if !SUCCESS_CODES.contains(&code) {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or("request failed")
                .to_string();
            return Err(TransportError::Rejected {
                path: path.to_string(),
                code,
                message,
            });
        }
    }

    let payload = match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) if !data.is_null() => data,
            Some(data) => {
                map.insert("data".into(), data);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    Ok(payload)
}

impl ProgressApi for HttpProgressApi {
    fn fetch_overview(&self) -> BoxFuture<'static, TransportResult<RawProgressSnapshot>> {
        let api = self.clone();
        Box::pin(api.call(Method::GET, vec![PROGRESS_PATH.into()], None::<()>))
    }

    fn fetch_topic(&self, topic: &str) -> BoxFuture<'static, TransportResult<RawTopicProgress>> {
        let api = self.clone();
        let segments = vec![PROGRESS_PATH.into(), topic.to_string()];
        Box::pin(api.call(Method::GET, segments, None::<()>))
    }

    fn post_progress(
        &self,
        payload: ProgressPayload,
    ) -> BoxFuture<'static, TransportResult<WriteReceipt>> {
        let api = self.clone();
        Box::pin(api.call(Method::POST, vec![PROGRESS_PATH.into()], Some(payload)))
    }

    fn submit_quiz(
        &self,
        payload: QuizSubmitPayload,
    ) -> BoxFuture<'static, TransportResult<QuizSubmitResult>> {
        let api = self.clone();
        let segments = QUIZ_SUBMIT_PATH.iter().map(|s| s.to_string()).collect();
        Box::pin(api.call(Method::POST, segments, Some(payload)))
    }

    fn progress_endpoint(&self) -> String {
        format!("{}/{PROGRESS_PATH}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transport::StaticCredentials;

    fn api(base: &str) -> HttpProgressApi {
        let config = SyncConfig::default().with_api_base(base);
        HttpProgressApi::new(&config, Arc::new(StaticCredentials::default())).unwrap()
    }

    #[test]
    fn envelope_data_is_unwrapped() {
        let body = json!({"code": 20000, "message": "ok", "data": {"status": "saved"}});
        assert_eq!(
            unwrap_envelope("/progress", body).unwrap(),
            json!({"status": "saved"})
        );

        let body = json!({"code": 0, "data": [1, 2]});
        assert_eq!(unwrap_envelope("/progress", body).unwrap(), json!([1, 2]));
    }

    #[test]
    fn bare_bodies_pass_through() {
        let body = json!({"overall": {"progress": 10}});
        assert_eq!(unwrap_envelope("/progress", body.clone()).unwrap(), body);
        assert_eq!(unwrap_envelope("/progress", Value::Null).unwrap(), json!({}));
    }

    #[test]
    fn unexpected_code_is_a_rejection() {
        let body = json!({"code": 40001, "message": "chapter not found", "data": null});
        match unwrap_envelope("/progress", body).unwrap_err() {
            TransportError::Rejected { code, message, .. } => {
                assert_eq!(code, 40001);
                assert_eq!(message, "chapter not found");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn topic_segment_is_escaped() {
        let api = api("http://localhost:8080");
        let url = api.url(&["progress", "control flow/loops"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/v1/progress/control%20flow%2Floops"
        );
        assert_eq!(api.progress_endpoint(), "http://localhost:8080/api/v1/progress");
    }

    #[test]
    fn invalid_base_is_rejected() {
        let config = SyncConfig::default().with_api_base("not a url");
        let result = HttpProgressApi::new(&config, Arc::new(StaticCredentials::default()));
        assert!(matches!(result, Err(TransportError::InvalidUrl { .. })));
    }
}
