//! Calling a remote node from inside a world.
//!
//! A call captures the caller's weights and collections, ships them to the node,
//! and replays the response through the caller's own [`Context`]: `set` for each
//! returned weight value and `add`/`del` for each returned operation. The caller
//! thus sees the same effect as a local hypothetical followed by a commit.

use opal_engine::{ClientConfig, Collection, Context, Element, LocalFut, Weight};
use opal_types::wire::{EXECUTE_PATH, ExecuteRequest, ExecuteResponse, Tagged};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::RemoteError;

const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Something a remote call can carry and replay.
pub trait Binding {
    /// Capture this binding as seen from `ctx`'s world.
    fn encode(&self, ctx: &Context) -> Result<Tagged, RemoteError>;

    /// Validate a result without replaying it.
    fn check(&self, result: &Tagged) -> Result<(), RemoteError>;

    /// Replay the node's result for this binding into `ctx`'s world.
    fn apply<'a>(&'a self, ctx: &'a Context, result: Tagged) -> LocalFut<'a, Result<(), RemoteError>>;
}

impl<T> Binding for Weight<T>
where
    T: Serialize + DeserializeOwned + Clone + 'static,
{
    fn encode(&self, ctx: &Context) -> Result<Tagged, RemoteError> {
        match ctx.try_get(self, ctx.world()) {
            Some(Ok(value)) => Ok(Tagged::Weight(Some(serde_json::to_value(value)?))),
            Some(Err(_)) | None => Ok(Tagged::Weight(None)),
        }
    }

    fn check(&self, result: &Tagged) -> Result<(), RemoteError> {
        match result {
            Tagged::Weight(None) => Ok(()),
            Tagged::Weight(Some(value)) => {
                T::deserialize(value)?;
                Ok(())
            }
            other => Err(kind_mismatch("Weight", other)),
        }
    }

    fn apply<'a>(&'a self, ctx: &'a Context, result: Tagged) -> LocalFut<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            match result {
                Tagged::Weight(None) => Ok(()),
                Tagged::Weight(Some(value)) => {
                    let value: T = serde_json::from_value(value)?;
                    ctx.set(self, value).await?;
                    Ok(())
                }
                other => Err(kind_mismatch("Weight", &other)),
            }
        })
    }
}

impl<T> Binding for Collection<T>
where
    T: Element + Serialize + DeserializeOwned,
{
    fn encode(&self, ctx: &Context) -> Result<Tagged, RemoteError> {
        let values = ctx
            .view(self)?
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Tagged::Node(values))
    }

    fn check(&self, result: &Tagged) -> Result<(), RemoteError> {
        let Tagged::Collection(ops) = result else {
            return Err(kind_mismatch("Collection", result));
        };
        for tagged in ops {
            let (Tagged::Add(value) | Tagged::Delete(value)) = tagged else {
                return Err(kind_mismatch("Add or Delete", tagged));
            };
            T::deserialize(value)?;
        }
        Ok(())
    }

    fn apply<'a>(&'a self, ctx: &'a Context, result: Tagged) -> LocalFut<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            let Tagged::Collection(ops) = result else {
                return Err(kind_mismatch("Collection", &result));
            };
            for tagged in ops {
                let kind = tagged.kind();
                let op = tagged
                    .into_operation()
                    .ok_or_else(|| RemoteError::malformed(format!("expected Add or Delete result, got {kind}")))?
                    .try_map(serde_json::from_value)?;
                ctx.edit(self, op).await?;
            }
            Ok(())
        })
    }
}

fn kind_mismatch(expected: &str, got: &Tagged) -> RemoteError {
    RemoteError::malformed(format!("expected {expected} result, got {}", got.kind()))
}

/// A named procedure plus the bindings it reads and writes.
pub struct RemoteCall<'a> {
    procedure: String,
    bindings: Vec<(String, &'a dyn Binding)>,
}

impl<'a> RemoteCall<'a> {
    #[must_use]
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            bindings: Vec::new(),
        }
    }

    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, binding: &'a dyn Binding) -> Self {
        self.bindings.push((name.into(), binding));
        self
    }
}

#[derive(Debug, Clone)]
pub struct RemoteClient {
    base_url: String,
    http: reqwest::Client,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, config: &ClientConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(base_url, http))
    }

    #[must_use]
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run `call` on the node and replay its results into `ctx`'s world.
    ///
    /// Nothing is replayed unless the node answers 200 with a well-formed body.
    /// There is no retry.
    pub async fn execute(&self, ctx: &Context, call: RemoteCall<'_>) -> Result<(), RemoteError> {
        let params = call
            .bindings
            .iter()
            .map(|(name, binding)| Ok((name.clone(), binding.encode(ctx)?)))
            .collect::<Result<Vec<_>, RemoteError>>()?;
        let request = ExecuteRequest {
            code: call.procedure.clone(),
            params,
        };

        let url = format!("{}{EXECUTE_PATH}", self.base_url);
        tracing::debug!(procedure = %call.procedure, %url, "remote execute");
        let response = self.http.post(&url).json(&request).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let message = read_capped_error_body(response).await;
            tracing::debug!(procedure = %call.procedure, status = status.as_u16(), "remote execute rejected");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        let mut response: ExecuteResponse = serde_json::from_slice(&body)?;

        // Check every result before replaying any, so a bad payload changes nothing.
        let mut results = Vec::with_capacity(call.bindings.len());
        for (name, binding) in &call.bindings {
            let result = response.params.remove(name).ok_or_else(|| {
                RemoteError::malformed(format!("response is missing parameter {name:?}"))
            })?;
            binding.check(&result)?;
            results.push((*binding, result));
        }
        for (binding, result) in results {
            binding.apply(ctx, result).await?;
        }
        Ok(())
    }
}

/// One-shot call with a default client.
pub async fn execute_at(ctx: &Context, base_url: &str, call: RemoteCall<'_>) -> Result<(), RemoteError> {
    RemoteClient::new(base_url, &ClientConfig::default())?
        .execute(ctx, call)
        .await
}

async fn read_capped_error_body(response: reqwest::Response) -> String {
    match response.bytes().await {
        Ok(bytes) => {
            let end = bytes.len().min(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&bytes[..end]);
            if bytes.len() > MAX_ERROR_BODY_BYTES {
                format!("{text}...(truncated)")
            } else {
                text.into_owned()
            }
        }
        Err(err) => format!("<failed to read body: {err}>"),
    }
}
