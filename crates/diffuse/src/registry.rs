//! # Diffuser registry
//!
//! The peer side of diffusion. A diffuser is registered per signature; each
//! `execute` deserializes the call, hands it to a bounded worker pool, and
//! returns a request id straight away. The outcome lands in the result store
//! under `signature/request_id` until a caller collects it or it is evicted.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use diffpack::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handle::ResultHandle;
use crate::invoker::LocalInvoker;
use crate::remote::{ExecuteRequest, RemoteDiffuser, ResultStatus};
use crate::signature::{Signature, decode_array_type};
use crate::store::{RequestId, ResultStore};
use crate::strategy::EndpointSet;

/// What a peer remembers about one diffused method.
#[derive(Debug, Clone)]
pub struct DiffuserEntry {
    pub signature: Signature,
    pub endpoints: EndpointSet,
    /// Canonical name of the serializer for this diffuser's values.
    pub serializer: String,
}

pub struct DiffuserRegistry {
    context: Arc<Context>,
    invoker: LocalInvoker,
    diffusers: DashMap<Signature, DiffuserEntry>,
    results: ResultStore,
    workers: Arc<Semaphore>,
}

impl DiffuserRegistry {
    pub fn new(context: Arc<Context>, config: &Config) -> Self {
        Self {
            invoker: LocalInvoker::new(context.clone()),
            context,
            diffusers: DashMap::new(),
            results: ResultStore::new(config.result_capacity, config.eviction),
            workers: Arc::new(Semaphore::new(config.max_workers)),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    /// Creates the diffuser for `signature`, replacing any existing one.
    pub fn create(&self, signature: Signature, endpoints: EndpointSet, serializer: &str) -> Result<Signature> {
        let serializer = self
            .context
            .serializers()
            .canonical_name(serializer)
            .ok_or_else(|| Error::serialization(serializer, "no such serializer"))?;
        let entry = DiffuserEntry { signature: signature.clone(), endpoints, serializer };
        if self.diffusers.insert(signature.clone(), entry).is_some() {
            debug!(%signature, "replaced diffuser");
        } else {
            info!(%signature, "created diffuser");
        }
        Ok(signature)
    }

    pub fn get(&self, signature: &Signature) -> Result<DiffuserEntry> {
        self.diffusers
            .get(signature)
            .map(|e| e.clone())
            .ok_or_else(|| Error::DiffuserNotFound { signature: signature.to_string() })
    }

    pub fn delete(&self, signature: &Signature) -> Result<()> {
        match self.diffusers.remove(signature) {
            Some(_) => {
                info!(%signature, "deleted diffuser");
                Ok(())
            }
            None => Err(Error::DiffuserNotFound { signature: signature.to_string() }),
        }
    }

    /// Validates and submits one invocation.
    ///
    /// # Errors
    /// `DiffuserNotFound` if no diffuser exists, `ArgumentMismatch` or
    /// `ReturnTypeMismatch` if the declared types differ from the signature,
    /// `Serialization` if a blob does not decode, and `ClassResolution` if the
    /// values mention a class that cannot be found.
    pub async fn execute(&self, signature: &Signature, request: ExecuteRequest) -> Result<RequestId> {
        let entry = self.get(signature)?;

        if request.arg_types.len() != request.args.len() {
            return Err(Error::ArgumentMismatch {
                signature: signature.to_string(),
                detail: format!("{} argument types, {} arguments", request.arg_types.len(), request.args.len()),
            });
        }
        let arg_types: Vec<String> = request.arg_types.iter().map(|t| decode_array_type(t)).collect();
        if arg_types != signature.argument_types() {
            return Err(Error::ArgumentMismatch {
                signature: signature.to_string(),
                detail: format!("declared ({}) but diffuser takes ({})", arg_types.join(","), signature.argument_types().join(",")),
            });
        }
        let return_type = decode_array_type(&request.return_type);
        if return_type != signature.return_type() {
            return Err(Error::ReturnTypeMismatch {
                signature: signature.to_string(),
                expected: signature.return_type().to_string(),
                found: return_type,
            });
        }

        let serializer = self.context.serializer(&entry.serializer)?;
        let target = serializer.deserialize(&request.target, signature.class_name())?;
        let args = request
            .args
            .iter()
            .zip(&arg_types)
            .map(|(bytes, ty)| serializer.deserialize(bytes, ty))
            .collect::<Result<Vec<Value>>>()?;

        self.context.resolve_value(&target).await?;
        for arg in &args {
            self.context.resolve_value(arg).await?;
        }

        let request_id = RequestId::generate();
        let handle = ResultHandle::new(serializer.name());
        self.results.add(signature.result_key(&request_id), handle.clone());
        debug!(%signature, %request_id, "accepted execution");

        self.spawn_worker(signature.clone(), handle, target, args);
        Ok(request_id)
    }

    fn spawn_worker(&self, signature: Signature, handle: ResultHandle, target: Value, args: Vec<Value>) {
        let workers = self.workers.clone();
        let invoker = self.invoker.clone();
        tokio::spawn(async move {
            let failed = |message: String| Error::Invocation { signature: signature.to_string(), message };
            let Ok(_permit) = workers.acquire_owned().await else {
                handle.resolve(Err(failed("worker pool closed".into())));
                return;
            };
            let sig = signature.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                invoker.invoke_diffused(&target, sig.method_name(), sig.argument_types(), sig.return_type(), &args)
            })
            .await
            .unwrap_or_else(|e| Err(failed(format!("worker failed: {}", e))));

            if let Err(e) = &outcome {
                debug!(%signature, error = %e, "execution failed");
            }
            handle.resolve(outcome);
        });
    }

    /// `Ready` once the outcome is in, `Pending` otherwise, including for keys
    /// this peer has never seen.
    pub fn get_result_status(&self, signature: &Signature, request_id: &RequestId) -> ResultStatus {
        match self.results.get(&signature.result_key(request_id)) {
            Some(handle) if handle.is_resolved() => ResultStatus::Ready,
            _ => ResultStatus::Pending,
        }
    }

    /// Waits for the outcome and serializes it.
    ///
    /// # Errors
    /// `ResultLost` if the key was evicted or never existed; otherwise whatever
    /// the invocation failed with.
    pub async fn get_result(&self, signature: &Signature, request_id: &RequestId) -> Result<Vec<u8>> {
        let handle = self.results.get(&signature.result_key(request_id)).ok_or_else(|| Error::ResultLost {
            signature: signature.to_string(),
            request_id: request_id.to_string(),
        })?;
        let value = handle.wait().await?;
        self.context.serializer(handle.serializer())?.serialize(&value)
    }
}

#[async_trait]
impl RemoteDiffuser for DiffuserRegistry {
    async fn create(&self, signature: &Signature, endpoints: &EndpointSet, serializer: &str) -> Result<Signature> {
        DiffuserRegistry::create(self, signature.clone(), endpoints.clone(), serializer)
    }

    async fn execute(&self, signature: &Signature, request: ExecuteRequest) -> Result<RequestId> {
        DiffuserRegistry::execute(self, signature, request).await
    }

    async fn status(&self, signature: &Signature, request_id: &RequestId) -> Result<ResultStatus> {
        Ok(self.get_result_status(signature, request_id))
    }

    async fn result(&self, signature: &Signature, request_id: &RequestId) -> Result<Vec<u8>> {
        self.get_result(signature, request_id).await
    }

    async fn delete(&self, signature: &Signature) -> Result<()> {
        DiffuserRegistry::delete(self, signature)
    }
}
