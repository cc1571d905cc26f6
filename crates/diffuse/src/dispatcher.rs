//! # Dispatcher
//!
//! The caller side of diffusion. [`Dispatcher::run`] decides whether a call runs
//! here or on peers:
//!
//! - local when the load is below the threshold, when there are no endpoints,
//!   or when the current thread is already serving a diffused call;
//! - remote otherwise.
//!
//! Local method bodies run on the blocking pool, except inside a diffused call,
//! where the caller is already a worker thread.
//!
//! A remote call draws `redundancy` peers, makes sure each has a diffuser for
//! the signature, submits the call to all of them and then races them. The race
//! polls one peer at a time with a short timeout: a timeout sends the peer to
//! the back of the line, a failure drops it, and the first value wins. Losers
//! are abandoned, not cancelled.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use diffpack::Value;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::{self, Config};
use crate::context::Context;
use crate::error::{Error, PeerFailure, Result};
use crate::invoker::{LocalInvoker, in_diffused_call};
use crate::load::{LoadAverage, LoadEstimator};
use crate::remote::{ExecuteRequest, PeerConnector, RemoteDiffuser};
use crate::serializer::Serializer;
use crate::signature::Signature;
use crate::store::RequestId;
use crate::strategy::{Endpoint, EndpointStrategy};

/// A peer that accepted the call and may still produce its value.
struct Contender {
    peer: Endpoint,
    remote: Arc<dyn RemoteDiffuser>,
    request_id: RequestId,
}

pub struct Dispatcher {
    invoker: LocalInvoker,
    context: Arc<Context>,
    strategy: Arc<dyn EndpointStrategy>,
    connector: Arc<dyn PeerConnector>,
    estimator: Arc<dyn LoadEstimator>,
    load_threshold: f64,
    serializer: String,
    poll_timeout: Duration,
    setup_slots: Semaphore,
    created: DashSet<(Endpoint, Signature)>,
}

impl Dispatcher {
    /// A dispatcher using the strategy described by `config`.
    pub fn new(context: Arc<Context>, config: &Config, connector: Arc<dyn PeerConnector>) -> config::Result<Self> {
        config.validate()?;
        let strategy = config.build_strategy()?;
        Ok(Self::with_strategy(context, config, strategy, connector))
    }

    pub fn with_strategy(
        context: Arc<Context>,
        config: &Config,
        strategy: Arc<dyn EndpointStrategy>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        Self {
            invoker: LocalInvoker::new(context.clone()),
            context,
            strategy,
            connector,
            estimator: Arc::new(LoadAverage),
            load_threshold: config.load_threshold,
            serializer: config.serializer.clone(),
            poll_timeout: config.poll_timeout,
            setup_slots: Semaphore::new(config.max_redundancy.max(1)),
            created: DashSet::new(),
        }
    }

    /// Replaces the load estimator used by [`call`](Self::call).
    pub fn with_estimator(mut self, estimator: Arc<dyn LoadEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Runs a call, estimating the load itself.
    pub async fn call(
        &self,
        return_type: &str,
        target: &Value,
        method: &str,
        arg_types: &[String],
        args: &[Value],
    ) -> Result<Value> {
        let load = self.estimator.load();
        self.run(load, return_type, target, method, arg_types, args).await
    }

    /// Runs a call locally or on peers, depending on `load`.
    ///
    /// # Errors
    /// Locally, whatever the invocation fails with. Remotely,
    /// `EmptyEndpointSet`, a serialization failure, or `DispatchExhausted`
    /// listing what went wrong with each peer.
    pub async fn run(
        &self,
        load: f64,
        return_type: &str,
        target: &Value,
        method: &str,
        arg_types: &[String],
        args: &[Value],
    ) -> Result<Value> {
        let class_name = target.type_name().map_or_else(|| "null".to_string(), |t| t.into_owned());
        if arg_types.len() != args.len() {
            return Err(Error::ArgumentMismatch {
                signature: Signature::create(return_type, &class_name, method, arg_types),
                detail: format!("{} argument types declared, {} arguments given", arg_types.len(), args.len()),
            });
        }
        let signature = Signature::new(return_type, &class_name, method, arg_types)?;

        if in_diffused_call() {
            // already on a worker thread, and the marker is thread-local
            debug!(%signature, "already serving a diffused call, running inline");
            return self.invoker.invoke(
                target,
                signature.method_name(),
                signature.argument_types(),
                signature.return_type(),
                args,
            );
        }
        if load < self.load_threshold || self.strategy.is_empty() {
            debug!(%signature, load, "running locally");
            return self.run_locally(target, signature, args).await;
        }
        self.run_remotely(&signature, target, args).await
    }

    /// Runs the method body on the blocking pool.
    async fn run_locally(&self, target: &Value, signature: Signature, args: &[Value]) -> Result<Value> {
        let invoker = self.invoker.clone();
        let (target, args) = (target.clone(), args.to_vec());
        let sig = signature.clone();
        tokio::task::spawn_blocking(move || {
            invoker.invoke(&target, sig.method_name(), sig.argument_types(), sig.return_type(), &args)
        })
        .await
        .unwrap_or_else(|e| {
            Err(Error::Invocation { signature: signature.to_string(), message: format!("local call failed: {}", e) })
        })
    }

    async fn run_remotely(&self, signature: &Signature, target: &Value, args: &[Value]) -> Result<Value> {
        let peers = self.strategy.select()?;
        let serializer = self.context.serializer(&self.serializer)?;
        let request = ExecuteRequest {
            arg_types: signature.argument_types().to_vec(),
            return_type: signature.return_type().to_string(),
            args: args.iter().map(|a| serializer.serialize(a)).collect::<Result<_>>()?,
            target: serializer.serialize(target)?,
        };

        let launched = join_all(peers.iter().map(|peer| self.launch(peer, signature, request.clone()))).await;

        let mut contenders = VecDeque::with_capacity(peers.len());
        let mut failures = Vec::new();
        for (peer, outcome) in peers.iter().zip(launched) {
            match outcome {
                Ok(contender) => contenders.push_back(contender),
                Err(e) => {
                    warn!(%signature, %peer, error = %e, "peer failed to accept call");
                    failures.push(PeerFailure::new(peer.address(), &e));
                }
            }
        }

        self.race(signature, serializer.as_ref(), contenders, failures).await
    }

    /// Connects to a peer, ensures its diffuser exists and submits the call.
    async fn launch(&self, peer: &Endpoint, signature: &Signature, request: ExecuteRequest) -> Result<Contender> {
        let _slot = self.setup_slots.acquire().await.map_err(|_| Error::Transport {
            peer: peer.to_string(),
            error: crate::transport::TransportError::ConnectionLost("dispatcher shut down".into()),
        })?;
        let remote = self.connector.connect(peer)?;
        self.ensure_created(peer, remote.as_ref(), signature).await?;

        let request_id = match remote.execute(signature, request.clone()).await {
            // the peer lost its diffuser since we created it; recreate once
            Err(e) if e.kind() == diffrpc::FailureKind::DiffuserNotFound => {
                debug!(%signature, %peer, "diffuser vanished, recreating");
                self.created.remove(&(peer.clone(), signature.clone()));
                self.ensure_created(peer, remote.as_ref(), signature).await?;
                remote.execute(signature, request).await?
            }
            other => other?,
        };
        Ok(Contender { peer: peer.clone(), remote, request_id })
    }

    async fn ensure_created(&self, peer: &Endpoint, remote: &dyn RemoteDiffuser, signature: &Signature) -> Result<()> {
        let key = (peer.clone(), signature.clone());
        if self.created.contains(&key) {
            return Ok(());
        }
        remote.create(signature, self.strategy.endpoints(), &self.serializer).await?;
        self.created.insert(key);
        Ok(())
    }

    async fn race(
        &self,
        signature: &Signature,
        serializer: &dyn Serializer,
        mut contenders: VecDeque<Contender>,
        mut failures: Vec<PeerFailure>,
    ) -> Result<Value> {
        while let Some(contender) = contenders.pop_front() {
            let poll = contender.remote.result(signature, &contender.request_id);
            let error = match tokio::time::timeout(self.poll_timeout, poll).await {
                Err(_) => {
                    contenders.push_back(contender);
                    continue;
                }
                Ok(Ok(bytes)) => match serializer.deserialize(&bytes, signature.return_type()) {
                    Ok(value) => {
                        debug!(%signature, peer = %contender.peer, "peer won the race");
                        return Ok(value);
                    }
                    Err(e) => e,
                },
                Ok(Err(e)) => e,
            };
            warn!(%signature, peer = %contender.peer, error = %error, "dropping peer from race");
            failures.push(PeerFailure::new(contender.peer.address(), &error));
        }
        Err(Error::DispatchExhausted { signature: signature.to_string(), failures })
    }
}
