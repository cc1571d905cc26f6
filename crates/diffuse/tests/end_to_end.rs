//! End-to-end diffusion through loopback peers.
//!
//! Every peer here is a real registry behind a `DiffuserService`, reached
//! through a `DiffuserClient` over the loopback transport, so frames are fully
//! encoded and decoded on each hop.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use diffrpc::{FailureKind, ReplyFrame};
use diffuse::class::Class;
use diffuse::client::DiffuserClient;
use diffuse::config::Config;
use diffuse::context::Context;
use diffuse::dispatcher::Dispatcher;
use diffuse::error::{Error, Result};
use diffuse::load::FixedLoad;
use diffuse::loopback::LoopbackTransport;
use diffuse::registry::DiffuserRegistry;
use diffuse::remote::{ExecuteRequest, PeerConnector, PeerTable, RemoteDiffuser, ResultStatus};
use diffuse::serializer::{PACK, Serializer};
use diffuse::service::DiffuserService;
use diffuse::signature::Signature;
use diffuse::store::RequestId;
use diffuse::strategy::{Endpoint, EndpointSet, EndpointStrategy};
use diffuse::{Object, Value};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn bean_class() -> Class {
    Class::builder("Bean")
        .method("getA", &[], |this, _| Ok(this.field("a").cloned().unwrap_or(Value::Null)))
        .build()
}

fn calc_class() -> Class {
    Class::builder("demo.Calc")
        .method("answer", &[], |_, _| Ok(Value::Int(42)))
        .method("add", &["int", "int"], |_, args| {
            let (a, b) = (args[0].as_i32().unwrap_or(0), args[1].as_i32().unwrap_or(0));
            Ok(Value::Int(a + b))
        })
        .method("describe", &["java.lang.Object"], |_, args| {
            let name = args[0].type_name().map(|t| t.into_owned()).unwrap_or_default();
            Ok(Value::from(format!("a {}", name)))
        })
        .build()
}

fn bean(a: &str) -> Value {
    Value::Object(Object::new("Bean").with("a", a))
}

fn calc() -> Value {
    Value::Object(Object::new("demo.Calc"))
}

struct Peer {
    registry: Arc<DiffuserRegistry>,
    service: Arc<DiffuserService>,
    client: Arc<DiffuserClient>,
}

fn peer_with(name: &str, context: Arc<Context>, config: &Config) -> Peer {
    let registry = Arc::new(DiffuserRegistry::new(context, config));
    let service = Arc::new(DiffuserService::new(registry.clone()));
    let client = Arc::new(DiffuserClient::new(name, Arc::new(LoopbackTransport::new(service.clone()))));
    Peer { registry, service, client }
}

fn peer(name: &str) -> Peer {
    let context = Context::builder().class(bean_class()).class(calc_class()).build().unwrap();
    peer_with(name, context, &Config::default())
}

/// Always draws the same peers, in order.
struct Scripted {
    endpoints: EndpointSet,
    draw: Vec<Endpoint>,
}

impl Scripted {
    fn new(draw: &[&str]) -> Arc<Self> {
        let endpoints = draw.iter().fold(EndpointSet::new(), |set, e| set.with(*e));
        Arc::new(Self { endpoints, draw: draw.iter().map(|e| Endpoint::new(*e)).collect() })
    }
}

impl EndpointStrategy for Scripted {
    fn select(&self) -> Result<Vec<Endpoint>> {
        Ok(self.draw.clone())
    }

    fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }
}

/// Accepts everything and never produces a result.
#[derive(Default)]
struct SilentPeer {
    polls: AtomicUsize,
}

#[async_trait]
impl RemoteDiffuser for SilentPeer {
    async fn create(&self, signature: &Signature, _: &EndpointSet, _: &str) -> Result<Signature> {
        Ok(signature.clone())
    }

    async fn execute(&self, _: &Signature, _: ExecuteRequest) -> Result<RequestId> {
        Ok(RequestId::from("never"))
    }

    async fn status(&self, _: &Signature, _: &RequestId) -> Result<ResultStatus> {
        Ok(ResultStatus::Pending)
    }

    async fn result(&self, _: &Signature, _: &RequestId) -> Result<Vec<u8>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn delete(&self, _: &Signature) -> Result<()> {
        Ok(())
    }
}

struct CountingConnector {
    inner: PeerTable,
    connects: AtomicUsize,
}

impl PeerConnector for CountingConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteDiffuser>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(endpoint)
    }
}

fn remote_config() -> Config {
    Config::builder()
        .load_threshold(0.5)
        .poll_timeout(Duration::from_millis(250))
        .build()
        .unwrap()
}

// --- Dispatch ---

#[tokio::test]
async fn test_bean_getter_over_loopback() -> anyhow::Result<()> {
    init_tracing();
    let peer = peer("peer-a");
    let peers = PeerTable::new();
    peers.insert("peer-a", peer.client.clone());

    let config = Config::builder()
        .load_threshold(0.5)
        .endpoints(EndpointSet::new().with("peer-a"))
        .seed(1)
        .build()?;
    let dispatcher = Dispatcher::new(Context::new(), &config, Arc::new(peers))?;

    let value = dispatcher.run(1.0, "java.lang.String", &bean("x"), "getA", &[], &[]).await?;
    assert_eq!(value, Value::from("x"));

    let sig = Signature::parse("Bean:getA()-java.lang.String")?;
    assert_eq!(peer.registry.get(&sig)?.serializer, PACK);
    Ok(())
}

#[tokio::test]
async fn test_low_load_never_touches_peers() -> anyhow::Result<()> {
    let connector = Arc::new(CountingConnector { inner: PeerTable::new(), connects: AtomicUsize::new(0) });
    let context = Context::builder().class(bean_class()).build()?;
    let config = Config::builder().endpoints(EndpointSet::new().with("peer-a")).build()?;
    let dispatcher = Dispatcher::new(context, &config, connector.clone())?.with_estimator(Arc::new(FixedLoad(0.1)));

    let value = dispatcher.call("java.lang.String", &bean("local"), "getA", &[], &[]).await?;
    assert_eq!(value, Value::from("local"));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_no_endpoints_runs_locally_under_load() -> anyhow::Result<()> {
    let context = Context::builder().class(calc_class()).build()?;
    let dispatcher = Dispatcher::new(context, &Config::default(), Arc::new(PeerTable::new()))?;
    let value = dispatcher.run(99.0, "int", &calc(), "answer", &[], &[]).await?;
    assert_eq!(value, Value::Int(42));
    Ok(())
}

#[tokio::test]
async fn test_local_calls_leave_the_executor_thread() -> anyhow::Result<()> {
    let ran_on = Arc::new(std::sync::Mutex::new(None));
    let seen = ran_on.clone();
    let whereabouts = Class::builder("demo.Where")
        .method("here", &[], move |_, _| {
            *seen.lock().unwrap() = Some(std::thread::current().id());
            Ok(Value::Null)
        })
        .build();
    let context = Context::builder().class(whereabouts).build()?;
    let dispatcher = Dispatcher::new(context, &Config::default(), Arc::new(PeerTable::new()))?;

    dispatcher.run(0.0, "void", &Value::Object(Object::new("demo.Where")), "here", &[], &[]).await?;
    let ran_on = ran_on.lock().unwrap().expect("method ran");
    assert_ne!(ran_on, std::thread::current().id());
    Ok(())
}

#[tokio::test]
async fn test_argument_count_checked_before_anything() -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(Context::new(), &Config::default(), Arc::new(PeerTable::new()))?;
    let err = dispatcher.run(99.0, "int", &calc(), "add", &["int".to_string()], &[]).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::ArgumentMismatch);
    Ok(())
}

#[tokio::test]
async fn test_race_moves_past_a_silent_peer() -> anyhow::Result<()> {
    init_tracing();
    let silent = Arc::new(SilentPeer::default());
    let live = peer("live");
    let peers = PeerTable::new();
    peers.insert("silent", silent.clone());
    peers.insert("live", live.client.clone());

    let dispatcher = Dispatcher::with_strategy(Context::new(), &remote_config(), Scripted::new(&["silent", "live"]), Arc::new(peers));
    let value = dispatcher.run(1.0, "int", &calc(), "answer", &[], &[]).await?;

    assert_eq!(value, Value::Int(42));
    assert_eq!(silent.polls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_invocation_drops_the_peer() -> anyhow::Result<()> {
    let broken_calc = Class::builder("demo.Calc")
        .method("answer", &[], |_, _| anyhow::bail!("out of answers"))
        .build();
    let broken = peer_with("broken", Context::builder().class(broken_calc).build()?, &Config::default());
    let live = peer("live");
    let peers = PeerTable::new();
    peers.insert("broken", broken.client.clone());
    peers.insert("live", live.client.clone());

    let dispatcher = Dispatcher::with_strategy(Context::new(), &remote_config(), Scripted::new(&["broken", "live"]), Arc::new(peers));
    let value = dispatcher.run(1.0, "int", &calc(), "answer", &[], &[]).await?;
    assert_eq!(value, Value::Int(42));
    Ok(())
}

#[tokio::test]
async fn test_unreachable_peer_is_skipped() -> anyhow::Result<()> {
    let live = peer("live");
    let peers = PeerTable::new();
    peers.insert("live", live.client.clone());

    let dispatcher = Dispatcher::with_strategy(Context::new(), &remote_config(), Scripted::new(&["ghost", "live"]), Arc::new(peers));
    let value = dispatcher.run(1.0, "int", &calc(), "add", &["int".into(), "int".into()], &[Value::Int(2), Value::Int(3)]).await?;
    assert_eq!(value, Value::Int(5));
    Ok(())
}

#[tokio::test]
async fn test_all_peers_failing_exhausts_dispatch() -> anyhow::Result<()> {
    let empty = |name| peer_with(name, Context::new(), &Config::default());
    let (a, b) = (empty("a"), empty("b"));
    let peers = PeerTable::new();
    peers.insert("a", a.client.clone());
    peers.insert("b", b.client.clone());

    let dispatcher = Dispatcher::with_strategy(Context::new(), &remote_config(), Scripted::new(&["a", "b"]), Arc::new(peers));
    match dispatcher.run(1.0, "int", &calc(), "answer", &[], &[]).await {
        Err(Error::DispatchExhausted { failures, .. }) => {
            assert_eq!(failures.len(), 2);
            assert!(failures.iter().all(|f| f.kind == FailureKind::ClassResolution));
            assert_eq!(failures[0].peer, "a");
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_vanished_diffuser_is_recreated() -> anyhow::Result<()> {
    let live = peer("live");
    let peers = PeerTable::new();
    peers.insert("live", live.client.clone());
    let dispatcher = Dispatcher::with_strategy(Context::new(), &remote_config(), Scripted::new(&["live"]), Arc::new(peers));

    assert_eq!(dispatcher.run(1.0, "int", &calc(), "answer", &[], &[]).await?, Value::Int(42));
    let sig = Signature::parse("demo.Calc:answer()-int")?;
    live.registry.delete(&sig)?;

    assert_eq!(dispatcher.run(1.0, "int", &calc(), "answer", &[], &[]).await?, Value::Int(42));
    assert!(live.registry.get(&sig).is_ok());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nested_call_runs_where_it_lands() -> anyhow::Result<()> {
    // would hang if the inner call were diffused to the silent peer
    let silent = Arc::new(SilentPeer::default());
    let inner_peers = PeerTable::new();
    inner_peers.insert("silent", silent.clone());
    let inner = Arc::new(Dispatcher::with_strategy(
        Context::builder().class(calc_class()).build()?,
        &Config::builder().load_threshold(0.5).build()?,
        Scripted::new(&["silent"]),
        Arc::new(inner_peers),
    ));

    let relay = Class::builder("demo.Relay")
        .method("hop", &[], move |_, _| {
            let target = calc();
            let nested = inner.run(1.0, "int", &target, "answer", &[], &[]);
            Ok(tokio::runtime::Handle::current().block_on(nested)?)
        })
        .build();
    let host = peer_with("host", Context::builder().class(relay).build()?, &Config::default());
    let peers = PeerTable::new();
    peers.insert("host", host.client.clone());

    let dispatcher = Dispatcher::with_strategy(Context::new(), &remote_config(), Scripted::new(&["host"]), Arc::new(peers));
    let relay_target = Value::Object(Object::new("demo.Relay"));
    assert_eq!(dispatcher.run(1.0, "int", &relay_target, "hop", &[], &[]).await?, Value::Int(42));
    assert_eq!(silent.polls.load(Ordering::SeqCst), 0);
    Ok(())
}

// --- Peer surface ---

fn request(arg_types: &[&str], return_type: &str, args: &[Value], target: &Value) -> ExecuteRequest {
    let pack = diffuse::serializer::PackSerializer;
    ExecuteRequest {
        arg_types: arg_types.iter().map(|t| t.to_string()).collect(),
        return_type: return_type.to_string(),
        args: args.iter().map(|a| pack.serialize(a).unwrap()).collect(),
        target: pack.serialize(target).unwrap(),
    }
}

#[tokio::test]
async fn test_bean_status_until_ready() -> anyhow::Result<()> {
    let peer = peer("p");
    let sig = Signature::parse("Bean:getA()-java.lang.String")?;
    peer.client.create(&sig, &EndpointSet::new(), PACK).await?;
    let id = peer.client.execute(&sig, request(&[], "java.lang.String", &[], &bean("x"))).await?;

    while peer.client.status(&sig, &id).await? == ResultStatus::Pending {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let bytes = peer.client.result(&sig, &id).await?;
    assert_eq!(diffuse::serializer::PackSerializer.deserialize(&bytes, "java.lang.String")?, Value::from("x"));
    Ok(())
}

#[tokio::test]
async fn test_delete_needs_an_existing_diffuser() -> anyhow::Result<()> {
    let peer = peer("p");
    let sig = Signature::parse("demo.Calc:answer()-int")?;

    assert_eq!(peer.client.delete(&sig).await.unwrap_err().kind(), FailureKind::DiffuserNotFound);
    peer.client.create(&sig, &EndpointSet::new(), PACK).await?;
    peer.client.delete(&sig).await?;
    assert_eq!(peer.client.delete(&sig).await.unwrap_err().kind(), FailureKind::DiffuserNotFound);
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_unknown_serializer() -> anyhow::Result<()> {
    let peer = peer("p");
    let sig = Signature::parse("demo.Calc:answer()-int")?;
    let err = peer.client.create(&sig, &EndpointSet::new(), "xml").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Serialization);
    Ok(())
}

#[tokio::test]
async fn test_execute_checks_declared_types() -> anyhow::Result<()> {
    let peer = peer("p");
    let sig = Signature::parse("demo.Calc:add(int,int)-int")?;
    let args = [Value::Int(1), Value::Int(2)];

    let err = peer.client.execute(&sig, request(&["int", "int"], "int", &args, &calc())).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::DiffuserNotFound);

    peer.client.create(&sig, &EndpointSet::new(), PACK).await?;
    let err = peer.client.execute(&sig, request(&["int", "long"], "int", &args, &calc())).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::ArgumentMismatch);
    let err = peer.client.execute(&sig, request(&["int", "int"], "long", &args, &calc())).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::ReturnTypeMismatch);
    let err = peer.client.execute(&sig, request(&["int", "int"], "int", &args[..1], &calc())).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::ArgumentMismatch);
    Ok(())
}

#[tokio::test]
async fn test_result_then_status() -> anyhow::Result<()> {
    let peer = peer("p");
    let sig = Signature::parse("demo.Calc:add(int,int)-int")?;
    peer.client.create(&sig, &EndpointSet::new(), PACK).await?;

    let id = peer.client.execute(&sig, request(&["int", "int"], "int", &[Value::Int(2), Value::Int(3)], &calc())).await?;
    let bytes = peer.client.result(&sig, &id).await?;
    assert_eq!(diffuse::serializer::PackSerializer.deserialize(&bytes, "int")?, Value::Int(5));
    assert_eq!(peer.client.status(&sig, &id).await?, ResultStatus::Ready);
    Ok(())
}

#[tokio::test]
async fn test_unknown_results() -> anyhow::Result<()> {
    let peer = peer("p");
    let sig = Signature::parse("demo.Calc:answer()-int")?;
    let id = RequestId::from("nobody");
    assert_eq!(peer.client.status(&sig, &id).await?, ResultStatus::Pending);
    assert_eq!(peer.client.result(&sig, &id).await.unwrap_err().kind(), FailureKind::ResultLost);
    Ok(())
}

#[tokio::test]
async fn test_evicted_result_is_lost() -> anyhow::Result<()> {
    let context = Context::builder().class(calc_class()).build()?;
    let peer = peer_with("p", context, &Config::builder().result_capacity(1).build()?);
    let sig = Signature::parse("demo.Calc:answer()-int")?;
    peer.client.create(&sig, &EndpointSet::new(), PACK).await?;

    let first = peer.client.execute(&sig, request(&[], "int", &[], &calc())).await?;
    let second = peer.client.execute(&sig, request(&[], "int", &[], &calc())).await?;

    assert_eq!(peer.client.result(&sig, &first).await.unwrap_err().kind(), FailureKind::ResultLost);
    assert!(peer.client.result(&sig, &second).await.is_ok());
    assert_eq!(peer.registry.results().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_gets_protocol_failure() {
    let peer = peer("p");
    let reply = ReplyFrame::decode(&peer.service.handle(b"definitely not a frame").await).unwrap();
    assert_eq!(reply.seq, 0);
    assert_eq!(reply.status.unwrap_err().kind, FailureKind::Protocol);
}

#[tokio::test]
async fn test_unknown_classes_fetched_from_a_peer() -> anyhow::Result<()> {
    let zoo = peer_with("zoo", Context::builder().class(Class::builder("zoo.Cat").build()).build()?, &Config::default());
    let worker_context = Context::builder().class(calc_class()).class_source(zoo.client.clone()).build()?;
    let worker = peer_with("worker", worker_context, &Config::default());
    let isolated = peer("isolated");

    let sig = Signature::parse("demo.Calc:describe(java.lang.Object)-java.lang.String")?;
    let cat = Value::Object(Object::new("zoo.Cat"));
    let req = || request(&["java.lang.Object"], "java.lang.String", std::slice::from_ref(&cat), &calc());

    worker.client.create(&sig, &EndpointSet::new(), PACK).await?;
    let id = worker.client.execute(&sig, req()).await?;
    let bytes = worker.client.result(&sig, &id).await?;
    assert_eq!(diffuse::serializer::PackSerializer.deserialize(&bytes, "java.lang.String")?, Value::from("a zoo.Cat"));
    assert!(worker.registry.context().classes().contains("zoo.Cat"));

    isolated.client.create(&sig, &EndpointSet::new(), PACK).await?;
    let err = isolated.client.execute(&sig, req()).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::ClassResolution);
    Ok(())
}
