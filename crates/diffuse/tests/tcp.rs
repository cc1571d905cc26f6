//! Diffusion over real sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use diffuse::class::Class;
use diffuse::client::DiffuserClient;
use diffuse::config::Config;
use diffuse::context::Context;
use diffuse::dispatcher::Dispatcher;
use diffuse::registry::DiffuserRegistry;
use diffuse::error::Result;
use diffuse::remote::{ExecuteRequest, RemoteDiffuser};
use diffuse::serializer::{PackSerializer, Serializer};
use diffuse::service::DiffuserService;
use diffuse::signature::Signature;
use diffuse::strategy::{EndpointSet, UniformStrategy};
use diffuse::tcp::{TcpConnector, TcpTransport, serve};
use diffuse::transport::{Transport, TransportError};
use diffuse::{Object, Value};
use diffrpc::FailureKind;
use tokio::net::TcpListener;

async fn spawn_peer() -> anyhow::Result<String> {
    let greeter = Class::builder("demo.Greeter")
        .method("greet", &["java.lang.String"], |this, args| {
            let greeting = this.field("greeting").and_then(Value::as_str).unwrap_or("hello");
            Ok(Value::from(format!("{}, {}", greeting, args[0].as_str().unwrap_or("nobody"))))
        })
        .build();
    let context = Context::builder().class(greeter).build()?;
    let registry = Arc::new(DiffuserRegistry::new(context, &Config::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    tokio::spawn(serve(listener, Arc::new(DiffuserService::new(registry))));
    Ok(addr)
}

#[tokio::test]
async fn test_dispatch_over_tcp() -> anyhow::Result<()> {
    let addr = spawn_peer().await?;
    let config = Config::builder().load_threshold(0.5).redundancy(2).build()?;
    let strategy = Arc::new(UniformStrategy::new(EndpointSet::new().with(addr.as_str()), 2, Some(3)));
    let dispatcher = Dispatcher::with_strategy(Context::new(), &config, strategy, Arc::new(TcpConnector::new()));

    let target = Value::Object(Object::new("demo.Greeter").with("greeting", "hi"));
    for name in ["ada", "grace"] {
        let value = dispatcher
            .run(1.0, "java.lang.String", &target, "greet", &["java.lang.String".into()], &[Value::from(name)])
            .await?;
        assert_eq!(value, Value::from(format!("hi, {}", name)));
    }
    Ok(())
}

#[tokio::test]
async fn test_client_errors_over_tcp() -> anyhow::Result<()> {
    let addr = spawn_peer().await?;
    let connector = TcpConnector::new();
    let remote = diffuse::remote::PeerConnector::connect(&connector, &addr.as_str().into())?;

    let sig = Signature::parse("demo.Greeter:greet(java.lang.String)-java.lang.String")?;
    assert_eq!(remote.delete(&sig).await.unwrap_err().kind(), FailureKind::DiffuserNotFound);
    remote.create(&sig, &EndpointSet::new(), "json").await?;
    remote.delete(&sig).await?;
    Ok(())
}

#[tokio::test]
async fn test_refused_connection_is_a_transport_error() -> anyhow::Result<()> {
    // grab a free port, then close it
    let addr = TcpListener::bind("127.0.0.1:0").await?.local_addr()?.to_string();
    let err = TcpTransport::new(addr).call(b"ping").await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectionLost(_) | TransportError::Io(_)), "{:?}", err);
    Ok(())
}

/// Pack encoding that counts how many values it has written.
#[derive(Default)]
struct CountingPack {
    written: AtomicUsize,
}

impl Serializer for CountingPack {
    fn name(&self) -> &str {
        "counting"
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        self.written.fetch_add(1, Ordering::SeqCst);
        PackSerializer.serialize(value)
    }

    fn deserialize(&self, bytes: &[u8], type_name: &str) -> Result<Value> {
        PackSerializer.deserialize(bytes, type_name)
    }
}

#[tokio::test]
async fn test_abandoned_polls_are_dropped_by_the_server() -> anyhow::Result<()> {
    let counting = Arc::new(CountingPack::default());
    let slow = Class::builder("demo.Slow")
        .method("finish", &[], |_, _| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(Value::from("done"))
        })
        .build();
    let context = Context::builder().class(slow).serializer(counting.clone()).build()?;
    let registry = Arc::new(DiffuserRegistry::new(context, &Config::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    tokio::spawn(serve(listener, Arc::new(DiffuserService::new(registry))));

    let client = DiffuserClient::new(addr.as_str(), Arc::new(TcpTransport::new(addr.as_str())));
    let sig = Signature::parse("demo.Slow:finish()-java.lang.String")?;
    client.create(&sig, &EndpointSet::new(), "counting").await?;
    let request = ExecuteRequest {
        arg_types: vec![],
        return_type: "java.lang.String".into(),
        args: vec![],
        target: PackSerializer.serialize(&Value::Object(Object::new("demo.Slow")))?,
    };
    let id = client.execute(&sig, request).await?;

    for _ in 0..3 {
        assert!(tokio::time::timeout(Duration::from_millis(50), client.result(&sig, &id)).await.is_err());
    }
    let bytes = client.result(&sig, &id).await?;
    assert_eq!(PackSerializer.deserialize(&bytes, "java.lang.String")?, Value::from("done"));

    // give any leftover handler time to run
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counting.written.load(Ordering::SeqCst), 1);
    Ok(())
}
