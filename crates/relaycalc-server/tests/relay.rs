use relaycalc_core::{
    Error,
    codec::DEFAULT_MAX_LINE_BYTES,
    message::{DIVISION_BY_ZERO, INVALID_OPERATION, Message},
};
use relaycalc_server::server::{
    client,
    config::{ComputeConfig, GatewayConfig, ListenerConfig},
    exchange_log::{ExchangeLog, Tier},
    listener::serve,
    service::{compute::ComputeService, gateway::GatewayService},
};
use serde_json::{Value, json};
use std::{net::SocketAddr, path::PathBuf};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

const SECRET: &str = "12345";

struct Tiers {
    gateway_addr: SocketAddr,
    compute_addr: SocketAddr,
    gateway_log: ExchangeLog,
    compute_log: ExchangeLog,
    compute: ComputeService,
    dir: TempDir,
    token: CancellationToken,
    servers: Vec<JoinHandle<()>>,
}

impl Tiers {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();

        let (compute_addr, compute, compute_log, compute_server) =
            start_compute(&dir, token.clone()).await;

        let gateway_log = ExchangeLog::open(dir.path().join("gateway.log"), Tier::Gateway)
            .await
            .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gateway_addr = listener.local_addr().unwrap();
        let config = GatewayConfig {
            listen_addr: gateway_addr.to_string(),
            upstream_addr: compute_addr.to_string(),
            shared_secret: SECRET.into(),
            log_file: dir.path().join("gateway.log"),
            listener: ListenerConfig::default(),
        };
        let gateway_server = tokio::spawn({
            let service = GatewayService::new(config, gateway_log.clone());
            let token = token.clone();
            async move {
                serve(listener, service, &ListenerConfig::default(), token.cancelled_owned()).await;
            }
        });

        Self {
            gateway_addr,
            compute_addr,
            gateway_log,
            compute_log,
            compute,
            dir,
            token,
            servers: vec![compute_server, gateway_server],
        }
    }

    async fn via_gateway(&self, request: Value) -> Message {
        client::exchange(&self.gateway_addr.to_string(), &request, DEFAULT_MAX_LINE_BYTES)
            .await
            .unwrap()
    }

    async fn direct(&self, request: Value) -> Message {
        client::exchange(&self.compute_addr.to_string(), &request, DEFAULT_MAX_LINE_BYTES)
            .await
            .unwrap()
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    async fn logs(&self) -> (String, String) {
        self.gateway_log.flush().await;
        self.compute_log.flush().await;
        (
            std::fs::read_to_string(self.log_path("gateway.log")).unwrap(),
            std::fs::read_to_string(self.log_path("compute.log")).unwrap(),
        )
    }

    async fn stop(self) {
        self.token.cancel();
        for server in self.servers {
            server.await.unwrap();
        }
        self.compute.shutdown().await;
    }
}

async fn start_compute(
    dir: &TempDir,
    token: CancellationToken,
) -> (SocketAddr, ComputeService, ExchangeLog, JoinHandle<()>) {
    let log = ExchangeLog::open(dir.path().join("compute.log"), Tier::Compute)
        .await
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ComputeConfig {
        listen_addr: addr.to_string(),
        num_workers: 4,
        queue_depth: 64,
        log_file: dir.path().join("compute.log"),
        listener: ListenerConfig::default(),
    };
    let service = ComputeService::new(&config, log.clone()).unwrap();
    let server = tokio::spawn({
        let service = service.clone();
        async move {
            serve(listener, service, &ListenerConfig::default(), token.cancelled_owned()).await;
        }
    });
    (addr, service, log, server)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn relays_multiplication_end_to_end() {
    let tiers = Tiers::start().await;

    let reply = tiers
        .via_gateway(json!({
            "chave": SECRET,
            "operacao": "multiplicacao",
            "a": 10,
            "b": 5,
            "request_id": "r1",
        }))
        .await;

    assert_eq!(reply["request_id"], "r1");
    assert_eq!(reply["resultado"], 50.0);
    assert!(reply["elapsed_ms"].is_u64());
    assert!(reply["middleware_elapsed_ms"].is_u64());
    assert!(reply.get("erro").is_none());

    let (gateway_log, compute_log) = tiers.logs().await;
    assert!(gateway_log.contains("[GATEWAY] INFO"));
    assert!(gateway_log.contains("req_id=r1"));
    assert!(compute_log.contains("req_id=r1"));
    assert!(compute_log.contains("\"via\":\"gateway\""));

    tiers.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wrong_credential_is_denied_and_never_forwarded() {
    let tiers = Tiers::start().await;

    let reply = tiers
        .via_gateway(json!({
            "chave": "wrong",
            "operacao": "multiplicacao",
            "a": 10,
            "b": 5,
            "request_id": "r1",
        }))
        .await;
    assert_eq!(Value::Object(reply), json!({ "erro": "access denied" }));

    let reply = tiers
        .via_gateway(json!({ "operacao": "soma", "a": 1, "b": 2 }))
        .await;
    assert_eq!(Value::Object(reply), json!({ "erro": "access denied" }));

    let (gateway_log, compute_log) = tiers.logs().await;
    assert_eq!(gateway_log.matches("access denied").count(), 2);
    assert!(gateway_log.contains("[GATEWAY] WARN"));
    assert!(!compute_log.contains("req_id="));

    tiers.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_request_id_is_assigned() {
    let tiers = Tiers::start().await;

    let reply = tiers
        .via_gateway(json!({ "chave": SECRET, "operacao": "soma", "a": 1, "b": 2 }))
        .await;
    let id = reply["request_id"].as_str().unwrap();
    assert!(!id.is_empty());
    assert_eq!(reply["resultado"], 3.0);

    let (_, compute_log) = tiers.logs().await;
    assert!(compute_log.contains(&format!("req_id={id}")));

    tiers.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn computations_through_the_gateway() {
    let tiers = Tiers::start().await;

    let reply = tiers
        .via_gateway(json!({ "chave": SECRET, "operacao": "fib", "n": 10, "request_id": "f" }))
        .await;
    assert_eq!(reply["resultado"], 55);

    let reply = tiers
        .via_gateway(json!({ "chave": SECRET, "operacao": "divisao", "a": 1, "b": 0 }))
        .await;
    assert_eq!(reply["resultado"], DIVISION_BY_ZERO);

    let reply = tiers
        .via_gateway(json!({ "chave": SECRET, "operacao": "subtracao", "a": 1, "b": 4 }))
        .await;
    assert_eq!(reply["resultado"], -3.0);

    let reply = tiers
        .via_gateway(json!({ "chave": SECRET, "operacao": "potencia", "a": 2, "b": 8 }))
        .await;
    assert_eq!(reply["resultado"], INVALID_OPERATION);

    let reply = tiers
        .via_gateway(json!({ "chave": SECRET, "operacao": "fib", "n": -1, "request_id": "neg" }))
        .await;
    assert_eq!(reply["request_id"], "neg");
    assert!(reply.get("resultado").is_none());
    assert!(reply["erro"].as_str().unwrap().contains("invalid argument"));

    tiers.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_get_their_own_replies() {
    let tiers = Tiers::start().await;
    let addr = tiers.gateway_addr.to_string();

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let addr = addr.clone();
            tokio::spawn(async move {
                let request = json!({
                    "chave": SECRET,
                    "operacao": "soma",
                    "a": i,
                    "b": 1000,
                    "request_id": format!("c-{i}"),
                });
                let reply = client::exchange(&addr, &request, DEFAULT_MAX_LINE_BYTES)
                    .await
                    .unwrap();
                (i, reply)
            })
        })
        .collect();

    for task in tasks {
        let (i, reply) = task.await.unwrap();
        assert_eq!(reply["request_id"], format!("c-{i}"));
        assert_eq!(reply["resultado"], f64::from(i + 1000));
    }

    let (gateway_log, _) = tiers.logs().await;
    for i in 0..32 {
        assert_eq!(gateway_log.matches(&format!("req_id=c-{i} ")).count(), 1);
    }

    tiers.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compute_node_down_yields_an_error_with_the_id() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();

    let upstream = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let log = ExchangeLog::open(dir.path().join("gateway.log"), Tier::Gateway)
        .await
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gateway_addr = listener.local_addr().unwrap();
    let config = GatewayConfig {
        listen_addr: gateway_addr.to_string(),
        upstream_addr: upstream.to_string(),
        shared_secret: SECRET.into(),
        log_file: dir.path().join("gateway.log"),
        listener: ListenerConfig::default(),
    };
    let server = tokio::spawn({
        let service = GatewayService::new(config, log.clone());
        let token = token.clone();
        async move { serve(listener, service, &ListenerConfig::default(), token.cancelled_owned()).await }
    });

    let request = json!({ "chave": SECRET, "operacao": "soma", "a": 1, "b": 1, "request_id": "down" });
    let reply = client::exchange(&gateway_addr.to_string(), &request, DEFAULT_MAX_LINE_BYTES)
        .await
        .unwrap();
    assert_eq!(reply["request_id"], "down");
    assert!(reply.get("resultado").is_none());
    assert!(reply["erro"].as_str().unwrap().contains("unavailable"));

    log.flush().await;
    let contents = std::fs::read_to_string(dir.path().join("gateway.log")).unwrap();
    assert!(contents.contains("[GATEWAY] ERROR"));
    assert!(contents.contains("req_id=down"));

    token.cancel();
    server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_the_first_line_is_served() {
    let tiers = Tiers::start().await;

    let mut stream = TcpStream::connect(tiers.gateway_addr).await.unwrap();
    stream
        .write_all(
            b"{\"chave\":\"12345\",\"operacao\":\"soma\",\"a\":1,\"b\":1,\"request_id\":\"one\"}\n\
              {\"chave\":\"12345\",\"operacao\":\"soma\",\"a\":2,\"b\":2,\"request_id\":\"two\"}\n",
        )
        .await
        .unwrap();

    let mut received = String::new();
    stream.read_to_string(&mut received).await.unwrap();
    let lines: Vec<&str> = received.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("\"request_id\":\"one\""));

    tiers.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_line_gets_an_error_reply() {
    let tiers = Tiers::start().await;

    let mut stream = TcpStream::connect(tiers.gateway_addr).await.unwrap();
    stream.write_all(b"not json\n").await.unwrap();
    let mut received = String::new();
    stream.read_to_string(&mut received).await.unwrap();

    let reply: Value = serde_json::from_str(received.trim_end()).unwrap();
    assert!(reply["erro"].as_str().unwrap().starts_with("malformed message"));
    assert!(reply.get("request_id").is_none());

    tiers.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compute_node_serves_direct_callers() {
    let tiers = Tiers::start().await;

    let reply = tiers
        .direct(json!({ "operacao": "fib", "n": 35, "request_id": "direct" }))
        .await;
    assert_eq!(reply["request_id"], "direct");
    assert_eq!(reply["resultado"], 9_227_465);
    assert!(reply.get("middleware_elapsed_ms").is_none());

    let reply = tiers.direct(json!({ "operacao": "soma", "a": 1 })).await;
    assert!(!reply["request_id"].as_str().unwrap().is_empty());
    assert!(reply["erro"].as_str().unwrap().contains("missing field `b`"));

    tiers.stop().await;
}

#[tokio::test]
async fn caller_sees_end_of_stream_as_upstream_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let err = client::exchange(&addr.to_string(), &json!({}), DEFAULT_MAX_LINE_BYTES).await;
    assert!(matches!(
        err,
        Err(Error::UpstreamClosed | Error::Io { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn numeric_request_id_is_echoed_as_a_number() {
    let tiers = Tiers::start().await;

    let reply = tiers
        .via_gateway(json!({ "chave": SECRET, "operacao": "soma", "a": 1, "b": 2, "request_id": 7 }))
        .await;
    assert_eq!(reply["request_id"], json!(7));
    assert_eq!(reply["resultado"], 3.0);

    let (gateway_log, compute_log) = tiers.logs().await;
    assert!(gateway_log.contains("req_id=7 "));
    assert!(compute_log.contains("req_id=7 "));

    tiers.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fib_index_beyond_i64_is_an_invalid_argument() {
    let tiers = Tiers::start().await;

    let reply = tiers
        .direct(json!({ "operacao": "fib", "n": u64::MAX, "request_id": "big" }))
        .await;
    assert_eq!(reply["request_id"], "big");
    let erro = reply["erro"].as_str().unwrap();
    assert!(erro.starts_with("invalid argument"), "{erro}");

    tiers.stop().await;
}
