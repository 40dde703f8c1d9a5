use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::{fmt, time::Duration};
use relaycalc_core::{
    codec::DEFAULT_MAX_LINE_BYTES,
    message::{ArithmeticOp, FIB_TAG, Message, RequestId, fields},
};
use serde_json::Value;
use std::path::PathBuf;

/// Settings shared by every accept loop.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Upper bound on connections handled at the same time.
    pub max_connections: usize,
    /// Upper bound on a single request/response line.
    pub max_line_bytes: usize,
    /// How long shutdown waits for in-flight connections to finish.
    pub shutdown_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// Listener flags, flattened into each server binary's arguments.
#[derive(clap::Args, Debug, Clone)]
pub struct ListenerArgs {
    /// Maximum number of connections served concurrently.
    ///
    /// Further connections wait in the kernel accept backlog until a slot
    /// frees up.
    ///
    /// Environment variable: `MAX_CONNECTIONS`
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 1024)]
    pub max_connections: usize,

    /// Maximum length, in bytes, of a single JSON line.
    ///
    /// Environment variable: `MAX_LINE_BYTES`
    #[arg(long, env = "MAX_LINE_BYTES", default_value_t = DEFAULT_MAX_LINE_BYTES)]
    pub max_line_bytes: usize,

    /// Seconds to wait for in-flight connections on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

impl TryFrom<ListenerArgs> for ListenerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ListenerArgs) -> Result<Self, Self::Error> {
        if args.max_connections == 0 {
            bail!("MAX_CONNECTIONS must be greater than 0");
        }
        if args.max_connections > tokio::sync::Semaphore::MAX_PERMITS {
            bail!(
                "MAX_CONNECTIONS ({}) exceeds the supported maximum ({})",
                args.max_connections,
                tokio::sync::Semaphore::MAX_PERMITS
            );
        }
        if args.max_line_bytes == 0 {
            bail!("MAX_LINE_BYTES must be greater than 0");
        }

        Ok(Self {
            max_connections: args.max_connections,
            max_line_bytes: args.max_line_bytes,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}

/// Runtime configuration for the `relaycalc-gateway` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is honored).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "relaycalc-gateway",
    version,
    about = "Authenticating relay between callers and the compute node"
)]
pub struct GatewayArgs {
    /// Address to listen on for callers.
    ///
    /// Environment variable: `GATEWAY_ADDR`
    #[arg(long, env = "GATEWAY_ADDR", default_value_t = String::from("127.0.0.1:5000"))]
    pub listen_addr: String,

    /// Address of the compute node requests are relayed to.
    ///
    /// Environment variable: `COMPUTE_ADDR`
    #[arg(long, env = "COMPUTE_ADDR", default_value_t = String::from("127.0.0.1:5002"))]
    pub upstream_addr: String,

    /// Shared secret callers must present in the `chave` field.
    ///
    /// Environment variable: `SHARED_SECRET`
    #[arg(long, env = "SHARED_SECRET", default_value_t = String::from("12345"), hide_env_values = true)]
    pub shared_secret: String,

    /// Append-only exchange log.
    ///
    /// Environment variable: `GATEWAY_LOG_FILE`
    #[arg(long, env = "GATEWAY_LOG_FILE", default_value = "gateway.log")]
    pub log_file: PathBuf,

    #[command(flatten)]
    pub listener: ListenerArgs,
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub upstream_addr: String,
    pub shared_secret: String,
    pub log_file: PathBuf,
    pub listener: ListenerConfig,
}

// The secret never reaches logs, even in debug builds.
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("listen_addr", &self.listen_addr)
            .field("upstream_addr", &self.upstream_addr)
            .field("shared_secret", &"<redacted>")
            .field("log_file", &self.log_file)
            .field("listener", &self.listener)
            .finish()
    }
}

impl TryFrom<GatewayArgs> for GatewayConfig {
    type Error = anyhow::Error;

    fn try_from(args: GatewayArgs) -> Result<Self, Self::Error> {
        if args.shared_secret.is_empty() {
            bail!("SHARED_SECRET must not be empty");
        }

        Ok(Self {
            listen_addr: args.listen_addr,
            upstream_addr: args.upstream_addr,
            shared_secret: args.shared_secret,
            log_file: args.log_file,
            listener: ListenerConfig::try_from(args.listener)?,
        })
    }
}

/// Runtime configuration for the `relaycalc-compute` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "relaycalc-compute",
    version,
    about = "Compute node evaluating relayed requests on a worker pool"
)]
pub struct ComputeArgs {
    /// Address to listen on for the gateway (or direct callers).
    ///
    /// Environment variable: `COMPUTE_ADDR`
    #[arg(long, env = "COMPUTE_ADDR", default_value_t = String::from("127.0.0.1:5002"))]
    pub listen_addr: String,

    /// Number of worker threads evaluating requests.
    ///
    /// Fixed for the lifetime of the process.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    /// Capacity of the queue between connection handlers and workers.
    ///
    /// Submissions wait once this many requests are queued.
    ///
    /// Environment variable: `QUEUE_DEPTH`
    #[arg(long, env = "QUEUE_DEPTH", default_value_t = 64)]
    pub queue_depth: usize,

    /// Append-only exchange log.
    ///
    /// Environment variable: `COMPUTE_LOG_FILE`
    #[arg(long, env = "COMPUTE_LOG_FILE", default_value = "compute.log")]
    pub log_file: PathBuf,

    #[command(flatten)]
    pub listener: ListenerArgs,
}

#[derive(Debug, Clone)]
pub struct ComputeConfig {
    pub listen_addr: String,
    pub num_workers: usize,
    pub queue_depth: usize,
    pub log_file: PathBuf,
    pub listener: ListenerConfig,
}

impl TryFrom<ComputeArgs> for ComputeConfig {
    type Error = anyhow::Error;

    fn try_from(args: ComputeArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        if args.queue_depth == 0 {
            bail!("QUEUE_DEPTH must be greater than 0");
        }

        Ok(Self {
            listen_addr: args.listen_addr,
            num_workers: args.num_workers,
            queue_depth: args.queue_depth,
            log_file: args.log_file,
            listener: ListenerConfig::try_from(args.listener)?,
        })
    }
}

/// Operation selector for the caller.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationArg {
    Soma,
    Subtracao,
    Multiplicacao,
    Divisao,
    Fib,
}

impl OperationArg {
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Soma => ArithmeticOp::Soma.tag(),
            Self::Subtracao => ArithmeticOp::Subtracao.tag(),
            Self::Multiplicacao => ArithmeticOp::Multiplicacao.tag(),
            Self::Divisao => ArithmeticOp::Divisao.tag(),
            Self::Fib => FIB_TAG,
        }
    }
}

/// Arguments for the `relaycalc-caller` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "relaycalc-caller",
    version,
    about = "Send concurrent computation requests through the gateway"
)]
pub struct CallerArgs {
    /// Gateway address.
    ///
    /// Environment variable: `GATEWAY_ADDR`
    #[arg(long, env = "GATEWAY_ADDR", default_value_t = String::from("127.0.0.1:5000"))]
    pub gateway_addr: String,

    /// Operation to request.
    #[arg(long, value_enum, default_value_t = OperationArg::Multiplicacao)]
    pub op: OperationArg,

    /// First operand for arithmetic operations.
    #[arg(long, default_value_t = 10.0, allow_negative_numbers = true)]
    pub a: f64,

    /// Second operand for arithmetic operations.
    #[arg(long, default_value_t = 5.0, allow_negative_numbers = true)]
    pub b: f64,

    /// Fibonacci index.
    #[arg(long, default_value_t = 35, allow_negative_numbers = true)]
    pub n: i64,

    /// Number of concurrent requests to send.
    #[arg(long, default_value_t = 1)]
    pub parallel: usize,

    /// Credential presented to the gateway.
    ///
    /// Environment variable: `SHARED_SECRET`
    #[arg(long, env = "SHARED_SECRET", default_value_t = String::from("12345"), hide_env_values = true)]
    pub chave: String,

    /// Maximum length, in bytes, of the response line.
    #[arg(long, env = "MAX_LINE_BYTES", default_value_t = DEFAULT_MAX_LINE_BYTES)]
    pub max_line_bytes: usize,
}

impl CallerArgs {
    /// Builds the request template shared by every parallel request, with a
    /// fresh base request id.
    #[must_use]
    pub fn base_request(&self) -> Message {
        let mut request = Message::new();
        request.insert(fields::CHAVE.to_owned(), Value::from(self.chave.as_str()));
        request.insert(fields::OPERACAO.to_owned(), Value::from(self.op.tag()));
        request.insert(fields::REQUEST_ID.to_owned(), RequestId::generate().into());
        if self.op == OperationArg::Fib {
            request.insert(fields::N.to_owned(), Value::from(self.n));
        } else {
            request.insert(fields::A.to_owned(), Value::from(self.a));
            request.insert(fields::B.to_owned(), Value::from(self.b));
        }
        request
    }

    /// Expands the template into `parallel` requests with ids
    /// `<base>-<index>`.
    #[must_use]
    pub fn requests(&self) -> Vec<Message> {
        let base = self.base_request();
        let base_id = base
            .get(fields::REQUEST_ID)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        (0..self.parallel)
            .map(|i| {
                let mut request = base.clone();
                request.insert(
                    fields::REQUEST_ID.to_owned(),
                    Value::from(format!("{base_id}-{i}")),
                );
                request
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_defaults_match_the_deployment() {
        let args = GatewayArgs::try_parse_from(["relaycalc-gateway"]).unwrap();
        let config = GatewayConfig::try_from(args).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:5000");
        assert_eq!(config.upstream_addr, "127.0.0.1:5002");
        assert_eq!(config.shared_secret, "12345");
        assert_eq!(config.listener.max_connections, 1024);
        assert_eq!(config.listener.shutdown_timeout, Duration::from_secs(3));
    }

    #[test]
    fn debug_output_hides_the_secret() {
        let args = GatewayArgs::try_parse_from([
            "relaycalc-gateway",
            "--shared-secret",
            "topsecret-xyz",
        ])
        .unwrap();
        let config = GatewayConfig::try_from(args).unwrap();

        for rendered in [format!("{config:?}"), format!("{config:#?}")] {
            assert!(!rendered.contains("topsecret-xyz"), "{rendered}");
            assert!(rendered.contains("<redacted>"));
            assert!(rendered.contains("127.0.0.1:5002"));
        }
    }

    #[test]
    fn empty_secret_is_rejected() {
        let args =
            GatewayArgs::try_parse_from(["relaycalc-gateway", "--shared-secret", ""]).unwrap();
        assert!(GatewayConfig::try_from(args).is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let args = ComputeArgs::try_parse_from(["relaycalc-compute", "--num-workers", "0"]).unwrap();
        assert!(ComputeConfig::try_from(args).is_err());
    }

    #[test]
    fn zero_connections_is_rejected() {
        let args =
            ComputeArgs::try_parse_from(["relaycalc-compute", "--max-connections", "0"]).unwrap();
        assert!(ComputeConfig::try_from(args).is_err());
    }

    #[test]
    fn compute_defaults() {
        let args = ComputeArgs::try_parse_from(["relaycalc-compute"]).unwrap();
        let config = ComputeConfig::try_from(args).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:5002");
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.log_file, PathBuf::from("compute.log"));
    }

    #[test]
    fn caller_builds_arithmetic_requests() {
        let args = CallerArgs::try_parse_from([
            "relaycalc-caller",
            "--op",
            "divisao",
            "--a",
            "9",
            "--b",
            "-3",
            "--parallel",
            "3",
        ])
        .unwrap();
        let requests = args.requests();
        assert_eq!(requests.len(), 3);

        let first = &requests[0];
        assert_eq!(first[fields::OPERACAO], "divisao");
        assert_eq!(first[fields::A], 9.0);
        assert_eq!(first[fields::B], -3.0);
        assert!(first.get(fields::N).is_none());

        let ids: Vec<&str> = requests
            .iter()
            .map(|r| r[fields::REQUEST_ID].as_str().unwrap())
            .collect();
        assert!(ids[0].ends_with("-0"));
        assert!(ids[2].ends_with("-2"));
        assert_eq!(ids[0].trim_end_matches("-0"), ids[2].trim_end_matches("-2"));
    }

    #[test]
    fn caller_builds_fib_requests() {
        let args = CallerArgs::try_parse_from(["relaycalc-caller", "--op", "fib", "--n", "10"])
            .unwrap();
        let request = args.base_request();
        assert_eq!(request[fields::OPERACAO], "fib");
        assert_eq!(request[fields::N], 10);
        assert!(request.get(fields::A).is_none());
        assert_eq!(request[fields::CHAVE], "12345");
    }
}
