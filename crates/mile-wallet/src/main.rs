mod cli;

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::Parser;
use eyre::{bail, eyre, WrapErr};
use serde_json::Value;
use tracing::{debug, warn};

use mile_rpc::client::TRANSACTION_METHODS;
use mile_rpc::transport::Stage;
use mile_rpc::{
    CallOutput, Client, ClientConfig, Ed25519Signer, Error, ErrorKind, FailureHandler,
    ResponseFailure, Signer, TransactionIds, TransactionKind, TransactionRequest,
};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let signer = Arc::new(Ed25519Signer::new());
    match args.command {
        Command::Wallet { ref phrase } => {
            let pair = match phrase {
                Some(phrase) => signer.key_pair_from_secret_phrase(phrase),
                None => signer.key_pair_from_random(),
            }
            .wrap_err("generate key pair")?;
            println!("public key:  {}", pair.public_key());
            println!("private key: {}", pair.private_key());
        }
        Command::Call {
            ref method,
            ref params,
        } => {
            let params: Value =
                serde_json::from_str(params).wrap_err("--params is not valid JSON")?;
            if !params.is_object() {
                bail!("--params must be a JSON object");
            }
            let mut session = Session::new(&args, signer);
            let output = call_method(&mut session, method, &params).await?;
            println!("Call {method}: {}", render_output(&output)?);
        }
        Command::Transfer {
            ref to,
            ref amount,
            asset,
            ref description,
            ref private_key,
            test,
        } => {
            signer
                .validate_private_key(private_key)
                .wrap_err("invalid --private-key")?;
            let pair = signer
                .key_pair_from_private_key(private_key)
                .wrap_err("invalid --private-key")?;

            let mut session = Session::new(&args, signer.clone());
            let block_id = session
                .run("get-current-block-id", |client| async move {
                    client.get_current_block_id().await
                })
                .await?;

            let request = TransactionRequest {
                kind: TransactionKind::Transfer,
                key_pair: pair.clone(),
                destination: Some(to.clone()),
                block_id,
                transaction_id: TransactionIds::from_clock().next(),
                asset_code: asset,
                amount: amount.clone(),
                fee: String::new(),
                description: (!description.is_empty()).then(|| description.clone()),
            };
            let body = signer
                .build_signed_transaction(&request)
                .wrap_err("sign transfer")?;

            if test {
                println!("{}", serde_json::to_string_pretty(&body)?);
                return Ok(());
            }

            // A send that fails after the write may still have reached the
            // node, so it gets exactly one attempt.
            let (pair, body) = (&pair, &body);
            let result = session
                .run_once("send-transaction", |client| async move {
                    client.send_transaction(pair, body.clone()).await
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

/// Transaction methods get one attempt: a failure after the write leaves
/// the transaction possibly accepted, and a retry would sign a new one.
async fn call_method(
    session: &mut Session,
    method: &str,
    params: &Value,
) -> eyre::Result<CallOutput> {
    let op = move |client: Client| async move { client.call(method, params).await };
    if TRANSACTION_METHODS.contains(&method) {
        session.run_once(method, op).await
    } else {
        session.run(method, op).await
    }
}

fn init_tracing(debug: bool) {
    let fallback = if debug {
        "warn,mile_rpc::wire=info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .init();
}

fn render_output(output: &CallOutput) -> eyre::Result<String> {
    Ok(match output {
        CallOutput::Latency(us) => us.to_string(),
        CallOutput::BlockId(id) => id.to_string(),
        CallOutput::Json(value) => serde_json::to_string_pretty(value)?,
    })
}

// ==============================================================================
// Failure Recording
// ==============================================================================

/// What the library reported for the last failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Failure {
    /// `None` for a response the node sent back without a usable result.
    kind: Option<ErrorKind>,
    message: String,
    hint: Option<&'static str>,
}

impl Failure {
    fn from_error(error: &Error) -> Self {
        Self {
            kind: Some(error.kind()),
            message: error.to_string(),
            hint: error_hint(error),
        }
    }

    fn from_response(failure: &ResponseFailure) -> Self {
        Self {
            kind: None,
            message: failure.to_string(),
            hint: status_hint(failure.status.as_u16()),
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self.kind, Some(ErrorKind::Fail | ErrorKind::Timeout))
    }
}

#[derive(Debug, Default)]
struct CliHandler {
    last: Mutex<Option<Failure>>,
}

impl CliHandler {
    fn record(&self, failure: Failure) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(failure);
    }

    fn take(&self) -> Option<Failure> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl FailureHandler for CliHandler {
    fn on_error(&self, error: &Error) {
        debug!(kind = %error.kind(), error = %error, "rpc error");
        self.record(Failure::from_error(error));
    }

    fn on_response_failure(&self, failure: &ResponseFailure) {
        debug!(
            status = failure.status.as_u16(),
            rpc.method = %failure.method,
            body = %failure.response.body(),
            "rpc response failure"
        );
        self.record(Failure::from_response(failure));
    }
}

fn error_hint(error: &Error) -> Option<&'static str> {
    match error {
        Error::EmptyUrl | Error::UnsupportedUrl { .. } => {
            Some("the URL must look like http(s)://host[:port]/path")
        }
        Error::HostNotFound { .. } => {
            Some("hostname resolution failed; verify the node hostname and your DNS/network")
        }
        Error::Tls { .. }
        | Error::Io {
            stage: Stage::Handshake,
            ..
        } => Some(
            "TLS handshake failed; verify certificate trust, or pass --insecure for a self-signed node",
        ),
        Error::Io { .. } => Some("could not reach the node; verify the URL and network access"),
        Error::Timeout { .. } | Error::Closed { .. } => {
            Some("the node did not answer in time; check reachability or raise --timeout")
        }
        Error::MethodNotFound(_) => Some("run `mile-wallet --help` for the list of methods"),
        Error::MissingParam { .. } | Error::InvalidParam { .. } => {
            Some("check the keys of the --params object")
        }
        _ => None,
    }
}

fn status_hint(status: u16) -> Option<&'static str> {
    match status {
        404 => Some("endpoint path is invalid; verify the full RPC URL including /v1/api"),
        401 | 403 => Some("the node refused the request; verify the URL points at a public API"),
        _ => None,
    }
}

fn describe(what: &str, url: &str, failure: Option<&Failure>, attempts: u32) -> String {
    let mut lines = vec![format!("{what} failed against `{url}`")];
    match failure {
        Some(failure) => {
            match failure.kind {
                Some(kind) => lines.push(format!("error ({kind}): {}", failure.message)),
                None => lines.push(format!("response: {}", failure.message)),
            }
            if let Some(hint) = failure.hint {
                lines.push(format!("hint: {hint}"));
            }
        }
        None => lines.push("the node returned no result".into()),
    }
    if attempts > 1 {
        lines.push(format!("gave up after {attempts} attempts"));
    }
    lines.join("\n")
}

// ==============================================================================
// Retry Loop
// ==============================================================================

/// One lazily opened client plus the policy for retrying it.
struct Session {
    url: String,
    config: ClientConfig,
    attempts: u32,
    pause: Duration,
    handler: Arc<CliHandler>,
    signer: Arc<dyn Signer>,
    client: Option<Client>,
    stale: bool,
}

impl Session {
    fn new(args: &Cli, signer: Arc<dyn Signer>) -> Self {
        let timeout = Duration::from_secs(args.timeout);
        Self {
            url: args.url.clone(),
            config: ClientConfig {
                verify_tls: !args.insecure,
                timeout,
                debug: args.debug,
                ..ClientConfig::default()
            },
            attempts: args.reconnections.max(1),
            pause: timeout,
            handler: Arc::new(CliHandler::default()),
            signer,
            client: None,
            stale: false,
        }
    }

    /// Run `op`, retrying `Fail`/`Timeout` failures after a pause and a
    /// reconnect. Any other failure ends the loop at once.
    async fn run<T, F, Fut>(&mut self, what: &str, op: F) -> eyre::Result<T>
    where
        F: Fn(Client) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        self.attempt(what, self.attempts, op).await
    }

    async fn run_once<T, F, Fut>(&mut self, what: &str, op: F) -> eyre::Result<T>
    where
        F: Fn(Client) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        self.attempt(what, 1, op).await
    }

    async fn attempt<T, F, Fut>(&mut self, what: &str, attempts: u32, op: F) -> eyre::Result<T>
    where
        F: Fn(Client) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let mut attempt = 1;
        loop {
            self.handler.take();
            let outcome = match self.ready().await {
                Some(client) => op(client).await,
                None => None,
            };
            if let Some(value) = outcome {
                return Ok(value);
            }

            let failure = self.handler.take();
            let retryable = failure.as_ref().is_some_and(Failure::is_retryable);
            if !retryable || attempt >= attempts {
                return Err(eyre!(describe(what, &self.url, failure.as_ref(), attempt)));
            }

            warn!(
                attempt,
                attempts,
                pause_secs = self.pause.as_secs(),
                "{what} failed, reconnecting"
            );
            self.stale = true;
            tokio::time::sleep(self.pause).await;
            attempt += 1;
        }
    }

    /// The client to use for the next attempt, connecting or reconnecting
    /// as needed. Failures are already recorded by the handler.
    async fn ready(&mut self) -> Option<Client> {
        let client = match self.client.take() {
            None => Client::connect(&self.url, self.config.clone(), self.handler.clone())
                .await?
                .with_signer(self.signer.clone()),
            Some(client) if self.stale => {
                if !client.reconnect().await {
                    return None;
                }
                client
            }
            Some(client) => client,
        };
        self.stale = false;
        self.client = Some(client.clone());
        Some(client)
    }
}
