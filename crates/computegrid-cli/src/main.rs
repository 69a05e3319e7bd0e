//! ComputeGrid CLI - submit tasks to a dispatcher and run workflows locally.

mod demo;

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;
use tonic::Request;

use computegrid_core::{Precision, TaskEnvelope};
use computegrid_engine::{EngineConfig, StepInputs, WorkflowEngine};
use computegrid_kernels::{default_registry, MandelbrotArgs, PiArgs, MANDELBROT, MONTE_CARLO_PI};
use computegrid_proto::pb::{
    self, GetTaskResultRequest, LoginRequest, RegisterRequest, ServerStatusRequest,
    SubmitTaskRequest, TaskResult, ValidateTokenRequest,
};
use computegrid_proto::{DispatchServiceClient, IdentityServiceClient};

use demo::{DemoOptions, DEMO_WORKFLOW, MERGE_STEP};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// ComputeGrid CLI - dispatch and workflow tool
#[derive(Parser)]
#[command(name = "computegrid")]
#[command(about = "CLI for the ComputeGrid dispatcher", long_about = None)]
struct Cli {
    /// Dispatcher address
    #[arg(short, long, default_value = "http://[::1]:50051")]
    addr: String,

    /// Bearer token for dispatch calls
    #[arg(short, long, env = "COMPUTEGRID_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a Mandelbrot slice
    #[command(name = "submit-mandelbrot")]
    SubmitMandelbrot {
        #[arg(long, default_value = "80")]
        width: u32,

        #[arg(long, default_value = "40")]
        height: u32,

        #[arg(long, default_value = "-2.0", allow_hyphen_values = true)]
        min_re: f64,

        #[arg(long, default_value = "1.0", allow_hyphen_values = true)]
        max_re: f64,

        #[arg(long, default_value = "-1.0", allow_hyphen_values = true)]
        min_im: f64,

        #[arg(long, default_value = "1.0", allow_hyphen_values = true)]
        max_im: f64,

        #[arg(long, default_value = "200")]
        max_iterations: u32,

        /// Use the high-precision implementation
        #[arg(long)]
        high_precision: bool,

        /// Task id (generated by the dispatcher if omitted)
        #[arg(long)]
        task_id: Option<String>,

        /// Stream status updates until the task finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Submit a Monte Carlo pi batch
    #[command(name = "submit-pi")]
    SubmitPi {
        #[arg(short, long, default_value = "1000000")]
        samples: u64,

        /// Fixed seed for a reproducible batch
        #[arg(long)]
        seed: Option<u64>,

        /// Task id (generated by the dispatcher if omitted)
        #[arg(long)]
        task_id: Option<String>,

        /// Stream status updates until the task finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Get the current result of a task
    Result {
        /// Task ID
        id: String,
    },

    /// Stream status updates for a task until it finishes
    Watch {
        /// Task ID
        id: String,
    },

    /// Show dispatcher status
    Status,

    /// Register an account and print its token
    Register {
        username: String,
        password: String,

        #[arg(long)]
        role: Option<String>,
    },

    /// Log in and print a token
    Login {
        #[arg(default_value = "")]
        username: String,

        #[arg(default_value = "")]
        password: String,

        /// Token from an external identity provider
        #[arg(long)]
        external_token: Option<String>,
    },

    /// Check a token
    Validate {
        token: String,
    },

    /// Run the pi fan-out workflow on the local engine
    #[command(name = "demo-workflow")]
    DemoWorkflow {
        #[arg(short, long, default_value = "4")]
        batches: usize,

        #[arg(short, long, default_value = "250000")]
        samples: u64,

        /// Retries per step after the first attempt
        #[arg(short, long, default_value = "2")]
        retries: u32,

        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Maximum number of steps running at once
        #[arg(long)]
        max_parallel: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> CliResult {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let token = cli.token;

    match cli.command {
        Commands::DemoWorkflow {
            batches,
            samples,
            retries,
            timeout_ms,
            max_parallel,
        } => {
            let opts = DemoOptions {
                batches,
                samples_per_batch: samples,
                retries,
                timeout: timeout_ms.map(Duration::from_millis),
            };
            demo_workflow(opts, max_parallel).await?;
        }
        Commands::SubmitMandelbrot {
            width,
            height,
            min_re,
            max_re,
            min_im,
            max_im,
            max_iterations,
            high_precision,
            task_id,
            wait,
        } => {
            let precision = if high_precision {
                Precision::High
            } else {
                Precision::Standard
            };
            let args = MandelbrotArgs {
                width,
                height,
                min_re,
                max_re,
                min_im,
                max_im,
                max_iterations,
            };
            let envelope = TaskEnvelope::with_args(MANDELBROT, precision, &args)?;
            submit(connect(&cli.addr).await?, token.as_deref(), envelope, task_id, wait).await?;
        }
        Commands::SubmitPi {
            samples,
            seed,
            task_id,
            wait,
        } => {
            let envelope =
                TaskEnvelope::with_args(MONTE_CARLO_PI, Precision::Standard, &PiArgs { samples, seed })?;
            submit(connect(&cli.addr).await?, token.as_deref(), envelope, task_id, wait).await?;
        }
        Commands::Result { id } => {
            get_result(connect(&cli.addr).await?, token.as_deref(), id).await?;
        }
        Commands::Watch { id } => {
            watch(connect(&cli.addr).await?, token.as_deref(), id).await?;
        }
        Commands::Status => {
            server_status(connect(&cli.addr).await?, token.as_deref()).await?;
        }
        Commands::Register {
            username,
            password,
            role,
        } => {
            register(connect(&cli.addr).await?, username, password, role.unwrap_or_default()).await?;
        }
        Commands::Login {
            username,
            password,
            external_token,
        } => {
            login(connect(&cli.addr).await?, username, password, external_token).await?;
        }
        Commands::Validate { token } => {
            validate(connect(&cli.addr).await?, token).await?;
        }
    }

    Ok(())
}

async fn connect(addr: &str) -> CliResult<Channel> {
    Ok(Channel::from_shared(addr.to_string())?.connect().await?)
}

/// Wrap `message` in a request carrying the bearer token, if any.
fn authed<T>(message: T, token: Option<&str>) -> CliResult<Request<T>> {
    let mut request = Request::new(message);
    if let Some(token) = token {
        let value: MetadataValue<Ascii> = format!("Bearer {}", token).parse()?;
        request.metadata_mut().insert("authorization", value);
    }
    Ok(request)
}

async fn submit(
    channel: Channel,
    token: Option<&str>,
    envelope: TaskEnvelope,
    task_id: Option<String>,
    wait: bool,
) -> CliResult {
    let mut client = DispatchServiceClient::new(channel.clone());

    let request = SubmitTaskRequest {
        task_id: task_id.unwrap_or_default(),
        serialized_task: envelope.encode()?,
    };
    let ack = client.submit_task(authed(request, token)?).await?.into_inner();

    println!("Task submitted:");
    println!("  ID:         {}", ack.task_id);
    println!("  Status:     {}", ack.status().as_str_name());
    println!("  Message:    {}", ack.message);

    if wait {
        watch(channel, token, ack.task_id).await?;
    }
    Ok(())
}

async fn get_result(channel: Channel, token: Option<&str>, id: String) -> CliResult {
    let mut client = DispatchServiceClient::new(channel);

    let request = GetTaskResultRequest { task_id: id };
    let result = client
        .get_task_result(authed(request, token)?)
        .await?
        .into_inner();

    print_result(&result);
    Ok(())
}

async fn watch(channel: Channel, token: Option<&str>, id: String) -> CliResult {
    let mut client = DispatchServiceClient::new(channel);

    let request = GetTaskResultRequest { task_id: id };
    let mut stream = client
        .stream_results(authed(request, token)?)
        .await?
        .into_inner();

    let mut last = None;
    while let Some(update) = stream.message().await? {
        println!("  -> {}", update.status().as_str_name());
        last = Some(update);
    }

    match last {
        Some(result) => print_result(&result),
        None => println!("No updates received"),
    }
    Ok(())
}

async fn server_status(channel: Channel, token: Option<&str>) -> CliResult {
    let mut client = DispatchServiceClient::new(channel);

    let status = client
        .get_server_status(authed(ServerStatusRequest {}, token)?)
        .await?
        .into_inner();

    println!("Dispatcher {}:", status.version);
    println!(
        "  Workers:    {}  (queue capacity {})",
        status.worker_count, status.queue_capacity
    );
    println!(
        "  Tasks:      {} queued, {} running, {} completed, {} failed, {} rejected",
        status.queued, status.running, status.completed, status.failed, status.rejected
    );
    println!("  Task kinds:");
    for kind in &status.task_kinds {
        println!(
            "    - {:<16}  {}",
            kind.task_type,
            kind.precision().as_str_name()
        );
    }
    Ok(())
}

async fn register(channel: Channel, username: String, password: String, role: String) -> CliResult {
    let mut client = IdentityServiceClient::new(channel);

    let response = client
        .register(RegisterRequest {
            username,
            password,
            role,
        })
        .await?
        .into_inner();

    print_auth(&response);
    Ok(())
}

async fn login(
    channel: Channel,
    username: String,
    password: String,
    external_token: Option<String>,
) -> CliResult {
    let mut client = IdentityServiceClient::new(channel);

    let response = client
        .login(LoginRequest {
            username,
            password,
            external_token,
        })
        .await?
        .into_inner();

    print_auth(&response);
    Ok(())
}

async fn validate(channel: Channel, token: String) -> CliResult {
    let mut client = IdentityServiceClient::new(channel);

    let response = client
        .validate_token(ValidateTokenRequest { token })
        .await?
        .into_inner();

    if response.valid {
        println!("Token valid:");
        println!("  Username:   {}", response.username.unwrap_or_default());
        println!("  Role:       {}", response.role.unwrap_or_default());
    } else {
        println!("Token invalid");
    }
    Ok(())
}

async fn demo_workflow(opts: DemoOptions, max_parallel: Option<usize>) -> CliResult {
    let mut config = EngineConfig::default();
    if let Some(max_parallel) = max_parallel {
        config.max_parallel_steps = max_parallel.max(1);
    }
    let engine = WorkflowEngine::new(config);
    engine
        .register_workflow(demo::pi_workflow(&default_registry(), &opts)?)
        .await;

    let started = std::time::Instant::now();
    let ctx = engine.run(&DEMO_WORKFLOW.into(), StepInputs::new()).await?;
    let elapsed = started.elapsed();

    println!("Execution {}:", ctx.id());
    println!("  Status:     {:?}", ctx.status());
    println!("  Elapsed:    {:.2?}", elapsed);
    if let Some(error) = ctx.error() {
        println!("  Error:      {}", error);
    }

    println!("{:<12}  {:<10}  {:<8}  {}", "STEP", "STATUS", "ATTEMPTS", "ERROR");
    println!("{}", "-".repeat(60));
    for step_id in ctx.workflow().topological_order() {
        if let Some(record) = ctx.step_record(step_id) {
            println!(
                "{:<12}  {:<10}  {:<8}  {}",
                step_id.as_str(),
                format!("{:?}", record.status),
                record.attempts,
                record.error.unwrap_or_default()
            );
        }
    }

    if let Some(merged) = ctx.output(&MERGE_STEP.into()) {
        println!();
        println!("Result: {}", serde_json::to_string_pretty(&merged)?);
    }
    Ok(())
}

fn print_auth(response: &pb::AuthResponse) {
    if response.success {
        println!("{}", response.message);
        if let Some(token) = &response.token {
            println!("  Token:      {}", token);
        }
    } else {
        println!("Failed: {}", response.message);
    }
}

fn print_result(result: &TaskResult) {
    println!("  ID:         {}", result.task_id);
    println!("  Type:       {}", result.task_type);
    println!("  Status:     {}", result.status().as_str_name());
    if result.finished_at_ms > 0 {
        println!("  Finished:   {}", format_timestamp(result.finished_at_ms));
    }
    if !result.error_message.is_empty() {
        println!("  Error:      {}", result.error_message);
    }
    if !result.output.is_empty() {
        match serde_json::from_slice::<Value>(&result.output) {
            Ok(output) => println!("  Output:     {}", summarize_output(&output)),
            Err(_) => println!("  Output:     <{} bytes>", result.output.len()),
        }
    }
}

/// Escape-count grids are summarized rather than printed.
fn summarize_output(output: &Value) -> String {
    match output.get("escape_counts").and_then(Value::as_array) {
        Some(counts) => {
            let total: u64 = counts.iter().filter_map(Value::as_u64).sum();
            let mean = if counts.is_empty() {
                0.0
            } else {
                total as f64 / counts.len() as f64
            };
            format!(
                "{}x{} slice, mean escape count {:.1}",
                output["width"], output["height"], mean
            )
        }
        None => output.to_string(),
    }
}

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
