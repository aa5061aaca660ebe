use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use gridjob::config::{RefreshConfig, ServiceConfig, ShellConfig};
use gridjob::server::GridServer;
use gridjob::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "gridjob")]
#[command(version)]
#[command(about = "Lease-based job execution service")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the job service
    Server(ServerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Show service status
    Status {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on for the job API
    #[arg(long, default_value = "64989")]
    port: u16,

    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Deadline for Execute requests in milliseconds
    #[arg(long, default_value = "30000")]
    execute_timeout_ms: u64,

    /// Shell used to run scripts
    #[arg(long, default_value = "sh")]
    shell: String,

    /// Run jobs in the current directory instead of a private scratch directory
    #[arg(long)]
    no_scratch: bool,

    /// Parent directory for job scratch directories
    #[arg(long)]
    scratch_root: Option<PathBuf>,

    // === Security refresh ===
    /// Base URL of the security data API (refresh disabled when unset)
    #[arg(long)]
    refresh_base_url: Option<String>,

    /// API key sent with refresh requests
    #[arg(long, default_value = "")]
    api_key: String,

    /// Seconds between refresh passes
    #[arg(long, default_value = "300")]
    refresh_interval: u64,
}

// =============================================================================
// Client Arguments (shared by job and status commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:64989")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Args, Debug)]
struct ScriptArgs {
    /// Script source, or an http(s) URL to download it from
    script: String,

    /// Script name
    #[arg(long, default_value = "script")]
    name: String,

    /// Arguments passed to the script
    #[arg(long = "arg")]
    arguments: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct JobSpecArgs {
    /// Job ID (generated when omitted)
    #[arg(long)]
    job_id: Option<String>,

    /// Lease in seconds
    #[arg(long, short = 'l', default_value = "60")]
    lease: f64,

    #[arg(long, default_value = "0")]
    category: i32,

    #[arg(long, default_value = "1")]
    cores: f64,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Open a job and run its first script
    Open {
        #[command(flatten)]
        job: JobSpecArgs,
        #[command(flatten)]
        script: ScriptArgs,
    },
    /// Run a script on an open job
    Execute {
        job_id: String,
        #[command(flatten)]
        script: ScriptArgs,
    },
    /// Close a job
    Close { job_id: String },
    /// Open a job, run one script and close it again
    Batch {
        #[command(flatten)]
        job: JobSpecArgs,
        #[command(flatten)]
        script: ScriptArgs,
    },
    /// Reset a job's lease
    Renew {
        job_id: String,
        /// New lease in seconds
        lease: f64,
    },
    /// Seconds left on a job's lease
    Expiration { job_id: String },
    /// List all open jobs
    List,
    /// Close every job whose lease ran out
    CloseExpired,
    /// Close every open job
    CloseAll,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn job_body(job: JobSpecArgs) -> Value {
    let id = job
        .job_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    json!({
        "id": id,
        "expirationInSeconds": job.lease,
        "category": job.category,
        "cores": job.cores,
    })
}

fn script_body(script: ScriptArgs) -> Value {
    json!({
        "name": script.name,
        "script": script.script,
        "arguments": script.arguments,
    })
}

/// POST a request to the job API. Error responses exit the process.
async fn call(
    client: &ClientArgs,
    operation: &str,
    body: Value,
) -> Result<Value, Box<dyn std::error::Error>> {
    let url = format!("{}/{}", client.addr.trim_end_matches('/'), operation);
    let response = reqwest::Client::new().post(&url).json(&body).send().await?;
    let status = response.status();
    let payload: Value = response.json().await?;

    if !status.is_success() {
        let message = payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        eprintln!("Error: {} failed ({}): {}", operation, status, message);
        std::process::exit(1);
    }
    Ok(payload)
}

fn print_result(payload: &Value, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(payload)?),
        OutputFormat::Table => match payload.get("result") {
            Some(Value::Array(values)) => {
                for value in values {
                    match value {
                        Value::String(line) => println!("{}", line),
                        other => println!("{}", other),
                    }
                }
            }
            Some(Value::Null) | None => println!("OK"),
            Some(other) => println!("{}", other),
        },
    }
    Ok(())
}

fn print_job_list(payload: &Value, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    if let OutputFormat::Json = output_format {
        println!("{}", serde_json::to_string_pretty(payload)?);
        return Ok(());
    }

    let jobs = payload
        .get("result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if jobs.is_empty() {
        println!("No jobs open.");
        return Ok(());
    }

    println!("{:<38} {:>10} {:>8} {:>6}", "JOB ID", "EXPIRES IN", "CATEGORY", "CORES");
    println!("{}", "-".repeat(65));
    for job in &jobs {
        println!(
            "{:<38} {:>10.1} {:>8} {:>6}",
            job.get("id").and_then(Value::as_str).unwrap_or("-"),
            job.get("expirationInSeconds").and_then(Value::as_f64).unwrap_or(0.0),
            job.get("category").and_then(Value::as_i64).unwrap_or(0),
            job.get("cores").and_then(Value::as_f64).unwrap_or(0.0),
        );
    }
    println!();
    println!("{} job(s) open", jobs.len());
    Ok(())
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig {
        execute_timeout_ms: args.execute_timeout_ms,
        shell: ShellConfig {
            program: args.shell,
            scratch_dir: !args.no_scratch,
            scratch_root: args.scratch_root,
        },
        refresh: RefreshConfig {
            base_url: args.refresh_base_url,
            api_key: args.api_key,
            interval_secs: args.refresh_interval,
            ..RefreshConfig::default()
        },
        ..ServiceConfig::new(SocketAddr::new(args.bind, args.port))
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        execute_timeout_ms = config.execute_timeout_ms,
        shell = %config.shell.program,
        refresh_enabled = config.refresh.is_enabled(),
        "Starting gridjob service"
    );

    let shutdown = install_shutdown_handler();
    GridServer::new(config).run(shutdown).await
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_command(
    client: &ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        JobCommands::Open { job, script } => {
            let payload = call(
                client,
                "OpenJob",
                json!({ "job": job_body(job), "script": script_body(script) }),
            )
            .await?;
            if let OutputFormat::Table = client.output {
                if let Some(id) = payload.get("jobId").and_then(Value::as_str) {
                    println!("Job ID: {}", id);
                }
            }
            print_result(&payload, &client.output)
        }
        JobCommands::Execute { job_id, script } => {
            let payload = call(
                client,
                "Execute",
                json!({ "jobId": job_id, "script": script_body(script) }),
            )
            .await?;
            print_result(&payload, &client.output)
        }
        JobCommands::Close { job_id } => {
            let payload = call(client, "CloseJob", json!({ "jobId": job_id })).await?;
            print_result(&payload, &client.output)
        }
        JobCommands::Batch { job, script } => {
            let payload = call(
                client,
                "BatchJob",
                json!({ "job": job_body(job), "script": script_body(script) }),
            )
            .await?;
            print_result(&payload, &client.output)
        }
        JobCommands::Renew { job_id, lease } => {
            let payload = call(
                client,
                "RenewLease",
                json!({ "jobId": job_id, "expirationInSeconds": lease }),
            )
            .await?;
            print_result(&payload, &client.output)
        }
        JobCommands::Expiration { job_id } => {
            let payload = call(client, "GetExpiration", json!({ "jobId": job_id })).await?;
            print_result(&payload, &client.output)
        }
        JobCommands::List => {
            let payload = call(client, "GetAllJobs", json!({})).await?;
            print_job_list(&payload, &client.output)
        }
        JobCommands::CloseExpired => {
            let payload = call(client, "CloseExpiredJobs", json!({})).await?;
            print_result(&payload, &client.output)
        }
        JobCommands::CloseAll => {
            let payload = call(client, "CloseAllJobs", json!({})).await?;
            print_result(&payload, &client.output)
        }
    }
}

async fn handle_status(client: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let payload = call(client, "GetStatus", json!({})).await?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&payload)?),
        OutputFormat::Table => {
            let result = payload.get("result").cloned().unwrap_or(Value::Null);
            println!("Service Status");
            println!("{}", "=".repeat(40));
            for (label, key) in [
                ("Version", "version"),
                ("Open jobs", "environmentCount"),
                ("Liveness reporting", "livenessReporting"),
                ("Heartbeats", "beats"),
                ("Last beat (ms ago)", "lastBeatAgeMs"),
                ("Security versions", "securityVersions"),
                ("Content hashes", "contentHashes"),
                ("Mem hash configs", "memHashConfigs"),
            ] {
                let value = match result.get(key) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => "-".to_string(),
                };
                println!("{:<20} {}", format!("{}:", label), value);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => {
            handle_job_command(&client, command).await?;
        }
        Commands::Status { client } => {
            handle_status(&client).await?;
        }
    }

    Ok(())
}
