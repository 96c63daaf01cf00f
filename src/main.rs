use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use tilefarm::config::{default_capacity, ControllerConfig, RenderDefaults, WorkerConfig};
use tilefarm::grpc::MAX_IMAGE_MESSAGE_BYTES;
use tilefarm::node::ControllerNode;
use tilefarm::proto::controller_client::ControllerClient;
use tilefarm::proto::{Empty, ImageRequest, RenderRequest, RenderStatus};
use tilefarm::shutdown::install_shutdown_handler;
use tilefarm::storage::LATEST;
use tilefarm::worker::{TestPatternRenderer, WorkerNode};

#[derive(Parser, Debug)]
#[command(name = "tilefarm")]
#[command(version)]
#[command(about = "A distributed tile renderer")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the controller
    Controller(ControllerArgs),

    /// Start a worker and register it with a controller
    Worker(WorkerArgs),

    /// Render commands
    Render {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: RenderCommands,
    },

    /// Worker fleet commands
    Workers {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: WorkersCommands,
    },

    /// Rendered image commands
    Images {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ImagesCommands,
    },
}

// =============================================================================
// Process Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Port to listen on for gRPC
    #[arg(long, env = "PORT", default_value = "5000")]
    port: u16,

    /// Directory finished renders are written to
    #[arg(long, default_value = "renders")]
    output_dir: PathBuf,

    /// Port for the JSON status dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Worker link probe interval in milliseconds (0 disables probing)
    #[arg(long, default_value = "1000")]
    probe_interval_ms: u64,

    /// Upper bound on connect + ping when a worker registers
    #[arg(long, default_value = "5000")]
    handshake_timeout_ms: u64,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Port to listen on for controller callbacks
    #[arg(long, env = "PORT", default_value = "4400")]
    port: u16,

    /// Hostname the controller uses to reach this worker
    #[arg(long, env = "HOSTNAME", default_value = "localhost")]
    hostname: String,

    /// Maximum tiles rendered concurrently (defaults to the core count)
    #[arg(long, env = "MAX_JOBS")]
    max_jobs: Option<u32>,

    /// Controller address
    #[arg(long, env = "CONTROLLER_ADDR", default_value = "http://localhost:5000")]
    controller: String,
}

// =============================================================================
// Client Arguments (shared by render, workers and images commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Controller address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:5000")]
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

#[derive(clap::Subcommand, Debug)]
enum RenderCommands {
    /// Partition an image into tiles and farm them out
    Start {
        /// Scene description file passed through to workers
        #[arg(long)]
        scene: Option<PathBuf>,

        #[arg(long, default_value_t = RenderDefaults::default().width)]
        width: u32,

        #[arg(long, default_value_t = RenderDefaults::default().aspect_ratio)]
        aspect_ratio: f64,

        #[arg(long, default_value_t = RenderDefaults::default().samples_per_pixel)]
        samples: u32,

        #[arg(long, default_value_t = RenderDefaults::default().max_depth)]
        max_depth: u32,

        /// Number of horizontal tiles
        #[arg(long, default_value_t = RenderDefaults::default().slice_count)]
        slices: u32,
    },
    /// Show progress of the current render
    Progress,
}

#[derive(clap::Subcommand, Debug)]
enum WorkersCommands {
    /// List registered workers
    List,
}

#[derive(clap::Subcommand, Debug)]
enum ImagesCommands {
    /// List rendered images, newest first
    List,
    /// Download a rendered image
    Get {
        /// Image name, or "latest"
        #[arg(default_value = LATEST)]
        name: String,

        /// Where to write the image (defaults to its name)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RenderStartedOutput {
    total_tiles: u32,
    queued: u32,
}

#[derive(Serialize)]
struct ProgressOutput {
    status: String,
    total: u32,
    completed: u32,
    queued: u32,
    stranded: u32,
}

#[derive(Serialize)]
struct WorkerOutput {
    id: String,
    host: String,
    port: u32,
    max_jobs: u32,
}

#[derive(Serialize)]
struct ImageListOutput {
    images: Vec<String>,
}

#[derive(Serialize)]
struct ImageSavedOutput {
    name: String,
    path: String,
    bytes: usize,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn render_status_to_string(status: i32) -> String {
    match RenderStatus::try_from(status) {
        Ok(RenderStatus::Ready) => "READY".to_string(),
        Ok(RenderStatus::Started) => "STARTED".to_string(),
        Ok(RenderStatus::Complete) => "COMPLETE".to_string(),
        Ok(RenderStatus::Failed) => "FAILED".to_string(),
        _ => "UNKNOWN".to_string(),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn connect(args: &ClientArgs) -> Result<ControllerClient<Channel>, Box<dyn std::error::Error>> {
    let channel = Channel::from_shared(args.addr.clone())?.connect().await?;
    Ok(ControllerClient::new(channel).max_decoding_message_size(MAX_IMAGE_MESSAGE_BYTES))
}

// =============================================================================
// Process Implementations
// =============================================================================

async fn run_controller(args: ControllerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let dashboard_addr: Option<SocketAddr> = match args.dashboard_port {
        Some(p) => Some(format!("0.0.0.0:{}", p).parse()?),
        None => None,
    };

    let config = ControllerConfig {
        dashboard_addr,
        handshake_timeout_ms: args.handshake_timeout_ms,
        ..ControllerConfig::new(listen_addr, args.output_dir)
    }
    .with_probe_interval_ms(args.probe_interval_ms);

    tracing::info!(
        listen_addr = %config.listen_addr,
        dashboard_addr = ?config.dashboard_addr,
        output_dir = %config.output_dir.display(),
        "Starting tilefarm controller"
    );

    let shutdown = install_shutdown_handler()?;
    ControllerNode::new(config)
        .run(shutdown)
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)?;
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = WorkerConfig {
        listen_addr: format!("0.0.0.0:{}", args.port).parse()?,
        advertise_host: args.hostname,
        controller_addr: args.controller,
        capacity: args.max_jobs.filter(|n| *n > 0).unwrap_or_else(default_capacity),
        ..WorkerConfig::default()
    };

    tracing::info!(
        worker_id = %config.worker_id(),
        listen_addr = %config.listen_addr,
        controller = %config.controller_addr,
        capacity = config.capacity,
        "Starting tilefarm worker"
    );

    let shutdown = install_shutdown_handler()?;
    WorkerNode::new(config, Arc::new(TestPatternRenderer))
        .run(shutdown)
        .await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_render_start(
    client: &mut ControllerClient<Channel>,
    request: RenderRequest,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(status) = client.start_render(request).await {
        eprintln!("Error: Failed to start render: {}", status.message());
        if status.code() == tonic::Code::FailedPrecondition {
            eprintln!("Hint: start at least one worker first, e.g.:");
            eprintln!("  tilefarm worker --controller http://<controller-ip>:5000");
        }
        std::process::exit(1);
    }

    let progress = client.get_progress(Empty {}).await?.into_inner();
    match output_format {
        OutputFormat::Json => {
            let output = RenderStartedOutput {
                total_tiles: progress.total_jobs,
                queued: progress.queued_jobs,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Render started!");
            println!(
                "Tiles: {} ({} waiting for a free worker)",
                progress.total_jobs, progress.queued_jobs
            );
        }
    }
    Ok(())
}

async fn handle_render_progress(
    client: &mut ControllerClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let progress = client.get_progress(Empty {}).await?.into_inner();
    let output = ProgressOutput {
        status: render_status_to_string(progress.status),
        total: progress.total_jobs,
        completed: progress.completed_jobs,
        queued: progress.queued_jobs,
        stranded: progress.stranded_jobs,
    };

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            let percent = if output.total > 0 {
                output.completed as f64 * 100.0 / output.total as f64
            } else {
                0.0
            };
            println!("Status:    {}", output.status);
            println!(
                "Completed: {}/{} ({:.1}%)",
                output.completed, output.total, percent
            );
            println!("Queued:    {}", output.queued);
            if output.stranded > 0 {
                println!("Stranded:  {}", output.stranded);
            }
        }
    }
    Ok(())
}

async fn handle_workers_list(
    client: &mut ControllerClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let workers: Vec<WorkerOutput> = client
        .get_workers(Empty {})
        .await?
        .into_inner()
        .workers
        .into_iter()
        .map(|w| WorkerOutput {
            id: w.id,
            host: w.host,
            port: w.port,
            max_jobs: w.max_jobs,
        })
        .collect();

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&workers)?),
        OutputFormat::Table => {
            if workers.is_empty() {
                println!("No workers registered.");
            } else {
                println!("{:<10} {:<30} MAX JOBS", "ID", "ADDRESS");
                println!("{}", "-".repeat(50));
                for w in &workers {
                    println!(
                        "{:<10} {:<30} {}",
                        w.id,
                        format!("{}:{}", w.host, w.port),
                        w.max_jobs
                    );
                }
                println!();
                println!("{} worker(s) online", workers.len());
            }
        }
    }
    Ok(())
}

async fn handle_images_list(
    client: &mut ControllerClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let images = client
        .list_rendered_images(Empty {})
        .await?
        .into_inner()
        .images;

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&ImageListOutput { images })?)
        }
        OutputFormat::Table => {
            if images.is_empty() {
                println!("No rendered images.");
            } else {
                for name in &images {
                    println!("{}", name);
                }
            }
        }
    }
    Ok(())
}

async fn handle_images_get(
    client: &mut ControllerClient<Channel>,
    name: String,
    out: Option<PathBuf>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = match client.get_rendered_image(ImageRequest { name }).await {
        Ok(response) => response.into_inner(),
        Err(status) => {
            eprintln!("Error: {}", status.message());
            std::process::exit(1);
        }
    };

    let path = out.unwrap_or_else(|| PathBuf::from(&image.name));
    tokio::fs::write(&path, &image.data).await?;

    match output_format {
        OutputFormat::Json => {
            let output = ImageSavedOutput {
                name: image.name,
                path: path.display().to_string(),
                bytes: image.data.len(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!(
                "Saved {} ({} bytes) to {}",
                image.name,
                image.data.len(),
                path.display()
            );
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
        Commands::Controller(controller_args) => {
            run_controller(controller_args).await?;
        }
        Commands::Worker(worker_args) => {
            run_worker(worker_args).await?;
        }
        Commands::Render { client, command } => {
            let mut grpc_client = connect(&client).await?;

            match command {
                RenderCommands::Start {
                    scene,
                    width,
                    aspect_ratio,
                    samples,
                    max_depth,
                    slices,
                } => {
                    let scene_data = match scene {
                        Some(path) => tokio::fs::read_to_string(path).await?,
                        None => String::new(),
                    };
                    let request = RenderRequest {
                        scene_data,
                        width,
                        aspect_ratio,
                        samples_per_pixel: samples,
                        max_depth,
                        slice_count: slices,
                    };
                    handle_render_start(&mut grpc_client, request, &client.output).await?;
                }
                RenderCommands::Progress => {
                    handle_render_progress(&mut grpc_client, &client.output).await?;
                }
            }
        }
        Commands::Workers { client, command } => {
            let mut grpc_client = connect(&client).await?;

            match command {
                WorkersCommands::List => {
                    handle_workers_list(&mut grpc_client, &client.output).await?;
                }
            }
        }
        Commands::Images { client, command } => {
            let mut grpc_client = connect(&client).await?;

            match command {
                ImagesCommands::List => {
                    handle_images_list(&mut grpc_client, &client.output).await?;
                }
                ImagesCommands::Get { name, out } => {
                    handle_images_get(&mut grpc_client, name, out, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}
