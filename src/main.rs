mod client;
mod config;
mod middleware;
mod page;
mod presets;
mod provider;
mod routes;
mod selector;
mod utils;


#[macro_use]
extern crate tracing;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgEnum, Parser, Subcommand};
use mimalloc::MiMalloc;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::{get, Endpoint, EndpointExt, Route, Server};
use poem_openapi::OpenApiService;
use strum::Display;
use tracing_subscriber::EnvFilter;

use crate::client::{DirectoryTarget, ProxyClient};
use crate::config::{ConfigTemplate, ProviderCredentials};
use crate::middleware::BodyLimit;
use crate::presets::SocialFormat;
use crate::provider::cloudinary::CloudinaryBackend;
use crate::provider::ImageService;
use crate::routes::SocialApi;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Debug, Copy, Clone, ArgEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Parser)]
#[clap(author, version, about = "Crop images to social media formats via Cloudinary.")]
pub struct Cli {
    #[clap(long, arg_enum, env, default_value = "info")]
    /// The log level to filter logs by.
    ///
    /// `RUST_LOG` takes precedence if set.
    log_level: LogLevel,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the upload proxy and serves the converter page.
    Run(RunArgs),

    /// Writes a template config file.
    Init(InitArgs),

    /// Uploads, crops and downloads a single image through a running proxy.
    Convert(ConvertArgs),
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    #[clap(long, env, default_value = "127.0.0.1")]
    /// The binding host address of the server.
    host: String,

    #[clap(long, env, default_value = "8000")]
    port: u16,

    #[clap(long, env)]
    /// The external URL that would be used to access the server if applicable.
    ///
    /// This only affects the documentation.
    docs_url: Option<String>,

    #[clap(long, env)]
    /// The file path to a given config file, either `yaml` or `json`.
    ///
    /// The defaults are used if this is not given.
    config_file: Option<PathBuf>,

    #[clap(long, env = "CLOUDINARY_CLOUD_NAME", hide_env_values = true)]
    cloud_name: String,

    #[clap(long, env = "CLOUDINARY_API_KEY", hide_env_values = true)]
    api_key: String,

    #[clap(long, env = "CLOUDINARY_API_SECRET", hide_env_values = true)]
    api_secret: String,
}

#[derive(Debug, clap::Args)]
pub struct InitArgs {
    #[clap(long, default_value = "config.yaml")]
    /// Where to write the template to.
    output: PathBuf,
}

#[derive(Debug, clap::Args)]
pub struct ConvertArgs {
    #[clap(long, env = "PROXY_URL", default_value = "http://127.0.0.1:8000")]
    /// The base url of a running proxy.
    server: String,

    #[clap(long, default_value = "instagram square (1:1)")]
    /// The label of the preset to crop to.
    preset: SocialFormat,

    #[clap(long, default_value = ".")]
    /// The directory the rendering is downloaded into.
    output: PathBuf,

    /// The image to convert.
    file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},poem=info", args.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Command::Run(args) => run_server(args).await,
        Command::Init(args) => run_init(args).await,
        Command::Convert(args) => run_convert(args).await,
    }
}

async fn run_server(args: RunArgs) -> Result<()> {
    config::init(args.config_file.as_deref()).await?;

    let credentials = ProviderCredentials::new(args.cloud_name, args.api_key, args.api_secret)?;
    let service: Arc<dyn ImageService> = Arc::new(CloudinaryBackend::new(
        credentials,
        &config::config().provider,
    )?);

    let bind: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let docs_url = args
        .docs_url
        .unwrap_or_else(|| format!("http://{}/api", bind));

    let app = app(service, &docs_url);

    info!("Converter page available @ http://{}/", bind);
    info!("API docs available @ http://{}/docs", bind);
    Server::new(TcpListener::bind(bind)).run(app).await?;

    Ok(())
}

async fn run_init(args: InitArgs) -> Result<()> {
    let out = serde_yaml::to_string(&ConfigTemplate::new())?;
    tokio::fs::write(&args.output, out).await?;

    info!("Template config written to {:?}", &args.output);
    Ok(())
}

async fn run_convert(args: ConvertArgs) -> Result<()> {
    let client = ProxyClient::new(&args.server)?;
    let target = DirectoryTarget::new(args.output);

    let saved = client::convert(&client, &args.file, args.preset, &target).await?;

    info!(preset = args.preset.label(), "Rendering saved to {:?}", saved);
    Ok(())
}

/// Builds the full application.
///
/// The runtime config must be initialised before this is called.
pub fn app(service: Arc<dyn ImageService>, docs_url: &str) -> impl Endpoint {
    let api_service = OpenApiService::new(
        SocialApi::new(service),
        "Social Format API",
        env!("CARGO_PKG_VERSION"),
    )
    .server(docs_url);

    let docs = api_service.redoc();

    Route::new()
        .at("/", get(page::index))
        .nest("/api", api_service)
        .nest("/docs", docs)
        .with(BodyLimit::new(config::config().max_upload_size))
        .with(Tracing)
}
