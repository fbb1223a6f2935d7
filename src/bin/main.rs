use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use toolhub::{
    CallerContext, CallerExtractor, Dispatched, Dispatcher, InvocationRequest, McpServer,
    PermissionTag, ServerConfig, create_dispatcher, load_config,
};

// rmcp imports for MCP stdio server mode
use rmcp::service::ServiceExt;
use rmcp::transport::stdio;

#[derive(Parser)]
#[command(name = "toolhub")]
#[command(about = "Tool registry and invocation dispatcher")]
struct Cli {
    /// Path to toolhub.json (defaults to TOOLHUB_CONFIG, XDG, then ./toolhub.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST server (public API plus admin API)
    Serve {
        #[arg(long, env = "TOOLHUB_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
        /// Bind address for the admin API (internal / trusted only)
        #[arg(long, env = "TOOLHUB_ADMIN_BIND", default_value = "127.0.0.1:8081")]
        admin_bind: String,
    },
    /// Run as an MCP stdio server (for use in mcp.json)
    McpStdio,
    /// Run as an MCP HTTP server
    McpHttp {
        /// Bind address, e.g. 0.0.0.0:3942
        #[arg(long, env = "TOOLHUB_MCP_BIND", default_value = "0.0.0.0:3942")]
        bind: String,
    },
    /// List enabled tools
    ListTools {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },
    /// Invoke a tool locally and print its envelopes as JSON lines
    Call {
        tool: String,
        /// Tool parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
        /// Request streaming output
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
    /// Generate a new API key and print its config entry
    GenerateApiKey {
        /// Caller name reported for this key
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "public")]
        permission: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for MCP stdio and `call` output.
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command {
        Commands::GenerateApiKey { name, permission } => {
            let permission = PermissionTag::parse(&permission)
                .ok_or_else(|| anyhow::anyhow!("Unknown permission level: {}", permission))?;
            let (key, hash) = toolhub::auth::generate_api_key();
            println!("API key (shown once): {}", key);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "name": name,
                    "keySha256": hash,
                    "permission": permission,
                }))?
            );
        }
        Commands::Serve { bind, admin_bind } => {
            let (config, dispatcher) = setup(config_path.as_deref())?;
            let state =
                toolhub::api::AppState::new(dispatcher, CallerExtractor::from_config(&config));
            let public_app = toolhub::api::create_public_router(state.clone());
            let admin_app = toolhub::api::create_admin_router(state);

            let public_listener = tokio::net::TcpListener::bind(&bind).await?;
            let admin_listener = tokio::net::TcpListener::bind(&admin_bind).await?;

            info!("Public server listening on http://{}", bind);
            info!("Admin server listening on http://{}", admin_bind);

            tokio::try_join!(
                axum::serve(public_listener, public_app),
                axum::serve(admin_listener, admin_app),
            )?;
        }
        Commands::McpStdio => {
            let (_, dispatcher) = setup(config_path.as_deref())?;
            info!("Starting MCP stdio server (rmcp)");

            // Run as an MCP stdio server. McpServer implements ServerHandler.
            let service = McpServer::new(dispatcher)
                .serve(stdio())
                .await
                .inspect_err(|e| tracing::error!("serving error: {:?}", e))?;

            // Block until the MCP session ends.
            service.waiting().await?;
            info!("MCP stdio server session ended");
        }
        Commands::McpHttp { bind } => {
            let (config, dispatcher) = setup(config_path.as_deref())?;
            info!("Starting MCP HTTP server (rmcp) on {}", bind);
            let extractor = CallerExtractor::from_config(&config);
            toolhub::server::start_mcp_http(dispatcher, extractor, &bind).await?;
        }
        Commands::ListTools { category, tag } => {
            let (_, dispatcher) = setup(config_path.as_deref())?;
            let filter = toolhub::tools::ToolFilter {
                category,
                tag,
                permission: None,
            };
            let tools = dispatcher.registry().read().await.enumerate(&filter);

            println!("Found {} tools:", tools.len());
            for tool in tools {
                println!("  {} [{}]", tool.name, tool.permission);
                println!("    {}", tool.description);
                if tool.streaming {
                    println!("    streaming");
                }
            }
        }
        Commands::Call {
            tool,
            params,
            stream,
        } => {
            let (_, dispatcher) = setup(config_path.as_deref())?;
            let parameters: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&params)
                    .map_err(|e| anyhow::anyhow!("--params must be a JSON object: {}", e))?;
            let mut request = InvocationRequest::new(tool, parameters);
            if stream {
                request = request.streaming();
            }

            // The local operator holds every permission.
            let caller = CallerContext::local_admin();
            let (tx, mut rx) = mpsc::channel(dispatcher.stream_buffer());
            let outcome = dispatcher.dispatch(request, &caller, tx).await;

            let mut failed = false;
            while let Some(envelope) = rx.recv().await {
                failed |= envelope.failure_code().is_some() || envelope.is_tool_error();
                println!("{}", serde_json::to_string(&envelope)?);
            }
            if let Dispatched::Streaming(handle) = outcome {
                handle.await?;
            }
            if failed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

const DEFAULT_LOG_FILTER: &str = "toolhub=info,rmcp=warn";

/// `RUST_LOG` when set and valid, the crate defaults otherwise.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Load the config and build the dispatcher it describes.
fn setup(config_path: Option<&Path>) -> Result<(ServerConfig, Dispatcher)> {
    let config = load_config(config_path)?;
    let dispatcher = create_dispatcher(&config)?;
    Ok((config, dispatcher))
}
