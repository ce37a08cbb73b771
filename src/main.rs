//! Storage Cluster Operator
//!
//! Runs the StorageCluster control loop against a Kubernetes cluster, or in
//! standalone mode against an in-memory object store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        storage-cluster-operator                      │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │  kube-runtime      │  │  Health server   │  │  Metrics server  │  │
//! │  │  Controller        │  │  /healthz /readyz│  │  /metrics        │  │
//! │  │  (or standalone)   │  │                  │  │                  │  │
//! │  └─────────┬──────────┘  └──────────────────┘  └──────────────────┘  │
//! │            │                                                         │
//! │  ┌─────────┴──────────────────────────────────────────────────────┐  │
//! │  │  Controller: SchemaInstaller → StorkComponent, teardown         │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use kube::{Client, CustomResourceExt, ResourceExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_cluster_operator::component::parse_kubernetes_version;
use storage_cluster_operator::config::{DEFAULT_NODE_WIPER_IMAGE, DEFAULT_NODE_WIPER_TAG};
use storage_cluster_operator::controller::runtime::{self, RuntimeContext};
use storage_cluster_operator::domain::ports::{EventSinkRef, ObjectStoreRef};
use storage_cluster_operator::{
    default_components, ComponentContext, Controller, DriverFactory, Error, KubeEventRecorder,
    KubeObjectStore, MemoryObjectStore, MemoryRecorder, Metrics, ObjectKey, OperatorConfig,
    Result, StorageCluster, StoreNodeWiper,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Cluster Operator - component lifecycle and teardown for StorageClusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Storage driver (portworx)
    #[arg(long, env = "STORAGE_DRIVER", default_value = "portworx")]
    driver: String,

    /// Re-sync interval for healthy clusters in seconds
    #[arg(long, env = "REQUEUE_SECS", default_value = "300")]
    requeue_secs: u64,

    /// How long to wait for the schema to become established in seconds
    #[arg(long, env = "SCHEMA_TIMEOUT_SECS", default_value = "60")]
    schema_timeout_secs: u64,

    /// How often to poll the schema status in seconds
    #[arg(long, env = "SCHEMA_INTERVAL_SECS", default_value = "5")]
    schema_interval_secs: u64,

    /// Node wiper image
    #[arg(long, env = "NODE_WIPER_IMAGE", default_value = DEFAULT_NODE_WIPER_IMAGE)]
    node_wiper_image: String,

    /// Node wiper image tag
    #[arg(long, env = "NODE_WIPER_TAG", default_value = DEFAULT_NODE_WIPER_TAG)]
    node_wiper_tag: String,

    /// Namespace for the node wiper (defaults to the cluster namespace)
    #[arg(long, env = "WIPER_NAMESPACE")]
    wiper_namespace: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// StorageCluster manifest loaded into the standalone store
    #[arg(long, env = "CLUSTER_FILE", requires = "standalone")]
    cluster_file: Option<String>,

    /// Kubernetes version assumed in standalone mode
    #[arg(long, env = "KUBE_VERSION", default_value = "1.29.0")]
    kube_version: String,

    /// Print the StorageCluster CRD as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            driver: self.driver.clone(),
            requeue_interval: Duration::from_secs(self.requeue_secs),
            schema_interval: Duration::from_secs(self.schema_interval_secs),
            schema_timeout: Duration::from_secs(self.schema_timeout_secs),
            node_wiper_image: self.node_wiper_image.clone(),
            node_wiper_tag: self.node_wiper_tag.clone(),
            wiper_namespace: self.wiper_namespace.clone(),
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print!("{}", serde_yaml::to_string(&StorageCluster::crd())?);
        return Ok(());
    }

    // Initialize logging
    init_logging(&args)?;

    let config = args.operator_config();
    info!("Starting Storage Cluster Operator");
    info!("  Version: {}", storage_cluster_operator::VERSION);
    info!("  Driver: {}", config.driver);
    info!("  Node wiper: {}:{}", config.node_wiper_image, config.node_wiper_tag);
    info!("  Standalone mode: {}", args.standalone);

    let ready = Arc::new(AtomicBool::new(false));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics = Metrics::register(prometheus::default_registry())?;
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    if args.standalone {
        run_standalone(&args, config, metrics, ready).await?;
    } else {
        run_kubernetes(config, metrics, ready).await?;
    }

    info!("Operator shutdown complete");
    Ok(())
}

/// Adapters chosen by the run mode
fn build_controller(
    config: &OperatorConfig,
    store: ObjectStoreRef,
    recorder: EventSinkRef,
    k8s_version: semver::Version,
    metrics: Metrics,
) -> Result<Controller> {
    let wiper = Arc::new(StoreNodeWiper::new(
        store.clone(),
        config.wiper_namespace.clone(),
    ));
    let driver = DriverFactory::create(&config.driver, wiper, config)?;
    let ctx = ComponentContext {
        store,
        k8s_version,
        recorder,
        driver,
    };
    Ok(Controller::new(default_components(config)?, ctx, metrics))
}

async fn run_kubernetes(
    config: OperatorConfig,
    metrics: Metrics,
    ready: Arc<AtomicBool>,
) -> Result<()> {
    let client = Client::try_default().await?;
    let server = client.apiserver_version().await?;
    let k8s_version = parse_kubernetes_version(&server.git_version)?;
    info!("Connected to Kubernetes {}", k8s_version);

    let store: ObjectStoreRef = Arc::new(KubeObjectStore::new(client.clone()));
    let recorder: EventSinkRef = Arc::new(KubeEventRecorder::new(
        client.clone(),
        &config.controller_name,
    ));
    let controller = build_controller(&config, store, recorder, k8s_version, metrics)?;

    let ctx = Arc::new(RuntimeContext {
        controller: Arc::new(controller),
        requeue_interval: config.requeue_interval,
    });
    ready.store(true, Ordering::SeqCst);
    runtime::run(client, ctx).await
}

async fn run_standalone(
    args: &Args,
    config: OperatorConfig,
    metrics: Metrics,
    ready: Arc<AtomicBool>,
) -> Result<()> {
    let store = Arc::new(MemoryObjectStore::new());
    if let Some(path) = &args.cluster_file {
        let manifest = std::fs::read_to_string(path)?;
        let cluster: StorageCluster = serde_yaml::from_str(&manifest)?;
        info!("Loaded StorageCluster {} from {}", cluster.name_any(), path);
        store.seed(
            ObjectKey::of::<StorageCluster>(cluster.name_any(), cluster.namespace().as_deref()),
            &cluster,
        )?;
    }

    let k8s_version = parse_kubernetes_version(&args.kube_version)?;
    let recorder: EventSinkRef = Arc::new(MemoryRecorder::new());
    let controller = build_controller(&config, store.clone(), recorder, k8s_version, metrics)?;

    ready.store(true, Ordering::SeqCst);
    runtime::run_standalone(Arc::new(controller), store, config.requeue_interval).await
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directives = format!(
        "{},hyper=warn,kube=info,tower=warn",
        level.as_str().to_lowercase()
    );
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .map_err(|e| Error::Configuration(format!("Invalid log filter: {}", e)))?;

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::Body>,
) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready => text_response(StatusCode::OK, "ok"),
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            let mut response = text_response(StatusCode::OK, buffer);
                            if let Ok(value) = encoder.format_type().parse() {
                                response
                                    .headers_mut()
                                    .insert(hyper::header::CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
