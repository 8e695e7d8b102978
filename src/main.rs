use log::{error, info, warn};
use pingora_core::server::configuration::Opt;
use pingora_core::server::Server;
use pingora_proxy::http_proxy_service;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

use chutes_proxy::config::*;
use chutes_proxy::proxy::ChutesProxy;
use chutes_proxy::router::ModelRouter;
use chutes_proxy::selector::UtilizationRouting;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "chutes-proxy",
    about = "OpenAI-compatible proxy routing to the least utilized Chutes deployment"
)]
struct Args {
    #[structopt(short = "p", long = "port", help = "Port to run the proxy on (default: 4000)")]
    port: Option<u16>,

    #[structopt(long = "host", help = "Host to bind to (default: 0.0.0.0)")]
    host: Option<String>,

    #[structopt(long = "config", help = "Path to litellm-config.yaml")]
    config: Option<String>,

    #[structopt(long = "cache-ttl", help = "Cache TTL in seconds for utilization data")]
    cache_ttl: Option<u64>,

    #[structopt(long = "debug", help = "Enable debug logging")]
    debug: bool,

    #[structopt(short = "c", long = "conf", help = "Path to pingora server configuration file")]
    conf: Option<String>,
}

fn main() {
    dotenvy::dotenv().ok();
    let args = Args::from_args();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let api_key = match load_api_key() {
        Some(key) => key,
        None => {
            error!("❌ CHUTES_API_KEY environment variable is required");
            std::process::exit(1);
        }
    };

    let master_key = load_master_key();
    if master_key.is_none() {
        warn!("⚠️ LITELLM_MASTER_KEY not set, proxy will not be secured");
    }

    let config_path = get_config_path(args.config);
    let model_list = load_model_list(Path::new(&config_path), Some(&api_key));

    let mut routing_config = RoutingConfig::from_env().with_api_key(api_key);
    if let Some(ttl) = args.cache_ttl {
        routing_config = routing_config.with_cache_ttl(Duration::from_secs(ttl));
    }
    info!(
        "⚖️ Created Chutes utilization routing with {}s cache TTL",
        routing_config.cache_ttl.as_secs()
    );

    let router = Arc::new(ModelRouter::new(model_list));
    let routing = UtilizationRouting::new(routing_config).with_router(router.clone());
    router.set_custom_routing_strategy(Arc::new(routing));

    let server_opt = args.conf.map(|conf_path| Opt {
        upgrade: false,
        daemon: false,
        nocapture: false,
        test: false,
        conf: Some(conf_path),
    });

    let mut my_server = match Server::new(server_opt) {
        Ok(server) => server,
        Err(e) => {
            error!("❌ Error starting server: {}", e);
            std::process::exit(1);
        }
    };
    my_server.bootstrap();

    let ssl_enabled = is_ssl_enabled();
    let proxy = ChutesProxy {
        router,
        default_model: load_default_model(),
        master_key,
        ssl_enabled,
    };
    let mut proxy_service = http_proxy_service(&my_server.configuration, proxy);

    let addr = format!("{}:{}", get_proxy_host(args.host), get_proxy_port(args.port));
    if ssl_enabled {
        let ssl_cert = get_ssl_cert();
        let ssl_key = get_ssl_key();
        if !Path::new(&ssl_cert).exists() || !Path::new(&ssl_key).exists() {
            error!("❌ SSL certificate or key not found: {} / {}", ssl_cert, ssl_key);
            std::process::exit(1);
        }

        info!("🔒 SSL/TLS enabled");
        info!("   Certificate: {}", ssl_cert);
        info!("   Private Key: {}", ssl_key);
        match proxy_service.add_tls(&addr, &ssl_cert, &ssl_key) {
            Ok(_) => info!("✅ SSL listener configured successfully"),
            Err(e) => {
                warn!("⚠️ SSL configuration failed, falling back to HTTP: {}", e);
                proxy_service.add_tcp(&addr);
            }
        }
    } else {
        info!("🔓 SSL/TLS disabled - using HTTP");
        proxy_service.add_tcp(&addr);
    }

    my_server.add_service(proxy_service);

    info!("🚀 Starting Chutes proxy on {}", addr);
    info!("🔄 Server will run indefinitely. Press Ctrl+C to stop.");
    my_server.run_forever();
}
