mod cli;

use std::time::Duration;

use clap::Parser;
use hostbridge::scene::SceneHost;
use hostbridge::server::TOKEN_HEADER;
use hostbridge::{Bridge, BridgeConfig};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            config,
            client_url,
            seed_demo,
        } => {
            let mut settings = BridgeConfig::load(config.as_deref())?;
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(dir) = data_dir {
                settings.data_dir = dir;
            }
            if client_url.is_some() {
                settings.client_url = client_url;
            }

            let bridge = Bridge::<SceneHost>::new(settings);
            let addr = bridge.start()?;
            println!("listening: http://{addr}");
            println!("token: {}", bridge.token().as_str());
            if let Some(client) = bridge.config().client_url.as_deref() {
                match bridge.launch_url(client) {
                    Ok(url) => println!("open: {url}"),
                    Err(err) => warn!("{err}"),
                }
            }

            let mut host = if seed_demo {
                SceneHost::with_demo_scene()
            } else {
                SceneHost::new()
            };
            bridge.run_host_loop(&mut host);
            Ok(())
        }

        Command::Status { port, token } => {
            let url = format!("http://127.0.0.1:{port}/");
            let response = ureq::get(&url)
                .set(TOKEN_HEADER, &token)
                .timeout(Duration::from_secs(5))
                .call();
            match response {
                Ok(resp) => {
                    println!("online: {}", resp.into_string()?);
                    Ok(())
                }
                Err(err) => {
                    eprintln!("bridge not reachable on {url}: {err}");
                    std::process::exit(1);
                }
            }
        }
    }
}
