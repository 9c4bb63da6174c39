//! Test pattern MJPEG server
//!
//! Run with: cargo run --example test_pattern_server [BIND_ADDR]
//!
//! Streams a synthetic moving pattern. Open `http://localhost:5809/` in a
//! browser for the viewer page, or point a player at the raw stream:
//!
//!   ffplay http://localhost:5809/stream
//!   curl -s http://localhost:5809/stream | head -c 2000 | xxd
//!
//! Press `t` + Enter to toggle the server, `r` + Enter to restart it,
//! Ctrl+C to quit. Health summaries are logged every few seconds.

use std::net::SocketAddr;
use std::sync::Arc;

use mjpeg_rs::{MjpegServer, ServerConfig, TestPatternSource};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Parse a bind address, accepting a bare IP or `localhost`
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, mjpeg_rs::server::config::DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let config = match args.get(1) {
        Some(arg) => ServerConfig::with_addr(parse_bind_addr(arg)?),
        None => ServerConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_rs=info".parse()?)
                .add_directive("test_pattern_server=debug".parse()?),
        )
        .init();

    let server = MjpegServer::new(
        config.frame_rate(30).jpeg_quality(75),
        Arc::new(TestPatternSource::new(1280, 720)),
    );

    let addr = server.start().await?;
    println!("Viewer: http://{}/", addr);
    println!("Stream: http://{}/stream", addr);

    let mut states = server.subscribe_state();
    let watcher = tokio::spawn(async move {
        while let Ok(state) = states.recv().await {
            tracing::info!(state = %state, "Server state");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
            line = lines.next_line() => match line? {
                Some(cmd) if cmd.trim() == "t" => {
                    let state = server.toggle().await?;
                    println!("Server is now {}", state);
                }
                Some(cmd) if cmd.trim() == "r" => match server.restart().await {
                    Ok(addr) => println!("Restarted on {}", addr),
                    Err(e) => println!("Restart failed: {}", e),
                },
                Some(_) => {}
                // stdin closed: keep streaming until Ctrl+C
                None => {
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
        }
    }

    if server.is_running() {
        server.stop().await?;
    }

    let stats = server.stats();
    println!(
        "Stats: captured={} encoded={} sent={} dropped={} restarts={}",
        stats.frames_captured,
        stats.frames_encoded,
        stats.frames_sent,
        stats.frames_dropped(),
        stats.restarts,
    );

    watcher.abort();
    Ok(())
}
