use clap::Parser;
use log::{debug, error, info, warn};
use server::{Server, ServerConfig, ServerEvent, TcpTransportListener};
use shared::{FramePacer, FrameTiming, GameLoop};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Main-method of the application.
/// Parses command-line arguments, starts the accept loop and runs the host
/// game loop on a blocking thread until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Tick rate (frame cap of the host loop)
        #[clap(short, long, default_value = "30")]
        tick_rate: f64,
        /// Discard client payloads instead of reporting them
        #[clap(long)]
        discard_packets: bool,
    }

    env_logger::init();

    let args = Args::parse();

    let address: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let config = ServerConfig {
        publish_packets: !args.discard_packets,
        ..Default::default()
    };
    let (mut server, events) = Server::with_config(TcpTransportListener::new(address), config);

    // Validate before anything is bound
    let pacer = FramePacer::new(args.tick_rate)?;

    server.start()?;

    let game_loop = GameLoop::new();
    let exit = game_loop.exit_handle();

    // The game loop sleeps between frames, keep it off the async workers
    let mut game_handle =
        tokio::task::spawn_blocking(move || run_game_loop(game_loop, pacer, events));

    // Handle shutdown gracefully
    tokio::select! {
        result = &mut game_handle => {
            if let Err(e) = result {
                error!("Game loop task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            exit.exit();
            if let Err(e) = game_handle.await {
                error!("Game loop task panicked: {}", e);
            }
        }
    }

    info!("Disconnecting {} clients", server.connection_count());
    server.disconnect_all();
    server.stop()?;

    Ok(())
}

/// Drives the host loop, draining server events once per frame
fn run_game_loop(
    mut game_loop: GameLoop,
    pacer: FramePacer,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
) {
    let mut clients: HashMap<server::ConnectionId, SocketAddr> = HashMap::new();
    let mut packets_this_second = 0usize;
    let mut last_report_ms = 0.0;

    let result = game_loop.run(
        pacer,
        |timing: &FrameTiming| {
            while let Ok(event) = events.try_recv() {
                match event {
                    ServerEvent::ClientConnected(connection) => {
                        info!(
                            "Client {} joined from {}",
                            connection.id(),
                            connection.peer_addr()
                        );
                        clients.insert(connection.id(), connection.peer_addr());
                    }
                    ServerEvent::ClientDisconnected { id, peer_addr } => {
                        info!("Client {} at {} left", id, peer_addr);
                        clients.remove(&id);
                    }
                    ServerEvent::PacketReceived { id, payload } => {
                        debug!("Client {} sent {} bytes", id, payload.len());
                        packets_this_second += 1;
                    }
                }
            }

            if timing.elapsed_ms - last_report_ms >= 1000.0 {
                if !clients.is_empty() {
                    debug!(
                        "Tick {}: {} clients, {} packets, {} fps",
                        timing.frame,
                        clients.len(),
                        packets_this_second,
                        timing.fps
                    );
                }
                packets_this_second = 0;
                last_report_ms = timing.elapsed_ms;
            }
        },
        |timing: &FrameTiming| {
            // Large gaps mean the host fell behind its tick rate
            if timing.frame > 1 && timing.delta_ms > 250.0 {
                warn!("Host lagged, frame took {:.1}ms", timing.delta_ms);
            }
        },
    );

    if let Err(e) = result {
        error!("Game loop failed: {}", e);
    }
    game_loop.dispose();
}
