use clap::Parser;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Number of messages to send before disconnecting
    #[arg(short = 'n', long, default_value = "10")]
    count: u32,

    /// Delay between messages in milliseconds
    #[arg(short = 'i', long, default_value = "1000")]
    interval_ms: u64,
}

// Get current timestamp in milliseconds
fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let mut stream = TcpStream::connect(&args.server).await?;
    println!("Connected from {}", stream.local_addr()?);

    for sequence in 1..=args.count {
        let message = format!("ping {} at {}\n", sequence, get_timestamp());
        stream.write_all(message.as_bytes()).await?;
        println!("Sent: {}", message.trim_end());

        sleep(Duration::from_millis(args.interval_ms)).await;
    }

    println!("Disconnecting");
    stream.shutdown().await?;

    println!("Test client finished");
    Ok(())
}
