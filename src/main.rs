use anyhow::{Context, anyhow, bail};
use chrono::Local;
use ilidar_link::packet::DataType;
use ilidar_link::transport::TcpTransportFactory;
use ilidar_link::{ClientConfig, SocketClient};
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// Connects to a sensor receiver, optionally sends a line or uploads a file,
// then prints every response until Ctrl-C.
//
// Usage:
//   cargo run -- --host 192.168.1.20 --port 5678
//   cargo run -- -H 192.168.1.20 -p 5678 --file depth_0001.bin
//   cargo run -- -H 192.168.1.20 -p 5678 -m "STATUS"

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run()) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let host = parse_arg(&args, "--host", "-H").unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u32 = parse_arg(&args, "--port", "-p")
        .as_deref()
        .unwrap_or("5678")
        .parse()
        .context("--port must be a number")?;
    let file = parse_arg(&args, "--file", "-f");
    let message = parse_arg(&args, "--message", "-m");

    let factory = TcpTransportFactory::new().with_connect_timeout(Duration::from_secs(10));
    let client = SocketClient::new(ClientConfig::default(), Arc::new(factory));

    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();
    client.set_connection_handler(move |ok| {
        let _ = conn_tx.send(ok);
    });
    client.set_response_handler(|response| {
        info!("Received server response: {response}");
    });
    client.set_error_handler(|e| warn!("Receive error: {e}"));

    client.connect(&host, port)?;
    if conn_rx.recv().await != Some(true) {
        let reason = client
            .last_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".into());
        bail!("could not connect to {host}:{port}: {reason}");
    }

    if let Some(message) = message {
        client.send(format!("{message}\n"))?;
    }

    if let Some(path) = file {
        let path = Path::new(&path);
        let data_type = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(DataType::from_extension)
            .ok_or_else(|| anyhow!("{} is not a .jpg, .bin or .csv file", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?;
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let packets = match data_type {
            DataType::Jpg => client.send_jpg(name, &data)?,
            DataType::Bin => client.send_bin(name, &data)?,
            DataType::Csv => client.send_csv(name, &data)?,
        };
        info!("Queued {name} as {packets} packets");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, disconnecting"),
        _ = async {
            while conn_rx.recv().await == Some(true) {}
        } => warn!("Connection closed"),
    }

    client.disconnect();
    Ok(())
}

fn parse_arg(args: &[String], long: &str, short: &str) -> Option<String> {
    let long_prefix = format!("{}=", long);
    let mut iter = args.iter().skip(1); // Skip program name
    while let Some(arg) = iter.next() {
        if arg == long || arg == short {
            return iter.next().cloned();
        }
        if let Some(value) = arg.strip_prefix(&long_prefix) {
            return Some(value.to_string());
        }
    }
    None
}
