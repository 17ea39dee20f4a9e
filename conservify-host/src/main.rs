// conservify: desktop front end for conservify-core (HTTP, station files, LAN discovery).

mod config;
mod discovery;
mod files;
mod protocol;
mod transport;
mod web;
mod wifi;
mod wire;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use conservify_core::{
    Body, Client, DiscoveryEvents, DiscoveryOptions, ServiceAnnouncement, StopOptions, TransferRequest,
    TransferResult, UdpMessage,
};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: conservify <command> [args]

commands:
  get <url>                     GET, print the body as text
  json <url>                    GET, print the body as JSON
  download <url> <path>         stream the response to a file
  upload <url> <path>           POST a file
  info <path>                   print a file's size
  records <path>                stream length-delimited records
  blocks <path>                 stream raw blocks
  sample <path> [count]         write a length-delimited sample file
  discover <type> [secs] [name] browse (and optionally advertise as <name>)
  network                       report connectivity";

/// Prints discovery callbacks.
struct Printer;

impl DiscoveryEvents for Printer {
    fn on_found_service(&self, service: &ServiceAnnouncement) {
        println!(
            "found {} ({}) at {}:{}",
            service.name,
            service.service_type,
            service.host.as_deref().unwrap_or("?"),
            service.port.map_or_else(|| "?".to_string(), |p| p.to_string())
        );
    }

    fn on_lost_service(&self, service: &ServiceAnnouncement) {
        println!("lost {} ({})", service.name, service.service_type);
    }

    fn on_udp_message(&self, message: &UdpMessage) {
        println!("udp {} bytes from {}", message.data.len(), message.address);
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("conservify {}", VERSION);
        return Ok(());
    }
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let client = Client::new(cfg.client.clone(), Arc::new(Printer));
        let transport = transport::HostTransport::new(tokio::runtime::Handle::current(), client.events(), cfg)?;
        client.initialize(Arc::new(transport));
        let result = run(&client, &args).await;
        client.dispose();
        result
    })
}

fn arg<'a>(args: &'a [String], i: usize, name: &str) -> anyhow::Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .with_context(|| format!("missing <{name}>\n\n{USAGE}"))
}

async fn run(client: &Client, args: &[String]) -> anyhow::Result<()> {
    let command = arg(args, 0, "command")?;
    match command {
        "get" => print_result(client.text(TransferRequest::new(arg(args, 1, "url")?))?.await?),
        "json" => print_result(client.json(TransferRequest::new(arg(args, 1, "url")?))?.await?),
        "download" => {
            let request = TransferRequest::new(arg(args, 1, "url")?)
                .path(arg(args, 2, "path")?)
                .on_progress(|total, transferred, _| eprint!("\r{transferred}/{total}"));
            let result = client.download(request)?.await?;
            eprintln!();
            println!("{} -> {}", result.status_code, arg(args, 2, "path")?);
        }
        "upload" => {
            let request = TransferRequest::new(arg(args, 1, "url")?)
                .method("POST")
                .path(arg(args, 2, "path")?)
                .on_progress(|total, transferred, _| eprint!("\r{transferred}/{total}"));
            let result = client.upload(request)?.await?;
            eprintln!();
            print_result(result);
        }
        "info" => {
            let info = client.open(arg(args, 1, "path")?)?.info()?.await?;
            println!("{} {} bytes", info.path.display(), info.size);
        }
        "records" | "blocks" => {
            let file = client.open(arg(args, 1, "path")?)?;
            let print = |batch: conservify_core::FileRecordBatch| {
                for record in &batch.records {
                    println!("{:>10}/{} {} bytes", batch.position, batch.size, record.len());
                }
            };
            let done = if command == "records" {
                file.delimited(print)?
            } else {
                file.records(print)?
            };
            done.await?;
        }
        "sample" => {
            let path = arg(args, 1, "path")?;
            let count: usize = match args.get(2) {
                Some(n) => n.parse().context("count")?,
                None => 25,
            };
            let mut buf = Vec::new();
            for i in 0..count {
                wire::encode_record(format!("sample record {i}").as_bytes(), &mut buf);
            }
            tokio::fs::write(path, &buf).await.with_context(|| format!("writing {path}"))?;
            println!("wrote {count} records ({} bytes) to {path}", buf.len());
        }
        "discover" => {
            let service_type = arg(args, 1, "type")?;
            let secs: u64 = match args.get(2) {
                Some(s) => s.parse().context("seconds")?,
                None => 30,
            };
            let mut options = DiscoveryOptions::search(service_type);
            if let Some(name) = args.get(3) {
                options = options.advertise(name.as_str(), service_type);
            }
            client.start(options)?.await?;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                r = shutdown_signal() => r?,
            }
            client.stop(StopOptions::default())?.await?;
        }
        "network" => {
            let status = client.find_connected_network()?.await?;
            println!("connected: {}", status.connected);
            if let Some(wifi) = status.connected_wifi {
                println!("ssid: {}", wifi.ssid);
            }
        }
        other => bail!("unknown command {other:?}\n\n{USAGE}"),
    }
    Ok(())
}

fn print_result(result: TransferResult) {
    println!("{} {}", result.status_code, result.request.url);
    match result.body {
        Body::Empty => {}
        Body::Json(value) => match serde_json::to_string_pretty(&value) {
            Ok(s) => println!("{s}"),
            Err(_) => println!("{value}"),
        },
        Body::Text(text) => println!("{text}"),
        Body::Bytes(bytes) => println!("<{} bytes>", bytes.len()),
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
