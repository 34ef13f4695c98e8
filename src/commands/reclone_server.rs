//! The `reclone-server` command: an HTTP daemon for ad hoc reclones.
//!
//! Three routes: `POST /trigger/reclone?cmd=<key>` starts a reclone and
//! answers 200 once the work is underway (429 when one is already in
//! flight), `GET /stats` returns the stats table as JSON (428 when stats
//! are not enabled), and `GET /health` answers 200. The route surface is
//! small and fixed, so requests are parsed directly off the socket.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::colorlog;
use crate::config::Settings;
use crate::engine::stats_file;

#[derive(Args, Debug, Default)]
pub struct RecloneServerArgs {
    /// Port the server listens on
    #[arg(short, long)]
    pub port: Option<u16>,
}

pub async fn run(args: RecloneServerArgs) -> Result<i32> {
    let port = args
        .port
        .or_else(|| {
            std::env::var("GITFLEET_RECLONE_SERVER_PORT")
                .ok()
                .and_then(|v| v.trim_start_matches(':').parse().ok())
        })
        .unwrap_or(8080);

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("could not bind reclone server to port {port}"))?;
    colorlog::print_info(format!("Starting reclone server on :{port}"));

    // Single-flight guard: at most one reclone in flight in this process.
    let busy = Arc::new(Mutex::new(()));

    loop {
        let (stream, _) = listener.accept().await?;
        let busy = Arc::clone(&busy);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, busy).await {
                colorlog::print_error(format!("Error handling request: {err}"));
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, busy: Arc<Mutex<()>>) -> Result<()> {
    let mut buffer = vec![0u8; 8192];
    let read = stream.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..read]);

    let mut parts = request.split_whitespace();
    let _method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("/");
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };

    match path {
        "/health" => write_response(&mut stream, 200, "OK", "text/plain", "ok").await,
        "/trigger/reclone" => {
            let key = query
                .and_then(|q| {
                    q.split('&')
                        .find_map(|pair| pair.strip_prefix("cmd=").map(|v| v.to_string()))
                })
                .filter(|v| !v.is_empty());
            trigger_reclone(&mut stream, busy, key).await
        }
        "/stats" => serve_stats(&mut stream).await,
        _ => write_response(&mut stream, 404, "Not Found", "text/plain", "not found").await,
    }
}

async fn trigger_reclone(
    stream: &mut TcpStream,
    busy: Arc<Mutex<()>>,
    key: Option<String>,
) -> Result<()> {
    let guard = match busy.try_lock_owned() {
        Ok(guard) => guard,
        Err(_) => {
            return write_response(
                stream,
                429,
                "Too Many Requests",
                "text/plain",
                "Server is busy, please try again later",
            )
            .await;
        }
    };

    tokio::spawn(async move {
        // Guard held for the lifetime of the child run.
        let _guard = guard;
        let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("gitfleet"));
        let mut cmd = tokio::process::Command::new(exe);
        cmd.arg("reclone");
        if let Some(key) = key {
            cmd.arg(key);
        }
        match cmd.status().await {
            Ok(status) if !status.success() => {
                colorlog::print_error(format!("Reclone run exited with {status}"));
            }
            Err(err) => colorlog::print_error(format!("Error running reclone: {err}")),
            Ok(_) => {}
        }
    });

    write_response(stream, 200, "OK", "text/plain", "reclone started").await
}

async fn serve_stats(stream: &mut TcpStream) -> Result<()> {
    let settings = Settings::from_env();
    if !settings.stats_enabled {
        return write_response(
            stream,
            428,
            "Precondition Required",
            "text/plain",
            "Stats collection is not enabled. Set GITFLEET_STATS_ENABLED=true or use \
             --stats-enabled",
        )
        .await;
    }

    let path = stats_file::stats_file_path(&settings.stats_root());
    if !path.exists() {
        return write_response(stream, 200, "OK", "application/json", "[]").await;
    }

    let contents = std::fs::read_to_string(&path)?;
    let body = csv_to_json(&contents)?;
    write_response(stream, 200, "OK", "application/json", &body).await
}

/// Converts the delimited stats table into a JSON array of objects keyed by
/// the header fields.
fn csv_to_json(contents: &str) -> Result<String> {
    let mut lines = contents.lines();
    let header: Vec<&str> = match lines.next() {
        Some(line) => line.split(',').collect(),
        None => return Ok("[]".to_string()),
    };

    let mut rows = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let mut object = serde_json::Map::new();
        for (key, value) in header.iter().zip(line.split(',')) {
            object.insert(
                key.to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
        rows.push(serde_json::Value::Object(object));
    }
    Ok(serde_json::to_string(&rows)?)
}

async fn write_response(
    stream: &mut TcpStream,
    code: u16,
    reason: &str,
    content_type: &str,
    body: &str,
) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: {content_type}\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
