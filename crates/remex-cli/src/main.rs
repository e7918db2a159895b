//! # remex CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Host a script, listening on all interfaces, port 8888
//! remex serve -s library.js -b 8888
//!
//! # Evaluate an expression on a running host (prints the result)
//! remex call 127.0.0.1:8888 'avg([1, 2, 3])'
//! ```
//!
//! ## Address Format
//!
//! - `8888` - port only (binds all interfaces, or dials localhost)
//! - `127.0.0.1:8888` - host and port

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use remex_client::ClientConfig;
use remex_server::HostConfig;

#[derive(FromArgs)]
/// remex - remote evaluation between embedded engines
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
}

// remex serve -s library.js -b 0.0.0.0:8888 --retry-delay-ms 500
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// load a script and serve commands over TCP
struct ServeArgs {
    /// path to the JavaScript file to load
    #[argh(option, short = 's')]
    script: String,

    /// address to listen on: a port, or host:port
    #[argh(option, short = 'b', default = "\"8888\".into()")]
    bind: String,

    /// worker threads for network I/O
    #[argh(option, long = "network-threads", default = "1")]
    network_threads: usize,

    /// connect attempts before a client opened by the script gives up
    #[argh(option, long = "max-retries", default = "5")]
    max_retries: u32,

    /// first reconnect delay in milliseconds, doubled after each failure
    #[argh(option, long = "retry-delay-ms", default = "5000")]
    retry_delay_ms: u64,
}

// Prints only the result, so the output can be piped.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// evaluate an expression on a remote host
struct CallArgs {
    /// address of the host: a port, or host:port
    #[argh(positional)]
    address: String,

    /// expression to evaluate on the remote engine
    #[argh(positional)]
    expression: String,

    /// how long to wait for the connection, in milliseconds
    #[argh(option, long = "timeout-ms", default = "2000")]
    timeout_ms: u64,
}

fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // `call` keeps stdout clean for piping.
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => {
            let client = ClientConfig::default()
                .with_max_retries(args.max_retries)
                .with_retry_delay(Duration::from_millis(args.retry_delay_ms));
            let config = HostConfig::default()
                .with_client(client)
                .with_network_threads(args.network_threads);
            remex_cli::serve::run_serve(&PathBuf::from(&args.script), &args.bind, config)
        }
        Commands::Call(args) => {
            let value = remex_cli::call::run_call(
                &args.address,
                &args.expression,
                Duration::from_millis(args.timeout_ms),
            )?;
            println!("{}", value);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let args: Cli = Cli::from_args(&["remex"], &["serve", "-s", "lib.js", "-b", "0.0.0.0:9001"]).unwrap();
        match args.command {
            Commands::Serve(ServeArgs {
                script,
                bind,
                network_threads,
                max_retries,
                retry_delay_ms,
            }) => {
                assert_eq!(script, "lib.js");
                assert_eq!(bind, "0.0.0.0:9001");
                assert_eq!(network_threads, 1);
                assert_eq!(max_retries, 5);
                assert_eq!(retry_delay_ms, 5000);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_defaults_bind() {
        let args: Cli = Cli::from_args(&["remex"], &["serve", "-s", "lib.js"]).unwrap();
        match args.command {
            Commands::Serve(ServeArgs { bind, .. }) => assert_eq!(bind, "8888"),
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_requires_script() {
        assert!(Cli::from_args(&["remex"], &["serve"]).is_err());
    }

    #[test]
    fn test_cli_parse_serve_retry_options() {
        let args: Cli = Cli::from_args(
            &["remex"],
            &["serve", "-s", "lib.js", "--max-retries", "2", "--retry-delay-ms", "100", "--network-threads", "4"],
        )
        .unwrap();
        match args.command {
            Commands::Serve(ServeArgs {
                network_threads,
                max_retries,
                retry_delay_ms,
                ..
            }) => {
                assert_eq!(network_threads, 4);
                assert_eq!(max_retries, 2);
                assert_eq!(retry_delay_ms, 100);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_call() {
        let args: Cli = Cli::from_args(&["remex"], &["call", "127.0.0.1:8888", "1 + 1"]).unwrap();
        match args.command {
            Commands::Call(CallArgs {
                address,
                expression,
                timeout_ms,
            }) => {
                assert_eq!(address, "127.0.0.1:8888");
                assert_eq!(expression, "1 + 1");
                assert_eq!(timeout_ms, 2000);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_missing_expression() {
        assert!(Cli::from_args(&["remex"], &["call", "8888"]).is_err());
    }
}
