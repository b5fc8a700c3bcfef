use osmium_stomp::{
    ConnError, ConnectOptions, FailoverClient, FailoverError, FailoverEvent, TlsOptions,
    parse_failover_uri, parse_heartbeat_header,
};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use super::args::Cli;
use super::commands::{CommandResult, Session, execute_command, print_help, subscribe};
use super::exit_codes;

/// Run the CLI in plain line mode
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let (brokers, mut options) = parse_failover_uri(&cli.uri)
        .map_err(|e| (e.to_string(), exit_codes::USAGE_ERROR))?;
    let (cx, cy) = parse_heartbeat_header(&cli.heartbeat);
    let mut connect = ConnectOptions::new().heartbeats(cx, cy);
    if let Some(login) = &cli.login {
        connect = connect.login(login.as_str(), cli.passcode.as_str());
    }
    if cli.insecure {
        connect = connect.tls(TlsOptions::insecure());
    }
    options.connect = connect;
    if let Some(attempts) = cli.retry_attempts {
        options.retry_attempts = attempts;
    }

    let client = FailoverClient::from_uris(brokers, options)
        .map_err(|e| (e.to_string(), exit_codes::USAGE_ERROR))?;
    for event in [FailoverEvent::Connected, FailoverEvent::ConnectFailure, FailoverEvent::Lost] {
        client.on_failover(event, |event, message| {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            match event {
                FailoverEvent::Connected => println!("[{}] Connected to {}", now, message),
                FailoverEvent::ConnectFailure => eprintln!("[{}] Connection attempt failed: {}", now, message),
                FailoverEvent::Lost => eprintln!("[{}] Connection lost, reconnecting...", now),
                FailoverEvent::RetriesExceeded => {}
            }
        });
    }

    println!("Connecting to {}...", cli.uri);
    tokio::select! {
        result = client.connect() => result.map_err(|e| format_connection_error(&e))?,
        _ = tokio::signal::ctrl_c() => {
            return Err(("Interrupted while connecting".to_string(), exit_codes::NETWORK_ERROR));
        }
    }

    let mut session = Session::default();
    for dest in &cli.subscribe {
        let id = subscribe(&client, dest).map_err(|msg| (msg, exit_codes::PROTOCOL_ERROR))?;
        println!("Subscribed to: {}", dest);
        session.subscriptions.push((dest.clone(), id));
    }

    println!();
    print_help();
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(l)) => l,
                Ok(None) | Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        match execute_command(&line, &client, &mut session) {
            CommandResult::Ok => {}
            CommandResult::Info(msg) => println!("{}", msg),
            CommandResult::Error(msg) => eprintln!("{}", msg),
            CommandResult::Quit => break,
        }
    }

    println!("Disconnecting...");
    if let Err(e) = client.disconnect().await {
        tracing::debug!(error = %e, "disconnect did not complete cleanly");
    }
    Ok(())
}

/// Map a failed connect to a user-facing message and exit code.
fn format_connection_error(err: &FailoverError) -> (String, u8) {
    match err {
        FailoverError::Client(ConnError::ConnectFailed(message)) => (
            format!("Connection refused by broker: {}", message),
            exit_codes::AUTH_ERROR,
        ),
        FailoverError::Client(ConnError::Protocol(e)) => {
            (format!("Protocol error: {}", e), exit_codes::PROTOCOL_ERROR)
        }
        FailoverError::Client(ConnError::UnsupportedProtocolVersion(v)) => (
            format!("Broker negotiated unsupported version {}", v),
            exit_codes::PROTOCOL_ERROR,
        ),
        FailoverError::MaximumRetriesExceeded { attempts } => (
            format!("Could not connect after {} attempts", attempts),
            exit_codes::NETWORK_ERROR,
        ),
        other => (format!("Connection failed: {}", other), exit_codes::NETWORK_ERROR),
    }
}
