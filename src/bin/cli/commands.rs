use osmium_stomp::{FailoverClient, Frame, Headers, SubscriptionOptions};
use std::io::{self, Write};

/// Result of executing a command
pub enum CommandResult {
    /// Command executed successfully
    Ok,
    /// Command produced a line for the user
    Info(String),
    /// Command requests exit
    Quit,
    /// Error executing command
    Error(String),
}

/// Per-session command state.
#[derive(Default)]
pub struct Session {
    /// Transaction opened with `begin`; `send` joins it until commit/abort
    pub transaction: Option<String>,
    /// Subscription ids by destination, in subscription order
    pub subscriptions: Vec<(String, String)>,
}

/// Parse and execute a command
pub fn execute_command(line: &str, client: &FailoverClient, session: &mut Session) -> CommandResult {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return CommandResult::Ok;
    }

    match parts[0] {
        "quit" | "exit" | "q" => CommandResult::Quit,

        "send" => {
            if parts.len() < 3 {
                return CommandResult::Error("Usage: send <destination> <message>".to_string());
            }
            let mut headers = Headers::new();
            headers.set("content-type", "text/plain");
            if let Some(tx) = &session.transaction {
                headers.set("transaction", tx);
            }
            match client.send(parts[1], parts[2], &headers) {
                Ok(_) => CommandResult::Ok,
                Err(e) => CommandResult::Error(format!("Send error: {}", e)),
            }
        }

        "sub" | "subscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: sub <destination>".to_string());
            }
            match subscribe(client, parts[1]) {
                Ok(id) => {
                    session.subscriptions.push((parts[1].to_string(), id.clone()));
                    CommandResult::Info(format!("Subscribed to {} ({})", parts[1], id))
                }
                Err(msg) => CommandResult::Error(msg),
            }
        }

        "unsub" | "unsubscribe" => {
            if parts.len() < 2 {
                return CommandResult::Error("Usage: unsub <destination|id>".to_string());
            }
            let target = parts[1];
            let Some(pos) = session
                .subscriptions
                .iter()
                .position(|(dest, id)| dest == target || id == target)
            else {
                return CommandResult::Error(format!("Not subscribed: {}", target));
            };
            let (dest, id) = session.subscriptions.remove(pos);
            match client.unsubscribe(&id) {
                Ok(_) => CommandResult::Info(format!("Unsubscribed from {}", dest)),
                Err(e) => CommandResult::Error(format!("Unsubscribe error: {}", e)),
            }
        }

        "begin" => {
            if let Some(tx) = &session.transaction {
                return CommandResult::Error(format!("Transaction {} already open", tx));
            }
            match client.begin(parts.get(1).copied()) {
                Ok(tx) => {
                    session.transaction = Some(tx.clone());
                    CommandResult::Info(format!("Transaction {} started", tx))
                }
                Err(e) => CommandResult::Error(format!("Begin error: {}", e)),
            }
        }

        "commit" | "abort" => {
            let Some(tx) = session.transaction.take() else {
                return CommandResult::Error("No open transaction".to_string());
            };
            let result = if parts[0] == "commit" {
                client.commit(&tx)
            } else {
                client.abort(&tx)
            };
            match result {
                Ok(_) => CommandResult::Info(format!("Transaction {} {}ed", tx, parts[0])),
                Err(e) => {
                    session.transaction = Some(tx);
                    CommandResult::Error(format!("{} error: {}", parts[0], e))
                }
            }
        }

        "status" => CommandResult::Info(status(client, session)),

        "help" | "?" => {
            print_help();
            CommandResult::Ok
        }

        _ => CommandResult::Error(format!("Unknown command: {}. Type 'help' for commands.", parts[0])),
    }
}

/// Subscribe with a handler that prints every message. Returns the
/// subscription id.
pub fn subscribe(client: &FailoverClient, dest: &str) -> Result<String, String> {
    let label = dest.to_string();
    client
        .subscribe(dest, SubscriptionOptions::default(), move |frame| {
            print_message(&label, frame)
        })
        .map(|sub| sub.id().to_string())
        .map_err(|e| format!("Failed to subscribe to '{}': {}", dest, e))
}

fn status(client: &FailoverClient, session: &Session) -> String {
    let mut out = format!("State: {:?}", client.state());
    if let Some(active) = client.active_client() {
        out.push_str(&format!("\nBroker: {}", active.uri()));
        if let Some(version) = active.version() {
            out.push_str(&format!(" (STOMP {})", version));
        }
    }
    out.push_str(&format!("\nBuffered frames: {}", client.buffer().len()));
    if let Some(tx) = &session.transaction {
        out.push_str(&format!("\nOpen transaction: {}", tx));
    }
    for (dest, id) in &session.subscriptions {
        out.push_str(&format!("\nSubscribed: {} ({})", dest, id));
    }
    out
}

fn print_message(dest: &str, frame: &Frame) {
    let now = chrono::Local::now().format("%H:%M:%S%.3f");
    println!("\n[{}] [{}] MESSAGE received:", now, dest);
    for (k, v) in &frame.headers {
        println!("  {}: {}", k, v);
    }
    if let Some(body) = &frame.body {
        match frame.body_str() {
            Some(s) => println!("  Body: {}", s),
            None => println!("  Body: ({} bytes, binary)", body.len()),
        }
    }
    print!("> ");
    let _ = io::stdout().flush();
}

/// Print help text
pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message (inside the open transaction, if any)");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  unsub <destination|id>        - Remove a subscription");
    println!("  begin [id]                    - Start a transaction");
    println!("  commit                        - Commit the open transaction");
    println!("  abort                         - Abort the open transaction");
    println!("  status                        - Show broker, buffer and subscriptions");
    println!("  quit                          - Disconnect and exit");
}
