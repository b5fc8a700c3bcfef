use clap::Parser;

#[derive(Parser)]
#[command(name = "stomp")]
#[command(version)]
#[command(about = "Line-oriented STOMP client with broker failover")]
pub struct Cli {
    /// Broker URI, or a failover URI such as
    /// failover:(stomp://a:61613,stomp://b:61613)?randomize=true
    #[arg(short, long, env = "STOMP_URI", default_value = "stomp://127.0.0.1:61613")]
    pub uri: String,

    /// Login username (overrides credentials in the URI)
    #[arg(short, long, env = "STOMP_LOGIN")]
    pub login: Option<String>,

    /// Passcode
    #[arg(short, long, env = "STOMP_PASSCODE", default_value = "")]
    pub passcode: String,

    /// Heartbeat settings (client-send,client-receive in ms)
    #[arg(long, default_value = "10000,10000")]
    pub heartbeat: String,

    /// Destinations to subscribe to (can be specified multiple times)
    #[arg(short, long)]
    pub subscribe: Vec<String>,

    /// Give up after this many failed connection attempts (0 retries forever)
    #[arg(long)]
    pub retry_attempts: Option<u32>,

    /// Skip TLS certificate verification for stomp+ssl:// brokers
    #[arg(long)]
    pub insecure: bool,
}
