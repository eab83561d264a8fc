//! Lists public games on The Skeld.
//!
//! ```text
//! cargo run -p skeld-search -- [REGION] [CONFIG.json]
//! ```
//!
//! `REGION` defaults to `EU`. Set `RUST_LOG=skeld=debug` to watch the
//! handshake.

use skeld::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let region = args.next().unwrap_or_else(|| "EU".to_owned());
    let config = match args.next() {
        Some(path) => ClientConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => ClientConfig::default(),
    };

    let server = config
        .master_server(&region)
        .ok_or_else(|| format!("no master server for region {region}"))?;
    tracing::info!(%region, %server, "searching");

    let mut client = Client::udp(config);
    client.connect(server, "skeld").await?;
    let listings = client
        .search(GameListQuery::new(&[MapId::TheSkeld]))
        .await?;
    client.disconnect().await;

    match listings {
        Some(listings) => println!("{}", serde_json::to_string_pretty(&listings)?),
        None => eprintln!("server closed the connection before answering"),
    }
    Ok(())
}
