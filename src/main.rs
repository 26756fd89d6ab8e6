use log::info;
use mio::Poll;

use webserv::config::AppConfig;
use webserv::error::Result;
use webserv::server::Server;

fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::load(&config_path)?;
    info!(
        "{} {} starting with {} server(s)",
        config.name,
        config.version,
        config.servers.len()
    );

    let poll = Poll::new()?;
    let mut server = Server::new(config, &poll)?;
    server.run(poll)
}
