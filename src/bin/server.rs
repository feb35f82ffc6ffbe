use clap::Parser;
use tinydis::config::Config;
use tinydis::{server, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::parse();

    server::run(config).await
}
