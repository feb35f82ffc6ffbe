use clap::Parser;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;

const HOST: &str = "127.0.0.1";
const PORT: u16 = 6379;

/// Server settings, read from the command line or the environment.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "tinydis", version, about)]
pub struct Config {
    /// The address to bind to
    #[arg(long, env = "TINYDIS_HOST", default_value = HOST)]
    pub host: String,

    /// The port to listen on
    #[arg(short, long, env = "TINYDIS_PORT", default_value_t = PORT)]
    pub port: u16,

    /// Maximum size in bytes of a single buffered request
    #[arg(long, env = "TINYDIS_MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Only expire keys when they are read, without the background reaper
    #[arg(long, env = "TINYDIS_LAZY_EXPIRE_ONLY")]
    pub lazy_expire_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: HOST.to_string(),
            port: PORT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            lazy_expire_only: false,
        }
    }
}
