use structopt::StructOpt;

use isn::frame::short::Mode as ShortMode;

#[derive(Clone, Copy)]
pub enum FrameMode {
    Short,
    Compact,
}

impl FrameMode {
    pub fn into_short_mode(self) -> ShortMode {
        match self {
            FrameMode::Short => ShortMode::Plain,
            FrameMode::Compact => ShortMode::Crc8,
        }
    }
}

#[derive(Clone, Copy, StructOpt)]
pub enum Scenario {
    /// Send a single short-frame payload over a loopback wire and print the decoded echo.
    #[structopt(name = "ping")]
    Ping,
    /// Schedule a message slot and a query, and flush both through the message layer's scheduler.
    #[structopt(name = "message")]
    Message,
    /// Route two distinct protocol tags to separate children through `Dispatch`.
    #[structopt(name = "dispatch")]
    Dispatch,
}

#[derive(Clone, Copy, StructOpt)]
pub struct Config {
    #[structopt(subcommand)]
    pub scenario: Scenario,

    #[structopt(long = "frame", default_value = "compact")]
    pub frame_mode: FrameMode,

    /// Idle timeout for a frame in progress, in clock ticks.
    #[structopt(long = "timeout", default_value = "1000")]
    pub frame_timeout: u32,
}

impl Config {
    pub fn from_args() -> Self {
        StructOpt::from_args()
    }
}

impl std::str::FromStr for FrameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(FrameMode::Short),
            "compact" => Ok(FrameMode::Compact),
            other => Err(format!("unknown frame mode `{other}`, expected `short` or `compact`")),
        }
    }
}
