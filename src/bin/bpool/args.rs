use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// Server to pool, as host:port. Repeat for more members.
    #[arg(short, long = "server", required = true)]
    pub(crate) servers: Vec<String>,
    /// How single-target commands pick a pool member.
    #[arg(long, value_enum, default_value_t = Strategy::RoundRobin)]
    pub(crate) strategy: Strategy,
    /// Tube to use and watch instead of the default.
    #[arg(short, long)]
    pub(crate) tube: Option<String>,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub(crate) debug: bool,

    #[command(subcommand)]
    pub(crate) command: Cmd,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum Strategy {
    RoundRobin,
    Random,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Cmd {
    /// Places a job on one pool member.
    Put {
        /// Job body, sent verbatim.
        body: String,
        /// Priority: 0 is most urgent.
        #[arg(short, long, default_value_t = beanpool::DEFAULT_PRIORITY)]
        pri: u32,
        /// Seconds before the job becomes ready.
        #[arg(short, long, default_value_t = 0)]
        delay: u32,
        /// Seconds a reservation may hold the job.
        #[arg(long, default_value_t = beanpool::DEFAULT_TTR)]
        ttr: u32,
    },
    /// Polls the pool for the next ready job.
    Reserve {
        /// Seconds to wait before giving up; omit to wait forever.
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Deletes a job by pooled id (key.id).
    Delete { id: String },
    /// Kicks up to the given number of buried jobs across the pool.
    Kick { bound: u64 },
    /// Aggregated server stats across the pool.
    Stats,
    /// Aggregated stats for one tube.
    StatsTube { tube: String },
    /// Every tube name known to any pool member.
    ListTubes,
}
