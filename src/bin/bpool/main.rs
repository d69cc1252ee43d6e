mod args;

use std::process::ExitCode;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use beanpool::{
    Connection, ManagedConnection, Pool, PooledId, PutOptions, Random,
    RawCodec, RoundRobin, SelectionStrategy, TcpTransport, TubeName,
};
use tracing::{error, Level};

use crate::args::{Args, Cmd, Strategy};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    if let Err(error) = run(args).await {
        error!(%error, "command failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn run(args: Args) -> Result<()> {
    let strategy: Box<dyn SelectionStrategy> = match args.strategy {
        Strategy::RoundRobin => Box::new(RoundRobin::new()),
        Strategy::Random => Box::new(Random::new()),
    };

    let mut pool = Pool::new(strategy);
    for server in &args.servers {
        let transport = TcpTransport::new(server.clone());
        let conn = Connection::new(Box::new(transport), RawCodec);
        pool.add_member(server.clone(), ManagedConnection::new(conn));
    }

    if let Some(name) = &args.tube {
        let tube = TubeName::new(name.clone()).context("bad tube name")?;
        pool.use_tube(&tube).await.context("selecting tube")?;
        pool.watch(&tube).await.context("watching tube")?;
    }

    match args.command {
        Cmd::Put {
            body,
            pri,
            delay,
            ttr,
        } => {
            let opts = PutOptions { pri, delay, ttr };
            let id = pool
                .put(&Bytes::from(body.into_bytes()), &opts)
                .await
                .context("placing job")?;
            println!("{id}");
        },
        Cmd::Reserve { timeout } => {
            match pool.reserve(timeout).await.context("reserving")? {
                Some(job) => {
                    println!("{}", job.id);
                    println!("{}", String::from_utf8_lossy(&job.body));
                },
                None => println!("no job"),
            }
        },
        Cmd::Delete { id } => {
            let id: PooledId = id.parse()?;
            pool.delete(&id).await.context("deleting job")?;
        },
        Cmd::Kick { bound } => {
            let kicked = pool.kick(bound).await.context("kicking")?;
            println!("{kicked}");
        },
        Cmd::Stats => match pool.stats().await.context("fetching stats")? {
            Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
            None => println!("no data"),
        },
        Cmd::StatsTube { tube } => {
            let tube = TubeName::new(tube).context("bad tube name")?;
            match pool.stats_tube(&tube).await.context("fetching stats")? {
                Some(stats) => {
                    println!("{}", serde_json::to_string_pretty(&stats)?)
                },
                None => println!("no data"),
            }
        },
        Cmd::ListTubes => {
            for tube in pool.list_tubes().await.context("listing tubes")? {
                println!("{tube}");
            }
        },
    }

    Ok(())
}
