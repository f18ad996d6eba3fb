//! Entry point for every protocol role: client, single- or multi-server
//! relay party, or single- or multi-server backend (`original_source/DPPIR/main.cc`).

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use dppir::config::Config;
use dppir::database::Database;
use dppir::protocol::backend::Backend;
use dppir::protocol::client::Client;
use dppir::protocol::parallel_backend::ParallelBackend;
use dppir::protocol::parallel_relay::ParallelRelay;
use dppir::protocol::relay::Relay;
use dppir::protocol::TagSampling;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Client,
    Party,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Stage {
    Offline,
    Online,
    All,
}

#[derive(Parser, Debug)]
#[command(about = "DPPIR Protocol entry point for parties and clients")]
struct Args {
    /// The role: client or party.
    #[arg(long)]
    role: Role,

    /// One of: offline, online, or all.
    #[arg(long)]
    stage: Stage,

    /// Path to the config file.
    #[arg(long)]
    config: String,

    /// The server id for parallelism.
    #[arg(long)]
    server_id: u8,

    /// The party id (required if role is party).
    #[arg(long)]
    party_id: Option<u8>,

    /// Number of queries (required if role is client).
    #[arg(long)]
    queries: Option<u32>,

    /// Use the deterministic tag-sampling scheme instead of uniform random
    /// tags. Debug/benchmarking only: it leaks structural tag information.
    #[arg(long)]
    deterministic_tags: bool,

    /// Skip the real offline stage and install identity-element state
    /// instead, for online-only benchmarking. Refused unless set, since a
    /// production run must always perform the real offline stage.
    #[arg(long)]
    allow_simulated_offline: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if matches!(args.role, Role::Party) && args.party_id.is_none() {
        bail!("--party-id is required for parties");
    }
    if matches!(args.role, Role::Client) && args.queries.is_none() {
        bail!("--queries is required for clients");
    }

    let config = Config::read_file(&args.config).context("failed to read config")?;
    let db = Database::new(config.db_size);

    if args.server_id >= config.server_count {
        bail!("server_id out of range");
    }
    if let Some(party_id) = args.party_id {
        if party_id >= config.party_count {
            bail!("party_id out of range");
        }
    }

    let run_offline = matches!(args.stage, Stage::Offline | Stage::All);
    let run_online = matches!(args.stage, Stage::Online | Stage::All);
    if !run_offline && !args.allow_simulated_offline {
        bail!(
            "--stage online requires the offline stage to have already run; \
             pass --allow-simulated-offline to instead install simulated \
             (non-private) offline state for benchmarking"
        );
    }

    let tag_sampling = if args.deterministic_tags {
        TagSampling::Deterministic
    } else {
        TagSampling::Uniform
    };

    match args.role {
        Role::Client => {
            let queries = args.queries.unwrap();
            let mut client = Client::new(args.server_id, &config, db, tag_sampling)?;
            if run_offline {
                client.start_offline(queries)?;
            } else {
                client.simulate_offline(queries)?;
            }
            if run_online {
                client.start_online(queries, false)?;
            }
        }
        Role::Party => {
            let party_id = args.party_id.unwrap();
            if party_id < config.party_count - 1 {
                if config.server_count == 1 {
                    let mut party = Relay::new(party_id, args.server_id, &config, db, tag_sampling)?;
                    if run_offline {
                        party.start_offline()?;
                    } else {
                        party.simulate_offline()?;
                    }
                    if run_online {
                        party.start_online()?;
                    }
                } else {
                    let mut party =
                        ParallelRelay::new(party_id, args.server_id, &config, db, tag_sampling)?;
                    if run_offline {
                        party.start_offline()?;
                    } else {
                        party.simulate_offline()?;
                    }
                    if run_online {
                        party.start_online()?;
                    }
                }
            } else if config.server_count == 1 {
                let mut backend = Backend::new(args.server_id, &config, db)?;
                if run_offline {
                    backend.start_offline()?;
                } else {
                    backend.simulate_offline()?;
                }
                if run_online {
                    backend.start_online()?;
                }
            } else {
                let mut backend = ParallelBackend::new(args.server_id, &config, db)?;
                if run_offline {
                    backend.start_offline()?;
                } else {
                    backend.simulate_offline()?;
                }
                if run_online {
                    backend.start_online()?;
                }
            }
        }
    }

    println!("Done!");
    Ok(())
}
