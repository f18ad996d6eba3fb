//! Config generator: interactive prompts or positional arguments
//! (`original_source/DPPIR/config/gen_config.cc`).

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};

use dppir::config::{default_server_config, default_shared_seed, Config, PartyConfig};
use dppir::onion::generate_keypair;
use dppir::types::{PartyId, ServerId};

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn interactive() -> Result<Config> {
    let db_size = prompt("Enter database size: ")?.parse()?;

    let eps_delta = prompt("Enter epsilon and delta: ")?;
    let mut parts = eps_delta.split_whitespace();
    let epsilon: f64 = parts.next().context("missing epsilon")?.parse()?;
    let delta: f64 = parts.next().context("missing delta")?.parse()?;

    let counts = prompt("Enter number of parties and servers per party: ")?;
    let mut parts = counts.split_whitespace();
    let party_count: PartyId = parts.next().context("missing party count")?.parse()?;
    let server_count: ServerId = parts.next().context("missing server count")?.parse()?;

    let mut parties = Vec::with_capacity(party_count as usize);
    for i in 0..party_count {
        let mut servers = Vec::with_capacity(server_count as usize);
        for j in 0..server_count {
            println!("Party {i} - Server {j}");
            let ip = prompt("Enter ip (empty for 127.0.0.1): ")?;
            let ip = if ip.is_empty() { "127.0.0.1".to_string() } else { ip };
            servers.push(default_server_config(i, j, server_count, ip));
        }
        let (onion_pkey, onion_skey) = generate_keypair();
        parties.push(PartyConfig {
            shared_seed: default_shared_seed(i),
            servers,
            onion_pkey,
            onion_skey,
        });
    }

    Ok(Config {
        db_size,
        epsilon,
        delta,
        party_count,
        server_count,
        parties,
    })
}

fn from_args(args: &[String]) -> Result<Config> {
    if args.len() < 5 {
        bail!("expected db_size epsilon delta party_count server_count [ip...]");
    }
    let db_size = args[0].parse()?;
    let epsilon: f64 = args[1].parse()?;
    let delta: f64 = args[2].parse()?;
    let party_count: PartyId = args[3].parse()?;
    let server_count: ServerId = args[4].parse()?;

    let ips = &args[5..];
    let expected_ips = party_count as usize * server_count as usize;
    if !ips.is_empty() && ips.len() != expected_ips {
        bail!("expected {expected_ips} ip arguments, got {}", ips.len());
    }

    let mut parties = Vec::with_capacity(party_count as usize);
    for i in 0..party_count {
        let mut servers = Vec::with_capacity(server_count as usize);
        for j in 0..server_count {
            let ip = if ips.is_empty() {
                "127.0.0.1".to_string()
            } else {
                ips[i as usize * server_count as usize + j as usize].clone()
            };
            servers.push(default_server_config(i, j, server_count, ip));
        }
        let (onion_pkey, onion_skey) = generate_keypair();
        parties.push(PartyConfig {
            shared_seed: default_shared_seed(i),
            servers,
            onion_pkey,
            onion_skey,
        });
    }

    Ok(Config {
        db_size,
        epsilon,
        delta,
        party_count,
        server_count,
        parties,
    })
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        println!("Please provide output file as the first command line argument");
        return Ok(());
    }

    let file = &args[0];
    let config = if args.len() == 1 {
        interactive()?
    } else {
        from_args(&args[1..])?
    };

    config.write_to_file(file).context("failed to write config")?;
    println!("Written to {file}");
    Ok(())
}
