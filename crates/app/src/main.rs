// Copyright 2025-2026 CEMAXECUTER LLC

mod capture;
mod config;
mod estimate;
mod loopback;
mod pipeline;

use clap::{Parser, Subcommand, ValueEnum};
use cs_hci::CsRole;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cs-ranging")]
#[command(about = "Channel Sounding distance estimation and RAS replay")]
struct Cli {
    /// JSON config with "estimator" and "ras" sections
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Output file (JSON lines, default stdout)
    #[arg(short = 'w', long, global = true)]
    write: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Print statistics
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate distances from procedure captures (JSON lines)
    Estimate {
        /// Capture file
        #[arg(short = 'f', long)]
        file: PathBuf,

        /// Calibration table image for the local side
        #[arg(long)]
        cali: Option<PathBuf>,
    },
    /// Replay an HCI CS event dump through the Ranging Service
    Ras {
        /// Event dump: "<time_ms> <hex HCI event>" per line
        #[arg(short = 'f', long)]
        file: PathBuf,

        /// Local role for connections not configured by the dump
        #[arg(long, value_enum, default_value = "initiator")]
        role: RoleArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    Initiator,
    Reflector,
}

impl From<RoleArg> for CsRole {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::Initiator => CsRole::Initiator,
            RoleArg::Reflector => CsRole::Reflector,
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let cfg: config::AppConfig = match config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.verbose {
        log::info!("cs-ranging starting");
        log::info!("estimator: {:?}", cfg.estimator);
        log::info!("ras: {:?}", cfg.ras);
    }

    let result = match cli.command {
        Command::Estimate { ref file, ref cali } => pipeline::run_estimate(
            file,
            cli.write.as_deref(),
            &cfg.estimator,
            cali.as_deref(),
            cli.stats,
        ),
        Command::Ras { ref file, role } => {
            pipeline::run_ras(file, cli.write.as_deref(), &cfg.ras, role.into(), cli.stats)
        }
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
