// Copyright (c) 2024-2026 Conduit Contributors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

/// Conduit: a conversational-agent gateway connecting messaging channels to
/// LLM providers.
#[derive(Parser, Debug)]
#[command(name = "conduit", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the config file. Defaults to the usual search path
    /// (`./conduit.yaml`, `~/.config/conduit/config.yaml`, ...).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway: HTTP/WebSocket RPC server, cron scheduler, and
    /// exec-approval service, all driving the agent loop.
    Start {
        /// Address to bind the gateway's WebSocket server to.
        #[arg(long, default_value = "127.0.0.1:8787")]
        bind: std::net::SocketAddr,

        /// Path to the bearer token file. Generated on first run and
        /// printed once; reused on subsequent starts.
        #[arg(long)]
        token_file: Option<PathBuf>,

        /// Path to the device registry file.
        #[arg(long)]
        device_registry: Option<PathBuf>,

        /// Directory for cron job storage and run logs.
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Print the resolved configuration (after layering and env overrides)
    /// and exit.
    ShowConfig,

    /// List known model providers and their default environment variables.
    ListProviders,

    /// List the static model catalog: context windows, output caps, and
    /// image support per provider/model pair.
    ListModels {
        /// Restrict the listing to one provider id.
        #[arg(long)]
        provider: Option<String>,
    },

    /// Print shell completion script to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub fn print_completions(shell: Shell) {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        generate(shell, &mut cmd, name, &mut std::io::stdout());
    }
}
