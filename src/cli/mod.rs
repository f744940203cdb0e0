//! CLI module for infermesh
//!
//! Provides subcommands:
//! - `infermesh serve` - Run the registry
//! - `infermesh register` - Announce a backend to running registries
//! - `infermesh withdraw` - Withdraw a backend from running registries
//! - `infermesh watch` - Mirror the models offered for a pattern
//! - `infermesh chat` - Send a prompt to every backend offered for a pattern

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

use crate::model::RequestPattern;

#[derive(Parser, Debug)]
#[command(name = "infermesh")]
#[command(about = "Discover and select inference backends over NATS")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// NATS server URL (default: $NATS_SERVER_URL or nats://0.0.0.0:4222)
    #[arg(long, global = true, value_name = "URL")]
    pub nats_url: Option<String>,

    /// Path to a .env file to load before anything else
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the registry: health-check backends and answer model requests
    Serve(ServeArgs),

    /// Announce a backend URL on inference.new_server
    Register(BackendArgs),

    /// Withdraw a backend URL on inference.unavailable
    Withdraw(BackendArgs),

    /// Request models matching a pattern and print availability changes
    Watch(WatchArgs),

    /// Request models matching a pattern and send a prompt to each one
    Chat(ChatArgs),
}

/// Arguments for the serve command
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Config file (YAML or JSON, default: ~/.infermesh/registry.yaml if present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Backend base URL known at startup (repeatable)
    #[arg(short, long = "backend", value_name = "URL")]
    pub backends: Vec<String>,

    /// Seconds between health-check cycles
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Timeout for one backend probe in seconds
    #[arg(long, value_name = "SECS")]
    pub probe_timeout: Option<u64>,
}

/// Arguments for register and withdraw
#[derive(Args, Debug)]
pub struct BackendArgs {
    /// Backend base URL, e.g. http://gpu-1:8000/v1
    pub url: String,
}

/// Pattern selecting the wanted models
#[derive(Args, Debug, Clone, Default)]
pub struct PatternArgs {
    /// Model name (empty: any model)
    #[arg(short, long, default_value = "")]
    pub model: String,

    /// Quantization, e.g. Q4_K (omit for any)
    #[arg(short, long)]
    pub quantization: Option<String>,

    /// Match the model name as a regular expression anchored at the start
    #[arg(long)]
    pub regex_model: bool,

    /// Match the quantization as a regular expression anchored at the start
    #[arg(long)]
    pub regex_quantization: bool,
}

impl From<&PatternArgs> for RequestPattern {
    fn from(args: &PatternArgs) -> Self {
        RequestPattern {
            name: args.model.clone(),
            quantization: args.quantization.clone(),
            use_regex_model_name: args.regex_model,
            use_regex_quantization: args.regex_quantization,
        }
    }
}

/// Arguments for the watch command
#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub pattern: PatternArgs,

    /// Re-send the request every N seconds (0: only once)
    #[arg(long, default_value = "0", value_name = "SECS")]
    pub refresh: u64,
}

/// Arguments for the chat command
#[derive(Args, Debug)]
pub struct ChatArgs {
    #[command(flatten)]
    pub pattern: PatternArgs,

    /// Prompt sent to each discovered model
    #[arg(short, long, default_value = "Please tell me a joke about AIs")]
    pub prompt: String,

    /// System message
    #[arg(long, default_value = "You are a helpful assistant.")]
    pub system: String,

    /// API key sent as a bearer token
    #[arg(long, env = "INFERENCE_API_KEY")]
    pub api_key: Option<String>,

    /// Exit after the first answer
    #[arg(long)]
    pub once: bool,
}
