use clap::{Parser, Subcommand};
use eyre::{Context, Result};

use crate::config::{self, Configuration, load_configuration, lookup_config_path};

#[derive(Debug, Parser)]
#[command(
    version,
    about,
    long_about = r#"Chat with OpenAI, Anthropic, Google or local models and keep the history

Default configuration file location looks up in the following order:
    * $XDG_CONFIG_HOME/chorus/config.toml
    * $HOME/.config/chorus/config.toml
    * $HOME/.chorus.toml
"#,
    disable_version_flag = true
)]
pub struct Command {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Show the version
    #[arg(short, long)]
    version: bool,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Action {
    /// Send a message and print the reply
    Send {
        message: String,

        /// Continue an existing conversation instead of starting a new one
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,

        /// Print the reply as it is generated
        #[arg(short, long)]
        stream: bool,
    },

    /// Create an empty conversation
    New {
        #[arg(short, long)]
        title: Option<String>,
    },

    /// List conversations, most recently updated first
    List,

    /// Show the messages of a conversation
    History { id: String },

    /// Delete a conversation and its messages
    Delete { id: String },

    /// Export a conversation
    Export {
        id: String,

        /// structured (json) or plain (txt)
        #[arg(short, long, default_value = "structured")]
        format: String,
    },

    /// List known models per provider
    Models,

    /// Show the active provider and which credentials are set
    Status,
}

impl Command {
    pub fn new() -> Command {
        Self::parse()
    }

    pub fn get_config(&self) -> Result<Configuration> {
        let config_path = self
            .config
            .clone()
            .unwrap_or_else(|| lookup_config_path().unwrap_or_default());

        if config_path.is_empty() {
            // No config path is specified just use the default config
            return Ok(Configuration::default());
        }
        load_configuration(config_path.as_str()).wrap_err("loading configuration")
    }

    pub fn version(&self) -> bool {
        self.version
    }

    pub fn action(&self) -> Option<&Action> {
        self.action.as_ref()
    }

    pub fn print_version(&self) {
        println!("{}", config::version())
    }
}
