use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[value(name = "openai", alias = "open-ai")]
    OpenAI,
    Ollama,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Style {
    /// Send the typed text as the prompt to refine.
    #[default]
    Improve,
    /// Turn the typed text into a prompt first, then refine that.
    Generate,
}

#[derive(Parser, Debug)]
#[command(name = "refine", version, about = "Category-by-category prompt refinement against a refinement backend")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(long)]
    pub config: Option<String>,

    #[arg(long)]
    pub backend_url: Option<String>,

    #[arg(long, value_enum)]
    pub provider: Option<ProviderKind>,

    #[arg(long)]
    pub chat_model: Option<String>,

    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(long)]
    pub debounce_ms: Option<u64>,

    #[arg(long, default_value_t = false)]
    pub save_artifacts: bool,

    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive refinement session (default)
    Session {
        /// Start from an existing record instead of a blank prompt
        #[arg(long)]
        load: Option<String>,
    },
    /// Browse saved records
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// List the chat models the conversation can use
    Models,
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    List,
    Show { id: String },
    Delete { id: String },
}

impl Args {
    /// Flags win over the config file.
    pub fn apply_overrides(&self, cfg: &mut crate::config::Config) {
        if let Some(url) = &self.backend_url {
            cfg.backend_url = url.clone();
        }
        if let Some(p) = self.provider {
            cfg.provider = p;
        }
        if let Some(m) = &self.chat_model {
            cfg.chat_model = m.clone();
        }
        if let Some(t) = self.timeout_secs {
            cfg.timeout_secs = t;
        }
        if let Some(d) = self.debounce_ms {
            cfg.debounce_ms = d;
        }
        if self.save_artifacts {
            cfg.save_artifacts = true;
        }
    }
}
