//! sftkit CLI - prompt tokenization for supervised fine-tuning.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use sftkit_core::{
    ConversationMasking, DatasetConfig, PromptFormat, TokenizationConfig, TokenizerConfig,
};
use sftkit_data::{
    convert_file, detect_format, load_jsonl_examples, ConversationTemplate, PromptTokenizer,
    TokenizedDataset, Tokenizer, TokenizingStrategy,
};

/// Combined configuration for a tokenization run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullPrepareConfig {
    /// Tokenizer configuration.
    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    /// Tokenization and masking.
    #[serde(default)]
    pub tokenization: TokenizationConfig,

    /// Dataset configuration.
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Conversation template for ShareGPT data.
    #[serde(default)]
    pub template: Option<ConversationTemplate>,

    /// Where to write the tokenized records.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// Dataset format selection.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum FormatArg {
    /// Detect from the first example
    #[default]
    Auto,
    /// instruction / input / output
    Alpaca,
    /// instruction / input / response
    Gpteacher,
    /// conversations: [{from, value}, ...]
    Sharegpt,
}

impl FormatArg {
    fn into_format(self) -> Option<PromptFormat> {
        match self {
            Self::Auto => None,
            Self::Alpaca => Some(PromptFormat::Alpaca),
            Self::Gpteacher => Some(PromptFormat::GpTeacher),
            Self::Sharegpt => Some(PromptFormat::ShareGpt),
        }
    }
}

/// Multi-turn label masking.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MaskingArg {
    /// Align labels with assistant spans through token offsets
    TokenSpans,
    /// Re-encode each round to estimate boundaries
    RoundReencode,
}

#[derive(Parser)]
#[command(name = "sftkit")]
#[command(author, version, about = "Prompt tokenization for supervised fine-tuning", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tokenize a JSONL dataset into masked training records
    Tokenize {
        /// Path to configuration file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Path to tokenizer.json
        #[arg(short, long)]
        tokenizer: Option<PathBuf>,

        /// Dataset path (JSONL file)
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Dataset format
        #[arg(long, value_enum)]
        format: Option<FormatArg>,

        /// Maximum sequence length
        #[arg(long)]
        sequence_len: Option<usize>,

        /// Train on prompts as well as responses
        #[arg(long)]
        train_on_inputs: bool,

        /// Do not append EOS to single-turn examples
        #[arg(long)]
        no_eos: bool,

        /// Multi-turn label masking
        #[arg(long, value_enum)]
        masking: Option<MaskingArg>,

        /// Tokens subtracted from each instruction fragment (round-reencode only)
        #[arg(long)]
        instruction_offset: Option<usize>,

        /// Named conversation template (e.g. vicuna_v1.1)
        #[arg(long)]
        template: Option<String>,

        /// Pad token to register and use for the attention mask
        #[arg(long)]
        pad_token: Option<String>,

        /// Output JSONL path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert a JSON array file to JSON Lines
    Convert {
        /// Input JSON file
        file: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write to stdout even if an output file is given
        #[arg(long)]
        to_stdout: bool,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tokenize {
            config,
            tokenizer,
            dataset,
            format,
            sequence_len,
            train_on_inputs,
            no_eos,
            masking,
            instruction_offset,
            template,
            pad_token,
            output,
        } => {
            let mut config = load_config(config.as_ref())?;
            let overrides = Overrides {
                tokenizer,
                dataset,
                format,
                sequence_len,
                train_on_inputs,
                no_eos,
                masking,
                instruction_offset,
                template,
                pad_token,
                output,
            };
            overrides.apply(&mut config)?;
            run_tokenize(config)
        }
        Commands::Convert {
            file,
            output,
            to_stdout,
        } => {
            let output = if to_stdout { None } else { output };
            convert_file(&file, output.as_deref())?;
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FullPrepareConfig> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&content)?)
        }
        None => Ok(FullPrepareConfig::default()),
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default)]
struct Overrides {
    tokenizer: Option<PathBuf>,
    dataset: Option<PathBuf>,
    format: Option<FormatArg>,
    sequence_len: Option<usize>,
    train_on_inputs: bool,
    no_eos: bool,
    masking: Option<MaskingArg>,
    instruction_offset: Option<usize>,
    template: Option<String>,
    pad_token: Option<String>,
    output: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut FullPrepareConfig) -> anyhow::Result<()> {
        if let Some(path) = self.tokenizer {
            config.tokenizer.path = path;
        }
        if let Some(path) = self.dataset {
            config.dataset.path = path;
        }
        if let Some(format) = self.format {
            config.dataset.format = format.into_format();
        }
        if let Some(sequence_len) = self.sequence_len {
            config.tokenization.sequence_len = sequence_len;
        }
        if self.train_on_inputs {
            config.tokenization.train_on_inputs = true;
        }
        if self.no_eos {
            config.tokenization.add_eos_token = false;
        }

        let current_offset = match config.tokenization.conversation_masking {
            ConversationMasking::RoundReencode { instruction_offset } => Some(instruction_offset),
            ConversationMasking::TokenSpans => None,
        };
        match (self.masking, self.instruction_offset) {
            (Some(MaskingArg::TokenSpans), _) => {
                config.tokenization.conversation_masking = ConversationMasking::TokenSpans;
            }
            (Some(MaskingArg::RoundReencode), offset) | (None, offset @ Some(_)) => {
                config.tokenization.conversation_masking = match offset.or(current_offset) {
                    Some(instruction_offset) => {
                        ConversationMasking::RoundReencode { instruction_offset }
                    }
                    None => ConversationMasking::round_reencode(),
                };
            }
            (None, None) => {}
        }

        if let Some(name) = self.template {
            let template = ConversationTemplate::by_name(&name)
                .ok_or_else(|| anyhow::anyhow!("Unknown conversation template: {}", name))?;
            config.template = Some(template);
        }
        if let Some(pad_token) = self.pad_token {
            config.tokenizer.special_tokens.pad_token = Some(pad_token);
        }
        if let Some(output) = self.output {
            config.output = Some(output);
        }
        Ok(())
    }
}

fn run_tokenize(config: FullPrepareConfig) -> anyhow::Result<()> {
    if config.tokenizer.path.as_os_str().is_empty() {
        anyhow::bail!("Tokenizer path is required. Use --tokenizer or specify in config file.");
    }
    if config.dataset.path.as_os_str().is_empty() {
        anyhow::bail!("Dataset path is required. Use --dataset or specify in config file.");
    }
    config.tokenization.validate()?;

    // Load tokenizer
    tracing::info!("Loading tokenizer: {}", config.tokenizer.path.display());
    if !config.tokenizer.path.exists() {
        anyhow::bail!("Tokenizer not found at {:?}", config.tokenizer.path);
    }
    let tokenizer = Tokenizer::from_file(&config.tokenizer.path)?
        .with_special_tokens(&config.tokenizer.special_tokens)?;
    tracing::info!(
        vocab_size = tokenizer.vocab_size(),
        eos = ?tokenizer.eos_token_id(),
        pad = ?tokenizer.pad_token_id(),
        "Tokenizer loaded"
    );
    let tokenizer: Arc<dyn PromptTokenizer> = Arc::new(tokenizer);

    // Load raw examples
    tracing::info!("Loading dataset: {}", config.dataset.path.display());
    let mut examples = load_jsonl_examples(&config.dataset.path)?;
    if let Some(max_samples) = config.dataset.max_samples {
        examples.truncate(max_samples);
    }
    let Some(first) = examples.first() else {
        anyhow::bail!("Dataset is empty: {}", config.dataset.path.display());
    };

    let format = match config.dataset.format {
        Some(format) => format,
        None => {
            let detected = detect_format(first)?;
            tracing::info!("Detected dataset format: {}", detected);
            detected
        }
    };

    let strategy = match (format, config.template.clone()) {
        (PromptFormat::ShareGpt, Some(template)) => {
            TokenizingStrategy::sharegpt(template, tokenizer, config.tokenization.clone())?
        }
        _ => TokenizingStrategy::new(format, tokenizer, config.tokenization.clone())?,
    };

    let mut dataset = TokenizedDataset::from_examples(&examples, &strategy)?;
    if config.dataset.shuffle {
        dataset.shuffle(config.dataset.seed);
    }

    let output = config
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("tokenized.jsonl"));
    dataset.write_jsonl(&output)?;

    let trainable: usize = dataset.records().iter().map(|r| r.num_trainable()).sum();
    let total: usize = dataset.records().iter().map(|r| r.len()).sum();

    println!("========================================");
    println!("  sftkit Tokenization");
    println!("========================================");
    println!("Dataset:       {}", config.dataset.path.display());
    println!("Format:        {}", format);
    println!("Sequence Len:  {}", config.tokenization.sequence_len);
    println!("Records:       {}", dataset.len());
    println!("Skipped:       {}", dataset.skipped());
    println!("Tokens:        {} ({} trainable)", total, trainable);
    println!("Output:        {}", output.display());
    println!("========================================");

    Ok(())
}
