//! `colloquy chat` — the interactive REPL.
//!
//! Loads configuration, applies flag overrides, builds the selected backend
//! and the enabled tools, and drives the session from stdin until EOF.

use std::io::Write;

use clap::Args;

use colloquy_backends::build_source;
use colloquy_config::AppConfig;
use colloquy_core::encoding::{decode, render_conversation, render_message};
use colloquy_core::Message;
use colloquy_session::{build_developer_message, build_system_message, PromptOptions, Session};
use colloquy_tools::build_router;

use crate::render::{FormattedObserver, RawObserver};

#[derive(Args, Debug, Default)]
pub struct ChatArgs {
    /// Generation backend: http, tensor, or local
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Completion endpoint URL
    #[arg(long)]
    pub server_url: Option<String>,

    /// Model checkpoint path (required for tensor/local backends)
    #[arg(long)]
    pub checkpoint: Option<String>,

    /// Context window in tokens
    #[arg(long)]
    pub context_window: Option<usize>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Maximum tokens per generation turn
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Enable the browser tool
    #[arg(long)]
    pub browser: bool,

    /// Enable the python tool
    #[arg(long)]
    pub python: bool,

    /// Enable the apply_patch function
    #[arg(short = 'a', long)]
    pub apply_patch: bool,

    /// Reasoning effort: low, medium, or high
    #[arg(long)]
    pub reasoning: Option<String>,

    /// Echo raw decoded tokens instead of formatted output
    #[arg(long)]
    pub raw: bool,

    /// Print browser tool results instead of summarizing them
    #[arg(long)]
    pub show_browser_results: bool,

    /// Developer instructions to inject
    #[arg(long)]
    pub developer: Option<String>,
}

impl ChatArgs {
    fn apply_to(&self, config: &mut AppConfig) {
        if let Some(backend) = &self.backend {
            config.backend = backend.clone();
        }
        if let Some(url) = &self.server_url {
            config.server_url = url.clone();
        }
        if let Some(checkpoint) = &self.checkpoint {
            config.checkpoint = Some(checkpoint.clone());
        }
        if let Some(window) = self.context_window {
            config.context_window = window;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(reasoning) = &self.reasoning {
            config.reasoning = reasoning.clone();
        }
        config.tools.browser |= self.browser;
        config.tools.python |= self.python;
        config.tools.apply_patch |= self.apply_patch;
    }
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load()?;
    args.apply_to(&mut config);
    config.validate()?;

    let source = build_source(&config)?;
    let router = build_router(&config)?;

    let options = PromptOptions {
        reasoning: config.reasoning.clone(),
        browser: config.tools.browser,
        python: config.tools.python,
        apply_patch: config.tools.apply_patch,
        developer_instructions: args.developer.clone(),
    };
    let system_message = build_system_message(&options);
    let developer_message = build_developer_message(&options);

    let mut session = Session::new(source, router, system_message, developer_message)?;

    // In raw mode the user message frame is printed around each input so
    // the terminal shows exactly what the model sees.
    let user_frame = render_message(&Message::user(""));
    let frame_start = decode(&user_frame[..user_frame.len() - 1]);
    let frame_end = decode(&user_frame[user_frame.len() - 1..]);

    if args.raw {
        let tokens = render_conversation(session.conversation());
        print!("{}", decode(&tokens));
        std::io::stdout().flush()?;
    } else {
        println!("Backend: {}", config.backend);
        let mut tools = Vec::new();
        if config.tools.browser {
            tools.push("browser");
        }
        if config.tools.python {
            tools.push("python");
        }
        if config.tools.apply_patch {
            tools.push("apply_patch");
        }
        println!(
            "Tools: {}",
            if tools.is_empty() {
                "none".to_string()
            } else {
                tools.join(", ")
            }
        );
        println!("Type your message and press Enter. Ctrl+D to exit.");
        println!();
    }

    let stdin = std::io::stdin();
    loop {
        if args.raw {
            print!("{frame_start}");
        } else {
            println!("User:");
        }
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            // stdin EOF ends the session cleanly
            if !args.raw {
                println!("\nExiting...");
            }
            break;
        }
        let text = line.trim_end_matches(['\n', '\r']);

        if args.raw {
            print!("{frame_end}");
            std::io::stdout().flush()?;
            session
                .process_user_message(text, &mut RawObserver)
                .await?;
        } else {
            let mut observer =
                FormattedObserver::new(config.tools.browser, args.show_browser_results);
            session.process_user_message(text, &mut observer).await?;
        }
    }

    Ok(())
}
