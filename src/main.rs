use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use olan::client::{ChatClient, StreamOutcome};
use olan::config::Settings;
use olan::message::ChatMessage;
use olan::prompt::ASSISTANT_NAME;
use olan::stream::StreamChunk;
use olan::web_server;
use olan::widget::{ChatWidget, WidgetStatus};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the chat relay HTTP server.
    Serve {
        #[command(flatten)]
        settings: Settings,
    },
    /// Chat with a running relay from the terminal.
    Chat {
        #[arg(
            long,
            env = "OLAN_URL",
            default_value = "http://localhost:3001",
            help = "Base URL of the relay."
        )]
        url: String,
        #[arg(long, help = "Send this message before reading from stdin.")]
        prompt: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env.local wins over .env; real environment variables win over both.
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { settings } => {
            info!(port = settings.port, model = %settings.model, "Starting Olan chat relay");
            web_server::start_web_server(settings)
                .await
                .context("Chat relay failed")?;
        }
        Commands::Chat { url, prompt } => run_chat(ChatClient::new(url), prompt).await?,
    }

    Ok(())
}

async fn run_chat(client: ChatClient, prompt: Option<String>) -> Result<()> {
    let mut widget = ChatWidget::new();
    println!("{}: {}", ASSISTANT_NAME, widget.messages()[0].text());
    println!("(commands: /clear, /retry, /quit)");

    if let Some(prompt) = prompt {
        println!("> {}", prompt);
        widget.set_prompt(prompt);
        if let Some(history) = widget.submit() {
            exchange(&client, &mut widget, history).await;
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        match input {
            "/quit" => break,
            "/clear" => {
                widget.clear();
                println!("{}: {}", ASSISTANT_NAME, widget.messages()[0].text());
            }
            "/retry" => match widget.retry() {
                Some(history) => exchange(&client, &mut widget, history).await,
                None => println!("Nothing to retry."),
            },
            _ => {
                widget.set_prompt(input);
                if let Some(history) = widget.submit() {
                    exchange(&client, &mut widget, history).await;
                }
            }
        }
    }
    Ok(())
}

/// One request/response round, printing the reply as it streams in.
async fn exchange(client: &ChatClient, widget: &mut ChatWidget, history: Vec<ChatMessage>) {
    let had_lead = widget.lead_captured();
    print!("{}: ", ASSISTANT_NAME);
    std::io::stdout().flush().ok();

    let outcome = client
        .send(&history, |chunk| {
            if let StreamChunk::Content { delta, .. } = &chunk {
                print!("{}", delta);
                std::io::stdout().flush().ok();
            }
            widget.apply_chunk(chunk);
        })
        .await;
    println!();

    match outcome {
        Ok(StreamOutcome::Completed) => {}
        Ok(StreamOutcome::Closed) => widget.stream_closed(),
        Err(e) => widget.fail(e.to_string()),
    }
    if let WidgetStatus::Failed { reason } = widget.status() {
        println!("[error] {} (type /retry to try again)", reason);
    }
    if widget.lead_captured() && !had_lead {
        println!("[lead captured] Thanks! Our team will be in touch within 24 hours.");
    }
}
