use std::io::Write;
use std::time::Instant;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use hn_scraper::{Client, PageParams};

#[derive(Parser)]
#[command(name = "hn_scraper", about = "Streaming Hacker News extractor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream one front page as JSON lines
    Front {
        /// Page number (1-based)
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        /// Listings per page, if the site honors it
        #[arg(short = 'n', long)]
        page_size: Option<u32>,
    },
    /// Stream a thread: header line first, then its comments
    Thread {
        /// Item id
        id: u64,
        /// Comment page for deep threads
        #[arg(short, long)]
        page: Option<u32>,
    },
    /// Fetch one user profile
    User {
        /// Username
        id: String,
    },
    /// Follow front-page continuations and stream every listing
    Crawl {
        /// Max pages to follow
        #[arg(short = 'n', long, default_value_t = 5)]
        pages: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Front { page, page_size } => {
            let mut params = PageParams::page(page);
            params.page_size = page_size;
            let mut stream = client.fetch_listings(&params)?;
            let mut count = 0usize;
            while let Some(listing) = stream.recv().await {
                emit_line(&listing?)?;
                count += 1;
            }
            let token = stream.continuation().await;
            eprintln!("{count} listings; next: {}", display_token(&token));
        }
        Commands::Thread { id, page } => {
            let mut params = PageParams::item(id);
            params.page = page;
            let mut thread = client.fetch_thread(id, &params).await?;
            emit_line(&thread.header)?;
            let mut count = 0usize;
            while let Some(comment) = thread.comments.recv().await {
                emit_line(&comment?)?;
                count += 1;
            }
            let token = thread.comments.continuation().await;
            eprintln!("{count} comments; next: {}", display_token(&token));
        }
        Commands::User { id } => {
            let profile = client.fetch_user_profile(&id).await?;
            emit_line(&profile)?;
        }
        Commands::Crawl { pages } => {
            let pb = ProgressBar::new(u64::from(pages));
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages ({msg} listings)")?
                    .progress_chars("#>-"),
            );

            let mut params = PageParams::page(1);
            let mut total = 0usize;
            for _ in 0..pages {
                let mut stream = client.fetch_listings(&params)?;
                while let Some(listing) = stream.recv().await {
                    emit_line(&listing?)?;
                    total += 1;
                }
                let token = stream.continuation().await;
                pb.inc(1);
                pb.set_message(total.to_string());
                if token.is_empty() {
                    break;
                }
                params = PageParams::continuation(token);
            }
            pb.finish_and_clear();
            eprintln!("{total} listings");
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("Done in {:.1}s", elapsed.as_secs_f64());
    }

    Ok(())
}

fn emit_line<T: Serialize>(record: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, record)?;
    stdout.write_all(b"\n")?;
    Ok(())
}

fn display_token(token: &str) -> &str {
    if token.is_empty() {
        "(none)"
    } else {
        token
    }
}
