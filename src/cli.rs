use clap::{Parser, Subcommand};
use std::collections::{HashSet, VecDeque};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::AppError;
use crate::models::Candidate;
use crate::services::genres::GenreMap;
use crate::services::RecommendationService;

/// Recent picks remembered by the shell
pub const RECENT_CAPACITY: usize = 50;

/// Batch size used by the shell's `b` command
pub const SHELL_BATCH: usize = 3;

const OVERVIEW_PREFIX: &str = "> ";
const MAX_OVERVIEW_LINE: usize = 140;

#[derive(Parser)]
#[command(name = "reelpick")]
#[command(author, version, about = "Random movie picker backed by TMDb")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start the local web front end
    Serve {
        /// Host to bind to (overrides HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print one recommendation
    Pick {
        #[arg(long)]
        genre_id: Option<i64>,

        /// Seed for a reproducible draw
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print a diversified batch of recommendations
    Batch {
        #[arg(short, long, default_value_t = SHELL_BATCH)]
        count: usize,

        #[arg(long)]
        genre_id: Option<i64>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Re-fetch every era partition and rewrite the cache
    Refresh,

    /// Interactive shell (default)
    Shell,
}

/// Bounded memory of recently shown movie ids, oldest evicted first
#[derive(Debug, Clone)]
pub struct RecentMemory {
    ids: VecDeque<i64>,
    capacity: usize,
}

impl RecentMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn remember(&mut self, id: i64) {
        if let Some(pos) = self.ids.iter().position(|&known| known == id) {
            self.ids.remove(pos);
        }
        self.ids.push_back(id);
        while self.ids.len() > self.capacity {
            self.ids.pop_front();
        }
    }

    pub fn ids(&self) -> HashSet<i64> {
        self.ids.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Shell input, case-insensitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Pick,
    Batch,
    Refresh,
    Quit,
    Unknown(String),
}

impl ShellCommand {
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "" => ShellCommand::Pick,
            "b" => ShellCommand::Batch,
            "r" => ShellCommand::Refresh,
            "q" => ShellCommand::Quit,
            other => ShellCommand::Unknown(other.to_string()),
        }
    }
}

/// Three display lines: header, ratings and genres, trimmed overview.
pub fn format_movie(movie: &Candidate, genres: &GenreMap) -> String {
    let mut header = vec![movie.title.clone(), format!("[id:{}]", movie.id)];
    if let Some(year) = movie.release_year() {
        header.push(format!("({})", year));
    }
    let era = movie.source_era.as_deref().unwrap_or(&movie.era_tag);
    if !era.is_empty() {
        header.push(format!("[{}]", era));
    }

    let rating = movie
        .vote_average
        .map(|r| format!("{:.1}", r))
        .unwrap_or_else(|| "N/A".to_string());
    let mut meta = vec![
        format!("rating: {}", rating),
        format!("votes: {}", movie.vote_count),
    ];
    let names = genres.names_for(&movie.genre_ids);
    if !names.is_empty() {
        meta.push(format!("genres: {}", names.join(", ")));
    }

    format!(
        "{}\n{}\n{}{}",
        header.join(" "),
        meta.join(" · "),
        OVERVIEW_PREFIX,
        trim_overview(&movie.overview)
    )
}

/// Shortens the overview so that prefix plus text stays within the line limit.
fn trim_overview(overview: &str) -> String {
    let max_content = MAX_OVERVIEW_LINE.saturating_sub(OVERVIEW_PREFIX.chars().count());
    if overview.chars().count() <= max_content {
        return overview.to_string();
    }
    let kept: String = overview.chars().take(max_content.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

fn print_batch(movies: &[Candidate], genres: &GenreMap) {
    for (i, movie) in movies.iter().enumerate() {
        println!("{}.", i + 1);
        println!("{}", format_movie(movie, genres));
        println!("{}", "-".repeat(40));
    }
}

/// `pick` subcommand
pub async fn run_pick(
    service: &RecommendationService,
    genre_id: Option<i64>,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    match service.pick(genre_id, seed).await {
        Ok(movie) => {
            let genres = service.genre_map().await;
            println!("{}", format_movie(&movie, &genres));
            Ok(())
        }
        Err(AppError::NotFound(msg)) => {
            println!("{}", msg);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// `batch` subcommand
pub async fn run_batch(
    service: &RecommendationService,
    count: usize,
    genre_id: Option<i64>,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    match service.batch(count, genre_id, seed, &HashSet::new()).await {
        Ok(movies) => {
            let genres = service.genre_map().await;
            print_batch(&movies, &genres);
            Ok(())
        }
        Err(AppError::NotFound(msg)) => {
            println!("{}", msg);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// `refresh` subcommand
pub async fn run_refresh(service: &RecommendationService) -> anyhow::Result<()> {
    let aggregation = service.refresh().await;
    for report in &aggregation.partitions {
        println!(
            "{:<14} year {} page {:>2}: {:>3} movies ({:?})",
            report.label, report.year, report.page, report.count, report.source
        );
    }
    if aggregation.is_empty() {
        println!("refresh failed, no movies available");
    } else {
        println!("{} movies cached", aggregation.items.len());
    }
    Ok(())
}

/// Interactive loop: Enter picks one, `b` a batch, `r` refreshes, `q` quits.
pub async fn run_shell(service: &RecommendationService) -> anyhow::Result<()> {
    println!("reelpick");
    println!("Enter: pick one / b: batch of {} / r: refresh / q: quit\n", SHELL_BATCH);

    if service.pool().await.is_empty() {
        println!("no movies available (no API data and no cache)");
        return Ok(());
    }

    let mut genres = service.genre_map().await;
    let mut recent = RecentMemory::new(RECENT_CAPACITY);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };

        let result = match ShellCommand::parse(&line) {
            ShellCommand::Quit => {
                println!("bye");
                return Ok(());
            }
            ShellCommand::Refresh => {
                let aggregation = service.refresh().await;
                if aggregation.is_empty() {
                    println!("refresh failed, keeping current movies");
                } else {
                    println!("refreshed {} movies", aggregation.items.len());
                }
                if genres.is_empty() {
                    genres = service.genre_map().await;
                }
                Ok(())
            }
            ShellCommand::Batch => service
                .batch(SHELL_BATCH, None, None, &recent.ids())
                .await
                .map(|movies| {
                    println!();
                    print_batch(&movies, &genres);
                    movies.iter().for_each(|m| recent.remember(m.id));
                }),
            ShellCommand::Pick => service.pick(None, None).await.map(|movie| {
                println!("\n{}\n", format_movie(&movie, &genres));
                recent.remember(movie.id);
            }),
            ShellCommand::Unknown(input) => {
                println!("unknown command: {}", input);
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(AppError::NotFound(msg)) => println!("{}", msg),
            Err(e) => return Err(e.into()),
        }
    }
}
