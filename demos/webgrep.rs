//! Crawl a generated in-memory web and print every page matching a pattern.
//!
//! ```text
//! cargo run --example webgrep -- --threads 8 --pages 5000 'hive|queen'
//! RUST_LOG=petek=debug cargo run --example webgrep -- bee
//! ```

use clap::Parser;
use petek::crawl::{CrawlConfig, Crawler, StaticWeb};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const WORDS: &[&str] = &[
    "bee", "hive", "honey", "wax", "queen", "drone", "comb", "nectar", "pollen", "swarm",
];

#[derive(Debug, Parser)]
#[command(about = "Grep a generated web through the transactional dictionary")]
struct Args {
    /// Regular expression searched in every page.
    pattern: String,
    /// Worker threads fetching pages.
    #[arg(long, default_value_t = 4)]
    threads: usize,
    /// Number of pages in the generated web.
    #[arg(long, default_value_t = 1_000)]
    pages: usize,
    /// Outbound links per page.
    #[arg(long, default_value_t = 6)]
    links: usize,
    /// Seed of the generated web.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn generate(args: &Args) -> StaticWeb {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut web = StaticWeb::new();
    for i in 0..args.pages.max(1) {
        let text: Vec<&str> = (0..12)
            .map(|_| *WORDS.choose(&mut rng).unwrap_or(&"bee"))
            .collect();
        let hrefs: Vec<String> = (0..args.links)
            .map(|_| format!("https://hive.test/{}", rng.gen_range(0..args.pages.max(1))))
            .collect();
        web.insert(format!("https://hive.test/{i}"), text.join(" "), hrefs);
    }
    web
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let web = generate(&args);
    let config = CrawlConfig::new(args.pattern.clone()).threads(args.threads);

    let crawler = Crawler::new(web, config).on_match(|found| {
        println!("{}: {}", found.address, found.matches.join(", "));
    });

    match crawler.run(["https://hive.test/0"]) {
        Ok(report) => eprintln!(
            "visited {} pages, {} matched, {} failed",
            report.visited,
            report.matches.len(),
            report.failures
        ),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
