use anyhow::Result;
use clap::Parser;
use feed_harvest::export;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, version, about = "Summarize a crawl export file")]
struct Args {
    /// Export JSON written by a crawl
    export: PathBuf,

    /// Also print every record
    #[arg(long, default_value_t = false)]
    records: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let export = export::read_export(&args.export).await?;

    let missing_image = export
        .articles
        .iter()
        .filter(|r| r.image_url.is_empty())
        .count();
    let missing_link = export.articles.iter().filter(|r| r.url.is_empty()).count();

    println!("source:        {}", export.source);
    println!("category:      {}", export.category);
    println!("scraped at:    {}", export.scraped_at.to_rfc3339());
    println!("articles:      {}", export.total_articles);
    println!("missing image: {}", missing_image);
    println!("missing link:  {}", missing_link);

    if args.records {
        for (i, r) in export.articles.iter().enumerate() {
            println!(
                "[{:>4}] {} | {} | {} | {}",
                i + 1,
                r.posted_at.format("%Y-%m-%d"),
                r.author_name,
                r.title,
                if r.image_url.is_empty() { "-" } else { r.image_url.as_str() }
            );
        }
    }
    Ok(())
}
