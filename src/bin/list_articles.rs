use anyhow::Result;
use clap::Parser;
use feed_harvest::config;
use feed_harvest::db;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, version, about = "Page through stored articles, newest first")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Rows per page
    #[arg(long, default_value_t = 20)]
    limit: i64,

    /// Id of the last article of the previous page
    #[arg(long)]
    after: Option<String>,

    /// Only articles with no stored image (ignores --after)
    #[arg(long, default_value_t = false)]
    without_image: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let page = if args.without_image {
        db::list_articles_without_image(&pool, args.limit).await?
    } else {
        db::list_articles(&pool, args.limit, args.after.as_deref()).await?
    };
    for a in &page {
        println!(
            "{} | {} | {} | {} | {}",
            a.id,
            a.posted_at.format("%Y-%m-%d"),
            a.tag_index.as_deref().unwrap_or("-"),
            a.title,
            a.image_url
        );
    }
    println!(
        "{} of {} articles",
        page.len(),
        db::count_articles(&pool).await?
    );
    if let Some(last) = page.last() {
        if !args.without_image && page.len() as i64 == args.limit {
            println!("next page: --after {}", last.id);
        }
    }
    Ok(())
}
