use super::model::{ArticleEntity, AuthorEntity, NewArticle, NewAuthor};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

const ARTICLE_COLUMNS: &str = "id, author_id, tag, tag_index, title, href, image_url, image_key, \
     posted_at, read_duration, summary, created_at, updated_at";
const AUTHOR_COLUMNS: &str =
    "id, name, avatar_url, avatar_key, profile_url, created_at, updated_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn author_from_row(row: &SqliteRow) -> Result<AuthorEntity> {
    Ok(AuthorEntity {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        avatar_url: row.try_get("avatar_url")?,
        avatar_key: row.try_get("avatar_key")?,
        profile_url: row.try_get("profile_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn article_from_row(row: &SqliteRow) -> Result<ArticleEntity> {
    Ok(ArticleEntity {
        id: row.try_get("id")?,
        author_id: row.try_get("author_id")?,
        tag: row.try_get("tag")?,
        tag_index: row.try_get("tag_index")?,
        title: row.try_get("title")?,
        href: row.try_get("href")?,
        image_url: row.try_get("image_url")?,
        image_key: row.try_get("image_key")?,
        posted_at: row.try_get("posted_at")?,
        read_duration: row.try_get("read_duration")?,
        summary: row.try_get("summary")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn articles_from_rows(rows: Vec<SqliteRow>) -> Result<Vec<ArticleEntity>> {
    rows.iter().map(article_from_row).collect()
}

#[instrument(skip_all)]
pub async fn find_article_by_title(pool: &Pool, title: &str) -> Result<Option<ArticleEntity>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM articles WHERE title = ? LIMIT 1",
        ARTICLE_COLUMNS
    ))
    .bind(title)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(article_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn find_article(pool: &Pool, id: &str) -> Result<Option<ArticleEntity>> {
    let row = sqlx::query(&format!("SELECT {} FROM articles WHERE id = ?", ARTICLE_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(article_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn find_author_by_name(pool: &Pool, name: &str) -> Result<Option<AuthorEntity>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM authors WHERE name = ?",
        AUTHOR_COLUMNS
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(author_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn create_author(pool: &Pool, author: &NewAuthor) -> Result<AuthorEntity> {
    let now = Utc::now();
    let row = sqlx::query(&format!(
        "INSERT INTO authors (id, name, avatar_url, avatar_key, profile_url, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {}",
        AUTHOR_COLUMNS
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(&author.name)
    .bind(&author.avatar_url)
    .bind(&author.avatar_key)
    .bind(&author.profile_url)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to create author {}", author.name))?;
    author_from_row(&row)
}

#[instrument(skip_all)]
pub async fn create_article(pool: &Pool, article: &NewArticle) -> Result<ArticleEntity> {
    let now = Utc::now();
    let row = sqlx::query(&format!(
        "INSERT INTO articles (id, author_id, tag, title, href, image_url, image_key, posted_at, \
         read_duration, summary, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {}",
        ARTICLE_COLUMNS
    ))
    .bind(Uuid::new_v4().to_string())
    .bind(&article.author_id)
    .bind(&article.tag)
    .bind(&article.title)
    .bind(&article.href)
    .bind(&article.image_url)
    .bind(&article.image_key)
    .bind(article.posted_at)
    .bind(&article.read_duration)
    .bind(&article.summary)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to create article {}", article.title))?;
    article_from_row(&row)
}

/// Most recently updated first. `cursor` is the id of the last row of the previous page.
#[instrument(skip_all)]
pub async fn list_articles(
    pool: &Pool,
    limit: i64,
    cursor: Option<&str>,
) -> Result<Vec<ArticleEntity>> {
    let rows = match cursor {
        Some(cursor) => {
            sqlx::query(&format!(
                "SELECT {} FROM articles \
                 WHERE (updated_at, id) < (SELECT updated_at, id FROM articles WHERE id = ?) \
                 ORDER BY updated_at DESC, id DESC LIMIT ?",
                ARTICLE_COLUMNS
            ))
            .bind(cursor)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM articles ORDER BY updated_at DESC, id DESC LIMIT ?",
                ARTICLE_COLUMNS
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    articles_from_rows(rows)
}

/// Oldest post first; used to hand out sequential tag indexes.
#[instrument(skip_all)]
pub async fn list_articles_by_posted_at(pool: &Pool, limit: i64) -> Result<Vec<ArticleEntity>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM articles ORDER BY posted_at ASC, created_at ASC LIMIT ?",
        ARTICLE_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    articles_from_rows(rows)
}

/// Articles whose image was never re-hosted.
#[instrument(skip_all)]
pub async fn list_articles_without_image(pool: &Pool, limit: i64) -> Result<Vec<ArticleEntity>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM articles WHERE image_key IS NULL OR image_url = '' \
         ORDER BY updated_at DESC LIMIT ?",
        ARTICLE_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    articles_from_rows(rows)
}

/// Articles whose stored image URL still carries a query string.
#[instrument(skip_all)]
pub async fn list_articles_with_query_image(
    pool: &Pool,
    limit: i64,
) -> Result<Vec<ArticleEntity>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM articles WHERE instr(image_url, '?') > 0 ORDER BY updated_at DESC LIMIT ?",
        ARTICLE_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    articles_from_rows(rows)
}

#[instrument(skip_all)]
pub async fn list_articles_without_link(pool: &Pool, limit: i64) -> Result<Vec<ArticleEntity>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM articles WHERE href IS NULL OR href = '' ORDER BY updated_at DESC LIMIT ?",
        ARTICLE_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    articles_from_rows(rows)
}

#[instrument(skip_all)]
pub async fn update_article_image(pool: &Pool, id: &str, url: &str, key: &str) -> Result<()> {
    sqlx::query("UPDATE articles SET image_url = ?, image_key = ?, updated_at = ? WHERE id = ?")
        .bind(url)
        .bind(key)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update article image")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn update_article_link(pool: &Pool, id: &str, href: &str) -> Result<()> {
    sqlx::query("UPDATE articles SET href = ?, updated_at = ? WHERE id = ?")
        .bind(href)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update article link")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn update_article_tag_index(pool: &Pool, id: &str, tag_index: &str) -> Result<()> {
    sqlx::query("UPDATE articles SET tag_index = ?, updated_at = ? WHERE id = ?")
        .bind(tag_index)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update article tag index")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_articles(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn count_authors(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM authors")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
