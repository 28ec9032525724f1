//! # Nodeboard Binary
//!
//! Maintenance entry point that assembles the store from configuration and
//! compile-time features, then runs one subcommand:
//!
//! - `bootstrap` (default): create the `Status` record, seed demo content
//!   when `seed.demo` is set and the store is empty, print totals
//! - `reconcile`: repair drifted counters and latest-reply pointers
//! - `stats`: print totals only

use anyhow::Context;
use clap::{Parser, Subcommand};
use configs::{LogSettings, Settings, StoreBackend, StoreSettings};
use nb_auth_argon::ArgonCredentials;
use nb_core::lifecycle::{self, NewNode, NewReply, NewSite, NewTopic, NewUser};
use nb_core::{DocumentStore, EscapingRenderer, ForumStore};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// Feature-gated imports
#[cfg(feature = "db-sqlite")]
use nb_store_sqlite::SqliteDocumentStore;

#[cfg(feature = "store-memory")]
use nb_store_memory::MemoryDocumentStore;

#[derive(Parser, Debug)]
#[command(name = "nodeboard", about = "Nodeboard store maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Create the status record and seed demo content when enabled (default)
    Bootstrap,
    /// Repair drifted counters and latest-reply pointers
    Reconcile,
    /// Print forum totals
    Stats,
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_store(settings: &StoreSettings) -> anyhow::Result<ForumStore> {
    let backend: Arc<dyn DocumentStore> = match settings.backend {
        #[cfg(feature = "store-memory")]
        StoreBackend::Memory => Arc::new(MemoryDocumentStore::new()),
        #[cfg(feature = "db-sqlite")]
        StoreBackend::Sqlite => Arc::new(
            SqliteDocumentStore::new(settings.database_url.expose_secret())
                .await
                .context("Failed to init SQLite")?,
        ),
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("store backend {other:?} is not compiled into this binary"),
    };
    Ok(ForumStore::new(backend).with_query_timeout(settings.query_timeout()))
}

/// Populates an empty store with a small, consistent demo forum.
async fn seed_demo(store: &ForumStore) -> anyhow::Result<()> {
    let credentials = ArgonCredentials::new();
    let renderer = EscapingRenderer;

    // 1. Users, activated with the codes they were issued
    let mut users = Vec::new();
    for (name, password) in [("alice", "alice-demo-pass"), ("bob", "bob-demo-pass")] {
        let registration = lifecycle::register_user(
            store,
            &credentials,
            NewUser {
                username: name.to_string(),
                password: SecretString::from(password.to_string()),
                email: format!("{name}@example.com"),
            },
        )
        .await?;
        let user = lifecycle::activate_user(store, &credentials, name, &registration.validate_code).await?;
        users.push(user);
    }
    let (alice, bob) = (&users[0], &users[1]);
    lifecycle::follow(store, &bob.username, &alice.username).await?;

    // 2. A node with one discussion
    let node = lifecycle::create_node(
        store,
        NewNode {
            slug: "go".into(),
            name: "Go".into(),
            description: "The Go programming language".into(),
        },
    )
    .await?;
    let topic = lifecycle::create_topic(
        store,
        &renderer,
        NewTopic {
            node_id: node.id,
            user_id: alice.id,
            title: "Welcome to Nodeboard".into(),
            markdown: "Say hello below.\n\n> Be kind.".into(),
        },
    )
    .await?;
    for (author, text) in [(bob, "Hello!"), (alice, "Welcome, bob.")] {
        lifecycle::add_reply(
            store,
            &renderer,
            NewReply {
                topic_id: topic.id,
                user_id: author.id,
                markdown: text.into(),
                created_at: None,
            },
        )
        .await?;
    }

    // 3. Site directory
    let category = lifecycle::create_site_category(store, "Community").await?;
    lifecycle::create_site(
        store,
        NewSite {
            name: "Go".into(),
            url: "https://go.dev".into(),
            description: "Official site".into(),
            category_id: category.id,
            user_id: alice.id,
        },
    )
    .await?;

    tracing::info!("demo content seeded");
    Ok(())
}

async fn print_stats(store: &ForumStore) -> anyhow::Result<()> {
    let status = store.status().await?.context("status record missing")?;
    tracing::info!(
        users = status.user_count,
        topics = status.topic_count,
        replies = status.reply_count,
        next_user_index = status.user_index,
        "forum totals"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    init_tracing(&settings.log);

    let store = build_store(&settings.store).await?;

    match cli.command.unwrap_or(Command::Bootstrap) {
        Command::Bootstrap => {
            let status = lifecycle::bootstrap_status(&store).await?;
            if settings.seed.demo && status.user_count == 0 {
                seed_demo(&store).await?;
            }
        }
        Command::Reconcile => {
            lifecycle::bootstrap_status(&store).await?;
            let report = lifecycle::reconcile_counters(&store).await?;
            if report.is_clean() {
                tracing::info!("no drift found");
            }
        }
        Command::Stats => {}
    }

    print_stats(&store).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_subcommands_parse() {
        let parse = |args: &[&str]| Cli::try_parse_from(args).map(|cli| cli.command);
        assert_eq!(parse(&["nodeboard"]).unwrap(), None);
        assert_eq!(parse(&["nodeboard", "reconcile"]).unwrap(), Some(Command::Reconcile));
        assert_eq!(parse(&["nodeboard", "stats"]).unwrap(), Some(Command::Stats));
        assert!(parse(&["nodeboard", "explode"]).is_err());
    }
}
