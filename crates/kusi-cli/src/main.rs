//! `kusi`: command-line access to a Kusi entity store.
//!
//! Reads `kusi.toml` (or the path given with `--config`), overlays `KUSI_*`
//! environment variables, opens the SQLite store and runs one operation.
//! Results are printed as JSON.
//!
//! # Usage
//!
//! ```
//! kusi seed
//! kusi ancestors hello --fields e.id,contents.title
//! kusi get-one home --lang grouped
//! echo '{"model":"page","parent":"blog","contents":{"title":"Hi"}}' | kusi create -
//! ```

mod seed;

use std::{
  io::Read as _,
  path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use kusi_core::{
  Settings,
  entity::NewEntity,
  fields::{FieldSet, Lang, OrderSpec},
  relation::NewRelation,
  store::{EntityStore, ListQuery, Scope},
};
use kusi_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kusi", author, version, about = "Kusi entity store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "kusi.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

/// Field and language selectors shared by the read commands.
#[derive(Args)]
struct Select {
  /// Comma-separated field specifiers, e.g. `e.id,contents.title,data.*`.
  /// Empty selects everything.
  #[arg(short, long, default_value = "")]
  fields: String,

  /// Content language. `get-one` and `parent` also accept `raw` and
  /// `grouped`.
  #[arg(short, long)]
  lang: Option<String>,
}

impl Select {
  fn fields(&self) -> anyhow::Result<FieldSet> {
    FieldSet::from_csv(&self.fields).context("invalid --fields")
  }

  fn lang(&self) -> Option<Lang> { self.lang.as_deref().map(Lang::parse) }
}

#[derive(Subcommand)]
enum Command {
  /// Create an entity from a JSON payload; `-` reads it from stdin.
  Create { payload: String },

  /// Fetch one entity.
  GetOne {
    id:     String,
    #[command(flatten)]
    select: Select,
  },

  /// List entities.
  List {
    /// Only entities of this model.
    #[arg(long, conflicts_with = "related_from")]
    model:        Option<String>,
    /// Entities this id points at; needs `--kind`.
    #[arg(long, requires = "kind")]
    related_from: Option<String>,
    #[arg(long)]
    kind:         Option<String>,
    #[command(flatten)]
    select:       Select,
    /// Comma-separated order specifiers, e.g. `contents.title:desc`.
    #[arg(short, long)]
    order:        Option<String>,
  },

  /// Immediate children of an entity, newest first.
  Children {
    id:     String,
    #[command(flatten)]
    select: Select,
    #[arg(short, long)]
    order:  Option<String>,
  },

  /// Ancestors of an entity, nearest first.
  Ancestors {
    id:     String,
    #[command(flatten)]
    select: Select,
    #[arg(short, long)]
    order:  Option<String>,
  },

  /// The parent of an entity.
  Parent {
    id:     String,
    #[command(flatten)]
    select: Select,
  },

  /// Relate two entities.
  Relate {
    caller:   String,
    called:   String,
    kind:     String,
    #[arg(long)]
    position: Option<i64>,
    /// Comma-separated tags.
    #[arg(long, value_delimiter = ',')]
    tags:     Vec<String>,
  },

  /// Soft-delete an entity.
  Delete { id: String },

  /// Write a small demo website into the store.
  Seed,
}

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CliConfig {
  #[serde(default = "default_store_path")]
  store_path:   PathBuf,
  #[serde(default)]
  default_lang: String,
}

fn default_store_path() -> PathBuf { PathBuf::from("kusi.db") }

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("KUSI"))
    .build()
    .context("failed to read config file")?;

  let cfg: CliConfig = settings
    .try_deserialize()
    .context("failed to deserialise CliConfig")?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = SqliteStore::open(&store_path, Settings::with_default_lang(cfg.default_lang))
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Create { payload } => {
      let input: NewEntity = serde_json::from_str(&read_payload(&payload)?)
        .context("invalid create payload")?;
      print(&store.create(input).await?)
    }
    Command::GetOne { id, select } => {
      let entity = store
        .get_one(id.into(), select.fields()?, select.lang())
        .await?;
      print(&entity)
    }
    Command::List {
      model,
      related_from,
      kind,
      select,
      order,
    } => {
      let scope = match (model, related_from, kind) {
        (Some(model), ..) => Scope::Model(model),
        (None, Some(id), Some(kind)) => Scope::RelatedFrom {
          id: id.into(),
          kind,
        },
        _ => Scope::All,
      };
      let query = ListQuery {
        scope,
        fields: select.fields()?,
        lang: select.lang(),
        order: parse_order(order.as_deref())?.unwrap_or_default(),
      };
      print(&store.get(query).await?)
    }
    Command::Children { id, select, order } => {
      let rows = store
        .get_children(
          id.into(),
          select.fields()?,
          select.lang(),
          parse_order(order.as_deref())?,
        )
        .await?;
      print(&rows)
    }
    Command::Ancestors { id, select, order } => {
      let rows = store
        .get_ancestors(
          id.into(),
          select.fields()?,
          select.lang(),
          parse_order(order.as_deref())?,
        )
        .await?;
      print(&rows)
    }
    Command::Parent { id, select } => {
      let parent = store
        .get_parent(id.into(), select.fields()?, select.lang())
        .await?;
      print(&parent)
    }
    Command::Relate {
      caller,
      called,
      kind,
      position,
      tags,
    } => {
      let mut input = NewRelation::new(caller, called, kind);
      input.position = position;
      input.tags = tags;
      print(&store.relate(input).await?)
    }
    Command::Delete { id } => {
      store.delete(id.clone().into()).await?;
      tracing::info!(%id, "deleted");
      Ok(())
    }
    Command::Seed => {
      let ids = seed::run(&store)
        .await
        .context("seeding failed; is the store already seeded?")?;
      print(&ids)
    }
  }
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn parse_order(raw: Option<&str>) -> anyhow::Result<Option<OrderSpec>> {
  raw
    .map(|raw| OrderSpec::from_csv(raw).context("invalid --order"))
    .transpose()
}

/// Inline JSON, or stdin when `payload` is `-`.
fn read_payload(payload: &str) -> anyhow::Result<String> {
  if payload != "-" {
    return Ok(payload.to_owned());
  }
  let mut raw = String::new();
  std::io::stdin()
    .read_to_string(&mut raw)
    .context("failed to read payload from stdin")?;
  Ok(raw)
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
