//! Subcommand handlers.

use anyhow::{bail, Context, Result};
use serde_json::Value;

use mnemosyne_core::expr;
use mnemosyne_core::memory::{memory_schema, MemoryScope};
use mnemosyne_core::types::Filter;
use mnemosyne_core::MnemosyneConfig;
use mnemosyne_vector_stores::VectorDatabaseFactory;

use crate::{Command, ScopeArgs};

impl ScopeArgs {
    /// Combine the persona/session scope with the raw filter.
    ///
    /// Returns an empty string when nothing narrows the selection.
    fn to_expr(&self) -> Result<String> {
        let scope = MemoryScope {
            personality_id: self.persona.clone(),
            session_id: self.session.clone(),
        };

        let mut parts: Vec<Filter> = scope.to_filter().into_iter().collect();
        if let Some(raw) = &self.filter {
            if let Some(filter) =
                expr::parse(raw).with_context(|| format!("invalid filter '{}'", raw))?
            {
                parts.push(filter);
            }
        }

        Ok(match parts.len() {
            0 => String::new(),
            1 => parts.remove(0).to_expr(),
            _ => Filter::and(parts).to_expr(),
        })
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) async fn run(command: Command, config: MnemosyneConfig) -> Result<()> {
    let collection = config.collection_name.clone();
    let dim = config.embedding_dim;
    let top_k = config.top_k;

    let db = VectorDatabaseFactory::connect(config.vector_database)
        .await
        .context("failed to connect to the vector database")?;

    let result: Result<()> = async {
        match command {
            Command::Collections { loaded } => {
                let names = if loaded {
                    db.get_loaded_collections().await?
                } else {
                    db.list_collections().await?
                };
                for name in names {
                    println!("{}", name);
                }
                Ok(())
            }

            Command::Create { dim: override_dim } => {
                let schema = memory_schema(override_dim.unwrap_or(dim));
                db.create_collection(&collection, &schema).await?;
                println!("collection '{}' is ready", collection);
                Ok(())
            }

            Command::Check { dim: override_dim } => {
                let schema = memory_schema(override_dim.unwrap_or(dim));
                if db
                    .check_collection_schema_consistency(&collection, &schema)
                    .await?
                {
                    println!("collection '{}' matches the memory schema", collection);
                    Ok(())
                } else {
                    bail!("collection '{}' does not match the memory schema", collection)
                }
            }

            Command::Latest { limit } => {
                let rows = db.get_latest_memory(&collection, limit).await?;
                print_json(&strip_embeddings(rows))
            }

            Command::Query { scope, fields } => {
                let filter = scope.to_expr()?;
                let rows = db.query(&collection, &filter, &fields).await?;
                print_json(&strip_embeddings(rows))
            }

            Command::Search {
                vector,
                top_k: k,
                scope,
            } => {
                let filter = scope.to_expr()?;
                let filter = (!filter.is_empty()).then_some(filter);
                let hits = db
                    .search(&collection, &vector, k.unwrap_or(top_k), filter.as_deref())
                    .await?;
                print_json(&hits)
            }

            Command::Delete { scope } => {
                let filter = scope.to_expr()?;
                if filter.is_empty() {
                    bail!("refusing to delete without --persona, --session or --filter; use `drop` instead");
                }
                db.delete(&collection, &filter).await?;
                println!("deleted rows matching {}", filter);
                Ok(())
            }

            Command::Drop { yes } => {
                if !yes {
                    bail!("dropping '{}' deletes all its memories; pass --yes to confirm", collection);
                }
                db.drop_collection(&collection).await?;
                println!("dropped collection '{}'", collection);
                Ok(())
            }
        }
    }
    .await;

    db.close().await?;
    result
}

fn strip_embeddings(rows: Vec<mnemosyne_core::types::Entity>) -> Vec<Value> {
    rows.into_iter()
        .map(|mut row| {
            row.remove(mnemosyne_core::traits::EMBEDDING_FIELD);
            Value::Object(row.into_iter().collect())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(persona: Option<&str>, session: Option<&str>, filter: Option<&str>) -> ScopeArgs {
        ScopeArgs {
            persona: persona.map(str::to_string),
            session: session.map(str::to_string),
            filter: filter.map(str::to_string),
        }
    }

    #[test]
    fn test_empty_scope() {
        assert_eq!(ScopeArgs::default().to_expr().unwrap(), "");
    }

    #[test]
    fn test_scope_with_filter() {
        let expr = args(Some("alice"), None, Some("create_time > 10"))
            .to_expr()
            .unwrap();
        assert_eq!(expr, r#"personality_id == "alice" and create_time > 10"#);
    }

    #[test]
    fn test_session_scope() {
        let expr = args(Some("alice"), Some("s1"), None).to_expr().unwrap();
        assert_eq!(expr, r#"personality_id == "alice" and session_id == "s1""#);
    }

    #[test]
    fn test_invalid_filter() {
        assert!(args(None, None, Some("a ==")).to_expr().is_err());
    }
}
