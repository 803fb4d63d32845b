//! Durable file/nut catalog operations.

use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use hoard_model::Nut;
use sqlx::sqlite::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

use crate::db::Database;
use crate::error::{ErrorKind, Result};
use crate::models::NutRow;
use crate::selection::{ScratchGuard, Selection};
use crate::squirrel::Squirrel;

/// Handle onto the durable side of one catalog database.
///
/// Cheap to clone; all clones share the pool and the dirty flag. The
/// durable tables survive process restarts, so everything written through
/// [`dig`](Catalog::dig) is visible to later processes, while selections
/// created through this handle vanish with the process.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
    dirty: Arc<AtomicBool>,
}

impl From<&Database> for Catalog {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone(), dirty: Arc::clone(&db.dirty) }
    }
}

impl Catalog {
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Index a batch of nut records, replacing per file.
    ///
    /// Nuts are grouped by their owning file; for each file the previous
    /// file row and all of its nuts are dropped before the new ones go in,
    /// so a file's index entries always reflect exactly one read of it.
    /// The whole batch is one transaction: a crash mid-dig leaves the
    /// previous state intact.
    ///
    /// Kind/codes reference counts are kept in step; rows whose count
    /// drops to zero are retained so their ids stay stable.
    #[instrument(skip_all, fields(nuts = nuts.len()))]
    pub async fn dig(&self, nuts: &[Nut]) -> Result<()> {
        if nuts.is_empty() {
            return Ok(());
        }

        let mut by_file: HashMap<(&str, &str, u64), Vec<&Nut>> = HashMap::new();
        let mut counts: HashMap<(&str, String), i64> = HashMap::new();
        for nut in nuts {
            by_file
                .entry((nut.file_name.as_str(), nut.file_format.as_str(), nut.file_mtime.to_bits()))
                .or_default()
                .push(nut);
            *counts.entry((nut.kind.as_str(), nut.codes.joined())).or_default() += 1;
        }

        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;

        for ((kind, codes), n) in &counts {
            sqlx::query(include_str!("../queries/ensure_kind_codes.sql"))
                .bind(kind)
                .bind(codes)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            sqlx::query(include_str!("../queries/bump_kind_codes.sql"))
                .bind(n)
                .bind(kind)
                .bind(codes)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }

        for ((file_name, file_format, mtime_bits), file_nuts) in by_file {
            // Undo the reference counts contributed by the file's previous
            // nuts before dropping them.
            sqlx::query(include_str!("../queries/decrement_kind_codes_for_file.sql"))
                .bind(file_name)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            sqlx::query(include_str!("../queries/delete_nuts_for_file.sql"))
                .bind(file_name)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            sqlx::query(include_str!("../queries/delete_file.sql"))
                .bind(file_name)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;

            let file_id = sqlx::query(include_str!("../queries/insert_file.sql"))
                .bind(file_name)
                .bind(file_format)
                .bind(f64::from_bits(mtime_bits))
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?
                .last_insert_rowid();

            for nut in file_nuts {
                sqlx::query(include_str!("../queries/insert_nut.sql"))
                    .bind(file_id)
                    .bind(nut.file_segment)
                    .bind(nut.file_element)
                    .bind(&nut.kind)
                    .bind(nut.codes.joined())
                    .bind(nut.tmin_seconds)
                    .bind(nut.tmin_offset)
                    .bind(nut.tmax_seconds)
                    .bind(nut.tmax_offset)
                    .bind(nut.deltat)
                    .bind(nut.kscale())
                    .execute(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
            }
        }

        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// All nut records of one file, empty if the file is unknown.
    pub async fn undig(&self, file_name: &str) -> Result<Vec<Nut>> {
        let rows: Vec<NutRow> = sqlx::query_as(include_str!("../queries/undig.sql"))
            .bind(file_name)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(Nut::from).collect())
    }

    /// Stream every indexed file with its nuts, one item per file.
    ///
    /// Rows arrive ordered by file id, so each file's nuts are contiguous
    /// and a file name is yielded exactly once.
    pub fn undig_all(&self) -> impl Stream<Item = Result<(String, Vec<Nut>)>> + '_ {
        stream! {
            let mut rows =
                sqlx::query_as::<_, NutRow>(include_str!("../queries/undig_all.sql"))
                    .fetch(&self.pool);
            let mut current: Option<(String, Vec<Nut>)> = None;
            while let Some(row) = rows.next().await {
                let nut = match row {
                    Ok(row) => Nut::from(row),
                    Err(error) => {
                        yield Err(error).or_raise(|| ErrorKind::Database);
                        return;
                    }
                };
                match &mut current {
                    Some((file_name, nuts)) if *file_name == nut.file_name => nuts.push(nut),
                    _ => {
                        if let Some(group) = current.take() {
                            yield Ok(group);
                        }
                        current = Some((nut.file_name.clone(), vec![nut]));
                    }
                }
            }
            if let Some(group) = current.take() {
                yield Ok(group);
            }
        }
    }

    /// Stream the nuts of the given files, one item per name, in the given
    /// order. Unknown names yield an empty nut list.
    ///
    /// Backed by a scratch selection that is removed when the stream
    /// completes (or, best effort, when it is dropped early).
    pub fn undig_many(
        &self,
        file_names: Vec<String>,
    ) -> impl Stream<Item = Result<(String, Vec<Nut>)>> + '_ {
        stream! {
            let selection = match Selection::create(self.clone()).await {
                Ok(selection) => selection,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };
            if let Err(error) = selection.add(&file_names).await {
                if let Err(cleanup) = selection.delete().await {
                    tracing::warn!(?cleanup, "failed to drop scratch selection");
                }
                yield Err(error);
                return;
            }
            let guard = ScratchGuard::new(selection);
            {
                let grouped = guard.selection().undig_grouped(false);
                futures::pin_mut!(grouped);
                while let Some(item) = grouped.next().await {
                    yield item;
                }
            }
            if let Err(error) = guard.disarm().delete().await {
                yield Err(error);
            }
        }
    }

    /// Recorded modification time of one file, `None` if unknown.
    pub async fn get_mtime(&self, file_name: &str) -> Result<Option<f64>> {
        let row: Option<(f64,)> = sqlx::query_as(include_str!("../queries/get_mtime.sql"))
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(|(mtime,)| mtime))
    }

    /// Recorded modification times for many files, positionally aligned
    /// with the input (duplicates included).
    ///
    /// Goes through a scratch selection so the lookup is one join instead
    /// of a query per name.
    pub async fn get_mtimes(&self, file_names: &[String]) -> Result<Vec<Option<f64>>> {
        if file_names.is_empty() {
            return Ok(Vec::new());
        }
        let mut seen = HashSet::new();
        let mut distinct = Vec::new();
        for file_name in file_names {
            if seen.insert(file_name.as_str()) {
                distinct.push(file_name.clone());
            }
        }
        let selection = self.new_selection(Some(&distinct)).await?;
        let fetched = selection.get_mtimes().await;
        selection.delete().await?;
        let fetched = fetched?;
        let by_name: HashMap<&str, Option<f64>> =
            distinct.iter().map(String::as_str).zip(fetched).collect();
        Ok(file_names
            .iter()
            .map(|file_name| by_name.get(file_name.as_str()).copied().flatten())
            .collect())
    }

    /// Create an empty selection, optionally pre-populated with members.
    pub async fn new_selection(&self, file_names: Option<&[String]>) -> Result<Selection> {
        let selection = Selection::create(self.clone()).await?;
        if let Some(file_names) = file_names {
            selection.add(file_names).await?;
        }
        Ok(selection)
    }

    /// Create a selection with a temporal index attached.
    pub async fn new_squirrel(&self) -> Result<Squirrel> {
        Squirrel::create(self.clone()).await
    }

    /// Checkpoint the WAL if anything was dug since the last commit.
    ///
    /// Writes are durable in the WAL without this; committing folds them
    /// into the main database file so readers of the bare file see them.
    /// A no-op when nothing changed.
    pub async fn commit(&self) -> Result<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        Ok(())
    }
}
