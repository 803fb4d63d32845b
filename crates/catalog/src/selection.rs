//! Ephemeral named selections over the catalog.

use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use hoard_model::Nut;
use tracing::instrument;

use crate::catalog::Catalog;
use crate::error::{ErrorKind, Result};
use crate::ident;
use crate::models::{GroupedRow, MemberRow};

/// Freshness of one selection member relative to the catalog.
///
/// Stored as an integer in `selection_files.file_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Needs (re)reading: unknown, changed, or vanished.
    Stale = 0,
    /// Catalog entry is current but not yet copied into a temporal index.
    Fresh = 1,
    /// Copied into the selection's temporal index.
    Indexed = 2,
}

impl FileState {
    pub(crate) fn as_i64(self) -> i64 {
        self as i64
    }

    /// A confirmed-unchanged member keeps its index standing: only `Stale`
    /// is promoted, `Indexed` must not fall back to `Fresh` or a rescan
    /// would re-copy its nuts.
    fn promoted(self) -> Self {
        match self {
            FileState::Stale => FileState::Fresh,
            other => other,
        }
    }
}

impl TryFrom<i64> for FileState {
    type Error = crate::error::Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(FileState::Stale),
            1 => Ok(FileState::Fresh),
            2 => Ok(FileState::Indexed),
            _ => exn::bail!(ErrorKind::Corrupt("file state out of range")),
        }
    }
}

/// An ordered, named set of file names, alive for this process only.
///
/// Members are tracked with a [`FileState`] each; the name is
/// process-unique so concurrent selections on one database never collide.
/// Deleting consumes the value, so a deleted selection cannot be used by
/// construction. Selections that are never deleted (crash, leak) are swept
/// the next time the database is opened.
#[derive(Debug)]
pub struct Selection {
    catalog: Catalog,
    id: i64,
    name: String,
}

impl Selection {
    pub(crate) async fn create(catalog: Catalog) -> Result<Self> {
        let name = ident::unique_name("sel");
        let id = sqlx::query(include_str!("../queries/insert_selection.sql"))
            .bind(&name)
            .execute(catalog.pool())
            .await
            .or_raise(|| ErrorKind::Database)?
            .last_insert_rowid();
        Ok(Self { catalog, id, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn id(&self) -> i64 {
        self.id
    }

    /// Add members, keeping first-insertion order. Re-adding an existing
    /// member is a no-op: its state and position are preserved.
    pub async fn add(&self, file_names: &[String]) -> Result<()> {
        let mut tx = self.catalog.pool().begin().await.or_raise(|| ErrorKind::Database)?;
        for file_name in file_names {
            sqlx::query(include_str!("../queries/add_member.sql"))
                .bind(self.id)
                .bind(file_name)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// Re-evaluate member freshness against live file state.
    ///
    /// Rules, per member:
    /// - unknown to the catalog, or vanished: `Stale`
    /// - `check_mtime` and the live mtime differs, or the file is
    ///   unreadable: `Stale` (unreadable is worth another attempt next scan)
    /// - unknown format: treated as unchanged (nothing to re-read it with)
    /// - otherwise unchanged: `Stale` members are promoted to `Fresh`,
    ///   `Fresh` and `Indexed` members keep their state
    ///
    /// Probing runs without any transaction held; the resulting state
    /// changes are applied in one transaction at the end.
    #[instrument(skip_all, fields(selection = %self.name))]
    pub async fn flag_unchanged(
        &self,
        loader: &dyn hoard_loader::ContentLoader,
        check_mtime: bool,
    ) -> Result<()> {
        let members: Vec<MemberRow> = sqlx::query_as(include_str!("../queries/members.sql"))
            .bind(self.id)
            .fetch_all(self.catalog.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;

        let mut updates: Vec<(String, FileState)> = Vec::new();
        for member in members {
            let state = FileState::try_from(member.file_state)?;
            let (file_name, recorded) = member.into_mtime_entry()?;
            let new_state = match recorded {
                None => FileState::Stale,
                Some((format, recorded_mtime)) => {
                    if !loader.exists(&file_name).await {
                        FileState::Stale
                    } else if !check_mtime {
                        state.promoted()
                    } else {
                        match loader.mtime(&file_name, &format).await {
                            Ok(live_mtime) if live_mtime == recorded_mtime => state.promoted(),
                            Ok(_) => FileState::Stale,
                            Err(error) => match &*error {
                                hoard_loader::error::ErrorKind::UnknownFormat(_) => {
                                    state.promoted()
                                }
                                _ => FileState::Stale,
                            },
                        }
                    }
                }
            };
            if new_state != state {
                updates.push((file_name, new_state));
            }
        }

        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self.catalog.pool().begin().await.or_raise(|| ErrorKind::Database)?;
        for (file_name, state) in updates {
            sqlx::query(include_str!("../queries/set_member_state.sql"))
                .bind(self.id)
                .bind(&file_name)
                .bind(state.as_i64())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// Stream members in insertion order with their recorded format and
    /// mtime, `None` for members unknown to the catalog.
    pub fn iter_mtimes(
        &self,
    ) -> impl Stream<Item = Result<(String, Option<(String, f64)>)>> + '_ {
        stream! {
            let mut rows = sqlx::query_as::<_, MemberRow>(include_str!("../queries/members.sql"))
                .bind(self.id)
                .fetch(self.catalog.pool());
            while let Some(row) = rows.next().await {
                match row {
                    Ok(member) => yield member.into_mtime_entry(),
                    Err(error) => {
                        yield Err(error).or_raise(|| ErrorKind::Database);
                        return;
                    }
                }
            }
        }
    }

    /// Recorded mtimes of all members, in insertion order.
    pub async fn get_mtimes(&self) -> Result<Vec<Option<f64>>> {
        let entries = self.iter_mtimes();
        futures::pin_mut!(entries);
        let mut mtimes = Vec::new();
        while let Some(entry) = entries.next().await {
            let (_, recorded) = entry?;
            mtimes.push(recorded.map(|(_, mtime)| mtime));
        }
        Ok(mtimes)
    }

    /// Stream members in insertion order, each with its nuts.
    ///
    /// Members unknown to the catalog yield an empty nut list. With
    /// `skip_unchanged`, only `Stale` members are visited.
    pub fn undig_grouped(
        &self,
        skip_unchanged: bool,
    ) -> impl Stream<Item = Result<(String, Vec<Nut>)>> + '_ {
        let sql = if skip_unchanged {
            include_str!("../queries/undig_grouped_stale.sql")
        } else {
            include_str!("../queries/undig_grouped.sql")
        };
        stream! {
            let mut rows = sqlx::query_as::<_, GroupedRow>(sql)
                .bind(self.id)
                .fetch(self.catalog.pool());
            let mut current: Option<(String, Vec<Nut>)> = None;
            while let Some(row) = rows.next().await {
                let (member_name, nut) = match row {
                    Ok(row) => match row.into_pair() {
                        Ok(pair) => pair,
                        Err(error) => {
                            yield Err(error);
                            return;
                        }
                    },
                    Err(error) => {
                        yield Err(error).or_raise(|| ErrorKind::Database);
                        return;
                    }
                };
                match &mut current {
                    Some((name, nuts)) if *name == member_name => {
                        if let Some(nut) = nut {
                            nuts.push(nut);
                        }
                    }
                    _ => {
                        if let Some(group) = current.take() {
                            yield Ok(group);
                        }
                        let mut nuts = Vec::new();
                        if let Some(nut) = nut {
                            nuts.push(nut);
                        }
                        current = Some((member_name, nuts));
                    }
                }
            }
            if let Some(group) = current.take() {
                yield Ok(group);
            }
        }
    }

    /// Names of all `Stale` members, in insertion order.
    pub(crate) async fn stale_members(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(include_str!("../queries/stale_members.sql"))
            .bind(self.id)
            .fetch_all(self.catalog.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(|(file_name,)| file_name).collect())
    }

    #[cfg(test)]
    pub(crate) async fn states(&self) -> Result<Vec<(String, FileState)>> {
        let members: Vec<MemberRow> = sqlx::query_as(include_str!("../queries/members.sql"))
            .bind(self.id)
            .fetch_all(self.catalog.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        members
            .into_iter()
            .map(|member| Ok((member.member_name, FileState::try_from(member.file_state)?)))
            .collect()
    }

    /// Remove the selection and all of its overlay rows.
    ///
    /// Takes the selection by value: there is nothing sensible to do with
    /// one after this.
    pub async fn delete(self) -> Result<()> {
        let mut tx = self.catalog.pool().begin().await.or_raise(|| ErrorKind::Database)?;
        for sql in [
            include_str!("../queries/delete_selection_nuts.sql"),
            include_str!("../queries/delete_selection_files.sql"),
            include_str!("../queries/delete_selection.sql"),
        ] {
            sqlx::query(sql)
                .bind(self.id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }
}

/// Drop guard for internal scratch selections.
///
/// The happy path disarms the guard and deletes the selection in-line. If
/// the consumer abandons the stream instead, `Drop` spawns a best-effort
/// cleanup task; whatever that misses is swept at the next database open.
pub(crate) struct ScratchGuard {
    selection: Option<Selection>,
}

impl ScratchGuard {
    pub(crate) fn new(selection: Selection) -> Self {
        Self { selection: Some(selection) }
    }

    pub(crate) fn selection(&self) -> &Selection {
        self.selection.as_ref().expect("scratch selection already taken")
    }

    pub(crate) fn disarm(mut self) -> Selection {
        self.selection.take().expect("scratch selection already taken")
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        let Some(selection) = self.selection.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(error) = selection.delete().await {
                    tracing::warn!(?error, "failed to drop abandoned scratch selection");
                }
            });
        }
    }
}
