//! Selection with a multi-resolution temporal index attached.

use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use hoard_loader::{Constraint, ContentLoader, Source};
use hoard_model::{Codes, KSCALE_OVERFLOW, Nut, TSCALE_EDGES, tsplit};
use sqlx::QueryBuilder;
use sqlx::sqlite::Sqlite;
use std::ops::Deref;
use tracing::instrument;

use crate::catalog::Catalog;
use crate::error::{ErrorKind, Result};
use crate::models::NutRow;
use crate::selection::Selection;

/// A selection whose nuts are mirrored into per-selection rows bucketed by
/// duration, making span queries cheap.
///
/// Nuts are partitioned by their duration into buckets `0..KSCALE_OVERFLOW`
/// (factor-20 ladder) plus an overflow bucket. A span query then probes
/// each bucket with a range on `tmin_seconds` that is tight for that
/// bucket's maximal duration, instead of scanning everything that merely
/// started before the window's end.
///
/// Derefs to [`Selection`]: membership and freshness handling are
/// inherited unchanged.
#[derive(Debug)]
pub struct Squirrel {
    selection: Selection,
    sources: Vec<Box<dyn Source>>,
}

impl Deref for Squirrel {
    type Target = Selection;

    fn deref(&self) -> &Selection {
        &self.selection
    }
}

impl Squirrel {
    pub(crate) async fn create(catalog: Catalog) -> Result<Self> {
        Ok(Self { selection: Selection::create(catalog).await?, sources: Vec::new() })
    }

    /// Add files and bring the temporal index up to date with them.
    ///
    /// Members confirmed unchanged keep their standing index entries;
    /// stale members are re-read through `loader`, re-dug into the catalog
    /// and their fresh nuts copied in. `format` forces a provider instead
    /// of detecting one. Files that fail to load are skipped with a
    /// warning and stay `Stale` for the next rescan.
    #[instrument(skip_all, fields(selection = %self.name(), files = file_names.len()))]
    pub async fn add(
        &self,
        loader: &dyn ContentLoader,
        file_names: &[String],
        format: Option<&str>,
        check_mtime: bool,
    ) -> Result<()> {
        self.selection.add(file_names).await?;
        self.selection.flag_unchanged(loader, check_mtime).await?;
        self.harvest_stale(loader, format).await?;
        self.update_nuts().await
    }

    /// Re-read all currently stale members and dig the results.
    ///
    /// Member names are buffered up front: the dig below needs the
    /// database to itself and must not run under an open read cursor.
    async fn harvest_stale(&self, loader: &dyn ContentLoader, format: Option<&str>) -> Result<()> {
        let stale = self.selection.stale_members().await?;
        if stale.is_empty() {
            return Ok(());
        }
        let mut batch = Vec::new();
        for file_name in stale {
            let harvest = match loader.load(&file_name, format).await {
                Ok(harvest) => harvest,
                Err(error) => {
                    tracing::warn!(file = %file_name, ?error, "skipping file during rescan");
                    continue;
                }
            };
            for mut nut in harvest.nuts {
                nut.file_name = file_name.clone();
                nut.file_format = harvest.format.clone();
                nut.file_mtime = harvest.mtime;
                batch.push(nut);
            }
        }
        let catalog = self.selection.catalog();
        catalog.dig(&batch).await?;
        catalog.commit().await
    }

    /// Synchronize the per-selection nut rows with the catalog.
    ///
    /// One transaction: drop rows whose file was replaced (their file id
    /// no longer exists), copy in the nuts of every member not yet
    /// indexed, then mark members known to the catalog `Indexed`. Members
    /// already indexed are left alone, which keeps a full rescan of an
    /// unchanged selection from touching these rows at all; members whose
    /// load failed never reached the catalog and stay `Stale` for the
    /// next rescan.
    async fn update_nuts(&self) -> Result<()> {
        let mut tx = self
            .catalog()
            .pool()
            .begin()
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/purge_orphan_selection_nuts.sql"))
            .bind(self.id())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/copy_selection_nuts.sql"))
            .bind(self.id())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/mark_indexed.sql"))
            .bind(self.id())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    /// All nuts whose span intersects `[tmin, tmax]`, via the bucketed
    /// index.
    ///
    /// Per bucket, any nut shorter than the bucket's edge `E` that still
    /// reaches into the window must have started after `qmin - E - 1`,
    /// so `tmin_seconds` is probed with a closed range instead of a bare
    /// upper bound. The overflow bucket has no duration cap and keeps the
    /// bare bound. Seconds-resolution bounds are conservative; the `+1`
    /// and `-1` absorb the sub-second residuals.
    pub async fn undig_span(&self, tmin: f64, tmax: f64) -> Result<Vec<Nut>> {
        let (qmin_seconds, _) = tsplit(tmin);
        let (qmax_seconds, _) = tsplit(tmax);

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(include_str!("../queries/undig_span_prefix.sql"));
        qb.push_bind(self.id());
        qb.push(" AND (");
        for (kscale, edge) in TSCALE_EDGES.iter().enumerate() {
            if kscale > 0 {
                qb.push(" OR ");
            }
            qb.push("(selection_nuts.kscale = ");
            qb.push_bind(kscale as i64);
            qb.push(" AND selection_nuts.tmin_seconds BETWEEN ");
            qb.push_bind(qmin_seconds - *edge as i64 - 1);
            qb.push(" AND ");
            qb.push_bind(qmax_seconds + 1);
            qb.push(")");
        }
        qb.push(" OR (selection_nuts.kscale = ");
        qb.push_bind(KSCALE_OVERFLOW);
        qb.push(" AND selection_nuts.tmin_seconds <= ");
        qb.push_bind(qmax_seconds + 1);
        qb.push("))");
        qb.push(" AND selection_nuts.tmax_seconds >= ");
        qb.push_bind(qmin_seconds);

        let rows: Vec<NutRow> = qb
            .build_query_as()
            .fetch_all(self.catalog().pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(Nut::from).collect())
    }

    /// Reference implementation of [`undig_span`](Squirrel::undig_span)
    /// without the bucket index: a plain interval overlap scan.
    ///
    /// Returns the same set of nuts; kept for verification and as the
    /// semantics anchor.
    pub async fn undig_span_naiv(&self, tmin: f64, tmax: f64) -> Result<Vec<Nut>> {
        let (qmin_seconds, _) = tsplit(tmin);
        let (qmax_seconds, _) = tsplit(tmax);
        let rows: Vec<NutRow> = sqlx::query_as(include_str!("../queries/undig_span_naiv.sql"))
            .bind(self.id())
            .bind(qmin_seconds)
            .bind(qmax_seconds + 1)
            .fetch_all(self.catalog().pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(Nut::from).collect())
    }

    /// Overall `(min tmin_seconds, max tmax_seconds)` of the index,
    /// `(None, None)` when empty.
    pub async fn tspan(&self) -> Result<(Option<i64>, Option<i64>)> {
        sqlx::query_as(include_str!("../queries/tspan.sql"))
            .bind(self.id())
            .fetch_one(self.catalog().pool())
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Stream the distinct `(kind, codes)` pairs present in the index,
    /// optionally restricted to one kind. Ordered by kind, then codes.
    pub fn iter_codes<'a>(
        &'a self,
        kind: Option<&'a str>,
    ) -> impl Stream<Item = Result<(String, Codes)>> + 'a {
        stream! {
            let query = match kind {
                Some(kind) => {
                    sqlx::query_as::<_, (String, String)>(include_str!(
                        "../queries/iter_codes_for_kind.sql"
                    ))
                    .bind(self.id())
                    .bind(kind)
                }
                None => sqlx::query_as::<_, (String, String)>(include_str!(
                    "../queries/iter_codes.sql"
                ))
                .bind(self.id()),
            };
            let mut rows = query.fetch(self.catalog().pool());
            while let Some(row) = rows.next().await {
                match row {
                    Ok((kind, codes)) => yield Ok((kind, Codes::from_joined(&codes))),
                    Err(error) => {
                        yield Err(error).or_raise(|| ErrorKind::Database);
                        return;
                    }
                }
            }
        }
    }

    /// Attach a remote metadata source.
    pub fn add_source(&mut self, source: Box<dyn Source>) {
        self.sources.push(source);
    }

    /// Refresh all attached sources and index whatever they produced.
    ///
    /// Source failures abort the refresh; nothing already indexed is
    /// touched.
    #[instrument(skip_all, fields(selection = %self.name(), sources = self.sources.len()))]
    pub async fn update_inventory(
        &mut self,
        loader: &dyn ContentLoader,
        constraint: &Constraint,
    ) -> Result<()> {
        let mut discovered = Vec::new();
        for source in &mut self.sources {
            let file_names = source
                .update_inventory(constraint)
                .await
                .or_raise(|| ErrorKind::Source)?;
            discovered.extend(file_names);
        }
        if discovered.is_empty() {
            return Ok(());
        }
        self.add(loader, &discovered, None, true).await
    }

    /// Remove the selection together with its temporal index.
    pub async fn delete(self) -> Result<()> {
        self.selection.delete().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::selection::FileState;
    use crate::testutil::nut;
    use async_trait::async_trait;
    use hoard_loader::MockLoader;
    use rstest::rstest;
    use std::collections::HashSet;

    async fn catalog() -> (Database, Catalog) {
        let db = Database::open_in_memory().await.unwrap();
        let catalog = Catalog::from(&db);
        (db, catalog)
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Nuts covering every duration bucket, three per bucket: one near the
    /// epoch, one far from it, one at negative times.
    fn bucket_grid() -> Vec<Nut> {
        let durations: [f64; 8] =
            [0.5, 5.0, 60.0, 3_600.0, 86_400.0, 1.0e6, 3.0e7, 1.0e9];
        let mut nuts = Vec::new();
        for (i, duration) in durations.iter().enumerate() {
            for (j, start) in [0.25, 5.0e8, -7.2e4].iter().enumerate() {
                let tmin = start + i as f64 * 1000.0;
                nuts.push(nut(&format!("grid_{i}_{j}"), 0, 0, tmin, tmin + duration));
            }
        }
        nuts
    }

    fn key_set(nuts: &[Nut]) -> HashSet<(String, i64, i64)> {
        nuts.iter()
            .map(|n| (n.file_name.clone(), n.file_segment, n.file_element))
            .collect()
    }

    async fn grid_squirrel(catalog: &Catalog) -> (MockLoader, Squirrel) {
        let loader = MockLoader::default();
        let grid = bucket_grid();
        loader.add_nuts(grid.clone()).await;
        let file_names: Vec<String> = {
            let mut names: Vec<String> =
                grid.iter().map(|n| n.file_name.clone()).collect();
            names.sort_unstable();
            names.dedup();
            names
        };
        let squirrel = catalog.new_squirrel().await.unwrap();
        squirrel.add(&loader, &file_names, None, true).await.unwrap();
        (loader, squirrel)
    }

    #[rstest]
    #[case(0.0, 1.0)]
    #[case(-1.0e5, -0.5e5)]
    #[case(100.0, 90_000.0)]
    #[case(4.9e8, 5.1e8)]
    #[case(-2.0e9, 2.0e9)]
    #[case(7.0e8, 8.0e8)]
    #[tokio::test]
    async fn test_span_query_matches_naive_scan(#[case] tmin: f64, #[case] tmax: f64) {
        let (_db, catalog) = catalog().await;
        let (_loader, squirrel) = grid_squirrel(&catalog).await;

        let bucketed = squirrel.undig_span(tmin, tmax).await.unwrap();
        let naive = squirrel.undig_span_naiv(tmin, tmax).await.unwrap();
        assert_eq!(key_set(&bucketed), key_set(&naive));
        squirrel.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_span_query_matches_naive_scan_on_sliding_windows() {
        let (_db, catalog) = catalog().await;
        let (_loader, squirrel) = grid_squirrel(&catalog).await;

        for i in -3..8 {
            let tmin = (i as f64) * 2.5e4;
            for width in [1.0, 500.0, 4.0e5] {
                let bucketed = squirrel.undig_span(tmin, tmin + width).await.unwrap();
                let naive = squirrel.undig_span_naiv(tmin, tmin + width).await.unwrap();
                assert_eq!(
                    key_set(&bucketed),
                    key_set(&naive),
                    "window [{tmin}, {}]",
                    tmin + width,
                );
            }
        }
        squirrel.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_span_query_finds_long_nut_from_short_window() {
        let (_db, catalog) = catalog().await;
        let loader = MockLoader::default();
        // A year-long nut; a window deep inside it must still see it.
        loader.add_nuts([nut("long", 0, 0, 0.0, 3.15e7)]).await;
        let squirrel = catalog.new_squirrel().await.unwrap();
        squirrel.add(&loader, &names(&["long"]), None, true).await.unwrap();

        let hit = squirrel.undig_span(1.5e7, 1.5e7 + 60.0).await.unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].file_name, "long");

        let miss = squirrel.undig_span(4.0e7, 5.0e7).await.unwrap();
        assert!(miss.is_empty());
        squirrel.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_rescan_of_unchanged_files_rewrites_nothing() {
        let (_db, catalog) = catalog().await;
        let loader = MockLoader::default();
        let nuts = vec![
            nut("a", 0, 0, 0.0, 10.0),
            nut("b", 0, 0, 10.0, 20.0),
        ];
        loader.add_nuts(nuts.clone()).await;
        let squirrel = catalog.new_squirrel().await.unwrap();
        let members = names(&["a", "b"]);
        squirrel.add(&loader, &members, None, true).await.unwrap();

        let rowids: Vec<(i64,)> =
            sqlx::query_as("SELECT rowid FROM selection_nuts ORDER BY rowid")
                .fetch_all(catalog.pool())
                .await
                .unwrap();
        assert_eq!(rowids.len(), 2);

        squirrel.add(&loader, &members, None, true).await.unwrap();
        let rowids_after: Vec<(i64,)> =
            sqlx::query_as("SELECT rowid FROM selection_nuts ORDER BY rowid")
                .fetch_all(catalog.pool())
                .await
                .unwrap();
        assert_eq!(rowids, rowids_after, "unchanged files leave index rows alone");

        let states = squirrel.states().await.unwrap();
        assert!(states.iter().all(|(_, state)| *state == FileState::Indexed));
        squirrel.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_changed_file_is_reindexed() {
        let (_db, catalog) = catalog().await;
        let loader = MockLoader::default();
        loader.add_nuts([nut("a", 0, 0, 0.0, 10.0)]).await;
        let squirrel = catalog.new_squirrel().await.unwrap();
        let members = names(&["a"]);
        squirrel.add(&loader, &members, None, true).await.unwrap();
        assert_eq!(squirrel.undig_span(0.0, 10.0).await.unwrap().len(), 1);

        // File rewritten with a different span (mtime bumps automatically).
        loader.add_nuts([nut("a", 0, 0, 1000.0, 1010.0)]).await;
        squirrel.add(&loader, &members, None, true).await.unwrap();

        assert!(squirrel.undig_span(0.0, 100.0).await.unwrap().is_empty());
        assert_eq!(squirrel.undig_span(1000.0, 1010.0).await.unwrap().len(), 1);

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM selection_nuts")
            .fetch_one(catalog.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 1, "no orphan rows from the replaced file");
        squirrel.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_file_is_skipped_not_fatal() {
        let (_db, catalog) = catalog().await;
        let loader = MockLoader::default();
        loader
            .add_nuts([nut("good", 0, 0, 0.0, 10.0), nut("bad", 0, 0, 10.0, 20.0)])
            .await;
        loader.set_unreadable("bad", true).await;
        let squirrel = catalog.new_squirrel().await.unwrap();
        squirrel
            .add(&loader, &names(&["good", "bad"]), None, true)
            .await
            .unwrap();

        let states = squirrel.states().await.unwrap();
        assert_eq!(states[0].1, FileState::Indexed);
        assert_eq!(states[1].1, FileState::Stale, "retried on the next rescan");
        assert_eq!(squirrel.undig_span(0.0, 20.0).await.unwrap().len(), 1);

        // Readable again: the next rescan picks it up.
        loader.set_unreadable("bad", false).await;
        loader.touch("bad", 5.0).await;
        squirrel
            .add(&loader, &names(&["good", "bad"]), None, true)
            .await
            .unwrap();
        assert_eq!(squirrel.undig_span(0.0, 20.0).await.unwrap().len(), 2);
        squirrel.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_tspan() {
        let (_db, catalog) = catalog().await;
        let loader = MockLoader::default();
        let squirrel = catalog.new_squirrel().await.unwrap();
        assert_eq!(squirrel.tspan().await.unwrap(), (None, None));

        loader
            .add_nuts([
                nut("a", 0, 0, -100.5, 10.0),
                nut("b", 0, 0, 50.0, 3600.25),
            ])
            .await;
        squirrel.add(&loader, &names(&["a", "b"]), None, true).await.unwrap();
        let (tmin, tmax) = squirrel.tspan().await.unwrap();
        assert_eq!(tmin, Some(-101));
        assert_eq!(tmax, Some(3600));
        squirrel.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_iter_codes_distinct_and_filtered() {
        let (_db, catalog) = catalog().await;
        let loader = MockLoader::default();
        let mut station = nut("s", 0, 0, 0.0, 10.0);
        station.kind = "station".to_string();
        station.codes = Codes::new(["GE", "STA01"]).unwrap();
        let mut wave_a = nut("w", 0, 0, 0.0, 10.0);
        wave_a.codes = Codes::new(["GE", "STA01", "BHZ"]).unwrap();
        let mut wave_b = nut("w", 0, 1, 10.0, 20.0);
        wave_b.codes = Codes::new(["GE", "STA01", "BHZ"]).unwrap();
        loader.add_nuts([station, wave_a, wave_b]).await;

        let squirrel = catalog.new_squirrel().await.unwrap();
        squirrel.add(&loader, &names(&["s", "w"]), None, true).await.unwrap();

        let all: Vec<(String, Codes)> = {
            let codes = squirrel.iter_codes(None);
            futures::pin_mut!(codes);
            codes.map(|item| item.unwrap()).collect().await
        };
        assert_eq!(all.len(), 2, "duplicate pair collapsed");
        assert_eq!(all[0].0, "station");
        assert_eq!(all[1].0, "waveform");
        assert_eq!(all[1].1.to_string(), "GE.STA01.BHZ");

        let waveform_only: Vec<(String, Codes)> = {
            let codes = squirrel.iter_codes(Some("waveform"));
            futures::pin_mut!(codes);
            codes.map(|item| item.unwrap()).collect().await
        };
        assert_eq!(waveform_only.len(), 1);
        assert_eq!(waveform_only[0].0, "waveform");
        squirrel.delete().await.unwrap();
    }

    #[derive(Debug)]
    struct ListingSource {
        file_names: Vec<String>,
        published: bool,
    }

    #[async_trait]
    impl Source for ListingSource {
        async fn update_inventory(
            &mut self,
            _constraint: &Constraint,
        ) -> hoard_loader::error::Result<Vec<String>> {
            if self.published {
                return Ok(Vec::new());
            }
            self.published = true;
            Ok(self.file_names.clone())
        }
    }

    #[tokio::test]
    async fn test_update_inventory_indexes_discovered_files() {
        let (_db, catalog) = catalog().await;
        let loader = MockLoader::default();
        loader.add_nuts([nut("remote", 0, 0, 0.0, 10.0)]).await;
        let mut squirrel = catalog.new_squirrel().await.unwrap();
        squirrel.add_source(Box::new(ListingSource {
            file_names: names(&["remote"]),
            published: false,
        }));

        squirrel
            .update_inventory(&loader, &Constraint::spanning(0.0, 100.0))
            .await
            .unwrap();
        assert_eq!(squirrel.undig_span(0.0, 10.0).await.unwrap().len(), 1);

        // Second refresh discovers nothing and changes nothing.
        squirrel
            .update_inventory(&loader, &Constraint::default())
            .await
            .unwrap();
        assert_eq!(squirrel.undig_span(0.0, 10.0).await.unwrap().len(), 1);
        squirrel.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_removes_index_rows() {
        let (_db, catalog) = catalog().await;
        let loader = MockLoader::default();
        loader.add_nuts([nut("a", 0, 0, 0.0, 10.0)]).await;
        let squirrel = catalog.new_squirrel().await.unwrap();
        squirrel.add(&loader, &names(&["a"]), None, true).await.unwrap();
        squirrel.delete().await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM selection_nuts")
            .fetch_one(catalog.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
