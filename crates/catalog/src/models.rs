//! Row types mapping query results back onto domain types.

use hoard_model::{Codes, Nut};
use sqlx::FromRow;

use crate::error::{ErrorKind, Result};

/// One fully joined nut row (files × nuts × kind_codes).
#[derive(Debug, FromRow)]
pub(crate) struct NutRow {
    pub file_name: String,
    pub file_format: String,
    pub file_mtime: f64,
    pub file_segment: i64,
    pub file_element: i64,
    pub kind: String,
    pub codes: String,
    pub tmin_seconds: i64,
    pub tmin_offset: f64,
    pub tmax_seconds: i64,
    pub tmax_offset: f64,
    pub deltat: f64,
}

impl From<NutRow> for Nut {
    fn from(row: NutRow) -> Self {
        Nut {
            file_name: row.file_name,
            file_format: row.file_format,
            file_mtime: row.file_mtime,
            file_segment: row.file_segment,
            file_element: row.file_element,
            kind: row.kind,
            codes: Codes::from_joined(&row.codes),
            tmin_seconds: row.tmin_seconds,
            tmin_offset: row.tmin_offset,
            tmax_seconds: row.tmax_seconds,
            tmax_offset: row.tmax_offset,
            deltat: row.deltat,
        }
    }
}

/// One row of a selection-ordered outer join: the member is always present,
/// the nut columns are all NULL when the member is unknown to the catalog.
#[derive(Debug, FromRow)]
pub(crate) struct GroupedRow {
    pub member_name: String,
    pub file_name: Option<String>,
    pub file_format: Option<String>,
    pub file_mtime: Option<f64>,
    pub file_segment: Option<i64>,
    pub file_element: Option<i64>,
    pub kind: Option<String>,
    pub codes: Option<String>,
    pub tmin_seconds: Option<i64>,
    pub tmin_offset: Option<f64>,
    pub tmax_seconds: Option<i64>,
    pub tmax_offset: Option<f64>,
    pub deltat: Option<f64>,
}

impl GroupedRow {
    /// Split into the member name and, if the outer join matched, the nut.
    ///
    /// Either every nut column is present or none of them is; a partial row
    /// means the database no longer matches the schema contract.
    pub(crate) fn into_pair(self) -> Result<(String, Option<Nut>)> {
        let nut = (
            self.file_name,
            self.file_format,
            self.file_mtime,
            self.file_segment,
            self.file_element,
            self.kind,
            self.codes,
            self.tmin_seconds,
            self.tmin_offset,
            self.tmax_seconds,
            self.tmax_offset,
            self.deltat,
        );
        let nut = match nut {
            (
                Some(file_name),
                Some(file_format),
                Some(file_mtime),
                Some(file_segment),
                Some(file_element),
                Some(kind),
                Some(codes),
                Some(tmin_seconds),
                Some(tmin_offset),
                Some(tmax_seconds),
                Some(tmax_offset),
                Some(deltat),
            ) => Some(Nut {
                file_name,
                file_format,
                file_mtime,
                file_segment,
                file_element,
                kind,
                codes: Codes::from_joined(&codes),
                tmin_seconds,
                tmin_offset,
                tmax_seconds,
                tmax_offset,
                deltat,
            }),
            (None, None, None, None, None, None, None, None, None, None, None, None) => None,
            _ => exn::bail!(ErrorKind::Corrupt("partial nut row in outer join")),
        };
        Ok((self.member_name, nut))
    }
}

/// One selection member with what the catalog currently records about it.
#[derive(Debug, FromRow)]
pub(crate) struct MemberRow {
    pub member_name: String,
    pub file_state: i64,
    pub file_format: Option<String>,
    pub file_mtime: Option<f64>,
}

impl MemberRow {
    /// The member name and, if the file is known, its recorded format and
    /// modification time.
    pub(crate) fn into_mtime_entry(self) -> Result<(String, Option<(String, f64)>)> {
        let recorded = match (self.file_format, self.file_mtime) {
            (Some(format), Some(mtime)) => Some((format, mtime)),
            (None, None) => None,
            _ => exn::bail!(ErrorKind::Corrupt("partial file row in outer join")),
        };
        Ok((self.member_name, recorded))
    }
}
