use super::{parse_timestamp, DashStore};
use crate::{
    error::{DashError, DashResult},
    record::{LicenseeRecord, LicenseeStatus, SortDirection},
    types::Code,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
};

const SELECT_COLUMNS: &str = "code, name, status, active_clients, telecom_clients,
     graduation_tier, sponsor_code, city, state_code, activation_date";

/// Sortable licensee columns. Maps to a fixed column name, never to
/// caller-supplied SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseeSort {
    /// Source order.
    #[default]
    Position,
    Code,
    Name,
    ActiveClients,
    TelecomClients,
    ActivationDate,
}

impl LicenseeSort {
    fn column(&self) -> &'static str {
        match self {
            Self::Position       => "position",
            Self::Code           => "code",
            Self::Name           => "name",
            Self::ActiveClients  => "active_clients",
            Self::TelecomClients => "telecom_clients",
            Self::ActivationDate => "activation_date",
        }
    }
}

impl FromStr for LicenseeSort {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "position"                          => Ok(Self::Position),
            "code" | "codigo"                   => Ok(Self::Code),
            "name" | "nome"                     => Ok(Self::Name),
            "active_clients" | "activeclients"  => Ok(Self::ActiveClients),
            "telecom_clients" | "telecomclients" => Ok(Self::TelecomClients),
            "activation_date" | "activationdate" => Ok(Self::ActivationDate),
            _ => Err(DashError::invalid_parameter("sort", format!("unknown sort column '{s}'"))),
        }
    }
}

/// Filter, sort and page over the stored licensees.
#[derive(Debug, Clone, PartialEq)]
pub struct LicenseeQuery {
    pub status:     Option<LicenseeStatus>,
    pub state_code: Option<String>,
    pub sort:       LicenseeSort,
    pub direction:  SortDirection,
    pub limit:      usize,
    pub offset:     usize,
}

impl Default for LicenseeQuery {
    fn default() -> Self {
        Self {
            status: None,
            state_code: None,
            sort: LicenseeSort::Position,
            direction: SortDirection::Ascending,
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page<T> {
    pub items:  Vec<T>,
    /// Matching rows before paging.
    pub total:  usize,
    pub limit:  usize,
    pub offset: usize,
}

struct LicenseeRow {
    code:            i64,
    name:            String,
    status:          String,
    active_clients:  i64,
    telecom_clients: i64,
    graduation_tier: String,
    sponsor_code:    Option<i64>,
    city:            String,
    state_code:      String,
    activation_date: Option<String>,
}

impl LicenseeRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            code: row.get(0)?,
            name: row.get(1)?,
            status: row.get(2)?,
            active_clients: row.get(3)?,
            telecom_clients: row.get(4)?,
            graduation_tier: row.get(5)?,
            sponsor_code: row.get(6)?,
            city: row.get(7)?,
            state_code: row.get(8)?,
            activation_date: row.get(9)?,
        })
    }

    fn into_record(self) -> DashResult<LicenseeRecord> {
        Ok(LicenseeRecord {
            code: self.code as Code,
            name: self.name,
            status: self.status.parse()?,
            active_clients: u64::try_from(self.active_clients).unwrap_or(0),
            telecom_clients: u64::try_from(self.telecom_clients).unwrap_or(0),
            graduation_tier: self.graduation_tier.parse()?,
            sponsor_code: self.sponsor_code.map(|s| s as Code),
            city: self.city,
            state_code: self.state_code,
            activation_date: self
                .activation_date
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

/// SQLite integers are signed; larger counts are stored at the ceiling.
fn count_column(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn insert_licensee(
    conn: &Connection,
    record: &LicenseeRecord,
    position: usize,
    batch_id: Option<&str>,
) -> DashResult<()> {
    conn.execute(
        "INSERT INTO licensee (
            code, position, name, status, active_clients, telecom_clients,
            graduation_tier, sponsor_code, city, state_code, activation_date, batch_id
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
        ON CONFLICT(code) DO UPDATE SET
            name            = excluded.name,
            status          = excluded.status,
            active_clients  = excluded.active_clients,
            telecom_clients = excluded.telecom_clients,
            graduation_tier = excluded.graduation_tier,
            sponsor_code    = excluded.sponsor_code,
            city            = excluded.city,
            state_code      = excluded.state_code,
            activation_date = excluded.activation_date,
            batch_id        = excluded.batch_id",
        params![
            record.code as i64,
            position as i64,
            record.name,
            record.status.as_str(),
            count_column(record.active_clients),
            count_column(record.telecom_clients),
            record.graduation_tier.as_str(),
            record.sponsor_code.map(|s| s as i64),
            record.city,
            record.state_code,
            record.activation_date.map(|d| d.to_rfc3339()),
            batch_id,
        ],
    )?;
    Ok(())
}

pub(super) fn write_network(
    conn: &Connection,
    records: &[LicenseeRecord],
    batch_id: Option<&str>,
) -> DashResult<usize> {
    conn.execute("DELETE FROM licensee", [])?;
    let mut seen: HashSet<Code> = HashSet::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        if !seen.insert(record.code) {
            continue;
        }
        insert_licensee(conn, record, position, batch_id)?;
    }
    Ok(seen.len())
}

impl DashStore {
    // ── Licensees ──────────────────────────────────────────────

    /// Insert or update one record. A new code goes after every stored
    /// record; an existing code keeps its position.
    pub fn upsert_licensee(&self, record: &LicenseeRecord) -> DashResult<()> {
        let position: i64 = self.conn.query_row(
            "SELECT COALESCE(
                 (SELECT position FROM licensee WHERE code = ?1),
                 (SELECT COALESCE(MAX(position) + 1, 0) FROM licensee)
             )",
            params![record.code as i64],
            |row| row.get(0),
        )?;
        insert_licensee(&self.conn, record, position as usize, None)
    }

    pub fn get_licensee(&self, code: Code) -> DashResult<Option<LicenseeRecord>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM licensee WHERE code = ?1"),
                params![code as i64],
                LicenseeRow::read,
            )
            .optional()?;
        row.map(LicenseeRow::into_record).transpose()
    }

    pub fn delete_licensee(&self, code: Code) -> DashResult<bool> {
        let n = self
            .conn
            .execute("DELETE FROM licensee WHERE code = ?1", params![code as i64])?;
        Ok(n > 0)
    }

    /// Every stored record in source order.
    pub fn all_licensees(&self) -> DashResult<Vec<LicenseeRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM licensee ORDER BY position ASC"
        ))?;
        let rows = stmt
            .query_map([], LicenseeRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(LicenseeRow::into_record).collect()
    }

    pub fn list_licensees(&self, query: &LicenseeQuery) -> DashResult<Page<LicenseeRecord>> {
        let status = query.status.map(|s| s.as_str());
        let state = query.state_code.as_deref();

        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM licensee
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR state_code = ?2)",
            params![status, state],
            |row| row.get(0),
        )?;

        let direction = match query.direction {
            SortDirection::Ascending  => "ASC",
            SortDirection::Descending => "DESC",
        };
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM licensee
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR state_code = ?2)
             ORDER BY {} {direction}, position ASC
             LIMIT ?3 OFFSET ?4",
            query.sort.column()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![status, state, query.limit as i64, query.offset as i64],
                LicenseeRow::read,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(LicenseeRow::into_record)
                .collect::<DashResult<Vec<_>>>()?,
            total: total as usize,
            limit: query.limit,
            offset: query.offset,
        })
    }

    pub fn count_by_status(&self) -> DashResult<HashMap<LicenseeStatus, usize>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM licensee GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts: HashMap<LicenseeStatus, usize> =
            LicenseeStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for (status, n) in rows {
            counts.insert(status.parse()?, n as usize);
        }
        Ok(counts)
    }

    pub fn licensee_count(&self) -> DashResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM licensee", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Swap the stored network for `records` in one transaction.
    /// A repeated code keeps its first occurrence.
    pub fn replace_licensees(&self, records: &[LicenseeRecord]) -> DashResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let written = write_network(&tx, records, None)?;
        tx.commit()?;
        Ok(written)
    }
}
