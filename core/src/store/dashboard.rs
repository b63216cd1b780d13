use super::DashboardStore;
use crate::{
    error::BatchResult,
    flow::{FlowEdge, FlowNode, FlowResult},
    report::{ReportRow, ReportSink},
    spatial::HexCount,
    types::{CategoryFilter, Year},
};
use rusqlite::params;

impl DashboardStore {
    // ─────────────────────────────────────────────────────────────────
    // Combined dashboard table
    // ─────────────────────────────────────────────────────────────────

    /// Delete every row of `year`, then insert `rows`, in one transaction.
    pub fn replace_report_rows(&self, year: Year, rows: &[ReportRow]) -> BatchResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM report_row WHERE year = ?1", params![year])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO report_row
                 (data_source, item, year, received, not_filed, filed, disposed, case_category)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for r in rows {
                stmt.execute(params![
                    r.data_source,
                    r.item,
                    r.year,
                    r.received,
                    r.not_filed,
                    r.filed,
                    r.disposed,
                    r.case_category,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Rows of `year` in insertion order.
    pub fn report_rows(&self, year: Year) -> BatchResult<Vec<ReportRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT data_source, item, year, received, not_filed, filed, disposed, case_category
             FROM report_row WHERE year = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![year], |row| {
                Ok(ReportRow {
                    data_source:   row.get(0)?,
                    item:          row.get(1)?,
                    year:          row.get(2)?,
                    received:      row.get(3)?,
                    not_filed:     row.get(4)?,
                    filed:         row.get(5)?,
                    disposed:      row.get(6)?,
                    case_category: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn report_row_count(&self) -> BatchResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM report_row", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    // ─────────────────────────────────────────────────────────────────
    // Consolidated history
    // ─────────────────────────────────────────────────────────────────

    pub fn replace_flow_edges(
        &self,
        year: Year,
        category: &str,
        edges: &[FlowEdge],
    ) -> BatchResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM flow_edge WHERE year = ?1 AND category = ?2",
            params![year, category],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO flow_edge (year, category, position, source, target, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, edge) in edges.iter().enumerate() {
                stmt.execute(params![
                    year,
                    category,
                    position as i64,
                    serde_json::to_string(&edge.source)?,
                    serde_json::to_string(&edge.target)?,
                    edge.value as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn flow_edges(&self, year: Year, category: &str) -> BatchResult<Vec<FlowEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT source, target, value FROM flow_edge
             WHERE year = ?1 AND category = ?2
             ORDER BY position ASC",
        )?;
        let raw = stmt
            .query_map(params![year, category], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut edges = Vec::with_capacity(raw.len());
        for (source, target, value) in raw {
            edges.push(FlowEdge {
                source: serde_json::from_str::<FlowNode>(&source)?,
                target: serde_json::from_str::<FlowNode>(&target)?,
                value:  value as u64,
            });
        }
        Ok(edges)
    }

    // ─────────────────────────────────────────────────────────────────
    // Hex counts
    // ─────────────────────────────────────────────────────────────────

    pub fn replace_hex_counts(&self, year: Year, counts: &[HexCount]) -> BatchResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM hex_count WHERE year = ?1", params![year])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO hex_count
                 (year, category, stage, cell_col, cell_row, center_lat, center_lon, count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for c in counts {
                stmt.execute(params![
                    c.year,
                    c.category,
                    c.stage,
                    c.col,
                    c.row,
                    c.center_lat,
                    c.center_lon,
                    c.count as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn hex_counts(&self, year: Year) -> BatchResult<Vec<HexCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT year, category, stage, cell_col, cell_row, center_lat, center_lon, count
             FROM hex_count WHERE year = ?1
             ORDER BY category, stage, cell_row, cell_col",
        )?;
        let counts = stmt
            .query_map(params![year], |row| {
                Ok(HexCount {
                    year:       row.get(0)?,
                    category:   row.get(1)?,
                    stage:      row.get(2)?,
                    col:        row.get(3)?,
                    row:        row.get(4)?,
                    center_lat: row.get(5)?,
                    center_lon: row.get(6)?,
                    count:      row.get::<_, i64>(7)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}

impl ReportSink for DashboardStore {
    fn name(&self) -> String {
        "sqlite".to_string()
    }

    fn replace_year_rows(&self, year: Year, rows: &[ReportRow]) -> BatchResult<()> {
        self.replace_report_rows(year, rows)
    }

    fn write_flow(
        &self,
        year: Year,
        category: &CategoryFilter,
        flow: &FlowResult,
    ) -> BatchResult<()> {
        self.replace_flow_edges(year, &category.report_label(), &flow.edges)
    }

    fn replace_hex_counts(&self, year: Year, counts: &[HexCount]) -> BatchResult<()> {
        DashboardStore::replace_hex_counts(self, year, counts)
    }
}
