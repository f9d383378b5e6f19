//! Table formatting utilities.

use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table, presets};

/// A two-column table with right-aligned values.
pub fn key_value<I, K, V>(rows: I) -> Table
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    for (key, value) in rows {
        table.add_row(vec![
            Cell::new(key.into()).add_attribute(Attribute::Bold),
            Cell::new(value.into()).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

/// A bordered table with a bold header row.
pub fn with_headers<I, T>(headers: I) -> Table
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let mut table = Table::new();
    table.load_preset(presets::UTF8_HORIZONTAL_ONLY);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        headers
            .into_iter()
            .map(|h| Cell::new(h.into()).add_attribute(Attribute::Bold)),
    );
    table
}
