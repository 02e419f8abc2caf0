//! Worksheet header resolution

use std::collections::HashSet;
use std::fmt;

use super::normalize::{clean_text, normalize_header_name};
use crate::models::{CellValue, RawSaleRow};

/// A recognised source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    OrderId,
    OrderDate,
    ShipDate,
    ShipMode,
    Quantity,
    Discount,
    Sales,
    Profit,
    Category,
    Subcategory,
    ProductName,
    State,
    Country,
    Region,
}

impl Column {
    /// Columns a worksheet must carry to be ingested.
    pub const REQUIRED: [Column; 5] = [
        Column::OrderId,
        Column::OrderDate,
        Column::ShipDate,
        Column::ProductName,
        Column::Sales,
    ];

    pub fn canonical_name(self) -> &'static str {
        match self {
            Column::OrderId => "order_id",
            Column::OrderDate => "order_date",
            Column::ShipDate => "ship_date",
            Column::ShipMode => "ship_mode",
            Column::Quantity => "quantity",
            Column::Discount => "discount",
            Column::Sales => "sales",
            Column::Profit => "profit",
            Column::Category => "category",
            Column::Subcategory => "subcategory",
            Column::ProductName => "product_name",
            Column::State => "state",
            Column::Country => "country",
            Column::Region => "region",
        }
    }

    /// Look up an already-normalised header name, including the few aliases
    /// seen in real exports.
    pub fn from_normalized(name: &str) -> Option<Column> {
        let column = match name {
            "order_id" | "order_no" | "order_number" => Column::OrderId,
            "order_date" => Column::OrderDate,
            "ship_date" => Column::ShipDate,
            "ship_mode" => Column::ShipMode,
            "quantity" => Column::Quantity,
            "discount" => Column::Discount,
            "sales" | "sales_amount" => Column::Sales,
            "profit" => Column::Profit,
            "category" => Column::Category,
            "subcategory" | "sub_category" => Column::Subcategory,
            "product_name" | "product" => Column::ProductName,
            "state" => Column::State,
            "country" => Column::Country,
            "region" => Column::Region,
            _ => return None,
        };
        Some(column)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Column layout of one worksheet, resolved once from its header row.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetHeader {
    /// Normalised header text by position (empty for blank cells)
    names: Vec<String>,
    /// Recognised column by position; duplicates after the first are `None`
    columns: Vec<Option<Column>>,
    missing: Vec<Column>,
}

impl SheetHeader {
    pub fn resolve(cells: &[CellValue]) -> Self {
        let mut seen = HashSet::new();
        let mut names = Vec::with_capacity(cells.len());
        let mut columns = Vec::with_capacity(cells.len());

        for cell in cells {
            let name = clean_text(cell)
                .map(|text| normalize_header_name(&text))
                .unwrap_or_default();
            let column = Column::from_normalized(&name).filter(|c| seen.insert(*c));
            names.push(name);
            columns.push(column);
        }

        let missing = Column::REQUIRED
            .into_iter()
            .filter(|c| !seen.contains(c))
            .collect();

        Self {
            names,
            columns,
            missing,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of a recognised column.
    pub fn index_of(&self, column: Column) -> Option<usize> {
        self.columns.iter().position(|c| *c == Some(column))
    }

    /// Required columns absent from the header.
    pub fn missing(&self) -> &[Column] {
        &self.missing
    }

    pub fn is_ingestible(&self) -> bool {
        self.missing.is_empty()
    }

    /// Map a data row onto the record by column position.
    ///
    /// Cells beyond the header width and under unrecognised headers are dropped.
    pub fn extract(&self, cells: Vec<CellValue>) -> RawSaleRow {
        let mut row = RawSaleRow::default();
        for (cell, column) in cells.into_iter().zip(&self.columns) {
            if let Some(column) = column {
                *slot_mut(&mut row, *column) = cell;
            }
        }
        row
    }
}

fn slot_mut(row: &mut RawSaleRow, column: Column) -> &mut CellValue {
    match column {
        Column::OrderId => &mut row.order_id,
        Column::OrderDate => &mut row.order_date,
        Column::ShipDate => &mut row.ship_date,
        Column::ShipMode => &mut row.ship_mode,
        Column::Quantity => &mut row.quantity,
        Column::Discount => &mut row.discount,
        Column::Sales => &mut row.sales,
        Column::Profit => &mut row.profit,
        Column::Category => &mut row.category,
        Column::Subcategory => &mut row.subcategory,
        Column::ProductName => &mut row.product_name,
        Column::State => &mut row.state,
        Column::Country => &mut row.country,
        Column::Region => &mut row.region,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<CellValue> {
        values.iter().map(|v| CellValue::from(*v)).collect()
    }

    fn full_header() -> Vec<CellValue> {
        cells(&[
            "Order ID",
            "Order Date",
            "Ship Date",
            "Ship Mode",
            "Quantity",
            "Discount",
            "Sales",
            "Profit",
            "Category",
            "Sub-Category",
            "Product Name",
            "State",
            "Country",
            "Region",
        ])
    }

    #[test]
    fn test_resolve_full_header() {
        let header = SheetHeader::resolve(&full_header());
        assert!(header.is_ingestible());
        assert_eq!(header.index_of(Column::OrderId), Some(0));
        assert_eq!(header.index_of(Column::Subcategory), Some(9));
        assert_eq!(header.names()[1], "order_date");
    }

    #[test]
    fn test_resolve_reports_missing_required_columns() {
        let header = SheetHeader::resolve(&cells(&["Order ID", "Order Date", "Category"]));
        assert!(!header.is_ingestible());
        assert_eq!(
            header.missing(),
            &[Column::ShipDate, Column::ProductName, Column::Sales]
        );
    }

    #[test]
    fn test_header_variants_and_aliases() {
        let header = SheetHeader::resolve(&cells(&[
            "ORDER_NUMBER",
            "order-date",
            "Ship Date ",
            "Product",
            "Sales Amount",
        ]));
        assert!(header.is_ingestible());
        assert_eq!(header.index_of(Column::Sales), Some(4));
        assert_eq!(header.index_of(Column::ProductName), Some(3));
    }

    #[test]
    fn test_first_duplicate_column_wins() {
        let header = SheetHeader::resolve(&cells(&["Sales", "Order ID", "sales"]));
        assert_eq!(header.index_of(Column::Sales), Some(0));

        let row = header.extract(cells(&["10", "O1", "99"]));
        assert_eq!(row.sales, CellValue::from("10"));
    }

    #[test]
    fn test_extract_maps_by_position() {
        let header = SheetHeader::resolve(&cells(&["Notes", "Order ID", "", "Region"]));
        let row = header.extract(cells(&["ignored", "O7", "x", "West", "overflow"]));
        assert_eq!(row.order_id, CellValue::from("O7"));
        assert_eq!(row.region, CellValue::from("West"));
        assert_eq!(row.category, CellValue::Empty);
    }

    #[test]
    fn test_extract_short_row_leaves_trailing_columns_empty() {
        let header = SheetHeader::resolve(&full_header());
        let row = header.extract(cells(&["O1", "2021-01-05"]));
        assert_eq!(row.order_date, CellValue::from("2021-01-05"));
        assert_eq!(row.ship_date, CellValue::Empty);
    }
}
