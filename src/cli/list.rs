use super::ui;
use crate::core::record::{CurrencyRecord, RateStore, RecordQuery};
use anyhow::Result;
use comfy_table::Cell;

pub fn display_records(records: &[CurrencyRecord]) -> String {
    if records.is_empty() {
        return ui::style_text("No records stored", ui::StyleType::Subtle);
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Id"),
        ui::header_cell("Name"),
        ui::header_cell("Date"),
        ui::header_cell("Value"),
        ui::header_cell("Updated"),
    ]);
    for record in records {
        table.add_row(vec![
            ui::number_cell(record.id),
            Cell::new(&record.name),
            Cell::new(record.date.to_string()),
            ui::number_cell(record.value),
            Cell::new(record.updated_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }
    table.to_string()
}

pub async fn run(store: &dyn RateStore, query: &RecordQuery) -> Result<()> {
    let records = store.list(query).await?;
    println!("{}", display_records(&records));
    Ok(())
}
