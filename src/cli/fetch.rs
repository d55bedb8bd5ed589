use super::ui;
use crate::core::{Pipeline, ReconciliationReport, SourceStatus};
use anyhow::{Result, bail};
use comfy_table::Cell;

impl ReconciliationReport {
    pub fn display_as_table(&self) -> String {
        let mut sources = ui::new_styled_table();
        sources.set_header(vec![
            ui::header_cell("Source"),
            ui::header_cell("Status"),
            ui::header_cell("Details"),
        ]);
        for report in &self.sources {
            let details = match &report.status {
                SourceStatus::Succeeded { observations } => {
                    format!("{observations} rates")
                }
                SourceStatus::Failed { error } => ui::style_text(error, ui::StyleType::Error),
            };
            sources.add_row(vec![
                Cell::new(report.source.to_string()),
                ui::status_cell(report.succeeded()),
                Cell::new(details),
            ]);
        }

        let mut output = format!(
            "{}\n\n{sources}\n",
            ui::style_text("Sources", ui::StyleType::Title)
        );

        if self.updates.is_empty() {
            output.push_str(&format!(
                "\n{}\n",
                ui::style_text("No rates to store", ui::StyleType::Subtle)
            ));
            return output;
        }

        let mut rates = ui::new_styled_table();
        rates.set_header(vec![
            ui::header_cell("Name"),
            ui::header_cell("Date"),
            ui::header_cell("Value"),
        ]);
        for update in &self.updates {
            rates.add_row(vec![
                Cell::new(&update.name),
                Cell::new(update.date.to_string()),
                ui::number_cell(update.value),
            ]);
        }

        let written = format!(
            "{} inserted, {} updated",
            self.writes.inserted, self.writes.updated
        );
        output.push_str(&format!(
            "\n{}\n\n{rates}\n\n{} {}",
            ui::style_text("Rates", ui::StyleType::Title),
            ui::style_text("Stored:", ui::StyleType::TotalLabel),
            ui::style_text(&written, ui::StyleType::TotalValue),
        ));
        if self.writes.failed > 0 {
            output.push_str(&format!(
                ", {}",
                ui::style_text(
                    &format!("{} failed", self.writes.failed),
                    ui::StyleType::Error
                )
            ));
        }
        output.push('\n');
        output
    }
}

/// Runs the pipeline once and prints what happened. Only a run in which every
/// source failed is an error.
pub async fn run(pipeline: &Pipeline) -> Result<()> {
    let report = pipeline.run().await?;
    println!("{}", report.display_as_table());

    if report.all_sources_failed() {
        bail!("All rate sources failed, nothing was stored");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::{RateUpdate, UpsertSummary};
    use crate::core::{RateSource, SourceReport};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    #[test]
    fn test_display_lists_sources_and_rates() {
        let report = ReconciliationReport {
            sources: vec![
                SourceReport {
                    source: RateSource::BankPage,
                    status: SourceStatus::Failed {
                        error: "transport failure: connection refused".into(),
                    },
                },
                SourceReport {
                    source: RateSource::CentralBank,
                    status: SourceStatus::Succeeded { observations: 1 },
                },
            ],
            updates: vec![RateUpdate {
                name: "CBU-USD".into(),
                value: Decimal::new(1270050, 2),
                date: NaiveDate::from_ymd_opt(2024, 12, 10).unwrap(),
            }],
            writes: UpsertSummary {
                inserted: 1,
                updated: 0,
                failed: 0,
            },
        };

        let output = console::strip_ansi_codes(&report.display_as_table()).to_string();
        assert!(output.contains("bank-page"));
        assert!(output.contains("connection refused"));
        assert!(output.contains("central-bank"));
        assert!(output.contains("CBU-USD"));
        assert!(output.contains("12700.50"));
        assert!(output.contains("2024-12-10"));
        assert!(output.contains("1 inserted, 0 updated"));
    }

    #[test]
    fn test_display_without_rates() {
        let report = ReconciliationReport {
            sources: vec![SourceReport {
                source: RateSource::CentralBank,
                status: SourceStatus::Failed {
                    error: "no recognized currencies: feed returned no records".into(),
                },
            }],
            ..ReconciliationReport::default()
        };

        let output = console::strip_ansi_codes(&report.display_as_table()).to_string();
        assert!(output.contains("No rates to store"));
        assert!(!output.contains("inserted"));
    }
}
